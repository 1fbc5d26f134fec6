//! Manual location editor
//!
//! Outside of an active recovery a location change is submitted as-is and the
//! engine moves the data. For a torrent with an actionable error the new path
//! is only pointed at (no data move) and re-probed before the editor resolves.

use super::flow::gate_outcome;
use super::ownership::OwnershipToken;
use super::{FeedbackKind, RecoveryController};
use crate::engine::RecoveryIntent;
use crate::error::LocationValidationReason;
use crate::gate::{determine_disposition, Disposition, GateAction, GateContext};
use crate::probe::ProbeMode;
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use tracing::{debug, info, instrument};
use tt_types::{ErrorEnvelope, RecoveryGateOutcome, RecoveryOutcome, TorrentEntity, TorrentId};

/// UI surface an editor is rendered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum LocationSurface {
    ContextMenu,
    Inspector,
    RecoveryModal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LocationMode {
    /// Open the editor for typing
    Manual,
    /// A directory was already picked; confirm it right away
    Browse { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLocationRequest {
    pub surface: LocationSurface,
    pub mode: LocationMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum EditorStatus {
    Editing,
    Submitting,
    Verifying,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationEditorState {
    pub torrent: TorrentEntity,
    pub surface: LocationSurface,
    pub path: String,
    pub status: EditorStatus,
    /// Validation reason code or failure text from the last confirm
    pub error: Option<String>,
}

/// Result of a set-location request or confirm
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SetLocationOutcome {
    ManualOpened,
    /// Location changed without recovery
    Submitted,
    /// Location re-probed for an active recovery
    Verified { recovered: bool },
    ValidationError { reason: LocationValidationReason },
    Failed { reason: String },
    Cancelled,
    /// No editor is open
    NotOpen,
}

/// Whether a path is absolute in POSIX, drive-letter or UNC form
pub fn is_absolute_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/')
        || path.starts_with("\\\\")
        || (bytes.len() >= 3
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes[2] == b'\\' || bytes[2] == b'/'))
}

/// Trimmed path, or the reason it cannot be used
pub fn validate_location(path: &str) -> Result<String, LocationValidationReason> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(LocationValidationReason::PathRequired);
    }
    if !is_absolute_path(trimmed) {
        return Err(LocationValidationReason::PathNotAbsolute);
    }
    Ok(trimmed.to_string())
}

/// Handle for the location editor
#[derive(Debug, Clone)]
pub struct LocationEditor {
    controller: RecoveryController,
}

impl LocationEditor {
    pub(crate) fn new(controller: RecoveryController) -> Self {
        Self { controller }
    }

    pub fn state(&self) -> Option<LocationEditorState> {
        self.controller.lock().editor.clone()
    }

    /// Replace the typed path; false when no editor is open
    pub fn change(&self, path: impl Into<String>) -> bool {
        let mut state = self.controller.lock();
        match state.editor.as_mut() {
            Some(editor) => {
                editor.path = path.into();
                editor.error = None;
                true
            }
            None => false,
        }
    }

    pub fn cancel(&self) -> bool {
        self.controller.lock().editor.take().is_some()
    }

    #[instrument(skip(self))]
    pub async fn confirm(&self) -> SetLocationOutcome {
        let plan = match self.controller.begin_confirm() {
            Ok(plan) => plan,
            Err(outcome) => return outcome,
        };
        match plan.envelope {
            Some(envelope) => {
                self.controller
                    .verify_location(plan.torrent, envelope, plan.path, plan.token)
                    .await
            }
            None => self.controller.submit_location(plan.torrent, plan.path).await,
        }
    }
}

/// Entry point for set-location requests from any surface
#[derive(Debug, Clone)]
pub struct SetLocationHandler {
    controller: RecoveryController,
}

impl SetLocationHandler {
    pub(crate) fn new(controller: RecoveryController) -> Self {
        Self { controller }
    }

    pub async fn handler(
        &self,
        torrent: &TorrentEntity,
        request: SetLocationRequest,
    ) -> SetLocationOutcome {
        self.controller.open_editor(torrent, request.surface);
        match request.mode {
            LocationMode::Manual => SetLocationOutcome::ManualOpened,
            LocationMode::Browse { path } => {
                let editor = self.controller.location_editor();
                editor.change(path);
                editor.confirm().await
            }
        }
    }
}

struct ConfirmPlan {
    torrent: TorrentEntity,
    path: String,
    /// Present when the torrent is under recovery
    envelope: Option<ErrorEnvelope>,
    token: OwnershipToken,
}

impl RecoveryController {
    /// Open the editor for a torrent, replacing any other editor
    pub(crate) fn open_editor(&self, torrent: &TorrentEntity, surface: LocationSurface) {
        let mut state = self.lock();
        debug!(torrent_id = torrent.id, %surface, "Opening location editor");
        state.editor = Some(LocationEditorState {
            torrent: torrent.clone(),
            surface,
            path: torrent.download_dir.clone(),
            status: EditorStatus::Editing,
            error: None,
        });
    }

    fn begin_confirm(&self) -> Result<ConfirmPlan, SetLocationOutcome> {
        let mut state = self.lock();
        let token_source = state.editor.as_ref().map(|editor| editor.torrent.id);
        let Some(torrent_id) = token_source else {
            return Err(SetLocationOutcome::NotOpen);
        };
        let token = state.ownership.claim(torrent_id);
        let Some(editor) = state.editor.as_mut() else {
            return Err(SetLocationOutcome::NotOpen);
        };
        if editor.status != EditorStatus::Editing {
            return Err(SetLocationOutcome::Failed {
                reason: "confirm_in_progress".to_string(),
            });
        }

        let path = match validate_location(&editor.path) {
            Ok(path) => path,
            Err(reason) => {
                editor.error = Some(reason.code().to_string());
                return Err(SetLocationOutcome::ValidationError { reason });
            }
        };

        let envelope = editor
            .torrent
            .error_envelope
            .clone()
            .filter(ErrorEnvelope::is_actionable);
        editor.status = if envelope.is_some() {
            EditorStatus::Verifying
        } else {
            EditorStatus::Submitting
        };
        editor.error = None;
        Ok(ConfirmPlan {
            torrent: editor.torrent.clone(),
            path,
            envelope,
            token,
        })
    }

    /// Settle the editor after a confirm: close it, or reopen it with an error
    fn settle_editor(&self, torrent_id: TorrentId, error: Option<String>) {
        let mut state = self.lock();
        if !state
            .editor
            .as_ref()
            .is_some_and(|editor| editor.torrent.id == torrent_id)
        {
            return;
        }
        match error {
            Some(error) => {
                if let Some(editor) = state.editor.as_mut() {
                    editor.status = EditorStatus::Editing;
                    editor.error = Some(error);
                }
            }
            None => state.editor = None,
        }
    }

    async fn submit_location(&self, torrent: TorrentEntity, path: String) -> SetLocationOutcome {
        let outcome = self
            .dispatcher()
            .dispatch(RecoveryIntent::EnsureTorrentAtLocation {
                torrent_id: torrent.id,
                path: path.clone(),
                move_data: true,
            })
            .await;
        if outcome.is_applied() {
            info!(torrent_id = torrent.id, path = %path, "Torrent location submitted");
            self.settle_editor(torrent.id, None);
            SetLocationOutcome::Submitted
        } else {
            let reason = outcome.reason_or_status();
            self.settle_editor(torrent.id, Some(reason.clone()));
            SetLocationOutcome::Failed { reason }
        }
    }

    async fn verify_location(
        &self,
        torrent: TorrentEntity,
        envelope: ErrorEnvelope,
        path: String,
        token: OwnershipToken,
    ) -> SetLocationOutcome {
        let report = self
            .probe_shared(&torrent, &envelope, ProbeMode::Relocate { path })
            .await;
        if !self.owns(&token) {
            self.settle_editor(torrent.id, None);
            return SetLocationOutcome::Cancelled;
        }

        let fingerprint = envelope.fingerprint.as_str();
        let context = GateContext::new(GateAction::SetLocation)
            .with_active_session(self.has_session(fingerprint));
        let disposition = determine_disposition(&report.flow, &context);
        debug!(?disposition, torrent_id = torrent.id, "Location verified");

        let (outcome, classification) = match (report.outcome(), report.classification()) {
            (Some(outcome), Some(classification)) => (outcome.clone(), classification.clone()),
            _ => {
                return match report.failure.clone() {
                    Some(reason) => {
                        self.settle_editor(torrent.id, Some(reason.clone()));
                        SetLocationOutcome::Failed { reason }
                    }
                    None => {
                        self.settle_editor(torrent.id, None);
                        SetLocationOutcome::Verified { recovered: false }
                    }
                };
            }
        };

        self.settle_editor(torrent.id, None);
        match disposition {
            Disposition::ShowModal { join_existing } => {
                let updated = join_existing
                    && self
                        .update_session(fingerprint, outcome.clone(), classification.clone())
                        .is_some();
                if !updated {
                    // The session completion is observed by whoever opened it.
                    let _ = self.enqueue_session(torrent, envelope, outcome, classification);
                }
                SetLocationOutcome::Verified { recovered: false }
            }
            Disposition::Blocked {
                update_session,
                show_feedback,
            } => {
                if show_feedback {
                    self.feedback(
                        torrent.id,
                        FeedbackKind::Blocked,
                        format!("{} is still blocked at the new location", torrent.name),
                    );
                }
                if update_session {
                    self.update_session(fingerprint, outcome, classification);
                }
                self.start_background(torrent, envelope);
                SetLocationOutcome::Verified { recovered: false }
            }
            _ => match gate_outcome(&outcome) {
                RecoveryGateOutcome::Applied => {
                    self.resolve_session(fingerprint, RecoveryGateOutcome::Applied);
                    self.feedback(
                        torrent.id,
                        FeedbackKind::Recovered,
                        format!("{} recovered", torrent.name),
                    );
                    if outcome == RecoveryOutcome::AutoInProgress {
                        self.start_background(torrent, envelope);
                    }
                    SetLocationOutcome::Verified { recovered: true }
                }
                RecoveryGateOutcome::Cancelled => SetLocationOutcome::Cancelled,
                _ => SetLocationOutcome::Verified { recovered: false },
            },
        }
    }
}
