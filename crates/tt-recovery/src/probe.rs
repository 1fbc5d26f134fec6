//! Recovery Probe
//!
//! Side-effecting check that decides whether a flagged error is still real.
//! The probe refreshes the torrent from the engine, rebuilds its envelope,
//! inspects the download directory and, depending on the mode, dispatches the
//! engine step that can fix the error without the user (verify, resume,
//! reannounce). It returns a session-level outcome plus a refined
//! missing-files classification.

use crate::engine::{DispatchStatus, EngineClient, IntentDispatcher, RecoveryIntent};
use crate::envelope::build_error_envelope;
use crate::error::{EngineError, RecoveryError};
use crate::gate::RecoveryFlowResult;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};
use tt_types::{
    Confidence, ErrorClass, ErrorEnvelope, MissingFilesClassification, MissingFilesKind,
    RecoveryAction, RecoveryOutcome, RecoveryReason, TorrentEntity, TorrentId,
};

/// Asked right before the probe restarts a stopped torrent
pub type ActivationGuard<'a> = &'a (dyn Fn(TorrentId) -> bool + Send + Sync);

/// Result of asking the engine to restart a torrent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activation {
    Started,
    Held,
    Unsupported,
}

/// What the probe is allowed to do while checking
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProbeMode {
    /// Check, and restart the torrent if the error has cleared
    Resume,
    /// Check, and re-verify local data when the directory exists
    Recheck,
    /// Re-verify and restart so missing pieces are fetched again
    DownloadMissing,
    /// Point the torrent at `path` first, then verify there
    Relocate { path: String },
}

impl fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeMode::Resume => f.write_str("resume"),
            ProbeMode::Recheck => f.write_str("recheck"),
            ProbeMode::DownloadMissing => f.write_str("downloadMissing"),
            ProbeMode::Relocate { path } => write!(f, "relocate:{path}"),
        }
    }
}

/// Probe result plus what the probe learned about the torrent
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub flow: RecoveryFlowResult,
    /// Torrent as the engine reported it during the probe
    pub torrent: Option<TorrentEntity>,
    /// Envelope rebuilt from the fresh detail
    pub envelope: Option<ErrorEnvelope>,
    /// Why no outcome was produced, when the probe failed
    pub failure: Option<String>,
}

impl ProbeReport {
    pub fn decided(
        outcome: RecoveryOutcome,
        classification: MissingFilesClassification,
        torrent: Option<TorrentEntity>,
        envelope: Option<ErrorEnvelope>,
    ) -> Self {
        Self {
            flow: RecoveryFlowResult::NeedsDisposition {
                outcome,
                classification,
            },
            torrent,
            envelope,
            failure: None,
        }
    }

    /// No outcome because the probe itself failed
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            flow: RecoveryFlowResult::NoOutcome,
            torrent: None,
            envelope: None,
            failure: Some(reason.into()),
        }
    }

    pub fn outcome(&self) -> Option<&RecoveryOutcome> {
        match &self.flow {
            RecoveryFlowResult::NeedsDisposition { outcome, .. } => Some(outcome),
            RecoveryFlowResult::NoOutcome => None,
        }
    }

    pub fn classification(&self) -> Option<&MissingFilesClassification> {
        match &self.flow {
            RecoveryFlowResult::NeedsDisposition { classification, .. } => Some(classification),
            RecoveryFlowResult::NoOutcome => None,
        }
    }
}

/// Runs probes against one engine
#[derive(Clone)]
pub struct RecoveryProbe {
    engine: Arc<dyn EngineClient>,
    dispatcher: IntentDispatcher,
}

impl fmt::Debug for RecoveryProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryProbe").finish_non_exhaustive()
    }
}

impl RecoveryProbe {
    pub fn new(engine: Arc<dyn EngineClient>) -> Self {
        let dispatcher = IntentDispatcher::new(engine.clone());
        Self { engine, dispatcher }
    }

    /// Probe one torrent against the envelope the request was made for
    pub async fn run(
        &self,
        torrent: &TorrentEntity,
        envelope: &ErrorEnvelope,
        mode: &ProbeMode,
    ) -> Result<ProbeReport, RecoveryError> {
        self.run_guarded(torrent, envelope, mode, &|_: TorrentId| true)
            .await
    }

    /// Probe, restarting the torrent only while `may_activate` allows it
    #[instrument(
        skip(self, torrent, envelope, may_activate),
        fields(torrent_id = torrent.id, mode = %mode)
    )]
    pub async fn run_guarded(
        &self,
        torrent: &TorrentEntity,
        envelope: &ErrorEnvelope,
        mode: &ProbeMode,
        may_activate: ActivationGuard<'_>,
    ) -> Result<ProbeReport, RecoveryError> {
        if let ProbeMode::Relocate { path } = mode {
            let applied = self
                .apply(RecoveryIntent::EnsureTorrentAtLocation {
                    torrent_id: torrent.id,
                    path: path.clone(),
                    move_data: false,
                })
                .await?;
            if !applied {
                return Ok(unsupported("set_location", torrent.clone()));
            }
        }

        let detail = match self.engine.get_torrent_details(torrent.id).await {
            Ok(detail) => detail,
            Err(EngineError::TorrentNotFound { .. }) => {
                debug!("Torrent disappeared from engine during probe");
                return Ok(ProbeReport::decided(
                    RecoveryOutcome::Blocked {
                        reason: RecoveryReason::TorrentMissing,
                        message: format!("Torrent {} no longer exists", torrent.name),
                    },
                    MissingFilesClassification::new(
                        MissingFilesKind::Unknown,
                        Confidence::Certain,
                        Vec::new(),
                    ),
                    None,
                    None,
                ));
            }
            Err(err) => return Err(err.into()),
        };

        let capabilities = self.engine.capabilities();
        let fresh = build_error_envelope(&detail.torrent, Some(&detail), Some(&capabilities));
        let current = detail.torrent.clone();
        debug!(
            previous = %envelope.error_class,
            current = %fresh.error_class,
            "Rebuilt envelope from engine detail"
        );

        let (outcome, classification) = match fresh.error_class {
            ErrorClass::None => {
                if matches!(mode, ProbeMode::Resume | ProbeMode::DownloadMissing)
                    && current.status.is_stopped()
                {
                    self.activate(current.id, may_activate).await?;
                }
                (
                    RecoveryOutcome::AutoRecovered,
                    MissingFilesClassification::new(
                        MissingFilesKind::Resolved,
                        Confidence::Certain,
                        Vec::new(),
                    ),
                )
            }
            ErrorClass::DiskFull => self.probe_disk_space(&current, may_activate).await?,
            ErrorClass::PermissionDenied => access_denied(),
            ErrorClass::TrackerWarning | ErrorClass::TrackerError => {
                self.probe_trackers(&current, fresh.error_class, mode, may_activate)
                    .await?
            }
            ErrorClass::Metadata => self.probe_metadata(&current).await?,
            ErrorClass::LocalError
            | ErrorClass::MissingFiles
            | ErrorClass::PartialFiles
            | ErrorClass::Unknown => {
                self.probe_local_data(&current, envelope, &fresh, mode, may_activate)
                    .await?
            }
        };

        debug!(
            outcome = outcome.kind(),
            kind = %classification.kind,
            confidence = %classification.confidence,
            "Probe finished"
        );
        Ok(ProbeReport::decided(
            outcome,
            classification,
            Some(current),
            Some(fresh),
        ))
    }

    /// Dispatch an intent; `Ok(false)` when the engine does not support it
    async fn apply(&self, intent: RecoveryIntent) -> Result<bool, RecoveryError> {
        let name = intent.name();
        let outcome = self.dispatcher.dispatch(intent).await;
        match outcome.status {
            DispatchStatus::Applied => Ok(true),
            DispatchStatus::Unsupported => Ok(false),
            DispatchStatus::Failed => Err(EngineError::rpc(name, outcome.reason_or_status()).into()),
        }
    }

    /// Restart a stopped torrent unless its owner holds it stopped
    async fn activate(
        &self,
        torrent_id: TorrentId,
        may_activate: ActivationGuard<'_>,
    ) -> Result<Activation, RecoveryError> {
        if !may_activate(torrent_id) {
            debug!(torrent_id, "Torrent held stopped, not resuming");
            return Ok(Activation::Held);
        }
        let started = self
            .apply(RecoveryIntent::EnsureTorrentActive { torrent_id })
            .await?;
        Ok(if started {
            Activation::Started
        } else {
            Activation::Unsupported
        })
    }

    async fn probe_disk_space(
        &self,
        torrent: &TorrentEntity,
        may_activate: ActivationGuard<'_>,
    ) -> Result<(RecoveryOutcome, MissingFilesClassification), RecoveryError> {
        match self.engine.check_free_space(&torrent.download_dir).await {
            Ok(space) if space.free_bytes > 0 && space.free_bytes >= torrent.left_until_done => {
                let outcome = match self.activate(torrent.id, may_activate).await? {
                    Activation::Started => RecoveryOutcome::AutoRecovered,
                    Activation::Held => RecoveryOutcome::Blocked {
                        reason: RecoveryReason::PausedByUser,
                        message: format!("{} has room again but is paused", torrent.name),
                    },
                    Activation::Unsupported => RecoveryOutcome::Blocked {
                        reason: RecoveryReason::Unsupported,
                        message: "Engine cannot resume this torrent".to_string(),
                    },
                };
                Ok((
                    outcome,
                    MissingFilesClassification::new(
                        MissingFilesKind::InsufficientSpace,
                        Confidence::Certain,
                        vec![RecoveryAction::Resume],
                    ),
                ))
            }
            Ok(space) => Ok((
                RecoveryOutcome::Blocked {
                    reason: RecoveryReason::InsufficientSpace,
                    message: format!(
                        "{} bytes needed, {} bytes free in {}",
                        torrent.left_until_done, space.free_bytes, torrent.download_dir
                    ),
                },
                MissingFilesClassification::new(
                    MissingFilesKind::InsufficientSpace,
                    Confidence::Certain,
                    vec![RecoveryAction::Pause, RecoveryAction::Resume],
                ),
            )),
            Err(EngineError::PathNotFound { .. }) => Ok(path_missing()),
            Err(EngineError::PermissionDenied { .. }) => Ok(access_denied()),
            Err(err) => Err(err.into()),
        }
    }

    async fn probe_trackers(
        &self,
        torrent: &TorrentEntity,
        class: ErrorClass,
        mode: &ProbeMode,
        may_activate: ActivationGuard<'_>,
    ) -> Result<(RecoveryOutcome, MissingFilesClassification), RecoveryError> {
        let classification = MissingFilesClassification::new(
            MissingFilesKind::TrackerIssue,
            Confidence::Likely,
            vec![RecoveryAction::Reannounce, RecoveryAction::Pause],
        );

        let reannounced = self
            .apply(RecoveryIntent::ReannounceTrackers {
                torrent_id: torrent.id,
            })
            .await?;

        if matches!(mode, ProbeMode::Resume | ProbeMode::DownloadMissing)
            && torrent.status.is_stopped()
        {
            self.activate(torrent.id, may_activate).await?;
        }

        let outcome = if reannounced || class == ErrorClass::TrackerWarning {
            RecoveryOutcome::AutoInProgress
        } else {
            RecoveryOutcome::Blocked {
                reason: RecoveryReason::TrackerUnreachable,
                message: torrent.error_string.clone(),
            }
        };
        Ok((outcome, classification))
    }

    async fn probe_metadata(
        &self,
        torrent: &TorrentEntity,
    ) -> Result<(RecoveryOutcome, MissingFilesClassification), RecoveryError> {
        let reannounced = self
            .apply(RecoveryIntent::ReannounceTrackers {
                torrent_id: torrent.id,
            })
            .await?;
        let outcome = if reannounced {
            RecoveryOutcome::AutoInProgress
        } else {
            RecoveryOutcome::NeedsUserDecision {
                reason: RecoveryReason::MetadataUnavailable,
            }
        };
        Ok((
            outcome,
            MissingFilesClassification::new(
                MissingFilesKind::MetadataIssue,
                Confidence::Likely,
                vec![RecoveryAction::Reannounce, RecoveryAction::RemoveReadd],
            ),
        ))
    }

    async fn probe_local_data(
        &self,
        torrent: &TorrentEntity,
        previous: &ErrorEnvelope,
        fresh: &ErrorEnvelope,
        mode: &ProbeMode,
        may_activate: ActivationGuard<'_>,
    ) -> Result<(RecoveryOutcome, MissingFilesClassification), RecoveryError> {
        match self.engine.check_free_space(&torrent.download_dir).await {
            Ok(_) => {}
            Err(EngineError::PathNotFound { .. }) => return Ok(path_missing()),
            Err(EngineError::PermissionDenied { .. }) => return Ok(access_denied()),
            Err(err) => return Err(err.into()),
        }

        let (kind, reason) = match fresh.error_class {
            ErrorClass::MissingFiles => (MissingFilesKind::FilesMissing, RecoveryReason::FilesMissing),
            ErrorClass::PartialFiles => (MissingFilesKind::PartialFiles, RecoveryReason::PartialData),
            _ => (MissingFilesKind::Unknown, RecoveryReason::Unexplained),
        };
        let classification = MissingFilesClassification::new(
            kind,
            Confidence::Likely,
            vec![RecoveryAction::ForceRecheck, RecoveryAction::ReDownload],
        );

        match mode {
            ProbeMode::Resume => {
                let contradicts_request = previous.error_class.is_file_level()
                    && previous.error_class != fresh.error_class;
                let classification = if contradicts_request {
                    classification.with_conflict()
                } else {
                    classification
                };
                Ok((RecoveryOutcome::NeedsUserDecision { reason }, classification))
            }
            ProbeMode::Recheck | ProbeMode::Relocate { .. } | ProbeMode::DownloadMissing => {
                let verifying = self
                    .apply(RecoveryIntent::EnsureDataVerified {
                        torrent_id: torrent.id,
                    })
                    .await?;
                if !verifying {
                    return Ok((
                        RecoveryOutcome::Blocked {
                            reason: RecoveryReason::Unsupported,
                            message: "Engine cannot verify this torrent".to_string(),
                        },
                        classification,
                    ));
                }
                if matches!(mode, ProbeMode::DownloadMissing) {
                    self.activate(torrent.id, may_activate).await?;
                }
                Ok((RecoveryOutcome::AutoInProgress, classification))
            }
        }
    }
}

fn path_missing() -> (RecoveryOutcome, MissingFilesClassification) {
    (
        RecoveryOutcome::NeedsUserDecision {
            reason: RecoveryReason::PathMissing,
        },
        MissingFilesClassification::new(
            MissingFilesKind::PathMissing,
            Confidence::Certain,
            vec![RecoveryAction::SetLocation, RecoveryAction::ReDownload],
        ),
    )
}

fn access_denied() -> (RecoveryOutcome, MissingFilesClassification) {
    (
        RecoveryOutcome::NeedsUserDecision {
            reason: RecoveryReason::AccessDenied,
        },
        MissingFilesClassification::new(
            MissingFilesKind::AccessDenied,
            Confidence::Certain,
            vec![RecoveryAction::ChangeLocation, RecoveryAction::OpenFolder],
        ),
    )
}

fn unsupported(operation: &str, torrent: TorrentEntity) -> ProbeReport {
    ProbeReport::decided(
        RecoveryOutcome::Blocked {
            reason: RecoveryReason::Unsupported,
            message: format!("Engine does not support {operation}"),
        },
        MissingFilesClassification::new(MissingFilesKind::Unknown, Confidence::Certain, Vec::new()),
        Some(torrent),
        None,
    )
}
