//! Actions on the visible recovery session

use super::flow::FlowRequest;
use super::{LocationSurface, RecoveryController, RecoveryEvent, SessionView};
use crate::engine::RecoveryIntent;
use crate::gate::GateAction;
use crate::probe::ProbeMode;
use tokio::time::Instant;
use tracing::{debug, info, instrument};
use tt_types::{ErrorEnvelope, RecoveryAction, RecoveryGateOutcome, TorrentEntity};

/// Result of an automatic retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoRetryOutcome {
    /// Inside the retry cooldown; nothing was probed
    Skipped,
    Completed(RecoveryGateOutcome),
}

/// Handle for the recovery modal
#[derive(Debug, Clone)]
pub struct RecoveryModal {
    controller: RecoveryController,
}

impl RecoveryModal {
    pub(crate) fn new(controller: RecoveryController) -> Self {
        Self { controller }
    }

    pub fn session(&self) -> Option<SessionView> {
        self.controller.state().session
    }

    /// Re-probe the visible session
    pub async fn retry(&self) -> RecoveryGateOutcome {
        match self.controller.prepare_retry(false) {
            RetryPlan::Run(request) => self.controller.start_flow(request).await,
            RetryPlan::Skipped | RetryPlan::NoSession => RecoveryGateOutcome::NotApplied,
        }
    }

    /// Re-probe the visible session unless the retry cooldown is still running
    pub async fn auto_retry(&self) -> AutoRetryOutcome {
        match self.controller.prepare_retry(true) {
            RetryPlan::Run(request) => {
                AutoRetryOutcome::Completed(self.controller.start_flow(request).await)
            }
            RetryPlan::Skipped => AutoRetryOutcome::Skipped,
            RetryPlan::NoSession => AutoRetryOutcome::Completed(RecoveryGateOutcome::NotApplied),
        }
    }

    /// Dismiss the visible session as cancelled and promote the next one
    ///
    /// The dismissed torrent continues in the background.
    pub fn close(&self) -> bool {
        let closed = {
            let mut state = self.controller.lock();
            let active_before = state.sessions.active_fingerprint();
            let closed = state.sessions.take_active();
            if let Some(session) = &closed {
                if state.editor.as_ref().is_some_and(|editor| {
                    editor.torrent.id == session.torrent_id()
                        && editor.surface == LocationSurface::RecoveryModal
                }) {
                    state.editor = None;
                }
                self.controller.announce_queue(&state, active_before);
            }
            closed
        };

        let Some(mut session) = closed else {
            return false;
        };
        info!(
            torrent_id = session.torrent_id(),
            fingerprint = %session.fingerprint,
            "Recovery session closed"
        );
        session.resolve(RecoveryGateOutcome::Cancelled);
        self.controller
            .start_background(session.torrent.clone(), session.envelope.clone());
        true
    }

    /// Execute one of the session's recovery actions
    #[instrument(skip(self))]
    pub async fn apply(&self, action: RecoveryAction) -> RecoveryGateOutcome {
        let Some((torrent, envelope)) = self.controller.active_target() else {
            return RecoveryGateOutcome::NotApplied;
        };
        let torrent_id = torrent.id;

        match action {
            RecoveryAction::Resume => {
                self.controller.clear_paused(torrent_id);
                let outcome = self
                    .controller
                    .dispatcher()
                    .dispatch(RecoveryIntent::EnsureTorrentActive { torrent_id })
                    .await;
                if !outcome.is_applied() {
                    return RecoveryGateOutcome::failed(outcome.reason_or_status());
                }
                self.reprobe(torrent, envelope, ProbeMode::Resume).await
            }
            RecoveryAction::ForceRecheck => {
                self.reprobe(torrent, envelope, ProbeMode::Recheck).await
            }
            RecoveryAction::ReDownload => {
                self.controller.clear_paused(torrent_id);
                self.reprobe(torrent, envelope, ProbeMode::DownloadMissing)
                    .await
            }
            RecoveryAction::Reannounce => {
                let outcome = self
                    .controller
                    .dispatcher()
                    .dispatch(RecoveryIntent::ReannounceTrackers { torrent_id })
                    .await;
                if !outcome.is_applied() {
                    return RecoveryGateOutcome::failed(outcome.reason_or_status());
                }
                self.controller
                    .resolve_session(&envelope.fingerprint, RecoveryGateOutcome::Applied);
                self.controller.start_background(torrent, envelope);
                RecoveryGateOutcome::Applied
            }
            RecoveryAction::Pause => {
                let outcome = self
                    .controller
                    .dispatcher()
                    .dispatch(RecoveryIntent::EnsureTorrentPaused { torrent_id })
                    .await;
                if !outcome.is_applied() {
                    return RecoveryGateOutcome::failed(outcome.reason_or_status());
                }
                self.controller
                    .resolve_session(&envelope.fingerprint, RecoveryGateOutcome::NotApplied);
                self.controller.mark_torrent_paused_by_user(torrent_id);
                RecoveryGateOutcome::NotApplied
            }
            RecoveryAction::SetLocation | RecoveryAction::ChangeLocation => {
                self.controller
                    .open_editor(&torrent, LocationSurface::RecoveryModal);
                RecoveryGateOutcome::NotApplied
            }
            RecoveryAction::OpenFolder | RecoveryAction::RemoveReadd => {
                debug!(%action, "Action belongs to another surface");
                RecoveryGateOutcome::failed("unsupported")
            }
        }
    }

    async fn reprobe(
        &self,
        torrent: TorrentEntity,
        envelope: ErrorEnvelope,
        mode: ProbeMode,
    ) -> RecoveryGateOutcome {
        self.controller
            .start_flow(FlowRequest {
                torrent,
                envelope,
                action: GateAction::Recheck,
                mode,
                suppress_feedback: true,
            })
            .await
    }
}

pub(crate) enum RetryPlan {
    Run(FlowRequest),
    Skipped,
    NoSession,
}

impl RecoveryController {
    /// Stamp a retry on the visible session and build its request
    pub(crate) fn prepare_retry(&self, automatic: bool) -> RetryPlan {
        let cooldown = self.config().retry_cooldown;
        let mut state = self.lock();
        let Some(session) = state.sessions.active_mut() else {
            return RetryPlan::NoSession;
        };

        let now = Instant::now();
        if automatic && session.cooldown_until.is_some_and(|until| now < until) {
            debug!(torrent_id = session.torrent_id(), "Automatic retry inside cooldown");
            return RetryPlan::Skipped;
        }
        session.cooldown_until = Some(now + cooldown);
        session.envelope.next_retry_at = chrono::Duration::from_std(cooldown)
            .ok()
            .map(|delay| chrono::Utc::now() + delay);
        let retry_count = session.record_retry();
        debug!(torrent_id = session.torrent_id(), retry_count, automatic, "Retrying recovery session");

        let request = FlowRequest {
            torrent: session.torrent.clone(),
            envelope: session.envelope.clone(),
            action: GateAction::Recheck,
            mode: ProbeMode::Resume,
            suppress_feedback: true,
        };
        let fingerprint = session.fingerprint.clone();
        drop(state);
        self.emit(RecoveryEvent::SessionChanged {
            fingerprint: Some(fingerprint),
        });
        RetryPlan::Run(request)
    }

    pub(crate) fn active_target(&self) -> Option<(TorrentEntity, ErrorEnvelope)> {
        self.lock()
            .sessions
            .active()
            .map(|session| (session.torrent.clone(), session.envelope.clone()))
    }
}
