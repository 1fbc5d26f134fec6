//! Background auto-continuation
//!
//! Per-torrent cycle that keeps re-probing a broken torrent after the UI has
//! moved on. Each cycle sleeps a cooldown, skips torrents bound to a visible or
//! queued session, probes in resume mode and stops once the torrent recovers
//! or its ownership token is invalidated. Probe failures count as a no-op and
//! never end the cycle.
//!
//! ```text
//! idle ──cooldown──▶ probing ──▶ resolved (stop)
//!   ▲                   │
//!   │                   ├──▶ waitingGrace ──▶ probing
//!   └───── noop ────────┴──▶ blocked ──cooldown──▶ probing
//! ```

use super::flow::awaits_grace;
use super::ownership::OwnershipToken;
use super::{RecoveryController, RecoveryEvent};
use crate::gate::{determine_disposition, Disposition, GateAction, GateContext};
use crate::probe::{ProbeMode, ProbeReport};
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use tracing::{debug, info, instrument};
use tt_types::{ErrorEnvelope, RecoveryGateOutcome, RecoveryOutcome, TorrentEntity, TorrentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum BackgroundPhase {
    Idle,
    Probing,
    WaitingGrace,
    Blocked,
    Resolved,
}

/// Diagnostic view of one background cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundStatus {
    pub torrent_id: TorrentId,
    pub fingerprint: String,
    pub phase: BackgroundPhase,
    pub attempts: u32,
}

#[derive(Debug)]
pub(crate) struct BackgroundEntry {
    token: OwnershipToken,
    torrent: TorrentEntity,
    envelope: ErrorEnvelope,
    phase: BackgroundPhase,
    attempts: u32,
}

impl BackgroundEntry {
    pub fn status(&self) -> BackgroundStatus {
        BackgroundStatus {
            torrent_id: self.torrent.id,
            fingerprint: self.envelope.fingerprint.clone(),
            phase: self.phase,
            attempts: self.attempts,
        }
    }
}

enum Step {
    Stop,
    Skip,
    Probe(TorrentEntity, ErrorEnvelope),
}

impl RecoveryController {
    /// Start (or refresh) the background cycle for a torrent
    pub(crate) fn start_background(&self, torrent: TorrentEntity, envelope: ErrorEnvelope) {
        let token = {
            let mut state = self.lock();
            if state.ownership.is_closed() {
                return;
            }
            if state.paused.contains(&torrent.id) {
                debug!(torrent_id = torrent.id, "Torrent paused by user, no background cycle");
                return;
            }
            let token = state.ownership.claim(torrent.id);
            if let Some(entry) = state
                .background
                .get_mut(&torrent.id)
                .filter(|entry| entry.token == token)
            {
                entry.torrent = torrent;
                entry.envelope = envelope;
                return;
            }
            debug!(torrent_id = torrent.id, "Starting background recovery cycle");
            state.background.insert(
                torrent.id,
                BackgroundEntry {
                    token,
                    torrent,
                    envelope,
                    phase: BackgroundPhase::Idle,
                    attempts: 0,
                },
            );
            token
        };

        let controller = self.clone();
        tokio::spawn(async move { controller.run_background(token).await });
    }

    #[instrument(skip(self), fields(torrent_id = token.torrent_id))]
    async fn run_background(&self, token: OwnershipToken) {
        loop {
            tokio::time::sleep(self.config().background_cooldown).await;
            let (torrent, envelope) = match self.background_step(&token) {
                Step::Stop => {
                    debug!("Background cycle stopped");
                    return;
                }
                Step::Skip => continue,
                Step::Probe(torrent, envelope) => (torrent, envelope),
            };

            let mut report = self
                .probe_shared(&torrent, &envelope, ProbeMode::Resume)
                .await;
            if !self.background_owned(&token) {
                return;
            }

            let mut grace_used = false;
            if awaits_grace(&report) {
                self.set_background_phase(&token, BackgroundPhase::WaitingGrace);
                tokio::time::sleep(self.config().escalation_grace).await;
                if !self.background_owned(&token) {
                    return;
                }
                report = self
                    .probe_shared(&torrent, &envelope, ProbeMode::Resume)
                    .await;
                if !self.background_owned(&token) {
                    return;
                }
                grace_used = true;
            }

            let context = GateContext::new(GateAction::Background)
                .with_escalation_grace(grace_used)
                .with_suppressed_feedback(true);
            let disposition = determine_disposition(&report.flow, &context);
            match (disposition, report.outcome()) {
                (_, Some(RecoveryOutcome::AutoRecovered)) => {
                    self.resolve_background(&token, &envelope);
                    return;
                }
                (_, Some(RecoveryOutcome::Cancelled)) => {
                    self.drop_background(&token);
                    return;
                }
                (Disposition::ShowModal { .. } | Disposition::Blocked { .. }, _) => {
                    self.record_attempt(&token, BackgroundPhase::Blocked, &report);
                }
                _ => self.record_attempt(&token, BackgroundPhase::Idle, &report),
            }
        }
    }

    fn background_step(&self, token: &OwnershipToken) -> Step {
        if !self.background_owned(token) {
            return Step::Stop;
        }
        let mut state = self.lock();
        let modal_bound = state.sessions.has_torrent(token.torrent_id);
        let Some(entry) = state
            .background
            .get_mut(&token.torrent_id)
            .filter(|entry| entry.token == *token)
        else {
            return Step::Stop;
        };
        if modal_bound {
            entry.phase = BackgroundPhase::Idle;
            return Step::Skip;
        }
        entry.phase = BackgroundPhase::Probing;
        Step::Probe(entry.torrent.clone(), entry.envelope.clone())
    }

    /// Whether the cycle still owns its torrent; a stale entry is removed
    fn background_owned(&self, token: &OwnershipToken) -> bool {
        let mut state = self.lock();
        if state.ownership.owns(token) {
            return true;
        }
        if state
            .background
            .get(&token.torrent_id)
            .is_some_and(|entry| entry.token == *token)
        {
            state.background.remove(&token.torrent_id);
        }
        false
    }

    fn set_background_phase(&self, token: &OwnershipToken, phase: BackgroundPhase) {
        let mut state = self.lock();
        if let Some(entry) = state
            .background
            .get_mut(&token.torrent_id)
            .filter(|entry| entry.token == *token)
        {
            entry.phase = phase;
        }
    }

    fn record_attempt(&self, token: &OwnershipToken, phase: BackgroundPhase, report: &ProbeReport) {
        let mut state = self.lock();
        if let Some(entry) = state
            .background
            .get_mut(&token.torrent_id)
            .filter(|entry| entry.token == *token)
        {
            entry.phase = phase;
            entry.attempts = entry.attempts.saturating_add(1);
            debug!(
                phase = %phase,
                attempts = entry.attempts,
                failure = report.failure.as_deref().unwrap_or(""),
                "Background probe did not resolve"
            );
        }
    }

    fn drop_background(&self, token: &OwnershipToken) {
        let mut state = self.lock();
        if state
            .background
            .get(&token.torrent_id)
            .is_some_and(|entry| entry.token == *token)
        {
            state.background.remove(&token.torrent_id);
        }
    }

    fn resolve_background(&self, token: &OwnershipToken, envelope: &ErrorEnvelope) {
        self.set_background_phase(token, BackgroundPhase::Resolved);
        self.drop_background(token);
        self.resolve_session(&envelope.fingerprint, RecoveryGateOutcome::Applied);
        info!(torrent_id = token.torrent_id, "Background recovery resolved");
        self.emit(RecoveryEvent::BackgroundResolved {
            torrent_id: token.torrent_id,
        });
    }
}
