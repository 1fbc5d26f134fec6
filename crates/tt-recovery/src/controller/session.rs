//! Recovery sessions and the pending queue
//!
//! Exactly one session is visible at a time. Requests for other incidents wait
//! in arrival order and are promoted when the visible session goes away. Each
//! incident (fingerprint) owns at most one session, active or queued.

use super::completion::{completion_pair, CompletionResolver, RecoveryCompletion};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use tokio::time::Instant;
use tt_types::{
    ErrorClass, ErrorEnvelope, MissingFilesClassification, MissingFilesKind, RecoveryGateOutcome,
    RecoveryOutcome, RecoveryReason, TorrentEntity, TorrentId,
};
use uuid::Uuid;

/// One recovery session, owned by the controller
#[derive(Debug)]
pub(crate) struct RecoverySession {
    pub id: Uuid,
    pub torrent: TorrentEntity,
    /// Envelope the session was opened for, stamped with session bookkeeping
    pub envelope: ErrorEnvelope,
    pub outcome: RecoveryOutcome,
    pub classification: MissingFilesClassification,
    pub fingerprint: String,
    pub opened_at: DateTime<Utc>,
    pub completion: RecoveryCompletion,
    resolver: Option<CompletionResolver>,
    /// Automatic retries are skipped until this instant
    pub cooldown_until: Option<Instant>,
}

impl RecoverySession {
    pub fn new(
        torrent: TorrentEntity,
        mut envelope: ErrorEnvelope,
        outcome: RecoveryOutcome,
        classification: MissingFilesClassification,
    ) -> Self {
        let opened_at = Utc::now();
        envelope.last_error_at = Some(opened_at);
        envelope.retry_count = Some(0);
        envelope.next_retry_at = None;

        let (resolver, completion) = completion_pair();
        Self {
            id: Uuid::new_v4(),
            fingerprint: envelope.fingerprint.clone(),
            torrent,
            envelope,
            outcome,
            classification,
            opened_at,
            completion,
            resolver: Some(resolver),
            cooldown_until: None,
        }
    }

    /// Session opened straight from an envelope, before any probe
    pub fn from_envelope(torrent: TorrentEntity, envelope: ErrorEnvelope) -> Self {
        let outcome = initial_outcome(&envelope);
        let classification =
            MissingFilesClassification::from_error_class(envelope.error_class, &envelope.recovery_actions);
        Self::new(torrent, envelope, outcome, classification)
    }

    pub fn torrent_id(&self) -> TorrentId {
        self.torrent.id
    }

    /// Settle the session's completion; later calls are ignored
    pub fn resolve(&mut self, outcome: RecoveryGateOutcome) {
        if let Some(resolver) = self.resolver.take() {
            resolver.resolve(outcome);
        }
    }

    /// Count a retry and stamp it on the session envelope
    pub fn record_retry(&mut self) -> u32 {
        let count = self.envelope.retry_count.unwrap_or(0).saturating_add(1);
        self.envelope.retry_count = Some(count);
        count
    }

    pub fn update(&mut self, outcome: RecoveryOutcome, classification: MissingFilesClassification) {
        self.outcome = outcome;
        self.classification = classification;
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            torrent: self.torrent.clone(),
            envelope: self.envelope.clone(),
            outcome: self.outcome.clone(),
            classification: self.classification.clone(),
            fingerprint: self.fingerprint.clone(),
            opened_at: self.opened_at,
        }
    }

    fn queued_item(&self) -> QueuedItem {
        QueuedItem {
            torrent_id: self.torrent.id,
            torrent_name: self.torrent.name.clone(),
            kind: self.classification.kind,
            location_label: self.torrent.location_label(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

impl Drop for RecoverySession {
    fn drop(&mut self) {
        self.resolve(RecoveryGateOutcome::Cancelled);
    }
}

/// Outcome shown for a session opened without probing
pub(crate) fn initial_outcome(envelope: &ErrorEnvelope) -> RecoveryOutcome {
    let reason = match envelope.error_class {
        ErrorClass::DiskFull => {
            return RecoveryOutcome::Blocked {
                reason: RecoveryReason::InsufficientSpace,
                message: envelope.error_message.clone().unwrap_or_default(),
            }
        }
        ErrorClass::MissingFiles => RecoveryReason::FilesMissing,
        ErrorClass::PartialFiles => RecoveryReason::PartialData,
        ErrorClass::PermissionDenied => RecoveryReason::AccessDenied,
        ErrorClass::TrackerWarning | ErrorClass::TrackerError => RecoveryReason::TrackerUnreachable,
        ErrorClass::Metadata => RecoveryReason::MetadataUnavailable,
        ErrorClass::None | ErrorClass::LocalError | ErrorClass::Unknown => {
            RecoveryReason::Unexplained
        }
    };
    RecoveryOutcome::NeedsUserDecision { reason }
}

/// Read-only view of the visible session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Uuid,
    pub torrent: TorrentEntity,
    pub envelope: ErrorEnvelope,
    pub outcome: RecoveryOutcome,
    pub classification: MissingFilesClassification,
    pub fingerprint: String,
    pub opened_at: DateTime<Utc>,
}

/// Badge summary of one queued request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedItem {
    pub torrent_id: TorrentId,
    pub torrent_name: String,
    pub kind: MissingFilesKind,
    pub location_label: String,
    pub fingerprint: String,
}

/// Where a pushed session landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    Activated,
    Queued,
}

#[derive(Debug, Default)]
pub(crate) struct SessionQueue {
    active: Option<RecoverySession>,
    pending: VecDeque<RecoverySession>,
}

impl SessionQueue {
    pub fn active(&self) -> Option<&RecoverySession> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut RecoverySession> {
        self.active.as_mut()
    }

    pub fn is_active(&self, fingerprint: &str) -> bool {
        self.active
            .as_ref()
            .is_some_and(|session| session.fingerprint == fingerprint)
    }

    /// Session for an incident, active or queued
    pub fn find(&self, fingerprint: &str) -> Option<&RecoverySession> {
        self.active
            .iter()
            .chain(self.pending.iter())
            .find(|session| session.fingerprint == fingerprint)
    }

    pub fn find_mut(&mut self, fingerprint: &str) -> Option<&mut RecoverySession> {
        self.active
            .iter_mut()
            .chain(self.pending.iter_mut())
            .find(|session| session.fingerprint == fingerprint)
    }

    pub fn has_torrent(&self, torrent_id: TorrentId) -> bool {
        self.active
            .iter()
            .chain(self.pending.iter())
            .any(|session| session.torrent_id() == torrent_id)
    }

    /// Show the session now if nothing is visible, else queue it
    pub fn push(&mut self, session: RecoverySession) -> Placement {
        if self.active.is_none() {
            self.active = Some(session);
            Placement::Activated
        } else {
            self.pending.push_back(session);
            Placement::Queued
        }
    }

    /// Remove the session for an incident, promoting the queue head if it was visible
    pub fn take(&mut self, fingerprint: &str) -> Option<RecoverySession> {
        if self.is_active(fingerprint) {
            let taken = self.active.take();
            self.active = self.pending.pop_front();
            return taken;
        }
        let index = self
            .pending
            .iter()
            .position(|session| session.fingerprint == fingerprint)?;
        self.pending.remove(index)
    }

    /// Remove the visible session and promote the queue head
    pub fn take_active(&mut self) -> Option<RecoverySession> {
        let taken = self.active.take();
        self.active = self.pending.pop_front();
        taken
    }

    /// Remove every session for a torrent
    pub fn take_torrent(&mut self, torrent_id: TorrentId) -> Vec<RecoverySession> {
        let mut taken = Vec::new();
        if self
            .active
            .as_ref()
            .is_some_and(|session| session.torrent_id() == torrent_id)
        {
            taken.extend(self.active.take());
        }
        let (matching, rest): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|session| session.torrent_id() == torrent_id);
        self.pending = rest;
        taken.extend(matching);
        if self.active.is_none() {
            self.active = self.pending.pop_front();
        }
        taken
    }

    pub fn torrent_ids(&self) -> HashSet<TorrentId> {
        self.active
            .iter()
            .chain(self.pending.iter())
            .map(RecoverySession::torrent_id)
            .collect()
    }

    pub fn drain(&mut self) -> Vec<RecoverySession> {
        self.active.take().into_iter().chain(self.pending.drain(..)).collect()
    }

    pub fn queued_count(&self) -> usize {
        self.pending.len()
    }

    pub fn queued_items(&self) -> Vec<QueuedItem> {
        self.pending.iter().map(RecoverySession::queued_item).collect()
    }

    pub fn active_fingerprint(&self) -> Option<String> {
        self.active.as_ref().map(|session| session.fingerprint.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::build_error_envelope;

    fn session(id: TorrentId, name: &str) -> RecoverySession {
        let torrent = TorrentEntity::new(id, name)
            .with_hash(format!("hash{id}"))
            .with_error(3, "No data found on local disk")
            .with_download_dir(format!("/data/{name}"));
        let envelope = build_error_envelope(&torrent, None, None);
        RecoverySession::from_envelope(torrent, envelope)
    }

    #[test]
    fn test_fifo_promotion() {
        let mut queue = SessionQueue::default();
        let a = session(1, "a");
        let b = session(2, "b");
        let c = session(3, "c");
        let (fa, fb, fc) = (a.fingerprint.clone(), b.fingerprint.clone(), c.fingerprint.clone());

        assert_eq!(queue.push(a), Placement::Activated);
        assert_eq!(queue.push(b), Placement::Queued);
        assert_eq!(queue.push(c), Placement::Queued);
        assert_eq!(queue.queued_count(), 2);

        let closed = queue.take_active().expect("active session");
        assert_eq!(closed.fingerprint, fa);
        assert!(queue.is_active(&fb));
        assert_eq!(queue.queued_count(), 1);

        assert!(queue.take(&fc).is_some());
        assert_eq!(queue.queued_count(), 0);
        assert!(queue.is_active(&fb));
    }

    #[test]
    fn test_queued_items_summary() {
        let mut queue = SessionQueue::default();
        queue.push(session(1, "a"));
        queue.push(session(2, "debian"));
        let items = queue.queued_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].torrent_name, "debian");
        assert_eq!(items[0].location_label, "debian");
        assert_eq!(items[0].kind, MissingFilesKind::FilesMissing);
    }

    #[test]
    fn test_take_torrent_promotes() {
        let mut queue = SessionQueue::default();
        queue.push(session(1, "a"));
        queue.push(session(2, "b"));
        queue.push(session(1, "a-again"));
        let taken = queue.take_torrent(1);
        assert_eq!(taken.len(), 2);
        assert_eq!(queue.active().map(RecoverySession::torrent_id), Some(2));
        assert_eq!(queue.queued_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_session_cancels_completion() {
        let mut queue = SessionQueue::default();
        let first = session(1, "a");
        let completion = first.completion.clone();
        queue.push(first);
        drop(queue.take_active());
        assert_eq!(completion.await, RecoveryGateOutcome::Cancelled);
    }

    #[test]
    fn test_session_stamps_bookkeeping() {
        let mut s = session(1, "a");
        assert!(s.envelope.last_error_at.is_some());
        assert_eq!(s.envelope.retry_count, Some(0));
        assert_eq!(s.record_retry(), 1);
        assert_eq!(s.envelope.retry_count, Some(1));
    }
}
