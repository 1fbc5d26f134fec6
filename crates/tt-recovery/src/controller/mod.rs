//! Recovery Controller
//!
//! Stateful orchestrator for recovery requests. It owns the single visible
//! session, the FIFO queue of pending sessions, per-incident in-flight
//! de-duplication, retry cooldowns, the manual location editor and the
//! background continuation cycles.
//!
//! All mutable state sits behind one `std::sync::Mutex` that is never held
//! across an `.await`. Flows, probes and background cycles run as spawned
//! tasks and check their ownership token after every suspension point, so a
//! pause, removal or shutdown stops them without tracking timer handles.

use crate::config::RecoveryConfig;
use crate::engine::{EngineClient, IntentDispatcher, RecoveryIntent};
use crate::envelope::EnvelopeBuilder;
use crate::error::RecoveryError;
use crate::gate::GateAction;
use crate::probe::{ProbeMode, ProbeReport, RecoveryProbe};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use tt_types::{
    ErrorEnvelope, MissingFilesClassification, RecoveryGateOutcome, RecoveryOutcome,
    TorrentEntity, TorrentId,
};

pub mod background;
mod completion;
pub mod events;
mod flow;
pub mod location;
pub mod modal;
mod ownership;
pub mod session;

pub use background::{BackgroundPhase, BackgroundStatus};
pub use completion::RecoveryCompletion;
pub use events::{FeedbackKind, RecoveryEvent};
pub use location::{
    is_absolute_path, validate_location, EditorStatus, LocationEditor, LocationEditorState,
    LocationMode, LocationSurface, SetLocationHandler, SetLocationOutcome, SetLocationRequest,
};
pub use modal::{AutoRetryOutcome, RecoveryModal};
pub use session::{QueuedItem, SessionView};

use background::BackgroundEntry;
use completion::completion_pair;
use flow::FlowRequest;
use ownership::{OwnershipToken, OwnershipTokens};
use session::{Placement, RecoverySession, SessionQueue};

/// Options for `open_recovery_modal`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenRecoveryOptions {
    /// Move an open location editor for the same torrent onto the recovery modal
    pub force_workbench: bool,
}

/// Options for `resume_torrent_with_recovery`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeOptions {
    pub suppress_feedback: bool,
}

/// Result of asking for a recovery modal
#[derive(Debug, Clone)]
pub enum OpenRecoveryResult {
    /// The torrent carries no actionable error envelope
    NotActionable,
    /// A session for the same incident is already visible
    AlreadyOpen,
    Requested { completion: RecoveryCompletion },
}

impl OpenRecoveryResult {
    pub fn status(&self) -> &'static str {
        match self {
            OpenRecoveryResult::NotActionable => "not_actionable",
            OpenRecoveryResult::AlreadyOpen => "already_open",
            OpenRecoveryResult::Requested { .. } => "requested",
        }
    }

    pub fn completion(&self) -> Option<RecoveryCompletion> {
        match self {
            OpenRecoveryResult::Requested { completion } => Some(completion.clone()),
            _ => None,
        }
    }
}

/// Snapshot of everything the UI renders from the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryControllerState {
    pub session: Option<SessionView>,
    pub queued_count: usize,
    pub queued_items: Vec<QueuedItem>,
    pub is_busy: bool,
    pub background: Vec<BackgroundStatus>,
    pub location_editor: Option<LocationEditorState>,
}

type SharedReport = Shared<BoxFuture<'static, ProbeReport>>;

#[derive(Debug)]
struct InFlightFlow {
    id: u64,
    torrent_id: TorrentId,
    completion: RecoveryCompletion,
}

struct InFlightProbe {
    id: u64,
    torrent_id: TorrentId,
    report: SharedReport,
}

#[derive(Default)]
pub(crate) struct ControllerState {
    sessions: SessionQueue,
    /// Running flows keyed by incident fingerprint; modal re-probes use `fingerprint:recheck`
    flows: HashMap<String, InFlightFlow>,
    /// Running probes keyed by `fingerprint:mode`
    probes: HashMap<String, InFlightProbe>,
    ownership: OwnershipTokens,
    background: HashMap<TorrentId, BackgroundEntry>,
    /// Torrents the user paused; nothing in here is restarted or watched in the background
    paused: HashSet<TorrentId>,
    editor: Option<LocationEditorState>,
    next_id: u64,
}

impl ControllerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Engine work in flight; flows parked on an open session do not count
    fn is_busy(&self) -> bool {
        !self.probes.is_empty()
            || self
                .editor
                .as_ref()
                .is_some_and(|editor| editor.status == EditorStatus::Verifying)
    }

    fn tracked_torrents(&self) -> HashSet<TorrentId> {
        let mut ids: HashSet<TorrentId> = self.sessions.torrent_ids();
        ids.extend(self.flows.values().map(|flow| flow.torrent_id));
        ids.extend(self.probes.values().map(|probe| probe.torrent_id));
        ids.extend(self.background.keys().copied());
        ids.extend(self.editor.as_ref().map(|editor| editor.torrent.id));
        ids
    }

    /// Drop every in-flight entry and background cycle for a torrent
    fn release_torrent(&mut self, torrent_id: TorrentId) {
        self.flows.retain(|_, flow| flow.torrent_id != torrent_id);
        self.probes.retain(|_, probe| probe.torrent_id != torrent_id);
        self.background.remove(&torrent_id);
    }
}

struct ControllerInner {
    engine: Arc<dyn EngineClient>,
    dispatcher: IntentDispatcher,
    probe: RecoveryProbe,
    builder: EnvelopeBuilder,
    config: RecoveryConfig,
    state: Mutex<ControllerState>,
    events: broadcast::Sender<RecoveryEvent>,
}

/// Recovery orchestrator for one engine connection
///
/// Cheap to clone; clones share state. Operations that start work spawn Tokio
/// tasks and must be called from within a runtime.
#[derive(Clone)]
pub struct RecoveryController {
    inner: Arc<ControllerInner>,
}

impl std::fmt::Debug for RecoveryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryController")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl RecoveryController {
    /// Fails when `config` does not pass [`RecoveryConfig::validate`]
    pub fn new(engine: Arc<dyn EngineClient>, config: RecoveryConfig) -> crate::Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let builder = EnvelopeBuilder::new(engine.capabilities());
        Ok(Self {
            inner: Arc::new(ControllerInner {
                dispatcher: IntentDispatcher::new(engine.clone()),
                probe: RecoveryProbe::new(engine.clone()),
                engine,
                builder,
                config,
                state: Mutex::new(ControllerState::default()),
                events,
            }),
        })
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.inner.config
    }

    /// Envelope builder whose violation ledger belongs to this controller
    pub fn envelope_builder(&self) -> &EnvelopeBuilder {
        &self.inner.builder
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecoveryEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> RecoveryControllerState {
        let state = self.lock();
        let mut background: Vec<BackgroundStatus> =
            state.background.values().map(BackgroundEntry::status).collect();
        background.sort_by_key(|status| status.torrent_id);
        RecoveryControllerState {
            session: state.sessions.active().map(RecoverySession::view),
            queued_count: state.sessions.queued_count(),
            queued_items: state.sessions.queued_items(),
            is_busy: state.is_busy(),
            background,
            location_editor: state.editor.clone(),
        }
    }

    pub fn modal(&self) -> RecoveryModal {
        RecoveryModal::new(self.clone())
    }

    pub fn location_editor(&self) -> LocationEditor {
        LocationEditor::new(self.clone())
    }

    pub fn set_location(&self) -> SetLocationHandler {
        SetLocationHandler::new(self.clone())
    }

    /// Open (or queue) a recovery session for the torrent's current envelope
    ///
    /// Does not probe; the session starts from the envelope's own classification.
    pub fn open_recovery_modal(
        &self,
        torrent: &TorrentEntity,
        options: OpenRecoveryOptions,
    ) -> OpenRecoveryResult {
        let Some(envelope) = torrent
            .error_envelope
            .clone()
            .filter(ErrorEnvelope::is_actionable)
        else {
            return OpenRecoveryResult::NotActionable;
        };

        let mut state = self.lock();
        if options.force_workbench {
            if let Some(editor) = state
                .editor
                .as_mut()
                .filter(|editor| editor.torrent.id == torrent.id)
            {
                debug!(torrent_id = torrent.id, from = %editor.surface, "Moving location editor to recovery modal");
                editor.surface = LocationSurface::RecoveryModal;
            }
        }

        if state.sessions.is_active(&envelope.fingerprint) {
            return OpenRecoveryResult::AlreadyOpen;
        }
        if let Some(queued) = state.sessions.find(&envelope.fingerprint) {
            return OpenRecoveryResult::Requested {
                completion: queued.completion.clone(),
            };
        }

        let session = RecoverySession::from_envelope(torrent.clone(), envelope);
        let completion = session.completion.clone();
        self.push_session(&mut state, session);
        OpenRecoveryResult::Requested { completion }
    }

    /// Re-verify and restart the torrent so missing data is fetched again
    pub fn execute_download_missing(&self, torrent: &TorrentEntity) -> RecoveryCompletion {
        self.clear_paused(torrent.id);
        let envelope = self.envelope_for(torrent);
        self.start_flow(FlowRequest {
            torrent: torrent.clone(),
            envelope,
            action: GateAction::DownloadMissing,
            mode: ProbeMode::DownloadMissing,
            suppress_feedback: false,
        })
    }

    /// Resume a torrent, probing first when it carries an actionable error
    pub fn resume_torrent_with_recovery(
        &self,
        torrent: &TorrentEntity,
        options: ResumeOptions,
    ) -> RecoveryCompletion {
        self.clear_paused(torrent.id);
        let envelope = self.envelope_for(torrent);
        if !envelope.is_actionable() {
            return self.plain_resume(torrent.id);
        }
        self.start_flow(FlowRequest {
            torrent: torrent.clone(),
            envelope,
            action: GateAction::Resume,
            mode: ProbeMode::Resume,
            suppress_feedback: options.suppress_feedback,
        })
    }

    /// Stop every background cycle and in-flight flow for a torrent the user paused
    pub fn mark_torrent_paused_by_user(&self, torrent_id: TorrentId) {
        let mut state = self.lock();
        state.ownership.invalidate(torrent_id);
        state.release_torrent(torrent_id);
        state.paused.insert(torrent_id);
        info!(torrent_id, "Torrent paused by user, recovery ownership released");
    }

    /// Whether the user paused the torrent and has not asked to run it since
    pub fn is_paused_by_user(&self, torrent_id: TorrentId) -> bool {
        self.lock().paused.contains(&torrent_id)
    }

    /// The user asked for the torrent to run again
    pub(crate) fn clear_paused(&self, torrent_id: TorrentId) {
        if self.lock().paused.remove(&torrent_id) {
            debug!(torrent_id, "Torrent no longer held paused");
        }
    }

    /// Forget a torrent that left the engine; its sessions resolve as cancelled
    pub fn mark_torrent_removed(&self, torrent_id: TorrentId) {
        let removed = {
            let mut state = self.lock();
            state.ownership.forget(torrent_id);
            state.release_torrent(torrent_id);
            state.paused.remove(&torrent_id);
            if state
                .editor
                .as_ref()
                .is_some_and(|editor| editor.torrent.id == torrent_id)
            {
                state.editor = None;
            }
            let active_before = state.sessions.active_fingerprint();
            let removed = state.sessions.take_torrent(torrent_id);
            if !removed.is_empty() {
                self.announce_queue(&state, active_before);
            }
            removed
        };
        let count = removed.len();
        for mut session in removed {
            session.resolve(RecoveryGateOutcome::Cancelled);
        }
        info!(torrent_id, sessions = count, "Torrent removed from recovery");
    }

    /// Refresh torrents from the engine with envelopes attached
    ///
    /// Torrents the controller tracks that are no longer listed are treated as removed,
    /// and violation reports for incidents absent from this refresh are dropped.
    #[instrument(skip(self))]
    pub async fn refresh_from_engine(&self) -> Result<Vec<TorrentEntity>, RecoveryError> {
        let torrents: Vec<TorrentEntity> = self
            .inner
            .engine
            .get_torrents()
            .await?
            .into_iter()
            .map(|torrent| self.inner.builder.attach(torrent, None))
            .collect();

        let live: HashSet<String> = torrents
            .iter()
            .filter_map(|torrent| torrent.error_envelope.as_ref())
            .map(|envelope| envelope.fingerprint.clone())
            .collect();
        self.inner.builder.prune(&live);

        let present: HashSet<TorrentId> = torrents.iter().map(|torrent| torrent.id).collect();
        let vanished: Vec<TorrentId> = self
            .lock()
            .tracked_torrents()
            .into_iter()
            .filter(|id| !present.contains(id))
            .collect();
        for torrent_id in vanished {
            self.mark_torrent_removed(torrent_id);
        }

        debug!(count = torrents.len(), "Refreshed torrents from engine");
        Ok(torrents)
    }

    /// Cancel everything and refuse further work
    pub fn shutdown(&self) {
        let drained = {
            let mut state = self.lock();
            state.ownership.close();
            state.flows.clear();
            state.probes.clear();
            state.background.clear();
            state.paused.clear();
            state.editor = None;
            state.sessions.drain()
        };
        for mut session in drained {
            session.resolve(RecoveryGateOutcome::Cancelled);
        }
        self.emit(RecoveryEvent::SessionChanged { fingerprint: None });
        self.emit(RecoveryEvent::QueueChanged { queued_count: 0 });
        info!("Recovery controller shut down");
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn dispatcher(&self) -> &IntentDispatcher {
        &self.inner.dispatcher
    }

    pub(crate) fn emit(&self, event: RecoveryEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn feedback(&self, torrent_id: TorrentId, kind: FeedbackKind, message: impl Into<String>) {
        self.emit(RecoveryEvent::feedback(torrent_id, kind, message));
    }

    pub(crate) fn owns(&self, token: &OwnershipToken) -> bool {
        self.lock().ownership.owns(token)
    }

    fn envelope_for(&self, torrent: &TorrentEntity) -> ErrorEnvelope {
        torrent
            .error_envelope
            .clone()
            .unwrap_or_else(|| self.inner.builder.build(torrent, None))
    }

    fn plain_resume(&self, torrent_id: TorrentId) -> RecoveryCompletion {
        let (resolver, completion) = completion_pair();
        let controller = self.clone();
        tokio::spawn(async move {
            let outcome = controller
                .dispatcher()
                .dispatch(RecoveryIntent::EnsureTorrentActive { torrent_id })
                .await;
            resolver.resolve(if outcome.is_applied() {
                RecoveryGateOutcome::Applied
            } else {
                RecoveryGateOutcome::failed(outcome.reason_or_status())
            });
        });
        completion
    }

    /// Start a flow, or attach to the one already running for the same incident
    pub(crate) fn start_flow(&self, request: FlowRequest) -> RecoveryCompletion {
        let key = request.flow_key();
        let torrent_id = request.torrent.id;

        let (resolver, completion, flow_id, token) = {
            let mut state = self.lock();
            if state.ownership.is_closed() {
                return RecoveryCompletion::ready(RecoveryGateOutcome::Cancelled);
            }
            if let Some(existing) = state.flows.get(&key) {
                debug!(torrent_id, key = %key, "Attaching to in-flight recovery");
                return existing.completion.clone();
            }
            let token = state.ownership.claim(torrent_id);
            let flow_id = state.next_id();
            let (resolver, completion) = completion_pair();
            state.flows.insert(
                key.clone(),
                InFlightFlow {
                    id: flow_id,
                    torrent_id,
                    completion: completion.clone(),
                },
            );
            (resolver, completion, flow_id, token)
        };

        if !request.suppress_feedback {
            self.feedback(
                torrent_id,
                FeedbackKind::InProgress,
                format!("Recovering {}", request.torrent.name),
            );
        }

        let controller = self.clone();
        tokio::spawn(async move {
            let outcome = flow::run(&controller, request, token).await;
            {
                let mut state = controller.lock();
                if state.flows.get(&key).is_some_and(|flow| flow.id == flow_id) {
                    state.flows.remove(&key);
                }
            }
            resolver.resolve(outcome);
        });
        completion
    }

    /// Run a probe, or attach to the one already running for the same incident and mode
    pub(crate) fn probe_shared(
        &self,
        torrent: &TorrentEntity,
        envelope: &ErrorEnvelope,
        mode: ProbeMode,
    ) -> SharedReport {
        let key = format!("{}:{}", envelope.fingerprint, mode);
        let mut state = self.lock();
        if let Some(existing) = state.probes.get(&key) {
            debug!(torrent_id = torrent.id, key = %key, "Attaching to in-flight probe");
            return existing.report.clone();
        }

        let probe_id = state.next_id();
        let controller = self.clone();
        let task_key = key.clone();
        let task_torrent = torrent.clone();
        let task_envelope = envelope.clone();
        let handle = tokio::spawn(async move {
            let may_activate = |torrent_id: TorrentId| !controller.is_paused_by_user(torrent_id);
            let report = match controller
                .inner
                .probe
                .run_guarded(&task_torrent, &task_envelope, &mode, &may_activate)
                .await
            {
                Ok(report) => report,
                Err(err) => {
                    warn!(torrent_id = task_torrent.id, error = %err, "Recovery probe failed");
                    ProbeReport::failed(err.to_string())
                }
            };
            let mut state = controller.lock();
            if state.probes.get(&task_key).is_some_and(|probe| probe.id == probe_id) {
                state.probes.remove(&task_key);
            }
            report
        });

        let report = handle
            .map(|joined| {
                joined.unwrap_or_else(|err| {
                    ProbeReport::failed(RecoveryError::task_aborted(err.to_string()).to_string())
                })
            })
            .boxed()
            .shared();
        state.probes.insert(
            key,
            InFlightProbe {
                id: probe_id,
                torrent_id: torrent.id,
                report: report.clone(),
            },
        );
        report
    }

    pub(crate) fn has_session(&self, fingerprint: &str) -> bool {
        self.lock().sessions.find(fingerprint).is_some()
    }

    /// Queue a session carrying a probe result; an existing session for the incident is updated instead
    pub(crate) fn enqueue_session(
        &self,
        torrent: TorrentEntity,
        envelope: ErrorEnvelope,
        outcome: RecoveryOutcome,
        classification: MissingFilesClassification,
    ) -> RecoveryCompletion {
        let mut state = self.lock();
        if let Some(existing) = state.sessions.find_mut(&envelope.fingerprint) {
            existing.update(outcome, classification);
            return existing.completion.clone();
        }
        let session = RecoverySession::new(torrent, envelope, outcome, classification);
        let completion = session.completion.clone();
        self.push_session(&mut state, session);
        completion
    }

    /// Write a probe result into the session for the incident and return its completion
    pub(crate) fn update_session(
        &self,
        fingerprint: &str,
        outcome: RecoveryOutcome,
        classification: MissingFilesClassification,
    ) -> Option<RecoveryCompletion> {
        let mut state = self.lock();
        let session = state.sessions.find_mut(fingerprint)?;
        session.update(outcome, classification);
        let completion = session.completion.clone();
        if state.sessions.is_active(fingerprint) {
            self.emit(RecoveryEvent::SessionChanged {
                fingerprint: Some(fingerprint.to_string()),
            });
        }
        Some(completion)
    }

    /// Settle and remove the session for an incident, promoting the queue head
    pub(crate) fn resolve_session(&self, fingerprint: &str, outcome: RecoveryGateOutcome) -> bool {
        let taken = {
            let mut state = self.lock();
            let active_before = state.sessions.active_fingerprint();
            let taken = state.sessions.take(fingerprint);
            if taken.is_some() {
                self.announce_queue(&state, active_before);
            }
            taken
        };
        match taken {
            Some(mut session) => {
                info!(
                    torrent_id = session.torrent_id(),
                    fingerprint = %fingerprint,
                    outcome = ?outcome,
                    "Recovery session resolved"
                );
                session.resolve(outcome);
                true
            }
            None => false,
        }
    }

    fn push_session(&self, state: &mut ControllerState, session: RecoverySession) {
        let torrent_id = session.torrent_id();
        let fingerprint = session.fingerprint.clone();
        match state.sessions.push(session) {
            Placement::Activated => {
                info!(torrent_id, fingerprint = %fingerprint, "Recovery session opened");
                self.emit(RecoveryEvent::SessionChanged {
                    fingerprint: Some(fingerprint),
                });
            }
            Placement::Queued => {
                let queued_count = state.sessions.queued_count();
                info!(torrent_id, fingerprint = %fingerprint, queued_count, "Recovery session queued");
                self.emit(RecoveryEvent::QueueChanged { queued_count });
            }
        }
    }

    fn announce_queue(&self, state: &ControllerState, active_before: Option<String>) {
        let active_now = state.sessions.active_fingerprint();
        if active_now != active_before {
            self.emit(RecoveryEvent::SessionChanged {
                fingerprint: active_now,
            });
        }
        self.emit(RecoveryEvent::QueueChanged {
            queued_count: state.sessions.queued_count(),
        });
    }
}
