//! Test Fixtures for Recovery Tests
//!
//! Scriptable in-memory engine plus helpers to build torrents and controllers.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tt_recovery::{
    build_error_envelope, EngineCapabilities, EngineClient, EngineError, FreeSpace,
    RecoveryConfig, RecoveryController, RecoveryEvent, TorrentDetailEntity, TorrentEntity,
    TorrentId, TorrentStatus,
};

/// Enough room for anything the tests download
pub const PLENTY_OF_SPACE: u64 = 1 << 40;

#[derive(Debug, Clone)]
enum PathState {
    Present(FreeSpace),
    Missing,
    Denied,
}

#[derive(Debug, Default)]
struct MockState {
    torrents: HashMap<TorrentId, TorrentDetailEntity>,
    paths: HashMap<String, PathState>,
    failures: HashMap<&'static str, EngineError>,
    calls: HashMap<&'static str, usize>,
    gates: HashMap<&'static str, Arc<Semaphore>>,
    location_calls: Vec<(TorrentId, String, bool)>,
}

/// In-memory engine with per-operation call counters
pub struct MockEngine {
    capabilities: EngineCapabilities,
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::with_capabilities(EngineCapabilities::default())
    }

    pub fn with_capabilities(capabilities: EngineCapabilities) -> Self {
        Self {
            capabilities,
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock engine lock poisoned")
    }

    pub fn insert(&self, detail: TorrentDetailEntity) {
        self.state().torrents.insert(detail.torrent.id, detail);
    }

    pub fn insert_torrent(&self, torrent: TorrentEntity) {
        self.insert(TorrentDetailEntity::new(torrent));
    }

    pub fn remove(&self, id: TorrentId) {
        self.state().torrents.remove(&id);
    }

    pub fn torrent(&self, id: TorrentId) -> Option<TorrentEntity> {
        self.state().torrents.get(&id).map(|detail| detail.torrent.clone())
    }

    /// Simulate the engine clearing a torrent's error
    pub fn clear_error(&self, id: TorrentId) {
        if let Some(detail) = self.state().torrents.get_mut(&id) {
            detail.torrent.error = 0;
            detail.torrent.error_string.clear();
        }
    }

    pub fn set_free_space(&self, path: &str, free_bytes: u64) {
        self.state().paths.insert(
            path.to_string(),
            PathState::Present(FreeSpace {
                free_bytes,
                total_bytes: None,
            }),
        );
    }

    pub fn set_path_missing(&self, path: &str) {
        self.state()
            .paths
            .insert(path.to_string(), PathState::Missing);
    }

    pub fn set_path_denied(&self, path: &str) {
        self.state().paths.insert(path.to_string(), PathState::Denied);
    }

    /// Make every call to `operation` fail with `error`
    pub fn fail(&self, operation: &'static str, error: EngineError) {
        self.state().failures.insert(operation, error);
    }

    pub fn recover(&self, operation: &'static str) {
        self.state().failures.remove(operation);
    }

    /// Park every call to `operation` until [`MockEngine::release`]
    pub fn hold(&self, operation: &'static str) {
        self.state()
            .gates
            .insert(operation, Arc::new(Semaphore::new(0)));
    }

    /// Let parked and future calls to `operation` through
    pub fn release(&self, operation: &'static str) {
        if let Some(gate) = self.state().gates.remove(operation) {
            gate.close();
        }
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.state().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    pub fn location_calls(&self) -> Vec<(TorrentId, String, bool)> {
        self.state().location_calls.clone()
    }

    fn record(&self, operation: &'static str) -> Result<(), EngineError> {
        let mut state = self.state();
        *state.calls.entry(operation).or_default() += 1;
        match state.failures.get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn pass_gate(&self, operation: &'static str) {
        let gate = self.state().gates.get(operation).cloned();
        if let Some(gate) = gate {
            // Closing the semaphore is the release signal
            let _ = gate.acquire().await;
        }
    }

    fn update(&self, ids: &[TorrentId], apply: impl Fn(&mut TorrentEntity)) -> Result<(), EngineError> {
        let mut state = self.state();
        for id in ids {
            let detail = state
                .torrents
                .get_mut(id)
                .ok_or(EngineError::TorrentNotFound { id: *id })?;
            apply(&mut detail.torrent);
        }
        Ok(())
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineClient for MockEngine {
    fn capabilities(&self) -> EngineCapabilities {
        self.capabilities
    }

    async fn get_torrents(&self) -> Result<Vec<TorrentEntity>, EngineError> {
        self.record("get_torrents")?;
        let mut torrents: Vec<TorrentEntity> = self
            .state()
            .torrents
            .values()
            .map(|detail| detail.torrent.clone())
            .collect();
        torrents.sort_by_key(|torrent| torrent.id);
        Ok(torrents)
    }

    async fn get_torrent_details(&self, id: TorrentId) -> Result<TorrentDetailEntity, EngineError> {
        self.record("get_torrent_details")?;
        self.pass_gate("get_torrent_details").await;
        self.state()
            .torrents
            .get(&id)
            .cloned()
            .ok_or(EngineError::TorrentNotFound { id })
    }

    async fn resume(&self, ids: &[TorrentId]) -> Result<(), EngineError> {
        self.record("resume")?;
        self.update(ids, |torrent| torrent.status = TorrentStatus::Downloading)
    }

    async fn pause(&self, ids: &[TorrentId]) -> Result<(), EngineError> {
        self.record("pause")?;
        self.update(ids, |torrent| torrent.status = TorrentStatus::Stopped)
    }

    async fn verify(&self, ids: &[TorrentId]) -> Result<(), EngineError> {
        self.record("verify")?;
        self.update(ids, |torrent| torrent.status = TorrentStatus::CheckWait)
    }

    async fn set_torrent_location(
        &self,
        id: TorrentId,
        path: &str,
        move_data: bool,
    ) -> Result<(), EngineError> {
        self.record("set_torrent_location")?;
        self.state()
            .location_calls
            .push((id, path.to_string(), move_data));
        self.update(&[id], |torrent| torrent.download_dir = path.to_string())
    }

    async fn force_tracker_reannounce(&self, id: TorrentId) -> Result<(), EngineError> {
        self.record("force_tracker_reannounce")?;
        self.update(&[id], |_| {})
    }

    async fn check_free_space(&self, path: &str) -> Result<FreeSpace, EngineError> {
        self.record("check_free_space")?;
        match self.state().paths.get(path).cloned() {
            Some(PathState::Present(space)) => Ok(space),
            Some(PathState::Missing) => Err(EngineError::PathNotFound {
                path: path.to_string(),
            }),
            Some(PathState::Denied) => Err(EngineError::PermissionDenied {
                path: path.to_string(),
            }),
            None => Ok(FreeSpace {
                free_bytes: PLENTY_OF_SPACE,
                total_bytes: None,
            }),
        }
    }
}

/// Install a test subscriber once; honors `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Torrent with a local error, stopped, downloading into `/data/<name>`
pub fn create_test_torrent(id: TorrentId, name: &str, message: &str) -> TorrentEntity {
    TorrentEntity::new(id, name)
        .with_hash(format!("{id:040x}"))
        .with_error(3, message)
        .with_download_dir(format!("/data/{name}"))
        .with_left_until_done(4096)
}

/// Torrent as the UI sees it after a refresh: envelope attached
pub fn with_envelope(torrent: TorrentEntity) -> TorrentEntity {
    let envelope = build_error_envelope(&torrent, None, None);
    torrent.with_envelope(envelope)
}

/// Register a broken torrent with the engine and return its UI snapshot
pub fn seed_torrent(engine: &MockEngine, id: TorrentId, name: &str, message: &str) -> TorrentEntity {
    let torrent = create_test_torrent(id, name, message);
    engine.insert_torrent(torrent.clone());
    with_envelope(torrent)
}

pub fn create_controller(engine: Arc<MockEngine>) -> RecoveryController {
    init_tracing();
    RecoveryController::new(engine, RecoveryConfig::default())
        .expect("default recovery config is valid")
}

/// Events received so far
pub fn drain_events(receiver: &mut tokio::sync::broadcast::Receiver<RecoveryEvent>) -> Vec<RecoveryEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
