//! Engine access
//!
//! The narrow contract through which the recovery subsystem talks to the
//! download engine. Transport (polling, one-shot RPC, push updates) lives behind
//! the trait; every method reports failure through its return type.

use crate::error::EngineError;
use async_trait::async_trait;
use tt_types::{EngineCapabilities, FreeSpace, TorrentDetailEntity, TorrentEntity, TorrentId};

pub mod dispatch;

pub use dispatch::{DispatchOutcome, DispatchStatus, IntentDispatcher, RecoveryIntent};

/// Download engine operations consumed by the probe and the controller
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Optional features of this engine
    fn capabilities(&self) -> EngineCapabilities;

    /// Current torrent list
    async fn get_torrents(&self) -> Result<Vec<TorrentEntity>, EngineError>;

    /// Torrent with file and tracker detail
    async fn get_torrent_details(&self, id: TorrentId) -> Result<TorrentDetailEntity, EngineError>;

    async fn resume(&self, ids: &[TorrentId]) -> Result<(), EngineError>;

    async fn pause(&self, ids: &[TorrentId]) -> Result<(), EngineError>;

    /// Re-verify local data against piece hashes
    async fn verify(&self, ids: &[TorrentId]) -> Result<(), EngineError>;

    /// Point the torrent at a new directory, optionally moving existing data
    async fn set_torrent_location(
        &self,
        id: TorrentId,
        path: &str,
        move_data: bool,
    ) -> Result<(), EngineError>;

    async fn force_tracker_reannounce(&self, id: TorrentId) -> Result<(), EngineError>;

    /// Free space at a directory; fails with `PathNotFound` when it does not exist
    async fn check_free_space(&self, path: &str) -> Result<FreeSpace, EngineError>;
}
