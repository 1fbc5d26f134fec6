//! Typed intent dispatch
//!
//! Recovery steps are expressed as intents and translated into engine calls
//! here, so capability checks and failure mapping happen in one place.

use super::EngineClient;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use tt_types::TorrentId;

/// A recovery step to apply to one torrent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryIntent {
    EnsureTorrentActive {
        torrent_id: TorrentId,
    },
    EnsureTorrentPaused {
        torrent_id: TorrentId,
    },
    EnsureTorrentAtLocation {
        torrent_id: TorrentId,
        path: String,
        move_data: bool,
    },
    EnsureDataVerified {
        torrent_id: TorrentId,
    },
    ReannounceTrackers {
        torrent_id: TorrentId,
    },
}

impl RecoveryIntent {
    /// Intent name for logging
    pub fn name(&self) -> &'static str {
        match self {
            RecoveryIntent::EnsureTorrentActive { .. } => "ENSURE_TORRENT_ACTIVE",
            RecoveryIntent::EnsureTorrentPaused { .. } => "ENSURE_TORRENT_PAUSED",
            RecoveryIntent::EnsureTorrentAtLocation { .. } => "ENSURE_TORRENT_AT_LOCATION",
            RecoveryIntent::EnsureDataVerified { .. } => "ENSURE_DATA_VERIFIED",
            RecoveryIntent::ReannounceTrackers { .. } => "REANNOUNCE_TRACKERS",
        }
    }

    /// Target torrent
    pub fn torrent_id(&self) -> TorrentId {
        match self {
            RecoveryIntent::EnsureTorrentActive { torrent_id }
            | RecoveryIntent::EnsureTorrentPaused { torrent_id }
            | RecoveryIntent::EnsureTorrentAtLocation { torrent_id, .. }
            | RecoveryIntent::EnsureDataVerified { torrent_id }
            | RecoveryIntent::ReannounceTrackers { torrent_id } => *torrent_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Applied,
    Unsupported,
    Failed,
}

/// Result of dispatching one intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub status: DispatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DispatchOutcome {
    pub fn applied() -> Self {
        Self {
            status: DispatchStatus::Applied,
            reason: None,
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            status: DispatchStatus::Unsupported,
            reason: Some(reason.into()),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: DispatchStatus::Failed,
            reason: Some(reason.into()),
        }
    }

    pub fn is_applied(&self) -> bool {
        self.status == DispatchStatus::Applied
    }

    /// Reason text, or the status name when the engine gave none
    pub fn reason_or_status(&self) -> String {
        self.reason.clone().unwrap_or_else(|| match self.status {
            DispatchStatus::Applied => "applied".to_string(),
            DispatchStatus::Unsupported => "unsupported".to_string(),
            DispatchStatus::Failed => "failed".to_string(),
        })
    }
}

/// Translates intents into engine calls
#[derive(Clone)]
pub struct IntentDispatcher {
    engine: Arc<dyn EngineClient>,
}

impl std::fmt::Debug for IntentDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentDispatcher").finish_non_exhaustive()
    }
}

impl IntentDispatcher {
    pub fn new(engine: Arc<dyn EngineClient>) -> Self {
        Self { engine }
    }

    /// Apply one intent; never fails, failures are reported in the outcome
    pub async fn dispatch(&self, intent: RecoveryIntent) -> DispatchOutcome {
        let capabilities = self.engine.capabilities();
        debug!(
            intent = intent.name(),
            torrent_id = intent.torrent_id(),
            "Dispatching recovery intent"
        );

        let result = match &intent {
            RecoveryIntent::EnsureTorrentActive { torrent_id } => {
                self.engine.resume(&[*torrent_id]).await
            }
            RecoveryIntent::EnsureTorrentPaused { torrent_id } => {
                self.engine.pause(&[*torrent_id]).await
            }
            RecoveryIntent::EnsureTorrentAtLocation {
                torrent_id,
                path,
                move_data,
            } => {
                if !capabilities.supports_set_location {
                    return DispatchOutcome::unsupported("set_location_unavailable");
                }
                self.engine
                    .set_torrent_location(*torrent_id, path, *move_data)
                    .await
            }
            RecoveryIntent::EnsureDataVerified { torrent_id } => {
                self.engine.verify(&[*torrent_id]).await
            }
            RecoveryIntent::ReannounceTrackers { torrent_id } => {
                if !capabilities.supports_tracker_reannounce {
                    return DispatchOutcome::unsupported("reannounce_unavailable");
                }
                self.engine.force_tracker_reannounce(*torrent_id).await
            }
        };

        match result {
            Ok(()) => DispatchOutcome::applied(),
            Err(EngineError::Unsupported { operation }) => DispatchOutcome::unsupported(operation),
            Err(err) => {
                warn!(
                    intent = intent.name(),
                    torrent_id = intent.torrent_id(),
                    error = %err,
                    "Recovery intent failed"
                );
                DispatchOutcome::failed(err.to_string())
            }
        }
    }
}
