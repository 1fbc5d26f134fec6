//! Torrent Entity Types
//!
//! Snapshot types reported by the download engine. Field names follow the
//! engine's RPC wire format (camelCase) so refresh payloads deserialize directly.

use crate::envelope::ErrorEnvelope;
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

/// Engine-assigned numeric torrent identifier
pub type TorrentId = i64;

/// Engine error code for a clean torrent
pub const ENGINE_ERROR_NONE: i32 = 0;
/// Engine error code for a tracker warning
pub const ENGINE_ERROR_TRACKER_WARNING: i32 = 1;
/// Engine error code for a tracker error
pub const ENGINE_ERROR_TRACKER_ERROR: i32 = 2;
/// Engine error code for a local (disk/file) error
pub const ENGINE_ERROR_LOCAL: i32 = 3;

/// Torrent activity status as reported by the engine (numeric on the wire)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize, Deserialize,
)]
#[serde(try_from = "i32", into = "i32")]
pub enum TorrentStatus {
    #[default]
    #[strum(serialize = "stopped")]
    Stopped,
    #[strum(serialize = "checkWait")]
    CheckWait,
    #[strum(serialize = "checking")]
    Checking,
    #[strum(serialize = "downloadWait")]
    DownloadWait,
    #[strum(serialize = "downloading")]
    Downloading,
    #[strum(serialize = "seedWait")]
    SeedWait,
    #[strum(serialize = "seeding")]
    Seeding,
}

impl TorrentStatus {
    /// Whether the torrent is stopped (paused) in the engine
    pub fn is_stopped(&self) -> bool {
        matches!(self, TorrentStatus::Stopped)
    }

    /// Whether the engine is currently verifying (or about to verify) local data
    pub fn is_checking(&self) -> bool {
        matches!(self, TorrentStatus::CheckWait | TorrentStatus::Checking)
    }
}

impl TryFrom<i32> for TorrentStatus {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TorrentStatus::Stopped),
            1 => Ok(TorrentStatus::CheckWait),
            2 => Ok(TorrentStatus::Checking),
            3 => Ok(TorrentStatus::DownloadWait),
            4 => Ok(TorrentStatus::Downloading),
            5 => Ok(TorrentStatus::SeedWait),
            6 => Ok(TorrentStatus::Seeding),
            other => Err(format!("unknown torrent status code {other}")),
        }
    }
}

impl From<TorrentStatus> for i32 {
    fn from(status: TorrentStatus) -> Self {
        status as i32
    }
}

/// One torrent as reported by the engine list call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentEntity {
    /// Engine identifier
    pub id: TorrentId,
    /// Info-hash (hex)
    #[serde(default)]
    pub hash: String,
    /// Display name
    pub name: String,
    /// Activity status
    #[serde(default)]
    pub status: TorrentStatus,
    /// Completion ratio (0.0 to 1.0)
    #[serde(default)]
    pub progress: f64,
    /// Download directory as the engine sees it
    #[serde(default)]
    pub download_dir: String,
    /// Bytes still missing for wanted pieces
    #[serde(default)]
    pub left_until_done: u64,
    /// Total wanted size
    #[serde(default)]
    pub size_when_done: u64,
    /// Numeric error code (0 = clean)
    #[serde(default)]
    pub error: i32,
    /// Free-text error string
    #[serde(default)]
    pub error_string: String,
    /// Envelope attached by the refresh layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_envelope: Option<ErrorEnvelope>,
}

impl TorrentEntity {
    /// Create a clean, stopped torrent
    pub fn new(id: TorrentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set info-hash and return self for chaining
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = hash.into();
        self
    }

    /// Set engine error fields and return self for chaining
    pub fn with_error(mut self, code: i32, message: impl Into<String>) -> Self {
        self.error = code;
        self.error_string = message.into();
        self
    }

    /// Set download directory and return self for chaining
    pub fn with_download_dir(mut self, dir: impl Into<String>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// Set status and return self for chaining
    pub fn with_status(mut self, status: TorrentStatus) -> Self {
        self.status = status;
        self
    }

    /// Set remaining bytes and return self for chaining
    pub fn with_left_until_done(mut self, bytes: u64) -> Self {
        self.left_until_done = bytes;
        self
    }

    /// Set progress and return self for chaining
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = progress;
        self
    }

    /// Attach an error envelope and return self for chaining
    pub fn with_envelope(mut self, envelope: ErrorEnvelope) -> Self {
        self.error_envelope = Some(envelope);
        self
    }

    /// Stable identity used for fingerprinting: the info-hash, or the id when no hash is known
    pub fn identity(&self) -> String {
        if self.hash.is_empty() {
            format!("id:{}", self.id)
        } else {
            self.hash.to_lowercase()
        }
    }

    /// Short label for the download location (last path segment)
    pub fn location_label(&self) -> String {
        let trimmed = self.download_dir.trim_end_matches(['/', '\\']);
        trimmed
            .rsplit(['/', '\\'])
            .find(|segment| !segment.is_empty())
            .unwrap_or(trimmed)
            .to_string()
    }
}

/// One file inside a torrent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentFileEntity {
    pub index: u32,
    /// Path relative to the download directory
    pub name: String,
    pub length: u64,
    #[serde(default)]
    pub bytes_completed: u64,
    #[serde(default = "default_wanted")]
    pub wanted: bool,
}

fn default_wanted() -> bool {
    true
}

impl TorrentFileEntity {
    /// Whether the on-disk name carries an incomplete-download artifact suffix
    pub fn is_partial_artifact(&self) -> bool {
        let lower = self.name.to_lowercase();
        lower.ends_with(".part") || lower.ends_with(".partial")
    }
}

/// Tracker state for one announce URL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentTrackerEntity {
    pub announce: String,
    #[serde(default)]
    pub tier: u32,
    /// Unix seconds of the last announce attempt
    #[serde(default)]
    pub last_announce_time: Option<i64>,
    /// Whether the last announce attempt succeeded
    #[serde(default)]
    pub last_announce_succeeded: Option<bool>,
    /// Engine-provided result text for the last announce
    #[serde(default)]
    pub last_announce_result: String,
}

/// Torrent plus file and tracker detail (engine detail call)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentDetailEntity {
    #[serde(flatten)]
    pub torrent: TorrentEntity,
    #[serde(default)]
    pub files: Vec<TorrentFileEntity>,
    #[serde(default)]
    pub trackers: Vec<TorrentTrackerEntity>,
}

impl TorrentDetailEntity {
    /// Create detail wrapping a torrent with no files or trackers
    pub fn new(torrent: TorrentEntity) -> Self {
        Self {
            torrent,
            files: Vec::new(),
            trackers: Vec::new(),
        }
    }

    /// Add a file and return self for chaining
    pub fn with_file(mut self, file: TorrentFileEntity) -> Self {
        self.files.push(file);
        self
    }

    /// Add a tracker and return self for chaining
    pub fn with_tracker(mut self, tracker: TorrentTrackerEntity) -> Self {
        self.trackers.push(tracker);
        self
    }

    /// Whether any file still carries a `.part`/`.partial` artifact
    pub fn has_partial_artifacts(&self) -> bool {
        self.files.iter().any(TorrentFileEntity::is_partial_artifact)
    }

    /// Whether the most recent announce across all trackers failed
    ///
    /// Trackers without a recorded attempt are ignored. When two attempts share a
    /// timestamp, a success wins.
    pub fn latest_announce_failed(&self) -> bool {
        self.trackers
            .iter()
            .filter_map(|t| Some((t.last_announce_time?, t.last_announce_succeeded?)))
            .max_by_key(|(time, succeeded)| (*time, *succeeded))
            .map(|(_, succeeded)| !succeeded)
            .unwrap_or(false)
    }

    /// Announce URLs, as reported
    pub fn tracker_urls(&self) -> Vec<String> {
        self.trackers.iter().map(|t| t.announce.clone()).collect()
    }
}

/// Optional engine features that gate some recovery actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineCapabilities {
    pub supports_tracker_reannounce: bool,
    pub supports_set_location: bool,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self {
            supports_tracker_reannounce: true,
            supports_set_location: true,
        }
    }
}

/// Free-space report for a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeSpace {
    pub free_bytes: u64,
    #[serde(default)]
    pub total_bytes: Option<u64>,
}
