//! Error Envelope Types
//!
//! Closed taxonomy for classified torrent errors. The wire spelling of every
//! variant is camelCase, shared by serde and strum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Why a torrent is broken
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ErrorClass {
    None,
    TrackerWarning,
    TrackerError,
    LocalError,
    DiskFull,
    PermissionDenied,
    MissingFiles,
    PartialFiles,
    Metadata,
    Unknown,
}

impl ErrorClass {
    /// Get the wire name
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Whether this class concerns on-disk data rather than trackers or metadata
    pub fn is_file_level(&self) -> bool {
        matches!(
            self,
            ErrorClass::LocalError
                | ErrorClass::MissingFiles
                | ErrorClass::PartialFiles
                | ErrorClass::Unknown
        )
    }
}

/// How far the torrent is from healthy
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum RecoveryState {
    Ok,
    TransientWaiting,
    NeedsUserAction,
    NeedsUserConfirmation,
    Blocked,
    Verifying,
}

impl RecoveryState {
    /// Get the wire name
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Something the user (or the controller) can do about an error
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum RecoveryAction {
    Resume,
    ForceRecheck,
    SetLocation,
    ChangeLocation,
    ReDownload,
    OpenFolder,
    Reannounce,
    Pause,
    RemoveReadd,
}

impl RecoveryAction {
    /// Get the wire name
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Classified error snapshot for one torrent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub error_class: ErrorClass,
    pub error_message: Option<String>,
    /// Stamped by the layer that owns transition timestamps, never by the builder
    pub last_error_at: Option<DateTime<Utc>>,
    pub recovery_state: RecoveryState,
    pub retry_count: Option<u32>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub recovery_actions: Vec<RecoveryAction>,
    /// Stable incident identity used for de-duplication and queueing
    pub fingerprint: String,
    pub primary_action: Option<RecoveryAction>,
}

impl ErrorEnvelope {
    /// Whether the envelope describes something the recovery flow can act on
    pub fn is_actionable(&self) -> bool {
        self.error_class != ErrorClass::None && self.recovery_state != RecoveryState::Ok
    }

    /// Whether an action is offered by this envelope
    pub fn offers(&self, action: RecoveryAction) -> bool {
        self.recovery_actions.contains(&action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_wire_names() {
        assert_eq!(ErrorClass::MissingFiles.to_string(), "missingFiles");
        assert_eq!(ErrorClass::DiskFull.as_str(), "diskFull");
        assert_eq!(
            RecoveryState::NeedsUserAction.to_string(),
            "needsUserAction"
        );
        assert_eq!(RecoveryAction::ReDownload.as_str(), "reDownload");
        assert_eq!(
            serde_json::to_string(&RecoveryAction::ForceRecheck).unwrap(),
            "\"forceRecheck\""
        );
    }

    #[test]
    fn test_parse_wire_names() {
        assert_eq!(
            ErrorClass::from_str("permissionDenied").unwrap(),
            ErrorClass::PermissionDenied
        );
        assert_eq!(
            RecoveryAction::from_str("removeReadd").unwrap(),
            RecoveryAction::RemoveReadd
        );
        assert!(RecoveryState::from_str("healthy").is_err());
    }

    #[test]
    fn test_file_level_classes() {
        assert!(ErrorClass::MissingFiles.is_file_level());
        assert!(!ErrorClass::DiskFull.is_file_level());
        assert!(!ErrorClass::TrackerError.is_file_level());
    }
}
