//! Recovery Flow Types
//!
//! Probe outcomes, missing-files classification and the terminal result of a
//! recovery request, as exchanged between the recovery controller and the UI.

use crate::envelope::{ErrorClass, RecoveryAction};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Reason attached to blocked and needs-user-decision outcomes
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum RecoveryReason {
    /// Download directory does not exist
    PathMissing,
    /// Directory exists but the engine still reports data missing
    FilesMissing,
    /// Incomplete-download artifacts on disk
    PartialData,
    /// Directory or files not accessible
    AccessDenied,
    /// Not enough space to continue
    InsufficientSpace,
    /// Torrent no longer exists in the engine
    TorrentMissing,
    /// Trackers unreachable and reannounce not possible
    TrackerUnreachable,
    /// Metadata could not be obtained
    MetadataUnavailable,
    /// Engine does not support the required operation
    Unsupported,
    /// Local error with no more specific explanation
    Unexplained,
    /// Fixable, but the user paused the torrent
    PausedByUser,
}

/// Session-level result of a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RecoveryOutcome {
    /// Cannot proceed until the underlying condition changes
    Blocked {
        reason: RecoveryReason,
        message: String,
    },
    /// The user has to pick a recovery action
    NeedsUserDecision { reason: RecoveryReason },
    /// A recovery step was dispatched and is still running in the engine
    AutoInProgress,
    /// The error is gone
    AutoRecovered,
    /// The flow was abandoned (pause, removal, shutdown)
    Cancelled,
}

impl RecoveryOutcome {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            RecoveryOutcome::Blocked { .. } => "blocked",
            RecoveryOutcome::NeedsUserDecision { .. } => "needs-user-decision",
            RecoveryOutcome::AutoInProgress => "auto-in-progress",
            RecoveryOutcome::AutoRecovered => "auto-recovered",
            RecoveryOutcome::Cancelled => "cancelled",
        }
    }

    /// Whether the outcome means the engine is (or will be) healthy without user input
    pub fn is_self_resolving(&self) -> bool {
        matches!(
            self,
            RecoveryOutcome::AutoInProgress | RecoveryOutcome::AutoRecovered
        )
    }
}

/// What exactly is wrong with the torrent's data
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum MissingFilesKind {
    PathMissing,
    FilesMissing,
    PartialFiles,
    AccessDenied,
    InsufficientSpace,
    TrackerIssue,
    MetadataIssue,
    Resolved,
    Unknown,
}

/// How sure the probe is about the classification
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Confidence {
    Certain,
    Likely,
}

/// Whether the classification contradicts an earlier user choice or engine report
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum EscalationSignal {
    None,
    Conflict,
}

/// Refined classification produced alongside a probe outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingFilesClassification {
    pub kind: MissingFilesKind,
    pub confidence: Confidence,
    pub recommended_actions: Vec<RecoveryAction>,
    pub escalation_signal: EscalationSignal,
}

impl MissingFilesClassification {
    /// Create a classification without an escalation signal
    pub fn new(
        kind: MissingFilesKind,
        confidence: Confidence,
        recommended_actions: Vec<RecoveryAction>,
    ) -> Self {
        Self {
            kind,
            confidence,
            recommended_actions,
            escalation_signal: EscalationSignal::None,
        }
    }

    /// Mark the classification as conflicting and return self for chaining
    pub fn with_conflict(mut self) -> Self {
        self.escalation_signal = EscalationSignal::Conflict;
        self
    }

    /// Best-effort classification from an envelope class alone, without any I/O
    pub fn from_error_class(class: ErrorClass, recommended: &[RecoveryAction]) -> Self {
        let (kind, confidence) = match class {
            ErrorClass::None => (MissingFilesKind::Resolved, Confidence::Certain),
            ErrorClass::MissingFiles => (MissingFilesKind::FilesMissing, Confidence::Likely),
            ErrorClass::PartialFiles => (MissingFilesKind::PartialFiles, Confidence::Likely),
            ErrorClass::PermissionDenied => (MissingFilesKind::AccessDenied, Confidence::Certain),
            ErrorClass::DiskFull => (MissingFilesKind::InsufficientSpace, Confidence::Certain),
            ErrorClass::TrackerWarning | ErrorClass::TrackerError => {
                (MissingFilesKind::TrackerIssue, Confidence::Likely)
            }
            ErrorClass::Metadata => (MissingFilesKind::MetadataIssue, Confidence::Likely),
            ErrorClass::LocalError | ErrorClass::Unknown => {
                (MissingFilesKind::Unknown, Confidence::Likely)
            }
        };
        Self::new(kind, confidence, recommended.to_vec())
    }

    /// Whether the decision surface must open without waiting out a grace window
    pub fn requires_immediate_escalation(&self) -> bool {
        self.confidence == Confidence::Certain
            || self.escalation_signal == EscalationSignal::Conflict
    }
}

/// Terminal result of one recovery request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecoveryGateOutcome {
    Applied,
    Cancelled,
    Failed { reason: String },
    NotApplied,
}

impl RecoveryGateOutcome {
    /// Create a failed outcome
    pub fn failed(reason: impl Into<String>) -> Self {
        RecoveryGateOutcome::Failed {
            reason: reason.into(),
        }
    }
}
