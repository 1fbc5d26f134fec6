//! # tt-recovery
//!
//! Recovery subsystem for a torrent-client control surface.
//!
//! This crate classifies torrent errors into a closed taxonomy, probes whether
//! a flagged error is still real, and orchestrates user-and-engine-safe repair
//! flows (resume, relocate, re-verify, re-download) with per-incident
//! de-duplication, a single visible session, grace windows and background
//! continuation.

pub mod config;
pub mod controller;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod gate;
pub mod probe;

pub use config::RecoveryConfig;
pub use controller::{
    AutoRetryOutcome, BackgroundPhase, BackgroundStatus, EditorStatus, FeedbackKind,
    LocationEditor, LocationEditorState, LocationMode, LocationSurface, OpenRecoveryOptions,
    OpenRecoveryResult, QueuedItem, RecoveryCompletion, RecoveryController,
    RecoveryControllerState, RecoveryEvent, RecoveryModal, ResumeOptions, SessionView,
    SetLocationHandler, SetLocationOutcome, SetLocationRequest,
};
pub use engine::{DispatchOutcome, DispatchStatus, EngineClient, IntentDispatcher, RecoveryIntent};
pub use envelope::{build_error_envelope, EnvelopeBuilder};
pub use error::{EngineError, LocationValidationReason, RecoveryError};
pub use gate::{determine_disposition, Disposition, GateAction, GateContext, RecoveryFlowResult};
pub use probe::{ActivationGuard, ProbeMode, ProbeReport, RecoveryProbe};

/// Result type for crate-edge helpers
pub type Result<T> = anyhow::Result<T>;

/// Re-export the data model for convenience
pub use tt_types::{
    Confidence, EngineCapabilities, ErrorClass, ErrorEnvelope, EscalationSignal, FreeSpace,
    MissingFilesClassification, MissingFilesKind, RecoveryAction, RecoveryGateOutcome,
    RecoveryOutcome, RecoveryReason, RecoveryState, TorrentDetailEntity, TorrentEntity,
    TorrentFileEntity, TorrentId, TorrentStatus, TorrentTrackerEntity,
};
