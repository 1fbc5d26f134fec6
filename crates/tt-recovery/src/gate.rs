//! Recovery Gate Interpreter
//!
//! Pure decision function: given a probe result and the call context, decide
//! what the controller does next. No state, no I/O, no clock.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};
use tt_types::{MissingFilesClassification, RecoveryOutcome};

/// Which user operation the probe was run for
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum GateAction {
    Resume,
    Recheck,
    DownloadMissing,
    SetLocation,
    Background,
}

/// Probe result as seen by the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryFlowResult {
    /// The probe produced nothing to decide on
    NoOutcome,
    NeedsDisposition {
        outcome: RecoveryOutcome,
        classification: MissingFilesClassification,
    },
}

/// Call context for one gate decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateContext {
    pub action: GateAction,
    /// A session for the same incident is already visible
    pub has_active_session: bool,
    /// The escalation grace window is in effect for this call
    pub should_use_escalation_grace: bool,
    pub suppress_feedback: bool,
}

impl GateContext {
    pub fn new(action: GateAction) -> Self {
        Self {
            action,
            has_active_session: false,
            should_use_escalation_grace: false,
            suppress_feedback: false,
        }
    }

    pub fn with_active_session(mut self, active: bool) -> Self {
        self.has_active_session = active;
        self
    }

    pub fn with_escalation_grace(mut self, grace: bool) -> Self {
        self.should_use_escalation_grace = grace;
        self
    }

    pub fn with_suppressed_feedback(mut self, suppress: bool) -> Self {
        self.suppress_feedback = suppress;
        self
    }
}

/// What the controller should do with a probe result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Disposition {
    /// Write the result into the active session in place
    UpdateSession,
    /// Queue a new session carrying the result
    Enqueue,
    /// Nothing could be determined inside the grace window; report blocked
    #[serde(rename_all = "camelCase")]
    FallbackBlocked { show_feedback: bool },
    NoAction,
    /// Surface a decision; attach to the visible session when one exists
    #[serde(rename_all = "camelCase")]
    ShowModal { join_existing: bool },
    #[serde(rename_all = "camelCase")]
    Blocked {
        update_session: bool,
        show_feedback: bool,
    },
}

/// Decide the disposition of a probe result
pub fn determine_disposition(flow: &RecoveryFlowResult, context: &GateContext) -> Disposition {
    let outcome = match flow {
        RecoveryFlowResult::NoOutcome => {
            return if context.should_use_escalation_grace {
                Disposition::FallbackBlocked {
                    show_feedback: !context.suppress_feedback,
                }
            } else {
                Disposition::NoAction
            };
        }
        RecoveryFlowResult::NeedsDisposition { outcome, .. } => outcome,
    };

    if context.action == GateAction::Recheck {
        return if context.has_active_session {
            Disposition::UpdateSession
        } else {
            Disposition::Enqueue
        };
    }

    match outcome {
        RecoveryOutcome::NeedsUserDecision { .. } => Disposition::ShowModal {
            join_existing: context.has_active_session,
        },
        RecoveryOutcome::Blocked { .. } => Disposition::Blocked {
            update_session: context.has_active_session,
            show_feedback: !context.suppress_feedback,
        },
        RecoveryOutcome::AutoInProgress
        | RecoveryOutcome::AutoRecovered
        | RecoveryOutcome::Cancelled => Disposition::NoAction,
    }
}
