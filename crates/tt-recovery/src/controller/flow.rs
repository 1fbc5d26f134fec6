//! Probe → gate → apply pipeline shared by every user-initiated operation

use super::ownership::OwnershipToken;
use super::{FeedbackKind, RecoveryController};
use crate::gate::{determine_disposition, Disposition, GateAction, GateContext};
use crate::probe::{ProbeMode, ProbeReport};
use tracing::{debug, instrument, warn};
use tt_types::{
    ErrorEnvelope, MissingFilesClassification, RecoveryGateOutcome, RecoveryOutcome,
    TorrentEntity,
};

/// One recovery request as the pipeline sees it
#[derive(Debug, Clone)]
pub(crate) struct FlowRequest {
    pub torrent: TorrentEntity,
    pub envelope: ErrorEnvelope,
    pub action: GateAction,
    pub mode: ProbeMode,
    pub suppress_feedback: bool,
}

impl FlowRequest {
    /// De-duplication key
    ///
    /// A resume flow can sit on an open session for as long as the user
    /// leaves it there, so re-probes from that session must not attach to it.
    pub fn flow_key(&self) -> String {
        match self.action {
            GateAction::Recheck => format!("{}:recheck", self.envelope.fingerprint),
            _ => self.envelope.fingerprint.clone(),
        }
    }

    fn uses_escalation_grace(&self) -> bool {
        matches!(self.action, GateAction::Resume | GateAction::DownloadMissing)
    }
}

/// Whether a report would surface a decision that may still clear up on its own
pub(crate) fn awaits_grace(report: &ProbeReport) -> bool {
    matches!(
        report.classification(),
        Some(classification) if !classification.requires_immediate_escalation()
    ) && matches!(
        report.outcome(),
        Some(RecoveryOutcome::NeedsUserDecision { .. })
    )
}

/// Terminal request outcome for a probe outcome
pub(crate) fn gate_outcome(outcome: &RecoveryOutcome) -> RecoveryGateOutcome {
    match outcome {
        RecoveryOutcome::AutoInProgress | RecoveryOutcome::AutoRecovered => {
            RecoveryGateOutcome::Applied
        }
        RecoveryOutcome::Cancelled => RecoveryGateOutcome::Cancelled,
        RecoveryOutcome::Blocked { .. } | RecoveryOutcome::NeedsUserDecision { .. } => {
            RecoveryGateOutcome::NotApplied
        }
    }
}

#[instrument(
    skip_all,
    fields(torrent_id = request.torrent.id, action = %request.action, mode = %request.mode)
)]
pub(crate) async fn run(
    controller: &RecoveryController,
    request: FlowRequest,
    token: OwnershipToken,
) -> RecoveryGateOutcome {
    let mut report = controller
        .probe_shared(&request.torrent, &request.envelope, request.mode.clone())
        .await;
    if !controller.owns(&token) {
        debug!("Recovery ownership lost during probe");
        return RecoveryGateOutcome::Cancelled;
    }

    let mut grace_used = false;
    if request.uses_escalation_grace() && awaits_grace(&report) {
        let grace = controller.config().escalation_grace;
        debug!(grace_ms = grace.as_millis() as u64, "Holding decision for escalation grace");
        tokio::time::sleep(grace).await;
        if !controller.owns(&token) {
            return RecoveryGateOutcome::Cancelled;
        }
        report = controller
            .probe_shared(&request.torrent, &request.envelope, ProbeMode::Resume)
            .await;
        if !controller.owns(&token) {
            return RecoveryGateOutcome::Cancelled;
        }
        grace_used = true;
    }

    let context = GateContext::new(request.action)
        .with_active_session(controller.has_session(&request.envelope.fingerprint))
        .with_escalation_grace(grace_used)
        .with_suppressed_feedback(request.suppress_feedback);
    let disposition = determine_disposition(&report.flow, &context);
    debug!(
        ?disposition,
        outcome = report.outcome().map(RecoveryOutcome::kind).unwrap_or("none"),
        "Recovery gate decided"
    );

    apply(controller, &request, report, disposition).await
}

async fn apply(
    controller: &RecoveryController,
    request: &FlowRequest,
    report: ProbeReport,
    disposition: Disposition,
) -> RecoveryGateOutcome {
    let fingerprint = request.envelope.fingerprint.as_str();
    let decided = decided(&report);

    match disposition {
        Disposition::UpdateSession => {
            let Some((outcome, classification)) = decided else {
                return settle_without_outcome(controller, request, &report);
            };
            if outcome.is_self_resolving() {
                finish_recovered(controller, request, &outcome);
            } else {
                controller.update_session(fingerprint, outcome.clone(), classification);
            }
            gate_outcome(&outcome)
        }
        Disposition::Enqueue => {
            let Some((outcome, classification)) = decided else {
                return settle_without_outcome(controller, request, &report);
            };
            if outcome.is_self_resolving() || outcome == RecoveryOutcome::Cancelled {
                finish_recovered(controller, request, &outcome);
                return gate_outcome(&outcome);
            }
            controller
                .enqueue_session(
                    request.torrent.clone(),
                    request.envelope.clone(),
                    outcome,
                    classification,
                )
                .await
        }
        Disposition::FallbackBlocked { show_feedback } => {
            if show_feedback {
                controller.feedback(
                    request.torrent.id,
                    FeedbackKind::Blocked,
                    format!("Recovery of {} is blocked", request.torrent.name),
                );
            }
            controller.start_background(request.torrent.clone(), request.envelope.clone());
            match report.failure {
                Some(reason) => RecoveryGateOutcome::failed(reason),
                None => RecoveryGateOutcome::NotApplied,
            }
        }
        Disposition::NoAction => match decided {
            Some((outcome, _)) => {
                finish_recovered(controller, request, &outcome);
                gate_outcome(&outcome)
            }
            None => settle_without_outcome(controller, request, &report),
        },
        Disposition::ShowModal { join_existing } => {
            let Some((outcome, classification)) = decided else {
                return settle_without_outcome(controller, request, &report);
            };
            let joined = if join_existing {
                controller.update_session(fingerprint, outcome.clone(), classification.clone())
            } else {
                None
            };
            let completion = match joined {
                Some(completion) => completion,
                None => controller.enqueue_session(
                    request.torrent.clone(),
                    request.envelope.clone(),
                    outcome,
                    classification,
                ),
            };
            completion.await
        }
        Disposition::Blocked {
            update_session,
            show_feedback,
        } => {
            if let Some((outcome, classification)) = decided {
                if show_feedback {
                    let message = match &outcome {
                        RecoveryOutcome::Blocked { message, .. } if !message.is_empty() => {
                            message.clone()
                        }
                        _ => format!("Recovery of {} is blocked", request.torrent.name),
                    };
                    controller.feedback(request.torrent.id, FeedbackKind::Blocked, message);
                }
                if update_session {
                    controller.update_session(fingerprint, outcome, classification);
                }
            }
            controller.start_background(request.torrent.clone(), request.envelope.clone());
            RecoveryGateOutcome::NotApplied
        }
    }
}

fn decided(report: &ProbeReport) -> Option<(RecoveryOutcome, MissingFilesClassification)> {
    Some((report.outcome()?.clone(), report.classification()?.clone()))
}

/// Self-resolving or cancelled outcome: settle any session and keep watching when needed
fn finish_recovered(
    controller: &RecoveryController,
    request: &FlowRequest,
    outcome: &RecoveryOutcome,
) {
    if !outcome.is_self_resolving() {
        return;
    }
    controller.resolve_session(&request.envelope.fingerprint, RecoveryGateOutcome::Applied);
    match outcome {
        RecoveryOutcome::AutoRecovered => {
            if !request.suppress_feedback {
                controller.feedback(
                    request.torrent.id,
                    FeedbackKind::Recovered,
                    format!("{} recovered", request.torrent.name),
                );
            }
        }
        _ => controller.start_background(request.torrent.clone(), request.envelope.clone()),
    }
}

/// No outcome and no grace: a clean no-op, or a failure the background cycle keeps retrying
fn settle_without_outcome(
    controller: &RecoveryController,
    request: &FlowRequest,
    report: &ProbeReport,
) -> RecoveryGateOutcome {
    let Some(reason) = report.failure.clone() else {
        return RecoveryGateOutcome::NotApplied;
    };
    warn!(torrent_id = request.torrent.id, reason = %reason, "Recovery attempt failed");
    if !request.suppress_feedback {
        controller.feedback(
            request.torrent.id,
            FeedbackKind::Blocked,
            format!("Recovery of {} failed: {reason}", request.torrent.name),
        );
    }
    controller.start_background(request.torrent.clone(), request.envelope.clone());
    RecoveryGateOutcome::failed(reason)
}
