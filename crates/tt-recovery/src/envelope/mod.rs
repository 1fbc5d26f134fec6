//! Error Envelope Builder
//!
//! Turns one torrent's raw engine error fields (plus optional file and tracker
//! detail) into a fully-populated, invariant-checked `ErrorEnvelope`.
//!
//! `build_error_envelope` is pure: no clock, no randomness, no I/O. Timestamps
//! and retry bookkeeping are left `None` for the layer that owns transitions.
//! `EnvelopeBuilder` wraps it with a per-instance violation ledger so each
//! coerced fingerprint is logged once.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};
use tt_types::{
    EngineCapabilities, ErrorClass, ErrorEnvelope, RecoveryAction, RecoveryState,
    TorrentDetailEntity, TorrentEntity,
};

pub mod classify;
pub mod fingerprint;
pub mod invariants;

pub use classify::{classify_error, classify_local_message};
pub use fingerprint::compute_fingerprint;
pub use invariants::{allowed_states, InvariantViolation, ViolationLedger};

/// Envelope plus the invariant violation (if any) that was coerced while building it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeBuild {
    pub envelope: ErrorEnvelope,
    pub violation: Option<InvariantViolation>,
}

/// Build an envelope, reporting any coerced invariant violation to the caller
pub fn evaluate_envelope(
    torrent: &TorrentEntity,
    detail: Option<&TorrentDetailEntity>,
    capabilities: Option<&EngineCapabilities>,
) -> EnvelopeBuild {
    let capabilities = capabilities.copied().unwrap_or_default();
    let error_class = classify_error(torrent, detail);

    let error_message = if error_class == ErrorClass::None || torrent.error_string.is_empty() {
        None
    } else {
        Some(torrent.error_string.clone())
    };

    let trackers = detail.map(TorrentDetailEntity::tracker_urls).unwrap_or_default();
    let fingerprint = compute_fingerprint(
        &torrent.identity(),
        error_class,
        error_message.as_deref(),
        &trackers,
    );

    let observed = classify::refine_recovery_state(error_class, torrent);
    let (recovery_state, coerced) = invariants::enforce(error_class, observed);
    let violation = coerced.then(|| InvariantViolation {
        fingerprint: fingerprint.clone(),
        error_class,
        observed,
        coerced_to: recovery_state,
    });

    let recovery_actions = classify::recovery_actions(error_class).to_vec();
    let primary_action =
        select_primary_action(error_class, recovery_state, &recovery_actions, &capabilities);

    EnvelopeBuild {
        envelope: ErrorEnvelope {
            error_class,
            error_message,
            last_error_at: None,
            recovery_state,
            retry_count: None,
            next_retry_at: None,
            recovery_actions,
            fingerprint,
            primary_action,
        },
        violation,
    }
}

/// Build an envelope for one torrent
pub fn build_error_envelope(
    torrent: &TorrentEntity,
    detail: Option<&TorrentDetailEntity>,
    capabilities: Option<&EngineCapabilities>,
) -> ErrorEnvelope {
    evaluate_envelope(torrent, detail, capabilities).envelope
}

fn action_allowed(action: RecoveryAction, capabilities: &EngineCapabilities) -> bool {
    action != RecoveryAction::Reannounce || capabilities.supports_tracker_reannounce
}

/// First preferred action that is offered and allowed, else the first allowed offered action
pub fn select_primary_action(
    class: ErrorClass,
    state: RecoveryState,
    actions: &[RecoveryAction],
    capabilities: &EngineCapabilities,
) -> Option<RecoveryAction> {
    if state == RecoveryState::Ok {
        return None;
    }
    classify::preferred_actions(class)
        .iter()
        .copied()
        .find(|action| actions.contains(action) && action_allowed(*action, capabilities))
        .or_else(|| {
            actions
                .iter()
                .copied()
                .find(|action| action_allowed(*action, capabilities))
        })
}

/// Envelope builder owning its violation ledger
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    capabilities: EngineCapabilities,
    ledger: Mutex<ViolationLedger>,
}

impl EnvelopeBuilder {
    pub fn new(capabilities: EngineCapabilities) -> Self {
        Self {
            capabilities,
            ledger: Mutex::new(ViolationLedger::new()),
        }
    }

    pub fn capabilities(&self) -> EngineCapabilities {
        self.capabilities
    }

    /// Build an envelope, logging a coerced violation once per fingerprint
    pub fn build(
        &self,
        torrent: &TorrentEntity,
        detail: Option<&TorrentDetailEntity>,
    ) -> ErrorEnvelope {
        let EnvelopeBuild {
            envelope,
            violation,
        } = evaluate_envelope(torrent, detail, Some(&self.capabilities));

        let first_report = self
            .ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(&envelope.fingerprint, violation.is_some());

        if let (true, Some(violation)) = (first_report, violation) {
            warn!(
                torrent_id = torrent.id,
                fingerprint = %violation.fingerprint,
                error_class = %violation.error_class,
                observed = %violation.observed,
                coerced_to = %violation.coerced_to,
                "Coerced envelope with disallowed recovery state"
            );
        }
        envelope
    }

    /// Return the torrent with a freshly built envelope attached
    pub fn attach(&self, torrent: TorrentEntity, detail: Option<&TorrentDetailEntity>) -> TorrentEntity {
        let envelope = self.build(&torrent, detail);
        torrent.with_envelope(envelope)
    }

    /// Drop violation reports for incidents outside `live`
    pub fn prune(&self, live: &HashSet<String>) {
        let dropped = self
            .ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain_live(live);
        if dropped > 0 {
            debug!(dropped, "Pruned stale envelope violation reports");
        }
    }

    /// Fingerprints currently flagged as violating
    pub fn reported_violations(&self) -> usize {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use tt_types::{TorrentFileEntity, TorrentStatus, TorrentTrackerEntity};

    fn local_error(message: &str) -> TorrentEntity {
        TorrentEntity::new(42, "ubuntu.iso")
            .with_hash("0123abcd")
            .with_error(3, message)
            .with_download_dir("/data/iso")
    }

    #[test]
    fn test_missing_files_envelope() {
        let envelope = build_error_envelope(&local_error("No data found on local disk"), None, None);
        assert_eq!(envelope.error_class, ErrorClass::MissingFiles);
        assert_eq!(envelope.recovery_state, RecoveryState::NeedsUserAction);
        for action in [
            RecoveryAction::Resume,
            RecoveryAction::ForceRecheck,
            RecoveryAction::SetLocation,
            RecoveryAction::ReDownload,
        ] {
            assert!(envelope.offers(action), "missing {action}");
        }
        assert_eq!(envelope.primary_action, Some(RecoveryAction::SetLocation));
        assert_eq!(
            envelope.error_message.as_deref(),
            Some("No data found on local disk")
        );
    }

    #[test]
    fn test_disk_full_envelope() {
        let envelope = build_error_envelope(&local_error("No space left on device"), None, None);
        assert_eq!(envelope.error_class, ErrorClass::DiskFull);
        assert_eq!(envelope.recovery_state, RecoveryState::Blocked);
        assert_eq!(
            envelope.recovery_actions,
            vec![RecoveryAction::Resume, RecoveryAction::Pause]
        );
    }

    #[test]
    fn test_clean_torrent_envelope() {
        let torrent = TorrentEntity::new(1, "clean").with_error(0, "stale message");
        let envelope = build_error_envelope(&torrent, None, None);
        assert_eq!(envelope.error_class, ErrorClass::None);
        assert_eq!(envelope.recovery_state, RecoveryState::Ok);
        assert_eq!(envelope.primary_action, None);
        assert_eq!(envelope.error_message, None);
        assert!(!envelope.is_actionable());
        assert!(envelope.last_error_at.is_none());
        assert!(envelope.retry_count.is_none());
        assert!(envelope.next_retry_at.is_none());
    }

    #[test]
    fn test_reannounce_gated_by_capability() {
        let torrent = TorrentEntity::new(5, "t").with_error(1, "Tracker gave HTTP 502");
        let capable = build_error_envelope(&torrent, None, None);
        assert_eq!(capable.primary_action, Some(RecoveryAction::Reannounce));

        let without = EngineCapabilities {
            supports_tracker_reannounce: false,
            ..EngineCapabilities::default()
        };
        let gated = build_error_envelope(&torrent, None, Some(&without));
        assert_eq!(gated.primary_action, Some(RecoveryAction::Pause));
        assert!(gated.offers(RecoveryAction::Reannounce));
    }

    #[test]
    fn test_metadata_without_reannounce_falls_back() {
        let torrent = local_error("invalid torrent metadata");
        let without = EngineCapabilities {
            supports_tracker_reannounce: false,
            ..EngineCapabilities::default()
        };
        let envelope = build_error_envelope(&torrent, None, Some(&without));
        assert_eq!(envelope.error_class, ErrorClass::Metadata);
        assert_eq!(envelope.primary_action, Some(RecoveryAction::RemoveReadd));
    }

    #[test]
    fn test_checking_disk_full_is_coerced() {
        let torrent =
            local_error("No space left on device").with_status(TorrentStatus::Checking);
        let build = evaluate_envelope(&torrent, None, None);
        assert_eq!(build.envelope.recovery_state, RecoveryState::Blocked);
        let violation = build.violation.expect("violation reported");
        assert_eq!(violation.observed, RecoveryState::Verifying);
        assert_eq!(violation.coerced_to, RecoveryState::Blocked);
    }

    #[test]
    fn test_checking_missing_files_is_verifying() {
        let torrent =
            local_error("No data found on local disk").with_status(TorrentStatus::Checking);
        let build = evaluate_envelope(&torrent, None, None);
        assert_eq!(build.envelope.recovery_state, RecoveryState::Verifying);
        assert!(build.violation.is_none());
    }

    #[test]
    fn test_builder_ledger_tracks_violations() {
        let builder = EnvelopeBuilder::new(EngineCapabilities::default());
        let violating =
            local_error("No space left on device").with_status(TorrentStatus::Checking);

        builder.build(&violating, None);
        builder.build(&violating, None);
        assert_eq!(builder.reported_violations(), 1);

        let settled = violating.clone().with_status(TorrentStatus::Stopped);
        builder.build(&settled, None);
        assert_eq!(builder.reported_violations(), 0);
    }

    #[test]
    fn test_builder_prunes_vanished_fingerprints() {
        let builder = EnvelopeBuilder::new(EngineCapabilities::default());
        let violating =
            local_error("No space left on device").with_status(TorrentStatus::Checking);
        builder.build(&violating, None);
        assert_eq!(builder.reported_violations(), 1);

        // Same torrent, new message: the old fingerprint is never rebuilt
        let moved_on = builder.build(
            &local_error("No data found on local disk").with_status(TorrentStatus::Checking),
            None,
        );
        assert_eq!(builder.reported_violations(), 1);

        builder.prune(&HashSet::from([moved_on.fingerprint]));
        assert_eq!(builder.reported_violations(), 0);
    }

    #[test]
    fn test_attach_sets_envelope() {
        let builder = EnvelopeBuilder::default();
        let torrent = builder.attach(local_error("No data found on local disk"), None);
        let envelope = torrent.error_envelope.expect("envelope attached");
        assert!(envelope.is_actionable());
    }

    #[test]
    fn test_partial_files_from_detail() {
        let torrent = TorrentEntity::new(9, "album").with_hash("beef");
        let detail = TorrentDetailEntity::new(torrent.clone()).with_file(TorrentFileEntity {
            name: "01.flac.part".into(),
            length: 100,
            ..Default::default()
        });
        let envelope = build_error_envelope(&torrent, Some(&detail), None);
        assert_eq!(envelope.error_class, ErrorClass::PartialFiles);
        assert_eq!(
            envelope.recovery_state,
            RecoveryState::NeedsUserConfirmation
        );
        assert_eq!(envelope.primary_action, Some(RecoveryAction::ForceRecheck));
    }

    fn arb_status() -> impl Strategy<Value = TorrentStatus> {
        (0i32..=6).prop_map(|code| TorrentStatus::try_from(code).unwrap_or_default())
    }

    fn arb_message() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            Just("No data found on local disk".to_string()),
            Just("No space left on device".to_string()),
            Just("Permission denied".to_string()),
            Just("metadata download failed".to_string()),
            "[a-zA-Z ]{0,24}",
        ]
    }

    fn arb_detail(torrent: TorrentEntity) -> impl Strategy<Value = Option<TorrentDetailEntity>> {
        let tracker = (
            "udp://[a-z]{1,8}",
            proptest::option::of(0i64..1000),
            proptest::option::of(any::<bool>()),
        )
            .prop_map(|(announce, time, ok)| TorrentTrackerEntity {
                announce,
                last_announce_time: time,
                last_announce_succeeded: ok,
                ..Default::default()
            });
        let file = ("[a-z]{1,6}(\\.part|\\.partial|\\.mkv)?").prop_map(|name| TorrentFileEntity {
            name,
            ..Default::default()
        });
        proptest::option::of(
            (
                proptest::collection::vec(tracker, 0..4),
                proptest::collection::vec(file, 0..4),
            )
                .prop_map(move |(trackers, files)| TorrentDetailEntity {
                    torrent: torrent.clone(),
                    files,
                    trackers,
                }),
        )
    }

    fn arb_case() -> impl Strategy<Value = (TorrentEntity, Option<TorrentDetailEntity>, bool)> {
        (-1i32..5, arb_message(), arb_status(), any::<bool>())
            .prop_flat_map(|(code, message, status, reannounce)| {
                let torrent = TorrentEntity::new(7, "fuzz")
                    .with_hash("c0ffee")
                    .with_error(code, message)
                    .with_status(status);
                (Just(torrent.clone()), arb_detail(torrent), Just(reannounce))
            })
    }

    proptest! {
        #[test]
        fn prop_envelope_respects_allow_list((torrent, detail, reannounce) in arb_case()) {
            let capabilities = EngineCapabilities {
                supports_tracker_reannounce: reannounce,
                ..EngineCapabilities::default()
            };
            let envelope = build_error_envelope(&torrent, detail.as_ref(), Some(&capabilities));
            prop_assert!(invariants::is_allowed(envelope.error_class, envelope.recovery_state));
            if envelope.recovery_state == RecoveryState::Ok {
                prop_assert!(envelope.primary_action.is_none());
            }
            if let Some(primary) = envelope.primary_action {
                prop_assert!(envelope.offers(primary));
                prop_assert!(reannounce || primary != RecoveryAction::Reannounce);
            }
        }

        #[test]
        fn prop_clean_code_is_none_without_detail(message in arb_message(), status in arb_status()) {
            let torrent = TorrentEntity::new(1, "clean").with_error(0, message).with_status(status);
            let envelope = build_error_envelope(&torrent, None, None);
            prop_assert_eq!(envelope.error_class, ErrorClass::None);
            prop_assert_eq!(envelope.recovery_state, RecoveryState::Ok);
            prop_assert_eq!(envelope.primary_action, None);
        }

        #[test]
        fn prop_fingerprint_ignores_last_error_at((torrent, detail, _r) in arb_case(), seconds in 0i64..2_000_000_000) {
            let first = build_error_envelope(&torrent, detail.as_ref(), None);
            let mut stamped = torrent.clone();
            let mut envelope = first.clone();
            envelope.last_error_at = chrono::DateTime::from_timestamp(seconds, 0).or(Some(Utc::now()));
            stamped.error_envelope = Some(envelope);
            let second = build_error_envelope(&stamped, detail.as_ref(), None);
            prop_assert_eq!(first.fingerprint, second.fingerprint);
        }
    }
}
