//! Envelope invariants
//!
//! Every envelope must pair its class with an allowed recovery state. A
//! violating pair is coerced to the first allowed state and reported once per
//! fingerprint until that fingerprint stops violating.

use std::collections::HashSet;
use tt_types::{ErrorClass, RecoveryState};

/// Allowed recovery states per class; the first entry is the coercion target
pub fn allowed_states(class: ErrorClass) -> &'static [RecoveryState] {
    use RecoveryState::*;
    match class {
        ErrorClass::None => &[Ok],
        ErrorClass::TrackerWarning => &[TransientWaiting],
        ErrorClass::TrackerError => &[TransientWaiting, NeedsUserAction],
        ErrorClass::LocalError => &[NeedsUserAction, Verifying],
        ErrorClass::DiskFull => &[Blocked],
        ErrorClass::PermissionDenied => &[NeedsUserAction],
        ErrorClass::MissingFiles => &[NeedsUserAction, Verifying],
        ErrorClass::PartialFiles => &[NeedsUserConfirmation, Verifying],
        ErrorClass::Metadata => &[TransientWaiting],
        ErrorClass::Unknown => &[NeedsUserAction, Verifying],
    }
}

pub fn is_allowed(class: ErrorClass, state: RecoveryState) -> bool {
    allowed_states(class).contains(&state)
}

/// A coerced `(class, state)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    pub fingerprint: String,
    pub error_class: ErrorClass,
    pub observed: RecoveryState,
    pub coerced_to: RecoveryState,
}

/// Coerce a state into the allow-list for its class
pub fn enforce(class: ErrorClass, state: RecoveryState) -> (RecoveryState, bool) {
    if is_allowed(class, state) {
        (state, false)
    } else {
        (allowed_states(class)[0], true)
    }
}

/// Fingerprints whose violation has already been reported
#[derive(Debug, Default)]
pub struct ViolationLedger {
    reported: HashSet<String>,
}

impl ViolationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record whether `fingerprint` violated in its latest build
    ///
    /// Returns true only for the first violation since the fingerprint was last clean.
    pub fn observe(&mut self, fingerprint: &str, violated: bool) -> bool {
        if violated {
            self.reported.insert(fingerprint.to_string())
        } else {
            self.reported.remove(fingerprint);
            false
        }
    }

    /// Forget reports for fingerprints that are no longer produced
    ///
    /// Returns how many reports were dropped.
    pub fn retain_live(&mut self, live: &HashSet<String>) -> usize {
        let before = self.reported.len();
        self.reported.retain(|fingerprint| live.contains(fingerprint));
        before - self.reported.len()
    }

    pub fn is_reported(&self, fingerprint: &str) -> bool {
        self.reported.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.reported.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reported.is_empty()
    }

    pub fn clear(&mut self) {
        self.reported.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_class_has_allowed_states() {
        for class in ErrorClass::iter() {
            assert!(!allowed_states(class).is_empty());
        }
    }

    #[test]
    fn test_disk_full_only_blocked() {
        assert_eq!(allowed_states(ErrorClass::DiskFull), &[RecoveryState::Blocked]);
        let (state, coerced) = enforce(ErrorClass::DiskFull, RecoveryState::Verifying);
        assert_eq!(state, RecoveryState::Blocked);
        assert!(coerced);
    }

    #[test]
    fn test_none_only_ok() {
        let (state, coerced) = enforce(ErrorClass::None, RecoveryState::NeedsUserAction);
        assert_eq!(state, RecoveryState::Ok);
        assert!(coerced);
        assert_eq!(
            enforce(ErrorClass::None, RecoveryState::Ok),
            (RecoveryState::Ok, false)
        );
    }

    #[test]
    fn test_ledger_reports_once_until_clean() {
        let mut ledger = ViolationLedger::new();
        assert!(ledger.observe("fp", true));
        assert!(!ledger.observe("fp", true));
        assert!(ledger.is_reported("fp"));

        assert!(!ledger.observe("fp", false));
        assert!(ledger.is_empty());
        assert!(ledger.observe("fp", true));
    }

    #[test]
    fn test_ledger_drops_fingerprints_no_longer_seen() {
        let mut ledger = ViolationLedger::new();
        ledger.observe("old", true);
        ledger.observe("kept", true);

        let live: HashSet<String> = ["kept".to_string(), "clean".to_string()].into();
        assert_eq!(ledger.retain_live(&live), 1);
        assert!(!ledger.is_reported("old"));
        assert!(ledger.is_reported("kept"));
    }
}
