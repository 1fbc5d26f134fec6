//! Error classification
//!
//! Maps engine error fields (plus optional detail) onto the closed
//! `ErrorClass` taxonomy, and each class onto its recovery profile.

use tt_types::{
    ErrorClass, RecoveryAction, RecoveryState, TorrentDetailEntity, TorrentEntity,
    ENGINE_ERROR_LOCAL, ENGINE_ERROR_NONE, ENGINE_ERROR_TRACKER_ERROR,
    ENGINE_ERROR_TRACKER_WARNING,
};

use RecoveryAction::*;

const PERMISSION_PHRASES: &[&str] = &[
    "permission denied",
    "access is denied",
    "access denied",
    "operation not permitted",
    "read-only file system",
    "eacces",
    "eperm",
];

const DISK_FULL_PHRASES: &[&str] = &[
    "no space",
    "not enough space",
    "disk full",
    "disk is full",
    "quota exceeded",
    "enospc",
];

const MISSING_PHRASES: &[&str] = &[
    "no data found",
    "not found",
    "no such file",
    "cannot find",
    "can't find",
    "does not exist",
    "missing",
    "enoent",
];

const METADATA_PHRASES: &[&str] = &["metadata", "invalid torrent", "info-hash", "infohash"];

fn contains_any(haystack: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| haystack.contains(phrase))
}

/// Disambiguate a local-error message by case-insensitive phrase matching
pub fn classify_local_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if contains_any(&lower, DISK_FULL_PHRASES) {
        ErrorClass::DiskFull
    } else if contains_any(&lower, PERMISSION_PHRASES) {
        ErrorClass::PermissionDenied
    } else if contains_any(&lower, MISSING_PHRASES) {
        ErrorClass::MissingFiles
    } else if contains_any(&lower, METADATA_PHRASES) {
        ErrorClass::Metadata
    } else {
        ErrorClass::LocalError
    }
}

/// Classify a torrent from its numeric code, message and optional detail
pub fn classify_error(torrent: &TorrentEntity, detail: Option<&TorrentDetailEntity>) -> ErrorClass {
    let base = match torrent.error {
        ENGINE_ERROR_NONE => ErrorClass::None,
        ENGINE_ERROR_TRACKER_WARNING => ErrorClass::TrackerWarning,
        ENGINE_ERROR_TRACKER_ERROR => ErrorClass::TrackerError,
        ENGINE_ERROR_LOCAL => classify_local_message(&torrent.error_string),
        _ => ErrorClass::Unknown,
    };

    let Some(detail) = detail else {
        return base;
    };

    if detail.has_partial_artifacts() {
        return ErrorClass::PartialFiles;
    }
    if base == ErrorClass::None && detail.latest_announce_failed() {
        return ErrorClass::TrackerWarning;
    }
    base
}

/// Default recovery state for a class
pub fn base_recovery_state(class: ErrorClass) -> RecoveryState {
    match class {
        ErrorClass::None => RecoveryState::Ok,
        ErrorClass::TrackerWarning | ErrorClass::TrackerError | ErrorClass::Metadata => {
            RecoveryState::TransientWaiting
        }
        ErrorClass::DiskFull => RecoveryState::Blocked,
        ErrorClass::PartialFiles => RecoveryState::NeedsUserConfirmation,
        ErrorClass::LocalError
        | ErrorClass::PermissionDenied
        | ErrorClass::MissingFiles
        | ErrorClass::Unknown => RecoveryState::NeedsUserAction,
    }
}

/// Recovery state after accounting for what the engine is doing right now
///
/// A torrent the engine is checking is `verifying`; a stopped torrent with a
/// tracker error waits on the user rather than on the tracker.
pub fn refine_recovery_state(class: ErrorClass, torrent: &TorrentEntity) -> RecoveryState {
    let base = base_recovery_state(class);
    if base == RecoveryState::Ok {
        return base;
    }
    if torrent.status.is_checking() {
        return RecoveryState::Verifying;
    }
    if class == ErrorClass::TrackerError && torrent.status.is_stopped() {
        return RecoveryState::NeedsUserAction;
    }
    base
}

/// Actions offered for a class
pub fn recovery_actions(class: ErrorClass) -> &'static [RecoveryAction] {
    match class {
        ErrorClass::None => &[],
        ErrorClass::TrackerWarning => &[Reannounce, Pause],
        ErrorClass::TrackerError => &[Reannounce, Pause, RemoveReadd],
        ErrorClass::LocalError => &[Resume, ForceRecheck, OpenFolder, Pause],
        ErrorClass::DiskFull => &[Resume, Pause],
        ErrorClass::PermissionDenied => &[ChangeLocation, OpenFolder, Resume],
        ErrorClass::MissingFiles => &[Resume, ForceRecheck, SetLocation, ReDownload],
        ErrorClass::PartialFiles => &[ForceRecheck, Resume, ReDownload],
        ErrorClass::Metadata => &[Reannounce, RemoveReadd],
        ErrorClass::Unknown => &[Resume, ForceRecheck, RemoveReadd],
    }
}

/// Preferred order when picking the primary action for a class
pub fn preferred_actions(class: ErrorClass) -> &'static [RecoveryAction] {
    match class {
        ErrorClass::None => &[],
        ErrorClass::TrackerWarning => &[Reannounce, Pause],
        ErrorClass::TrackerError => &[Reannounce, RemoveReadd, Pause],
        ErrorClass::LocalError => &[ForceRecheck, Resume, OpenFolder],
        ErrorClass::DiskFull => &[Resume, Pause],
        ErrorClass::PermissionDenied => &[ChangeLocation, OpenFolder, Resume],
        ErrorClass::MissingFiles => &[SetLocation, ReDownload, ForceRecheck, Resume],
        ErrorClass::PartialFiles => &[ForceRecheck, Resume, ReDownload],
        ErrorClass::Metadata => &[Reannounce, RemoveReadd],
        ErrorClass::Unknown => &[ForceRecheck, Resume, RemoveReadd],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tt_types::{TorrentFileEntity, TorrentStatus, TorrentTrackerEntity};

    #[rstest]
    #[case("No data found on local disk", ErrorClass::MissingFiles)]
    #[case("No such file or directory", ErrorClass::MissingFiles)]
    #[case("No space left on device", ErrorClass::DiskFull)]
    #[case("ENOSPC while writing piece", ErrorClass::DiskFull)]
    #[case("Permission denied", ErrorClass::PermissionDenied)]
    #[case("Access is denied.", ErrorClass::PermissionDenied)]
    #[case("invalid torrent metadata", ErrorClass::Metadata)]
    #[case("Input/output error", ErrorClass::LocalError)]
    #[case("", ErrorClass::LocalError)]
    fn test_classify_local_message(#[case] message: &str, #[case] expected: ErrorClass) {
        assert_eq!(classify_local_message(message), expected);
    }

    #[rstest]
    #[case(0, ErrorClass::None)]
    #[case(1, ErrorClass::TrackerWarning)]
    #[case(2, ErrorClass::TrackerError)]
    #[case(9, ErrorClass::Unknown)]
    #[case(-1, ErrorClass::Unknown)]
    fn test_classify_numeric_codes(#[case] code: i32, #[case] expected: ErrorClass) {
        let torrent = TorrentEntity::new(1, "t").with_error(code, "whatever");
        assert_eq!(classify_error(&torrent, None), expected);
    }

    #[test]
    fn test_partial_artifact_overrides_code() {
        let torrent = TorrentEntity::new(1, "t").with_error(2, "tracker down");
        let detail = TorrentDetailEntity::new(torrent.clone()).with_file(TorrentFileEntity {
            name: "movie.mkv.partial".into(),
            ..Default::default()
        });
        assert_eq!(
            classify_error(&torrent, Some(&detail)),
            ErrorClass::PartialFiles
        );
    }

    #[test]
    fn test_failed_announce_upgrades_clean_torrent() {
        let torrent = TorrentEntity::new(1, "t");
        let detail = TorrentDetailEntity::new(torrent.clone()).with_tracker(TorrentTrackerEntity {
            announce: "udp://tracker".into(),
            last_announce_time: Some(10),
            last_announce_succeeded: Some(false),
            ..Default::default()
        });
        assert_eq!(
            classify_error(&torrent, Some(&detail)),
            ErrorClass::TrackerWarning
        );
    }

    #[test]
    fn test_refine_checking_torrent() {
        let torrent = TorrentEntity::new(1, "t").with_status(TorrentStatus::Checking);
        assert_eq!(
            refine_recovery_state(ErrorClass::MissingFiles, &torrent),
            RecoveryState::Verifying
        );
        assert_eq!(
            refine_recovery_state(ErrorClass::None, &torrent),
            RecoveryState::Ok
        );
    }

    #[test]
    fn test_refine_stopped_tracker_error() {
        let torrent = TorrentEntity::new(1, "t").with_status(TorrentStatus::Stopped);
        assert_eq!(
            refine_recovery_state(ErrorClass::TrackerError, &torrent),
            RecoveryState::NeedsUserAction
        );
    }

    #[test]
    fn test_preferred_actions_are_offered() {
        use strum::IntoEnumIterator;
        for class in ErrorClass::iter() {
            for action in preferred_actions(class) {
                assert!(
                    recovery_actions(class).contains(action),
                    "{class} prefers {action} but does not offer it"
                );
            }
        }
    }
}
