//! Incident fingerprints
//!
//! A fingerprint identifies one recoverable incident. Tracker URLs are sorted
//! before hashing so their reported order does not matter.

use tt_types::ErrorClass;

const FNV64_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV64_PRIME: u64 = 0x100000001b3;

const FIELD_SEPARATOR: &[u8] = &[0x1f];
const ITEM_SEPARATOR: &[u8] = &[0x1e];

/// FNV-1a over a sequence of byte slices
fn fnv1a_64<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> u64 {
    let mut hash = FNV64_OFFSET_BASIS;
    for part in parts {
        for byte in part {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV64_PRIME);
        }
    }
    hash
}

/// Fingerprint for a torrent identity, its classification and tracker set
pub fn compute_fingerprint(
    identity: &str,
    error_class: ErrorClass,
    error_message: Option<&str>,
    trackers: &[String],
) -> String {
    let mut sorted: Vec<&str> = trackers.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts: Vec<&[u8]> = vec![
        identity.as_bytes(),
        FIELD_SEPARATOR,
        error_class.as_str().as_bytes(),
        FIELD_SEPARATOR,
        error_message.unwrap_or("").as_bytes(),
        FIELD_SEPARATOR,
    ];
    for tracker in sorted {
        parts.push(tracker.as_bytes());
        parts.push(ITEM_SEPARATOR);
    }

    format!("{:016x}", fnv1a_64(parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv_reference_value() {
        // Published FNV-1a 64 test vector for "a"
        assert_eq!(fnv1a_64([b"a".as_slice()]), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn test_tracker_order_independent() {
        let a = compute_fingerprint(
            "abc",
            ErrorClass::TrackerError,
            Some("timeout"),
            &["udp://one".to_string(), "udp://two".to_string()],
        );
        let b = compute_fingerprint(
            "abc",
            ErrorClass::TrackerError,
            Some("timeout"),
            &["udp://two".to_string(), "udp://one".to_string()],
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_fields_do_not_run_together() {
        let a = compute_fingerprint("ab", ErrorClass::Unknown, Some("c"), &[]);
        let b = compute_fingerprint("a", ErrorClass::Unknown, Some("bc"), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_class_changes_fingerprint() {
        let a = compute_fingerprint("abc", ErrorClass::DiskFull, None, &[]);
        let b = compute_fingerprint("abc", ErrorClass::MissingFiles, None, &[]);
        assert_ne!(a, b);
    }
}
