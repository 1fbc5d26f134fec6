//! Controller notifications
//!
//! Callers subscribe to a broadcast channel of `RecoveryEvent`s to render
//! transient feedback and refresh badges. Events carry no completion handles.

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use tt_types::TorrentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum FeedbackKind {
    InProgress,
    Blocked,
    Recovered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RecoveryEvent {
    /// Transient user-facing notice, at most one of each kind per operation
    #[serde(rename_all = "camelCase")]
    Feedback {
        torrent_id: TorrentId,
        kind: FeedbackKind,
        message: String,
    },
    /// The visible session changed; `None` when no session is visible
    #[serde(rename_all = "camelCase")]
    SessionChanged { fingerprint: Option<String> },
    #[serde(rename_all = "camelCase")]
    QueueChanged { queued_count: usize },
    /// A background cycle saw the torrent recover and stopped
    #[serde(rename_all = "camelCase")]
    BackgroundResolved { torrent_id: TorrentId },
}

impl RecoveryEvent {
    pub fn feedback(torrent_id: TorrentId, kind: FeedbackKind, message: impl Into<String>) -> Self {
        RecoveryEvent::Feedback {
            torrent_id,
            kind,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = RecoveryEvent::feedback(3, FeedbackKind::InProgress, "Recovering ubuntu.iso");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "feedback");
        assert_eq!(json["torrentId"], 3);
        assert_eq!(json["kind"], "inProgress");

        let json = serde_json::to_value(RecoveryEvent::QueueChanged { queued_count: 2 }).unwrap();
        assert_eq!(json["type"], "queueChanged");
        assert_eq!(json["queuedCount"], 2);
    }
}
