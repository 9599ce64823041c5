//! Control messages posted to the cache manager.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Inbound control message, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Delete every cache store and acknowledge.
    ClearCache,
    /// Any message kind this manager does not handle.
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Decodes a message from JSON. Payloads that are not tagged objects
    /// decode to [`ControlMessage::Unknown`].
    #[must_use]
    pub fn from_json(payload: &str) -> Self {
        serde_json::from_str(payload).unwrap_or(Self::Unknown)
    }
}

/// Acknowledgment sent on the reply channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReply {
    /// Whether the requested operation finished.
    pub success: bool,
}

/// Sending half of a message's reply channel.
pub type ReplyPort = oneshot::Sender<MessageReply>;

/// Creates a reply channel for a control message.
#[must_use]
pub fn reply_channel() -> (ReplyPort, oneshot::Receiver<MessageReply>) {
    oneshot::channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_clear_cache() {
        assert_eq!(
            ControlMessage::from_json(r#"{"type":"CLEAR_CACHE"}"#),
            ControlMessage::ClearCache
        );
    }

    #[test]
    fn unknown_type_and_garbage_decode_to_unknown() {
        assert_eq!(
            ControlMessage::from_json(r#"{"type":"SKIP_WAITING"}"#),
            ControlMessage::Unknown
        );
        assert_eq!(ControlMessage::from_json("null"), ControlMessage::Unknown);
        assert_eq!(ControlMessage::from_json("{}"), ControlMessage::Unknown);
    }

    #[test]
    fn reply_serializes_as_success_flag() {
        let json = serde_json::to_string(&MessageReply { success: true }).unwrap();
        assert_eq!(json, r#"{"success":true}"#);
    }

    #[test]
    fn clear_cache_serializes_with_tag() {
        let json = serde_json::to_string(&ControlMessage::ClearCache).unwrap();
        assert_eq!(json, r#"{"type":"CLEAR_CACHE"}"#);
    }
}
