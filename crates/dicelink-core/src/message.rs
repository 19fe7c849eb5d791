//! The normalized message model.
//!
//! Every adapter translates its wire format into [`NormalizedMessage`]; the
//! bot core never sees platform payloads. Messages are immutable once
//! constructed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Group / channel message.
    Group,
    /// Direct message.
    Private,
}

/// Sender's role within a group, where the platform reports one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    #[default]
    Member,
    Admin,
    Owner,
}

/// The sender of a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sender {
    /// Platform-prefixed user id, e.g. `QQ:12345`.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Display name at send time.
    pub nickname: String,
    /// Group role, if known.
    #[serde(default)]
    pub role: SenderRole,
}

/// One element of a rich message.
///
/// Kept deliberately small: the command core works on text, and the few
/// non-text shapes it needs to recognize (mentions, replies, images).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Segment {
    /// Plain text.
    Text { text: String },
    /// Mention of a user (`@someone`). `target` is platform-prefixed.
    At { target: String },
    /// An image by URL or file reference.
    Image { file: String },
    /// Reply to an earlier message.
    Reply { message_id: String },
}

impl Segment {
    /// Creates a text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A platform-agnostic inbound chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Platform name, e.g. `QQ`.
    pub platform: String,
    /// Group or private.
    #[serde(rename = "messageType")]
    pub message_type: MessageType,
    /// Original platform message id, opaque. Used for recall handling.
    #[serde(rename = "rawId")]
    pub raw_id: Value,
    /// Unix timestamp of the message.
    pub time: i64,
    /// Sender information.
    pub sender: Sender,
    /// Group id (platform-prefixed), present for group messages.
    #[serde(rename = "groupId")]
    pub group_id: Option<String>,
    /// Flattened text content.
    pub content: String,
    /// Rich segments, in wire order.
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl NormalizedMessage {
    /// Whether this is a group message.
    pub fn is_group(&self) -> bool {
        self.message_type == MessageType::Group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_text_constructor() {
        assert_eq!(
            Segment::text("roll 1d20"),
            Segment::Text {
                text: "roll 1d20".into()
            }
        );
    }

    #[test]
    fn message_serializes_with_camel_case_keys() {
        let msg = NormalizedMessage {
            platform: "QQ".into(),
            message_type: MessageType::Group,
            raw_id: Value::from(991),
            time: 1700000000,
            sender: Sender {
                user_id: "QQ:10001".into(),
                nickname: "Roller".into(),
                role: SenderRole::Member,
            },
            group_id: Some("QQ-Group:20002".into()),
            content: ".r 1d100".into(),
            segments: vec![Segment::text(".r 1d100")],
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["messageType"], "group");
        assert_eq!(json["groupId"], "QQ-Group:20002");
        assert_eq!(json["sender"]["userId"], "QQ:10001");
        assert_eq!(json["rawId"], 991);
    }
}
