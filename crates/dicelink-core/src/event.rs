//! Normalized notice and request events.
//!
//! Notices (membership changes, recalls) and requests (friend / group
//! invitations carrying an approval flag) are the non-message events the
//! dispatcher forwards to the bot core. Like messages they are already
//! translated out of the wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of a notice event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// A member (possibly the bot) joined a group.
    GroupIncrease,
    /// A member (possibly the bot) left or was removed from a group.
    GroupDecrease,
    /// A group message was recalled.
    GroupRecall,
    /// A private message was recalled.
    FriendRecall,
    /// A poke / nudge directed at someone.
    Poke,
}

/// A normalized notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoticeEvent {
    pub platform: String,
    pub kind: NoticeKind,
    /// Group the notice concerns, if any (platform-prefixed).
    #[serde(rename = "groupId")]
    pub group_id: Option<String>,
    /// Subject user (the one who joined/left/was poked), platform-prefixed.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Acting user (kicker, recaller), when distinct from the subject.
    #[serde(rename = "operatorId")]
    pub operator_id: Option<String>,
    /// Recalled message id for recall notices.
    #[serde(rename = "messageId")]
    pub message_id: Option<Value>,
    pub time: i64,
}

/// Kind of an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Someone wants to add the bot as a friend.
    Friend,
    /// The bot was invited into a group.
    GroupInvite,
    /// Someone asks to join a group the bot administers.
    GroupJoin,
}

/// A normalized request awaiting approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEvent {
    pub platform: String,
    pub kind: RequestKind,
    /// Opaque approval flag to pass back when answering the request.
    pub flag: String,
    /// Requesting user, platform-prefixed.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Target group for group requests, platform-prefixed.
    #[serde(rename = "groupId")]
    pub group_id: Option<String>,
    /// Free-form comment attached by the requester.
    #[serde(default)]
    pub comment: String,
    pub time: i64,
}
