//! OneBot v11 wire model and translation into the normalized shapes.
//!
//! Inbound frames are tagged by `post_type`; everything the command core
//! consumes is translated here and nothing platform-specific escapes this
//! module. IDs are platform-prefixed on the way in (`QQ:123`,
//! `QQ-Group:456`) and stripped back to numbers on the way out.

use serde::Deserialize;
use serde_json::Value;

use dicelink_core::{
    AdapterError, AdapterResult, MessageType, NormalizedMessage, NoticeEvent, NoticeKind,
    RequestEvent, RequestKind, Segment, Sender, SenderRole,
};
use dicelink_engine::{Frame, MetaFrame};

/// Platform tag used in prefixed IDs.
pub const PLATFORM: &str = "QQ";

// =============================================================================
// ID mapping
// =============================================================================

/// `12345` → `QQ:12345`.
pub fn format_user_id(id: i64) -> String {
    format!("{PLATFORM}:{id}")
}

/// `67890` → `QQ-Group:67890`.
pub fn format_group_id(id: i64) -> String {
    format!("{PLATFORM}-Group:{id}")
}

/// Strips the platform prefix from either ID form.
pub fn extract_id(id: &str) -> AdapterResult<i64> {
    let numeric = id.rsplit(':').next().unwrap_or(id);
    numeric
        .parse::<i64>()
        .map_err(|_| AdapterError::parse(format!("malformed platform id: {id}")))
}

// =============================================================================
// Wire events
// =============================================================================

/// Superset of the OneBot v11 event fields, tagged by `post_type`.
///
/// Kept as one flat struct: the variants overlap heavily and the gateway is
/// not strict about omitting irrelevant fields.
#[derive(Debug, Deserialize)]
pub struct WireEvent {
    #[serde(default)]
    pub post_type: String,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub sub_type: String,
    #[serde(default)]
    pub meta_event_type: String,
    #[serde(default)]
    pub notice_type: String,
    #[serde(default)]
    pub request_type: String,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub message_id: Option<Value>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub operator_id: Option<i64>,
    #[serde(default)]
    pub target_id: Option<i64>,
    #[serde(default)]
    pub sender: WireSender,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub raw_message: String,
    #[serde(default)]
    pub flag: String,
    #[serde(default)]
    pub comment: String,
}

/// Sender block of a message event.
#[derive(Debug, Default, Deserialize)]
pub struct WireSender {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub card: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl WireSender {
    fn role(&self) -> SenderRole {
        match self.role.as_deref() {
            Some("owner") => SenderRole::Owner,
            Some("admin") => SenderRole::Admin,
            _ => SenderRole::Member,
        }
    }

    /// Display name: the group card wins over the base nickname.
    fn display_name(&self) -> String {
        self.card
            .as_deref()
            .filter(|card| !card.is_empty())
            .or(self.nickname.as_deref())
            .unwrap_or_default()
            .to_string()
    }
}

// =============================================================================
// Translation
// =============================================================================

/// Translates one decoded (non-response) frame into its category.
pub fn to_frame(value: &Value) -> AdapterResult<Frame> {
    let event: WireEvent =
        serde_json::from_value(value.clone()).map_err(|e| AdapterError::parse(e.to_string()))?;

    match event.post_type.as_str() {
        "meta_event" => Ok(translate_meta(&event)),
        "message" => translate_message(event).map(Frame::Message),
        "notice" => Ok(translate_notice(&event)),
        "request" => Ok(translate_request(&event)),
        other => {
            tracing::debug!(post_type = %other, "unrecognized post_type, skipping");
            Ok(Frame::Ignored)
        }
    }
}

fn translate_meta(event: &WireEvent) -> Frame {
    match event.meta_event_type.as_str() {
        "heartbeat" => Frame::Meta(MetaFrame::Heartbeat),
        "lifecycle" => Frame::Meta(MetaFrame::Lifecycle {
            sub_type: event.sub_type.clone(),
        }),
        _ => Frame::Ignored,
    }
}

fn translate_message(event: WireEvent) -> AdapterResult<NormalizedMessage> {
    let message_type = match event.message_type.as_str() {
        "group" => MessageType::Group,
        "private" => MessageType::Private,
        other => {
            return Err(AdapterError::parse(format!(
                "unknown message_type: {other}"
            )));
        }
    };

    let user_id = event
        .user_id
        .or(event.sender.user_id)
        .ok_or_else(|| AdapterError::parse("message without user_id"))?;

    let segments = parse_segments(event.message.as_ref(), &event.raw_message);
    let content = plain_text(&segments);

    Ok(NormalizedMessage {
        platform: PLATFORM.to_string(),
        message_type,
        raw_id: event.message_id.unwrap_or(Value::Null),
        time: event.time,
        sender: Sender {
            user_id: format_user_id(user_id),
            nickname: event.sender.display_name(),
            role: event.sender.role(),
        },
        group_id: event.group_id.map(format_group_id),
        content,
        segments,
    })
}

fn translate_notice(event: &WireEvent) -> Frame {
    let kind = match event.notice_type.as_str() {
        "group_increase" => NoticeKind::GroupIncrease,
        "group_decrease" => NoticeKind::GroupDecrease,
        "group_recall" => NoticeKind::GroupRecall,
        "friend_recall" => NoticeKind::FriendRecall,
        "notify" if event.sub_type == "poke" => NoticeKind::Poke,
        other => {
            tracing::debug!(notice_type = %other, "unhandled notice type, skipping");
            return Frame::Ignored;
        }
    };
    let Some(user_id) = event.user_id else {
        return Frame::Ignored;
    };

    Frame::Notice(NoticeEvent {
        platform: PLATFORM.to_string(),
        kind,
        group_id: event.group_id.map(format_group_id),
        user_id: format_user_id(user_id),
        operator_id: event.operator_id.map(format_user_id),
        message_id: event.message_id.clone(),
        time: event.time,
    })
}

fn translate_request(event: &WireEvent) -> Frame {
    let kind = match (event.request_type.as_str(), event.sub_type.as_str()) {
        ("friend", _) => RequestKind::Friend,
        ("group", "invite") => RequestKind::GroupInvite,
        ("group", _) => RequestKind::GroupJoin,
        (other, _) => {
            tracing::debug!(request_type = %other, "unhandled request type, skipping");
            return Frame::Ignored;
        }
    };
    let Some(user_id) = event.user_id else {
        return Frame::Ignored;
    };

    Frame::Request(RequestEvent {
        platform: PLATFORM.to_string(),
        kind,
        flag: event.flag.clone(),
        user_id: format_user_id(user_id),
        group_id: event.group_id.map(format_group_id),
        comment: event.comment.clone(),
        time: event.time,
    })
}

// =============================================================================
// Segments
// =============================================================================

/// Parses the wire `message` array into normalized segments.
///
/// A missing or non-array `message` (CQ-code string mode) falls back to the
/// raw message as a single text segment.
fn parse_segments(message: Option<&Value>, raw_message: &str) -> Vec<Segment> {
    let Some(Value::Array(items)) = message else {
        if raw_message.is_empty() {
            return Vec::new();
        }
        return vec![Segment::text(raw_message)];
    };

    items
        .iter()
        .filter_map(|item| {
            let data = item.get("data")?;
            match item.get("type")?.as_str()? {
                "text" => Some(Segment::text(data.get("text")?.as_str()?)),
                "at" => {
                    let target = data.get("qq")?;
                    let target = match target {
                        Value::Number(n) => format_user_id(n.as_i64()?),
                        Value::String(s) => match s.parse::<i64>() {
                            Ok(id) => format_user_id(id),
                            // `@all` stays symbolic.
                            Err(_) => format!("{PLATFORM}:{s}"),
                        },
                        _ => return None,
                    };
                    Some(Segment::At { target })
                }
                "image" => {
                    let file = data
                        .get("url")
                        .or_else(|| data.get("file"))?
                        .as_str()?;
                    Some(Segment::Image { file: file.into() })
                }
                "reply" => {
                    let id = data.get("id")?;
                    let message_id = match id {
                        Value::Number(n) => n.to_string(),
                        Value::String(s) => s.clone(),
                        _ => return None,
                    };
                    Some(Segment::Reply { message_id })
                }
                _ => None,
            }
        })
        .collect()
}

fn plain_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .filter_map(|segment| match segment {
            Segment::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// Builds the wire `message` array for an outgoing text message.
pub fn text_payload(text: &str) -> Value {
    serde_json::json!([{"type": "text", "data": {"text": text}}])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_round_trip() {
        assert_eq!(format_user_id(10001), "QQ:10001");
        assert_eq!(format_group_id(20002), "QQ-Group:20002");
        assert_eq!(extract_id("QQ:10001").unwrap(), 10001);
        assert_eq!(extract_id("QQ-Group:20002").unwrap(), 20002);
        assert_eq!(extract_id("10001").unwrap(), 10001);
        assert!(extract_id("QQ:not-a-number").is_err());
    }

    #[test]
    fn group_message_translates() {
        let frame = to_frame(&json!({
            "post_type": "message",
            "message_type": "group",
            "message_id": 991,
            "group_id": 20002,
            "user_id": 10001,
            "time": 1700000000,
            "sender": {"user_id": 10001, "nickname": "Roller", "card": "GM", "role": "admin"},
            "message": [
                {"type": "at", "data": {"qq": "10002"}},
                {"type": "text", "data": {"text": " .r 1d20"}}
            ],
            "raw_message": "[CQ:at,qq=10002] .r 1d20"
        }))
        .unwrap();

        let Frame::Message(message) = frame else {
            panic!("expected a message frame");
        };
        assert!(message.is_group());
        assert_eq!(message.group_id.as_deref(), Some("QQ-Group:20002"));
        assert_eq!(message.sender.user_id, "QQ:10001");
        // The group card wins over the nickname.
        assert_eq!(message.sender.nickname, "GM");
        assert_eq!(message.sender.role, SenderRole::Admin);
        assert_eq!(message.content, " .r 1d20");
        assert_eq!(
            message.segments[0],
            Segment::At {
                target: "QQ:10002".into()
            }
        );
    }

    #[test]
    fn private_message_falls_back_to_raw_text() {
        let frame = to_frame(&json!({
            "post_type": "message",
            "message_type": "private",
            "message_id": 992,
            "user_id": 10001,
            "time": 1700000000,
            "sender": {"user_id": 10001, "nickname": "Roller"},
            "raw_message": ".coc7"
        }))
        .unwrap();

        let Frame::Message(message) = frame else {
            panic!("expected a message frame");
        };
        assert!(!message.is_group());
        assert_eq!(message.group_id, None);
        assert_eq!(message.content, ".coc7");
        assert_eq!(message.segments, vec![Segment::text(".coc7")]);
    }

    #[test]
    fn recall_notice_translates() {
        let frame = to_frame(&json!({
            "post_type": "notice",
            "notice_type": "group_recall",
            "group_id": 20002,
            "user_id": 10001,
            "operator_id": 10003,
            "message_id": 991,
            "time": 1700000000
        }))
        .unwrap();

        let Frame::Notice(notice) = frame else {
            panic!("expected a notice frame");
        };
        assert_eq!(notice.kind, NoticeKind::GroupRecall);
        assert_eq!(notice.operator_id.as_deref(), Some("QQ:10003"));
        assert_eq!(notice.message_id, Some(json!(991)));
    }

    #[test]
    fn group_invite_translates() {
        let frame = to_frame(&json!({
            "post_type": "request",
            "request_type": "group",
            "sub_type": "invite",
            "flag": "flag-123",
            "group_id": 20002,
            "user_id": 10001,
            "comment": "come roll with us",
            "time": 1700000000
        }))
        .unwrap();

        let Frame::Request(request) = frame else {
            panic!("expected a request frame");
        };
        assert_eq!(request.kind, RequestKind::GroupInvite);
        assert_eq!(request.flag, "flag-123");
        assert_eq!(request.comment, "come roll with us");
    }

    #[test]
    fn meta_frames_never_surface_content() {
        let heartbeat = to_frame(&json!({
            "post_type": "meta_event",
            "meta_event_type": "heartbeat",
            "time": 1700000000
        }))
        .unwrap();
        assert!(matches!(heartbeat, Frame::Meta(MetaFrame::Heartbeat)));

        let lifecycle = to_frame(&json!({
            "post_type": "meta_event",
            "meta_event_type": "lifecycle",
            "sub_type": "connect"
        }))
        .unwrap();
        assert!(matches!(
            lifecycle,
            Frame::Meta(MetaFrame::Lifecycle { sub_type }) if sub_type == "connect"
        ));
    }

    #[test]
    fn unknown_shapes_are_ignored_not_errors() {
        assert!(matches!(
            to_frame(&json!({"post_type": "unknown_future_type"})).unwrap(),
            Frame::Ignored
        ));
        assert!(matches!(
            to_frame(&json!({"post_type": "notice", "notice_type": "essence"})).unwrap(),
            Frame::Ignored
        ));
    }
}
