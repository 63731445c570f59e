use crate::error::{RealtimeError, RealtimeResult};
use crate::models::{
    deserialize_optional_timestamp, deserialize_timestamp, ConversationKey, GroupId,
    MessageRecord, MessageTarget, NotificationKind, NotificationRecord, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Direct message between two users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessage {
    pub from: UserId,
    pub to: UserId,
    pub content: String,
    #[serde(deserialize_with = "deserialize_timestamp", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Message posted to a group chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessage {
    pub from: UserId,
    pub group_id: GroupId,
    pub content: String,
    #[serde(deserialize_with = "deserialize_timestamp", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Server-pushed notification (follow requests, invitations, presence, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub subkind: NotificationKind,
    pub from: UserId,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

/// A single typed message unit exchanged with consumers and the server
///
/// Upper-case variants are commands issued by consumer contexts; the rest
/// are events. Every payload carries a `type` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    // ============================================================
    // Commands (consumer -> hub)
    // ============================================================
    #[serde(rename = "INIT", rename_all = "camelCase")]
    Init { user_id: UserId },

    #[serde(rename = "SEND")]
    Send { message: Box<Envelope> },

    #[serde(rename = "DISCONNECT")]
    Disconnect,

    #[serde(rename = "PING")]
    Ping,

    // ============================================================
    // Events (hub -> consumer)
    // ============================================================
    #[serde(rename = "PONG")]
    Pong,

    #[serde(rename = "status")]
    Status { connected: bool, message: String },

    #[serde(rename = "private_message")]
    PrivateMessage(PrivateMessage),

    #[serde(rename = "group_message")]
    GroupMessage(GroupMessage),

    #[serde(rename = "notification")]
    Notification(Notification),

    #[serde(rename = "error")]
    Error {
        message: String,
        /// Offending payload, when the error came from decoding
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },

    #[serde(rename = "message_sent")]
    MessageSent { message: Box<Envelope> },
}

const KNOWN_TYPES: &[&str] = &[
    "INIT",
    "SEND",
    "DISCONNECT",
    "PING",
    "PONG",
    "status",
    "private_message",
    "group_message",
    "notification",
    "error",
    "message_sent",
];

impl Envelope {
    pub fn status(connected: bool, message: impl Into<String>) -> Self {
        Envelope::Status {
            connected,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error {
            message: message.into(),
            raw: None,
        }
    }

    pub fn private_message(from: UserId, to: UserId, content: impl Into<String>) -> Self {
        Envelope::PrivateMessage(PrivateMessage {
            from,
            to,
            content: content.into(),
            timestamp: Utc::now(),
        })
    }

    pub fn group_message(from: UserId, group_id: GroupId, content: impl Into<String>) -> Self {
        Envelope::GroupMessage(GroupMessage {
            from,
            group_id,
            content: content.into(),
            timestamp: Utc::now(),
        })
    }

    /// Wire name of this envelope's `type`
    pub fn type_name(&self) -> &'static str {
        match self {
            Envelope::Init { .. } => "INIT",
            Envelope::Send { .. } => "SEND",
            Envelope::Disconnect => "DISCONNECT",
            Envelope::Ping => "PING",
            Envelope::Pong => "PONG",
            Envelope::Status { .. } => "status",
            Envelope::PrivateMessage(_) => "private_message",
            Envelope::GroupMessage(_) => "group_message",
            Envelope::Notification(_) => "notification",
            Envelope::Error { .. } => "error",
            Envelope::MessageSent { .. } => "message_sent",
        }
    }

    pub fn is_command(&self) -> bool {
        matches!(
            self,
            Envelope::Init { .. } | Envelope::Send { .. } | Envelope::Disconnect | Envelope::Ping
        )
    }

    /// Only chat messages and notifications may travel to the server
    pub fn is_sendable(&self) -> bool {
        matches!(
            self,
            Envelope::PrivateMessage(_) | Envelope::GroupMessage(_) | Envelope::Notification(_)
        )
    }

    /// Conversation a chat message belongs to
    pub fn conversation_key(&self) -> Option<ConversationKey> {
        match self {
            Envelope::PrivateMessage(m) => Some(ConversationKey::direct(m.from, m.to)),
            Envelope::GroupMessage(m) => Some(ConversationKey::group(m.group_id)),
            _ => None,
        }
    }

    /// Storage form of a chat message
    pub fn to_record(&self, confirmed: bool) -> Option<MessageRecord> {
        match self {
            Envelope::PrivateMessage(m) => Some(MessageRecord {
                from: m.from,
                target: MessageTarget::User(m.to),
                content: m.content.clone(),
                timestamp: m.timestamp,
                confirmed,
            }),
            Envelope::GroupMessage(m) => Some(MessageRecord {
                from: m.from,
                target: MessageTarget::Group(m.group_id),
                content: m.content.clone(),
                timestamp: m.timestamp,
                confirmed,
            }),
            _ => None,
        }
    }
}

impl Notification {
    pub fn to_record(&self) -> NotificationRecord {
        NotificationRecord {
            sender_id: self.from,
            kind: self.subkind,
            message: self.message.clone(),
            group_id: self.group_id,
            seen: false,
            created_at: self.created_at,
        }
    }
}

/// Serialize an envelope to its JSON wire form
pub fn encode(envelope: &Envelope) -> RealtimeResult<String> {
    serde_json::to_string(envelope).map_err(RealtimeError::from)
}

/// Decode a JSON wire payload.
///
/// Malformed JSON, a missing or unknown `type`, and bad field values yield
/// [`RealtimeError::Decode`] with the raw payload attached. Chat messages
/// whose routing fields are missing or invalid yield [`RealtimeError::Scope`].
pub fn decode(raw: &str) -> RealtimeResult<Envelope> {
    let decode_error = |reason: String| RealtimeError::Decode {
        reason,
        raw: raw.to_string(),
    };

    let value: Value = serde_json::from_str(raw).map_err(|e| decode_error(e.to_string()))?;

    let type_name = match value.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(_) => return Err(decode_error("`type` is not a string".to_string())),
        None => return Err(decode_error("missing `type` field".to_string())),
    };

    if !KNOWN_TYPES.contains(&type_name.as_str()) {
        return Err(decode_error(format!("unknown envelope type {type_name:?}")));
    }

    match type_name.as_str() {
        "private_message" => check_scope(&value, "private_message", &["from", "to"])?,
        "group_message" => check_scope(&value, "group_message", &["from", "groupId"])?,
        _ => {}
    }

    serde_json::from_value(value).map_err(|e| decode_error(e.to_string()))
}

fn check_scope(value: &Value, kind: &'static str, fields: &[&str]) -> RealtimeResult<()> {
    for field in fields {
        match value.get(*field) {
            None | Some(Value::Null) => {
                return Err(RealtimeError::Scope {
                    kind,
                    reason: format!("missing `{field}`"),
                })
            }
            Some(v) => match v.as_u64() {
                Some(id) if id > 0 => {}
                _ => {
                    return Err(RealtimeError::Scope {
                        kind,
                        reason: format!("invalid `{field}`: {v}"),
                    })
                }
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_decode_private_message() {
        let raw = r#"{"type":"private_message","from":1,"to":2,"content":"hi","timestamp":"2024-05-01T10:00:00Z"}"#;

        match decode(raw).unwrap() {
            Envelope::PrivateMessage(m) => {
                assert_eq!(m.from, UserId(1));
                assert_eq!(m.to, UserId(2));
                assert_eq!(m.content, "hi");
                assert_eq!(m.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
            }
            other => panic!("unexpected envelope {other:?}"),
        }
    }

    #[test]
    fn test_decode_group_message_uses_camel_case_group_id() {
        let raw = r#"{"type":"group_message","from":7,"groupId":42,"content":"hello","timestamp":1714557600000}"#;

        let envelope = decode(raw).unwrap();
        assert_eq!(
            envelope.conversation_key(),
            Some(ConversationKey::Group(GroupId(42)))
        );
    }

    #[test]
    fn test_decode_notification() {
        let raw = r#"{"type":"notification","subkind":"follow_request","from":3,"message":"alice wants to follow you"}"#;

        match decode(raw).unwrap() {
            Envelope::Notification(n) => {
                assert_eq!(n.subkind, NotificationKind::FollowRequest);
                assert_eq!(n.from, UserId(3));
                assert!(n.group_id.is_none());
                assert!(n.created_at.is_none());
            }
            other => panic!("unexpected envelope {other:?}"),
        }
    }

    #[test]
    fn test_decode_commands() {
        assert_eq!(
            decode(r#"{"type":"INIT","userId":7}"#).unwrap(),
            Envelope::Init { user_id: UserId(7) }
        );
        assert_eq!(decode(r#"{"type":"PING"}"#).unwrap(), Envelope::Ping);
        assert_eq!(decode(r#"{"type":"DISCONNECT"}"#).unwrap(), Envelope::Disconnect);

        let send = decode(
            r#"{"type":"SEND","message":{"type":"group_message","from":7,"groupId":42,"content":"x"}}"#,
        )
        .unwrap();
        assert!(matches!(send, Envelope::Send { ref message } if message.type_name() == "group_message"));
    }

    #[test]
    fn test_malformed_json_is_decode_error() {
        let err = decode("{not json").unwrap_err();
        assert!(matches!(err, RealtimeError::Decode { ref raw, .. } if raw == "{not json"));
    }

    #[test]
    fn test_missing_type_is_decode_error() {
        let err = decode(r#"{"content":"hi"}"#).unwrap_err();
        assert!(matches!(err, RealtimeError::Decode { ref reason, .. } if reason.contains("type")));
    }

    #[test]
    fn test_unknown_type_preserves_raw_payload() {
        let raw = r#"{"type":"typing","from":1}"#;
        match decode(raw).unwrap_err() {
            RealtimeError::Decode { reason, raw: kept } => {
                assert!(reason.contains("typing"));
                assert_eq!(kept, raw);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_private_message_without_recipient_is_scope_error() {
        let err = decode(r#"{"type":"private_message","from":1,"content":"hi"}"#).unwrap_err();
        assert!(matches!(
            err,
            RealtimeError::Scope { kind: "private_message", ref reason } if reason.contains("to")
        ));
    }

    #[test]
    fn test_group_message_with_zero_group_is_scope_error() {
        let err = decode(r#"{"type":"group_message","from":1,"groupId":0,"content":"hi"}"#)
            .unwrap_err();
        assert!(matches!(err, RealtimeError::Scope { kind: "group_message", .. }));
    }

    #[test]
    fn test_legacy_field_casing_is_scope_error() {
        let err = decode(r#"{"type":"group_message","from":1,"groupID":5,"content":"hi"}"#)
            .unwrap_err();
        assert!(matches!(err, RealtimeError::Scope { .. }));
    }

    #[test]
    fn test_bad_content_type_is_decode_error() {
        let err = decode(r#"{"type":"private_message","from":1,"to":2,"content":5}"#).unwrap_err();
        assert!(matches!(err, RealtimeError::Decode { .. }));
    }

    #[test]
    fn test_encode_uses_canonical_field_names() {
        let envelope = Envelope::GroupMessage(GroupMessage {
            from: UserId(7),
            group_id: GroupId(42),
            content: "hello".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        });

        let json: Value = serde_json::from_str(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(json["type"], "group_message");
        assert_eq!(json["groupId"], 42);
        assert_eq!(json["from"], 7);
        assert_eq!(json["content"], "hello");
        assert_eq!(json["timestamp"], "2024-05-01T10:00:00Z");
    }

    #[test]
    fn test_missing_timestamp_defaults_to_now() {
        let before = Utc::now();
        match decode(r#"{"type":"private_message","from":1,"to":2,"content":"hi"}"#).unwrap() {
            Envelope::PrivateMessage(m) => assert!(m.timestamp >= before),
            other => panic!("unexpected envelope {other:?}"),
        }
    }

    #[test]
    fn test_to_record() {
        let envelope = Envelope::private_message(UserId(2), UserId(1), "yo");
        let record = envelope.to_record(true).unwrap();

        assert_eq!(record.target, MessageTarget::User(UserId(1)));
        assert!(record.confirmed);
        assert_eq!(record.conversation_key().to_string(), "1-2");
        assert!(Envelope::Pong.to_record(true).is_none());
    }

    #[test]
    fn test_sendable_and_command_classification() {
        assert!(Envelope::private_message(UserId(1), UserId(2), "x").is_sendable());
        assert!(!Envelope::Ping.is_sendable());
        assert!(!Envelope::status(true, "ok").is_sendable());
        assert!(Envelope::Ping.is_command());
        assert!(!Envelope::Pong.is_command());
    }
}
