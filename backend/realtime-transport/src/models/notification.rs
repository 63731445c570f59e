use super::{GroupId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subkind of a `notification` envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    FollowRequest,
    FollowRequestResponse,
    FollowRequestCancelled,
    GroupJoinRequest,
    GroupInvitation,
    GroupEventCreated,
    /// Presence announcement for a member of a shared group
    UserOnline,
    /// Any subkind this client does not know about yet
    #[serde(other)]
    Other,
}

impl NotificationKind {
    /// Presence updates are not user-facing notifications
    pub fn is_presence(&self) -> bool {
        matches!(self, NotificationKind::UserOnline)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRecord {
    pub sender_id: UserId,
    pub kind: NotificationKind,
    pub message: String,
    pub group_id: Option<GroupId>,
    pub seen: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    pub fn new(sender_id: UserId, kind: NotificationKind, message: impl Into<String>) -> Self {
        Self {
            sender_id,
            kind,
            message: message.into(),
            group_id: None,
            seen: false,
            created_at: None,
        }
    }

    /// Dedup identity: (sender, message, kind)
    pub fn same_identity(&self, other: &NotificationRecord) -> bool {
        self.sender_id == other.sender_id && self.message == other.message && self.kind == other.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&NotificationKind::FollowRequestResponse).unwrap(),
            "\"follow_request_response\""
        );
        let kind: NotificationKind = serde_json::from_str("\"group_event_created\"").unwrap();
        assert_eq!(kind, NotificationKind::GroupEventCreated);
    }

    #[test]
    fn test_unknown_kind_maps_to_other() {
        let kind: NotificationKind = serde_json::from_str("\"post_liked\"").unwrap();
        assert_eq!(kind, NotificationKind::Other);
    }

    #[test]
    fn test_identity_ignores_seen_flag() {
        let a = NotificationRecord::new(UserId(3), NotificationKind::FollowRequest, "hello");
        let mut b = a.clone();
        b.seen = true;
        assert!(a.same_identity(&b));

        let c = NotificationRecord::new(UserId(3), NotificationKind::GroupInvitation, "hello");
        assert!(!a.same_identity(&c));
    }
}
