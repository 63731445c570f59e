use super::{GroupId, UserId};
use chrono::{DateTime, Utc};
use std::fmt;

/// Identity of a conversation thread
///
/// Direct threads are keyed by the unordered pair of participants, so
/// `(1, 2)` and `(2, 1)` map to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    Direct(UserId, UserId),
    Group(GroupId),
}

impl ConversationKey {
    pub fn direct(a: UserId, b: UserId) -> Self {
        if a <= b {
            ConversationKey::Direct(a, b)
        } else {
            ConversationKey::Direct(b, a)
        }
    }

    pub fn group(group_id: GroupId) -> Self {
        ConversationKey::Group(group_id)
    }

    /// Whether `user_id` takes part in this thread (always false for groups)
    pub fn involves(&self, user_id: UserId) -> bool {
        match self {
            ConversationKey::Direct(a, b) => *a == user_id || *b == user_id,
            ConversationKey::Group(_) => false,
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationKey::Direct(a, b) => write!(f, "{a}-{b}"),
            ConversationKey::Group(g) => write!(f, "group-{g}"),
        }
    }
}

/// Addressee of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTarget {
    User(UserId),
    Group(GroupId),
}

/// A chat message as stored per conversation
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub from: UserId,
    pub target: MessageTarget,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// False for optimistic local entries not yet echoed by the server
    pub confirmed: bool,
}

impl MessageRecord {
    pub fn conversation_key(&self) -> ConversationKey {
        match self.target {
            MessageTarget::User(to) => ConversationKey::direct(self.from, to),
            MessageTarget::Group(group_id) => ConversationKey::group(group_id),
        }
    }

    /// Second-resolution bucket used for duplicate detection
    pub fn second_bucket(&self) -> i64 {
        self.timestamp.timestamp()
    }

    /// Same sender, addressee and content within the same second
    pub fn is_duplicate_of(&self, other: &MessageRecord) -> bool {
        self.from == other.from
            && self.target == other.target
            && self.content == other.content
            && self.second_bucket() == other.second_bucket()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(content: &str, millis: i64) -> MessageRecord {
        MessageRecord {
            from: UserId(1),
            target: MessageTarget::User(UserId(2)),
            content: content.to_string(),
            timestamp: Utc.timestamp_millis_opt(millis).unwrap(),
            confirmed: false,
        }
    }

    #[test]
    fn test_direct_key_is_unordered() {
        let a = ConversationKey::direct(UserId(2), UserId(1));
        let b = ConversationKey::direct(UserId(1), UserId(2));

        assert_eq!(a, b);
        assert_eq!(a.to_string(), "1-2");
    }

    #[test]
    fn test_group_key_display() {
        assert_eq!(ConversationKey::group(GroupId(42)).to_string(), "group-42");
    }

    #[test]
    fn test_involves() {
        let key = ConversationKey::direct(UserId(1), UserId(2));
        assert!(key.involves(UserId(1)));
        assert!(key.involves(UserId(2)));
        assert!(!key.involves(UserId(3)));
        assert!(!ConversationKey::group(GroupId(1)).involves(UserId(1)));
    }

    #[test]
    fn test_duplicate_within_same_second() {
        let a = record("hi", 10_000);
        let b = record("hi", 10_999);
        assert!(a.is_duplicate_of(&b));
    }

    #[test]
    fn test_not_duplicate_across_second_boundary() {
        let a = record("hi", 10_900);
        let b = record("hi", 11_100);
        assert!(!a.is_duplicate_of(&b));
    }

    #[test]
    fn test_not_duplicate_with_different_content() {
        let a = record("hi", 10_000);
        let b = record("hey", 10_000);
        assert!(!a.is_duplicate_of(&b));
    }

    #[test]
    fn test_record_key_for_group_target() {
        let mut r = record("hi", 0);
        r.target = MessageTarget::Group(GroupId(9));
        assert_eq!(r.conversation_key(), ConversationKey::Group(GroupId(9)));
    }
}
