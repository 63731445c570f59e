//! Per-conversation message store
//!
//! Merges optimistic local entries (added once a send is acknowledged) with
//! the server's echoes of the same messages. A record is a duplicate of
//! another when sender, addressee and content match and both fall in the
//! same one-second bucket; a confirmed echo of a local entry promotes that
//! entry instead of adding a second copy.

use crate::models::{ConversationKey, MessageRecord, UserId};
use crate::websocket::message_types::Envelope;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// An unconfirmed local entry was promoted
    Confirmed,
    Duplicate,
}

#[derive(Debug)]
pub struct MessageCache {
    own_id: UserId,
    conversations: HashMap<ConversationKey, Vec<MessageRecord>>,
    unread: HashMap<ConversationKey, u32>,
    /// Conversations currently on screen; they never accumulate unread
    open: HashSet<ConversationKey>,
}

impl MessageCache {
    pub fn new(own_id: UserId) -> Self {
        Self {
            own_id,
            conversations: HashMap::new(),
            unread: HashMap::new(),
            open: HashSet::new(),
        }
    }

    /// Record a message this user sent; the server echo will confirm it
    pub fn insert_local(&mut self, mut record: MessageRecord) -> InsertOutcome {
        record.confirmed = false;
        let key = record.conversation_key();
        let records = self.conversations.entry(key).or_default();

        if records.iter().any(|r| r.is_duplicate_of(&record)) {
            return InsertOutcome::Duplicate;
        }
        insert_ordered(records, record);
        InsertOutcome::Inserted
    }

    /// Record a message delivered by the server
    pub fn insert_confirmed(&mut self, mut record: MessageRecord) -> InsertOutcome {
        record.confirmed = true;
        let key = record.conversation_key();
        let records = self.conversations.entry(key).or_default();

        if let Some(existing) = records.iter_mut().find(|r| r.is_duplicate_of(&record)) {
            if existing.confirmed {
                tracing::debug!(conversation = %key, "duplicate message dropped");
                return InsertOutcome::Duplicate;
            }
            existing.confirmed = true;
            return InsertOutcome::Confirmed;
        }

        let from_other = record.from != self.own_id;
        insert_ordered(records, record);

        if from_other && !self.open.contains(&key) {
            *self.unread.entry(key).or_insert(0) += 1;
        }
        InsertOutcome::Inserted
    }

    /// Feed an event received from the hub.
    ///
    /// Chat messages are server-confirmed; `message_sent` acknowledgements
    /// carry this user's own sends. Anything else is ignored.
    pub fn apply(&mut self, event: &Envelope) -> Option<InsertOutcome> {
        match event {
            Envelope::PrivateMessage(_) | Envelope::GroupMessage(_) => {
                event.to_record(true).map(|r| self.insert_confirmed(r))
            }
            Envelope::MessageSent { message } => {
                message.to_record(false).map(|r| self.insert_local(r))
            }
            _ => None,
        }
    }

    /// Messages of `key` in timestamp order
    pub fn messages(&self, key: &ConversationKey) -> &[MessageRecord] {
        self.conversations
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn unread(&self, key: &ConversationKey) -> u32 {
        self.unread.get(key).copied().unwrap_or(0)
    }

    pub fn total_unread(&self) -> u32 {
        self.unread.values().sum()
    }

    pub fn mark_read(&mut self, key: &ConversationKey) {
        self.unread.remove(key);
    }

    /// Conversation shown to the user: read now, and stays read while open
    pub fn open(&mut self, key: ConversationKey) {
        self.mark_read(&key);
        self.open.insert(key);
    }

    pub fn close(&mut self, key: &ConversationKey) {
        self.open.remove(key);
    }

    pub fn conversations(&self) -> impl Iterator<Item = &ConversationKey> {
        self.conversations.keys()
    }
}

fn insert_ordered(records: &mut Vec<MessageRecord>, record: MessageRecord) {
    let at = records.partition_point(|r| r.timestamp <= record.timestamp);
    records.insert(at, record);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupId, MessageTarget};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn record(from: u64, to: u64, content: &str, millis: i64) -> MessageRecord {
        MessageRecord {
            from: UserId(from),
            target: MessageTarget::User(UserId(to)),
            content: content.to_string(),
            timestamp: at(millis),
            confirmed: false,
        }
    }

    #[test]
    fn test_echo_promotes_local_entry() {
        let mut cache = MessageCache::new(UserId(1));
        let key = ConversationKey::direct(UserId(1), UserId(2));

        assert_eq!(cache.insert_local(record(1, 2, "hi", 5_000)), InsertOutcome::Inserted);
        assert_eq!(cache.insert_confirmed(record(1, 2, "hi", 5_400)), InsertOutcome::Confirmed);

        let messages = cache.messages(&key);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].confirmed);
        assert_eq!(cache.unread(&key), 0);
    }

    #[test]
    fn test_repeated_echo_is_duplicate() {
        let mut cache = MessageCache::new(UserId(1));

        assert_eq!(cache.insert_confirmed(record(2, 1, "yo", 1_000)), InsertOutcome::Inserted);
        assert_eq!(cache.insert_confirmed(record(2, 1, "yo", 1_100)), InsertOutcome::Duplicate);
        assert_eq!(
            cache.messages(&ConversationKey::direct(UserId(1), UserId(2))).len(),
            1
        );
    }

    #[test]
    fn test_same_text_in_different_seconds_is_kept() {
        let mut cache = MessageCache::new(UserId(1));

        cache.insert_confirmed(record(2, 1, "ok", 1_000));
        cache.insert_confirmed(record(2, 1, "ok", 2_000));
        assert_eq!(
            cache.messages(&ConversationKey::direct(UserId(1), UserId(2))).len(),
            2
        );
    }

    #[test]
    fn test_records_stay_ordered_by_timestamp() {
        let mut cache = MessageCache::new(UserId(1));
        let key = ConversationKey::direct(UserId(1), UserId(2));

        cache.insert_confirmed(record(2, 1, "third", 30_000));
        cache.insert_confirmed(record(2, 1, "first", 10_000));
        cache.insert_local(record(1, 2, "second", 20_000));

        let contents: Vec<_> = cache.messages(&key).iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unread_counts_only_other_authors() {
        let mut cache = MessageCache::new(UserId(1));
        let key = ConversationKey::direct(UserId(1), UserId(2));

        cache.insert_confirmed(record(2, 1, "a", 1_000));
        cache.insert_confirmed(record(2, 1, "b", 2_000));
        cache.insert_confirmed(record(1, 2, "c", 3_000));
        assert_eq!(cache.unread(&key), 2);
        assert_eq!(cache.total_unread(), 2);

        cache.mark_read(&key);
        assert_eq!(cache.unread(&key), 0);
    }

    #[test]
    fn test_open_conversation_does_not_accumulate_unread() {
        let mut cache = MessageCache::new(UserId(1));
        let key = ConversationKey::direct(UserId(1), UserId(2));

        cache.insert_confirmed(record(2, 1, "a", 1_000));
        cache.open(key);
        assert_eq!(cache.unread(&key), 0);

        cache.insert_confirmed(record(2, 1, "b", 2_000));
        assert_eq!(cache.unread(&key), 0);

        cache.close(&key);
        cache.insert_confirmed(record(2, 1, "c", 3_000));
        assert_eq!(cache.unread(&key), 1);
    }

    #[test]
    fn test_apply_send_ack_then_echo() {
        let mut cache = MessageCache::new(UserId(1));
        let sent = Envelope::private_message(UserId(1), UserId(2), "hello");

        let ack = Envelope::MessageSent {
            message: Box::new(sent.clone()),
        };
        assert_eq!(cache.apply(&ack), Some(InsertOutcome::Inserted));
        assert_eq!(cache.apply(&sent), Some(InsertOutcome::Confirmed));
        assert_eq!(cache.apply(&Envelope::Pong), None);

        let key = ConversationKey::direct(UserId(2), UserId(1));
        assert_eq!(cache.messages(&key).len(), 1);
    }

    #[test]
    fn test_group_messages_keyed_by_group() {
        let mut cache = MessageCache::new(UserId(1));
        cache.apply(&Envelope::group_message(UserId(7), GroupId(42), "hello"));

        assert_eq!(cache.messages(&ConversationKey::group(GroupId(42))).len(), 1);
        assert!(cache.messages(&ConversationKey::group(GroupId(99))).is_empty());
        assert_eq!(cache.unread(&ConversationKey::group(GroupId(42))), 1);
    }
}
