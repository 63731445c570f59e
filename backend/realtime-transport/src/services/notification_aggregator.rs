use crate::models::{NotificationKind, NotificationRecord, UserId};
use crate::websocket::message_types::Envelope;

/// Deduplicated notification list with an unread counter
///
/// Newest first. Two notifications are the same when sender, message and
/// kind match; the counter always equals the number of unseen records.
#[derive(Debug, Default)]
pub struct NotificationAggregator {
    records: Vec<NotificationRecord>,
    unread: usize,
}

impl NotificationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a notification; returns false if an identical one is present
    pub fn ingest(&mut self, mut record: NotificationRecord) -> bool {
        if self.records.iter().any(|r| r.same_identity(&record)) {
            tracing::debug!(
                sender = %record.sender_id,
                kind = ?record.kind,
                "duplicate notification ignored"
            );
            return false;
        }

        record.seen = false;
        self.records.insert(0, record);
        self.unread += 1;
        true
    }

    /// Take a `notification` event from the hub. Presence is not a
    /// notification and is ignored here.
    pub fn ingest_event(&mut self, event: &Envelope) -> bool {
        match event {
            Envelope::Notification(n) if !n.subkind.is_presence() => self.ingest(n.to_record()),
            _ => false,
        }
    }

    /// Replace the list with a fetched history
    pub fn load(&mut self, history: impl IntoIterator<Item = NotificationRecord>) {
        self.records.clear();
        for record in history {
            if !self.records.iter().any(|r| r.same_identity(&record)) {
                self.records.push(record);
            }
        }
        self.unread = self.records.iter().filter(|r| !r.seen).count();
    }

    pub fn mark_all_seen(&mut self) {
        for record in &mut self.records {
            record.seen = true;
        }
        self.unread = 0;
    }

    /// Drop notifications of `kind` from `sender_id` (a request that was
    /// accepted, rejected or cancelled). Returns how many were removed.
    pub fn remove(&mut self, sender_id: UserId, kind: NotificationKind) -> usize {
        let before = self.records.len();
        let mut unseen_removed = 0;

        self.records.retain(|r| {
            let matched = r.sender_id == sender_id && r.kind == kind;
            if matched && !r.seen {
                unseen_removed += 1;
            }
            !matched
        });

        self.unread -= unseen_removed;
        before - self.records.len()
    }

    pub fn unread_count(&self) -> usize {
        self.unread
    }

    pub fn records(&self) -> &[NotificationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
