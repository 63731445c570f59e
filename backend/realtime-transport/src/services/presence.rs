use crate::models::{GroupId, NotificationKind, UserId};
use crate::websocket::message_types::Envelope;
use std::collections::{BTreeSet, HashMap};

/// Members announced online, per group
#[derive(Debug, Default)]
pub struct PresenceTracker {
    online: HashMap<GroupId, BTreeSet<UserId>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a `user_online` notification; returns true if it was new
    pub fn observe(&mut self, event: &Envelope) -> bool {
        match event {
            Envelope::Notification(n) if n.subkind == NotificationKind::UserOnline => {
                match n.group_id {
                    Some(group_id) => self.mark_online(group_id, n.from),
                    None => false,
                }
            }
            _ => false,
        }
    }

    pub fn mark_online(&mut self, group_id: GroupId, user_id: UserId) -> bool {
        self.online.entry(group_id).or_default().insert(user_id)
    }

    pub fn is_online(&self, group_id: GroupId, user_id: UserId) -> bool {
        self.online
            .get(&group_id)
            .map(|members| members.contains(&user_id))
            .unwrap_or(false)
    }

    pub fn online_in(&self, group_id: GroupId) -> Vec<UserId> {
        self.online
            .get(&group_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Forget everything, e.g. after the connection dropped
    pub fn clear(&mut self) {
        self.online.clear();
    }
}
