pub mod message_cache;
pub mod notification_aggregator;
pub mod presence;

pub use message_cache::{InsertOutcome, MessageCache};
pub use notification_aggregator::NotificationAggregator;
pub use presence::PresenceTracker;
