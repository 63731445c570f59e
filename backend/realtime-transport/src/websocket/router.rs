//! Inbound classification and fan-out
//!
//! Every frame read from the server is decoded once and mapped to a
//! [`Route`]. Decoding and scoping failures become `error` events; nothing
//! raised here ever escapes to the hub loop.

use crate::error::RealtimeError;
use crate::models::ConversationKey;
use crate::websocket::message_types::{decode, Envelope};
use crate::websocket::{Delivery, SubscriberRegistry};

/// Where an inbound envelope goes
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Every subscriber
    Broadcast(Envelope),
    /// Subscribers whose scope contains the conversation
    Conversation(ConversationKey, Envelope),
    /// Undeliverable; reported to every subscriber as an `error` event
    Rejected(RealtimeError),
}

pub struct MessageRouter;

impl MessageRouter {
    /// Decode a raw frame and classify it
    pub fn route_frame(raw: &str) -> Route {
        match decode(raw) {
            Ok(envelope) => Self::classify(envelope, raw),
            Err(e) => Route::Rejected(e),
        }
    }

    /// Classify a decoded inbound envelope
    pub fn classify(envelope: Envelope, raw: &str) -> Route {
        match envelope {
            Envelope::Status { .. }
            | Envelope::Error { .. }
            | Envelope::MessageSent { .. }
            | Envelope::Pong
            | Envelope::Notification(_) => Route::Broadcast(envelope),

            Envelope::PrivateMessage(ref m) => {
                let key = ConversationKey::direct(m.from, m.to);
                Route::Conversation(key, envelope)
            }
            Envelope::GroupMessage(ref m) => {
                let key = ConversationKey::group(m.group_id);
                Route::Conversation(key, envelope)
            }

            Envelope::Init { .. } | Envelope::Send { .. } | Envelope::Disconnect | Envelope::Ping => {
                Route::Rejected(RealtimeError::Decode {
                    reason: format!("unexpected {} command from server", envelope.type_name()),
                    raw: raw.to_string(),
                })
            }
        }
    }

    /// Fan a route out through the registry
    pub fn dispatch(route: Route, registry: &mut SubscriberRegistry) -> Delivery {
        match route {
            Route::Broadcast(envelope) => registry.broadcast(envelope),
            Route::Conversation(key, envelope) => {
                let outcome = registry.deliver_to_conversation(key, envelope);
                if outcome.delivered == 0 {
                    tracing::debug!(conversation = %key, "no subscriber in scope for message");
                }
                outcome
            }
            Route::Rejected(err) => {
                tracing::warn!(error = %err, "inbound payload rejected");
                registry.broadcast(err.to_event())
            }
        }
    }
}
