//! Throttled, serialized outbound sends
//!
//! At most one envelope goes on the wire per throttle window. Sends that
//! arrive inside the window wait in a bounded FIFO queue and go out one per
//! window as the hub's flush timer fires.

use crate::error::RealtimeError;
use crate::websocket::message_types::{encode, Envelope};
use crate::websocket::SubscriberId;
use resilience::Throttle;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundAction {
    /// Write `frame` to the transport, then acknowledge `envelope` to `origin`
    Transmit {
        origin: SubscriberId,
        frame: String,
        envelope: Envelope,
    },
    /// Report `error` to `origin` only
    Reject {
        origin: SubscriberId,
        error: RealtimeError,
    },
    /// Arm the flush timer
    ScheduleFlush(Duration),
}

#[derive(Debug)]
struct QueuedSend {
    origin: SubscriberId,
    envelope: Envelope,
}

#[derive(Debug)]
pub struct OutboundGate {
    throttle: Throttle,
    queue: VecDeque<QueuedSend>,
    limit: usize,
}

impl OutboundGate {
    pub fn new(window: Duration, limit: usize) -> Self {
        Self {
            throttle: Throttle::new(window),
            queue: VecDeque::new(),
            limit,
        }
    }

    /// Number of deferred sends
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn submit(
        &mut self,
        origin: SubscriberId,
        envelope: Envelope,
        connected: bool,
        now: Instant,
    ) -> Vec<OutboundAction> {
        if !envelope.is_sendable() {
            return vec![OutboundAction::Reject {
                origin,
                error: RealtimeError::Unsendable(envelope.type_name()),
            }];
        }
        if !connected {
            return vec![OutboundAction::Reject {
                origin,
                error: RealtimeError::NotConnected,
            }];
        }

        // Anything already waiting goes first; a flush is armed for it
        if !self.queue.is_empty() {
            return self.enqueue(origin, envelope).into_iter().collect();
        }

        match self.throttle.try_acquire_at(now) {
            Ok(()) => vec![Self::transmit(origin, envelope)],
            Err(remaining) => {
                let mut actions: Vec<_> = self.enqueue(origin, envelope).into_iter().collect();
                if actions.is_empty() {
                    actions.push(OutboundAction::ScheduleFlush(remaining));
                }
                actions
            }
        }
    }

    /// Transmit the head of the queue if its slot has come
    pub fn flush(&mut self, connected: bool, now: Instant) -> Vec<OutboundAction> {
        if !connected {
            return self.fail_pending();
        }
        if self.queue.is_empty() {
            return Vec::new();
        }

        match self.throttle.try_acquire_at(now) {
            Ok(()) => {
                let mut actions = Vec::with_capacity(2);
                if let Some(next) = self.queue.pop_front() {
                    actions.push(Self::transmit(next.origin, next.envelope));
                }
                if !self.queue.is_empty() {
                    actions.push(OutboundAction::ScheduleFlush(self.throttle.window()));
                }
                actions
            }
            Err(remaining) => vec![OutboundAction::ScheduleFlush(remaining)],
        }
    }

    /// Fail every deferred send; used when the connection goes away
    pub fn fail_pending(&mut self) -> Vec<OutboundAction> {
        if !self.queue.is_empty() {
            tracing::warn!(pending = self.queue.len(), "dropping queued sends, connection lost");
        }
        self.queue
            .drain(..)
            .map(|queued| OutboundAction::Reject {
                origin: queued.origin,
                error: RealtimeError::NotConnected,
            })
            .collect()
    }

    fn enqueue(&mut self, origin: SubscriberId, envelope: Envelope) -> Option<OutboundAction> {
        if self.queue.len() >= self.limit {
            tracing::warn!(limit = self.limit, "outbound queue full, send rejected");
            return Some(OutboundAction::Reject {
                origin,
                error: RealtimeError::Throttled { limit: self.limit },
            });
        }

        tracing::debug!(
            subscriber = %origin,
            pending = self.queue.len() + 1,
            "send deferred by throttle"
        );
        self.queue.push_back(QueuedSend { origin, envelope });
        None
    }

    fn transmit(origin: SubscriberId, envelope: Envelope) -> OutboundAction {
        match encode(&envelope) {
            Ok(frame) => OutboundAction::Transmit {
                origin,
                frame,
                envelope,
            },
            Err(error) => OutboundAction::Reject { origin, error },
        }
    }
}
