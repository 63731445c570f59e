//! Lifecycle of the single shared server connection
//!
//! [`ConnectionManager`] is a plain state machine: every input returns the
//! list of [`ConnectionAction`]s the hub has to carry out (open or close the
//! transport, arm or cancel the reconnect timer, emit `status` events). It
//! never touches sockets or timers itself.
//!
//! Each opened transport is tagged with a generation number. Connect and
//! disconnect both bump the generation, so events from a transport that has
//! been replaced or closed on purpose are recognised as stale and ignored.

use crate::error::RealtimeError;
use crate::models::UserId;
use crate::websocket::message_types::Envelope;
use resilience::RetryConfig;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    ReconnectWaiting,
    /// Retry budget exhausted or the server refused us for good; only a
    /// fresh connect leaves this state
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Automatic reconnect attempts since the last successful open
    pub attempt: u32,
    pub user_id: Option<UserId>,
    pub manually_disconnected: bool,
}

/// Side effect requested by the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionAction {
    /// Open a transport to `url`; its events must be tagged with `generation`
    Open { generation: u64, url: String },
    /// Close the current transport
    Close,
    /// Arm the reconnect timer; report back with `generation` when it fires
    ScheduleReconnect { generation: u64, delay: Duration },
    CancelReconnect,
    /// Broadcast an event to every subscriber
    Emit(Envelope),
}

pub struct ConnectionManager {
    base_url: String,
    policy: RetryConfig,
    state: ConnectionState,
    generation: u64,
    reconnect_pending: bool,
    /// Why the last open failed permanently, if it did
    rejection: Option<String>,
}

impl ConnectionManager {
    pub fn new(base_url: impl Into<String>, policy: RetryConfig) -> Self {
        Self {
            base_url: base_url.into(),
            policy,
            state: ConnectionState {
                status: ConnectionStatus::Disconnected,
                attempt: 0,
                user_id: None,
                manually_disconnected: false,
            },
            generation: 0,
            reconnect_pending: false,
            rejection: None,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    pub fn is_connected(&self) -> bool {
        self.state.status == ConnectionStatus::Connected
    }

    /// Whether `generation` belongs to the transport currently in use
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    /// User to connect lazily when the first subscriber attaches
    pub fn lazy_connect_target(&self) -> Option<UserId> {
        match self.state.status {
            ConnectionStatus::Disconnected if !self.state.manually_disconnected => {
                self.state.user_id
            }
            _ => None,
        }
    }

    /// Record the user without connecting, so the first subscriber can
    /// trigger the connection lazily
    pub fn remember_user(&mut self, user_id: UserId) {
        if self.state.user_id.is_none() {
            self.state.user_id = Some(user_id);
        }
    }

    /// Server endpoint for `user_id`
    pub fn endpoint(&self, user_id: UserId) -> String {
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}userId={}",
            self.base_url,
            separator,
            urlencoding::encode(&user_id.to_string())
        )
    }

    /// Connect as `user_id`.
    ///
    /// A no-op while already connected or connecting as the same user.
    pub fn connect(&mut self, user_id: UserId) -> Vec<ConnectionAction> {
        let live = matches!(
            self.state.status,
            ConnectionStatus::Connected | ConnectionStatus::Connecting
        );

        if live && self.state.user_id == Some(user_id) {
            tracing::debug!(user_id = %user_id, "connect ignored, already connected");
            return Vec::new();
        }

        let mut actions = Vec::new();
        if live {
            tracing::info!(
                previous = ?self.state.user_id,
                user_id = %user_id,
                "switching connection to another user"
            );
            actions.push(ConnectionAction::Close);
        }
        if self.reconnect_pending {
            self.reconnect_pending = false;
            actions.push(ConnectionAction::CancelReconnect);
        }

        self.state.manually_disconnected = false;
        self.state.attempt = 0;
        self.state.user_id = Some(user_id);
        self.open(&mut actions, user_id);
        actions
    }

    pub fn on_opened(&mut self, generation: u64) -> Vec<ConnectionAction> {
        if !self.is_current(generation) || self.state.status != ConnectionStatus::Connecting {
            return Vec::new();
        }

        self.state.status = ConnectionStatus::Connected;
        self.state.attempt = 0;
        tracing::info!(user_id = ?self.state.user_id, generation, "connected");
        vec![ConnectionAction::Emit(self.status_event())]
    }

    /// A transport that never opened is handled like one that closed
    pub fn on_open_failed(&mut self, generation: u64, error: &RealtimeError) -> Vec<ConnectionAction> {
        let mut actions = self.on_transport_error(generation, &error.to_string());
        actions.extend(self.on_transport_closed(generation));
        actions
    }

    /// An open that will fail the same way every time; no retry is scheduled
    pub fn on_open_rejected(&mut self, generation: u64, error: &RealtimeError) -> Vec<ConnectionAction> {
        if !self.is_current(generation) || self.state.status != ConnectionStatus::Connecting {
            return Vec::new();
        }

        tracing::error!(generation, error = %error, "transport open rejected, not retrying");
        self.state.status = ConnectionStatus::Failed;
        self.rejection = Some(error.to_string());
        vec![ConnectionAction::Emit(self.status_event())]
    }

    /// Non-fatal: reported as a `status`; the close that follows drives recovery
    pub fn on_transport_error(&mut self, generation: u64, message: &str) -> Vec<ConnectionAction> {
        if !self.is_current(generation) {
            return Vec::new();
        }

        tracing::warn!(generation, error = message, "transport error");
        vec![ConnectionAction::Emit(Envelope::status(
            false,
            format!("connection error: {message}"),
        ))]
    }

    pub fn on_transport_closed(&mut self, generation: u64) -> Vec<ConnectionAction> {
        if !self.is_current(generation) {
            tracing::trace!(generation, "stale close ignored");
            return Vec::new();
        }
        if !matches!(
            self.state.status,
            ConnectionStatus::Connected | ConnectionStatus::Connecting
        ) {
            return Vec::new();
        }

        self.state.status = ConnectionStatus::Disconnected;
        let mut actions = vec![ConnectionAction::Emit(self.status_event())];

        if self.state.manually_disconnected || self.reconnect_pending {
            return actions;
        }

        if self.policy.is_exhausted(self.state.attempt) {
            self.state.status = ConnectionStatus::Failed;
            tracing::error!(attempts = self.state.attempt, "giving up on reconnecting");
            actions.push(ConnectionAction::Emit(self.status_event()));
            return actions;
        }

        self.state.attempt += 1;
        self.state.status = ConnectionStatus::ReconnectWaiting;
        self.reconnect_pending = true;

        let delay = self.policy.delay_for(self.state.attempt);
        tracing::info!(
            attempt = self.state.attempt,
            max_attempts = self.policy.max_retries,
            ?delay,
            "scheduling reconnect"
        );
        actions.push(ConnectionAction::ScheduleReconnect {
            generation: self.generation,
            delay,
        });
        actions.push(ConnectionAction::Emit(self.status_event()));
        actions
    }

    pub fn on_reconnect_due(&mut self, generation: u64) -> Vec<ConnectionAction> {
        if !self.is_current(generation) {
            return Vec::new();
        }
        self.reconnect_pending = false;

        if self.state.manually_disconnected || self.state.status != ConnectionStatus::ReconnectWaiting {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if let Some(user_id) = self.state.user_id {
            self.open(&mut actions, user_id);
        }
        actions
    }

    /// Manual disconnect; suppresses automatic reconnection until the next connect
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if self.reconnect_pending {
            self.reconnect_pending = false;
            actions.push(ConnectionAction::CancelReconnect);
        }
        if matches!(
            self.state.status,
            ConnectionStatus::Connected | ConnectionStatus::Connecting
        ) {
            actions.push(ConnectionAction::Close);
        }

        self.generation += 1;
        self.state.manually_disconnected = true;
        self.state.attempt = 0;
        self.state.status = ConnectionStatus::Disconnected;
        tracing::info!(user_id = ?self.state.user_id, "manually disconnected");

        actions.push(ConnectionAction::Emit(self.status_event()));
        actions
    }

    /// Current state as a `status` event
    pub fn status_event(&self) -> Envelope {
        match self.state.status {
            ConnectionStatus::Connected => Envelope::status(true, "connected"),
            ConnectionStatus::Connecting => Envelope::status(false, "connecting"),
            ConnectionStatus::Disconnected => Envelope::status(false, "disconnected"),
            ConnectionStatus::ReconnectWaiting => Envelope::status(
                false,
                format!(
                    "reconnecting (attempt {}/{})",
                    self.state.attempt, self.policy.max_retries
                ),
            ),
            ConnectionStatus::Failed => match &self.rejection {
                Some(reason) => Envelope::status(false, format!("connection rejected: {reason}")),
                None => Envelope::status(
                    false,
                    RealtimeError::ReconnectExhausted {
                        attempts: self.state.attempt,
                    }
                    .to_string(),
                ),
            },
        }
    }

    fn open(&mut self, actions: &mut Vec<ConnectionAction>, user_id: UserId) {
        self.generation += 1;
        self.rejection = None;
        self.state.status = ConnectionStatus::Connecting;
        tracing::debug!(user_id = %user_id, generation = self.generation, "opening transport");

        actions.push(ConnectionAction::Emit(self.status_event()));
        actions.push(ConnectionAction::Open {
            generation: self.generation,
            url: self.endpoint(user_id),
        });
    }
}
