//! The realtime hub
//!
//! One task owns the connection state, the subscriber registry, the outbound
//! gate and both timers. Everything else talks to it through [`HubInput`]
//! messages: subscriber commands, transport events and timer firings are all
//! processed one at a time, in arrival order.

use crate::config::HubConfig;
use crate::error::{RealtimeError, RealtimeResult};
use crate::models::UserId;
use crate::websocket::connection::{ConnectionAction, ConnectionManager};
use crate::websocket::message_types::{decode, Envelope};
use crate::websocket::outbound::{OutboundAction, OutboundGate};
use crate::websocket::router::MessageRouter;
use crate::websocket::transport::{Connector, TransportEvent, TransportLink};
use crate::websocket::{EventReceiver, Scope, SubscriberId, SubscriberRegistry};
use resilience::ScheduledTask;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub(crate) enum HubInput {
    Attach {
        id: SubscriberId,
        scope: Scope,
        sender: mpsc::Sender<Arc<Envelope>>,
    },
    Detach(SubscriberId),
    SetScope {
        id: SubscriberId,
        scope: Scope,
    },
    Command {
        origin: SubscriberId,
        envelope: Envelope,
    },
    Opened {
        generation: u64,
        result: RealtimeResult<TransportLink>,
    },
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    ReconnectDue {
        generation: u64,
    },
    FlushOutbound,
    Shutdown,
}

type HubSender = mpsc::UnboundedSender<HubInput>;

/// The transport currently carrying traffic
struct ActiveLink {
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
    close: CancellationToken,
}

pub struct RealtimeHub {
    connector: Arc<dyn Connector>,
    tx: HubSender,
    registry: SubscriberRegistry,
    connection: ConnectionManager,
    gate: OutboundGate,
    reconnect_timer: ScheduledTask,
    flush_timer: ScheduledTask,
    link: Option<ActiveLink>,
}

impl RealtimeHub {
    /// Start the hub task; must be called inside a tokio runtime
    pub fn init(config: HubConfig, connector: Arc<dyn Connector>) -> HubHandle {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut connection = ConnectionManager::new(config.ws_url.clone(), config.retry_policy());
        if let Some(user_id) = config.user_id {
            connection.remember_user(user_id);
        }

        let hub = RealtimeHub {
            connector,
            tx: tx.clone(),
            registry: SubscriberRegistry::new(),
            connection,
            gate: OutboundGate::new(config.throttle_window, config.outbound_queue_limit),
            reconnect_timer: ScheduledTask::new("reconnect"),
            flush_timer: ScheduledTask::new("outbound-flush"),
            link: None,
        };

        tracing::info!(
            url = %config.ws_url,
            max_reconnect_attempts = config.max_reconnect_attempts,
            "realtime hub started"
        );

        let task = tokio::spawn(hub.run(rx));
        HubHandle {
            tx,
            buffer: config.subscriber_buffer,
            task: Some(task),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HubInput>) {
        while let Some(input) = rx.recv().await {
            if matches!(input, HubInput::Shutdown) {
                break;
            }
            self.handle(input);
        }
        self.teardown();
        tracing::info!("realtime hub stopped");
    }

    fn handle(&mut self, input: HubInput) {
        match input {
            HubInput::Attach { id, scope, sender } => self.attach(id, scope, sender),
            HubInput::Detach(id) => {
                self.registry.detach(id);
            }
            HubInput::SetScope { id, scope } => {
                if !self.registry.set_scope(id, scope) {
                    tracing::debug!(subscriber = %id, "scope change for unknown subscriber");
                }
            }
            HubInput::Command { origin, envelope } => self.command(origin, envelope),
            HubInput::Opened { generation, result } => self.opened(generation, result),
            HubInput::Transport { generation, event } => self.transport(generation, event),
            HubInput::ReconnectDue { generation } => {
                self.reconnect_timer.clear();
                let actions = self.connection.on_reconnect_due(generation);
                self.apply(actions);
            }
            HubInput::FlushOutbound => {
                self.flush_timer.clear();
                let actions = self.gate.flush(self.connection.is_connected(), Instant::now());
                self.apply_outbound(actions);
            }
            HubInput::Shutdown => {}
        }
    }

    fn attach(&mut self, id: SubscriberId, scope: Scope, sender: mpsc::Sender<Arc<Envelope>>) {
        let first = self.registry.attach(id, scope, sender);
        self.registry.deliver_to(id, self.connection.status_event());

        if first {
            if let Some(user_id) = self.connection.lazy_connect_target() {
                tracing::debug!(user_id = %user_id, "first subscriber attached, connecting");
                let actions = self.connection.connect(user_id);
                self.apply(actions);
            }
        }
    }

    fn command(&mut self, origin: SubscriberId, envelope: Envelope) {
        match envelope {
            Envelope::Init { user_id } => {
                let actions = self.connection.connect(user_id);
                self.apply(actions);
            }
            Envelope::Send { message } => {
                let actions = self.gate.submit(
                    origin,
                    *message,
                    self.connection.is_connected(),
                    Instant::now(),
                );
                self.apply_outbound(actions);
            }
            Envelope::Disconnect => {
                let actions = self.connection.disconnect();
                self.apply(actions);
                self.drop_pending_sends();
            }
            Envelope::Ping => {
                self.registry.deliver_to(origin, Envelope::Pong);
            }
            other => {
                let error = RealtimeError::Decode {
                    reason: format!("{} is not a command", other.type_name()),
                    raw: String::new(),
                };
                self.registry.deliver_to(origin, error.to_event());
            }
        }
    }

    fn opened(&mut self, generation: u64, result: RealtimeResult<TransportLink>) {
        match result {
            Ok(link) => {
                let actions = self.connection.on_opened(generation);
                if actions.is_empty() {
                    tracing::debug!(generation, "discarding stale transport");
                    link.close.cancel();
                    return;
                }
                self.install(generation, link);
                self.apply(actions);
            }
            Err(e) => {
                tracing::warn!(generation, kind = ?e.kind(), error = %e, "failed to open transport");
                let actions = if e.is_retryable() {
                    self.connection.on_open_failed(generation, &e)
                } else {
                    self.connection.on_open_rejected(generation, &e)
                };
                self.apply(actions);
            }
        }
    }

    fn transport(&mut self, generation: u64, event: TransportEvent) {
        if !self.connection.is_current(generation) {
            tracing::trace!(generation, "stale transport event ignored");
            return;
        }

        match event {
            TransportEvent::Frame(raw) => {
                let route = MessageRouter::route_frame(&raw);
                MessageRouter::dispatch(route, &mut self.registry);
            }
            TransportEvent::Error(message) => {
                let actions = self.connection.on_transport_error(generation, &message);
                self.apply(actions);
            }
            TransportEvent::Closed => self.transport_lost(generation),
        }
    }

    /// The transport of `generation` is gone, whoever noticed first
    fn transport_lost(&mut self, generation: u64) {
        if self.link.as_ref().map(|l| l.generation) == Some(generation) {
            if let Some(link) = self.link.take() {
                link.close.cancel();
            }
        }
        let actions = self.connection.on_transport_closed(generation);
        self.apply(actions);
        self.drop_pending_sends();
    }

    /// Keep the outbound half and forward inbound events into the hub loop
    fn install(&mut self, generation: u64, link: TransportLink) {
        let TransportLink {
            outbound,
            mut inbound,
            close,
        } = link;

        let tx = self.tx.clone();
        let stop = close.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    event = inbound.recv() => {
                        let event = event.unwrap_or(TransportEvent::Closed);
                        let closed = event == TransportEvent::Closed;
                        if tx.send(HubInput::Transport { generation, event }).is_err() || closed {
                            break;
                        }
                    }
                    _ = stop.cancelled() => {
                        // hub-initiated closes bump the generation, so this is stale for them
                        let _ = tx.send(HubInput::Transport {
                            generation,
                            event: TransportEvent::Closed,
                        });
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.link.replace(ActiveLink {
            generation,
            outbound,
            close,
        }) {
            previous.close.cancel();
        }
    }

    fn apply(&mut self, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::Open { generation, url } => {
                    let connector = self.connector.clone();
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        let result = connector.open(&url).await;
                        if let Err(HubInput::Opened { result: Ok(link), .. }) =
                            tx.send(HubInput::Opened { generation, result }).map_err(|e| e.0)
                        {
                            link.close.cancel();
                        }
                    });
                }
                ConnectionAction::Close => {
                    if let Some(link) = self.link.take() {
                        tracing::debug!(generation = link.generation, "closing transport");
                        link.close.cancel();
                    }
                }
                ConnectionAction::ScheduleReconnect { generation, delay } => {
                    let tx = self.tx.clone();
                    self.reconnect_timer.schedule(delay, async move {
                        let _ = tx.send(HubInput::ReconnectDue { generation });
                    });
                }
                ConnectionAction::CancelReconnect => {
                    self.reconnect_timer.cancel();
                }
                ConnectionAction::Emit(event) => {
                    self.registry.broadcast(event);
                }
            }
        }
    }

    fn apply_outbound(&mut self, actions: Vec<OutboundAction>) {
        for action in actions {
            match action {
                OutboundAction::Transmit {
                    origin,
                    frame,
                    envelope,
                } => {
                    let written = match &self.link {
                        Some(link) => Some((link.generation, link.outbound.send(frame).is_ok())),
                        None => None,
                    };

                    match written {
                        Some((_, true)) => {
                            let reply = Envelope::MessageSent {
                                message: Box::new(envelope),
                            };
                            self.registry.deliver_to(origin, reply);
                        }
                        Some((generation, false)) => {
                            tracing::warn!(generation, "transport writer gone, dropping link");
                            self.registry
                                .deliver_to(origin, RealtimeError::NotConnected.to_event());
                            self.transport_lost(generation);
                        }
                        None => {
                            self.registry
                                .deliver_to(origin, RealtimeError::NotConnected.to_event());
                        }
                    }
                }
                OutboundAction::Reject { origin, error } => {
                    tracing::debug!(subscriber = %origin, error = %error, "send rejected");
                    self.registry.deliver_to(origin, error.to_event());
                }
                OutboundAction::ScheduleFlush(delay) => {
                    let tx = self.tx.clone();
                    self.flush_timer.schedule(delay, async move {
                        let _ = tx.send(HubInput::FlushOutbound);
                    });
                }
            }
        }
    }

    fn drop_pending_sends(&mut self) {
        if self.connection.is_connected() {
            return;
        }
        self.flush_timer.cancel();
        let actions = self.gate.fail_pending();
        self.apply_outbound(actions);
    }

    fn teardown(&mut self) {
        self.reconnect_timer.cancel();
        self.flush_timer.cancel();
        if let Some(link) = self.link.take() {
            link.close.cancel();
        }
        let actions = self.gate.fail_pending();
        self.apply_outbound(actions);
        self.registry.broadcast(Envelope::status(false, "hub shut down"));
    }
}

/// Owner handle of a running hub
///
/// Dropping the handle stops the hub, which closes every subscription.
pub struct HubHandle {
    tx: HubSender,
    buffer: usize,
    task: Option<JoinHandle<()>>,
}

impl HubHandle {
    /// Attach a new consumer context
    pub fn attach(&self, scope: Scope) -> RealtimeResult<Subscription> {
        let id = SubscriberId::new();
        let (sender, events) = mpsc::channel(self.buffer);

        self.tx
            .send(HubInput::Attach { id, scope, sender })
            .map_err(|_| RealtimeError::HubClosed)?;

        Ok(Subscription {
            id,
            events,
            tx: self.tx.clone(),
        })
    }

    /// Stop the hub and wait for it to wind down
    pub async fn shutdown(mut self) {
        let _ = self.tx.send(HubInput::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "realtime hub task failed");
            }
        }
    }
}

impl Drop for HubHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.tx.send(HubInput::Shutdown);
        }
    }
}

/// One attached consumer context
///
/// Events arrive in transport order. Dropping the subscription detaches it.
pub struct Subscription {
    id: SubscriberId,
    events: EventReceiver,
    tx: HubSender,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event; `None` once the hub has stopped
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<Envelope>> {
        self.events.try_recv().ok()
    }

    /// Issue a command envelope (`INIT`, `SEND`, `DISCONNECT`, `PING`)
    pub fn command(&self, envelope: Envelope) -> RealtimeResult<()> {
        self.tx
            .send(HubInput::Command {
                origin: self.id,
                envelope,
            })
            .map_err(|_| RealtimeError::HubClosed)
    }

    /// Decode a JSON command and issue it
    pub fn command_json(&self, raw: &str) -> RealtimeResult<()> {
        let envelope = decode(raw)?;
        if !envelope.is_command() {
            return Err(RealtimeError::Decode {
                reason: format!("{} is not a command", envelope.type_name()),
                raw: raw.to_string(),
            });
        }
        self.command(envelope)
    }

    pub fn init(&self, user_id: UserId) -> RealtimeResult<()> {
        self.command(Envelope::Init { user_id })
    }

    pub fn send(&self, message: Envelope) -> RealtimeResult<()> {
        self.command(Envelope::Send {
            message: Box::new(message),
        })
    }

    pub fn disconnect(&self) -> RealtimeResult<()> {
        self.command(Envelope::Disconnect)
    }

    pub fn ping(&self) -> RealtimeResult<()> {
        self.command(Envelope::Ping)
    }

    pub fn set_scope(&self, scope: Scope) -> RealtimeResult<()> {
        self.tx
            .send(HubInput::SetScope { id: self.id, scope })
            .map_err(|_| RealtimeError::HubClosed)
    }

    pub fn detach(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.tx.send(HubInput::Detach(self.id));
    }
}
