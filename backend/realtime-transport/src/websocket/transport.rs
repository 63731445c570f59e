//! Transport abstraction between the hub and the wire
//!
//! The hub only ever sees a [`TransportLink`]: a text sink, a stream of
//! [`TransportEvent`]s and a close token. [`WsConnector`] provides links
//! backed by a real websocket; [`TransportLink::pair`] provides in-memory
//! links for tests and embedding.

use crate::error::{RealtimeError, RealtimeResult};
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

/// Something the transport reports back to the hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text frame
    Frame(String),
    /// Non-fatal failure; a `Closed` normally follows
    Error(String),
    Closed,
}

/// An open connection as seen by the hub
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
    pub close: CancellationToken,
}

/// Server side of an in-memory [`TransportLink`]
pub struct RemoteEnd {
    pub sent: mpsc::UnboundedReceiver<String>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub close: CancellationToken,
}

impl TransportLink {
    /// Linked in-memory pair
    pub fn pair() -> (TransportLink, RemoteEnd) {
        let (outbound, sent) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        let close = CancellationToken::new();

        (
            TransportLink {
                outbound,
                inbound,
                close: close.clone(),
            },
            RemoteEnd {
                sent,
                events,
                close,
            },
        )
    }
}

impl RemoteEnd {
    /// Deliver a raw frame to the client
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.events.send(TransportEvent::Frame(frame.into())).is_ok()
    }

    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.events.send(TransportEvent::Error(reason.into())).is_ok()
    }

    /// Drop the connection from the server side
    pub fn hang_up(&self) -> bool {
        self.events.send(TransportEvent::Closed).is_ok()
    }

    /// Whether the client closed this link
    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }
}

/// Opens transports for the hub
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &str) -> RealtimeResult<TransportLink>;
}

/// Websocket connector built on tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
    keepalive: Option<Duration>,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration, keepalive: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            keepalive,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> RealtimeResult<TransportLink> {
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                RealtimeError::Transport(format!(
                    "connect timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })??;

        tracing::debug!(url = %url, "websocket handshake complete");

        let (sink, stream) = ws_stream.split();
        Ok(TransportLink::spawn(sink, stream, self.keepalive))
    }
}

impl TransportLink {
    /// Drive a websocket sink and stream with a writer and a reader task.
    ///
    /// Whichever side fails first reports `Error` followed by `Closed` and
    /// cancels the close token, which stops the other side.
    pub fn spawn<S, R>(sink: S, stream: R, keepalive: Option<Duration>) -> TransportLink
    where
        S: Sink<Message, Error = WsError> + Send + 'static,
        R: Stream<Item = Result<Message, WsError>> + Send + 'static,
    {
        let (link, remote) = TransportLink::pair();
        let RemoteEnd {
            sent: mut outbound_rx,
            events,
            close,
        } = remote;

        // Writer: outbound frames, keepalive pings, close on cancel
        let writer_close = close.clone();
        let writer_events = events.clone();
        tokio::spawn(async move {
            let mut sink = Box::pin(sink);
            let mut ticker = keepalive.map(|period| {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                interval
            });
            if let Some(interval) = ticker.as_mut() {
                // the first tick completes immediately
                interval.tick().await;
            }

            loop {
                let result = tokio::select! {
                    _ = writer_close.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    frame = outbound_rx.recv() => {
                        let Some(frame) = frame else {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        };
                        sink.send(Message::text(frame)).await
                    }
                    _ = next_tick(&mut ticker) => {
                        sink.send(Message::Ping(Default::default())).await
                    }
                };

                if let Err(e) = result {
                    tracing::warn!(error = %e, "websocket write failed");
                    let _ = writer_events.send(TransportEvent::Error(e.to_string()));
                    let _ = writer_events.send(TransportEvent::Closed);
                    writer_close.cancel();
                    break;
                }
            }
        });

        // Reader: inbound frames until the server or the client closes
        let reader_close = close;
        tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            loop {
                tokio::select! {
                    _ = reader_close.cancelled() => break,
                    msg = stream.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if events.send(TransportEvent::Frame(text.to_string())).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            let event = match String::from_utf8(bytes.to_vec()) {
                                Ok(text) => TransportEvent::Frame(text),
                                Err(_) => TransportEvent::Error("non-utf8 binary frame".to_string()),
                            };
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::debug!(?frame, "server closed websocket");
                            let _ = events.send(TransportEvent::Closed);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            let _ = events.send(TransportEvent::Error(e.to_string()));
                            let _ = events.send(TransportEvent::Closed);
                            break;
                        }
                        None => {
                            let _ = events.send(TransportEvent::Closed);
                            break;
                        }
                    }
                }
            }
            reader_close.cancel();
        });

        link
    }
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_carries_frames_both_ways() {
        let (mut link, mut remote) = TransportLink::pair();

        link.outbound.send("hello".to_string()).unwrap();
        assert_eq!(remote.sent.recv().await.as_deref(), Some("hello"));

        assert!(remote.push(r#"{"type":"PONG"}"#));
        assert_eq!(
            link.inbound.recv().await,
            Some(TransportEvent::Frame(r#"{"type":"PONG"}"#.to_string()))
        );

        assert!(remote.hang_up());
        assert_eq!(link.inbound.recv().await, Some(TransportEvent::Closed));
    }

    #[tokio::test]
    async fn test_close_token_is_shared() {
        let (link, remote) = TransportLink::pair();
        assert!(!remote.is_closed());
        link.close.cancel();
        assert!(remote.is_closed());
    }

    fn broken_sink() -> impl Sink<Message, Error = WsError> + Send + 'static {
        futures_util::sink::unfold((), |(), _msg: Message| async {
            Err::<(), _>(WsError::ConnectionClosed)
        })
    }

    fn quiet_sink() -> impl Sink<Message, Error = WsError> + Send + 'static {
        futures_util::sink::unfold((), |(), _msg: Message| async { Ok::<(), WsError>(()) })
    }

    #[tokio::test]
    async fn test_write_failure_reports_error_then_closed() {
        let stream = futures_util::stream::pending::<Result<Message, WsError>>();
        let mut link = TransportLink::spawn(broken_sink(), stream, None);

        link.outbound.send("hello".to_string()).unwrap();

        assert!(matches!(link.inbound.recv().await, Some(TransportEvent::Error(_))));
        assert_eq!(link.inbound.recv().await, Some(TransportEvent::Closed));
        link.close.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_failure_reports_error_then_closed() {
        let stream = futures_util::stream::pending::<Result<Message, WsError>>();
        let mut link = TransportLink::spawn(broken_sink(), stream, Some(Duration::from_secs(30)));

        assert!(matches!(link.inbound.recv().await, Some(TransportEvent::Error(_))));
        assert_eq!(link.inbound.recv().await, Some(TransportEvent::Closed));
        assert!(link.close.is_cancelled());
    }

    #[tokio::test]
    async fn test_read_failure_reports_error_then_closed() {
        let stream = futures_util::stream::iter(vec![
            Ok(Message::text(r#"{"type":"PONG"}"#)),
            Err(WsError::ConnectionClosed),
        ])
        .chain(futures_util::stream::pending());
        let mut link = TransportLink::spawn(quiet_sink(), stream, None);

        assert_eq!(
            link.inbound.recv().await,
            Some(TransportEvent::Frame(r#"{"type":"PONG"}"#.to_string()))
        );
        assert!(matches!(link.inbound.recv().await, Some(TransportEvent::Error(_))));
        assert_eq!(link.inbound.recv().await, Some(TransportEvent::Closed));
        link.close.cancelled().await;
    }

    #[tokio::test]
    async fn test_ws_connector_refused_is_transport_error() {
        // nothing listens on port 1
        let connector = WsConnector::new(Duration::from_secs(2), None);
        let err = connector.open("ws://127.0.0.1:1/ws").await.err().unwrap();
        assert!(err.is_retryable());
    }
}
