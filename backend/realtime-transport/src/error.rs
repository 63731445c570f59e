use crate::websocket::message_types::Envelope;
use thiserror::Error;

pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Distinguishes between retryable and permanent errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Retryable,
    Permanent,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RealtimeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode payload: {reason}")]
    Decode { reason: String, raw: String },

    #[error("undeliverable {kind}: {reason}")]
    Scope { kind: &'static str, reason: String },

    #[error("websocket not connected")]
    NotConnected,

    #[error("reconnect budget exhausted after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("send throttled: outbound queue is full ({limit} pending)")]
    Throttled { limit: usize },

    #[error("cannot send {0} envelopes")]
    Unsendable(&'static str),

    #[error("realtime hub is shut down")]
    HubClosed,
}

impl From<serde_json::Error> for RealtimeError {
    fn from(e: serde_json::Error) -> Self {
        RealtimeError::Decode {
            reason: e.to_string(),
            raw: String::new(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            // the same URL will be rejected again on every retry
            WsError::Url(_) => RealtimeError::Config(e.to_string()),
            _ => RealtimeError::Transport(e.to_string()),
        }
    }
}

impl RealtimeError {
    /// Transport failures feed the reconnect policy; everything else is final
    pub fn kind(&self) -> ErrorKind {
        match self {
            RealtimeError::Transport(_) | RealtimeError::NotConnected => ErrorKind::Retryable,
            RealtimeError::Throttled { .. } => ErrorKind::Retryable,
            _ => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    /// Surface the error to consumers as an `error` event
    pub fn to_event(&self) -> Envelope {
        let raw = match self {
            RealtimeError::Decode { raw, .. } if !raw.is_empty() => Some(raw.clone()),
            _ => None,
        };
        Envelope::Error {
            message: self.to_string(),
            raw,
        }
    }
}
