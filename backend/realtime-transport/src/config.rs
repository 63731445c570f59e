use crate::error::RealtimeError;
use crate::models::UserId;
use dotenvy::dotenv;
use resilience::RetryConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Websocket endpoint; `userId` is appended as a query parameter
    pub ws_url: String,
    /// User to connect as once the first subscriber attaches
    pub user_id: Option<UserId>,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub throttle_window: Duration,
    pub outbound_queue_limit: usize,
    /// Per-subscriber delivery buffer
    pub subscriber_buffer: usize,
    pub connect_timeout: Duration,
    /// Client ping interval; `None` disables keepalive pings
    pub keepalive_interval: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8080/ws".to_string(),
            user_id: None,
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(3000),
            throttle_window: Duration::from_millis(500),
            outbound_queue_limit: 32,
            subscriber_buffer: 256,
            connect_timeout: Duration::from_millis(10_000),
            keepalive_interval: Some(Duration::from_millis(30_000)),
        }
    }
}

impl HubConfig {
    pub fn from_env() -> Result<Self, RealtimeError> {
        dotenv().ok();
        let defaults = Self::default();

        let ws_url = env::var("REALTIME_WS_URL").unwrap_or(defaults.ws_url);
        if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
            return Err(RealtimeError::Config(format!(
                "REALTIME_WS_URL must be a ws:// or wss:// URL, got {ws_url:?}"
            )));
        }

        let user_id = match env::var("REALTIME_USER_ID") {
            Ok(raw) if !raw.trim().is_empty() => {
                let id: u64 = parse_var("REALTIME_USER_ID", &raw)?;
                if id == 0 {
                    return Err(RealtimeError::Config(
                        "REALTIME_USER_ID must be positive".into(),
                    ));
                }
                Some(UserId(id))
            }
            _ => None,
        };

        let max_reconnect_attempts = optional_var(
            "REALTIME_MAX_RECONNECT_ATTEMPTS",
            defaults.max_reconnect_attempts,
        )?;
        let reconnect_delay_ms: u64 =
            positive_var("REALTIME_RECONNECT_DELAY_MS", defaults.reconnect_delay.as_millis() as u64)?;
        let throttle_window_ms: u64 =
            optional_var("REALTIME_THROTTLE_WINDOW_MS", defaults.throttle_window.as_millis() as u64)?;
        let outbound_queue_limit: usize =
            positive_var("REALTIME_OUTBOUND_QUEUE_LIMIT", defaults.outbound_queue_limit)?;
        let subscriber_buffer: usize =
            positive_var("REALTIME_SUBSCRIBER_BUFFER", defaults.subscriber_buffer)?;
        let connect_timeout_ms: u64 =
            positive_var("REALTIME_CONNECT_TIMEOUT_MS", defaults.connect_timeout.as_millis() as u64)?;
        let keepalive_ms: u64 = optional_var("REALTIME_KEEPALIVE_INTERVAL_MS", 30_000)?;

        Ok(Self {
            ws_url,
            user_id,
            max_reconnect_attempts,
            reconnect_delay: Duration::from_millis(reconnect_delay_ms),
            throttle_window: Duration::from_millis(throttle_window_ms),
            outbound_queue_limit,
            subscriber_buffer,
            connect_timeout: Duration::from_millis(connect_timeout_ms),
            keepalive_interval: (keepalive_ms > 0).then(|| Duration::from_millis(keepalive_ms)),
        })
    }

    /// Fixed-delay reconnect policy
    pub fn retry_policy(&self) -> RetryConfig {
        RetryConfig::fixed(self.reconnect_delay, self.max_reconnect_attempts)
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T, RealtimeError> {
    raw.trim()
        .parse()
        .map_err(|_| RealtimeError::Config(format!("{name} has an invalid value: {raw:?}")))
}

fn optional_var<T: FromStr>(name: &str, default: T) -> Result<T, RealtimeError> {
    match env::var(name) {
        Ok(raw) => parse_var(name, &raw),
        Err(_) => Ok(default),
    }
}

fn positive_var<T>(name: &str, default: T) -> Result<T, RealtimeError>
where
    T: FromStr + PartialOrd + Default,
{
    let value = optional_var(name, default)?;
    if value <= T::default() {
        return Err(RealtimeError::Config(format!("{name} must be positive")));
    }
    Ok(value)
}
