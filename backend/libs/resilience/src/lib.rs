/// Resilience primitives for long-lived client connections
///
/// This library provides the timing building blocks of the realtime transport:
/// - **Retry**: Reconnect budget with fixed or exponential delay and optional jitter
/// - **Scheduled Task**: A single outstanding delayed task with a cancellation token
/// - **Throttle**: Minimum spacing between consecutive outbound operations
///
/// # Example: Reconnect Timer
///
/// ```rust,no_run
/// use resilience::{RetryConfig, ScheduledTask};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let policy = RetryConfig::fixed(Duration::from_secs(3), 5);
///     let mut timer = ScheduledTask::new("reconnect");
///
///     if !policy.is_exhausted(0) {
///         timer.schedule(policy.delay_for(1), async {
///             // reopen the connection here
///         });
///     }
/// }
/// ```

pub mod retry;
pub mod scheduled;
pub mod throttle;

pub use retry::RetryConfig;
pub use scheduled::ScheduledTask;
pub use throttle::Throttle;
