/// Reconnect budget with fixed or exponential delay and optional jitter
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of automatic attempts before giving up
    pub max_retries: u32,
    /// Delay before the first attempt
    pub initial_backoff: Duration,
    /// Upper bound for any computed delay
    pub max_backoff: Duration,
    /// Multiplier applied per attempt (1.0 = fixed delay)
    pub backoff_multiplier: f64,
    /// Add random jitter to the delay (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(3),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Fixed delay between attempts, no jitter
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: delay,
            max_backoff: delay,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Whether `attempts` already made have used up the budget
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_retries
    }

    /// Delay to wait before attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base_ms = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = Duration::from_millis(base_ms.min(self.max_backoff.as_millis() as f64) as u64);
        calculate_backoff(capped, self.jitter)
    }
}

fn calculate_backoff(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let mut rng = rand::thread_rng();
        let jitter_factor = 1.0 + rng.gen_range(-0.3..0.3); // ±30%
        Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
    } else {
        base
    }
}
