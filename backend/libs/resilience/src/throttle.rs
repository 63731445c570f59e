/// Minimum spacing between consecutive permits
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last_permit: Option<Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_permit: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Take a permit if the window since the previous one has elapsed.
    ///
    /// Returns `Err(remaining)` with the time left until the next slot.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&mut self, now: Instant) -> Result<(), Duration> {
        let remaining = self.remaining_at(now);
        if remaining.is_zero() {
            self.last_permit = Some(now);
            Ok(())
        } else {
            Err(remaining)
        }
    }

    /// Time left until the next permit is available
    pub fn remaining_at(&self, now: Instant) -> Duration {
        match self.last_permit {
            Some(last) => self.window.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    pub fn reset(&mut self) {
        self.last_permit = None;
    }
}
