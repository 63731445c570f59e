/// Single-slot delayed task with cancellation
///
/// A `ScheduledTask` owns at most one pending timer. Scheduling a new one
/// always cancels the previous one first, so two timers for the same slot
/// can never be outstanding at once.
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub struct ScheduledTask {
    name: &'static str,
    pending: Option<Pending>,
}

struct Pending {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            pending: None,
        }
    }

    /// Run `task` after `delay` unless cancelled first.
    ///
    /// Any previously scheduled task in this slot is cancelled.
    pub fn schedule<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        let token = CancellationToken::new();
        let child = token.clone();
        let name = self.name;
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = child.cancelled() => {
                    trace!(task = name, "scheduled task cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    trace!(task = name, ?delay, "scheduled task firing");
                    task.await;
                }
            }
        });

        self.pending = Some(Pending { token, handle });
    }

    /// Cancel the pending task. Returns whether one was still pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                let was_pending = !pending.handle.is_finished();
                pending.token.cancel();
                was_pending
            }
            None => false,
        }
    }

    /// Whether a task is scheduled and has not completed yet
    pub fn is_pending(&self) -> bool {
        self.pending
            .as_ref()
            .map(|p| !p.handle.is_finished() && !p.token.is_cancelled())
            .unwrap_or(false)
    }

    /// Forget a task that has already fired, without cancelling anything
    pub fn clear(&mut self) {
        self.pending = None;
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("pending", &self.is_pending())
            .finish()
    }
}
