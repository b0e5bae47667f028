//! Single recurring refresh timer.
//!
//! A session owns exactly one [`RefreshScheduler`]. Arming an already armed
//! scheduler is refused, so repeated authentications (a login followed by an
//! ambient probe, say) never stack timers. The first tick fires one full
//! period after arming and then repeats at the same period until the tick
//! callback breaks or the scheduler is cancelled.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// Shortest period a scheduler will run at.
pub const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Owner of at most one recurring timer task.
#[derive(Debug, Default)]
pub struct RefreshScheduler {
    task: Option<JoinHandle<()>>,
    period: Option<Duration>,
}

impl RefreshScheduler {
    /// Create an unarmed scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a timer task is live.
    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Period of the live timer.
    pub fn period(&self) -> Option<Duration> {
        if self.is_armed() { self.period } else { None }
    }

    /// Start a timer calling `tick` every `period`, unless one is already
    /// running. Returns whether a new timer was started.
    ///
    /// Periods shorter than [`MIN_PERIOD`] are raised to it. Must be called
    /// from within a tokio runtime.
    pub fn arm<F, Fut>(&mut self, period: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        if self.is_armed() {
            return false;
        }

        let period = period.max(MIN_PERIOD);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tick().await.is_break() {
                    tracing::debug!("refresh timer stopped by its tick");
                    break;
                }
            }
        });

        tracing::debug!(period_ms = period.as_millis() as u64, "refresh timer armed");
        self.task = Some(task);
        self.period = Some(period);
        true
    }

    /// Stop the timer if one is running.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("refresh timer cancelled");
        }
        self.period = None;
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
