use std::sync::Arc;

use async_trait::async_trait;
use tempo_core::{Duration, Timestamp};

use crate::timer::{FuncTimer, Ticker, TimeReceiver, Timer};

/// Callback run by `Clock::after_func`
///
/// `Fn` rather than `FnOnce`: a reset after firing arms it again.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Port for time abstraction
///
/// This allows code to use different time sources:
/// - Real system time for production
/// - Virtual time advanced by the test for deterministic tests
///
/// Object safe, so `Arc<dyn Clock>` can be injected anywhere.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Get the current time according to this clock
    fn now(&self) -> Timestamp;

    /// Time elapsed since `t`
    fn since(&self, t: Timestamp) -> Duration {
        self.now() - t
    }

    /// Time remaining until `t`, negative if `t` has passed
    fn until(&self, t: Timestamp) -> Duration {
        t - self.now()
    }

    /// Suspend the caller until `duration` has elapsed on this clock
    async fn sleep(&self, duration: Duration) {
        let mut timer = self.new_timer(duration);
        timer.recv().await;
    }

    /// Mailbox that receives the time once `duration` has elapsed
    fn after(&self, duration: Duration) -> TimeReceiver {
        self.new_timer(duration).into_receiver()
    }

    /// Mailbox that receives a tick every `period`
    ///
    /// The underlying ticker can never be stopped.
    fn tick(&self, period: Duration) -> TimeReceiver {
        self.new_ticker(period).into_receiver()
    }

    /// Create a one-shot timer firing after `duration`
    fn new_timer(&self, duration: Duration) -> Timer;

    /// Create a one-shot timer firing at the absolute time `deadline`
    fn timer_at(&self, deadline: Timestamp) -> Timer {
        self.new_timer(self.until(deadline))
    }

    /// Create a ticker firing every `period`
    ///
    /// # Panics
    /// Panics if `period` is not positive.
    fn new_ticker(&self, period: Duration) -> Ticker;

    /// Run `callback` once `duration` has elapsed
    fn after_func(&self, duration: Duration, callback: Callback) -> FuncTimer;

    /// Get the clock's name/identifier for debugging
    fn name(&self) -> &str {
        "Clock"
    }
}
