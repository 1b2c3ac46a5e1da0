use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tempo_core::{Duration, Timestamp, to_std_duration};
use tempo_ports::{Callback, Clock, FuncTimer, Schedule, Ticker, Timer, time_slot};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::action::Action;

/// Real system clock for production use
///
/// `now` is the wall-clock time. Timers, tickers and after-funcs run as
/// Tokio tasks, so they must be created from within a Tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(to_std_duration(duration)).await;
    }

    fn new_timer(&self, duration: Duration) -> Timer {
        let (slot, rx) = time_slot();
        let task = TaskTimer::start(Action::Notify(slot), duration, None);
        Timer::new(rx, Box::new(task))
    }

    fn new_ticker(&self, period: Duration) -> Ticker {
        assert!(
            period > Duration::zero(),
            "non-positive interval for new_ticker"
        );
        let (slot, rx) = time_slot();
        let task = TaskTimer::start(Action::Notify(slot), period, Some(period));
        Ticker::new(rx, Box::new(task))
    }

    fn after_func(&self, duration: Duration, callback: Callback) -> FuncTimer {
        let task = TaskTimer::start(Action::Call(callback), duration, None);
        FuncTimer::new(Box::new(task))
    }

    fn name(&self) -> &str {
        "SystemClock"
    }
}

/// Timer backed by a Tokio task sleeping until the fire time
///
/// Dropping the handle does not cancel the task.
struct TaskTimer {
    runtime: Handle,
    action: Action,
    periodic: bool,
    task: Mutex<Option<AbortHandle>>,
}

impl TaskTimer {
    fn start(action: Action, after: Duration, period: Option<Duration>) -> Self {
        let timer = Self {
            runtime: Handle::current(),
            action,
            periodic: period.is_some(),
            task: Mutex::new(None),
        };
        *timer.task.lock() = Some(timer.spawn(after, period));
        timer
    }

    fn spawn(&self, after: Duration, period: Option<Duration>) -> AbortHandle {
        let action = self.action.clone();
        let start = Instant::now() + to_std_duration(after);
        match period {
            None => self
                .runtime
                .spawn(async move {
                    tokio::time::sleep_until(start).await;
                    action.fire(Utc::now(), StdDuration::ZERO);
                })
                .abort_handle(),
            Some(period) => self
                .runtime
                .spawn(async move {
                    let mut interval = tokio::time::interval_at(start, to_std_duration(period));
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        interval.tick().await;
                        action.fire(Utc::now(), StdDuration::ZERO);
                    }
                })
                .abort_handle(),
        }
    }

    /// Abort the running task, reporting whether it had yet to finish
    fn abort(task: Option<AbortHandle>) -> bool {
        match task {
            Some(task) => {
                let live = !task.is_finished();
                task.abort();
                live
            }
            None => false,
        }
    }
}

impl Schedule for TaskTimer {
    fn stop(&self) -> bool {
        Self::abort(self.task.lock().take())
    }

    fn reset(&self, duration: Duration) -> bool {
        let period = if self.periodic {
            assert!(
                duration > Duration::zero(),
                "non-positive interval for ticker reset"
            );
            Some(duration)
        } else {
            None
        };
        let mut task = self.task.lock();
        let was_live = Self::abort(task.take());
        *task = Some(self.spawn(duration, period));
        was_live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock::new();
        let time1 = clock.now();
        thread::sleep(std::time::Duration::from_millis(10));
        let time2 = clock.now();

        assert!(time2 > time1);
        let diff = time2 - time1;
        assert!(diff >= Duration::milliseconds(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires() {
        let clock = SystemClock::new();
        let mut timer = clock.new_timer(Duration::milliseconds(50));

        assert!(timer.recv().await.is_some());
        assert!(!timer.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_timer_never_fires() {
        let clock = SystemClock::new();
        let mut timer = clock.new_timer(Duration::milliseconds(50));

        assert!(timer.stop());
        assert!(!timer.stop());

        let waited = tokio::time::timeout(std::time::Duration::from_secs(1), timer.recv()).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_repeats() {
        let clock = SystemClock::new();
        let mut ticker = clock.new_ticker(Duration::milliseconds(10));

        for _ in 0..3 {
            assert!(ticker.recv().await.is_some());
        }
        assert!(ticker.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_after_func_runs_callback() {
        let clock = SystemClock::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let _func = clock.after_func(
            Duration::milliseconds(20),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        clock.sleep(Duration::milliseconds(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_rearms_timer() {
        let clock = SystemClock::new();
        let mut timer = clock.new_timer(Duration::seconds(60));

        assert!(timer.reset(Duration::milliseconds(5)));
        let fired = tokio::time::timeout(std::time::Duration::from_secs(1), timer.recv()).await;
        assert!(matches!(fired, Ok(Some(_))));
    }
}
