//! Deadline-bound context derivation
//!
//! A derived context is done at the earlier of its parent being done and
//! a deadline measured on a [`Clock`]. The deadline is an ordinary timer
//! on that clock, so on a [`MockClock`](crate::MockClock) it expires only
//! when the test advances virtual time past it.

use log::debug;
use tempo_core::{Duration, Timestamp};
use tempo_ports::{Clock, ContextError};

use crate::context::{CancelFunc, Context};

/// Derive a context that is done at `deadline` on `clock`, or when
/// `parent` is done, whichever comes first
///
/// If `parent` is already bound by a deadline no later than `deadline`,
/// no timer is created and the result is a plain cancellable child. A
/// `deadline` at or before `clock.now()` resolves the context before it
/// is returned, also without a timer.
///
/// # Panics
/// Panics if called outside a Tokio runtime; the race between the timer
/// and the parent runs on a spawned task.
pub fn deadline_context(
    clock: &dyn Clock,
    parent: &Context,
    deadline: Timestamp,
) -> (Context, CancelFunc) {
    let (cancel_ctx, cancel) = Context::with_cancel(parent);
    if let Some(parent_deadline) = parent.deadline() {
        if parent_deadline <= deadline {
            return (cancel_ctx, cancel);
        }
    }

    let ctx = Context::with_deadline(&cancel_ctx, deadline);
    let cancel = cancel.covering(&ctx);
    if deadline <= clock.now() {
        ctx.resolve(cancel_ctx.err().unwrap_or(ContextError::DeadlineExceeded));
        return (ctx, cancel);
    }

    let mut timer = clock.timer_at(deadline);
    debug!("{}: context deadline armed for {}", clock.name(), deadline);

    let resolved = ctx.clone();
    tokio::spawn(async move {
        let expired = tokio::select! {
            Some(_) = timer.recv() => true,
            _ = cancel_ctx.done() => false,
        };
        let err = if expired {
            ContextError::DeadlineExceeded
        } else {
            timer.stop();
            cancel_ctx.err().unwrap_or(ContextError::Canceled)
        };
        resolved.resolve(err);
    });

    (ctx, cancel)
}

/// `deadline_context(clock, parent, clock.now() + timeout)`
pub fn timeout_context(
    clock: &dyn Clock,
    parent: &Context,
    timeout: Duration,
) -> (Context, CancelFunc) {
    deadline_context(clock, parent, clock.now() + timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockClock;
    use chrono::{TimeZone, Utc};

    fn start() -> Timestamp {
        Utc.with_ymd_and_hms(2018, 1, 1, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_deadline_exceeded_when_time_reaches_deadline() {
        let clock = MockClock::new(start());
        let (ctx, _cancel) = clock.timeout_context(&Context::background(), Duration::seconds(10));

        assert_eq!(ctx.deadline(), Some(start() + Duration::seconds(10)));
        assert_eq!(clock.len(), 1);

        clock.add(Duration::seconds(9));
        tokio::task::yield_now().await;
        assert_eq!(ctx.err(), None);

        clock.add(Duration::seconds(1));
        ctx.done().await;
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancel_wins_and_releases_timer() {
        let clock = MockClock::new(start());
        let (ctx, cancel) = clock.timeout_context(&Context::background(), Duration::seconds(10));

        cancel.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Canceled));

        // The waiter stops the timer once it observes the cancellation.
        while !clock.is_empty() {
            tokio::task::yield_now().await;
        }

        clock.add(Duration::seconds(30));
        assert_eq!(ctx.err(), Some(ContextError::Canceled));
    }

    #[tokio::test]
    async fn test_cancel_resolves_deadline_context_immediately() {
        let clock = MockClock::new(start());
        let (ctx, cancel) = clock.timeout_context(&Context::background(), Duration::seconds(10));

        cancel.cancel();

        assert!(ctx.is_done());
        assert_eq!(ctx.check(), Err(ContextError::Canceled));
    }

    #[test]
    fn test_past_deadline_is_done_on_return() {
        let clock = MockClock::new(start());
        clock.add(Duration::minutes(1));

        let (ctx, cancel) = clock.deadline_context(&Context::background(), start());

        assert!(ctx.is_done());
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
        assert!(clock.is_empty());

        cancel.cancel();
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[test]
    fn test_past_deadline_under_canceled_parent_keeps_parent_cause() {
        let clock = MockClock::new(start());
        let (parent, cancel_parent) = Context::with_cancel(&Context::background());
        cancel_parent.cancel();

        let (ctx, _) = clock.deadline_context(&parent, start());

        assert_eq!(ctx.err(), Some(ContextError::Canceled));
        assert!(clock.is_empty());
    }

    #[tokio::test]
    async fn test_later_deadline_keeps_parent_deadline() {
        let clock = MockClock::new(start());
        let (parent, _) = clock.timeout_context(&Context::background(), Duration::seconds(10));

        let (child, _) = clock.deadline_context(&parent, start() + Duration::seconds(15));

        assert_eq!(child.deadline(), Some(start() + Duration::seconds(10)));
        assert_eq!(clock.len(), 1);
    }

    #[tokio::test]
    async fn test_earlier_deadline_arms_new_timer() {
        let clock = MockClock::new(start());
        let (parent, _) = clock.timeout_context(&Context::background(), Duration::seconds(10));

        let (child, _) = clock.deadline_context(&parent, start() + Duration::seconds(5));

        assert_eq!(child.deadline(), Some(start() + Duration::seconds(5)));
        assert_eq!(clock.len(), 2);

        clock.add(Duration::seconds(5));
        child.done().await;
        assert_eq!(child.err(), Some(ContextError::DeadlineExceeded));
        assert_eq!(parent.err(), None);
    }

    #[tokio::test]
    async fn test_parent_cancellation_resolves_child() {
        let clock = MockClock::new(start());
        let (parent, cancel_parent) = Context::with_cancel(&Context::background());
        let (child, _) = clock.timeout_context(&parent, Duration::seconds(10));

        cancel_parent.cancel();
        child.done().await;

        assert_eq!(child.err(), Some(ContextError::Canceled));
        assert_eq!(clock.len(), 0);
    }
}
