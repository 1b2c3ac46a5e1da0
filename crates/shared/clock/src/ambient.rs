//! Clock carried by a [`Context`]
//!
//! Code that receives a context can resolve its clock from it instead of
//! taking a clock parameter. A context with no clock attached resolves to
//! the [`SystemClock`], so production call trees need no setup while a
//! test swaps in a [`MockClock`](crate::MockClock) at the root.

use std::sync::Arc;

use tempo_core::{Duration, Timestamp};
use tempo_ports::{Clock, Ticker, TimeReceiver, Timer};

use crate::context::{CancelFunc, Context};
use crate::deadline;
use crate::system::SystemClock;

struct ContextClock(Arc<dyn Clock>);

/// Derive a context whose call tree uses `clock`
pub fn with_clock(parent: &Context, clock: Arc<dyn Clock>) -> Context {
    Context::with_value(parent, ContextClock(clock))
}

/// The clock attached to `ctx`, or the system clock if there is none
pub fn clock_from(ctx: &Context) -> Arc<dyn Clock> {
    match ctx.value::<ContextClock>() {
        Some(carried) => Arc::clone(&carried.0),
        None => Arc::new(SystemClock::new()),
    }
}

pub fn now(ctx: &Context) -> Timestamp {
    clock_from(ctx).now()
}

pub fn new_timer(ctx: &Context, duration: Duration) -> Timer {
    clock_from(ctx).new_timer(duration)
}

pub fn new_ticker(ctx: &Context, period: Duration) -> Ticker {
    clock_from(ctx).new_ticker(period)
}

pub fn after(ctx: &Context, duration: Duration) -> TimeReceiver {
    clock_from(ctx).after(duration)
}

/// Sleep on the context's clock
pub async fn sleep(ctx: &Context, duration: Duration) {
    clock_from(ctx).sleep(duration).await;
}

/// [`deadline_context`](crate::deadline_context) on the context's clock
pub fn deadline_context(parent: &Context, deadline: Timestamp) -> (Context, CancelFunc) {
    deadline::deadline_context(clock_from(parent).as_ref(), parent, deadline)
}

/// [`timeout_context`](crate::timeout_context) on the context's clock
pub fn timeout_context(parent: &Context, timeout: Duration) -> (Context, CancelFunc) {
    deadline::timeout_context(clock_from(parent).as_ref(), parent, timeout)
}
