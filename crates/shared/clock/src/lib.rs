//! Tempo Clock
//!
//! Time sources for production and for deterministic tests:
//!
//! ```text
//! Clock (port)
//!     │
//!     ├── SystemClock   wall-clock time, timers run as Tokio tasks
//!     │
//!     └── MockClock     virtual time, advanced only by the test
//!             │
//!             └── entries (timers, tickers, after-funcs) fired in
//!                 (fire time, creation order) as time moves
//! ```
//!
//! Contexts derived with [`deadline_context`] / [`timeout_context`] are
//! bound to a deadline measured on any [`Clock`], so deadline-driven code
//! can be tested without real elapsed time.
//!
//! ## Usage
//!
//! ```ignore
//! use tempo_clock::{Clock, Context, MockClock};
//! use chrono::Duration;
//!
//! let clock = MockClock::new(start);
//! let mut timer = clock.new_timer(Duration::seconds(15));
//! let (ctx, cancel) = clock.timeout_context(&Context::background(), Duration::seconds(10));
//!
//! clock.add(Duration::seconds(25));         // fires both
//! assert_eq!(timer.try_recv(), Some(start + Duration::seconds(15)));
//! ctx.done().await;                          // context deadline exceeded
//! ```

mod action;
pub mod ambient;
mod config;
mod context;
mod deadline;
mod mock;
mod system;

pub use config::MockConfig;
pub use context::{CancelFunc, Context};
pub use deadline::{deadline_context, timeout_context};
pub use mock::MockClock;
pub use system::SystemClock;

// Re-export the port types for convenience
pub use tempo_core::{Duration, Timestamp};
pub use tempo_ports::{
    Callback, Clock, ContextError, ContextResult, FuncTimer, Ticker, TimeReceiver, Timer,
};
