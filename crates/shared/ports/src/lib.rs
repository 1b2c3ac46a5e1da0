//! Tempo Ports
//!
//! Port definitions (traits) for the Tempo virtual clock.
//! These define the boundary between time-consuming code and the
//! clock implementations that drive it.

mod clock;
mod error;
mod timer;

pub use clock::{Callback, Clock};
pub use error::{ContextError, ContextResult};
pub use timer::{FuncTimer, Schedule, Ticker, TimeReceiver, TimeSlot, Timer, time_slot};
