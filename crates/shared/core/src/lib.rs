//! Tempo Core
//!
//! Pure time value types shared by every Tempo crate.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod values;

// Re-export commonly used types at crate root
pub use values::{Duration, Timestamp, to_std_duration};
