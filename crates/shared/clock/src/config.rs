use std::time::Duration as StdDuration;

use serde::{Deserialize, Serialize};
use tempo_core::Timestamp;

/// Configuration for a virtual-time engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Virtual time the engine starts at
    pub start: Timestamp,
    /// Name reported by `Clock::name`
    pub name: String,
    /// Maximum firings of one periodic entry within a single advancement
    ///
    /// `None` means unbounded catch-up.
    pub max_catch_up: Option<u32>,
    /// How long a catch-up firing waits for a reader to drain its ticker's
    /// mailbox before it is dropped, in milliseconds
    pub catch_up_wait_ms: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            start: Timestamp::default(),
            name: "MockClock".to_string(),
            max_catch_up: None,
            catch_up_wait_ms: 250,
        }
    }
}

impl MockConfig {
    /// Create a config starting at `start` with default settings
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            start,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Cap ticker catch-up within one advancement (zero is treated as one)
    pub fn with_max_catch_up(mut self, max_catch_up: u32) -> Self {
        self.max_catch_up = Some(max_catch_up.max(1));
        self
    }

    /// Bound the wait for a reader during catch-up; zero never waits
    pub fn with_catch_up_wait(mut self, wait: StdDuration) -> Self {
        self.catch_up_wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn catch_up_wait(&self) -> StdDuration {
        StdDuration::from_millis(self.catch_up_wait_ms)
    }
}
