use std::time::Duration as StdDuration;

use tempo_core::Timestamp;
use tempo_ports::{Callback, TimeSlot};

/// What an entry does when it fires
#[derive(Clone)]
pub(crate) enum Action {
    /// Offer the fire time on a single-slot mailbox
    Notify(TimeSlot),
    /// Run a callback in place of a notification
    Call(Callback),
}

impl Action {
    /// Fire, waiting up to `patience` for an occupied mailbox to drain
    ///
    /// Returns false if a notification was dropped.
    pub(crate) fn fire(&self, fired_at: Timestamp, patience: StdDuration) -> bool {
        match self {
            Action::Notify(slot) => slot.offer_within(fired_at, patience),
            Action::Call(callback) => {
                callback();
                true
            }
        }
    }
}
