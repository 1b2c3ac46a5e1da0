use std::thread;
use std::time::{Duration as StdDuration, Instant};

use log::trace;
use tempo_core::{Duration, Timestamp};
use tokio::sync::mpsc::{self, error::TrySendError};

/// How often a waiting offer re-checks an occupied slot
const DRAIN_POLL: StdDuration = StdDuration::from_micros(200);

/// Receiving half of a timer's notification slot
pub type TimeReceiver = mpsc::Receiver<Timestamp>;

/// Create a single-slot mailbox for fired timestamps
pub fn time_slot() -> (TimeSlot, TimeReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (TimeSlot { tx }, rx)
}

/// Sending half of a timer's notification slot
///
/// Holds at most one undelivered timestamp. A firing that finds the slot
/// occupied is dropped, the same way a real timer never queues backlog,
/// unless the sender chooses to wait for the receiver with
/// [`offer_within`](TimeSlot::offer_within).
#[derive(Debug, Clone)]
pub struct TimeSlot {
    tx: mpsc::Sender<Timestamp>,
}

impl TimeSlot {
    /// Offer a fired timestamp without blocking
    ///
    /// Returns false if the value was dropped.
    pub fn offer(&self, fired_at: Timestamp) -> bool {
        self.offer_within(fired_at, StdDuration::ZERO)
    }

    /// Offer a fired timestamp, waiting up to `patience` for the receiver
    /// to drain an occupied slot
    ///
    /// Blocks the calling thread while waiting. Returns false if the
    /// value was dropped, either because the slot stayed occupied or
    /// because the receiver is gone.
    pub fn offer_within(&self, fired_at: Timestamp, patience: StdDuration) -> bool {
        let give_up = Instant::now() + patience;
        loop {
            match self.tx.try_send(fired_at) {
                Ok(()) => return true,
                Err(TrySendError::Closed(_)) => return false,
                Err(TrySendError::Full(_)) if Instant::now() >= give_up => {
                    trace!("Slot occupied, dropping firing at {}", fired_at);
                    return false;
                }
                Err(TrySendError::Full(_)) => thread::sleep(DRAIN_POLL),
            }
        }
    }
}

/// Port for controlling a scheduled entry
///
/// Implemented by every clock for the entries it creates, so handles
/// stay clock-agnostic.
pub trait Schedule: Send + Sync {
    /// Disarm the entry
    ///
    /// Returns true if the entry was armed, false if it had already
    /// fired or been stopped.
    fn stop(&self) -> bool;

    /// Re-arm the entry to fire `duration` from now
    ///
    /// Returns whether the entry was armed before the call.
    fn reset(&self, duration: Duration) -> bool;
}

/// One-shot timer delivering its fire time on a single-slot mailbox
pub struct Timer {
    rx: TimeReceiver,
    schedule: Box<dyn Schedule>,
}

impl Timer {
    pub fn new(rx: TimeReceiver, schedule: Box<dyn Schedule>) -> Self {
        Self { rx, schedule }
    }

    /// Wait for the timer to fire
    pub async fn recv(&mut self) -> Option<Timestamp> {
        self.rx.recv().await
    }

    /// Take the fired timestamp if one is waiting
    pub fn try_recv(&mut self) -> Option<Timestamp> {
        self.rx.try_recv().ok()
    }

    /// Block the current thread until the timer fires
    ///
    /// # Panics
    /// Panics if called from within an asynchronous execution context.
    pub fn blocking_recv(&mut self) -> Option<Timestamp> {
        self.rx.blocking_recv()
    }

    pub fn stop(&self) -> bool {
        self.schedule.stop()
    }

    pub fn reset(&self, duration: Duration) -> bool {
        self.schedule.reset(duration)
    }

    /// Give up control of the timer, keeping only its mailbox
    pub fn into_receiver(self) -> TimeReceiver {
        self.rx
    }
}

/// Periodic timer delivering each fire time on a single-slot mailbox
pub struct Ticker {
    rx: TimeReceiver,
    schedule: Box<dyn Schedule>,
}

impl Ticker {
    pub fn new(rx: TimeReceiver, schedule: Box<dyn Schedule>) -> Self {
        Self { rx, schedule }
    }

    /// Wait for the next tick
    pub async fn recv(&mut self) -> Option<Timestamp> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Timestamp> {
        self.rx.try_recv().ok()
    }

    /// # Panics
    /// Panics if called from within an asynchronous execution context.
    pub fn blocking_recv(&mut self) -> Option<Timestamp> {
        self.rx.blocking_recv()
    }

    pub fn stop(&self) -> bool {
        self.schedule.stop()
    }

    /// Restart the ticker with a new period, first tick one period from now
    pub fn reset(&self, period: Duration) -> bool {
        self.schedule.reset(period)
    }

    pub fn into_receiver(self) -> TimeReceiver {
        self.rx
    }
}

/// Handle to a deferred callback created by `Clock::after_func`
pub struct FuncTimer {
    schedule: Box<dyn Schedule>,
}

impl FuncTimer {
    pub fn new(schedule: Box<dyn Schedule>) -> Self {
        Self { schedule }
    }

    pub fn stop(&self) -> bool {
        self.schedule.stop()
    }

    pub fn reset(&self, duration: Duration) -> bool {
        self.schedule.reset(duration)
    }
}
