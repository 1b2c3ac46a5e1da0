use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use log::{debug, trace, warn};
use parking_lot::{Mutex, MutexGuard};
use priority_queue::PriorityQueue;
use tempo_core::{Duration, Timestamp};
use tempo_ports::{Callback, Clock, FuncTimer, Schedule, Ticker, Timer, time_slot};

use crate::action::Action;
use crate::config::MockConfig;
use crate::context::{CancelFunc, Context};
use crate::deadline;

/// Virtual-time clock for deterministic tests
///
/// Time only moves when the test calls [`add`](MockClock::add),
/// [`add_next`](MockClock::add_next) or [`set`](MockClock::set). Every
/// timer, ticker and after-func created through it is an entry in the
/// engine and fires, in `(fire time, creation order)`, while time is
/// being advanced past it.
///
/// Clones share the same engine.
#[derive(Clone)]
pub struct MockClock {
    engine: Arc<Engine>,
}

struct Engine {
    name: String,
    max_catch_up: Option<u32>,
    catch_up_wait: StdDuration,
    state: Mutex<EngineState>,
}

struct EngineState {
    now: Timestamp,
    next_seq: u64,
    /// Armed entries by sequence number, earliest `(fire_at, seq)` first
    queue: PriorityQueue<u64, Reverse<(Timestamp, u64)>>,
    armed: HashMap<u64, Armed>,
}

struct Armed {
    entry: Arc<Entry>,
    /// Zero for one-shot entries
    period: Duration,
}

struct Entry {
    seq: u64,
    action: Action,
}

impl MockClock {
    /// Create a mock clock frozen at `start`
    pub fn new(start: Timestamp) -> Self {
        Self::with_config(MockConfig::starting_at(start))
    }

    pub fn with_config(config: MockConfig) -> Self {
        Self {
            engine: Arc::new(Engine {
                catch_up_wait: config.catch_up_wait(),
                name: config.name,
                max_catch_up: config.max_catch_up.map(|cap| cap.max(1)),
                state: Mutex::new(EngineState {
                    now: config.start,
                    next_seq: 0,
                    queue: PriorityQueue::new(),
                    armed: HashMap::new(),
                }),
            }),
        }
    }

    /// Move virtual time forward by `delta`, firing everything that
    /// becomes due
    ///
    /// # Panics
    /// Panics if `delta` is negative.
    pub fn add(&self, delta: Duration) {
        assert!(
            delta >= Duration::zero(),
            "cannot move virtual time backwards by {}",
            delta
        );
        let state = self.engine.state.lock();
        let target = state.now + delta;
        self.engine.advance(state, target);
    }

    /// Advance to the earliest pending fire time and fire that batch
    ///
    /// Returns the new time and how far it moved. With nothing pending
    /// this is a no-op returning a zero delta.
    pub fn add_next(&self) -> (Timestamp, Duration) {
        let state = self.engine.state.lock();
        let now = state.now;
        let next = state.queue.peek().map(|(_, Reverse((fire_at, _)))| *fire_at);
        match next {
            Some(fire_at) => {
                self.engine.advance(state, fire_at);
                (fire_at, fire_at - now)
            }
            None => (now, Duration::zero()),
        }
    }

    /// Jump virtual time to `time`, firing everything that becomes due
    ///
    /// # Panics
    /// Panics if `time` is before the current virtual time.
    pub fn set(&self, time: Timestamp) {
        let state = self.engine.state.lock();
        assert!(
            time >= state.now,
            "cannot set virtual time back from {} to {}",
            state.now,
            time
        );
        self.engine.advance(state, time);
    }

    /// Number of armed entries
    pub fn len(&self) -> usize {
        self.engine.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Derive a context that is done at `deadline` on this clock, or when
    /// `parent` is done, whichever comes first
    ///
    /// Must be called from within a Tokio runtime.
    pub fn deadline_context(
        &self,
        parent: &Context,
        deadline: Timestamp,
    ) -> (Context, CancelFunc) {
        deadline::deadline_context(self, parent, deadline)
    }

    /// `deadline_context(parent, now + timeout)`
    pub fn timeout_context(
        &self,
        parent: &Context,
        timeout: Duration,
    ) -> (Context, CancelFunc) {
        deadline::timeout_context(self, parent, timeout)
    }

    fn schedule(&self, action: Action, fire_at: FireAt, period: Duration) -> EntryHandle {
        let mut state = self.engine.state.lock();
        let entry = Arc::new(Entry {
            seq: state.next_seq,
            action,
        });
        state.next_seq += 1;
        state.arm(Arc::clone(&entry), fire_at, period);
        EntryHandle {
            engine: Arc::clone(&self.engine),
            entry,
            periodic: period > Duration::zero(),
        }
    }
}

/// When an entry is armed, resolved against `now` under the engine lock
enum FireAt {
    After(Duration),
    At(Timestamp),
}

impl EngineState {
    /// Arm (or re-arm) an entry, returning whether it was already armed
    fn arm(&mut self, entry: Arc<Entry>, fire_at: FireAt, period: Duration) -> bool {
        let fire_at = match fire_at {
            FireAt::After(delay) => self.now + delay.max(Duration::zero()),
            FireAt::At(deadline) => deadline.max(self.now),
        };
        let seq = entry.seq;
        let was_armed = self.armed.insert(seq, Armed { entry, period }).is_some();
        self.queue.push(seq, Reverse((fire_at, seq)));
        was_armed
    }

    fn disarm(&mut self, seq: u64) -> bool {
        self.armed.remove(&seq);
        self.queue.remove(&seq).is_some()
    }

    /// Pop the earliest entry due at or before `target`
    fn pop_due(&mut self, target: Timestamp) -> Option<(Timestamp, u64)> {
        let (_, Reverse((fire_at, _))) = self.queue.peek()?;
        if *fire_at > target {
            return None;
        }
        self.queue.pop().map(|(_, Reverse(key))| key)
    }
}

impl Engine {
    /// Set `now` to `target`, then fire every entry due by `target`
    ///
    /// The lock is released around each firing so callbacks may use the
    /// clock. A ticker firing more than once in this pass waits, bounded
    /// by `catch_up_wait`, for its reader to drain the previous tick; once
    /// that wait runs out the ticker's remaining firings are dropped
    /// without waiting.
    fn advance(&self, mut state: MutexGuard<'_, EngineState>, target: Timestamp) {
        debug!("{}: advancing {} -> {}", self.name, state.now, target);
        state.now = target;

        let mut fired: HashMap<u64, u32> = HashMap::new();
        let mut unread: HashSet<u64> = HashSet::new();
        while let Some((fire_at, seq)) = state.pop_due(target) {
            let Some(armed) = state.armed.get(&seq) else {
                continue;
            };
            let entry = Arc::clone(&armed.entry);
            let period = armed.period;

            let count = fired.entry(seq).or_insert(0);
            *count += 1;
            let catching_up = *count > 1;
            if period > Duration::zero() {
                let next = self.next_fire(*count, seq, fire_at, period, target);
                state.queue.push(seq, Reverse((next, seq)));
            } else {
                state.armed.remove(&seq);
            }

            let patience = if catching_up && !unread.contains(&seq) {
                self.catch_up_wait
            } else {
                StdDuration::ZERO
            };
            trace!("{}: firing entry {} at {}", self.name, seq, fire_at);
            let delivered =
                MutexGuard::unlocked(&mut state, || entry.action.fire(fire_at, patience));
            if !delivered && catching_up {
                unread.insert(seq);
            }
        }
    }

    /// Next fire time of a periodic entry that just fired at `fired_at`,
    /// its `fired`th firing in the current pass
    fn next_fire(
        &self,
        fired: u32,
        seq: u64,
        fired_at: Timestamp,
        period: Duration,
        target: Timestamp,
    ) -> Timestamp {
        let next = fired_at + period;
        let Some(cap) = self.max_catch_up else {
            return next;
        };
        if fired < cap || next > target {
            return next;
        }

        // Skip to the first boundary after `target`, keeping the phase.
        let period_ns = period.num_nanoseconds().unwrap_or(i64::MAX).max(1);
        let behind_ns = (target - fired_at).num_nanoseconds().unwrap_or(i64::MAX);
        let periods = behind_ns / period_ns + 1;
        warn!(
            "{}: entry {} hit the catch-up cap of {}, skipping {} firings",
            self.name,
            seq,
            cap,
            periods - 1
        );
        fired_at + Duration::nanoseconds(period_ns.saturating_mul(periods))
    }
}

/// Control handle for an entry, shared by its timer or ticker
struct EntryHandle {
    engine: Arc<Engine>,
    entry: Arc<Entry>,
    periodic: bool,
}

impl Schedule for EntryHandle {
    fn stop(&self) -> bool {
        self.engine.state.lock().disarm(self.entry.seq)
    }

    fn reset(&self, duration: Duration) -> bool {
        let period = if self.periodic {
            assert!(
                duration > Duration::zero(),
                "non-positive interval for ticker reset"
            );
            duration
        } else {
            Duration::zero()
        };
        self.engine
            .state
            .lock()
            .arm(Arc::clone(&self.entry), FireAt::After(duration), period)
    }
}

impl Clock for MockClock {
    fn now(&self) -> Timestamp {
        self.engine.state.lock().now
    }

    fn new_timer(&self, duration: Duration) -> Timer {
        let (slot, rx) = time_slot();
        let handle = self.schedule(
            Action::Notify(slot),
            FireAt::After(duration),
            Duration::zero(),
        );
        Timer::new(rx, Box::new(handle))
    }

    fn timer_at(&self, deadline: Timestamp) -> Timer {
        let (slot, rx) = time_slot();
        let handle = self.schedule(
            Action::Notify(slot),
            FireAt::At(deadline),
            Duration::zero(),
        );
        Timer::new(rx, Box::new(handle))
    }

    fn new_ticker(&self, period: Duration) -> Ticker {
        assert!(
            period > Duration::zero(),
            "non-positive interval for new_ticker"
        );
        let (slot, rx) = time_slot();
        let handle = self.schedule(Action::Notify(slot), FireAt::After(period), period);
        Ticker::new(rx, Box::new(handle))
    }

    fn after_func(&self, duration: Duration, callback: Callback) -> FuncTimer {
        let handle = self.schedule(
            Action::Call(callback),
            FireAt::After(duration),
            Duration::zero(),
        );
        FuncTimer::new(Box::new(handle))
    }

    fn name(&self) -> &str {
        &self.engine.name
    }
}
