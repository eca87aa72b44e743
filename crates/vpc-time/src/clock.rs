use std::cell::Cell;
use std::rc::Rc;

pub const NS_PER_MS: u64 = 1_000_000;

/// Read-only view of guest virtual time.
pub trait Clock {
    /// Monotonic guest time in nanoseconds.
    fn now_ns(&self) -> u64;

    /// Guest time in (fractional) milliseconds, the unit the legacy device timing rules use.
    fn now_ms_f64(&self) -> f64 {
        self.now_ns() as f64 / NS_PER_MS as f64
    }

    /// Whole milliseconds elapsed since reset.
    fn ticks_ms(&self) -> u64 {
        self.now_ns() / NS_PER_MS
    }
}

/// A clock stuck at zero, for devices that are not time-sensitive in a given configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullClock;

impl Clock for NullClock {
    fn now_ns(&self) -> u64 {
        0
    }
}

/// Deterministic, manually advanced clock.
///
/// Clones share the same underlying time so a machine can hand one to every device and advance
/// them all at once.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ns: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saturates at `u64::MAX`.
    pub fn advance_ns(&self, ns: u64) {
        self.now_ns.set(self.now_ns.get().saturating_add(ns));
    }

    /// Moves time forward to `ns`. Earlier values are ignored.
    pub fn advance_to_ns(&self, ns: u64) {
        if ns > self.now_ns.get() {
            self.now_ns.set(ns);
        }
    }

    /// Sets the current time, intended for save/restore. May move time backwards.
    pub fn set_now_ns(&self, ns: u64) {
        self.now_ns.set(ns);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.get()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ns(&self) -> u64 {
        (**self).now_ns()
    }
}
