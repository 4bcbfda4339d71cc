//! Concurrency ceiling and running-slot accounting.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Counters behind the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    /// Slots currently held.
    pub running: usize,
    /// Effective ceiling; never below `running`.
    pub ceiling: usize,
    /// Requested ceiling; differs from `ceiling` while a decrease drains.
    pub target: usize,
}

/// Slot accounting for the execution engine.
///
/// A decrease takes effect for admissions at once (`target`) while the
/// effective `ceiling` only drops once running executions have drained below
/// it, so `running <= ceiling` holds at every instant.
#[derive(Debug)]
pub struct Capacity {
    state: Mutex<CapacitySnapshot>,
}

impl Capacity {
    /// Capacity with `ceiling` slots.
    #[must_use]
    pub fn new(ceiling: usize) -> Self {
        Self {
            state: Mutex::new(CapacitySnapshot {
                running: 0,
                ceiling,
                target: ceiling,
            }),
        }
    }

    /// Take a slot if one is free.
    pub fn try_acquire(&self) -> bool {
        let mut s = self.state.lock();
        if s.running < s.ceiling.min(s.target) {
            s.running += 1;
            true
        } else {
            false
        }
    }

    /// Return a slot, committing a pending decrease once drained.
    pub fn release(&self) {
        let mut s = self.state.lock();
        s.running = s.running.saturating_sub(1);
        if s.ceiling > s.target && s.running <= s.target {
            s.ceiling = s.target;
        }
    }

    /// Change the ceiling. Returns the new effective ceiling.
    pub fn scale_to(&self, target: usize) -> usize {
        let mut s = self.state.lock();
        s.target = target;
        if target >= s.ceiling || s.running <= target {
            s.ceiling = target;
        }
        s.ceiling
    }

    /// Slots held.
    pub fn running(&self) -> usize {
        self.state.lock().running
    }

    /// Effective ceiling.
    pub fn ceiling(&self) -> usize {
        self.state.lock().ceiling
    }

    /// Requested ceiling.
    pub fn target(&self) -> usize {
        self.state.lock().target
    }

    /// All counters at once.
    pub fn snapshot(&self) -> CapacitySnapshot {
        *self.state.lock()
    }
}
