// src/scheduler.rs
//
// Cooperative timer service. Nothing here sleeps: the control loop asks which
// tasks are due at a given instant and runs them itself, in registration order.

use crate::error::{Error, Result};

/// Milliseconds since the controller booted.
pub type Millis = u64;

/// Upper bound on concurrently registered timers.
pub const MAX_TIMERS: usize = 16;

#[derive(Debug)]
struct Entry<T> {
    next_due: Millis,
    /// `None` marks a one-shot entry.
    interval: Option<Millis>,
    task: T,
}

#[derive(Debug)]
pub struct Scheduler<T> {
    entries: Vec<Entry<T>>,
}

impl<T: Copy> Scheduler<T> {
    pub fn new() -> Self {
        Scheduler {
            entries: Vec::with_capacity(MAX_TIMERS),
        }
    }

    /// Registers `task` to fire every `interval` ms, first at `now + interval`.
    pub fn every(&mut self, now: Millis, interval: Millis, task: T) -> Result<()> {
        let interval = interval.max(1);
        self.push(now + interval, Some(interval), task)
    }

    /// Registers `task` to fire once, `delay` ms after `now`.
    pub fn after(&mut self, now: Millis, delay: Millis, task: T) -> Result<()> {
        self.push(now + delay, None, task)
    }

    fn push(&mut self, next_due: Millis, interval: Option<Millis>, task: T) -> Result<()> {
        if self.entries.len() >= MAX_TIMERS {
            return Err(Error::SchedulerFull(MAX_TIMERS));
        }
        self.entries.push(Entry {
            next_due,
            interval,
            task,
        });
        Ok(())
    }

    /// Collects every task due at `now`, in registration order.
    ///
    /// Each entry fires at most once per call. A periodic entry that fell more
    /// than one interval behind is rescheduled from `now` rather than replaying
    /// the missed firings. One-shot entries are removed once they fire.
    pub fn due(&mut self, now: Millis) -> Vec<T> {
        let mut fired = Vec::new();
        self.entries.retain_mut(|entry| {
            if entry.next_due > now {
                return true;
            }
            fired.push(entry.task);
            match entry.interval {
                Some(interval) => {
                    entry.next_due += interval;
                    if entry.next_due <= now {
                        entry.next_due = now + interval;
                    }
                    true
                }
                None => false,
            }
        });
        fired
    }

    /// Earliest instant at which any registered task becomes due.
    pub fn next_deadline(&self) -> Option<Millis> {
        self.entries.iter().map(|e| e.next_due).min()
    }

    /// Number of registered entries, one-shots included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Copy> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
