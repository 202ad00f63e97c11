//! Timer thread for timer registrations
//!
//! One thread per pool sleeps until the earliest due entry using condvar
//! timeouts, fires every expired entry and re-arms periodic ones.

use crate::error::PoolError;
use crate::pool::join_with_timeout;
use crate::registration::{FireOutcome, RegInner};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::trace;

const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Entry in the timer heap
struct TimerEntry {
    due: Instant,
    /// Insertion order, breaks ties between equal due times
    seq: u64,
    reg: Weak<RegInner>,
    epoch: u64,
}

// Reverse ordering for min-heap (earliest due time first)
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

struct TimerState {
    entries: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

pub(crate) struct TimerThread {
    state: Mutex<TimerState>,
    /// Wakes the thread when an earlier entry is added or on shutdown
    notify: Condvar,
    shutdown: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerThread {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TimerState {
                entries: BinaryHeap::new(),
                next_seq: 0,
            }),
            notify: Condvar::new(),
            shutdown: AtomicBool::new(false),
            handle: Mutex::new(None),
        })
    }

    pub(crate) fn start(self: &Arc<Self>, name: String) -> Result<(), PoolError> {
        let timer = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || timer.run_loop())?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    pub(crate) fn stop(&self) {
        {
            // Set under the lock so the loop cannot miss the wakeup.
            let mut state = self.state.lock();
            self.shutdown.store(true, AtomicOrdering::Release);
            state.entries.clear();
        }
        self.notify.notify_one();

        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != thread::current().id() {
                join_with_timeout(handle, STOP_TIMEOUT);
            }
        }
    }

    /// Fire `reg` at `due` if it is still armed under `epoch` by then
    pub(crate) fn register(&self, due: Instant, reg: Weak<RegInner>, epoch: u64) {
        let mut state = self.state.lock();
        if self.shutdown.load(AtomicOrdering::Acquire) {
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(TimerEntry {
            due,
            seq,
            reg,
            epoch,
        });
        self.notify.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    fn run_loop(&self) {
        let mut state = self.state.lock();
        loop {
            if self.shutdown.load(AtomicOrdering::Acquire) {
                break;
            }

            let now = Instant::now();
            let mut expired = Vec::new();
            while state.entries.peek().is_some_and(|entry| entry.due <= now) {
                if let Some(entry) = state.entries.pop() {
                    expired.push(entry);
                }
            }

            if !expired.is_empty() {
                drop(state);
                let mut rearm = Vec::new();
                for entry in expired {
                    let Some(reg) = entry.reg.upgrade() else {
                        continue;
                    };
                    if let FireOutcome::Periodic(period) = reg.fire(entry.epoch) {
                        rearm.push(TimerEntry {
                            due: (entry.due + period).max(Instant::now()),
                            ..entry
                        });
                    }
                }
                state = self.state.lock();
                for mut entry in rearm {
                    entry.seq = state.next_seq;
                    state.next_seq += 1;
                    state.entries.push(entry);
                }
                continue;
            }

            match state.entries.peek().map(|entry| entry.due) {
                Some(due) => {
                    self.notify.wait_until(&mut state, due);
                }
                None => self.notify.wait(&mut state),
            }
        }
        trace!("timer thread shutting down");
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.stop();
    }
}
