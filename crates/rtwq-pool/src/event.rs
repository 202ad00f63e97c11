//! Waitable event object

use crate::registration::{FireOutcome, RegInner};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

struct EventState {
    signaled: bool,
    manual_reset: bool,
    /// Armed wait registrations with the epoch they were armed under
    waiters: VecDeque<(Weak<RegInner>, u64)>,
}

struct EventInner {
    state: Mutex<EventState>,
    signal: Condvar,
}

/// Manual- or auto-reset event
///
/// Signaling fires armed wait registrations (all of them for a manual-reset
/// event, the first live one for an auto-reset event) and wakes threads
/// blocked in `wait`. Cloning yields another handle to the same event.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    /// Create an event
    pub fn new(manual_reset: bool, initial_state: bool) -> Self {
        Self {
            inner: Arc::new(EventInner {
                state: Mutex::new(EventState {
                    signaled: initial_state,
                    manual_reset,
                    waiters: VecDeque::new(),
                }),
                signal: Condvar::new(),
            }),
        }
    }

    /// Signal the event
    pub fn set(&self) {
        let mut state = self.inner.state.lock();
        state.signaled = true;

        if state.manual_reset {
            for (waiter, epoch) in std::mem::take(&mut state.waiters) {
                if let Some(reg) = waiter.upgrade() {
                    reg.fire(epoch);
                }
            }
        } else {
            while let Some((waiter, epoch)) = state.waiters.pop_front() {
                let Some(reg) = waiter.upgrade() else {
                    continue;
                };
                if !matches!(reg.fire(epoch), FireOutcome::Stale) {
                    state.signaled = false;
                    break;
                }
            }
        }

        self.inner.signal.notify_all();
    }

    /// Clear the signaled state
    pub fn reset(&self) {
        self.inner.state.lock().signaled = false;
    }

    /// Whether the event is currently signaled
    pub fn is_set(&self) -> bool {
        self.inner.state.lock().signaled
    }

    /// Block until signaled; consumes the signal of an auto-reset event
    pub fn wait(&self) {
        let mut state = self.inner.state.lock();
        while !state.signaled {
            self.inner.signal.wait(&mut state);
        }
        if !state.manual_reset {
            state.signaled = false;
        }
    }

    /// Block until signaled or `timeout` elapses; returns whether it was signaled
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.signaled {
            if self
                .inner
                .signal
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        if !state.signaled {
            return false;
        }
        if !state.manual_reset {
            state.signaled = false;
        }
        true
    }

    /// Whether two handles refer to the same event
    pub fn ptr_eq(&self, other: &Event) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn register_wait(&self, waiter: Weak<RegInner>, epoch: u64) {
        let mut state = self.inner.state.lock();
        state.waiters.retain(|(waiter, _)| waiter.strong_count() > 0);

        if state.signaled {
            if let Some(reg) = waiter.upgrade() {
                let fired = !matches!(reg.fire(epoch), FireOutcome::Stale);
                if fired && !state.manual_reset {
                    state.signaled = false;
                }
            }
            return;
        }

        state.waiters.push_back((waiter, epoch));
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Event")
            .field("signaled", &state.signaled)
            .field("manual_reset", &state.manual_reset)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}
