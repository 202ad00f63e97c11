//! Wait and timer registrations
//!
//! A registration owns a callback and is armed either on an `Event` (wait)
//! or on the pool's timer thread (timer). Every arming bumps an epoch;
//! firings and queued callbacks carry the epoch they were issued under and
//! are discarded once it is stale. That is what lets `cancel_and_wait`
//! drop queued callbacks without touching the pool's lanes.

use crate::env::CallbackEnv;
use crate::error::PoolError;
use crate::event::Event;
use crate::pool::Job;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

static NEXT_REGISTRATION_ID: AtomicU64 = AtomicU64::new(1);

type RegCallback = Arc<dyn Fn() + Send + Sync>;

/// What a registration is armed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationKind {
    /// Fires once when its event is signaled
    Wait,
    /// Fires at a due time, then every period if it has one
    Timer,
}

/// Result of a firing attempt
pub(crate) enum FireOutcome {
    /// Disarmed or re-armed since the firing was scheduled
    Stale,
    /// Callback queued; the registration is now disarmed
    Fired,
    /// Callback queued; a periodic timer stays armed
    Periodic(Duration),
}

struct RegState {
    epoch: u64,
    armed: bool,
    period: Option<Duration>,
    /// Callbacks queued on the pool under the current epoch
    queued: usize,
    /// Threads currently inside the callback
    running: Vec<ThreadId>,
    callback: Option<RegCallback>,
}

impl RegState {
    /// Invalidate every outstanding firing and queued callback
    fn bump(&mut self) -> u64 {
        self.epoch += 1;
        self.queued = 0;
        self.epoch
    }
}

pub(crate) struct RegInner {
    id: u64,
    kind: RegistrationKind,
    env: CallbackEnv,
    state: Mutex<RegState>,
    quiescent: Condvar,
}

impl RegInner {
    /// Queue the callback if `epoch` is still the armed one
    pub(crate) fn fire(self: &Arc<Self>, epoch: u64) -> FireOutcome {
        let period = {
            let mut state = self.state.lock();
            if !state.armed || state.epoch != epoch {
                return FireOutcome::Stale;
            }
            let period = match self.kind {
                RegistrationKind::Timer => state.period,
                RegistrationKind::Wait => None,
            };
            if period.is_none() {
                state.armed = false;
            }
            state.queued += 1;
            period
        };

        let reg = Arc::clone(self);
        let job = Job::new(
            Box::new(move || reg.run(epoch)),
            None,
            self.env.is_long_function(),
        );
        if let Err(err) = self.env.submit_job(job) {
            debug!(registration = self.id, error = %err, "dropping firing");
            let mut state = self.state.lock();
            if state.epoch == epoch {
                state.queued = state.queued.saturating_sub(1);
            }
            self.quiescent.notify_all();
            return FireOutcome::Stale;
        }

        match period {
            Some(period) => FireOutcome::Periodic(period),
            None => FireOutcome::Fired,
        }
    }

    fn run(&self, epoch: u64) {
        let callback = {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            state.queued = state.queued.saturating_sub(1);
            match state.callback.clone() {
                Some(callback) => {
                    state.running.push(thread::current().id());
                    callback
                }
                None => {
                    self.quiescent.notify_all();
                    return;
                }
            }
        };

        let _running = RunningGuard { reg: self };
        callback();
    }

    /// Block until no callback runs on another thread
    ///
    /// With `cancel_pending` the registration is disarmed and queued
    /// callbacks are discarded first; otherwise queued callbacks are waited
    /// for as well. Never takes the caller's locks, so it must not be called
    /// while holding a lock the callback needs.
    pub(crate) fn wait_for_callbacks(&self, cancel_pending: bool) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if cancel_pending {
            state.armed = false;
            state.bump();
        }
        while state.running.iter().any(|id| *id != me) || (!cancel_pending && state.queued > 0) {
            self.quiescent.wait(&mut state);
        }
    }

    /// Disarm without waiting and release the callback
    pub(crate) fn close(&self) {
        let callback = {
            let mut state = self.state.lock();
            state.armed = false;
            state.bump();
            state.callback.take()
        };
        self.quiescent.notify_all();
        self.env.group().remove(self.id);
        // Dropped outside the lock: the callback may own this registration's handle.
        drop(callback);
    }
}

struct RunningGuard<'a> {
    reg: &'a RegInner,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let me = thread::current().id();
        let mut state = self.reg.state.lock();
        if let Some(pos) = state.running.iter().position(|id| *id == me) {
            state.running.swap_remove(pos);
        }
        self.reg.quiescent.notify_all();
    }
}

/// Wait or timer callback registered with a pool
///
/// Dropping the handle closes the registration without waiting.
pub struct Registration {
    inner: Arc<RegInner>,
}

impl Registration {
    pub(crate) fn new(env: CallbackEnv, kind: RegistrationKind, callback: RegCallback) -> Self {
        let id = NEXT_REGISTRATION_ID.fetch_add(1, Ordering::Relaxed);
        let group = Arc::clone(env.group());
        let inner = Arc::new(RegInner {
            id,
            kind,
            env,
            state: Mutex::new(RegState {
                epoch: 0,
                armed: false,
                period: None,
                queued: 0,
                running: Vec::new(),
                callback: Some(callback),
            }),
            quiescent: Condvar::new(),
        });
        group.insert(id, Arc::downgrade(&inner));
        Self { inner }
    }

    /// Registration kind
    pub fn kind(&self) -> RegistrationKind {
        self.inner.kind
    }

    /// Whether the registration can still fire
    pub fn is_armed(&self) -> bool {
        self.inner.state.lock().armed
    }

    /// Arm on `event`, or disarm with `None`
    pub fn set_wait(&self, event: Option<&Event>) {
        if self.inner.kind != RegistrationKind::Wait {
            warn!(registration = self.inner.id, "set_wait on a timer registration");
            return;
        }

        let epoch = {
            let mut state = self.inner.state.lock();
            state.armed = event.is_some();
            state.bump()
        };
        if let Some(event) = event {
            event.register_wait(Arc::downgrade(&self.inner), epoch);
        }
    }

    /// Arm to fire after `due`, then every `period`; disarm with `None`
    ///
    /// A zero period means one-shot.
    pub fn set_timer(&self, due: Option<Duration>, period: Option<Duration>) -> Result<(), PoolError> {
        if self.inner.kind != RegistrationKind::Timer {
            warn!(registration = self.inner.id, "set_timer on a wait registration");
            return Ok(());
        }

        let period = period.filter(|period| !period.is_zero());
        let epoch = {
            let mut state = self.inner.state.lock();
            state.armed = due.is_some();
            state.period = period;
            state.bump()
        };
        let Some(due) = due else {
            return Ok(());
        };

        let timer = match self.inner.env.pool().timer() {
            Ok(timer) => timer,
            Err(err) => {
                let mut state = self.inner.state.lock();
                if state.epoch == epoch {
                    state.armed = false;
                }
                return Err(err);
            }
        };
        timer.register(Instant::now() + due, Arc::downgrade(&self.inner), epoch);
        Ok(())
    }

    /// Disarm, discard queued callbacks and wait for running ones to finish
    ///
    /// Once this returns the callback will not start again until re-armed.
    /// A callback running on the calling thread is not waited for.
    pub fn cancel_and_wait(&self) {
        self.inner.wait_for_callbacks(true);
    }

    /// Wait for queued and running callbacks without disarming
    pub fn wait_for_callbacks(&self) {
        self.inner.wait_for_callbacks(false);
    }

    /// Disarm and release the callback without waiting
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.inner.close();
    }
}
