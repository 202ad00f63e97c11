//! Thread pool with three priority lanes
//!
//! Workers are spawned on demand up to the pool maximum and drain the
//! high lane before the normal lane before the low lane. A job is a work
//! closure plus an optional finalization closure run on the same worker
//! once the work returns.

use crate::env::Finalization;
use crate::error::PoolError;
use crate::timer::TimerThread;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Default time `close` waits for each worker to exit before detaching it
const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Priority lane a callback is queued on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackPriority {
    /// Drained first
    High,
    /// Default lane
    Normal,
    /// Drained only when the other lanes are empty
    Low,
}

impl CallbackPriority {
    /// All lanes, in drain order
    pub const ALL: [CallbackPriority; 3] = [
        CallbackPriority::High,
        CallbackPriority::Normal,
        CallbackPriority::Low,
    ];

    /// Lane index (0 = high, 1 = normal, 2 = low)
    pub fn index(self) -> usize {
        match self {
            CallbackPriority::High => 0,
            CallbackPriority::Normal => 1,
            CallbackPriority::Low => 2,
        }
    }

    /// Map a signed work item priority onto a lane
    pub fn from_item_priority(priority: i32) -> Self {
        match priority {
            0 => CallbackPriority::Normal,
            p if p < 0 => CallbackPriority::Low,
            _ => CallbackPriority::High,
        }
    }
}

/// Queued unit of work
pub(crate) struct Job {
    work: Box<dyn FnOnce() + Send + 'static>,
    finalization: Option<Finalization>,
    long_function: bool,
}

impl Job {
    pub(crate) fn new(
        work: Box<dyn FnOnce() + Send + 'static>,
        finalization: Option<Finalization>,
        long_function: bool,
    ) -> Self {
        Self {
            work,
            finalization,
            long_function,
        }
    }

    fn run(self, pool_name: &str) {
        let Job {
            work, finalization, ..
        } = self;

        if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
            error!(pool = pool_name, "callback panicked");
        }

        // Finalization still runs so that anything chained on it can advance.
        if let Some(finalization) = finalization {
            if panic::catch_unwind(AssertUnwindSafe(finalization)).is_err() {
                error!(pool = pool_name, "finalization callback panicked");
            }
        }
    }
}

struct PoolState {
    /// Queued jobs per lane, indexed by `CallbackPriority::index`
    lanes: [VecDeque<Job>; 3],
    /// Live worker threads
    threads: usize,
    /// Workers parked on `work_ready`
    idle: usize,
    /// Workers currently running a long-function job
    long_running: usize,
    min_threads: usize,
    max_threads: usize,
    next_worker: usize,
    handles: Vec<JoinHandle<()>>,
    join_timeout: Duration,
    closed: bool,
}

impl PoolState {
    fn queued(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    /// Thread ceiling, grown by one for every running long function
    fn capacity(&self) -> usize {
        self.max_threads + self.long_running
    }

    fn pop(&mut self) -> Option<Job> {
        self.lanes.iter_mut().find_map(VecDeque::pop_front)
    }
}

struct PoolShared {
    name: String,
    state: Mutex<PoolState>,
    work_ready: Condvar,
    timer: Mutex<Option<Arc<TimerThread>>>,
}

/// Pool of worker threads
///
/// Cloning yields another handle to the same pool. The pool keeps running
/// until `close` is called.
#[derive(Clone)]
pub struct ThreadPool {
    shared: Arc<PoolShared>,
}

impl ThreadPool {
    /// Create a pool with no threads, a minimum of 0 and a maximum of 1
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                name: name.into(),
                state: Mutex::new(PoolState {
                    lanes: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                    threads: 0,
                    idle: 0,
                    long_running: 0,
                    min_threads: 0,
                    max_threads: 1,
                    next_worker: 0,
                    handles: Vec::new(),
                    join_timeout: DEFAULT_JOIN_TIMEOUT,
                    closed: false,
                }),
                work_ready: Condvar::new(),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Pool name (used as the thread name prefix)
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Set the minimum thread count and start threads until it is reached
    pub fn set_thread_minimum(&self, min: usize) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        if min > state.max_threads {
            return Err(PoolError::InvalidLimits {
                min,
                max: state.max_threads,
            });
        }

        state.min_threads = min;
        while state.threads < min {
            self.spawn_worker(&mut state)?;
        }
        Ok(())
    }

    /// Set the maximum thread count (at least 1); lowers the minimum if needed
    pub fn set_thread_maximum(&self, max: usize) {
        let mut state = self.shared.state.lock();
        state.max_threads = max.max(1);
        state.min_threads = state.min_threads.min(state.max_threads);
        // Surplus idle workers retire when woken.
        self.shared.work_ready.notify_all();
    }

    /// Set how long `close` waits for each worker before detaching it
    pub fn set_join_timeout(&self, timeout: Duration) {
        self.shared.state.lock().join_timeout = timeout;
    }

    /// Number of live worker threads
    pub fn thread_count(&self) -> usize {
        self.shared.state.lock().threads
    }

    /// Number of jobs waiting for a worker
    pub fn queued_count(&self) -> usize {
        self.shared.state.lock().queued()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Queue a job on a lane, starting a worker if every live one is busy
    pub(crate) fn push(&self, priority: CallbackPriority, job: Job) -> Result<(), PoolError> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }

        let lane = priority.index();
        let ceiling = state.capacity() + usize::from(job.long_function);
        state.lanes[lane].push_back(job);

        if state.queued() > state.idle && state.threads < ceiling {
            if let Err(err) = self.spawn_worker(&mut state) {
                if state.threads == 0 {
                    let job = state.lanes[lane].pop_back();
                    drop(state);
                    drop(job);
                    return Err(err);
                }
                warn!(pool = %self.shared.name, error = %err, "failed to grow thread pool");
            }
        }

        self.shared.work_ready.notify_one();
        Ok(())
    }

    /// Timer thread of this pool, started on first use
    pub(crate) fn timer(&self) -> Result<Arc<TimerThread>, PoolError> {
        let mut slot = self.shared.timer.lock();
        // Checked under the slot lock so a concurrent close always sees the timer.
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        if let Some(timer) = slot.as_ref() {
            return Ok(Arc::clone(timer));
        }

        let timer = TimerThread::new();
        timer.start(format!("{}-timer", self.shared.name))?;
        *slot = Some(Arc::clone(&timer));
        Ok(timer)
    }

    /// Close the pool
    ///
    /// Queued jobs that have not started are dropped without running, the
    /// timer thread stops, and every worker is joined (with a timeout). The
    /// calling thread is never joined, so a pool may be closed from one of
    /// its own callbacks. Closing twice is a no-op.
    pub fn close(&self) {
        let (cancelled, handles, timeout) = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;

            let cancelled: Vec<Job> = state
                .lanes
                .iter_mut()
                .flat_map(|lane| lane.drain(..))
                .collect();
            let handles = std::mem::take(&mut state.handles);
            (cancelled, handles, state.join_timeout)
        };
        self.shared.work_ready.notify_all();

        if let Some(timer) = self.shared.timer.lock().take() {
            timer.stop();
        }

        debug!(
            pool = %self.shared.name,
            cancelled = cancelled.len(),
            workers = handles.len(),
            "closing thread pool"
        );
        drop(cancelled);

        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            join_with_timeout(handle, timeout);
        }
    }

    fn spawn_worker(&self, state: &mut MutexGuard<'_, PoolState>) -> Result<(), PoolError> {
        state.handles.retain(|handle| !handle.is_finished());

        let id = state.next_worker;
        state.next_worker += 1;

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("{}-worker-{}", self.shared.name, id))
            .spawn(move || worker_loop(shared))?;

        state.threads += 1;
        state.handles.push(handle);
        Ok(())
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    let mut state = shared.state.lock();
    loop {
        if state.closed {
            break;
        }

        if let Some(job) = state.pop() {
            let long_function = job.long_function;
            if long_function {
                state.long_running += 1;
            }
            MutexGuard::unlocked(&mut state, || job.run(&shared.name));
            if long_function {
                state.long_running -= 1;
            }
            continue;
        }

        if state.threads > state.capacity().max(state.min_threads) {
            break;
        }

        state.idle += 1;
        shared.work_ready.wait(&mut state);
        state.idle -= 1;
    }
    state.threads -= 1;
}

/// Join a thread with timeout, detach if stuck.
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) {
    let start = Instant::now();
    loop {
        if handle.is_finished() {
            let _ = handle.join();
            return;
        }
        if start.elapsed() > timeout {
            warn!(
                thread = handle.thread().name().unwrap_or("<unnamed>"),
                "thread did not exit in time, detaching"
            );
            drop(handle);
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
