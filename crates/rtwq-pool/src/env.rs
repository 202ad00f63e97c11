//! Callback environments and cleanup groups

use crate::error::PoolError;
use crate::pool::{CallbackPriority, Job, ThreadPool};
use crate::registration::{RegInner, Registration, RegistrationKind};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Weak};

/// Closure run on the worker right after a work callback returns
pub type Finalization = Box<dyn FnOnce() + Send + 'static>;

/// Set of registrations that can be torn down together
#[derive(Default)]
pub struct CleanupGroup {
    members: Mutex<FxHashMap<u64, Weak<RegInner>>>,
}

impl CleanupGroup {
    /// Create an empty group
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn insert(&self, id: u64, member: Weak<RegInner>) {
        self.members.lock().insert(id, member);
    }

    pub(crate) fn remove(&self, id: u64) {
        self.members.lock().remove(&id);
    }

    /// Number of registrations still attached to the group
    pub fn member_count(&self) -> usize {
        self.members.lock().len()
    }

    /// Close every live registration of the group
    ///
    /// With `cancel_pending`, callbacks that were queued but have not started
    /// are dropped; otherwise they are allowed to run first. Either way this
    /// blocks until no member callback is running on another thread.
    pub fn close_members(&self, cancel_pending: bool) {
        let members: Vec<Arc<RegInner>> = self
            .members
            .lock()
            .drain()
            .filter_map(|(_, member)| member.upgrade())
            .collect();

        for member in members {
            member.wait_for_callbacks(cancel_pending);
            member.close();
        }
    }
}

/// Where and how a callback runs: pool, lane, cleanup group and hints
#[derive(Clone)]
pub struct CallbackEnv {
    pool: ThreadPool,
    group: Arc<CleanupGroup>,
    priority: CallbackPriority,
    long_function: bool,
}

impl CallbackEnv {
    /// Bind a pool lane and a cleanup group
    pub fn new(pool: &ThreadPool, group: &Arc<CleanupGroup>, priority: CallbackPriority) -> Self {
        Self {
            pool: pool.clone(),
            group: Arc::clone(group),
            priority,
            long_function: false,
        }
    }

    /// Pool this environment submits to
    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// Cleanup group registrations are attached to
    pub fn group(&self) -> &Arc<CleanupGroup> {
        &self.group
    }

    /// Lane callbacks are queued on
    pub fn priority(&self) -> CallbackPriority {
        self.priority
    }

    /// Mark callbacks as long-running
    pub fn set_long_function(&mut self, enable: bool) {
        self.long_function = enable;
    }

    /// Whether callbacks are marked long-running
    pub fn is_long_function(&self) -> bool {
        self.long_function
    }

    /// Submit a one-shot work callback, with an optional finalization hook
    pub fn submit_work<F>(&self, work: F, finalization: Option<Finalization>) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.push(
            self.priority,
            Job::new(Box::new(work), finalization, self.long_function),
        )
    }

    pub(crate) fn submit_job(&self, job: Job) -> Result<(), PoolError> {
        self.pool.push(self.priority, job)
    }

    /// Create an unarmed wait registration
    pub fn create_wait<F>(&self, callback: F) -> Registration
    where
        F: Fn() + Send + Sync + 'static,
    {
        Registration::new(self.clone(), RegistrationKind::Wait, Arc::new(callback))
    }

    /// Create an unarmed timer registration
    pub fn create_timer<F>(&self, callback: F) -> Registration
    where
        F: Fn() + Send + Sync + 'static,
    {
        Registration::new(self.clone(), RegistrationKind::Timer, Arc::new(callback))
    }
}
