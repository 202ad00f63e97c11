//! Pool-backed queue discipline

use crate::error::{RtwqError, RtwqResult};
use crate::item::WorkItem;
use parking_lot::Mutex;
use rtwq_pool::{CallbackEnv, CallbackPriority, CleanupGroup, Finalization, ThreadPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

struct PoolResources {
    pool: ThreadPool,
    group: Arc<CleanupGroup>,
    /// One environment per lane, indexed by `CallbackPriority::index`
    envs: [CallbackEnv; 3],
}

/// Worker pool with three priority lanes
///
/// `None` once shut down, or if the pool could not be started.
pub(crate) struct PoolQueue {
    resources: Mutex<Option<PoolResources>>,
}

impl PoolQueue {
    pub(crate) fn new(name: &str, max_threads: usize, join_timeout: Duration) -> Self {
        let pool = ThreadPool::new(name);
        pool.set_thread_maximum(max_threads);
        pool.set_join_timeout(join_timeout);

        let resources = match pool.set_thread_minimum(1) {
            Ok(()) => {
                let group = CleanupGroup::new();
                let envs = CallbackPriority::ALL.map(|priority| CallbackEnv::new(&pool, &group, priority));
                Some(PoolResources { pool, group, envs })
            }
            Err(err) => {
                warn!(queue = name, error = %err, "failed to start worker pool, queue is inert");
                pool.close();
                None
            }
        };

        Self {
            resources: Mutex::new(resources),
        }
    }

    pub(crate) fn env(&self, priority: CallbackPriority) -> RtwqResult<CallbackEnv> {
        self.resources
            .lock()
            .as_ref()
            .map(|resources| resources.envs[priority.index()].clone())
            .ok_or(RtwqError::ShuttingDown)
    }

    pub(crate) fn submit(&self, name: &str, item: Arc<WorkItem>) -> RtwqResult<()> {
        let lane = CallbackPriority::from_item_priority(item.priority());
        let env = self.env(lane)?;

        // The finalization closure keeps the item alive until the hook runs.
        let finalization = item.finalizer().map(|finalizer| {
            let item = Arc::clone(&item);
            Box::new(move || {
                if let Some(queue) = finalizer.upgrade() {
                    queue.finalize(&item);
                }
            }) as Finalization
        });

        trace!(queue = name, ?lane, "submitting work item");
        env.submit_work(move || item.run(), finalization)
            .map_err(RtwqError::from)
    }

    pub(crate) fn set_long_running(&self, enable: bool) {
        if let Some(resources) = self.resources.lock().as_mut() {
            for env in &mut resources.envs {
                env.set_long_function(enable);
            }
        }
    }

    /// Cancel pool members and close the pool; false if already shut down
    pub(crate) fn shutdown(&self, name: &str) -> bool {
        let Some(resources) = self.resources.lock().take() else {
            return false;
        };
        resources.group.close_members(true);
        resources.pool.close();
        trace!(queue = name, "worker pool closed");
        true
    }

    #[cfg(test)]
    pub(crate) fn thread_count(&self) -> usize {
        self.resources
            .lock()
            .as_ref()
            .map_or(0, |resources| resources.pool.thread_count())
    }
}
