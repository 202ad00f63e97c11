//! Work queues
//!
//! A queue is either pool-backed (items run on its own worker pool) or
//! serial (items are forwarded one at a time to a target queue). Both share
//! a pending list guarded by the queue lock: keyed timer and wait items for
//! pool queues, the FIFO of waiting items for serial queues.

mod pool;
mod serial;

pub(crate) use pool::PoolQueue;
pub(crate) use serial::SerialQueue;

use crate::error::{RtwqError, RtwqResult};
use crate::ids::{QueueId, WorkItemKey};
use crate::item::{CancelTicket, ItemKind, ItemState, WorkItem};
use crate::platform::PlatformInner;
use crate::result::AsyncResult;
use parking_lot::Mutex;
use rtwq_pool::{CallbackEnv, CallbackPriority, Event};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace, warn};

pub(crate) enum QueueKind {
    Pool(PoolQueue),
    Serial(SerialQueue),
}

pub(crate) struct Queue {
    name: String,
    platform: Weak<PlatformInner>,
    pending: Mutex<VecDeque<Arc<WorkItem>>>,
    kind: QueueKind,
}

impl Queue {
    pub(crate) fn new_pool(
        platform: &Arc<PlatformInner>,
        name: String,
        max_threads: usize,
        join_timeout: Duration,
    ) -> Arc<Self> {
        let pool = PoolQueue::new(&name, max_threads, join_timeout);
        debug!(queue = %name, max_threads, "created pool queue");
        Self::with_kind(platform, name, QueueKind::Pool(pool))
    }

    pub(crate) fn new_serial(platform: &Arc<PlatformInner>, name: String, target: QueueId) -> Arc<Self> {
        debug!(queue = %name, %target, "created serial queue");
        Self::with_kind(platform, name, QueueKind::Serial(SerialQueue::new(target)))
    }

    fn with_kind(platform: &Arc<PlatformInner>, name: String, kind: QueueKind) -> Arc<Self> {
        Arc::new(Self {
            name,
            platform: Arc::downgrade(platform),
            pending: Mutex::new(VecDeque::new()),
            kind,
        })
    }

    pub(crate) fn kind(&self) -> &QueueKind {
        &self.kind
    }

    pub(crate) fn platform(&self) -> Option<Arc<PlatformInner>> {
        self.platform.upgrade()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Hand an item to the queue; never blocks
    pub(crate) fn submit(self: &Arc<Self>, item: Arc<WorkItem>) -> RtwqResult<()> {
        match &self.kind {
            QueueKind::Pool(pool) => pool.submit(&self.name, item),
            QueueKind::Serial(serial) => self.serial_submit(serial, item),
        }
    }

    /// Finalization hook: `item`'s callback has returned downstream
    pub(crate) fn finalize(self: &Arc<Self>, item: &Arc<WorkItem>) {
        if let QueueKind::Serial(serial) = &self.kind {
            self.serial_finalize(serial, item);
        }
    }

    pub(crate) fn set_long_running(&self, enable: bool) {
        match &self.kind {
            QueueKind::Pool(pool) => pool.set_long_running(enable),
            QueueKind::Serial(_) => trace!(queue = %self.name, "long-running hint ignored"),
        }
    }

    fn pool_env(&self, priority: CallbackPriority) -> RtwqResult<CallbackEnv> {
        match &self.kind {
            QueueKind::Pool(pool) => pool.env(priority),
            QueueKind::Serial(_) => Err(RtwqError::InvalidQueue),
        }
    }

    /// Fire `result`'s callback once `event` is signaled
    pub(crate) fn submit_wait(
        self: &Arc<Self>,
        event: &Event,
        priority: i32,
        result: &AsyncResult,
        key: Option<WorkItemKey>,
    ) -> RtwqResult<()> {
        let env = self.pool_env(CallbackPriority::Normal)?;
        let item = WorkItem::new(self, result.clone(), priority, ItemKind::Wait, key);
        if key.is_some() {
            self.mark_pending(&item);
        }

        let firing = Arc::clone(&item);
        let registration = env.create_wait(move || firing.fire());
        item.install_registration(registration, |registration| {
            registration.set_wait(Some(event));
            Ok(())
        })?;

        trace!(queue = %self.name, ?key, "dispatched waiting item");
        Ok(())
    }

    /// Fire `result`'s callback after `due`, then every `period` if given
    pub(crate) fn submit_timer(
        self: &Arc<Self>,
        result: &AsyncResult,
        due: Duration,
        period: Option<Duration>,
        key: Option<WorkItemKey>,
    ) -> RtwqResult<()> {
        let env = self.pool_env(CallbackPriority::Normal)?;
        let periodic = period.is_some_and(|period| !period.is_zero());
        let item = WorkItem::new(self, result.clone(), 0, ItemKind::Timer { periodic }, key);
        if key.is_some() {
            self.mark_pending(&item);
        }

        let firing = Arc::clone(&item);
        let registration = env.create_timer(move || firing.fire());
        let armed = item.install_registration(registration, |registration| {
            registration.set_timer(Some(due), period)
        });
        if let Err(err) = armed {
            self.release_pending(&item, ItemState::Cancelled);
            drop(item.take_registration());
            return Err(err.into());
        }

        trace!(queue = %self.name, ?key, ?due, ?period, "dispatched scheduled item");
        Ok(())
    }

    fn mark_pending(&self, item: &Arc<WorkItem>) {
        let mut pending = self.pending.lock();
        item.set_state(ItemState::Pending);
        pending.push_back(Arc::clone(item));
    }

    /// Leave `Pending` for `to` and drop the pending entry, atomically
    ///
    /// Returns false if the item was no longer pending.
    pub(crate) fn release_pending(&self, item: &Arc<WorkItem>, to: ItemState) -> bool {
        let removed = {
            let mut pending = self.pending.lock();
            if !item.transition(ItemState::Pending, to) {
                return false;
            }
            pending
                .iter()
                .position(|entry| Arc::ptr_eq(entry, item))
                .and_then(|pos| pending.remove(pos))
        };
        drop(removed);
        true
    }

    fn find_pending(self: &Arc<Self>, key: WorkItemKey) -> RtwqResult<CancelTicket> {
        let pending = self.pending.lock();
        let item = pending
            .iter()
            .find(|item| item.key() == Some(key))
            .cloned()
            .ok_or(RtwqError::NotFound)?;
        Ok(CancelTicket::new(Arc::clone(self), item))
    }

    /// Cancel the pending item registered under `key`
    ///
    /// Blocks while a firing of the item is in progress. Must not be called
    /// with any queue lock held.
    pub(crate) fn cancel(self: &Arc<Self>, key: WorkItemKey) -> RtwqResult<()> {
        let ticket = self.find_pending(key)?;
        ticket.detach_and_wait_quiescent().finalize_release()
    }

    /// Route `result` to its callback's preferred queue
    pub(crate) fn invoke_async_callback(&self, result: &AsyncResult) {
        let outcome = match self.platform() {
            Some(platform) => platform.invoke_async_callback(result),
            None => Err(RtwqError::ShuttingDown),
        };
        if let Err(err) = outcome {
            warn!(queue = %self.name, error = %err, "dropping callback invocation");
        }
    }

    /// Tear the queue down; pending items are discarded without invocation
    pub(crate) fn shutdown(&self) {
        let closed = match &self.kind {
            QueueKind::Pool(pool) => pool.shutdown(&self.name),
            QueueKind::Serial(serial) => serial.shutdown(),
        };
        if !closed {
            return;
        }

        let drained: Vec<Arc<WorkItem>> = self.pending.lock().drain(..).collect();
        for item in &drained {
            item.transition(ItemState::Pending, ItemState::Cancelled);
            drop(item.take_registration());
        }

        if let QueueKind::Serial(serial) = &self.kind {
            if let Some(platform) = self.platform() {
                if let Err(err) = platform.unlock_work_queue(serial.target()) {
                    warn!(queue = %self.name, target = %serial.target(), error = %err, "failed to release target queue");
                }
            }
        }

        debug!(queue = %self.name, discarded = drained.len(), "queue shut down");
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
