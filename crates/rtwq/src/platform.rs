//! Work queue platform
//!
//! Owns the startup and platform lock counters, the result cache, the
//! system queues and the user queue handle table. Lock order: the system
//! queue lock and the handle table lock are never held while calling into
//! a queue, and no queue lock is held while calling back into the platform.

use crate::cache::ResultCache;
use crate::callback::AsyncCallback;
use crate::config::PlatformConfig;
use crate::error::{RtwqError, RtwqResult};
use crate::handles::HandleTable;
use crate::ids::{KeyKind, PeriodicKey, QueueId, QueueType, WorkItemKey, SYSTEM_QUEUE_COUNT};
use crate::item::{ItemKind, WorkItem};
use crate::lifecycle::Counters;
use crate::periodic::PeriodicCallback;
use crate::queue::{Queue, QueueKind};
use crate::result::{AsyncObject, AsyncResult};
use parking_lot::Mutex;
use rtwq_pool::{Event, RuntimeEnvironment, UsageCookie};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

struct SystemQueues {
    queues: [Option<Arc<Queue>>; SYSTEM_QUEUE_COUNT],
    usage: Option<UsageCookie>,
}

impl SystemQueues {
    fn has_standard(&self) -> bool {
        self.queues[QueueId::STANDARD.0 as usize].is_some()
    }
}

pub(crate) struct PlatformInner {
    config: PlatformConfig,
    counters: Arc<Counters>,
    cache: Arc<ResultCache>,
    system: Mutex<SystemQueues>,
    table: HandleTable<Arc<Queue>>,
    runtime: Arc<RuntimeEnvironment>,
    next_key: AtomicU32,
    next_queue: AtomicU32,
}

impl PlatformInner {
    pub(crate) fn create_result(
        &self,
        object: Option<AsyncObject>,
        callback: Option<Arc<dyn AsyncCallback>>,
        state: Option<AsyncObject>,
    ) -> RtwqResult<AsyncResult> {
        self.cache.create(object, callback, state)
    }

    fn create_pool_queue(self: &Arc<Self>, label: &str, max_threads: usize) -> Arc<Queue> {
        let name = format!(
            "{}-{}{}",
            self.config.thread_name_prefix,
            label,
            self.next_queue.fetch_add(1, Ordering::Relaxed)
        );
        Queue::new_pool(self, name, max_threads, self.config.join_timeout)
    }

    fn create_system_queue(self: &Arc<Self>, id: QueueId) -> Arc<Queue> {
        let max_threads = if id.is_wide_system_queue() {
            self.config.wide_concurrency
        } else {
            self.config.standard_concurrency
        };
        self.create_pool_queue("sys", max_threads)
    }

    /// Resolve a system id (creating the queue on first use) or a user handle
    pub(crate) fn grab_queue(self: &Arc<Self>, id: QueueId) -> RtwqResult<Arc<Queue>> {
        {
            let mut system = self.system.lock();
            if !system.has_standard() {
                return Err(RtwqError::ShuttingDown);
            }
            if let Some(index) = id.system_index() {
                let slot = &mut system.queues[index];
                if let Some(queue) = slot {
                    return Ok(Arc::clone(queue));
                }
                let queue = self.create_system_queue(id);
                debug!(queue = %id, "system queue created");
                *slot = Some(Arc::clone(&queue));
                return Ok(queue);
            }
        }

        if !id.is_private() {
            return Err(RtwqError::InvalidQueue);
        }
        self.table.resolve(id)
    }

    pub(crate) fn lock_work_queue(&self, id: QueueId) -> RtwqResult<()> {
        if !id.is_private() {
            return Ok(());
        }
        self.table.lock(id)
    }

    pub(crate) fn unlock_work_queue(&self, id: QueueId) -> RtwqResult<()> {
        if !id.is_private() {
            return Ok(());
        }
        if let Some(queue) = self.table.unlock(id)? {
            debug!(queue = %id, "last reference released");
            queue.shutdown();
        }
        Ok(())
    }

    pub(crate) fn put_work_item(self: &Arc<Self>, id: QueueId, priority: i32, result: &AsyncResult) -> RtwqResult<()> {
        let queue = self.grab_queue(id)?;
        let item = WorkItem::new(&queue, result.clone(), priority, ItemKind::Immediate, None);
        trace!(queue = %id, priority, "dispatching work item");
        queue.submit(item)
    }

    /// Put `result` on its callback's preferred queue
    ///
    /// Unreadable parameters and unusable queues fall back to the standard
    /// queue rather than dropping the work.
    pub(crate) fn invoke_async_callback(self: &Arc<Self>, result: &AsyncResult) -> RtwqResult<()> {
        let preferred = match result.callback().map(|callback| callback.parameters()) {
            Some(Ok(params)) => params.queue,
            Some(Err(err)) => {
                warn!(error = %err, "callback parameters unavailable, using standard queue");
                QueueId::STANDARD
            }
            None => QueueId::STANDARD,
        };

        let queue = match self.lock_work_queue(preferred) {
            Ok(()) => preferred,
            Err(err) => {
                warn!(queue = %preferred, error = %err, "preferred queue unusable, using standard queue");
                QueueId::STANDARD
            }
        };

        let outcome = match self.put_work_item(queue, 0, result) {
            Err(RtwqError::InvalidQueue) if queue != QueueId::STANDARD => {
                warn!(queue = %queue, "preferred queue rejected work, using standard queue");
                self.put_work_item(QueueId::STANDARD, 0, result)
            }
            outcome => outcome,
        };

        if let Err(err) = self.unlock_work_queue(queue) {
            warn!(queue = %queue, error = %err, "failed to unlock queue");
        }
        outcome
    }

    fn next_key(&self, kind: KeyKind) -> WorkItemKey {
        loop {
            let low = self.next_key.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if low != 0 {
                return WorkItemKey::new(kind, low);
            }
        }
    }

    fn submit_timer(
        self: &Arc<Self>,
        result: &AsyncResult,
        due: Duration,
        period: Option<Duration>,
        cancelable: bool,
    ) -> RtwqResult<Option<WorkItemKey>> {
        let queue = self.grab_queue(QueueId::TIMER)?;
        let key = cancelable.then(|| self.next_key(KeyKind::Scheduled));
        queue.submit_timer(result, due, period, key)?;
        Ok(key)
    }

    fn submit_wait(
        self: &Arc<Self>,
        event: &Event,
        priority: i32,
        result: &AsyncResult,
        cancelable: bool,
    ) -> RtwqResult<Option<WorkItemKey>> {
        let queue = self.grab_queue(QueueId::TIMER)?;
        let key = cancelable.then(|| self.next_key(KeyKind::Wait));
        queue.submit_wait(event, priority, result, key)?;
        Ok(key)
    }

    fn cancel(self: &Arc<Self>, key: WorkItemKey) -> RtwqResult<()> {
        let queue = self.grab_queue(QueueId::TIMER)?;
        if key.kind().is_none() {
            warn!(?key, "unknown work item key type");
            return Err(RtwqError::NotFound);
        }
        queue.cancel(key)
    }
}

impl Drop for PlatformInner {
    fn drop(&mut self) {
        if let Some(cookie) = self.system.get_mut().usage.take() {
            if let Err(err) = self.runtime.decrement_usage(cookie) {
                warn!(error = %err, "failed to release runtime usage");
            }
        }
    }
}

/// Work queue platform instance
///
/// Cloning yields another handle to the same platform. Most programs use
/// the process-wide instance behind the crate's free functions; separate
/// instances are fully isolated from each other.
#[derive(Clone)]
pub struct Platform {
    inner: Arc<PlatformInner>,
}

impl Platform {
    /// Create a stopped platform using the shared runtime environment
    pub fn new(config: PlatformConfig) -> Self {
        Self::with_runtime(config, RuntimeEnvironment::shared())
    }

    /// Create a stopped platform tracking its usage on `runtime`
    pub fn with_runtime(config: PlatformConfig, runtime: Arc<RuntimeEnvironment>) -> Self {
        let counters = Arc::new(Counters::new());
        let cache = ResultCache::new(Arc::clone(&counters));
        let table = HandleTable::new(config.max_user_queues);
        Self {
            inner: Arc::new(PlatformInner {
                config,
                counters,
                cache,
                system: Mutex::new(SystemQueues {
                    queues: Default::default(),
                    usage: None,
                }),
                table,
                runtime,
                next_key: AtomicU32::new(0),
                next_queue: AtomicU32::new(0),
            }),
        }
    }

    /// Configuration the platform was built with
    pub fn config(&self) -> &PlatformConfig {
        &self.inner.config
    }

    // ===== Lifecycle =====

    /// Start the platform; nested calls only count
    ///
    /// The first call locks the platform, takes a runtime usage cookie and
    /// creates the standard queue.
    pub fn startup(&self) -> RtwqResult<()> {
        let inner = &self.inner;
        let mut system = inner.system.lock();
        if inner.counters.increment_startup() != 1 {
            return Ok(());
        }

        inner.counters.lock_platform();
        system.usage = Some(inner.runtime.increment_usage());
        system.queues[QueueId::STANDARD.0 as usize] = Some(inner.create_system_queue(QueueId::STANDARD));
        debug!("work queue platform started");
        Ok(())
    }

    /// Undo one `startup`
    ///
    /// The last call tears down every system queue, returns the runtime
    /// usage cookie, empties the result cache and unlocks the platform.
    /// Calls without a matching `startup` are ignored.
    pub fn shutdown(&self) -> RtwqResult<()> {
        let inner = &self.inner;
        let (queues, usage) = {
            let mut system = inner.system.lock();
            match inner.counters.decrement_startup() {
                Some(0) => {}
                Some(_) => return Ok(()),
                None => {
                    debug!("shutdown without startup ignored");
                    return Ok(());
                }
            }
            (std::mem::take(&mut system.queues), system.usage.take())
        };

        for queue in queues.into_iter().flatten() {
            queue.shutdown();
        }
        if let Some(cookie) = usage {
            if let Err(err) = inner.runtime.decrement_usage(cookie) {
                warn!(error = %err, "failed to release runtime usage");
            }
        }
        let freed = inner.cache.clear();
        inner.counters.unlock_platform();
        debug!(freed_results = freed, "work queue platform shut down");
        Ok(())
    }

    /// Keep result storage valid across an operation outliving one call
    pub fn lock_platform(&self) -> RtwqResult<()> {
        self.inner.counters.lock_platform();
        Ok(())
    }

    /// Release a `lock_platform`
    pub fn unlock_platform(&self) -> RtwqResult<()> {
        self.inner.counters.unlock_platform();
        Ok(())
    }

    /// Current startup count
    pub fn startup_count(&self) -> i32 {
        self.inner.counters.startup_count()
    }

    /// Current platform lock count
    pub fn platform_lock_count(&self) -> i32 {
        self.inner.counters.platform_lock_count()
    }

    /// Number of result bodies waiting in the cache
    pub fn cached_result_count(&self) -> usize {
        self.inner.cache.len()
    }

    /// Number of live user queues
    pub fn user_queue_count(&self) -> usize {
        self.inner.table.live_count()
    }

    // ===== Results =====

    /// Allocate a result
    pub fn create_result(
        &self,
        object: Option<AsyncObject>,
        callback: Option<Arc<dyn AsyncCallback>>,
        state: Option<AsyncObject>,
    ) -> RtwqResult<AsyncResult> {
        self.inner.create_result(object, callback, state)
    }

    /// Run `result`'s callback on the queue it prefers
    pub fn invoke_callback(&self, result: &AsyncResult) -> RtwqResult<()> {
        self.inner.invoke_async_callback(result)
    }

    // ===== Work items =====

    /// Run `result`'s callback on `queue`
    ///
    /// Positive priorities go to the high lane, negative ones to the low
    /// lane. Never blocks.
    pub fn put_work_item(&self, queue: QueueId, priority: i32, result: &AsyncResult) -> RtwqResult<()> {
        self.inner.put_work_item(queue, priority, result)
    }

    /// Invoke `result`'s callback after `timeout`
    pub fn schedule_work_item(&self, result: &AsyncResult, timeout: Duration) -> RtwqResult<()> {
        self.inner.submit_timer(result, timeout, None, false).map(|_| ())
    }

    /// Like `schedule_work_item`, returning a key for `cancel_work_item`
    pub fn schedule_cancelable_work_item(&self, result: &AsyncResult, timeout: Duration) -> RtwqResult<WorkItemKey> {
        self.inner
            .submit_timer(result, timeout, None, true)?
            .ok_or(RtwqError::OutOfResources)
    }

    /// Invoke `result`'s callback once `event` is signaled
    pub fn put_waiting_work_item(&self, event: &Event, priority: i32, result: &AsyncResult) -> RtwqResult<()> {
        self.inner.submit_wait(event, priority, result, false).map(|_| ())
    }

    /// Like `put_waiting_work_item`, returning a key for `cancel_work_item`
    pub fn put_cancelable_waiting_work_item(
        &self,
        event: &Event,
        priority: i32,
        result: &AsyncResult,
    ) -> RtwqResult<WorkItemKey> {
        self.inner
            .submit_wait(event, priority, result, true)?
            .ok_or(RtwqError::OutOfResources)
    }

    /// Cancel a pending timer or wait item
    ///
    /// Blocks until a firing in progress has finished. If the item had not
    /// fired, its callback runs with a `Cancelled` status. Fails with
    /// `NotFound` when the item already fired or was already cancelled.
    pub fn cancel_work_item(&self, key: WorkItemKey) -> RtwqResult<()> {
        self.inner.cancel(key)
    }

    // ===== Periodic callbacks =====

    /// Call `callback` with `context` on the timer queue every period
    pub fn add_periodic_callback<F>(&self, callback: F, context: Option<AsyncObject>) -> RtwqResult<PeriodicKey>
    where
        F: Fn(Option<AsyncObject>) + Send + Sync + 'static,
    {
        let callback: Arc<dyn AsyncCallback> = Arc::new(PeriodicCallback::new(callback));
        let result = self.inner.create_result(context, Some(callback), None)?;
        let key = self
            .inner
            .submit_timer(&result, Duration::ZERO, Some(self.inner.config.periodic_interval), true)?
            .ok_or(RtwqError::OutOfResources)?;
        Ok(PeriodicKey::from_item_key(key))
    }

    /// Stop a periodic callback; no final invocation is made
    pub fn remove_periodic_callback(&self, key: PeriodicKey) -> RtwqResult<()> {
        self.inner.cancel(key.item_key())
    }

    // ===== Queues =====

    /// Allocate a user pool queue with a reference count of one
    pub fn allocate_work_queue(&self, queue_type: QueueType) -> RtwqResult<QueueId> {
        let inner = &self.inner;
        if !inner.counters.is_started() {
            return Err(RtwqError::ShuttingDown);
        }

        let max_threads = match queue_type {
            QueueType::Standard => inner.config.standard_concurrency,
            QueueType::Window => {
                warn!("window queues are not supported, allocating a standard queue");
                inner.config.standard_concurrency
            }
            QueueType::MultiThreaded => inner.config.wide_concurrency,
        };

        let queue = inner.create_pool_queue("user", max_threads);
        match inner.table.allocate(Arc::clone(&queue)) {
            Ok(id) => {
                debug!(queue = %id, ?queue_type, "allocated work queue");
                Ok(id)
            }
            Err(err) => {
                queue.shutdown();
                Err(err)
            }
        }
    }

    /// Allocate a serial queue forwarding to `target`
    ///
    /// The target stays locked for the serial queue's lifetime.
    pub fn allocate_serial_work_queue(&self, target: QueueId) -> RtwqResult<QueueId> {
        let inner = &self.inner;
        if !inner.counters.is_started() {
            return Err(RtwqError::ShuttingDown);
        }

        inner.lock_work_queue(target)?;
        if let Err(err) = inner.grab_queue(target) {
            if let Err(unlock) = inner.unlock_work_queue(target) {
                warn!(%target, error = %unlock, "failed to unlock target queue");
            }
            return Err(err);
        }
        let name = format!(
            "{}-serial{}",
            inner.config.thread_name_prefix,
            inner.next_queue.fetch_add(1, Ordering::Relaxed)
        );
        let queue = Queue::new_serial(inner, name, target);
        match inner.table.allocate(Arc::clone(&queue)) {
            Ok(id) => {
                if let QueueKind::Serial(serial) = queue.kind() {
                    serial.bind_id(id);
                }
                debug!(queue = %id, %target, "allocated serial work queue");
                Ok(id)
            }
            Err(err) => {
                // Shutting the queue down releases the target again.
                queue.shutdown();
                Err(err)
            }
        }
    }

    /// Add a reference to a user queue; system ids are accepted as is
    pub fn lock_work_queue(&self, queue: QueueId) -> RtwqResult<()> {
        self.inner.lock_work_queue(queue)
    }

    /// Drop a reference to a user queue, tearing it down at zero
    pub fn unlock_work_queue(&self, queue: QueueId) -> RtwqResult<()> {
        self.inner.unlock_work_queue(queue)
    }

    /// Let callbacks of `queue` run long without starving the pool
    pub fn set_long_running(&self, queue: QueueId, enable: bool) -> RtwqResult<()> {
        let inner = &self.inner;
        inner.lock_work_queue(queue)?;
        let outcome = inner
            .grab_queue(queue)
            .map(|resolved| resolved.set_long_running(enable));
        if let Err(err) = inner.unlock_work_queue(queue) {
            warn!(%queue, error = %err, "failed to unlock queue");
        }
        outcome
    }

    /// Lock the shared queue for a usage class: always the standard queue
    ///
    /// Returns the queue and a task id of 0.
    pub fn lock_shared_work_queue(&self, usage_class: &str, base_priority: i32) -> RtwqResult<(QueueId, u32)> {
        if !usage_class.is_empty() {
            warn!(usage_class, base_priority, "usage classes are not supported");
        }
        self.inner.grab_queue(QueueId::STANDARD)?;
        self.inner.lock_work_queue(QueueId::STANDARD)?;
        Ok((QueueId::STANDARD, 0))
    }

    // ===== Unsupported =====

    /// Not supported
    pub fn register_work_queue_with_mmcss(
        &self,
        _queue: QueueId,
        _class: &str,
        _task_id: u32,
        _priority: i32,
    ) -> RtwqResult<u32> {
        Err(RtwqError::Unsupported)
    }

    /// Not supported
    pub fn unregister_work_queue_with_mmcss(&self, _queue: QueueId) -> RtwqResult<()> {
        Err(RtwqError::Unsupported)
    }

    /// Not supported
    pub fn work_queue_mmcss_class(&self, _queue: QueueId) -> RtwqResult<String> {
        Err(RtwqError::Unsupported)
    }

    /// Not supported
    pub fn register_platform_with_mmcss(&self, _class: &str, _base_priority: i32) -> RtwqResult<u32> {
        Err(RtwqError::Unsupported)
    }

    /// Not supported
    pub fn unregister_platform_from_mmcss(&self) -> RtwqResult<()> {
        Err(RtwqError::Unsupported)
    }

    /// Not supported
    pub fn set_deadline(&self, _deadline: Duration) -> RtwqResult<u64> {
        Err(RtwqError::Unsupported)
    }

    /// Not supported
    pub fn cancel_deadline(&self, _handle: u64) -> RtwqResult<()> {
        Err(RtwqError::Unsupported)
    }

    /// Not supported
    pub fn join_work_queue(&self, _queue: QueueId, _handle: u64) -> RtwqResult<u64> {
        Err(RtwqError::Unsupported)
    }

    /// Not supported
    pub fn unjoin_work_queue(&self, _queue: QueueId, _cookie: u64) -> RtwqResult<()> {
        Err(RtwqError::Unsupported)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new(PlatformConfig::default())
    }
}
