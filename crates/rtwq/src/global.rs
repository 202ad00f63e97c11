//! Process-wide platform
//!
//! Free functions forwarding to one lazily built `Platform`, configured
//! from the environment on first use.

use crate::callback::AsyncCallback;
use crate::config::PlatformConfig;
use crate::error::RtwqResult;
use crate::ids::{PeriodicKey, QueueId, QueueType, WorkItemKey};
use crate::platform::Platform;
use crate::result::{AsyncObject, AsyncResult};
use once_cell::sync::Lazy;
use rtwq_pool::Event;
use std::sync::Arc;
use std::time::Duration;

static PLATFORM: Lazy<Platform> = Lazy::new(|| Platform::new(PlatformConfig::from_env()));

/// The process-wide platform behind the free functions
pub fn global_platform() -> &'static Platform {
    &PLATFORM
}

/// Start the process-wide platform
pub fn startup() -> RtwqResult<()> {
    PLATFORM.startup()
}

/// Undo one `startup`
pub fn shutdown() -> RtwqResult<()> {
    PLATFORM.shutdown()
}

/// See [`Platform::lock_platform`]
pub fn lock_platform() -> RtwqResult<()> {
    PLATFORM.lock_platform()
}

/// See [`Platform::unlock_platform`]
pub fn unlock_platform() -> RtwqResult<()> {
    PLATFORM.unlock_platform()
}

/// See [`Platform::create_result`]
pub fn create_async_result(
    object: Option<AsyncObject>,
    callback: Option<Arc<dyn AsyncCallback>>,
    state: Option<AsyncObject>,
) -> RtwqResult<AsyncResult> {
    PLATFORM.create_result(object, callback, state)
}

/// See [`Platform::invoke_callback`]
pub fn invoke_callback(result: &AsyncResult) -> RtwqResult<()> {
    PLATFORM.invoke_callback(result)
}

/// See [`Platform::put_work_item`]
pub fn put_work_item(queue: QueueId, priority: i32, result: &AsyncResult) -> RtwqResult<()> {
    PLATFORM.put_work_item(queue, priority, result)
}

/// See [`Platform::schedule_work_item`]
pub fn schedule_work_item(result: &AsyncResult, timeout: Duration) -> RtwqResult<()> {
    PLATFORM.schedule_work_item(result, timeout)
}

/// See [`Platform::schedule_cancelable_work_item`]
pub fn schedule_cancelable_work_item(result: &AsyncResult, timeout: Duration) -> RtwqResult<WorkItemKey> {
    PLATFORM.schedule_cancelable_work_item(result, timeout)
}

/// See [`Platform::put_waiting_work_item`]
pub fn put_waiting_work_item(event: &Event, priority: i32, result: &AsyncResult) -> RtwqResult<()> {
    PLATFORM.put_waiting_work_item(event, priority, result)
}

/// See [`Platform::put_cancelable_waiting_work_item`]
pub fn put_cancelable_waiting_work_item(event: &Event, priority: i32, result: &AsyncResult) -> RtwqResult<WorkItemKey> {
    PLATFORM.put_cancelable_waiting_work_item(event, priority, result)
}

/// See [`Platform::cancel_work_item`]
pub fn cancel_work_item(key: WorkItemKey) -> RtwqResult<()> {
    PLATFORM.cancel_work_item(key)
}

/// See [`Platform::add_periodic_callback`]
pub fn add_periodic_callback<F>(callback: F, context: Option<AsyncObject>) -> RtwqResult<PeriodicKey>
where
    F: Fn(Option<AsyncObject>) + Send + Sync + 'static,
{
    PLATFORM.add_periodic_callback(callback, context)
}

/// See [`Platform::remove_periodic_callback`]
pub fn remove_periodic_callback(key: PeriodicKey) -> RtwqResult<()> {
    PLATFORM.remove_periodic_callback(key)
}

/// See [`Platform::allocate_work_queue`]
pub fn allocate_work_queue(queue_type: QueueType) -> RtwqResult<QueueId> {
    PLATFORM.allocate_work_queue(queue_type)
}

/// See [`Platform::allocate_serial_work_queue`]
pub fn allocate_serial_work_queue(target: QueueId) -> RtwqResult<QueueId> {
    PLATFORM.allocate_serial_work_queue(target)
}

/// See [`Platform::lock_work_queue`]
pub fn lock_work_queue(queue: QueueId) -> RtwqResult<()> {
    PLATFORM.lock_work_queue(queue)
}

/// See [`Platform::unlock_work_queue`]
pub fn unlock_work_queue(queue: QueueId) -> RtwqResult<()> {
    PLATFORM.unlock_work_queue(queue)
}

/// See [`Platform::set_long_running`]
pub fn set_long_running(queue: QueueId, enable: bool) -> RtwqResult<()> {
    PLATFORM.set_long_running(queue, enable)
}

/// See [`Platform::lock_shared_work_queue`]
pub fn lock_shared_work_queue(usage_class: &str, base_priority: i32) -> RtwqResult<(QueueId, u32)> {
    PLATFORM.lock_shared_work_queue(usage_class, base_priority)
}
