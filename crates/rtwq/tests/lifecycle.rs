//! Platform Lifecycle Tests
//!
//! Startup nesting, handles, the result cache and teardown:
//! - Nested startup/shutdown and the platform lock
//! - Stale handle detection and slot exhaustion
//! - Recycled results come back cleared
//! - Shutdown empties the cache and closes the system queues
//! - Unsupported operations and the process-wide functions
//!
//! # Running Tests
//! ```bash
//! cargo test -p rtwq --test lifecycle
//! ```

use crossbeam::channel;
use rtwq::{
    AsyncObject, AsyncResult, FnCallback, Platform, PlatformConfig, QueueId, QueueType, RtwqError,
};
use rtwq_pool::RuntimeEnvironment;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn platform(prefix: &str) -> Platform {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Platform::with_runtime(
        PlatformConfig::default().with_thread_name_prefix(prefix),
        Arc::new(RuntimeEnvironment::new()),
    )
}

// ===== Startup and Shutdown =====

#[test]
fn test_startup_nesting() {
    let platform = platform("l-nest");
    assert_eq!(platform.startup_count(), 0);

    platform.startup().unwrap();
    platform.startup().unwrap();
    assert_eq!(platform.startup_count(), 2);
    assert_eq!(platform.platform_lock_count(), 1);

    platform.shutdown().unwrap();
    assert_eq!(platform.startup_count(), 1);
    let queue = platform.allocate_work_queue(QueueType::Standard).unwrap();
    platform.unlock_work_queue(queue).unwrap();

    platform.shutdown().unwrap();
    assert_eq!(platform.startup_count(), 0);
    assert_eq!(platform.platform_lock_count(), 0);

    // Unbalanced shutdowns are ignored.
    platform.shutdown().unwrap();
    assert_eq!(platform.startup_count(), 0);
}

#[test]
fn test_runtime_usage_tracks_startup() {
    let runtime = Arc::new(RuntimeEnvironment::new());
    let platform = Platform::with_runtime(PlatformConfig::default(), Arc::clone(&runtime));

    platform.startup().unwrap();
    assert_eq!(runtime.usage_count(), 1);
    platform.shutdown().unwrap();
    assert_eq!(runtime.usage_count(), 0);
}

#[test]
fn test_requires_startup() {
    let platform = platform("l-stopped");
    assert_eq!(
        platform.allocate_work_queue(QueueType::Standard),
        Err(RtwqError::ShuttingDown)
    );
    assert_eq!(
        platform.allocate_serial_work_queue(QueueId::STANDARD),
        Err(RtwqError::ShuttingDown)
    );
    assert_eq!(
        platform.create_result(None, None, None).err(),
        Some(RtwqError::ShuttingDown)
    );
}

#[test]
fn test_platform_lock_keeps_results_available() {
    let platform = platform("l-lock");
    platform.lock_platform().unwrap();

    let result = platform.create_result(None, None, None).unwrap();
    assert_eq!(platform.platform_lock_count(), 2);

    // Not started: the released body is freed rather than cached.
    drop(result);
    assert_eq!(platform.cached_result_count(), 0);
    assert_eq!(platform.platform_lock_count(), 1);

    platform.unlock_platform().unwrap();
    platform.unlock_platform().unwrap();
    assert_eq!(platform.platform_lock_count(), 0);
}

// ===== Handles =====

#[test]
fn test_stale_handle_after_slot_reuse() {
    let platform = Platform::new(
        PlatformConfig::default()
            .with_max_user_queues(1)
            .with_thread_name_prefix("l-stale"),
    );
    platform.startup().unwrap();

    let old = platform.allocate_work_queue(QueueType::Standard).unwrap();
    platform.unlock_work_queue(old).unwrap();
    let new = platform.allocate_work_queue(QueueType::Standard).unwrap();

    assert_eq!(old.value() >> 16, new.value() >> 16);
    assert_ne!(old, new);
    assert_eq!(platform.lock_work_queue(old), Err(RtwqError::InvalidQueue));
    assert_eq!(platform.unlock_work_queue(old), Err(RtwqError::InvalidQueue));
    assert_eq!(platform.set_long_running(old, true), Err(RtwqError::InvalidQueue));

    let result = platform.create_result(None, None, None).unwrap();
    assert_eq!(
        platform.put_work_item(old, 0, &result),
        Err(RtwqError::InvalidQueue)
    );

    platform.unlock_work_queue(new).unwrap();
    platform.shutdown().unwrap();
}

#[test]
fn test_slot_exhaustion() {
    let platform = Platform::new(
        PlatformConfig::default()
            .with_max_user_queues(2)
            .with_thread_name_prefix("l-full"),
    );
    platform.startup().unwrap();

    let first = platform.allocate_work_queue(QueueType::Standard).unwrap();
    let second = platform.allocate_serial_work_queue(first).unwrap();
    assert_eq!(
        platform.allocate_work_queue(QueueType::Standard),
        Err(RtwqError::OutOfResources)
    );
    assert_eq!(
        platform.allocate_serial_work_queue(first),
        Err(RtwqError::OutOfResources)
    );
    assert_eq!(platform.user_queue_count(), 2);

    // The failed serial allocation gave its target reference back.
    platform.unlock_work_queue(second).unwrap();
    platform.unlock_work_queue(first).unwrap();
    assert_eq!(platform.user_queue_count(), 0);
    platform.shutdown().unwrap();
}

// ===== Result Cache =====

#[test]
fn test_recycled_result_is_cleared() {
    let platform = platform("l-cache");
    platform.startup().unwrap();

    let callback = FnCallback::new(|_: &AsyncResult| {}).into_callback();
    let object: AsyncObject = Arc::new(String::from("object"));
    let state: AsyncObject = Arc::new(5u8);
    let used = platform
        .create_result(Some(object), Some(callback), Some(state))
        .unwrap();
    used.set_status(Err(RtwqError::Cancelled));
    drop(used);
    assert_eq!(platform.cached_result_count(), 1);

    let reused = platform.create_result(None, None, None).unwrap();
    assert_eq!(platform.cached_result_count(), 0);
    assert_eq!(reused.object().err(), Some(RtwqError::NoObject));
    assert!(reused.state().is_none());
    assert!(reused.callback().is_none());
    assert_eq!(reused.status(), Ok(()));
    assert!(reused.event().is_none());

    drop(reused);
    platform.shutdown().unwrap();
}

#[test]
fn test_shutdown_drains() {
    let platform = platform("l-drain");
    platform.startup().unwrap();

    let (tx, rx) = channel::unbounded();
    let callback = FnCallback::new(move |_: &AsyncResult| {
        let _ = tx.send(());
    })
    .into_callback();
    let result = platform.create_result(None, Some(callback), None).unwrap();
    platform.put_work_item(QueueId::STANDARD, 0, &result).unwrap();
    rx.recv_timeout(TIMEOUT).unwrap();

    for _ in 0..3 {
        drop(platform.create_result(None, None, None).unwrap());
    }
    assert!(platform.cached_result_count() > 0);

    platform.shutdown().unwrap();
    assert_eq!(platform.cached_result_count(), 0);
    assert_eq!(
        platform.put_work_item(QueueId::STANDARD, 0, &result),
        Err(RtwqError::ShuttingDown)
    );
    assert_eq!(
        platform.put_work_item(QueueId::TIMER, 0, &result),
        Err(RtwqError::ShuttingDown)
    );
    assert_eq!(
        platform.schedule_work_item(&result, Duration::ZERO),
        Err(RtwqError::ShuttingDown)
    );

    // Released after shutdown: freed, never cached.
    drop(result);
    assert_eq!(platform.cached_result_count(), 0);

    platform.startup().unwrap();
    let result = platform.create_result(None, None, None).unwrap();
    platform.put_work_item(QueueId::STANDARD, 0, &result).unwrap();
    platform.shutdown().unwrap();
}

#[test]
fn test_user_queues_outlive_shutdown() {
    let platform = platform("l-userq");
    platform.startup().unwrap();
    let queue = platform.allocate_work_queue(QueueType::MultiThreaded).unwrap();
    platform.shutdown().unwrap();

    // User queues are owned by their handles, not by the startup count.
    assert_eq!(platform.user_queue_count(), 1);
    platform.unlock_work_queue(queue).unwrap();
    assert_eq!(platform.user_queue_count(), 0);
}

// ===== Unsupported Operations =====

#[test]
fn test_unsupported_operations() {
    let platform = platform("l-unsupported");
    platform.startup().unwrap();
    let queue = QueueId::STANDARD;

    assert_eq!(
        platform.register_work_queue_with_mmcss(queue, "Audio", 0, 0),
        Err(RtwqError::Unsupported)
    );
    assert_eq!(
        platform.unregister_work_queue_with_mmcss(queue),
        Err(RtwqError::Unsupported)
    );
    assert_eq!(
        platform.work_queue_mmcss_class(queue),
        Err(RtwqError::Unsupported)
    );
    assert_eq!(
        platform.register_platform_with_mmcss("Audio", 0),
        Err(RtwqError::Unsupported)
    );
    assert_eq!(
        platform.unregister_platform_from_mmcss(),
        Err(RtwqError::Unsupported)
    );
    assert_eq!(
        platform.set_deadline(Duration::from_millis(1)),
        Err(RtwqError::Unsupported)
    );
    assert_eq!(platform.cancel_deadline(1), Err(RtwqError::Unsupported));
    assert_eq!(platform.join_work_queue(queue, 1), Err(RtwqError::Unsupported));
    assert_eq!(platform.unjoin_work_queue(queue, 1), Err(RtwqError::Unsupported));

    platform.shutdown().unwrap();
}

// ===== Process-wide Platform =====

#[test]
fn test_global_functions() {
    rtwq::startup().unwrap();

    let (tx, rx) = channel::unbounded();
    let callback = FnCallback::new(move |result: &AsyncResult| {
        let _ = tx.send(result.status());
    })
    .into_callback();
    let result = rtwq::create_async_result(None, Some(callback), None).unwrap();

    let queue = rtwq::allocate_work_queue(QueueType::Standard).unwrap();
    rtwq::put_work_item(queue, 0, &result).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Ok(()));

    let key = rtwq::schedule_cancelable_work_item(&result, Duration::from_secs(30)).unwrap();
    rtwq::cancel_work_item(key).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Err(RtwqError::Cancelled));

    rtwq::unlock_work_queue(queue).unwrap();
    assert!(rtwq::global_platform().startup_count() >= 1);
    drop(result);
    rtwq::shutdown().unwrap();
}
