//! Serial Queue Tests
//!
//! Ordering and completion detection of serial queues:
//! - Strict submission order with one item in flight
//! - Reply-mode acknowledgement advancing the head
//! - Mismatched and duplicate acknowledgements
//! - Serial queues chained to serial queues
//!
//! # Running Tests
//! ```bash
//! cargo test -p rtwq --test serial_queue
//! ```

use crossbeam::channel;
use parking_lot::Mutex;
use rtwq::{
    AsyncResult, CallbackFlags, FnCallback, Platform, PlatformConfig, QueueId, QueueType, RtwqError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(100);

fn started(prefix: &str) -> Platform {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let platform = Platform::new(PlatformConfig::default().with_thread_name_prefix(prefix));
    platform.startup().unwrap();
    platform
}

/// Records the order callbacks ran in and whether two ever overlapped
#[derive(Default)]
struct Recorder {
    order: Mutex<Vec<&'static str>>,
    active: AtomicUsize,
    overlapped: AtomicBool,
}

impl Recorder {
    fn run(&self, label: &'static str) {
        if self.active.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        thread::sleep(Duration::from_millis(10));
        self.order.lock().push(label);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn order(&self) -> Vec<&'static str> {
        self.order.lock().clone()
    }
}

fn submit_labeled(
    platform: &Platform,
    queue: QueueId,
    recorder: &Arc<Recorder>,
    tx: &channel::Sender<&'static str>,
    label: &'static str,
) {
    let (recorder, tx) = (Arc::clone(recorder), tx.clone());
    let callback = FnCallback::new(move |_: &AsyncResult| {
        recorder.run(label);
        let _ = tx.send(label);
    })
    .into_callback();
    let result = platform.create_result(None, Some(callback), None).unwrap();
    platform.put_work_item(queue, 0, &result).unwrap();
}

// ===== Ordering =====

#[test]
fn test_items_run_in_submission_order() {
    let platform = started("s-order");
    let target = platform.allocate_work_queue(QueueType::Standard).unwrap();
    let serial = platform.allocate_serial_work_queue(target).unwrap();
    let recorder = Arc::new(Recorder::default());
    let (tx, rx) = channel::unbounded();

    for label in ["A", "B", "C"] {
        submit_labeled(&platform, serial, &recorder, &tx, label);
    }
    for _ in 0..3 {
        rx.recv_timeout(TIMEOUT).unwrap();
    }

    assert_eq!(recorder.order(), vec!["A", "B", "C"]);
    assert!(!recorder.overlapped.load(Ordering::SeqCst));

    platform.unlock_work_queue(serial).unwrap();
    platform.unlock_work_queue(target).unwrap();
    platform.shutdown().unwrap();
}

#[test]
fn test_wide_target_still_one_in_flight() {
    let platform = started("s-wide");
    let serial = platform.allocate_serial_work_queue(QueueId::MULTITHREADED).unwrap();
    let recorder = Arc::new(Recorder::default());
    let (tx, rx) = channel::unbounded();

    let labels = ["1", "2", "3", "4", "5", "6", "7", "8"];
    for label in labels {
        submit_labeled(&platform, serial, &recorder, &tx, label);
    }
    for _ in labels {
        rx.recv_timeout(TIMEOUT).unwrap();
    }

    assert_eq!(recorder.order(), labels.to_vec());
    assert!(!recorder.overlapped.load(Ordering::SeqCst));

    platform.unlock_work_queue(serial).unwrap();
    platform.shutdown().unwrap();
}

#[test]
fn test_serial_queue_holds_its_target() {
    let platform = started("s-hold");
    let target = platform.allocate_work_queue(QueueType::Standard).unwrap();
    let serial = platform.allocate_serial_work_queue(target).unwrap();

    // The serial queue's own reference keeps the target alive.
    platform.unlock_work_queue(target).unwrap();
    let recorder = Arc::new(Recorder::default());
    let (tx, rx) = channel::unbounded();
    submit_labeled(&platform, serial, &recorder, &tx, "A");
    rx.recv_timeout(TIMEOUT).unwrap();

    platform.unlock_work_queue(serial).unwrap();
    assert_eq!(platform.lock_work_queue(target), Err(RtwqError::InvalidQueue));
    assert_eq!(platform.user_queue_count(), 0);
    platform.shutdown().unwrap();
}

#[test]
fn test_serial_target_must_resolve() {
    let platform = started("s-badtarget");
    assert_eq!(
        platform.allocate_serial_work_queue(QueueId(0x0033_0001)),
        Err(RtwqError::InvalidQueue)
    );
    assert_eq!(platform.user_queue_count(), 0);
    platform.shutdown().unwrap();
}

#[test]
fn test_serial_target_must_be_a_known_system_id() {
    let platform = started("s-badsystem");
    for target in [QueueId(6), QueueId::UNDEFINED] {
        assert_eq!(
            platform.allocate_serial_work_queue(target),
            Err(RtwqError::InvalidQueue)
        );
    }
    assert_eq!(platform.user_queue_count(), 0);

    // Well-known ids still work, including lazily created ones.
    let (tx, rx) = channel::unbounded();
    let serial = platform.allocate_serial_work_queue(QueueId::TIMER).unwrap();
    let callback = FnCallback::new(move |_: &AsyncResult| {
        let _ = tx.send(());
    })
    .into_callback();
    let result = platform.create_result(None, Some(callback), None).unwrap();
    platform.put_work_item(serial, 0, &result).unwrap();
    rx.recv_timeout(TIMEOUT).unwrap();

    platform.unlock_work_queue(serial).unwrap();
    platform.shutdown().unwrap();
}

// ===== Reply Mode =====

#[test]
fn test_reply_token_advances_head() {
    let platform = started("s-reply");
    let serial = platform.allocate_serial_work_queue(QueueId::STANDARD).unwrap();
    let (token_tx, token_rx) = channel::unbounded();
    let (tx, rx) = channel::unbounded();

    let head_tx = tx.clone();
    let replying = FnCallback::new(move |token: &AsyncResult| {
        let _ = head_tx.send("A");
        let _ = token_tx.send(token.clone());
    })
    .with_flags(CallbackFlags::REPLY_CALLBACK)
    .into_callback();
    let first = platform.create_result(None, Some(replying), None).unwrap();
    platform.put_work_item(serial, 0, &first).unwrap();

    let recorder = Arc::new(Recorder::default());
    submit_labeled(&platform, serial, &recorder, &tx, "B");

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "A");
    let token = token_rx.recv_timeout(TIMEOUT).unwrap();
    assert!(!token.ptr_eq(&first));

    // A returned, but B stays blocked until the token comes back.
    assert!(rx.recv_timeout(QUIET).is_err());

    platform.invoke_callback(&token).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "B");

    platform.unlock_work_queue(serial).unwrap();
    platform.shutdown().unwrap();
}

#[test]
fn test_duplicate_ack_is_a_plain_item() {
    let platform = started("s-dup");
    let serial = platform.allocate_serial_work_queue(QueueId::STANDARD).unwrap();
    let (token_tx, token_rx) = channel::unbounded();
    let (tx, rx) = channel::unbounded();

    let head_tx = tx.clone();
    let replying = FnCallback::new(move |token: &AsyncResult| {
        let _ = head_tx.send("A");
        let _ = token_tx.send(token.clone());
    })
    .with_flags(CallbackFlags::REPLY_CALLBACK)
    .into_callback();
    let first = platform.create_result(None, Some(replying), None).unwrap();
    platform.put_work_item(serial, 0, &first).unwrap();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "A");
    let token = token_rx.recv_timeout(TIMEOUT).unwrap();
    platform.invoke_callback(&token).unwrap();

    // Nothing is waiting for this token any more.
    platform.invoke_callback(&token).unwrap();

    let recorder = Arc::new(Recorder::default());
    submit_labeled(&platform, serial, &recorder, &tx, "B");
    submit_labeled(&platform, serial, &recorder, &tx, "C");
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "B");
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "C");
    assert_eq!(recorder.order(), vec!["B", "C"]);

    platform.unlock_work_queue(serial).unwrap();
    platform.shutdown().unwrap();
}

#[test]
fn test_mismatched_ack_does_not_advance() {
    let platform = started("s-mismatch");
    let first_serial = platform.allocate_serial_work_queue(QueueId::STANDARD).unwrap();
    let second_serial = platform.allocate_serial_work_queue(QueueId::STANDARD).unwrap();
    let (token_tx, token_rx) = channel::unbounded();
    let (tx, rx) = channel::unbounded();

    let replying = |label: &'static str| {
        let (token_tx, tx) = (token_tx.clone(), tx.clone());
        FnCallback::new(move |token: &AsyncResult| {
            let _ = tx.send(label);
            let _ = token_tx.send(token.clone());
        })
        .with_flags(CallbackFlags::REPLY_CALLBACK)
        .into_callback()
    };

    let a = platform.create_result(None, Some(replying("A")), None).unwrap();
    platform.put_work_item(first_serial, 0, &a).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "A");
    let token_a = token_rx.recv_timeout(TIMEOUT).unwrap();

    let x = platform.create_result(None, Some(replying("X")), None).unwrap();
    platform.put_work_item(second_serial, 0, &x).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "X");
    let _token_x = token_rx.recv_timeout(TIMEOUT).unwrap();

    let recorder = Arc::new(Recorder::default());
    submit_labeled(&platform, second_serial, &recorder, &tx, "Y");

    // A's token is not an acknowledgement for X: it queues behind Y.
    platform.put_work_item(second_serial, 0, &token_a).unwrap();
    assert!(rx.recv_timeout(QUIET).is_err());
    assert!(recorder.order().is_empty());

    platform.unlock_work_queue(second_serial).unwrap();
    platform.unlock_work_queue(first_serial).unwrap();
    platform.shutdown().unwrap();
}

// ===== Chaining =====

#[test]
fn test_chained_serial_queues_keep_order() {
    let platform = started("s-chain");
    let downstream = platform.allocate_serial_work_queue(QueueId::MULTITHREADED).unwrap();
    let upstream = platform.allocate_serial_work_queue(downstream).unwrap();
    let recorder = Arc::new(Recorder::default());
    let (tx, rx) = channel::unbounded();

    let labels = ["A", "B", "C", "D", "E"];
    for label in labels {
        submit_labeled(&platform, upstream, &recorder, &tx, label);
    }
    for _ in labels {
        rx.recv_timeout(TIMEOUT).unwrap();
    }

    assert_eq!(recorder.order(), labels.to_vec());
    assert!(!recorder.overlapped.load(Ordering::SeqCst));

    platform.unlock_work_queue(upstream).unwrap();
    platform.unlock_work_queue(downstream).unwrap();
    assert_eq!(platform.user_queue_count(), 0);
    platform.shutdown().unwrap();
}

#[test]
fn test_shutdown_discards_waiting_items() {
    let platform = started("s-teardown");
    let serial = platform.allocate_serial_work_queue(QueueId::STANDARD).unwrap();
    let (token_tx, token_rx) = channel::unbounded();
    let (tx, rx) = channel::unbounded();

    let head_tx = tx.clone();
    let replying = FnCallback::new(move |token: &AsyncResult| {
        let _ = head_tx.send("A");
        let _ = token_tx.send(token.clone());
    })
    .with_flags(CallbackFlags::REPLY_CALLBACK)
    .into_callback();
    let first = platform.create_result(None, Some(replying), None).unwrap();
    platform.put_work_item(serial, 0, &first).unwrap();

    let recorder = Arc::new(Recorder::default());
    submit_labeled(&platform, serial, &recorder, &tx, "B");
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "A");
    let token = token_rx.recv_timeout(TIMEOUT).unwrap();

    platform.unlock_work_queue(serial).unwrap();

    // The queue is gone: the late token falls back to the standard queue.
    platform.invoke_callback(&token).unwrap();
    assert!(rx.recv_timeout(QUIET).is_err());
    assert!(recorder.order().is_empty());
    platform.shutdown().unwrap();
}
