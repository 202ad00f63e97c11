//! Startup and platform lock counters
//!
//! Two independent nonnegative counts: `startup` owns the system queues,
//! `platform_lock` keeps result storage valid. Every result body
//! allocation holds one platform lock until the body is truly freed.

use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{trace, warn};

#[derive(Debug, Default)]
pub(crate) struct Counters {
    startup: AtomicI32,
    platform_lock: AtomicI32,
}

impl Counters {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn startup_count(&self) -> i32 {
        self.startup.load(Ordering::Acquire)
    }

    pub(crate) fn is_started(&self) -> bool {
        self.startup_count() > 0
    }

    /// New startup count
    pub(crate) fn increment_startup(&self) -> i32 {
        self.startup.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// New startup count, or `None` if it was already zero
    pub(crate) fn decrement_startup(&self) -> Option<i32> {
        decrement_positive(&self.startup).map(|previous| previous - 1)
    }

    pub(crate) fn platform_lock_count(&self) -> i32 {
        self.platform_lock.load(Ordering::Acquire)
    }

    pub(crate) fn lock_platform(&self) -> i32 {
        let count = self.platform_lock.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(count, "platform locked");
        count
    }

    pub(crate) fn unlock_platform(&self) -> i32 {
        match decrement_positive(&self.platform_lock) {
            Some(previous) => {
                trace!(count = previous - 1, "platform unlocked");
                previous - 1
            }
            None => {
                warn!("unbalanced platform unlock");
                0
            }
        }
    }
}

fn decrement_positive(counter: &AtomicI32) -> Option<i32> {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
            (count > 0).then(|| count - 1)
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_nesting() {
        let counters = Counters::new();
        assert!(!counters.is_started());
        assert_eq!(counters.increment_startup(), 1);
        assert_eq!(counters.increment_startup(), 2);
        assert_eq!(counters.decrement_startup(), Some(1));
        assert_eq!(counters.decrement_startup(), Some(0));
        assert_eq!(counters.decrement_startup(), None);
        assert_eq!(counters.startup_count(), 0);
    }

    #[test]
    fn test_platform_lock_never_negative() {
        let counters = Counters::new();
        assert_eq!(counters.lock_platform(), 1);
        assert_eq!(counters.unlock_platform(), 0);
        assert_eq!(counters.unlock_platform(), 0);
        assert_eq!(counters.platform_lock_count(), 0);
    }
}
