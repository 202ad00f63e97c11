//! Process runtime usage tracking
//!
//! Platform startup takes a usage cookie from the shared runtime
//! environment and returns it on shutdown.

use crate::error::PoolError;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use tracing::trace;

static SHARED: Lazy<Arc<RuntimeEnvironment>> = Lazy::new(|| Arc::new(RuntimeEnvironment::new()));

/// Token proving one outstanding use of the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsageCookie(u64);

impl UsageCookie {
    /// Raw cookie value
    pub fn value(self) -> u64 {
        self.0
    }
}

struct UsageState {
    next_cookie: u64,
    live: FxHashSet<u64>,
}

/// Counts outstanding users of the runtime
pub struct RuntimeEnvironment {
    usage: Mutex<UsageState>,
}

impl RuntimeEnvironment {
    /// Create an environment with no users
    pub fn new() -> Self {
        Self {
            usage: Mutex::new(UsageState {
                next_cookie: 1,
                live: FxHashSet::default(),
            }),
        }
    }

    /// Process-wide environment
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    /// Register a user and hand out its cookie
    pub fn increment_usage(&self) -> UsageCookie {
        let mut usage = self.usage.lock();
        let cookie = usage.next_cookie;
        usage.next_cookie += 1;
        usage.live.insert(cookie);
        trace!(cookie, users = usage.live.len(), "runtime usage incremented");
        UsageCookie(cookie)
    }

    /// Return a cookie obtained from `increment_usage`
    pub fn decrement_usage(&self, cookie: UsageCookie) -> Result<(), PoolError> {
        let mut usage = self.usage.lock();
        if !usage.live.remove(&cookie.0) {
            return Err(PoolError::UnknownUsageCookie(cookie.0));
        }
        trace!(cookie = cookie.0, users = usage.live.len(), "runtime usage decremented");
        Ok(())
    }

    /// Number of outstanding users
    pub fn usage_count(&self) -> usize {
        self.usage.lock().live.len()
    }
}

impl Default for RuntimeEnvironment {
    fn default() -> Self {
        Self::new()
    }
}
