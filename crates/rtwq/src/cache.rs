//! Recycler for result bodies
//!
//! Released bodies are kept on a LIFO free list while the platform is
//! started, so the most recently used storage is handed out first. Once
//! the startup count drops to zero the cache refuses new entries and
//! released bodies are freed, each returning its platform lock.

use crate::callback::AsyncCallback;
use crate::error::{RtwqError, RtwqResult};
use crate::lifecycle::Counters;
use crate::result::{AsyncObject, AsyncResult, ResultBody};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

pub(crate) struct ResultCache {
    counters: Arc<Counters>,
    free: Mutex<Vec<Box<ResultBody>>>,
}

impl ResultCache {
    pub(crate) fn new(counters: Arc<Counters>) -> Arc<Self> {
        Arc::new(Self {
            counters,
            free: Mutex::new(Vec::new()),
        })
    }

    /// Allocate a result, reusing a cached body when one is available
    pub(crate) fn create(
        self: &Arc<Self>,
        object: Option<AsyncObject>,
        callback: Option<Arc<dyn AsyncCallback>>,
        state: Option<AsyncObject>,
    ) -> RtwqResult<AsyncResult> {
        if self.counters.platform_lock_count() <= 0 {
            return Err(RtwqError::ShuttingDown);
        }

        let mut body = match self.pop() {
            Some(body) => body,
            None => {
                self.counters.lock_platform();
                Box::new(ResultBody::new())
            }
        };
        body.fill(object, callback, state);
        Ok(AsyncResult::from_body(body, Arc::downgrade(self)))
    }

    /// Take back a body whose last handle was released
    pub(crate) fn recycle(&self, mut body: Box<ResultBody>) {
        body.reset();
        if let Err(body) = self.push(body) {
            drop(body);
            self.counters.unlock_platform();
        }
    }

    /// Cache a cleared body; refused once the platform is shut down
    pub(crate) fn push(&self, body: Box<ResultBody>) -> Result<(), Box<ResultBody>> {
        let mut free = self.free.lock();
        if !self.counters.is_started() {
            return Err(body);
        }
        free.push(body);
        Ok(())
    }

    /// Most recently cached body
    pub(crate) fn pop(&self) -> Option<Box<ResultBody>> {
        self.free.lock().pop()
    }

    /// Free every cached body; returns how many were freed
    pub(crate) fn clear(&self) -> usize {
        let drained = std::mem::take(&mut *self.free.lock());
        let count = drained.len();
        drop(drained);
        for _ in 0..count {
            self.counters.unlock_platform();
        }
        trace!(count, "result cache cleared");
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.free.lock().len()
    }
}
