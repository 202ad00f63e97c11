//! Async results
//!
//! An `AsyncResult` is a shared handle to a result body: callback, object,
//! state, status and an optional event. When the last handle goes away the
//! body is cleared and handed back to the result cache instead of freed.

use crate::cache::ResultCache;
use crate::callback::AsyncCallback;
use crate::error::{RtwqError, RtwqResult};
use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use rtwq_pool::Event;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// Object or state attached to a result
pub type AsyncObject = Arc<dyn Any + Send + Sync>;

pub(crate) struct ResultBody {
    callback: Option<Arc<dyn AsyncCallback>>,
    object: Option<AsyncObject>,
    state: Option<AsyncObject>,
    /// `None` is success
    status: AtomicCell<Option<RtwqError>>,
    event: Mutex<Option<Event>>,
}

impl ResultBody {
    pub(crate) fn new() -> Self {
        Self {
            callback: None,
            object: None,
            state: None,
            status: AtomicCell::new(None),
            event: Mutex::new(None),
        }
    }

    pub(crate) fn fill(
        &mut self,
        object: Option<AsyncObject>,
        callback: Option<Arc<dyn AsyncCallback>>,
        state: Option<AsyncObject>,
    ) {
        self.object = object;
        self.callback = callback;
        self.state = state;
    }

    /// Drop everything the previous owner attached
    pub(crate) fn reset(&mut self) {
        self.callback = None;
        self.object = None;
        self.state = None;
        self.status.store(None);
        *self.event.get_mut() = None;
    }

    #[cfg(test)]
    pub(crate) fn is_clear(&self) -> bool {
        self.callback.is_none()
            && self.object.is_none()
            && self.state.is_none()
            && self.status.load().is_none()
            && self.event.lock().is_none()
    }
}

struct ResultInner {
    /// Only taken in `drop`
    body: Option<Box<ResultBody>>,
    cache: Weak<ResultCache>,
}

impl Drop for ResultInner {
    fn drop(&mut self) {
        let Some(body) = self.body.take() else {
            return;
        };
        match self.cache.upgrade() {
            Some(cache) => cache.recycle(body),
            None => drop(body),
        }
    }
}

/// Shared handle to the result of an async operation
#[derive(Clone)]
pub struct AsyncResult {
    inner: Arc<ResultInner>,
}

impl AsyncResult {
    pub(crate) fn from_body(body: Box<ResultBody>, cache: Weak<ResultCache>) -> Self {
        Self {
            inner: Arc::new(ResultInner {
                body: Some(body),
                cache,
            }),
        }
    }

    fn body(&self) -> &ResultBody {
        match self.inner.body.as_deref() {
            Some(body) => body,
            None => unreachable!("result body taken while handles remain"),
        }
    }

    /// Associated object
    pub fn object(&self) -> RtwqResult<AsyncObject> {
        self.body().object.clone().ok_or(RtwqError::NoObject)
    }

    /// Caller state
    pub fn state(&self) -> Option<AsyncObject> {
        self.body().state.clone()
    }

    /// Callback invoked when the operation completes
    pub fn callback(&self) -> Option<Arc<dyn AsyncCallback>> {
        self.body().callback.clone()
    }

    /// Completion status
    pub fn status(&self) -> RtwqResult<()> {
        match self.body().status.load() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Set the completion status
    pub fn set_status(&self, status: RtwqResult<()>) {
        self.body().status.store(status.err());
    }

    /// Event signaled after the callback returns
    pub fn event(&self) -> Option<Event> {
        self.body().event.lock().clone()
    }

    /// Attach or clear the completion event
    pub fn set_event(&self, event: Option<Event>) {
        *self.body().event.lock() = event;
    }

    /// Whether two handles refer to the same result
    pub fn ptr_eq(&self, other: &AsyncResult) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Address of the callback object, for identity checks
    pub(crate) fn callback_ptr(&self) -> Option<*const ()> {
        self.body()
            .callback
            .as_ref()
            .map(|callback| Arc::as_ptr(callback) as *const ())
    }

    #[cfg(test)]
    pub(crate) fn body_ptr(&self) -> *const ResultBody {
        self.body() as *const ResultBody
    }
}

impl fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResult")
            .field("status", &self.status())
            .field("has_callback", &self.body().callback.is_some())
            .field("has_object", &self.body().object.is_some())
            .finish()
    }
}
