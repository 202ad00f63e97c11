//! Periodic callbacks

use crate::callback::{AsyncCallback, CallbackFlags, CallbackParameters};
use crate::error::RtwqResult;
use crate::ids::QueueId;
use crate::result::{AsyncObject, AsyncResult};

/// Function run on every tick of a periodic callback, with its context
pub type PeriodicFn = dyn Fn(Option<AsyncObject>) + Send + Sync;

/// Runs a periodic function on the timer queue with the result's object
pub(crate) struct PeriodicCallback {
    func: Box<PeriodicFn>,
}

impl PeriodicCallback {
    pub(crate) fn new<F>(func: F) -> Self
    where
        F: Fn(Option<AsyncObject>) + Send + Sync + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }
}

impl AsyncCallback for PeriodicCallback {
    fn parameters(&self) -> RtwqResult<CallbackParameters> {
        Ok(CallbackParameters {
            flags: CallbackFlags::NONE,
            queue: QueueId::TIMER,
        })
    }

    fn invoke(&self, result: &AsyncResult) {
        (self.func)(result.object().ok());
    }
}
