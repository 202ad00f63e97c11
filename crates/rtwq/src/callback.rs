//! Async callbacks and their declared parameters

use crate::error::RtwqResult;
use crate::ids::QueueId;
use crate::result::AsyncResult;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// Capability flags a callback declares
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CallbackFlags(pub u32);

impl CallbackFlags {
    /// No flags
    pub const NONE: CallbackFlags = CallbackFlags(0);
    /// Callback does very little work
    pub const FAST_IO_PROCESSING: CallbackFlags = CallbackFlags(0x1);
    /// Callback only signals an event
    pub const SIGNAL_CALLBACK: CallbackFlags = CallbackFlags(0x2);
    /// Callback may block
    pub const BLOCKING_CALLBACK: CallbackFlags = CallbackFlags(0x4);
    /// Completion is acknowledged with a reply result instead of on return
    pub const REPLY_CALLBACK: CallbackFlags = CallbackFlags(0x8);
    /// Callback is marshalled from another process
    pub const LOCALIZE_REMOTE_CALLBACK: CallbackFlags = CallbackFlags(0x10);

    /// Whether every flag of `other` is set
    pub fn contains(self, other: CallbackFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no flag is set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for CallbackFlags {
    type Output = CallbackFlags;

    fn bitor(self, rhs: CallbackFlags) -> CallbackFlags {
        CallbackFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for CallbackFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallbackFlags({:#x})", self.0)
    }
}

/// Flags and preferred queue of a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackParameters {
    /// Declared capabilities
    pub flags: CallbackFlags,
    /// Queue `invoke_callback` dispatches to
    pub queue: QueueId,
}

impl Default for CallbackParameters {
    fn default() -> Self {
        Self {
            flags: CallbackFlags::NONE,
            queue: QueueId::STANDARD,
        }
    }
}

/// Receiver of a completed async operation
pub trait AsyncCallback: Send + Sync {
    /// Flags and preferred queue; failures fall back to the standard queue
    fn parameters(&self) -> RtwqResult<CallbackParameters> {
        Ok(CallbackParameters::default())
    }

    /// Called on a worker thread with the result of the operation
    fn invoke(&self, result: &AsyncResult);
}

/// Callback built from a closure
///
/// ```rust,ignore
/// let callback = FnCallback::new(|result: &AsyncResult| println!("{:?}", result.status()))
///     .on_queue(QueueId::MULTITHREADED)
///     .into_callback();
/// ```
pub struct FnCallback<F> {
    func: F,
    params: CallbackParameters,
}

impl<F> FnCallback<F>
where
    F: Fn(&AsyncResult) + Send + Sync + 'static,
{
    /// Callback with no flags on the standard queue
    pub fn new(func: F) -> Self {
        Self {
            func,
            params: CallbackParameters::default(),
        }
    }

    /// Declare capability flags
    pub fn with_flags(mut self, flags: CallbackFlags) -> Self {
        self.params.flags = flags;
        self
    }

    /// Prefer a queue for `invoke_callback`
    pub fn on_queue(mut self, queue: QueueId) -> Self {
        self.params.queue = queue;
        self
    }

    /// Share as a trait object
    pub fn into_callback(self) -> Arc<dyn AsyncCallback> {
        Arc::new(self)
    }
}

impl<F> AsyncCallback for FnCallback<F>
where
    F: Fn(&AsyncResult) + Send + Sync + 'static,
{
    fn parameters(&self) -> RtwqResult<CallbackParameters> {
        Ok(self.params)
    }

    fn invoke(&self, result: &AsyncResult) {
        (self.func)(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = CallbackFlags::REPLY_CALLBACK | CallbackFlags::BLOCKING_CALLBACK;
        assert!(flags.contains(CallbackFlags::REPLY_CALLBACK));
        assert!(!flags.contains(CallbackFlags::FAST_IO_PROCESSING));
        assert!(CallbackFlags::NONE.is_empty());
        assert_eq!(flags.0, 0xc);
    }

    #[test]
    fn test_fn_callback_parameters() {
        let callback = FnCallback::new(|_: &AsyncResult| {})
            .with_flags(CallbackFlags::REPLY_CALLBACK)
            .on_queue(QueueId::IO)
            .into_callback();
        let params = callback.parameters().unwrap();
        assert_eq!(params.queue, QueueId::IO);
        assert!(params.flags.contains(CallbackFlags::REPLY_CALLBACK));
    }

    #[test]
    fn test_default_parameters() {
        struct Plain;
        impl AsyncCallback for Plain {
            fn invoke(&self, _: &AsyncResult) {}
        }
        assert_eq!(Plain.parameters().unwrap(), CallbackParameters::default());
    }
}
