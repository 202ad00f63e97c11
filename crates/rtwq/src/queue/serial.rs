//! Serial queue discipline
//!
//! Items wait in the pending list and only the head is forwarded to the
//! target queue. The head leaves the list when the pool reports that its
//! callback returned (finalization), or, for reply callbacks, when the
//! reply token handed to the callback is put back on this queue.

use super::{Queue, QueueKind};
use crate::callback::{AsyncCallback, CallbackFlags, CallbackParameters};
use crate::error::{RtwqError, RtwqResult};
use crate::ids::QueueId;
use crate::item::WorkItem;
use crate::result::AsyncResult;
use once_cell::sync::OnceCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Callback of the reply tokens a serial queue issues
///
/// Its identity marks a result as an acknowledgement for this queue, and
/// its preferred queue is the serial queue itself, so `invoke_callback`
/// on a token acknowledges it.
pub(crate) struct SerialAck {
    queue: OnceCell<QueueId>,
}

impl AsyncCallback for SerialAck {
    fn parameters(&self) -> RtwqResult<CallbackParameters> {
        Ok(CallbackParameters {
            flags: CallbackFlags::NONE,
            queue: self.queue.get().copied().unwrap_or(QueueId::STANDARD),
        })
    }

    fn invoke(&self, _result: &AsyncResult) {
        trace!(queue = ?self.queue.get(), "reply token ran downstream");
    }
}

pub(crate) struct SerialQueue {
    target: QueueId,
    ack: Arc<SerialAck>,
    closed: AtomicBool,
}

impl SerialQueue {
    pub(crate) fn new(target: QueueId) -> Self {
        Self {
            target,
            ack: Arc::new(SerialAck {
                queue: OnceCell::new(),
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn target(&self) -> QueueId {
        self.target
    }

    /// Record the handle reply tokens route back to
    pub(crate) fn bind_id(&self, id: QueueId) {
        let _ = self.ack.queue.set(id);
    }

    /// Mark closed; false if it already was
    pub(crate) fn shutdown(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    fn ack_ptr(&self) -> *const () {
        Arc::as_ptr(&self.ack) as *const ()
    }

    /// Whether `item` acknowledges the current head
    fn is_ack_token(&self, pending: &VecDeque<Arc<WorkItem>>, item: &WorkItem) -> bool {
        let Some(head) = pending.front() else {
            return false;
        };
        if item.result().callback_ptr() != Some(self.ack_ptr()) {
            return false;
        }
        head.reply_result()
            .is_some_and(|reply| reply.ptr_eq(item.result()))
    }
}

impl Queue {
    pub(super) fn serial_submit(self: &Arc<Self>, serial: &SerialQueue, item: Arc<WorkItem>) -> RtwqResult<()> {
        if serial.closed.load(Ordering::Acquire) {
            return Err(RtwqError::ShuttingDown);
        }

        if item.flags().contains(CallbackFlags::REPLY_CALLBACK) {
            let ack: Arc<dyn AsyncCallback> = serial.ack.clone();
            match self.platform().map(|platform| platform.create_result(None, Some(ack), None)) {
                Some(Ok(reply)) => {
                    item.set_reply_result(Some(reply));
                    item.set_finalizer(None);
                }
                Some(Err(err)) => {
                    warn!(queue = %self.name, error = %err, "failed to create reply token, using finalization");
                    item.set_finalizer(Some(Arc::downgrade(self)));
                }
                None => return Err(RtwqError::ShuttingDown),
            }
        } else {
            item.set_finalizer(Some(Arc::downgrade(self)));
        }

        let handoff = self.detach_from_owner(&item);
        item.set_owner(self);

        let (next, acked, is_new_head) = {
            let mut pending = self.pending.lock();
            if serial.is_ack_token(&pending, &item) {
                let acked = pending.pop_front();
                (pending.front().cloned(), acked, false)
            } else {
                let was_empty = pending.is_empty();
                pending.push_back(Arc::clone(&item));
                (was_empty.then(|| Arc::clone(&item)), None, was_empty)
            }
        };

        if let Some(acked) = acked {
            trace!(queue = %self.name, remaining = self.pending_count(), "head acknowledged");
            drop(acked);
        }
        let mut outcome = Ok(());
        if let Some(next) = next {
            if let Err(err) = self.forward(serial, next) {
                if is_new_head {
                    // Refused by the target: hand it back to the caller.
                    self.serial_finalize(serial, &item);
                    outcome = Err(err);
                }
            }
        }
        if let Some((previous, next)) = handoff {
            previous.forward_next(next);
        }
        outcome
    }

    pub(super) fn serial_finalize(&self, serial: &SerialQueue, item: &Arc<WorkItem>) {
        let (next, removed) = {
            let mut pending = self.pending.lock();
            match pending.iter().position(|entry| Arc::ptr_eq(entry, item)) {
                Some(0) => {
                    let removed = pending.pop_front();
                    (pending.front().cloned(), removed)
                }
                Some(pos) => (None, pending.remove(pos)),
                None => (None, None),
            }
        };
        drop(removed);

        if let Some(next) = next {
            let _ = self.forward(serial, next);
        }
    }

    /// Take `item` out of the serial queue that held it before
    ///
    /// When it was that queue's in-flight head, the queue's next item is
    /// returned so it can be forwarded once `item` sits in its new queue.
    fn detach_from_owner(self: &Arc<Self>, item: &Arc<WorkItem>) -> Option<(Arc<Queue>, Arc<WorkItem>)> {
        let previous = item.owner()?;
        if Arc::ptr_eq(&previous, self) {
            return None;
        }

        let (next, removed) = {
            let mut pending = previous.pending.lock();
            let pos = pending.iter().position(|entry| Arc::ptr_eq(entry, item))?;
            let removed = pending.remove(pos);
            let next = match previous.kind {
                QueueKind::Serial(_) if pos == 0 => pending.front().cloned(),
                _ => None,
            };
            (next, removed)
        };
        drop(removed);

        next.map(|next| (previous, next))
    }

    fn forward_next(&self, item: Arc<WorkItem>) {
        if let QueueKind::Serial(serial) = &self.kind {
            let _ = self.forward(serial, item);
        }
    }

    /// Submit `item` to the target queue, with no lock held
    fn forward(&self, serial: &SerialQueue, item: Arc<WorkItem>) -> RtwqResult<()> {
        let forwarded = match self.platform() {
            Some(platform) => platform
                .grab_queue(serial.target)
                .and_then(|target| target.submit(item)),
            None => Err(RtwqError::ShuttingDown),
        };
        if let Err(err) = &forwarded {
            warn!(queue = %self.name, target = %serial.target, error = %err, "failed to forward work item");
        }
        forwarded
    }
}
