//! Work items
//!
//! A work item binds one result to one pending operation on a queue.
//! Keyed timer and wait items move through a small state machine:
//!
//! ```text
//! Idle -> Pending -> Firing      (natural firing)
//!              \--> Cancelled    (cancel or queue teardown)
//! ```
//!
//! The `Pending -> _` transitions are compare-and-swaps performed together
//! with the pending list removal, under the owning queue's lock. Whoever
//! wins the swap decides what the callback observes.

use crate::callback::CallbackFlags;
use crate::error::{RtwqError, RtwqResult};
use crate::ids::WorkItemKey;
use crate::queue::Queue;
use crate::result::AsyncResult;
use parking_lot::Mutex;
use rtwq_pool::{PoolError, Registration};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemState {
    Idle = 0,
    Pending = 1,
    Firing = 2,
    Cancelled = 3,
}

impl ItemState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ItemState::Pending,
            2 => ItemState::Firing,
            3 => ItemState::Cancelled,
            _ => ItemState::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemKind {
    Immediate,
    Wait,
    Timer { periodic: bool },
}

struct ItemLinks {
    /// Queue whose pending list may hold the item
    owner: Weak<Queue>,
    /// Serial queue told when the item's callback returns
    finalizer: Option<Weak<Queue>>,
    /// Acknowledgement token handed to the callback in reply mode
    reply: Option<AsyncResult>,
}

pub(crate) struct WorkItem {
    result: AsyncResult,
    key: Option<WorkItemKey>,
    priority: i32,
    flags: CallbackFlags,
    kind: ItemKind,
    state: AtomicU8,
    links: Mutex<ItemLinks>,
    registration: Mutex<Option<Registration>>,
}

impl WorkItem {
    pub(crate) fn new(
        owner: &Arc<Queue>,
        result: AsyncResult,
        priority: i32,
        kind: ItemKind,
        key: Option<WorkItemKey>,
    ) -> Arc<Self> {
        let flags = match result.callback().map(|callback| callback.parameters()) {
            Some(Ok(params)) => params.flags,
            Some(Err(err)) => {
                warn!(error = %err, "callback parameters unavailable, assuming no flags");
                CallbackFlags::NONE
            }
            None => CallbackFlags::NONE,
        };

        Arc::new(Self {
            result,
            key,
            priority,
            flags,
            kind,
            state: AtomicU8::new(ItemState::Idle as u8),
            links: Mutex::new(ItemLinks {
                owner: Arc::downgrade(owner),
                finalizer: None,
                reply: None,
            }),
            registration: Mutex::new(None),
        })
    }

    pub(crate) fn result(&self) -> &AsyncResult {
        &self.result
    }

    pub(crate) fn key(&self) -> Option<WorkItemKey> {
        self.key
    }

    pub(crate) fn priority(&self) -> i32 {
        self.priority
    }

    pub(crate) fn flags(&self) -> CallbackFlags {
        self.flags
    }

    pub(crate) fn is_periodic(&self) -> bool {
        matches!(self.kind, ItemKind::Timer { periodic: true })
    }

    pub(crate) fn state(&self) -> ItemState {
        ItemState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ItemState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Compare-and-swap the state; true if it held `from`
    pub(crate) fn transition(&self, from: ItemState, to: ItemState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn owner(&self) -> Option<Arc<Queue>> {
        self.links.lock().owner.upgrade()
    }

    pub(crate) fn set_owner(&self, owner: &Arc<Queue>) {
        self.links.lock().owner = Arc::downgrade(owner);
    }

    pub(crate) fn finalizer(&self) -> Option<Weak<Queue>> {
        self.links.lock().finalizer.clone()
    }

    pub(crate) fn set_finalizer(&self, finalizer: Option<Weak<Queue>>) {
        self.links.lock().finalizer = finalizer;
    }

    pub(crate) fn reply_result(&self) -> Option<AsyncResult> {
        self.links.lock().reply.clone()
    }

    pub(crate) fn set_reply_result(&self, reply: Option<AsyncResult>) {
        let previous = std::mem::replace(&mut self.links.lock().reply, reply);
        drop(previous);
    }

    /// Store the registration, then arm it while it is visible to firings
    pub(crate) fn install_registration<F>(&self, registration: Registration, arm: F) -> Result<(), PoolError>
    where
        F: FnOnce(&Registration) -> Result<(), PoolError>,
    {
        let mut slot = self.registration.lock();
        let registration = slot.insert(registration);
        arm(registration)
    }

    pub(crate) fn take_registration(&self) -> Option<Registration> {
        self.registration.lock().take()
    }

    /// Run the callback on a pool worker
    ///
    /// In reply mode the callback receives the reply token instead of its
    /// own result. The result's event, if any, is signaled afterwards.
    pub(crate) fn run(&self) {
        self.transition(ItemState::Idle, ItemState::Firing);

        let reply = self.reply_result();
        let target = reply.as_ref().unwrap_or(&self.result);
        match self.result.callback() {
            Some(callback) => callback.invoke(target),
            None => trace!("work item has no callback"),
        }

        if let Some(event) = self.result.event() {
            event.set();
        }
    }

    /// Wait or timer registration fired
    pub(crate) fn fire(self: &Arc<Self>) {
        let Some(queue) = self.owner() else {
            return;
        };

        let dispatch = if self.is_periodic() {
            self.state() != ItemState::Cancelled
        } else if self.key.is_some() {
            queue.release_pending(self, ItemState::Firing)
        } else {
            self.transition(ItemState::Idle, ItemState::Firing)
        };

        if dispatch {
            trace!(key = ?self.key, kind = ?self.kind, "work item fired");
            queue.invoke_async_callback(&self.result);
        }

        if !self.is_periodic() {
            // Breaks the item -> registration -> callback -> item cycle.
            drop(self.take_registration());
        }
    }
}

/// Pending item located by key, its queue lock already released
pub(crate) struct CancelTicket {
    queue: Arc<Queue>,
    item: Arc<WorkItem>,
}

impl CancelTicket {
    pub(crate) fn new(queue: Arc<Queue>, item: Arc<WorkItem>) -> Self {
        Self { queue, item }
    }

    /// Disarm the registration and block until no firing is in progress
    ///
    /// Holds no lock of this crate while waiting, so a firing that needs
    /// the queue lock can always finish.
    pub(crate) fn detach_and_wait_quiescent(self) -> QuiescentItem {
        if let Some(registration) = self.item.take_registration() {
            registration.cancel_and_wait();
        }
        QuiescentItem {
            queue: self.queue,
            item: self.item,
        }
    }
}

/// Pending item that can no longer be fired by its registration
pub(crate) struct QuiescentItem {
    queue: Arc<Queue>,
    item: Arc<WorkItem>,
}

impl QuiescentItem {
    /// Win or lose the race against the natural firing
    ///
    /// On a win the callback observes a cancelled status, except for
    /// periodic items which simply stop.
    pub(crate) fn finalize_release(self) -> RtwqResult<()> {
        if !self.queue.release_pending(&self.item, ItemState::Cancelled) {
            return Err(RtwqError::NotFound);
        }

        trace!(key = ?self.item.key, "work item cancelled");
        if !self.item.is_periodic() {
            self.item.result.set_status(Err(RtwqError::Cancelled));
            self.queue.invoke_async_callback(&self.item.result);
        }
        Ok(())
    }
}
