//! User queue handle table
//!
//! Fixed-capacity slot array with a LIFO free list. Each allocation stamps
//! the slot with the next table-wide generation (wrapping, never 0), so a
//! handle kept past the death of its queue fails to resolve even after
//! the slot is reused.

use crate::error::{RtwqError, RtwqResult};
use crate::ids::{QueueId, FIRST_USER_HANDLE};
use parking_lot::Mutex;

struct Slot<T> {
    entry: Option<T>,
    refcount: u32,
    generation: u16,
}

struct TableState<T> {
    slots: Vec<Slot<T>>,
    /// Released slots, most recent last
    free: Vec<usize>,
    generation: u16,
}

impl<T> TableState<T> {
    fn next_generation(&mut self) -> u16 {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.generation = 1;
        }
        self.generation
    }

    fn live_slot(&mut self, id: QueueId) -> RtwqResult<&mut Slot<T>> {
        let (index, generation) = id.slot().ok_or(RtwqError::InvalidQueue)?;
        match self.slots.get_mut(index) {
            Some(slot) if slot.refcount > 0 && slot.generation == generation => Ok(slot),
            _ => Err(RtwqError::InvalidQueue),
        }
    }
}

pub(crate) struct HandleTable<T> {
    capacity: usize,
    state: Mutex<TableState<T>>,
}

impl<T: Clone> HandleTable<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        // The slot number has to fit in the high half of a handle.
        let capacity = capacity.min((u16::MAX as u32 - FIRST_USER_HANDLE) as usize);
        Self {
            capacity,
            state: Mutex::new(TableState {
                slots: Vec::new(),
                free: Vec::new(),
                generation: 0,
            }),
        }
    }

    /// Store `entry` with a reference count of one
    pub(crate) fn allocate(&self, entry: T) -> RtwqResult<QueueId> {
        let mut state = self.state.lock();
        let index = match state.free.pop() {
            Some(index) => index,
            None if state.slots.len() < self.capacity => {
                state.slots.push(Slot {
                    entry: None,
                    refcount: 0,
                    generation: 0,
                });
                state.slots.len() - 1
            }
            None => return Err(RtwqError::OutOfResources),
        };

        let generation = state.next_generation();
        let slot = &mut state.slots[index];
        slot.entry = Some(entry);
        slot.refcount = 1;
        slot.generation = generation;
        Ok(QueueId::from_slot(index, generation))
    }

    pub(crate) fn lock(&self, id: QueueId) -> RtwqResult<()> {
        let mut state = self.state.lock();
        state.live_slot(id)?.refcount += 1;
        Ok(())
    }

    /// Drop a reference; returns the entry once the last one is gone
    ///
    /// The caller tears the entry down after the table lock is released.
    pub(crate) fn unlock(&self, id: QueueId) -> RtwqResult<Option<T>> {
        let mut state = self.state.lock();
        let slot = state.live_slot(id)?;
        slot.refcount -= 1;
        if slot.refcount > 0 {
            return Ok(None);
        }

        let entry = slot.entry.take();
        let index = id.slot().map(|(index, _)| index).ok_or(RtwqError::InvalidQueue)?;
        state.free.push(index);
        Ok(entry)
    }

    pub(crate) fn resolve(&self, id: QueueId) -> RtwqResult<T> {
        let mut state = self.state.lock();
        state
            .live_slot(id)?
            .entry
            .clone()
            .ok_or(RtwqError::InvalidQueue)
    }

    pub(crate) fn live_count(&self) -> usize {
        self.state
            .lock()
            .slots
            .iter()
            .filter(|slot| slot.refcount > 0)
            .count()
    }
}
