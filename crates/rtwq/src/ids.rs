//! Queue ids and work item keys

use std::fmt;

/// Bits set in every user queue handle
pub const PRIVATE_MASK: u32 = 0xffff_0000;

/// Slot number of the first user queue handle
pub(crate) const FIRST_USER_HANDLE: u32 = 5;

/// Number of system queue slots (ids below this are system ids)
pub(crate) const SYSTEM_QUEUE_COUNT: usize = 8;

/// Opaque work queue id
///
/// Small values name system queues. User queue handles carry a slot number
/// in the high 16 bits and a generation in the low 16 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(pub u32);

impl QueueId {
    /// Never a valid queue
    pub const UNDEFINED: QueueId = QueueId(0);
    /// Default concurrent queue, created at startup
    pub const STANDARD: QueueId = QueueId(1);
    /// Real-time queue
    pub const RT: QueueId = QueueId(2);
    /// I/O completion queue (multithreaded)
    pub const IO: QueueId = QueueId(3);
    /// Queue running timer and wait items
    pub const TIMER: QueueId = QueueId(4);
    /// Shared multithreaded queue
    pub const MULTITHREADED: QueueId = QueueId(5);
    /// Queue for long-running callbacks (multithreaded)
    pub const LONG_FUNCTION: QueueId = QueueId(7);

    /// Raw id value
    pub fn value(self) -> u32 {
        self.0
    }

    /// Whether this is a user queue handle
    pub fn is_private(self) -> bool {
        self.0 & PRIVATE_MASK != 0
    }

    /// Index into the system queue array, for the well-known ids
    pub(crate) fn system_index(self) -> Option<usize> {
        match self {
            QueueId::STANDARD
            | QueueId::RT
            | QueueId::IO
            | QueueId::TIMER
            | QueueId::MULTITHREADED
            | QueueId::LONG_FUNCTION => Some(self.0 as usize),
            _ => None,
        }
    }

    /// Whether a system queue uses the multithreaded discipline
    pub(crate) fn is_wide_system_queue(self) -> bool {
        matches!(
            self,
            QueueId::IO | QueueId::MULTITHREADED | QueueId::LONG_FUNCTION
        )
    }

    pub(crate) fn from_slot(slot: usize, generation: u16) -> Self {
        QueueId(((slot as u32 + FIRST_USER_HANDLE) << 16) | u32::from(generation))
    }

    /// Slot index and generation of a user handle
    pub(crate) fn slot(self) -> Option<(usize, u16)> {
        let slot = (self.0 >> 16).checked_sub(FIRST_USER_HANDLE)?;
        Some((slot as usize, (self.0 & 0xffff) as u16))
    }
}

impl fmt::Debug for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueueId({:#x})", self.0)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Discipline of a user pool queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueType {
    /// One thread at a time
    Standard,
    /// Treated as `Standard`
    Window,
    /// Wide thread ceiling
    MultiThreaded,
}

/// Type tag in the high half of a work item key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyKind {
    Scheduled,
    Wait,
}

impl KeyKind {
    const SCHEDULED_MASK: u32 = 0x8000_0000;
    const WAIT_MASK: u32 = 0x8200_0000;

    fn mask(self) -> u32 {
        match self {
            KeyKind::Scheduled => Self::SCHEDULED_MASK,
            KeyKind::Wait => Self::WAIT_MASK,
        }
    }
}

/// Cancellation key of a pending timer or wait item
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItemKey(pub u64);

impl WorkItemKey {
    pub(crate) fn new(kind: KeyKind, low: u32) -> Self {
        WorkItemKey((u64::from(kind.mask()) << 32) | u64::from(low))
    }

    /// Raw key value
    pub fn value(self) -> u64 {
        self.0
    }

    pub(crate) fn kind(self) -> Option<KeyKind> {
        match (self.0 >> 32) as u32 {
            KeyKind::SCHEDULED_MASK => Some(KeyKind::Scheduled),
            KeyKind::WAIT_MASK => Some(KeyKind::Wait),
            _ => None,
        }
    }

    fn low(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Debug for WorkItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkItemKey({:#x})", self.0)
    }
}

/// Key of a periodic callback (low half of its scheduled item key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeriodicKey(pub u32);

impl PeriodicKey {
    pub(crate) fn from_item_key(key: WorkItemKey) -> Self {
        PeriodicKey(key.low())
    }

    pub(crate) fn item_key(self) -> WorkItemKey {
        WorkItemKey::new(KeyKind::Scheduled, self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_ids() {
        assert!(!QueueId::STANDARD.is_private());
        assert_eq!(QueueId::TIMER.system_index(), Some(4));
        assert_eq!(QueueId::UNDEFINED.system_index(), None);
        assert_eq!(QueueId(6).system_index(), None);
        assert!(QueueId::IO.is_wide_system_queue());
        assert!(!QueueId::RT.is_wide_system_queue());
    }

    #[test]
    fn test_user_handle_layout() {
        let id = QueueId::from_slot(0, 1);
        assert_eq!(id.0, 0x0005_0001);
        assert!(id.is_private());
        assert_eq!(id.slot(), Some((0, 1)));
        assert_eq!(QueueId::from_slot(123, 0xfffe).slot(), Some((123, 0xfffe)));
        assert_eq!(QueueId(0x0001_0001).slot(), None);
    }

    #[test]
    fn test_key_masks() {
        let wait = WorkItemKey::new(KeyKind::Wait, 7);
        assert_eq!(wait.0, 0x8200_0000_0000_0007);
        assert_eq!(wait.kind(), Some(KeyKind::Wait));

        let scheduled = WorkItemKey::new(KeyKind::Scheduled, 9);
        assert_eq!(scheduled.kind(), Some(KeyKind::Scheduled));
        assert_eq!(WorkItemKey(42).kind(), None);
    }

    #[test]
    fn test_periodic_key_round_trip() {
        let key = WorkItemKey::new(KeyKind::Scheduled, 0x1234);
        let periodic = PeriodicKey::from_item_key(key);
        assert_eq!(periodic, PeriodicKey(0x1234));
        assert_eq!(periodic.item_key(), key);
    }
}
