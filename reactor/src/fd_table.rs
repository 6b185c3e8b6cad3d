//! Bounded FD registry (§4.2). Maps an OS file descriptor to a pair of
//! read/write callbacks. Slot reuse is allowed: the readiness interest set
//! is rebuilt from this table before every wait, so a freed slot's index
//! can be handed to a brand new registration without stale state leaking
//! through.

use std::os::unix::io::RawFd;

use crate::Reactor;

/// Callback invoked when a registered FD becomes readable or writable.
pub type FdCallback = Box<dyn FnMut(&mut Reactor, RawFd)>;

pub(crate) struct FdEntry {
    pub fd: RawFd,
    pub read: Option<FdCallback>,
    pub write: Option<FdCallback>,
}

/// Fixed-capacity table of FD entries, indexed by small integers that
/// double as `mio::Token` values.
pub struct FdTable {
    capacity: usize,
    slots: Vec<Option<FdEntry>>,
}

impl FdTable {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { capacity, slots }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn index_of(&self, fd: RawFd) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(entry) if entry.fd == fd))
    }

    /// Returns the token index for `fd`, allocating a free slot if this is
    /// the first registration for that descriptor. `replaced` is `true`
    /// when an existing registration's callbacks are being overwritten in
    /// place (§4.1: "If fd is already registered, the callbacks... are
    /// replaced").
    pub fn upsert(
        &mut self,
        fd: RawFd,
        read: Option<FdCallback>,
        write: Option<FdCallback>,
    ) -> Result<(usize, bool), crate::Error> {
        if let Some(index) = self.index_of(fd) {
            self.slots[index] = Some(FdEntry { fd, read, write });
            return Ok((index, true));
        }
        let index = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(crate::Error::FdTableFull {
                capacity: self.capacity,
            })?;
        self.slots[index] = Some(FdEntry { fd, read, write });
        Ok((index, false))
    }

    /// Idempotent; returns the freed token index when `fd` was registered.
    pub fn remove(&mut self, fd: RawFd) -> Option<usize> {
        let index = self.index_of(fd)?;
        self.slots[index] = None;
        Some(index)
    }

    pub(crate) fn entry(&self, index: usize) -> Option<&FdEntry> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub(crate) fn entry_mut(&mut self, index: usize) -> Option<&mut FdEntry> {
        self.slots.get_mut(index).and_then(|s| s.as_mut())
    }

    pub(crate) fn fd_at(&self, index: usize) -> Option<RawFd> {
        self.entry(index).map(|e| e.fd)
    }

    /// Snapshot of currently occupied token indices, taken once at the top
    /// of the dispatch phase so self-mutation during callbacks can't
    /// change which entries this pass considers (§4.1 ordering guarantees).
    pub(crate) fn occupied_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }
}
