//! §3's per-connection session state and the bounded session table it lives
//! in. One entry per accepted TCP connection; freed on disconnect.

use std::net::{SocketAddr, TcpStream};

use crate::ids::{SlotIndex, SubscribeKey};

pub const DEFAULT_MAX_SESSIONS: usize = 64;

/// §3's command-buffer bound: "a command is delimited by a newline; lines
/// longer than the buffer cause the session to be closed". `inbuf` is a
/// plain growable `Vec` rather than a fixed-size array (there is no `libc`
/// byte array to size here), so this is the line the fill index is checked
/// against in its place.
pub const MAX_COMMAND_LINE_LEN: usize = 1024;

/// §4.2's three-state session machine. A session starts in `Command`,
/// moves to `AwaitingReply` while a plug-in callback has claimed the
/// resource's pending-reply lock, and moves to `Monitoring` once a `CAT`
/// has subscribed it to a broadcast key. `Monitoring` is terminal for that
/// connection: §4.4 gives it no further command-parsing path back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Command,
    AwaitingReply,
    Monitoring,
}

/// A live connection. Kept behind a bounded [`SessionTable`] slot rather
/// than boxed individually, the same indexing discipline `reactor`'s
/// `FdTable` and `TimerTable` use.
pub struct Session {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub state: SessionState,
    /// Accumulates bytes from the socket until a `\n` completes a command
    /// line. Re-used across commands; cleared after each dispatch.
    pub inbuf: Vec<u8>,
    /// Set once a `CAT` succeeds; used only to remove this session from
    /// its resource's subscriber count on disconnect (the resource itself
    /// still holds the authoritative `subscribe_key`, per §4.4 — this is
    /// the session-side half of that relationship, not a second source of
    /// truth for matching broadcasts).
    pub subscribed_to: Option<SubscribeKey>,
    /// Set when a plug-in returns [`crate::plugin::CallOutcome::Pending`];
    /// lets [`crate::core::Core::prompt`] find and clear the matching
    /// resource's `pending_owner` without the caller having to remember
    /// and thread it back through. Left dangling (never cleared) if the
    /// session disconnects first — §4.3's documented "pending owner can go
    /// stale" case.
    pub pending_on: Option<(SlotIndex, usize)>,
}

impl Session {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            state: SessionState::Command,
            inbuf: Vec::with_capacity(128),
            subscribed_to: None,
            pending_on: None,
        }
    }
}

enum Slot {
    Unused,
    Occupied(Session),
}

impl Default for Slot {
    fn default() -> Self {
        Slot::Unused
    }
}

/// Fixed-capacity table of live sessions, indexed by [`crate::ids::SessionId`].
pub struct SessionTable {
    slots: Vec<Slot>,
}

impl SessionTable {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Inserts into the first unused slot. `None` means the table is full;
    /// the accept loop responds by dropping the new connection without
    /// ever handing it a fd (§1's ambient-stack addition: the daemon has
    /// no queueing for connections beyond table capacity).
    pub fn insert(&mut self, session: Session) -> Option<usize> {
        let index = self.slots.iter().position(|s| matches!(s, Slot::Unused))?;
        self.slots[index] = Slot::Occupied(session);
        Some(index)
    }

    pub fn remove(&mut self, index: usize) -> Option<Session> {
        match self.slots.get_mut(index) {
            Some(slot @ Slot::Occupied(_)) => {
                let taken = std::mem::replace(slot, Slot::Unused);
                match taken {
                    Slot::Occupied(session) => Some(session),
                    Slot::Unused => unreachable!(),
                }
            }
            _ => None,
        }
    }

    pub fn get(&self, index: usize) -> Option<&Session> {
        match self.slots.get(index) {
            Some(Slot::Occupied(session)) => Some(session),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Session> {
        match self.slots.get_mut(index) {
            Some(Slot::Occupied(session)) => Some(session),
            _ => None,
        }
    }

    /// Removes and returns a session so its callback-triggering stream can
    /// be used without holding `&mut self` at the same time; re-insert at
    /// the same index with [`SessionTable::put_back`] when done. Mirrors
    /// `reactor::Reactor`'s take/use/put-back handling of fd callbacks.
    pub fn take(&mut self, index: usize) -> Option<Session> {
        match self.slots.get_mut(index) {
            Some(slot @ Slot::Occupied(_)) => {
                let taken = std::mem::replace(slot, Slot::Unused);
                match taken {
                    Slot::Occupied(session) => Some(session),
                    Slot::Unused => unreachable!(),
                }
            }
            _ => None,
        }
    }

    pub fn put_back(&mut self, index: usize, session: Session) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Slot::Occupied(session);
        }
    }

    pub fn occupied_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Slot::Occupied(_)))
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    fn pair() -> (TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        let _ = client;
        (server, peer)
    }

    #[test]
    fn insert_and_remove_round_trip() {
        let mut table = SessionTable::with_capacity(2);
        let (stream, peer) = pair();
        let index = table.insert(Session::new(stream, peer)).unwrap();
        assert!(table.get(index).is_some());
        let removed = table.remove(index);
        assert!(removed.is_some());
        assert!(table.get(index).is_none());
    }

    #[test]
    fn insert_fails_when_full() {
        let mut table = SessionTable::with_capacity(1);
        let (s1, p1) = pair();
        assert!(table.insert(Session::new(s1, p1)).is_some());
        let (s2, p2) = pair();
        assert!(table.insert(Session::new(s2, p2)).is_none());
    }

    #[test]
    fn take_then_put_back_preserves_index() {
        let mut table = SessionTable::with_capacity(2);
        let (stream, peer) = pair();
        let index = table.insert(Session::new(stream, peer)).unwrap();
        let session = table.take(index).unwrap();
        assert!(table.get(index).is_none());
        table.put_back(index, session);
        assert!(table.get(index).is_some());
    }
}
