//! The handle a plug-in callback gets into the rest of the daemon. Bundles
//! up the three tables a callback might need to touch — the reactor (for
//! timers), the session table (to answer a client), and the slot table (to
//! broadcast to another resource's subscribers) — without handing the
//! plug-in the whole [`crate::host::Host`].

use std::io::Write;

use reactor::{Reactor, TimerHandle, TimerKind};

use crate::ids::{SessionId, SlotIndex, SubscribeKey};
use crate::session::{SessionState, SessionTable};
use crate::slot::SlotTable;
use crate::state::{Shared, SharedState};

pub struct Core<'a> {
    pub(crate) reactor: &'a mut Reactor,
    pub(crate) sessions: &'a mut SessionTable,
    pub(crate) slots: &'a mut SlotTable,
    /// Clone of the daemon's shared-state handle, carried alongside the
    /// split borrows above purely so [`Core::schedule_plugin_timer`] can
    /// capture it into a timer callback that outlives this `Core` value
    /// (the split borrows themselves cannot outlive the current dispatch).
    pub(crate) shared: Shared,
}

impl<'a> Core<'a> {
    pub fn new(
        reactor: &'a mut Reactor,
        sessions: &'a mut SessionTable,
        slots: &'a mut SlotTable,
        shared: Shared,
    ) -> Self {
        Self {
            reactor,
            sessions,
            slots,
            shared,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.reactor.now_ms()
    }

    pub fn cancel_timer(&mut self, handle: TimerHandle) {
        self.reactor.cancel_timer(handle);
    }

    /// Schedules a timer whose callback needs the full daemon state — not
    /// just the reactor — the same way [`crate::plugin::Plugin::call`]'s own
    /// `core` parameter does. `reactor::Reactor::schedule_timer` only ever
    /// hands a callback `&mut Reactor`, which is enough for `reactor`'s own
    /// tests but not for a plug-in's periodic broadcast (§4.6), which needs
    /// to call back into [`Core::broadcast`]. This rebuilds a fresh `Core`
    /// from the shared `Rc<RefCell<_>>` each time the timer fires, the same
    /// split-borrow shape `host::Host`'s session callbacks already use.
    pub fn schedule_plugin_timer(
        &mut self,
        kind: TimerKind,
        interval_ms: u64,
        mut callback: impl FnMut(&mut Core, TimerHandle) + 'static,
    ) -> Result<TimerHandle, reactor::Error> {
        let shared = self.shared.clone();
        self.reactor.schedule_timer(
            kind,
            interval_ms,
            Box::new(move |reactor: &mut Reactor, handle: TimerHandle| {
                let mut guard = shared.borrow_mut();
                let SharedState { sessions, slots, .. } = &mut *guard;
                let mut core = Core::new(reactor, sessions, slots, shared.clone());
                callback(&mut core, handle);
            }),
        )
    }

    /// Writes a reply body directly to a session's socket, with no framing
    /// beyond what the plug-in itself included. Used both for `GET`'s
    /// synchronous reply path (via the dispatcher) and for a `Pending`
    /// plug-in answering asynchronously later from its own callback.
    /// Write errors are logged and the session is torn down on the next
    /// reactor iteration rather than propagated, matching §4.3's "treat a
    /// failed write as a disconnect" policy.
    pub fn send_ui(&mut self, session: SessionId, data: &[u8]) {
        let Some(s) = self.sessions.get_mut(session.0) else {
            return;
        };
        if let Err(err) = s.stream.write_all(data) {
            log::warn!("session {session} write failed, dropping: {err}");
            self.disconnect(session);
        }
    }

    /// Writes the prompt byte, returns the session to `Command` state, and
    /// releases the pending-reply lock on whichever resource this session
    /// was waiting on, but only if that resource still names this session
    /// as its pending owner (a later `SET` on the same resource by a
    /// different session, somehow arriving first, must not have its lock
    /// stolen out from under it by a stale prompt). The only call site for
    /// this function is how `pending_owner` is ever cleared, per §4.3.
    pub fn prompt(&mut self, session: SessionId) {
        let pending_on = match self.sessions.get_mut(session.0) {
            Some(s) => {
                s.state = SessionState::Command;
                s.pending_on.take()
            }
            None => return,
        };
        if let Some((slot, resource)) = pending_on {
            if let Some(loaded) = self.slots.get_mut(slot) {
                if let Some(res) = loaded.resources.get_mut(resource) {
                    if res.pending_owner == Some(session) {
                        res.pending_owner = None;
                    }
                }
            }
        }
        self.send_ui(session, b"\\");
    }

    /// Marks `resource` as pending on `session`, recording the reverse
    /// pointer on the session so [`Core::prompt`] can find it later.
    pub fn mark_pending(&mut self, session: SessionId, slot: SlotIndex, resource: usize) {
        if let Some(loaded) = self.slots.get_mut(slot) {
            if let Some(res) = loaded.resources.get_mut(resource) {
                res.pending_owner = Some(session);
            }
        }
        if let Some(s) = self.sessions.get_mut(session.0) {
            s.pending_on = Some((slot, resource));
        }
    }

    /// Fans `data` out to every session currently subscribed to
    /// `(slot, resource)`'s broadcast key. Returns whether any subscriber
    /// existed, mirroring the original's `broadcast` return value used by
    /// plug-ins to decide whether producing the sample was wasted work.
    /// A subscriber whose write fails is disconnected and dropped from the
    /// fan-out, exactly as a normal read/write callback failure would be.
    ///
    /// After the scan, the resource's own `subscribe_key` is re-evaluated
    /// (§4.6): left unchanged if at least one session still matched, reset
    /// to [`SubscribeKey::NONE`] if none did. This is the eventual-
    /// consistency half of §3's subscribe-key invariant — a session that
    /// disconnected without this broadcast engine ever noticing (a plain
    /// fd close, not a `Core::disconnect` call) still gets its stale key
    /// cleared on the very next fan-out attempt.
    pub fn broadcast(&mut self, slot: SlotIndex, resource: usize, data: &[u8]) -> bool {
        let key = match self.slots.get(slot).and_then(|l| l.resources.get(resource)) {
            Some(res) if !res.subscribe_key.is_none() => res.subscribe_key,
            _ => return false,
        };
        let mut matched = 0usize;
        let mut failed = Vec::new();
        for index in self.sessions.occupied_indices().collect::<Vec<_>>() {
            let matches = matches!(
                self.sessions.get(index),
                Some(s) if s.subscribed_to == Some(key)
            );
            if !matches {
                continue;
            }
            matched += 1;
            if let Some(s) = self.sessions.get_mut(index) {
                if s.stream.write_all(data).is_err() {
                    failed.push(index);
                }
            }
        }
        for index in &failed {
            self.disconnect(SessionId(*index));
        }
        let any = matched > failed.len();
        if !any {
            if let Some(loaded) = self.slots.get_mut(slot) {
                if let Some(res) = loaded.resources.get_mut(resource) {
                    if res.subscribe_key == key {
                        res.subscribe_key = SubscribeKey::NONE;
                    }
                }
            }
        }
        any
    }

    /// Computes and records the subscribe key for a fresh `CAT`, linking
    /// the resource and the subscribing session to the same key (§4.4).
    pub fn subscribe(&mut self, session: SessionId, slot: SlotIndex, resource: usize) -> SubscribeKey {
        let key = SubscribeKey::for_resource(slot, resource);
        if let Some(loaded) = self.slots.get_mut(slot) {
            if let Some(res) = loaded.resources.get_mut(resource) {
                res.subscribe_key = key;
            }
        }
        if let Some(s) = self.sessions.get_mut(session.0) {
            s.state = SessionState::Monitoring;
            s.subscribed_to = Some(key);
        }
        key
    }

    /// Tears a session down: clears its resource's subscribe key if it was
    /// the one subscriber `CAT` supports, deregisters its fd, and drops
    /// the socket. Deliberately does *not* touch `pending_owner` — a
    /// session that disconnects while `AwaitingReply` leaves it dangling,
    /// per §4.3, since only [`Core::prompt`] ever clears that field.
    pub fn disconnect(&mut self, session: SessionId) {
        let Some(s) = self.sessions.remove(session.0) else {
            return;
        };
        if let Some(key) = s.subscribed_to {
            let (slot, resource) = key.decode();
            if let Some(loaded) = self.slots.get_mut(slot) {
                if let Some(res) = loaded.resources.get_mut(resource) {
                    if res.subscribe_key == key {
                        res.subscribe_key = SubscribeKey::NONE;
                    }
                }
            }
        }
        self.reactor.unregister_fd(crate::host::session_fd(&s));
    }
}
