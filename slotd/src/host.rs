//! Wires the reactor, the slot and session tables, and the plug-in
//! registry together into a running daemon. §4.1's reactor only knows
//! about file descriptors and timers; this module is where "a readable
//! command socket" becomes "parse a line, resolve it against the slot
//! table, call a plug-in".
//!
//! FD callbacks only ever receive `&mut Reactor` (`reactor` has no idea
//! `slotd` exists), so the application tables live behind a
//! [`crate::state::Shared`] (`Rc<RefCell<SharedState>>`) that every
//! registered closure holds a clone of — the standard shape for
//! single-threaded reactor-driven servers in this corpus, since nothing
//! here crosses a thread boundary.

use std::cell::RefCell;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;

use reactor::Reactor;

use crate::command::{self, ParsedCommand, SlotRef};
use crate::config::Config;
use crate::core::Core;
use crate::error::ProtocolError;
use crate::ids::SessionId;
use crate::plugin::{CallOutcome, PluginRegistry, Verb};
use crate::session::{Session, SessionState, SessionTable};
use crate::slot::{LoadedSlot, SlotTable};
use crate::state::{Shared, SharedState};

pub(crate) fn session_fd(session: &Session) -> RawFd {
    session.stream.as_raw_fd()
}

pub struct Host {
    reactor: Reactor,
    shared: Shared,
    bound_addr: SocketAddr,
}

impl Host {
    pub fn bind(config: &Config) -> io::Result<Self> {
        let mut reactor = Reactor::new().map_err(|e| match e {
            reactor::Error::Poll(io_err) => io_err,
            other => io::Error::other(other.to_string()),
        })?;

        let listener = TcpListener::bind((config.bind, config.port))?;
        listener.set_nonblocking(true)?;
        let bound_addr = listener.local_addr()?;
        log::info!("listening on {bound_addr}");

        let shared: Shared = Rc::new(RefCell::new(SharedState {
            sessions: SessionTable::with_capacity(config.max_sessions),
            slots: SlotTable::with_capacity(config.max_slots),
            registry: PluginRegistry::with_builtin_plugins(),
            prefix: config.prefix.clone(),
            fatal: None,
        }));

        let listener_fd = listener.as_raw_fd();
        let accept_cb = {
            let shared = shared.clone();
            Box::new(move |reactor: &mut Reactor, _fd: RawFd| {
                accept_loop(reactor, &shared, &listener);
            })
        };
        reactor
            .register_fd(listener_fd, Some(accept_cb), None)
            .map_err(|e| io::Error::other(e.to_string()))?;

        let mut host = Self { reactor, shared, bound_addr };
        for name in &config.load {
            if let Err(err) = host.load_plugin(name) {
                log::warn!("failed to load '{name}' at startup: {err}");
            }
        }
        Ok(host)
    }

    /// The command listener's actual bound address, useful when `--port 0`
    /// let the OS pick an ephemeral one (integration tests do this).
    pub fn local_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    pub fn run(&mut self) -> Result<(), reactor::Error> {
        self.reactor.run()?;
        self.take_fatal()
    }

    pub fn run_once(&mut self) -> Result<(), reactor::Error> {
        self.reactor.run_once()?;
        self.take_fatal()
    }

    /// Surfaces an accept-loop fatal condition recorded in [`SharedState`]
    /// (see its `fatal` field) as a proper `Err` from `run`/`run_once`,
    /// since an FD callback itself cannot return one directly to `reactor`.
    fn take_fatal(&mut self) -> Result<(), reactor::Error> {
        match self.shared.borrow_mut().fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Loads `name` into the lowest-numbered empty slot, matching
    /// `LOADSO`'s own handling exactly (this is the startup-time path;
    /// `handle_line`'s `LOADSO` branch is the wire-command path, both end
    /// up here).
    pub fn load_plugin(&mut self, name: &str) -> Result<(), ProtocolError> {
        let shared = self.shared.clone();
        let mut guard = shared.borrow_mut();
        load_plugin_into(&mut self.reactor, &shared, &mut guard, name)
    }
}

fn accept_loop(reactor: &mut Reactor, shared: &Shared, listener: &TcpListener) {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
            Err(err) => {
                log::warn!("accept failed: {err}");
                return;
            }
        };
        if let Err(err) = stream.set_nonblocking(true) {
            log::warn!("failed to set session {peer} non-blocking: {err}");
            continue;
        }
        let fd = stream.as_raw_fd();
        let mut guard = shared.borrow_mut();
        let session = Session::new(stream, peer);
        let Some(index) = guard.sessions.insert(session) else {
            log::warn!("session table full, dropping connection from {peer}");
            continue;
        };
        drop(guard);

        let read_cb = {
            let shared = shared.clone();
            Box::new(move |reactor: &mut Reactor, fd: RawFd| {
                on_session_readable(reactor, &shared, index, fd);
            })
        };
        if let Err(err) = reactor.register_fd(fd, Some(read_cb), None) {
            log::error!("failed to register session {peer}: {err}; reactor-fatal, shutting down");
            let mut guard = shared.borrow_mut();
            guard.sessions.remove(index);
            guard.fatal = Some(err);
            drop(guard);
            reactor.shutdown();
            return;
        }
        log::debug!("accepted session {index} from {peer}");
    }
}

fn on_session_readable(reactor: &mut Reactor, shared: &Shared, index: usize, fd: RawFd) {
    let mut guard = shared.borrow_mut();
    let Some(mut session) = guard.sessions.take(index) else {
        return;
    };

    let mut buf = [0u8; 1024];
    let mut closed = false;
    loop {
        match session.stream.read(&mut buf) {
            Ok(0) => {
                closed = true;
                break;
            }
            Ok(n) => session.inbuf.extend_from_slice(&buf[..n]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) => {
                log::debug!("session {index} read error, closing: {err}");
                closed = true;
                break;
            }
        }
    }

    // §3: "a command is delimited by a newline; lines longer than the
    // buffer cause the session to be closed". A line is only too long once
    // it's grown past the bound with still no terminator in sight — a
    // buffer that just happens to hold several complete lines back-to-back
    // is fine, however long, since `take_one_line` below drains them one
    // at a time.
    if !closed
        && session.inbuf.len() > crate::session::MAX_COMMAND_LINE_LEN
        && !session.inbuf.contains(&b'\n')
    {
        log::warn!(
            "session {index} sent a line longer than {} bytes with no terminator; closing",
            crate::session::MAX_COMMAND_LINE_LEN
        );
        closed = true;
    }

    if closed {
        // `session` was already taken out of the table above, so there is
        // nothing left in `sessions` for a second removal to find; clear
        // its resource subscription directly and let it drop here, which
        // closes the socket.
        reactor.unregister_fd(fd);
        if let Some(key) = session.subscribed_to {
            let (slot, resource) = key.decode();
            if let Some(loaded) = guard.slots.get_mut(slot) {
                if let Some(res) = loaded.resources.get_mut(resource) {
                    if res.subscribe_key == key {
                        res.subscribe_key = crate::ids::SubscribeKey::NONE;
                    }
                }
            }
        }
        log::debug!("session {index} disconnected");
        return;
    }

    // Only `Command`-state sessions parse further input; a `Monitoring`
    // session's stream is read only to notice disconnection, and an
    // `AwaitingReply` session must not have a second command interleaved
    // ahead of its pending reply (§4.2).
    if session.state != SessionState::Command {
        guard.sessions.put_back(index, session);
        return;
    }

    // A single readable event can deliver several complete lines at once;
    // §4.4 requires dispatching all of them in arrival order before
    // waiting for the fd to become readable again. Stop as soon as the
    // session leaves `Command` state (a `CAT` or a busy `GET` mid-batch
    // must not have its later bytes parsed as a second command yet) or the
    // session is torn down by whatever the command just dispatched did.
    loop {
        let Some(line) = take_one_line(&mut session.inbuf) else {
            guard.sessions.put_back(index, session);
            return;
        };
        guard.sessions.put_back(index, session);
        drop(guard);

        let mut inner_guard = shared.borrow_mut();
        let SharedState {
            sessions,
            slots,
            registry,
            prefix,
        } = &mut *inner_guard;
        let prefix = prefix.clone();
        handle_line(reactor, shared, sessions, slots, registry, &prefix, SessionId(index), &line);
        drop(inner_guard);

        guard = shared.borrow_mut();
        match guard.sessions.take(index) {
            Some(next) if next.state == SessionState::Command => session = next,
            Some(next) => {
                guard.sessions.put_back(index, next);
                return;
            }
            None => return,
        }
    }
}

fn take_one_line(inbuf: &mut Vec<u8>) -> Option<String> {
    let pos = inbuf.iter().position(|&b| b == b'\n')?;
    let line_bytes: Vec<u8> = inbuf.drain(..=pos).collect();
    let trimmed = line_bytes[..line_bytes.len() - 1].strip_suffix(b"\r").unwrap_or(&line_bytes[..line_bytes.len() - 1]);
    Some(String::from_utf8_lossy(trimmed).into_owned())
}

fn handle_line(
    reactor: &mut Reactor,
    shared: &Shared,
    sessions: &mut SessionTable,
    slots: &mut SlotTable,
    registry: &mut PluginRegistry,
    prefix: &str,
    session_id: SessionId,
    line: &str,
) {
    let parsed = match command::parse_line(prefix, line) {
        Ok(p) => p,
        Err(err) => {
            write_error(reactor, shared, sessions, slots, session_id, &err);
            return;
        }
    };

    match parsed {
        ParsedCommand::List => {
            let body = render_list(slots);
            let mut core = Core::new(reactor, sessions, slots, shared.clone());
            core.send_ui(session_id, body.as_bytes());
            core.prompt(session_id);
        }
        ParsedCommand::ListHelp { slot } => {
            match command::resolve_slot(slots, &slot) {
                Ok(slot_index) => {
                    let loaded = slots.get(slot_index).expect("resolve_slot only returns occupied slots");
                    let body = format!("{}\n", loaded.plugin.help());
                    let mut core = Core::new(reactor, sessions, slots, shared.clone());
                    core.send_ui(session_id, body.as_bytes());
                    core.prompt(session_id);
                }
                Err(err) => write_error(reactor, shared, sessions, slots, session_id, &err),
            }
        }
        ParsedCommand::LoadSo { name } => match perform_load(reactor, shared, sessions, slots, registry, &name) {
            Ok(()) => {
                let mut core = Core::new(reactor, sessions, slots, shared.clone());
                core.prompt(session_id);
            }
            Err(err) => write_error(reactor, shared, sessions, slots, session_id, &err),
        },
        ParsedCommand::Get { slot, resource } => {
            dispatch_resource_call(reactor, shared, sessions, slots, registry, session_id, slot, resource, Verb::Get);
        }
        ParsedCommand::Set { slot, resource, value } => {
            dispatch_resource_call(reactor, shared, sessions, slots, registry, session_id, slot, resource, Verb::Set(value));
        }
        ParsedCommand::Cat { slot, resource } => {
            dispatch_cat(reactor, shared, sessions, slots, registry, session_id, slot, resource);
        }
    }
}

fn resolve(
    slots: &SlotTable,
    slot_ref: &SlotRef,
    resource: &str,
) -> Result<(crate::ids::SlotIndex, usize), ProtocolError> {
    let slot_index = command::resolve_slot(slots, slot_ref)?;
    let loaded = slots.get(slot_index).expect("resolve_slot only returns occupied slots");
    let resource_index = command::resolve_resource(loaded, resource)?;
    Ok((slot_index, resource_index))
}

/// Resolves, validates, and invokes a plug-in callback for `GET`/`SET`/
/// `CAT` alike: the take-plugin-out/call/put-plugin-back dance (§9) lives
/// here exactly once. Returns the resolved indices and the plug-in's
/// answer so each verb's caller can apply its own reply-writing policy —
/// notably, whether a prompt follows (every verb except `CAT`, §4.4).
fn invoke_plugin(
    reactor: &mut Reactor,
    shared: &Shared,
    sessions: &mut SessionTable,
    slots: &mut SlotTable,
    session_id: SessionId,
    slot_ref: &SlotRef,
    resource: &str,
    verb: Verb,
) -> Result<(crate::ids::SlotIndex, usize, CallOutcome), ProtocolError> {
    let (slot_index, resource_index) = resolve(slots, slot_ref, resource)?;

    if let Some(err) = check_capability(slots, slot_index, resource_index, &verb) {
        return Err(err);
    }
    if let Some(err) = check_not_busy(slots, slot_index, resource_index) {
        return Err(err);
    }

    let Some((_, mut plugin)) = slots.take_plugin(slot_index) else {
        return Err(ProtocolError::BadSlotIndex(slot_ref_display(slot_ref)));
    };
    let outcome = {
        let mut core = Core::new(reactor, sessions, slots, shared.clone());
        plugin.call(&mut core, session_id, resource_index, verb)
    };
    slots.put_plugin_back(slot_index, plugin);
    Ok((slot_index, resource_index, outcome))
}

fn dispatch_resource_call(
    reactor: &mut Reactor,
    shared: &Shared,
    sessions: &mut SessionTable,
    slots: &mut SlotTable,
    registry: &mut PluginRegistry,
    session_id: SessionId,
    slot_ref: SlotRef,
    resource: String,
    verb: Verb,
) {
    let _ = registry;
    let (slot_index, resource_index, outcome) =
        match invoke_plugin(reactor, shared, sessions, slots, session_id, &slot_ref, &resource, verb) {
            Ok(triple) => triple,
            Err(err) => return write_error(reactor, shared, sessions, slots, session_id, &err),
        };

    let mut core = Core::new(reactor, sessions, slots, shared.clone());
    match outcome {
        CallOutcome::Reply(body) => {
            core.send_ui(session_id, &body);
            core.prompt(session_id);
        }
        CallOutcome::Pending => {
            core.mark_pending(session_id, slot_index, resource_index);
            if let Some(s) = core.sessions.get_mut(session_id.0) {
                s.state = SessionState::AwaitingReply;
            }
        }
        CallOutcome::Done => {
            core.prompt(session_id);
        }
        CallOutcome::Invalid(msg) => {
            let err = ProtocolError::InvalidValue(msg);
            core.send_ui(session_id, err.to_wire_line().as_bytes());
            core.send_ui(session_id, b"\n");
            core.prompt(session_id);
        }
    }
}

/// `CAT` never emits a prompt (§6): a successful subscription leaves the
/// session in `Monitoring`, streaming broadcast data until it disconnects,
/// so there is no "done, ready for your next command" moment to mark.
fn dispatch_cat(
    reactor: &mut Reactor,
    shared: &Shared,
    sessions: &mut SessionTable,
    slots: &mut SlotTable,
    registry: &mut PluginRegistry,
    session_id: SessionId,
    slot_ref: SlotRef,
    resource: String,
) {
    let _ = registry;
    let (slot_index, resource_index) = match resolve(slots, &slot_ref, &resource) {
        Ok(pair) => pair,
        Err(err) => return write_error(reactor, shared, sessions, slots, session_id, &err),
    };
    let loaded = slots.get(slot_index).unwrap();
    let res = &loaded.resources[resource_index];
    if !res.capability.contains(crate::resource::Capability::BROADCASTABLE) {
        let err = ProtocolError::NotBroadcastable(res.name.clone());
        return write_error(reactor, shared, sessions, slots, session_id, &err);
    }

    let key = crate::ids::SubscribeKey::for_resource(slot_index, resource_index);
    let (_, _, outcome) = match invoke_plugin(
        reactor,
        shared,
        sessions,
        slots,
        session_id,
        &SlotRef::Index(slot_index.0),
        &resource,
        Verb::Cat(key),
    ) {
        Ok(triple) => triple,
        Err(err) => return write_error(reactor, shared, sessions, slots, session_id, &err),
    };

    match outcome {
        CallOutcome::Invalid(msg) => {
            let err = ProtocolError::InvalidValue(msg);
            let mut core = Core::new(reactor, sessions, slots, shared.clone());
            core.send_ui(session_id, err.to_wire_line().as_bytes());
            core.send_ui(session_id, b"\n");
            core.prompt(session_id);
        }
        CallOutcome::Reply(body) => {
            let mut core = Core::new(reactor, sessions, slots, shared.clone());
            core.send_ui(session_id, &body);
            core.subscribe(session_id, slot_index, resource_index);
        }
        CallOutcome::Done | CallOutcome::Pending => {
            let mut core = Core::new(reactor, sessions, slots, shared.clone());
            core.subscribe(session_id, slot_index, resource_index);
        }
    }
}

fn check_capability(
    slots: &SlotTable,
    slot: crate::ids::SlotIndex,
    resource: usize,
    verb: &Verb,
) -> Option<ProtocolError> {
    let res = &slots.get(slot)?.resources[resource];
    use crate::resource::Capability;
    match verb {
        Verb::Get => (!res.capability.contains(Capability::READABLE))
            .then(|| ProtocolError::NotReadable(res.name.clone())),
        Verb::Set(_) => (!res.capability.contains(Capability::WRITABLE))
            .then(|| ProtocolError::NotWritable(res.name.clone())),
        Verb::Cat(_) => None,
    }
}

fn check_not_busy(slots: &SlotTable, slot: crate::ids::SlotIndex, resource: usize) -> Option<ProtocolError> {
    let res = &slots.get(slot)?.resources[resource];
    res.pending_owner
        .is_some()
        .then(|| ProtocolError::ResourceBusy(res.name.clone()))
}

fn slot_ref_display(slot_ref: &SlotRef) -> String {
    match slot_ref {
        SlotRef::Index(i) => i.to_string(),
        SlotRef::Name(n) => n.clone(),
    }
}

/// §4.4: "each error is followed by the prompt" — §7 kind 1 confirms the
/// session stays open and ready for its next command, which is exactly
/// what the prompt byte signals. Every protocol-error exit in this module
/// funnels through here (or through the two inline `CallOutcome::Invalid`
/// arms below, which prompt for the same reason) so a client blocked in
/// `stream_until_prompt` never hangs after a rejected command.
fn write_error(
    reactor: &mut Reactor,
    shared: &Shared,
    sessions: &mut SessionTable,
    slots: &mut SlotTable,
    session_id: SessionId,
    err: &ProtocolError,
) {
    let mut core = Core::new(reactor, sessions, slots, shared.clone());
    let line = format!("{}\n", err.to_wire_line());
    core.send_ui(session_id, line.as_bytes());
    core.prompt(session_id);
}

fn render_list(slots: &SlotTable) -> String {
    let mut out = String::new();
    for index in slots.occupied_indices() {
        let loaded = slots.get(index).unwrap();
        out.push_str(&format!("{} {}\n", index.0, loaded.plugin_name));
        for res in &loaded.resources {
            out.push_str(&format!("  {} {}\n", res.name, res.capability.tag()));
        }
    }
    out
}

/// The single real `LOADSO` implementation: looks `name` up in the
/// registry, claims the lowest empty slot, runs the plug-in's
/// initializer, and on success populates that slot's resource table. A
/// failed initializer never calls `slots.occupy` — the transient `Broken`
/// state named in §4.5 exists only as this function's local `plugin`
/// binding, never observable from outside it.
fn perform_load(
    reactor: &mut Reactor,
    shared: &Shared,
    sessions: &mut SessionTable,
    slots: &mut SlotTable,
    registry: &mut PluginRegistry,
    name: &str,
) -> Result<(), ProtocolError> {
    let factory = registry
        .lookup(name)
        .ok_or_else(|| ProtocolError::UnknownPlugin(name.to_string()))?;
    let slot_index = slots.first_empty().ok_or(ProtocolError::NoFreeSlot)?;

    let mut plugin = factory().map_err(|_| ProtocolError::UnknownPlugin(name.to_string()))?;
    {
        let mut core = Core::new(reactor, sessions, slots, shared.clone());
        if let Err(err) = plugin.initialize(&mut core) {
            log::warn!("plug-in '{name}' failed to initialize: {err}");
            return Err(ProtocolError::InvalidValue(format!(
                "plug-in '{name}' failed to initialize"
            )));
        }
    }
    let resources = plugin
        .resource_descriptors()
        .iter()
        .map(crate::resource::Resource::from_descriptor)
        .collect();
    slots.occupy(
        slot_index,
        LoadedSlot {
            plugin_name: name.to_string(),
            plugin,
            resources,
        },
    );
    log::info!("loaded '{name}' into slot {slot_index}");
    Ok(())
}

fn load_plugin_into(
    reactor: &mut Reactor,
    shared: &Shared,
    guard: &mut SharedState,
    name: &str,
) -> Result<(), ProtocolError> {
    perform_load(reactor, shared, &mut guard.sessions, &mut guard.slots, &mut guard.registry, name)
}
