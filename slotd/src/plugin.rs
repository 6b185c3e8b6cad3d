//! §6's plug-in contract and §9's chosen redesign: plug-ins are first-class
//! Rust types registered by name at startup, not `dlopen`ed shared objects.
//! `LOADSO <filename>` keeps its original surface semantics — "place a
//! named module into the first empty slot and run its initializer" — by
//! looking `filename` up in a name→factory map instead of the dynamic
//! linker.

use std::collections::BTreeMap;

use crate::core::Core;
use crate::error::PluginError;
use crate::ids::{SessionId, SubscribeKey};
use crate::resource::ResourceDescriptor;

/// The verb a resource callback is being invoked for, carrying whatever
/// operand that verb needs. Mirrors §6's `(verb, resource_index, value,
/// ...)` callback signature; `resource_index` and `session` are passed
/// alongside rather than folded into this type, so a plug-in's `call` can
/// `match` on the verb without also matching on which resource it's for.
pub enum Verb {
    Get,
    Set(String),
    /// Carries the key the host already computed and recorded on both the
    /// session and the resource, so the plug-in can cache it locally and
    /// use it in later [`Core::broadcast`] calls.
    Cat(SubscribeKey),
}

/// What a plug-in's `call` produced.
pub enum CallOutcome {
    /// Synchronous reply body for a `GET` (or, unusually, a `SET` that
    /// wants to echo something back — the host still only prompts, §4.4
    /// documents `SET` as prompt-only, so a `SET` returning `Reply` has its
    /// body logged and discarded rather than written to the wire).
    Reply(Vec<u8>),
    /// The resource's pending-reply owner has been set to the requesting
    /// session; the host must not prompt. The plug-in will call
    /// [`Core::send_ui`] and [`Core::prompt`] later, from whatever callback
    /// eventually produces the answer.
    Pending,
    /// The callback completed with no reply body (`SET`, `CAT`).
    Done,
    /// The operand was rejected; reported to the client as `ERROR 008`.
    Invalid(String),
}

/// The plug-in contract (§4.5, §6). A plug-in is both the "loaded-module
/// handle" and the "private state pointer" of the C original: the Rust
/// trait object itself carries all the state that used to live behind an
/// opaque `void *`.
pub trait Plugin {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn help(&self) -> &str;

    /// The resource table this plug-in populates at initialization. Called
    /// once, immediately after a successful [`Plugin::initialize`].
    fn resource_descriptors(&self) -> &[ResourceDescriptor];

    /// Run this plug-in's initializer. Returning `Err` leaves the owning
    /// slot in `Broken` transiently, then rolled back to `Empty` by the
    /// host (§4.5 state 4) — never exposed to commands in between.
    fn initialize(&mut self, core: &mut Core) -> Result<(), PluginError> {
        let _ = core;
        Ok(())
    }

    /// Dispatch a `GET` / `SET` / `CAT` against one of this plug-in's
    /// resources. `resource` is the resource's index into the slice
    /// returned by [`Plugin::resource_descriptors`].
    fn call(
        &mut self,
        core: &mut Core,
        session: SessionId,
        resource: usize,
        verb: Verb,
    ) -> CallOutcome;

    /// §6's second plug-in callback: `(slot, packet, length)`, invoked by a
    /// downstream FPGA transport module when a reply packet arrives. No
    /// built-in plug-in in this repository bridges to real hardware (§1
    /// scope cut), so the default is a no-op; the seam exists so a future
    /// FPGA-backed plug-in has somewhere to hang its packet handler.
    fn on_packet(&mut self, core: &mut Core, packet: &[u8]) {
        let _ = (core, packet);
    }
}

/// `fn() -> Result<Box<dyn Plugin>, PluginError>`. A fresh instance per
/// call, the same way the C initializer runs once per `LOADSO`/slot.
pub type PluginFactory = fn() -> Result<Box<dyn Plugin>, PluginError>;

/// Name → factory map, built once at startup (§9 strategy (a)). Stands in
/// for the C original's directory of shared objects.
pub struct PluginRegistry {
    factories: BTreeMap<&'static str, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, factory: PluginFactory) {
        self.factories.insert(name, factory);
    }

    pub fn lookup(&self, name: &str) -> Option<PluginFactory> {
        self.factories.get(name).copied()
    }

    pub fn with_builtin_plugins() -> Self {
        let mut registry = Self::new();
        crate::plugins::register_all(&mut registry);
        registry
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
