//! The tables a running daemon shares between the accept loop, the command
//! dispatcher, and any plug-in timer that fires independently of a live
//! command (§4.6's periodic broadcasts are the main customer). Bundled into
//! one `Rc<RefCell<_>>` so a [`crate::core::Core`] handed out for the
//! duration of one command can also stash a clone of the `Rc` for a timer
//! callback that will need to rebuild its own `Core` long after that
//! command has finished.

use std::cell::RefCell;
use std::rc::Rc;

use crate::plugin::PluginRegistry;
use crate::session::SessionTable;
use crate::slot::SlotTable;

pub struct SharedState {
    pub sessions: SessionTable,
    pub slots: SlotTable,
    pub registry: PluginRegistry,
    pub prefix: String,
    /// Set by the accept loop when `register_fd` fails for a freshly
    /// accepted session (FD table exhaustion). §4.2/§7 kind 4 treat this as
    /// reactor-fatal, the same as a failure registering the listener itself
    /// in [`crate::host::Host::bind`]; since an FD callback can only return
    /// `()` to `reactor`, this is how the condition travels out to
    /// [`crate::host::Host::run`]/`run_once` instead of being swallowed
    /// per-connection.
    pub fatal: Option<reactor::Error>,
}

/// Shorthand for the `Rc<RefCell<_>>` every long-lived closure in this crate
/// holds a clone of — the same shape `host::Host` uses for its accept and
/// read callbacks, extended to plug-in timers.
pub type Shared = Rc<RefCell<SharedState>>;
