//! A fixed-size table of peripheral plug-in slots, exposed over a
//! line-oriented TCP command protocol, driven by the single-threaded
//! [`reactor`] crate underneath it.
//!
//! `reactor` only knows fds and milliseconds; everything here is the layer
//! that turns "fd 7 is readable" into "parse a command line, resolve it
//! against the slot table, invoke a plug-in's resource callback, write the
//! reply, emit the prompt" (§4.4-§4.6 of `SPEC_FULL.md`). Plug-ins are
//! first-class Rust types registered by name (§9 strategy (a)), not
//! `dlopen`ed shared objects; see [`plugin::PluginRegistry`].

pub mod command;
pub mod config;
pub mod core;
pub mod error;
pub mod fpga;
pub mod host;
pub mod ids;
pub mod plugin;
pub mod plugins;
pub mod resource;
pub mod session;
pub mod slot;
pub mod state;

pub use config::Config;
pub use core::Core;
pub use error::{PluginError, ProtocolError};
pub use host::Host;
pub use plugin::{CallOutcome, Plugin, PluginFactory, PluginRegistry, Verb};
