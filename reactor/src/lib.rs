//! A single-threaded, cooperative event multiplexor.
//!
//! `reactor` is the bottom layer of this workspace: a bounded table of
//! non-blocking file descriptors with per-direction callbacks, a bounded
//! table of one-shot and periodic timers, and one `run` loop that drives
//! both without busy-waiting or blocking past the next deadline. It has no
//! notion of sessions, slots, or the command protocol those live in
//! `slotd`; this crate only knows fds and milliseconds, the same way the
//! `mio` crate it is built on only knows readiness.
//!
//! Built directly on `mio::Poll` the way `mio`'s own `net::tcp::TcpListener`
//! wraps a platform socket in `IoSource` — `reactor::Reactor` wraps
//! `mio::Poll` in exactly the same spirit, adding the timer wheel and FD
//! table `mio` deliberately leaves to its callers.

mod error;
mod fd_table;
mod reactor;
mod timer;

pub use error::Error;
pub use fd_table::FdCallback;
pub use reactor::{Reactor, DEFAULT_MAX_FDS, DEFAULT_MAX_TIMERS};
pub use timer::{TimerCallback, TimerHandle, TimerKind};
