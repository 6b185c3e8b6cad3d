use std::io;

/// Failures the reactor itself can raise.
///
/// `FdTableFull` and `Poll` are the two conditions §4.1/§4.2 of the design
/// call reactor-fatal: the caller is expected to log them and exit rather
/// than retry. `TimerTableFull` is a scheduling failure the caller can
/// recover from (skip the timer, degrade a feature, etc).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The FD table has no free slot. The deployment's `MAX_FDS` bound is
    /// too small for the workload; this is treated as fatal rather than
    /// grown dynamically.
    #[error("fd table is full (capacity {capacity})")]
    FdTableFull { capacity: usize },

    /// The timer table has no free slot.
    #[error("timer table is full (capacity {capacity})")]
    TimerTableFull { capacity: usize },

    /// At least one of `read` / `write` must be supplied to `register_fd`.
    #[error("register_fd requires at least one of a read or write callback")]
    NoCallbacks,

    /// The OS-level readiness wait failed for a reason other than a
    /// retried signal interruption.
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),
}
