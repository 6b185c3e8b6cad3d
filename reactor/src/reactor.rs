use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::fd_table::{FdCallback, FdTable};
use crate::timer::{TimerCallback, TimerHandle, TimerKind, TimerTable};
use crate::Error;

/// Default bound on simultaneously registered file descriptors. Sized for a
/// handful of listening sockets plus a modest number of concurrent command
/// sessions; raise it with [`Reactor::with_capacity`] for busier deployments.
pub const DEFAULT_MAX_FDS: usize = 256;

/// Default bound on simultaneously armed timers.
pub const DEFAULT_MAX_TIMERS: usize = 64;

const EVENTS_CAPACITY: usize = 128;

/// The single-threaded, cooperative event multiplexor (§4.1).
///
/// Owns the OS readiness primitive (`mio::Poll`), the bounded FD registry,
/// and the bounded timer wheel. Nothing here knows about sessions, slots,
/// or the command protocol — `slotd` builds those on top by registering
/// callbacks.
pub struct Reactor {
    poll: Poll,
    events: Events,
    fds: FdTable,
    timers: TimerTable,
    clock_start: Instant,
    running: bool,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(DEFAULT_MAX_FDS, DEFAULT_MAX_TIMERS)
    }

    pub fn with_capacity(max_fds: usize, max_timers: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
            fds: FdTable::with_capacity(max_fds),
            timers: TimerTable::with_capacity(max_timers),
            clock_start: Instant::now(),
            running: false,
        })
    }

    /// Milliseconds since this reactor was constructed. Deadlines are
    /// expressed relative to this epoch; a `u64` of milliseconds does not
    /// meaningfully overflow within any realistic uptime (§4.3 requires
    /// tolerance across at least a month — this tolerates several hundred
    /// thousand years).
    pub fn now_ms(&self) -> u64 {
        self.clock_start.elapsed().as_millis() as u64
    }

    /// Register `fd` for readiness callbacks. At least one of `read` /
    /// `write` must be present. Re-registering an already-known `fd`
    /// replaces its callbacks in place and keeps its token.
    pub fn register_fd(
        &mut self,
        fd: RawFd,
        read: Option<FdCallback>,
        write: Option<FdCallback>,
    ) -> Result<(), Error> {
        if read.is_none() && write.is_none() {
            return Err(Error::NoCallbacks);
        }
        let interest = Self::interest_for(read.is_some(), write.is_some());
        let (index, replaced) = self.fds.upsert(fd, read, write)?;
        let token = Token(index);
        let mut source = SourceFd(&fd);
        let result = if replaced {
            self.poll.registry().reregister(&mut source, token, interest)
        } else {
            self.poll.registry().register(&mut source, token, interest)
        };
        if let Err(err) = result {
            // Roll the table entry back so a failed registration doesn't
            // leave a phantom slot occupied.
            self.fds.remove(fd);
            return Err(Error::Poll(err));
        }
        Ok(())
    }

    fn interest_for(readable: bool, writable: bool) -> Interest {
        match (readable, writable) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (true, false) => Interest::READABLE,
            (false, true) => Interest::WRITABLE,
            (false, false) => unreachable!("validated by register_fd"),
        }
    }

    /// Idempotent; a no-op for an `fd` that isn't registered.
    pub fn unregister_fd(&mut self, fd: RawFd) {
        if self.fds.remove(fd).is_some() {
            let mut source = SourceFd(&fd);
            if let Err(err) = self.poll.registry().deregister(&mut source) {
                log::debug!("deregistering fd {fd} failed (already closed?): {err}");
            }
        }
    }

    pub fn schedule_timer(
        &mut self,
        kind: TimerKind,
        interval_ms: u64,
        callback: TimerCallback,
    ) -> Result<TimerHandle, Error> {
        let now = self.now_ms();
        self.timers
            .schedule(kind, interval_ms, now, callback)
            .ok_or(Error::TimerTableFull {
                capacity: self.timers.capacity(),
            })
    }

    /// Safe to call from inside the timer's own callback.
    pub fn cancel_timer(&mut self, handle: TimerHandle) {
        self.timers.cancel(handle);
    }

    /// Request that [`Reactor::run`] return after finishing the current
    /// iteration, instead of looping forever. The C original's reactor has
    /// no such exit (`run()` never returns); this is the one deliberate
    /// addition beyond §4.1's literal contract, needed so the loop is
    /// testable and so a host process can shut down cleanly on signal.
    pub fn shutdown(&mut self) {
        self.running = false;
    }

    /// Enter the event loop. Runs until [`Reactor::shutdown`] is called
    /// (including from within a callback) or a reactor-fatal error occurs.
    pub fn run(&mut self) -> Result<(), Error> {
        self.running = true;
        while self.running {
            self.run_once()?;
        }
        Ok(())
    }

    /// Run exactly one iteration: wait, fire expired timers, dispatch ready
    /// FDs. Exposed separately from `run` so tests can drive the loop
    /// deterministically.
    pub fn run_once(&mut self) -> Result<(), Error> {
        let now = self.now_ms();
        let wait = self.timers.next_wait(now).map(Duration::from_millis);

        loop {
            match self.poll.poll(&mut self.events, wait) {
                Ok(()) => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::Poll(err)),
            }
        }

        // All expired timers fire before any FD callback (§4.1 ordering).
        let now = self.now_ms();
        self.fire_expired_timers(now);

        let ready: Vec<(usize, bool, bool)> = self
            .events
            .iter()
            .map(|event| (event.token().0, event.is_readable(), event.is_writable()))
            .collect();
        self.dispatch_fds(&ready);

        Ok(())
    }

    fn fire_expired_timers(&mut self, now: u64) {
        for index in self.timers.armed_indices() {
            let Some((handle, kind, period, old_deadline, mut callback)) =
                self.timers.take_expired(index, now)
            else {
                continue;
            };
            callback(self, handle);
            if kind == TimerKind::Periodic {
                let overran = self
                    .timers
                    .rearm_periodic(handle, old_deadline, period, now, callback);
                if overran {
                    log::warn!(
                        "timer {handle:?} missed its deadline by more than one period; \
                         next fire clamped to now"
                    );
                }
            }
            // OneShot: take_expired already left the slot Unused.
        }
    }

    fn dispatch_fds(&mut self, ready: &[(usize, bool, bool)]) {
        for &(index, readable, writable) in ready {
            if readable {
                if let Some((fd, mut cb)) = self.take_read(index) {
                    cb(self, fd);
                    self.put_read_back(index, fd, cb);
                }
            }
            if writable {
                if let Some((fd, mut cb)) = self.take_write(index) {
                    cb(self, fd);
                    self.put_write_back(index, fd, cb);
                }
            }
        }
    }

    fn take_read(&mut self, index: usize) -> Option<(RawFd, FdCallback)> {
        let entry = self.fds.entry_mut(index)?;
        let cb = entry.read.take()?;
        Some((entry.fd, cb))
    }

    fn put_read_back(&mut self, index: usize, fd: RawFd, cb: FdCallback) {
        if let Some(entry) = self.fds.entry_mut(index) {
            if entry.fd == fd {
                entry.read = Some(cb);
            }
        }
    }

    fn take_write(&mut self, index: usize) -> Option<(RawFd, FdCallback)> {
        let entry = self.fds.entry_mut(index)?;
        let cb = entry.write.take()?;
        Some((entry.fd, cb))
    }

    fn put_write_back(&mut self, index: usize, fd: RawFd, cb: FdCallback) {
        if let Some(entry) = self.fds.entry_mut(index) {
            if entry.fd == fd {
                entry.write = Some(cb);
            }
        }
    }

    /// Used by `slotd`'s host to confirm the invariant that every
    /// registered FD appears in the readiness set built for the next wait
    /// (§8 testable property).
    pub fn registered_fds(&self) -> Vec<RawFd> {
        self.fds
            .occupied_indices()
            .into_iter()
            .filter_map(|i| self.fds.fd_at(i))
            .collect()
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new().expect("mio::Poll::new should not fail on a supported platform")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn register_fd_rejects_no_callbacks() {
        let mut reactor = Reactor::with_capacity(4, 4).unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        let err = reactor.register_fd(a.as_raw_fd(), None, None).unwrap_err();
        assert!(matches!(err, Error::NoCallbacks));
    }

    #[test]
    fn readable_fd_fires_its_read_callback() {
        let mut reactor = Reactor::with_capacity(4, 4).unwrap();
        let (a, b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        reactor
            .register_fd(
                b.as_raw_fd(),
                Some(Box::new(move |r: &mut Reactor, fd| {
                    fired2.fetch_add(1, Ordering::SeqCst);
                    r.unregister_fd(fd);
                })),
                None,
            )
            .unwrap();
        use std::io::Write;
        let mut a = a;
        a.write_all(b"x").unwrap();

        reactor.run_once().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(reactor.registered_fds().is_empty());
    }

    #[test]
    fn timer_fires_after_its_interval_and_oneshot_self_destructs() {
        let mut reactor = Reactor::with_capacity(4, 4).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        reactor
            .schedule_timer(
                TimerKind::OneShot,
                0,
                Box::new(move |_, _| {
                    fired2.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        reactor.run_once().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // A second iteration must not fire it again.
        reactor.run_once().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn periodic_timer_can_cancel_itself_from_its_own_callback() {
        let mut reactor = Reactor::with_capacity(4, 4).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        reactor
            .schedule_timer(
                TimerKind::Periodic,
                0,
                Box::new(move |r: &mut Reactor, handle| {
                    count2.fetch_add(1, Ordering::SeqCst);
                    r.cancel_timer(handle);
                }),
            )
            .unwrap();
        reactor.run_once().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        reactor.run_once().unwrap();
        // Cancelled inside its own callback: must not fire a second time.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_stops_run_after_current_iteration() {
        let mut reactor = Reactor::with_capacity(4, 4).unwrap();
        reactor
            .schedule_timer(
                TimerKind::OneShot,
                0,
                Box::new(|r: &mut Reactor, _| r.shutdown()),
            )
            .unwrap();
        reactor.run().unwrap();
    }
}
