//! Bounded timer wheel (§4.3). A fixed-capacity array of entries, each
//! either unused, one-shot, or periodic, keyed by an absolute millisecond
//! deadline. `Reactor::run` asks this table for the next wait bound and,
//! after waking, for every timer whose deadline has passed.

use crate::Reactor;

/// Whether a scheduled timer fires once or repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    OneShot,
    Periodic,
}

/// Callback invoked when a timer fires. Receives the reactor (so it may
/// register FDs, schedule further timers, or cancel itself) and its own
/// handle (so a periodic timer can cancel itself from inside its callback).
pub type TimerCallback = Box<dyn FnMut(&mut Reactor, TimerHandle)>;

/// Opaque reference to a scheduled timer, returned by `schedule_timer`.
///
/// Carries a generation counter alongside the table index so that a handle
/// to a timer that has since fired (one-shot) or been cancelled and the
/// slot reused cannot be mistaken for the new occupant — the C original's
/// "validate that the handle... is aligned to an entry boundary" becomes,
/// in a typed arena, "the generation must match".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    index: u32,
    generation: u32,
}

enum Slot {
    Unused,
    Armed {
        kind: TimerKind,
        deadline_ms: u64,
        period_ms: u64,
        callback: TimerCallback,
    },
}

impl Default for Slot {
    fn default() -> Self {
        Slot::Unused
    }
}

/// Fixed-size table of timer slots. `schedule_timer` allocates the first
/// `Unused` entry; once `capacity` entries are armed, further schedules
/// fail rather than growing the table (§3 invariant).
pub struct TimerTable {
    capacity: usize,
    slots: Vec<Slot>,
    generations: Vec<u32>,
}

impl TimerTable {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        Self {
            capacity,
            slots,
            generations: vec![0; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocate the first unused slot, deriving its absolute deadline from
    /// `now_ms + interval_ms`. `Periodic` timers also record `interval_ms`
    /// as their recurring period.
    pub fn schedule(
        &mut self,
        kind: TimerKind,
        interval_ms: u64,
        now_ms: u64,
        callback: TimerCallback,
    ) -> Option<TimerHandle> {
        let index = self.slots.iter().position(|s| matches!(s, Slot::Unused))?;
        self.slots[index] = Slot::Armed {
            kind,
            deadline_ms: now_ms.saturating_add(interval_ms),
            period_ms: interval_ms,
            callback,
        };
        Some(TimerHandle {
            index: index as u32,
            generation: self.generations[index],
        })
    }

    /// Idempotent; a stale or out-of-range handle is silently ignored, and
    /// this is explicitly safe to call from inside the timer's own
    /// callback (the callback already owns the slot's contents by then,
    /// see `take_expired`).
    pub fn cancel(&mut self, handle: TimerHandle) {
        let index = handle.index as usize;
        if index >= self.capacity || self.generations[index] != handle.generation {
            return;
        }
        self.slots[index] = Slot::Unused;
        self.generations[index] = self.generations[index].wrapping_add(1);
    }

    /// `max(0, min(all deadlines) - now)`, or `None` when no timer is armed
    /// (§4.1 step 1: "no wait bound").
    pub fn next_wait(&self, now_ms: u64) -> Option<u64> {
        self.slots
            .iter()
            .filter_map(|s| match s {
                Slot::Armed { deadline_ms, .. } => Some(*deadline_ms),
                Slot::Unused => None,
            })
            .min()
            .map(|deadline| deadline.saturating_sub(now_ms))
    }

    /// Remove the callback for a slot whose deadline has passed, leaving
    /// the slot in a transient `Unused` state so the callback can freely
    /// call back into the reactor (including rescheduling or cancelling
    /// itself) without observing its own still-armed entry. The caller is
    /// responsible for re-arming periodic timers via `rearm`.
    ///
    /// Re-checks liveness at call time: if the slot was cancelled or
    /// reassigned by an earlier callback in the same firing pass, this
    /// returns `None` rather than firing a stale timer.
    pub fn take_expired(
        &mut self,
        index: usize,
        now_ms: u64,
    ) -> Option<(TimerHandle, TimerKind, u64, u64, TimerCallback)> {
        match &self.slots[index] {
            Slot::Armed { deadline_ms, .. } if *deadline_ms <= now_ms => {}
            _ => return None,
        }
        let handle = TimerHandle {
            index: index as u32,
            generation: self.generations[index],
        };
        let slot = std::mem::take(&mut self.slots[index]);
        match slot {
            Slot::Armed {
                kind,
                deadline_ms,
                period_ms,
                callback,
            } => Some((handle, kind, period_ms, deadline_ms, callback)),
            Slot::Unused => None,
        }
    }

    /// Re-arm a periodic timer after its callback has run. `now_ms` is the
    /// instant the firing pass observed; if `old_deadline + period` is
    /// still `<= now_ms` ("CPU hog" overrun, §4.1), the new deadline is
    /// clamped to `now_ms` and `true` is returned so the caller can log the
    /// overrun.
    pub fn rearm_periodic(
        &mut self,
        handle: TimerHandle,
        old_deadline_ms: u64,
        period_ms: u64,
        now_ms: u64,
        callback: TimerCallback,
    ) -> bool {
        let index = handle.index as usize;
        // The slot may have been reused by the callback itself (e.g. it
        // cancelled this timer and scheduled a new one in the same spot is
        // impossible — cancel bumps the generation — but it may simply have
        // left the slot Unused on purpose). Only rearm if still the same
        // generation and still Unused (i.e. nobody raced us).
        if self.generations[index] != handle.generation {
            return false;
        }
        let mut next_deadline = old_deadline_ms.saturating_add(period_ms);
        let overrun = next_deadline <= now_ms;
        if overrun {
            next_deadline = now_ms;
        }
        self.slots[index] = Slot::Armed {
            kind: TimerKind::Periodic,
            deadline_ms: next_deadline,
            period_ms,
            callback,
        };
        overrun
    }

    /// Snapshot of indices that are currently armed, taken once per firing
    /// pass so callbacks mutating the table mid-iteration (scheduling,
    /// cancelling) can't change which slots this pass considers.
    pub fn armed_indices(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| matches!(s, Slot::Armed { .. }).then_some(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_allocates_first_unused_slot() {
        let mut table = TimerTable::with_capacity(2);
        let h0 = table.schedule(TimerKind::OneShot, 10, 0, Box::new(|_, _| {})).unwrap();
        let h1 = table.schedule(TimerKind::OneShot, 10, 0, Box::new(|_, _| {})).unwrap();
        assert_ne!(h0, h1);
        assert!(table
            .schedule(TimerKind::OneShot, 10, 0, Box::new(|_, _| {}))
            .is_none());
    }

    #[test]
    fn cancel_frees_the_slot_for_reuse() {
        let mut table = TimerTable::with_capacity(1);
        let h0 = table.schedule(TimerKind::OneShot, 10, 0, Box::new(|_, _| {})).unwrap();
        table.cancel(h0);
        let h1 = table.schedule(TimerKind::OneShot, 10, 0, Box::new(|_, _| {})).unwrap();
        assert_ne!(h0, h1, "reused slot must carry a new generation");
    }

    #[test]
    fn cancel_is_idempotent_on_stale_handles() {
        let mut table = TimerTable::with_capacity(1);
        let h0 = table.schedule(TimerKind::OneShot, 10, 0, Box::new(|_, _| {})).unwrap();
        table.cancel(h0);
        table.cancel(h0); // already unused; must not panic or affect anything else
    }

    #[test]
    fn next_wait_is_none_when_table_is_empty() {
        let table = TimerTable::with_capacity(4);
        assert_eq!(table.next_wait(1_000), None);
    }

    #[test]
    fn next_wait_clamps_to_zero_for_overdue_timers() {
        let mut table = TimerTable::with_capacity(1);
        table.schedule(TimerKind::OneShot, 10, 0, Box::new(|_, _| {}));
        assert_eq!(table.next_wait(50), Some(0));
    }

    #[test]
    fn take_expired_ignores_not_yet_due_timers() {
        let mut table = TimerTable::with_capacity(1);
        table.schedule(TimerKind::OneShot, 1_000, 0, Box::new(|_, _| {}));
        assert!(table.take_expired(0, 10).is_none());
    }

    #[test]
    fn rearm_periodic_clamps_to_now_on_overrun() {
        let mut table = TimerTable::with_capacity(1);
        table.schedule(TimerKind::Periodic, 10, 0, Box::new(|_, _| {}));
        let (handle, kind, period, old_deadline, cb) = table.take_expired(0, 10).unwrap();
        assert_eq!(kind, TimerKind::Periodic);
        assert_eq!(old_deadline, 10);
        // Simulate the reactor having been blocked for 75ms past the deadline.
        let overran = table.rearm_periodic(handle, old_deadline, period, 85, cb);
        assert!(overran);
        assert_eq!(table.next_wait(85), Some(0));
    }

    #[test]
    fn rearm_periodic_resumes_original_cadence_without_overrun() {
        let mut table = TimerTable::with_capacity(1);
        table.schedule(TimerKind::Periodic, 10, 0, Box::new(|_, _| {}));
        let (handle, _kind, period, old_deadline, cb) = table.take_expired(0, 10).unwrap();
        let overran = table.rearm_periodic(handle, old_deadline, period, 10, cb);
        assert!(!overran);
        assert_eq!(table.next_wait(10), Some(10));
    }
}
