//! Per-record timing and misuse detection.

use facet::Facet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::record::{MutexRecord, OwnerId};

/// Process-wide tallies. Monotonic and approximate, so updated without a lock.
#[derive(Debug, Default)]
pub struct Counters {
    inconsistent: AtomicU64,
    collisions: AtomicU64,
    self_contended: AtomicU64,
}

impl Counters {
    pub(crate) fn note_inconsistent(&self) {
        self.inconsistent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_collision(&self) {
        self.collisions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_self_contention(&self) {
        self.self_contended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            inconsistent: self.inconsistent.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            self_contended: self.self_contended.load(Ordering::Relaxed),
        }
    }
}

#[derive(Facet, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub inconsistent: u64,
    pub collisions: u64,
    pub self_contended: u64,
}

impl MutexRecord {
    fn mark_broken(&mut self, counters: &Counters) {
        counters.note_inconsistent();
        self.is_broken = true;
    }

    /// The mutex was just acquired by `owner` at `now`.
    pub(crate) fn note_acquired(
        &mut self,
        contended: bool,
        owner: OwnerId,
        now: u64,
        counters: &Counters,
    ) {
        if self.lock_level > 0 {
            self.mark_broken(counters);
        }

        self.lock_level += 1;
        self.locked_count += 1;

        if contended {
            self.contended_count += 1;
        }

        if let Some(previous) = self.last_owner
            && previous != owner
        {
            self.owner_changed_count += 1;
        }
        self.last_owner = Some(owner);

        self.acquired_at = Some(now);
    }

    /// The mutex is about to be released at `now`.
    pub(crate) fn note_released(&mut self, now: u64, counters: &Counters) {
        if self.lock_level <= 0 {
            self.mark_broken(counters);
        }

        self.lock_level -= 1;

        // Without a prior acquisition there is no hold interval to measure.
        let Some(acquired_at) = self.acquired_at else {
            return;
        };
        let held = now.saturating_sub(acquired_at);
        self.held_time_total = self.held_time_total.saturating_add(held);
        self.held_time_max = self.held_time_max.max(held);
    }

    /// A timed acquisition gave up while another thread held the mutex.
    pub(crate) fn note_timed_out(&mut self) {
        self.contended_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MutexId;

    const A: OwnerId = OwnerId::new(100);
    const B: OwnerId = OwnerId::new(200);

    fn record() -> MutexRecord {
        MutexRecord::new(MutexId::new(0x1000), String::new())
    }

    #[test]
    fn alternating_lock_unlock_stays_consistent() {
        let counters = Counters::default();
        let mut r = record();
        for i in 0..5u64 {
            r.note_acquired(false, A, i * 100, &counters);
            assert_eq!(r.lock_level(), 1);
            r.note_released(i * 100 + 10, &counters);
            assert_eq!(r.lock_level(), 0);
        }
        assert!(!r.is_broken());
        assert_eq!(r.locked_count, 5);
        assert_eq!(counters.snapshot().inconsistent, 0);
    }

    #[test]
    fn double_lock_marks_broken_and_stays_broken() {
        let counters = Counters::default();
        let mut r = record();
        r.note_acquired(false, A, 0, &counters);
        r.note_acquired(false, A, 1, &counters);
        assert!(r.is_broken());
        assert_eq!(r.lock_level(), 2);
        r.note_released(2, &counters);
        r.note_released(3, &counters);
        r.note_acquired(false, A, 4, &counters);
        r.note_released(5, &counters);
        assert!(r.is_broken());
        assert_eq!(counters.snapshot().inconsistent, 1);
    }

    #[test]
    fn unlock_without_lock_marks_broken() {
        let counters = Counters::default();
        let mut r = record();
        r.note_released(50, &counters);
        assert!(r.is_broken());
        assert_eq!(r.lock_level(), -1);
        assert_eq!(r.held_time_total, 0);
        assert_eq!(counters.snapshot().inconsistent, 1);
    }

    #[test]
    fn owner_changes_only_counted_between_distinct_threads() {
        let counters = Counters::default();
        let mut r = record();
        for (owner, expected) in [(A, 0), (A, 0), (B, 1), (B, 1), (A, 2)] {
            r.note_acquired(false, owner, 0, &counters);
            r.note_released(0, &counters);
            assert_eq!(r.owner_changed_count, expected);
        }
        assert_eq!(r.last_owner, Some(A));
    }

    #[test]
    fn hold_times_accumulate_and_track_maximum() {
        let counters = Counters::default();
        let mut r = record();
        let holds = [30u64, 120, 5, 119];
        let mut now = 1_000;
        for hold in holds {
            r.note_acquired(false, A, now, &counters);
            now += hold;
            r.note_released(now, &counters);
            now += 7;
            assert!(r.held_time_total >= r.held_time_max);
        }
        assert_eq!(r.held_time_total, holds.iter().sum::<u64>());
        assert_eq!(r.held_time_max, 120);
    }

    #[test]
    fn contention_is_counted_once_per_acquisition() {
        let counters = Counters::default();
        let mut r = record();
        r.note_acquired(true, A, 0, &counters);
        r.note_released(1, &counters);
        r.note_acquired(false, A, 2, &counters);
        r.note_released(3, &counters);
        assert_eq!(r.contended_count, 1);
        assert_eq!(r.locked_count, 2);
    }

    #[test]
    fn timeout_counts_contention_without_acquiring() {
        let mut r = record();
        r.note_timed_out();
        assert_eq!(r.contended_count, 1);
        assert_eq!(r.locked_count, 0);
        assert_eq!(r.lock_level(), 0);
    }
}
