// Ring storage shared by the trial caches
//
// A RingSet owns one fixed-size lane per channel or trackable. The producer
// appends under the set's lock; the consumer captures the cursors under the
// lock, copies slots without it, and commits its read position back under the
// lock. Slots are AtomicCells so the unlocked copy never races a torn write.
//
// A lane holds `capacity` records in `capacity + 1` slots: it is empty when
// `write == start` and full when advancing `write` would reach `start`.
//
// Discarding a lane moves `start` up to `write` and bumps the lane's
// generation. The write cursor never moves backwards, so slots a consumer is
// copying are only reused after the generation changed, and a copy taken
// across a generation change is thrown away.

use crossbeam::atomic::AtomicCell;
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::TryReserveError;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Largest per-lane capacity accepted by trial configuration
pub const MAX_CAPACITY: usize = 1 << 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Cursor {
    /// Next slot the producer fills
    pub write: usize,
    /// Oldest unconsumed slot
    pub start: usize,
    /// Bumped whenever the lane is discarded, invalidating in-flight reads
    pub generation: u64,
}

pub(crate) struct RingState<M> {
    cursors: Vec<Cursor>,
    meta: Vec<M>,
}

/// Diagnostics for one trial cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub capacity: usize,
    pub lanes: usize,
    pub total_written: u64,
    pub total_drained: u64,
    pub total_dropped: u64,
    /// Dropped record count per lane key, only for lanes that overflowed
    pub overflowed: Vec<(u16, u64)>,
}

pub(crate) struct RingSet<T, M = ()> {
    slots: usize,
    lanes: Vec<Box<[AtomicCell<T>]>>,
    state: Mutex<RingState<M>>,
    /// Mirror of each cursor's generation, readable without the lock
    generations: Vec<AtomicU64>,
    dropped: Vec<AtomicU64>,
    total_written: AtomicU64,
    total_drained: AtomicU64,
}

impl<T: Copy + Default, M: Clone> RingSet<T, M> {
    /// Allocate `lanes` lanes of `capacity` records each, failing softly when
    /// the allocator refuses
    pub fn try_new(capacity: usize, lanes: usize, meta: M) -> Result<Self, TryReserveError> {
        let slots = capacity + 1;
        let mut storage = Vec::new();
        storage.try_reserve_exact(lanes)?;
        for _ in 0..lanes {
            let mut lane: Vec<AtomicCell<T>> = Vec::new();
            lane.try_reserve_exact(slots)?;
            lane.extend((0..slots).map(|_| AtomicCell::new(T::default())));
            storage.push(lane.into_boxed_slice());
        }

        Ok(Self {
            slots,
            lanes: storage,
            state: Mutex::new(RingState {
                cursors: vec![Cursor::default(); lanes],
                meta: vec![meta; lanes],
            }),
            generations: (0..lanes).map(|_| AtomicU64::new(0)).collect(),
            dropped: (0..lanes).map(|_| AtomicU64::new(0)).collect(),
            total_written: AtomicU64::new(0),
            total_drained: AtomicU64::new(0),
        })
    }
}

impl<T: Copy, M: Clone> RingSet<T, M> {
    pub fn capacity(&self) -> usize {
        self.slots - 1
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Producer handle; holds the lock until dropped
    pub fn writer(&self) -> Writer<'_, T, M> {
        Writer {
            ring: self,
            state: self.state.lock(),
        }
    }

    /// Capture every lane's cursors (the write cursor becomes the read end)
    pub fn snapshot(&self) -> Snapshot<M> {
        let state = self.state.lock();
        Snapshot {
            slots: self.slots,
            cursors: state.cursors.clone(),
            meta: state.meta.clone(),
        }
    }

    /// Copy up to `count` records of a lane starting at the snapshot's start.
    /// Empty when the lane was discarded since the snapshot.
    pub fn read(&self, snapshot: &Snapshot<M>, lane: usize, count: usize) -> Vec<T> {
        let seen = snapshot.cursors[lane];
        let count = count.min(snapshot.pending(lane));
        let slots = &self.lanes[lane];
        let mut records: Vec<T> = (0..count)
            .map(|i| slots[(seen.start + i) % self.slots].load())
            .collect();
        if self.generations[lane].load(Ordering::SeqCst) != seen.generation {
            log::debug!("Lane {} discarded during read", lane);
            records.clear();
        }
        records
    }

    /// Advance lanes past the records consumed from `snapshot`. Lanes rewound
    /// since the snapshot are skipped.
    pub fn commit(&self, snapshot: &Snapshot<M>, consumed: &[(usize, usize)]) -> usize {
        let mut state = self.state.lock();
        let mut committed = 0;
        for &(lane, count) in consumed {
            let seen = snapshot.cursors[lane];
            let cursor = &mut state.cursors[lane];
            if cursor.generation != seen.generation {
                log::debug!("Skipping commit on lane {} discarded during read", lane);
                continue;
            }
            let count = count.min(snapshot.pending(lane));
            cursor.start = (seen.start + count) % self.slots;
            committed += count;
        }
        self.total_drained
            .fetch_add(committed as u64, Ordering::Relaxed);
        committed
    }

    /// Empty every lane
    pub fn reset(&self) {
        let mut state = self.state.lock();
        for (cursor, generation) in state.cursors.iter_mut().zip(&self.generations) {
            discard(cursor, generation);
        }
    }

    pub fn metrics(&self, key: impl Fn(usize) -> u16) -> CacheMetrics {
        let overflowed = self
            .dropped
            .iter()
            .enumerate()
            .filter_map(|(lane, dropped)| {
                let dropped = dropped.load(Ordering::Relaxed);
                (dropped > 0).then(|| (key(lane), dropped))
            })
            .collect::<Vec<_>>();

        CacheMetrics {
            capacity: self.capacity(),
            lanes: self.lane_count(),
            total_written: self.total_written.load(Ordering::Relaxed),
            total_drained: self.total_drained.load(Ordering::Relaxed),
            total_dropped: overflowed.iter().map(|(_, dropped)| dropped).sum(),
            overflowed,
        }
    }
}

pub(crate) struct Writer<'a, T, M> {
    ring: &'a RingSet<T, M>,
    state: MutexGuard<'a, RingState<M>>,
}

impl<T: Copy, M> Writer<'_, T, M> {
    /// Append a record, or drop it when the lane is full. Never overwrites
    /// unconsumed records.
    pub fn push(&mut self, lane: usize, record: T) -> bool {
        let cursor = &mut self.state.cursors[lane];
        let next = (cursor.write + 1) % self.ring.slots;
        if next == cursor.start {
            let previous = self.ring.dropped[lane].fetch_add(1, Ordering::Relaxed);
            if previous == 0 {
                log::warn!("Trial buffer lane {} overflowed, dropping records", lane);
            }
            return false;
        }
        self.ring.lanes[lane][cursor.write].store(record);
        cursor.write = next;
        self.ring.total_written.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn is_empty(&self, lane: usize) -> bool {
        let cursor = self.state.cursors[lane];
        cursor.write == cursor.start
    }

    pub fn meta(&mut self, lane: usize) -> &mut M {
        &mut self.state.meta[lane]
    }

    /// Discard a lane's unconsumed records
    pub fn rewind(&mut self, lane: usize) {
        discard(&mut self.state.cursors[lane], &self.ring.generations[lane]);
    }
}

/// Publishes the new generation before `start` lets the producer reuse any
/// slot of the discarded range
fn discard(cursor: &mut Cursor, generation: &AtomicU64) {
    cursor.generation += 1;
    generation.store(cursor.generation, Ordering::SeqCst);
    cursor.start = cursor.write;
}

/// Cursor positions captured under the lock
#[derive(Debug, Clone)]
pub(crate) struct Snapshot<M> {
    slots: usize,
    cursors: Vec<Cursor>,
    meta: Vec<M>,
}

impl<M> Snapshot<M> {
    pub fn pending(&self, lane: usize) -> usize {
        let cursor = self.cursors[lane];
        (cursor.write + self.slots - cursor.start) % self.slots
    }

    pub fn meta(&self, lane: usize) -> &M {
        &self.meta[lane]
    }

    pub fn total_pending(&self) -> usize {
        (0..self.cursors.len()).map(|lane| self.pending(lane)).sum()
    }
}

/// Lets consumers sleep until the producer stores a record newer than a
/// given time
pub(crate) struct Arrival {
    waiters: AtomicUsize,
    signals: Mutex<u64>,
    cond: Condvar,
}

impl Arrival {
    pub fn new() -> Self {
        Self {
            waiters: AtomicUsize::new(0),
            signals: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    /// Block until `notify` or the timeout; true if woken by data. `ready`
    /// is checked once after registering so a record stored just before the
    /// wait is not missed.
    pub fn wait(&self, timeout: Duration, ready: impl FnOnce() -> bool) -> bool {
        let mut signals = self.signals.lock();
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let seen = *signals;
        let arrived = ready() || {
            self.cond
                .wait_while_for(&mut signals, |signals| *signals == seen, timeout);
            *signals != seen
        };
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        arrived
    }

    pub fn notify(&self) {
        if self.waiters.load(Ordering::SeqCst) == 0 {
            return;
        }
        let mut signals = self.signals.lock();
        *signals = signals.wrapping_add(1);
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn drain(ring: &RingSet<u32>, lane: usize, advance: bool) -> Vec<u32> {
        let snapshot = ring.snapshot();
        let pending = snapshot.pending(lane);
        let records = ring.read(&snapshot, lane, pending);
        if advance {
            ring.commit(&snapshot, &[(lane, records.len())]);
        }
        records
    }

    #[test]
    fn test_fill_then_overflow() {
        let ring: RingSet<u32> = RingSet::try_new(4, 1, ()).unwrap();
        {
            let mut writer = ring.writer();
            for value in 1..=4 {
                assert!(writer.push(0, value));
            }
            assert!(!writer.push(0, 5));
        }
        assert_eq!(ring.snapshot().pending(0), 4);
        assert_eq!(drain(&ring, 0, true), vec![1, 2, 3, 4]);

        assert!(ring.writer().push(0, 6));
        assert_eq!(drain(&ring, 0, true), vec![6]);

        let metrics = ring.metrics(|lane| lane as u16 + 1);
        assert_eq!(metrics.total_written, 5);
        assert_eq!(metrics.total_dropped, 1);
        assert_eq!(metrics.overflowed, vec![(1, 1)]);
    }

    #[test]
    fn test_peek_is_idempotent() {
        let ring: RingSet<u32> = RingSet::try_new(8, 2, ()).unwrap();
        {
            let mut writer = ring.writer();
            writer.push(1, 10);
            writer.push(1, 11);
        }
        assert_eq!(drain(&ring, 1, false), vec![10, 11]);
        assert_eq!(drain(&ring, 1, false), vec![10, 11]);
        assert_eq!(drain(&ring, 1, true), vec![10, 11]);
        assert!(drain(&ring, 1, false).is_empty());
        assert!(drain(&ring, 0, false).is_empty());
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let ring: RingSet<u32> = RingSet::try_new(3, 1, ()).unwrap();
        let mut expected = Vec::new();
        let mut seen = Vec::new();
        for value in 0..20 {
            ring.writer().push(0, value);
            expected.push(value);
            if value % 2 == 1 {
                seen.extend(drain(&ring, 0, true));
            }
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_partial_commit_keeps_remainder() {
        let ring: RingSet<u32> = RingSet::try_new(8, 1, ()).unwrap();
        {
            let mut writer = ring.writer();
            for value in 0..5 {
                writer.push(0, value);
            }
        }
        let snapshot = ring.snapshot();
        let first = ring.read(&snapshot, 0, 2);
        ring.commit(&snapshot, &[(0, first.len())]);
        assert_eq!(first, vec![0, 1]);
        assert_eq!(drain(&ring, 0, true), vec![2, 3, 4]);
    }

    #[test]
    fn test_commit_after_rewind_is_ignored() {
        let ring: RingSet<u32, u32> = RingSet::try_new(8, 1, 0).unwrap();
        {
            let mut writer = ring.writer();
            writer.push(0, 1);
            writer.push(0, 2);
        }
        let snapshot = ring.snapshot();
        {
            let mut writer = ring.writer();
            writer.rewind(0);
            *writer.meta(0) = 7;
            writer.push(0, 3);
        }
        assert_eq!(ring.commit(&snapshot, &[(0, 2)]), 0);
        let snapshot = ring.snapshot();
        assert_eq!(*snapshot.meta(0), 7);
        assert_eq!(ring.read(&snapshot, 0, 8), vec![3]);
    }

    #[test]
    fn test_read_across_rewind_returns_nothing() {
        let ring: RingSet<u32> = RingSet::try_new(4, 1, ()).unwrap();
        {
            let mut writer = ring.writer();
            writer.push(0, 1);
            writer.push(0, 2);
        }
        let stale = ring.snapshot();
        {
            let mut writer = ring.writer();
            writer.rewind(0);
            writer.push(0, 99);
        }
        assert!(ring.read(&stale, 0, 8).is_empty());
        assert_eq!(drain(&ring, 0, false), vec![99]);
    }

    #[test]
    fn test_discard_keeps_write_cursor_moving_forward() {
        let ring: RingSet<u32> = RingSet::try_new(4, 1, ()).unwrap();
        {
            let mut writer = ring.writer();
            writer.push(0, 1);
            writer.push(0, 2);
        }
        let before = ring.snapshot();
        ring.reset();
        ring.writer().push(0, 3);

        let after = ring.snapshot();
        assert_eq!(after.cursors[0].start, before.cursors[0].write);
        assert_eq!(after.cursors[0].write, (before.cursors[0].write + 1) % 5);
        assert_eq!(ring.read(&after, 0, 8), vec![3]);
        assert!(ring.read(&before, 0, 8).is_empty());
        // A stale commit cannot move the cursor back over the new record
        assert_eq!(ring.commit(&before, &[(0, 2)]), 0);
        assert_eq!(drain(&ring, 0, true), vec![3]);
    }

    #[test]
    fn test_reset_empties_lanes() {
        let ring: RingSet<u32> = RingSet::try_new(4, 3, ()).unwrap();
        {
            let mut writer = ring.writer();
            writer.push(0, 1);
            writer.push(2, 1);
        }
        assert_eq!(ring.snapshot().total_pending(), 2);
        ring.reset();
        assert_eq!(ring.snapshot().total_pending(), 0);
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let ring: Arc<RingSet<u64>> = Arc::new(RingSet::try_new(64, 1, ()).unwrap());
        let total = 20_000u64;

        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                let mut next = 0;
                while next < total {
                    if ring.writer().push(0, next) {
                        next += 1;
                    } else {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut received = Vec::with_capacity(total as usize);
        while received.len() < total as usize {
            let snapshot = ring.snapshot();
            let batch = ring.read(&snapshot, 0, usize::MAX);
            ring.commit(&snapshot, &[(0, batch.len())]);
            received.extend(batch);
        }
        producer.join().unwrap();

        assert!(received.iter().copied().eq(0..total));
    }

    #[test]
    fn test_arrival_timeout_and_notify() {
        let arrival = Arc::new(Arrival::new());
        assert!(!arrival.wait(Duration::from_millis(10), || false));
        assert!(arrival.wait(Duration::from_secs(5), || true));

        let notifier = arrival.clone();
        let handle = thread::spawn(move || {
            for _ in 0..200 {
                notifier.notify();
                thread::sleep(Duration::from_millis(5));
            }
        });
        assert!(arrival.wait(Duration::from_secs(5), || false));
        handle.join().unwrap();
    }

    #[test]
    fn test_timed_out_waiter_does_not_silence_others() {
        let arrival = Arc::new(Arrival::new());
        let patient = {
            let arrival = arrival.clone();
            thread::spawn(move || {
                let started = Instant::now();
                (arrival.wait(Duration::from_secs(3), || false), started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!arrival.wait(Duration::from_millis(10), || false));

        while !patient.is_finished() {
            arrival.notify();
            thread::sleep(Duration::from_millis(5));
        }
        let (woken, elapsed) = patient.join().unwrap();
        assert!(woken);
        assert!(elapsed < Duration::from_secs(3));
    }
}
