//! Seqlock-protected state region
//!
//! [`StateRegion`] is a fixed `#[repr(C)]` block made only of atomics, so it
//! can be placed in memory shared between processes (the host maps it from a
//! file) and accessed without any data race. The single writer bumps `seq` to
//! an odd value, writes, then bumps it back to even; readers copy the block
//! and retry if `seq` was odd or changed underneath them.
//!
//! How a reader waits for a writer caught mid-publish is a [`Backoff`]: bare
//! spinning suits a target without a scheduler, while a host must yield so a
//! preempted writer can finish.
//!
//! Only `raw` and `baseline` are stored for the current value. Readers
//! recompute the derived fields through [`Measurement::compute`] with their
//! own [`MetricParams`], which is equivalent because the metric engine is
//! deterministic.

use alloc::vec::Vec;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU32, Ordering, fence};

use super::{MeasurementStore, StoreError};
use crate::calibration::Baseline;
use crate::config::{HISTORY_CAPACITY, MetricParams};
use crate::history::{HistoryEntry, TimeOfDay};
use crate::metrics::Measurement;

/// Identifies an initialised region ("ALCO")
pub const REGION_MAGIC: u32 = 0x414C_434F;

/// Bumped whenever the layout below changes
pub const REGION_VERSION: u32 = 1;

/// Attempts before [`SpinBackoff`] reports contention
const MAX_SPIN_ATTEMPTS: u32 = 100_000;

/// `raw` value meaning "nothing published yet"
const NO_READING: u32 = u32::MAX;

/// Wait strategy for a reader that caught the writer mid-publish
pub trait Backoff {
    /// Wait after failed read number `attempt` (counting from 1). Returning
    /// `false` gives up and the read reports [`StoreError::Contended`].
    fn wait(&self, attempt: u32) -> bool;
}

/// Busy-wait between attempts
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinBackoff;

impl Backoff for SpinBackoff {
    fn wait(&self, attempt: u32) -> bool {
        spin_loop();
        attempt < MAX_SPIN_ATTEMPTS
    }
}

#[repr(C)]
struct RegionEntry {
    seconds: AtomicU32,
    value_bits: AtomicU32,
}

impl RegionEntry {
    const fn new() -> Self {
        Self {
            seconds: AtomicU32::new(0),
            value_bits: AtomicU32::new(0),
        }
    }
}

/// Shared-memory layout of the store.
///
/// An all-zero block is a valid, uninitialised region; [`StateRegion::init`]
/// stamps the header before first use.
#[repr(C)]
pub struct StateRegion {
    magic: AtomicU32,
    version: AtomicU32,
    seq: AtomicU32,
    raw: AtomicU32,
    baseline: AtomicU32,
    /// Index of the oldest history entry
    head: AtomicU32,
    len: AtomicU32,
    entries: [RegionEntry; HISTORY_CAPACITY],
}

struct RegionCopy {
    raw: u32,
    baseline: u32,
    head: u32,
    len: u32,
    entries: [(u32, u32); HISTORY_CAPACITY],
}

impl Default for StateRegion {
    fn default() -> Self {
        Self::new()
    }
}

impl StateRegion {
    pub const fn new() -> Self {
        Self {
            magic: AtomicU32::new(0),
            version: AtomicU32::new(0),
            seq: AtomicU32::new(0),
            raw: AtomicU32::new(0),
            baseline: AtomicU32::new(0),
            head: AtomicU32::new(0),
            len: AtomicU32::new(0),
            entries: [const { RegionEntry::new() }; HISTORY_CAPACITY],
        }
    }

    /// Reset the region to "nothing published" and stamp the header.
    ///
    /// Must run before any reader attaches and never concurrently with
    /// [`publish`](Self::publish).
    pub fn init(&self) {
        self.seq.store(0, Ordering::Relaxed);
        self.raw.store(NO_READING, Ordering::Relaxed);
        self.baseline.store(0, Ordering::Relaxed);
        self.head.store(0, Ordering::Relaxed);
        self.len.store(0, Ordering::Relaxed);
        self.version.store(REGION_VERSION, Ordering::Relaxed);
        self.magic.store(REGION_MAGIC, Ordering::Release);
    }

    /// Whether [`init`](Self::init) has stamped a compatible header
    pub fn is_initialized(&self) -> bool {
        self.magic.load(Ordering::Acquire) == REGION_MAGIC
            && self.version.load(Ordering::Relaxed) == REGION_VERSION
    }

    /// Write one cycle's state. Single writer only.
    pub fn publish(&self, raw: u16, baseline: u16, entry: HistoryEntry) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.raw.store(raw as u32, Ordering::Relaxed);
        self.baseline.store(baseline as u32, Ordering::Relaxed);

        let capacity = HISTORY_CAPACITY as u32;
        let head = self.head.load(Ordering::Relaxed);
        let len = self.len.load(Ordering::Relaxed);
        let slot = ((head + len) % capacity) as usize;
        self.entries[slot]
            .seconds
            .store(entry.timestamp.seconds(), Ordering::Relaxed);
        self.entries[slot]
            .value_bits
            .store(entry.value.to_bits(), Ordering::Relaxed);
        if len < capacity {
            self.len.store(len + 1, Ordering::Relaxed);
        } else {
            self.head.store((head + 1) % capacity, Ordering::Relaxed);
        }

        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    fn read_consistent<B: Backoff>(&self, backoff: &B) -> Result<RegionCopy, StoreError> {
        let mut attempt = 0u32;
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before % 2 == 0 {
                let mut copy = RegionCopy {
                    raw: self.raw.load(Ordering::Relaxed),
                    baseline: self.baseline.load(Ordering::Relaxed),
                    head: self.head.load(Ordering::Relaxed),
                    len: self.len.load(Ordering::Relaxed),
                    entries: [(0, 0); HISTORY_CAPACITY],
                };
                for (slot, entry) in copy.entries.iter_mut().zip(self.entries.iter()) {
                    *slot = (
                        entry.seconds.load(Ordering::Relaxed),
                        entry.value_bits.load(Ordering::Relaxed),
                    );
                }

                fence(Ordering::Acquire);
                if self.seq.load(Ordering::Relaxed) == before {
                    return Ok(copy);
                }
            }

            attempt = attempt.saturating_add(1);
            if !backoff.wait(attempt) {
                return Err(StoreError::Contended { attempts: attempt });
            }
        }
    }

    /// Current measurement, recomputed from the stored raw and baseline
    pub fn snapshot<B: Backoff>(
        &self,
        params: &MetricParams,
        backoff: &B,
    ) -> Result<Measurement, StoreError> {
        let copy = self.read_consistent(backoff)?;
        if copy.raw == NO_READING {
            return Ok(Measurement::initial());
        }
        Ok(Measurement::compute(
            copy.raw as u16,
            Baseline::new(copy.baseline as u16),
            params,
        ))
    }

    /// History, oldest entry first
    pub fn history<B: Backoff>(&self, backoff: &B) -> Result<Vec<HistoryEntry>, StoreError> {
        let copy = self.read_consistent(backoff)?;
        let capacity = HISTORY_CAPACITY as u32;
        let len = copy.len.min(capacity);
        Ok((0..len)
            .map(|i| {
                let (seconds, bits) = copy.entries[((copy.head + i) % capacity) as usize];
                HistoryEntry::new(TimeOfDay::from_seconds(seconds), f32::from_bits(bits))
            })
            .collect())
    }
}

/// [`MeasurementStore`] view over a [`StateRegion`] that lives elsewhere.
pub struct RegionStore<'a, B = SpinBackoff> {
    region: &'a StateRegion,
    params: MetricParams,
    backoff: B,
}

impl<'a> RegionStore<'a> {
    pub const fn new(region: &'a StateRegion, params: MetricParams) -> Self {
        Self::with_backoff(region, params, SpinBackoff)
    }
}

impl<'a, B: Backoff> RegionStore<'a, B> {
    pub const fn with_backoff(region: &'a StateRegion, params: MetricParams, backoff: B) -> Self {
        Self {
            region,
            params,
            backoff,
        }
    }
}

impl<B: Backoff> MeasurementStore for RegionStore<'_, B> {
    fn publish(&self, measurement: Measurement, entry: HistoryEntry) -> Result<(), StoreError> {
        self.region
            .publish(measurement.raw(), measurement.baseline(), entry);
        Ok(())
    }

    fn snapshot(&self) -> Result<Measurement, StoreError> {
        self.region.snapshot(&self.params, &self.backoff)
    }

    fn snapshot_history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        self.region.history(&self.backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::boxed::Box;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    /// Spin briefly, then hand the core to whichever thread holds `seq` odd.
    #[derive(Clone, Copy)]
    struct YieldBackoff;

    impl Backoff for YieldBackoff {
        fn wait(&self, attempt: u32) -> bool {
            if attempt < 16 {
                spin_loop();
            } else {
                thread::yield_now();
            }
            true
        }
    }

    fn entry(second: u32, value: f32) -> HistoryEntry {
        HistoryEntry::new(TimeOfDay::from_seconds(second), value)
    }

    fn region() -> Box<StateRegion> {
        let region = Box::new(StateRegion::new());
        region.init();
        region
    }

    #[test]
    fn test_fresh_region_reads_initial_state() {
        let region = region();
        let store = RegionStore::new(&region, MetricParams::default());

        assert!(region.is_initialized());
        assert_eq!(store.snapshot().unwrap(), Measurement::initial());
        assert!(store.snapshot_history().unwrap().is_empty());
    }

    #[test]
    fn test_zeroed_region_is_not_initialized() {
        assert!(!StateRegion::new().is_initialized());
    }

    #[test]
    fn test_snapshot_recomputes_derived_fields() {
        let region = region();
        let params = MetricParams::default();
        let store = RegionStore::new(&region, params);

        let m = Measurement::compute(1200, Baseline::new(1380), &params);
        store.publish(m, entry(5, m.concentration())).unwrap();

        assert_eq!(store.snapshot().unwrap(), m);
        assert_eq!(store.snapshot_history().unwrap(), [entry(5, m.concentration())]);
    }

    #[test]
    fn test_ring_wraps_in_chronological_order() {
        let region = region();
        for i in 0..(HISTORY_CAPACITY as u32 * 2 + 7) {
            region.publish(1380, 1380, entry(i, i as f32));
        }

        let history = region.history(&SpinBackoff).unwrap();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history[0].value, (HISTORY_CAPACITY + 7) as f32);
        assert!(history.windows(2).all(|w| w[0].value + 1.0 == w[1].value));
    }

    #[test]
    fn test_concurrent_readers_see_consistent_cycles() {
        const READERS: usize = 3;
        const SNAPSHOTS_PER_READER: u32 = 200;

        let region: &'static StateRegion = Box::leak(region());
        let start = Arc::new(Barrier::new(READERS + 1));
        let satisfied = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicBool::new(false));
        let params = MetricParams::default();

        let readers: Vec<_> = (0..READERS)
            .map(|_| {
                let start = Arc::clone(&start);
                let satisfied = Arc::clone(&satisfied);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let store = RegionStore::with_backoff(region, params, YieldBackoff);
                    start.wait();
                    let mut observed = 0u32;
                    while !done.load(Ordering::Acquire) {
                        let history = store.snapshot_history().unwrap();
                        assert!(history.len() <= HISTORY_CAPACITY);
                        // Each entry's value equals its timestamp, and entries
                        // are consecutive, so a torn copy breaks one of these.
                        for w in history.windows(2) {
                            assert_eq!(
                                (w[0].timestamp.seconds() + 1) % 86_400,
                                w[1].timestamp.seconds()
                            );
                        }
                        for e in &history {
                            assert_eq!(e.value, e.timestamp.seconds() as f32);
                        }
                        let m = store.snapshot().unwrap();
                        assert!(m.baseline() == 0 || m.baseline() == m.raw() + 100);
                        observed += 1;
                        if observed == SNAPSHOTS_PER_READER {
                            satisfied.fetch_add(1, Ordering::AcqRel);
                        }
                    }
                    observed
                })
            })
            .collect();

        start.wait();
        let mut i = 0u32;
        while satisfied.load(Ordering::Acquire) < READERS {
            let raw = (i % 3000) as u16;
            let second = i % 86_400;
            region.publish(raw, raw + 100, entry(second, second as f32));
            i = i.wrapping_add(1);
            if i % 64 == 0 {
                thread::yield_now();
            }
        }
        done.store(true, Ordering::Release);
        for reader in readers {
            assert!(reader.join().unwrap() >= SNAPSHOTS_PER_READER);
        }
    }

    #[test]
    fn test_spinning_reader_reports_stalled_writer() {
        let region = region();
        // Writer stopped between its two sequence bumps.
        region.seq.store(1, Ordering::Release);

        let result = region.snapshot(&MetricParams::default(), &SpinBackoff);
        assert_eq!(
            result,
            Err(StoreError::Contended {
                attempts: MAX_SPIN_ATTEMPTS
            })
        );
    }

    #[test]
    fn test_yielding_reader_waits_out_a_preempted_writer() {
        let region: &'static StateRegion = Box::leak(region());
        let params = MetricParams::default();
        region.publish(1200, 1380, entry(7, 0.3));
        region.seq.store(3, Ordering::Release);

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            region.seq.store(4, Ordering::Release);
        });

        let store = RegionStore::with_backoff(region, params, YieldBackoff);
        let m = store.snapshot().unwrap();
        assert_eq!(m, Measurement::compute(1200, Baseline::new(1380), &params));
        writer.join().unwrap();
    }
}
