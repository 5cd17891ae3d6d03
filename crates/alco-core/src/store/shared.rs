use alloc::vec::Vec;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;

use super::{MeasurementStore, StoreError};
use crate::history::{History, HistoryEntry};
use crate::metrics::Measurement;

struct StoreState {
    current: Measurement,
    history: History,
}

/// In-process store behind a blocking mutex.
///
/// The lock is held only to swap in a new measurement or copy state out;
/// no I/O ever happens under it. The raw mutex type picks the exclusion
/// primitive: a critical section on single-core targets, an OS mutex on
/// hosts.
pub struct SharedStore<R: RawMutex> {
    state: Mutex<R, RefCell<StoreState>>,
}

impl<R: RawMutex> SharedStore<R> {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(StoreState {
                current: Measurement::initial(),
                history: History::new(),
            })),
        }
    }

    /// Number of entries currently retained
    pub fn history_len(&self) -> usize {
        self.state.lock(|state| state.borrow().history.len())
    }
}

impl<R: RawMutex> Default for SharedStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RawMutex> MeasurementStore for SharedStore<R> {
    fn publish(&self, measurement: Measurement, entry: HistoryEntry) -> Result<(), StoreError> {
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            state.current = measurement;
            state.history.push(entry);
        });
        Ok(())
    }

    fn snapshot(&self) -> Result<Measurement, StoreError> {
        Ok(self.state.lock(|state| state.borrow().current))
    }

    fn snapshot_history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self.state.lock(|state| state.borrow().history.to_vec()))
    }
}
