//! Shared state store
//!
//! The store holds the latest [`Measurement`] and the bounded [`History`]. It
//! is the only structure shared between the sampling loop (sole writer) and
//! its readers. Every strategy honours the same contract:
//!
//! - a published measurement and its history entry become visible together;
//!   a reader never sees fields from two different cycles;
//! - readers copy state out and never block each other for longer than that
//!   copy takes;
//! - append + eviction is atomic, so a history snapshot is never oversized.
//!
//! Strategies differ only in the exclusion boundary:
//! [`SharedStore`] locks an in-process mutex, [`StateRegion`] is a seqlock
//! over plain atomics that can live in memory shared between processes, and
//! the host crate adds a socket-backed client for a store owned by another
//! process.
//!
//! [`History`]: crate::history::History

mod region;
mod shared;

pub use region::{Backoff, RegionStore, SpinBackoff, StateRegion};
pub use shared::SharedStore;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use thiserror_no_std::Error;

use crate::history::HistoryEntry;
use crate::metrics::Measurement;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store transport failed: {0}")]
    Transport(String),
    #[error("store gave up after {attempts} contended read attempts")]
    Contended { attempts: u32 },
    #[error("store rejected request: {0}")]
    Rejected(String),
}

/// Single-writer, multi-reader access to the current measurement and history.
///
/// Only the sampling loop calls [`publish`](Self::publish). In-process
/// strategies never fail; the transport-backed strategy reports a broken
/// connection as [`StoreError::Transport`].
pub trait MeasurementStore {
    /// Replace the current measurement and append `entry` to the history,
    /// evicting the oldest entry when full.
    fn publish(&self, measurement: Measurement, entry: HistoryEntry) -> Result<(), StoreError>;

    /// Copy of the current measurement
    fn snapshot(&self) -> Result<Measurement, StoreError>;

    /// Copy of the history, oldest entry first
    fn snapshot_history(&self) -> Result<Vec<HistoryEntry>, StoreError>;
}

impl<S: MeasurementStore + ?Sized> MeasurementStore for &S {
    fn publish(&self, measurement: Measurement, entry: HistoryEntry) -> Result<(), StoreError> {
        (**self).publish(measurement, entry)
    }

    fn snapshot(&self) -> Result<Measurement, StoreError> {
        (**self).snapshot()
    }

    fn snapshot_history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        (**self).snapshot_history()
    }
}

impl<S: MeasurementStore + ?Sized> MeasurementStore for Arc<S> {
    fn publish(&self, measurement: Measurement, entry: HistoryEntry) -> Result<(), StoreError> {
        (**self).publish(measurement, entry)
    }

    fn snapshot(&self) -> Result<Measurement, StoreError> {
        (**self).snapshot()
    }

    fn snapshot_history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        (**self).snapshot_history()
    }
}
