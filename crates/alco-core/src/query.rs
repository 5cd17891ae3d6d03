//! Read-only query surface consumed by the network layer
//!
//! Both operations are straight copies out of the store, shaped into the
//! JSON records served at `/data` and `/history`.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde::Serialize;

use crate::history::HistoryEntry;
use crate::metrics::Measurement;
use crate::store::{MeasurementStore, StoreError};

/// Current measurement as served at `/data`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentRecord {
    pub raw: u16,
    pub baseline: u16,
    pub diff: u16,
    pub ratio: f32,
    pub concentration: f32,
    pub status_text: &'static str,
    pub level: u8,
}

impl From<Measurement> for CurrentRecord {
    fn from(m: Measurement) -> Self {
        Self {
            raw: m.raw(),
            baseline: m.baseline(),
            diff: m.diff(),
            ratio: m.ratio(),
            concentration: m.concentration(),
            status_text: m.status().label(),
            level: m.level(),
        }
    }
}

/// One history point as served at `/history`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    /// `HH:MM:SS`, no date
    pub time: String,
    pub val: f32,
}

impl From<&HistoryEntry> for HistoryRecord {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            time: entry.timestamp.to_string(),
            val: entry.value,
        }
    }
}

pub struct QuerySurface<S> {
    store: S,
}

impl<S: MeasurementStore> QuerySurface<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub fn get_current(&self) -> Result<CurrentRecord, StoreError> {
        self.store.snapshot().map(CurrentRecord::from)
    }

    /// History in chronological order
    pub fn get_history(&self) -> Result<Vec<HistoryRecord>, StoreError> {
        let history = self.store.snapshot_history()?;
        Ok(history.iter().map(HistoryRecord::from).collect())
    }
}
