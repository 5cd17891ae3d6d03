//! Cross-process store in a memory-mapped file
//!
//! The writer process creates the file and stamps a [`StateRegion`] into it;
//! reader processes map the same file. Exclusion is the region's seqlock, so
//! no lock is shared between processes and readers never block the writer.
//! A reader that catches the writer mid-publish backs off to the scheduler,
//! since the writer may be preempted on the same core.

use std::fs::OpenOptions;
use std::hint::spin_loop;
use std::mem::{align_of, size_of};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::thread;
use std::time::Duration;

use alco_core::config::MetricParams;
use alco_core::history::HistoryEntry;
use alco_core::metrics::Measurement;
use alco_core::store::{Backoff, MeasurementStore, RegionStore, StateRegion, StoreError};
use log::{debug, info};
use memmap2::MmapMut;
use thiserror::Error;

const SPIN_ATTEMPTS: u32 = 64;
const YIELD_ATTEMPTS: u32 = 1_024;
const RETRY_SLEEP: Duration = Duration::from_micros(100);
/// Past this a writer is assumed to have died mid-publish; a couple of
/// seconds of sleeping.
const GIVE_UP_ATTEMPTS: u32 = YIELD_ATTEMPTS + 20_000;

/// Spin briefly, then yield, then sleep between seqlock read attempts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadBackoff;

impl Backoff for ThreadBackoff {
    fn wait(&self, attempt: u32) -> bool {
        if attempt < SPIN_ATTEMPTS {
            spin_loop();
        } else if attempt < YIELD_ATTEMPTS {
            thread::yield_now();
        } else {
            thread::sleep(RETRY_SLEEP);
        }
        attempt < GIVE_UP_ATTEMPTS
    }
}

#[derive(Error, Debug)]
pub enum ShmError {
    #[error("shared memory file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("shared memory file {path} is {len} bytes, need {need}")]
    TooSmall { path: PathBuf, len: usize, need: usize },
    #[error("shared memory file {path} has not been initialised by a writer")]
    NotInitialized { path: PathBuf },
}

/// [`MeasurementStore`] backed by a [`StateRegion`] in a shared mapping
pub struct ShmStore {
    region: NonNull<StateRegion>,
    params: MetricParams,
    // Keeps the mapping alive for as long as `region` is used.
    _map: MmapMut,
}

// SAFETY: the mapping is owned by the store and outlives every reference
// handed out, and the region is made only of atomics.
unsafe impl Send for ShmStore {}
unsafe impl Sync for ShmStore {}

impl ShmStore {
    /// Create (or truncate) the backing file and initialise an empty region.
    ///
    /// Only the writer side calls this, before any reader is started.
    pub fn create(path: &Path, params: MetricParams) -> Result<Self, ShmError> {
        let io_err = |source| ShmError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(io_err)?;
        file.set_len(size_of::<StateRegion>() as u64)
            .map_err(io_err)?;

        // SAFETY: the file was just sized for one region; concurrent access
        // from other processes only goes through the region's atomics.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(io_err)?;
        let store = Self::from_map(map, path, params)?;
        store.region().init();
        info!(
            "Created shared state region at {} ({} bytes)",
            path.display(),
            size_of::<StateRegion>()
        );
        Ok(store)
    }

    /// Map a region a writer has already created.
    pub fn open(path: &Path, params: MetricParams) -> Result<Self, ShmError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| ShmError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        // SAFETY: see `create`.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|source| ShmError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_map(map, path, params)?;
        if !store.region().is_initialized() {
            return Err(ShmError::NotInitialized {
                path: path.to_path_buf(),
            });
        }
        debug!("Attached to shared state region at {}", path.display());
        Ok(store)
    }

    fn from_map(mut map: MmapMut, path: &Path, params: MetricParams) -> Result<Self, ShmError> {
        let need = size_of::<StateRegion>();
        if map.len() < need {
            return Err(ShmError::TooSmall {
                path: path.to_path_buf(),
                len: map.len(),
                need,
            });
        }
        let ptr = map.as_mut_ptr().cast::<StateRegion>();
        debug_assert_eq!(ptr.align_offset(align_of::<StateRegion>()), 0);
        let region = NonNull::new(ptr).ok_or_else(|| ShmError::TooSmall {
            path: path.to_path_buf(),
            len: 0,
            need,
        })?;
        Ok(Self {
            region,
            params,
            _map: map,
        })
    }

    fn region(&self) -> &StateRegion {
        // SAFETY: `region` points into `_map`, which is page aligned, large
        // enough (checked in `from_map`) and lives as long as `self`. Every
        // field of `StateRegion` is an atomic, and any byte pattern is a valid
        // atomic integer.
        unsafe { self.region.as_ref() }
    }

    fn view(&self) -> RegionStore<'_, ThreadBackoff> {
        RegionStore::with_backoff(self.region(), self.params, ThreadBackoff)
    }
}

impl MeasurementStore for ShmStore {
    fn publish(&self, measurement: Measurement, entry: HistoryEntry) -> Result<(), StoreError> {
        self.view().publish(measurement, entry)
    }

    fn snapshot(&self) -> Result<Measurement, StoreError> {
        self.view().snapshot()
    }

    fn snapshot_history(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        self.view().snapshot_history()
    }
}
