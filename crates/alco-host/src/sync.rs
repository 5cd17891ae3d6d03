//! Host raw mutex for embassy-sync
//!
//! `CriticalSectionRawMutex` on a host is one process-wide lock, which would
//! merge every critical section in the program. [`StdRawMutex`] gives each
//! store its own OS mutex instead.

use std::sync::{Mutex, PoisonError};

use embassy_sync::blocking_mutex::raw::RawMutex;

pub struct StdRawMutex(Mutex<()>);

// SAFETY: `lock` runs the closure while holding a per-instance OS mutex, so
// no two closures run concurrently on the same instance.
unsafe impl RawMutex for StdRawMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self(Mutex::new(()));

    fn lock<R>(&self, f: impl FnOnce() -> R) -> R {
        // The guarded data lives outside this mutex, so a poisoned lock
        // protects nothing that could be left half-written.
        let _guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}

/// In-process store shared between OS threads
pub type ThreadStore = alco_core::store::SharedStore<StdRawMutex>;
