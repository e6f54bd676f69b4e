//! Explicit load-state cells for bulk element data.
//!
//! A [`Lazy`] starts `Unloaded` holding a loader, moves to `Loading` while
//! the loader runs and ends `Loaded` holding the value. Transitions only go
//! forward; a failed load leaves the cell `Unloaded` so it can be retried.
//! [`Lazy::state`] never runs the loader.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use crate::error::Result;

/// Observable load state of a [`Lazy`] cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadState::Unloaded => "unloaded",
            LoadState::Loading => "loading",
            LoadState::Loaded => "loaded",
        };
        write!(f, "{}", s)
    }
}

type Loader<T> = Arc<dyn Fn() -> Result<T> + Send + Sync>;

enum Slot<T> {
    Unloaded(Loader<T>),
    Loaded(Arc<T>),
}

/// A shareable, load-once cell.
///
/// Clones share the same cell, so loading through one clone loads all.
pub struct Lazy<T> {
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Lazy<T> {
    /// A cell that is already loaded.
    pub fn loaded(value: T) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::Loaded(Arc::new(value)))),
        }
    }

    /// A cell that runs `loader` on first access.
    pub fn deferred<F>(loader: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self {
            slot: Arc::new(Mutex::new(Slot::Unloaded(Arc::new(loader)))),
        }
    }

    /// Current state, without triggering a load.
    pub fn state(&self) -> LoadState {
        match self.slot.try_lock() {
            Ok(guard) => slot_state(&guard),
            Err(TryLockError::WouldBlock) => LoadState::Loading,
            Err(TryLockError::Poisoned(poisoned)) => slot_state(&poisoned.into_inner()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == LoadState::Loaded
    }

    /// Returns the value, loading it first if needed.
    ///
    /// The lock is held while the loader runs, so concurrent callers wait
    /// for a single load.
    pub fn get(&self) -> Result<Arc<T>> {
        let mut guard = self.lock();
        let loader = match &*guard {
            Slot::Loaded(value) => return Ok(Arc::clone(value)),
            Slot::Unloaded(loader) => Arc::clone(loader),
        };
        let value = Arc::new(loader()?);
        *guard = Slot::Loaded(Arc::clone(&value));
        Ok(value)
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn slot_state<T>(slot: &Slot<T>) -> LoadState {
    match slot {
        Slot::Unloaded(_) => LoadState::Unloaded,
        Slot::Loaded(_) => LoadState::Loaded,
    }
}

impl<T> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy").field("state", &self.state()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpatialDataError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_state_does_not_trigger_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cell = Lazy::deferred(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(5u32)
        });
        assert_eq!(cell.state(), LoadState::Unloaded);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(*cell.get().unwrap(), 5);
        assert_eq!(cell.state(), LoadState::Loaded);
        assert_eq!(*cell.clone().get().unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_load_stays_unloaded() {
        let cell: Lazy<u32> = Lazy::deferred(|| Err(SpatialDataError::UnsupportedFormat("x".into())));
        assert!(cell.get().is_err());
        assert_eq!(cell.state(), LoadState::Unloaded);
    }

    #[test]
    fn test_state_reports_loading_while_locked() {
        let cell = Lazy::loaded(1u8);
        let _guard = cell.slot.lock().unwrap();
        assert_eq!(cell.state(), LoadState::Loading);
    }

    #[test]
    fn test_concurrent_readers_load_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cell = Lazy::deferred(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1, 2, 3])
        });
        std::thread::scope(|s| {
            for _ in 0..4 {
                let c = cell.clone();
                s.spawn(move || assert_eq!(c.get().unwrap().len(), 3));
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
