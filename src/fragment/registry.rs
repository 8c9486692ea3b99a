use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use tracing::info;

use super::{FragmentList, RemovalReport};

/// Registry mapping each processing thread to its own [`FragmentList`]
///
/// The registry lock is held only to look up or create a thread's slot. Each list sits behind
/// its own mutex, which is never contended since only the owning thread uses it.
///
/// Workers that can carry their own state should own a [`FragmentList`] directly instead.
#[derive(Debug, Default)]
pub struct FragmentRegistry {
    lists: Mutex<HashMap<ThreadId, Arc<Mutex<FragmentList>>>>,
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // list mutations never leave a half-linked slot behind
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FragmentRegistry {
    pub fn new() -> FragmentRegistry {
        FragmentRegistry::default()
    }

    /// Return the list of the calling thread, creating it on first use
    pub fn current(&self) -> Arc<Mutex<FragmentList>> {
        let id = thread::current().id();
        let mut lists = relock(&self.lists);
        lists
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(FragmentList::new())))
            .clone()
    }

    /// Run `f` with the calling thread's list
    pub fn with_current<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut FragmentList) -> R,
    {
        let list = self.current();
        let mut guard = relock(&list);
        f(&mut guard)
    }

    /// Tear down the calling thread's list, sweeping any orphan fragments
    ///
    /// Returns `None` if the thread never used the registry.
    pub fn release_current(&self) -> Option<RemovalReport> {
        let id = thread::current().id();
        let list = relock(&self.lists).remove(&id)?;
        let report = relock(&list).remove_fragment(None);
        if report.removed > 0 {
            info!(
                removed = report.removed,
                high_water = report.high_water,
                "released fragment list with orphan fragments"
            );
        }
        Some(report)
    }

    /// Number of threads with a live list
    pub fn thread_count(&self) -> usize {
        relock(&self.lists).len()
    }
}
