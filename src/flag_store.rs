//! A thread-safe in-memory store for the currently active toggle set. [`FlagStore`] provides
//! lock-free concurrent access for readers (flag evaluation) and a single atomic swap for the
//! writer (the periodic fetcher).

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use arc_swap::ArcSwap;

use crate::toggles::ToggleSet;

/// `FlagStore` holds one logically-immutable [`ToggleSet`] at a time behind an atomically
/// swappable handle.
///
/// A `ToggleSet` is never mutated in place, only replaced completely. Readers receive a
/// *snapshot* that is unaffected by concurrent replacements: a reader that began before a
/// [`replace`][FlagStore::replace] sees either the old set or the new set in full, never a mix.
pub struct FlagStore {
    snapshot: ArcSwap<ToggleSet>,
    ready: AtomicBool,
}

impl FlagStore {
    /// Create a new store holding an empty toggle set.
    pub fn new() -> FlagStore {
        FlagStore {
            snapshot: ArcSwap::new(Arc::new(ToggleSet::new())),
            ready: AtomicBool::new(false),
        }
    }

    /// Get the currently-active toggle set. Never blocks and never returns a null handle; before
    /// the first [`replace`][FlagStore::replace] this is an empty set.
    pub fn snapshot(&self) -> Arc<ToggleSet> {
        self.snapshot.load_full()
    }

    /// Install a new toggle set and mark the store ready. A `None` replacement is a no-op that
    /// changes no state.
    pub fn replace(&self, new_snapshot: Option<Arc<ToggleSet>>) {
        let Some(new_snapshot) = new_snapshot else {
            return;
        };
        self.snapshot.store(new_snapshot);
        self.ready.store(true, Ordering::Release);
    }

    /// Whether at least one successful [`replace`][FlagStore::replace] has occurred.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

impl Default for FlagStore {
    fn default() -> FlagStore {
        FlagStore::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::FlagStore;
    use crate::toggles::{Toggle, ToggleSet};

    fn set_of(names: &[&str]) -> Arc<ToggleSet> {
        Arc::new(
            names
                .iter()
                .map(|name| Toggle::new(*name, true, false, None))
                .collect(),
        )
    }

    #[test]
    fn starts_empty_and_not_ready() {
        let store = FlagStore::new();

        assert!(!store.is_ready());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn replace_none_changes_nothing() {
        let store = FlagStore::new();
        let before = store.snapshot();

        store.replace(None);

        assert!(!store.is_ready());
        assert!(Arc::ptr_eq(&before, &store.snapshot()));

        store.replace(Some(set_of(&["a"])));
        let installed = store.snapshot();
        store.replace(None);

        assert!(store.is_ready());
        assert!(Arc::ptr_eq(&installed, &store.snapshot()));
    }

    #[test]
    fn can_replace_from_another_thread() {
        let store = Arc::new(FlagStore::new());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.replace(Some(set_of(&["a", "b"])));
            })
            .join();
        }

        assert!(store.is_ready());
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn concurrent_readers_never_observe_a_torn_set() {
        // Two full sets of different sizes are swapped in repeatedly; every snapshot observed by
        // any reader must be one of them in full.
        let store = Arc::new(FlagStore::new());
        let small = set_of(&["a"]);
        let large = set_of(&["a", "b", "c", "d"]);
        store.replace(Some(small.clone()));

        let writer = {
            let store = store.clone();
            let (small, large) = (small.clone(), large.clone());
            std::thread::spawn(move || {
                for i in 0..1000 {
                    let next = if i % 2 == 0 { &large } else { &small };
                    store.replace(Some(next.clone()));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let snapshot = store.snapshot();
                        assert!(snapshot.len() == 1 || snapshot.len() == 4);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
