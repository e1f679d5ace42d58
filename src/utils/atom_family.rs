//! Atom family: a factory function that creates and caches atoms keyed by
//! parameter, useful for managing a collection of similarly-shaped atoms
//! (e.g. one atom per entity id) without hand-rolling the cache.
//!
//! Reference: the original `atomFamily` utility's cache/remove/
//! `should_remove` surface, reimplemented over `Atom<T>` (cheap to clone,
//! an `Arc` handle — see `atom.rs`) guarded by a `parking_lot::Mutex`
//! instead of the original's single-threaded `Map`.

use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::atom::Atom;

/// A memoizing factory over `Atom<T>`, keyed by `P`. Cheap to clone (an
/// `Arc` handle over the shared cache).
pub struct AtomFamily<P, T>
where
    P: Clone + Eq + Hash + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    initialize: Arc<dyn Fn(P) -> Atom<T> + Send + Sync>,
    cache: Arc<Mutex<IndexMap<P, Atom<T>>>>,
}

impl<P, T> Clone for AtomFamily<P, T>
where
    P: Clone + Eq + Hash + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self { initialize: self.initialize.clone(), cache: self.cache.clone() }
    }
}

impl<P, T> AtomFamily<P, T>
where
    P: Clone + Eq + Hash + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Returns the cached atom for `param`, creating it on first access.
    pub fn get(&self, param: P) -> Atom<T> {
        let mut cache = self.cache.lock();
        if let Some(existing) = cache.get(&param) {
            return existing.clone();
        }
        let created = (self.initialize)(param.clone());
        cache.insert(param, created.clone());
        created
    }

    /// Every parameter with a cached atom, in creation order.
    pub fn params(&self) -> Vec<P> {
        self.cache.lock().keys().cloned().collect()
    }

    /// Evicts `param`'s cached atom. A later `get(param)` creates a fresh
    /// one with a distinct identity; in-flight `Atom<T>` handles already
    /// taken out of the family remain valid.
    pub fn remove(&self, param: &P) {
        self.cache.lock().shift_remove(param);
    }

    /// Evicts every cached atom for which `predicate` returns `false`.
    pub fn retain(&self, mut predicate: impl FnMut(&P) -> bool) {
        self.cache.lock().retain(|param, _| predicate(param));
    }
}

/// Builds an [`AtomFamily`] from an initializer invoked on first access to
/// each distinct parameter.
pub fn atom_family<P, T, F>(initialize: F) -> AtomFamily<P, T>
where
    P: Clone + Eq + Hash + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(P) -> Atom<T> + Send + Sync + 'static,
{
    AtomFamily { initialize: Arc::new(initialize), cache: Arc::new(Mutex::new(IndexMap::new())) }
}
