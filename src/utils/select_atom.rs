//! Derived atom that selects and memoizes a slice of another atom's value.
//!
//! Reference: the original `selectAtom` utility's "selector + equality
//! function" shape, reimplemented against `atom.rs`'s `reactive()`
//! dependency variant (for automatic re-selection when the source
//! changes) and `Ctl::data()` (for carrying the previous slice across
//! resolutions — `scope.rs`'s per-atom `data` survives invalidation the
//! same way the original's closure-captured `lastValue` did).

use crate::atom::{atom, Atom};

const SLICE_KEY: &str = "select_atom/slice";

/// Builds a derived atom over `source` that only changes its resolved
/// value when `selector(source)` compares unequal (via `equality_fn`) to
/// the previously selected slice.
pub fn select_atom<T, S, F, E>(source: Atom<T>, selector: F, equality_fn: E) -> Atom<S>
where
    T: Clone + Send + Sync + 'static,
    S: Clone + Send + Sync + 'static,
    F: Fn(&T) -> S + Send + Sync + 'static,
    E: Fn(&S, &S) -> bool + Send + Sync + 'static,
{
    atom(source.reactive(), move |ctl, value: T| {
        let selected = selector(&value);
        let data = ctl.data();
        let result = match data.get::<S>(SLICE_KEY) {
            Some(prev) if equality_fn(&prev, &selected) => prev,
            _ => {
                data.set(SLICE_KEY, selected.clone());
                selected
            }
        };
        Box::pin(async move { Ok(result) })
    })
}

/// [`select_atom`] with `PartialEq`-based equality.
pub fn select_atom_default<T, S, F>(source: Atom<T>, selector: F) -> Atom<S>
where
    T: Clone + Send + Sync + 'static,
    S: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&T) -> S + Send + Sync + 'static,
{
    select_atom(source, selector, |a, b| a == b)
}
