//! Core identifiers and type-erasure aliases shared across the crate.
//!
//! `AtomId`/`EpochNumber` keep their original names, widened from `usize`
//! to `u64` and joined by the additional node kinds (tags, execution
//! contexts) this runtime tracks.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for an atom, assigned once at construction time.
pub type AtomId = u64;

/// Unique identifier for a tag.
pub type TagId = u64;

/// Unique identifier for an execution context.
pub type ContextId = u64;

/// Version counter bumped on every resolved/failed transition of an atom.
pub type EpochNumber = u64;

/// Type-erased, reference-counted value used for heterogeneous storage
/// inside the scope: the atom cache, tag payloads, and per-atom `data`.
///
/// Reference: `ferrous-di`'s `AnyArc` alias and the original atom-state
/// `Box<dyn Any + Send + Sync>` storage; `Arc` is used instead of `Box`
/// because a cached value is read by many concurrent resolvers without
/// cloning `T` itself.
pub(crate) type AnyArc = Arc<dyn Any + Send + Sync>;

pub(crate) fn downcast<T: Clone + Send + Sync + 'static>(value: &AnyArc) -> Option<T> {
    value.downcast_ref::<T>().cloned()
}

macro_rules! id_generator {
    ($name:ident) => {
        pub(crate) fn $name() -> u64 {
            static COUNTER: AtomicU64 = AtomicU64::new(1);
            COUNTER.fetch_add(1, Ordering::Relaxed)
        }
    };
}

id_generator!(next_atom_id);
id_generator!(next_tag_id);
id_generator!(next_context_id);
id_generator!(next_listener_id);

/// One frame of an in-progress resolution chain, outermost first.
/// Used both for circular-dependency detection and for naming the chain
/// in `DependencyResolutionError`.
#[derive(Debug, Clone)]
pub(crate) struct ChainLink {
    pub id: AtomId,
    pub name: String,
}
