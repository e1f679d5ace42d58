//! Scope-construction-time overrides: replace an atom's factory output
//! with a fixed value, or redirect it to resolve through a different
//! atom entirely. The mechanism a test harness uses to swap a real
//! dependency for a fake one without touching the atom graph itself.

use std::sync::Arc;

use crate::atom::Atom;
use crate::types::{AnyArc, AtomId};

/// A substitution installed via [`ScopeOptions`](crate::scope::ScopeOptions).
pub enum Preset {
    Value { atom_id: AtomId, value: AnyArc },
    Replacement { atom_id: AtomId, replacement_id: AtomId },
}

impl Preset {
    /// Pins `atom` to always resolve to `value`, bypassing its factory.
    pub fn value<T: Send + Sync + 'static>(atom: &Atom<T>, value: T) -> Self {
        Self::Value { atom_id: atom.id(), value: Arc::new(value) }
    }

    /// Redirects `atom` to resolve through `replacement` instead of its
    /// own factory. Both atoms must share the same output type.
    pub fn replacement<T: Clone + Send + Sync + 'static>(atom: &Atom<T>, replacement: &Atom<T>) -> Self {
        Self::Replacement { atom_id: atom.id(), replacement_id: replacement.id() }
    }

    pub(crate) fn atom_id(&self) -> AtomId {
        match self {
            Preset::Value { atom_id, .. } => *atom_id,
            Preset::Replacement { atom_id, .. } => *atom_id,
        }
    }

    pub(crate) fn into_action(self) -> PresetAction {
        match self {
            Preset::Value { value, .. } => PresetAction::Value(value),
            Preset::Replacement { replacement_id, .. } => PresetAction::Replacement(replacement_id),
        }
    }
}

pub(crate) enum PresetAction {
    Value(AnyArc),
    Replacement(AtomId),
}
