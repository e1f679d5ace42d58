//! Higher-level atom helpers built on the core atom/scope primitives:
//! keyed atom caching ([`atom_family`]) and memoized derived slices
//! ([`select_atom`]).

pub mod atom_family;
pub mod select_atom;
