//! The dependency descriptor shapes an atom can declare: none, a single
//! dependency, an ordered sequence, or a keyed mapping.
//!
//! Reference: a `Getter`/`Setter`-style trait with generic methods is
//! not dyn-compatible, which is the exact problem this module works
//! around — instead of a dyn-safe getter trait, each dependency shape is
//! monomorphized at `atom()` construction time into a boxed closure
//! (`ResolveFn` in `atom.rs`), the same erase-at-the-boundary trick
//! `ferrous-di`'s `resolve_any` uses to turn a generic `resolve::<T>()`
//! into a uniform `Arc<dyn Any>`-returning call.

use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::scope::Scope;
use crate::tag::Tagged;
use crate::types::ChainLink;

/// The shape of an atom's declared dependencies, known statically at
/// construction time since Rust's type system already enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyShape {
    None,
    Single,
    Sequence,
    Keyed,
}

/// Ambient information available while a dependency resolves: the owning
/// scope, the tag set merged for this resolution, and the chain of atoms
/// currently being resolved (for cycle detection and error naming).
pub struct ResolveCx<'a> {
    pub(crate) scope: &'a Scope,
    pub(crate) tags: &'a [Tagged],
    pub(crate) chain: &'a [ChainLink],
}

impl<'a> ResolveCx<'a> {
    pub fn scope(&self) -> &'a Scope {
        self.scope
    }

    pub fn tags(&self) -> &'a [Tagged] {
        self.tags
    }
}

/// Something that can be resolved against a scope into a typed output.
/// Implemented for `()` (no dependencies), `Atom<T>` and its variant
/// wrappers, `Tag<T>`/`TagExecutor<T, Mode>`, tuples up to arity 6
/// (sequence dependencies), and [`Keyed`] (record dependencies).
/// Note the two lifetime parameters: `'s` bounds the borrow of `self` and
/// of the `cx` reference itself, while `'c` (which may outlive `'s`) is
/// `ResolveCx`'s own internal lifetime — the one `scope`/`tags`/`chain`
/// are tied to. Splitting them lets a caller build a fresh, short-lived
/// `ResolveCx` on the stack and still hand out `&'c`-lifetime data (the
/// scope handle, the tag slice, the chain slice) into a future that
/// outlives that local variable.
pub trait Dependency: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;

    fn resolve<'s, 'c: 's>(
        &'s self,
        cx: &'s ResolveCx<'c>,
    ) -> BoxFuture<'s, crate::error::Result<Self::Output>>;
}

impl Dependency for () {
    type Output = ();

    fn resolve<'s, 'c: 's>(&'s self, _cx: &'s ResolveCx<'c>) -> BoxFuture<'s, crate::error::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Resolves every tuple position concurrently via `try_join!`, preserving
/// positional output order regardless of which future settles first.
macro_rules! impl_dependency_tuple {
    ($($idx:tt => $name:ident),+) => {
        impl<$($name: Dependency),+> Dependency for ($($name,)+) {
            type Output = ($($name::Output,)+);

            fn resolve<'s, 'c: 's>(&'s self, cx: &'s ResolveCx<'c>) -> BoxFuture<'s, crate::error::Result<Self::Output>> {
                Box::pin(async move {
                    let ($($name,)+) = futures::try_join!($(self.$idx.resolve(cx)),+)?;
                    Ok(($($name,)+))
                })
            }
        }
    };
}

impl_dependency_tuple!(0 => D0);
impl_dependency_tuple!(0 => D0, 1 => D1);
impl_dependency_tuple!(0 => D0, 1 => D1, 2 => D2);
impl_dependency_tuple!(0 => D0, 1 => D1, 2 => D2, 3 => D3);
impl_dependency_tuple!(0 => D0, 1 => D1, 2 => D2, 3 => D3, 4 => D4);
impl_dependency_tuple!(0 => D0, 1 => D1, 2 => D2, 3 => D3, 4 => D4, 5 => D5);

/// A keyed (record-shaped) dependency set: named, independently-typed
/// dependencies erased behind `Box<dyn ErasedDependency>`, resolved
/// concurrently (`Promise.all`-equivalent: first error wins, positions
/// don't wait on each other) into a name-addressable [`KeyedValues`].
pub struct Keyed {
    entries: IndexMap<String, Box<dyn ErasedDependency>>,
}

impl Keyed {
    pub fn new() -> Self {
        Self { entries: IndexMap::new() }
    }

    pub fn with<D>(mut self, key: impl Into<String>, dep: D) -> Self
    where
        D: Dependency,
        D::Output: 'static,
    {
        self.entries.insert(key.into(), Box::new(ErasedWrap(dep)));
        self
    }
}

impl Default for Keyed {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) trait ErasedDependency: Send + Sync {
    fn resolve_erased<'s, 'c: 's>(
        &'s self,
        cx: &'s ResolveCx<'c>,
    ) -> BoxFuture<'s, crate::error::Result<crate::types::AnyArc>>;
}

struct ErasedWrap<D>(D);

impl<D: Dependency> ErasedDependency for ErasedWrap<D> {
    fn resolve_erased<'s, 'c: 's>(
        &'s self,
        cx: &'s ResolveCx<'c>,
    ) -> BoxFuture<'s, crate::error::Result<crate::types::AnyArc>> {
        Box::pin(async move {
            let v = self.0.resolve(cx).await?;
            Ok(std::sync::Arc::new(v) as crate::types::AnyArc)
        })
    }
}

/// Resolved output of a [`Keyed`] dependency set: a name-addressable map
/// of type-erased values, downcast on read.
pub struct KeyedValues {
    values: IndexMap<String, crate::types::AnyArc>,
}

impl KeyedValues {
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.values.get(key).and_then(crate::types::downcast::<T>)
    }
}

impl Dependency for Keyed {
    type Output = std::sync::Arc<KeyedValues>;

    fn resolve<'s, 'c: 's>(
        &'s self,
        cx: &'s ResolveCx<'c>,
    ) -> BoxFuture<'s, crate::error::Result<Self::Output>> {
        Box::pin(async move {
            let keys: Vec<&String> = self.entries.keys().collect();
            let resolved =
                futures::future::try_join_all(self.entries.values().map(|dep| dep.resolve_erased(cx))).await?;
            let values = keys.into_iter().cloned().zip(resolved).collect();
            Ok(std::sync::Arc::new(KeyedValues { values }))
        })
    }
}
