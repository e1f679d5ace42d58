//! Atom descriptors and their variant (main/lazy/reactive/static) views.
//!
//! Kept the immutable-descriptor shape (`Atom<T>` holding an id, a
//! factory, and a debug label) and the `next_atom_id`/`with_label`
//! builder conventions from the original atom model, replaced the
//! `ReadFn`/`WriteFn` single-function model with a `Dependencies`-aware
//! factory since this runtime's atoms are DI nodes, not get/set cells.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::analyzer::{analyze, Inference};
use crate::dependency::{Dependency, DependencyShape, ResolveCx};
use crate::error::EffectError;
use crate::scope::{Controller, Ctl};
use crate::tag::Tagged;
use crate::types::{next_atom_id, AtomId, ChainLink};

pub(crate) type ResolveFn<T> = Arc<
    dyn for<'a> Fn(
            Ctl<'a>,
            &'a [Tagged],
            &'a [ChainLink],
        ) -> BoxFuture<'a, Result<T, EffectError>>
        + Send
        + Sync,
>;

pub(crate) struct AtomInner<T: Clone + Send + Sync + 'static> {
    pub(crate) resolve: ResolveFn<T>,
    pub(crate) tags: Vec<Tagged>,
    pub(crate) keep_alive: bool,
    pub(crate) label: Option<String>,
    pub(crate) inference: Inference,
}

/// An immutable atom descriptor: identity plus everything needed to
/// resolve a value inside a scope. Variant views (`lazy`/`reactive`/
/// `static_ref`) share this same descriptor and differ only in how the
/// scope treats them at a dependency position.
pub struct Atom<T: Clone + Send + Sync + 'static> {
    pub(crate) id: AtomId,
    pub(crate) inner: Arc<AtomInner<T>>,
}

impl<T: Clone + Send + Sync + 'static> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self { id: self.id, inner: self.inner.clone() }
    }
}

impl<T: Clone + Send + Sync + 'static> Atom<T> {
    pub fn id(&self) -> AtomId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    pub fn keep_alive(&self) -> bool {
        self.inner.keep_alive
    }

    pub(crate) fn display_name(&self) -> String {
        match &self.inner.label {
            Some(l) => format!("atom{}:{}", self.id, l),
            None => format!("atom{}", self.id),
        }
    }

    /// The `lazy` variant: a dependency position carrying this yields a
    /// [`Controller`] without triggering resolution and without
    /// registering a dependents edge.
    pub fn lazy(&self) -> LazyRef<T> {
        LazyRef(self.clone())
    }

    /// The `reactive` variant: resolves the value like the main variant
    /// and subscribes the consuming atom for automatic invalidation.
    pub fn reactive(&self) -> ReactiveRef<T> {
        ReactiveRef(self.clone())
    }

    /// The `static` variant: yields a [`Controller`] and never triggers
    /// resolution as a side effect of being declared a dependency.
    pub fn static_ref(&self) -> StaticRef<T> {
        StaticRef(self.clone())
    }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Atom").field("id", &self.id).field("label", &self.inner.label).finish()
    }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Display for Atom<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Builder-style configuration shared by every `atom()` constructor.
pub struct AtomConfig {
    label: Option<String>,
    keep_alive: bool,
    tags: Vec<Tagged>,
}

impl AtomConfig {
    pub fn new() -> Self {
        Self { label: None, keep_alive: false, tags: Vec::new() }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn keep_alive(mut self) -> Self {
        self.keep_alive = true;
        self
    }

    pub fn with_tag(mut self, tagged: Tagged) -> Self {
        self.tags.push(tagged);
        self
    }
}

impl Default for AtomConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Declares an atom with dependencies `D` and a factory that receives a
/// [`Ctl`] (cleanup/release/reload/scope access) plus the resolved
/// dependency value.
pub fn atom<T, D, F>(deps: D, factory: F) -> Atom<T>
where
    T: Clone + Send + Sync + 'static,
    D: Dependency + Clone,
    F: Fn(Ctl<'_>, D::Output) -> BoxFuture<'static, Result<T, EffectError>> + Send + Sync + 'static,
{
    atom_with_config(deps, factory, AtomConfig::new())
}

/// Like [`atom`], but with explicit [`AtomConfig`] (label, `keep_alive`,
/// declared tags).
pub fn atom_with_config<T, D, F>(deps: D, factory: F, config: AtomConfig) -> Atom<T>
where
    T: Clone + Send + Sync + 'static,
    D: Dependency + Clone,
    F: Fn(Ctl<'_>, D::Output) -> BoxFuture<'static, Result<T, EffectError>> + Send + Sync + 'static,
{
    let shape = dependency_shape::<D>();
    let inference = analyze(shape);
    let factory = Arc::new(factory);
    let deps = Arc::new(deps);
    let resolve: ResolveFn<T> = Arc::new(move |ctl, tags, chain| {
        let deps = deps.clone();
        let factory = factory.clone();
        Box::pin(async move {
            let cx = ResolveCx { scope: ctl.scope(), tags, chain };
            let resolved = deps.resolve(&cx).await?;
            factory(ctl, resolved).await
        })
    });
    Atom {
        id: next_atom_id(),
        inner: Arc::new(AtomInner {
            resolve,
            tags: config.tags,
            keep_alive: config.keep_alive,
            label: config.label,
            inference,
        }),
    }
}

/// Declares a leaf atom (no dependencies) from a plain value, the
/// equivalent of a primitive atom.
pub fn atom_value<T: Clone + Send + Sync + 'static>(value: T) -> Atom<T> {
    atom((), move |_ctl, ()| {
        let value = value.clone();
        Box::pin(async move { Ok(value) })
    })
}

fn dependency_shape<D: Dependency>() -> DependencyShape {
    // `D` is resolved at compile time by which dependency value the
    // caller passed; this is purely descriptive metadata for `Inference`
    // (the analyzer's fallback path doesn't branch on it), so a
    // name-based classification is sufficient rather than plumbing a
    // dedicated associated const through every `Dependency` impl.
    let name = std::any::type_name::<D>();
    if name == std::any::type_name::<()>() {
        DependencyShape::None
    } else if name == std::any::type_name::<crate::dependency::Keyed>() {
        DependencyShape::Keyed
    } else if name.starts_with('(') {
        DependencyShape::Sequence
    } else {
        DependencyShape::Single
    }
}

impl<T: Clone + Send + Sync + 'static> Dependency for Atom<T> {
    type Output = T;

    fn resolve<'s, 'c: 's>(
        &'s self,
        cx: &'s ResolveCx<'c>,
    ) -> BoxFuture<'s, crate::error::Result<T>> {
        Box::pin(async move {
            let value = cx.scope.resolve_for_dependency(self, cx.tags, cx.chain).await?;
            if let Some(dependent) = cx.chain.last() {
                cx.scope.register_dependent(self.id, dependent.id);
            }
            Ok(value)
        })
    }
}

/// Dependency position that yields a [`Controller`] without resolving.
pub struct LazyRef<T: Clone + Send + Sync + 'static>(pub(crate) Atom<T>);

impl<T: Clone + Send + Sync + 'static> Clone for LazyRef<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + Send + Sync + 'static> Dependency for LazyRef<T> {
    type Output = Controller<T>;

    fn resolve<'s, 'c: 's>(
        &'s self,
        cx: &'s ResolveCx<'c>,
    ) -> BoxFuture<'s, crate::error::Result<Controller<T>>> {
        Box::pin(async move { Ok(cx.scope.controller(&self.0)) })
    }
}

/// Dependency position that resolves like the main variant and
/// additionally subscribes the consumer for automatic invalidation.
pub struct ReactiveRef<T: Clone + Send + Sync + 'static>(pub(crate) Atom<T>);

impl<T: Clone + Send + Sync + 'static> Clone for ReactiveRef<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + Send + Sync + 'static> Dependency for ReactiveRef<T> {
    type Output = T;

    fn resolve<'s, 'c: 's>(
        &'s self,
        cx: &'s ResolveCx<'c>,
    ) -> BoxFuture<'s, crate::error::Result<T>> {
        Box::pin(async move {
            let value = cx.scope.resolve_for_dependency(&self.0, cx.tags, cx.chain).await?;
            if let Some(dependent) = cx.chain.last() {
                cx.scope.register_dependent(self.0.id, dependent.id);
            }
            Ok(value)
        })
    }
}

/// Dependency position that yields a [`Controller`] and never triggers
/// resolution by itself.
pub struct StaticRef<T: Clone + Send + Sync + 'static>(pub(crate) Atom<T>);

impl<T: Clone + Send + Sync + 'static> Clone for StaticRef<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone + Send + Sync + 'static> Dependency for StaticRef<T> {
    type Output = Controller<T>;

    fn resolve<'s, 'c: 's>(
        &'s self,
        cx: &'s ResolveCx<'c>,
    ) -> BoxFuture<'s, crate::error::Result<Controller<T>>> {
        Box::pin(async move { Ok(cx.scope.controller(&self.0)) })
    }
}
