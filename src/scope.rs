//! The scope: owns atom state, the dependents graph, listener sets, and
//! the automatic-GC scheduler.
//!
//! Reference: `store.rs`'s `DashMap<AtomId, Arc<RwLock<...>>>` atom-state
//! storage and `mounted`/`invalidated`/`changed` bookkeeping, for the
//! overall shape of "one concurrent map per concern"; the dispose/
//! cleanup-stack pattern is grounded in `ferrous-di`'s `DisposeBag`
//! (LIFO teardown, run regardless of success or failure).

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::atom::Atom;
use crate::error::EffectError;
use crate::extension::{run_pipeline, Operation};
use crate::preset::{Preset, PresetAction};
use crate::primitives::Promised;
use crate::tag::Tagged;
use crate::types::{downcast, next_listener_id, AnyArc, AtomId, ChainLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomLifecycle {
    Idle,
    Resolving,
    Resolved,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomEvent {
    Resolving,
    Resolved,
    Failed,
    Released,
    Invalidated,
}

type Listener = Arc<dyn Fn() + Send + Sync>;
type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

pub(crate) struct AtomEntry {
    state: AtomLifecycle,
    value: Option<AnyArc>,
    error: Option<EffectError>,
    cleanups: Vec<CleanupFn>,
    listeners: IndexMap<AtomEvent, IndexMap<u64, Listener>>,
    dependents: IndexSet<AtomId>,
    dependencies: IndexSet<AtomId>,
    data: HashMap<String, Box<dyn Any + Send + Sync>>,
    in_flight: Option<Promised<AnyArc>>,
    gc_token: Option<CancellationToken>,
    keep_alive: bool,
    self_invalidate_requested: bool,
}

impl AtomEntry {
    fn new(keep_alive: bool) -> Self {
        Self {
            state: AtomLifecycle::Idle,
            value: None,
            error: None,
            cleanups: Vec::new(),
            listeners: IndexMap::new(),
            dependents: IndexSet::new(),
            dependencies: IndexSet::new(),
            data: HashMap::new(),
            in_flight: None,
            gc_token: None,
            keep_alive,
            self_invalidate_requested: false,
        }
    }

    fn listeners_for(&self, event: AtomEvent) -> Vec<Listener> {
        self.listeners.get(&event).map(|m| m.values().cloned().collect()).unwrap_or_default()
    }

    fn has_subscribers(&self) -> bool {
        self.listeners.values().any(|m| !m.is_empty())
    }
}

/// Per-atom handle for data shared across resolutions of the same atom
/// (survives invalidation, cleared on release).
pub struct DataHandle {
    entry: Arc<RwLock<AtomEntry>>,
}

impl DataHandle {
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.entry.read().data.get(key).and_then(|b| b.downcast_ref::<T>().cloned())
    }

    pub fn set<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.entry.write().data.insert(key.into(), Box::new(value));
    }
}

/// Passed to a factory on every resolution: cleanup registration plus
/// `release`/`reload`/`scope`/`data` access, realized here as methods
/// rather than closure-captured free functions.
pub struct Ctl<'a> {
    scope: &'a Scope,
    atom_id: AtomId,
    entry: Arc<RwLock<AtomEntry>>,
}

impl<'a> Ctl<'a> {
    pub fn scope(&self) -> &'a Scope {
        self.scope
    }

    /// Registers a cleanup to run, LIFO, when this atom is released,
    /// invalidated, or the owning scope is disposed.
    pub fn cleanup<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.entry.write().cleanups.push(Box::new(move || Box::pin(f())));
    }

    pub async fn release(&self) {
        self.scope.release_by_id(self.atom_id).await;
    }

    pub async fn reload(&self) {
        self.scope.invalidate_by_id(self.atom_id).await;
    }

    /// Requests a self-invalidation: deferred until the current factory
    /// run settles successfully, so cleanups registered by this run are
    /// preserved and the next resolution starts only after this one has
    /// actually resolved.
    pub fn invalidate_self(&self) {
        self.entry.write().self_invalidate_requested = true;
    }

    pub fn data(&self) -> DataHandle {
        DataHandle { entry: self.entry.clone() }
    }
}

/// A handle yielded by the `lazy`/`static` dependency variants (and by
/// [`Scope::controller`] directly): `state`/`get` read synchronously,
/// `resolve`/`release`/`invalidate` drive the atom, `on` subscribes.
pub struct Controller<T: Clone + Send + Sync + 'static> {
    scope: Scope,
    atom: Atom<T>,
}

impl<T: Clone + Send + Sync + 'static> Controller<T> {
    pub fn state(&self) -> AtomLifecycle {
        self.scope.state_of(self.atom.id)
    }

    /// Synchronous read of the last-known value. Errors if the atom has
    /// never resolved, is mid-resolution with no prior value, or is in
    /// the failed state.
    pub fn get(&self) -> Result<T, EffectError> {
        self.scope.get_cached(&self.atom)
    }

    pub async fn resolve(&self) -> Result<T, EffectError> {
        self.scope.resolve(&self.atom).await
    }

    pub async fn release(&self) {
        self.scope.release(&self.atom).await;
    }

    pub async fn invalidate(&self) {
        self.scope.invalidate(&self.atom).await;
    }

    pub fn on(&self, event: AtomEvent, listener: impl Fn() + Send + Sync + 'static) -> Unsubscribe {
        self.scope.on(&self.atom, event, listener)
    }
}

/// Config accepted by [`Scope::new`]. The crate's only "configuration
/// surface" — no file or environment config is read.
pub struct ScopeOptions {
    pub gc_grace: Duration,
    pub tags: Vec<Tagged>,
    pub presets: Vec<Preset>,
    pub extensions: Vec<Arc<dyn crate::extension::Extension>>,
}

impl Default for ScopeOptions {
    fn default() -> Self {
        Self {
            gc_grace: Duration::from_millis(3000),
            tags: Vec::new(),
            presets: Vec::new(),
            extensions: Vec::new(),
        }
    }
}

struct ScopeInner {
    id: u64,
    entries: DashMap<AtomId, Arc<RwLock<AtomEntry>>>,
    presets: HashMap<AtomId, PresetAction>,
    tags: Vec<Tagged>,
    extensions: Vec<Arc<dyn crate::extension::Extension>>,
    gc_grace: Duration,
    disposed: AtomicBool,
}

fn next_scope_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Owns every atom's runtime state inside one resolution graph. Cheap to
/// clone (an `Arc` handle), the way a `Store` is meant to be shared
/// across a process.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub fn new(options: ScopeOptions) -> Self {
        let presets = options.presets.into_iter().map(|p| (p.atom_id(), p.into_action())).collect();
        let scope = Self {
            inner: Arc::new(ScopeInner {
                id: next_scope_id(),
                entries: DashMap::new(),
                presets,
                tags: options.tags,
                extensions: options.extensions,
                gc_grace: options.gc_grace,
                disposed: AtomicBool::new(false),
            }),
        };
        for ext in &scope.inner.extensions {
            ext.init(&scope);
        }
        scope
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    fn entry_for(&self, atom_id: AtomId, keep_alive: bool) -> Arc<RwLock<AtomEntry>> {
        self.inner
            .entries
            .entry(atom_id)
            .or_insert_with(|| Arc::new(RwLock::new(AtomEntry::new(keep_alive))))
            .clone()
    }

    fn merged_tags(&self, atom_tags: &[Tagged], ambient: &[Tagged]) -> Vec<Tagged> {
        let mut merged = Vec::with_capacity(atom_tags.len() + ambient.len());
        merged.extend(atom_tags.iter().cloned());
        merged.extend(ambient.iter().cloned());
        merged
    }

    /// Top-level resolve entry point: ambient tags are just the
    /// scope-wide set, no parent chain.
    pub async fn resolve<T: Clone + Send + Sync + 'static>(&self, atom: &Atom<T>) -> Result<T, EffectError> {
        let ambient = self.inner.tags.clone();
        self.resolve_chain(atom, &ambient, &[]).await
    }

    /// Entry point used by `Dependency` impls resolving a nested atom:
    /// `ambient` is the merged tag set visible at the calling resolution
    /// (itself already `atom-declared ++ ambient` from one level up), so
    /// it threads context/exec-time tags down through the whole chain
    /// without re-merging scope tags at every level.
    pub(crate) async fn resolve_for_dependency<T: Clone + Send + Sync + 'static>(
        &self,
        atom: &Atom<T>,
        ambient: &[Tagged],
        parent_chain: &[ChainLink],
    ) -> Result<T, EffectError> {
        self.resolve_chain(atom, ambient, parent_chain).await
    }

    async fn resolve_chain<T: Clone + Send + Sync + 'static>(
        &self,
        atom: &Atom<T>,
        ambient: &[Tagged],
        parent_chain: &[ChainLink],
    ) -> Result<T, EffectError> {
        if self.inner.disposed.load(Ordering::Acquire) {
            return Err(EffectError::execution_context_closed(format!("scope-{}", self.inner.id)));
        }

        if let Some(link) = parent_chain.iter().find(|l| l.id == atom.id) {
            let chain_names: Vec<String> =
                parent_chain.iter().skip_while(|l| l.id != link.id).map(|l| l.name.clone()).collect();
            return Err(EffectError::circular_dependency(chain_names));
        }

        if let Some(action) = self.inner.presets.get(&atom.id) {
            return self.resolve_preset(atom, action).await;
        }

        let entry = self.entry_for(atom.id, atom.keep_alive());
        self.cancel_gc(&entry);

        enum Action {
            Cached(AnyArc),
            Await(Promised<AnyArc>),
            Start,
        }

        let action = {
            let guard = entry.read();
            match guard.state {
                AtomLifecycle::Resolved => Action::Cached(guard.value.clone().expect("resolved entry has a value")),
                AtomLifecycle::Resolving => Action::Await(guard.in_flight.clone().expect("resolving entry has a promise")),
                AtomLifecycle::Idle | AtomLifecycle::Failed => Action::Start,
            }
        };

        let raw = match action {
            Action::Cached(v) => v,
            Action::Await(p) => p.wait().await?,
            Action::Start => self.start_resolution(atom, ambient, parent_chain, entry.clone()).await?,
        };

        downcast::<T>(&raw).ok_or_else(|| {
            EffectError::custom(format!("type mismatch resolving `{}`", atom.display_name()))
        })
    }

    async fn resolve_preset<T: Clone + Send + Sync + 'static>(
        &self,
        atom: &Atom<T>,
        action: &PresetAction,
    ) -> Result<T, EffectError> {
        match action {
            PresetAction::Value(value) => downcast::<T>(value)
                .ok_or_else(|| EffectError::custom(format!("preset type mismatch for `{}`", atom.display_name()))),
            PresetAction::Replacement(replacement_id) => {
                // The replacement atom is resolved under its own id; we
                // re-key the result into this atom's identity so future
                // lookups by the original atom see a cached value too.
                let entry = self.entry_for(atom.id, atom.keep_alive());
                if let Some(replacement_entry) = self.inner.entries.get(replacement_id) {
                    let cached = replacement_entry.read().value.clone();
                    if let Some(v) = cached {
                        let mut guard = entry.write();
                        guard.state = AtomLifecycle::Resolved;
                        guard.value = Some(v.clone());
                        return downcast::<T>(&v).ok_or_else(|| {
                            EffectError::custom(format!("preset type mismatch for `{}`", atom.display_name()))
                        });
                    }
                }
                Err(EffectError::custom(format!(
                    "preset replacement atom {replacement_id} for `{}` has not been resolved",
                    atom.display_name()
                )))
            }
        }
    }

    async fn start_resolution<T: Clone + Send + Sync + 'static>(
        &self,
        atom: &Atom<T>,
        ambient: &[Tagged],
        parent_chain: &[ChainLink],
        entry: Arc<RwLock<AtomEntry>>,
    ) -> Result<AnyArc, EffectError> {
        let mut new_chain = parent_chain.to_vec();
        new_chain.push(ChainLink { id: atom.id, name: atom.display_name() });

        {
            let mut guard = entry.write();
            guard.state = AtomLifecycle::Resolving;
        }
        for l in entry.read().listeners_for(AtomEvent::Resolving) {
            l();
        }

        let scope = self.clone();
        let atom_id = atom.id;
        let atom = atom.clone();
        let ambient = ambient.to_vec();
        let entry_for_task = entry.clone();
        let name = atom.display_name();

        let extensions = self.inner.extensions.clone();

        let promised = Promised::create(async move {
            let merged = scope.merged_tags(&atom.inner.tags, &ambient);
            let op = Operation::Resolve { executor: name.clone() };
            let result: Result<T, EffectError> = run_pipeline(&extensions, &scope, &op, || {
                Box::pin(async {
                    let ctl = Ctl { scope: &scope, atom_id: atom.id, entry: entry_for_task.clone() };
                    (atom.inner.resolve)(ctl, &merged, &new_chain).await
                })
            })
            .await;
            result
                .map(|v| Arc::new(v) as AnyArc)
                .map_err(|e| e.with_frame(name.clone()))
        });

        {
            let mut guard = entry.write();
            guard.in_flight = Some(promised.clone());
        }

        let outcome = promised.wait().await;

        {
            let mut guard = entry.write();
            guard.in_flight = None;
            match &outcome {
                Ok(v) => {
                    guard.state = AtomLifecycle::Resolved;
                    guard.value = Some(v.clone());
                    guard.error = None;
                }
                Err(e) => {
                    guard.state = AtomLifecycle::Failed;
                    guard.error = Some(e.clone());
                    let cleanups = std::mem::take(&mut guard.cleanups);
                    drop(guard);
                    run_cleanups(cleanups).await;
                }
            }
        }

        for l in entry.read().listeners_for(match &outcome {
            Ok(_) => AtomEvent::Resolved,
            Err(_) => AtomEvent::Failed,
        }) {
            l();
        }

        if outcome.is_ok() {
            let requested = std::mem::take(&mut entry.write().self_invalidate_requested);
            if requested {
                let scope = self.clone();
                tokio::spawn(async move { scope.invalidate_by_id(atom_id).await });
            }
        }

        self.maybe_schedule_gc(atom_id, entry.clone());
        outcome
    }

    pub(crate) fn register_dependent(&self, dep_id: AtomId, dependent_id: AtomId) {
        if let Some(dep_entry) = self.inner.entries.get(&dep_id) {
            dep_entry.write().dependents.insert(dependent_id);
            self.cancel_gc(&dep_entry);
        }
        if let Some(dependent_entry) = self.inner.entries.get(&dependent_id) {
            dependent_entry.write().dependencies.insert(dep_id);
        }
    }

    pub fn controller<T: Clone + Send + Sync + 'static>(&self, atom: &Atom<T>) -> Controller<T> {
        Controller { scope: self.clone(), atom: atom.clone() }
    }

    pub(crate) fn state_of(&self, atom_id: AtomId) -> AtomLifecycle {
        self.inner.entries.get(&atom_id).map(|e| e.read().state).unwrap_or(AtomLifecycle::Idle)
    }

    pub(crate) fn get_cached<T: Clone + Send + Sync + 'static>(&self, atom: &Atom<T>) -> Result<T, EffectError> {
        let Some(entry) = self.inner.entries.get(&atom.id) else {
            return Err(EffectError::custom(format!("`{}` has not been resolved", atom.display_name())));
        };
        let guard = entry.read();
        match guard.state {
            AtomLifecycle::Resolved => downcast::<T>(guard.value.as_ref().unwrap())
                .ok_or_else(|| EffectError::custom("type mismatch reading cached value")),
            AtomLifecycle::Failed => Err(guard.error.clone().unwrap()),
            AtomLifecycle::Idle | AtomLifecycle::Resolving => {
                Err(EffectError::custom(format!("`{}` has no value yet", atom.display_name())))
            }
        }
    }

    pub async fn release<T: Clone + Send + Sync + 'static>(&self, atom: &Atom<T>) {
        self.release_by_id(atom.id).await;
    }

    pub(crate) async fn release_by_id(&self, atom_id: AtomId) {
        let Some(entry) = self.inner.entries.get(&atom_id).map(|e| e.clone()) else { return };
        let cleanups = {
            let mut guard = entry.write();
            guard.state = AtomLifecycle::Idle;
            guard.value = None;
            guard.error = None;
            guard.data.clear();
            std::mem::take(&mut guard.cleanups)
        };
        run_cleanups(cleanups).await;
        for l in entry.read().listeners_for(AtomEvent::Released) {
            l();
        }
        // Releasing cascades downward: every atom that depended on this one
        // loses a value it can no longer trust.
        let dependents: Vec<AtomId> = entry.read().dependents.iter().copied().collect();
        for dep in dependents {
            Box::pin(self.invalidate_by_id(dep)).await;
        }
        // ...and upward: this atom no longer holds a dependent edge into
        // whatever it depended on, so those may now be GC-eligible too
        // (e.g. releasing a service atom should eventually free the db/
        // config atoms underneath it, unless they're `keep_alive` or still
        // referenced elsewhere).
        let dependencies: Vec<AtomId> = entry.read().dependencies.iter().copied().collect();
        for dep_id in dependencies {
            if let Some(dep_entry) = self.inner.entries.get(&dep_id).map(|e| e.clone()) {
                dep_entry.write().dependents.shift_remove(&atom_id);
                self.maybe_schedule_gc(dep_id, dep_entry);
            }
        }
    }

    pub async fn invalidate<T: Clone + Send + Sync + 'static>(&self, atom: &Atom<T>) {
        self.invalidate_by_id(atom.id).await;
    }

    pub(crate) async fn invalidate_by_id(&self, atom_id: AtomId) {
        let Some(entry) = self.inner.entries.get(&atom_id).map(|e| e.clone()) else { return };
        let cleanups = {
            let mut guard = entry.write();
            if guard.state == AtomLifecycle::Idle {
                return;
            }
            guard.state = AtomLifecycle::Idle;
            std::mem::take(&mut guard.cleanups)
        };
        run_cleanups(cleanups).await;
        for l in entry.read().listeners_for(AtomEvent::Invalidated) {
            l();
        }
        let dependents: Vec<AtomId> = entry.read().dependents.iter().copied().collect();
        for dep in dependents {
            Box::pin(self.invalidate_by_id(dep)).await;
        }
    }

    pub fn on<T: Clone + Send + Sync + 'static>(
        &self,
        atom: &Atom<T>,
        event: AtomEvent,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> Unsubscribe {
        let entry = self.entry_for(atom.id, atom.keep_alive());
        let id = next_listener_id();
        entry.write().listeners.entry(event).or_default().insert(id, Arc::new(listener));
        self.cancel_gc(&entry);
        let entry_for_unsub = entry.clone();
        let scope = self.clone();
        let atom_id = atom.id;
        Box::new(move || {
            if let Some(m) = entry_for_unsub.write().listeners.get_mut(&event) {
                m.shift_remove(&id);
            }
            scope.maybe_schedule_gc(atom_id, entry_for_unsub);
        })
    }

    fn cancel_gc(&self, entry: &Arc<RwLock<AtomEntry>>) {
        let token = entry.write().gc_token.take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    fn maybe_schedule_gc(&self, atom_id: AtomId, entry: Arc<RwLock<AtomEntry>>) {
        let should_schedule = {
            let guard = entry.read();
            !guard.keep_alive && guard.dependents.is_empty() && !guard.has_subscribers()
        };
        if !should_schedule {
            return;
        }
        let token = CancellationToken::new();
        entry.write().gc_token = Some(token.clone());
        let scope = self.clone();
        let grace = self.inner.gc_grace;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(grace) => {
                    scope.release_by_id(atom_id).await;
                    scope.inner.entries.remove(&atom_id);
                }
                _ = token.cancelled() => {}
            }
        });
    }

    /// Tears the scope down: releases every atom's cleanups, LIFO within
    /// each atom, and rejects further resolutions.
    pub async fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
        let ids: Vec<AtomId> = self.inner.entries.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.release_by_id(id).await;
        }
        for ext in &self.inner.extensions {
            ext.dispose(self);
        }
    }

    pub(crate) fn extensions(&self) -> &[Arc<dyn crate::extension::Extension>] {
        &self.inner.extensions
    }
}

async fn run_cleanups(cleanups: Vec<CleanupFn>) {
    for cleanup in cleanups.into_iter().rev() {
        cleanup().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::atom_value;

    #[tokio::test]
    async fn resolve_caches_across_calls() {
        let scope = Scope::new(ScopeOptions::default());
        let a = atom_value(5);
        assert_eq!(scope.resolve(&a).await.unwrap(), 5);
        assert_eq!(scope.resolve(&a).await.unwrap(), 5);
        assert_eq!(scope.state_of(a.id()), AtomLifecycle::Resolved);
    }

    #[tokio::test]
    async fn invalidate_resets_to_idle() {
        let scope = Scope::new(ScopeOptions::default());
        let a = atom_value(5);
        scope.resolve(&a).await.unwrap();
        scope.invalidate(&a).await;
        assert_eq!(scope.state_of(a.id()), AtomLifecycle::Idle);
    }

    #[tokio::test]
    async fn release_clears_cached_value() {
        let scope = Scope::new(ScopeOptions::default());
        let a = atom_value(5);
        scope.resolve(&a).await.unwrap();
        scope.release(&a).await;
        assert!(scope.controller(&a).get().is_err());
    }

    #[tokio::test]
    async fn self_invalidate_triggers_a_fresh_resolution_after_settling() {
        use crate::atom::atom;
        use std::sync::atomic::AtomicUsize;

        let scope = Scope::new(ScopeOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_factory = calls.clone();
        let a: Atom<usize> = atom((), move |ctl, ()| {
            let calls = calls_for_factory.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    ctl.invalidate_self();
                }
                Ok(n)
            })
        });

        assert_eq!(scope.resolve(&a).await.unwrap(), 0);
        // The self-invalidation is deferred onto a spawned task; give the
        // runtime a turn to run it before checking the state reset.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(scope.state_of(a.id()), AtomLifecycle::Idle);
        assert_eq!(scope.resolve(&a).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn controller_listener_fires_on_resolve() {
        let scope = Scope::new(ScopeOptions::default());
        let a = atom_value(5);
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired2 = fired.clone();
        let controller = scope.controller(&a);
        let _unsub = controller.on(AtomEvent::Resolved, move || {
            fired2.store(true, Ordering::SeqCst);
        });
        scope.resolve(&a).await.unwrap();
        assert!(fired.load(Ordering::SeqCst));
    }
}
