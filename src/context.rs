//! The execution-context tree: per-invocation nodes threading tags, an
//! abort signal, a replay journal, and close semantics through nested
//! flow/function executions.
//!
//! Reference: `s1ntropy-ferrous-di`'s durable-agent example threading a
//! shared `Arc<CancellationToken>` through its resolver chain, adapted
//! here for the parent→child abort chain; `store.rs`'s
//! `Arc<RwLock<...>>`-per-concern shape for how state is split across
//! `children`/`journal`/`in_flight`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::EffectError;
use crate::extension::{run_pipeline, ExecutionMode, LifecyclePhase, Operation};
use crate::primitives::Promised;
use crate::scope::Scope;
use crate::tag::Tagged;
use crate::types::{downcast, next_context_id, next_listener_id, AnyArc, ContextId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    Graceful,
    Abort,
}

/// `(flow/fn name, depth, key)` — the coordinate a journal entry is
/// replayed under.
pub type JournalKey = (String, usize, String);

#[derive(Clone)]
enum JournalEntry {
    Ok(AnyArc),
    Err(EffectError),
}

/// Retries the same `exec` up to `max_attempts` times (inclusive of the
/// first attempt) while the handler keeps failing.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn times(max_attempts: u32) -> Self {
        Self { max_attempts: max_attempts.max(1) }
    }
}

#[derive(Default, Clone)]
pub struct ExecOptions {
    pub key: Option<String>,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    pub tags: Vec<Tagged>,
}

type CleanupFn = Box<dyn FnOnce() -> futures::future::BoxFuture<'static, ()> + Send>;
type StateListener = Arc<dyn Fn(ContextState) + Send + Sync>;
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

struct ContextInner {
    id: ContextId,
    scope: Scope,
    name: String,
    depth: usize,
    parent_tags: Vec<Tagged>,
    own_tags: Vec<Tagged>,
    token: CancellationToken,
    state: RwLock<ContextState>,
    children: RwLock<Vec<ExecutionContext>>,
    journal: DashMap<JournalKey, JournalEntry>,
    in_flight: DashMap<u64, Promised<AnyArc>>,
    on_close: RwLock<Vec<CleanupFn>>,
    state_listeners: RwLock<IndexMap<u64, StateListener>>,
    close_started: std::sync::atomic::AtomicBool,
}

fn next_in_flight_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A node in the execution-context tree. Cheap to clone (an `Arc`
/// handle).
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

impl ExecutionContext {
    /// Creates a root context (no parent), emitting the `create`
    /// lifecycle event through the extension pipeline.
    pub async fn root(scope: &Scope, name: impl Into<String>, tags: Vec<Tagged>) -> Self {
        let ctx = Self {
            inner: Arc::new(ContextInner {
                id: next_context_id(),
                scope: scope.clone(),
                name: name.into(),
                depth: 0,
                parent_tags: Vec::new(),
                own_tags: tags,
                token: CancellationToken::new(),
                state: RwLock::new(ContextState::Active),
                children: RwLock::new(Vec::new()),
                journal: DashMap::new(),
                in_flight: DashMap::new(),
                on_close: RwLock::new(Vec::new()),
                state_listeners: RwLock::new(IndexMap::new()),
                close_started: std::sync::atomic::AtomicBool::new(false),
            }),
        };
        trace!(context = ctx.inner.id, "context-lifecycle/create");
        ctx.notify_lifecycle(scope, LifecyclePhase::Create, None).await;
        ctx
    }

    async fn child(&self, name: impl Into<String>, extra_tags: Vec<Tagged>) -> Self {
        let mut parent_tags = self.inner.parent_tags.clone();
        parent_tags.extend(self.inner.own_tags.iter().cloned());
        let child = Self {
            inner: Arc::new(ContextInner {
                id: next_context_id(),
                scope: self.inner.scope.clone(),
                name: name.into(),
                depth: self.inner.depth + 1,
                parent_tags,
                own_tags: extra_tags,
                token: self.inner.token.child_token(),
                state: RwLock::new(ContextState::Active),
                children: RwLock::new(Vec::new()),
                journal: DashMap::new(),
                in_flight: DashMap::new(),
                on_close: RwLock::new(Vec::new()),
                state_listeners: RwLock::new(IndexMap::new()),
                close_started: std::sync::atomic::AtomicBool::new(false),
            }),
        };
        self.inner.children.write().push(child.clone());
        trace!(context = child.inner.id, parent = self.inner.id, "context-lifecycle/create");
        child.notify_lifecycle(&self.inner.scope, LifecyclePhase::Create, None).await;
        child
    }

    /// Runs a `context-lifecycle` operation through the extension
    /// pipeline. A no-op call by itself (`base` always returns `Ok(())`);
    /// its only purpose is letting extensions observe the transition, or
    /// short-circuit around it.
    async fn notify_lifecycle(&self, scope: &Scope, phase: LifecyclePhase, mode: Option<CloseMode>) {
        let extensions = scope.extensions().to_vec();
        let op = Operation::ContextLifecycle { phase, context: self.inner.id, mode };
        let _: Result<(), EffectError> = run_pipeline(&extensions, scope, &op, || Box::pin(async { Ok(()) })).await;
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }

    pub fn state(&self) -> ContextState {
        *self.inner.state.read()
    }

    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    /// The merged tag source visible at this node: ancestors first, own
    /// tags last (later wins on a `Tag::read_from` lookup).
    pub fn tags(&self) -> Vec<Tagged> {
        let mut merged = self.inner.parent_tags.clone();
        merged.extend(self.inner.own_tags.iter().cloned());
        merged
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    pub fn on_close<F, Fut>(&self, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.on_close.write().push(Box::new(move || Box::pin(f())));
    }

    pub fn on_state_change(&self, cb: impl Fn(ContextState) + Send + Sync + 'static) -> Unsubscribe {
        let id = next_listener_id();
        self.inner.state_listeners.write().insert(id, Arc::new(cb));
        let inner = self.inner.clone();
        Box::new(move || {
            inner.state_listeners.write().shift_remove(&id);
        })
    }

    fn set_state(&self, state: ContextState) {
        *self.inner.state.write() = state;
        let listeners: Vec<StateListener> = self.inner.state_listeners.read().values().cloned().collect();
        for l in listeners {
            l(state);
        }
    }

    /// Runs `f` as a function execution under this context: journal
    /// replay, linked-abort child context, timeout, retry, and
    /// auto-close on settle.
    pub async fn exec<T, F, Fut>(&self, name: impl Into<String>, options: ExecOptions, f: F) -> Promised<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, EffectError>> + Send + 'static,
    {
        if self.state() != ContextState::Active {
            return Promised::reject(EffectError::execution_context_closed(self.inner.name.clone()));
        }

        let name = name.into();
        let journal_key = options.key.as_ref().map(|k| (name.clone(), self.inner.depth, k.clone()));

        if let Some(key) = &journal_key {
            if let Some(entry) = self.inner.journal.get(key) {
                return match entry.value() {
                    JournalEntry::Ok(v) => match downcast::<T>(v) {
                        Some(v) => Promised::resolve(v),
                        None => Promised::reject(EffectError::custom(format!(
                            "journal replay type mismatch for `{name}`"
                        ))),
                    },
                    JournalEntry::Err(e) => Promised::reject(e.clone()),
                };
            }
        }

        let child = self.child(name.clone(), options.tags.clone()).await;
        let extensions: Vec<_> = self.inner.scope.extensions().to_vec();
        let scope_for_task = self.inner.scope.clone();
        let attempts = options.retry.map(|r| r.max_attempts).unwrap_or(1);
        let timeout = options.timeout;
        let key_for_op = options.key.clone();

        let in_flight_id = next_in_flight_id();
        let self_inner = self.inner.clone();
        let self_inner_for_in_flight = self.inner.clone();
        let child_for_task = child.clone();

        let promised = Promised::create(async move {
            let mut last_err = None;
            let mut outcome = None;
            for attempt in 0..attempts {
                debug!(context = child_for_task.inner.id, %name, attempt, "execution start");
                let op = Operation::Execution {
                    name: name.clone(),
                    mode: ExecutionMode::Sequential,
                    key: key_for_op.clone(),
                    context: child_for_task.inner.id,
                };
                let run = run_pipeline(&extensions, &scope_for_task, &op, || Box::pin(f(child_for_task.clone())));
                let result = match timeout {
                    Some(d) => match tokio::time::timeout(d, run).await {
                        Ok(r) => r,
                        Err(_) => Err(EffectError::aborted(format!("`{name}` timed out"))),
                    },
                    None => run.await,
                };
                match result {
                    Ok(v) => {
                        outcome = Some(Ok(v));
                        break;
                    }
                    Err(e) => last_err = Some(e),
                }
            }
            let outcome = outcome.unwrap_or_else(|| Err(last_err.expect("at least one attempt ran")));
            child_for_task.close(CloseMode::Graceful).await;

            // Written as part of this same future, before it settles, so a
            // second `exec` with the same key can never observe a missing
            // journal entry for an outcome that has already resolved.
            if let Some(key) = journal_key {
                let entry = match &outcome {
                    Ok(v) => JournalEntry::Ok(Arc::new(v.clone())),
                    Err(e) => JournalEntry::Err(e.clone()),
                };
                self_inner.journal.insert(key, entry);
            }
            self_inner.in_flight.remove(&in_flight_id);

            outcome
        });

        self_inner_for_in_flight
            .in_flight
            .insert(in_flight_id, promised.clone().map(|v| Arc::new(v) as AnyArc));

        promised
    }

    /// Runs every `Promised` to completion, failing (and aborting the
    /// rest) on the first rejection.
    pub async fn parallel<T: Clone + Send + Sync + 'static>(
        &self,
        items: Vec<Promised<T>>,
    ) -> Result<Vec<T>, EffectError> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            match item.wait().await {
                Ok(v) => results.push(v),
                Err(e) => {
                    self.inner.token.cancel();
                    return Err(e);
                }
            }
        }
        Ok(results)
    }

    /// Runs every `Promised` to completion regardless of failures,
    /// returning a partitioned result set.
    pub async fn parallel_settled<T: Clone + Send + Sync + 'static>(
        &self,
        items: Vec<Promised<T>>,
    ) -> crate::primitives::Partitioned<T> {
        Promised::partition(items).await
    }

    /// Idempotent: a second call while already closing observes the same
    /// completion as the first.
    pub async fn close(&self, mode: CloseMode) {
        if self
            .inner
            .close_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.set_state(ContextState::Closing);
        trace!(context = self.inner.id, "context-lifecycle/closing");
        self.notify_lifecycle(&self.inner.scope, LifecyclePhase::Closing, Some(mode)).await;

        if mode == CloseMode::Abort {
            self.inner.token.cancel();
        }

        let children: Vec<ExecutionContext> = self.inner.children.read().clone();
        futures::future::join_all(children.into_iter().map(|child| async move { child.close(mode).await }))
            .await;

        let in_flight: Vec<Promised<AnyArc>> = self.inner.in_flight.iter().map(|e| e.value().clone()).collect();
        let _ = Promised::partition(in_flight).await;

        let cleanups = std::mem::take(&mut *self.inner.on_close.write());
        for cleanup in cleanups.into_iter().rev() {
            cleanup().await;
        }

        self.set_state(ContextState::Closed);
        trace!(context = self.inner.id, "context-lifecycle/closed");
        self.notify_lifecycle(&self.inner.scope, LifecyclePhase::Closed, Some(mode)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeOptions;

    #[tokio::test]
    async fn exec_runs_handler_and_closes_child() {
        let scope = Scope::new(ScopeOptions::default());
        let root = ExecutionContext::root(&scope, "root", vec![]);
        let result = root
            .exec("greet", ExecOptions::default(), |_ctx| async { Ok::<_, EffectError>(7) })
            .await;
        assert_eq!(result.wait().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn exec_replays_journal_on_matching_key() {
        let scope = Scope::new(ScopeOptions::default());
        let root = ExecutionContext::root(&scope, "root", vec![]);
        let calls = Arc::new(AtomicU64::new(0));
        let opts = ExecOptions { key: Some("k".into()), ..Default::default() };
        for _ in 0..2 {
            let calls = calls.clone();
            let result = root
                .exec("counted", opts.clone(), move |_ctx| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, EffectError>(1)
                    }
                })
                .await;
            result.wait().await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let scope = Scope::new(ScopeOptions::default());
        let root = ExecutionContext::root(&scope, "root", vec![]);
        root.close(CloseMode::Graceful).await;
        root.close(CloseMode::Graceful).await;
        assert_eq!(root.state(), ContextState::Closed);
    }

    #[tokio::test]
    async fn exec_rejects_on_closed_context() {
        let scope = Scope::new(ScopeOptions::default());
        let root = ExecutionContext::root(&scope, "root", vec![]);
        root.close(CloseMode::Graceful).await;
        let result = root
            .exec("noop", ExecOptions::default(), |_ctx| async { Ok::<_, EffectError>(1) })
            .await;
        assert!(result.wait().await.is_err());
    }
}
