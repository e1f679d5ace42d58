//! Extension points wrapping resolution, execution, and execution-context
//! lifecycle. An extension exposes `init`/`dispose` lifecycle hooks plus a
//! single composable `wrap`, right-fold composed over an ordered list so
//! later extensions end up outermost: `wrapped₀ = base; wrapped_{i+1} =
//! extᵢ.wrap(scope, wrappedᵢ, op)`. Kept dyn-compatible (no generic
//! methods) by erasing the wrapped output behind `AnyArc`, the same trick
//! `dependency.rs`'s `ErasedDependency` uses for `Keyed` entries.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::CloseMode;
use crate::error::{EffectError, Result};
use crate::scope::Scope;
use crate::types::{downcast, AnyArc, ContextId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    ParallelSettled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Create,
    Closing,
    Closed,
}

/// The operation an extension's `wrap` is being asked to wrap, mirroring
/// the three discriminated shapes: a single atom resolution, a flow or
/// function invocation, or a context lifecycle transition (the latter is
/// a no-op call whose only purpose is to let an extension observe it).
#[derive(Debug, Clone)]
pub enum Operation {
    Resolve { executor: String },
    Execution { name: String, mode: ExecutionMode, key: Option<String>, context: ContextId },
    ContextLifecycle { phase: LifecyclePhase, context: ContextId, mode: Option<CloseMode> },
}

impl Operation {
    pub fn label(&self) -> &str {
        match self {
            Operation::Resolve { executor } => executor,
            Operation::Execution { name, .. } => name,
            Operation::ContextLifecycle { .. } => "context-lifecycle",
        }
    }
}

/// The rest of the pipeline, from this extension's point of view. Boxed
/// because an extension decides at runtime whether to call it at all —
/// not calling it short-circuits the operation with whatever `wrap`
/// returns instead.
pub type Next<'a> = Box<dyn FnOnce() -> BoxFuture<'a, Result<AnyArc>> + Send + 'a>;

pub trait Extension: Send + Sync {
    fn name(&self) -> &str {
        ""
    }

    fn init(&self, _scope: &Scope) {}

    fn dispose(&self, _scope: &Scope) {}

    /// Wraps `next`. The default forwards unchanged, so an extension that
    /// only overrides `init`/`dispose` doesn't need to implement this at
    /// all. An implementation that doesn't call `next()` short-circuits
    /// the operation; an error returned here (or propagated from `next`)
    /// surfaces to the caller of `resolve`/`exec`.
    fn wrap<'a>(&'a self, _scope: &'a Scope, next: Next<'a>, _op: &'a Operation) -> BoxFuture<'a, Result<AnyArc>> {
        next()
    }
}

/// Runs `base` through the ordered extension pipeline. Composition is a
/// right-fold: iterating `extensions` in list order and folding each into
/// `wrap(scope, inner, op)` means the last extension in the list ends up
/// outermost ("later extensions wrap earlier ones").
pub(crate) async fn run_pipeline<'a, T, F>(
    extensions: &'a [Arc<dyn Extension>],
    scope: &'a Scope,
    op: &'a Operation,
    base: F,
) -> Result<T>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> BoxFuture<'a, Result<T>> + Send + 'a,
{
    let base_next: Next<'a> = Box::new(move || Box::pin(async move { base().await.map(|v| Arc::new(v) as AnyArc) }));

    let chain: Next<'a> = extensions.iter().fold(base_next, |inner, ext| {
        let ext = ext.as_ref();
        Box::new(move || ext.wrap(scope, inner, op)) as Next<'a>
    });

    let result = chain().await?;
    downcast::<T>(&result)
        .ok_or_else(|| EffectError::custom(format!("extension pipeline produced a mismatched output type for `{}`", op.label())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExtension {
        before: Arc<AtomicUsize>,
        after: Arc<AtomicUsize>,
    }

    impl Extension for CountingExtension {
        fn wrap<'a>(&'a self, scope: &'a Scope, next: Next<'a>, op: &'a Operation) -> BoxFuture<'a, Result<AnyArc>> {
            self.before.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let _ = scope;
                let _ = op;
                let result = next().await;
                self.after.fetch_add(1, Ordering::SeqCst);
                result
            })
        }
    }

    struct ShortCircuitExtension {
        replacement: i32,
    }

    impl Extension for ShortCircuitExtension {
        fn wrap<'a>(&'a self, _scope: &'a Scope, _next: Next<'a>, _op: &'a Operation) -> BoxFuture<'a, Result<AnyArc>> {
            let value = self.replacement;
            Box::pin(async move { Ok(Arc::new(value) as AnyArc) })
        }
    }

    #[tokio::test]
    async fn hooks_fire_once_around_success() {
        use crate::scope::{Scope, ScopeOptions};

        let scope = Scope::new(ScopeOptions::default());
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let extensions: Vec<Arc<dyn Extension>> =
            vec![Arc::new(CountingExtension { before: before.clone(), after: after.clone() })];
        let op = Operation::Resolve { executor: "test".to_string() };

        let result: Result<i32> =
            run_pipeline(&extensions, &scope, &op, || Box::pin(async { Ok(1) })).await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn an_extension_that_never_calls_next_short_circuits() {
        use crate::scope::{Scope, ScopeOptions};

        let scope = Scope::new(ScopeOptions::default());
        let extensions: Vec<Arc<dyn Extension>> = vec![Arc::new(ShortCircuitExtension { replacement: 99 })];
        let op = Operation::Resolve { executor: "test".to_string() };

        let result: Result<i32> =
            run_pipeline(&extensions, &scope, &op, || Box::pin(async { Ok(1) })).await;

        assert_eq!(result.unwrap(), 99);
    }

    #[tokio::test]
    async fn later_extensions_wrap_earlier_ones() {
        use crate::scope::{Scope, ScopeOptions};
        use std::sync::Mutex;

        struct OrderExtension {
            label: &'static str,
            order: Arc<Mutex<Vec<&'static str>>>,
        }

        impl Extension for OrderExtension {
            fn wrap<'a>(&'a self, _scope: &'a Scope, next: Next<'a>, _op: &'a Operation) -> BoxFuture<'a, Result<AnyArc>> {
                self.order.lock().unwrap().push(self.label);
                next()
            }
        }

        let scope = Scope::new(ScopeOptions::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        let extensions: Vec<Arc<dyn Extension>> = vec![
            Arc::new(OrderExtension { label: "first", order: order.clone() }),
            Arc::new(OrderExtension { label: "second", order: order.clone() }),
        ];
        let op = Operation::Resolve { executor: "test".to_string() };

        let result: Result<i32> =
            run_pipeline(&extensions, &scope, &op, || Box::pin(async { Ok(1) })).await;

        assert_eq!(result.unwrap(), 1);
        // "second" is outermost, so its `before` runs first.
        assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
    }
}
