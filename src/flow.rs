//! Declarative per-invocation handlers sharing a hierarchical execution
//! context — the counterpart to atoms' singleton resolution.
//!
//! Reference: `atom.rs`'s `Dependencies`-aware factory shape, reused here
//! for a flow's own dependency declaration; `context.rs`'s `exec` does the
//! actual journal/timeout/retry/abort work, so `Flow::execute` is just a
//! convenience wrapper over `ExecutionContext::exec`.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::{ExecOptions, ExecutionContext};
use crate::dependency::{Dependency, ResolveCx};
use crate::error::{EffectError, ParsePhase, Result};
use crate::primitives::Promised;
use crate::tag::Tagged;

type ParseFn<I> = Arc<dyn Fn(I) -> Result<I> + Send + Sync>;
type Handler<D, I, O> = Arc<
    dyn Fn(ExecutionContext, <D as Dependency>::Output, I) -> BoxFuture<'static, Result<O>> + Send + Sync,
>;

/// A declared flow: dependencies `D`, an optional input parser, declared
/// tags, and a handler receiving the execution context, resolved
/// dependencies, and the (parsed) input.
pub struct Flow<I, O, D: Dependency = ()> {
    name: String,
    deps: Arc<D>,
    parse: Option<ParseFn<I>>,
    tags: Vec<Tagged>,
    handler: Handler<D, I, O>,
}

impl<I, O, D> Flow<I, O, D>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
    D: Dependency + Clone,
{
    pub fn new<F>(name: impl Into<String>, deps: D, handler: F) -> Self
    where
        F: Fn(ExecutionContext, D::Output, I) -> BoxFuture<'static, Result<O>> + Send + Sync + 'static,
    {
        Self { name: name.into(), deps: Arc::new(deps), parse: None, tags: Vec::new(), handler: Arc::new(handler) }
    }

    pub fn with_parse<F>(mut self, parse: F) -> Self
    where
        F: Fn(I) -> Result<I> + Send + Sync + 'static,
    {
        self.parse = Some(Arc::new(parse));
        self
    }

    pub fn with_tag(mut self, tagged: Tagged) -> Self {
        self.tags.push(tagged);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Convenience over `ExecutionContext::exec`: parses the input (if a
    /// parser is configured), resolves declared dependencies against the
    /// merged tag source, and runs the handler.
    pub async fn execute(&self, parent: &ExecutionContext, input: I, mut options: ExecOptions) -> Promised<O>
    where
        D::Output: Clone + Send + Sync + 'static,
    {
        let parsed = match &self.parse {
            Some(parse) => match parse(input) {
                Ok(v) => v,
                Err(e) => {
                    return Promised::reject(EffectError::parse(
                        ParsePhase::FlowInput,
                        self.name.clone(),
                        e.to_string(),
                    ))
                }
            },
            None => input,
        };

        options.tags.extend(self.tags.iter().cloned());
        let deps = self.deps.clone();
        let handler = self.handler.clone();
        let scope = parent.scope().clone();

        parent
            .exec(self.name.clone(), options, move |ctx| {
                let deps = deps.clone();
                let handler = handler.clone();
                let parsed = parsed.clone();
                let scope = scope.clone();
                async move {
                    let tags = ctx.tags();
                    let chain = Vec::new();
                    let cx = ResolveCx { scope: &scope, tags: &tags, chain: &chain };
                    let resolved = deps.resolve(&cx).await?;
                    handler(ctx, resolved, parsed).await
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::atom_value;
    use crate::context::ExecOptions;
    use crate::scope::{Scope, ScopeOptions};

    #[tokio::test]
    async fn executes_handler_with_resolved_dependency() {
        let scope = Scope::new(ScopeOptions::default());
        let greeting = atom_value("hello".to_string());
        let flow = Flow::new("greet", greeting.clone(), |_ctx, greeting: String, name: String| {
            Box::pin(async move { Ok(format!("{greeting}, {name}!")) })
        });
        let root = ExecutionContext::root(&scope, "root", vec![]);
        let result = flow.execute(&root, "world".to_string(), ExecOptions::default()).await;
        assert_eq!(result.wait().await.unwrap(), "hello, world!");
    }

    #[tokio::test]
    async fn parse_failure_rejects_before_handler_runs() {
        let scope = Scope::new(ScopeOptions::default());
        let flow: Flow<i32, i32> =
            Flow::new("double", (), |_ctx, (), input: i32| Box::pin(async move { Ok(input * 2) }))
                .with_parse(|v: i32| if v >= 0 { Ok(v) } else { Err(EffectError::custom("negative")) });
        let root = ExecutionContext::root(&scope, "root", vec![]);
        let result = flow.execute(&root, -1, ExecOptions::default()).await;
        assert!(result.wait().await.is_err());
    }
}
