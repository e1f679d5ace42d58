//! `Promised<T>` and the schema façade.
//!
//! Reference: the general shape of wrapping a bare Rust future in a
//! library type (`ReadFn`/`WriteFn`-style `Arc<dyn Fn>` closures around
//! async work); here the wrapping target is a multi-consumer,
//! synchronously-inspectable settle cell rather than a plain closure,
//! built on `tokio::sync::watch` rather than a hand-rolled concurrency
//! primitive.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{EffectError, Issue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromisedStatus {
    Pending,
    Resolved,
    Rejected,
}

#[derive(Clone)]
enum SettleState<T> {
    Pending,
    Resolved(T),
    Rejected(EffectError),
}

/// A lazy-settled promise wrapper. `.status()`/`.value()`/`.reason()` are
/// synchronous reads of the last-known settle state; `.wait()` awaits the
/// next transition out of `Pending`.
#[derive(Clone)]
pub struct Promised<T: Clone + Send + Sync + 'static> {
    rx: watch::Receiver<SettleState<T>>,
}

pub struct Partitioned<T> {
    pub fulfilled: Vec<T>,
    pub rejected: Vec<EffectError>,
}

impl<T: Clone + Send + Sync + 'static> Promised<T> {
    pub fn resolve(value: T) -> Self {
        let (_tx, rx) = watch::channel(SettleState::Resolved(value));
        Self { rx }
    }

    pub fn reject(err: EffectError) -> Self {
        let (_tx, rx) = watch::channel(SettleState::Rejected(err));
        Self { rx }
    }

    /// Spawns `fut` onto the ambient tokio runtime immediately; status
    /// transitions out of `Pending` once it completes, independent of
    /// whether anyone is awaiting the `Promised` yet.
    pub fn create<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T, EffectError>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(SettleState::Pending);
        tokio::spawn(async move {
            let settled = match fut.await {
                Ok(v) => SettleState::Resolved(v),
                Err(e) => SettleState::Rejected(e),
            };
            let _ = tx.send(settled);
        });
        Self { rx }
    }

    pub fn status(&self) -> PromisedStatus {
        match &*self.rx.borrow() {
            SettleState::Pending => PromisedStatus::Pending,
            SettleState::Resolved(_) => PromisedStatus::Resolved,
            SettleState::Rejected(_) => PromisedStatus::Rejected,
        }
    }

    pub fn value(&self) -> Option<T> {
        match &*self.rx.borrow() {
            SettleState::Resolved(v) => Some(v.clone()),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<EffectError> {
        match &*self.rx.borrow() {
            SettleState::Rejected(e) => Some(e.clone()),
            _ => None,
        }
    }

    /// Awaits settlement, returning the resolved value or rejection.
    pub async fn wait(&self) -> Result<T, EffectError> {
        let mut rx = self.rx.clone();
        loop {
            match &*rx.borrow() {
                SettleState::Resolved(v) => return Ok(v.clone()),
                SettleState::Rejected(e) => return Err(e.clone()),
                SettleState::Pending => {}
            }
            if rx.changed().await.is_err() {
                return Err(EffectError::custom("promised sender dropped while pending"));
            }
        }
    }

    pub fn map<U, F>(&self, f: F) -> Promised<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let this = self.clone();
        Promised::create(async move { this.wait().await.map(f) })
    }

    pub fn flat_map<U, F>(&self, f: F) -> Promised<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Promised<U> + Send + 'static,
    {
        let this = self.clone();
        Promised::create(async move {
            let v = this.wait().await?;
            f(v).wait().await
        })
    }

    /// Awaits every item in `items`, splitting outcomes into fulfilled and
    /// rejected buckets. `fulfilled.len() + rejected.len() == items.len()`.
    pub async fn partition(items: Vec<Promised<T>>) -> Partitioned<T> {
        let mut fulfilled = Vec::with_capacity(items.len());
        let mut rejected = Vec::new();
        for item in items {
            match item.wait().await {
                Ok(v) => fulfilled.push(v),
                Err(e) => rejected.push(e),
            }
        }
        Partitioned { fulfilled, rejected }
    }
}

/// Converts a bare future or an already-built `Promised` into a
/// `Promised`. Stands in for the source runtime's duck-typed
/// `isThenable` check, which has no analogue over Rust's nominal types.
pub trait IntoPromised<T: Clone + Send + Sync + 'static> {
    fn into_promised(self) -> Promised<T>;
}

impl<T: Clone + Send + Sync + 'static> IntoPromised<T> for Promised<T> {
    fn into_promised(self) -> Promised<T> {
        self
    }
}

impl<T, F> IntoPromised<T> for F
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = Result<T, EffectError>> + Send + 'static,
{
    fn into_promised(self) -> Promised<T> {
        Promised::create(self)
    }
}

/// The Standard-Schema-style validation façade: a synchronous validator
/// over an already-typed Rust value. Async validators have no expression
/// in this trait's signature, which is how the "synchronous validators
/// only" rule is enforced here.
pub trait Schema<T>: Send + Sync {
    fn validate(&self, value: T) -> std::result::Result<T, Vec<Issue>>;
}

struct CustomSchema<T, F> {
    validator: Option<F>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, F> Schema<T> for CustomSchema<T, F>
where
    T: Send + Sync,
    F: Fn(T) -> std::result::Result<T, Vec<Issue>> + Send + Sync,
{
    fn validate(&self, value: T) -> std::result::Result<T, Vec<Issue>> {
        match &self.validator {
            Some(f) => f(value),
            None => Ok(value),
        }
    }
}

/// A passthrough schema: validates nothing, used where a `Schema<T>` is
/// required structurally but no refinement is needed.
pub fn custom<T: Send + Sync + 'static>() -> impl Schema<T> {
    CustomSchema {
        validator: None::<fn(T) -> std::result::Result<T, Vec<Issue>>>,
        _marker: std::marker::PhantomData,
    }
}

/// Builds a `Schema<T>` from a plain validation closure.
pub fn custom_with<T, F>(validator: F) -> impl Schema<T>
where
    T: Send + Sync + 'static,
    F: Fn(T) -> std::result::Result<T, Vec<Issue>> + Send + Sync + 'static,
{
    CustomSchema { validator: Some(validator), _marker: std::marker::PhantomData }
}

pub fn validate<T: Send + Sync + 'static>(
    schema: &dyn Schema<T>,
    value: T,
) -> Result<T, EffectError> {
    schema.validate(value).map_err(EffectError::schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_is_immediately_settled() {
        let p = Promised::resolve(42);
        assert_eq!(p.status(), PromisedStatus::Resolved);
        assert_eq!(p.value(), Some(42));
        assert_eq!(p.wait().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn create_settles_after_await() {
        let p = Promised::create(async { Ok::<_, EffectError>(7) });
        assert_eq!(p.wait().await.unwrap(), 7);
        assert_eq!(p.status(), PromisedStatus::Resolved);
    }

    #[tokio::test]
    async fn map_chains_a_transform() {
        let p = Promised::resolve(2).map(|v| v * 10);
        assert_eq!(p.wait().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn partition_splits_fulfilled_and_rejected() {
        let items = vec![
            Promised::resolve(1),
            Promised::reject(EffectError::custom("boom")),
            Promised::resolve(3),
        ];
        let partitioned = Promised::partition(items).await;
        assert_eq!(partitioned.fulfilled, vec![1, 3]);
        assert_eq!(partitioned.rejected.len(), 1);
    }

    #[test]
    fn passthrough_schema_accepts_everything() {
        let schema = custom::<i32>();
        assert_eq!(validate(&schema, 5).unwrap(), 5);
    }

    #[test]
    fn custom_schema_can_reject() {
        let schema = custom_with(|v: i32| {
            if v >= 0 {
                Ok(v)
            } else {
                Err(vec![Issue::new("must be non-negative")])
            }
        });
        assert!(validate(&schema, -1).is_err());
        assert_eq!(validate(&schema, 1).unwrap(), 1);
    }
}
