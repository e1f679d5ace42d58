//! Typed, keyed, schema-validated metadata carried alongside executions.
//!
//! Reference: `atom.rs`'s id-counter and builder pattern (`next_atom_id`,
//! `with_label`) for `Tag<T>`'s own identity and naming; type erasure for
//! heterogeneous storage follows the same `Arc<dyn Any + Send + Sync>`
//! approach `store.rs` uses for atom values.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{EffectError, ParsePhase};
use crate::primitives::{validate, Schema};
use crate::types::{next_tag_id, TagId};

/// A type-erased tagged value: the payload attached at a dependency
/// position or merged into an execution's ambient tag set.
#[derive(Clone)]
pub struct Tagged {
    pub(crate) tag_id: TagId,
    pub(crate) value: crate::types::AnyArc,
}

impl Tagged {
    pub fn tag_id(&self) -> TagId {
        self.tag_id
    }

    pub fn downcast<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        crate::types::downcast::<T>(&self.value)
    }
}

/// Anything that can be scanned for `Tagged` values in insertion order:
/// the merged (exec ⊃ context-chain ⊃ scope-wide ⊃ atom-declared) tag set.
pub trait TagSource {
    fn tagged_iter(&self) -> Box<dyn Iterator<Item = &Tagged> + '_>;
}

impl TagSource for [Tagged] {
    fn tagged_iter(&self) -> Box<dyn Iterator<Item = &Tagged> + '_> {
        Box::new(self.iter())
    }
}

impl TagSource for Vec<Tagged> {
    fn tagged_iter(&self) -> Box<dyn Iterator<Item = &Tagged> + '_> {
        Box::new(self.iter())
    }
}

type ParseFn<T> = Arc<dyn Fn(T) -> Result<T, EffectError> + Send + Sync>;

/// A typed tag: a key that can be attached to dependencies, atoms, scopes,
/// or execution contexts, carrying a schema-validated payload.
pub struct Tag<T: Clone + Send + Sync + 'static> {
    id: TagId,
    label: String,
    schema: Arc<dyn Schema<T>>,
    default: Option<T>,
    parse: Option<ParseFn<T>>,
}

impl<T: Clone + Send + Sync + 'static> Clone for Tag<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            label: self.label.clone(),
            schema: self.schema.clone(),
            default: self.default.clone(),
            parse: self.parse.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Tag<T> {
    pub fn new(label: impl Into<String>, schema: impl Schema<T> + 'static) -> Self {
        Self { id: next_tag_id(), label: label.into(), schema: Arc::new(schema), default: None, parse: None }
    }

    pub fn id(&self) -> TagId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn with_default(mut self, value: T) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_parse<F>(mut self, parse: F) -> Self
    where
        F: Fn(T) -> Result<T, EffectError> + Send + Sync + 'static,
    {
        self.parse = Some(Arc::new(parse));
        self
    }

    /// Builds a `Tagged` payload from a raw value, running the optional
    /// parse step followed by schema validation.
    pub fn apply(&self, value: T) -> Result<Tagged, EffectError> {
        let parsed = match &self.parse {
            Some(f) => f(value).map_err(|e| {
                EffectError::parse(ParsePhase::Tag, self.label.clone(), e.to_string())
            })?,
            None => value,
        };
        let validated = validate(self.schema.as_ref(), parsed)?;
        Ok(Tagged { tag_id: self.id, value: Arc::new(validated) })
    }

    /// Required read: the merged source's value for this tag, or the
    /// tag's default. Errors if neither is present.
    pub fn extract_from(&self, src: &dyn TagSource) -> Result<T, EffectError> {
        self.read_from(src)
            .ok_or_else(|| EffectError::custom(format!("tag `{}` missing and has no default", self.label)))
    }

    /// Optional read: `None` if absent and no default is configured.
    pub fn read_from(&self, src: &dyn TagSource) -> Option<T> {
        src.tagged_iter()
            .filter(|t| t.tag_id == self.id)
            .last()
            .and_then(|t| t.downcast::<T>())
            .or_else(|| self.default.clone())
    }

    /// Collects every value tagged with this tag, in merge order.
    pub fn collect_from(&self, src: &dyn TagSource) -> Vec<T> {
        src.tagged_iter()
            .filter(|t| t.tag_id == self.id)
            .filter_map(|t| t.downcast::<T>())
            .collect()
    }
}

/// Marker types selecting how a `TagExecutor` reads its tag out of the
/// merged source; distinct zero-sized types let each mode carry a
/// distinct `Dependency::Output` (`T`, `Option<T>`, or `Vec<T>`).
pub struct Required;
pub struct Optional;
pub struct All;

pub struct TagExecutor<T: Clone + Send + Sync + 'static, Mode> {
    pub(crate) tag: Tag<T>,
    _mode: PhantomData<Mode>,
}

impl<T: Clone + Send + Sync + 'static, Mode> Clone for TagExecutor<T, Mode> {
    fn clone(&self) -> Self {
        Self { tag: self.tag.clone(), _mode: PhantomData }
    }
}

impl<T: Clone + Send + Sync + 'static> crate::dependency::Dependency for TagExecutor<T, Required> {
    type Output = T;

    fn resolve<'s, 'c: 's>(
        &'s self,
        cx: &'s crate::dependency::ResolveCx<'c>,
    ) -> futures::future::BoxFuture<'s, Result<T, EffectError>> {
        Box::pin(async move { self.tag.extract_from(cx.tags()) })
    }
}

impl<T: Clone + Send + Sync + 'static> crate::dependency::Dependency for TagExecutor<T, Optional> {
    type Output = Option<T>;

    fn resolve<'s, 'c: 's>(
        &'s self,
        cx: &'s crate::dependency::ResolveCx<'c>,
    ) -> futures::future::BoxFuture<'s, Result<Option<T>, EffectError>> {
        Box::pin(async move { Ok(self.tag.read_from(cx.tags())) })
    }
}

impl<T: Clone + Send + Sync + 'static> crate::dependency::Dependency for TagExecutor<T, All> {
    type Output = Vec<T>;

    fn resolve<'s, 'c: 's>(
        &'s self,
        cx: &'s crate::dependency::ResolveCx<'c>,
    ) -> futures::future::BoxFuture<'s, Result<Vec<T>, EffectError>> {
        Box::pin(async move { Ok(self.tag.collect_from(cx.tags())) })
    }
}

pub mod tags {
    use super::*;

    pub fn required<T: Clone + Send + Sync + 'static>(tag: Tag<T>) -> TagExecutor<T, Required> {
        TagExecutor { tag, _mode: PhantomData }
    }

    pub fn optional<T: Clone + Send + Sync + 'static>(tag: Tag<T>) -> TagExecutor<T, Optional> {
        TagExecutor { tag, _mode: PhantomData }
    }

    pub fn all<T: Clone + Send + Sync + 'static>(tag: Tag<T>) -> TagExecutor<T, All> {
        TagExecutor { tag, _mode: PhantomData }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::custom;

    #[test]
    fn default_is_used_when_absent() {
        let tag = Tag::new("retries", custom::<i32>()).with_default(3);
        let empty: Vec<Tagged> = vec![];
        assert_eq!(tag.read_from(&empty), Some(3));
    }

    #[test]
    fn applied_value_overrides_default() {
        let tag = Tag::new("retries", custom::<i32>()).with_default(3);
        let tagged = tag.apply(7).unwrap();
        assert_eq!(tag.read_from(&vec![tagged]), Some(7));
    }

    #[test]
    fn last_match_wins_on_read() {
        let tag = Tag::new("env", custom::<&'static str>());
        let a = tag.apply("dev").unwrap();
        let b = tag.apply("prod").unwrap();
        assert_eq!(tag.read_from(&vec![a, b]), Some("prod"));
    }

    #[test]
    fn collect_preserves_merge_order() {
        let tag = Tag::new("plugin", custom::<i32>());
        let values: Vec<Tagged> = vec![1, 2, 3].into_iter().map(|v| tag.apply(v).unwrap()).collect();
        assert_eq!(tag.collect_from(&values), vec![1, 2, 3]);
    }

    #[test]
    fn extract_errors_without_default_or_value() {
        let tag = Tag::new("required-thing", custom::<i32>());
        let empty: Vec<Tagged> = vec![];
        assert!(tag.extract_from(&empty).is_err());
    }
}
