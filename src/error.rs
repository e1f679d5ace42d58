//! Error taxonomy for the runtime.
//!
//! Kept the original `error.rs` shape (thiserror enum, `Result<T>`
//! alias, helper constructors); the variant set and stable codes come
//! from this runtime's error contract — every resolution/factory
//! failure carries the executor's display name, the resolution chain it
//! failed inside, and an optional cause.

use std::sync::Arc;
use thiserror::Error;

/// Stable, machine-matchable error codes. `None` for kinds left uncoded
/// (`Parse`, `GracePeriodExceeded`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    SchemaError,
    ExecutorResolutionError,
    FactoryExecutionError,
    DependencyResolutionError,
    ExecutionContextClosedError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::SchemaError => "V001",
            ErrorCode::ExecutorResolutionError => "E001",
            ErrorCode::FactoryExecutionError => "F001",
            ErrorCode::DependencyResolutionError => "D001",
            ErrorCode::ExecutionContextClosedError => "EC001",
        }
    }
}

/// A single schema validation failure.
#[derive(Debug, Clone)]
pub struct Issue {
    pub message: String,
    pub path: Vec<String>,
}

impl Issue {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), path: Vec::new() }
    }

    pub fn at(mut self, segment: impl Into<String>) -> Self {
        self.path.push(segment.into());
        self
    }
}

/// Which phase a parse failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePhase {
    Tag,
    FlowInput,
    FlowOutput,
}

impl std::fmt::Display for ParsePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParsePhase::Tag => "tag",
            ParsePhase::FlowInput => "flow input",
            ParsePhase::FlowOutput => "flow output",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Error)]
pub enum ErrorKind {
    #[error("schema validation failed: {issues:?}")]
    Schema { issues: Vec<Issue> },

    #[error("failed to resolve `{name}`")]
    ExecutorResolution { name: String },

    #[error("factory for `{name}` failed")]
    FactoryExecution { name: String },

    #[error("dependency `{dependency}` failed while resolving `{name}`")]
    DependencyResolution { name: String, dependency: String },

    #[error("execution context `{context}` is not active")]
    ExecutionContextClosed { context: String },

    #[error("parse failed during {phase} for `{label}`: {message}")]
    Parse { phase: ParsePhase, label: String, message: String },

    #[error("grace period exceeded while disposing `{scope}`")]
    GracePeriodExceeded { scope: String },

    #[error("circular dependency detected: {chain:?}")]
    CircularDependency { chain: Vec<String> },

    #[error("operation aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Custom(String),
}

/// The runtime's single error type. Every variant carries the resolution
/// chain it failed inside (outermost first) and an optional cause, so a
/// top-level failure can be walked back to its root via
/// [`std::error::Error::source`].
#[derive(Debug, Clone)]
pub struct EffectError {
    pub kind: ErrorKind,
    pub chain: Vec<String>,
    pub cause: Option<Arc<EffectError>>,
}

impl EffectError {
    fn new(kind: ErrorKind) -> Self {
        Self { kind, chain: Vec::new(), cause: None }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match &self.kind {
            ErrorKind::Schema { .. } => Some(ErrorCode::SchemaError),
            ErrorKind::ExecutorResolution { .. } => Some(ErrorCode::ExecutorResolutionError),
            ErrorKind::FactoryExecution { .. } => Some(ErrorCode::FactoryExecutionError),
            ErrorKind::DependencyResolution { .. } => Some(ErrorCode::DependencyResolutionError),
            ErrorKind::ExecutionContextClosed { .. } => {
                Some(ErrorCode::ExecutionContextClosedError)
            }
            ErrorKind::Parse { .. }
            | ErrorKind::GracePeriodExceeded { .. }
            | ErrorKind::CircularDependency { .. }
            | ErrorKind::Aborted { .. }
            | ErrorKind::Custom(_) => None,
        }
    }

    /// Push a frame onto the resolution chain, outermost-first. Used as
    /// the error bubbles up through nested dependency resolution.
    pub fn with_frame(mut self, name: impl Into<String>) -> Self {
        self.chain.push(name.into());
        self
    }

    pub fn with_cause(mut self, cause: EffectError) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn schema(issues: Vec<Issue>) -> Self {
        Self::new(ErrorKind::Schema { issues })
    }

    pub fn executor_resolution(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExecutorResolution { name: name.into() })
    }

    pub fn factory_execution(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::FactoryExecution { name: name.into() })
    }

    pub fn dependency_resolution(name: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyResolution {
            name: name.into(),
            dependency: dependency.into(),
        })
    }

    pub fn execution_context_closed(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExecutionContextClosed { context: context.into() })
    }

    pub fn parse(phase: ParsePhase, label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse { phase, label: label.into(), message: message.into() })
    }

    pub fn grace_period_exceeded(scope: impl Into<String>) -> Self {
        Self::new(ErrorKind::GracePeriodExceeded { scope: scope.into() })
    }

    pub fn circular_dependency(chain: Vec<String>) -> Self {
        Self::new(ErrorKind::CircularDependency { chain })
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Aborted { reason: reason.into() })
    }

    pub fn custom(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Custom(message.into()))
    }
}

impl std::fmt::Display for EffectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(code) = self.code() {
            write!(f, "[{}] {}", code.as_str(), self.kind)?;
        } else {
            write!(f, "{}", self.kind)?;
        }
        if !self.chain.is_empty() {
            write!(f, " (chain: {})", self.chain.join(" -> "))?;
        }
        Ok(())
    }
}

impl std::error::Error for EffectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type Result<T> = std::result::Result<T, EffectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(EffectError::schema(vec![]).code().unwrap().as_str(), "V001");
        assert_eq!(
            EffectError::executor_resolution("x").code().unwrap().as_str(),
            "E001"
        );
        assert_eq!(
            EffectError::factory_execution("x").code().unwrap().as_str(),
            "F001"
        );
        assert_eq!(
            EffectError::dependency_resolution("x", "y").code().unwrap().as_str(),
            "D001"
        );
        assert_eq!(
            EffectError::execution_context_closed("x").code().unwrap().as_str(),
            "EC001"
        );
        assert!(EffectError::parse(ParsePhase::Tag, "t", "bad").code().is_none());
    }

    #[test]
    fn cause_chain_is_walkable() {
        let root = EffectError::custom("root cause");
        let wrapped = EffectError::factory_execution("b").with_cause(root);
        let source = std::error::Error::source(&wrapped).expect("has source");
        assert!(source.to_string().contains("root cause"));
    }

    #[test]
    fn frames_accumulate_outermost_first() {
        let err = EffectError::dependency_resolution("d", "c")
            .with_frame("d")
            .with_frame("b")
            .with_frame("a");
        assert_eq!(err.chain, vec!["d", "b", "a"]);
    }
}
