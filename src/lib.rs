//! Effectate: a dependency-injection and effect runtime.
//!
//! Atoms declare dependencies and resolve once per scope, cached until
//! released or invalidated. Flows are per-invocation handlers run inside
//! a hierarchical execution context that carries cancellation, a replay
//! journal, and timeout/retry policy. Tags carry typed, schema-validated
//! metadata through both.
//!
//! ## Example
//!
//! ```rust,ignore
//! use effectate::{atom::{atom, atom_value}, scope::{Scope, ScopeOptions}};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let scope = Scope::new(ScopeOptions::default());
//! let greeting = atom_value("hello".to_string());
//! let shout = atom(greeting.clone(), |_ctl, g: String| {
//!     Box::pin(async move { Ok(g.to_uppercase()) })
//! });
//! assert_eq!(scope.resolve(&shout).await.unwrap(), "HELLO");
//! # }
//! ```

pub mod analyzer;
pub mod atom;
pub mod context;
pub mod dependency;
pub mod error;
pub mod extension;
pub mod flow;
pub mod preset;
pub mod primitives;
pub mod scope;
pub mod tag;
pub mod types;
pub mod utils;

pub use atom::{atom, atom_value, atom_with_config, Atom, AtomConfig};
pub use context::{CloseMode, ExecOptions, ExecutionContext, RetryPolicy};
pub use dependency::{Dependency, Keyed};
pub use error::{EffectError, ErrorCode, Issue, Result};
pub use extension::{Extension, Operation};
pub use flow::Flow;
pub use preset::Preset;
pub use primitives::{custom, custom_with, validate, IntoPromised, Partitioned, Promised, Schema};
pub use scope::{AtomEvent, AtomLifecycle, Controller, Ctl, Scope, ScopeOptions};
pub use tag::{tags, Tag, TagExecutor, Tagged};
pub use types::{AtomId, ContextId, EpochNumber, TagId};

pub use utils::atom_family::{atom_family, AtomFamily};
pub use utils::select_atom::{select_atom, select_atom_default};
