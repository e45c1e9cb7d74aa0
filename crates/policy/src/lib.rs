//! Aura Policy - Pluggable allow/deny evaluation
//!
//! Policies are versioned JSON documents evaluated by a named backend:
//! - `aurajson`: built-in rules language with and/or/not and field operators
//! - `rego`: Rego modules querying `data.aura.allow`
//!
//! Backends are picked at runtime from an [`EvaluatorRegistry`].

pub mod cache;
pub mod condition;
pub mod decision;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod json;
pub mod registry;
pub mod rego;
pub mod schema;
pub mod store;

pub use cache::CompiledCache;
pub use decision::{Decision, RuleTrace, Trace};
pub use engine::{PolicyEngine, REASON_NO_ACTIVE_POLICY};
pub use error::{PolicyError, PolicyResult};
pub use evaluator::{CompiledPolicy, Evaluator};
pub use json::{JsonEvaluator, ENGINE_AURA_JSON};
pub use registry::EvaluatorRegistry;
pub use rego::{RegoEvaluator, ENGINE_REGO};
pub use store::{document_checksum, Policy, PolicyStore, PolicyVersion, VersionStatus};
