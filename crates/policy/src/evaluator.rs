//! Evaluator trait and compiled artifact

use crate::decision::Decision;
use crate::error::{PolicyError, PolicyResult};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

/// Opaque compiled policy
///
/// Tagged with the evaluator that produced it. Clones share the artifact.
#[derive(Clone)]
pub struct CompiledPolicy {
    engine: Arc<str>,
    artifact: Arc<dyn Any + Send + Sync>,
}

impl CompiledPolicy {
    pub fn new<T: Any + Send + Sync>(engine: &str, artifact: T) -> Self {
        Self {
            engine: Arc::from(engine),
            artifact: Arc::new(artifact),
        }
    }

    /// Name of the evaluator that compiled this policy
    pub fn engine(&self) -> &str {
        &self.engine
    }

    /// Borrow the artifact as `T`, failing for artifacts of another evaluator
    pub fn downcast<T: Any>(&self) -> PolicyResult<&T> {
        self.artifact
            .downcast_ref::<T>()
            .ok_or(PolicyError::InvalidCompiledPolicy)
    }
}

impl std::fmt::Debug for CompiledPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPolicy")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

/// Pluggable policy backend
pub trait Evaluator: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Compile a policy document
    fn compile(&self, document: &Value) -> PolicyResult<CompiledPolicy>;

    /// Evaluate a compiled policy against an input
    fn evaluate(&self, compiled: &CompiledPolicy, input: &Value) -> PolicyResult<Decision>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast() {
        let compiled = CompiledPolicy::new("test", 42u32);
        assert_eq!(compiled.engine(), "test");
        assert_eq!(*compiled.downcast::<u32>().unwrap(), 42);
        assert!(matches!(
            compiled.downcast::<String>(),
            Err(PolicyError::InvalidCompiledPolicy)
        ));
    }

    #[test]
    fn test_clone_shares_artifact() {
        let compiled = CompiledPolicy::new("test", vec![1, 2, 3]);
        let copy = compiled.clone();
        assert!(std::ptr::eq(
            compiled.downcast::<Vec<i32>>().unwrap(),
            copy.downcast::<Vec<i32>>().unwrap()
        ));
    }
}
