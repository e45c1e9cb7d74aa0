//! Evaluator registry - runtime table of policy backends

use crate::error::{PolicyError, PolicyResult};
use crate::evaluator::Evaluator;
use crate::json::JsonEvaluator;
use crate::rego::RegoEvaluator;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name → evaluator table chosen at startup
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    evaluators: BTreeMap<String, Arc<dyn Evaluator>>,
}

impl EvaluatorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in backend
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JsonEvaluator::new()));
        registry.register(Arc::new(RegoEvaluator::new()));
        registry
    }

    /// Register an evaluator under its own name, replacing any previous one
    pub fn register(&mut self, evaluator: Arc<dyn Evaluator>) {
        tracing::debug!(engine = evaluator.name(), "Registered policy evaluator");
        self.evaluators
            .insert(evaluator.name().to_string(), evaluator);
    }

    /// Look up an evaluator by name
    pub fn get(&self, name: &str) -> PolicyResult<Arc<dyn Evaluator>> {
        self.evaluators
            .get(name)
            .cloned()
            .ok_or_else(|| PolicyError::UnknownEngine(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.evaluators.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.evaluators.keys().map(String::as_str).collect()
    }
}
