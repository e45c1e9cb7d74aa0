//! Rego backend (`rego`)
//!
//! The document carries the module source under `module`. The module must
//! declare `package aura` and an `allow` rule; only a boolean `true` allows.

use crate::decision::{Decision, Trace};
use crate::error::{PolicyError, PolicyResult};
use crate::evaluator::{CompiledPolicy, Evaluator};
use parking_lot::Mutex;
use serde_json::Value;
use std::time::Instant;

pub const ENGINE_REGO: &str = "rego";

const ALLOW_QUERY: &str = "data.aura.allow";
const MODULE_PATH: &str = "policy.rego";

/// Engine with the module loaded; cloned for every evaluation
pub struct CompiledModule {
    engine: Mutex<regorus::Engine>,
}

#[derive(Debug, Default)]
pub struct RegoEvaluator;

impl RegoEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for RegoEvaluator {
    fn name(&self) -> &str {
        ENGINE_REGO
    }

    fn compile(&self, document: &Value) -> PolicyResult<CompiledPolicy> {
        let module = document
            .get("module")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .ok_or(PolicyError::BadPolicyModule)?;

        let mut engine = regorus::Engine::new();
        engine
            .add_policy(MODULE_PATH.to_string(), module.to_string())
            .map_err(|e| PolicyError::RuleEngine(format!("{:#}", e)))?;

        tracing::debug!(engine = ENGINE_REGO, "Compiled Rego module");

        Ok(CompiledPolicy::new(
            ENGINE_REGO,
            CompiledModule {
                engine: Mutex::new(engine),
            },
        ))
    }

    fn evaluate(&self, compiled: &CompiledPolicy, input: &Value) -> PolicyResult<Decision> {
        let module = compiled.downcast::<CompiledModule>()?;
        let start = Instant::now();

        let mut engine = module.engine.lock().clone();
        let input = regorus::Value::from_json_str(&serde_json::to_string(input)?)
            .map_err(|e| PolicyError::RuleEngine(format!("{:#}", e)))?;
        engine.set_input(input);

        let results = engine
            .eval_query(ALLOW_QUERY.to_string(), false)
            .map_err(|e| PolicyError::RuleEngine(format!("{:#}", e)))?;

        let allow = results
            .result
            .first()
            .and_then(|r| r.expressions.first())
            .is_some_and(|expr| expr.value == regorus::Value::Bool(true));

        let mut trace = Trace::new(ENGINE_REGO);
        trace.duration_ms = start.elapsed().as_millis() as u64;

        let decision = if allow {
            Decision::allow("allow")
        } else {
            Decision::deny("deny")
        };
        Ok(decision.with_trace(trace))
    }
}
