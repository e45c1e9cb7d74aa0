//! Built-in JSON rules engine (`aurajson`)
//!
//! ```json
//! {
//!   "rules": [
//!     { "id": "block-delete", "effect": "deny",  "when": { "action": { "eq": "delete" } } },
//!     { "id": "readers",      "effect": "allow", "when": { "action": { "in": ["read", "list"] } } }
//!   ],
//!   "precedence": { "deny_overrides": true },
//!   "schema": { "required": ["action"] }
//! }
//! ```

use crate::condition::Condition;
use crate::decision::{Decision, RuleTrace, Trace};
use crate::error::{PolicyError, PolicyResult};
use crate::evaluator::{CompiledPolicy, Evaluator};
use crate::schema::InputSchema;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Instant;

pub const ENGINE_AURA_JSON: &str = "aurajson";

const REASON_NO_MATCH: &str = "No matching allow rule";
const REASON_ALLOW: &str = "Matched allow rule";
const REASON_DENY: &str = "Matched deny rule";
const REASON_SCHEMA: &str = "Schema validation failed";

/// Rule effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumString, strum_macros::Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone)]
struct Rule {
    id: String,
    effect: Effect,
    when: Condition,
}

/// Compiled form of a JSON policy document
#[derive(Debug, Clone)]
pub struct CompiledRules {
    rules: Vec<Rule>,
    deny_overrides: bool,
    schema: Option<InputSchema>,
    /// Original document, hashed into trace ids
    document: Value,
}

impl CompiledRules {
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn deny_overrides(&self) -> bool {
        self.deny_overrides
    }
}

#[derive(Debug, Default)]
pub struct JsonEvaluator;

impl JsonEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Parse and validate a document
    pub fn parse(document: &Value) -> PolicyResult<CompiledRules> {
        let body = document
            .as_object()
            .ok_or_else(|| PolicyError::invalid("policy body must be an object"))?;

        let rules = match body.get("rules") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| parse_rule(i, item))
                .collect::<PolicyResult<Vec<_>>>()?,
            Some(_) => return Err(PolicyError::invalid("'rules' must be an array")),
        };

        let deny_overrides = body
            .get("precedence")
            .and_then(|p| p.get("deny_overrides"))
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let schema = match body.get("schema") {
            None | Some(Value::Null) => None,
            Some(s) => Some(InputSchema::parse(s)?).filter(|s| !s.is_empty()),
        };

        Ok(CompiledRules {
            rules,
            deny_overrides,
            schema,
            document: document.clone(),
        })
    }
}

fn parse_rule(index: usize, item: &Value) -> PolicyResult<Rule> {
    let rule = item
        .as_object()
        .ok_or_else(|| PolicyError::invalid(format!("rule {} must be an object", index)))?;

    let id = match rule.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => format!("rule-{}", index),
    };

    let effect = rule
        .get("effect")
        .and_then(Value::as_str)
        .ok_or_else(|| PolicyError::invalid(format!("rule '{}' has no effect", id)))?;
    let effect: Effect = effect.parse().map_err(|_| {
        PolicyError::invalid(format!("rule '{}' has unknown effect '{}'", id, effect))
    })?;

    let when = Condition::parse(rule.get("when").unwrap_or(&Value::Null))?;

    Ok(Rule { id, effect, when })
}

/// `hex(SHA-256(input || document)[..8])`
pub fn trace_id(input: &Value, document: &Value) -> PolicyResult<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(input)?);
    hasher.update(serde_json::to_vec(document)?);
    Ok(hex::encode(&hasher.finalize()[..8]))
}

impl Evaluator for JsonEvaluator {
    fn name(&self) -> &str {
        ENGINE_AURA_JSON
    }

    fn compile(&self, document: &Value) -> PolicyResult<CompiledPolicy> {
        let compiled = Self::parse(document)?;
        tracing::debug!(
            engine = ENGINE_AURA_JSON,
            rules = compiled.rules.len(),
            "Compiled JSON policy"
        );
        Ok(CompiledPolicy::new(ENGINE_AURA_JSON, compiled))
    }

    fn evaluate(&self, compiled: &CompiledPolicy, input: &Value) -> PolicyResult<Decision> {
        let policy = compiled.downcast::<CompiledRules>()?;
        let start = Instant::now();
        let mut trace = Trace::new(ENGINE_AURA_JSON);
        let trace_id = trace_id(input, &policy.document)?;

        if let Some(schema) = &policy.schema {
            let errors = schema.validate(input);
            if !errors.is_empty() {
                trace.validations = errors;
                trace.duration_ms = start.elapsed().as_millis() as u64;
                return Ok(Decision::deny(REASON_SCHEMA)
                    .with_trace_id(trace_id)
                    .with_trace(trace));
            }
        }

        let mut allow = false;
        let mut reason = REASON_NO_MATCH;

        for rule in &policy.rules {
            let matched = rule.when.matches(input);
            trace.evaluated_rules.push(RuleTrace {
                rule_id: rule.id.clone(),
                matched,
                effect: rule.effect.to_string(),
            });

            if !matched {
                continue;
            }

            match rule.effect {
                Effect::Deny => {
                    allow = false;
                    reason = REASON_DENY;
                    if policy.deny_overrides {
                        break;
                    }
                }
                // Keep going: a later deny may still override
                Effect::Allow => {
                    allow = true;
                    reason = REASON_ALLOW;
                }
            }
        }

        trace.duration_ms = start.elapsed().as_millis() as u64;
        let decision = if allow {
            Decision::allow(reason)
        } else {
            Decision::deny(reason)
        };
        Ok(decision.with_trace_id(trace_id).with_trace(trace))
    }
}
