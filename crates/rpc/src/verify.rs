//! Verification request and outcome types

use aura_policy::Decision;
use aura_risk::Signals;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Ledger event type written for every verification
pub const EVENT_DECISION_RECORDED: &str = "decision_recorded";

/// One agent asking whether an action is allowed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub org_id: Uuid,
    pub agent_id: Uuid,
    /// Free-form request context handed to the policy
    #[serde(default)]
    pub context: Value,
}

impl VerifyRequest {
    pub fn new(org_id: Uuid, agent_id: Uuid, context: Value) -> Self {
        Self {
            org_id,
            agent_id,
            context,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub decision: Decision,
    pub signals: Signals,
    /// Position of the `decision_recorded` entry in the org's chain
    pub audit_seq: u64,
}

/// Place `signals` under `risk` in the request context
///
/// A missing context becomes an object; any non-object context is kept
/// under `_`.
pub fn merge_signals(context: &Value, signals: &Signals) -> Value {
    let mut merged = match context {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert("_".to_string(), other.clone());
            map
        }
    };

    merged.insert(
        "risk".to_string(),
        serde_json::json!({
            "score": signals.score,
            "flags": signals.flags,
        }),
    );
    Value::Object(merged)
}

/// Ledger payload for a recorded decision
pub(crate) fn decision_payload(decision: &Decision, signals: &Signals) -> Value {
    let trace = decision.trace.as_ref();
    serde_json::json!({
        "trace_id": decision.trace_id,
        "policy_id": trace.and_then(|t| t.policy_id),
        "version": trace.and_then(|t| t.policy_version),
        "allow": decision.allow,
        "reason": decision.reason,
        "risk": signals,
    })
}
