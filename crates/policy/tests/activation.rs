//! Integration tests for policy activation across backends

use aura_policy::{EvaluatorRegistry, PolicyEngine, PolicyError, VersionStatus};
use serde_json::json;
use uuid::Uuid;

const MODULE_V1: &str = r#"
package aura

import rego.v1

default allow := false

allow if input.action == "read"
"#;

const MODULE_V2: &str = r#"
package aura

import rego.v1

default allow := false

allow if input.action in {"read", "write"}
"#;

/// Test: draft → active → replaced, then a broken version is refused
#[test]
fn test_rego_version_lifecycle() {
    let engine = PolicyEngine::new(EvaluatorRegistry::with_builtin());
    let org = Uuid::new_v4();
    let policy = engine.create_policy(org, "agents", "rego").unwrap();
    engine.store().assign(org, policy.id).unwrap();

    // 1. Nothing active yet
    let d = engine.evaluate_for_org(org, &json!({ "action": "read" })).unwrap();
    assert!(!d.allow);

    // 2. Activate v1
    engine.add_version(policy.id, json!({ "module": MODULE_V1 })).unwrap();
    engine.activate(policy.id, 1, None).unwrap();
    assert!(engine.evaluate_for_org(org, &json!({ "action": "read" })).unwrap().allow);
    assert!(!engine.evaluate_for_org(org, &json!({ "action": "write" })).unwrap().allow);

    // 3. Activate v2
    engine.add_version(policy.id, json!({ "module": MODULE_V2 })).unwrap();
    engine.activate(policy.id, 2, None).unwrap();
    assert!(engine.evaluate_for_org(org, &json!({ "action": "write" })).unwrap().allow);
    assert_eq!(
        engine.store().get_version(policy.id, 1).unwrap().status,
        VersionStatus::Draft
    );

    // 4. v3 has no module and never becomes active
    engine.add_version(policy.id, json!({ "rules": [] })).unwrap();
    let err = engine.activate(policy.id, 3, None).unwrap_err();
    assert!(matches!(err, PolicyError::BadPolicyModule));
    assert_eq!(engine.store().active_version(policy.id).unwrap().version, 2);
    assert!(engine.evaluate_for_org(org, &json!({ "action": "write" })).unwrap().allow);
}

/// Test: decisions of the JSON backend carry trace ids and policy coordinates
#[test]
fn test_json_trace() {
    let engine = PolicyEngine::new(EvaluatorRegistry::with_builtin());
    let policy = engine
        .create_policy(Uuid::new_v4(), "json", "aurajson")
        .unwrap();
    engine
        .add_version(
            policy.id,
            json!({
                "rules": [
                    { "id": "low-risk", "effect": "allow", "when": { "risk.score": { "lt": 50 } } },
                    { "id": "spike", "effect": "deny", "when": { "risk.flags": { "contains": "rate_spike" } } }
                ]
            }),
        )
        .unwrap();
    engine.activate(policy.id, 1, None).unwrap();

    let calm = engine
        .evaluate(policy.id, &json!({ "risk": { "score": 10, "flags": [] } }))
        .unwrap();
    assert!(calm.allow);
    assert_eq!(calm.trace_id.as_ref().map(String::len), Some(16));

    let spiking = engine
        .evaluate(policy.id, &json!({ "risk": { "score": 10, "flags": ["rate_spike"] } }))
        .unwrap();
    assert!(!spiking.allow);
    let trace = spiking.trace.unwrap();
    assert_eq!(trace.policy_id, Some(policy.id));
    assert_eq!(trace.policy_version, Some(1));
    assert_eq!(trace.evaluated_rules.len(), 2);
}

/// Test: a deny-all version is refused when the simulation input must pass
#[test]
fn test_deny_all_version_refused_by_simulation() {
    let engine = PolicyEngine::new(EvaluatorRegistry::with_builtin());
    let org = Uuid::new_v4();
    let policy = engine.create_policy(org, "agents", "rego").unwrap();
    engine.store().assign(org, policy.id).unwrap();
    let sample = json!({ "action": "read" });

    engine.add_version(policy.id, json!({ "module": MODULE_V1 })).unwrap();
    engine.activate(policy.id, 1, Some(&sample)).unwrap();

    let deny_all = "package aura\n\nimport rego.v1\n\ndefault allow := false\n";
    engine.add_version(policy.id, json!({ "module": deny_all })).unwrap();
    let err = engine.activate(policy.id, 2, Some(&sample)).unwrap_err();
    match err {
        PolicyError::SimulationDenied { version, reason } => {
            assert_eq!(version, 2);
            assert_eq!(reason, "deny");
        }
        other => panic!("expected a refused simulation, got {:?}", other),
    }

    assert_eq!(engine.store().active_version(policy.id).unwrap().version, 1);
    assert!(engine.evaluate_for_org(org, &sample).unwrap().allow);

    // Without a simulation input the same version goes live
    engine.activate(policy.id, 2, None).unwrap();
    assert!(!engine.evaluate_for_org(org, &sample).unwrap().allow);
}
