//! Integration tests for Aura
//!
//! These tests drive the complete flow through the application context:
//! risk tracker, policy engine, audit ledger and event bus.

use aura_bus::{BusConfig, BusRelay};
use aura_ledger::{genesis_hash, Actor, BreakKind, Verification};
use aura_policy::{PolicyError, REASON_NO_ACTIVE_POLICY};
use aura_risk::FLAG_RATE_SPIKE;
use aura_rpc::{
    AppConfig, AppContext, AppError, VerifyRequest, EVENT_DECISION_RECORDED,
    EVENT_POLICY_VERSION_ACTIVATE,
};
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

fn config(temp_dir: &TempDir) -> AppConfig {
    AppConfig {
        database_url: format!(
            "sqlite:{}?mode=rwc",
            temp_dir.path().join("aura.db").display()
        ),
        ..AppConfig::default()
    }
}

fn read_only_policy() -> Value {
    json!({
        "rules": [
            { "id": "readers", "effect": "allow", "when": { "action": { "eq": "read" } } },
            { "id": "spikes", "effect": "deny", "when": { "risk.flags": { "contains": "rate_spike" } } }
        ]
    })
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Test: login and verify are chained; tampering with seq 1 is reported at 1
#[tokio::test]
async fn test_scenario_a_login_verify_tamper() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = AppContext::new(config(&temp_dir)).await.unwrap();
    let org = Uuid::new_v4();
    let user = Uuid::new_v4();
    let agent = Uuid::new_v4();

    // 1. Login
    let login = ctx
        .ledger
        .append_json(org, "login", &json!({ "type": "login" }), Actor::user(user))
        .await
        .unwrap();
    assert_eq!(login.seq, 1);
    assert_eq!(login.prev_hash, "");
    assert_eq!(login.this_hash, genesis_hash(br#"{"type":"login"}"#));

    // 2. Verify with an active policy
    let policy = ctx.create_policy(org, "default", "aurajson").unwrap();
    ctx.publish_policy(policy.id, read_only_policy(), None, Actor::user(user))
        .await
        .unwrap();

    let outcome = ctx
        .verify(VerifyRequest::new(org, agent, json!({ "action": "read" })))
        .await
        .unwrap();
    assert!(outcome.decision.allow);
    assert_eq!(outcome.signals.score, 2);
    assert_eq!(outcome.audit_seq, 3);

    let recent = ctx.ledger.recent(org, None).await.unwrap();
    let types: Vec<&str> = recent.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![EVENT_DECISION_RECORDED, EVENT_POLICY_VERSION_ACTIVATE, "login"]
    );
    assert_eq!(recent[0].actor_agent, Some(agent));
    assert_eq!(recent[0].payload_json().unwrap()["policy_id"], policy.id.to_string());
    assert_eq!(ctx.ledger.verify(org, None).await.unwrap().break_seq(), 0);

    // 3. Tamper with the login payload
    sqlx::query("UPDATE audit_ledger SET payload = ? WHERE org_id = ? AND seq = 1")
        .bind(br#"{"type":"logout"}"#.to_vec())
        .bind(org.to_string())
        .execute(ctx.store.pool())
        .await
        .unwrap();

    match ctx.ledger.verify(org, None).await.unwrap() {
        Verification::Broken(b) => {
            assert_eq!(b.seq, 1);
            assert_eq!(b.kind, BreakKind::HashMismatch);
        }
        other => panic!("expected a break, got {:?}", other),
    }

    ctx.shutdown().await.unwrap();
}

/// Test: 50 requests inside one second reach score 100 and flag a spike
#[tokio::test]
async fn test_scenario_b_rate_spike() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = AppContext::new(config(&temp_dir)).await.unwrap();
    let org = Uuid::new_v4();
    let agent = Uuid::new_v4();

    let policy = ctx.create_policy(org, "default", "aurajson").unwrap();
    ctx.publish_policy(policy.id, read_only_policy(), None, Actor::system())
        .await
        .unwrap();

    let mut last = None;
    for i in 1..=50u32 {
        let outcome = ctx
            .verify(VerifyRequest::new(org, agent, json!({ "action": "read" })))
            .await
            .unwrap();
        if i == 49 {
            assert!(outcome.decision.allow);
            assert!(!outcome.signals.has_flag(FLAG_RATE_SPIKE));
        }
        last = Some(outcome);
    }

    let last = last.unwrap();
    assert_eq!(last.signals.score, 100);
    assert!(last.signals.has_flag(FLAG_RATE_SPIKE));
    assert!(!last.decision.allow);
    assert_eq!(last.decision.reason, "Matched deny rule");

    // Another agent in the same org is unaffected
    let other = ctx
        .verify(VerifyRequest::new(org, Uuid::new_v4(), json!({ "action": "read" })))
        .await
        .unwrap();
    assert!(other.decision.allow);
    assert_eq!(other.signals.score, 2);

    ctx.shutdown().await.unwrap();
}

/// Test: an org without a policy is denied, and the denial is audited
#[tokio::test]
async fn test_no_active_policy_is_audited() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = AppContext::new(config(&temp_dir)).await.unwrap();
    let org = Uuid::new_v4();

    let outcome = ctx
        .verify(VerifyRequest::new(org, Uuid::new_v4(), json!("raw context")))
        .await
        .unwrap();

    assert!(!outcome.decision.allow);
    assert_eq!(outcome.decision.reason, REASON_NO_ACTIVE_POLICY);
    assert_eq!(outcome.audit_seq, 1);

    let head = ctx.ledger.head(org).await.unwrap();
    assert_eq!(head.seq, 1);

    ctx.shutdown().await.unwrap();
}

/// Test: a version that fails to compile leaves the previous one active
#[tokio::test]
async fn test_failed_activation_keeps_previous_version() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = AppContext::new(config(&temp_dir)).await.unwrap();
    let org = Uuid::new_v4();
    let agent = Uuid::new_v4();

    let policy = ctx.create_policy(org, "rego", "rego").unwrap();
    let module = "package aura\nimport rego.v1\ndefault allow := false\nallow if input.action == \"read\"\n";
    ctx.publish_policy(policy.id, json!({ "module": module }), None, Actor::system())
        .await
        .unwrap();

    let err = ctx
        .publish_policy(policy.id, json!({ "module": "" }), None, Actor::system())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Policy(PolicyError::BadPolicyModule)));

    let outcome = ctx
        .verify(VerifyRequest::new(org, agent, json!({ "action": "read" })))
        .await
        .unwrap();
    assert!(outcome.decision.allow);
    assert_eq!(outcome.decision.trace.unwrap().policy_version, Some(1));

    // Only the successful activation was audited
    let activations = ctx
        .ledger
        .recent(org, None)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == EVENT_POLICY_VERSION_ACTIVATE)
        .count();
    assert_eq!(activations, 1);

    ctx.shutdown().await.unwrap();
}

/// Test: a version that denies the simulation input is not activated or audited
#[tokio::test]
async fn test_simulation_refuses_activation() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = AppContext::new(config(&temp_dir)).await.unwrap();
    let org = Uuid::new_v4();
    let agent = Uuid::new_v4();
    let reader = json!({ "action": "read" });

    let policy = ctx.create_policy(org, "default", "aurajson").unwrap();
    ctx.publish_policy(policy.id, read_only_policy(), Some(&reader), Actor::system())
        .await
        .unwrap();

    let err = ctx
        .publish_policy(policy.id, json!({ "rules": [] }), Some(&reader), Actor::system())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Policy(PolicyError::SimulationDenied { version: 2, .. })
    ));

    let outcome = ctx
        .verify(VerifyRequest::new(org, agent, reader.clone()))
        .await
        .unwrap();
    assert!(outcome.decision.allow);
    assert_eq!(outcome.decision.trace.unwrap().policy_version, Some(1));

    let activations = ctx
        .ledger
        .recent(org, None)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == EVENT_POLICY_VERSION_ACTIVATE)
        .count();
    assert_eq!(activations, 1);

    ctx.shutdown().await.unwrap();
}

/// Test: invalidation events reach the local subscribers
#[tokio::test]
async fn test_local_invalidation() {
    let temp_dir = TempDir::new().unwrap();
    let ctx = AppContext::new(config(&temp_dir)).await.unwrap();
    let org = Uuid::new_v4();

    let policy = ctx.create_policy(org, "default", "aurajson").unwrap();
    ctx.publish_policy(policy.id, read_only_policy(), None, Actor::system())
        .await
        .unwrap();

    // Activation compiles into the cache; the invalidation event clears it
    assert!(eventually(|| ctx.policies.cache().is_empty()).await);

    assert_eq!(ctx.graph_generation(), 0);
    ctx.publish_graph_invalidate().await.unwrap();
    assert!(eventually(|| ctx.graph_generation() == 1).await);

    ctx.shutdown().await.unwrap();
}

/// Test: two processes sharing a relay see each other's invalidations
#[tokio::test]
async fn test_invalidation_across_relay() {
    let relay = BusRelay::bind("127.0.0.1:0").await.unwrap().spawn().unwrap();
    let url = format!("tcp://{}", relay.local_addr());

    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = AppContext::new(AppConfig {
        bus: BusConfig::tcp(url.clone()),
        ..config(&dir_a)
    })
    .await
    .unwrap();
    let b = AppContext::new(AppConfig {
        bus: BusConfig::tcp(url),
        ..config(&dir_b)
    })
    .await
    .unwrap();

    a.publish_graph_invalidate().await.unwrap();

    assert!(eventually(|| b.graph_generation() == 1).await);
    assert!(eventually(|| a.graph_generation() == 1).await);

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
    relay.shutdown().await;
}

/// Test: a disabled bus fails startup explicitly
#[tokio::test]
async fn test_disabled_bus_fails_startup() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = config(&temp_dir);
    config.bus.backend = aura_bus::BusBackend::Disabled;

    let err = AppContext::new(config).await.err().unwrap();
    assert!(err.to_string().contains("backend not available"));
}
