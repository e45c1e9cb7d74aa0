//! CLI commands

use aura_bus::BusRelay;
use aura_ledger::{Actor, Verification};
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

use crate::context::AppContext;
use crate::verify::VerifyRequest;

/// Parse a JSON argument; an empty string is `null`
pub fn parse_json(raw: &str) -> Result<Value, anyhow::Error> {
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("Invalid JSON argument: {}", e))
}

/// Read a policy document from a JSON file
pub fn read_document(path: &Path) -> Result<Value, anyhow::Error> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", path.display(), e))?;
    parse_json(&content)
}

/// Append one audit entry
pub async fn audit_append(
    ctx: &AppContext,
    org: Uuid,
    event_type: &str,
    payload: &Value,
    actor: Actor,
) -> Result<(), anyhow::Error> {
    let entry = ctx.ledger.append_json(org, event_type, payload, actor).await?;

    println!(
        "✅ Appended {} to org {} (seq: {}, hash: {})",
        entry.event_type, org, entry.seq, entry.this_hash
    );
    Ok(())
}

/// Verify an org's hash chain; returns the first broken seq (0 when intact)
pub async fn audit_verify(
    ctx: &AppContext,
    org: Uuid,
    limit: Option<usize>,
) -> Result<u64, anyhow::Error> {
    let verification = ctx.ledger.verify(org, limit).await?;

    match &verification {
        Verification::Intact { checked, .. } => {
            println!("✅ Hash chain verified ({} entries)", checked);
        }
        Verification::Broken(b) => {
            println!("❌ Hash chain broken: {}", b);
        }
    }
    Ok(verification.break_seq())
}

/// Show the most recent entries, newest first
pub async fn audit_log(
    ctx: &AppContext,
    org: Uuid,
    limit: Option<usize>,
) -> Result<(), anyhow::Error> {
    let entries = ctx.ledger.recent(org, limit).await?;

    if entries.is_empty() {
        println!("No audit entries for org {}", org);
        return Ok(());
    }

    println!("{:<6} {:<28} {:<26} {}", "SEQ", "EVENT", "TIME", "HASH");
    for entry in &entries {
        println!(
            "{:<6} {:<28} {:<26} {}",
            entry.seq,
            entry.event_type,
            entry.event_time.format("%Y-%m-%d %H:%M:%S%.3f"),
            short_hash(&entry.this_hash)
        );
    }
    println!("\nTotal: {} entries", entries.len());
    Ok(())
}

/// First 16 characters of a hash; stored values are not trusted to be hex
fn short_hash(hash: &str) -> String {
    hash.chars().take(16).collect()
}

/// Compile a policy document without storing it
pub fn policy_check(ctx: &AppContext, engine: &str, document: &Value) -> Result<(), anyhow::Error> {
    let compiled = ctx.policies.check(engine, document)?;
    println!("✅ Policy compiles with engine {}", compiled.engine());
    Ok(())
}

/// Evaluate a policy document against one input without storing it
pub fn policy_eval(
    ctx: &AppContext,
    engine: &str,
    document: &Value,
    input: &Value,
) -> Result<(), anyhow::Error> {
    let decision = ctx.policies.simulate(engine, document, input)?;
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

/// Run one verification, optionally activating a policy for the org first
pub async fn verify(
    ctx: &AppContext,
    org: Uuid,
    agent: Uuid,
    context: Value,
    policy: Option<(&str, Value)>,
    simulation: Option<&Value>,
) -> Result<(), anyhow::Error> {
    if let Some((engine, document)) = policy {
        let created = ctx.create_policy(org, "cli", engine)?;
        let version = ctx
            .publish_policy(created.id, document, simulation, Actor::system())
            .await?;
        tracing::debug!(policy_id = %created.id, version = version.version, "Activated CLI policy");
    }

    let outcome = ctx.verify(VerifyRequest::new(org, agent, context)).await?;

    let verdict = if outcome.decision.allow { "✅ ALLOWED" } else { "❌ DENIED" };
    println!("{} - {}", verdict, outcome.decision.reason);
    println!(
        "   risk score: {}, flags: {:?}",
        outcome.signals.score, outcome.signals.flags
    );
    if let Some(trace_id) = &outcome.decision.trace_id {
        println!("   trace: {}", trace_id);
    }
    println!("   audit seq: {}", outcome.audit_seq);
    Ok(())
}

/// Run a bus relay until Ctrl-C
pub async fn relay(listen: &str) -> Result<(), anyhow::Error> {
    let relay = BusRelay::bind(listen).await?.spawn()?;
    println!("📡 Bus relay listening on {}", relay.local_addr());

    tokio::signal::ctrl_c().await?;
    relay.shutdown().await;
    println!("Relay stopped");
    Ok(())
}
