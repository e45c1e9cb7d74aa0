//! Application context - wires everything together

use crate::config::AppConfig;
use crate::verify::{decision_payload, merge_signals, VerifyOutcome, VerifyRequest, EVENT_DECISION_RECORDED};
use aura_bus::{
    open_bus, BusError, Event, EventBus, FnSubscriber, Subscription, TOPIC_GRAPH_INVALIDATE,
    TOPIC_POLICY_INVALIDATE,
};
use aura_ledger::{Actor, AuditLedger, LedgerError, SqliteLedgerStore};
use aura_policy::{EvaluatorRegistry, Policy, PolicyEngine, PolicyError, PolicyVersion};
use aura_risk::{spawn_pruner, PrunerHandle, RiskTracker};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Ledger event type written when a policy version goes live
pub const EVENT_POLICY_VERSION_ACTIVATE: &str = "policy_version_activate";

/// Application context - wires together all components
pub struct AppContext {
    pub config: AppConfig,
    pub ledger: AuditLedger,
    pub store: SqliteLedgerStore,
    pub policies: Arc<PolicyEngine>,
    pub risk: Arc<RiskTracker>,
    pub bus: Arc<dyn EventBus>,
    graph_generation: Arc<AtomicU64>,
    subscriptions: Vec<Subscription>,
    pruner: Option<PrunerHandle>,
}

impl AppContext {
    /// Create a new application context
    pub async fn new(config: AppConfig) -> Result<Self, anyhow::Error> {
        let store = SqliteLedgerStore::connect(&config.database_url).await?;
        let ledger = AuditLedger::new(Arc::new(store.clone()));

        let policies = Arc::new(PolicyEngine::new(EvaluatorRegistry::with_builtin()));

        let risk = Arc::new(RiskTracker::new(config.risk.tracker_config()));
        let pruner = config
            .risk
            .prune_interval()
            .map(|interval| spawn_pruner(risk.clone(), interval));

        let bus = open_bus(&config.bus).await?;
        let graph_generation = Arc::new(AtomicU64::new(0));
        let subscriptions =
            install_invalidation(bus.as_ref(), policies.clone(), graph_generation.clone()).await?;

        tracing::info!(
            database = %config.database_url,
            bus = %bus.backend(),
            engines = ?policies.registry().names(),
            "Application context ready"
        );

        Ok(Self {
            config,
            ledger,
            store,
            policies,
            risk,
            bus,
            graph_generation,
            subscriptions,
            pruner,
        })
    }

    /// Decide one request and record the decision
    ///
    /// Flow: Risk hit → Signals → Merge → Evaluate → Audit
    pub async fn verify(&self, request: VerifyRequest) -> Result<VerifyOutcome, AppError> {
        let now = Utc::now();

        // 1. Count this request before reading the signals
        self.risk.record(request.org_id, request.agent_id, now);
        let signals = self.risk.get(request.org_id, request.agent_id, now);

        // 2. Evaluate against the merged context
        let input = merge_signals(&request.context, &signals);
        let decision = self.policies.evaluate_for_org(request.org_id, &input)?;

        // 3. Audit, denials included
        let entry = self
            .ledger
            .append_json(
                request.org_id,
                EVENT_DECISION_RECORDED,
                &decision_payload(&decision, &signals),
                Actor::agent(request.agent_id),
            )
            .await?;

        tracing::info!(
            org = %request.org_id,
            agent = %request.agent_id,
            allow = decision.allow,
            reason = %decision.reason,
            score = signals.score,
            seq = entry.seq,
            "Verified request"
        );

        Ok(VerifyOutcome {
            decision,
            signals,
            audit_seq: entry.seq,
        })
    }

    /// Create a policy and make it the org's policy
    pub fn create_policy(&self, org_id: Uuid, name: &str, engine: &str) -> Result<Policy, AppError> {
        let policy = self.policies.create_policy(org_id, name, engine)?;
        self.policies.store().assign(org_id, policy.id)?;
        Ok(policy)
    }

    /// Store a document as the next version and activate it
    pub async fn publish_policy(
        &self,
        policy_id: Uuid,
        document: Value,
        simulation: Option<&Value>,
        actor: Actor,
    ) -> Result<PolicyVersion, AppError> {
        let version = self.policies.add_version(policy_id, document)?;
        self.activate_policy(policy_id, version.version, simulation, actor)
            .await
    }

    /// Activate a stored version, audit it and tell every process to drop
    /// its compiled copy
    ///
    /// With a simulation input the version only goes live if it allows
    /// that input; a refused activation is neither audited nor published.
    pub async fn activate_policy(
        &self,
        policy_id: Uuid,
        version: u32,
        simulation: Option<&Value>,
        actor: Actor,
    ) -> Result<PolicyVersion, AppError> {
        let policy = self.policies.store().get_policy(policy_id)?;
        let active = self.policies.activate(policy_id, version, simulation)?;

        self.ledger
            .append_json(
                policy.org_id,
                EVENT_POLICY_VERSION_ACTIVATE,
                &json!({ "policy_id": policy_id, "version": version }),
                actor,
            )
            .await?;

        let event = Event::json(TOPIC_POLICY_INVALIDATE, &json!({ "policy_id": policy_id }))
            .map_err(BusError::from)?;
        self.bus.publish(event).await?;

        Ok(active)
    }

    /// Tell every process to drop its permission graphs
    pub async fn publish_graph_invalidate(&self) -> Result<(), AppError> {
        self.bus.publish(Event::signal(TOPIC_GRAPH_INVALIDATE)).await?;
        Ok(())
    }

    /// Bumped on every `graph.invalidate`; cached graphs older than this are stale
    pub fn graph_generation(&self) -> u64 {
        self.graph_generation.load(Ordering::Acquire)
    }

    /// Unsubscribe, stop the pruner and close the bus
    pub async fn shutdown(mut self) -> Result<(), AppError> {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        if let Some(pruner) = self.pruner.take() {
            pruner.shutdown().await;
        }
        self.bus.close().await?;
        self.store.pool().close().await;

        tracing::info!("Application context shut down");
        Ok(())
    }
}

async fn install_invalidation(
    bus: &dyn EventBus,
    policies: Arc<PolicyEngine>,
    graph_generation: Arc<AtomicU64>,
) -> Result<Vec<Subscription>, BusError> {
    let policy_sub = bus
        .subscribe(
            TOPIC_POLICY_INVALIDATE,
            Arc::new(FnSubscriber::new("policy-cache", move |event: &Event| {
                let policy_id = event
                    .payload_json::<Value>()
                    .ok()
                    .and_then(|v| v.get("policy_id").and_then(Value::as_str).map(str::to_string));
                policies.invalidate();
                tracing::debug!(policy_id = ?policy_id, "Compiled policies invalidated");
                Ok(())
            })),
        )
        .await?;

    let graph_sub = bus
        .subscribe(
            TOPIC_GRAPH_INVALIDATE,
            Arc::new(FnSubscriber::new("graph-cache", move |_: &Event| {
                let generation = graph_generation.fetch_add(1, Ordering::AcqRel) + 1;
                tracing::debug!(generation, "Permission graphs invalidated");
                Ok(())
            })),
        )
        .await?;

    Ok(vec![policy_sub, graph_sub])
}

/// Errors from orchestrated operations
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}
