//! Policy engine facade
//!
//! Ties the evaluator registry, the version store and the compiled cache
//! together. Activation compiles before flipping the active pointer, so a
//! broken version never replaces a working one.

use crate::cache::CompiledCache;
use crate::decision::Decision;
use crate::error::{PolicyError, PolicyResult};
use crate::evaluator::CompiledPolicy;
use crate::registry::EvaluatorRegistry;
use crate::store::{Policy, PolicyStore, PolicyVersion};
use serde_json::Value;
use uuid::Uuid;

pub const REASON_NO_ACTIVE_POLICY: &str = "No active policy";

pub struct PolicyEngine {
    registry: EvaluatorRegistry,
    store: PolicyStore,
    cache: CompiledCache,
}

impl PolicyEngine {
    pub fn new(registry: EvaluatorRegistry) -> Self {
        Self {
            registry,
            store: PolicyStore::new(),
            cache: CompiledCache::new(),
        }
    }

    pub fn registry(&self) -> &EvaluatorRegistry {
        &self.registry
    }

    pub fn store(&self) -> &PolicyStore {
        &self.store
    }

    pub fn cache(&self) -> &CompiledCache {
        &self.cache
    }

    /// Create a policy bound to a registered engine
    pub fn create_policy(&self, org_id: Uuid, name: &str, engine: &str) -> PolicyResult<Policy> {
        self.registry.get(engine)?;
        Ok(self.store.create_policy(org_id, name, engine))
    }

    /// Store a new draft version
    pub fn add_version(&self, policy_id: Uuid, document: Value) -> PolicyResult<PolicyVersion> {
        let version = self.store.insert_version(policy_id, document)?;
        tracing::debug!(
            policy_id = %policy_id,
            version = version.version,
            checksum = %version.checksum,
            "Stored policy version"
        );
        Ok(version)
    }

    /// Compile a version and make it active
    ///
    /// When a simulation input is given, the candidate must allow it before
    /// it goes live. On compile failure or a denied simulation the previous
    /// active version and its compiled artifact stay in place. A successful
    /// activation discards the artifacts of every other version.
    pub fn activate(
        &self,
        policy_id: Uuid,
        version: u32,
        simulation: Option<&Value>,
    ) -> PolicyResult<PolicyVersion> {
        let policy = self.store.get_policy(policy_id)?;
        let candidate = self.store.get_version(policy_id, version)?;
        let evaluator = self.registry.get(&policy.engine)?;

        let compiled = evaluator.compile(&candidate.document).map_err(|e| {
            tracing::warn!(
                policy_id = %policy_id,
                version,
                error = %e,
                "Policy activation failed to compile"
            );
            e
        })?;

        if let Some(input) = simulation {
            let reason = match evaluator.evaluate(&compiled, input) {
                Ok(decision) if decision.allow => None,
                Ok(decision) => Some(decision.reason),
                Err(e) => Some(e.to_string()),
            };
            if let Some(reason) = reason {
                tracing::warn!(
                    policy_id = %policy_id,
                    version,
                    reason = %reason,
                    "Policy activation refused by simulation"
                );
                return Err(PolicyError::SimulationDenied { version, reason });
            }
        }

        let active = self.store.set_active(policy_id, version)?;
        self.cache.remove(policy_id, None);
        self.cache.insert(policy_id, version, compiled);

        tracing::info!(policy_id = %policy_id, version, engine = %policy.engine, "Activated policy version");
        Ok(active)
    }

    /// Evaluate the active version of a policy
    pub fn evaluate(&self, policy_id: Uuid, input: &Value) -> PolicyResult<Decision> {
        let policy = self.store.get_policy(policy_id)?;
        let active = self
            .store
            .active_version(policy_id)
            .ok_or(PolicyError::NoActiveVersion(policy_id))?;
        let evaluator = self.registry.get(&policy.engine)?;

        let compiled = match self.cache.get(policy_id, active.version) {
            Some(compiled) => compiled,
            None => {
                tracing::debug!(policy_id = %policy_id, version = active.version, "Compiled cache miss");
                let compiled = evaluator.compile(&active.document)?;
                self.cache.insert(policy_id, active.version, compiled.clone());
                compiled
            }
        };

        let mut decision = evaluator.evaluate(&compiled, input)?;
        if let Some(trace) = decision.trace.as_mut() {
            trace.policy_id = Some(policy_id);
            trace.policy_version = Some(active.version);
        }
        Ok(decision)
    }

    /// Evaluate the policy assigned to an org
    ///
    /// An org without an assigned, active policy is denied.
    pub fn evaluate_for_org(&self, org_id: Uuid, input: &Value) -> PolicyResult<Decision> {
        let Some(policy_id) = self.store.assigned_policy(org_id) else {
            return Ok(Decision::deny(REASON_NO_ACTIVE_POLICY));
        };
        match self.evaluate(policy_id, input) {
            Err(PolicyError::NoActiveVersion(_)) => Ok(Decision::deny(REASON_NO_ACTIVE_POLICY)),
            other => other,
        }
    }

    /// Compile a document with a named engine without storing anything
    pub fn check(&self, engine: &str, document: &Value) -> PolicyResult<CompiledPolicy> {
        self.registry.get(engine)?.compile(document)
    }

    /// Compile and evaluate a document without storing anything
    pub fn simulate(&self, engine: &str, document: &Value, input: &Value) -> PolicyResult<Decision> {
        let evaluator = self.registry.get(engine)?;
        let compiled = evaluator.compile(document)?;
        evaluator.evaluate(&compiled, input)
    }

    /// Drop every compiled artifact
    pub fn invalidate(&self) {
        self.cache.clear();
        tracing::debug!("Compiled policy cache cleared");
    }

    /// Drop the compiled artifacts of one policy
    pub fn invalidate_policy(&self, policy_id: Uuid) {
        self.cache.remove(policy_id, None);
    }
}
