//! In-memory policy and version repository

use crate::error::{PolicyError, PolicyResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

/// A named policy owned by an org
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    /// Evaluator name
    pub engine: String,
    pub created_at: DateTime<Utc>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VersionStatus {
    Draft,
    Active,
}

/// Immutable document revision of a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub policy_id: Uuid,
    /// Starts at 1 per policy
    pub version: u32,
    pub document: Value,
    /// hex SHA-256 of the document's JSON bytes
    pub checksum: String,
    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

/// Checksum of a policy document
pub fn document_checksum(document: &Value) -> PolicyResult<String> {
    Ok(hex::encode(Sha256::digest(serde_json::to_vec(document)?)))
}

#[derive(Default)]
struct StoreState {
    policies: HashMap<Uuid, Policy>,
    versions: HashMap<Uuid, Vec<PolicyVersion>>,
    /// org → assigned policy
    assignments: HashMap<Uuid, Uuid>,
}

/// Thread-safe policy repository
#[derive(Default)]
pub struct PolicyStore {
    state: RwLock<StoreState>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a policy with no versions
    pub fn create_policy(&self, org_id: Uuid, name: &str, engine: &str) -> Policy {
        let policy = Policy {
            id: Uuid::new_v4(),
            org_id,
            name: name.to_string(),
            engine: engine.to_string(),
            created_at: Utc::now(),
        };
        self.state
            .write()
            .policies
            .insert(policy.id, policy.clone());
        policy
    }

    pub fn get_policy(&self, policy_id: Uuid) -> PolicyResult<Policy> {
        self.state
            .read()
            .policies
            .get(&policy_id)
            .cloned()
            .ok_or(PolicyError::PolicyNotFound(policy_id))
    }

    /// Store a new draft version numbered after the latest one
    pub fn insert_version(&self, policy_id: Uuid, document: Value) -> PolicyResult<PolicyVersion> {
        let checksum = document_checksum(&document)?;
        let mut state = self.state.write();
        if !state.policies.contains_key(&policy_id) {
            return Err(PolicyError::PolicyNotFound(policy_id));
        }

        let versions = state.versions.entry(policy_id).or_default();
        let version = PolicyVersion {
            policy_id,
            version: versions.last().map_or(1, |v| v.version + 1),
            document,
            checksum,
            status: VersionStatus::Draft,
            created_at: Utc::now(),
            activated_at: None,
        };
        versions.push(version.clone());
        Ok(version)
    }

    pub fn get_version(&self, policy_id: Uuid, version: u32) -> PolicyResult<PolicyVersion> {
        self.state
            .read()
            .versions
            .get(&policy_id)
            .and_then(|vs| vs.iter().find(|v| v.version == version))
            .cloned()
            .ok_or(PolicyError::VersionNotFound { policy_id, version })
    }

    /// All versions of a policy, oldest first
    pub fn versions(&self, policy_id: Uuid) -> Vec<PolicyVersion> {
        self.state
            .read()
            .versions
            .get(&policy_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Mark one version active and every other version draft
    pub fn set_active(&self, policy_id: Uuid, version: u32) -> PolicyResult<PolicyVersion> {
        let mut state = self.state.write();
        let versions = state
            .versions
            .get_mut(&policy_id)
            .filter(|vs| vs.iter().any(|v| v.version == version))
            .ok_or(PolicyError::VersionNotFound { policy_id, version })?;

        let now = Utc::now();
        let mut activated = None;
        for v in versions.iter_mut() {
            if v.version == version {
                v.status = VersionStatus::Active;
                v.activated_at = Some(now);
                activated = Some(v.clone());
            } else {
                v.status = VersionStatus::Draft;
            }
        }
        activated.ok_or(PolicyError::VersionNotFound { policy_id, version })
    }

    pub fn active_version(&self, policy_id: Uuid) -> Option<PolicyVersion> {
        self.state
            .read()
            .versions
            .get(&policy_id)?
            .iter()
            .find(|v| v.status == VersionStatus::Active)
            .cloned()
    }

    /// Make `policy_id` the policy evaluated for `org_id`
    pub fn assign(&self, org_id: Uuid, policy_id: Uuid) -> PolicyResult<()> {
        let mut state = self.state.write();
        if !state.policies.contains_key(&policy_id) {
            return Err(PolicyError::PolicyNotFound(policy_id));
        }
        state.assignments.insert(org_id, policy_id);
        Ok(())
    }

    pub fn assigned_policy(&self, org_id: Uuid) -> Option<Uuid> {
        self.state.read().assignments.get(&org_id).copied()
    }
}
