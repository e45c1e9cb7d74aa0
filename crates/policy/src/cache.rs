//! Compiled policy cache keyed by (policy, version)

use crate::evaluator::CompiledPolicy;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct CompiledCache {
    entries: RwLock<HashMap<(Uuid, u32), CompiledPolicy>>,
}

impl CompiledCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, policy_id: Uuid, version: u32) -> Option<CompiledPolicy> {
        self.entries.read().get(&(policy_id, version)).cloned()
    }

    pub fn insert(&self, policy_id: Uuid, version: u32, compiled: CompiledPolicy) {
        self.entries.write().insert((policy_id, version), compiled);
    }

    /// Drop one version, or every version of the policy when `version` is `None`
    pub fn remove(&self, policy_id: Uuid, version: Option<u32>) {
        let mut entries = self.entries.write();
        match version {
            Some(v) => {
                entries.remove(&(policy_id, v));
            }
            None => entries.retain(|(pid, _), _| *pid != policy_id),
        }
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
