//! Audit entry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity responsible for an audited event
///
/// Both sides are optional: system events carry neither, a console action
/// carries a user, a verification carries the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user: Option<Uuid>,
    pub agent: Option<Uuid>,
}

impl Actor {
    /// No human or agent actor
    pub fn system() -> Self {
        Self::default()
    }

    /// Action performed by a user
    pub fn user(id: Uuid) -> Self {
        Self {
            user: Some(id),
            agent: None,
        }
    }

    /// Action performed by an agent
    pub fn agent(id: Uuid) -> Self {
        Self {
            user: None,
            agent: Some(id),
        }
    }

    /// Agent acting on behalf of a user
    pub fn delegated(user: Uuid, agent: Uuid) -> Self {
        Self {
            user: Some(user),
            agent: Some(agent),
        }
    }
}

/// One immutable row of an org's audit chain
///
/// `this_hash = hex(SHA-256(decode_hex(prev_hash) || payload))`, computed
/// over exactly the bytes held in `payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub org_id: Uuid,
    /// Starts at 1, strictly increasing per org
    pub seq: u64,
    pub actor_user: Option<Uuid>,
    pub actor_agent: Option<Uuid>,
    pub event_type: String,
    /// Opaque payload bytes (hex in serialized form)
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
    /// Empty for the first entry of a chain
    pub prev_hash: String,
    pub this_hash: String,
    /// Informational; not covered by the hash
    pub event_time: DateTime<Utc>,
}

impl AuditEntry {
    /// Actor recorded on this entry
    pub fn actor(&self) -> Actor {
        Actor {
            user: self.actor_user,
            agent: self.actor_agent,
        }
    }

    /// Whether this entry starts its org's chain
    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    /// Decode the payload as JSON, if it is JSON
    pub fn payload_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }

    /// Latest position of the chain once this entry is stored
    pub fn head(&self) -> ChainHead {
        ChainHead {
            seq: self.seq,
            this_hash: self.this_hash.clone(),
        }
    }
}

/// Position of the newest entry of a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub seq: u64,
    pub this_hash: String,
}

impl ChainHead {
    /// Head of a chain with no entries yet
    pub fn empty() -> Self {
        Self {
            seq: 0,
            this_hash: String::new(),
        }
    }

    /// Sequence number the next appended entry receives
    pub fn next_seq(&self) -> u64 {
        self.seq + 1
    }
}
