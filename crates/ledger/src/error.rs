//! Ledger errors

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in ledger operations
///
/// Integrity breaks are not errors: `verify` reports them as
/// [`crate::Verification::Broken`] so a tampered chain is never confused with
/// a storage failure.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Concurrent append lost the race for org {org} at seq {seq}")]
    Conflict { org: Uuid, seq: u64 },

    #[error("Stored hash for org {org} at seq {seq} is not valid hex: {source}")]
    InvalidHash {
        org: Uuid,
        seq: u64,
        #[source]
        source: hex::FromHexError,
    },

    #[error("Corrupted ledger row for org {org}: {reason}")]
    Decode { org: Uuid, reason: String },
}

impl LedgerError {
    /// Create a decode error
    pub fn decode(org: Uuid, reason: impl Into<String>) -> Self {
        Self::Decode {
            org,
            reason: reason.into(),
        }
    }

    /// Check if this is a lost optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if this is an I/O failure of the underlying store
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
