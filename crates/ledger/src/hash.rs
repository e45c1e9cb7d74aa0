//! Hash chain utilities for ledger integrity

use crate::entry::AuditEntry;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Calculate the chain hash binding `payload` to the previous entry
///
/// `this_hash = hex(SHA-256(decode_hex(prev_hash) || payload))`. An empty
/// `prev_hash` contributes no bytes, so the first entry hashes the payload
/// alone.
pub fn chain_hash(prev_hash: &str, payload: &[u8]) -> Result<String, hex::FromHexError> {
    let mut hasher = Sha256::new();

    if !prev_hash.is_empty() {
        hasher.update(hex::decode(prev_hash)?);
    }
    hasher.update(payload);

    Ok(hex::encode(hasher.finalize()))
}

/// Hash of `payload` as the first entry of a chain
pub fn genesis_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// What disagreed at the first broken position
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BreakKind {
    /// `prev_hash` does not point at the previous entry's stored hash
    LinkMismatch,
    /// Recomputed hash differs from the stored `this_hash`
    HashMismatch,
}

/// First position where a chain stops being consistent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub seq: u64,
    pub kind: BreakKind,
    pub expected: String,
    pub stored: String,
}

impl std::fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            BreakKind::LinkMismatch => write!(
                f,
                "Broken link at seq {}: expected prev_hash '{}', got '{}'",
                self.seq, self.expected, self.stored
            ),
            BreakKind::HashMismatch => write!(
                f,
                "Invalid hash at seq {}: expected '{}', got '{}'",
                self.seq, self.expected, self.stored
            ),
        }
    }
}

/// Outcome of replaying a chain prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verification {
    /// Every scanned entry is consistent
    Intact {
        /// Entries replayed
        checked: usize,
        /// Hash of the last replayed entry (empty when nothing was scanned)
        head: String,
    },
    /// The scanned prefix is corrupted from `ChainBreak::seq` on
    Broken(ChainBreak),
}

impl Verification {
    /// First offending seq, or 0 when the scanned prefix is intact
    pub fn break_seq(&self) -> u64 {
        match self {
            Verification::Intact { .. } => 0,
            Verification::Broken(b) => b.seq,
        }
    }

    pub fn is_intact(&self) -> bool {
        matches!(self, Verification::Intact { .. })
    }
}

/// Replay entries (ascending seq) from an empty hash
///
/// Only the stored bytes are hashed. Stops at the first inconsistency.
pub fn verify_chain(entries: &[AuditEntry]) -> Verification {
    let mut prev_hash = String::new();

    for entry in entries {
        if entry.prev_hash != prev_hash {
            return Verification::Broken(ChainBreak {
                seq: entry.seq,
                kind: BreakKind::LinkMismatch,
                expected: prev_hash,
                stored: entry.prev_hash.clone(),
            });
        }

        // prev_hash is always a hash this loop recomputed, so it decodes
        let calculated = match chain_hash(&prev_hash, &entry.payload) {
            Ok(hash) => hash,
            Err(_) => String::new(),
        };
        if entry.this_hash != calculated {
            return Verification::Broken(ChainBreak {
                seq: entry.seq,
                kind: BreakKind::HashMismatch,
                expected: calculated,
                stored: entry.this_hash.clone(),
            });
        }

        prev_hash = calculated;
    }

    Verification::Intact {
        checked: entries.len(),
        head: prev_hash,
    }
}
