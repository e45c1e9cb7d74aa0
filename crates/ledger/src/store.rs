//! Ledger storage backends

use crate::entry::{AuditEntry, ChainHead};
use crate::error::{LedgerError, LedgerResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Ordered, queryable storage for audit chains
///
/// Implementations must reject a second entry with the same `(org_id, seq)`
/// with [`LedgerError::Conflict`] and insert each entry atomically.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Latest entry position of an org, `None` for an empty chain
    async fn head(&self, org: Uuid) -> LedgerResult<Option<ChainHead>>;

    /// Insert one entry
    async fn insert(&self, entry: &AuditEntry) -> LedgerResult<()>;

    /// Oldest entries first, at most `limit`
    async fn scan(&self, org: Uuid, limit: usize) -> LedgerResult<Vec<AuditEntry>>;

    /// Newest entries first, at most `limit`
    async fn recent(&self, org: Uuid, limit: usize) -> LedgerResult<Vec<AuditEntry>>;
}

/// Process-local store, one vector per org
#[derive(Default)]
pub struct MemoryLedgerStore {
    chains: RwLock<HashMap<Uuid, Vec<AuditEntry>>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held for an org
    pub async fn len(&self, org: Uuid) -> usize {
        self.chains.read().await.get(&org).map_or(0, Vec::len)
    }

    #[cfg(test)]
    pub(crate) async fn tamper(&self, org: Uuid, seq: u64, f: impl FnOnce(&mut AuditEntry)) {
        let mut chains = self.chains.write().await;
        if let Some(entry) = chains
            .get_mut(&org)
            .and_then(|chain| chain.iter_mut().find(|e| e.seq == seq))
        {
            f(entry);
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn head(&self, org: Uuid) -> LedgerResult<Option<ChainHead>> {
        Ok(self
            .chains
            .read()
            .await
            .get(&org)
            .and_then(|chain| chain.last())
            .map(AuditEntry::head))
    }

    async fn insert(&self, entry: &AuditEntry) -> LedgerResult<()> {
        let mut chains = self.chains.write().await;
        let chain = chains.entry(entry.org_id).or_default();

        // Entries arrive in seq order, so any taken seq is at or below the last one
        if chain.last().is_some_and(|last| last.seq >= entry.seq) {
            return Err(LedgerError::Conflict {
                org: entry.org_id,
                seq: entry.seq,
            });
        }

        chain.push(entry.clone());
        Ok(())
    }

    async fn scan(&self, org: Uuid, limit: usize) -> LedgerResult<Vec<AuditEntry>> {
        Ok(self
            .chains
            .read()
            .await
            .get(&org)
            .map(|chain| chain.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn recent(&self, org: Uuid, limit: usize) -> LedgerResult<Vec<AuditEntry>> {
        Ok(self
            .chains
            .read()
            .await
            .get(&org)
            .map(|chain| chain.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
