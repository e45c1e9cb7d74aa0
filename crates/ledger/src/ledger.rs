//! Per-org appender and verifier

use crate::entry::{Actor, AuditEntry, ChainHead};
use crate::error::{LedgerError, LedgerResult};
use crate::hash::{chain_hash, verify_chain, Verification};
use crate::store::LedgerStore;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Upper bound (and default) of entries replayed by one `verify`
pub const MAX_VERIFY_LIMIT: usize = 10_000;
/// Default page size of `recent`
pub const DEFAULT_RECENT_LIMIT: usize = 200;
/// Upper bound of `recent`
pub const MAX_RECENT_LIMIT: usize = 5_000;

/// Audit ledger over a [`LedgerStore`]
///
/// Appends for one org are serialized by an async mutex held across the
/// head read and the insert. Different orgs never contend. An org's mutex
/// is dropped from the map once no append holds or waits on it.
pub struct AuditLedger {
    store: Arc<dyn LedgerStore>,
    org_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl AuditLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            org_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    async fn org_lock(&self, org: Uuid) -> Arc<Mutex<()>> {
        self.org_locks
            .lock()
            .await
            .entry(org)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget the org's mutex when the map and `lock` are its only holders
    ///
    /// Clones are only taken under the map lock, so the count cannot grow
    /// while it is checked.
    async fn release_org_lock(&self, org: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.org_locks.lock().await;
        let current = locks.get(&org).is_some_and(|l| Arc::ptr_eq(l, &lock));
        if current && Arc::strong_count(&lock) == 2 {
            locks.remove(&org);
        }
    }

    /// Number of orgs with an append in flight
    pub async fn locked_orgs(&self) -> usize {
        self.org_locks.lock().await.len()
    }

    /// Append an entry with the exact `payload` bytes
    pub async fn append(
        &self,
        org: Uuid,
        event_type: &str,
        payload: Vec<u8>,
        actor: Actor,
    ) -> LedgerResult<AuditEntry> {
        let lock = self.org_lock(org).await;
        let result = {
            let _guard = lock.lock().await;
            self.append_locked(org, event_type, payload, actor).await
        };
        self.release_org_lock(org, lock).await;
        result
    }

    async fn append_locked(
        &self,
        org: Uuid,
        event_type: &str,
        payload: Vec<u8>,
        actor: Actor,
    ) -> LedgerResult<AuditEntry> {
        let head = self.store.head(org).await?.unwrap_or_else(ChainHead::empty);
        let this_hash =
            chain_hash(&head.this_hash, &payload).map_err(|source| LedgerError::InvalidHash {
                org,
                seq: head.seq,
                source,
            })?;

        let entry = AuditEntry {
            org_id: org,
            seq: head.next_seq(),
            actor_user: actor.user,
            actor_agent: actor.agent,
            event_type: event_type.to_string(),
            payload,
            prev_hash: head.this_hash,
            this_hash,
            event_time: Utc::now(),
        };

        self.store.insert(&entry).await?;

        tracing::debug!(
            org = %org,
            seq = entry.seq,
            event_type = %entry.event_type,
            "Appended audit entry"
        );

        Ok(entry)
    }

    /// Serialize `payload` once and append those bytes
    pub async fn append_json<T: Serialize + ?Sized>(
        &self,
        org: Uuid,
        event_type: &str,
        payload: &T,
        actor: Actor,
    ) -> LedgerResult<AuditEntry> {
        let bytes = serde_json::to_vec(payload)?;
        self.append(org, event_type, bytes, actor).await
    }

    /// Replay up to `limit` entries from the start of the chain
    ///
    /// `None`, `0` or anything above [`MAX_VERIFY_LIMIT`] replays
    /// [`MAX_VERIFY_LIMIT`] entries.
    pub async fn verify(&self, org: Uuid, limit: Option<usize>) -> LedgerResult<Verification> {
        let limit = verify_limit(limit);
        let entries = self.store.scan(org, limit).await?;
        let result = verify_chain(&entries);

        match &result {
            Verification::Intact { checked, .. } => {
                tracing::debug!(org = %org, checked, "Audit chain intact");
            }
            Verification::Broken(b) => {
                tracing::warn!(org = %org, seq = b.seq, kind = %b.kind, "Audit chain broken");
            }
        }

        Ok(result)
    }

    /// Newest entries first
    pub async fn recent(&self, org: Uuid, limit: Option<usize>) -> LedgerResult<Vec<AuditEntry>> {
        let limit = match limit {
            None | Some(0) => DEFAULT_RECENT_LIMIT,
            Some(n) => n.min(MAX_RECENT_LIMIT),
        };
        self.store.recent(org, limit).await
    }

    /// Latest position of an org's chain
    pub async fn head(&self, org: Uuid) -> LedgerResult<ChainHead> {
        Ok(self.store.head(org).await?.unwrap_or_else(ChainHead::empty))
    }
}

fn verify_limit(limit: Option<usize>) -> usize {
    match limit {
        Some(n) if n > 0 && n <= MAX_VERIFY_LIMIT => n,
        _ => MAX_VERIFY_LIMIT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{genesis_hash, BreakKind};
    use crate::store::MemoryLedgerStore;
    use serde_json::json;

    fn ledger() -> (Arc<MemoryLedgerStore>, AuditLedger) {
        let store = Arc::new(MemoryLedgerStore::new());
        let ledger = AuditLedger::new(store.clone());
        (store, ledger)
    }

    #[test]
    fn test_verify_limit() {
        assert_eq!(verify_limit(None), MAX_VERIFY_LIMIT);
        assert_eq!(verify_limit(Some(0)), MAX_VERIFY_LIMIT);
        assert_eq!(verify_limit(Some(20_000)), MAX_VERIFY_LIMIT);
        assert_eq!(verify_limit(Some(7)), 7);
    }

    #[tokio::test]
    async fn test_first_append() {
        let (_, ledger) = ledger();
        let org = Uuid::new_v4();

        let entry = ledger
            .append(org, "login", b"hello".to_vec(), Actor::system())
            .await
            .unwrap();

        assert_eq!(entry.seq, 1);
        assert_eq!(entry.prev_hash, "");
        assert_eq!(entry.this_hash, genesis_hash(b"hello"));
    }

    #[tokio::test]
    async fn test_appends_link_and_verify() {
        let (_, ledger) = ledger();
        let org = Uuid::new_v4();

        let mut prev = String::new();
        for i in 0..10 {
            let entry = ledger
                .append_json(org, "tick", &json!({ "i": i }), Actor::system())
                .await
                .unwrap();
            assert_eq!(entry.prev_hash, prev);
            assert_eq!(entry.this_hash, chain_hash(&prev, &entry.payload).unwrap());
            prev = entry.this_hash;
        }

        let result = ledger.verify(org, None).await.unwrap();
        assert_eq!(result.break_seq(), 0);
        assert_eq!(
            result,
            Verification::Intact {
                checked: 10,
                head: prev.clone()
            }
        );
        assert_eq!(ledger.head(org).await.unwrap().this_hash, prev);
    }

    #[tokio::test]
    async fn test_append_json_hashes_stored_bytes() {
        let (_, ledger) = ledger();
        let org = Uuid::new_v4();
        let payload = json!({ "b": 1, "a": [1, 2] });

        let entry = ledger
            .append_json(org, "decision_recorded", &payload, Actor::system())
            .await
            .unwrap();

        assert_eq!(entry.payload, serde_json::to_vec(&payload).unwrap());
        assert_eq!(entry.this_hash, genesis_hash(&entry.payload));
        assert_eq!(entry.payload_json(), Some(payload));
    }

    #[tokio::test]
    async fn test_empty_event_type_accepted() {
        let (_, ledger) = ledger();
        let org = Uuid::new_v4();
        let entry = ledger
            .append(org, "", vec![], Actor::system())
            .await
            .unwrap();
        assert_eq!(entry.seq, 1);
        assert_eq!(entry.event_type, "");
        assert_eq!(entry.this_hash, genesis_hash(b""));
    }

    #[tokio::test]
    async fn test_org_locks_released_after_append() {
        let (_, ledger) = ledger();
        for _ in 0..10 {
            ledger
                .append(Uuid::new_v4(), "tick", b"x".to_vec(), Actor::system())
                .await
                .unwrap();
        }
        assert_eq!(ledger.locked_orgs().await, 0);
    }

    #[tokio::test]
    async fn test_tampered_payload_detected() {
        let (store, ledger) = ledger();
        let org = Uuid::new_v4();
        for i in 0..5u8 {
            ledger.append(org, "tick", vec![i], Actor::system()).await.unwrap();
        }

        store.tamper(org, 3, |e| e.payload = b"forged".to_vec()).await;

        let result = ledger.verify(org, None).await.unwrap();
        assert_eq!(result.break_seq(), 3);
    }

    #[tokio::test]
    async fn test_tampered_hash_detected() {
        let (store, ledger) = ledger();
        let org = Uuid::new_v4();
        for i in 0..4u8 {
            ledger.append(org, "tick", vec![i], Actor::system()).await.unwrap();
        }

        store
            .tamper(org, 4, |e| e.this_hash = genesis_hash(b"other"))
            .await;

        match ledger.verify(org, None).await.unwrap() {
            Verification::Broken(b) => {
                assert_eq!(b.seq, 4);
                assert_eq!(b.kind, BreakKind::HashMismatch);
            }
            other => panic!("expected break, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_verify_limit_scans_prefix() {
        let (store, ledger) = ledger();
        let org = Uuid::new_v4();
        for i in 0..6u8 {
            ledger.append(org, "tick", vec![i], Actor::system()).await.unwrap();
        }
        store.tamper(org, 5, |e| e.payload = vec![99]).await;

        assert_eq!(ledger.verify(org, Some(4)).await.unwrap().break_seq(), 0);
        assert_eq!(ledger.verify(org, Some(6)).await.unwrap().break_seq(), 5);
    }

    #[tokio::test]
    async fn test_orgs_have_independent_chains() {
        let (_, ledger) = ledger();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        ledger.append(a, "x", b"1".to_vec(), Actor::system()).await.unwrap();
        ledger.append(a, "x", b"2".to_vec(), Actor::system()).await.unwrap();
        let first_b = ledger.append(b, "x", b"1".to_vec(), Actor::system()).await.unwrap();

        assert_eq!(first_b.seq, 1);
        assert_eq!(first_b.prev_hash, "");
        assert_eq!(ledger.head(a).await.unwrap().seq, 2);
    }

    #[tokio::test]
    async fn test_recent_newest_first() {
        let (_, ledger) = ledger();
        let org = Uuid::new_v4();
        for i in 0..3u8 {
            ledger.append(org, "tick", vec![i], Actor::system()).await.unwrap();
        }

        let seqs: Vec<u64> = ledger
            .recent(org, None)
            .await
            .unwrap()
            .iter()
            .map(|e| e.seq)
            .collect();
        assert_eq!(seqs, vec![3, 2, 1]);
        assert_eq!(ledger.recent(org, Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_keep_chain_linear() {
        let (_, ledger) = ledger();
        let ledger = Arc::new(ledger);
        let org = Uuid::new_v4();

        let mut handles = Vec::new();
        for i in 0..32u8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .append(org, "concurrent", vec![i], Actor::system())
                    .await
                    .unwrap()
                    .seq
            }));
        }

        let mut seqs = Vec::new();
        for handle in handles {
            seqs.push(handle.await.unwrap());
        }
        seqs.sort_unstable();

        assert_eq!(seqs, (1..=32).collect::<Vec<u64>>());
        assert_eq!(ledger.locked_orgs().await, 0);
        assert_eq!(
            ledger.verify(org, None).await.unwrap(),
            Verification::Intact {
                checked: 32,
                head: ledger.head(org).await.unwrap().this_hash
            }
        );
    }
}
