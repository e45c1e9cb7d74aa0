//! Aura Ledger - Tamper-evident audit trail
//!
//! Every decision and policy change is appended to a per-org hash chain.
//! Rewriting any stored entry breaks the chain from that position on.
//!
//! # Key Types
//! - `AuditEntry`: One immutable chain row
//! - `AuditLedger`: Per-org serialized appender and verifier
//! - `LedgerStore`: Storage seam (`SqliteLedgerStore`, `MemoryLedgerStore`)
//! - `Verification`: Intact, or the first broken position

pub mod entry;
pub mod error;
pub mod hash;
pub mod ledger;
pub mod sqlite;
pub mod store;

pub use entry::{Actor, AuditEntry, ChainHead};
pub use error::{LedgerError, LedgerResult};
pub use hash::{chain_hash, genesis_hash, verify_chain, BreakKind, ChainBreak, Verification};
pub use ledger::{AuditLedger, DEFAULT_RECENT_LIMIT, MAX_RECENT_LIMIT, MAX_VERIFY_LIMIT};
pub use sqlite::SqliteLedgerStore;
pub use store::{LedgerStore, MemoryLedgerStore};
