//! Aura RPC - Verification orchestrator and CLI
//!
//! Wires the audit ledger, policy engine, risk tracker and event bus into one
//! [`AppContext`] and exposes the `aura` command line.

pub mod commands;
pub mod config;
pub mod context;
pub mod verify;

pub use config::{AppConfig, ConfigError};
pub use context::{AppContext, AppError, EVENT_POLICY_VERSION_ACTIVATE};
pub use verify::{merge_signals, VerifyOutcome, VerifyRequest, EVENT_DECISION_RECORDED};
