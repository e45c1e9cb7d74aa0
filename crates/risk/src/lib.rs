//! Aura Risk Tracker - Near-real-time behaviour signals
//!
//! Counts recent hits per (org, agent) in a sliding window and turns them into
//! a 0..=100 score, plus transient alert flags raised by other systems.
//! State lives in one injected [`RiskTracker`] with explicit [`RiskTracker::reset`].

pub mod config;
pub mod pruner;
pub mod signals;
pub mod tracker;

pub use config::{RiskConfig, DEFAULT_SPIKE_THRESHOLD, DEFAULT_WINDOW_SECS};
pub use pruner::{spawn_pruner, PrunerHandle};
pub use signals::{rate_score, Signals, FLAG_RATE_SPIKE};
pub use tracker::{PruneStats, RiskTracker, Subject};
