//! Risk signals

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Flag raised when the window holds at least the spike threshold
pub const FLAG_RATE_SPIKE: &str = "rate_spike";

/// Current risk view of one subject
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signals {
    /// 0..=100
    pub score: u8,
    pub flags: BTreeSet<String>,
}

impl Signals {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_quiet(&self) -> bool {
        self.score == 0 && self.flags.is_empty()
    }
}

/// `min(100, count * 100 / threshold)`
pub fn rate_score(count: usize, threshold: u32) -> u8 {
    let threshold = u64::from(threshold.max(1));
    let score = (count as u64).saturating_mul(100) / threshold;
    score.min(100) as u8
}
