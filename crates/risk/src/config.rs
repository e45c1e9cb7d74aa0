//! Risk tracker configuration

use chrono::Duration;

/// Default look-back window
pub const DEFAULT_WINDOW_SECS: i64 = 30;
/// Default number of hits within the window that maps to score 100
pub const DEFAULT_SPIKE_THRESHOLD: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskConfig {
    pub window: Duration,
    pub spike_threshold: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            window: Duration::seconds(DEFAULT_WINDOW_SECS),
            spike_threshold: DEFAULT_SPIKE_THRESHOLD,
        }
    }
}

impl RiskConfig {
    /// Build from raw values; non-positive values fall back to the defaults
    pub fn new(window_secs: i64, spike_threshold: i64) -> Self {
        let window = if window_secs > 0 {
            Duration::seconds(window_secs)
        } else {
            Duration::seconds(DEFAULT_WINDOW_SECS)
        };
        let spike_threshold = match u32::try_from(spike_threshold) {
            Ok(t) if t > 0 => t,
            _ => DEFAULT_SPIKE_THRESHOLD,
        };

        Self {
            window,
            spike_threshold,
        }
    }
}
