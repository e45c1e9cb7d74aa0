//! Sliding-window risk tracker
//!
//! Two lock tiers: the tracker lock guards the subject and alert maps, each
//! window has its own lock for its timestamps. The tracker lock is always
//! taken first and never held while a caller waits on a window it does not
//! own, so distinct subjects proceed in parallel.

use crate::config::RiskConfig;
use crate::signals::{rate_score, Signals, FLAG_RATE_SPIKE};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Tracked identity: an agent within an org
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject {
    pub org: Uuid,
    pub agent: Uuid,
}

impl Subject {
    pub fn new(org: Uuid, agent: Uuid) -> Self {
        Self { org, agent }
    }
}

type Window = Arc<Mutex<Vec<DateTime<Utc>>>>;

#[derive(Default)]
struct TrackerState {
    windows: HashMap<Subject, Window>,
    /// subject → flag → expires_at
    alerts: HashMap<Subject, HashMap<String, DateTime<Utc>>>,
}

/// What a prune pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub timestamps: usize,
    pub windows: usize,
    pub alerts: usize,
}

pub struct RiskTracker {
    config: RiskConfig,
    state: Mutex<TrackerState>,
}

impl Default for RiskTracker {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

impl RiskTracker {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Record one hit at `now`; never prunes
    pub fn record(&self, org: Uuid, agent: Uuid, now: DateTime<Utc>) {
        let window = self
            .state
            .lock()
            .windows
            .entry(Subject::new(org, agent))
            .or_default()
            .clone();
        window.lock().push(now);
    }

    /// Current signals of a subject
    ///
    /// Drops timestamps at or before `now - window` and counts the remaining
    /// ones at or before `now`. Later timestamps recorded by racing callers
    /// stay in the window for future reads.
    pub fn get(&self, org: Uuid, agent: Uuid, now: DateTime<Utc>) -> Signals {
        let subject = Subject::new(org, agent);
        let (window, alerts) = {
            let state = self.state.lock();
            let window = state.windows.get(&subject).cloned();
            let alerts: Vec<String> = state
                .alerts
                .get(&subject)
                .map(|flags| {
                    flags
                        .iter()
                        .filter(|(_, expires_at)| **expires_at > now)
                        .map(|(flag, _)| flag.clone())
                        .collect()
                })
                .unwrap_or_default();
            (window, alerts)
        };

        let count = match window {
            Some(window) => {
                let cutoff = now - self.config.window;
                let mut buf = window.lock();
                buf.retain(|ts| *ts > cutoff);
                buf.iter().filter(|ts| **ts <= now).count()
            }
            None => 0,
        };

        let mut signals = Signals {
            score: rate_score(count, self.config.spike_threshold),
            flags: alerts.into_iter().collect(),
        };
        if count >= self.config.spike_threshold as usize {
            signals.flags.insert(FLAG_RATE_SPIKE.to_string());
        }
        signals
    }

    /// Attach a transient flag active while `now < expires_at`
    pub fn raise_alert(&self, org: Uuid, agent: Uuid, flag: &str, expires_at: DateTime<Utc>) {
        self.state
            .lock()
            .alerts
            .entry(Subject::new(org, agent))
            .or_default()
            .insert(flag.to_string(), expires_at);
        tracing::debug!(org = %org, agent = %agent, flag, %expires_at, "Raised risk alert");
    }

    /// Remove a flag; returns whether it was present
    pub fn clear_alert(&self, org: Uuid, agent: Uuid, flag: &str) -> bool {
        let mut state = self.state.lock();
        let subject = Subject::new(org, agent);
        let Some(flags) = state.alerts.get_mut(&subject) else {
            return false;
        };
        let removed = flags.remove(flag).is_some();
        if flags.is_empty() {
            state.alerts.remove(&subject);
        }
        removed
    }

    /// Drop expired timestamps, empty windows and expired alerts everywhere
    pub fn prune(&self, now: DateTime<Utc>) -> PruneStats {
        let cutoff = now - self.config.window;
        let mut stats = PruneStats::default();
        let mut state = self.state.lock();

        state.windows.retain(|_, window| {
            let mut buf = window.lock();
            let before = buf.len();
            buf.retain(|ts| *ts > cutoff);
            stats.timestamps += before - buf.len();

            // A caller holding a clone may be about to record into it
            let keep = !buf.is_empty() || Arc::strong_count(window) > 1;
            if !keep {
                stats.windows += 1;
            }
            keep
        });

        state.alerts.retain(|_, flags| {
            let before = flags.len();
            flags.retain(|_, expires_at| *expires_at > now);
            stats.alerts += before - flags.len();
            !flags.is_empty()
        });

        stats
    }

    /// Number of subjects holding a window
    pub fn subject_count(&self) -> usize {
        self.state.lock().windows.len()
    }

    /// Forget everything
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.windows.clear();
        state.alerts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tracker(window_secs: i64, threshold: i64) -> RiskTracker {
        RiskTracker::new(RiskConfig::new(window_secs, threshold))
    }

    #[test]
    fn test_spike_at_threshold() {
        let tracker = tracker(30, 50);
        let (org, agent) = (Uuid::new_v4(), Uuid::new_v4());
        let start = Utc::now();

        for i in 0..50 {
            tracker.record(org, agent, start + Duration::milliseconds(i * 20));
        }

        let signals = tracker.get(org, agent, start + Duration::seconds(1));
        assert_eq!(signals.score, 100);
        assert!(signals.has_flag("rate_spike"));
    }

    #[test]
    fn test_below_threshold() {
        let tracker = tracker(30, 50);
        let (org, agent) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        for _ in 0..49 {
            tracker.record(org, agent, now);
        }

        let signals = tracker.get(org, agent, now);
        assert_eq!(signals.score, 98);
        assert!(!signals.has_flag("rate_spike"));
    }

    #[test]
    fn test_strict_window_expiry() {
        let tracker = tracker(30, 10);
        let (org, agent) = (Uuid::new_v4(), Uuid::new_v4());
        let t0 = Utc::now();

        tracker.record(org, agent, t0);

        // Exactly one window later the hit is gone
        assert_eq!(tracker.get(org, agent, t0 + Duration::seconds(30)).score, 0);

        tracker.record(org, agent, t0 + Duration::seconds(31));
        let signals = tracker.get(org, agent, t0 + Duration::seconds(60));
        assert_eq!(signals.score, 10);
    }

    #[test]
    fn test_future_hits_kept_not_counted() {
        let tracker = tracker(30, 10);
        let (org, agent) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        tracker.record(org, agent, now);
        tracker.record(org, agent, now + Duration::seconds(5));

        assert_eq!(tracker.get(org, agent, now).score, 10);
        assert_eq!(tracker.get(org, agent, now + Duration::seconds(5)).score, 20);
    }

    #[test]
    fn test_unknown_subject_allocates_nothing() {
        let tracker = tracker(30, 50);
        let signals = tracker.get(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        assert!(signals.is_quiet());
        assert_eq!(tracker.subject_count(), 0);
    }

    #[test]
    fn test_subjects_are_isolated() {
        let tracker = tracker(30, 2);
        let org = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        tracker.record(org, a, now);
        tracker.record(org, a, now);

        assert!(tracker.get(org, a, now).has_flag("rate_spike"));
        assert!(tracker.get(org, b, now).is_quiet());
        assert!(tracker.get(Uuid::new_v4(), a, now).is_quiet());
    }

    #[test]
    fn test_alert_lifetime() {
        let tracker = tracker(30, 50);
        let (org, agent) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        let expires = now + Duration::seconds(120);

        tracker.raise_alert(org, agent, "external_alert", expires);

        assert!(tracker.get(org, agent, now).has_flag("external_alert"));
        assert!(!tracker.get(org, agent, expires).has_flag("external_alert"));

        assert!(tracker.clear_alert(org, agent, "external_alert"));
        assert!(!tracker.clear_alert(org, agent, "external_alert"));
        assert!(!tracker.get(org, agent, now).has_flag("external_alert"));
    }

    #[test]
    fn test_alert_without_hits() {
        let tracker = tracker(30, 50);
        let (org, agent) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        tracker.raise_alert(org, agent, "manual_review", now + Duration::seconds(1));
        let signals = tracker.get(org, agent, now);
        assert_eq!(signals.score, 0);
        assert!(signals.has_flag("manual_review"));
    }

    #[test]
    fn test_prune_drops_idle_state() {
        let tracker = tracker(30, 50);
        let org = Uuid::new_v4();
        let (idle, busy) = (Uuid::new_v4(), Uuid::new_v4());
        let t0 = Utc::now();

        tracker.record(org, idle, t0);
        tracker.record(org, idle, t0);
        tracker.record(org, busy, t0 + Duration::seconds(20));
        tracker.raise_alert(org, idle, "old", t0 + Duration::seconds(10));
        tracker.raise_alert(org, busy, "fresh", t0 + Duration::seconds(100));

        let stats = tracker.prune(t0 + Duration::seconds(40));
        assert_eq!(
            stats,
            PruneStats {
                timestamps: 2,
                windows: 1,
                alerts: 1
            }
        );
        assert_eq!(tracker.subject_count(), 1);
        assert!(tracker
            .get(org, busy, t0 + Duration::seconds(40))
            .has_flag("fresh"));
    }

    #[test]
    fn test_reset() {
        let tracker = tracker(30, 1);
        let (org, agent) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        tracker.record(org, agent, now);
        tracker.raise_alert(org, agent, "x", now + Duration::seconds(5));
        tracker.reset();

        assert!(tracker.get(org, agent, now).is_quiet());
        assert_eq!(tracker.subject_count(), 0);
    }

    #[test]
    fn test_concurrent_records() {
        let tracker = Arc::new(tracker(30, 1000));
        let org = Uuid::new_v4();
        let agents: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let now = Utc::now();

        let mut handles = Vec::new();
        for &agent in &agents {
            for _ in 0..2 {
                let tracker = tracker.clone();
                handles.push(std::thread::spawn(move || {
                    for _ in 0..100 {
                        tracker.record(org, agent, now);
                    }
                }));
            }
        }
        for handle in handles {
            handle.join().unwrap();
        }

        for agent in agents {
            assert_eq!(tracker.get(org, agent, now).score, 20);
        }
    }
}
