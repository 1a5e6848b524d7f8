//! Per-collector poll bookkeeping
//!
//! The runner records every poll result here. A collector whose polls keep
//! failing is flagged once it crosses the consecutive-error threshold, but
//! it is never stopped: a failed poll only loses that sample.

use crate::collectors::PollResult;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

/// Consecutive failures before a collector is reported as failing
pub const CONSECUTIVE_ERROR_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectorHealth {
    Healthy,
    /// Recent polls failed but fewer than the threshold
    Degraded,
    Failing,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStatus {
    pub polls: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl CollectorStatus {
    pub fn health(&self, threshold: u32) -> CollectorHealth {
        match self.consecutive_failures {
            0 => CollectorHealth::Healthy,
            n if n < threshold => CollectorHealth::Degraded,
            _ => CollectorHealth::Failing,
        }
    }
}

/// Status of every running collector, keyed by collector name
#[derive(Debug)]
pub struct StatusRegistry {
    statuses: DashMap<String, CollectorStatus>,
    threshold: u32,
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new(CONSECUTIVE_ERROR_THRESHOLD)
    }
}

impl StatusRegistry {
    pub fn new(threshold: u32) -> Self {
        Self {
            statuses: DashMap::new(),
            threshold,
        }
    }

    pub fn register(&self, name: &str) {
        self.statuses.entry(name.to_string()).or_default();
    }

    /// Record one poll. Returns the failure streak when this poll is the one
    /// that crossed the threshold.
    pub fn record(&self, result: &PollResult) -> Option<u32> {
        let mut status = self.statuses.entry(result.collector_name.clone()).or_default();
        status.polls += 1;
        if result.is_ok() {
            if status.consecutive_failures > 0 {
                debug!(collector = %result.collector_name, "Collector recovered");
            }
            status.consecutive_failures = 0;
            return None;
        }

        status.failures += 1;
        status.consecutive_failures += 1;
        status.last_error = result.errors.last().map(ToString::to_string);
        (status.consecutive_failures == self.threshold + 1).then_some(status.consecutive_failures)
    }

    pub fn get(&self, name: &str) -> Option<CollectorStatus> {
        self.statuses.get(name).map(|s| s.clone())
    }

    pub fn health(&self, name: &str) -> Option<CollectorHealth> {
        self.statuses.get(name).map(|s| s.health(self.threshold))
    }

    /// Every status, sorted by collector name
    pub fn snapshot(&self) -> Vec<(String, CollectorStatus)> {
        let mut all: Vec<_> = self
            .statuses
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollectorError;

    fn failed(name: &str) -> PollResult {
        PollResult::new(name).with_error(CollectorError::Remote("exec failed".into()))
    }

    #[test]
    fn test_threshold_crossed_once() {
        let registry = StatusRegistry::new(2);
        registry.register("GNSS");
        assert_eq!(registry.record(&failed("GNSS")), None);
        assert_eq!(registry.health("GNSS"), Some(CollectorHealth::Degraded));
        assert_eq!(registry.record(&failed("GNSS")), None);
        assert_eq!(registry.record(&failed("GNSS")), Some(3));
        assert_eq!(registry.record(&failed("GNSS")), None);
        assert_eq!(registry.health("GNSS"), Some(CollectorHealth::Failing));

        let status = registry.get("GNSS").unwrap();
        assert_eq!(status.failures, 4);
        assert_eq!(status.last_error.as_deref(), Some("remote command failed: exec failed"));
    }

    #[test]
    fn test_success_resets_streak() {
        let registry = StatusRegistry::default();
        registry.record(&failed("PMC"));
        registry.record(&PollResult::new("PMC"));
        registry.record(&PollResult::new("DevInfo"));

        assert_eq!(registry.health("PMC"), Some(CollectorHealth::Healthy));
        let names: Vec<String> = registry.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["DevInfo", "PMC"]);
        assert_eq!(registry.get("PMC").unwrap().polls, 2);
    }
}
