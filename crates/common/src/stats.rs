//! Run statistics
//!
//! This is the shape persisted to `funnel-results.json`. All maps are
//! ordered by first insertion so the dashboard lists specs, steps and
//! signatures in the order they were first seen.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::event::TestStatus;

/// Binary outcome used on the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
}

impl From<TestStatus> for Outcome {
    fn from(status: TestStatus) -> Self {
        match status {
            TestStatus::Passed => Outcome::Passed,
            _ => Outcome::Failed,
        }
    }
}

/// One completed test on the timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineSample {
    pub timestamp: DateTime<Utc>,
    pub status: Outcome,
}

/// Pass/fail counts for one step title
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepCounter {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
}

pub type StepStats = IndexMap<String, StepCounter>;

/// Counters and samples for one scope (the whole run, or one spec file)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScopeStats {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    /// Tests that neither passed nor failed (skipped, interrupted)
    pub skipped: u64,
    pub test_durations: Vec<u64>,
    pub test_timeline: Vec<TimelineSample>,
    pub step_stats: StepStats,
}

impl ScopeStats {
    /// Count one completed test in this scope.
    pub(crate) fn record(&mut self, status: TestStatus, duration_ms: u64, completed_at: DateTime<Utc>) {
        self.total += 1;
        self.test_durations.push(duration_ms);
        self.test_timeline.push(TimelineSample {
            timestamp: completed_at,
            status: status.into(),
        });
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed | TestStatus::TimedOut => self.failed += 1,
            TestStatus::Other => self.skipped += 1,
        }
    }

    /// Count one execution of a user step.
    pub(crate) fn record_step(&mut self, title: &str, errored: bool) {
        let counter = upsert(&mut self.step_stats, title);
        counter.total += 1;
        if errored {
            counter.failed += 1;
        } else {
            counter.passed += 1;
        }
    }

    /// Mean test duration in milliseconds, 0 without samples.
    pub fn average_duration_ms(&self) -> f64 {
        if self.test_durations.is_empty() {
            return 0.0;
        }
        let total: f64 = self.test_durations.iter().map(|&d| d as f64).sum();
        total / self.test_durations.len() as f64
    }

    /// Whether every counter in this scope adds up.
    pub fn is_consistent(&self) -> bool {
        self.total == self.passed + self.failed + self.skipped
            && self.test_durations.len() as u64 == self.total
            && self.test_timeline.len() as u64 == self.total
            && self
                .step_stats
                .values()
                .all(|s| s.total == s.passed + s.failed)
    }
}

/// A failed run that captured a trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub test_id: String,
    pub title: String,
    pub trace: String,
    pub timestamp: DateTime<Utc>,
}

/// Occurrences of one failure signature
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureGroup {
    pub count: u64,
    pub traces: Vec<TraceRecord>,
}

/// signature -> occurrences
pub type SignatureFailures = IndexMap<String, FailureGroup>;
/// failing step -> signatures
pub type StepFailures = IndexMap<String, SignatureFailures>;
/// spec file -> failing steps
pub type FailureIndex = IndexMap<String, StepFailures>;

/// Statistics for a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunStatistics {
    #[serde(flatten)]
    pub overall: ScopeStats,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub workers: usize,
    pub spec_stats: IndexMap<String, ScopeStats>,
    pub failures: FailureIndex,
}

impl RunStatistics {
    /// Empty statistics for a run starting at `start_time`.
    pub fn new(workers: usize, start_time: DateTime<Utc>) -> Self {
        Self {
            start_time: Some(start_time),
            workers,
            ..Default::default()
        }
    }

    /// Wall-clock duration of the run, if it has both ends.
    pub fn wall_clock(&self) -> Option<chrono::Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if end > start => Some(end - start),
            _ => None,
        }
    }

    /// Sum of every FailureIndex leaf count.
    pub fn failure_count(&self) -> u64 {
        self.failures
            .values()
            .flat_map(|steps| steps.values())
            .flat_map(|sigs| sigs.values())
            .map(|g| g.count)
            .sum()
    }

    /// Whether the global scope and every spec scope add up.
    pub fn is_consistent(&self) -> bool {
        self.overall.is_consistent() && self.spec_stats.values().all(ScopeStats::is_consistent)
    }
}

/// Get or insert the entry for `key`, allocating the key only on insert.
pub(crate) fn upsert<'a, V: Default>(map: &'a mut IndexMap<String, V>, key: &str) -> &'a mut V {
    if let Some(idx) = map.get_index_of(key) {
        return &mut map[idx];
    }
    map.entry(key.to_owned()).or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_average_duration_of_huge_samples() {
        let scope = ScopeStats {
            test_durations: vec![u64::MAX / 2 + 1; 2],
            ..Default::default()
        };
        let avg = scope.average_duration_ms();
        assert!(avg.is_finite());
        assert!((avg - (u64::MAX / 2 + 1) as f64).abs() / avg < 1e-9);
        assert_eq!(ScopeStats::default().average_duration_ms(), 0.0);
    }

    #[test]
    fn test_snapshot_field_names() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut stats = RunStatistics::new(5, start);
        stats.overall.record(TestStatus::Passed, 10, start);
        stats.overall.record_step("login", false);

        let json = serde_json::to_value(&stats).unwrap();
        for key in [
            "total",
            "passed",
            "failed",
            "startTime",
            "endTime",
            "workers",
            "testDurations",
            "testTimeline",
            "stepStats",
            "specStats",
            "failures",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["testTimeline"][0]["status"], "passed");
        assert_eq!(json["stepStats"]["login"]["total"], 1);
    }

    #[test]
    fn test_legacy_snapshot_loads() {
        // Snapshots without per-step or per-spec data still deserialize
        let json = r#"{
            "total": 3, "passed": 2, "failed": 1,
            "startTime": "2024-01-01T00:00:00.000Z",
            "endTime": "2024-01-01T00:01:00.000Z",
            "failures": { "a.spec.js": { "checkout": { "Timeout Xms exceeded": { "count": 1, "traces": [] } } } }
        }"#;
        let stats: RunStatistics = serde_json::from_str(json).unwrap();
        assert_eq!(stats.overall.total, 3);
        assert_eq!(stats.failure_count(), 1);
        assert_eq!(stats.wall_clock(), Some(chrono::Duration::minutes(1)));
    }

    #[test]
    fn test_upsert_keeps_first_seen_order() {
        let mut map: StepStats = IndexMap::new();
        upsert(&mut map, "b").total += 1;
        upsert(&mut map, "a").total += 1;
        upsert(&mut map, "b").total += 1;
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(map["b"].total, 2);
    }
}
