//! Statistics aggregator
//!
//! Workers finish tests concurrently, so the aggregator works through `&self`.
//! [`Aggregator::prepare`] computes everything that depends on the event
//! alone (signature, failing step, user steps) without the lock, and
//! [`Aggregator::commit`] applies the whole update for one event under a
//! single lock.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::event::{StepRecord, TestOutcomeEvent, TestStatus};
use crate::locate;
use crate::normalize::normalize_error;
use crate::stats::{upsert, RunStatistics, TraceRecord};

/// Step category the runner uses for user-declared steps
pub const USER_STEP_CATEGORY: &str = "test.step";

/// Accumulates statistics for one run
pub struct Aggregator {
    /// Only steps in this category are counted in StepStats
    step_category: String,
    stats: Mutex<RunStatistics>,
}

/// Failure bookkeeping derived from one event
#[derive(Debug, Clone)]
struct FailureKey {
    step: String,
    signature: String,
}

/// An event with everything that does not need the lock already worked out
#[derive(Debug, Clone)]
pub struct PreparedTest {
    event: TestOutcomeEvent,
    /// (title, errored) of every user step, in pre-order
    user_steps: Vec<(String, bool)>,
    failure: Option<FailureKey>,
}

impl Aggregator {
    /// Start a run now.
    pub fn new(workers: usize, step_category: impl Into<String>) -> Self {
        Self::starting_at(workers, step_category, Utc::now())
    }

    /// Start a run at a given instant.
    pub fn starting_at(workers: usize, step_category: impl Into<String>, start: DateTime<Utc>) -> Self {
        Self {
            step_category: step_category.into(),
            stats: Mutex::new(RunStatistics::new(workers, start)),
        }
    }

    /// Record one completed test.
    pub fn record_test(&self, event: &TestOutcomeEvent) {
        self.commit(self.prepare(event.clone()));
    }

    /// Locate the failing step, normalize the signature and collect user
    /// steps. Takes no lock, so workers can run it in parallel.
    pub fn prepare(&self, event: TestOutcomeEvent) -> PreparedTest {
        let mut steps = Vec::new();
        collect_user_steps(&event.steps, &self.step_category, &mut steps);
        let user_steps = steps
            .into_iter()
            .map(|step| (step.title.clone(), step.has_error()))
            .collect();

        let failure = event.status.is_failure().then(|| FailureKey {
            step: locate::failing_step_title(&event.steps).to_string(),
            signature: normalize_error(event.error.as_deref()),
        });

        PreparedTest {
            event,
            user_steps,
            failure,
        }
    }

    /// Apply a prepared event to the statistics under a single lock.
    ///
    /// Map keys and trace lists follow commit order.
    pub fn commit(&self, prepared: PreparedTest) {
        let PreparedTest {
            event,
            user_steps,
            failure,
        } = prepared;

        let mut guard = self.stats.lock();
        let stats = &mut *guard;

        stats
            .overall
            .record(event.status, event.duration_ms, event.completed_at);
        let spec = upsert(&mut stats.spec_stats, &event.file);
        spec.record(event.status, event.duration_ms, event.completed_at);

        for (title, errored) in &user_steps {
            stats.overall.record_step(title, *errored);
            spec.record_step(title, *errored);
        }

        if let Some(failure) = failure {
            let group = upsert(
                upsert(upsert(&mut stats.failures, &event.file), &failure.step),
                &failure.signature,
            );
            group.count += 1;
            if let Some(trace) = &event.trace {
                group.traces.push(TraceRecord {
                    test_id: event.id.clone(),
                    title: event.title.clone(),
                    trace: trace.clone(),
                    timestamp: event.completed_at,
                });
            }
            debug!(
                file = %event.file,
                step = %failure.step,
                signature = %failure.signature,
                "recorded failure"
            );
        } else {
            debug!(file = %event.file, status = %event.status, "recorded test");
        }
    }

    /// Copy of the statistics gathered so far.
    pub fn snapshot(&self) -> RunStatistics {
        self.stats.lock().clone()
    }

    /// Number of tests recorded so far.
    pub fn recorded(&self) -> u64 {
        self.stats.lock().overall.total
    }

    /// End the run now and hand out the final statistics.
    pub fn finalize(self) -> RunStatistics {
        self.finalize_at(Utc::now())
    }

    /// End the run at a given instant.
    pub fn finalize_at(self, end: DateTime<Utc>) -> RunStatistics {
        let mut stats = self.stats.into_inner();
        stats.end_time = Some(end);
        stats
    }
}

fn collect_user_steps<'a>(steps: &'a [StepRecord], category: &str, out: &mut Vec<&'a StepRecord>) {
    for step in steps {
        if step.category == category {
            out.push(step);
        }
        collect_user_steps(&step.steps, category, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locate::UNKNOWN_STEP;
    use crate::normalize::UNKNOWN_ERROR;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn failing(file: &str, step: &str, message: &str) -> TestOutcomeEvent {
        let mut event = TestOutcomeEvent::new(file, "buy phone", TestStatus::Failed);
        event.steps = vec![
            StepRecord::new("open home", USER_STEP_CATEGORY),
            StepRecord::new(step, USER_STEP_CATEGORY).with_error(message),
        ];
        event.error = Some(message.to_string());
        event
    }

    #[test]
    fn test_checkout_scenario() {
        let agg = Aggregator::starting_at(5, USER_STEP_CATEGORY, start());
        for _ in 0..3 {
            agg.record_test(&TestOutcomeEvent::new("a.spec.js", "ok", TestStatus::Passed));
        }
        agg.record_test(&failing("a.spec.js", "checkout", "Timeout 5000ms exceeded"));
        agg.record_test(&failing("a.spec.js", "checkout", "Timeout 7000ms exceeded"));

        let stats = agg.finalize_at(start() + chrono::Duration::seconds(30));
        assert_eq!(stats.overall.total, 5);
        assert_eq!(stats.overall.passed, 3);
        assert_eq!(stats.overall.failed, 2);
        assert!(stats.is_consistent());

        let signatures = &stats.failures["a.spec.js"]["checkout"];
        assert_eq!(signatures.len(), 1);
        assert_eq!(signatures["Timeout Xms exceeded"].count, 2);
        assert_eq!(stats.failure_count(), stats.overall.failed);
    }

    #[test]
    fn test_timed_out_counts_as_failure() {
        let agg = Aggregator::starting_at(1, USER_STEP_CATEGORY, start());
        let mut event = TestOutcomeEvent::new("b.spec.js", "slow", TestStatus::TimedOut);
        event.trace = Some("test-results/b/trace.zip".into());
        event.id = "t-1".into();
        agg.record_test(&event);

        let stats = agg.finalize();
        assert_eq!(stats.overall.failed, 1);
        let group = &stats.failures["b.spec.js"][UNKNOWN_STEP][UNKNOWN_ERROR];
        assert_eq!(group.count, 1);
        assert_eq!(group.traces.len(), 1);
        assert_eq!(group.traces[0].test_id, "t-1");
        assert_eq!(group.traces[0].trace, "test-results/b/trace.zip");
    }

    #[test]
    fn test_skipped_counted_in_total_only() {
        let agg = Aggregator::starting_at(1, USER_STEP_CATEGORY, start());
        agg.record_test(&TestOutcomeEvent::new("c.spec.js", "skip me", TestStatus::Other));

        let stats = agg.finalize();
        assert_eq!(stats.overall.total, 1);
        assert_eq!(stats.overall.passed, 0);
        assert_eq!(stats.overall.failed, 0);
        assert_eq!(stats.overall.skipped, 1);
        assert!(stats.failures.is_empty());
        assert!(stats.is_consistent());
    }

    #[test]
    fn test_only_user_steps_are_counted() {
        let agg = Aggregator::starting_at(1, USER_STEP_CATEGORY, start());
        let mut event = TestOutcomeEvent::new("d.spec.js", "nested", TestStatus::Failed);
        event.steps = vec![
            StepRecord::new("Before Hooks", "hook"),
            StepRecord::new("add to cart", USER_STEP_CATEGORY).with_children(vec![
                StepRecord::new("page.click", "pw:api"),
                StepRecord::new("confirm alert", USER_STEP_CATEGORY).with_error("dialog missing"),
            ]),
        ];
        agg.record_test(&event);

        let stats = agg.finalize();
        let steps = &stats.overall.step_stats;
        assert_eq!(steps.len(), 2);
        assert_eq!(steps["add to cart"].passed, 1);
        assert_eq!(steps["confirm alert"].failed, 1);
        assert!(!steps.contains_key("Before Hooks"));
        assert_eq!(stats.spec_stats["d.spec.js"].step_stats, *steps);
        assert!(stats.failures["d.spec.js"].contains_key("confirm alert"));
    }

    #[test]
    fn test_concurrent_recording_loses_nothing() {
        let agg = Arc::new(Aggregator::starting_at(8, USER_STEP_CATEGORY, start()));

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let agg = Arc::clone(&agg);
                scope.spawn(move || {
                    for i in 0..250 {
                        let file = format!("spec-{}.spec.js", i % 3);
                        if (worker + i) % 4 == 0 {
                            agg.record_test(&failing(&file, "checkout", "Timeout 100ms exceeded"));
                        } else {
                            agg.record_test(&TestOutcomeEvent::new(file, "ok", TestStatus::Passed));
                        }
                    }
                });
            }
        });

        let agg = Arc::into_inner(agg).unwrap();
        let stats = agg.finalize();
        assert_eq!(stats.overall.total, 2000);
        assert_eq!(stats.overall.passed + stats.overall.failed, 2000);
        assert_eq!(stats.failure_count(), stats.overall.failed);
        assert_eq!(
            stats.spec_stats.values().map(|s| s.total).sum::<u64>(),
            2000
        );
        assert!(stats.is_consistent());
    }
}
