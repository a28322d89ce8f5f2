//! `funnel record`: aggregate test outcome events into a run snapshot

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Args, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use funnel_common::playwright_json::import_report;
use funnel_common::{
    Aggregator, EventBoundary, FunnelConfig, PreparedTest, RunStatistics, TestOutcomeEvent,
};

use crate::output::{print_run_summary, print_warning};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// One JSON test event per line
    Ndjson,
    /// A Playwright JSON reporter document
    PlaywrightJson,
}

#[derive(Args)]
pub struct RecordArgs {
    /// Event source; `-` reads stdin
    #[arg(long, short, default_value = "-")]
    pub input: String,

    /// Input format
    #[arg(long, value_enum, default_value_t = InputFormat::Ndjson)]
    pub format: InputFormat,

    /// Parallel workers (defaults to run.workers from the config)
    #[arg(long, env = "WORKERS")]
    pub workers: Option<usize>,
}

pub async fn execute(args: RecordArgs, config: &FunnelConfig) -> Result<()> {
    let boundary = config.event_boundary();
    let mut reader = open_input(&args.input).await?;

    let (stats, skipped) = match args.format {
        InputFormat::Ndjson => {
            let workers = resolve_workers(args.workers, None, config)?;
            let recorder = Recorder::new(workers, &config.run.step_category, Utc::now());
            record_ndjson(reader, &boundary, recorder).await?
        }
        InputFormat::PlaywrightJson => {
            let mut doc = String::new();
            reader.read_to_string(&mut doc).await?;
            let run = import_report(&doc)?;

            let workers = resolve_workers(args.workers, run.workers, config)?;
            let start = run.start_time.unwrap_or_else(Utc::now);
            let mut recorder = Recorder::new(workers, &config.run.step_category, start);
            for raw in run.events {
                recorder.submit(boundary.accept(raw)).await?;
            }
            (recorder.finish().await?, 0)
        }
    };

    if skipped > 0 {
        print_warning(&format!("Skipped {} malformed event line(s)", skipped));
    }

    let store = config.snapshot_store();
    store.write(&stats)?;
    print_run_summary(&stats, store.path());
    Ok(())
}

fn resolve_workers(flag: Option<usize>, reported: Option<usize>, config: &FunnelConfig) -> Result<usize> {
    let workers = flag.or(reported).unwrap_or(config.run.workers);
    if workers == 0 {
        return Err(anyhow!("workers must be at least 1"));
    }
    Ok(workers)
}

async fn open_input(input: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(tokio::io::stdin()));
    }
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("cannot open {}", input))?;
    Ok(Box::new(file))
}

/// Feed NDJSON events into `recorder`; returns the statistics and the number
/// of lines that could not be parsed.
pub async fn record_ndjson<R: AsyncRead + Unpin>(
    reader: R,
    boundary: &EventBoundary,
    mut recorder: Recorder,
) -> Result<(RunStatistics, usize)> {
    let mut lines = BufReader::new(reader).lines();
    let mut line_no = 0;
    let mut skipped = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match boundary.parse_line(line) {
            Ok(event) => recorder.submit(event).await?,
            Err(e) => {
                warn!("Skipping malformed event on line {}: {}", line_no, e);
                skipped += 1;
            }
        }
    }

    Ok((recorder.finish().await?, skipped))
}

/// Span covered by the recorded tests
#[derive(Debug, Default, Clone, Copy)]
struct RunWindow {
    first_start: Option<DateTime<Utc>>,
    last_done: Option<DateTime<Utc>>,
}

impl RunWindow {
    fn observe(&mut self, event: &TestOutcomeEvent) {
        let started = i64::try_from(event.duration_ms)
            .ok()
            .and_then(Duration::try_milliseconds)
            .and_then(|d| event.completed_at.checked_sub_signed(d))
            .unwrap_or(event.completed_at);
        self.first_start = Some(self.first_start.map_or(started, |t| t.min(started)));
        self.last_done = Some(self.last_done.map_or(event.completed_at, |t| t.max(event.completed_at)));
    }
}

/// Records events through a bounded pool of worker tasks.
///
/// Workers prepare events in parallel; prepared events are committed in
/// submission order, so a replay of the same input always yields the same
/// snapshot.
pub struct Recorder {
    aggregator: Arc<Aggregator>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<(u64, PreparedTest)>,
    /// Prepared events waiting for an earlier one to finish
    pending: BTreeMap<u64, PreparedTest>,
    next_seq: u64,
    next_commit: u64,
    window: RunWindow,
}

impl Recorder {
    pub fn new(workers: usize, step_category: &str, start: DateTime<Utc>) -> Self {
        info!("Recording run with {} workers", workers);
        Self {
            aggregator: Arc::new(Aggregator::starting_at(workers, step_category, start)),
            permits: Arc::new(Semaphore::new(workers)),
            tasks: JoinSet::new(),
            pending: BTreeMap::new(),
            next_seq: 0,
            next_commit: 0,
            window: RunWindow::default(),
        }
    }

    /// Hand one event to a worker, waiting while all workers are busy.
    pub async fn submit(&mut self, event: TestOutcomeEvent) -> Result<()> {
        self.window.observe(&event);
        let permit = self.permits.clone().acquire_owned().await?;
        let aggregator = self.aggregator.clone();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.spawn(async move {
            let prepared = aggregator.prepare(event);
            drop(permit);
            (seq, prepared)
        });

        while let Some(joined) = self.tasks.try_join_next() {
            self.stage(joined?);
        }
        Ok(())
    }

    /// Queue a prepared event and commit every event that is now in order.
    fn stage(&mut self, (seq, prepared): (u64, PreparedTest)) {
        self.pending.insert(seq, prepared);
        while let Some(ready) = self.pending.remove(&self.next_commit) {
            self.aggregator.commit(ready);
            self.next_commit += 1;
        }
    }

    /// Wait for every worker and close the run.
    ///
    /// The run window is widened to cover every recorded test, so replayed
    /// events keep their original timeline.
    pub async fn finish(mut self) -> Result<RunStatistics> {
        while let Some(joined) = self.tasks.join_next().await {
            self.stage(joined?);
        }
        debug_assert!(self.pending.is_empty());

        let aggregator = Arc::try_unwrap(self.aggregator)
            .map_err(|_| anyhow!("aggregator still shared after all workers finished"))?;
        debug!("Recorded {} events", aggregator.recorded());

        let end = self.window.last_done.unwrap_or_else(Utc::now);
        let mut stats = aggregator.finalize_at(end);
        if let Some(first) = self.window.first_start {
            if stats.start_time.map_or(true, |start| first < start) {
                stats.start_time = Some(first);
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use funnel_common::{TestStatus, USER_STEP_CATEGORY};

    fn boundary() -> EventBoundary {
        EventBoundary::new(None, "trace")
    }

    const NDJSON: &str = r#"{"id":"t1","title":"buys","location":{"file":"a.spec.js"},"status":"passed","duration":1200,"completedAt":"2024-05-01T10:00:02Z"}
{"id":"t2","title":"buys","location":{"file":"a.spec.js"},"status":"failed","duration":5100,"completedAt":"2024-05-01T10:00:06Z","error":{"message":"Timeout 5000ms exceeded"},"steps":[{"title":"checkout","category":"test.step","error":{"message":"Timeout 5000ms exceeded"}}],"attachments":[{"name":"trace","path":"test-results/t2/trace.zip"}]}
not json at all

{"id":"t3","title":"buys","location":{"file":"a.spec.js"},"status":"timedOut","duration":7000,"completedAt":"2024-05-01T10:00:09Z","steps":[{"title":"checkout","category":"test.step","error":{"message":"Timeout 7000ms exceeded"}}]}
"#;

    #[tokio::test]
    async fn test_record_ndjson() {
        let replay_start = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let recorder = Recorder::new(3, USER_STEP_CATEGORY, replay_start);
        let (stats, skipped) = record_ndjson(NDJSON.as_bytes(), &boundary(), recorder).await.unwrap();

        assert_eq!(skipped, 1);
        assert_eq!(stats.overall.total, 3);
        assert_eq!(stats.overall.passed, 1);
        assert_eq!(stats.overall.failed, 2);
        assert_eq!(stats.workers, 3);

        let sig = &stats.failures["a.spec.js"]["checkout"]["Timeout Xms exceeded"];
        assert_eq!(sig.count, 2);
        assert_eq!(sig.traces.len(), 1);

        // Window covers the replayed events, not the replay itself
        assert_eq!(stats.start_time, Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + Duration::milliseconds(800)));
        assert_eq!(stats.end_time, Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 9).unwrap()));
    }

    #[tokio::test]
    async fn test_empty_input() {
        let recorder = Recorder::new(5, USER_STEP_CATEGORY, Utc::now());
        let (stats, skipped) = record_ndjson("".as_bytes(), &boundary(), recorder).await.unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(stats.overall.total, 0);
        assert!(stats.end_time.is_some());
    }

    #[tokio::test]
    async fn test_worker_pool_records_everything() {
        let mut recorder = Recorder::new(4, USER_STEP_CATEGORY, Utc::now());
        for i in 0..200 {
            let status = if i % 5 == 0 { TestStatus::Failed } else { TestStatus::Passed };
            let file = format!("spec-{}.spec.js", i % 7);
            recorder.submit(TestOutcomeEvent::new(file, "t", status)).await.unwrap();
        }
        let stats = recorder.finish().await.unwrap();
        assert_eq!(stats.overall.total, 200);
        assert_eq!(stats.overall.failed, 40);
        assert_eq!(stats.spec_stats.len(), 7);
        assert_eq!(stats.failure_count(), 40);
        assert!(stats.is_consistent());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_replay_keeps_input_order() {
        let mut input = String::new();
        for i in 0..40 {
            input.push_str(&format!(
                r#"{{"id":"t{i}","location":{{"file":"spec-{i}.spec.js"}},"status":"failed","duration":{d},"completedAt":"2024-05-01T10:00:00Z","error":{{"message":"boom"}},"steps":[{{"title":"step-{i}","category":"test.step","error":{{"message":"boom"}}}}],"attachments":[{{"name":"trace","path":"test-results/{i}/trace.zip"}}]}}"#,
                i = i,
                d = 1000 - i * 20,
            ));
            input.push('\n');
        }
        let expected: Vec<String> = (0..40).map(|i| format!("spec-{}.spec.js", i)).collect();

        for _ in 0..5 {
            let recorder = Recorder::new(4, USER_STEP_CATEGORY, Utc::now());
            let (stats, _) = record_ndjson(input.as_bytes(), &boundary(), recorder).await.unwrap();
            let specs: Vec<String> = stats.spec_stats.keys().cloned().collect();
            let failures: Vec<String> = stats.failures.keys().cloned().collect();
            let steps: Vec<String> = stats.overall.step_stats.keys().cloned().collect();
            assert_eq!(specs, expected);
            assert_eq!(failures, expected);
            assert_eq!(steps[0], "step-0");
            assert_eq!(steps[39], "step-39");
        }
    }

    #[tokio::test]
    async fn test_out_of_range_durations_do_not_abort() {
        let input = concat!(
            r#"{"status":"passed","duration":1e18}"#,
            "\n",
            r#"{"status":"passed","duration":1e19,"startTime":"2024-01-01T00:00:00Z"}"#,
            "\n",
            r#"{"status":"failed","duration":"fast","location":{"file":"a.spec.js"}}"#,
            "\n",
        );
        let recorder = Recorder::new(2, USER_STEP_CATEGORY, Utc::now());
        let (stats, skipped) = record_ndjson(input.as_bytes(), &boundary(), recorder).await.unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(stats.overall.total, 3);
        assert_eq!(stats.overall.failed, 1);
        assert_eq!(stats.overall.test_durations, vec![0, 0, 0]);
        assert_eq!(stats.spec_stats["a.spec.js"].total, 1);
    }

    #[test]
    fn test_window_survives_huge_durations() {
        let mut window = RunWindow::default();
        let mut event = TestOutcomeEvent::new("a.spec.js", "t", TestStatus::Passed);
        event.duration_ms = u64::MAX;
        window.observe(&event);
        assert_eq!(window.first_start, Some(event.completed_at));

        event.duration_ms = i64::MAX as u64;
        window.observe(&event);
        assert_eq!(window.first_start, Some(event.completed_at));
    }

    #[test]
    fn test_resolve_workers() {
        let config = FunnelConfig::default();
        assert_eq!(resolve_workers(None, None, &config).unwrap(), 5);
        assert_eq!(resolve_workers(None, Some(2), &config).unwrap(), 2);
        assert_eq!(resolve_workers(Some(8), Some(2), &config).unwrap(), 8);
        assert!(resolve_workers(Some(0), None, &config).is_err());
    }
}
