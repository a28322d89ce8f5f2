//! Histogram builders for the dashboard charts
//!
//! Both builders are pure: they borrow their samples and return new series.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::stats::{Outcome, TimelineSample};

/// Width of a timeline window
pub const TIMELINE_BUCKET_MS: i64 = 1000;

/// Upper bound on duration buckets
pub const MAX_DURATION_BUCKETS: usize = 10;

/// Span assumed when every duration is identical
pub const DEFAULT_SPAN_MS: u64 = 1000;

/// Aligned per-window series for the timeline chart
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimelineSeries {
    /// Seconds since run start, e.g. `"12s"`
    pub labels: Vec<String>,
    pub passed: Vec<u64>,
    pub failed: Vec<u64>,
    /// Running total of completed tests
    pub cumulative: Vec<u64>,
}

impl TimelineSeries {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Bucket completions into 1-second windows relative to `start`.
///
/// Only non-empty windows are emitted, in time order. Samples before
/// `start` land in negative windows rather than being dropped.
pub fn timeline_buckets(start: DateTime<Utc>, samples: &[TimelineSample]) -> TimelineSeries {
    let mut windows: BTreeMap<i64, (u64, u64)> = BTreeMap::new();
    for sample in samples {
        let offset_ms = (sample.timestamp - start).num_milliseconds();
        let window = windows.entry(offset_ms.div_euclid(TIMELINE_BUCKET_MS)).or_default();
        match sample.status {
            Outcome::Passed => window.0 += 1,
            Outcome::Failed => window.1 += 1,
        }
    }

    let mut series = TimelineSeries::default();
    let mut running = 0;
    for (second, (passed, failed)) in windows {
        running += passed + failed;
        series.labels.push(format!("{}s", second));
        series.passed.push(passed);
        series.failed.push(failed);
        series.cumulative.push(running);
    }
    series
}

/// One bar of the duration distribution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationBucket {
    pub label: String,
    pub lower_ms: f64,
    pub upper_ms: f64,
    pub count: u64,
}

/// Partition durations into at most ten equal-width buckets over `[min, max]`.
pub fn duration_distribution(durations: &[u64]) -> Vec<DurationBucket> {
    let (Some(&min), Some(&max)) = (durations.iter().min(), durations.iter().max()) else {
        return Vec::new();
    };

    let span = if max == min { DEFAULT_SPAN_MS } else { max - min };
    let bucket_count = durations.len().min(MAX_DURATION_BUCKETS);
    let width = span as f64 / bucket_count as f64;

    let mut buckets: Vec<DurationBucket> = (0..bucket_count)
        .map(|i| {
            let lower = min as f64 + width * i as f64;
            let upper = lower + width;
            DurationBucket {
                label: format_range(lower, upper),
                lower_ms: lower,
                upper_ms: upper,
                count: 0,
            }
        })
        .collect();

    for &d in durations {
        let idx = ((d - min) as f64 / width).floor() as usize;
        buckets[idx.min(bucket_count - 1)].count += 1;
    }
    buckets
}

fn format_range(lower_ms: f64, upper_ms: f64) -> String {
    if upper_ms < 1000.0 {
        format!("{:.0}ms–{:.0}ms", lower_ms, upper_ms)
    } else {
        format!("{:.1}s–{:.1}s", lower_ms / 1000.0, upper_ms / 1000.0)
    }
}
