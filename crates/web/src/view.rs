//! Dashboard view model
//!
//! [`build_view`] turns run statistics into plain data: KPIs, chart series
//! and the failure tree. It does no formatting and no I/O; a
//! [`DashboardTemplate`](crate::template::DashboardTemplate) turns the view
//! into markup.

use chrono::{DateTime, Utc};
use serde::Serialize;

use funnel_common::config::ViewerConfig;
use funnel_common::{
    duration_distribution, timeline_buckets, FunnelConfig, RunStatistics, ScopeStats, ViewerMode,
};

/// URL prefix the artifact root is served under
pub const ARTIFACT_MOUNT: &str = "test-results";

/// Inputs to the renderer that are not part of the run statistics
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub title: String,
    pub artifact_mount: String,
    /// Leading directory of recorded trace paths that the mount stands for
    pub artifact_prefix: String,
    pub viewer: ViewerSettings,
    pub generated_at: DateTime<Utc>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            title: "Funnel Load Test Dashboard".to_string(),
            artifact_mount: ARTIFACT_MOUNT.to_string(),
            artifact_prefix: ARTIFACT_MOUNT.to_string(),
            viewer: ViewerSettings::from(&ViewerConfig::default()),
            generated_at: Utc::now(),
        }
    }
}

impl RenderOptions {
    pub fn from_config(config: &FunnelConfig) -> Self {
        Self {
            viewer: ViewerSettings::from(&config.viewer),
            artifact_prefix: config.artifact_prefix(),
            ..Default::default()
        }
    }
}

/// What the page's trace buttons do
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerSettings {
    pub mode: ViewerMode,
    pub remote_url: String,
    /// Origin prepended to trace links in remote mode; the page origin when unset
    pub public_base_url: Option<String>,
}

impl From<&ViewerConfig> for ViewerSettings {
    fn from(config: &ViewerConfig) -> Self {
        Self {
            mode: config.mode,
            remote_url: config.remote_url.clone(),
            public_base_url: config.public_base_url.clone(),
        }
    }
}

/// Headline numbers for one scope
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Kpis {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Percent of tests that passed
    pub success_rate: f64,
    /// Completed tests per minute of run wall clock
    pub throughput_per_min: f64,
    pub avg_duration_ms: f64,
    pub top_failing_step: Option<TopStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopStep {
    pub title: String,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Primary,
    Secondary,
}

/// What a series counts; the template picks colors from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesRole {
    Passed,
    Failed,
    Cumulative,
    Count,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub label: String,
    pub role: SeriesRole,
    pub kind: ChartKind,
    pub axis: Axis,
    pub data: Vec<u64>,
}

impl Dataset {
    fn bar(label: &str, role: SeriesRole, data: Vec<u64>) -> Self {
        Self {
            label: label.to_string(),
            role,
            kind: ChartKind::Bar,
            axis: Axis::Primary,
            data,
        }
    }

    fn on(mut self, axis: Axis) -> Self {
        self.axis = axis;
        self
    }
}

/// Chart-library-neutral description of one chart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
    pub stacked: bool,
}

impl ChartSpec {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn has_secondary_axis(&self) -> bool {
        self.datasets.iter().any(|d| d.axis == Axis::Secondary)
    }
}

/// KPIs and charts for the whole run or one spec file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeView {
    /// Stable DOM id
    pub id: String,
    pub name: String,
    pub kpis: Kpis,
    pub steps: ChartSpec,
    pub timeline: ChartSpec,
    pub durations: ChartSpec,
}

impl ScopeView {
    pub fn charts(&self) -> [(&'static str, &ChartSpec); 3] {
        [
            ("steps", &self.steps),
            ("timeline", &self.timeline),
            ("durations", &self.durations),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceLink {
    /// 1-based position within its signature
    pub run: usize,
    pub title: String,
    pub href: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignatureNode {
    pub signature: String,
    pub count: u64,
    pub traces: Vec<TraceLink>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepNode {
    pub step: String,
    pub count: u64,
    pub signatures: Vec<SignatureNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecNode {
    pub spec: String,
    pub count: u64,
    pub steps: Vec<StepNode>,
}

/// Everything a template needs to draw the dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub workers: usize,
    pub overall: ScopeView,
    pub specs: Vec<ScopeView>,
    pub failures: Vec<SpecNode>,
    pub viewer: ViewerSettings,
}

impl DashboardView {
    /// No test was recorded
    pub fn is_empty(&self) -> bool {
        self.overall.kpis.total == 0
    }

    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Build the dashboard view for a finished run.
pub fn build_view(stats: &RunStatistics, options: &RenderOptions) -> DashboardView {
    let minutes = stats
        .wall_clock()
        .map(|d| d.num_milliseconds() as f64 / 60_000.0)
        .unwrap_or(0.0);
    let origin = timeline_origin(stats, options.generated_at);

    let overall = scope_view("scope-overall", "All specs", &stats.overall, minutes, origin);
    let specs = stats
        .spec_stats
        .iter()
        .enumerate()
        .map(|(i, (file, scope))| scope_view(&format!("scope-spec-{}", i), file, scope, minutes, origin))
        .collect();

    DashboardView {
        title: options.title.clone(),
        generated_at: options.generated_at,
        start_time: stats.start_time,
        end_time: stats.end_time,
        workers: stats.workers,
        overall,
        specs,
        failures: failure_tree(stats, options),
        viewer: options.viewer.clone(),
    }
}

fn timeline_origin(stats: &RunStatistics, fallback: DateTime<Utc>) -> DateTime<Utc> {
    stats
        .start_time
        .or_else(|| stats.overall.test_timeline.iter().map(|s| s.timestamp).min())
        .unwrap_or(fallback)
}

fn scope_view(id: &str, name: &str, scope: &ScopeStats, minutes: f64, origin: DateTime<Utc>) -> ScopeView {
    ScopeView {
        id: id.to_string(),
        name: name.to_string(),
        kpis: kpis(scope, minutes),
        steps: step_chart(scope),
        timeline: timeline_chart(scope, origin),
        durations: duration_chart(scope),
    }
}

/// Derive the KPI block for one scope; `minutes` is the run wall clock.
pub fn kpis(scope: &ScopeStats, minutes: f64) -> Kpis {
    let success_rate = if scope.total == 0 {
        0.0
    } else {
        scope.passed as f64 / scope.total as f64 * 100.0
    };
    let throughput_per_min = if minutes > 0.0 {
        scope.total as f64 / minutes
    } else {
        0.0
    };

    // Strict comparison keeps the first-seen step on ties
    let mut top: Option<TopStep> = None;
    for (title, counter) in &scope.step_stats {
        if counter.failed > top.as_ref().map_or(0, |t| t.failed) {
            top = Some(TopStep {
                title: title.clone(),
                failed: counter.failed,
            });
        }
    }

    Kpis {
        total: scope.total,
        passed: scope.passed,
        failed: scope.failed,
        skipped: scope.skipped,
        success_rate,
        throughput_per_min,
        avg_duration_ms: scope.average_duration_ms(),
        top_failing_step: top,
    }
}

fn step_chart(scope: &ScopeStats) -> ChartSpec {
    let labels = scope.step_stats.keys().cloned().collect();
    let passed = scope.step_stats.values().map(|c| c.passed).collect();
    let failed = scope.step_stats.values().map(|c| c.failed).collect();
    ChartSpec {
        kind: ChartKind::Bar,
        labels,
        datasets: vec![
            Dataset::bar("Passed", SeriesRole::Passed, passed),
            Dataset::bar("Failed", SeriesRole::Failed, failed),
        ],
        stacked: true,
    }
}

fn timeline_chart(scope: &ScopeStats, origin: DateTime<Utc>) -> ChartSpec {
    let series = timeline_buckets(origin, &scope.test_timeline);
    ChartSpec {
        kind: ChartKind::Bar,
        labels: series.labels,
        datasets: vec![
            Dataset {
                label: "Completed".to_string(),
                role: SeriesRole::Cumulative,
                kind: ChartKind::Line,
                axis: Axis::Primary,
                data: series.cumulative,
            },
            Dataset::bar("Passed", SeriesRole::Passed, series.passed).on(Axis::Secondary),
            Dataset::bar("Failed", SeriesRole::Failed, series.failed).on(Axis::Secondary),
        ],
        stacked: false,
    }
}

fn duration_chart(scope: &ScopeStats) -> ChartSpec {
    let buckets = duration_distribution(&scope.test_durations);
    ChartSpec {
        kind: ChartKind::Bar,
        labels: buckets.iter().map(|b| b.label.clone()).collect(),
        datasets: vec![Dataset::bar(
            "Tests",
            SeriesRole::Count,
            buckets.iter().map(|b| b.count).collect(),
        )],
        stacked: false,
    }
}

fn failure_tree(stats: &RunStatistics, options: &RenderOptions) -> Vec<SpecNode> {
    stats
        .failures
        .iter()
        .map(|(spec, steps)| {
            let steps: Vec<StepNode> = steps
                .iter()
                .map(|(step, signatures)| {
                    let signatures: Vec<SignatureNode> = signatures
                        .iter()
                        .map(|(signature, group)| SignatureNode {
                            signature: signature.clone(),
                            count: group.count,
                            traces: group
                                .traces
                                .iter()
                                .enumerate()
                                .map(|(i, t)| TraceLink {
                                    run: i + 1,
                                    title: t.title.clone(),
                                    href: trace_href(
                                        &options.artifact_mount,
                                        &options.artifact_prefix,
                                        &t.trace,
                                    ),
                                    timestamp: t.timestamp,
                                })
                                .collect(),
                        })
                        .collect();
                    StepNode {
                        step: step.clone(),
                        count: signatures.iter().map(|s| s.count).sum(),
                        signatures,
                    }
                })
                .collect();
            SpecNode {
                spec: spec.clone(),
                count: steps.iter().map(|s| s.count).sum(),
                steps,
            }
        })
        .collect()
}

/// Link under the artifact mount for a trace path recorded by the reporter.
///
/// `prefix` is the artifact root relative to the project root. With the
/// default layout `test-results/a/trace.zip` and `a/trace.zip` both map to
/// `/test-results/a/trace.zip`; with `prefix = "out/traces"`,
/// `out/traces/a/trace.zip` maps there too.
pub fn trace_href(mount: &str, prefix: &str, trace: &str) -> String {
    let mount = mount.trim_matches('/');
    let prefix = prefix.trim_matches('/');
    let rel = trace.trim_start_matches('/');
    let rel = rel
        .strip_prefix(prefix)
        .filter(|_| !prefix.is_empty())
        .and_then(|r| r.strip_prefix('/'))
        .unwrap_or(rel);
    format!("/{}/{}", mount, rel)
}
