//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use funnel_common::RunStatistics;
use funnel_web::view::kpis;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<Cell>;
}

/// KPIs for one scope of a run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeRow {
    pub scope: String,
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub throughput_per_min: f64,
    pub top_failing_step: Option<String>,
}

impl TableDisplay for ScopeRow {
    fn headers() -> Vec<&'static str> {
        vec![
            "Scope",
            "Total",
            "Passed",
            "Failed",
            "Skipped",
            "Success",
            "Avg Duration",
            "Throughput",
            "Top Failing Step",
        ]
    }

    fn row(&self) -> Vec<Cell> {
        let failed = Cell::new(self.failed);
        vec![
            Cell::new(&self.scope),
            Cell::new(self.total),
            Cell::new(self.passed).fg(Color::Green),
            if self.failed > 0 { failed.fg(Color::Red) } else { failed },
            Cell::new(self.skipped),
            Cell::new(format!("{:.1}%", self.success_rate)),
            Cell::new(format!("{:.0}ms", self.avg_duration_ms)),
            Cell::new(format!("{:.1}/min", self.throughput_per_min)),
            Cell::new(self.top_failing_step.as_deref().unwrap_or("-")),
        ]
    }
}

/// One row per scope: the whole run first, then each spec in first-seen order.
pub fn scope_rows(stats: &RunStatistics) -> Vec<ScopeRow> {
    let minutes = stats
        .wall_clock()
        .map(|d| d.num_milliseconds() as f64 / 60_000.0)
        .unwrap_or(0.0);

    std::iter::once(("All specs", &stats.overall))
        .chain(stats.spec_stats.iter().map(|(file, scope)| (file.as_str(), scope)))
        .map(|(name, scope)| {
            let k = kpis(scope, minutes);
            ScopeRow {
                scope: name.to_string(),
                total: k.total,
                passed: k.passed,
                failed: k.failed,
                skipped: k.skipped,
                success_rate: k.success_rate,
                avg_duration_ms: k.avg_duration_ms,
                throughput_per_min: k.throughput_per_min,
                top_failing_step: k.top_failing_step.map(|t| format!("{} ({}x)", t.title, t.failed)),
            }
        })
        .collect()
}

/// One failure signature, flattened out of the failure index
#[derive(Debug, Clone, Serialize)]
pub struct FailureRow {
    pub spec: String,
    pub step: String,
    pub signature: String,
    pub count: u64,
    pub traces: usize,
}

impl TableDisplay for FailureRow {
    fn headers() -> Vec<&'static str> {
        vec!["Spec", "Step", "Signature", "Count", "Traces"]
    }

    fn row(&self) -> Vec<Cell> {
        vec![
            Cell::new(&self.spec),
            Cell::new(&self.step),
            Cell::new(&self.signature).fg(Color::Yellow),
            Cell::new(self.count).fg(Color::Red),
            Cell::new(self.traces),
        ]
    }
}

pub fn failure_rows(stats: &RunStatistics) -> Vec<FailureRow> {
    let mut rows = Vec::new();
    for (spec, steps) in &stats.failures {
        for (step, signatures) in steps {
            for (signature, group) in signatures {
                rows.push(FailureRow {
                    spec: spec.clone(),
                    step: step.clone(),
                    signature: signature.clone(),
                    count: group.count,
                    traces: group.traces.len(),
                });
            }
        }
    }
    rows
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("No items found.");
                return;
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
    }
}

/// End-of-run report printed by `funnel record`
pub fn print_run_summary(stats: &RunStatistics, snapshot: &std::path::Path) {
    println!("\n📊 Funnel Test Results:");
    println!("   Total: {}", stats.overall.total);
    println!("   Passed: {}", stats.overall.passed.to_string().green());
    let failed = stats.overall.failed.to_string();
    if stats.overall.failed > 0 {
        println!("   Failed: {}", failed.red());
    } else {
        println!("   Failed: {}", failed);
    }
    if stats.overall.skipped > 0 {
        println!("   Skipped: {}", stats.overall.skipped.to_string().yellow());
    }
    println!("\n📁 Results saved to {}", snapshot.display());
    println!("   Run '{}' to view dashboard\n", "funnel serve".bold());
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✅".green(), message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message.yellow());
}

#[cfg(test)]
mod tests {
    use super::*;
    use funnel_common::{Aggregator, StepRecord, TestOutcomeEvent, TestStatus, USER_STEP_CATEGORY};

    fn stats() -> RunStatistics {
        let agg = Aggregator::new(2, USER_STEP_CATEGORY);
        agg.record_test(&TestOutcomeEvent::new("a.spec.js", "ok", TestStatus::Passed));
        let mut failed = TestOutcomeEvent::new("b.spec.js", "pay", TestStatus::Failed);
        failed.steps = vec![StepRecord::new("pay", USER_STEP_CATEGORY).with_error("Timeout 300ms exceeded")];
        failed.error = Some("Timeout 300ms exceeded".to_string());
        agg.record_test(&failed);
        agg.finalize()
    }

    #[test]
    fn test_scope_rows() {
        let rows = scope_rows(&stats());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].scope, "All specs");
        assert_eq!(rows[0].total, 2);
        assert_eq!(rows[1].scope, "a.spec.js");
        assert_eq!(rows[2].top_failing_step.as_deref(), Some("pay (1x)"));
        assert_eq!(rows[0].row().len(), ScopeRow::headers().len());
    }

    #[test]
    fn test_failure_rows() {
        let rows = failure_rows(&stats());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].spec, "b.spec.js");
        assert_eq!(rows[0].signature, "Timeout Xms exceeded");
        assert_eq!(rows[0].traces, 0);
    }
}
