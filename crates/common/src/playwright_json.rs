//! Import of Playwright JSON reports
//!
//! `npx playwright test --reporter=json` writes one document for the whole
//! run. Each test result in it becomes one [`RawTestEvent`], so imported runs
//! go through the same boundary as streamed events.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::aggregator::USER_STEP_CATEGORY;
use crate::error::{Error, Result};
use crate::event::{RawAttachment, RawError, RawLocation, RawStep, RawTestEvent, TestStatus};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PwReport {
    config: PwConfig,
    suites: Vec<PwSuite>,
    stats: PwStats,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PwConfig {
    workers: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PwStats {
    start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PwSuite {
    file: Option<String>,
    specs: Vec<PwSpec>,
    suites: Vec<PwSuite>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PwSpec {
    id: Option<String>,
    title: Option<String>,
    file: Option<String>,
    tests: Vec<PwTest>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PwTest {
    results: Vec<PwResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PwResult {
    status: Option<TestStatus>,
    duration: Option<f64>,
    start_time: Option<DateTime<Utc>>,
    error: Option<PwError>,
    steps: Vec<PwStep>,
    attachments: Vec<RawAttachment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PwError {
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PwStep {
    title: Option<String>,
    category: Option<String>,
    error: Option<PwError>,
    steps: Vec<PwStep>,
}

/// Events and run metadata read from a Playwright JSON report
#[derive(Debug, Default)]
pub struct ImportedRun {
    pub start_time: Option<DateTime<Utc>>,
    pub workers: Option<usize>,
    pub events: Vec<RawTestEvent>,
}

/// Parse a Playwright JSON report document.
pub fn import_report(json: &str) -> Result<ImportedRun> {
    let report: PwReport =
        serde_json::from_str(json).map_err(|e| Error::Import(format!("not a Playwright JSON report: {}", e)))?;

    let mut events = Vec::new();
    for suite in &report.suites {
        collect_suite(suite, None, &mut events);
    }

    Ok(ImportedRun {
        start_time: report.stats.start_time,
        workers: report.config.workers,
        events,
    })
}

fn collect_suite(suite: &PwSuite, parent_file: Option<&str>, out: &mut Vec<RawTestEvent>) {
    let file = suite.file.as_deref().or(parent_file);

    for spec in &suite.specs {
        let spec_file = spec.file.as_deref().or(file);
        for test in &spec.tests {
            for result in &test.results {
                out.push(RawTestEvent {
                    id: spec.id.clone(),
                    title: spec.title.clone(),
                    location: Some(RawLocation {
                        file: spec_file.map(str::to_string),
                    }),
                    status: result.status,
                    duration: result.duration,
                    start_time: result.start_time,
                    completed_at: None,
                    error: result.error.as_ref().map(|e| RawError::Detailed {
                        message: e.message.clone(),
                    }),
                    steps: result.steps.iter().map(convert_step).collect(),
                    attachments: result.attachments.clone(),
                });
            }
        }
    }

    for child in &suite.suites {
        collect_suite(child, file, out);
    }
}

// The JSON reporter only serializes user steps and drops their category
fn convert_step(step: &PwStep) -> RawStep {
    RawStep {
        title: step.title.clone(),
        category: Some(
            step.category
                .clone()
                .unwrap_or_else(|| USER_STEP_CATEGORY.to_string()),
        ),
        error: step.error.as_ref().map(|e| RawError::Detailed {
            message: e.message.clone(),
        }),
        steps: step.steps.iter().map(convert_step).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBoundary;

    const REPORT: &str = r#"{
      "config": { "workers": 5 },
      "suites": [{
        "title": "checkout.spec.js",
        "file": "checkout.spec.js",
        "specs": [],
        "suites": [{
          "title": "Checkout funnel",
          "specs": [{
            "id": "spec-1",
            "title": "completes purchase",
            "tests": [{
              "results": [
                {
                  "status": "failed",
                  "duration": 5120,
                  "startTime": "2024-05-01T10:00:00.000Z",
                  "error": { "message": "Timeout 5000ms exceeded." },
                  "steps": [
                    { "title": "add to cart", "duration": 900 },
                    { "title": "place order", "error": { "message": "Timeout 5000ms exceeded." } }
                  ],
                  "attachments": [
                    { "name": "trace", "contentType": "application/zip", "path": "test-results/checkout/trace.zip" }
                  ]
                },
                { "status": "passed", "duration": 3000, "startTime": "2024-05-01T10:00:06.000Z" }
              ]
            }]
          }]
        }]
      }],
      "stats": { "startTime": "2024-05-01T09:59:59.000Z", "duration": 7000 }
    }"#;

    #[test]
    fn test_import_nested_suites() {
        let run = import_report(REPORT).unwrap();
        assert_eq!(run.workers, Some(5));
        assert!(run.start_time.is_some());
        assert_eq!(run.events.len(), 2);

        let boundary = EventBoundary::new(None, "trace");
        let events: Vec<_> = run.events.into_iter().map(|e| boundary.accept(e)).collect();

        let failed = &events[0];
        assert_eq!(failed.file, "checkout.spec.js");
        assert_eq!(failed.status, TestStatus::Failed);
        assert_eq!(failed.steps.len(), 2);
        assert!(failed.steps.iter().all(|s| s.category == USER_STEP_CATEGORY));
        assert_eq!(failed.trace.as_deref(), Some("test-results/checkout/trace.zip"));
        assert_eq!(events[1].status, TestStatus::Passed);
    }

    #[test]
    fn test_rejects_non_report() {
        assert!(matches!(import_report("[1, 2]"), Err(Error::Import(_))));
    }
}
