//! Test outcome events
//!
//! Runners emit loosely shaped JSON. [`RawTestEvent`] accepts that shape with
//! every field optional; [`EventBoundary::accept`] is the only place where
//! missing or malformed fields are replaced by defaults, so the aggregator
//! only ever sees a fully populated [`TestOutcomeEvent`].

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::locate;

/// Spec name used when the runner did not report a source file
pub const UNKNOWN_FILE: &str = "unknown";

/// Title used when the runner did not report one
pub const UNTITLED_TEST: &str = "Untitled test";

/// Attachment name that carries the execution trace
pub const DEFAULT_TRACE_ATTACHMENT: &str = "trace";

/// Longest duration taken at face value (one week); longer ones are recorded as 0
pub const MAX_DURATION_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Final status of a test as reported by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestStatus {
    Passed,
    Failed,
    #[serde(alias = "timed-out", alias = "timedout")]
    TimedOut,
    /// Skipped, interrupted or anything else the runner invents
    #[serde(other)]
    Other,
}

impl TestStatus {
    /// Failed and timed-out tests both count as failures.
    pub fn is_failure(self) -> bool {
        matches!(self, TestStatus::Failed | TestStatus::TimedOut)
    }
}

impl Default for TestStatus {
    fn default() -> Self {
        Self::Other
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "passed"),
            TestStatus::Failed => write!(f, "failed"),
            TestStatus::TimedOut => write!(f, "timedOut"),
            TestStatus::Other => write!(f, "other"),
        }
    }
}

// ============================================================================
// Raw wire shape
// ============================================================================

/// Deserialize a field, treating a value of the wrong type as absent.
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).ok())
}

/// Deserialize a list, dropping entries of the wrong type. A non-list is empty.
fn lenient_list<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| T::deserialize(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// Error payload as emitted by the runner: either a bare string or an object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawError {
    Message(String),
    Detailed {
        #[serde(default, deserialize_with = "lenient")]
        message: Option<String>,
    },
}

impl RawError {
    fn into_message(self) -> Option<String> {
        match self {
            RawError::Message(m) => Some(m),
            RawError::Detailed { message } => message,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawLocation {
    #[serde(deserialize_with = "lenient")]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawStep {
    #[serde(deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub category: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub error: Option<RawError>,
    #[serde(deserialize_with = "lenient_list")]
    pub steps: Vec<RawStep>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawAttachment {
    #[serde(deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub path: Option<String>,
}

/// One completed test, exactly as the runner reported it.
///
/// A field of the wrong type reads as absent, so a test with one bad field
/// is still counted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawTestEvent {
    #[serde(deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub location: Option<RawLocation>,
    #[serde(deserialize_with = "lenient")]
    pub status: Option<TestStatus>,
    #[serde(deserialize_with = "lenient")]
    pub duration: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient")]
    pub error: Option<RawError>,
    #[serde(deserialize_with = "lenient_list")]
    pub steps: Vec<RawStep>,
    #[serde(deserialize_with = "lenient_list")]
    pub attachments: Vec<RawAttachment>,
}

// ============================================================================
// Validated shape
// ============================================================================

/// Error carried by a step. The runner may attach an error without a message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StepError {
    pub message: Option<String>,
}

/// A step node in a test's step tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub title: String,
    pub category: String,
    pub error: Option<StepError>,
    pub steps: Vec<StepRecord>,
}

impl StepRecord {
    /// Step without error or children, mostly useful for building fixtures.
    pub fn new(title: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            category: category.into(),
            error: None,
            steps: Vec::new(),
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(StepError {
            message: Some(message.into()),
        });
        self
    }

    pub fn with_children(mut self, steps: Vec<StepRecord>) -> Self {
        self.steps = steps;
        self
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A completed test after boundary normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcomeEvent {
    pub id: String,
    pub title: String,
    /// Source file, relative to the project root
    pub file: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
    /// Failure message for the test as a whole
    pub error: Option<String>,
    pub steps: Vec<StepRecord>,
    /// Trace artifact path, relative to the project root
    pub trace: Option<String>,
}

impl TestOutcomeEvent {
    /// Minimal event, used by tests and importers that fill fields afterwards.
    pub fn new(file: impl Into<String>, title: impl Into<String>, status: TestStatus) -> Self {
        Self {
            id: String::new(),
            title: title.into(),
            file: file.into(),
            status,
            duration_ms: 0,
            completed_at: Utc::now(),
            error: None,
            steps: Vec::new(),
            trace: None,
        }
    }
}

/// Converts raw runner events into validated events
#[derive(Debug, Clone)]
pub struct EventBoundary {
    /// Absolute paths below this root are reported relative to it
    project_root: Option<PathBuf>,
    /// Name of the attachment that holds the trace file
    trace_attachment: String,
}

impl Default for EventBoundary {
    fn default() -> Self {
        Self {
            project_root: std::env::current_dir().ok(),
            trace_attachment: DEFAULT_TRACE_ATTACHMENT.to_string(),
        }
    }
}

impl EventBoundary {
    pub fn new(project_root: Option<PathBuf>, trace_attachment: impl Into<String>) -> Self {
        Self {
            project_root,
            trace_attachment: trace_attachment.into(),
        }
    }

    /// Parse one NDJSON line. Only a line that is not a JSON object is rejected.
    pub fn parse_line(&self, line: &str) -> Result<TestOutcomeEvent> {
        let value: Value = serde_json::from_str(line)?;
        if !value.is_object() {
            return Err(Error::InvalidEvent("expected a JSON object".to_string()));
        }
        let raw = RawTestEvent::deserialize(value)?;
        Ok(self.accept(raw))
    }

    /// Normalize a raw event, stamping the current instant if the runner gave none.
    pub fn accept(&self, raw: RawTestEvent) -> TestOutcomeEvent {
        self.accept_at(raw, Utc::now())
    }

    /// Normalize a raw event using `now` as the fallback completion instant.
    pub fn accept_at(&self, raw: RawTestEvent, now: DateTime<Utc>) -> TestOutcomeEvent {
        let duration_ms = match raw.duration {
            Some(d) if d.is_finite() && d > 0.0 && d <= MAX_DURATION_MS as f64 => d.round() as u64,
            _ => 0,
        };

        let completed_at = raw
            .completed_at
            .or_else(|| {
                let elapsed = Duration::milliseconds(duration_ms as i64);
                raw.start_time
                    .and_then(|start| start.checked_add_signed(elapsed))
            })
            .unwrap_or(now);

        let file = raw
            .location
            .and_then(|l| l.file)
            .filter(|f| !f.trim().is_empty())
            .map(|f| self.relativize(&f))
            .unwrap_or_else(|| UNKNOWN_FILE.to_string());

        let trace = raw
            .attachments
            .into_iter()
            .filter(|a| a.name.as_deref() == Some(self.trace_attachment.as_str()))
            .find_map(|a| a.path)
            .map(|p| self.relativize(&p));

        let steps: Vec<StepRecord> = raw.steps.into_iter().map(convert_step).collect();

        let error = raw
            .error
            .and_then(RawError::into_message)
            .or_else(|| {
                locate::find_failing_step(&steps)
                    .and_then(|s| s.error.as_ref())
                    .and_then(|e| e.message.clone())
            });

        TestOutcomeEvent {
            id: raw.id.unwrap_or_default(),
            title: raw
                .title
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNTITLED_TEST.to_string()),
            file,
            status: raw.status.unwrap_or_default(),
            duration_ms,
            completed_at,
            error,
            steps,
            trace,
        }
    }

    fn relativize(&self, path: &str) -> String {
        relativize(path, self.project_root.as_deref())
    }
}

fn convert_step(raw: RawStep) -> StepRecord {
    StepRecord {
        title: raw.title.unwrap_or_default(),
        category: raw.category.unwrap_or_default(),
        error: raw.error.map(|e| StepError {
            message: e.into_message(),
        }),
        steps: raw.steps.into_iter().map(convert_step).collect(),
    }
}

/// Express `path` relative to `root` when it is an absolute path below it.
/// Separators are normalized to `/`.
pub fn relativize(path: &str, root: Option<&Path>) -> String {
    let p = Path::new(path);
    let rel = match root {
        Some(root) if p.is_absolute() => p.strip_prefix(root).unwrap_or(p),
        _ => p,
    };
    rel.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn boundary() -> EventBoundary {
        EventBoundary::new(Some(PathBuf::from("/work/shop")), "trace")
    }

    #[test]
    fn test_parse_full_event() {
        let line = r#"{
            "id": "abc-1",
            "title": "checkout completes",
            "location": { "file": "/work/shop/tests/checkout.spec.js" },
            "status": "timedOut",
            "duration": 1234.6,
            "completedAt": "2024-05-01T10:00:00Z",
            "steps": [
                { "title": "open cart", "category": "test.step" },
                { "title": "checkout", "category": "test.step",
                  "error": { "message": "Timeout 5000ms exceeded" } }
            ],
            "attachments": [
                { "name": "screenshot", "path": "/work/shop/test-results/a/shot.png" },
                { "name": "trace", "path": "/work/shop/test-results/a/trace.zip" }
            ]
        }"#;

        let event = boundary().parse_line(line).unwrap();
        assert_eq!(event.id, "abc-1");
        assert_eq!(event.file, "tests/checkout.spec.js");
        assert_eq!(event.status, TestStatus::TimedOut);
        assert_eq!(event.duration_ms, 1235);
        assert_eq!(event.trace.as_deref(), Some("test-results/a/trace.zip"));
        assert_eq!(event.steps.len(), 2);
        assert!(event.steps[1].has_error());
        // No test-level error, so the failing step's message is used
        assert_eq!(event.error.as_deref(), Some("Timeout 5000ms exceeded"));
        assert_eq!(
            event.completed_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_missing_fields_get_defaults() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let event = boundary().accept_at(RawTestEvent::default(), now);

        assert_eq!(event.file, UNKNOWN_FILE);
        assert_eq!(event.title, UNTITLED_TEST);
        assert_eq!(event.status, TestStatus::Other);
        assert_eq!(event.duration_ms, 0);
        assert_eq!(event.completed_at, now);
        assert!(event.error.is_none());
        assert!(event.trace.is_none());
    }

    #[test]
    fn test_unknown_status_is_other() {
        let event = boundary()
            .parse_line(r#"{"status": "skipped", "duration": -5}"#)
            .unwrap();
        assert_eq!(event.status, TestStatus::Other);
        assert_eq!(event.duration_ms, 0);
    }

    #[test]
    fn test_completion_derived_from_start_time() {
        let event = boundary()
            .parse_line(r#"{"status": "passed", "duration": 1500, "startTime": "2024-05-01T10:00:00Z"}"#)
            .unwrap();
        assert_eq!(
            event.completed_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 1).unwrap() + Duration::milliseconds(500)
        );
    }

    #[test]
    fn test_string_errors_and_message_less_errors() {
        let event = boundary()
            .parse_line(
                r#"{"status": "failed", "error": "boom",
                    "steps": [{"title": "s", "error": {}}]}"#,
            )
            .unwrap();
        assert_eq!(event.error.as_deref(), Some("boom"));
        assert!(event.steps[0].has_error());
        assert_eq!(event.steps[0].error.as_ref().unwrap().message, None);
    }

    #[test]
    fn test_out_of_range_duration_is_zero() {
        for duration in ["1e18", "1e19", "604800001"] {
            let line = format!(
                r#"{{"status": "passed", "duration": {}, "startTime": "2024-01-01T00:00:00Z"}}"#,
                duration
            );
            let event = boundary().parse_line(&line).unwrap();
            assert_eq!(event.duration_ms, 0, "duration {}", duration);
            assert_eq!(event.completed_at, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        }

        let event = boundary()
            .parse_line(r#"{"status": "passed", "duration": 604800000}"#)
            .unwrap();
        assert_eq!(event.duration_ms, MAX_DURATION_MS);
    }

    #[test]
    fn test_wrong_field_types_read_as_absent() {
        let event = boundary()
            .parse_line(r#"{"status": "failed", "duration": "fast", "location": {"file": "a.spec.js"}}"#)
            .unwrap();
        assert_eq!(event.status, TestStatus::Failed);
        assert_eq!(event.duration_ms, 0);
        assert_eq!(event.file, "a.spec.js");

        let event = boundary()
            .parse_line(
                r#"{"status": 3, "title": ["x"], "completedAt": 17, "steps": {},
                    "attachments": [7, {"name": "trace", "path": "t/trace.zip"}],
                    "location": "a.spec.js"}"#,
            )
            .unwrap();
        assert_eq!(event.status, TestStatus::Other);
        assert_eq!(event.title, UNTITLED_TEST);
        assert_eq!(event.file, UNKNOWN_FILE);
        assert!(event.steps.is_empty());
        assert_eq!(event.trace.as_deref(), Some("t/trace.zip"));

        let event = boundary()
            .parse_line(r#"{"status": "failed", "steps": [{"title": "pay", "error": {"message": 5}}, "junk"]}"#)
            .unwrap();
        assert_eq!(event.steps.len(), 1);
        assert!(event.steps[0].has_error());
    }

    #[test]
    fn test_non_object_line_rejected() {
        assert!(matches!(boundary().parse_line("[1, 2]"), Err(Error::InvalidEvent(_))));
        assert!(matches!(boundary().parse_line("42"), Err(Error::InvalidEvent(_))));
        assert!(matches!(boundary().parse_line("not json"), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_relativize_outside_root_is_kept() {
        assert_eq!(relativize("/elsewhere/a.js", Some(Path::new("/work"))), "/elsewhere/a.js");
        assert_eq!(relativize("tests/a.js", Some(Path::new("/work"))), "tests/a.js");
    }
}
