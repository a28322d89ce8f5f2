//! Funnel Common Library
//!
//! Turns a stream of per-test outcome events into run statistics:
//! - Validated input events ([`event`]) and Playwright JSON import
//! - Failure signatures ([`normalize`]) and failing-step lookup ([`locate`])
//! - The concurrent [`Aggregator`] and the [`RunStatistics`] it produces
//! - Histogram builders for the dashboard charts
//! - The persisted JSON snapshot and configuration

pub mod aggregator;
pub mod config;
pub mod error;
pub mod event;
pub mod histogram;
pub mod locate;
pub mod normalize;
pub mod playwright_json;
pub mod snapshot;
pub mod stats;

// Re-export commonly used types
pub use aggregator::{Aggregator, PreparedTest, USER_STEP_CATEGORY};
pub use config::{FunnelConfig, ViewerMode, CONFIG_FILE};
pub use error::{Error, Result};
pub use event::{EventBoundary, RawTestEvent, StepRecord, TestOutcomeEvent, TestStatus};
pub use histogram::{duration_distribution, timeline_buckets, DurationBucket, TimelineSeries};
pub use locate::{failing_step_title, UNKNOWN_STEP};
pub use normalize::{normalize_error, UNKNOWN_ERROR};
pub use snapshot::{SnapshotStore, SNAPSHOT_FILE};
pub use stats::{FailureGroup, FailureIndex, Outcome, RunStatistics, ScopeStats, StepCounter, TraceRecord};

/// Funnel version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
