//! Persisted run snapshot
//!
//! The snapshot is the only persistence boundary: the reporter writes it once
//! at the end of a run and the dashboard reads it back.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};
use crate::stats::RunStatistics;

/// Snapshot file name inside the report directory
pub const SNAPSHOT_FILE: &str = "funnel-results.json";

/// Location of a run snapshot on disk
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot stored under the default file name in `report_dir`.
    pub fn in_dir(report_dir: impl AsRef<Path>) -> Self {
        Self::new(report_dir.as_ref().join(SNAPSHOT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Write `stats`, replacing any snapshot from an earlier run.
    pub fn write(&self, stats: &RunStatistics) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        // Write atomically via temp file in the same directory
        let json = serde_json::to_vec_pretty(stats)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        info!("Results saved to {}", self.path.display());
        Ok(())
    }

    /// Read the snapshot back.
    pub fn read(&self) -> Result<RunStatistics> {
        if !self.exists() {
            return Err(Error::SnapshotMissing(self.path.clone()));
        }
        let content = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TestStatus;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_dir_and_roundtrips() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::in_dir(tmp.path().join("report"));

        let mut stats = RunStatistics::new(3, Utc::now());
        stats.overall.record(TestStatus::Passed, 120, Utc::now());
        stats.end_time = Some(Utc::now());
        store.write(&stats).unwrap();

        assert!(store.exists());
        assert_eq!(store.read().unwrap(), stats);
    }

    #[test]
    fn test_write_overwrites_previous_run() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::in_dir(tmp.path());

        let mut first = RunStatistics::new(1, Utc::now());
        for _ in 0..5 {
            first.overall.record(TestStatus::Failed, 10, Utc::now());
        }
        store.write(&first).unwrap();

        let empty = RunStatistics::new(1, Utc::now());
        store.write(&empty).unwrap();

        let read = store.read().unwrap();
        assert_eq!(read.overall.total, 0);
        assert_eq!(read.overall.failed, 0);
    }

    #[test]
    fn test_missing_snapshot() {
        let tmp = TempDir::new().unwrap();
        let err = SnapshotStore::in_dir(tmp.path()).read().unwrap_err();
        assert!(err.is_snapshot_missing());
    }
}
