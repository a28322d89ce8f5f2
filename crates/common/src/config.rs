//! Funnel configuration
//!
//! Loaded from `funnel.toml` when present. Every field has a default, so an
//! empty or partial file is valid; command-line flags override file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::aggregator::USER_STEP_CATEGORY;
use crate::error::{Error, Result};
use crate::event::{relativize, EventBoundary, DEFAULT_TRACE_ATTACHMENT};
use crate::snapshot::{SnapshotStore, SNAPSHOT_FILE};

/// Default config file name
pub const CONFIG_FILE: &str = "funnel.toml";

/// Funnel configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunnelConfig {
    pub report: ReportConfig,
    pub run: RunConfig,
    pub server: ServerSettings,
    pub viewer: ViewerConfig,
    pub clean: CleanConfig,
}

/// Where reports are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub dir: PathBuf,
    pub snapshot: String,
    /// Dashboard written by the server at startup
    pub dashboard: String,
    /// Dashboard written by `render` for static hosting
    pub static_index: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("report"),
            snapshot: SNAPSHOT_FILE.to_string(),
            dashboard: "dashboard.html".to_string(),
            static_index: "index.html".to_string(),
        }
    }
}

/// Aggregation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Parallel workers used by the run; recorded in the snapshot
    pub workers: usize,
    /// Step category counted in step statistics
    pub step_category: String,
    /// Attachment name holding the trace
    pub trace_attachment: String,
    /// Paths are reported relative to this directory (cwd when unset)
    pub project_root: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            step_category: USER_STEP_CATEGORY.to_string(),
            trace_attachment: DEFAULT_TRACE_ATTACHMENT.to_string(),
            project_root: None,
        }
    }
}

/// Dashboard server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Directory holding traces and other run artifacts
    pub artifact_root: PathBuf,
    /// Kill whatever holds the port before binding
    pub reclaim_port: bool,
    pub open_browser: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            artifact_root: PathBuf::from("test-results"),
            reclaim_port: true,
            open_browser: false,
        }
    }
}

/// How traces are viewed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewerMode {
    /// Launch a viewer process next to the server
    #[default]
    Local,
    /// Hand the browser a link to a hosted viewer
    Remote,
}

impl std::fmt::Display for ViewerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewerMode::Local => write!(f, "local"),
            ViewerMode::Remote => write!(f, "remote"),
        }
    }
}

impl std::str::FromStr for ViewerMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(ViewerMode::Local),
            "remote" => Ok(ViewerMode::Remote),
            other => Err(Error::InvalidConfig(format!("unknown viewer mode: {}", other))),
        }
    }
}

/// Trace viewer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub mode: ViewerMode,
    /// Program and leading arguments; the trace path is appended
    pub command: Vec<String>,
    /// Hosted viewer page used in remote mode
    pub remote_url: String,
    /// Public origin the artifacts are reachable under in remote mode
    pub public_base_url: Option<String>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            mode: ViewerMode::Local,
            command: vec!["npx".into(), "playwright".into(), "show-trace".into()],
            remote_url: "https://trace.playwright.dev/".to_string(),
            public_base_url: None,
        }
    }
}

/// Output directories removed by `funnel clean`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanConfig {
    pub dirs: Vec<PathBuf>,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            dirs: vec![
                PathBuf::from("test-results"),
                PathBuf::from("report"),
                PathBuf::from("playwright-report"),
            ],
        }
    }
}

impl FunnelConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.run.workers == 0 {
            return Err(Error::InvalidConfig("run.workers must be at least 1".into()));
        }
        if self.viewer.mode == ViewerMode::Local && self.viewer.command.is_empty() {
            return Err(Error::InvalidConfig(
                "viewer.command must name a program in local mode".into(),
            ));
        }
        Ok(())
    }

    pub fn snapshot_store(&self) -> SnapshotStore {
        SnapshotStore::new(self.report.dir.join(&self.report.snapshot))
    }

    pub fn dashboard_path(&self) -> PathBuf {
        self.report.dir.join(&self.report.dashboard)
    }

    pub fn static_index_path(&self) -> PathBuf {
        self.report.dir.join(&self.report.static_index)
    }

    pub fn project_root(&self) -> Option<PathBuf> {
        self.run
            .project_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
    }

    pub fn event_boundary(&self) -> EventBoundary {
        EventBoundary::new(self.project_root(), self.run.trace_attachment.clone())
    }

    /// The artifact root as it appears at the start of recorded trace paths.
    pub fn artifact_prefix(&self) -> String {
        let root = self.server.artifact_root.to_string_lossy();
        let rel = relativize(&root, self.project_root().as_deref());
        rel.trim_start_matches("./").trim_matches('/').to_string()
    }
}
