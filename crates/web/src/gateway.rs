//! Trace-retrieval gateway
//!
//! Resolves a trace path sent by the dashboard against the artifact root and
//! either launches a local viewer on it or hands back a hosted-viewer link.
//! Anything that does not resolve to a file under the root is reported as
//! [`WebError::TraceNotFound`]; the gateway never returns file content.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{debug, info, warn};

use funnel_common::config::ViewerConfig;
use funnel_common::ViewerMode;

use crate::error::{Result, WebError};
use crate::view::ARTIFACT_MOUNT;

/// What happened when a trace was opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOpened {
    /// A viewer process was started next to the server
    Launched,
    /// The client should open this hosted-viewer link
    Reference { url: String },
}

/// A trace file that passed the root check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrace {
    /// Canonical path on disk
    pub path: PathBuf,
    /// Path below the artifact root, `/`-separated
    pub relative: String,
}

#[derive(Debug, Clone)]
pub struct TraceGateway {
    artifact_root: PathBuf,
    mount: String,
    mode: ViewerMode,
    command: Vec<String>,
    remote_url: String,
    public_base_url: String,
}

impl TraceGateway {
    pub fn new(artifact_root: impl Into<PathBuf>, viewer: &ViewerConfig) -> Self {
        Self {
            artifact_root: artifact_root.into(),
            mount: ARTIFACT_MOUNT.to_string(),
            mode: viewer.mode,
            command: viewer.command.clone(),
            remote_url: viewer.remote_url.clone(),
            public_base_url: viewer.public_base_url.clone().unwrap_or_default(),
        }
    }

    pub fn mode(&self) -> ViewerMode {
        self.mode
    }

    pub fn artifact_root(&self) -> &Path {
        &self.artifact_root
    }

    /// Map a requested path to a file under the artifact root.
    pub async fn resolve(&self, requested: &str) -> Result<ResolvedTrace> {
        let rel = requested.trim_start_matches('/');
        let rel = rel
            .strip_prefix(self.mount.as_str())
            .and_then(|r| r.strip_prefix('/'))
            .unwrap_or(rel);
        if rel.is_empty() || Path::new(rel).is_absolute() {
            return Err(WebError::TraceNotFound);
        }

        let root = tokio::fs::canonicalize(&self.artifact_root)
            .await
            .map_err(|_| WebError::TraceNotFound)?;
        let path = tokio::fs::canonicalize(root.join(rel))
            .await
            .map_err(|_| WebError::TraceNotFound)?;

        // Canonical form must stay under the canonical root
        let Ok(below) = path.strip_prefix(&root) else {
            warn!("Rejected trace outside artifact root: {}", requested);
            return Err(WebError::TraceNotFound);
        };
        let relative = below
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(WebError::TraceNotFound);
        }

        Ok(ResolvedTrace { path, relative })
    }

    /// Open the trace at `requested` according to the configured viewer mode.
    pub async fn open(&self, requested: &str) -> Result<TraceOpened> {
        let trace = self.resolve(requested).await?;
        match self.mode {
            ViewerMode::Local => {
                self.launch(&trace.path)?;
                Ok(TraceOpened::Launched)
            }
            ViewerMode::Remote => Ok(TraceOpened::Reference {
                url: self.reference_url(&trace.relative),
            }),
        }
    }

    /// Hosted-viewer link for a trace below the artifact root.
    pub fn reference_url(&self, relative: &str) -> String {
        let public = format!(
            "{}/{}/{}",
            self.public_base_url.trim_end_matches('/'),
            self.mount,
            relative
        );
        format!("{}?trace={}", self.remote_url, urlencoding::encode(&public))
    }

    fn launch(&self, path: &Path) -> Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(funnel_common::Error::InvalidConfig("viewer.command is empty".into()).into());
        };

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                warn!("Failed to start trace viewer {}: {}", program, e);
                WebError::Io(e)
            })?;

        info!("Opened trace viewer for {}", path.display());

        // Reap the viewer when it exits; the request does not wait for it
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("Trace viewer exited: {}", status),
                Err(e) => warn!("Trace viewer wait failed: {}", e),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("test-results");
        std::fs::create_dir_all(root.join("checkout-run1")).unwrap();
        std::fs::write(root.join("checkout-run1/trace.zip"), b"PK").unwrap();
        std::fs::write(tmp.path().join("secret.txt"), b"nope").unwrap();
        (tmp, root)
    }

    fn remote() -> ViewerConfig {
        ViewerConfig {
            mode: ViewerMode::Remote,
            public_base_url: Some("https://reports.example.com/".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resolve_with_and_without_mount() {
        let (_tmp, root) = fixture();
        let gw = TraceGateway::new(&root, &remote());

        for requested in [
            "/test-results/checkout-run1/trace.zip",
            "test-results/checkout-run1/trace.zip",
            "checkout-run1/trace.zip",
        ] {
            let trace = gw.resolve(requested).await.unwrap();
            assert_eq!(trace.relative, "checkout-run1/trace.zip");
        }
    }

    #[tokio::test]
    async fn test_rejects_outside_root() {
        let (_tmp, root) = fixture();
        let gw = TraceGateway::new(&root, &remote());

        for requested in [
            "/test-results/../secret.txt",
            "../secret.txt",
            "checkout-run1/../../secret.txt",
            "/etc/passwd",
            "",
            "/test-results/checkout-run1",
            "/test-results/missing.zip",
        ] {
            assert!(
                matches!(gw.resolve(requested).await, Err(WebError::TraceNotFound)),
                "{requested} should be rejected"
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rejects_symlink_escape() {
        let (tmp, root) = fixture();
        std::os::unix::fs::symlink(tmp.path().join("secret.txt"), root.join("link.zip")).unwrap();
        let gw = TraceGateway::new(&root, &remote());
        assert!(matches!(gw.resolve("link.zip").await, Err(WebError::TraceNotFound)));
    }

    #[tokio::test]
    async fn test_remote_reference() {
        let (_tmp, root) = fixture();
        let gw = TraceGateway::new(&root, &remote());
        let opened = gw.open("/test-results/checkout-run1/trace.zip").await.unwrap();
        assert_eq!(
            opened,
            TraceOpened::Reference {
                url: "https://trace.playwright.dev/?trace=https%3A%2F%2Freports.example.com%2Ftest-results%2Fcheckout-run1%2Ftrace.zip".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_remote_reference_site_relative() {
        let (_tmp, root) = fixture();
        let config = ViewerConfig {
            mode: ViewerMode::Remote,
            ..Default::default()
        };
        let gw = TraceGateway::new(&root, &config);
        assert_eq!(
            gw.reference_url("a/trace.zip"),
            "https://trace.playwright.dev/?trace=%2Ftest-results%2Fa%2Ftrace.zip"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_launch_returns_immediately() {
        let (_tmp, root) = fixture();
        let config = ViewerConfig {
            command: vec!["true".to_string()],
            ..Default::default()
        };
        let gw = TraceGateway::new(&root, &config);
        let opened = gw.open("checkout-run1/trace.zip").await.unwrap();
        assert_eq!(opened, TraceOpened::Launched);
    }

    #[tokio::test]
    async fn test_local_launch_missing_program() {
        let (_tmp, root) = fixture();
        let config = ViewerConfig {
            command: vec!["funnel-no-such-viewer".to_string()],
            ..Default::default()
        };
        let gw = TraceGateway::new(&root, &config);
        assert!(matches!(
            gw.open("checkout-run1/trace.zip").await,
            Err(WebError::Io(_))
        ));
    }
}
