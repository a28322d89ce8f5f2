//! Dashboard HTTP server

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderValue, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use funnel_common::config::ViewerConfig;
use funnel_common::{FunnelConfig, SnapshotStore};

use crate::error::{Result, WebError};
use crate::gateway::{TraceGateway, TraceOpened};
use crate::port::reclaim_port;
use crate::static_files::{not_found, serve_under};
use crate::template::{DashboardTemplate, HtmlTemplate};
use crate::view::{RenderOptions, ViewerSettings, ARTIFACT_MOUNT};

/// Everything the server needs, fixed at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub report_dir: PathBuf,
    /// Dashboard file name inside `report_dir`
    pub dashboard_file: String,
    pub snapshot: SnapshotStore,
    /// Served under `/test-results/`
    pub artifact_root: PathBuf,
    /// `artifact_root` as it appears in recorded trace paths
    pub artifact_prefix: String,
    pub viewer: ViewerConfig,
    pub reclaim_port: bool,
    pub open_browser: bool,
}

impl ServerConfig {
    pub fn from_config(config: &FunnelConfig) -> Result<Self> {
        let host = config.server.host.as_str();
        let port = config.server.port;
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                funnel_common::Error::InvalidConfig(format!("cannot resolve {}:{}", host, port))
            })?;

        Ok(Self {
            addr,
            report_dir: config.report.dir.clone(),
            dashboard_file: config.report.dashboard.clone(),
            snapshot: config.snapshot_store(),
            artifact_root: config.server.artifact_root.clone(),
            artifact_prefix: config.artifact_prefix(),
            viewer: config.viewer.clone(),
            reclaim_port: config.server.reclaim_port,
            open_browser: config.server.open_browser,
        })
    }

    pub fn dashboard_path(&self) -> PathBuf {
        self.report_dir.join(&self.dashboard_file)
    }

    /// Address shown to users; wildcard binds are shown as localhost.
    pub fn public_url(&self) -> String {
        if self.addr.ip().is_unspecified() {
            format!("http://localhost:{}", self.addr.port())
        } else {
            format!("http://{}", self.addr)
        }
    }
}

struct ServerState {
    report_dir: PathBuf,
    dashboard_file: String,
    artifact_root: PathBuf,
    gateway: TraceGateway,
}

/// The dashboard web server
pub struct DashboardServer {
    config: ServerConfig,
    state: Arc<ServerState>,
}

impl DashboardServer {
    pub fn new(config: ServerConfig) -> Self {
        let state = Arc::new(ServerState {
            report_dir: config.report_dir.clone(),
            dashboard_file: config.dashboard_file.clone(),
            artifact_root: config.artifact_root.clone(),
            gateway: TraceGateway::new(&config.artifact_root, &config.viewer),
        });
        Self { config, state }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Render the snapshot into the dashboard file.
    ///
    /// Fails with `SnapshotMissing` when no run has been recorded yet.
    pub fn write_dashboard(&self, template: &dyn DashboardTemplate) -> Result<PathBuf> {
        let stats = self.config.snapshot.read()?;
        let options = RenderOptions {
            viewer: ViewerSettings::from(&self.config.viewer),
            artifact_prefix: self.config.artifact_prefix.clone(),
            ..Default::default()
        };
        let path = self.config.dashboard_path();
        crate::template::write_dashboard(&stats, &options, template, &path)?;
        info!("Dashboard written to {}", path.display());
        Ok(path)
    }

    /// Create router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(dashboard_handler))
            .route("/dashboard.html", get(dashboard_handler))
            .route("/api/show-trace", get(show_trace_handler))
            .route(&format!("/{}/*path", ARTIFACT_MOUNT), get(artifact_handler))
            .fallback(report_file_handler)
            .layer(middleware::from_fn(preflight_middleware))
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Reclaim the port if configured, bind, and serve until the process exits.
    pub async fn serve(self) -> Result<()> {
        if self.config.reclaim_port {
            reclaim_port(self.config.addr.port()).await;
        }

        let addr = self.config.addr;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| WebError::Bind { addr, source })?;
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on(self, listener: tokio::net::TcpListener) -> Result<()> {
        let url = match listener.local_addr() {
            Ok(local) if local.port() != self.config.addr.port() => format!("http://{}", local),
            _ => self.config.public_url(),
        };
        info!("📊 Dashboard ready at {}", url);
        if self.config.open_browser {
            open_browser(&url);
        }

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

/// Write the dashboard from `config` and serve it.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let server = DashboardServer::new(config);
    server.write_dashboard(&HtmlTemplate::default())?;
    server.serve().await
}

// ============================================================================
// Handlers
// ============================================================================

async fn dashboard_handler(State(state): State<Arc<ServerState>>) -> Response {
    serve_under(&state.report_dir, &state.dashboard_file).await
}

async fn artifact_handler(State(state): State<Arc<ServerState>>, uri: Uri) -> Response {
    // Raw path keeps percent-encoding; serve_under decodes it once
    let path = uri.path().trim_start_matches('/');
    let rel = path.strip_prefix(ARTIFACT_MOUNT).unwrap_or(path);
    serve_under(&state.artifact_root, rel).await
}

async fn report_file_handler(State(state): State<Arc<ServerState>>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return not_found();
    }
    serve_under(&state.report_dir, uri.path()).await
}

#[derive(Debug, Deserialize)]
struct ShowTraceQuery {
    path: Option<String>,
}

async fn show_trace_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ShowTraceQuery>,
) -> std::result::Result<Json<serde_json::Value>, WebError> {
    let path = query.path.ok_or(WebError::TraceNotFound)?;
    debug!("show-trace {}", path);

    match state.gateway.open(&path).await? {
        TraceOpened::Launched => Ok(Json(serde_json::json!({ "success": true }))),
        TraceOpened::Reference { url } => Ok(Json(serde_json::json!({
            "success": true,
            "viewerUrl": url,
        }))),
    }
}

/// Answer every OPTIONS request and stamp the allow-origin header on all responses.
async fn preflight_middleware(req: Request, next: Next) -> Response {
    let mut res = if req.method() == Method::OPTIONS {
        (
            StatusCode::OK,
            [
                (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
                (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
            ],
        )
            .into_response()
    } else {
        next.run(req).await
    };
    res.headers_mut()
        .entry(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .or_insert(HeaderValue::from_static("*"));
    res
}

fn open_browser(url: &str) {
    let program = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(windows) {
        "explorer"
    } else {
        "xdg-open"
    };
    let spawned = std::process::Command::new(program)
        .arg(url)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
    if let Err(e) = spawned {
        warn!("Could not open browser with {}: {}", program, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funnel_common::config::ViewerConfig;

    fn config(host: &str, port: u16) -> FunnelConfig {
        let mut config = FunnelConfig::default();
        config.server.host = host.to_string();
        config.server.port = port;
        config
    }

    #[test]
    fn test_from_config() {
        let server = ServerConfig::from_config(&FunnelConfig::default()).unwrap();
        assert_eq!(server.addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(server.dashboard_path(), PathBuf::from("report/dashboard.html"));
        assert_eq!(server.snapshot.path(), std::path::Path::new("report/funnel-results.json"));
        assert_eq!(server.viewer, ViewerConfig::default());
        assert!(server.reclaim_port);
    }

    #[test]
    fn test_public_url() {
        let server = ServerConfig::from_config(&config("0.0.0.0", 9000)).unwrap();
        assert_eq!(server.public_url(), "http://localhost:9000");
        let server = ServerConfig::from_config(&config("127.0.0.1", 9000)).unwrap();
        assert_eq!(server.public_url(), "http://127.0.0.1:9000");
    }
}
