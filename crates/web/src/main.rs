use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::info;

use funnel_common::{FunnelConfig, CONFIG_FILE};
use funnel_web::server::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::var("FUNNEL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(CONFIG_FILE));
    let config = FunnelConfig::load(&config_path)?;

    let mut cfg = ServerConfig::from_config(&config)?;
    if let Ok(addr) = std::env::var("FUNNEL_WEB_ADDR") {
        cfg.addr = addr.parse::<SocketAddr>()?;
    }

    info!(
        "Starting Funnel dashboard on {} (report: {}, artifacts: {})",
        cfg.public_url(),
        cfg.report_dir.display(),
        cfg.artifact_root.display()
    );

    funnel_web::server::serve(cfg).await?;
    Ok(())
}
