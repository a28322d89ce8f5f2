//! `funnel serve`: render the dashboard and serve it

use anyhow::Result;
use clap::Args;

use funnel_common::{FunnelConfig, ViewerMode};
use funnel_web::ServerConfig;

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, short, env = "FUNNEL_PORT")]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "FUNNEL_HOST")]
    pub host: Option<String>,

    /// Open the dashboard in a browser once listening
    #[arg(long)]
    pub open: bool,

    /// Do not kill whatever already holds the port
    #[arg(long)]
    pub no_reclaim: bool,

    /// Trace viewer mode: local or remote
    #[arg(long)]
    pub viewer: Option<ViewerMode>,
}

pub async fn execute(args: ServeArgs, mut config: FunnelConfig) -> Result<()> {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if args.open {
        config.server.open_browser = true;
    }
    if args.no_reclaim {
        config.server.reclaim_port = false;
    }
    if let Some(mode) = args.viewer {
        config.viewer.mode = mode;
    }
    config.validate()?;

    let server = ServerConfig::from_config(&config)?;
    funnel_web::server::serve(server).await?;
    Ok(())
}
