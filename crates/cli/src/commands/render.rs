//! `funnel render`: write the dashboard as a static page

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use funnel_common::{FunnelConfig, ViewerMode};
use funnel_web::{write_dashboard, HtmlTemplate, RenderOptions};

use crate::output::print_success;

#[derive(Args)]
pub struct RenderArgs {
    /// Output file (defaults to report/index.html)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Trace viewer the page links to: local or remote
    #[arg(long)]
    pub viewer: Option<ViewerMode>,

    /// Public origin the report is hosted under, for remote trace links
    #[arg(long, env = "FUNNEL_PUBLIC_BASE_URL")]
    pub public_base_url: Option<String>,

    /// Leave out the Chart.js script
    #[arg(long)]
    pub no_charts: bool,
}

pub async fn execute(args: RenderArgs, mut config: FunnelConfig) -> Result<()> {
    if let Some(mode) = args.viewer {
        config.viewer.mode = mode;
    }
    if args.public_base_url.is_some() {
        config.viewer.public_base_url = args.public_base_url;
    }

    let stats = config.snapshot_store().read()?;
    let options = RenderOptions::from_config(&config);
    let template = if args.no_charts {
        HtmlTemplate { chart_js_url: None }
    } else {
        HtmlTemplate::default()
    };

    let output = args.output.unwrap_or_else(|| config.static_index_path());
    write_dashboard(&stats, &options, &template, &output)?;

    let viewer = match config.viewer.mode {
        ViewerMode::Local => "local trace viewer",
        ViewerMode::Remote => "hosted trace viewer",
    };
    print_success(&format!("Dashboard written to {} ({})", output.display(), viewer));
    Ok(())
}
