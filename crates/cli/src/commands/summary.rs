//! `funnel summary`: print the recorded run

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use funnel_common::FunnelConfig;

use crate::output::{failure_rows, print_list, scope_rows, OutputFormat};

#[derive(Args)]
pub struct SummaryArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub async fn execute(args: SummaryArgs, config: &FunnelConfig) -> Result<()> {
    let stats = config.snapshot_store().read()?;
    let scopes = scope_rows(&stats);
    let failures = failure_rows(&stats);

    match args.format {
        OutputFormat::Json => {
            let doc = serde_json::json!({
                "workers": stats.workers,
                "startTime": stats.start_time,
                "endTime": stats.end_time,
                "scopes": scopes,
                "failures": failures,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        OutputFormat::Table => {
            print_list(&scopes, args.format);
            if failures.is_empty() {
                println!("\n{}", "✅ All tests passed!".green());
            } else {
                println!("\n{}", "⚠️  Failures".red().bold());
                print_list(&failures, args.format);
            }
        }
    }
    Ok(())
}
