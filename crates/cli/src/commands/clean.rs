//! `funnel clean`: stop a running dashboard and remove run output

use std::path::Path;

use anyhow::{Context, Result};

use funnel_common::FunnelConfig;
use funnel_web::port::reclaim_port;

use crate::output::{print_success, print_warning};

pub async fn execute(config: &FunnelConfig) -> Result<()> {
    println!("🧹 Cleaning up...");

    let port = config.server.port;
    if !reclaim_port(port).await.is_empty() {
        println!("   Killed process on port {}", port);
    }

    for dir in &config.clean.dirs {
        if remove_dir(dir)? {
            println!("   Removed {}/", dir.display());
        }
    }

    print_success("Clean complete");
    Ok(())
}

/// Remove `dir` recursively; returns whether anything was removed.
fn remove_dir(dir: &Path) -> Result<bool> {
    if dir.parent().is_none() {
        print_warning(&format!("Refusing to remove {}", dir.display()));
        return Ok(false);
    }
    if !dir.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(dir).with_context(|| format!("cannot remove {}", dir.display()))?;
    Ok(true)
}
