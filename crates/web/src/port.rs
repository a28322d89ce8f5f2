//! Best-effort reclamation of the dashboard port
//!
//! A dashboard left running from an earlier session holds the port. Before
//! binding, whatever is listening there is killed, except this process.

use std::time::Duration;

use tracing::{debug, info, warn};

/// Time given to the kernel to release the socket after a kill
const RELEASE_WAIT: Duration = Duration::from_millis(250);

/// Kill processes holding `port`; returns the pids that were signalled.
pub async fn reclaim_port(port: u16) -> Vec<i32> {
    let output = match tokio::process::Command::new("lsof")
        .arg(format!("-ti:{}", port))
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            debug!("lsof unavailable, not reclaiming port {}: {}", port, e);
            return Vec::new();
        }
    };

    let own = std::process::id() as i32;
    let mut killed = Vec::new();
    for pid in parse_pids(&String::from_utf8_lossy(&output.stdout)) {
        if pid == own {
            continue;
        }
        if kill_pid(pid) {
            info!("Killed existing process {} on port {}", pid, port);
            killed.push(pid);
        }
    }

    if !killed.is_empty() {
        tokio::time::sleep(RELEASE_WAIT).await;
    }
    killed
}

/// Pids from `lsof -t` output, one per line; duplicates dropped.
pub fn parse_pids(output: &str) -> Vec<i32> {
    let mut pids: Vec<i32> = Vec::new();
    for pid in output.lines().filter_map(|l| l.trim().parse::<i32>().ok()) {
        if pid > 0 && !pids.contains(&pid) {
            pids.push(pid);
        }
    }
    pids
}

#[cfg(unix)]
fn kill_pid(pid: i32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to kill process {}: {}", pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_pid(pid: i32) -> bool {
    warn!("Port reclamation is not supported on this platform (pid {})", pid);
    false
}
