//! Daemon autostart.
//!
//! The daemon is this same binary run with `ses daemon`. If the control
//! socket refuses the first connection, spawn it detached, give it a
//! moment to bind, and retry once.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use super::client::SesClient;

/// Socket directory: `$HEXE_TEST_ONLY` (tests), else `$TMPDIR/hexe-{uid}`.
pub fn socket_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("HEXE_TEST_ONLY") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    let uid = nix::unistd::getuid();
    let base = std::env::var("TMPDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"));
    base.join(format!("hexe-{}", uid))
}

/// Instance name from `$HEXE_INSTANCE`, default `0`. Separate instances
/// get separate daemons.
pub fn instance() -> String {
    std::env::var("HEXE_INSTANCE").unwrap_or_else(|_| "0".to_string())
}

pub fn socket_path() -> PathBuf {
    socket_dir().join(format!("ses-{}.sock", instance()))
}

/// Connect to the daemon, starting it if necessary.
pub async fn connect_or_spawn(debug: bool, logfile: Option<&str>) -> Result<SesClient> {
    let path = socket_path();
    match SesClient::connect(&path).await {
        Ok(client) => return Ok(client),
        Err(_) => {
            spawn_daemon(debug, logfile)?;
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
    SesClient::connect(&path)
        .await
        .context("session daemon did not come up")
}

fn spawn_daemon(debug: bool, logfile: Option<&str>) -> Result<()> {
    let exe = std::env::current_exe().context("resolve own binary")?;
    let mut cmd = std::process::Command::new(exe);
    cmd.arg("ses").arg("daemon");
    if debug {
        cmd.arg("--debug");
    }
    if let Some(path) = logfile {
        cmd.arg("--logfile").arg(path);
    }
    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    cmd.spawn().context("spawn ses daemon")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_overrides_socket_dir() {
        // Env mutation is process-global; keep the scope tight.
        std::env::set_var("HEXE_TEST_ONLY", "/tmp/hexe-test-dir");
        assert_eq!(socket_dir(), PathBuf::from("/tmp/hexe-test-dir"));
        std::env::remove_var("HEXE_TEST_ONLY");
        assert!(socket_dir().to_string_lossy().contains("hexe-"));
    }
}
