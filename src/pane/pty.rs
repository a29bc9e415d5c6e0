use std::io::{Read, Write};
use std::path::Path;

use anyhow::Context;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::event::AppEvent;

/// A locally-owned PTY, used when the session daemon is unreachable.
/// Daemon-backed panes never touch this path.
pub struct PtyHandle {
    pub writer: Box<dyn Write + Send>,
    pub child: Box<dyn portable_pty::Child + Send + Sync>,
    pub master: Box<dyn portable_pty::MasterPty + Send>,
}

pub fn spawn_pty(
    cmd: &str,
    size: PtySize,
    event_tx: mpsc::UnboundedSender<AppEvent>,
    pane: Uuid,
    cwd: Option<&Path>,
) -> anyhow::Result<PtyHandle> {
    let pty_system = native_pty_system();
    let pair = pty_system.openpty(size).context("openpty")?;

    let mut builder = CommandBuilder::new(cmd);
    if let Some(dir) = cwd {
        builder.cwd(dir);
    }
    let child = pair.slave.spawn_command(builder).context("spawn shell")?;
    drop(pair.slave);

    let writer = pair.master.take_writer().context("pty writer")?;
    let mut reader = pair.master.try_clone_reader().context("pty reader")?;
    let master = pair.master;

    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    let _ = event_tx.send(AppEvent::PtyExited { pane });
                    break;
                }
                Ok(n) => {
                    let sent = event_tx.send(AppEvent::PtyOutput {
                        pane,
                        bytes: buf[..n].to_vec(),
                    });
                    if sent.is_err() {
                        break;
                    }
                }
                Err(_) => {
                    let _ = event_tx.send(AppEvent::PtyExited { pane });
                    break;
                }
            }
        }
    });

    Ok(PtyHandle {
        writer,
        child,
        master,
    })
}

pub fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}
