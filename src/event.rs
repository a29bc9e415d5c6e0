use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::ipc::IpcMessage;

#[derive(Debug)]
pub enum AppEvent {
    /// Raw bytes from the controlling terminal.
    Stdin(Vec<u8>),
    StdinClosed,
    Resize,
    Tick,
    /// Output from a locally-backed pane.
    PtyOutput { pane: Uuid, bytes: Vec<u8> },
    PtyExited { pane: Uuid },
    /// Output from a daemon-backed pane, demultiplexed by the VT reader.
    PodOutput { pane_id: u32, bytes: Vec<u8> },
    PodExited { pane_id: u32 },
    /// The daemon VT channel went away entirely.
    SesClosed,
    Ipc {
        msg: IpcMessage,
        reply: Option<oneshot::Sender<String>>,
    },
}

/// Read raw stdin in chunks. The interpreter needs bytes, not parsed
/// events, so this deliberately bypasses any event abstraction.
pub fn start_stdin_reader(tx: mpsc::UnboundedSender<AppEvent>) {
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) => {
                    let _ = tx.send(AppEvent::StdinClosed);
                    break;
                }
                Ok(n) => {
                    if tx.send(AppEvent::Stdin(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(_) => {
                    let _ = tx.send(AppEvent::StdinClosed);
                    break;
                }
            }
        }
    });
}

/// Window-size changes arrive as SIGWINCH; the loop re-queries the size.
pub fn start_resize_watcher(tx: mpsc::UnboundedSender<AppEvent>) {
    tokio::spawn(async move {
        let Ok(mut winch) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())
        else {
            return;
        };
        while winch.recv().await.is_some() {
            if tx.send(AppEvent::Resize).is_err() {
                break;
            }
        }
    });
}

/// Frame pacing tick, ~60 Hz.
pub fn start_ticker(tx: mpsc::UnboundedSender<AppEvent>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(16));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if tx.send(AppEvent::Tick).is_err() {
                break;
            }
        }
    });
}
