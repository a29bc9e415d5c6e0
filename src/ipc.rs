//! Local IPC socket.
//!
//! One JSON object per connection, newline-terminated. `notify` is
//! accept-and-close; `exit_intent` holds the connection until the
//! confirm popup it opens is dismissed, then receives the verdict.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};

use crate::event::AppEvent;
use crate::ses::spawn::socket_dir;

pub const ENV_SOCKET: &str = "HEXE_MUX_SOCKET";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcMessage {
    Notify { message: String },
    /// Arm a window during which a shell death exits without confirming.
    ExitIntent,
}

/// Bind the per-process socket and publish it in the environment for
/// child shells.
pub fn bind() -> Result<(UnixListener, PathBuf)> {
    let dir = socket_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(format!("mux-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path).with_context(|| format!("bind {}", path.display()))?;
    std::env::set_var(ENV_SOCKET, &path);
    Ok((listener, path))
}

/// Accept loop. Each connection is read once and routed into the event
/// loop; replies (when the message wants one) are written back by a
/// per-connection task so the main loop never blocks on a client.
pub fn serve(listener: UnixListener, tx: mpsc::UnboundedSender<AppEvent>) {
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = handle_connection(stream, tx).await;
            });
        }
    });
}

async fn handle_connection(
    stream: UnixStream,
    tx: mpsc::UnboundedSender<AppEvent>,
) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let msg: IpcMessage = serde_json::from_str(line.trim())?;

    let wants_reply = matches!(msg, IpcMessage::ExitIntent);
    if !wants_reply {
        let _ = tx.send(AppEvent::Ipc { msg, reply: None });
        return Ok(());
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    let _ = tx.send(AppEvent::Ipc {
        msg,
        reply: Some(reply_tx),
    });
    if let Ok(reply) = reply_rx.await {
        let mut stream = reader.into_inner();
        stream.write_all(reply.as_bytes()).await?;
        stream.write_all(b"\n").await?;
    }
    Ok(())
}

/// `mux --notify MSG`: deliver one notification to the mux that owns
/// this shell, addressed by `$HEXE_MUX_SOCKET`.
pub async fn send_notify(message: &str) -> Result<()> {
    let path = std::env::var(ENV_SOCKET).context("HEXE_MUX_SOCKET not set")?;
    let mut stream = UnixStream::connect(&path)
        .await
        .with_context(|| format!("connect {}", path))?;
    let json = serde_json::to_string(&IpcMessage::Notify {
        message: message.to_string(),
    })?;
    stream.write_all(json.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    Ok(())
}
