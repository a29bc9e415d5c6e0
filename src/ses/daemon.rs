//! The session daemon.
//!
//! Owns every pane's real process and PTY so a mux can come and go.
//! One control connection per mux session, one VT connection carrying
//! multiplexed PTY bytes. Orphaned panes keep running without a session;
//! detach stores the mux's serialized state for a later reattach.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::io::AsyncReadExt;
use tokio::net::{unix::OwnedWriteHalf, UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use super::spawn::{socket_dir, socket_path};
use super::vt::{read_vt_frame, write_vt_frame};
use super::wire::{
    self, CtlRequest, CtlResponse, OrphanEntry, SessionEntry, HANDSHAKE_CTL, HANDSHAKE_VT,
};

enum PaneEvent {
    Output { pane_id: u32, bytes: Vec<u8> },
    Exited { pane_id: u32 },
}

struct DaemonPane {
    uuid: Uuid,
    writer: Box<dyn Write + Send>,
    child: Box<dyn portable_pty::Child + Send + Sync>,
    master: Box<dyn portable_pty::MasterPty + Send>,
    cwd: String,
    cmd: String,
    name: String,
    sticky: bool,
    float_key: u8,
    /// Owning session; `None` means orphan.
    session: Option<Uuid>,
}

#[derive(Default)]
struct SessionRec {
    name: String,
    vt: Option<Arc<Mutex<OwnedWriteHalf>>>,
    /// Serialized mux state stored at detach (also refreshed by
    /// `sync_state` as a crash fallback).
    state: Option<String>,
    detached: bool,
    /// Pane UUIDs recorded at detach, handed back on reattach.
    detached_panes: Vec<Uuid>,
}

#[derive(Default)]
struct Daemon {
    panes: HashMap<u32, DaemonPane>,
    next_pane_id: u32,
    sessions: HashMap<Uuid, SessionRec>,
}

type Shared = Arc<Mutex<Daemon>>;

/// Run the daemon until killed. Binds the instance socket and serves
/// control and VT connections.
pub async fn run() -> Result<()> {
    let dir = socket_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    let path = socket_path();
    cleanup_stale_socket(&path);
    let listener = UnixListener::bind(&path).with_context(|| format!("bind {}", path.display()))?;
    debug!(socket = %path.display(), "ses daemon listening");

    let daemon: Shared = Arc::new(Mutex::new(Daemon::default()));
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    tokio::spawn(route_pane_events(Arc::clone(&daemon), event_rx));

    loop {
        let (stream, _) = listener.accept().await?;
        let daemon = Arc::clone(&daemon);
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(daemon, event_tx, stream).await {
                debug!("connection ended: {e:#}");
            }
        });
    }
}

fn cleanup_stale_socket(path: &std::path::Path) {
    if path.exists() && std::os::unix::net::UnixStream::connect(path).is_err() {
        let _ = std::fs::remove_file(path);
    }
}

async fn serve_connection(
    daemon: Shared,
    event_tx: mpsc::UnboundedSender<PaneEvent>,
    mut stream: UnixStream,
) -> Result<()> {
    let mut handshake = [0u8; 1];
    stream.read_exact(&mut handshake).await?;
    match handshake[0] {
        HANDSHAKE_CTL => serve_ctl(daemon, event_tx, stream).await,
        HANDSHAKE_VT => serve_vt(daemon, stream).await,
        b => anyhow::bail!("unknown handshake byte {:#x}", b),
    }
}

// ---------------------------------------------------------------------------
// Pane output routing
// ---------------------------------------------------------------------------

async fn route_pane_events(daemon: Shared, mut rx: mpsc::UnboundedReceiver<PaneEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PaneEvent::Output { pane_id, bytes } => {
                let vt = {
                    let state = daemon.lock().await;
                    state
                        .panes
                        .get(&pane_id)
                        .and_then(|p| p.session)
                        .and_then(|s| state.sessions.get(&s))
                        .and_then(|s| s.vt.clone())
                };
                if let Some(vt) = vt {
                    let mut w = vt.lock().await;
                    let _ = write_vt_frame(&mut *w, pane_id, &bytes).await;
                }
            }
            PaneEvent::Exited { pane_id } => {
                let vt = {
                    let mut state = daemon.lock().await;
                    let pane = state.panes.remove(&pane_id);
                    pane.and_then(|p| p.session)
                        .and_then(|s| state.sessions.get(&s))
                        .and_then(|s| s.vt.clone())
                };
                if let Some(vt) = vt {
                    let mut w = vt.lock().await;
                    // Zero-length frame: pane EOF.
                    let _ = write_vt_frame(&mut *w, pane_id, &[]).await;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// VT channel
// ---------------------------------------------------------------------------

async fn serve_vt(daemon: Shared, stream: UnixStream) -> Result<()> {
    let mut stream = stream;
    let mut hex = [0u8; 32];
    stream.read_exact(&mut hex).await?;
    let session = Uuid::try_parse(std::str::from_utf8(&hex)?).context("vt handshake uuid")?;

    let (mut read_half, write_half) = stream.into_split();
    {
        let mut state = daemon.lock().await;
        state
            .sessions
            .entry(session)
            .or_default()
            .vt = Some(Arc::new(Mutex::new(write_half)));
    }
    debug!(%session, "vt channel attached");

    // Mux → child bytes.
    while let Some((pane_id, payload)) = read_vt_frame(&mut read_half).await? {
        if payload.is_empty() {
            continue;
        }
        let mut state = daemon.lock().await;
        if let Some(pane) = state.panes.get_mut(&pane_id) {
            let _ = pane.writer.write_all(&payload);
            let _ = pane.writer.flush();
        }
    }

    let mut state = daemon.lock().await;
    if let Some(rec) = state.sessions.get_mut(&session) {
        rec.vt = None;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Control channel
// ---------------------------------------------------------------------------

async fn serve_ctl(
    daemon: Shared,
    event_tx: mpsc::UnboundedSender<PaneEvent>,
    mut stream: UnixStream,
) -> Result<()> {
    let mut registered: Option<Uuid> = None;
    loop {
        let Some(payload) = wire::read_frame(&mut stream).await? else {
            break;
        };
        let req = match wire::decode_request(&payload) {
            Ok(req) => req,
            Err(e) => {
                warn!("bad control frame: {e:#}");
                let resp = CtlResponse::Error {
                    message: format!("{e:#}"),
                };
                wire::write_frame(&mut stream, &wire::encode_response(&resp)).await?;
                continue;
            }
        };
        let resp = handle_request(&daemon, &event_tx, &mut registered, req).await;
        wire::write_frame(&mut stream, &wire::encode_response(&resp)).await?;
    }

    if let Some(session) = registered {
        session_closed(&daemon, session).await;
    }
    Ok(())
}

async fn handle_request(
    daemon: &Shared,
    event_tx: &mpsc::UnboundedSender<PaneEvent>,
    registered: &mut Option<Uuid>,
    req: CtlRequest,
) -> CtlResponse {
    let mut state = daemon.lock().await;
    match req {
        CtlRequest::Register { uuid, name } => {
            let rec = state.sessions.entry(uuid).or_default();
            rec.name = name;
            rec.detached = false;
            *registered = Some(uuid);
            debug!(%uuid, "session registered");
            CtlResponse::Ok
        }
        CtlRequest::CreatePane { cols, rows, cwd, cmd, mux_socket } => {
            match spawn_daemon_pane(
                &mut state,
                event_tx,
                *registered,
                cols,
                rows,
                &cwd,
                &cmd,
                &mux_socket,
            ) {
                Ok((pane_id, uuid)) => CtlResponse::PaneCreated { pane_id, uuid },
                Err(e) => CtlResponse::Error {
                    message: format!("{e:#}"),
                },
            }
        }
        CtlRequest::KillPane { pane_id } => {
            if let Some(mut pane) = state.panes.remove(&pane_id) {
                let _ = pane.child.kill();
            }
            CtlResponse::Ok
        }
        CtlRequest::OrphanPane { pane_id, sticky, float_key, cwd } => {
            if let Some(pane) = state.panes.get_mut(&pane_id) {
                pane.session = None;
                pane.sticky = sticky;
                pane.float_key = float_key;
                if !cwd.is_empty() {
                    pane.cwd = cwd;
                }
            }
            CtlResponse::Ok
        }
        CtlRequest::SetSticky { pane_id, sticky } => {
            if let Some(pane) = state.panes.get_mut(&pane_id) {
                pane.sticky = sticky;
            }
            CtlResponse::Ok
        }
        CtlRequest::FindSticky { float_key, cwd } => {
            let pane = state
                .panes
                .iter()
                .find(|(_, p)| {
                    p.session.is_none() && p.sticky && p.float_key == float_key && p.cwd == cwd
                })
                .map(|(id, p)| (*id, p.uuid));
            CtlResponse::StickyPane { pane }
        }
        CtlRequest::AdoptPane { uuid, cols, rows } => {
            let found = state
                .panes
                .iter_mut()
                .find(|(_, p)| p.session.is_none() && p.uuid == uuid)
                .map(|(id, p)| {
                    p.session = *registered;
                    let _ = p.master.resize(PtySize {
                        rows,
                        cols,
                        pixel_width: 0,
                        pixel_height: 0,
                    });
                    (*id, p.uuid)
                });
            match found {
                Some((pane_id, uuid)) => CtlResponse::PaneCreated { pane_id, uuid },
                None => CtlResponse::Error {
                    message: format!("no orphan {}", uuid.simple()),
                },
            }
        }
        CtlRequest::ListOrphaned => {
            let entries = state
                .panes
                .values()
                .filter(|p| p.session.is_none())
                .map(|p| OrphanEntry {
                    uuid: p.uuid,
                    cwd: p.cwd.clone(),
                    float_key: p.float_key,
                    sticky: p.sticky,
                })
                .collect();
            CtlResponse::Orphans { entries }
        }
        CtlRequest::ListSessions => {
            let entries = state
                .sessions
                .iter()
                .filter(|(_, s)| s.detached)
                .map(|(uuid, s)| SessionEntry {
                    uuid: *uuid,
                    name: s.name.clone(),
                    pane_count: s.detached_panes.len() as u16,
                })
                .collect();
            CtlResponse::Sessions { entries }
        }
        CtlRequest::Detach { state: mux_state } => {
            let Some(session) = *registered else {
                return CtlResponse::Error {
                    message: "detach before register".into(),
                };
            };
            let detached_panes: Vec<Uuid> = state
                .panes
                .values_mut()
                .filter(|p| p.session == Some(session))
                .map(|p| {
                    p.session = None;
                    p.uuid
                })
                .collect();
            if let Some(rec) = state.sessions.get_mut(&session) {
                rec.state = Some(mux_state);
                rec.detached = true;
                rec.detached_panes = detached_panes;
            }
            debug!(%session, "session detached");
            CtlResponse::Ok
        }
        CtlRequest::Reattach { prefix } => {
            let found = state
                .sessions
                .iter()
                .find(|(uuid, s)| {
                    s.detached
                        && (s.name == prefix
                            || (prefix.len() >= 3
                                && uuid.simple().to_string().starts_with(&prefix)))
                })
                .map(|(uuid, _)| *uuid);
            match found.and_then(|uuid| state.sessions.remove(&uuid)) {
                Some(rec) => CtlResponse::ReattachState {
                    state: rec.state.unwrap_or_default(),
                    uuids: rec.detached_panes,
                },
                None => CtlResponse::Error {
                    message: format!("no detached session matching '{}'", prefix),
                },
            }
        }
        CtlRequest::Ping => CtlResponse::Ok,
        CtlRequest::PaneInfo { pane_id } => match state.panes.get(&pane_id) {
            Some(pane) => CtlResponse::PaneInfo {
                pid: pane.child.process_id().unwrap_or(0),
                cmd: pane.cmd.clone(),
                cwd: pane.cwd.clone(),
            },
            None => CtlResponse::Error {
                message: format!("no pane {}", pane_id),
            },
        },
        CtlRequest::SyncState { state: mux_state } => {
            if let Some(session) = *registered {
                if let Some(rec) = state.sessions.get_mut(&session) {
                    rec.state = Some(mux_state);
                }
            }
            CtlResponse::Ok
        }
        CtlRequest::UpdatePaneName { pane_id, name } => {
            if let Some(pane) = state.panes.get_mut(&pane_id) {
                pane.name = name;
            }
            CtlResponse::Ok
        }
        CtlRequest::UpdatePaneShell(update) => {
            if let Some(pane) = state.panes.get_mut(&update.pane_id) {
                pane.cmd = update.cmd;
                pane.cwd = update.cwd;
            }
            CtlResponse::Ok
        }
        CtlRequest::GetPaneCwd { pane_id } => {
            let cwd = state
                .panes
                .get(&pane_id)
                .map(|p| p.cwd.clone())
                .unwrap_or_default();
            CtlResponse::PaneCwd { pane_id, cwd }
        }
        // Legacy hook: accepted, ignored.
        CtlRequest::UpdatePaneAux { .. } => CtlResponse::Ok,
        CtlRequest::ResizePane { pane_id, cols, rows } => {
            if let Some(pane) = state.panes.get_mut(&pane_id) {
                let _ = pane.master.resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                });
            }
            CtlResponse::Ok
        }
    }
}

/// A mux went away without detaching: orphan its sticky panes, kill the
/// rest. After a detach the panes are already orphaned.
async fn session_closed(daemon: &Shared, session: Uuid) {
    let mut state = daemon.lock().await;
    if state
        .sessions
        .get(&session)
        .map(|s| s.detached)
        .unwrap_or(false)
    {
        return;
    }
    let doomed: Vec<u32> = state
        .panes
        .iter_mut()
        .filter(|(_, p)| p.session == Some(session))
        .filter_map(|(id, p)| {
            if p.sticky {
                p.session = None;
                None
            } else {
                Some(*id)
            }
        })
        .collect();
    for id in doomed {
        if let Some(mut pane) = state.panes.remove(&id) {
            let _ = pane.child.kill();
        }
    }
    state.sessions.remove(&session);
    debug!(%session, "session closed, panes reaped");
}

#[allow(clippy::too_many_arguments)]
fn spawn_daemon_pane(
    state: &mut Daemon,
    event_tx: &mpsc::UnboundedSender<PaneEvent>,
    session: Option<Uuid>,
    cols: u16,
    rows: u16,
    cwd: &str,
    cmd: &str,
    mux_socket: &str,
) -> Result<(u32, Uuid)> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: rows.max(1),
            cols: cols.max(1),
            pixel_width: 0,
            pixel_height: 0,
        })
        .context("openpty")?;

    let mut builder = CommandBuilder::new(cmd);
    if !cwd.is_empty() {
        builder.cwd(cwd);
    }
    if !mux_socket.is_empty() {
        builder.env(crate::ipc::ENV_SOCKET, mux_socket);
    }
    let child = pair.slave.spawn_command(builder).context("spawn child")?;
    drop(pair.slave);

    let writer = pair.master.take_writer().context("pty writer")?;
    let mut reader = pair.master.try_clone_reader().context("pty reader")?;

    let pane_id = state.next_pane_id;
    state.next_pane_id += 1;
    let uuid = Uuid::new_v4();

    let tx = event_tx.clone();
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => {
                    let _ = tx.send(PaneEvent::Exited { pane_id });
                    break;
                }
                Ok(n) => {
                    let sent = tx.send(PaneEvent::Output {
                        pane_id,
                        bytes: buf[..n].to_vec(),
                    });
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    });

    state.panes.insert(
        pane_id,
        DaemonPane {
            uuid,
            writer,
            child,
            master: pair.master,
            cwd: cwd.to_string(),
            cmd: cmd.to_string(),
            name: String::new(),
            sticky: false,
            float_key: 0,
            session,
        },
    );
    Ok((pane_id, uuid))
}
