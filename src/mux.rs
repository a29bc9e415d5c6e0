//! The event loop and coordinator.
//!
//! A single task owns all state. Producer tasks feed it stdin bytes, VT
//! frames, PTY output, IPC requests, resize signals, and a ~60 Hz tick;
//! every mutation happens here, between two polls.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::app::{App, PendingAction, PendingPop, PopScope, ShellInfo};
use crate::clipboard;
use crate::config::Config;
use crate::event::{self, AppEvent};
use crate::floats::{self, FloatProps, Floats};
use crate::input::{self, MouseFrame, ParseEvent, ScrollKey};
use crate::ipc::{self, IpcMessage};
use crate::keys::{legacy_bytes, Action, Chord, Dir, Key, KeyEventKind, KeyOutcome};
use crate::layout::SplitDir;
use crate::names;
use crate::pane::{pty, Pane};
use crate::pop::{PopResult, Popup};
use crate::render;
use crate::ses::client::SesClient;
use crate::ses::spawn as ses_spawn;
use crate::ses::vt::{read_vt_frame, write_vt_frame};
use crate::ses::wire::OrphanEntry;
use crate::session;
use crate::status::HostStats;
use crate::tab::Tab;
use crate::tui::Tui;

const NOTICE_TTL: Duration = Duration::from_secs(5);
const EXIT_INTENT_WINDOW: Duration = Duration::from_secs(5);
const SHELL_SYNC_INTERVAL: Duration = Duration::from_secs(1);

pub struct MuxOptions {
    pub attach: Option<String>,
    pub name: Option<String>,
    pub debug: bool,
    pub logfile: Option<String>,
}

/// Where a mouse coordinate landed.
enum Hit {
    Float(usize),
    Split(u32),
    Nothing,
}

pub struct Mux {
    pub app: App,
    ses: Option<SesClient>,
    vt_writer: Option<OwnedWriteHalf>,
    tx: mpsc::UnboundedSender<AppEvent>,
    stats: HostStats,
    pending_orphans: Vec<OrphanEntry>,
    /// Bytes for the outer terminal itself (OSC 52, window title),
    /// flushed after the next frame.
    raw_out: Vec<u8>,
    last_shell_sync: Instant,
    last_title: String,
}

pub async fn run(opts: MuxOptions) -> Result<()> {
    let (config, config_warning) = Config::load();
    let (tx, mut rx) = mpsc::unbounded_channel::<AppEvent>();

    // Daemon first: panes should outlive us whenever possible.
    let mut ses = match ses_spawn::connect_or_spawn(opts.debug, opts.logfile.as_deref()).await {
        Ok(client) => Some(client),
        Err(e) => {
            debug!("running without session daemon: {e:#}");
            None
        }
    };

    let (w, h) = crossterm::terminal::size().context("query terminal size")?;

    // The IPC socket goes up before any pane spawns so children inherit
    // `HEXE_MUX_SOCKET` from their first breath.
    let (ipc_listener, ipc_path) = ipc::bind()?;
    ipc::serve(ipc_listener, tx.clone());

    // Fresh session or reattach.
    let mut mux = if let Some(target) = &opts.attach {
        let client = ses.as_mut().context("--attach needs the session daemon")?;
        let (state_json, pane_uuids) = client.reattach(target.clone()).await?;
        let state = session::from_json(&state_json)?;
        client.register(state.uuid, state.name.clone()).await?;

        let mut adopted = HashMap::new();
        for uuid in pane_uuids {
            match client.adopt_pane(uuid, w, h.saturating_sub(1)).await {
                Ok(pod_id) => {
                    adopted.insert(uuid, pod_id);
                }
                Err(e) => debug!("adopt {} failed: {e:#}", uuid.simple()),
            }
        }

        let mut app = App::new(config, state.uuid, state.name.clone(), w, h);
        let (x, y, uw, uh) = app.usable();
        let rebuilt = session::rebuild(&state, &adopted, (x, y, uw, uh));
        for tab in rebuilt.tabs {
            app.push_tab(tab);
        }
        app.floats = rebuilt.floats;
        app.active_tab = rebuilt.active_tab;
        app.active_floating = rebuilt.active_floating;
        let (fw, fh) = app.float_usable();
        app.floats.place_all(fw, fh);
        app.validate_active_floating();
        Mux::new(app, ses, tx.clone())
    } else {
        let uuid = Uuid::new_v4();
        let name = match opts.name {
            Some(name) => name,
            None => {
                let taken: Vec<String> = match ses.as_mut() {
                    Some(client) => client
                        .list_sessions()
                        .await
                        .map(|entries| entries.into_iter().map(|e| e.name).collect())
                        .unwrap_or_default(),
                    None => Vec::new(),
                };
                names::generate(&taken)
            }
        };
        if let Some(client) = ses.as_mut() {
            client.register(uuid, name.clone()).await?;
        }
        let app = App::new(config, uuid, name, w, h);
        let mut mux = Mux::new(app, ses, tx.clone());
        let pane = mux.new_backend_pane(0, None).await?;
        let (x, y, uw, uh) = mux.app.usable();
        mux.app.push_tab(Tab::new("1", pane, x, y, uw, uh));
        mux.app.sync_focus_flags();
        mux
    };

    if mux.app.tabs.is_empty() {
        anyhow::bail!("no panes could be restored");
    }

    // VT channel for daemon-backed panes.
    if mux.ses.is_some() {
        let vt = SesClient::open_vt(&ses_spawn::socket_path(), mux.app.uuid).await?;
        let (mut vt_read, vt_write) = vt.into_split();
        mux.vt_writer = Some(vt_write);
        let vt_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match read_vt_frame(&mut vt_read).await {
                    Ok(Some((pane_id, bytes))) => {
                        let event = if bytes.is_empty() {
                            AppEvent::PodExited { pane_id }
                        } else {
                            AppEvent::PodOutput { pane_id, bytes }
                        };
                        if vt_tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => {
                        let _ = vt_tx.send(AppEvent::SesClosed);
                        break;
                    }
                }
            }
        });
    }

    let mut tui = Tui::new()?;
    tui.enter(mux.app.config.style.cursor_style)?;
    if let Some(warning) = config_warning {
        mux.app.pops.notify(warning, NOTICE_TTL);
    }
    mux.sync_sizes().await;

    event::start_stdin_reader(tx.clone());
    event::start_resize_watcher(tx.clone());
    event::start_ticker(tx.clone());

    // Main loop: draw, then absorb events until quiet.
    loop {
        if mux.app.needs_full_redraw {
            tui.terminal.clear()?;
            mux.app.needs_full_redraw = false;
        }
        tui.terminal
            .draw(|frame| render::draw(&mut mux.app, &mux.stats, frame))?;
        if !mux.raw_out.is_empty() {
            let bytes = std::mem::take(&mut mux.raw_out);
            tui.write_raw(&bytes);
        }

        // Wake early for key timers: a hold deadline between two frame
        // ticks must not slip a full frame.
        let event = match mux.app.keys.next_deadline() {
            Some(deadline) => tokio::select! {
                event = rx.recv() => event,
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    Some(AppEvent::Tick)
                }
            },
            None => rx.recv().await,
        };
        let Some(event) = event else {
            break;
        };
        mux.handle_event(event).await;
        while let Ok(event) = rx.try_recv() {
            if mux.app.should_exit {
                break;
            }
            mux.handle_event(event).await;
        }
        if mux.app.should_exit {
            break;
        }
    }

    tui.exit();
    let _ = std::fs::remove_file(&ipc_path);
    mux.teardown().await;
    Ok(())
}

impl Mux {
    pub fn new(app: App, ses: Option<SesClient>, tx: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            app,
            ses,
            vt_writer: None,
            tx,
            stats: HostStats::new(),
            pending_orphans: Vec::new(),
            raw_out: Vec::new(),
            last_shell_sync: Instant::now(),
            last_title: String::new(),
        }
    }

    async fn teardown(&mut self) {
        if self.app.detach_mode {
            return;
        }
        // The daemon reaps pod panes when the control channel closes;
        // local panes are ours to kill.
        for tab in &mut self.app.tabs {
            for pane in tab.layout.splits.values_mut() {
                pane.kill_local();
            }
        }
        for pane in &mut self.app.floats.panes {
            pane.kill_local();
        }
    }

    pub async fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Stdin(bytes) => self.handle_stdin(&bytes).await,
            AppEvent::StdinClosed => self.app.should_exit = true,
            AppEvent::Resize => {
                if let Ok((w, h)) = crossterm::terminal::size() {
                    self.app.apply_term_size(w, h);
                    self.sync_sizes().await;
                }
            }
            AppEvent::Tick => self.tick().await,
            AppEvent::PtyOutput { pane, bytes } => {
                if let Some(p) = self.app.find_pane_by_uuid_mut(pane) {
                    let flags = p.process_output(&bytes);
                    if flags.osc_query {
                        self.app.osc_reply_target = Some(pane);
                    }
                }
            }
            AppEvent::PtyExited { pane } => {
                if let Some(p) = self.app.find_pane_by_uuid_mut(pane) {
                    p.mark_dead();
                }
            }
            AppEvent::PodOutput { pane_id, bytes } => {
                if let Some(p) = self.app.find_pane_by_pod_mut(pane_id) {
                    let uuid = p.uuid;
                    let flags = p.process_output(&bytes);
                    if flags.osc_query {
                        self.app.osc_reply_target = Some(uuid);
                    }
                }
            }
            AppEvent::PodExited { pane_id } => {
                if let Some(p) = self.app.find_pane_by_pod_mut(pane_id) {
                    p.mark_dead();
                }
            }
            AppEvent::SesClosed => {
                for tab in &mut self.app.tabs {
                    for pane in tab.layout.splits.values_mut() {
                        if pane.pod_id.is_some() {
                            pane.mark_dead();
                        }
                    }
                }
                for pane in &mut self.app.floats.panes {
                    if pane.pod_id.is_some() {
                        pane.mark_dead();
                    }
                }
                self.vt_writer = None;
                self.ses = None;
                self.app
                    .pops
                    .notify("session daemon connection lost", NOTICE_TTL);
            }
            AppEvent::Ipc { msg, reply } => self.handle_ipc(msg, reply),
        }
    }

    fn handle_ipc(&mut self, msg: IpcMessage, reply: Option<tokio::sync::oneshot::Sender<String>>) {
        match msg {
            IpcMessage::Notify { message } => {
                self.app.pops.notify(message, NOTICE_TTL);
            }
            IpcMessage::ExitIntent => {
                self.app
                    .pops
                    .open(Popup::confirm("allow next shell exit without asking?"));
                self.app.pending_action = Some(PendingAction::ExitIntent);
                if let Some(reply) = reply {
                    self.app.pending_pop = Some(PendingPop {
                        scope: PopScope::Mux,
                        reply,
                    });
                }
            }
        }
    }

    // -- input ------------------------------------------------------------

    pub async fn handle_stdin(&mut self, bytes: &[u8]) {
        let mut data = std::mem::take(&mut self.app.stdin_tail);
        data.extend_from_slice(bytes);

        // MUX-level popup: the realm consumes everything.
        if self.app.pops.is_blocked() {
            for b in &data {
                self.app.pops.feed(*b);
            }
            self.resolve_popups().await;
            return;
        }
        // TAB-level popup: only tab switching passes through.
        if self.app.tabs[self.app.active_tab].pops.is_blocked() {
            self.tab_blocked_input(&data).await;
            return;
        }

        let mut i = 0;
        // Resume an in-flight OSC reply before anything else looks at
        // the chunk.
        if self.app.osc_capture.in_progress() {
            i = self.drain_osc(&data).await;
        }

        let (process_len, tail_len) = input::split_stash(&data[i..]);
        let end = i + process_len;
        self.app.stdin_tail = data[end..end + tail_len].to_vec();

        while i < end {
            if self.app.osc_capture.in_progress() {
                i += self.drain_osc(&data[i..end]).await;
                continue;
            }
            if self.app.osc_reply_target.is_some() && data[i..end].starts_with(b"\x1b]") {
                self.app.osc_capture.begin();
                i += 2;
                continue;
            }
            let (n, event) = input::next_event(&data[i..end]);
            if n == 0 {
                break;
            }
            let raw = data[i..i + n].to_vec();
            i += n;
            self.handle_parse_event(event, &raw).await;
        }
    }

    async fn drain_osc(&mut self, data: &[u8]) -> usize {
        let (n, done) = self.app.osc_capture.feed(data);
        if let Some(reply) = done {
            let target = self.app.osc_reply_target.take();
            if let Some(uuid) = target {
                if self.app.find_pane_by_uuid(uuid).is_some() {
                    let mut bytes = b"\x1b]".to_vec();
                    bytes.extend_from_slice(&reply);
                    self.write_to_pane(uuid, &bytes).await;
                    if let Some(pane) = self.app.find_pane_by_uuid_mut(uuid) {
                        pane.expect_osc_reply = false;
                    }
                }
            }
        }
        n
    }

    /// A tab popup blocks everything except the tab-switch binds.
    async fn tab_blocked_input(&mut self, data: &[u8]) {
        let mut i = 0;
        while i < data.len() {
            let (n, event) = input::next_event(&data[i..]);
            if n == 0 {
                // Trailing partial sequence while blocked: drop it.
                break;
            }
            let raw = &data[i..i + n];
            i += n;
            let chord = match event {
                ParseEvent::CsiU { code, mods, kind } => {
                    if kind != KeyEventKind::Press {
                        continue;
                    }
                    csi_u_key(code).map(|key| Chord::new(mods, key))
                }
                ParseEvent::AltChar(c) => Some(Chord::alt(c)),
                ParseEvent::Arrow { mods, dir } => Some(Chord::new(mods, arrow_key(dir))),
                _ => None,
            };
            let action = chord.and_then(|chord| {
                self.app
                    .config
                    .keymap
                    .find_best(chord, crate::keys::When::Press, self.app.focus_kind())
                    .map(|b| b.action)
            });
            match action {
                Some(Action::TabNext) => self.dispatch(Action::TabNext).await,
                Some(Action::TabPrev) => self.dispatch(Action::TabPrev).await,
                _ => {
                    for b in raw {
                        self.app.tabs[self.app.active_tab].pops.feed(*b);
                    }
                }
            }
        }
        self.resolve_popups().await;
    }

    async fn handle_parse_event(&mut self, event: ParseEvent, raw: &[u8]) {
        match event {
            ParseEvent::CsiU { code, mods, kind } => {
                match csi_u_key(code) {
                    // Unknown functional key: swallow, never leak the frame.
                    None => {}
                    Some(key) => self.on_chord(Chord::new(mods, key), kind).await,
                }
            }
            ParseEvent::SwallowCsiU => {}
            ParseEvent::Arrow { mods, dir } => {
                self.on_chord(Chord::new(mods, arrow_key(dir)), KeyEventKind::Press)
                    .await;
            }
            ParseEvent::AltChar(c) => {
                self.on_chord(Chord::alt(c), KeyEventKind::Press).await;
            }
            ParseEvent::Scroll(key) => self.scroll_key(key).await,
            ParseEvent::Mouse(frame) => self.mouse(frame).await,
            ParseEvent::Quit => self.app.should_exit = true,
            ParseEvent::Raw(_) => self.forward_to_focused(raw).await,
            ParseEvent::NeedMore => {}
        }
    }

    async fn on_chord(&mut self, chord: Chord, kind: KeyEventKind) {
        let focus = self.app.focus_kind();
        let outcomes =
            self.app
                .keys
                .on_key(&self.app.config.keymap, chord, kind, focus, Instant::now());
        for outcome in outcomes {
            match outcome {
                KeyOutcome::Dispatch(action) => self.dispatch(action).await,
                KeyOutcome::ForwardLegacy(chord) => {
                    let bytes = legacy_bytes(chord);
                    self.forward_to_focused(&bytes).await;
                }
                KeyOutcome::Consumed => {}
            }
        }
    }

    async fn scroll_key(&mut self, key: ScrollKey) {
        let in_alt = self
            .app
            .focused_pane()
            .map(|p| p.alternate_screen())
            .unwrap_or(false);
        if in_alt {
            self.forward_to_focused(key.bytes()).await;
            return;
        }
        let Some(pane) = self.app.focused_pane_mut() else {
            return;
        };
        match key {
            ScrollKey::PageUp => pane.scroll_up(5),
            ScrollKey::PageDown => pane.scroll_down(5),
            ScrollKey::Top => pane.scroll_to_top(),
            ScrollKey::Bottom => pane.scroll_to_bottom(),
            ScrollKey::LineUp => pane.scroll_up(1),
            ScrollKey::LineDown => pane.scroll_down(1),
        }
    }

    /// Forward bytes to the focused pane. A write into a scrolled-up
    /// pane snaps it back to the bottom first; a pane-level popup
    /// consumes the bytes instead.
    async fn forward_to_focused(&mut self, bytes: &[u8]) {
        let Some(uuid) = self.app.focused_uuid() else {
            return;
        };
        self.write_to_pane(uuid, bytes).await;
    }

    async fn write_to_pane(&mut self, uuid: Uuid, bytes: &[u8]) {
        let Some(pane) = self.app.find_pane_by_uuid_mut(uuid) else {
            return;
        };
        if pane.pops.is_blocked() {
            for b in bytes {
                pane.pops.feed(*b);
            }
            return;
        }
        if pane.is_scrolled() {
            pane.scroll_to_bottom();
        }
        match pane.pod_id {
            Some(pod_id) => {
                if let Some(writer) = &mut self.vt_writer {
                    let _ = write_vt_frame(writer, pod_id, bytes).await;
                }
            }
            None => pane.write_local(bytes),
        }
    }

    // -- mouse ------------------------------------------------------------

    fn hit_test(&self, x: u16, y: u16) -> Hit {
        // Topmost first: active float, then the rest in reverse draw
        // order, then the tiled layout.
        let tab = self.app.active_tab;
        let mut order = self.app.floats.visible_indices(tab);
        if let Some(active) = self.app.active_floating {
            if let Some(pos) = order.iter().position(|&i| i == active) {
                let idx = order.remove(pos);
                order.push(idx);
            }
        }
        for &idx in order.iter().rev() {
            let pane = &self.app.floats.panes[idx];
            if let Some(props) = &pane.float {
                let inside = x >= props.border_x
                    && x < props.border_x + props.border_w
                    && y >= props.border_y
                    && y < props.border_y + props.border_h;
                if inside {
                    return Hit::Float(idx);
                }
            }
        }
        for rect in self.app.tabs[tab].layout.rects() {
            if x >= rect.x && x < rect.x + rect.w && y >= rect.y && y < rect.y + rect.h {
                return Hit::Split(rect.id);
            }
        }
        Hit::Nothing
    }

    async fn mouse(&mut self, frame: MouseFrame) {
        // SGR coordinates are 1-based.
        let x = frame.x.saturating_sub(1);
        let y = frame.y.saturating_sub(1);

        if frame.is_wheel_up() || frame.is_wheel_down() {
            self.wheel(frame, x, y).await;
            return;
        }

        // Status row clicks switch tabs.
        if frame.press
            && !frame.is_motion()
            && self.app.status_height > 0
            && y == self.app.term_h.saturating_sub(1)
        {
            let area = ratatui::layout::Rect::new(0, y, self.app.term_w, 1);
            if let Some(tab) = render::status_bar::tab_hit(&self.app, area, x) {
                self.app.switch_tab(tab);
            }
            return;
        }

        if frame.press && !frame.is_motion() && frame.button() == 0 {
            self.mouse_press(frame, x, y).await;
        } else if frame.is_motion() {
            let dragging = self
                .app
                .selection
                .as_ref()
                .map(|s| (s.dragging, s.pane));
            if let Some((true, uuid)) = dragging {
                let update = self.app.find_pane_by_uuid_mut(uuid).and_then(|pane| {
                    if !pane.contains(x, y) {
                        return None;
                    }
                    let col = x - pane.x;
                    let row = (y - pane.y) as usize;
                    Some((col, pane.viewport_top() + row))
                });
                if let (Some((col, row)), Some(sel)) = (update, self.app.selection.as_mut()) {
                    sel.update(col, row);
                }
                return;
            }
            self.forward_mouse(frame, x, y).await;
        } else if !frame.press {
            let dragging = self
                .app
                .selection
                .as_ref()
                .map(|s| s.dragging)
                .unwrap_or(false);
            if dragging {
                self.mouse_release().await;
            } else {
                // Alt-screen apps want the release event too.
                self.forward_mouse(frame, x, y).await;
            }
        }
    }

    async fn wheel(&mut self, frame: MouseFrame, x: u16, y: u16) {
        let hit = self.hit_test(x, y);
        let uuid = match hit {
            Hit::Float(idx) => self.app.floats.panes[idx].uuid,
            Hit::Split(id) => {
                let tab = &self.app.tabs[self.app.active_tab];
                match tab.layout.splits.get(&id) {
                    Some(p) => p.uuid,
                    None => return,
                }
            }
            Hit::Nothing => return,
        };
        let geom = self
            .app
            .find_pane_by_uuid(uuid)
            .map(|p| (p.alternate_screen(), p.x, p.y));
        let Some((in_alt, px, py)) = geom else {
            return;
        };
        if in_alt {
            let translated = MouseFrame {
                x: x.saturating_sub(px) + 1,
                y: y.saturating_sub(py) + 1,
                ..frame
            };
            let bytes = translated.encode();
            self.write_to_pane(uuid, &bytes).await;
        } else if let Some(pane) = self.app.find_pane_by_uuid_mut(uuid) {
            if frame.is_wheel_up() {
                pane.scroll_up(3);
            } else {
                pane.scroll_down(3);
            }
        }
    }

    async fn mouse_press(&mut self, frame: MouseFrame, x: u16, y: u16) {
        self.app.selection = None;
        match self.hit_test(x, y) {
            Hit::Float(idx) => {
                self.app.active_floating = Some(idx);
            }
            Hit::Split(id) => {
                self.app.active_floating = None;
                self.app.tabs[self.app.active_tab].layout.focused_split_id = id;
            }
            Hit::Nothing => return,
        }
        self.app.sync_focus_flags();

        let override_mods = self.app.config.selection_override_mods;
        let Some(pane) = self.app.focused_pane_mut() else {
            return;
        };
        if !pane.contains(x, y) {
            // Border or shadow click: focus change only.
            return;
        }
        let col = x - pane.x;
        let row = (y - pane.y) as usize;
        if !pane.alternate_screen() || frame.mods().contains(override_mods) {
            let top = pane.viewport_top();
            let uuid = pane.uuid;
            self.app.selection = Some(crate::select::Selection::begin(uuid, col, top + row));
        } else {
            self.forward_mouse(frame, x, y).await;
        }
    }

    async fn mouse_release(&mut self) {
        let sel = match self.app.selection.as_mut() {
            Some(sel) if sel.dragging => {
                sel.finish();
                sel.clone()
            }
            _ => return,
        };
        let Some(pane) = self.app.find_pane_by_uuid_mut(sel.pane) else {
            return;
        };
        let text = crate::select::extract(pane, &sel);
        if !text.is_empty() {
            let osc = clipboard::copy(&text);
            self.raw_out.extend_from_slice(&osc);
            self.app.pops.notify("copied to clipboard", NOTICE_TTL);
        }
    }

    /// Forward a mouse frame to the pane under it, with pane-local,
    /// 1-based coordinates.
    async fn forward_mouse(&mut self, frame: MouseFrame, x: u16, y: u16) {
        let Some(pane) = self.app.focused_pane() else {
            return;
        };
        if !pane.alternate_screen() || !pane.contains(x, y) {
            return;
        }
        let uuid = pane.uuid;
        let translated = MouseFrame {
            x: x - pane.x + 1,
            y: y - pane.y + 1,
            ..frame
        };
        let bytes = translated.encode();
        self.write_to_pane(uuid, &bytes).await;
    }

    // -- actions ----------------------------------------------------------

    pub async fn dispatch(&mut self, action: Action) {
        match action {
            Action::MuxQuit => {
                if self.app.config.confirm_on_exit {
                    self.app.exit_from_shell_death = false;
                    self.app.pops.open(Popup::confirm("quit mux?"));
                    self.app.pending_action = Some(PendingAction::Exit);
                } else {
                    self.app.should_exit = true;
                }
            }
            Action::MuxDetach => {
                if self.app.config.confirm_on_detach {
                    self.app.pops.open(Popup::confirm("detach session?"));
                    self.app.pending_action = Some(PendingAction::Detach);
                } else {
                    self.do_detach().await;
                }
            }
            Action::PaneDisown => {
                self.app.pops.open(Popup::confirm("disown pane?"));
                self.app.pending_action = Some(PendingAction::Disown);
            }
            Action::PaneAdopt => self.start_adopt().await,
            Action::SplitH => self.split(SplitDir::H).await,
            Action::SplitV => self.split(SplitDir::V).await,
            Action::TabNew => self.tab_new().await,
            Action::TabNext => {
                let next = (self.app.active_tab + 1) % self.app.tabs.len();
                self.app.switch_tab(next);
            }
            Action::TabPrev => {
                let len = self.app.tabs.len();
                let prev = (self.app.active_tab + len - 1) % len;
                self.app.switch_tab(prev);
            }
            Action::TabClose => {
                if self.app.config.confirm_on_close {
                    self.app.pops.open(Popup::confirm("close?"));
                    self.app.pending_action = Some(PendingAction::Close);
                } else {
                    self.do_close().await;
                }
            }
            Action::FloatToggle(key) => self.toggle_float(key).await,
            Action::FloatNudge(dir) => {
                let (fw, fh) = self.app.float_usable();
                if let Some(idx) = self.app.active_floating {
                    floats::nudge(&mut self.app.floats.panes[idx], dir, fw, fh);
                    self.sync_sizes().await;
                }
            }
            Action::FocusMove(dir) => self.focus_move(dir),
        }
    }

    fn focus_move(&mut self, dir: Dir) {
        if self.app.active_floating.is_some() {
            return;
        }
        let hint = self.app.focused_pane().map(|p| {
            let (row, col) = p.screen().cursor_position();
            (p.x + col.min(p.w.saturating_sub(1)), p.y + row.min(p.h.saturating_sub(1)))
        });
        let tab = &mut self.app.tabs[self.app.active_tab];
        if tab.layout.focus_dir(dir, hint) {
            self.app.sync_focus_flags();
        }
    }

    async fn split(&mut self, dir: SplitDir) {
        let cwd = self.focused_cwd();
        let id = self.app.tabs[self.app.active_tab].layout.take_next_id();
        match self.new_backend_pane(id, cwd).await {
            Ok(pane) => {
                self.app.active_floating = None;
                let tab = &mut self.app.tabs[self.app.active_tab];
                tab.layout.split_focused(dir, pane);
                self.app.sync_focus_flags();
                self.sync_sizes().await;
            }
            Err(e) => {
                self.app
                    .pops
                    .notify(format!("split failed: {e:#}"), NOTICE_TTL);
            }
        }
    }

    async fn tab_new(&mut self) {
        let cwd = self.focused_cwd();
        match self.new_backend_pane(0, cwd).await {
            Ok(pane) => {
                let (x, y, uw, uh) = self.app.usable();
                let name = format!("{}", self.app.tabs.len() + 1);
                self.app.push_tab(Tab::new(name, pane, x, y, uw, uh));
                let target = self.app.tabs.len() - 1;
                self.app.switch_tab(target);
                self.sync_sizes().await;
            }
            Err(e) => {
                self.app
                    .pops
                    .notify(format!("new tab failed: {e:#}"), NOTICE_TTL);
            }
        }
    }

    async fn do_close(&mut self) {
        if let Some(idx) = self.app.active_floating {
            self.close_float(idx).await;
            return;
        }
        // Close the focused split; the tab itself only goes when its
        // last pane does, and the last tab of all ends the session.
        if let Some(mut pane) = self.app.tabs[self.app.active_tab].layout.close_focused() {
            self.kill_backend(&mut pane).await;
            self.app.sync_focus_flags();
            self.sync_sizes().await;
            return;
        }
        if self.app.tabs.len() <= 1 {
            self.app.should_exit = true;
            return;
        }
        let idx = self.app.active_tab;
        let (mut tab, dead_floats) = self.app.remove_tab(idx);
        for pane in tab.layout.splits.values_mut() {
            self.kill_backend(pane).await;
        }
        for mut pane in dead_floats {
            self.kill_backend(&mut pane).await;
        }
        self.sync_sizes().await;
    }

    async fn close_float(&mut self, idx: usize) {
        let mut pane = self.app.floats.panes.remove(idx);
        self.kill_backend(&mut pane).await;
        self.app.active_floating = None;
        self.app.validate_active_floating();
        self.sync_sizes().await;
    }

    async fn kill_backend(&mut self, pane: &mut Pane) {
        match pane.pod_id {
            Some(pod_id) => {
                if let Some(ses) = self.ses.as_mut() {
                    let _ = ses.kill_pane(pod_id).await;
                }
            }
            None => pane.kill_local(),
        }
    }

    // -- floats -----------------------------------------------------------

    async fn toggle_float(&mut self, key: u8) {
        let tab = self.app.active_tab;
        let defaults = self
            .app
            .config
            .float_defaults
            .get(&key)
            .cloned()
            .unwrap_or_default();
        let cwd = self.focused_cwd();
        let cwd_key = if defaults.per_cwd {
            cwd.clone().or_else(|| std::env::current_dir().ok())
        } else {
            None
        };

        if let Some(idx) = self.app.floats.find_by_key(key, cwd_key.as_ref(), tab) {
            if Floats::visible_on_tab(&self.app.floats.panes[idx], tab) {
                self.hide_float(idx, tab).await;
            } else {
                self.show_float(idx, tab);
            }
            return;
        }

        // First toggle: build the float from its defaults.
        let mut props = FloatProps {
            width_pct: defaults.width_pct,
            height_pct: defaults.height_pct,
            pos_x_pct: defaults.pos_x_pct,
            pos_y_pct: defaults.pos_y_pct,
            pad_x: defaults.pad_x,
            pad_y: defaults.pad_y,
            global: defaults.global,
            per_cwd: defaults.per_cwd,
            sticky: defaults.sticky,
            alone: defaults.alone,
            destroy: defaults.destroy,
            float_key: key,
            pwd_dir: cwd_key.clone(),
            parent_tab: (!defaults.global && !defaults.per_cwd).then_some(tab),
            ..FloatProps::default()
        };
        props.visible_tabs.insert(tab);

        let pane = match self.new_float_backend(&props, cwd).await {
            Ok(pane) => pane,
            Err(e) => {
                self.app
                    .pops
                    .notify(format!("float failed: {e:#}"), NOTICE_TTL);
                return;
            }
        };
        let mut pane = pane;
        pane.float = Some(props);
        // Float notices sit over other content; keep them understated.
        pane.configure_notifications(crate::pop::NotifyStyle::Quiet);
        let (fw, fh) = self.app.float_usable();
        floats::place(&mut pane, fw, fh);
        self.app.floats.panes.push(pane);
        let idx = self.app.floats.len() - 1;
        self.app.floats.enforce_alone(idx, tab);
        self.app.active_floating = Some(idx);
        self.app.sync_focus_flags();
        self.sync_sizes().await;
    }

    async fn new_float_backend(
        &mut self,
        props: &FloatProps,
        cwd: Option<PathBuf>,
    ) -> Result<Pane> {
        // Sticky floats first try to re-adopt a surviving backend.
        if props.sticky {
            if let Some(ses) = self.ses.as_mut() {
                let cwd_str = props
                    .pwd_dir
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                if let Ok(Some((_, uuid))) = ses.find_sticky(props.float_key, cwd_str).await {
                    self.app.pending_float_requests.insert(
                        uuid,
                        crate::app::PendingFloatRequest {
                            key: props.float_key,
                            tab: self.app.active_tab,
                            cwd: props.pwd_dir.clone(),
                        },
                    );
                    let (fw, fh) = self.app.float_usable();
                    let pod_id = ses.adopt_pane(uuid, fw, fh).await?;
                    self.app.pending_float_requests.remove(&uuid);
                    return Ok(Pane::open_pod(0, 0, 0, fw, fh, pod_id, uuid));
                }
            }
        }
        let mut pane = self.new_backend_pane(0, cwd).await?;
        if props.sticky {
            if let (Some(pod_id), Some(ses)) = (pane.pod_id, self.ses.as_mut()) {
                let _ = ses.set_sticky(pod_id, true).await;
            }
        }
        pane.visible = true;
        Ok(pane)
    }

    async fn hide_float(&mut self, idx: usize, tab: usize) {
        let destroy = {
            let pane = &mut self.app.floats.panes[idx];
            let Some(props) = pane.float.as_mut() else {
                return;
            };
            if props.global || props.per_cwd {
                props.visible_tabs.remove(&tab);
            } else {
                pane.visible = false;
            }
            pane.float.as_ref().map(|p| p.destroy_on_hide()).unwrap_or(false)
        };
        if destroy {
            let mut pane = self.app.floats.panes.remove(idx);
            self.kill_backend(&mut pane).await;
        }
        self.app.validate_active_floating();
    }

    fn show_float(&mut self, idx: usize, tab: usize) {
        {
            let pane = &mut self.app.floats.panes[idx];
            pane.visible = true;
            if let Some(props) = pane.float.as_mut() {
                if props.global || props.per_cwd {
                    props.visible_tabs.insert(tab);
                }
            }
        }
        self.app.floats.enforce_alone(idx, tab);
        let (fw, fh) = self.app.float_usable();
        floats::place(&mut self.app.floats.panes[idx], fw, fh);
        self.app.active_floating = Some(idx);
        self.app.sync_focus_flags();
    }

    // -- daemon-backed lifecycle -------------------------------------------

    fn focused_cwd(&self) -> Option<PathBuf> {
        self.app
            .focused_pane()
            .and_then(|p| self.app.pane_shell.get(&p.uuid))
            .map(|info| PathBuf::from(&info.cwd))
            .filter(|p| !p.as_os_str().is_empty())
    }

    async fn new_backend_pane(&mut self, id: u32, cwd: Option<PathBuf>) -> Result<Pane> {
        let (_, _, uw, uh) = self.app.usable();
        let cwd = cwd.or_else(|| std::env::current_dir().ok());
        match self.ses.as_mut() {
            Some(ses) => {
                let cwd_str = cwd.map(|p| p.display().to_string()).unwrap_or_default();
                let (pod_id, uuid) = ses
                    .create_pane(uw, uh, cwd_str, pty::default_shell())
                    .await?;
                Ok(Pane::open_pod(id, 0, 0, uw, uh, pod_id, uuid))
            }
            None => Pane::open_local(id, 0, 0, uw, uh, self.tx.clone(), cwd),
        }
    }

    /// Push sizes and the serialized layout to the daemon.
    async fn sync_sizes(&mut self) {
        let Some(ses) = self.ses.as_mut() else {
            return;
        };
        let mut sizes: Vec<(u32, u16, u16)> = Vec::new();
        for tab in &self.app.tabs {
            for pane in tab.layout.splits.values() {
                if let Some(pod_id) = pane.pod_id {
                    sizes.push((pod_id, pane.w, pane.h));
                }
            }
        }
        for pane in &self.app.floats.panes {
            if let Some(pod_id) = pane.pod_id {
                sizes.push((pod_id, pane.w, pane.h));
            }
        }
        for (pod_id, w, h) in sizes {
            let _ = ses.resize_pane(pod_id, w, h).await;
            // Best-effort legacy hook, result ignored.
            let mut aux = Vec::with_capacity(4);
            aux.extend_from_slice(&w.to_be_bytes());
            aux.extend_from_slice(&h.to_be_bytes());
            let _ = ses.update_pane_aux(pod_id, aux).await;
        }
        let state = session::capture(
            self.app.uuid,
            &self.app.session_name,
            &self.app.tabs,
            &self.app.floats,
            self.app.active_tab,
            self.app.active_floating,
        );
        if let Ok(json) = session::to_json(&state) {
            let _ = ses.sync_state(json).await;
        }
    }

    async fn do_detach(&mut self) {
        let Some(ses) = self.ses.as_mut() else {
            self.app
                .pops
                .notify("cannot detach without session daemon", NOTICE_TTL);
            return;
        };
        self.app.detach_mode = true;
        let state = session::capture(
            self.app.uuid,
            &self.app.session_name,
            &self.app.tabs,
            &self.app.floats,
            self.app.active_tab,
            self.app.active_floating,
        );
        match session::to_json(&state) {
            Ok(json) => match ses.detach(json).await {
                Ok(()) => self.app.should_exit = true,
                Err(e) => {
                    self.app.detach_mode = false;
                    self.app
                        .pops
                        .notify(format!("detach failed: {e:#}"), NOTICE_TTL);
                }
            },
            Err(e) => {
                self.app.detach_mode = false;
                self.app
                    .pops
                    .notify(format!("detach failed: {e:#}"), NOTICE_TTL);
            }
        }
    }

    async fn do_disown(&mut self) {
        let snapshot = self.app.focused_pane().map(|pane| {
            let flags = pane
                .float
                .as_ref()
                .map(|f| (f.sticky, f.float_key))
                .unwrap_or((false, 0));
            (pane.pod_id, flags, pane.w, pane.h)
        });
        let Some((pod_id, (sticky, float_key), uw, uh)) = snapshot else {
            return;
        };
        let Some(pod_id) = pod_id else {
            self.app
                .pops
                .notify("pane has no daemon backend", NOTICE_TTL);
            return;
        };
        let cwd = self
            .focused_cwd()
            .or_else(|| std::env::current_dir().ok())
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let Some(ses) = self.ses.as_mut() else {
            return;
        };
        let _ = ses.orphan_pane(pod_id, sticky, float_key, cwd.clone()).await;
        match ses.create_pane(uw, uh, cwd, pty::default_shell()).await {
            Ok((new_pod, new_uuid)) => {
                if let Some(pane) = self.app.focused_pane_mut() {
                    pane.replace_with_pod(new_pod, new_uuid);
                }
                self.app.skip_dead_check = true;
                self.sync_sizes().await;
            }
            Err(e) => {
                self.app
                    .pops
                    .notify(format!("disown respawn failed: {e:#}"), NOTICE_TTL);
            }
        }
    }

    async fn start_adopt(&mut self) {
        let Some(ses) = self.ses.as_mut() else {
            self.app
                .pops
                .notify("cannot adopt without session daemon", NOTICE_TTL);
            return;
        };
        match ses.list_orphaned().await {
            Ok(entries) if entries.is_empty() => {
                self.app.pops.notify("no orphaned panes", NOTICE_TTL);
            }
            Ok(entries) => {
                let items = entries
                    .iter()
                    .map(|e| format!("{}  {}", &e.uuid.simple().to_string()[..8], e.cwd))
                    .collect();
                self.pending_orphans = entries;
                self.app.pops.open(Popup::picker("adopt orphan", items));
                self.app.pending_action = Some(PendingAction::AdoptChoose);
            }
            Err(e) => {
                self.app
                    .pops
                    .notify(format!("list orphans failed: {e:#}"), NOTICE_TTL);
            }
        }
    }

    async fn finish_adopt(&mut self, orphan: Uuid, destroy_current: bool) {
        let Some(pane) = self.app.focused_pane() else {
            return;
        };
        let current_pod = pane.pod_id;
        let (w, h) = (pane.w, pane.h);
        let (sticky, float_key) = pane
            .float
            .as_ref()
            .map(|f| (f.sticky, f.float_key))
            .unwrap_or((false, 0));
        let cwd = self.focused_cwd().map(|p| p.display().to_string()).unwrap_or_default();
        let Some(ses) = self.ses.as_mut() else {
            return;
        };
        if let Some(pod_id) = current_pod {
            if destroy_current {
                let _ = ses.kill_pane(pod_id).await;
            } else {
                let _ = ses.orphan_pane(pod_id, sticky, float_key, cwd).await;
            }
        }
        match ses.adopt_pane(orphan, w, h).await {
            Ok(pod_id) => {
                if let Some(pane) = self.app.focused_pane_mut() {
                    pane.replace_with_pod(pod_id, orphan);
                }
                self.app.skip_dead_check = true;
                self.sync_sizes().await;
            }
            Err(e) => {
                self.app
                    .pops
                    .notify(format!("adopt failed: {e:#}"), NOTICE_TTL);
            }
        }
    }

    // -- tick -------------------------------------------------------------

    async fn tick(&mut self) {
        let now = Instant::now();

        if self.app.skip_dead_check {
            self.app.skip_dead_check = false;
        } else {
            self.sweep_dead().await;
        }

        // Key timers: focus context is whatever holds focus now.
        let focus = self.app.focus_kind();
        let outcomes = self
            .app
            .keys
            .tick(&self.app.config.keymap, focus, now);
        for outcome in outcomes {
            match outcome {
                KeyOutcome::Dispatch(action) => self.dispatch(action).await,
                KeyOutcome::ForwardLegacy(chord) => {
                    let bytes = legacy_bytes(chord);
                    self.forward_to_focused(&bytes).await;
                }
                KeyOutcome::Consumed => {}
            }
        }

        // Popup timeouts and notice expiry, all scopes.
        self.app.pops.tick(now);
        for tab in &mut self.app.tabs {
            tab.pops.tick(now);
            for pane in tab.layout.splits.values_mut() {
                pane.pops.tick(now);
            }
        }
        for pane in &mut self.app.floats.panes {
            pane.pops.tick(now);
        }
        self.resolve_popups().await;

        if let Some(deadline) = self.app.exit_intent_deadline {
            if deadline <= now {
                self.app.exit_intent_deadline = None;
            }
        }

        // A pane that wiped its screen demands a from-scratch frame.
        let mut cleared = false;
        for tab in &mut self.app.tabs {
            for pane in tab.layout.splits.values_mut() {
                if pane.did_clear {
                    pane.did_clear = false;
                    cleared = true;
                }
            }
        }
        for pane in &mut self.app.floats.panes {
            if pane.did_clear {
                pane.did_clear = false;
                cleared = true;
            }
        }
        if cleared {
            self.app.needs_full_redraw = true;
        }

        self.stats.refresh(now);
        self.shell_sync(now).await;
        self.update_title();
    }

    /// Focused-pane cwd/process resync against the daemon.
    async fn shell_sync(&mut self, now: Instant) {
        if now.duration_since(self.last_shell_sync) < SHELL_SYNC_INTERVAL {
            return;
        }
        self.last_shell_sync = now;
        let focused_pod = self.app.focused_pane().and_then(|p| p.pod_id);
        let Some(ses) = self.ses.as_mut() else {
            return;
        };
        if let Some(pod_id) = focused_pod {
            let _ = ses.get_pane_cwd(pod_id).await;
        }
        // Fold in answers from earlier ticks.
        let cwds: Vec<(u32, String)> = ses.pending_cwds.drain(..).collect();
        for (pod_id, cwd) in cwds {
            if let Some(pane) = self.app.find_pane_by_pod_mut(pod_id) {
                let uuid = pane.uuid;
                self.app
                    .pane_shell
                    .entry(uuid)
                    .or_insert_with(ShellInfo::default)
                    .cwd = cwd;
            }
        }
    }

    fn update_title(&mut self) {
        let title = format!(
            "{} · {}",
            self.app.session_name,
            self.app
                .tabs
                .get(self.app.active_tab)
                .map(|t| t.name.as_str())
                .unwrap_or("")
        );
        if title != self.last_title {
            self.raw_out
                .extend_from_slice(format!("\x1b]0;{}\x07", title).as_bytes());
            self.last_title = title;
        }
    }

    /// Mark-and-sweep: reap panes whose backends hung up. Runs at the
    /// top of the tick so the poll set only ever holds live fds.
    async fn sweep_dead(&mut self) {
        // Floats first.
        let mut idx = 0;
        while idx < self.app.floats.panes.len() {
            if self.app.floats.panes[idx].is_alive() {
                idx += 1;
                continue;
            }
            self.app.floats.panes.remove(idx);
            match self.app.active_floating {
                Some(a) if a == idx => self.app.active_floating = None,
                Some(a) if a > idx => self.app.active_floating = Some(a - 1),
                _ => {}
            }
        }
        self.app.validate_active_floating();

        // Tiled panes; a tab whose last pane died goes with it, and the
        // last tab of all turns into the exit path.
        let mut tab_idx = 0;
        while tab_idx < self.app.tabs.len() {
            let dead: Vec<u32> = self.app.tabs[tab_idx]
                .layout
                .splits
                .values()
                .filter(|p| !p.is_alive())
                .map(|p| p.id)
                .collect();
            let mut tab_died = false;
            for id in dead {
                if self.app.tabs[tab_idx].layout.close(id).is_some() {
                    continue;
                }
                // Last pane of this tab.
                if self.app.tabs.len() > 1 {
                    let (_, dead_floats) = self.app.remove_tab(tab_idx);
                    for mut pane in dead_floats {
                        self.kill_backend(&mut pane).await;
                    }
                    tab_died = true;
                    break;
                }
                self.last_pane_died().await;
            }
            if !tab_died {
                self.app.sync_focus_flags();
                tab_idx += 1;
            }
        }
    }

    /// The last pane of the last tab died.
    async fn last_pane_died(&mut self) {
        let intent_armed = self
            .app
            .exit_intent_deadline
            .map(|d| d > Instant::now())
            .unwrap_or(false);
        if intent_armed || !self.app.config.confirm_on_exit {
            self.app.should_exit = true;
            return;
        }
        if self.app.pops.is_blocked() || self.app.pending_action.is_some() {
            return;
        }
        self.app.exit_from_shell_death = true;
        self.app.pops.open(Popup::confirm("shell exited — quit mux?"));
        self.app.pending_action = Some(PendingAction::Exit);
    }

    /// Respawn a fresh backend into the focused (dead) pane.
    async fn respawn_focused(&mut self) {
        let cwd = self
            .focused_cwd()
            .or_else(|| std::env::current_dir().ok());
        let (w, h) = match self.app.focused_pane() {
            Some(p) => (p.w, p.h),
            None => return,
        };
        match self.ses.as_mut() {
            Some(ses) => {
                let cwd_str = cwd.map(|p| p.display().to_string()).unwrap_or_default();
                match ses.create_pane(w, h, cwd_str, pty::default_shell()).await {
                    Ok((pod_id, uuid)) => {
                        if let Some(pane) = self.app.focused_pane_mut() {
                            pane.replace_with_pod(pod_id, uuid);
                        }
                        self.app.skip_dead_check = true;
                    }
                    Err(e) => {
                        self.app
                            .pops
                            .notify(format!("respawn failed: {e:#}"), NOTICE_TTL);
                    }
                }
            }
            None => {
                let id = self
                    .app
                    .focused_pane()
                    .map(|p| p.id)
                    .unwrap_or(0);
                match Pane::open_local(id, 0, 0, w, h, self.tx.clone(), cwd) {
                    Ok(mut fresh) => {
                        if let Some(pane) = self.app.focused_pane_mut() {
                            fresh.resize(pane.x, pane.y, pane.w, pane.h);
                            *pane = fresh;
                        }
                        self.app.skip_dead_check = true;
                    }
                    Err(e) => {
                        self.app
                            .pops
                            .notify(format!("respawn failed: {e:#}"), NOTICE_TTL);
                    }
                }
            }
        }
    }

    // -- coordinator -------------------------------------------------------

    /// Advance the pending-action state machine on popup results.
    pub async fn resolve_popups(&mut self) {
        // Pane- and tab-scope popups carry no pending actions; a result
        // just closes them.
        for tab in &mut self.app.tabs {
            let _ = tab.pops.take_result();
            for pane in tab.layout.splits.values_mut() {
                let _ = pane.pops.take_result();
            }
        }
        for pane in &mut self.app.floats.panes {
            let _ = pane.pops.take_result();
        }

        let Some(result) = self.app.pops.take_result() else {
            return;
        };
        let pending = self.app.pending_action.take();
        let reply = self.app.pending_pop.take();

        match (pending, result) {
            (Some(PendingAction::Exit), PopResult::Confirm(true)) => {
                self.app.should_exit = true;
            }
            (Some(PendingAction::Exit), PopResult::Confirm(false)) => {
                if self.app.exit_from_shell_death {
                    self.app.exit_from_shell_death = false;
                    self.respawn_focused().await;
                }
            }
            (Some(PendingAction::Detach), PopResult::Confirm(true)) => {
                self.do_detach().await;
            }
            (Some(PendingAction::Disown), PopResult::Confirm(true)) => {
                self.do_disown().await;
            }
            (Some(PendingAction::Close), PopResult::Confirm(true)) => {
                self.do_close().await;
            }
            (Some(PendingAction::AdoptChoose), PopResult::Pick(i)) => {
                if let Some(entry) = self.pending_orphans.get(i) {
                    let orphan = entry.uuid;
                    self.app
                        .pops
                        .open(Popup::confirm("destroy current pane? (no = swap)"));
                    self.app.pending_action = Some(PendingAction::AdoptConfirm { orphan });
                }
            }
            (Some(PendingAction::AdoptConfirm { orphan }), PopResult::Confirm(yes)) => {
                self.finish_adopt(orphan, yes).await;
            }
            (Some(PendingAction::ExitIntent), PopResult::Confirm(yes)) => {
                if yes {
                    self.app.exit_intent_deadline = Some(Instant::now() + EXIT_INTENT_WINDOW);
                }
                if let Some(pending_pop) = reply {
                    let verdict = if yes { "ok" } else { "declined" };
                    let _ = pending_pop.reply.send(verdict.to_string());
                }
                return;
            }
            // Declines and cancellations fall through to a plain close.
            _ => {}
        }
        if let Some(pending_pop) = reply {
            let _ = pending_pop.reply.send("dismissed".to_string());
        }
    }
}

fn arrow_key(dir: Dir) -> Key {
    match dir {
        Dir::Up => Key::Up,
        Dir::Down => Key::Down,
        Dir::Left => Key::Left,
        Dir::Right => Key::Right,
    }
}

/// Map a CSI-u codepoint to a key. Unknown functional codepoints are
/// swallowed by the caller.
fn csi_u_key(code: u32) -> Option<Key> {
    match code {
        13 => Some(Key::Enter),
        9 => Some(Key::Tab),
        27 => Some(Key::Esc),
        127 => Some(Key::Backspace),
        _ => {
            let c = char::from_u32(code)?;
            if c.is_control() {
                None
            } else {
                Some(Key::Char(c))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_mux() -> Mux {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut config = Config::default();
        config.confirm_on_exit = true;
        let mut app = App::new(config, Uuid::new_v4(), "test".into(), 80, 24);
        let (x, y, uw, uh) = app.usable();
        app.push_tab(Tab::new("1", Pane::open_detached(0, x, y, uw, uh), x, y, uw, uh));
        app.sync_focus_flags();
        Mux::new(app, None, tx)
    }

    #[tokio::test]
    async fn quit_action_opens_confirm_and_yes_exits() {
        let mut mux = test_mux();
        mux.dispatch(Action::MuxQuit).await;
        assert!(mux.app.pops.is_blocked());
        assert_eq!(mux.app.pending_action, Some(PendingAction::Exit));

        // A blocked mux swallows ordinary input into the popup.
        mux.handle_stdin(b"y").await;
        assert!(mux.app.should_exit);
        assert_eq!(mux.app.pending_action, None);
    }

    #[tokio::test]
    async fn quit_confirm_declined_continues() {
        let mut mux = test_mux();
        mux.dispatch(Action::MuxQuit).await;
        mux.handle_stdin(b"n").await;
        assert!(!mux.app.should_exit);
        assert!(!mux.app.pops.is_blocked());
    }

    #[tokio::test]
    async fn ctrl_q_is_immediate() {
        let mut mux = test_mux();
        mux.handle_stdin(b"\x11").await;
        assert!(mux.app.should_exit);
    }

    #[tokio::test]
    async fn tab_popup_lets_tab_switch_through() {
        let mut mux = test_mux();
        let pane = Pane::open_detached(0, 0, 0, 80, 23);
        let (x, y, uw, uh) = mux.app.usable();
        mux.app.push_tab(Tab::new("2", pane, x, y, uw, uh));
        mux.app.tabs[0]
            .pops
            .open(Popup::confirm("tab question"));

        // alt+] is the default tab_next bind.
        mux.handle_stdin(b"\x1b]").await;
        // "\x1b]" parses as an OSC start; use the CSI-u form instead.
        mux.app.active_tab = 0;
        mux.handle_stdin(b"\x1b[93;3u").await;
        assert_eq!(mux.app.active_tab, 1);

        // Other keys are consumed by the popup, not forwarded.
        mux.app.active_tab = 0;
        mux.handle_stdin(b"x").await;
        assert_eq!(mux.app.active_tab, 0);
    }

    #[tokio::test]
    async fn osc_reply_routed_before_other_parsing() {
        let mut mux = test_mux();
        let uuid = mux.app.tabs[0].layout.focused().unwrap().uuid;
        // The pane asked a question.
        mux.app
            .find_pane_by_uuid_mut(uuid)
            .unwrap()
            .expect_osc_reply = true;
        mux.app.osc_reply_target = Some(uuid);

        mux.handle_stdin(b"ab\x1b]10;rgb:12/34/56\x07cd").await;
        assert_eq!(mux.app.osc_reply_target, None);
        assert!(!mux.app.find_pane_by_uuid(uuid).unwrap().expect_osc_reply);
        assert!(!mux.app.osc_capture.in_progress());
    }

    #[tokio::test]
    async fn osc_reply_survives_chunk_split() {
        let mut mux = test_mux();
        let uuid = mux.app.tabs[0].layout.focused().unwrap().uuid;
        mux.app.osc_reply_target = Some(uuid);

        mux.handle_stdin(b"\x1b]10;rgb:12").await;
        // Either captured already or stashed; both keep state coherent.
        mux.handle_stdin(b"/34\x07").await;
        assert_eq!(mux.app.osc_reply_target, None);
        assert!(!mux.app.osc_capture.in_progress());
        assert!(mux.app.stdin_tail.is_empty());
    }

    #[tokio::test]
    async fn partial_sequence_is_stashed_and_resumed() {
        let mut mux = test_mux();
        mux.handle_stdin(b"\x1b[1;3").await;
        assert_eq!(mux.app.stdin_tail, b"\x1b[1;3");
        // Completing the alt+right arrow moves focus (single pane: no-op,
        // but the tail must be consumed).
        mux.handle_stdin(b"C").await;
        assert!(mux.app.stdin_tail.is_empty());
    }

    #[tokio::test]
    async fn dead_pane_sweep_closes_split() {
        let mut mux = test_mux();
        let id = mux.app.tabs[0].layout.take_next_id();
        let (x, y, uw, uh) = mux.app.usable();
        let _ = (x, y);
        mux.app.tabs[0]
            .layout
            .split_focused(SplitDir::H, Pane::open_detached(id, 0, 0, uw, uh));
        mux.app.sync_focus_flags();
        assert_eq!(mux.app.tabs[0].layout.pane_count(), 2);

        mux.app.tabs[0]
            .layout
            .splits
            .get_mut(&id)
            .unwrap()
            .mark_dead();
        mux.tick().await;
        assert_eq!(mux.app.tabs[0].layout.pane_count(), 1);
        assert!(!mux.app.should_exit);
    }

    #[tokio::test]
    async fn last_pane_death_opens_exit_confirm() {
        let mut mux = test_mux();
        mux.app.tabs[0]
            .layout
            .focused_mut()
            .unwrap()
            .mark_dead();
        mux.tick().await;
        assert!(mux.app.pops.is_blocked());
        assert!(mux.app.exit_from_shell_death);
        assert_eq!(mux.app.pending_action, Some(PendingAction::Exit));
    }

    #[tokio::test]
    async fn exit_intent_window_skips_confirm() {
        let mut mux = test_mux();
        mux.app.exit_intent_deadline = Some(Instant::now() + Duration::from_secs(5));
        mux.app.tabs[0]
            .layout
            .focused_mut()
            .unwrap()
            .mark_dead();
        mux.tick().await;
        assert!(mux.app.should_exit);
    }

    #[tokio::test]
    async fn skip_dead_check_suppresses_one_sweep() {
        let mut mux = test_mux();
        mux.app.skip_dead_check = true;
        mux.app.tabs[0]
            .layout
            .focused_mut()
            .unwrap()
            .mark_dead();
        mux.tick().await;
        // First tick skipped the sweep.
        assert!(!mux.app.pops.is_blocked());
        assert!(!mux.app.skip_dead_check);
        mux.tick().await;
        assert!(mux.app.pops.is_blocked());
    }

    #[tokio::test]
    async fn scroll_keys_drive_viewport() {
        let mut mux = test_mux();
        {
            let pane = mux.app.tabs[0].layout.focused_mut().unwrap();
            for i in 0..100 {
                pane.process_output(format!("line {}\r\n", i).as_bytes());
            }
        }
        mux.handle_stdin(b"\x1b[5~").await;
        assert_eq!(
            mux.app.tabs[0].layout.focused().unwrap().scroll_offset,
            5
        );
        mux.handle_stdin(b"\x1b[1;2B").await;
        assert_eq!(
            mux.app.tabs[0].layout.focused().unwrap().scroll_offset,
            4
        );
        mux.handle_stdin(b"\x1b[F").await;
        assert_eq!(
            mux.app.tabs[0].layout.focused().unwrap().scroll_offset,
            0
        );
    }

    #[tokio::test]
    async fn mouse_press_begins_buffer_anchored_selection() {
        let mut mux = test_mux();
        {
            let pane = mux.app.tabs[0].layout.focused_mut().unwrap();
            for i in 0..100 {
                pane.process_output(format!("line {}\r\n", i).as_bytes());
            }
        }
        let top = mux.app.tabs[0]
            .layout
            .focused_mut()
            .unwrap()
            .viewport_top();

        // Press at local (5,3): SGR is 1-based.
        mux.handle_stdin(b"\x1b[<0;6;4M").await;
        let sel = mux.app.selection.as_ref().unwrap();
        assert_eq!(sel.anchor.col, 5);
        assert_eq!(sel.anchor.row, top + 3);

        // Scroll up 10, then drag to local (10,5): the anchor must not
        // move, the cursor lands relative to the new viewport top.
        mux.app.tabs[0].layout.focused_mut().unwrap().scroll_up(10);
        mux.handle_stdin(b"\x1b[<32;11;6M").await;
        let sel = mux.app.selection.as_ref().unwrap();
        assert_eq!(sel.anchor.row, top + 3);
        assert_eq!(sel.cursor.row, top - 10 + 5);
        assert_eq!(sel.cursor.col, 10);

        // Release finishes the drag and publishes OSC 52.
        mux.handle_stdin(b"\x1b[<0;11;6m").await;
        let sel = mux.app.selection.as_ref().unwrap();
        assert!(!sel.dragging);
        assert!(!mux.raw_out.is_empty());
        assert!(mux.raw_out.starts_with(b"\x1b]52;c;"));
    }

    #[tokio::test]
    async fn split_and_close_via_actions() {
        let mut mux = test_mux();
        // No daemon: splits fall back to local panes, which would spawn
        // real shells; drive the layout directly instead.
        let id = mux.app.tabs[0].layout.take_next_id();
        let (_, _, uw, uh) = mux.app.usable();
        mux.app.tabs[0]
            .layout
            .split_focused(SplitDir::H, Pane::open_detached(id, 0, 0, uw, uh));
        mux.app.sync_focus_flags();

        let rects = mux.app.tabs[0].layout.rects();
        assert_eq!(rects.len(), 2);
        assert_eq!(mux.app.tabs[0].layout.focused_split_id, 1);

        // Close the focused pane: collapse back to one full-size pane.
        mux.app.tabs[0].layout.close_focused().unwrap();
        let rects = mux.app.tabs[0].layout.rects();
        assert_eq!(rects.len(), 1);
        assert_eq!((rects[0].w, rects[0].h), (80, 23));
    }

    #[tokio::test]
    async fn close_action_removes_focused_split_first() {
        let mut mux = test_mux();
        mux.app.config.confirm_on_close = false;
        let id = mux.app.tabs[0].layout.take_next_id();
        let (_, _, uw, uh) = mux.app.usable();
        mux.app.tabs[0]
            .layout
            .split_focused(SplitDir::H, Pane::open_detached(id, 0, 0, uw, uh));
        mux.app.sync_focus_flags();

        mux.dispatch(Action::TabClose).await;
        assert_eq!(mux.app.tabs.len(), 1);
        assert_eq!(mux.app.tabs[0].layout.pane_count(), 1);
        assert!(!mux.app.should_exit);
        let rects = mux.app.tabs[0].layout.rects();
        assert_eq!((rects[0].w, rects[0].h), (80, 23));
    }

    #[tokio::test]
    async fn close_action_on_last_tab_exits() {
        let mut mux = test_mux();
        mux.app.config.confirm_on_close = false;
        mux.dispatch(Action::TabClose).await;
        assert!(mux.app.should_exit);
    }

    #[tokio::test]
    async fn exit_intent_ipc_replies() {
        let mut mux = test_mux();
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        mux.handle_ipc(IpcMessage::ExitIntent, Some(reply_tx));
        assert!(mux.app.pops.is_blocked());
        mux.handle_stdin(b"y").await;
        assert_eq!(reply_rx.await.unwrap(), "ok");
        assert!(mux.app.exit_intent_deadline.is_some());
    }

    #[tokio::test]
    async fn hold_then_release_short_tap_state() {
        let mut mux = test_mux();
        let chord = Chord::alt('z');
        let mut bind = crate::keys::Bind::new(chord, crate::keys::When::Hold, Action::SplitH);
        bind.hold_ms = Some(300);
        mux.app.config.keymap.binds.push(bind);

        // Press via CSI-u: consumed, timer armed.
        mux.handle_stdin(b"\x1b[122;3u").await;
        assert!(mux.app.keys.next_deadline().is_some());
        // Early release: timer cancelled.
        mux.handle_stdin(b"\x1b[122;3:3u").await;
        assert!(mux.app.keys.next_deadline().is_none());
    }

    #[test]
    fn csi_u_key_mapping() {
        assert_eq!(csi_u_key(13), Some(Key::Enter));
        assert_eq!(csi_u_key(9), Some(Key::Tab));
        assert_eq!(csi_u_key(27), Some(Key::Esc));
        assert_eq!(csi_u_key(127), Some(Key::Backspace));
        assert_eq!(csi_u_key(120), Some(Key::Char('x')));
        assert_eq!(csi_u_key(1), None);
    }
}
