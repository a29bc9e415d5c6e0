pub mod pty;

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use portable_pty::PtySize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::event::AppEvent;
use crate::floats::FloatProps;
use crate::pop::PopSet;

/// Scrollback lines retained per pane.
pub const SCROLLBACK: usize = 10_000;

/// Which backend feeds the pane's VT engine.
enum Backend {
    /// Daemon-owned: bytes route over the VT channel by `pod_id`.
    Pod,
    /// Locally-owned PTY (daemon unreachable).
    Local(pty::PtyHandle),
    /// No backend; used while rebuilding on reattach and in tests.
    Detached,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputFlags {
    pub had_data: bool,
    pub did_clear: bool,
    pub osc_query: bool,
}

/// One child terminal session.
pub struct Pane {
    pub uuid: Uuid,
    /// Layout-local id; unique within one tab's split table or the float list.
    pub id: u32,
    /// VT-channel routing id assigned by the daemon.
    pub pod_id: Option<u32>,
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
    pub focused: bool,
    pub visible: bool,
    pub float: Option<FloatProps>,
    pub title: String,
    /// Forces the next frame to repaint from scratch.
    pub did_clear: bool,
    /// The child asked a question (OSC query); the next OSC reply on
    /// stdin belongs to this pane.
    pub expect_osc_reply: bool,
    pub scroll_offset: usize,
    pub pops: PopSet,
    /// Backend hung up; the sweep at the top of the next tick reaps it.
    dead: bool,
    vt: vt100::Parser,
    backend: Backend,
}

impl Pane {
    fn new(id: u32, x: u16, y: u16, w: u16, h: u16, backend: Backend, uuid: Uuid) -> Self {
        Self {
            uuid,
            id,
            pod_id: None,
            x,
            y,
            w,
            h,
            focused: false,
            visible: true,
            float: None,
            title: String::new(),
            did_clear: false,
            expect_osc_reply: false,
            scroll_offset: 0,
            pops: PopSet::default(),
            dead: false,
            vt: vt100::Parser::new(h.max(1), w.max(1), SCROLLBACK),
            backend,
        }
    }

    /// Daemon-backed pane; the daemon already spawned the child.
    pub fn open_pod(id: u32, x: u16, y: u16, w: u16, h: u16, pod_id: u32, uuid: Uuid) -> Self {
        let mut pane = Self::new(id, x, y, w, h, Backend::Pod, uuid);
        pane.pod_id = Some(pod_id);
        pane
    }

    /// Locally-backed pane, spawned with the default shell.
    pub fn open_local(
        id: u32,
        x: u16,
        y: u16,
        w: u16,
        h: u16,
        event_tx: mpsc::UnboundedSender<AppEvent>,
        cwd: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let uuid = Uuid::new_v4();
        let size = PtySize {
            rows: h.max(1),
            cols: w.max(1),
            pixel_width: 0,
            pixel_height: 0,
        };
        let handle = pty::spawn_pty(
            &pty::default_shell(),
            size,
            event_tx,
            uuid,
            cwd.as_deref(),
        )
        .context("spawn local pane")?;
        Ok(Self::new(id, x, y, w, h, Backend::Local(handle), uuid))
    }

    /// Backend-less pane for reattach rebuilding and tests.
    pub fn open_detached(id: u32, x: u16, y: u16, w: u16, h: u16) -> Self {
        Self::new(id, x, y, w, h, Backend::Detached, Uuid::new_v4())
    }

    pub fn is_alive(&self) -> bool {
        !self.dead
    }

    /// Backend hangups arrive as events (reader EOF, zero-length VT
    /// frame); this only flags the pane for the next sweep.
    pub fn mark_dead(&mut self) {
        self.dead = true;
    }

    /// Swap the backend while keeping the VT engine and scrollback.
    /// Used by disown-respawn and adopt.
    pub fn replace_with_pod(&mut self, pod_id: u32, uuid: Uuid) {
        self.backend = Backend::Pod;
        self.pod_id = Some(pod_id);
        self.uuid = uuid;
        self.dead = false;
    }

    /// Write to a locally-backed pane. Pod panes route through the VT
    /// channel instead; the caller dispatches on `pod_id`.
    pub fn write_local(&mut self, bytes: &[u8]) {
        if let Backend::Local(handle) = &mut self.backend {
            let _ = handle.writer.write_all(bytes);
            let _ = handle.writer.flush();
        }
    }

    pub fn kill_local(&mut self) {
        if let Backend::Local(handle) = &mut self.backend {
            let _ = handle.child.kill();
        }
    }

    /// Feed child output into the VT engine, reporting what the caller
    /// must react to.
    pub fn process_output(&mut self, bytes: &[u8]) -> OutputFlags {
        let mut flags = OutputFlags {
            had_data: !bytes.is_empty(),
            ..OutputFlags::default()
        };
        if contains_clear(bytes) {
            flags.did_clear = true;
            self.did_clear = true;
        }
        if contains_osc_query(bytes) {
            flags.osc_query = true;
            self.expect_osc_reply = true;
        }
        self.vt.process(bytes);
        if self.scroll_offset > 0 {
            self.scroll_offset = self.vt.screen().scrollback();
        }
        let osc_title = self.vt.screen().title();
        if !osc_title.is_empty() && osc_title != self.title {
            self.title = osc_title.to_string();
        }
        flags
    }

    pub fn resize(&mut self, x: u16, y: u16, w: u16, h: u16) {
        self.x = x;
        self.y = y;
        self.w = w;
        self.h = h;
        if self.scroll_offset > 0 {
            self.scroll_to_bottom();
        }
        self.vt.set_size(h.max(1), w.max(1));
        if let Backend::Local(handle) = &mut self.backend {
            let _ = handle.master.resize(PtySize {
                rows: h.max(1),
                cols: w.max(1),
                pixel_width: 0,
                pixel_height: 0,
            });
        }
    }

    pub fn screen(&self) -> &vt100::Screen {
        self.vt.screen()
    }

    pub fn alternate_screen(&self) -> bool {
        self.vt.screen().alternate_screen()
    }

    pub fn is_scrolled(&self) -> bool {
        self.scroll_offset > 0
    }

    pub fn scroll_up(&mut self, n: usize) {
        self.vt.set_scrollback(self.scroll_offset.saturating_add(n));
        self.scroll_offset = self.vt.screen().scrollback();
    }

    pub fn scroll_down(&mut self, n: usize) {
        self.vt.set_scrollback(self.scroll_offset.saturating_sub(n));
        self.scroll_offset = self.vt.screen().scrollback();
    }

    pub fn scroll_to_top(&mut self) {
        self.vt.set_scrollback(usize::MAX);
        self.scroll_offset = self.vt.screen().scrollback();
    }

    pub fn scroll_to_bottom(&mut self) {
        self.vt.set_scrollback(0);
        self.scroll_offset = 0;
    }

    /// Absolute row of the current viewport's top line. Row 0 is the
    /// oldest retained scrollback line, so this is invariant under
    /// viewport movement but grows as output scrolls.
    pub fn viewport_top(&mut self) -> usize {
        let current = self.scroll_offset;
        self.vt.set_scrollback(usize::MAX);
        let max = self.vt.screen().scrollback();
        self.vt.set_scrollback(current);
        max - current
    }

    /// Run `f` with the viewport positioned so `abs_row` is the top
    /// visible row, then restore. Selection extraction walks history
    /// this way.
    pub fn with_viewport_at<R>(&mut self, abs_row: usize, f: impl FnOnce(&vt100::Screen, u16) -> R) -> R {
        let current = self.scroll_offset;
        self.vt.set_scrollback(usize::MAX);
        let max = self.vt.screen().scrollback();
        let (offset, row) = if abs_row >= max {
            (0, (abs_row - max) as u16)
        } else {
            (max - abs_row, 0)
        };
        self.vt.set_scrollback(offset);
        let out = f(self.vt.screen(), row);
        self.vt.set_scrollback(current);
        out
    }

    /// Bind the notification carrier for this pane.
    pub fn configure_notifications(&mut self, style: crate::pop::NotifyStyle) {
        self.pops.notify_style = style;
    }

    /// Content rectangle hit test in screen coordinates.
    pub fn contains(&self, x: u16, y: u16) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }
}

/// The child wiped the screen; the next frame must repaint fully.
fn contains_clear(bytes: &[u8]) -> bool {
    bytes
        .windows(4)
        .any(|w| w == &b"\x1b[2J"[..] || w == &b"\x1b[3J"[..])
        || bytes.windows(2).any(|w| w == &b"\x1bc"[..])
}

/// An OSC query (e.g. `ESC ] 10 ; ? BEL`) asks the outer terminal a
/// question; the answer comes back on stdin and must be proxied.
fn contains_osc_query(bytes: &[u8]) -> bool {
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == 0x1b && bytes[i + 1] == b']' {
            let mut j = i + 2;
            while j < bytes.len() {
                match bytes[j] {
                    0x07 => break,
                    0x1b if bytes.get(j + 1) == Some(&b'\\') => break,
                    b'?' => return true,
                    _ => j += 1,
                }
            }
            i = j;
        }
        i += 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pane() -> Pane {
        Pane::open_detached(0, 0, 0, 80, 24)
    }

    #[test]
    fn process_output_reaches_screen() {
        let mut p = pane();
        let flags = p.process_output(b"hello");
        assert!(flags.had_data);
        assert_eq!(p.screen().cell(0, 0).unwrap().contents(), "h");
    }

    #[test]
    fn clear_detection() {
        let mut p = pane();
        assert!(p.process_output(b"\x1b[2J").did_clear);
        assert!(p.did_clear);
        let mut p = pane();
        assert!(!p.process_output(b"plain").did_clear);
    }

    #[test]
    fn osc_query_arms_reply_expectation() {
        let mut p = pane();
        let flags = p.process_output(b"\x1b]10;?\x07");
        assert!(flags.osc_query);
        assert!(p.expect_osc_reply);
    }

    #[test]
    fn osc_set_title_is_not_a_query() {
        let mut p = pane();
        let flags = p.process_output(b"\x1b]0;my title\x07");
        assert!(!flags.osc_query);
        assert_eq!(p.title, "my title");
    }

    #[test]
    fn scroll_round_trip() {
        let mut p = pane();
        for i in 0..100 {
            p.process_output(format!("line {}\r\n", i).as_bytes());
        }
        assert!(!p.is_scrolled());
        p.scroll_up(10);
        assert_eq!(p.scroll_offset, 10);
        p.scroll_down(4);
        assert_eq!(p.scroll_offset, 6);
        p.scroll_to_bottom();
        assert!(!p.is_scrolled());
    }

    #[test]
    fn scroll_to_top_clamps() {
        let mut p = pane();
        for i in 0..30 {
            p.process_output(format!("line {}\r\n", i).as_bytes());
        }
        p.scroll_to_top();
        // 30 lines of output on a 24-row screen leaves 7 in scrollback
        // (the trailing newline opens row 31).
        assert!(p.scroll_offset > 0);
        assert!(p.scroll_offset <= 30);
    }

    #[test]
    fn viewport_top_invariant_under_scroll() {
        let mut p = pane();
        for i in 0..100 {
            p.process_output(format!("line {}\r\n", i).as_bytes());
        }
        let top = p.viewport_top();
        p.scroll_up(10);
        assert_eq!(p.viewport_top(), top - 10);
        p.scroll_down(10);
        assert_eq!(p.viewport_top(), top);
    }

    #[test]
    fn with_viewport_at_reads_history() {
        let mut p = pane();
        for i in 0..100 {
            p.process_output(format!("line {}\r\n", i).as_bytes());
        }
        let text = p.with_viewport_at(0, |screen, row| {
            screen.contents_between(row, 0, row + 1, 10)
        });
        assert!(text.starts_with("line 0"));
        // Viewport restored.
        assert!(!p.is_scrolled());
    }

    #[test]
    fn replace_with_pod_keeps_scrollback() {
        let mut p = pane();
        p.process_output(b"kept\r\n");
        let new_uuid = Uuid::new_v4();
        p.replace_with_pod(7, new_uuid);
        assert_eq!(p.pod_id, Some(7));
        assert_eq!(p.uuid, new_uuid);
        assert_eq!(p.screen().cell(0, 0).unwrap().contents(), "k");
    }

    #[test]
    fn resize_updates_engine() {
        let mut p = pane();
        p.resize(2, 3, 40, 10);
        assert_eq!((p.x, p.y, p.w, p.h), (2, 3, 40, 10));
        assert_eq!(p.screen().size(), (10, 40));
    }

    #[test]
    fn hit_test() {
        let mut p = pane();
        p.resize(10, 5, 20, 10);
        assert!(p.contains(10, 5));
        assert!(p.contains(29, 14));
        assert!(!p.contains(30, 14));
        assert!(!p.contains(9, 5));
    }
}
