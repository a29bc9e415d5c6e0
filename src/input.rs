//! Byte-stream input interpreter.
//!
//! Stdin arrives in arbitrary chunks that can split escape sequences
//! anywhere. The interpreter is a pure partial-consumer: `next_event`
//! returns `(consumed, event)` over `stash ++ chunk`, and `split_stash`
//! decides how much of a chunk is safe to process now versus carried to
//! the next read.

use crate::keys::{Dir, KeyEventKind, Mods};

pub const STASH_MAX: usize = 64;
pub const OSC_REPLY_MAX: usize = 64 * 1024;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;
const CTRL_Q: u8 = 0x11;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MouseFrame {
    pub btn: u32,
    /// 1-based column as reported by the terminal.
    pub x: u16,
    /// 1-based row as reported by the terminal.
    pub y: u16,
    pub press: bool,
}

impl MouseFrame {
    pub fn button(&self) -> u32 {
        self.btn & 0b11
    }

    pub fn is_motion(&self) -> bool {
        self.btn & 32 != 0
    }

    pub fn is_wheel_up(&self) -> bool {
        (self.btn & !0b11100) == 64
    }

    pub fn is_wheel_down(&self) -> bool {
        (self.btn & !0b11100) == 65
    }

    pub fn mods(&self) -> Mods {
        let mut mods = Mods::empty();
        if self.btn & 4 != 0 {
            mods |= Mods::SHIFT;
        }
        if self.btn & 8 != 0 {
            mods |= Mods::ALT;
        }
        if self.btn & 16 != 0 {
            mods |= Mods::CTRL;
        }
        mods
    }

    /// Re-encode as SGR bytes, for forwarding into alt-screen panes with
    /// coordinates already translated by the caller.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "\x1b[<{};{};{}{}",
            self.btn,
            self.x,
            self.y,
            if self.press { 'M' } else { 'm' }
        )
        .into_bytes()
    }
}

/// Viewport keys, each able to reproduce its wire form for panes that
/// take them directly (alt screen).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollKey {
    PageUp,
    PageDown,
    Top,
    Bottom,
    LineUp,
    LineDown,
}

impl ScrollKey {
    pub fn bytes(self) -> &'static [u8] {
        match self {
            ScrollKey::PageUp => b"\x1b[5~",
            ScrollKey::PageDown => b"\x1b[6~",
            ScrollKey::Top => b"\x1b[H",
            ScrollKey::Bottom => b"\x1b[F",
            ScrollKey::LineUp => b"\x1b[1;2A",
            ScrollKey::LineDown => b"\x1b[1;2B",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseEvent {
    /// A CSI-u key frame. The raw bytes are never forwarded.
    CsiU {
        code: u32,
        mods: Mods,
        kind: KeyEventKind,
    },
    /// A CSI-u-shaped frame that did not decode; swallowed.
    SwallowCsiU,
    Mouse(MouseFrame),
    Scroll(ScrollKey),
    /// `CSI 1 ; mods A..D` with modifiers (1;2 up/down is `Scroll`).
    Arrow {
        mods: Mods,
        dir: Dir,
    },
    /// `ESC c` with `c` outside `[`/`O`.
    AltChar(char),
    /// Ctrl+Q: immediate quit.
    Quit,
    /// Forward the next `n` bytes verbatim.
    Raw(usize),
    /// The buffer ends inside a sequence; stash and wait for more.
    NeedMore,
}

// ---------------------------------------------------------------------------
// Stash
// ---------------------------------------------------------------------------

/// Split `chunk` into a processable prefix and a tail holding an
/// incomplete trailing escape sequence. The tail is never longer than
/// `STASH_MAX`; a longer incomplete suffix is processed (and thus
/// forwarded) rather than stashed.
pub fn split_stash(chunk: &[u8]) -> (usize, usize) {
    let Some(last_esc) = chunk.iter().rposition(|&b| b == ESC) else {
        return (chunk.len(), 0);
    };
    let suffix = &chunk[last_esc..];
    if suffix_complete(suffix) {
        return (chunk.len(), 0);
    }
    if suffix.len() > STASH_MAX {
        return (chunk.len(), 0);
    }
    (last_esc, suffix.len())
}

/// Whether a byte run starting with ESC is a complete sequence (or
/// definitely not one, which is just as processable).
fn suffix_complete(suffix: &[u8]) -> bool {
    debug_assert_eq!(suffix.first(), Some(&ESC));
    if suffix.len() < 2 {
        return false;
    }
    match suffix[1] {
        b'[' => suffix[2..].iter().any(|&b| (0x40..=0x7e).contains(&b)),
        b'O' => suffix.len() >= 3,
        b']' => osc_terminator(&suffix[2..]).is_some(),
        _ => true,
    }
}

/// Offset one past the OSC terminator (BEL or ESC `\`) within `buf`.
fn osc_terminator(buf: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i < buf.len() {
        match buf[i] {
            BEL => return Some(i + 1),
            ESC if buf.get(i + 1) == Some(&b'\\') => return Some(i + 2),
            _ => i += 1,
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Event parsing
// ---------------------------------------------------------------------------

/// Parse one event at the head of `buf`. Returns the number of bytes
/// consumed. `Raw(n)` consumes and forwards `n` bytes; `NeedMore`
/// consumes nothing.
pub fn next_event(buf: &[u8]) -> (usize, ParseEvent) {
    if buf.is_empty() {
        return (0, ParseEvent::NeedMore);
    }
    if buf[0] == CTRL_Q {
        return (1, ParseEvent::Quit);
    }
    if buf[0] != ESC {
        // A raw run up to the next byte the interpreter cares about.
        let n = buf
            .iter()
            .position(|&b| b == ESC || b == CTRL_Q)
            .unwrap_or(buf.len());
        return (n, ParseEvent::Raw(n));
    }

    let Some(&second) = buf.get(1) else {
        return (0, ParseEvent::NeedMore);
    };
    match second {
        b'[' => parse_csi(buf),
        b'O' => {
            // SS3: pass through whole.
            if buf.len() < 3 {
                (0, ParseEvent::NeedMore)
            } else {
                (3, ParseEvent::Raw(3))
            }
        }
        b']' => match osc_terminator(&buf[2..]) {
            // OSC on stdin outside reply capture: pass through.
            Some(end) => (2 + end, ParseEvent::Raw(2 + end)),
            None => (0, ParseEvent::NeedMore),
        },
        c if c.is_ascii_graphic() || c == b' ' => (2, ParseEvent::AltChar(c as char)),
        _ => (2, ParseEvent::Raw(2)),
    }
}

fn parse_csi(buf: &[u8]) -> (usize, ParseEvent) {
    // buf starts with ESC [. Find the final byte; an ESC before it means
    // the sequence was abandoned mid-way.
    let Some(rel_final) = buf[2..]
        .iter()
        .position(|&b| (0x40..=0x7e).contains(&b) || b == ESC)
    else {
        return (0, ParseEvent::NeedMore);
    };
    let final_idx = 2 + rel_final;
    let final_byte = buf[final_idx];
    if final_byte == ESC {
        return (final_idx, ParseEvent::Raw(final_idx));
    }
    let params = &buf[2..final_idx];
    let len = final_idx + 1;

    if final_byte == b'M' || final_byte == b'm' {
        if params.first() == Some(&b'<') {
            if let Some(frame) = parse_sgr_mouse(&params[1..], final_byte == b'M') {
                return (len, ParseEvent::Mouse(frame));
            }
        }
        return (len, ParseEvent::Raw(len));
    }

    if final_byte == b'u' {
        return match parse_csi_u(params) {
            Some((code, mods, kind)) => (len, ParseEvent::CsiU { code, mods, kind }),
            None => (len, ParseEvent::SwallowCsiU),
        };
    }

    if final_byte == b'~' {
        let fields = split_params(params);
        let key = match fields.first().copied().flatten() {
            Some(1) => Some(ScrollKey::Top),
            Some(4) => Some(ScrollKey::Bottom),
            Some(5) => Some(ScrollKey::PageUp),
            Some(6) => Some(ScrollKey::PageDown),
            _ => None,
        };
        return match key {
            Some(k) if fields.len() <= 1 => (len, ParseEvent::Scroll(k)),
            _ => (len, ParseEvent::Raw(len)),
        };
    }

    if matches!(final_byte, b'A' | b'B' | b'C' | b'D') {
        let dir = match final_byte {
            b'A' => Dir::Up,
            b'B' => Dir::Down,
            b'C' => Dir::Right,
            _ => Dir::Left,
        };
        let fields = split_params(params);
        match fields.as_slice() {
            [] | [Some(1)] => return (len, ParseEvent::Raw(len)),
            [Some(1), Some(2)] if final_byte == b'A' => {
                return (len, ParseEvent::Scroll(ScrollKey::LineUp))
            }
            [Some(1), Some(2)] if final_byte == b'B' => {
                return (len, ParseEvent::Scroll(ScrollKey::LineDown))
            }
            [Some(1), Some(m)] => {
                return (
                    len,
                    ParseEvent::Arrow {
                        mods: Mods::from_xterm_param(*m),
                        dir,
                    },
                )
            }
            _ => return (len, ParseEvent::Raw(len)),
        }
    }

    if final_byte == b'H' && params.is_empty() {
        return (len, ParseEvent::Scroll(ScrollKey::Top));
    }
    if final_byte == b'F' && params.is_empty() {
        return (len, ParseEvent::Scroll(ScrollKey::Bottom));
    }

    (len, ParseEvent::Raw(len))
}

/// Split semicolon-separated numeric params; `None` for empty or
/// non-numeric fields (sub-parameters after `:` are cut off).
fn split_params(params: &[u8]) -> Vec<Option<u32>> {
    if params.is_empty() {
        return Vec::new();
    }
    params
        .split(|&b| b == b';')
        .map(|field| {
            let field = field.split(|&b| b == b':').next().unwrap_or(field);
            if field.is_empty() || !field.iter().all(u8::is_ascii_digit) {
                None
            } else {
                std::str::from_utf8(field).ok()?.parse().ok()
            }
        })
        .collect()
}

fn parse_csi_u(params: &[u8]) -> Option<(u32, Mods, KeyEventKind)> {
    let fields: Vec<&[u8]> = params.split(|&b| b == b';').collect();
    if fields.is_empty() || fields.len() > 3 {
        return None;
    }
    // code[:shifted[:base]]
    let code_field = fields[0].split(|&b| b == b':').next()?;
    if code_field.is_empty() || !code_field.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let code: u32 = std::str::from_utf8(code_field).ok()?.parse().ok()?;

    let (mods, kind) = match fields.get(1) {
        None => (Mods::empty(), KeyEventKind::Press),
        Some(field) => {
            let mut sub = field.split(|&b| b == b':');
            let mods_field = sub.next()?;
            if mods_field.is_empty() || !mods_field.iter().all(u8::is_ascii_digit) {
                return None;
            }
            let mods_param: u32 = std::str::from_utf8(mods_field).ok()?.parse().ok()?;
            let kind = match sub.next() {
                None => KeyEventKind::Press,
                Some(ev) => {
                    if ev.is_empty() || !ev.iter().all(u8::is_ascii_digit) {
                        return None;
                    }
                    KeyEventKind::from_csi_u(std::str::from_utf8(ev).ok()?.parse().ok()?)
                }
            };
            (Mods::from_xterm_param(mods_param), kind)
        }
    };
    // Field 3, when present, carries associated text; ignore its value.
    Some((code, mods, kind))
}

fn parse_sgr_mouse(params: &[u8], press: bool) -> Option<MouseFrame> {
    let fields = split_params(params);
    match fields.as_slice() {
        [Some(btn), Some(x), Some(y)] => Some(MouseFrame {
            btn: *btn,
            x: (*x).try_into().ok()?,
            y: (*y).try_into().ok()?,
            press,
        }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// OSC reply capture
// ---------------------------------------------------------------------------

/// Resumable capture of an OSC reply typed back by the outer terminal.
/// Armed by a pane that emitted an OSC query; the captured bytes are
/// written to that pane verbatim and never interpreted.
#[derive(Debug, Default)]
pub struct OscCapture {
    buf: Vec<u8>,
    in_progress: bool,
    prev_was_esc: bool,
}

impl OscCapture {
    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.in_progress = false;
        self.prev_was_esc = false;
    }

    /// Begin capturing; the caller has already seen `ESC ]` at the head
    /// of the remaining input.
    pub fn begin(&mut self) {
        self.reset();
        self.in_progress = true;
    }

    /// Consume reply bytes from the head of `buf`. Returns the consumed
    /// count and the full reply once terminated. On overflow the capture
    /// aborts, discarding the partial reply.
    pub fn feed(&mut self, buf: &[u8]) -> (usize, Option<Vec<u8>>) {
        let mut i = 0;
        while i < buf.len() {
            let b = buf[i];
            i += 1;
            if self.prev_was_esc {
                self.prev_was_esc = false;
                self.buf.push(ESC);
                self.buf.push(b);
                if b == b'\\' {
                    let reply = std::mem::take(&mut self.buf);
                    self.in_progress = false;
                    return (i, Some(reply));
                }
                continue;
            }
            match b {
                BEL => {
                    self.buf.push(BEL);
                    let reply = std::mem::take(&mut self.buf);
                    self.in_progress = false;
                    return (i, Some(reply));
                }
                ESC => self.prev_was_esc = true,
                _ => self.buf.push(b),
            }
            if self.buf.len() > OSC_REPLY_MAX {
                self.reset();
                return (i, None);
            }
        }
        (i, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- stash ---

    #[test]
    fn plain_text_not_stashed() {
        assert_eq!(split_stash(b"hello"), (5, 0));
    }

    #[test]
    fn trailing_bare_esc_stashed() {
        assert_eq!(split_stash(b"ab\x1b"), (2, 1));
    }

    #[test]
    fn trailing_partial_csi_stashed() {
        assert_eq!(split_stash(b"ab\x1b[1;3"), (2, 5));
    }

    #[test]
    fn complete_csi_not_stashed() {
        assert_eq!(split_stash(b"ab\x1b[1;3C"), (8, 0));
    }

    #[test]
    fn partial_osc_stashed() {
        assert_eq!(split_stash(b"\x1b]10;rgb:12"), (0, 11));
    }

    #[test]
    fn complete_osc_not_stashed() {
        let chunk = b"\x1b]10;rgb:12\x07";
        assert_eq!(split_stash(chunk), (chunk.len(), 0));
    }

    #[test]
    fn oversized_tail_dropped_and_forwarded() {
        let mut chunk = vec![0x1b, b']'];
        chunk.extend(std::iter::repeat(b'x').take(100));
        assert_eq!(split_stash(&chunk), (chunk.len(), 0));
    }

    #[test]
    fn earlier_complete_sequences_untouched() {
        // Complete CSI followed by a partial one: only the partial stashes.
        let chunk = b"\x1b[A\x1b[1";
        assert_eq!(split_stash(chunk), (3, 3));
    }

    #[test]
    fn stash_then_resume_equivalent() {
        // stash(S) ++ next == S ++ next for the parser.
        let full = b"\x1b[1;3C";
        let (head, tail) = split_stash(&full[..4]);
        assert_eq!((head, tail), (0, 4));
        let mut joined = full[..4].to_vec();
        joined.extend_from_slice(&full[4..]);
        let (n, ev) = next_event(&joined);
        assert_eq!(n, 6);
        assert_eq!(
            ev,
            ParseEvent::Arrow {
                mods: Mods::ALT,
                dir: Dir::Right
            }
        );
    }

    // --- events ---

    #[test]
    fn csi_u_press() {
        let (n, ev) = next_event(b"\x1b[120;3u");
        assert_eq!(n, 8);
        assert_eq!(
            ev,
            ParseEvent::CsiU {
                code: 120,
                mods: Mods::ALT,
                kind: KeyEventKind::Press
            }
        );
    }

    #[test]
    fn csi_u_release_event() {
        let (_, ev) = next_event(b"\x1b[120;3:3u");
        assert_eq!(
            ev,
            ParseEvent::CsiU {
                code: 120,
                mods: Mods::ALT,
                kind: KeyEventKind::Release
            }
        );
    }

    #[test]
    fn csi_u_bare_code() {
        let (_, ev) = next_event(b"\x1b[13u");
        assert_eq!(
            ev,
            ParseEvent::CsiU {
                code: 13,
                mods: Mods::empty(),
                kind: KeyEventKind::Press
            }
        );
    }

    #[test]
    fn csi_u_with_shifted_codepoint() {
        let (_, ev) = next_event(b"\x1b[97:65;2u");
        assert_eq!(
            ev,
            ParseEvent::CsiU {
                code: 97,
                mods: Mods::SHIFT,
                kind: KeyEventKind::Press
            }
        );
    }

    #[test]
    fn malformed_u_frame_swallowed() {
        let (n, ev) = next_event(b"\x1b[12;x3u");
        assert_eq!(n, 8);
        assert_eq!(ev, ParseEvent::SwallowCsiU);
    }

    #[test]
    fn sgr_mouse_press_and_release() {
        let (n, ev) = next_event(b"\x1b[<0;5;7M");
        assert_eq!(n, 9);
        assert_eq!(
            ev,
            ParseEvent::Mouse(MouseFrame {
                btn: 0,
                x: 5,
                y: 7,
                press: true
            })
        );
        let (_, ev) = next_event(b"\x1b[<0;5;7m");
        assert!(matches!(ev, ParseEvent::Mouse(f) if !f.press));
    }

    #[test]
    fn mouse_frame_classification() {
        let wheel = MouseFrame { btn: 64, x: 1, y: 1, press: true };
        assert!(wheel.is_wheel_up());
        let drag = MouseFrame { btn: 32, x: 1, y: 1, press: true };
        assert!(drag.is_motion());
        assert_eq!(drag.button(), 0);
        let shifted = MouseFrame { btn: 4, x: 1, y: 1, press: true };
        assert_eq!(shifted.mods(), Mods::SHIFT);
    }

    #[test]
    fn alt_arrow() {
        let (_, ev) = next_event(b"\x1b[1;3B");
        assert_eq!(
            ev,
            ParseEvent::Arrow {
                mods: Mods::ALT,
                dir: Dir::Down
            }
        );
    }

    #[test]
    fn plain_arrow_is_raw() {
        let (n, ev) = next_event(b"\x1b[A");
        assert_eq!((n, ev), (3, ParseEvent::Raw(3)));
    }

    #[test]
    fn scroll_keys() {
        assert_eq!(next_event(b"\x1b[5~").1, ParseEvent::Scroll(ScrollKey::PageUp));
        assert_eq!(next_event(b"\x1b[6~").1, ParseEvent::Scroll(ScrollKey::PageDown));
        assert_eq!(next_event(b"\x1b[H").1, ParseEvent::Scroll(ScrollKey::Top));
        assert_eq!(next_event(b"\x1b[1~").1, ParseEvent::Scroll(ScrollKey::Top));
        assert_eq!(next_event(b"\x1b[F").1, ParseEvent::Scroll(ScrollKey::Bottom));
        assert_eq!(next_event(b"\x1b[4~").1, ParseEvent::Scroll(ScrollKey::Bottom));
        assert_eq!(next_event(b"\x1b[1;2A").1, ParseEvent::Scroll(ScrollKey::LineUp));
        assert_eq!(next_event(b"\x1b[1;2B").1, ParseEvent::Scroll(ScrollKey::LineDown));
    }

    #[test]
    fn alt_char() {
        assert_eq!(next_event(b"\x1bx").1, ParseEvent::AltChar('x'));
        // ESC [ and ESC O are not alt-chars.
        assert_ne!(next_event(b"\x1bOP").1, ParseEvent::AltChar('O'));
    }

    #[test]
    fn ctrl_q_quits() {
        assert_eq!(next_event(b"\x11rest").1, ParseEvent::Quit);
    }

    #[test]
    fn raw_run_stops_at_esc() {
        let (n, ev) = next_event(b"abc\x1b[A");
        assert_eq!((n, ev), (3, ParseEvent::Raw(3)));
    }

    #[test]
    fn abandoned_csi_flushed_as_raw() {
        // ESC interrupts the first CSI; the broken prefix passes through
        // and the following sequence still parses.
        let (n, ev) = next_event(b"\x1b[1\x1b[1;3A");
        assert_eq!((n, ev), (3, ParseEvent::Raw(3)));
        let (n, ev) = next_event(&b"\x1b[1\x1b[1;3A"[3..]);
        assert_eq!(n, 6);
        assert_eq!(
            ev,
            ParseEvent::Arrow {
                mods: Mods::ALT,
                dir: Dir::Up
            }
        );
    }

    #[test]
    fn byte_conservation_over_mixed_chunk() {
        // Every byte is either consumed by an event or forwarded via Raw.
        let chunk = b"ab\x1b[<0;1;1M\x1b[120;3ucd";
        let mut i = 0;
        let mut raw = Vec::new();
        let mut events = 0;
        while i < chunk.len() {
            let (n, ev) = next_event(&chunk[i..]);
            assert!(n > 0);
            if let ParseEvent::Raw(r) = ev {
                raw.extend_from_slice(&chunk[i..i + r]);
            } else {
                events += 1;
            }
            i += n;
        }
        assert_eq!(raw, b"abcd");
        assert_eq!(events, 2);
    }

    // --- OSC capture ---

    #[test]
    fn osc_capture_bel_terminated() {
        let mut cap = OscCapture::default();
        cap.begin();
        let (n, done) = cap.feed(b"10;rgb:12/34/56\x07rest");
        assert_eq!(n, 16);
        assert_eq!(done.unwrap(), b"10;rgb:12/34/56\x07");
        assert!(!cap.in_progress());
    }

    #[test]
    fn osc_capture_st_terminated_across_chunks() {
        let mut cap = OscCapture::default();
        cap.begin();
        let (n, done) = cap.feed(b"10;rgb:12");
        assert_eq!(n, 9);
        assert!(done.is_none());
        assert!(cap.in_progress());
        let (n, done) = cap.feed(b"/34\x1b\\tail");
        assert_eq!(n, 5);
        assert_eq!(done.unwrap(), b"10;rgb:12/34\x1b\\");
    }

    #[test]
    fn osc_capture_overflow_resets() {
        let mut cap = OscCapture::default();
        cap.begin();
        let big = vec![b'a'; OSC_REPLY_MAX + 2];
        let (_, done) = cap.feed(&big);
        assert!(done.is_none());
        assert!(!cap.in_progress());
    }
}
