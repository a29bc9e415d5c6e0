use std::time::{Duration, Instant};

use bitflags::bitflags;
use serde::Deserialize;

bitflags! {
    /// Keyboard modifiers, in xterm parameter order.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Mods: u8 {
        const SHIFT = 0b0001;
        const ALT   = 0b0010;
        const CTRL  = 0b0100;
        const SUPER = 0b1000;
    }
}

impl Mods {
    /// Decode the xterm modifier parameter (`1 + bitmask`, `0`/`1` = none).
    pub fn from_xterm_param(param: u32) -> Self {
        if param <= 1 {
            Mods::empty()
        } else {
            Mods::from_bits_truncate((param - 1) as u8)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    Up,
    Down,
    Right,
    Left,
    Enter,
    Tab,
    Backspace,
    Esc,
}

/// A modifier + key pair, the unit key binds attach to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Chord {
    pub mods: Mods,
    pub key: Key,
}

impl Chord {
    pub fn new(mods: Mods, key: Key) -> Self {
        Self { mods, key }
    }

    pub fn alt(c: char) -> Self {
        Self::new(Mods::ALT, Key::Char(c))
    }
}

/// Press/repeat/release as carried by CSI-u frames. Legacy input only
/// ever produces `Press`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyEventKind {
    Press,
    Repeat,
    Release,
}

impl KeyEventKind {
    pub fn from_csi_u(param: u32) -> Self {
        match param {
            2 => KeyEventKind::Repeat,
            3 => KeyEventKind::Release,
            _ => KeyEventKind::Press,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum When {
    Press,
    Release,
    Repeat,
    DoubleTap,
    Hold,
}

/// Which kind of pane must hold focus for a bind to apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusCtx {
    Split,
    Float,
    #[default]
    Any,
}

/// What currently holds focus; compared against `FocusCtx` at fire time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FocusKind {
    Split,
    Float,
}

impl FocusCtx {
    pub fn matches(self, focus: FocusKind) -> bool {
        match self {
            FocusCtx::Any => true,
            FocusCtx::Split => focus == FocusKind::Split,
            FocusCtx::Float => focus == FocusKind::Float,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dir {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    MuxQuit,
    MuxDetach,
    PaneDisown,
    PaneAdopt,
    SplitH,
    SplitV,
    TabNew,
    TabNext,
    TabPrev,
    TabClose,
    FloatToggle(u8),
    FloatNudge(Dir),
    FocusMove(Dir),
}

#[derive(Clone, Debug)]
pub struct Bind {
    pub chord: Chord,
    pub when: When,
    pub ctx: FocusCtx,
    pub action: Action,
    pub hold_ms: Option<u64>,
    pub double_tap_ms: Option<u64>,
}

impl Bind {
    pub fn new(chord: Chord, when: When, action: Action) -> Self {
        Self {
            chord,
            when,
            ctx: FocusCtx::Any,
            action,
            hold_ms: None,
            double_tap_ms: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Keymap {
    pub binds: Vec<Bind>,
}

impl Keymap {
    /// Pick the bind for `(chord, when)` under the current focus.
    ///
    /// Score: +1 for a non-any focus context, +1 for `hold_ms`, +1 for
    /// `double_tap_ms`. Later binds win ties, so a user bind appended
    /// after a default overrides it.
    pub fn find_best(&self, chord: Chord, when: When, focus: FocusKind) -> Option<&Bind> {
        let mut best: Option<(&Bind, u8)> = None;
        for bind in &self.binds {
            if bind.chord != chord || bind.when != when || !bind.ctx.matches(focus) {
                continue;
            }
            let mut score = 0u8;
            if bind.ctx != FocusCtx::Any {
                score += 1;
            }
            if bind.hold_ms.is_some() {
                score += 1;
            }
            if bind.double_tap_ms.is_some() {
                score += 1;
            }
            match best {
                Some((_, s)) if score < s => {}
                _ => best = Some((bind, score)),
            }
        }
        best.map(|(b, _)| b)
    }

    /// Whether any bind exists for `(chord, when)`, regardless of focus.
    /// Scheduling decisions use this; the focus context is only checked
    /// when the bind actually fires.
    pub fn has_bind(&self, chord: Chord, when: When) -> bool {
        self.binds
            .iter()
            .any(|b| b.chord == chord && b.when == when)
    }

    fn any_ctx(&self, chord: Chord, when: When) -> Option<&Bind> {
        self.binds
            .iter()
            .filter(|b| b.chord == chord && b.when == when)
            .last()
    }
}

// ---------------------------------------------------------------------------
// Timer state machine
// ---------------------------------------------------------------------------

const DEFAULT_HOLD_MS: u64 = 300;
const DEFAULT_DOUBLE_TAP_MS: u64 = 250;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Hold { deadline: Instant },
    HoldFired,
    RepeatWait,
    RepeatActive,
    DoubleTapWait { deadline: Instant, delayed_press: bool },
}

#[derive(Clone, Debug)]
struct KeyTimer {
    chord: Chord,
    phase: Phase,
}

/// What the caller should do with the key after the machine has seen it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyOutcome {
    Dispatch(Action),
    /// Encode the chord as legacy bytes and forward to the focused pane.
    ForwardLegacy(Chord),
    Consumed,
}

#[derive(Debug, Default)]
pub struct KeyMachine {
    timers: Vec<KeyTimer>,
}

impl KeyMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers
            .iter()
            .filter_map(|t| match t.phase {
                Phase::Hold { deadline } | Phase::DoubleTapWait { deadline, .. } => Some(deadline),
                _ => None,
            })
            .min()
    }

    fn take_timer(&mut self, chord: Chord) -> Option<KeyTimer> {
        let idx = self.timers.iter().position(|t| t.chord == chord)?;
        Some(self.timers.remove(idx))
    }

    /// Run one key event through the machine.
    pub fn on_key(
        &mut self,
        map: &Keymap,
        chord: Chord,
        kind: KeyEventKind,
        focus: FocusKind,
        now: Instant,
    ) -> Vec<KeyOutcome> {
        match kind {
            KeyEventKind::Press => self.on_press(map, chord, focus, now),
            KeyEventKind::Repeat => self.on_repeat(map, chord, focus),
            KeyEventKind::Release => self.on_release(map, chord, focus),
        }
    }

    fn on_press(
        &mut self,
        map: &Keymap,
        chord: Chord,
        focus: FocusKind,
        now: Instant,
    ) -> Vec<KeyOutcome> {
        // A press while another phase is live discards the old timer and
        // restarts classification; a press inside the tap window is the tap.
        if let Some(timer) = self.take_timer(chord) {
            if let Phase::DoubleTapWait { .. } = timer.phase {
                return match map.find_best(chord, When::DoubleTap, focus) {
                    Some(bind) => vec![KeyOutcome::Dispatch(bind.action)],
                    None => vec![KeyOutcome::Consumed],
                };
            }
        }

        if map.has_bind(chord, When::Hold) {
            let ms = map
                .any_ctx(chord, When::Hold)
                .and_then(|b| b.hold_ms)
                .unwrap_or(DEFAULT_HOLD_MS);
            self.timers.push(KeyTimer {
                chord,
                phase: Phase::Hold {
                    deadline: now + Duration::from_millis(ms),
                },
            });
            return vec![KeyOutcome::Consumed];
        }

        if map.has_bind(chord, When::DoubleTap) {
            let ms = map
                .any_ctx(chord, When::DoubleTap)
                .and_then(|b| b.double_tap_ms)
                .unwrap_or(DEFAULT_DOUBLE_TAP_MS);
            self.timers.push(KeyTimer {
                chord,
                phase: Phase::DoubleTapWait {
                    deadline: now + Duration::from_millis(ms),
                    delayed_press: map.has_bind(chord, When::Press),
                },
            });
            return vec![KeyOutcome::Consumed];
        }

        if map.has_bind(chord, When::Press) {
            return match map.find_best(chord, When::Press, focus) {
                Some(bind) => vec![KeyOutcome::Dispatch(bind.action)],
                None => vec![KeyOutcome::ForwardLegacy(chord)],
            };
        }

        if map.has_bind(chord, When::Repeat) {
            self.timers.push(KeyTimer {
                chord,
                phase: Phase::RepeatWait,
            });
            return vec![KeyOutcome::Consumed];
        }

        vec![KeyOutcome::ForwardLegacy(chord)]
    }

    fn on_repeat(&mut self, map: &Keymap, chord: Chord, focus: FocusKind) -> Vec<KeyOutcome> {
        if let Some(timer) = self.take_timer(chord) {
            match timer.phase {
                Phase::RepeatWait | Phase::RepeatActive => {
                    self.timers.push(KeyTimer {
                        chord,
                        phase: Phase::RepeatActive,
                    });
                    return match map.find_best(chord, When::Repeat, focus) {
                        Some(bind) => vec![KeyOutcome::Dispatch(bind.action)],
                        None => vec![KeyOutcome::Consumed],
                    };
                }
                Phase::Hold { .. } => {
                    // Auto-repeat arrived before the hold deadline: the user
                    // is leaning on the key, treat it as a plain press.
                    return match map.find_best(chord, When::Press, focus) {
                        Some(bind) => vec![KeyOutcome::Dispatch(bind.action)],
                        None => vec![KeyOutcome::ForwardLegacy(chord)],
                    };
                }
                Phase::HoldFired => {
                    self.timers.push(timer);
                    return vec![KeyOutcome::Consumed];
                }
                Phase::DoubleTapWait { .. } => {
                    self.timers.push(timer);
                    return vec![KeyOutcome::Consumed];
                }
            }
        }
        match map.find_best(chord, When::Press, focus) {
            Some(bind) => vec![KeyOutcome::Dispatch(bind.action)],
            None => vec![KeyOutcome::ForwardLegacy(chord)],
        }
    }

    fn on_release(&mut self, map: &Keymap, chord: Chord, focus: FocusKind) -> Vec<KeyOutcome> {
        let mut out = Vec::new();
        if let Some(bind) = map.find_best(chord, When::Release, focus) {
            out.push(KeyOutcome::Dispatch(bind.action));
        }
        match self.take_timer(chord).map(|t| t.phase) {
            Some(Phase::Hold { .. }) => {
                // Released before the deadline: a short tap, let the pane
                // see the key after all.
                out.push(KeyOutcome::ForwardLegacy(chord));
            }
            Some(Phase::HoldFired) | Some(Phase::RepeatActive) => {
                out.push(KeyOutcome::Consumed);
            }
            Some(Phase::RepeatWait) => {
                out.push(KeyOutcome::ForwardLegacy(chord));
            }
            Some(timer @ Phase::DoubleTapWait { .. }) => {
                // Still inside the tap window; keep waiting for a second tap.
                self.timers.push(KeyTimer {
                    chord,
                    phase: timer,
                });
                out.push(KeyOutcome::Consumed);
            }
            None => {
                if out.is_empty() {
                    out.push(KeyOutcome::Consumed);
                }
            }
        }
        out
    }

    /// Fire every expired timer. Focus context is the one in effect now,
    /// not the one at schedule time.
    pub fn tick(&mut self, map: &Keymap, focus: FocusKind, now: Instant) -> Vec<KeyOutcome> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < self.timers.len() {
            match self.timers[i].phase {
                Phase::Hold { deadline } if deadline <= now => {
                    let chord = self.timers[i].chord;
                    self.timers[i].phase = Phase::HoldFired;
                    if let Some(bind) = map.find_best(chord, When::Hold, focus) {
                        out.push(KeyOutcome::Dispatch(bind.action));
                    }
                    i += 1;
                }
                Phase::DoubleTapWait {
                    deadline,
                    delayed_press,
                } if deadline <= now => {
                    let chord = self.timers.remove(i).chord;
                    if delayed_press {
                        if let Some(bind) = map.find_best(chord, When::Press, focus) {
                            out.push(KeyOutcome::Dispatch(bind.action));
                        }
                    }
                }
                _ => i += 1,
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Legacy byte encoding
// ---------------------------------------------------------------------------

/// Encode a chord as the bytes a legacy (non CSI-u) terminal would send,
/// for forwarding unclaimed keys into a pane.
pub fn legacy_bytes(chord: Chord) -> Vec<u8> {
    let mods = chord.mods;
    match chord.key {
        Key::Char(c) => {
            if mods.contains(Mods::CTRL) {
                if c.is_ascii_lowercase() {
                    return vec![c as u8 - b'a' + 1];
                }
                if c.is_ascii_uppercase() {
                    return vec![c.to_ascii_lowercase() as u8 - b'a' + 1];
                }
            }
            let mut bytes = Vec::new();
            if mods.contains(Mods::ALT) {
                bytes.push(0x1b);
            }
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            bytes
        }
        Key::Enter => vec![b'\r'],
        Key::Tab => vec![b'\t'],
        Key::Backspace => vec![0x7f],
        Key::Esc => vec![0x1b],
        Key::Up | Key::Down | Key::Right | Key::Left => {
            let terminator = match chord.key {
                Key::Up => b'A',
                Key::Down => b'B',
                Key::Right => b'C',
                _ => b'D',
            };
            if mods.is_empty() {
                vec![0x1b, b'[', terminator]
            } else {
                let param = mods.bits() + 1;
                let mut bytes = format!("\x1b[1;{}", param).into_bytes();
                bytes.push(terminator);
                bytes
            }
        }
    }
}

/// Parse a config chord string like `alt+x`, `ctrl+shift+enter`, `super+up`.
pub fn parse_chord(s: &str) -> Option<Chord> {
    let mut mods = Mods::empty();
    let mut key = None;
    for part in s.split('+') {
        match part.trim().to_ascii_lowercase().as_str() {
            "shift" => mods |= Mods::SHIFT,
            "alt" | "meta" => mods |= Mods::ALT,
            "ctrl" | "control" => mods |= Mods::CTRL,
            "super" | "cmd" => mods |= Mods::SUPER,
            "up" => key = Some(Key::Up),
            "down" => key = Some(Key::Down),
            "left" => key = Some(Key::Left),
            "right" => key = Some(Key::Right),
            "enter" | "return" => key = Some(Key::Enter),
            "tab" => key = Some(Key::Tab),
            "backspace" => key = Some(Key::Backspace),
            "esc" | "escape" => key = Some(Key::Esc),
            "space" => key = Some(Key::Char(' ')),
            other => {
                let mut chars = other.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => key = Some(Key::Char(c)),
                    _ => return None,
                }
            }
        }
    }
    key.map(|k| Chord::new(mods, k))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(binds: Vec<Bind>) -> Keymap {
        Keymap { binds }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    // --- find_best scoring ---

    #[test]
    fn later_bind_wins_equal_score() {
        let chord = Chord::alt('x');
        let map = map_with(vec![
            Bind::new(chord, When::Press, Action::TabNext),
            Bind::new(chord, When::Press, Action::TabPrev),
        ]);
        let bind = map.find_best(chord, When::Press, FocusKind::Split).unwrap();
        assert_eq!(bind.action, Action::TabPrev);
    }

    #[test]
    fn focus_specific_bind_outranks_any() {
        let chord = Chord::alt('x');
        let mut float_bind = Bind::new(chord, When::Press, Action::FloatNudge(Dir::Up));
        float_bind.ctx = FocusCtx::Float;
        let map = map_with(vec![
            float_bind,
            Bind::new(chord, When::Press, Action::TabNext),
        ]);
        let bind = map.find_best(chord, When::Press, FocusKind::Float).unwrap();
        assert_eq!(bind.action, Action::FloatNudge(Dir::Up));
        // With split focus the float bind is filtered out entirely.
        let bind = map.find_best(chord, When::Press, FocusKind::Split).unwrap();
        assert_eq!(bind.action, Action::TabNext);
    }

    #[test]
    fn hold_ms_raises_score() {
        let chord = Chord::alt('x');
        let mut hold = Bind::new(chord, When::Press, Action::SplitH);
        hold.hold_ms = Some(300);
        let map = map_with(vec![hold, Bind::new(chord, When::Press, Action::SplitV)]);
        // The plain bind comes later but scores lower.
        let bind = map.find_best(chord, When::Press, FocusKind::Split).unwrap();
        assert_eq!(bind.action, Action::SplitH);
    }

    // --- press dispatch ---

    #[test]
    fn plain_press_dispatches() {
        let chord = Chord::alt('n');
        let map = map_with(vec![Bind::new(chord, When::Press, Action::TabNew)]);
        let mut km = KeyMachine::new();
        let out = km.on_key(&map, chord, KeyEventKind::Press, FocusKind::Split, Instant::now());
        assert_eq!(out, vec![KeyOutcome::Dispatch(Action::TabNew)]);
    }

    #[test]
    fn unbound_press_forwards() {
        let map = Keymap::default();
        let mut km = KeyMachine::new();
        let chord = Chord::new(Mods::CTRL, Key::Char('c'));
        let out = km.on_key(&map, chord, KeyEventKind::Press, FocusKind::Split, Instant::now());
        assert_eq!(out, vec![KeyOutcome::ForwardLegacy(chord)]);
    }

    // --- hold ---

    #[test]
    fn hold_fires_at_deadline_and_swallows_release() {
        let chord = Chord::alt('x');
        let mut bind = Bind::new(chord, When::Hold, Action::SplitH);
        bind.hold_ms = Some(300);
        let map = map_with(vec![bind]);
        let mut km = KeyMachine::new();
        let t0 = Instant::now();

        let out = km.on_key(&map, chord, KeyEventKind::Press, FocusKind::Split, t0);
        assert_eq!(out, vec![KeyOutcome::Consumed]);

        // Not yet.
        assert!(km.tick(&map, FocusKind::Split, t0 + ms(150)).is_empty());

        let out = km.tick(&map, FocusKind::Split, t0 + ms(300));
        assert_eq!(out, vec![KeyOutcome::Dispatch(Action::SplitH)]);

        let out = km.on_key(&map, chord, KeyEventKind::Release, FocusKind::Split, t0 + ms(350));
        assert_eq!(out, vec![KeyOutcome::Consumed]);
    }

    #[test]
    fn short_tap_forwards_key() {
        let chord = Chord::alt('x');
        let mut bind = Bind::new(chord, When::Hold, Action::SplitH);
        bind.hold_ms = Some(300);
        let map = map_with(vec![bind]);
        let mut km = KeyMachine::new();
        let t0 = Instant::now();

        km.on_key(&map, chord, KeyEventKind::Press, FocusKind::Split, t0);
        let out = km.on_key(&map, chord, KeyEventKind::Release, FocusKind::Split, t0 + ms(150));
        assert_eq!(out, vec![KeyOutcome::ForwardLegacy(chord)]);
        // Deadline passing later must not fire anything.
        assert!(km.tick(&map, FocusKind::Split, t0 + ms(400)).is_empty());
    }

    #[test]
    fn hold_focus_ctx_checked_at_fire_time() {
        let chord = Chord::alt('x');
        let mut bind = Bind::new(chord, When::Hold, Action::SplitH);
        bind.hold_ms = Some(100);
        bind.ctx = FocusCtx::Split;
        let map = map_with(vec![bind]);
        let mut km = KeyMachine::new();
        let t0 = Instant::now();

        km.on_key(&map, chord, KeyEventKind::Press, FocusKind::Split, t0);
        // Focus moved to a float before the deadline: nothing fires.
        let out = km.tick(&map, FocusKind::Float, t0 + ms(100));
        assert!(out.is_empty());
    }

    // --- double tap ---

    #[test]
    fn double_tap_dispatches_and_cancels_delayed_press() {
        let chord = Chord::alt('f');
        let mut dt = Bind::new(chord, When::DoubleTap, Action::FloatToggle(b'f'));
        dt.double_tap_ms = Some(250);
        let map = map_with(vec![
            dt,
            Bind::new(chord, When::Press, Action::TabNext),
        ]);
        let mut km = KeyMachine::new();
        let t0 = Instant::now();

        let out = km.on_key(&map, chord, KeyEventKind::Press, FocusKind::Split, t0);
        assert_eq!(out, vec![KeyOutcome::Consumed]);

        let out = km.on_key(&map, chord, KeyEventKind::Press, FocusKind::Split, t0 + ms(100));
        assert_eq!(out, vec![KeyOutcome::Dispatch(Action::FloatToggle(b'f'))]);

        // The delayed press must not fire afterwards.
        assert!(km.tick(&map, FocusKind::Split, t0 + ms(500)).is_empty());
    }

    #[test]
    fn single_tap_fires_delayed_press_on_timeout() {
        let chord = Chord::alt('f');
        let mut dt = Bind::new(chord, When::DoubleTap, Action::FloatToggle(b'f'));
        dt.double_tap_ms = Some(250);
        let map = map_with(vec![
            dt,
            Bind::new(chord, When::Press, Action::TabNext),
        ]);
        let mut km = KeyMachine::new();
        let t0 = Instant::now();

        km.on_key(&map, chord, KeyEventKind::Press, FocusKind::Split, t0);
        let out = km.tick(&map, FocusKind::Split, t0 + ms(250));
        assert_eq!(out, vec![KeyOutcome::Dispatch(Action::TabNext)]);
    }

    #[test]
    fn single_tap_without_press_bind_times_out_silently() {
        let chord = Chord::alt('f');
        let mut dt = Bind::new(chord, When::DoubleTap, Action::FloatToggle(b'f'));
        dt.double_tap_ms = Some(250);
        let map = map_with(vec![dt]);
        let mut km = KeyMachine::new();
        let t0 = Instant::now();

        km.on_key(&map, chord, KeyEventKind::Press, FocusKind::Split, t0);
        assert!(km.tick(&map, FocusKind::Split, t0 + ms(250)).is_empty());
    }

    // --- repeat ---

    #[test]
    fn repeat_wait_then_repeat_dispatches() {
        let chord = Chord::alt('j');
        let map = map_with(vec![Bind::new(chord, When::Repeat, Action::FocusMove(Dir::Down))]);
        let mut km = KeyMachine::new();
        let t0 = Instant::now();

        let out = km.on_key(&map, chord, KeyEventKind::Press, FocusKind::Split, t0);
        assert_eq!(out, vec![KeyOutcome::Consumed]);

        let out = km.on_key(&map, chord, KeyEventKind::Repeat, FocusKind::Split, t0 + ms(400));
        assert_eq!(out, vec![KeyOutcome::Dispatch(Action::FocusMove(Dir::Down))]);

        // Release after repeat is swallowed.
        let out = km.on_key(&map, chord, KeyEventKind::Release, FocusKind::Split, t0 + ms(500));
        assert_eq!(out, vec![KeyOutcome::Consumed]);
    }

    #[test]
    fn repeat_wait_release_without_repeat_forwards() {
        let chord = Chord::alt('j');
        let map = map_with(vec![Bind::new(chord, When::Repeat, Action::FocusMove(Dir::Down))]);
        let mut km = KeyMachine::new();
        let t0 = Instant::now();

        km.on_key(&map, chord, KeyEventKind::Press, FocusKind::Split, t0);
        let out = km.on_key(&map, chord, KeyEventKind::Release, FocusKind::Split, t0 + ms(100));
        assert_eq!(out, vec![KeyOutcome::ForwardLegacy(chord)]);
    }

    #[test]
    fn repeat_during_hold_falls_back_to_press() {
        let chord = Chord::alt('x');
        let mut hold = Bind::new(chord, When::Hold, Action::SplitH);
        hold.hold_ms = Some(300);
        let map = map_with(vec![hold, Bind::new(chord, When::Press, Action::SplitV)]);
        let mut km = KeyMachine::new();
        let t0 = Instant::now();

        km.on_key(&map, chord, KeyEventKind::Press, FocusKind::Split, t0);
        let out = km.on_key(&map, chord, KeyEventKind::Repeat, FocusKind::Split, t0 + ms(100));
        assert_eq!(out, vec![KeyOutcome::Dispatch(Action::SplitV)]);
        // The hold was cancelled by the repeat.
        assert!(km.tick(&map, FocusKind::Split, t0 + ms(400)).is_empty());
    }

    // --- release binds ---

    #[test]
    fn release_bind_dispatches() {
        let chord = Chord::alt('r');
        let map = map_with(vec![Bind::new(chord, When::Release, Action::TabPrev)]);
        let mut km = KeyMachine::new();
        let out = km.on_key(&map, chord, KeyEventKind::Release, FocusKind::Split, Instant::now());
        assert_eq!(out[0], KeyOutcome::Dispatch(Action::TabPrev));
    }

    // --- legacy encoding ---

    #[test]
    fn legacy_ctrl_char() {
        assert_eq!(legacy_bytes(Chord::new(Mods::CTRL, Key::Char('c'))), vec![3]);
        assert_eq!(legacy_bytes(Chord::new(Mods::CTRL, Key::Char('A'))), vec![1]);
    }

    #[test]
    fn legacy_alt_char() {
        assert_eq!(legacy_bytes(Chord::alt('x')), vec![0x1b, b'x']);
    }

    #[test]
    fn legacy_plain_arrow() {
        assert_eq!(
            legacy_bytes(Chord::new(Mods::empty(), Key::Up)),
            b"\x1b[A".to_vec()
        );
    }

    #[test]
    fn legacy_modified_arrow() {
        assert_eq!(
            legacy_bytes(Chord::new(Mods::ALT, Key::Right)),
            b"\x1b[1;3C".to_vec()
        );
    }

    #[test]
    fn legacy_unicode_char() {
        assert_eq!(
            legacy_bytes(Chord::new(Mods::empty(), Key::Char('é'))),
            "é".as_bytes().to_vec()
        );
    }

    // --- chord parsing ---

    #[test]
    fn parse_simple_chords() {
        assert_eq!(parse_chord("alt+x"), Some(Chord::alt('x')));
        assert_eq!(
            parse_chord("ctrl+shift+enter"),
            Some(Chord::new(Mods::CTRL | Mods::SHIFT, Key::Enter))
        );
        assert_eq!(
            parse_chord("super+up"),
            Some(Chord::new(Mods::SUPER, Key::Up))
        );
        assert_eq!(parse_chord("alt+nope"), None);
    }

    #[test]
    fn xterm_param_decoding() {
        assert_eq!(Mods::from_xterm_param(0), Mods::empty());
        assert_eq!(Mods::from_xterm_param(1), Mods::empty());
        assert_eq!(Mods::from_xterm_param(3), Mods::ALT);
        assert_eq!(Mods::from_xterm_param(5), Mods::CTRL);
        assert_eq!(Mods::from_xterm_param(8), Mods::CTRL | Mods::ALT | Mods::SHIFT);
    }
}
