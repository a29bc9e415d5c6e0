use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::keys::{parse_chord, Action, Bind, Dir, FocusCtx, Keymap, Mods, When};

// ---------------------------------------------------------------------------
// Raw TOML shape
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    confirm_on_exit: Option<bool>,
    confirm_on_detach: Option<bool>,
    confirm_on_close: Option<bool>,
    selection_override_mods: Option<String>,
    status: RawStatus,
    style: RawStyle,
    #[serde(rename = "bind")]
    binds: Vec<RawBind>,
    #[serde(rename = "float")]
    floats: Vec<RawFloat>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStatus {
    enabled: Option<bool>,
    left: Option<Vec<String>>,
    right: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStyle {
    shadow: Option<bool>,
    cursor_style: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBind {
    chord: String,
    action: String,
    #[serde(default)]
    when: Option<When>,
    #[serde(default)]
    context: Option<FocusCtx>,
    #[serde(default)]
    hold_ms: Option<u64>,
    #[serde(default)]
    double_tap_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawFloat {
    key: String,
    #[serde(default)]
    width_pct: Option<f64>,
    #[serde(default)]
    height_pct: Option<f64>,
    #[serde(default)]
    pos_x_pct: Option<f64>,
    #[serde(default)]
    pos_y_pct: Option<f64>,
    #[serde(default)]
    pad_x: Option<u16>,
    #[serde(default)]
    pad_y: Option<u16>,
    #[serde(default)]
    global: bool,
    #[serde(default)]
    per_cwd: bool,
    #[serde(default)]
    sticky: bool,
    #[serde(default)]
    alone: bool,
    #[serde(default)]
    destroy: bool,
}

// ---------------------------------------------------------------------------
// Resolved config
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct FloatDefault {
    pub width_pct: f64,
    pub height_pct: f64,
    pub pos_x_pct: f64,
    pub pos_y_pct: f64,
    pub pad_x: u16,
    pub pad_y: u16,
    pub global: bool,
    pub per_cwd: bool,
    pub sticky: bool,
    pub alone: bool,
    pub destroy: bool,
}

impl Default for FloatDefault {
    fn default() -> Self {
        Self {
            width_pct: 60.0,
            height_pct: 60.0,
            pos_x_pct: 50.0,
            pos_y_pct: 50.0,
            pad_x: 0,
            pad_y: 0,
            global: false,
            per_cwd: false,
            sticky: false,
            alone: false,
            destroy: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StatusConfig {
    pub enabled: bool,
    pub left: Vec<String>,
    pub right: Vec<String>,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            left: vec!["session".into(), "shell".into()],
            right: vec!["clock".into(), "host".into()],
        }
    }
}

#[derive(Clone, Debug)]
pub struct StyleConfig {
    pub shadow: bool,
    pub cursor_style: CursorStyle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorStyle {
    Block,
    Bar,
    Underline,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            shadow: true,
            cursor_style: CursorStyle::Block,
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub keymap: Keymap,
    pub confirm_on_exit: bool,
    pub confirm_on_detach: bool,
    pub confirm_on_close: bool,
    pub selection_override_mods: Mods,
    pub status: StatusConfig,
    pub style: StyleConfig,
    pub float_defaults: HashMap<u8, FloatDefault>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keymap: Keymap {
                binds: default_binds(),
            },
            confirm_on_exit: true,
            confirm_on_detach: false,
            confirm_on_close: true,
            selection_override_mods: Mods::SHIFT,
            status: StatusConfig::default(),
            style: StyleConfig::default(),
            float_defaults: HashMap::new(),
        }
    }
}

impl Config {
    /// Load `$XDG_CONFIG_HOME/hexe/mux.toml`. Missing file is fine; a
    /// malformed one keeps the defaults and reports a warning for the
    /// startup notification.
    pub fn load() -> (Self, Option<String>) {
        let Some(path) = config_path() else {
            return (Self::default(), None);
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => match toml::from_str::<RawConfig>(&text) {
                Ok(raw) => Self::from_raw(raw),
                Err(e) => (
                    Self::default(),
                    Some(format!("config error in {}: {}", path.display(), e)),
                ),
            },
            Err(_) => (Self::default(), None),
        }
    }

    fn from_raw(raw: RawConfig) -> (Self, Option<String>) {
        let mut config = Self::default();
        let mut warning = None;
        if let Some(v) = raw.confirm_on_exit {
            config.confirm_on_exit = v;
        }
        if let Some(v) = raw.confirm_on_detach {
            config.confirm_on_detach = v;
        }
        if let Some(v) = raw.confirm_on_close {
            config.confirm_on_close = v;
        }
        if let Some(s) = raw.selection_override_mods {
            if let Some(chord) = parse_chord(&format!("{}+x", s)) {
                config.selection_override_mods = chord.mods;
            }
        }
        if let Some(v) = raw.status.enabled {
            config.status.enabled = v;
        }
        if let Some(v) = raw.status.left {
            config.status.left = v;
        }
        if let Some(v) = raw.status.right {
            config.status.right = v;
        }
        if let Some(v) = raw.style.shadow {
            config.style.shadow = v;
        }
        if let Some(s) = raw.style.cursor_style {
            config.style.cursor_style = match s.as_str() {
                "bar" => CursorStyle::Bar,
                "underline" => CursorStyle::Underline,
                _ => CursorStyle::Block,
            };
        }
        for raw_bind in raw.binds {
            match parse_bind(&raw_bind) {
                Some(bind) => config.keymap.binds.push(bind),
                None => {
                    warning.get_or_insert_with(|| {
                        format!("ignored bind '{}' -> '{}'", raw_bind.chord, raw_bind.action)
                    });
                }
            }
        }
        for raw_float in raw.floats {
            let Some(key) = raw_float.key.bytes().next() else {
                continue;
            };
            let mut d = FloatDefault::default();
            if let Some(v) = raw_float.width_pct {
                d.width_pct = v;
            }
            if let Some(v) = raw_float.height_pct {
                d.height_pct = v;
            }
            if let Some(v) = raw_float.pos_x_pct {
                d.pos_x_pct = v;
            }
            if let Some(v) = raw_float.pos_y_pct {
                d.pos_y_pct = v;
            }
            if let Some(v) = raw_float.pad_x {
                d.pad_x = v;
            }
            if let Some(v) = raw_float.pad_y {
                d.pad_y = v;
            }
            d.global = raw_float.global;
            d.per_cwd = raw_float.per_cwd;
            d.sticky = raw_float.sticky;
            d.alone = raw_float.alone;
            d.destroy = raw_float.destroy;
            config.float_defaults.insert(key, d);
        }
        (config, warning)
    }
}

fn config_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("hexe").join("mux.toml"))
}

fn parse_bind(raw: &RawBind) -> Option<Bind> {
    let chord = parse_chord(&raw.chord)?;
    let action = parse_action(&raw.action)?;
    let mut bind = Bind::new(chord, raw.when.unwrap_or(When::Press), action);
    bind.ctx = raw.context.unwrap_or(FocusCtx::Any);
    bind.hold_ms = raw.hold_ms;
    bind.double_tap_ms = raw.double_tap_ms;
    Some(bind)
}

pub fn parse_action(s: &str) -> Option<Action> {
    let (head, arg) = match s.split_once(':') {
        Some((h, a)) => (h, Some(a)),
        None => (s, None),
    };
    let dir = |a: Option<&str>| match a? {
        "up" => Some(Dir::Up),
        "down" => Some(Dir::Down),
        "left" => Some(Dir::Left),
        "right" => Some(Dir::Right),
        _ => None,
    };
    match head {
        "mux_quit" => Some(Action::MuxQuit),
        "mux_detach" => Some(Action::MuxDetach),
        "pane_disown" => Some(Action::PaneDisown),
        "pane_adopt" => Some(Action::PaneAdopt),
        "split_h" => Some(Action::SplitH),
        "split_v" => Some(Action::SplitV),
        "tab_new" => Some(Action::TabNew),
        "tab_next" => Some(Action::TabNext),
        "tab_prev" => Some(Action::TabPrev),
        "tab_close" => Some(Action::TabClose),
        "float_toggle" => arg?.bytes().next().map(Action::FloatToggle),
        "float_nudge" => dir(arg).map(Action::FloatNudge),
        "focus_move" => dir(arg).map(Action::FocusMove),
        _ => None,
    }
}

fn default_binds() -> Vec<Bind> {
    use crate::keys::{Chord, Key};
    let alt = |c| Chord::alt(c);
    let alt_key = |k| Chord::new(Mods::ALT, k);
    let mut binds = vec![
        Bind::new(alt('q'), When::Press, Action::MuxQuit),
        Bind::new(alt('d'), When::Press, Action::MuxDetach),
        Bind::new(alt('o'), When::Press, Action::PaneDisown),
        Bind::new(alt('a'), When::Press, Action::PaneAdopt),
        Bind::new(alt('s'), When::Press, Action::SplitH),
        Bind::new(alt('v'), When::Press, Action::SplitV),
        Bind::new(alt('t'), When::Press, Action::TabNew),
        Bind::new(alt(']'), When::Press, Action::TabNext),
        Bind::new(alt('['), When::Press, Action::TabPrev),
        Bind::new(alt('w'), When::Press, Action::TabClose),
        Bind::new(alt('f'), When::Press, Action::FloatToggle(b'f')),
    ];
    // Arrows move split focus; with a float focused they nudge it instead.
    for (key, dir) in [
        (Key::Up, Dir::Up),
        (Key::Down, Dir::Down),
        (Key::Left, Dir::Left),
        (Key::Right, Dir::Right),
    ] {
        let mut focus = Bind::new(alt_key(key), When::Press, Action::FocusMove(dir));
        focus.ctx = FocusCtx::Split;
        binds.push(focus);
        let mut nudge = Bind::new(alt_key(key), When::Press, Action::FloatNudge(dir));
        nudge.ctx = FocusCtx::Float;
        binds.push(nudge);
    }
    binds
}
