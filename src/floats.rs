//! Floating panes.
//!
//! Floats are process-wide and drawn over the tiled layout. Placement is
//! stored as percentages of the usable area, so a terminal resize is a
//! pure re-derivation and never accumulates drift.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::keys::Dir;
use crate::pane::Pane;

/// Float attributes and authoritative placement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FloatProps {
    pub width_pct: f64,
    pub height_pct: f64,
    pub pos_x_pct: f64,
    pub pos_y_pct: f64,
    pub pad_x: u16,
    pub pad_y: u16,
    /// Outer rectangle including the border, derived from the percentages.
    #[serde(skip)]
    pub border_x: u16,
    #[serde(skip)]
    pub border_y: u16,
    #[serde(skip)]
    pub border_w: u16,
    #[serde(skip)]
    pub border_h: u16,
    /// Visible on any tab it has been toggled onto.
    pub global: bool,
    pub visible_tabs: HashSet<usize>,
    /// Keyed by `(float_key, directory)`; one instance per tab per dir.
    pub per_cwd: bool,
    pub pwd_dir: Option<PathBuf>,
    /// Tab-bound float: hidden and non-interactable elsewhere.
    pub parent_tab: Option<usize>,
    /// Backend survives mux shutdown as a daemon orphan.
    pub sticky: bool,
    /// Showing this float hides every other float on the tab.
    pub alone: bool,
    /// Hide-on-toggle destroys the pane (ignored for global/per_cwd).
    pub destroy: bool,
    pub float_key: u8,
}

impl Default for FloatProps {
    fn default() -> Self {
        Self {
            width_pct: 60.0,
            height_pct: 60.0,
            pos_x_pct: 50.0,
            pos_y_pct: 50.0,
            pad_x: 0,
            pad_y: 0,
            border_x: 0,
            border_y: 0,
            border_w: 0,
            border_h: 0,
            global: false,
            visible_tabs: HashSet::new(),
            per_cwd: false,
            pwd_dir: None,
            parent_tab: None,
            sticky: false,
            alone: false,
            destroy: false,
            float_key: 0,
        }
    }
}

impl FloatProps {
    pub fn destroy_on_hide(&self) -> bool {
        self.destroy && !self.global && !self.per_cwd
    }
}

/// Derived outer rectangle for the given usable area.
pub fn outer_rect(props: &FloatProps, usable_w: u16, usable_h: u16) -> (u16, u16, u16, u16) {
    let w = ((usable_w as f64) * props.width_pct / 100.0).round() as u16;
    let h = ((usable_h as f64) * props.height_pct / 100.0).round() as u16;
    let w = w.clamp(3, usable_w.max(3));
    let h = h.clamp(3, usable_h.max(3));
    let x = (((usable_w.saturating_sub(w)) as f64) * props.pos_x_pct / 100.0).round() as u16;
    let y = (((usable_h.saturating_sub(h)) as f64) * props.pos_y_pct / 100.0).round() as u16;
    (x, y, w, h)
}

/// Re-place one float: derive outer + content rectangles from the
/// percentages and resize the pane.
pub fn place(pane: &mut Pane, usable_w: u16, usable_h: u16) {
    let Some(props) = pane.float.as_mut() else {
        return;
    };
    let (x, y, w, h) = outer_rect(props, usable_w, usable_h);
    props.border_x = x;
    props.border_y = y;
    props.border_w = w;
    props.border_h = h;
    let inset_x = 1 + props.pad_x;
    let inset_y = 1 + props.pad_y;
    let cw = w.saturating_sub(2 * inset_x).max(1);
    let ch = h.saturating_sub(2 * inset_y).max(1);
    pane.resize(x + inset_x, y + inset_y, cw, ch);
}

/// Move a float one cell, clamped to the usable area. The percentages
/// are re-derived from the new position so later resizes preserve it.
pub fn nudge(pane: &mut Pane, dir: Dir, usable_w: u16, usable_h: u16) {
    let Some(props) = pane.float.as_mut() else {
        return;
    };
    let max_x = usable_w.saturating_sub(props.border_w);
    let max_y = usable_h.saturating_sub(props.border_h);
    let (mut x, mut y) = (props.border_x, props.border_y);
    match dir {
        Dir::Left => x = x.saturating_sub(1),
        Dir::Right => x = (x + 1).min(max_x),
        Dir::Up => y = y.saturating_sub(1),
        Dir::Down => y = (y + 1).min(max_y),
    }
    props.pos_x_pct = if max_x == 0 {
        0.0
    } else {
        (x as f64) * 100.0 / (max_x as f64)
    };
    props.pos_y_pct = if max_y == 0 {
        0.0
    } else {
        (y as f64) * 100.0 / (max_y as f64)
    };
    place(pane, usable_w, usable_h);
}

/// The process-wide float list. Order is draw order; the active float is
/// raised to the end by the renderer, not here.
#[derive(Default)]
pub struct Floats {
    pub panes: Vec<Pane>,
}

impl Floats {
    pub fn len(&self) -> usize {
        self.panes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panes.is_empty()
    }

    /// Whether a float participates on the given tab at all (visible or
    /// toggled-off). Tab-bound floats only exist on their parent tab.
    pub fn belongs_to_tab(pane: &Pane, tab: usize) -> bool {
        match &pane.float {
            Some(props) if props.global || props.per_cwd => true,
            Some(props) => props.parent_tab == Some(tab),
            None => false,
        }
    }

    /// Whether a float is currently shown on the given tab.
    pub fn visible_on_tab(pane: &Pane, tab: usize) -> bool {
        if !pane.visible {
            return false;
        }
        match &pane.float {
            Some(props) if props.global || props.per_cwd => props.visible_tabs.contains(&tab),
            Some(props) => props.parent_tab == Some(tab),
            None => false,
        }
    }

    pub fn visible_indices(&self, tab: usize) -> Vec<usize> {
        self.panes
            .iter()
            .enumerate()
            .filter(|(_, p)| Self::visible_on_tab(p, tab))
            .map(|(i, _)| i)
            .collect()
    }

    /// Find the float a toggle of `key` on `tab` addresses. Tab-bound
    /// floats on other tabs don't count; a per-cwd float must also match
    /// the directory.
    pub fn find_by_key(&self, key: u8, cwd: Option<&PathBuf>, tab: usize) -> Option<usize> {
        self.panes.iter().position(|p| {
            if !Self::belongs_to_tab(p, tab) {
                return false;
            }
            match &p.float {
                Some(props) if props.float_key == key => {
                    if props.per_cwd {
                        props.pwd_dir.as_ref() == cwd
                    } else {
                        true
                    }
                }
                _ => false,
            }
        })
    }

    pub fn find_by_uuid(&self, uuid: uuid::Uuid) -> Option<usize> {
        self.panes.iter().position(|p| p.uuid == uuid)
    }

    /// Hide everything else on `tab` when an `alone` float is shown.
    pub fn enforce_alone(&mut self, shown: usize, tab: usize) {
        let alone = self
            .panes
            .get(shown)
            .and_then(|p| p.float.as_ref())
            .map(|f| f.alone)
            .unwrap_or(false);
        if !alone {
            return;
        }
        for (i, pane) in self.panes.iter_mut().enumerate() {
            if i == shown {
                continue;
            }
            if let Some(props) = &mut pane.float {
                props.visible_tabs.remove(&tab);
            }
        }
    }

    pub fn place_all(&mut self, usable_w: u16, usable_h: u16) {
        for pane in &mut self.panes {
            place(pane, usable_w, usable_h);
        }
    }

    /// Renumber tab references after `closed` was removed. Tab-bound
    /// floats of the closed tab are returned for destruction.
    pub fn on_tab_closed(&mut self, closed: usize) -> Vec<Pane> {
        let mut dead = Vec::new();
        let mut i = 0;
        while i < self.panes.len() {
            let drop_pane = match &mut self.panes[i].float {
                Some(props) => {
                    props.visible_tabs = props
                        .visible_tabs
                        .iter()
                        .filter(|&&t| t != closed)
                        .map(|&t| if t > closed { t - 1 } else { t })
                        .collect();
                    match props.parent_tab {
                        Some(t) if t == closed => true,
                        Some(t) if t > closed => {
                            props.parent_tab = Some(t - 1);
                            false
                        }
                        _ => false,
                    }
                }
                None => false,
            };
            if drop_pane {
                dead.push(self.panes.remove(i));
            } else {
                i += 1;
            }
        }
        dead
    }
}
