//! Per-tab binary split tree.
//!
//! Leaves name panes by layout-local id; the `splits` side table owns
//! the panes themselves. Every interior split reserves exactly one
//! column (or row) for the border between its children.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::keys::Dir;
use crate::pane::Pane;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitDir {
    #[serde(rename = "h")]
    H,
    #[serde(rename = "v")]
    V,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    Pane {
        id: u32,
    },
    Split {
        dir: SplitDir,
        ratio: f64,
        first: Box<Node>,
        second: Box<Node>,
    },
}

impl Node {
    pub fn pane(id: u32) -> Self {
        Node::Pane { id }
    }

    fn contains(&self, target: u32) -> bool {
        match self {
            Node::Pane { id } => *id == target,
            Node::Split { first, second, .. } => first.contains(target) || second.contains(target),
        }
    }

    /// Replace the leaf `target` with a split holding the old pane first
    /// and `new_id` second.
    fn split_leaf(&mut self, target: u32, dir: SplitDir, new_id: u32) -> bool {
        match self {
            Node::Pane { id } if *id == target => {
                *self = Node::Split {
                    dir,
                    ratio: 0.5,
                    first: Box::new(Node::pane(target)),
                    second: Box::new(Node::pane(new_id)),
                };
                true
            }
            Node::Split { first, second, .. } => {
                first.split_leaf(target, dir, new_id) || second.split_leaf(target, dir, new_id)
            }
            _ => false,
        }
    }

    /// Remove the leaf `target`, collapsing its parent split into the
    /// surviving sibling. Returns false when the target is the root.
    fn remove_leaf(&mut self, target: u32) -> bool {
        match self {
            Node::Pane { .. } => false,
            Node::Split { first, second, .. } => {
                if matches!(first.as_ref(), Node::Pane { id } if *id == target) {
                    *self = (**second).clone();
                    return true;
                }
                if matches!(second.as_ref(), Node::Pane { id } if *id == target) {
                    *self = (**first).clone();
                    return true;
                }
                first.remove_leaf(target) || second.remove_leaf(target)
            }
        }
    }

    fn collect_ids(&self, ids: &mut Vec<u32>) {
        match self {
            Node::Pane { id } => ids.push(*id),
            Node::Split { first, second, .. } => {
                first.collect_ids(ids);
                second.collect_ids(ids);
            }
        }
    }
}

/// A resolved pane rectangle within the tab region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaneRect {
    pub id: u32,
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

pub struct Layout {
    pub root: Node,
    pub splits: HashMap<u32, Pane>,
    pub focused_split_id: u32,
    pub next_split_id: u32,
    /// Usable region (excludes the status bar).
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

impl Layout {
    pub fn new(first: Pane, x: u16, y: u16, w: u16, h: u16) -> Self {
        let id = first.id;
        let mut splits = HashMap::new();
        splits.insert(id, first);
        let mut layout = Self {
            root: Node::pane(id),
            splits,
            focused_split_id: id,
            next_split_id: id + 1,
            x,
            y,
            w,
            h,
        };
        layout.recalculate();
        layout
    }

    pub fn pane_count(&self) -> usize {
        self.splits.len()
    }

    pub fn pane_ids(&self) -> Vec<u32> {
        let mut ids = Vec::new();
        self.root.collect_ids(&mut ids);
        ids
    }

    pub fn focused(&self) -> Option<&Pane> {
        self.splits.get(&self.focused_split_id)
    }

    pub fn focused_mut(&mut self) -> Option<&mut Pane> {
        self.splits.get_mut(&self.focused_split_id)
    }

    pub fn find_by_uuid(&self, uuid: uuid::Uuid) -> Option<u32> {
        self.splits
            .values()
            .find(|p| p.uuid == uuid)
            .map(|p| p.id)
    }

    /// Allocate the id the next inserted pane will carry.
    pub fn take_next_id(&mut self) -> u32 {
        let id = self.next_split_id;
        self.next_split_id += 1;
        id
    }

    /// Split the focused pane. The new pane takes the second half and
    /// the focus.
    pub fn split_focused(&mut self, dir: SplitDir, new_pane: Pane) {
        let new_id = new_pane.id;
        if !self.root.split_leaf(self.focused_split_id, dir, new_id) {
            // No focused leaf (empty-ish tree); make it the root.
            self.root = Node::pane(new_id);
        }
        self.splits.insert(new_id, new_pane);
        self.focused_split_id = new_id;
        self.recalculate();
    }

    /// Close a pane, collapsing its parent split. Returns the removed
    /// pane, or None when it is the last one (the caller decides whether
    /// that closes the tab).
    pub fn close(&mut self, id: u32) -> Option<Pane> {
        if self.splits.len() <= 1 || !self.splits.contains_key(&id) {
            return None;
        }
        if self.focused_split_id == id {
            // Advance focus to the next pane in ascending-id order first.
            let mut ids: Vec<u32> = self.splits.keys().copied().filter(|&i| i != id).collect();
            ids.sort_unstable();
            self.focused_split_id = ids
                .iter()
                .copied()
                .find(|&i| i > id)
                .unwrap_or_else(|| ids[0]);
        }
        self.root.remove_leaf(id);
        let pane = self.splits.remove(&id);
        self.recalculate();
        pane
    }

    pub fn close_focused(&mut self) -> Option<Pane> {
        self.close(self.focused_split_id)
    }

    /// Resolve the tree into pane rectangles. Horizontal splits give the
    /// first child `floor(w·ratio) − 1` columns, one border column, and
    /// the rest to the second child; vertical splits likewise with rows.
    pub fn rects(&self) -> Vec<PaneRect> {
        let mut out = Vec::new();
        Self::resolve(&self.root, self.x, self.y, self.w, self.h, &mut out);
        out
    }

    fn resolve(node: &Node, x: u16, y: u16, w: u16, h: u16, out: &mut Vec<PaneRect>) {
        match node {
            Node::Pane { id } => out.push(PaneRect { id: *id, x, y, w, h }),
            Node::Split {
                dir: SplitDir::H,
                ratio,
                first,
                second,
            } => {
                let first_w = (((w as f64) * ratio).floor() as u16).saturating_sub(1);
                let second_w = w.saturating_sub(first_w + 1);
                Self::resolve(first, x, y, first_w, h, out);
                Self::resolve(second, x + first_w + 1, y, second_w, h, out);
            }
            Node::Split {
                dir: SplitDir::V,
                ratio,
                first,
                second,
            } => {
                let first_h = (((h as f64) * ratio).floor() as u16).saturating_sub(1);
                let second_h = h.saturating_sub(first_h + 1);
                Self::resolve(first, x, y, w, first_h, out);
                Self::resolve(second, x, y + first_h + 1, w, second_h, out);
            }
        }
    }

    /// Apply the resolved rectangles to the owned panes.
    pub fn recalculate(&mut self) {
        for rect in self.rects() {
            if let Some(pane) = self.splits.get_mut(&rect.id) {
                pane.resize(rect.x, rect.y, rect.w, rect.h);
            }
        }
    }

    pub fn set_region(&mut self, x: u16, y: u16, w: u16, h: u16) {
        self.x = x;
        self.y = y;
        self.w = w;
        self.h = h;
        self.recalculate();
    }

    /// Move focus to the nearest pane strictly beyond the focused pane's
    /// edge in `dir`. Distance along the direction axis counts double
    /// the perpendicular offset from `cursor_hint` (or the pane center).
    pub fn focus_dir(&mut self, dir: Dir, cursor_hint: Option<(u16, u16)>) -> bool {
        let rects = self.rects();
        let Some(cur) = rects.iter().find(|r| r.id == self.focused_split_id) else {
            return false;
        };
        let (ref_x, ref_y) = cursor_hint
            .unwrap_or((cur.x + cur.w / 2, cur.y + cur.h / 2));

        let mut best: Option<(u32, u32)> = None;
        for cand in rects.iter().filter(|r| r.id != cur.id) {
            let primary = match dir {
                Dir::Right if cand.x >= cur.x + cur.w => (cand.x - (cur.x + cur.w)) as u32,
                Dir::Left if cand.x + cand.w <= cur.x => (cur.x - (cand.x + cand.w)) as u32,
                Dir::Down if cand.y >= cur.y + cur.h => (cand.y - (cur.y + cur.h)) as u32,
                Dir::Up if cand.y + cand.h <= cur.y => (cur.y - (cand.y + cand.h)) as u32,
                _ => continue,
            };
            let secondary = match dir {
                Dir::Left | Dir::Right => {
                    (cand.y + cand.h / 2).abs_diff(ref_y) as u32
                }
                Dir::Up | Dir::Down => {
                    (cand.x + cand.w / 2).abs_diff(ref_x) as u32
                }
            };
            // score = primary + secondary/2, scaled by 2 to stay integral.
            let score = 2 * primary + secondary;
            match best {
                Some((_, s)) if s <= score => {}
                _ => best = Some((cand.id, score)),
            }
        }
        if let Some((id, _)) = best {
            self.focused_split_id = id;
            true
        } else {
            false
        }
    }

    /// Serializable tree plus the id → pane-uuid table.
    pub fn tree(&self) -> &Node {
        &self.root
    }
}
