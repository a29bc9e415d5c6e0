//! Detach-state serialization.
//!
//! The mux never writes to disk: at detach the full layout is serialized
//! to JSON and handed to the daemon, which stores it next to the
//! orphaned panes. Reattach runs the inverse, adopting panes by UUID and
//! rebuilding the trees; UUIDs that no longer exist are pruned.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::floats::{FloatProps, Floats};
use crate::layout::{Layout, Node};
use crate::pane::Pane;
use crate::tab::Tab;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetachedState {
    pub uuid: Uuid,
    pub name: String,
    pub active_tab: usize,
    pub active_floating: Option<usize>,
    pub tabs: Vec<TabState>,
    pub floats: Vec<FloatState>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TabState {
    pub uuid: Uuid,
    pub name: String,
    pub focused_split_id: u32,
    pub next_split_id: u32,
    pub tree: Node,
    pub splits: Vec<SplitEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SplitEntry {
    pub id: u32,
    pub uuid: Uuid,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FloatState {
    pub uuid: Uuid,
    pub float_width_pct: f64,
    pub float_height_pct: f64,
    pub float_pos_x_pct: f64,
    pub float_pos_y_pct: f64,
    pub pad_x: u16,
    pub pad_y: u16,
    pub global: bool,
    pub per_cwd: bool,
    pub sticky: bool,
    pub alone: bool,
    pub destroy: bool,
    pub float_key: u8,
    pub parent_tab: Option<usize>,
    pub pwd_dir: Option<PathBuf>,
    pub visible_tabs: Vec<usize>,
    pub visible: bool,
}

impl FloatState {
    pub fn from_pane(pane: &Pane) -> Option<Self> {
        let props = pane.float.as_ref()?;
        let mut visible_tabs: Vec<usize> = props.visible_tabs.iter().copied().collect();
        visible_tabs.sort_unstable();
        Some(Self {
            uuid: pane.uuid,
            float_width_pct: props.width_pct,
            float_height_pct: props.height_pct,
            float_pos_x_pct: props.pos_x_pct,
            float_pos_y_pct: props.pos_y_pct,
            pad_x: props.pad_x,
            pad_y: props.pad_y,
            global: props.global,
            per_cwd: props.per_cwd,
            sticky: props.sticky,
            alone: props.alone,
            destroy: props.destroy,
            float_key: props.float_key,
            parent_tab: props.parent_tab,
            pwd_dir: props.pwd_dir.clone(),
            visible_tabs,
            visible: pane.visible,
        })
    }

    pub fn props(&self) -> FloatProps {
        FloatProps {
            width_pct: self.float_width_pct,
            height_pct: self.float_height_pct,
            pos_x_pct: self.float_pos_x_pct,
            pos_y_pct: self.float_pos_y_pct,
            pad_x: self.pad_x,
            pad_y: self.pad_y,
            border_x: 0,
            border_y: 0,
            border_w: 0,
            border_h: 0,
            global: self.global,
            visible_tabs: self.visible_tabs.iter().copied().collect(),
            per_cwd: self.per_cwd,
            pwd_dir: self.pwd_dir.clone(),
            parent_tab: self.parent_tab,
            sticky: self.sticky,
            alone: self.alone,
            destroy: self.destroy,
            float_key: self.float_key,
        }
    }
}

/// Snapshot the live state for the daemon.
pub fn capture(
    uuid: Uuid,
    name: &str,
    tabs: &[Tab],
    floats: &Floats,
    active_tab: usize,
    active_floating: Option<usize>,
) -> DetachedState {
    DetachedState {
        uuid,
        name: name.to_string(),
        active_tab,
        active_floating,
        tabs: tabs
            .iter()
            .map(|tab| {
                let mut splits: Vec<SplitEntry> = tab
                    .layout
                    .splits
                    .values()
                    .map(|p| SplitEntry {
                        id: p.id,
                        uuid: p.uuid,
                    })
                    .collect();
                splits.sort_by_key(|e| e.id);
                TabState {
                    uuid: tab.uuid,
                    name: tab.name.clone(),
                    focused_split_id: tab.layout.focused_split_id,
                    next_split_id: tab.layout.next_split_id,
                    tree: tab.layout.root.clone(),
                    splits,
                }
            })
            .collect(),
        floats: floats.panes.iter().filter_map(FloatState::from_pane).collect(),
        updated_at: Utc::now(),
    }
}

pub fn to_json(state: &DetachedState) -> Result<String> {
    serde_json::to_string(state).context("serialize detach state")
}

pub fn from_json(json: &str) -> Result<DetachedState> {
    serde_json::from_str(json).context("deserialize detach state")
}

/// Drop leaves whose id is not in `keep`, collapsing their parents.
fn prune(node: &Node, keep: &HashSet<u32>) -> Option<Node> {
    match node {
        Node::Pane { id } => keep.contains(id).then(|| node.clone()),
        Node::Split {
            dir,
            ratio,
            first,
            second,
        } => match (prune(first, keep), prune(second, keep)) {
            (Some(a), Some(b)) => Some(Node::Split {
                dir: *dir,
                ratio: *ratio,
                first: Box::new(a),
                second: Box::new(b),
            }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        },
    }
}

pub struct Rebuilt {
    pub tabs: Vec<Tab>,
    pub floats: Floats,
    pub active_tab: usize,
    pub active_floating: Option<usize>,
    pub uuid: Uuid,
    pub name: String,
}

/// Rebuild tabs and floats from a detach snapshot. `adopted` maps each
/// re-adopted pane UUID to its new VT routing id; anything missing from
/// it is skipped.
pub fn rebuild(
    state: &DetachedState,
    adopted: &HashMap<Uuid, u32>,
    region: (u16, u16, u16, u16),
) -> Rebuilt {
    let (x, y, w, h) = region;
    let mut tabs = Vec::new();
    for tab_state in &state.tabs {
        let keep: Vec<&SplitEntry> = tab_state
            .splits
            .iter()
            .filter(|e| adopted.contains_key(&e.uuid))
            .collect();
        let keep_ids: HashSet<u32> = keep.iter().map(|e| e.id).collect();
        let Some(tree) = prune(&tab_state.tree, &keep_ids) else {
            continue;
        };

        let mut splits = HashMap::new();
        for entry in keep {
            let pod_id = adopted[&entry.uuid];
            splits.insert(
                entry.id,
                Pane::open_pod(entry.id, x, y, w, h, pod_id, entry.uuid),
            );
        }
        let focused = if keep_ids.contains(&tab_state.focused_split_id) {
            tab_state.focused_split_id
        } else {
            keep_ids.iter().copied().min().unwrap_or(0)
        };
        let mut layout = Layout {
            root: tree,
            splits,
            focused_split_id: focused,
            next_split_id: tab_state.next_split_id,
            x,
            y,
            w,
            h,
        };
        layout.recalculate();
        tabs.push(Tab {
            uuid: tab_state.uuid,
            name: tab_state.name.clone(),
            layout,
            pops: Default::default(),
        });
    }

    let mut floats = Floats::default();
    for float_state in &state.floats {
        let Some(&pod_id) = adopted.get(&float_state.uuid) else {
            continue;
        };
        let mut pane = Pane::open_pod(0, x, y, w, h, pod_id, float_state.uuid);
        pane.float = Some(float_state.props());
        pane.visible = float_state.visible;
        floats.panes.push(pane);
    }

    let active_tab = state.active_tab.min(tabs.len().saturating_sub(1));
    let active_floating = state
        .active_floating
        .filter(|&i| i < floats.len());

    Rebuilt {
        tabs,
        floats,
        active_tab,
        active_floating,
        uuid: state.uuid,
        name: state.name.clone(),
    }
}
