//! The aggregate root: every piece of mutable mux state the event loop
//! works on lives here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::config::Config;
use crate::floats::Floats;
use crate::input::OscCapture;
use crate::keys::{FocusKind, KeyMachine};
use crate::pane::Pane;
use crate::pop::PopSet;
use crate::select::Selection;
use crate::tab::Tab;

/// An action whose consequences wait on a blocking popup's verdict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingAction {
    Exit,
    Detach,
    Disown,
    Close,
    AdoptChoose,
    AdoptConfirm { orphan: Uuid },
    ExitIntent,
}

/// Which realm an externally-requested popup reports back to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PopScope {
    Mux,
    Tab,
    Pane,
}

/// Reply routing for a popup opened on behalf of an external caller.
pub struct PendingPop {
    pub scope: PopScope,
    pub reply: oneshot::Sender<String>,
}

/// Shell metadata reported by the daemon for one pane.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShellInfo {
    pub cmd: String,
    pub cwd: String,
    pub status: i32,
    pub duration_ms: u32,
    pub jobs: u16,
}

/// A float whose backend is still being produced by the daemon.
#[derive(Clone, Debug)]
pub struct PendingFloatRequest {
    pub key: u8,
    pub tab: usize,
    pub cwd: Option<PathBuf>,
}

pub struct App {
    pub tabs: Vec<Tab>,
    pub active_tab: usize,
    pub floats: Floats,
    pub active_floating: Option<usize>,
    /// Per-tab focus memory, kept index-aligned with `tabs`.
    pub tab_last_floating_uuid: Vec<Option<Uuid>>,
    pub tab_last_focus_kind: Vec<FocusKind>,

    pub uuid: Uuid,
    pub session_name: String,

    pub term_w: u16,
    pub term_h: u16,
    pub status_height: u16,

    /// Partial trailing escape sequence carried to the next stdin read.
    pub stdin_tail: Vec<u8>,
    pub osc_capture: OscCapture,
    pub osc_reply_target: Option<Uuid>,

    pub keys: KeyMachine,
    pub pops: PopSet,
    pub pending_action: Option<PendingAction>,
    pub pending_pop: Option<PendingPop>,
    pub exit_from_shell_death: bool,
    pub exit_intent_deadline: Option<Instant>,
    /// Suppress exactly one dead-pane sweep after a respawn.
    pub skip_dead_check: bool,

    pub selection: Option<Selection>,
    pub pane_shell: HashMap<Uuid, ShellInfo>,
    pub pending_float_requests: HashMap<Uuid, PendingFloatRequest>,

    pub config: Config,
    pub should_exit: bool,
    pub detach_mode: bool,
    pub needs_full_redraw: bool,
}

impl App {
    pub fn new(config: Config, uuid: Uuid, session_name: String, term_w: u16, term_h: u16) -> Self {
        let status_height = if config.status.enabled { 1 } else { 0 };
        Self {
            tabs: Vec::new(),
            active_tab: 0,
            floats: Floats::default(),
            active_floating: None,
            tab_last_floating_uuid: Vec::new(),
            tab_last_focus_kind: Vec::new(),
            uuid,
            session_name,
            term_w,
            term_h,
            status_height,
            stdin_tail: Vec::new(),
            osc_capture: OscCapture::default(),
            osc_reply_target: None,
            keys: KeyMachine::new(),
            pops: PopSet::default(),
            pending_action: None,
            pending_pop: None,
            exit_from_shell_death: false,
            exit_intent_deadline: None,
            skip_dead_check: false,
            selection: None,
            pane_shell: HashMap::new(),
            pending_float_requests: HashMap::new(),
            config,
            should_exit: false,
            detach_mode: false,
            needs_full_redraw: true,
        }
    }

    /// Region available to tabs and floats (status bar excluded).
    pub fn usable(&self) -> (u16, u16, u16, u16) {
        (0, 0, self.term_w, self.term_h.saturating_sub(self.status_height))
    }

    pub fn float_usable(&self) -> (u16, u16) {
        let (_, _, w, h) = self.usable();
        let shadow = if self.config.style.shadow { 1 } else { 0 };
        (w, h.saturating_sub(shadow))
    }

    pub fn current_tab(&self) -> &Tab {
        &self.tabs[self.active_tab]
    }

    pub fn current_tab_mut(&mut self) -> &mut Tab {
        &mut self.tabs[self.active_tab]
    }

    pub fn focus_kind(&self) -> FocusKind {
        if self.active_floating.is_some() {
            FocusKind::Float
        } else {
            FocusKind::Split
        }
    }

    pub fn focused_pane(&self) -> Option<&Pane> {
        match self.active_floating {
            Some(i) => self.floats.panes.get(i),
            None => self.tabs.get(self.active_tab)?.layout.focused(),
        }
    }

    pub fn focused_pane_mut(&mut self) -> Option<&mut Pane> {
        match self.active_floating {
            Some(i) => self.floats.panes.get_mut(i),
            None => self.tabs.get_mut(self.active_tab)?.layout.focused_mut(),
        }
    }

    pub fn focused_uuid(&self) -> Option<Uuid> {
        self.focused_pane().map(|p| p.uuid)
    }

    /// Re-derive every pane's `focused` flag from the focus indices, so
    /// exactly one pane carries it.
    pub fn sync_focus_flags(&mut self) {
        let focused = self.focused_uuid();
        for tab in &mut self.tabs {
            for pane in tab.layout.splits.values_mut() {
                pane.focused = Some(pane.uuid) == focused;
            }
        }
        for pane in &mut self.floats.panes {
            pane.focused = Some(pane.uuid) == focused;
        }
    }

    /// Drop `active_floating` when it no longer points at a float
    /// visible on the active tab.
    pub fn validate_active_floating(&mut self) {
        if let Some(i) = self.active_floating {
            let ok = self
                .floats
                .panes
                .get(i)
                .map(|p| Floats::visible_on_tab(p, self.active_tab))
                .unwrap_or(false);
            if !ok {
                self.active_floating = None;
            }
        }
        self.sync_focus_flags();
    }

    /// Record the focus memory of the tab being left.
    pub fn remember_focus(&mut self) {
        let tab = self.active_tab;
        if tab >= self.tab_last_focus_kind.len() {
            return;
        }
        self.tab_last_focus_kind[tab] = self.focus_kind();
        self.tab_last_floating_uuid[tab] = self
            .active_floating
            .and_then(|i| self.floats.panes.get(i))
            .map(|p| p.uuid);
    }

    /// Switch tabs, restoring the target's focus memory.
    pub fn switch_tab(&mut self, target: usize) {
        if target >= self.tabs.len() || target == self.active_tab {
            return;
        }
        self.remember_focus();
        self.active_tab = target;
        self.active_floating = match self.tab_last_focus_kind[target] {
            FocusKind::Float => self.tab_last_floating_uuid[target].and_then(|uuid| {
                self.floats
                    .find_by_uuid(uuid)
                    .filter(|&i| Floats::visible_on_tab(&self.floats.panes[i], target))
            }),
            FocusKind::Split => None,
        };
        self.validate_active_floating();
        self.needs_full_redraw = true;
    }

    pub fn push_tab(&mut self, tab: Tab) {
        self.tabs.push(tab);
        self.tab_last_focus_kind.push(FocusKind::Split);
        self.tab_last_floating_uuid.push(None);
    }

    /// Remove a tab and fix every index that referenced it. Returns the
    /// tab plus any tab-bound floats that died with it.
    pub fn remove_tab(&mut self, idx: usize) -> (Tab, Vec<Pane>) {
        let tab = self.tabs.remove(idx);
        self.tab_last_focus_kind.remove(idx);
        self.tab_last_floating_uuid.remove(idx);
        let dead_floats = self.floats.on_tab_closed(idx);
        if self.active_tab >= self.tabs.len() {
            self.active_tab = self.tabs.len().saturating_sub(1);
        } else if self.active_tab > idx {
            self.active_tab -= 1;
        }
        self.validate_active_floating();
        self.needs_full_redraw = true;
        (tab, dead_floats)
    }

    pub fn find_pane_by_uuid(&self, uuid: Uuid) -> Option<&Pane> {
        for tab in &self.tabs {
            if let Some(pane) = tab.layout.splits.values().find(|p| p.uuid == uuid) {
                return Some(pane);
            }
        }
        self.floats.panes.iter().find(|p| p.uuid == uuid)
    }

    pub fn find_pane_by_uuid_mut(&mut self, uuid: Uuid) -> Option<&mut Pane> {
        for tab in &mut self.tabs {
            if let Some(pane) = tab.layout.splits.values_mut().find(|p| p.uuid == uuid) {
                return Some(pane);
            }
        }
        self.floats.panes.iter_mut().find(|p| p.uuid == uuid)
    }

    pub fn find_pane_by_pod_mut(&mut self, pod_id: u32) -> Option<&mut Pane> {
        for tab in &mut self.tabs {
            if let Some(pane) = tab
                .layout
                .splits
                .values_mut()
                .find(|p| p.pod_id == Some(pod_id))
            {
                return Some(pane);
            }
        }
        self.floats
            .panes
            .iter_mut()
            .find(|p| p.pod_id == Some(pod_id))
    }

    /// Re-derive all geometry after a terminal resize.
    pub fn apply_term_size(&mut self, w: u16, h: u16) {
        self.term_w = w;
        self.term_h = h;
        let (x, y, uw, uh) = self.usable();
        for tab in &mut self.tabs {
            tab.layout.set_region(x, y, uw, uh);
        }
        let (fw, fh) = self.float_usable();
        self.floats.place_all(fw, fh);
        self.needs_full_redraw = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::floats::FloatProps;

    fn app_with_tabs(n: usize) -> App {
        let mut app = App::new(Config::default(), Uuid::new_v4(), "test".into(), 80, 24);
        for i in 0..n {
            app.push_tab(Tab::new(
                format!("tab{}", i),
                Pane::open_detached(0, 0, 0, 80, 23),
                0,
                0,
                80,
                23,
            ));
        }
        app.sync_focus_flags();
        app
    }

    fn add_global_float(app: &mut App, on_tab: usize) -> usize {
        let mut pane = Pane::open_detached(0, 0, 0, 20, 10);
        let mut props = FloatProps {
            global: true,
            ..FloatProps::default()
        };
        props.visible_tabs.insert(on_tab);
        pane.float = Some(props);
        app.floats.panes.push(pane);
        app.floats.len() - 1
    }

    #[test]
    fn focus_flags_are_unique() {
        let mut app = app_with_tabs(2);
        let float = add_global_float(&mut app, 0);
        app.active_floating = Some(float);
        app.sync_focus_flags();

        let mut focused = 0;
        for tab in &app.tabs {
            focused += tab.layout.splits.values().filter(|p| p.focused).count();
        }
        focused += app.floats.panes.iter().filter(|p| p.focused).count();
        assert_eq!(focused, 1);
        assert!(app.floats.panes[float].focused);
    }

    #[test]
    fn stale_active_floating_is_cleared() {
        let mut app = app_with_tabs(2);
        let float = add_global_float(&mut app, 0);
        app.active_floating = Some(float);
        // The float is not visible on tab 1.
        app.active_tab = 1;
        app.validate_active_floating();
        assert_eq!(app.active_floating, None);
    }

    #[test]
    fn switch_tab_restores_focus_memory() {
        let mut app = app_with_tabs(2);
        let float = add_global_float(&mut app, 0);
        app.active_floating = Some(float);
        app.switch_tab(1);
        assert_eq!(app.active_floating, None);
        // Coming back restores the float focus.
        app.switch_tab(0);
        assert_eq!(app.active_floating, Some(float));
        assert_eq!(app.focus_kind(), FocusKind::Float);
    }

    #[test]
    fn remove_tab_keeps_memory_vectors_aligned() {
        let mut app = app_with_tabs(3);
        app.active_tab = 2;
        app.remove_tab(1);
        assert_eq!(app.tabs.len(), 2);
        assert_eq!(app.tab_last_focus_kind.len(), 2);
        assert_eq!(app.tab_last_floating_uuid.len(), 2);
        assert_eq!(app.active_tab, 1);
    }

    #[test]
    fn remove_last_tab_clamps_active() {
        let mut app = app_with_tabs(2);
        app.active_tab = 1;
        app.remove_tab(1);
        assert_eq!(app.active_tab, 0);
    }

    #[test]
    fn term_resize_reflows_tabs_and_floats() {
        let mut app = app_with_tabs(1);
        add_global_float(&mut app, 0);
        app.apply_term_size(120, 40);
        let pane = app.tabs[0].layout.focused().unwrap();
        assert_eq!((pane.w, pane.h), (120, 39));
        let f = app.floats.panes[0].float.as_ref().unwrap();
        assert!(f.border_w > 0);
    }

    #[test]
    fn find_pane_walks_tabs_and_floats() {
        let mut app = app_with_tabs(2);
        let float = add_global_float(&mut app, 0);
        let uuid = app.floats.panes[float].uuid;
        assert!(app.find_pane_by_uuid(uuid).is_some());
        let tab_uuid = app.tabs[1].layout.focused().unwrap().uuid;
        assert!(app.find_pane_by_uuid(tab_uuid).is_some());
        assert!(app.find_pane_by_uuid(Uuid::new_v4()).is_none());
    }
}
