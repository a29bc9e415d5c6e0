//! Popups and notifications.
//!
//! Every scope (mux, tab, pane) carries one of these sets. A visible
//! popup makes its scope *blocking*: the input interpreter feeds it raw
//! bytes instead of doing its normal routing, and the popup eventually
//! produces a result the coordinator consumes.

use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PopupKind {
    /// Yes/no question; `y`/enter confirms, `n`/esc declines.
    Confirm,
    /// Pick one of `items`; arrows or `j`/`k` move, enter picks, esc cancels.
    Picker { items: Vec<String>, selected: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PopResult {
    Confirm(bool),
    Pick(usize),
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct Popup {
    pub title: String,
    pub kind: PopupKind,
    pub deadline: Option<Instant>,
    /// Escape-sequence assembly for arrow keys while blocking.
    esc_state: u8,
    result: Option<PopResult>,
}

impl Popup {
    pub fn confirm(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            kind: PopupKind::Confirm,
            deadline: None,
            esc_state: 0,
            result: None,
        }
    }

    pub fn picker(title: impl Into<String>, items: Vec<String>) -> Self {
        Self {
            title: title.into(),
            kind: PopupKind::Picker { items, selected: 0 },
            deadline: None,
            esc_state: 0,
            result: None,
        }
    }

    pub fn with_timeout(mut self, ttl: Duration) -> Self {
        self.deadline = Some(Instant::now() + ttl);
        self
    }

    /// Feed one input byte. Arrow sequences are assembled across calls;
    /// a lone ESC only cancels once it is clearly not a sequence prefix.
    pub fn feed(&mut self, byte: u8) {
        if self.result.is_some() {
            return;
        }
        match self.esc_state {
            1 => {
                if byte == b'[' {
                    self.esc_state = 2;
                } else {
                    self.esc_state = 0;
                    self.cancel();
                }
                return;
            }
            2 => {
                self.esc_state = 0;
                match byte {
                    b'A' => self.move_sel(-1),
                    b'B' => self.move_sel(1),
                    _ => {}
                }
                return;
            }
            _ => {}
        }
        match (&mut self.kind, byte) {
            (PopupKind::Confirm, b'y') | (PopupKind::Confirm, b'Y') | (PopupKind::Confirm, b'\r') => {
                self.result = Some(PopResult::Confirm(true));
            }
            (PopupKind::Confirm, b'n') | (PopupKind::Confirm, b'N') => {
                self.result = Some(PopResult::Confirm(false));
            }
            (PopupKind::Picker { selected, .. }, b'\r') => {
                self.result = Some(PopResult::Pick(*selected));
            }
            (PopupKind::Picker { .. }, b'j') => self.move_sel(1),
            (PopupKind::Picker { .. }, b'k') => self.move_sel(-1),
            (_, 0x1b) => self.esc_state = 1,
            (_, b'q') => self.cancel(),
            _ => {}
        }
    }

    fn cancel(&mut self) {
        self.result = Some(match self.kind {
            PopupKind::Confirm => PopResult::Confirm(false),
            PopupKind::Picker { .. } => PopResult::Cancelled,
        });
    }

    fn move_sel(&mut self, delta: i32) {
        if let PopupKind::Picker { items, selected } = &mut self.kind {
            if items.is_empty() {
                return;
            }
            let len = items.len() as i32;
            let next = (*selected as i32 + delta).rem_euclid(len);
            *selected = next as usize;
        }
    }

    pub fn result(&self) -> Option<PopResult> {
        self.result
    }
}

#[derive(Clone, Debug)]
pub struct Notice {
    pub text: String,
    pub expires: Instant,
}

/// How a scope renders its notices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NotifyStyle {
    #[default]
    Banner,
    Quiet,
}

/// One scope's popup slot plus its notification queue.
#[derive(Debug, Default)]
pub struct PopSet {
    pub popup: Option<Popup>,
    pub notices: Vec<Notice>,
    pub notify_style: NotifyStyle,
}

impl PopSet {
    pub fn is_blocked(&self) -> bool {
        self.popup.is_some()
    }

    pub fn open(&mut self, popup: Popup) {
        self.popup = Some(popup);
    }

    pub fn notify(&mut self, text: impl Into<String>, ttl: Duration) {
        self.notices.push(Notice {
            text: text.into(),
            expires: Instant::now() + ttl,
        });
    }

    pub fn feed(&mut self, byte: u8) {
        if let Some(popup) = &mut self.popup {
            popup.feed(byte);
        }
    }

    /// Take a finished popup's result, closing it.
    pub fn take_result(&mut self) -> Option<PopResult> {
        let result = self.popup.as_ref().and_then(|p| p.result())?;
        self.popup = None;
        Some(result)
    }

    /// Expire timed popups and stale notices.
    pub fn tick(&mut self, now: Instant) {
        if let Some(popup) = &mut self.popup {
            if popup.result().is_none() {
                if let Some(deadline) = popup.deadline {
                    if deadline <= now {
                        popup.cancel();
                    }
                }
            }
        }
        self.notices.retain(|n| n.expires > now);
    }

    pub fn current_notice(&self) -> Option<&Notice> {
        self.notices.first()
    }
}
