use uuid::Uuid;

use crate::layout::Layout;
use crate::pane::Pane;
use crate::pop::PopSet;

/// A named layout plus tab-scoped popups and notifications.
pub struct Tab {
    pub uuid: Uuid,
    pub name: String,
    pub layout: Layout,
    pub pops: PopSet,
}

impl Tab {
    pub fn new(name: impl Into<String>, first: Pane, x: u16, y: u16, w: u16, h: u16) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            layout: Layout::new(first, x, y, w, h),
            pops: PopSet::default(),
        }
    }
}
