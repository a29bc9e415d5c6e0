//! Mouse selection.
//!
//! Anchor and cursor live in buffer coordinates `(col, absolute row)`,
//! where row 0 is the oldest retained scrollback line. Scrolling the
//! viewport during a drag therefore never moves the selected text; only
//! the on-screen overlay shifts.

use uuid::Uuid;

use crate::pane::Pane;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufPos {
    pub col: u16,
    pub row: usize,
}

#[derive(Clone, Debug)]
pub struct Selection {
    pub pane: Uuid,
    pub anchor: BufPos,
    pub cursor: BufPos,
    pub dragging: bool,
}

impl Selection {
    pub fn begin(pane: Uuid, col: u16, row: usize) -> Self {
        let pos = BufPos { col, row };
        Self {
            pane,
            anchor: pos,
            cursor: pos,
            dragging: true,
        }
    }

    pub fn update(&mut self, col: u16, row: usize) {
        self.cursor = BufPos { col, row };
    }

    pub fn finish(&mut self) {
        self.dragging = false;
    }

    /// Normalized (start, end), both inclusive, in reading order.
    pub fn range(&self) -> (BufPos, BufPos) {
        if (self.anchor.row, self.anchor.col) <= (self.cursor.row, self.cursor.col) {
            (self.anchor, self.cursor)
        } else {
            (self.cursor, self.anchor)
        }
    }

    /// Whether a buffer cell falls inside the selection (character
    /// selection semantics: full rows between the endpoints).
    pub fn contains(&self, col: u16, row: usize) -> bool {
        let (start, end) = self.range();
        if row < start.row || row > end.row {
            return false;
        }
        if start.row == end.row {
            col >= start.col && col <= end.col
        } else if row == start.row {
            col >= start.col
        } else if row == end.row {
            col <= end.col
        } else {
            true
        }
    }
}

/// Extract the selected text from the pane's history. Rows are walked at
/// their absolute positions, so the selection survives any viewport
/// state; trailing spaces are trimmed per row.
pub fn extract(pane: &mut Pane, sel: &Selection) -> String {
    let (start, end) = sel.range();
    let cols = pane.screen().size().1;
    let mut out = String::new();
    for row in start.row..=end.row {
        let line = pane.with_viewport_at(row, |screen, screen_row| {
            line_text(screen, screen_row, cols)
        });
        let from = if row == start.row { start.col as usize } else { 0 };
        let to = if row == end.row {
            (end.col as usize + 1).min(line.chars().count())
        } else {
            line.chars().count()
        };
        let segment: String = line
            .chars()
            .skip(from.min(line.chars().count()))
            .take(to.saturating_sub(from))
            .collect();
        if row > start.row {
            out.push('\n');
        }
        out.push_str(segment.trim_end());
    }
    out
}

fn line_text(screen: &vt100::Screen, row: u16, cols: u16) -> String {
    let mut line = String::with_capacity(cols as usize);
    for col in 0..cols {
        match screen.cell(row, col) {
            Some(cell) if cell.is_wide_continuation() => {}
            Some(cell) => {
                let contents = cell.contents();
                if contents.is_empty() {
                    line.push(' ');
                } else {
                    line.push_str(&contents);
                }
            }
            None => line.push(' '),
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pane::Pane;

    fn filled_pane() -> Pane {
        let mut pane = Pane::open_detached(0, 0, 0, 80, 24);
        for i in 0..100 {
            pane.process_output(format!("line {} content\r\n", i).as_bytes());
        }
        pane
    }

    #[test]
    fn range_normalizes_backward_drag() {
        let mut sel = Selection::begin(Uuid::new_v4(), 10, 50);
        sel.update(2, 40);
        let (start, end) = sel.range();
        assert_eq!(start, BufPos { col: 2, row: 40 });
        assert_eq!(end, BufPos { col: 10, row: 50 });
    }

    #[test]
    fn contains_spans_rows() {
        let mut sel = Selection::begin(Uuid::new_v4(), 5, 10);
        sel.update(3, 12);
        assert!(sel.contains(5, 10));
        assert!(sel.contains(79, 10));
        assert!(!sel.contains(4, 10));
        assert!(sel.contains(0, 11));
        assert!(sel.contains(3, 12));
        assert!(!sel.contains(4, 12));
        assert!(!sel.contains(0, 13));
    }

    #[test]
    fn anchor_invariant_under_scroll() {
        let mut pane = filled_pane();
        let top = pane.viewport_top();
        let mut sel = Selection::begin(pane.uuid, 5, top + 3);
        pane.scroll_up(10);
        // Anchor unchanged; the same buffer row now projects 10 rows lower.
        assert_eq!(sel.anchor.row, top + 3);
        assert_eq!(sel.anchor.row - pane.viewport_top(), 13);
        sel.update(10, pane.viewport_top() + 5);
        assert_eq!(sel.cursor.row, top - 10 + 5);
    }

    #[test]
    fn extract_single_row() {
        let mut pane = filled_pane();
        // Row "line 0 content" is the oldest retained row.
        let sel = Selection::begin(pane.uuid, 0, 0);
        let mut sel = sel;
        sel.update(5, 0);
        assert_eq!(extract(&mut pane, &sel), "line 0");
    }

    #[test]
    fn extract_multi_row_spans_scrollback() {
        let mut pane = filled_pane();
        let mut sel = Selection::begin(pane.uuid, 0, 0);
        sel.update(79, 2);
        let text = extract(&mut pane, &sel);
        assert_eq!(text, "line 0 content\nline 1 content\nline 2 content");
    }

    #[test]
    fn extract_trims_trailing_spaces() {
        let mut pane = Pane::open_detached(0, 0, 0, 80, 24);
        pane.process_output(b"abc   \r\ndef\r\n");
        let mut sel = Selection::begin(pane.uuid, 0, 0);
        sel.update(79, 0);
        assert_eq!(extract(&mut pane, &sel), "abc");
    }

    #[test]
    fn extract_leaves_viewport_untouched() {
        let mut pane = filled_pane();
        pane.scroll_up(7);
        let mut sel = Selection::begin(pane.uuid, 0, 0);
        sel.update(10, 1);
        extract(&mut pane, &sel);
        assert_eq!(pane.scroll_offset, 7);
    }
}
