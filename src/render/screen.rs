//! Pane content drawing: vt100 cells into the frame buffer.

use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};

use crate::select::Selection;

/// Selection context for the overlay: the drag plus the pane's current
/// viewport top, to project buffer rows onto the screen.
pub struct SelectionView<'a> {
    pub selection: &'a Selection,
    pub viewport_top: usize,
}

pub fn draw_screen(
    screen: &vt100::Screen,
    area: Rect,
    selection: Option<&SelectionView<'_>>,
    buf: &mut Buffer,
) {
    let (rows, cols) = screen.size();
    for row in 0..area.height.min(rows) {
        for col in 0..area.width.min(cols) {
            let cell = screen.cell(row, col);
            if cell.map_or(false, |c| c.is_wide_continuation()) {
                continue;
            }
            let mut style = cell.map_or_else(Style::default, cell_style);
            if let Some(view) = selection {
                if view
                    .selection
                    .contains(col, view.viewport_top + row as usize)
                {
                    style = style.add_modifier(Modifier::REVERSED);
                }
            }
            let symbol = match cell {
                Some(c) if !c.contents().is_empty() => c.contents(),
                _ => " ".to_string(),
            };
            buf.set_string(area.x + col, area.y + row, &symbol, style);
        }
    }
}

/// `[+N]` marker at the top-right of a scrolled pane.
pub fn draw_scroll_marker(offset: usize, area: Rect, buf: &mut Buffer) {
    if offset == 0 || area.width < 8 {
        return;
    }
    let label = format!("[+{}]", offset);
    let x = area.x + area.width - label.len() as u16;
    buf.set_string(
        x,
        area.y,
        &label,
        Style::default().fg(Color::Black).bg(Color::Yellow),
    );
}

fn cell_style(cell: &vt100::Cell) -> Style {
    let mut style = Style::default()
        .fg(convert_color(cell.fgcolor()))
        .bg(convert_color(cell.bgcolor()));
    if cell.bold() {
        style = style.add_modifier(Modifier::BOLD);
    }
    if cell.italic() {
        style = style.add_modifier(Modifier::ITALIC);
    }
    if cell.underline() {
        style = style.add_modifier(Modifier::UNDERLINED);
    }
    if cell.inverse() {
        style = style.add_modifier(Modifier::REVERSED);
    }
    style
}

fn convert_color(color: vt100::Color) -> Color {
    match color {
        vt100::Color::Default => Color::Reset,
        vt100::Color::Idx(n) => Color::Indexed(n),
        vt100::Color::Rgb(r, g, b) => Color::Rgb(r, g, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn buffer(w: u16, h: u16) -> Buffer {
        Buffer::empty(Rect::new(0, 0, w, h))
    }

    fn symbol_at(buf: &Buffer, x: u16, y: u16) -> &str {
        buf.cell((x, y)).unwrap().symbol()
    }

    #[test]
    fn screen_contents_land_in_buffer() {
        let mut parser = vt100::Parser::new(5, 20, 0);
        parser.process(b"hi there");
        let mut buf = buffer(20, 5);
        draw_screen(parser.screen(), Rect::new(0, 0, 20, 5), None, &mut buf);
        assert_eq!(symbol_at(&buf, 0, 0), "h");
        assert_eq!(symbol_at(&buf, 1, 0), "i");
        assert_eq!(symbol_at(&buf, 3, 0), "t");
    }

    #[test]
    fn offset_area_is_respected() {
        let mut parser = vt100::Parser::new(3, 10, 0);
        parser.process(b"x");
        let mut buf = buffer(20, 10);
        draw_screen(parser.screen(), Rect::new(5, 4, 10, 3), None, &mut buf);
        assert_eq!(symbol_at(&buf, 5, 4), "x");
    }

    #[test]
    fn selection_overlay_reverses_cells() {
        let mut parser = vt100::Parser::new(3, 10, 0);
        parser.process(b"abcdef");
        let mut sel = Selection::begin(Uuid::new_v4(), 1, 0);
        sel.update(3, 0);
        let view = SelectionView {
            selection: &sel,
            viewport_top: 0,
        };
        let mut buf = buffer(10, 3);
        draw_screen(parser.screen(), Rect::new(0, 0, 10, 3), Some(&view), &mut buf);
        let reversed = |x: u16| {
            buf.cell((x, 0))
                .unwrap()
                .style()
                .add_modifier
                .contains(Modifier::REVERSED)
        };
        assert!(!reversed(0));
        assert!(reversed(1) && reversed(2) && reversed(3));
        assert!(!reversed(4));
    }

    #[test]
    fn scroll_marker_at_top_right() {
        let mut buf = buffer(20, 5);
        draw_scroll_marker(12, Rect::new(0, 0, 20, 5), &mut buf);
        assert_eq!(symbol_at(&buf, 15, 0), "[");
        assert_eq!(symbol_at(&buf, 16, 0), "+");
        assert_eq!(symbol_at(&buf, 17, 0), "1");
        assert_eq!(symbol_at(&buf, 18, 0), "2");
        assert_eq!(symbol_at(&buf, 19, 0), "]");
    }
}
