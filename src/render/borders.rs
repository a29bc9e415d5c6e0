//! Split and float borders.

use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Style};

use crate::layout::PaneRect;

const V: &str = "│";
const H: &str = "─";
const CROSS: &str = "┼";
const TEE_DOWN: &str = "┬";
const TEE_UP: &str = "┴";
const TEE_RIGHT: &str = "├";
const TEE_LEFT: &str = "┤";

/// Draw the interior borders of a tab's split layout. A border cell is
/// only drawn where a pane actually ends on that axis; meeting lines
/// become tees and crosses.
pub fn draw_split_borders(region: Rect, rects: &[PaneRect], buf: &mut Buffer) {
    if rects.len() < 2 || region.width == 0 || region.height == 0 {
        return;
    }
    let w = region.width as usize;
    let h = region.height as usize;
    let mut vert = vec![false; w * h];
    let mut horiz = vec![false; w * h];
    let idx = |x: u16, y: u16| -> Option<usize> {
        let lx = x.checked_sub(region.x)?;
        let ly = y.checked_sub(region.y)?;
        if lx >= region.width || ly >= region.height {
            None
        } else {
            Some(ly as usize * w + lx as usize)
        }
    };

    for rect in rects {
        // Right edge border column.
        let bx = rect.x + rect.w;
        if bx < region.x + region.width {
            for y in rect.y..rect.y + rect.h {
                if let Some(i) = idx(bx, y) {
                    vert[i] = true;
                }
            }
        }
        // Bottom edge border row.
        let by = rect.y + rect.h;
        if by < region.y + region.height {
            for x in rect.x..rect.x + rect.w {
                if let Some(i) = idx(x, by) {
                    horiz[i] = true;
                }
            }
        }
    }

    let style = Style::default().fg(Color::DarkGray);
    for ly in 0..h as u16 {
        for lx in 0..w as u16 {
            let i = ly as usize * w + lx as usize;
            let is_v = vert[i];
            let is_h = horiz[i];
            if !is_v && !is_h {
                continue;
            }
            let at = |dx: i32, dy: i32, grid: &[bool]| -> bool {
                let x = lx as i32 + dx;
                let y = ly as i32 + dy;
                if x < 0 || y < 0 || x >= w as i32 || y >= h as i32 {
                    return false;
                }
                grid[y as usize * w + x as usize]
            };
            // A line passes through this cell, and neighboring lines may
            // terminate into it; connectivity picks the glyph.
            let up = is_v || at(0, -1, &vert);
            let down = is_v || at(0, 1, &vert);
            let left = is_h || at(-1, 0, &horiz);
            let right = is_h || at(1, 0, &horiz);
            let glyph = match (up, down, left, right) {
                (true, true, true, true) => CROSS,
                (true, true, false, true) => TEE_RIGHT,
                (true, true, true, false) => TEE_LEFT,
                (false, true, true, true) => TEE_DOWN,
                (true, false, true, true) => TEE_UP,
                (true, true, false, false) => V,
                (false, false, true, true) => H,
                _ if is_v => V,
                _ => H,
            };
            buf.set_string(region.x + lx, region.y + ly, glyph, style);
        }
    }
}

/// Rounded float frame with an optional title in the top border.
pub fn draw_float_frame(rect: Rect, title: &str, active: bool, buf: &mut Buffer) {
    if rect.width < 2 || rect.height < 2 {
        return;
    }
    let style = if active {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let right = rect.x + rect.width - 1;
    let bottom = rect.y + rect.height - 1;

    buf.set_string(rect.x, rect.y, "╭", style);
    buf.set_string(right, rect.y, "╮", style);
    buf.set_string(rect.x, bottom, "╰", style);
    buf.set_string(right, bottom, "╯", style);
    for x in rect.x + 1..right {
        buf.set_string(x, rect.y, H, style);
        buf.set_string(x, bottom, H, style);
    }
    for y in rect.y + 1..bottom {
        buf.set_string(rect.x, y, V, style);
        buf.set_string(right, y, V, style);
    }
    if !title.is_empty() && rect.width > 6 {
        let max = (rect.width - 4) as usize;
        let shown: String = title.chars().take(max).collect();
        buf.set_string(rect.x + 2, rect.y, format!(" {} ", shown), style);
    }
}

/// Drop shadow: one column to the right, and a bottom row drawn with the
/// upper-half block so its visual weight matches the single column.
pub fn draw_float_shadow(rect: Rect, screen: Rect, buf: &mut Buffer) {
    let style = Style::default().fg(Color::Black);
    let shadow_x = rect.x + rect.width;
    if shadow_x < screen.x + screen.width {
        for y in rect.y + 1..(rect.y + rect.height).min(screen.y + screen.height) {
            buf.set_string(shadow_x, y, "█", style);
        }
    }
    let shadow_y = rect.y + rect.height;
    if shadow_y < screen.y + screen.height {
        for x in rect.x + 1..=(shadow_x).min(screen.x + screen.width - 1) {
            buf.set_string(x, shadow_y, "▀", style);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(w: u16, h: u16) -> Buffer {
        Buffer::empty(Rect::new(0, 0, w, h))
    }

    fn symbol_at(buf: &Buffer, x: u16, y: u16) -> &str {
        buf.cell((x, y)).unwrap().symbol()
    }

    #[test]
    fn vertical_border_between_two_panes() {
        let rects = vec![
            PaneRect { id: 0, x: 0, y: 0, w: 39, h: 24 },
            PaneRect { id: 1, x: 40, y: 0, w: 40, h: 24 },
        ];
        let mut buf = buffer(80, 24);
        draw_split_borders(Rect::new(0, 0, 80, 24), &rects, &mut buf);
        for y in 0..24 {
            assert_eq!(symbol_at(&buf, 39, y), V, "row {}", y);
        }
        // No border drawn inside panes.
        assert_eq!(symbol_at(&buf, 10, 5), " ");
    }

    #[test]
    fn junction_where_borders_meet() {
        // Left pane full height; right half stacked, so the horizontal
        // border of the right half tees into the vertical one.
        let rects = vec![
            PaneRect { id: 0, x: 0, y: 0, w: 39, h: 24 },
            PaneRect { id: 1, x: 40, y: 0, w: 40, h: 11 },
            PaneRect { id: 2, x: 40, y: 12, w: 40, h: 12 },
        ];
        let mut buf = buffer(80, 24);
        draw_split_borders(Rect::new(0, 0, 80, 24), &rects, &mut buf);
        assert_eq!(symbol_at(&buf, 39, 11), TEE_RIGHT);
        assert_eq!(symbol_at(&buf, 50, 11), H);
        assert_eq!(symbol_at(&buf, 39, 5), V);
    }

    #[test]
    fn single_pane_draws_nothing() {
        let rects = vec![PaneRect { id: 0, x: 0, y: 0, w: 80, h: 24 }];
        let mut buf = buffer(80, 24);
        draw_split_borders(Rect::new(0, 0, 80, 24), &rects, &mut buf);
        assert_eq!(symbol_at(&buf, 40, 10), " ");
    }

    #[test]
    fn float_frame_and_title() {
        let mut buf = buffer(40, 12);
        draw_float_frame(Rect::new(5, 2, 20, 8), "scratch", true, &mut buf);
        assert_eq!(symbol_at(&buf, 5, 2), "╭");
        assert_eq!(symbol_at(&buf, 24, 2), "╮");
        assert_eq!(symbol_at(&buf, 5, 9), "╰");
        assert_eq!(symbol_at(&buf, 24, 9), "╯");
        // Title starts after the corner run.
        assert_eq!(symbol_at(&buf, 8, 2), "s");
    }

    #[test]
    fn shadow_right_column_and_half_block_bottom() {
        let mut buf = buffer(40, 12);
        let rect = Rect::new(5, 2, 20, 8);
        draw_float_shadow(rect, Rect::new(0, 0, 40, 12), &mut buf);
        assert_eq!(symbol_at(&buf, 25, 3), "█");
        assert_eq!(symbol_at(&buf, 10, 10), "▀");
    }

    #[test]
    fn shadow_clipped_at_screen_edge() {
        let mut buf = buffer(25, 10);
        let rect = Rect::new(5, 2, 20, 8);
        // rect touches both screen edges; nothing panics, nothing drawn
        // outside.
        draw_float_shadow(rect, Rect::new(0, 0, 25, 10), &mut buf);
        assert_eq!(symbol_at(&buf, 24, 3), " ");
    }
}
