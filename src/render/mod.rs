//! Frame composition.
//!
//! Order matters: tiled panes, split borders, floats back-to-front with
//! the active float last, status bar, then tab-scope and mux-scope
//! notifications and popups. The cursor is computed from the focused
//! pane at the end; ratatui's differential terminal emits the minimal
//! delta plus the cursor bytes on flush.

pub mod borders;
pub mod screen;
pub mod status_bar;

use ratatui::buffer::Buffer;
use ratatui::layout::{Position, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::Frame;
use uuid::Uuid;

use crate::app::App;
use crate::pop::{Notice, NotifyStyle, PopSet, Popup, PopupKind};
use crate::status::HostStats;
use self::screen::SelectionView;

pub fn draw(app: &mut App, stats: &HostStats, frame: &mut Frame) {
    // The selection pane's viewport top is needed to project the
    // buffer-anchored selection; grab it before the immutable walk.
    let sel_top: Option<(Uuid, usize)> = match &app.selection {
        Some(sel) => {
            let uuid = sel.pane;
            app.find_pane_by_uuid_mut(uuid)
                .map(|pane| (uuid, pane.viewport_top()))
        }
        None => None,
    };

    let area = frame.area();
    let buf = frame.buffer_mut();
    let (ux, uy, uw, uh) = app.usable();
    let usable = Rect::new(ux, uy, uw, uh);

    if app.tabs.is_empty() {
        return;
    }
    let tab = &app.tabs[app.active_tab];

    // Tiled panes.
    let rects = tab.layout.rects();
    for rect in &rects {
        let Some(pane) = tab.layout.splits.get(&rect.id) else {
            continue;
        };
        let pane_area = Rect::new(rect.x, rect.y, rect.w, rect.h);
        let view = selection_view(app, pane.uuid, &sel_top);
        screen::draw_screen(pane.screen(), pane_area, view.as_ref(), buf);
        screen::draw_scroll_marker(pane.scroll_offset, pane_area, buf);
        if let Some(notice) = pane.pops.current_notice() {
            draw_pane_notice(notice, pane.pops.notify_style, pane_area, buf);
        }
    }
    if rects.len() > 1 {
        borders::draw_split_borders(usable, &rects, buf);
    }

    // Floats, active last (topmost).
    let mut order = app.floats.visible_indices(app.active_tab);
    if let Some(active) = app.active_floating {
        if let Some(pos) = order.iter().position(|&i| i == active) {
            let idx = order.remove(pos);
            order.push(idx);
        }
    }
    for idx in order {
        let pane = &app.floats.panes[idx];
        let Some(props) = pane.float.as_ref() else {
            continue;
        };
        let frame_rect = Rect::new(props.border_x, props.border_y, props.border_w, props.border_h);
        if app.config.style.shadow {
            borders::draw_float_shadow(frame_rect, area, buf);
        }
        let active = app.active_floating == Some(idx);
        borders::draw_float_frame(frame_rect, &pane.title, active, buf);
        let content = Rect::new(pane.x, pane.y, pane.w, pane.h);
        clear_area(content, buf);
        let view = selection_view(app, pane.uuid, &sel_top);
        screen::draw_screen(pane.screen(), content, view.as_ref(), buf);
        screen::draw_scroll_marker(pane.scroll_offset, content, buf);
        if let Some(notice) = pane.pops.current_notice() {
            draw_pane_notice(notice, pane.pops.notify_style, content, buf);
        }
    }

    // Status bar.
    if app.status_height > 0 {
        let bar = Rect::new(0, area.height.saturating_sub(1), area.width, 1);
        status_bar::draw(app, stats, bar, buf);
    }

    // Tab-scope pops below mux-scope pops.
    draw_pops(&app.tabs[app.active_tab].pops, usable, buf);
    draw_pops(&app.pops, usable, buf);

    place_cursor(app, frame);
}

fn selection_view<'a>(
    app: &'a App,
    pane_uuid: Uuid,
    sel_top: &Option<(Uuid, usize)>,
) -> Option<SelectionView<'a>> {
    let (uuid, top) = sel_top.as_ref()?;
    if *uuid != pane_uuid {
        return None;
    }
    Some(SelectionView {
        selection: app.selection.as_ref()?,
        viewport_top: *top,
    })
}

fn clear_area(area: Rect, buf: &mut Buffer) {
    for y in area.y..area.y + area.height {
        for x in area.x..area.x + area.width {
            if let Some(cell) = buf.cell_mut((x, y)) {
                cell.reset();
            }
        }
    }
}

fn draw_pane_notice(notice: &Notice, style: NotifyStyle, pane_area: Rect, buf: &mut Buffer) {
    if pane_area.height == 0 {
        return;
    }
    let y = pane_area.y + pane_area.height - 1;
    let text: String = notice.text.chars().take(pane_area.width as usize).collect();
    let sgr = match style {
        NotifyStyle::Banner => Style::default().fg(Color::Black).bg(Color::Cyan),
        NotifyStyle::Quiet => Style::default().fg(Color::DarkGray),
    };
    buf.set_string(pane_area.x, y, &text, sgr);
}

fn draw_pops(pops: &PopSet, region: Rect, buf: &mut Buffer) {
    if let Some(notice) = pops.current_notice() {
        let width = (notice.text.chars().count() as u16 + 2).min(region.width);
        let x = region.x + region.width - width;
        let rect = Rect::new(x, region.y, width, 1);
        clear_area(rect, buf);
        buf.set_string(
            x + 1,
            region.y,
            &notice.text,
            Style::default().fg(Color::Black).bg(Color::Yellow),
        );
    }
    if let Some(popup) = &pops.popup {
        draw_popup(popup, region, buf);
    }
}

fn draw_popup(popup: &Popup, region: Rect, buf: &mut Buffer) {
    let body: Vec<(String, bool)> = match &popup.kind {
        PopupKind::Confirm => vec![("[y]es  [n]o".to_string(), false)],
        PopupKind::Picker { items, selected } => items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.clone(), i == *selected))
            .collect(),
    };
    let inner_w = body
        .iter()
        .map(|(s, _)| s.chars().count())
        .chain([popup.title.chars().count()])
        .max()
        .unwrap_or(0) as u16
        + 2;
    let w = (inner_w + 2).min(region.width);
    let h = (body.len() as u16 + 2).min(region.height);
    let x = region.x + (region.width.saturating_sub(w)) / 2;
    let y = region.y + (region.height.saturating_sub(h)) / 2;
    let rect = Rect::new(x, y, w, h);

    clear_area(rect, buf);
    borders::draw_float_frame(rect, &popup.title, true, buf);
    for (i, (line, selected)) in body.iter().enumerate() {
        let row = y + 1 + i as u16;
        if row >= y + h - 1 {
            break;
        }
        let style = if *selected {
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        let text: String = line.chars().take((w - 2) as usize).collect();
        buf.set_string(x + 1, row, &text, style);
    }
}

fn place_cursor(app: &App, frame: &mut Frame) {
    if app.pops.is_blocked() || app.tabs[app.active_tab].pops.is_blocked() {
        return;
    }
    let Some(pane) = app.focused_pane() else {
        return;
    };
    if pane.is_scrolled() || pane.screen().hide_cursor() {
        return;
    }
    let (row, col) = pane.screen().cursor_position();
    let x = pane.x + col.min(pane.w.saturating_sub(1));
    let y = pane.y + row.min(pane.h.saturating_sub(1));
    frame.set_cursor_position(Position { x, y });
}
