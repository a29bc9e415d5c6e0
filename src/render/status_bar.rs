//! Status bar: left and right module sections around a centered tabs
//! module, with priority-based width budgets.

use chrono::Local;
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use unicode_width::UnicodeWidthStr;

use crate::app::App;
use crate::status::HostStats;

const ARROW_LEFT: &str = "❮";
const ARROW_RIGHT: &str = "❯";
const SEPARATOR: &str = " ⏐ ";

pub fn draw(app: &App, stats: &HostStats, area: Rect, buf: &mut Buffer) {
    if area.height == 0 {
        return;
    }
    buf.set_style(area, Style::default().bg(Color::Black));

    // Center: the tabs module, measured exactly and centered around the
    // terminal midpoint.
    let tabs = tabs_module(app);
    let tabs_width = tabs.iter().map(|(s, _)| s.width()).sum::<usize>() as u16;
    let mid = area.width / 2;
    let tabs_x = area.x + mid.saturating_sub(tabs_width / 2);
    let mut x = tabs_x;
    for (text, style) in &tabs {
        buf.set_string(x, area.y, text, *style);
        x += text.width() as u16;
    }

    // Left items fill the leftward budget in priority order.
    let left_budget = tabs_x.saturating_sub(area.x + 1) as usize;
    let left = section_items(app, stats, &app.config.status.left);
    let mut x = area.x + 1;
    let mut used = 0;
    for item in &left {
        let needed = item.width() + 2;
        if used + needed > left_budget {
            break;
        }
        buf.set_string(x, area.y, item, Style::default().fg(Color::Gray));
        x += needed as u16;
        used += needed;
    }

    // Right items fill the rightward budget, packed against the edge.
    let right_start = tabs_x + tabs_width;
    let right_budget = (area.x + area.width).saturating_sub(right_start + 1) as usize;
    let right = section_items(app, stats, &app.config.status.right);
    let mut fitted: Vec<&String> = Vec::new();
    let mut used = 0;
    for item in &right {
        let needed = item.width() + 2;
        if used + needed > right_budget {
            break;
        }
        fitted.push(item);
        used += needed;
    }
    let mut x = (area.x + area.width).saturating_sub(used as u16);
    for item in fitted {
        buf.set_string(x + 2, area.y, item, Style::default().fg(Color::Gray));
        x += item.width() as u16 + 2;
    }
}

fn tabs_module(app: &App) -> Vec<(String, Style)> {
    let active = Style::default()
        .fg(Color::Cyan)
        .add_modifier(Modifier::BOLD);
    let inactive = Style::default().fg(Color::DarkGray);

    let mut parts = vec![(format!("{} ", ARROW_LEFT), inactive)];
    for (i, tab) in app.tabs.iter().enumerate() {
        if i > 0 {
            parts.push((SEPARATOR.to_string(), inactive));
        }
        let style = if i == app.active_tab { active } else { inactive };
        parts.push((tab.name.clone(), style));
    }
    parts.push((format!(" {}", ARROW_RIGHT), inactive));
    parts
}

fn section_items(app: &App, stats: &HostStats, modules: &[String]) -> Vec<String> {
    modules
        .iter()
        .filter_map(|module| match module.as_str() {
            "session" => Some(app.session_name.clone()),
            "shell" => app
                .focused_pane()
                .and_then(|p| app.pane_shell.get(&p.uuid))
                .map(|info| {
                    if info.cmd.is_empty() {
                        info.cwd.clone()
                    } else {
                        format!("{} · {}", info.cmd, info.cwd)
                    }
                }),
            "clock" => Some(Local::now().format("%H:%M").to_string()),
            "host" => Some(stats.label()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}

/// Map a click on the status row to a tab index.
pub fn tab_hit(app: &App, area: Rect, x: u16) -> Option<usize> {
    let tabs = tabs_module(app);
    let tabs_width = tabs.iter().map(|(s, _)| s.width()).sum::<usize>() as u16;
    let mid = area.width / 2;
    let mut cursor = area.x + mid.saturating_sub(tabs_width / 2);
    let mut tab_index = 0;
    for (i, (text, _)) in tabs.iter().enumerate() {
        let w = text.width() as u16;
        let is_name = i > 0 && i < tabs.len() - 1 && !text.starts_with(' ') && text != SEPARATOR;
        if is_name {
            if x >= cursor && x < cursor + w {
                return Some(tab_index);
            }
            tab_index += 1;
        }
        cursor += w;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pane::Pane;
    use crate::tab::Tab;
    use uuid::Uuid;

    fn app_with_tabs(names: &[&str]) -> App {
        let mut app = App::new(Config::default(), Uuid::new_v4(), "wavelet".into(), 80, 24);
        for name in names {
            app.push_tab(Tab::new(
                *name,
                Pane::open_detached(0, 0, 0, 80, 23),
                0,
                0,
                80,
                23,
            ));
        }
        app
    }

    fn row_text(buf: &Buffer, area: Rect) -> String {
        (0..area.width)
            .map(|x| buf.cell((x, area.y)).unwrap().symbol().to_string())
            .collect()
    }

    /// Column (cell) index of a substring; every glyph here is width 1,
    /// so chars count as columns where byte offsets would not.
    fn col_of(text: &str, needle: &str) -> u16 {
        let byte = text.find(needle).unwrap();
        text[..byte].chars().count() as u16
    }

    #[test]
    fn tabs_are_centered_with_arrows() {
        let app = app_with_tabs(&["alpha", "beta"]);
        let stats = HostStats::new();
        let area = Rect::new(0, 23, 80, 1);
        let mut buf = Buffer::empty(area);
        draw(&app, &stats, area, &mut buf);
        let text = row_text(&buf, area);
        assert!(text.contains("alpha"));
        assert!(text.contains("beta"));
        assert!(text.contains(ARROW_LEFT));
        assert!(text.contains(ARROW_RIGHT));
        // Centered: the tabs block straddles the midpoint.
        let pos = col_of(&text, "alpha");
        assert!(pos > 20 && pos < 40, "tabs at {}", pos);
    }

    #[test]
    fn session_name_on_the_left() {
        let app = app_with_tabs(&["main"]);
        let stats = HostStats::new();
        let area = Rect::new(0, 23, 80, 1);
        let mut buf = Buffer::empty(area);
        draw(&app, &stats, area, &mut buf);
        let text = row_text(&buf, area);
        assert!(text.trim_start().starts_with("wavelet"));
    }

    #[test]
    fn low_priority_items_drop_when_tight() {
        let app = app_with_tabs(&["a-very-long-tab-name", "another-long-one"]);
        let stats = HostStats::new();
        let area = Rect::new(0, 23, 44, 1);
        let mut buf = Buffer::empty(area);
        draw(&app, &stats, area, &mut buf);
        // Narrow bar: the host stats (lowest right priority) are gone,
        // tabs survive.
        let text = row_text(&buf, area);
        assert!(text.contains("a-very-long-tab-name"));
        assert!(!text.contains("mem"));
    }

    #[test]
    fn tab_hit_maps_click_to_index() {
        let app = app_with_tabs(&["alpha", "beta"]);
        let area = Rect::new(0, 23, 80, 1);
        // Find where the renderer put the names, then click there.
        let stats = HostStats::new();
        let mut buf = Buffer::empty(area);
        draw(&app, &stats, area, &mut buf);
        let text = row_text(&buf, area);
        let alpha_x = col_of(&text, "alpha");
        let beta_x = col_of(&text, "beta");
        assert_eq!(tab_hit(&app, area, alpha_x + 1), Some(0));
        assert_eq!(tab_hit(&app, area, beta_x + 1), Some(1));
        assert_eq!(tab_hit(&app, area, 0), None);
    }
}
