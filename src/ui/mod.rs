mod detail;
mod status_bar;
mod styles;
mod tree;
mod utils;

use crate::app::App;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::Frame;

/// Render the entire UI
pub fn draw(f: &mut Frame, app: &App) {
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // top bar
            Constraint::Min(1),    // tree (+ details)
            Constraint::Length(1), // key hints
        ])
        .split(f.area());

    status_bar::render_top_bar(f, outer[0], app);

    // Narrow terminals get the tree only
    if app.show_detail && outer[1].width >= 80 {
        let main_area = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Length(app.config.display.tree_width),
                Constraint::Min(1),
            ])
            .split(outer[1]);
        tree::render(f, main_area[0], app);
        detail::render(f, main_area[1], app);
    } else {
        tree::render(f, outer[1], app);
    }

    status_bar::render_bottom_bar(f, outer[2], app);

    if let Some(ref msg) = app.notification {
        status_bar::render_notification(f, f.area(), msg);
    }
}
