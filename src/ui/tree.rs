use ratatui::{
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem},
    Frame,
};

use super::styles;
use super::utils::truncate;
use crate::app::{App, Row};

/// First row to draw so the selection stays near the middle of the viewport
fn scroll_offset(selected: usize, total: usize, viewport: usize) -> usize {
    if total <= viewport || selected < viewport / 2 {
        0
    } else if selected > total.saturating_sub(viewport / 2) {
        total.saturating_sub(viewport)
    } else {
        selected.saturating_sub(viewport / 2)
    }
}

fn row_line(row: &Row, is_selected: bool, width: usize) -> Line<'static> {
    let base = if is_selected {
        styles::selected_style()
    } else {
        styles::surface_style()
    };

    let indent = "  ".repeat(row.depth);
    let arrow = match (row.node.collapsible, row.expanded) {
        (true, true) => "▾ ",
        (true, false) => "▸ ",
        (false, _) => "  ",
    };
    let (glyph, glyph_style) = match row.node.icon {
        Some(icon) => (icon.glyph, Style::default().fg(styles::tone_color(icon.tone))),
        None => (" ", Style::default()),
    };

    let used = indent.chars().count() + arrow.chars().count() + 3;
    let label_width = width.saturating_sub(used);
    let label = truncate(&row.node.label, label_width);
    let remaining = label_width.saturating_sub(label.chars().count() + 2);

    let mut spans = vec![
        Span::raw(format!(" {indent}{arrow}")),
        Span::styled(format!("{glyph} "), glyph_style),
        Span::styled(label, base),
    ];
    if let Some(desc) = row.node.description.as_deref().filter(|_| remaining > 3) {
        spans.push(Span::styled(
            format!("  {}", truncate(desc, remaining)),
            if is_selected { base } else { styles::dim_style() },
        ));
    }
    Line::from(spans).style(base)
}

/// Render the patch tree (left side)
pub fn render(f: &mut Frame, area: Rect, app: &App) {
    let title = if app.root_loading {
        format!(" PATCHES · {} · loading… ", app.repo_label())
    } else {
        format!(" PATCHES ({}) · {} ", app.patch_count(), app.repo_label())
    };

    let viewport = area.height.saturating_sub(2) as usize;
    let offset = scroll_offset(app.selected, app.rows.len(), viewport);
    let end = (offset + viewport).min(app.rows.len());
    let width = area.width.saturating_sub(2) as usize;

    let items: Vec<ListItem> = app.rows[offset..end]
        .iter()
        .enumerate()
        .map(|(i, row)| ListItem::new(row_line(row, offset + i == app.selected, width)))
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(styles::border_style())
                .title(Span::styled(title, styles::heading_style())),
        )
        .style(styles::surface_style());
    f.render_widget(list, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scroll_keeps_selection_visible() {
        assert_eq!(scroll_offset(0, 5, 10), 0);
        assert_eq!(scroll_offset(3, 100, 10), 0);
        assert_eq!(scroll_offset(50, 100, 10), 45);
        assert_eq!(scroll_offset(99, 100, 10), 90);
    }
}
