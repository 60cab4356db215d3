use ratatui::{
    layout::Rect,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use super::styles;
use super::utils::word_wrap;
use crate::app::App;

/// Light markdown styling: headings bold, rules dimmed, the rest as text
fn styled_line(line: String) -> Line<'static> {
    if let Some(heading) = line.strip_prefix("### ") {
        return Line::from(Span::styled(heading.to_string(), styles::heading_style()));
    }
    if line == "---" {
        return Line::from(Span::styled("─".repeat(24), styles::dim_style()));
    }
    Line::from(Span::raw(line))
}

/// Render the tooltip of the selected node (right side)
pub fn render(f: &mut Frame, area: Rect, app: &App) {
    let width = area.width.saturating_sub(4) as usize;
    // Rows without a tooltip fall back to the repository description
    let text = app
        .selected_row()
        .and_then(|r| r.node.tooltip.as_deref())
        .or_else(|| app.repo.as_ref().map(|r| r.description.as_str()).filter(|d| !d.is_empty()));
    let lines: Vec<Line> = match text {
        Some(md) => word_wrap(md, width).into_iter().map(styled_line).collect(),
        None => vec![Line::from(Span::styled("Nothing to show", styles::dim_style()))],
    };

    let paragraph = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(styles::border_style())
                .title(Span::styled(" DETAILS ", styles::heading_style())),
        )
        .style(styles::panel_style());
    f.render_widget(paragraph, area);
}
