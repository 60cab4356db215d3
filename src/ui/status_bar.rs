use ratatui::{
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use super::styles;
use crate::app::App;
use crate::httpd::types::RepoInfo;
use crate::patch::shorten_hash;

const KEY_HINTS: [(&str, &str); 9] = [
    ("j/k", "move"),
    ("⏎", "expand"),
    ("d", "diff"),
    ("c", "checkout"),
    ("r", "refresh"),
    ("R", "refetch"),
    ("S", "sync"),
    ("?", "details"),
    ("q", "quit"),
];

/// Compute the display width of a list of spans
fn spans_width(spans: &[Span]) -> usize {
    spans.iter().map(|s| s.content.chars().count()).sum()
}

/// `master · 3 open · 1 merged`; states without patches are left out
fn repo_summary(repo: &RepoInfo) -> String {
    let counts = &repo.patches;
    let mut parts = vec![repo.default_branch.clone()];
    for (n, label) in [
        (counts.draft, "draft"),
        (counts.open, "open"),
        (counts.archived, "archived"),
        (counts.merged, "merged"),
    ] {
        if n > 0 {
            parts.push(format!("{n} {label}"));
        }
    }
    parts.retain(|p| !p.is_empty());
    parts.join(" · ")
}

/// Render the top status bar
///
///   repo  master · 3 open · ✓ checked-out patch          api url
pub fn render_top_bar(f: &mut Frame, area: Rect, app: &App) {
    let mut left = vec![Span::styled(format!(" {} ", app.repo_label()), styles::heading_style())];
    if let Some(summary) = app.repo.as_ref().map(repo_summary).filter(|s| !s.is_empty()) {
        left.push(Span::styled(format!("{summary} "), styles::dim_style()));
    }
    if let Some(id) = &app.checked_out {
        left.push(Span::styled("· ", styles::dim_style()));
        left.push(Span::styled(
            format!("✓ {}", shorten_hash(id)),
            Style::default().fg(styles::GREEN),
        ));
    }

    let right = Span::styled(format!("{} ", app.config.httpd.api_url), styles::dim_style());
    let gap = (area.width as usize)
        .saturating_sub(spans_width(&left) + right.content.chars().count());
    left.push(Span::raw(" ".repeat(gap)));
    left.push(right);

    let bar = Paragraph::new(Line::from(left)).style(styles::panel_style());
    f.render_widget(bar, area);
}

/// Render the key hints at the bottom
pub fn render_bottom_bar(f: &mut Frame, area: Rect, _app: &App) {
    let mut spans = Vec::new();
    for (key, label) in KEY_HINTS {
        if spans_width(&spans) + key.chars().count() + label.chars().count() + 3 > area.width as usize {
            break;
        }
        spans.push(Span::styled(format!(" {key}"), styles::key_hint_style()));
        spans.push(Span::styled(format!(" {label} "), styles::dim_style()));
    }
    let bar = Paragraph::new(Line::from(spans)).style(styles::panel_style());
    f.render_widget(bar, area);
}

pub fn render_notification(f: &mut Frame, area: Rect, message: &str) {
    let notif_width = message.chars().count() as u16 + 4;
    let notif_x = area.x + area.width.saturating_sub(notif_width + 2);
    let notif_y = area.y + 2;

    let notif_area = Rect {
        x: notif_x,
        y: notif_y,
        width: notif_width.min(area.width),
        height: 1,
    };

    let notif = Paragraph::new(Line::from(vec![
        Span::styled(" ● ", Style::default().fg(styles::GREEN)),
        Span::styled(message, Style::default().fg(styles::TEXT)),
        Span::raw(" "),
    ]))
    .style(Style::default().bg(styles::PANEL).fg(styles::TEXT));

    f.render_widget(notif, notif_area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::httpd::types::PatchCounts;

    #[test]
    fn summary_skips_empty_states() {
        let repo = RepoInfo {
            name: "heartwood".into(),
            description: String::new(),
            default_branch: "master".into(),
            patches: PatchCounts {
                draft: 0,
                open: 3,
                archived: 0,
                merged: 12,
            },
        };
        assert_eq!(repo_summary(&repo), "master · 3 open · 12 merged");

        let bare = RepoInfo {
            default_branch: String::new(),
            patches: PatchCounts::default(),
            ..repo
        };
        assert_eq!(repo_summary(&bare), "");
    }
}
