use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Frame;
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::app::editor::EditorBuffer;
use crate::app::state::{TabBadge, Workspace};
use crate::journaling::{RecoveryOffer, Severity};
use crate::session::Document;

pub fn draw_app(frame: &mut Frame, workspace: &Workspace, compact_threshold: usize) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(2),
        ])
        .split(frame.size());

    draw_tab_strip(frame, vertical[0], workspace, compact_threshold);
    draw_editor(frame, vertical[1], workspace);
    draw_status(frame, vertical[2], workspace);

    if let Some(offer) = workspace.recovery_offer() {
        draw_recovery(frame, offer);
    }
}

pub fn badge_symbol(badge: TabBadge) -> &'static str {
    match badge {
        TabBadge::Clean => "",
        TabBadge::Unsaved => "●",
        TabBadge::Saving => "…",
        TabBadge::Failed => "!",
        TabBadge::BackupFailed => "‼",
    }
}

fn badge_style(badge: TabBadge) -> Style {
    match badge {
        TabBadge::Clean => Style::default(),
        TabBadge::Unsaved => Style::default().fg(Color::Yellow),
        TabBadge::Saving => Style::default().fg(Color::Cyan),
        TabBadge::Failed => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        TabBadge::BackupFailed => Style::default()
            .fg(Color::White)
            .bg(Color::Red)
            .add_modifier(Modifier::BOLD),
    }
}

/// Label of one tab in the full strip, e.g. `1 Opening ●`.
pub fn tab_label(position: usize, doc: &Document, badge: TabBadge) -> String {
    let mut label = String::new();
    if position < 9 {
        label.push_str(&format!("{} ", position + 1));
    }
    label.push_str(doc.display_title());
    let symbol = badge_symbol(badge);
    if !symbol.is_empty() {
        label.push(' ');
        label.push_str(symbol);
    }
    label
}

/// Compact form used when the full strip would not fit: `‹ 3/12 Title ● ›`.
pub fn compact_label(position: usize, total: usize, doc: &Document, badge: TabBadge) -> String {
    let symbol = badge_symbol(badge);
    let title = doc.display_title();
    if symbol.is_empty() {
        format!("‹ {}/{} {} ›", position + 1, total, title)
    } else {
        format!("‹ {}/{} {} {} ›", position + 1, total, title, symbol)
    }
}

pub fn use_compact_strip(labels: &[String], width: u16, threshold: usize) -> bool {
    if labels.len() > threshold {
        return true;
    }
    let needed: usize = labels
        .iter()
        .map(|label| UnicodeWidthStr::width(label.as_str()) + 3)
        .sum();
    needed > usize::from(width)
}

fn draw_tab_strip(frame: &mut Frame, area: Rect, workspace: &Workspace, threshold: usize) {
    let docs = workspace.open_documents();
    if docs.is_empty() {
        let hint = Paragraph::new(Span::styled(
            "No chapter open. Ctrl+O opens the next chapter of the outline.",
            Style::default().fg(Color::Gray),
        ));
        frame.render_widget(hint, area);
        return;
    }
    let active = workspace.active_document_id();
    let badges: Vec<TabBadge> = docs.iter().map(|doc| workspace.tab_badge(&doc.id)).collect();
    let labels: Vec<String> = docs
        .iter()
        .zip(&badges)
        .enumerate()
        .map(|(idx, (doc, badge))| tab_label(idx, doc, *badge))
        .collect();

    let line = if use_compact_strip(&labels, area.width, threshold) {
        let index = workspace.tabs().active_index().unwrap_or(0);
        let doc = docs[index.min(docs.len() - 1)];
        Line::from(vec![Span::styled(
            compact_label(index, docs.len(), doc, workspace.tab_badge(&doc.id)),
            Style::default().add_modifier(Modifier::BOLD),
        )])
    } else {
        let mut spans = Vec::with_capacity(labels.len() * 2);
        for ((doc, label), badge) in docs.iter().zip(labels).zip(badges) {
            let style = if Some(&doc.id) == active {
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Cyan)
                    .add_modifier(Modifier::BOLD)
            } else {
                badge_style(badge)
            };
            spans.push(Span::styled(format!(" {label} "), style));
            spans.push(Span::styled("│", Style::default().fg(Color::DarkGray)));
        }
        Line::from(spans)
    };
    frame.render_widget(Paragraph::new(line), area);
}

fn draw_editor(frame: &mut Frame, area: Rect, workspace: &Workspace) {
    let active = workspace
        .active_document_id()
        .and_then(|id| workspace.document(id));
    let title = match active {
        Some(doc) => format!(
            " {} · {} · {} words · {} min read ",
            doc.display_title(),
            doc.status.label(),
            doc.word_count,
            doc.estimated_reading_time
        ),
        None => " Quill ".to_string(),
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    match (workspace.editor(), active) {
        (Some(editor), _) => {
            let paragraph = Paragraph::new(editor.text().to_string())
                .block(block)
                .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
            if workspace.recovery_offer().is_none() {
                if let Some((x, y)) = cursor_screen_position(editor, area) {
                    frame.set_cursor(x, y);
                }
            }
        }
        (None, Some(doc)) => {
            let message = match &doc.error {
                Some(err) => format!("Could not load this chapter: {err}"),
                None => "Loading…".to_string(),
            };
            frame.render_widget(
                Paragraph::new(Span::styled(message, Style::default().fg(Color::Yellow)))
                    .block(block),
                area,
            );
        }
        (None, None) => frame.render_widget(Paragraph::new("").block(block), area),
    }
}

fn cursor_screen_position(editor: &EditorBuffer, area: Rect) -> Option<(u16, u16)> {
    let inner_width = usize::from(area.width.saturating_sub(2));
    let inner_height = area.height.saturating_sub(2);
    if inner_width == 0 || inner_height == 0 {
        return None;
    }
    let text = editor.text();
    let mut row: u16 = 0;
    let mut col = 0usize;
    for grapheme in text[..editor.cursor().min(text.len())].graphemes(true) {
        if grapheme == "\n" {
            row = row.saturating_add(1);
            col = 0;
            continue;
        }
        let width = UnicodeWidthStr::width(grapheme);
        if width > 0 && col + width > inner_width {
            row = row.saturating_add(1);
            col = 0;
        }
        col += width;
    }
    let row = row.min(inner_height - 1);
    let col = col.min(inner_width - 1) as u16;
    Some((area.x + 1 + col, area.y + 1 + row))
}

fn draw_status(frame: &mut Frame, area: Rect, workspace: &Workspace) {
    let now = workspace.now();
    let status_line = match workspace.save_status() {
        Some(status) => {
            let style = match status.severity() {
                Severity::Info => Style::default().fg(Color::Gray),
                Severity::Warning => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                Severity::Critical => Style::default()
                    .fg(Color::White)
                    .bg(Color::Red)
                    .add_modifier(Modifier::BOLD),
            };
            Line::from(Span::styled(status.describe(now), style))
        }
        None => Line::from(""),
    };
    let mut hint = vec![Span::styled(
        "Ctrl+S save · Ctrl+W close · Ctrl+O open · Alt+1-9 tab · Alt+←/→ move · Ctrl+Q quit",
        Style::default().fg(Color::DarkGray),
    )];
    if let Some(message) = workspace.status_message() {
        hint.insert(0, Span::raw(" │ "));
        hint.insert(0, Span::styled(message.to_string(), Style::default().fg(Color::Yellow)));
    }
    frame.render_widget(Paragraph::new(vec![status_line, Line::from(hint)]), area);
}

fn draw_recovery(frame: &mut Frame, offer: &RecoveryOffer) {
    let area = centered_rect(70, 50, frame.size());
    frame.render_widget(Clear, area);

    let mut lines = vec![
        Line::from(Span::styled(
            "A local backup of this chapter was found",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            Span::raw("Saved locally "),
            Span::styled(offer.age_label.clone(), Style::default().fg(Color::Cyan)),
            Span::raw(" after: "),
            Span::styled(offer.error.clone(), Style::default().fg(Color::Yellow)),
        ]),
    ];
    if offer.remote_is_newer() {
        lines.push(Line::from(Span::styled(
            "The saved chapter changed after this backup was taken.",
            Style::default().fg(Color::Yellow),
        )));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        offer.preview.clone(),
        Style::default().fg(Color::Gray),
    )));
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "r restore · d discard · Esc keep for later",
        Style::default().fg(Color::DarkGray),
    )));

    let paragraph = Paragraph::new(lines).wrap(Wrap { trim: true }).block(
        Block::default()
            .title("Recover unsaved work")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)),
    );
    frame.render_widget(paragraph, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ChapterStatus, DocumentId, DocumentMetadata};
    use time::macros::datetime;

    fn doc(title: &str) -> Document {
        Document::from_metadata(&DocumentMetadata {
            id: DocumentId::from(title.to_lowercase().as_str()),
            title: title.to_string(),
            status: ChapterStatus::Draft,
            word_count: 0,
            estimated_reading_time: 0,
            last_modified: datetime!(2024-06-01 00:00 UTC),
        })
    }

    #[test]
    fn tab_labels_show_shortcut_and_badge() {
        insta::assert_snapshot!(tab_label(0, &doc("Opening"), TabBadge::Unsaved), @"1 Opening ●");
        assert_eq!(tab_label(9, &doc("Tenth"), TabBadge::Clean), "Tenth");
        let loading = Document::placeholder(DocumentId::from("x"));
        assert_eq!(tab_label(1, &loading, TabBadge::Clean), "2 Loading…");
    }

    #[test]
    fn compact_label_shows_position() {
        insta::assert_snapshot!(
            compact_label(2, 12, &doc("Storm"), TabBadge::Failed),
            @"‹ 3/12 Storm ! ›"
        );
    }

    #[test]
    fn strip_goes_compact_above_threshold_or_when_narrow() {
        let labels: Vec<String> = (0..3).map(|n| format!("{n} Chapter")).collect();
        assert!(!use_compact_strip(&labels, 80, 8));
        assert!(use_compact_strip(&labels, 20, 8));
        assert!(use_compact_strip(&labels, 200, 2));
    }
}
