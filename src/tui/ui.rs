use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};

use termtabs::orchestrator::{self, Location, TabPhase};

use super::app::App;
use super::widget::TerminalWidget;

/// Tab bar, terminal pane, status line.
fn split(area: Rect) -> [Rect; 3] {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(area);
    [chunks[0], chunks[1], chunks[2]]
}

/// The pane the session is rendered into, for a screen of `area`.
pub fn terminal_area(area: Rect) -> Rect {
    split(area)[1]
}

pub fn draw(frame: &mut Frame, app: &App) {
    let [tabs_area, terminal_area, status_area] = split(frame.area());

    draw_tab_bar(frame, app, tabs_area);

    let o = &app.orchestrator;
    let live = matches!(
        o.current_phase(),
        TabPhase::Streaming {
            connected: true,
            ..
        }
    );
    let viewport = o.viewport();
    frame.render_widget(
        TerminalWidget::new(viewport.screen())
            .show_cursor(viewport.is_focused() && !app.show_help)
            .dimmed(!live),
        terminal_area,
    );

    draw_status_line(frame, app, status_area);

    if app.show_help {
        draw_help_overlay(frame, app);
    }
}

fn draw_tab_bar(frame: &mut Frame, app: &App, area: Rect) {
    let o = &app.orchestrator;
    let mut spans = Vec::new();

    if let Some(state) = o.directory_state() {
        let current = o.current_tab().map(|t| t.id.as_str());
        for tab in &state.tabs {
            let style = if Some(tab.id.as_str()) == current {
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Cyan)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            let marker = if tab.is_connecting { " …" } else { "" };
            spans.push(Span::styled(format!(" {}{marker} ", tab.label), style));
            spans.push(Span::raw(" "));
        }
    }
    if spans.is_empty() {
        spans.push(Span::styled(
            " no tabs (Alt+T to open one) ",
            Style::default().fg(Color::DarkGray),
        ));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_status_line(frame: &mut Frame, app: &App, area: Rect) {
    let o = &app.orchestrator;
    let status = o.status();
    let mut spans = Vec::new();

    if let Some(modifier) = o.modifier() {
        let label = match modifier {
            orchestrator::Modifier::Ctrl => " CTRL ",
            orchestrator::Modifier::Cmd => " CMD ",
        };
        spans.push(Span::styled(
            label,
            Style::default().fg(Color::Black).bg(Color::Magenta),
        ));
        spans.push(Span::raw(" "));
    }

    match &status.connection_error {
        Some(message) if status.is_fatal_error => {
            spans.push(Span::styled(
                message.clone(),
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            ));
            spans.push(Span::styled(
                "  Alt+R to restart",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Some(message) => {
            spans.push(Span::styled(
                message.clone(),
                Style::default().fg(Color::Yellow),
            ));
        }
        None => {
            let location = match o.location() {
                Location::Directory(dir) => dir.as_str(),
                Location::NoContext | Location::NoDirectory => "",
            };
            spans.push(Span::styled(
                location.to_string(),
                Style::default().fg(Color::DarkGray),
            ));
            spans.push(Span::styled(
                "  Alt+H help",
                Style::default().fg(Color::DarkGray),
            ));
        }
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_help_overlay(frame: &mut Frame, app: &App) {
    let sections = app.keymap.help_entries();

    let mut lines: Vec<Line> = Vec::new();
    for (i, (category, entries)) in sections.iter().enumerate() {
        if i > 0 {
            lines.push(Line::from(""));
        }
        lines.push(Line::from(Span::styled(
            *category,
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )));
        for entry in entries {
            lines.push(Line::from(vec![
                Span::styled(
                    format!("{:<12}", entry.label),
                    Style::default().fg(Color::Yellow),
                ),
                Span::raw(entry.description),
            ]));
        }
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Press any key to close",
        Style::default().fg(Color::DarkGray),
    )));

    let area = frame.area();
    let width = 50u16.min(area.width.saturating_sub(4));
    let height = (lines.len() as u16 + 2).min(area.height.saturating_sub(2));
    let popup = Rect::new(
        area.x + area.width.saturating_sub(width) / 2,
        area.y + area.height.saturating_sub(height) / 2,
        width,
        height,
    );

    frame.render_widget(Clear, popup);
    let block = Block::default()
        .title(" Keys ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    frame.render_widget(Paragraph::new(lines).block(block), popup);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_pane_leaves_room_for_bars() {
        let pane = terminal_area(Rect::new(0, 0, 80, 24));
        assert_eq!(pane, Rect::new(0, 1, 80, 22));
    }
}
