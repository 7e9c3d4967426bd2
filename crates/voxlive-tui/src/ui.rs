use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph, Wrap};
use ratatui::Frame;
use voxlive_core::SessionState;

use crate::app::App;

const USER_LABEL: &str = "You";
const MODEL_LABEL: &str = "Gemini";

pub fn draw(frame: &mut Frame, app: &App) {
    let [header_area, conversation_area, stats_area, logs_area] = Layout::vertical([
        Constraint::Length(3),
        Constraint::Fill(1),
        Constraint::Length(1),
        Constraint::Length(8),
    ])
    .areas(frame.area());

    draw_header(frame, app, header_area);
    draw_conversation(frame, app, conversation_area);
    draw_stats(frame, app, stats_area);
    draw_logs(frame, app, logs_area);
}

pub fn status_label(state: &SessionState) -> String {
    match state {
        SessionState::Idle => "Idle".to_string(),
        SessionState::Connecting => "Connecting".to_string(),
        SessionState::Active => "Listening".to_string(),
        SessionState::Closing => "Closing".to_string(),
        SessionState::Closed => "Closed".to_string(),
        SessionState::Failed(reason) => format!("Failed: {reason}"),
    }
}

fn status_color(state: &SessionState) -> Color {
    match state {
        SessionState::Active => Color::Green,
        SessionState::Connecting | SessionState::Closing => Color::Yellow,
        SessionState::Failed(_) => Color::Red,
        SessionState::Idle | SessionState::Closed => Color::Gray,
    }
}

fn draw_header(frame: &mut Frame, app: &App, area: Rect) {
    let session = &app.state.session;
    let hints = if session.is_active() {
        "e=end  q=quit"
    } else if session.accepts_open() {
        "s=start  q=quit"
    } else {
        "q=quit"
    };
    let line = Line::from(vec![
        Span::raw("Status: "),
        Span::styled(
            status_label(session),
            Style::default()
                .fg(status_color(session))
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("   "),
        Span::styled(hints, Style::default().fg(Color::DarkGray)),
    ]);
    let para = Paragraph::new(line).block(Block::default().borders(Borders::ALL).title("voxlive"));
    frame.render_widget(para, area);
}

fn speaker_line(label: &str, text: &str, color: Color, partial: bool) -> Line<'static> {
    let mut text_style = Style::default();
    if partial {
        text_style = text_style.fg(Color::DarkGray).add_modifier(Modifier::ITALIC);
    }
    Line::from(vec![
        Span::styled(
            format!("{label}: "),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
        Span::styled(text.to_string(), text_style),
    ])
}

fn conversation_lines(app: &App) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for turn in &app.state.turns {
        if !turn.user.is_empty() {
            lines.push(speaker_line(USER_LABEL, &turn.user, Color::Cyan, false));
        }
        if !turn.model.is_empty() {
            lines.push(speaker_line(MODEL_LABEL, &turn.model, Color::Green, false));
        }
    }
    let pending = &app.state.pending;
    if !pending.user.is_empty() {
        lines.push(speaker_line(USER_LABEL, &pending.user, Color::Cyan, true));
    }
    if !pending.model.is_empty() {
        lines.push(speaker_line(MODEL_LABEL, &pending.model, Color::Green, true));
    }
    lines
}

fn draw_conversation(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Conversation");
    let lines = conversation_lines(app);
    if lines.is_empty() {
        let hint = if app.state.session.is_active() {
            "Listening... start speaking"
        } else {
            "Press s to start a session"
        };
        let para = Paragraph::new(Span::styled(hint, Style::default().fg(Color::DarkGray)))
            .block(block);
        frame.render_widget(para, area);
        return;
    }

    // Keep the newest lines in view.
    let visible = area.height.saturating_sub(2) as usize;
    let skip = lines.len().saturating_sub(visible);
    let para = Paragraph::new(lines.into_iter().skip(skip).collect::<Vec<_>>())
        .block(block)
        .wrap(Wrap { trim: false });
    frame.render_widget(para, area);
}

fn draw_stats(frame: &mut Frame, app: &App, area: Rect) {
    let stats = &app.state.stats;
    let text = format!(
        " sent {} chunks ({:.1} KiB) | received {} | dropped {} | interruptions {} | turns {} | queued {}",
        stats.chunks_sent,
        stats.bytes_sent as f64 / 1024.0,
        stats.audio_chunks_received,
        stats.malformed_dropped,
        stats.interruptions,
        stats.turns_completed,
        app.state.live_buffers,
    );
    frame.render_widget(
        Paragraph::new(text).style(Style::default().fg(Color::DarkGray)),
        area,
    );
}

fn draw_logs(frame: &mut Frame, app: &App, area: Rect) {
    let logs = match app.logs.lock() {
        Ok(logs) => logs,
        Err(poisoned) => poisoned.into_inner(),
    };
    let total = logs.len();

    let visible_height = area.height.saturating_sub(2) as usize;
    let scroll = app.log_scroll.min(total.saturating_sub(visible_height));
    let end = total.saturating_sub(scroll);
    let start = end.saturating_sub(visible_height);

    let items: Vec<ListItem> = logs
        .iter()
        .skip(start)
        .take(end - start)
        .map(|s| ListItem::new(s.as_str()))
        .collect();

    let title = if app.log_auto_scroll {
        "Logs (following)"
    } else {
        "Logs (Up/Down=scroll, G=follow)"
    };
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
    frame.render_widget(list, area);
}
