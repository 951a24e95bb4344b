//! UI rendering with ratatui.
//!
//! Layout, top to bottom: header bar, chat column (messages, tool line,
//! input), usage bar, status bar.

use assist_stream_core::{Author, Message, Phase, SessionView};
use chrono::Local;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style, Stylize};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, Borders, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap,
};
use ratatui::Frame;

use crate::app::App;

/// Horizontal padding for chat content.
const CHAT_PADDING: u16 = 2;

/// Render the UI.
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();
    let view = app.client.view();

    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header bar
            Constraint::Min(5),    // Chat column
            Constraint::Length(1), // Usage bar
            Constraint::Length(1), // Status bar
        ])
        .split(area);

    render_header_bar(frame, app, main_layout[0]);
    render_chat_column(frame, app, &view, main_layout[1]);
    render_usage_bar(frame, &view, main_layout[2]);
    render_status_bar(frame, app, main_layout[3]);
}

/// Truncate a string in the middle with ellipsis if it exceeds `max_len` chars.
fn truncate_middle(s: &str, max_len: usize) -> String {
    let len = s.chars().count();
    if len <= max_len {
        return s.to_string();
    }
    if max_len < 5 {
        return s.chars().take(max_len).collect();
    }
    let keep = (max_len - 3) / 2;
    let start: String = s.chars().take(keep).collect();
    let end: String = s.chars().skip(len - keep).collect();
    format!("{start}...{end}")
}

fn to_u16(value: usize) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

/// Column for a cursor `offset` cells into `area`, kept inside the area.
fn cursor_x(area: Rect, offset: usize) -> u16 {
    area.x
        .saturating_add(to_u16(offset))
        .min(area.right().saturating_sub(1))
}

/// Render the header bar with the endpoint and connection phase.
fn render_header_bar(frame: &mut Frame, app: &App, area: Rect) {
    let phase = app.client.phase();
    let status_style = match phase {
        Phase::Open => Style::default().fg(Color::Green),
        Phase::Connecting => Style::default().fg(Color::Yellow),
        Phase::Closed => Style::default().fg(Color::Red),
    };
    let status_text = phase.as_str();

    let title = "ASSIST";
    let max_url_width = (area.width as usize / 2).saturating_sub(15);
    let display_url = truncate_middle(app.client.endpoint(), max_url_width);

    let right_len = display_url.chars().count() + status_text.len() + 3;
    let gap = (area.width as usize).saturating_sub(title.len() + right_len);

    let line = Line::from(vec![
        Span::styled(title, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(" ".repeat(gap)),
        Span::raw(display_url),
        Span::raw(" ["),
        Span::styled(status_text, status_style),
        Span::raw("]"),
    ]);

    let header = Paragraph::new(line).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

/// Render the chat column: messages, active tool call and input line.
fn render_chat_column(frame: &mut Frame, app: &App, view: &SessionView<'_>, area: Rect) {
    let block = Block::default()
        .title(" Chat ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let inner_area = block.inner(area);
    frame.render_widget(block, area);

    let inner_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(1),    // Chat messages
            Constraint::Length(1), // Tool line
            Constraint::Length(1), // Separator line
            Constraint::Length(1), // Input line
        ])
        .split(inner_area);

    let chat_area_full = inner_layout[0];
    let chat_area = Rect::new(
        chat_area_full.x + CHAT_PADDING,
        chat_area_full.y,
        chat_area_full.width.saturating_sub(CHAT_PADDING * 2 + 1), // +1 for scrollbar
        chat_area_full.height,
    );

    if view.messages.is_empty() && !view.typing {
        let help = if app.client.is_connected() {
            "Type a message and press Enter to send"
        } else {
            "Waiting for the connection..."
        };
        let text = Paragraph::new(help)
            .style(Style::default().fg(Color::DarkGray))
            .wrap(Wrap { trim: true });
        frame.render_widget(text, chat_area);
    } else {
        render_messages(frame, app, view, chat_area, chat_area_full);
    }

    render_tool_line(frame, view, inner_layout[1]);
    render_input_line(frame, app, inner_layout[2], inner_layout[3]);
}

fn message_lines<'a>(msg: &'a Message, lines: &mut Vec<Line<'a>>) {
    if msg.tool_call().is_some() {
        lines.push(Line::from(vec![
            Span::styled("🔧 ", Style::default().fg(Color::Magenta)),
            Span::styled(msg.content(), Style::default().fg(Color::Magenta)),
        ]));
        lines.push(Line::from(""));
        return;
    }

    let time = msg.created_at().with_timezone(&Local).format("%H:%M").to_string();
    let time = Span::styled(format!(" {time}"), Style::default().fg(Color::DarkGray));

    match msg.author() {
        Author::User => {
            lines.push(Line::from(vec![
                Span::styled("[You]", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
                time,
            ]));
            lines.extend(
                msg.content()
                    .lines()
                    .map(|l| Line::from(Span::styled(l, Style::default().fg(Color::White)))),
            );
        }
        Author::Assistant => {
            let style = if msg.is_error() {
                Style::default().fg(Color::Red)
            } else {
                Style::default().fg(Color::White)
            };
            lines.push(Line::from(vec![
                Span::styled("[Assistant]", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
                time,
            ]));
            lines.extend(msg.content().lines().map(|l| Line::from(Span::styled(l, style))));
        }
    }
    lines.push(Line::from(""));
}

fn render_messages(
    frame: &mut Frame,
    app: &App,
    view: &SessionView<'_>,
    chat_area: Rect,
    chat_area_full: Rect,
) {
    let mut lines: Vec<Line> = Vec::new();
    for msg in view.messages {
        message_lines(msg, &mut lines);
    }

    if view.typing {
        lines.push(Line::from(vec![
            Span::styled(app.spinner_char(), Style::default().fg(Color::Yellow)),
            Span::styled(" typing...", Style::default().fg(Color::DarkGray)),
        ]));
    }

    let text = Text::from(lines);
    let visible_lines = chat_area.height as usize;
    let total_wrapped_lines = calculate_wrapped_line_count(&text, chat_area.width as usize);

    // chat_scroll counts lines up from the bottom; Paragraph scrolls from the top.
    let max_scroll = total_wrapped_lines.saturating_sub(visible_lines);
    let effective_scroll = app.chat_scroll.min(max_scroll);
    let scroll_offset = max_scroll.saturating_sub(effective_scroll);

    let paragraph = Paragraph::new(text)
        .wrap(Wrap { trim: true })
        .scroll((to_u16(scroll_offset), 0));
    frame.render_widget(paragraph, chat_area);

    if total_wrapped_lines > visible_lines {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("▲"))
            .end_symbol(Some("▼"));
        let mut scrollbar_state = ScrollbarState::new(total_wrapped_lines)
            .position(scroll_offset)
            .viewport_content_length(visible_lines);
        frame.render_stateful_widget(scrollbar, chat_area_full, &mut scrollbar_state);
    }
}

/// Render the tool call currently in flight, if any.
fn render_tool_line(frame: &mut Frame, view: &SessionView<'_>, area: Rect) {
    let Some(call) = view.current_tool_call else {
        return;
    };
    let line = Line::from(vec![
        Span::styled(" ⚙ running ", Style::default().fg(Color::Magenta).bold()),
        Span::styled(call.summary(), Style::default().fg(Color::Magenta)),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

/// Render the input line at the bottom of the chat column.
fn render_input_line(frame: &mut Frame, app: &App, separator_area: Rect, input_area: Rect) {
    let separator = Paragraph::new("─".repeat(separator_area.width as usize))
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(separator, separator_area);

    let prompt = "> ";
    let prompt_color = if app.client.is_connected() {
        Color::Cyan
    } else {
        Color::DarkGray
    };
    let input_line = Line::from(vec![
        Span::styled(prompt, Style::default().fg(prompt_color)),
        Span::styled(app.input.as_str(), Style::default().fg(Color::White)),
    ]);
    frame.render_widget(Paragraph::new(input_line), input_area);

    frame.set_cursor_position((
        cursor_x(input_area, prompt.len() + app.cursor_position),
        input_area.y,
    ));
}

/// Render token usage for the last turn and the conversation so far.
fn render_usage_bar(frame: &mut Frame, view: &SessionView<'_>, area: Rect) {
    let label = Style::default().fg(Color::Gray);
    let value = Style::default().fg(Color::White);

    let mut spans = vec![Span::styled(" Last turn: ", label)];
    match view.last_usage {
        Some(usage) => {
            spans.push(Span::styled(
                format!(
                    "{} in / {} out / {} thinking · ${:.4}",
                    usage.input_tokens, usage.output_tokens, usage.thinking_tokens, usage.cost
                ),
                value,
            ));
        }
        None => spans.push(Span::styled("-", label)),
    }

    let totals = view.totals;
    spans.push(Span::styled("   Session: ", label));
    spans.push(Span::styled(
        format!("{} tokens · ${:.4}", totals.total_tokens, totals.cost),
        value,
    ));

    let conversation = view.conversation_id.to_string();
    spans.push(Span::styled(
        format!("   #{}", conversation.get(..8).unwrap_or(&conversation)),
        Style::default().fg(Color::DarkGray),
    ));

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Render the status bar.
fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let status = if let Some(ref error) = app.error_message {
        Line::from(vec![
            Span::styled(" ERROR: ", Style::default().fg(Color::Red).bold()),
            Span::styled(error, Style::default().fg(Color::Red)),
        ])
    } else if let Some(ref status) = app.status_message {
        Line::from(Span::styled(format!(" {status}"), Style::default().fg(Color::Green)))
    } else {
        Line::from(vec![
            Span::raw(" "),
            Span::styled("Enter", Style::default().fg(Color::Yellow)),
            Span::raw(":send "),
            Span::styled("Ctrl+N", Style::default().fg(Color::Yellow)),
            Span::raw(":new chat "),
            Span::styled("Ctrl+R", Style::default().fg(Color::Yellow)),
            Span::raw(":reconnect "),
            Span::styled("PgUp/PgDn", Style::default().fg(Color::Yellow)),
            Span::raw(":scroll "),
            Span::styled("Esc", Style::default().fg(Color::Yellow)),
            Span::raw(":quit"),
        ])
    };

    let status_bar = Paragraph::new(status).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(status_bar, area);
}

/// Calculate the number of visual lines after text wrapping.
fn calculate_wrapped_line_count(text: &Text, available_width: usize) -> usize {
    if available_width == 0 {
        return text.lines.len();
    }

    text.lines
        .iter()
        .map(|line| match line.width() {
            0 => 1,
            width => width.div_ceil(available_width),
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assist_stream_core::{ChatClient, ClientConfig};
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    fn screen(app: &App) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 20)).unwrap();
        terminal.draw(|f| render(f, app)).unwrap();
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn truncate_middle_keeps_both_ends() {
        assert_eq!(truncate_middle("short", 10), "short");
        assert_eq!(truncate_middle("wss://assistant.example.com/ws", 11), "wss:...m/ws");
        assert_eq!(truncate_middle("abcdef", 3), "abc");
    }

    #[test]
    fn wrapped_line_count_rounds_up() {
        let text = Text::from(vec![Line::from("a".repeat(25)), Line::from("")]);
        assert_eq!(calculate_wrapped_line_count(&text, 10), 4);
        assert_eq!(calculate_wrapped_line_count(&text, 0), 2);
    }

    #[test]
    fn cursor_stays_inside_input_area() {
        let area = Rect::new(2, 5, 20, 1);
        assert_eq!(cursor_x(area, 0), 2);
        assert_eq!(cursor_x(area, 7), 9);
        assert_eq!(cursor_x(area, 19), 21);
        assert_eq!(cursor_x(area, 20), 21);
        assert_eq!(cursor_x(area, usize::MAX), 21);

        let edge = Rect::new(u16::MAX - 4, 0, 4, 1);
        assert_eq!(cursor_x(edge, 100_000), u16::MAX - 1);
    }

    #[test]
    fn long_input_keeps_cursor_on_screen() {
        let mut config = ClientConfig::new("ws://localhost:8000/ws/chat");
        config.greeting = None;
        let (client, _events) = ChatClient::new(config).unwrap();
        let mut app = App::new(client);
        for _ in 0..300 {
            app.insert_char('x');
        }

        let mut terminal = Terminal::new(TestBackend::new(100, 20)).unwrap();
        terminal.draw(|f| render(f, &app)).unwrap();
        let cursor = terminal.get_cursor_position().unwrap();
        assert!(cursor.x < 100);
    }

    #[test]
    fn renders_greeting_and_phase() {
        let config = ClientConfig::new("ws://localhost:8000/ws/chat");
        let (client, _events) = ChatClient::new(config).unwrap();
        let app = App::new(client);

        let screen = screen(&app);
        assert!(screen.contains("ASSIST"));
        assert!(screen.contains("disconnected"));
        assert!(screen.contains("[Assistant]"));
        assert!(screen.contains("Session: 0 tokens"));
    }
}
