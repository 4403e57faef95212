use crate::app::{App, AssistantTurn, Entry, InputMode};
use crate::markdown::render::CODE_VIEW_MAX_HEIGHT;
use crate::markdown::{StreamState, Widget};
use crate::ollama;
use ratatui::{
    prelude::*,
    text::{Line, Span},
    widgets::*,
};

fn dim() -> Style {
    Style::default().fg(Color::DarkGray)
}

fn push_code_view(
    lines: &mut Vec<Line<'static>>,
    view: &crate::markdown::CodeView,
    focused: bool,
) {
    let label = if view.language().is_empty() {
        "code".to_string()
    } else {
        view.language().to_string()
    };
    let header_style = if focused {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    } else {
        dim()
    };
    lines.push(Line::styled(format!("┌─ {label} "), header_style));
    lines.extend(view.visible_lines().iter().cloned());
    if view.line_count() > CODE_VIEW_MAX_HEIGHT {
        let first = view.scroll() + 1;
        let last = view.scroll() + view.height();
        lines.push(Line::styled(
            format!("└─ lines {first}-{last} of {} (Tab, J/K to scroll)", view.line_count()),
            header_style,
        ));
    } else {
        lines.push(Line::styled("└─", header_style));
    }
}

fn push_assistant(
    lines: &mut Vec<Line<'static>>,
    turn: &AssistantTurn,
    show_stats: bool,
    code_index: &mut usize,
    focused_code: Option<usize>,
) {
    let session = turn.session.borrow();
    let streaming = session.state() != StreamState::Finalized;
    let prefix = if streaming {
        format!("{}: …", turn.model)
    } else {
        format!("{}: ", turn.model)
    };
    lines.push(Line::styled(
        prefix,
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    ));

    if turn.show_thinking && !turn.thinking.is_empty() {
        let marker = if turn.thinking_expanded { "▾" } else { "▸" };
        lines.push(Line::styled(format!("{marker} Thinking (t)"), dim()));
        if turn.thinking_expanded {
            let style = dim().add_modifier(Modifier::ITALIC);
            lines.extend(
                turn.thinking
                    .lines()
                    .map(|l| Line::styled(format!("  {l}"), style)),
            );
        }
    }

    for widget in session.view().widgets() {
        match widget {
            Widget::Text(node) => lines.extend(node.lines().iter().cloned()),
            Widget::Code(view) => {
                push_code_view(lines, view, focused_code == Some(*code_index));
                *code_index += 1;
            }
        }
    }

    if show_stats {
        if let Some(stats) = &turn.stats {
            lines.push(Line::styled(stats.summary(), dim()));
        }
    }
    if !turn.logprobs.is_empty() {
        lines.extend(turn.logprobs.lines().map(|l| Line::styled(l.to_string(), dim())));
    }
}

/// Every line of the conversation, top to bottom.
pub fn conversation_lines(app: &App) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = Vec::new();
    let mut code_index = 0;
    for entry in &app.entries {
        match entry {
            Entry::User(turn) => {
                lines.push(Line::styled(
                    "You: ",
                    Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
                ));
                lines.extend(turn.lines.iter().cloned());
            }
            Entry::Assistant(turn) => push_assistant(
                &mut lines,
                turn,
                app.settings.show_stats,
                &mut code_index,
                app.focused_code,
            ),
            Entry::System(message) => {
                let style = Style::default().fg(Color::Red).add_modifier(Modifier::BOLD);
                lines.push(Line::styled("Error: ", style));
                lines.extend(message.lines().map(|l| Line::styled(l.to_string(), style)));
            }
        }
        lines.push(Line::from(""));
    }
    lines
}

/// Rows `lines` occupy once word-wrapped to `width` columns, as the conversation paragraph draws them.
fn wrapped_height(lines: &[Line<'static>], width: u16) -> usize {
    Paragraph::new(lines.to_vec())
        .wrap(Wrap { trim: false })
        .line_count(width.max(1))
}

// --- UI Drawing Logic ---
pub fn draw(f: &mut Frame, app: &App) {
    // Main layout: Models List | Right Pane
    let main_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25), Constraint::Percentage(75)].as_ref())
        .split(f.size());

    // --- Left side: Models List ---
    let model_items: Vec<ListItem> = app
        .models
        .iter()
        .map(|m| ListItem::new(m.as_str()))
        .collect();

    let models_list = List::new(model_items)
        .block(Block::default().borders(Borders::ALL).title(" Models (j/k) "))
        .highlight_style(
            Style::default()
                .add_modifier(Modifier::BOLD)
                .bg(Color::Blue),
        )
        .highlight_symbol("> ");

    let mut list_state = ListState::default();
    list_state.select(app.selected_model_index);

    f.render_stateful_widget(models_list, main_chunks[0], &mut list_state);

    // --- Right side: Conversation, Input, Status ---
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Min(1),
                Constraint::Length(7),
                Constraint::Length(1),
            ]
            .as_ref(),
        )
        .split(main_chunks[1]);

    // --- Conversation Area ---
    let conversation_area = right_chunks[0];
    let conversation_content = conversation_lines(app);
    let inner_width = conversation_area.width.saturating_sub(2);
    let inner_height = usize::from(conversation_area.height.saturating_sub(2));
    let total = wrapped_height(&conversation_content, inner_width);
    let bottom = total.saturating_sub(inner_height);
    let offset = bottom.saturating_sub(usize::from(app.scroll_from_bottom));
    let offset = u16::try_from(offset).unwrap_or(u16::MAX);

    let title = format!(" {} (PgUp/PgDn, n: new, h/l: history, d: delete) ", app.chat.title);
    let conversation_paragraph = Paragraph::new(conversation_content)
        .block(Block::default().borders(Borders::ALL).title(title))
        .wrap(Wrap { trim: false })
        .scroll((offset, 0));

    f.render_widget(conversation_paragraph, conversation_area);

    // --- Input Area ---
    let input_title = match app.input_mode {
        InputMode::Editing => " Input (Enter: Newline, Ctrl+S: Send, Esc: Cancel) ",
        InputMode::Normal => " Input (Press Enter to type) ",
    };
    let input_block_style = match app.input_mode {
        InputMode::Editing => Style::default().fg(Color::Yellow),
        InputMode::Normal => Style::default(),
    };
    let input_block = Block::default()
        .borders(Borders::ALL)
        .title(input_title)
        .border_style(input_block_style);

    let input_paragraph = Paragraph::new(app.input_buffer.as_str())
        .block(input_block)
        .wrap(Wrap { trim: false });

    f.render_widget(input_paragraph, right_chunks[1]);

    if let InputMode::Editing = app.input_mode {
        let input_area = right_chunks[1];
        let buffer_char_count = app.input_buffer.chars().count();
        let input_width = input_area.width.saturating_sub(2).max(1);

        // Estimate row/col (doesn't handle wrapping at word boundaries)
        let estimated_row = buffer_char_count as u16 / input_width;
        let estimated_col = buffer_char_count as u16 % input_width;

        let cursor_x = input_area.x + 1 + estimated_col;
        let cursor_y = (input_area.y + 1 + estimated_row)
            .min(input_area.bottom().saturating_sub(1));

        let max_cursor_x = input_area.right().saturating_sub(1);
        f.set_cursor(cursor_x.min(max_cursor_x), cursor_y);
    }

    // --- Status Bar ---
    let status_style = if app.status_message.to_lowercase().contains("error") {
        Style::default().bg(Color::Red).fg(Color::White)
    } else if app.is_loading {
        Style::default().bg(Color::Yellow).fg(Color::Black)
    } else {
        Style::default().bg(Color::DarkGray).fg(Color::White)
    };

    let status = Line::from(vec![
        Span::raw(app.status_message.as_str()),
        Span::raw(format!("  [think: {} (m)]", ollama::think_label(app.think))),
    ]);
    f.render_widget(Paragraph::new(status).style(status_style), right_chunks[2]);
}
