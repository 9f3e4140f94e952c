//! UI rendering for the TUI.

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Gauge, List, ListItem, Paragraph, Row, Table, TableState},
};

use crate::core::models::format_bytes;
use crate::core::{ArchiveType, JobDetail, PresentationHint, ServerRunState};

use super::app::{Mode, TuiApp};

/// Main render function.
pub fn render(frame: &mut Frame, app: &TuiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),  // Header
            Constraint::Min(6),     // Job table
            Constraint::Length(12), // Detail
            Constraint::Length(3),  // Footer/help
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);
    render_jobs(frame, app, chunks[1]);
    render_detail(frame, app, chunks[2]);
    render_footer(frame, app, chunks[3]);

    match &app.mode {
        Mode::Normal => {}
        Mode::StartMenu { selected } => render_start_menu(frame, *selected),
        Mode::Password { input, .. } => {
            render_prompt(frame, "Crypt password", &"*".repeat(input.chars().count()))
        }
        Mode::ConfirmAbort => render_prompt(frame, "Abort running job?", "[y] Yes  [Esc] No"),
        Mode::Pause { input } => render_prompt(frame, "Pause for seconds", input),
        Mode::Volume { input } => render_prompt(frame, "Load volume number", input),
        Mode::Schedules { selected } => render_schedules(frame, app, *selected),
    }
}

fn hint_style(hint: PresentationHint) -> Style {
    match hint {
        PresentationHint::Active => Style::default().fg(Color::Green),
        PresentationHint::NeedsAttention => Style::default().fg(Color::Yellow),
        PresentationHint::Error => Style::default().fg(Color::Red),
        PresentationHint::Aborted => Style::default().fg(Color::Magenta),
        PresentationHint::Neutral => Style::default(),
    }
}

fn render_header(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let run_state = app.engine.current_server_run_state();
    let state_style = match run_state {
        ServerRunState::Running => Style::default().fg(Color::Green),
        ServerRunState::Paused { .. } => Style::default().fg(Color::Yellow),
        ServerRunState::Suspended => Style::default().fg(Color::Red),
    };

    let mut spans = vec![
        Span::raw(format!("  {}  ", app.server)),
        Span::styled(run_state.label(), state_style),
        Span::raw(format!("  sort: {}", app.engine.sort_key())),
    ];
    if let Some(fatal) = app.engine.fatal_error() {
        spans.push(Span::styled(
            format!("  disconnected: {}", fatal),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ));
    }

    let block = Block::default()
        .title("barctl")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

fn render_jobs(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let block = Block::default()
        .title("Jobs")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    if app.engine.rows().is_empty() {
        let text = Paragraph::new("  No jobs")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(text, area);
        return;
    }

    let run_state = app.engine.current_server_run_state();
    let rows: Vec<Row> = app
        .engine
        .rows()
        .iter()
        .map(|row| {
            let job = &row.snapshot;
            Row::new(vec![
                Cell::from(job.name.clone()),
                Cell::from(job.display_state(run_state)),
                Cell::from(job.archive_type.as_str()),
                Cell::from(job.part_size_text()),
                Cell::from(job.compression_text()),
                Cell::from(job.crypt_text()),
                Cell::from(job.last_executed_text()),
                Cell::from(job.estimated_text()),
            ])
            .style(hint_style(row.hint))
        })
        .collect();

    let header = Row::new(vec![
        "Name", "State", "Type", "Part size", "Compress", "Crypt", "Last run", "Remaining",
    ])
    .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));

    let widths = [
        Constraint::Min(12),
        Constraint::Length(18),
        Constraint::Length(12),
        Constraint::Length(10),
        Constraint::Length(14),
        Constraint::Length(10),
        Constraint::Length(17),
        Constraint::Length(10),
    ];

    let table = Table::new(rows, widths)
        .header(header)
        .block(block)
        .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    let mut state = TableState::default().with_selected(Some(app.selected));
    frame.render_stateful_widget(table, area, &mut state);
}

fn render_detail(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let title = match app.selected_job() {
        Some(job) => format!("Job '{}'", job.name),
        None => "Job".to_string(),
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let Some(detail) = app.engine.selected_detail() else {
        let text = Paragraph::new("  Nothing selected")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(text, area);
        return;
    };

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Counters
            Constraint::Length(1), // Rates
            Constraint::Length(1), // Entries
            Constraint::Length(1), // Bytes
            Constraint::Length(1), // Current entry
            Constraint::Length(1), // Storage
            Constraint::Length(1), // Volume
            Constraint::Min(0),    // Message
        ])
        .split(inner);

    frame.render_widget(Paragraph::new(counters_line(&detail)), chunks[0]);
    frame.render_widget(Paragraph::new(rates_line(&detail)), chunks[1]);

    let totals = if detail.collecting_totals { " (counting)" } else { "" };
    render_gauge(
        frame,
        chunks[2],
        detail.entries_progress(),
        format!(
            "entries {}/{}{}",
            detail.done_count, detail.total_entry_count, totals
        ),
    );
    render_gauge(
        frame,
        chunks[3],
        detail.bytes_progress(),
        format!(
            "bytes {}/{}{}",
            format_bytes(detail.done_size),
            format_bytes(detail.total_entry_size),
            totals
        ),
    );
    render_gauge(
        frame,
        chunks[4],
        detail.entry_progress(),
        shorten(&detail.entry_name, 60),
    );
    render_gauge(
        frame,
        chunks[5],
        detail.storage_progress(),
        shorten(&detail.storage_name, 60),
    );
    let volume = if detail.requested_volume_number > 0 {
        format!(
            "volume {} (requested {})",
            detail.volume_number, detail.requested_volume_number
        )
    } else {
        format!("volume {}", detail.volume_number)
    };
    render_gauge(frame, chunks[6], detail.volume_progress, volume);

    if !detail.message.is_empty() {
        let message = Paragraph::new(detail.message.clone()).style(Style::default().fg(Color::Yellow));
        frame.render_widget(message, chunks[7]);
    }
}

fn counters_line(detail: &JobDetail) -> Line<'static> {
    Line::from(vec![
        Span::styled(" done ", Style::default().fg(Color::Cyan)),
        Span::raw(format!("{} ({})", detail.done_count, format_bytes(detail.done_size))),
        Span::styled("  skipped ", Style::default().fg(Color::Cyan)),
        Span::raw(format!(
            "{} ({})",
            detail.skipped_entry_count,
            format_bytes(detail.skipped_entry_size)
        )),
        Span::styled("  errors ", Style::default().fg(Color::Cyan)),
        Span::styled(
            format!(
                "{} ({})",
                detail.error_entry_count,
                format_bytes(detail.error_entry_size)
            ),
            if detail.error_entry_count > 0 {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            },
        ),
    ])
}

fn rates_line(detail: &JobDetail) -> Line<'static> {
    Line::from(vec![
        Span::styled(" rate ", Style::default().fg(Color::Cyan)),
        Span::raw(format!(
            "{:.1} entries/s  {}/s  storage {}/s",
            detail.entries_per_second,
            format_bytes(detail.bytes_per_second as u64),
            format_bytes(detail.storage_bytes_per_second as u64)
        )),
        Span::styled("  archive ", Style::default().fg(Color::Cyan)),
        Span::raw(format_bytes(detail.archive_size)),
        Span::styled("  ratio ", Style::default().fg(Color::Cyan)),
        Span::raw(detail.compression_text()),
    ])
}

fn render_gauge(frame: &mut Frame, area: Rect, percent: f64, label: String) {
    let ratio = if percent.is_finite() {
        (percent / 100.0).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
        .ratio(ratio)
        .label(label);
    frame.render_widget(gauge, area);
}

fn shorten(text: &str, width: usize) -> String {
    let count = text.chars().count();
    if count <= width {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - (width - 3)).collect();
    format!("...{}", tail)
}

fn render_footer(frame: &mut Frame, app: &TuiApp, area: Rect) {
    let help_text = match &app.mode {
        Mode::Normal => {
            let toggle = app.engine.current_server_run_state().toggle_label();
            format!(
                "[↑↓] Select  [s] Start  [a] Abort  [p] Pause  [t] {}  [R] Reset  [v/u] Volume  [c] Schedules  [o] Sort  [q] Quit",
                toggle
            )
        }
        Mode::ConfirmAbort => "[y] Abort  [Esc] Cancel".to_string(),
        _ => "[Enter] Confirm  [Esc] Cancel".to_string(),
    };

    let mut spans = vec![Span::raw(format!("  {}", help_text))];

    if let Some(error) = &app.error {
        spans.push(Span::styled(
            format!("  Error: {}", error),
            Style::default().fg(Color::Red),
        ));
    } else if let Some(status) = &app.status {
        spans.push(Span::styled(
            format!("  {}", status),
            Style::default().fg(Color::Green),
        ));
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let paragraph = Paragraph::new(Line::from(spans)).block(block);
    frame.render_widget(paragraph, area);
}

fn popup_area(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn render_prompt(frame: &mut Frame, title: &str, text: &str) {
    let area = popup_area(frame.area(), 44, 3);
    let block = Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));
    frame.render_widget(Clear, area);
    frame.render_widget(Paragraph::new(format!(" {}", text)).block(block), area);
}

fn render_menu(frame: &mut Frame, title: &str, items: Vec<String>, selected: usize) {
    let height = items.len() as u16 + 2;
    let area = popup_area(frame.area(), 44, height);
    let items: Vec<ListItem> = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let style = if i == selected {
                Style::default()
                    .bg(Color::DarkGray)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {}", item)).style(style)
        })
        .collect();

    let block = Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));
    frame.render_widget(Clear, area);
    frame.render_widget(List::new(items).block(block), area);
}

fn render_start_menu(frame: &mut Frame, selected: usize) {
    let items = ArchiveType::ALL
        .iter()
        .map(|t| t.as_str().to_string())
        .collect();
    render_menu(frame, "Start as", items, selected);
}

fn render_schedules(frame: &mut Frame, app: &TuiApp, selected: usize) {
    let items = app.schedules().iter().map(|s| s.to_string()).collect();
    render_menu(frame, "Trigger schedule", items, selected);
}
