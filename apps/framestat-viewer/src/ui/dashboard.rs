//! Main stats dashboard UI.

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
    Frame,
};

use framestat::StatKind;

use crate::client::ConnectionState;
use crate::model::{StatRow, StatsModel};

/// Where the frames come from.
#[derive(Debug, Clone)]
pub enum Source {
    Live {
        host: String,
        port: u16,
        state: ConnectionState,
        error: Option<String>,
    },
    Replay {
        path: String,
        position: usize,
        total: usize,
        playing: bool,
    },
}

/// Dashboard rendering.
pub struct Dashboard;

impl Dashboard {
    /// Render the dashboard.
    pub fn render(frame: &mut Frame, source: &Source, model: &StatsModel) {
        let area = frame.area();

        let sections = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),      // Header
                Constraint::Length(3),      // Frame info
                Constraint::Percentage(55), // Cycle stats
                Constraint::Min(6),         // Value stats
                Constraint::Length(3),      // Footer
            ])
            .split(area);

        Self::render_header(frame, sections[0], source, model);
        Self::render_frame_info(frame, sections[1], model);
        Self::render_cycle_table(frame, sections[2], &model.cycle_rows());
        Self::render_value_table(frame, sections[3], &model.value_rows());
        Self::render_footer(frame, sections[4], source);
    }

    fn render_header(frame: &mut Frame, area: Rect, source: &Source, model: &StatsModel) {
        let mut spans = vec![
            Span::styled(
                " framestat ",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw("| "),
        ];

        match source {
            Source::Live {
                host,
                port,
                state,
                error,
            } => {
                let (status_text, status_color) = match state {
                    ConnectionState::Connected => ("Connected", Color::Green),
                    ConnectionState::Connecting => ("Connecting...", Color::Yellow),
                    ConnectionState::Disconnected => ("Disconnected", Color::Red),
                };
                spans.push(Span::styled(
                    format!("{host}:{port}"),
                    Style::default().fg(Color::White),
                ));
                spans.push(Span::raw(" | "));
                spans.push(Span::styled(status_text, Style::default().fg(status_color)));
                if let Some(error) = error {
                    spans.push(Span::styled(
                        format!(" ({error})"),
                        Style::default().fg(Color::DarkGray),
                    ));
                }
            }
            Source::Replay {
                path,
                position,
                total,
                playing,
            } => {
                spans.push(Span::styled(path.clone(), Style::default().fg(Color::White)));
                spans.push(Span::raw(" | "));
                spans.push(Span::styled(
                    format!("{}/{}", position + 1, total),
                    Style::default().fg(Color::Magenta),
                ));
                spans.push(Span::raw(if *playing { " playing" } else { " paused" }));
            }
        }

        spans.push(Span::raw(" | Frame: "));
        spans.push(Span::styled(
            model
                .frame()
                .map_or_else(|| "-".to_string(), |frame| frame.to_string()),
            Style::default().fg(Color::Yellow),
        ));

        let header = Paragraph::new(Line::from(spans)).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        );

        frame.render_widget(header, area);
    }

    fn render_frame_info(frame: &mut Frame, area: Rect, model: &StatsModel) {
        let (recent, average) = model.frame_time_ms();
        let fps = if average > 0.0 { 1000.0 / average } else { 0.0 };

        let fps_color = if fps >= 60.0 {
            Color::Green
        } else if fps >= 30.0 {
            Color::Yellow
        } else {
            Color::Red
        };

        let info = Line::from(vec![
            Span::raw(" FPS: "),
            Span::styled(
                format!("{fps:.1}"),
                Style::default().fg(fps_color).add_modifier(Modifier::BOLD),
            ),
            Span::raw(" | Frame: "),
            Span::styled(format!("{recent:.2}ms"), Style::default().fg(Color::White)),
            Span::raw(" (avg "),
            Span::styled(format!("{average:.2}ms"), Style::default().fg(Color::Blue)),
            Span::raw(") | Threads: "),
            Span::styled(
                model.thread_count().to_string(),
                Style::default().fg(Color::Cyan),
            ),
        ]);

        let widget = Paragraph::new(info).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Frame Timing ")
                .border_style(Style::default().fg(Color::Blue)),
        );

        frame.render_widget(widget, area);
    }

    fn header_row(titles: &[&'static str]) -> Row<'static> {
        let cells = titles
            .iter()
            .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow)));
        Row::new(cells)
            .style(Style::default().add_modifier(Modifier::BOLD))
            .height(1)
    }

    fn render_cycle_table(frame: &mut Frame, area: Rect, rows: &[StatRow]) {
        let header = Self::header_row(&["Stat", "Group", "Calls", "Last", "Avg", "Max"]);

        let rows: Vec<Row> = rows
            .iter()
            .map(|row| {
                Row::new(vec![
                    Cell::from(row.name.clone()).style(Style::default().fg(Color::Green)),
                    Cell::from(row.group.clone()),
                    Cell::from(row.calls.to_string()),
                    Cell::from(format!("{:.2}ms", row.recent)),
                    Cell::from(format!("{:.2}ms", row.average)),
                    Cell::from(format!("{:.2}ms", row.peak)),
                ])
            })
            .collect();

        let widths = [
            Constraint::Min(20),
            Constraint::Length(14),
            Constraint::Length(8),
            Constraint::Length(10),
            Constraint::Length(10),
            Constraint::Length(10),
        ];

        let table = Table::new(rows, widths).header(header).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Cycle Stats ")
                .border_style(Style::default().fg(Color::Green)),
        );

        frame.render_widget(table, area);
    }

    fn format_value(row: &StatRow, value: f64) -> String {
        match row.kind {
            StatKind::MemoryCounter => format!("{:.1}KB", value / 1024.0),
            kind if kind.is_float() => format!("{value:.2}"),
            _ => format!("{value:.0}"),
        }
    }

    fn render_value_table(frame: &mut Frame, area: Rect, rows: &[StatRow]) {
        let header = Self::header_row(&["Stat", "Group", "Last", "Avg", "Max"]);

        let rows: Vec<Row> = rows
            .iter()
            .map(|row| {
                let color = if row.kind == StatKind::MemoryCounter {
                    Color::Magenta
                } else {
                    Color::White
                };
                Row::new(vec![
                    Cell::from(row.name.clone()).style(Style::default().fg(color)),
                    Cell::from(row.group.clone()),
                    Cell::from(Self::format_value(row, row.recent)),
                    Cell::from(Self::format_value(row, row.average)),
                    Cell::from(Self::format_value(row, row.peak)),
                ])
            })
            .collect();

        let widths = [
            Constraint::Min(20),
            Constraint::Length(14),
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Length(12),
        ];

        let table = Table::new(rows, widths).header(header).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Counters ")
                .border_style(Style::default().fg(Color::Yellow)),
        );

        frame.render_widget(table, area);
    }

    fn render_footer(frame: &mut Frame, area: Rect, source: &Source) {
        let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));
        let mut spans = vec![key(" [Q] "), Span::raw("Quit"), Span::raw("  ")];
        match source {
            Source::Live { .. } => {
                spans.extend([key("[C] "), Span::raw("Reconnect")]);
            }
            Source::Replay { .. } => {
                spans.extend([
                    key("[Space] "),
                    Span::raw("Play/Pause"),
                    Span::raw("  "),
                    key("[←/→] "),
                    Span::raw("Step"),
                    Span::raw("  "),
                    key("[Home] "),
                    Span::raw("Rewind"),
                ]);
            }
        }

        let footer = Paragraph::new(Line::from(spans)).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray)),
        );

        frame.render_widget(footer, area);
    }
}
