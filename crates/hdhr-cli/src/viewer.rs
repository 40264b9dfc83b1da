use std::io;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use hdhr_core::{BoardEntry, DeviceBoard, DeviceSnapshot, Poller, TrayStatus};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Terminal;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

const ACTIVE_DOT: &str = "●";
const IDLE_DOT: &str = "○";

struct ViewerState {
    board: DeviceBoard,
    poller_stopped: bool,
}

impl ViewerState {
    fn new() -> Self {
        Self {
            board: DeviceBoard::new(),
            poller_stopped: false,
        }
    }
}

pub async fn run_viewer(poller: Poller) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(64);
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(poller.run(tx, shutdown.clone()));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut state = ViewerState::new();
    let mut command_buffer = String::new();

    let run_result = async {
        loop {
            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    match key.code {
                        KeyCode::Char('q') => break,
                        KeyCode::Char(c) => {
                            command_buffer.push(c.to_ascii_lowercase());
                            if command_buffer.len() > 8 {
                                let drain = command_buffer.len() - 8;
                                command_buffer.drain(0..drain);
                            }
                            if command_buffer.ends_with("exit") {
                                break;
                            }
                        }
                        KeyCode::Backspace => {
                            command_buffer.pop();
                        }
                        _ => {}
                    }
                }
            }

            loop {
                match rx.try_recv() {
                    Ok(event) => state.board.apply(&event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        state.poller_stopped = true;
                        break;
                    }
                }
            }

            terminal.draw(|frame| draw_ui(frame.size(), frame, &state))?;
            tokio::task::yield_now().await;
        }

        Ok::<(), anyhow::Error>(())
    }
    .await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    shutdown.cancel();
    drop(rx);
    task.await?;

    run_result
}

fn draw_ui(area: Rect, frame: &mut ratatui::Frame<'_>, state: &ViewerState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(0)])
        .split(area);

    frame.render_widget(render_header(state), rows[0]);

    let mut lines = Vec::new();
    for entry in state.board.entries() {
        lines.extend(device_lines(entry));
        lines.push(Line::from(" "));
    }
    if lines.is_empty() {
        lines.push(Line::from("Searching for devices..."));
    }

    let body = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Devices"));
    frame.render_widget(body, rows[1]);
}

fn render_header(state: &ViewerState) -> Paragraph<'static> {
    let summary = state.board.summary();
    let mut status = format!(
        "status={} devices={} active_tuners={} recordings={}",
        status_label(summary.status),
        summary.devices,
        summary.active_tuners,
        summary.recordings
    );
    if state.poller_stopped {
        status.push_str("  (poller stopped)");
    }

    let lines = vec![
        Line::from(vec![
            Span::styled(
                "HDHomeRun Tray  ",
                Style::default().fg(status_color(summary.status)).add_modifier(Modifier::BOLD),
            ),
            Span::raw(status),
        ]),
        Line::from(format!("{}  (press 'q' to quit)", summary.tooltip())),
    ];

    Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Status"))
}

fn device_lines(entry: &BoardEntry) -> Vec<Line<'static>> {
    let title = format!("{} {:?} {}", entry.device.id, entry.device.kind, entry.device.base_url);
    let mut lines = vec![Line::from(Span::styled(
        title,
        Style::default().add_modifier(Modifier::BOLD),
    ))];

    let Some(snapshot) = &entry.snapshot else {
        lines.push(Line::from("  waiting for first status..."));
        return lines;
    };

    let mut dots = vec![Span::raw("  tuners ")];
    dots.extend(tuner_dots(snapshot));
    lines.push(Line::from(dots));

    for recording in &snapshot.recordings {
        let name = if recording.name().is_empty() { "(unnamed)" } else { recording.name() };
        lines.push(Line::from(Span::styled(
            format!("  rec {name}"),
            Style::default().fg(Color::Red),
        )));
    }

    lines
}

pub(crate) fn tuner_dots(snapshot: &DeviceSnapshot) -> Vec<Span<'static>> {
    snapshot
        .tuners
        .iter()
        .map(|tuner| {
            if tuner.is_active() {
                Span::styled(format!("{ACTIVE_DOT} "), Style::default().fg(Color::Green))
            } else {
                Span::styled(format!("{IDLE_DOT} "), Style::default().fg(Color::DarkGray))
            }
        })
        .collect()
}

pub(crate) fn status_label(status: TrayStatus) -> &'static str {
    match status {
        TrayStatus::Idle => "idle",
        TrayStatus::Active => "active",
        TrayStatus::Recording => "recording",
    }
}

pub(crate) fn status_color(status: TrayStatus) -> Color {
    match status {
        TrayStatus::Idle => Color::Gray,
        TrayStatus::Active => Color::Green,
        TrayStatus::Recording => Color::Red,
    }
}
