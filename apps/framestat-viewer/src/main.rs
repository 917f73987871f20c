//! Terminal viewer for framestat streams and captures.
//!
//! Connects to a running process's remote listener and displays the
//! per-frame stats, or replays a capture file frame by frame.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p framestat-viewer
//! cargo run -p framestat-viewer -- --host 127.0.0.1 --port 4242
//! cargo run -p framestat-viewer -- --file stats/framestat-1700000000-120.fstats
//! ```

mod client;
mod model;
mod ui;

use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;

use framestat::constants::STAT_HISTORY_SIZE;
use framestat::sink::{Capture, CaptureReader};

use client::{ConnectionState, StatsClient};
use model::StatsModel;
use ui::{Dashboard, Source};

/// Default host to connect to.
const DEFAULT_HOST: &str = "127.0.0.1";

/// Target refresh rate for the TUI.
const REFRESH_RATE: Duration = Duration::from_millis(16);

/// Reconnection attempt interval.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

/// Replay speed while playing.
const REPLAY_STEP: Duration = Duration::from_millis(33);

struct Args {
    host: String,
    port: u16,
    file: Option<PathBuf>,
    ns_per_cycle: f64,
}

fn main() -> anyhow::Result<()> {
    let args = parse_args();

    // Load before touching the terminal so errors print normally.
    let capture = args
        .file
        .as_deref()
        .map(CaptureReader::open)
        .transpose()?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = match (&capture, &args.file) {
        (Some(capture), Some(path)) => run_replay(&mut terminal, &args, path, capture),
        _ => run_live(&mut terminal, &args),
    };

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn parse_args() -> Args {
    let argv: Vec<String> = std::env::args().collect();
    let mut args = Args {
        host: DEFAULT_HOST.to_string(),
        port: framestat::DEFAULT_REMOTE_PORT,
        file: None,
        ns_per_cycle: 1.0,
    };

    let mut i = 1;
    while i < argv.len() {
        let value = argv.get(i + 1);
        match argv[i].as_str() {
            "--host" | "-h" => {
                if let Some(host) = value {
                    args.host.clone_from(host);
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if let Some(port) = value.and_then(|v| v.parse().ok()) {
                    args.port = port;
                }
                i += 1;
            }
            "--file" | "-f" => {
                if let Some(file) = value {
                    args.file = Some(PathBuf::from(file));
                    i += 1;
                }
            }
            "--ns-per-cycle" => {
                if let Some(ns) = value.and_then(|v| v.parse().ok()) {
                    args.ns_per_cycle = ns;
                }
                i += 1;
            }
            "--help" => {
                println!("framestat viewer");
                println!();
                println!("Usage: framestat-viewer [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --host <HOST>        Host to connect to (default: 127.0.0.1)");
                println!(
                    "  -p, --port <PORT>        Port to connect to (default: {})",
                    framestat::DEFAULT_REMOTE_PORT
                );
                println!("  -f, --file <PATH>        Replay a capture file instead");
                println!("      --ns-per-cycle <NS>  Cycle length of the source clock (default: 1)");
                println!("      --help               Show this help message");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    args
}

fn run_live(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, args: &Args) -> anyhow::Result<()> {
    let mut client = StatsClient::new(&args.host, args.port);
    let mut model = StatsModel::new(args.ns_per_cycle);

    let mut last_reconnect = Instant::now()
        .checked_sub(RECONNECT_INTERVAL)
        .unwrap_or_else(Instant::now);

    loop {
        if client.state() == ConnectionState::Disconnected
            && last_reconnect.elapsed() >= RECONNECT_INTERVAL
        {
            let _ = client.connect();
            last_reconnect = Instant::now();
        }

        client.poll(&mut model);

        let source = Source::Live {
            host: args.host.clone(),
            port: args.port,
            state: client.state(),
            error: client.last_error().map(str::to_owned),
        };
        terminal.draw(|frame| Dashboard::render(frame, &source, &model))?;

        if event::poll(REFRESH_RATE)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q' | 'Q') | KeyCode::Esc => {
                            client.disconnect();
                            return Ok(());
                        }
                        KeyCode::Char('c' | 'C') => {
                            client.disconnect();
                            let _ = client.connect();
                            last_reconnect = Instant::now();
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Model as it stood after frame `position`: replays the history window
/// ending there.
fn model_at(capture: &Capture, position: usize, ns_per_cycle: f64) -> StatsModel {
    let mut model = StatsModel::new(ns_per_cycle);
    model.apply_descriptions(&framestat::DescriptionBlock {
        groups: capture.groups.values().cloned().collect(),
        stats: capture.stats.values().cloned().collect(),
    });
    let start = (position + 1).saturating_sub(STAT_HISTORY_SIZE);
    for record in capture.frames.iter().take(position + 1).skip(start) {
        model.apply_frame(record);
    }
    model
}

fn run_replay(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    args: &Args,
    path: &std::path::Path,
    capture: &Capture,
) -> anyhow::Result<()> {
    let total = capture.frames.len();
    let last = total.saturating_sub(1);
    let mut position = 0;
    let mut playing = false;
    let mut model = model_at(capture, position, args.ns_per_cycle);
    let mut last_step = Instant::now();

    loop {
        if playing && last_step.elapsed() >= REPLAY_STEP {
            if position < last {
                position += 1;
                if let Some(record) = capture.frames.get(position) {
                    model.apply_frame(record);
                }
            } else {
                playing = false;
            }
            last_step = Instant::now();
        }

        let source = Source::Replay {
            path: path.display().to_string(),
            position,
            total,
            playing,
        };
        terminal.draw(|frame| Dashboard::render(frame, &source, &model))?;

        if event::poll(REFRESH_RATE)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let target = match key.code {
                        KeyCode::Char('q' | 'Q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Char(' ') => {
                            playing = !playing;
                            None
                        }
                        KeyCode::Right => Some((position + 1).min(last)),
                        KeyCode::Left => Some(position.saturating_sub(1)),
                        KeyCode::Home => Some(0),
                        KeyCode::End => Some(last),
                        _ => None,
                    };
                    if let Some(target) = target {
                        playing = false;
                        if target != position {
                            position = target;
                            model = model_at(capture, position, args.ns_per_cycle);
                        }
                    }
                }
            }
        }
    }
}
