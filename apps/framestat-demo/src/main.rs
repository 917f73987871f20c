//! framestat demo process
//!
//! Runs a fake frame loop with a few worker threads, all instrumented with
//! the framestat macros, and streams the result on the remote listener so
//! `framestat-viewer` can attach.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p framestat-demo -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--config <PATH>`: Stats config file (defaults when absent)
//! - `--capture <PATH>`: Write a capture file for the whole run
//! - `--frames <N>`: Exit after N frames (default: run until killed)
//! - `--workers <N>`: Worker threads (default: 2)
//! - `--stat <COMMAND>`: Run a `stat ...` console command at startup
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use framestat::sink::RemoteSinkFactory;
use framestat::{GroupId, MemoryRegion, StatId, StatManager, TracingOutput};
use tracing::info;
use tracing_subscriber::EnvFilter;

const STAT_SIMULATE: StatId = StatId(StatId::GAME_FIRST);
const STAT_PHYSICS: StatId = StatId(StatId::GAME_FIRST + 1);
const STAT_AI: StatId = StatId(StatId::GAME_FIRST + 2);
const STAT_WORKER_JOB: StatId = StatId(StatId::GAME_FIRST + 3);
const STAT_ENTITIES: StatId = StatId(StatId::GAME_FIRST + 4);
const STAT_JOBS: StatId = StatId(StatId::GAME_FIRST + 5);
const STAT_LOAD: StatId = StatId(StatId::GAME_FIRST + 6);
const STAT_ENTITY_MEMORY: StatId = StatId(StatId::MEMORY_FIRST);

/// Target frame period.
const FRAME_PERIOD: Duration = Duration::from_millis(16);

struct Args {
    config: Option<PathBuf>,
    capture: Option<PathBuf>,
    frames: Option<u32>,
    workers: usize,
    commands: Vec<String>,
}

fn parse_args() -> Args {
    let argv: Vec<String> = std::env::args().collect();
    let mut args = Args {
        config: None,
        capture: None,
        frames: None,
        workers: 2,
        commands: Vec::new(),
    };

    let mut i = 1;
    while i < argv.len() {
        let value = argv.get(i + 1).cloned();
        match argv[i].as_str() {
            "--config" => args.config = value.map(PathBuf::from),
            "--capture" => args.capture = value.map(PathBuf::from),
            "--frames" => args.frames = value.and_then(|v| v.parse().ok()),
            "--workers" => {
                if let Some(workers) = value.and_then(|v| v.parse().ok()) {
                    args.workers = workers;
                }
            }
            "--stat" => args.commands.extend(value.map(|v| format!("stat {v}"))),
            "-h" | "--help" => {
                println!("Usage: framestat-demo [--config PATH] [--capture PATH] [--frames N] [--workers N] [--stat COMMAND]");
                std::process::exit(0);
            }
            other => {
                tracing::warn!("Ignoring unknown argument {}", other);
                i += 1;
                continue;
            }
        }
        i += 2;
    }

    args
}

fn declare_stats() -> anyhow::Result<()> {
    framestat::register(|registry| {
        registry
            .declare_group("Game", GroupId::GAME)?
            .declare_group("Memory", GroupId::MEMORY)?
            .declare_cycle_stat("Simulate", STAT_SIMULATE, GroupId::GAME)?
            .declare_cycle_stat("Physics", STAT_PHYSICS, GroupId::GAME)?
            .declare_cycle_stat("AI", STAT_AI, GroupId::GAME)?
            .declare_cycle_stat("Worker Job", STAT_WORKER_JOB, GroupId::GAME)?
            .declare_dword_counter("Entities Updated", STAT_ENTITIES, GroupId::GAME)?
            .declare_dword_counter("Jobs Run", STAT_JOBS, GroupId::GAME)?
            .declare_float_accumulator("Simulated Load", STAT_LOAD, GroupId::GAME)?
            .declare_memory_stat(
                "Entity Memory",
                STAT_ENTITY_MEMORY,
                GroupId::MEMORY,
                MemoryRegion::Physical,
                true,
            )?
            .add_sink_factory(Box::new(RemoteSinkFactory));
        Ok(())
    })?;
    Ok(())
}

/// Burn a little CPU so scopes have something to time.
fn busy_work(iterations: u32) -> u64 {
    let mut acc = 0x9e37_79b9_7f4a_7c15_u64;
    for i in 0..iterations {
        acc = acc.rotate_left(5) ^ u64::from(i);
        acc = acc.wrapping_mul(0x1000_0000_01b3);
    }
    std::hint::black_box(acc)
}

#[allow(clippy::cast_precision_loss)]
fn simulate(frame: u32) {
    framestat::scope_cycle_counter!(STAT_SIMULATE);
    {
        framestat::scope_cycle_counter!(STAT_PHYSICS);
        busy_work(20_000 + (frame % 30) * 1_000);
    }
    for _ in 0..4 {
        framestat::scope_cycle_counter!(STAT_AI);
        busy_work(5_000);
        framestat::inc_dword_stat!(STAT_ENTITIES, 16);
    }
    framestat::set_float_stat!(STAT_LOAD, (frame % 100) as f32 / 100.0);
}

fn run_worker(stats: &'static StatManager, stop: &AtomicBool, worker: usize) {
    let mut seen = stats.frame_number();
    let job_stat = stats.find_stat_id_for_string(&format!("Worker {worker} Idle"), GroupId::GAME);
    while !stop.load(Ordering::Relaxed) {
        {
            framestat::scope_cycle_counter!(STAT_WORKER_JOB);
            busy_work(10_000 * u32::try_from(worker + 1).unwrap_or(1));
            framestat::inc_dword_stat!(STAT_JOBS);
        }
        {
            framestat::conditional_scope_cycle_counter!(job_stat);
            if let Some(next) = stats.wait_for_frame_timeout(seen, Duration::from_millis(100)) {
                seen = next;
            }
        }
        stats.advance_frame_for_thread();
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args();
    declare_stats()?;
    let stats = match &args.config {
        Some(path) => framestat::init_from_path(path)?,
        None => framestat::init(framestat::StatsConfig::default())?,
    };
    info!(
        "framestat demo streaming on port {}",
        stats.config().remote_port
    );

    let mut output = TracingOutput;
    for command in &args.commands {
        if !stats.exec(command, &mut output) {
            tracing::warn!("Unhandled command: {}", command);
        }
    }
    if let Some(path) = &args.capture {
        let path = stats.start_writing_stats_file(Some(path))?;
        info!("Capturing to {}", path.display());
    }
    stats.set_available_memory(MemoryRegion::Physical, 64 * 1024 * 1024);

    let stop = Arc::new(AtomicBool::new(false));
    let workers: Vec<_> = (0..args.workers)
        .map(|worker| {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(format!("framestat-worker-{worker}"))
                .spawn(move || run_worker(stats, &stop, worker))
        })
        .collect::<Result<_, _>>()?;

    let mut entity_bytes = 0u32;
    loop {
        let frame = stats.frame_number();
        if args.frames.is_some_and(|limit| frame >= limit) {
            break;
        }

        simulate(frame);
        if frame % 60 == 0 {
            entity_bytes = entity_bytes.wrapping_add(4096);
            framestat::set_memory_stat!(STAT_ENTITY_MEMORY, entity_bytes);
        }

        thread::sleep(FRAME_PERIOD);
        stats.advance_frame();
        if frame % 300 == 0 {
            let (_, fps) = stats.fps();
            info!("Frame {}: {:.1} fps", frame, fps);
        }
    }

    stop.store(true, Ordering::Relaxed);
    for worker in workers {
        let _ = worker.join();
    }
    if stats.stop_writing_stats_file() {
        info!("Capture closed");
    }
    framestat::shutdown();
    Ok(())
}
