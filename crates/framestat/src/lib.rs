//! In-process per-frame stats for game and server processes.
//!
//! Instrumented code records cycle scopes, counters, accumulators and memory
//! gauges. Once per frame the owning thread calls
//! [`StatManager::advance_frame`], which merges every thread's cycle totals
//! into one canonical row per stat, rolls the 60-frame histories and
//! publishes the frame to the attached sinks (remote viewers, capture files,
//! external profilers). The HUD and the `STAT` commands read the same state.
//!
//! # Feature Flags
//!
//! - `stats`: Enable the instrumentation macros. When disabled, all macros
//!   expand to no-ops.
//!
//! # Usage
//!
//! Declare stats at startup, then initialize the global manager:
//!
//! ```ignore
//! use framestat::{GroupId, StatId, StatsConfig};
//!
//! const STAT_WORLD_TICK: StatId = StatId(StatId::GAME_FIRST);
//!
//! framestat::register(|registry| {
//!     registry
//!         .declare_group("Game", GroupId::GAME)?
//!         .declare_cycle_stat("World Tick", STAT_WORLD_TICK, GroupId::GAME)?;
//!     Ok(())
//! })?;
//! let stats = framestat::init(StatsConfig::default())?;
//! ```
//!
//! Instrument code and close each frame:
//!
//! ```ignore
//! fn tick_world() {
//!     framestat::scope_cycle_counter!(STAT_WORLD_TICK);
//!     // ...
//! }
//!
//! stats.advance_frame();
//! ```

pub mod accumulator;
pub mod clock;
mod command;
pub mod config;
mod context;
pub mod cycle;
pub mod group;
pub mod history;
pub mod hud;
mod macros;
pub mod manager;
pub mod registry;
pub mod scope;
pub mod sink;

pub use framestat_core::{constants, Error, GroupId, MemoryRegion, Result, StatId, StatKind, ThreadIndex};

pub use accumulator::{
    Accumulator, Counter, DwordAccumulator, DwordCounter, FloatAccumulator, FloatCounter,
    FrameValue, MemoryGauge, StatInfo, ValueStat,
};
pub use clock::{CycleClock, ManualClock, SystemClock};
pub use command::{OutputDevice, TracingOutput};
pub use config::{StatsConfig, CONFIG_FILE_NAME, DEFAULT_REMOTE_PORT};
pub use context::{global, init, init_from_path, is_initialized, register, shutdown};
pub use cycle::{CycleHistory, CycleNode};
pub use group::StatGroup;
pub use history::{FpsCounter, StatHistory};
pub use hud::{Canvas, DisplaySettings, HudColor, RenderMode, StatHud, TextCanvas};
pub use manager::StatManager;
pub use registry::{GroupDecl, Registry, StatDecl, StatFactory};
pub use scope::{ConditionalCycleCounter, CycleCounter, ScopeCycleCounter};
pub use sink::{SinkFactory, StatSink};

// Re-export protocol types for the viewer
pub use sink::protocol::{
    ClientMessage, CycleSample, DescriptionBlock, FrameRecord, ServerMessage, StatSample,
    PROTOCOL_VERSION,
};
