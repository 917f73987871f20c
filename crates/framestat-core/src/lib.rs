//! Core types for the framestat performance-measurement engine.
//!
//! This crate provides the foundational types shared by the engine, its sinks
//! and offline tools:
//! - Stat and group identifier spaces with their reserved ranges
//! - The stat kind and memory region tag spaces used on the wire
//! - The engine-wide error type

pub mod error;
pub mod ids;
pub mod kind;

pub use error::{Error, Result};
pub use ids::{GroupId, StatId, ThreadIndex};
pub use kind::{MemoryRegion, StatKind};

/// Engine-wide constants
pub mod constants {
    /// Number of frames kept by every stat history.
    pub const STAT_HISTORY_SIZE: usize = 60;
}
