//! Stat, group and thread identifiers.
//!
//! Stat ids are partitioned into fixed ranges, one per subsystem, so that ids
//! stay stable across builds and recordings stay readable. Ids are never
//! recycled within a process.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Process-wide identifier of a single metric.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct StatId(pub u32);

impl StatId {
    /// Error sentinel. Never sampled.
    pub const ERROR: Self = Self(0);
    /// Synthetic root of every thread's cycle tree.
    pub const ROOT: Self = Self(1);
    /// Whole-frame time. Always broadcast to sinks.
    pub const FRAME_TIME: Self = Self(2);

    /// First id of the engine range.
    pub const ENGINE_FIRST: u32 = 200;
    /// First id of the game range.
    pub const GAME_FIRST: u32 = 300;
    /// First id of the network range.
    pub const NET_FIRST: u32 = 400;
    /// First id of the streaming range.
    pub const STREAMING_FIRST: u32 = 500;
    /// First id of the physics range.
    pub const PHYSICS_FIRST: u32 = 700;
    /// First id of the collision range.
    pub const COLLISION_FIRST: u32 = 800;
    /// First id of the audio range.
    pub const AUDIO_FIRST: u32 = 900;
    /// First id of the memory range.
    pub const MEMORY_FIRST: u32 = 1000;
    /// First id of the stats system's own range.
    pub const STAT_SYSTEM_FIRST: u32 = 1500;
    /// First id of the scene rendering range.
    pub const SCENE_RENDERING_FIRST: u32 = 1900;
    /// First id of the threading range.
    pub const THREADING_FIRST: u32 = 2100;

    /// Number of timed scope calls merged in the last frame.
    pub const TIMING_CODE_CALLS: Self = Self(Self::STAT_SYSTEM_FIRST + 3);

    /// First id handed out to stats named at runtime.
    pub const FIRST_DYNAMIC: Self = Self(35_000);
    /// Last id handed out to stats named at runtime.
    pub const LAST_DYNAMIC: Self = Self(39_999);

    /// Out-of-tree extensions start here.
    pub const LICENSEE_FIRST: Self = Self(60_000);

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns true for the error sentinel.
    #[inline]
    #[must_use]
    pub const fn is_error(self) -> bool {
        self.0 == Self::ERROR.0
    }

    /// Returns true if the id lies in the runtime-named range.
    #[inline]
    #[must_use]
    pub const fn is_dynamic(self) -> bool {
        self.0 >= Self::FIRST_DYNAMIC.0 && self.0 <= Self::LAST_DYNAMIC.0
    }

    /// Returns true if the id lies in the licensee range.
    #[inline]
    #[must_use]
    pub const fn is_licensee(self) -> bool {
        self.0 >= Self::LICENSEE_FIRST.0
    }
}

impl fmt::Display for StatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Process-wide identifier of a group of stats shown together.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct GroupId(pub u32);

impl GroupId {
    /// Group every stat falls back to.
    pub const DEFAULT: Self = Self(0);
    /// Animation
    pub const ANIM: Self = Self(1);
    /// Audio
    pub const AUDIO: Self = Self(3);
    /// Collision
    pub const COLLISION: Self = Self(7);
    /// Engine
    pub const ENGINE: Self = Self(9);
    /// Gameplay
    pub const GAME: Self = Self(12);
    /// Memory
    pub const MEMORY: Self = Self(13);
    /// Networking
    pub const NET: Self = Self(18);
    /// Physics
    pub const PHYSICS: Self = Self(25);
    /// Scene rendering
    pub const SCENE_RENDERING: Self = Self(34);
    /// The stats system's own bookkeeping
    pub const STAT_SYSTEM: Self = Self(40);
    /// Streaming
    pub const STREAMING: Self = Self(41);
    /// Threading
    pub const THREADING: Self = Self(43);

    /// Out-of-tree extensions start here.
    pub const LICENSEE_FIRST: Self = Self(10_000);

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns true if the id lies in the licensee range.
    #[inline]
    #[must_use]
    pub const fn is_licensee(self) -> bool {
        self.0 >= Self::LICENSEE_FIRST.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group #{}", self.0)
    }
}

/// Compact per-process thread number carried in cycle samples.
///
/// Index 0 is reserved for canonical (thread-agnostic) stats; every thread
/// that touches the engine gets the next free index on first use.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct ThreadIndex(pub u32);

static NEXT_THREAD_INDEX: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static THREAD_INDEX: ThreadIndex =
        ThreadIndex(NEXT_THREAD_INDEX.fetch_add(1, Ordering::Relaxed));
}

impl ThreadIndex {
    /// Marks canonical stats, which belong to no thread.
    pub const CANONICAL: Self = Self(0);

    /// Index of the calling thread.
    #[inline]
    #[must_use]
    pub fn current() -> Self {
        THREAD_INDEX.with(|index| *index)
    }

    /// Returns true for the canonical marker.
    #[inline]
    #[must_use]
    pub const fn is_canonical(self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_range_bounds() {
        assert!(StatId::FIRST_DYNAMIC.is_dynamic());
        assert!(StatId::LAST_DYNAMIC.is_dynamic());
        assert!(!StatId(StatId::LAST_DYNAMIC.0 + 1).is_dynamic());
        assert!(!StatId::FRAME_TIME.is_dynamic());
    }

    #[test]
    fn licensee_ranges_are_high() {
        assert!(StatId::LICENSEE_FIRST.is_licensee());
        assert!(!StatId::LAST_DYNAMIC.is_licensee());
        assert!(GroupId(10_001).is_licensee());
        assert!(!GroupId::THREADING.is_licensee());
    }

    #[test]
    fn thread_indices_differ_between_threads() {
        let here = ThreadIndex::current();
        let there = std::thread::spawn(ThreadIndex::current).join().unwrap();
        assert_ne!(here, there);
        assert!(!here.is_canonical());
        assert_eq!(here, ThreadIndex::current());
    }
}
