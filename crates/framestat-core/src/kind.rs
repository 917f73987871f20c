//! Stat kind and memory region tag spaces.
//!
//! Both enums are part of the capture file and wire formats. New variants are
//! appended; existing discriminants never move.

use serde::{Deserialize, Serialize};

/// The kind of a stat, fixed by its declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatKind {
    /// Elapsed-cycle timing of a scope, tree-structured per thread.
    CycleCounter = 0,
    /// Float value that persists across frames.
    FloatAccumulator = 1,
    /// Integer value that persists across frames.
    DwordAccumulator = 2,
    /// Float value reset every frame, with history.
    FloatCounter = 3,
    /// Integer value reset every frame, with history.
    DwordCounter = 4,
    /// Integer accumulator tagged with a memory region, with history.
    MemoryCounter = 5,
}

impl StatKind {
    /// Short label used by listings.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::CycleCounter => "cycle",
            Self::FloatAccumulator => "float accumulator",
            Self::DwordAccumulator => "dword accumulator",
            Self::FloatCounter => "float counter",
            Self::DwordCounter => "dword counter",
            Self::MemoryCounter => "memory",
        }
    }

    /// Returns true for kinds backed by an integer cell.
    #[must_use]
    pub const fn is_dword(self) -> bool {
        matches!(
            self,
            Self::DwordAccumulator | Self::DwordCounter | Self::MemoryCounter
        )
    }

    /// Returns true for kinds backed by a float cell.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::FloatAccumulator | Self::FloatCounter)
    }
}

/// Memory pool a memory gauge measures.
///
/// The exact meaning is platform dependent apart from `Physical` and `Gpu`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MemoryRegion {
    /// Main system memory.
    #[default]
    Physical = 0,
    /// Memory owned by the GPU.
    Gpu = 1,
    /// System memory directly visible to the GPU.
    GpuSystem = 2,
    /// General purpose ring buffer tracking.
    RingBuffer1 = 3,
    /// General purpose ring buffer tracking.
    RingBuffer2 = 4,
    /// General purpose ring buffer tracking.
    RingBuffer3 = 5,
    /// Presized texture pool.
    TexturePool1 = 6,
    /// Presized texture pool.
    TexturePool2 = 7,
    /// Presized texture pool.
    TexturePool3 = 8,
}

impl MemoryRegion {
    /// Number of regions; sinks size per-region maxima with this.
    pub const COUNT: usize = 9;

    /// All regions in tag order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Physical,
        Self::Gpu,
        Self::GpuSystem,
        Self::RingBuffer1,
        Self::RingBuffer2,
        Self::RingBuffer3,
        Self::TexturePool1,
        Self::TexturePool2,
        Self::TexturePool3,
    ];

    /// Position of this region in `ALL`.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Physical => "Physical",
            Self::Gpu => "GPU",
            Self::GpuSystem => "GPU System",
            Self::RingBuffer1 => "Ring Buffer 1",
            Self::RingBuffer2 => "Ring Buffer 2",
            Self::RingBuffer3 => "Ring Buffer 3",
            Self::TexturePool1 => "Texture Pool 1",
            Self::TexturePool2 => "Texture Pool 2",
            Self::TexturePool3 => "Texture Pool 3",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_indices_match_tag_order() {
        for (i, region) in MemoryRegion::ALL.iter().enumerate() {
            assert_eq!(region.index(), i);
        }
    }

    #[test]
    fn kind_cell_classes_are_disjoint() {
        for kind in [
            StatKind::CycleCounter,
            StatKind::FloatAccumulator,
            StatKind::DwordAccumulator,
            StatKind::FloatCounter,
            StatKind::DwordCounter,
            StatKind::MemoryCounter,
        ] {
            assert!(!(kind.is_dword() && kind.is_float()));
        }
        assert!(!StatKind::CycleCounter.is_dword());
        assert!(!StatKind::CycleCounter.is_float());
    }
}
