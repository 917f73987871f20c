//! Accumulators, counters and memory gauges.
//!
//! Integer stats are lock-free. Float stats keep their bits in an atomic so
//! readers never block, but every mutation takes one process-wide lock since
//! there is no portable atomic float add.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use framestat_core::{GroupId, MemoryRegion, StatId, StatKind};
use parking_lot::Mutex;

use crate::history::{HistoryValue, StatHistory};

static FLOAT_LOCK: Mutex<()> = Mutex::new(());

/// Attributes shared by every stat instance.
#[derive(Debug)]
pub struct StatInfo {
    name: Arc<str>,
    key: String,
    stat_id: StatId,
    group_id: GroupId,
    visible: AtomicBool,
}

impl StatInfo {
    /// Create the common data for a stat instance.
    #[must_use]
    pub fn new(name: Arc<str>, stat_id: StatId, group_id: GroupId) -> Self {
        Self {
            key: name_key(&name),
            name,
            stat_id,
            group_id,
            visible: AtomicBool::new(true),
        }
    }

    /// Display name as declared.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the display name.
    #[must_use]
    pub fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Trimmed, lower-cased name used for lookups.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Id of the stat.
    #[must_use]
    pub fn stat_id(&self) -> StatId {
        self.stat_id
    }

    /// Id of the owning group.
    #[must_use]
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Whether the HUD shows this stat.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    /// Show or hide this stat on the HUD.
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Relaxed);
    }
}

/// Normalizes a stat or group name for case-insensitive lookup. Some names
/// carry leading spaces for HUD indentation; those are dropped.
#[must_use]
pub fn name_key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Storage cell of a non-cycle stat.
pub trait StatCell: Default + Send + Sync {
    /// The value kind stored.
    type Value: HistoryValue + Send;

    /// Current value.
    fn get(&self) -> Self::Value;
    /// Add to the value.
    fn increment(&self, by: Self::Value);
    /// Subtract from the value.
    fn decrement(&self, by: Self::Value);
    /// Overwrite the value.
    fn set(&self, value: Self::Value);
    /// Read the value and write zero as one atomic step.
    fn take(&self) -> Self::Value;
}

/// Lock-free 32-bit integer cell.
#[derive(Debug, Default)]
pub struct DwordCell(AtomicU32);

impl StatCell for DwordCell {
    type Value = u32;

    #[inline]
    fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    fn increment(&self, by: u32) {
        self.0.fetch_add(by, Ordering::AcqRel);
    }

    #[inline]
    fn decrement(&self, by: u32) {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            match self.0.compare_exchange_weak(
                current,
                current.wrapping_sub(by),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    #[inline]
    fn set(&self, value: u32) {
        self.0.store(value, Ordering::Release);
    }

    #[inline]
    fn take(&self) -> u32 {
        self.0.swap(0, Ordering::AcqRel)
    }
}

/// Float cell; mutations serialize on a global lock.
#[derive(Debug, Default)]
pub struct FloatCell(AtomicU32);

impl FloatCell {
    fn update(&self, f: impl FnOnce(f32) -> f32) {
        let _guard = FLOAT_LOCK.lock();
        let value = f32::from_bits(self.0.load(Ordering::Acquire));
        self.0.store(f(value).to_bits(), Ordering::Release);
    }
}

impl StatCell for FloatCell {
    type Value = f32;

    #[inline]
    fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    fn increment(&self, by: f32) {
        self.update(|value| value + by);
    }

    fn decrement(&self, by: f32) {
        self.update(|value| value - by);
    }

    fn set(&self, value: f32) {
        self.update(|_| value);
    }

    fn take(&self) -> f32 {
        let _guard = FLOAT_LOCK.lock();
        f32::from_bits(self.0.swap(0.0f32.to_bits(), Ordering::AcqRel))
    }
}

/// Value that persists across frames.
#[derive(Debug)]
pub struct Accumulator<C: StatCell> {
    info: StatInfo,
    cell: C,
}

impl<C: StatCell> Accumulator<C> {
    /// Create a zeroed accumulator.
    #[must_use]
    pub fn new(info: StatInfo) -> Self {
        Self {
            info,
            cell: C::default(),
        }
    }

    /// Common stat data.
    pub fn info(&self) -> &StatInfo {
        &self.info
    }

    /// The live cell.
    pub fn cell(&self) -> &C {
        &self.cell
    }

    /// Current value.
    pub fn value(&self) -> C::Value {
        self.cell.get()
    }
}

/// Value reset to zero every frame, with history.
#[derive(Debug)]
pub struct Counter<C: StatCell> {
    info: StatInfo,
    cell: C,
    history: Mutex<StatHistory<C::Value>>,
}

impl<C: StatCell> Counter<C> {
    /// Create a zeroed counter.
    #[must_use]
    pub fn new(info: StatInfo) -> Self {
        Self {
            info,
            cell: C::default(),
            history: Mutex::new(StatHistory::new()),
        }
    }

    /// Common stat data.
    pub fn info(&self) -> &StatInfo {
        &self.info
    }

    /// The live cell.
    pub fn cell(&self) -> &C {
        &self.cell
    }

    /// Current value.
    pub fn value(&self) -> C::Value {
        self.cell.get()
    }

    /// Snapshot of the history.
    pub fn history(&self) -> StatHistory<C::Value> {
        self.history.lock().clone()
    }

    /// Push the frame's value into the history and reset the live value.
    ///
    /// Returns the value that was recorded.
    pub fn advance_frame(&self) -> C::Value {
        let frame_value = self.cell.take();
        self.history.lock().add(frame_value);
        frame_value
    }
}

/// Integer accumulator measuring a memory region.
#[derive(Debug)]
pub struct MemoryGauge {
    info: StatInfo,
    cell: DwordCell,
    region: MemoryRegion,
    show_when_zero: bool,
    history: Mutex<StatHistory<u32>>,
}

impl MemoryGauge {
    /// Create a zeroed gauge.
    #[must_use]
    pub fn new(info: StatInfo, region: MemoryRegion, show_when_zero: bool) -> Self {
        Self {
            info,
            cell: DwordCell::default(),
            region,
            show_when_zero,
            history: Mutex::new(StatHistory::new()),
        }
    }

    /// Common stat data.
    pub fn info(&self) -> &StatInfo {
        &self.info
    }

    /// The live cell.
    pub fn cell(&self) -> &DwordCell {
        &self.cell
    }

    /// Current value in bytes.
    pub fn value(&self) -> u32 {
        self.cell.get()
    }

    /// Region this gauge measures.
    pub fn region(&self) -> MemoryRegion {
        self.region
    }

    /// Whether sinks and the HUD report this gauge while it reads zero.
    pub fn show_when_zero(&self) -> bool {
        self.show_when_zero
    }

    /// Snapshot of the history.
    pub fn history(&self) -> StatHistory<u32> {
        self.history.lock().clone()
    }

    /// Push the current value into the history without resetting it.
    pub fn advance_frame(&self) -> u32 {
        let value = self.cell.get();
        self.history.lock().add(value);
        value
    }
}

/// Integer accumulator.
pub type DwordAccumulator = Accumulator<DwordCell>;
/// Float accumulator.
pub type FloatAccumulator = Accumulator<FloatCell>;
/// Integer counter.
pub type DwordCounter = Counter<DwordCell>;
/// Float counter.
pub type FloatCounter = Counter<FloatCell>;

/// A value reported by a non-cycle stat for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameValue {
    /// Integer-backed stats.
    Dword(u32),
    /// Float-backed stats.
    Float(f32),
}

/// Any non-cycle stat.
#[derive(Debug, Clone)]
pub enum ValueStat {
    /// See [`FloatAccumulator`].
    FloatAccumulator(Arc<FloatAccumulator>),
    /// See [`DwordAccumulator`].
    DwordAccumulator(Arc<DwordAccumulator>),
    /// See [`FloatCounter`].
    FloatCounter(Arc<FloatCounter>),
    /// See [`DwordCounter`].
    DwordCounter(Arc<DwordCounter>),
    /// See [`MemoryGauge`].
    Memory(Arc<MemoryGauge>),
}

impl ValueStat {
    /// Common stat data.
    #[must_use]
    pub fn info(&self) -> &StatInfo {
        match self {
            Self::FloatAccumulator(stat) => stat.info(),
            Self::DwordAccumulator(stat) => stat.info(),
            Self::FloatCounter(stat) => stat.info(),
            Self::DwordCounter(stat) => stat.info(),
            Self::Memory(stat) => stat.info(),
        }
    }

    /// Declared kind.
    #[must_use]
    pub fn kind(&self) -> StatKind {
        match self {
            Self::FloatAccumulator(_) => StatKind::FloatAccumulator,
            Self::DwordAccumulator(_) => StatKind::DwordAccumulator,
            Self::FloatCounter(_) => StatKind::FloatCounter,
            Self::DwordCounter(_) => StatKind::DwordCounter,
            Self::Memory(_) => StatKind::MemoryCounter,
        }
    }

    /// Integer cell, if this stat has one.
    #[must_use]
    pub fn dword_cell(&self) -> Option<&DwordCell> {
        match self {
            Self::DwordAccumulator(stat) => Some(stat.cell()),
            Self::DwordCounter(stat) => Some(stat.cell()),
            Self::Memory(stat) => Some(stat.cell()),
            _ => None,
        }
    }

    /// Float cell, if this stat has one.
    #[must_use]
    pub fn float_cell(&self) -> Option<&FloatCell> {
        match self {
            Self::FloatAccumulator(stat) => Some(stat.cell()),
            Self::FloatCounter(stat) => Some(stat.cell()),
            _ => None,
        }
    }

    /// Live value.
    #[must_use]
    pub fn value(&self) -> FrameValue {
        match self {
            Self::FloatAccumulator(stat) => FrameValue::Float(stat.value()),
            Self::DwordAccumulator(stat) => FrameValue::Dword(stat.value()),
            Self::FloatCounter(stat) => FrameValue::Float(stat.value()),
            Self::DwordCounter(stat) => FrameValue::Dword(stat.value()),
            Self::Memory(stat) => FrameValue::Dword(stat.value()),
        }
    }

    /// Value to broadcast this frame, or `None` when the stream may omit it.
    ///
    /// Zero values are dropped, except memory gauges flagged to show zero.
    #[must_use]
    pub fn broadcast_value(&self) -> Option<FrameValue> {
        let value = self.value();
        let is_zero = match value {
            FrameValue::Dword(v) => v == 0,
            FrameValue::Float(v) => v == 0.0,
        };
        let keep_zero = matches!(self, Self::Memory(gauge) if gauge.show_when_zero());
        (!is_zero || keep_zero).then_some(value)
    }

    /// Move to the next frame: counters reset, gauges record, accumulators
    /// are left alone.
    pub fn advance_frame(&self) {
        match self {
            Self::FloatAccumulator(_) | Self::DwordAccumulator(_) => {}
            Self::FloatCounter(stat) => {
                stat.advance_frame();
            }
            Self::DwordCounter(stat) => {
                stat.advance_frame();
            }
            Self::Memory(stat) => {
                stat.advance_frame();
            }
        }
    }

    /// Most recent history entry, average and peak, for kinds with history.
    #[must_use]
    pub fn history_summary(&self) -> Option<(f64, f64, f64)> {
        match self {
            Self::FloatCounter(stat) => {
                let history = stat.history();
                Some((
                    f64::from(history.most_recent()),
                    history.average(),
                    history.peak(),
                ))
            }
            Self::DwordCounter(stat) => {
                let history = stat.history();
                Some((
                    f64::from(history.most_recent()),
                    history.average(),
                    history.peak(),
                ))
            }
            Self::Memory(stat) => {
                let history = stat.history();
                Some((
                    f64::from(history.most_recent()),
                    history.average(),
                    history.peak(),
                ))
            }
            Self::FloatAccumulator(_) | Self::DwordAccumulator(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str) -> StatInfo {
        StatInfo::new(Arc::from(name), StatId(300), GroupId::GAME)
    }

    #[test]
    fn counter_resets_and_records() {
        let counter = DwordCounter::new(info("Counter"));
        counter.cell().increment(3);
        counter.cell().increment(4);
        assert_eq!(counter.advance_frame(), 7);
        assert_eq!(counter.value(), 0);
        assert_eq!(counter.history().most_recent(), 7);
    }

    #[test]
    fn float_counter_resets_to_zero() {
        let counter = FloatCounter::new(info("Seconds"));
        counter.cell().increment(0.25);
        counter.cell().increment(0.5);
        counter.advance_frame();
        assert_eq!(counter.value(), 0.0);
        assert!((counter.history().most_recent() - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn memory_gauge_keeps_value() {
        let gauge = MemoryGauge::new(info("Mem"), MemoryRegion::Physical, true);
        gauge.cell().set(1024);
        gauge.advance_frame();
        gauge.advance_frame();
        assert_eq!(gauge.value(), 1024);
        assert_eq!(gauge.history().most_recent(), 1024);
    }

    #[test]
    fn dword_decrement_wraps_like_unsigned() {
        let cell = DwordCell::default();
        cell.set(5);
        cell.decrement(2);
        assert_eq!(cell.get(), 3);
        cell.decrement(4);
        assert_eq!(cell.get(), u32::MAX);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let accum = Arc::new(DwordAccumulator::new(info("Hits")));
        let floats = Arc::new(FloatAccumulator::new(info("Weight")));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let accum = Arc::clone(&accum);
                let floats = Arc::clone(&floats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        accum.cell().increment(1);
                        floats.cell().increment(1.0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(accum.value(), 4000);
        assert_eq!(floats.value(), 4000.0);
    }

    #[test]
    fn broadcast_skips_zero_unless_gauge_shows_zero() {
        let counter = ValueStat::DwordCounter(Arc::new(DwordCounter::new(info("A"))));
        assert_eq!(counter.broadcast_value(), None);
        let hidden = ValueStat::Memory(Arc::new(MemoryGauge::new(
            info("B"),
            MemoryRegion::Gpu,
            false,
        )));
        assert_eq!(hidden.broadcast_value(), None);
        let shown = ValueStat::Memory(Arc::new(MemoryGauge::new(
            info("C"),
            MemoryRegion::Gpu,
            true,
        )));
        assert_eq!(shown.broadcast_value(), Some(FrameValue::Dword(0)));
    }

    #[test]
    fn name_key_trims_and_lowercases() {
        assert_eq!(name_key("  Frame Time "), "frame time");
    }
}
