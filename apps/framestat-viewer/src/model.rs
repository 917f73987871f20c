//! Viewer-side state rebuilt from description blocks and frame records.

use std::collections::{BTreeMap, BTreeSet};

use framestat::sink::protocol::StatDescription;
use framestat::{
    DescriptionBlock, FrameRecord, GroupId, StatHistory, StatId, StatKind, StatSample, ThreadIndex,
};

/// One table row.
#[derive(Debug, Clone, PartialEq)]
pub struct StatRow {
    pub name: String,
    pub group: String,
    pub kind: StatKind,
    pub recent: f64,
    pub average: f64,
    pub peak: f64,
    pub calls: u32,
}

#[derive(Debug, Default)]
struct CycleTrack {
    inclusive: StatHistory<u32>,
    calls: u32,
}

/// Described stats plus the histories of everything received so far.
#[derive(Debug)]
pub struct StatsModel {
    ns_per_cycle: f64,
    groups: BTreeMap<GroupId, String>,
    stats: BTreeMap<StatId, StatDescription>,
    frame: Option<u32>,
    cycles: BTreeMap<StatId, CycleTrack>,
    values: BTreeMap<StatId, StatHistory<f32>>,
    threads: BTreeSet<ThreadIndex>,
}

impl StatsModel {
    pub fn new(ns_per_cycle: f64) -> Self {
        Self {
            ns_per_cycle,
            groups: BTreeMap::new(),
            stats: BTreeMap::new(),
            frame: None,
            cycles: BTreeMap::new(),
            values: BTreeMap::new(),
            threads: BTreeSet::new(),
        }
    }

    /// Forget every frame but keep the descriptions.
    pub fn clear_frames(&mut self) {
        self.frame = None;
        self.cycles.clear();
        self.values.clear();
        self.threads.clear();
    }

    /// Merge a description block; later blocks extend earlier ones.
    pub fn apply_descriptions(&mut self, block: &DescriptionBlock) {
        for group in &block.groups {
            self.groups.insert(group.id, group.name.clone());
        }
        for stat in &block.stats {
            self.stats.insert(stat.id, stat.clone());
        }
    }

    /// Fold one frame into the histories. Stats absent from the frame
    /// record zero, which is how the stream encodes idle counters.
    pub fn apply_frame(&mut self, record: &FrameRecord) {
        let mut cycles: BTreeMap<StatId, (u32, u32)> = BTreeMap::new();
        let mut values: BTreeMap<StatId, f32> = BTreeMap::new();
        for sample in &record.samples {
            match *sample {
                StatSample::Cycle(ref cycle) if cycle.thread == ThreadIndex::CANONICAL => {
                    cycles.insert(cycle.stat, (cycle.inclusive_cycles, cycle.calls));
                }
                StatSample::Cycle(ref cycle) => {
                    self.threads.insert(cycle.thread);
                }
                StatSample::Float { stat, value, .. } => {
                    values.insert(stat, value);
                }
                #[allow(clippy::cast_precision_loss)]
                StatSample::Dword { stat, value, .. } => {
                    values.insert(stat, value as f32);
                }
            }
        }

        for (id, desc) in &self.stats {
            if desc.kind == StatKind::CycleCounter {
                let (inclusive, calls) = cycles.get(id).copied().unwrap_or_default();
                let track = self.cycles.entry(*id).or_default();
                track.inclusive.add(inclusive);
                track.calls = calls;
            } else {
                let value = values.get(id).copied().unwrap_or_default();
                self.values.entry(*id).or_default().add(value);
            }
        }
        self.frame = Some(record.frame);
    }

    /// Number of the last applied frame.
    pub fn frame(&self) -> Option<u32> {
        self.frame
    }

    /// Worker threads seen in per-thread samples.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    fn cycles_to_ms(&self, cycles: f64) -> f64 {
        cycles * self.ns_per_cycle / 1_000_000.0
    }

    /// Last frame time and its average over the history window, in ms.
    pub fn frame_time_ms(&self) -> (f64, f64) {
        self.cycles.get(&StatId::FRAME_TIME).map_or((0.0, 0.0), |track| {
            (
                self.cycles_to_ms(f64::from(track.inclusive.most_recent())),
                self.cycles_to_ms(track.inclusive.average()),
            )
        })
    }

    fn row(&self, id: StatId, desc: &StatDescription) -> Option<StatRow> {
        let group = self.groups.get(&desc.group).cloned().unwrap_or_default();
        if desc.kind == StatKind::CycleCounter {
            let track = self.cycles.get(&id)?;
            Some(StatRow {
                name: desc.name.clone(),
                group,
                kind: desc.kind,
                recent: self.cycles_to_ms(f64::from(track.inclusive.most_recent())),
                average: self.cycles_to_ms(track.inclusive.average()),
                peak: self.cycles_to_ms(track.inclusive.peak()),
                calls: track.calls,
            })
        } else {
            let history = self.values.get(&id)?;
            Some(StatRow {
                name: desc.name.clone(),
                group,
                kind: desc.kind,
                recent: f64::from(history.most_recent()),
                average: history.average(),
                peak: history.peak(),
                calls: 0,
            })
        }
    }

    /// Canonical cycle stats, slowest first. Frame time is shown in the
    /// header instead.
    pub fn cycle_rows(&self) -> Vec<StatRow> {
        let mut rows: Vec<StatRow> = self
            .stats
            .iter()
            .filter(|(id, desc)| desc.kind == StatKind::CycleCounter && **id != StatId::FRAME_TIME)
            .filter_map(|(id, desc)| self.row(*id, desc))
            .collect();
        rows.sort_by(|a, b| b.average.total_cmp(&a.average));
        rows
    }

    /// Counters, accumulators and memory gauges, grouped by group name.
    pub fn value_rows(&self) -> Vec<StatRow> {
        let mut rows: Vec<StatRow> = self
            .stats
            .iter()
            .filter(|(_, desc)| desc.kind != StatKind::CycleCounter)
            .filter_map(|(id, desc)| self.row(*id, desc))
            .collect();
        rows.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.name.cmp(&b.name)));
        rows
    }
}
