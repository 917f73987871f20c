//! Consumers of the description and sample streams.
//!
//! A sink sees two phases. The description phase runs when the sink is
//! attached and whenever the set of described stats changes. The sample phase
//! runs once per frame advance. A sink never receives samples before it has
//! received a complete description block.

pub mod capture;
pub mod external;
pub mod memory;
pub mod protocol;
pub mod remote;

use framestat_core::{GroupId, StatId, StatKind};

use crate::config::StatsConfig;
use protocol::{
    CycleSample, DescriptionBlock, FrameRecord, GroupDescription, StatDescription, StatSample,
};

pub use capture::{Capture, CaptureHeader, CaptureReader, CaptureSink};
pub use external::{
    ExternalProfilerSink, ExternalProfilerSinkFactory, NamedEvents, TracingNamedEvents,
};
pub use memory::{MemorySink, MemorySinkLog, SinkEvent};
pub use remote::{RemoteSink, RemoteSinkFactory};

/// A consumer of stats.
pub trait StatSink: Send {
    /// Name used in logs and for removal.
    fn name(&self) -> &str;

    /// Whether the sink currently wants samples.
    fn is_active(&self) -> bool {
        true
    }

    fn start_descriptions(&mut self) {}
    fn start_group_descriptions(&mut self) {}
    fn add_group_description(&mut self, group: GroupId, name: &str);
    fn end_group_descriptions(&mut self) {}
    fn start_stat_descriptions(&mut self) {}
    fn add_stat_description(&mut self, stat: StatId, name: &str, kind: StatKind, group: GroupId);
    fn end_stat_descriptions(&mut self) {}
    fn end_descriptions(&mut self) {}

    fn set_frame_number(&mut self, frame: u32);
    fn write_cycle(&mut self, sample: &CycleSample);
    fn write_float(&mut self, stat: StatId, group: GroupId, value: f32);
    fn write_dword(&mut self, stat: StatId, group: GroupId, value: u32);
    /// Called after the last sample of a frame.
    fn end_frame(&mut self) {}

    /// Release resources; no calls follow.
    fn shutdown(&mut self) {}
}

/// Creates a sink when the manager is built.
pub trait SinkFactory: Send + Sync {
    /// Returns `None` when the sink cannot be created; the failure is logged
    /// by the factory and the manager continues without it.
    fn create(&self, config: &StatsConfig) -> Option<Box<dyn StatSink>>;
}

/// Reassembles the call stream into records. Used by sinks that ship whole
/// blocks or frames.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    descriptions: DescriptionBlock,
    frame: FrameRecord,
}

impl RecordBuilder {
    pub fn start_descriptions(&mut self) {
        self.descriptions = DescriptionBlock::default();
    }

    pub fn add_group(&mut self, group: GroupId, name: &str) {
        self.descriptions.groups.push(GroupDescription {
            id: group,
            name: name.to_owned(),
        });
    }

    pub fn add_stat(&mut self, stat: StatId, name: &str, kind: StatKind, group: GroupId) {
        self.descriptions.stats.push(StatDescription {
            id: stat,
            name: name.to_owned(),
            kind,
            group,
        });
    }

    /// Completed description block.
    pub fn take_descriptions(&mut self) -> DescriptionBlock {
        std::mem::take(&mut self.descriptions)
    }

    pub fn start_frame(&mut self, frame: u32) {
        self.frame = FrameRecord {
            frame,
            samples: Vec::new(),
        };
    }

    pub fn push(&mut self, sample: StatSample) {
        self.frame.samples.push(sample);
    }

    /// Completed frame record.
    pub fn take_frame(&mut self) -> FrameRecord {
        std::mem::take(&mut self.frame)
    }
}

/// Replay a description block into `sink`.
pub fn describe(sink: &mut dyn StatSink, block: &DescriptionBlock) {
    sink.start_descriptions();
    sink.start_group_descriptions();
    for group in &block.groups {
        sink.add_group_description(group.id, &group.name);
    }
    sink.end_group_descriptions();
    sink.start_stat_descriptions();
    for stat in &block.stats {
        sink.add_stat_description(stat.id, &stat.name, stat.kind, stat.group);
    }
    sink.end_stat_descriptions();
    sink.end_descriptions();
}

/// Replay a frame record into `sink`.
pub fn write_frame(sink: &mut dyn StatSink, record: &FrameRecord) {
    sink.set_frame_number(record.frame);
    for sample in &record.samples {
        match *sample {
            StatSample::Cycle(ref cycle) => sink.write_cycle(cycle),
            StatSample::Float { stat, group, value } => sink.write_float(stat, group, value),
            StatSample::Dword { stat, group, value } => sink.write_dword(stat, group, value),
        }
    }
    sink.end_frame();
}

struct SinkSlot {
    sink: Box<dyn StatSink>,
    described: bool,
}

/// Multiplexes the streams to every attached sink.
#[derive(Default)]
pub struct SinkManager {
    slots: Vec<SinkSlot>,
    descriptions: Option<DescriptionBlock>,
}

impl std::fmt::Debug for SinkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkManager")
            .field("sinks", &self.names())
            .finish()
    }
}

impl SinkManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a sink; it is described right away when a block exists.
    pub fn add(&mut self, mut sink: Box<dyn StatSink>) {
        tracing::info!("Stat sink attached: {}", sink.name());
        let described = match &self.descriptions {
            Some(block) => {
                describe(sink.as_mut(), block);
                true
            }
            None => false,
        };
        self.slots.push(SinkSlot { sink, described });
    }

    /// Detach and shut down the sink called `name`.
    pub fn remove(&mut self, name: &str) -> bool {
        let Some(index) = self.slots.iter().position(|slot| slot.sink.name() == name) else {
            return false;
        };
        let mut slot = self.slots.remove(index);
        slot.sink.shutdown();
        tracing::info!("Stat sink detached: {}", name);
        true
    }

    /// Whether a sink called `name` is attached.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.slots.iter().any(|slot| slot.sink.name() == name)
    }

    /// Replace the description block and describe every sink with it.
    pub fn set_descriptions(&mut self, block: DescriptionBlock) {
        for slot in &mut self.slots {
            describe(slot.sink.as_mut(), &block);
            slot.described = true;
        }
        self.descriptions = Some(block);
    }

    /// Current description block.
    #[must_use]
    pub fn descriptions(&self) -> Option<&DescriptionBlock> {
        self.descriptions.as_ref()
    }

    /// Whether any described sink wants samples.
    #[must_use]
    pub fn has_active(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.described && slot.sink.is_active())
    }

    /// Send one frame to every described, active sink.
    pub fn write_frame(&mut self, record: &FrameRecord) {
        for slot in &mut self.slots {
            if slot.described && slot.sink.is_active() {
                write_frame(slot.sink.as_mut(), record);
            }
        }
    }

    /// Names of the attached sinks.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|slot| slot.sink.name().to_owned())
            .collect()
    }

    /// Shut down and detach every sink.
    pub fn shutdown_all(&mut self) {
        for mut slot in self.slots.drain(..) {
            slot.sink.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framestat_core::ThreadIndex;

    fn block() -> DescriptionBlock {
        let mut builder = RecordBuilder::default();
        builder.start_descriptions();
        builder.add_group(GroupId::GAME, "Game");
        builder.add_stat(StatId(300), "Tick", StatKind::CycleCounter, GroupId::GAME);
        builder.take_descriptions()
    }

    fn frame(n: u32) -> FrameRecord {
        FrameRecord {
            frame: n,
            samples: vec![StatSample::Cycle(CycleSample {
                stat: StatId(300),
                group: GroupId::GAME,
                parent_stat: StatId::ERROR,
                instance_id: 1,
                parent_instance: 0,
                thread: ThreadIndex::CANONICAL,
                inclusive_cycles: 10,
                calls: 1,
            })],
        }
    }

    #[test]
    fn undescribed_sink_gets_no_samples() {
        let (sink, log) = MemorySink::new("mem");
        let mut sinks = SinkManager::new();
        sinks.add(Box::new(sink));
        sinks.write_frame(&frame(1));
        assert!(log.events().is_empty());

        sinks.set_descriptions(block());
        sinks.write_frame(&frame(2));
        let events = log.events();
        assert_eq!(events.first(), Some(&SinkEvent::StartDescriptions));
        assert!(events.contains(&SinkEvent::FrameNumber(2)));
        assert!(!events.contains(&SinkEvent::FrameNumber(1)));
    }

    #[test]
    fn late_sink_is_described_on_attach() {
        let mut sinks = SinkManager::new();
        sinks.set_descriptions(block());
        let (sink, log) = MemorySink::new("late");
        sinks.add(Box::new(sink));
        let events = log.events();
        assert_eq!(events.last(), Some(&SinkEvent::EndDescriptions));
        assert!(events.contains(&SinkEvent::Stat {
            id: StatId(300),
            name: "Tick".into(),
            kind: StatKind::CycleCounter,
            group: GroupId::GAME,
        }));
    }

    #[test]
    fn inactive_sink_is_skipped_and_removal_shuts_down() {
        let mut sinks = SinkManager::new();
        sinks.set_descriptions(block());
        let (sink, log) = MemorySink::new("mem");
        log.set_active(false);
        sinks.add(Box::new(sink));
        assert!(!sinks.has_active());
        sinks.write_frame(&frame(3));
        assert!(!log.events().contains(&SinkEvent::FrameNumber(3)));

        assert!(sinks.remove("mem"));
        assert_eq!(log.events().last(), Some(&SinkEvent::Shutdown));
        assert!(!sinks.remove("mem"));
    }
}
