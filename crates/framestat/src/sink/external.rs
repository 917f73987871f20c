//! Out-of-process profiler integration.
//!
//! Both the sink and the named-event hook emit `tracing` events on the
//! `framestat::external` target at trace level. A subscriber layer feeding an
//! external profiler picks them up; nothing is emitted when no subscriber
//! enables the target.

use framestat_core::{GroupId, StatId, StatKind};
use hashbrown::HashMap;

use super::protocol::CycleSample;
use super::StatSink;

/// `tracing` target of every external-profiler event.
pub const EXTERNAL_TARGET: &str = "framestat::external";

/// Receives begin/end markers for every timed scope.
pub trait NamedEvents: Send + Sync {
    fn begin(&self, name: &str);
    fn end(&self);
}

/// [`NamedEvents`] emitted as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNamedEvents;

impl NamedEvents for TracingNamedEvents {
    fn begin(&self, name: &str) {
        tracing::trace!(target: EXTERNAL_TARGET, name, "begin");
    }

    fn end(&self) {
        tracing::trace!(target: EXTERNAL_TARGET, "end");
    }
}

/// Publishes the described names and per-frame values as `tracing` events.
#[derive(Debug, Default)]
pub struct ExternalProfilerSink {
    names: HashMap<StatId, String>,
    frame: u32,
}

impl ExternalProfilerSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn name_of(&self, stat: StatId) -> &str {
        self.names.get(&stat).map_or("?", String::as_str)
    }
}

impl StatSink for ExternalProfilerSink {
    fn name(&self) -> &str {
        "external"
    }

    fn start_descriptions(&mut self) {
        self.names.clear();
    }

    fn add_group_description(&mut self, group: GroupId, name: &str) {
        tracing::trace!(target: EXTERNAL_TARGET, group = group.0, name, "group");
    }

    fn add_stat_description(&mut self, stat: StatId, name: &str, kind: StatKind, group: GroupId) {
        tracing::trace!(
            target: EXTERNAL_TARGET,
            stat = stat.0,
            group = group.0,
            kind = kind.label(),
            name,
            "stat"
        );
        self.names.insert(stat, name.to_owned());
    }

    fn set_frame_number(&mut self, frame: u32) {
        self.frame = frame;
    }

    fn write_cycle(&mut self, sample: &CycleSample) {
        tracing::trace!(
            target: EXTERNAL_TARGET,
            frame = self.frame,
            name = self.name_of(sample.stat),
            thread = sample.thread.0,
            cycles = sample.inclusive_cycles,
            calls = sample.calls,
            "cycle"
        );
    }

    fn write_float(&mut self, stat: StatId, _group: GroupId, value: f32) {
        tracing::trace!(
            target: EXTERNAL_TARGET,
            frame = self.frame,
            name = self.name_of(stat),
            value,
            "value"
        );
    }

    fn write_dword(&mut self, stat: StatId, _group: GroupId, value: u32) {
        tracing::trace!(
            target: EXTERNAL_TARGET,
            frame = self.frame,
            name = self.name_of(stat),
            value,
            "value"
        );
    }
}

/// Attaches an [`ExternalProfilerSink`] to every manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExternalProfilerSinkFactory;

impl super::SinkFactory for ExternalProfilerSinkFactory {
    fn create(&self, _config: &crate::StatsConfig) -> Option<Box<dyn StatSink>> {
        Some(Box::new(ExternalProfilerSink::new()))
    }
}
