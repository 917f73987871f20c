//! Sink that records its call stream in memory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use framestat_core::{GroupId, StatId, StatKind};
use parking_lot::Mutex;

use super::protocol::CycleSample;
use super::StatSink;

/// One call received by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    StartDescriptions,
    StartGroupDescriptions,
    Group {
        id: GroupId,
        name: String,
    },
    EndGroupDescriptions,
    StartStatDescriptions,
    Stat {
        id: StatId,
        name: String,
        kind: StatKind,
        group: GroupId,
    },
    EndStatDescriptions,
    EndDescriptions,
    FrameNumber(u32),
    Cycle(CycleSample),
    Float {
        stat: StatId,
        group: GroupId,
        value: f32,
    },
    Dword {
        stat: StatId,
        group: GroupId,
        value: u32,
    },
    EndFrame,
    Shutdown,
}

impl SinkEvent {
    /// Stat written or described by this event.
    #[must_use]
    pub const fn stat(&self) -> Option<StatId> {
        match self {
            Self::Stat { id, .. } => Some(*id),
            Self::Cycle(sample) => Some(sample.stat),
            Self::Float { stat, .. } | Self::Dword { stat, .. } => Some(*stat),
            _ => None,
        }
    }
}

/// Shared handle onto a [`MemorySink`]'s log.
#[derive(Debug, Clone, Default)]
pub struct MemorySinkLog {
    events: Arc<Mutex<Vec<SinkEvent>>>,
    inactive: Arc<AtomicBool>,
}

impl MemorySinkLog {
    /// Copy of every event received so far.
    #[must_use]
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    /// Drop the recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Make the sink report itself active or not.
    pub fn set_active(&self, active: bool) {
        self.inactive.store(!active, Ordering::Relaxed);
    }

    /// Samples written for `frame`.
    #[must_use]
    pub fn frame_events(&self, frame: u32) -> Vec<SinkEvent> {
        let events = self.events.lock();
        let mut inside = false;
        let mut out = Vec::new();
        for event in events.iter() {
            match event {
                SinkEvent::FrameNumber(n) => inside = *n == frame,
                SinkEvent::EndFrame => inside = false,
                _ if inside => out.push(event.clone()),
                _ => {}
            }
        }
        out
    }
}

/// In-memory sink.
#[derive(Debug)]
pub struct MemorySink {
    name: String,
    log: MemorySinkLog,
}

impl MemorySink {
    /// Create a sink and a handle onto what it records.
    #[must_use]
    pub fn new(name: &str) -> (Self, MemorySinkLog) {
        let log = MemorySinkLog::default();
        (
            Self {
                name: name.to_owned(),
                log: log.clone(),
            },
            log,
        )
    }

    fn push(&self, event: SinkEvent) {
        self.log.events.lock().push(event);
    }
}

impl StatSink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        !self.log.inactive.load(Ordering::Relaxed)
    }

    fn start_descriptions(&mut self) {
        self.push(SinkEvent::StartDescriptions);
    }

    fn start_group_descriptions(&mut self) {
        self.push(SinkEvent::StartGroupDescriptions);
    }

    fn add_group_description(&mut self, group: GroupId, name: &str) {
        self.push(SinkEvent::Group {
            id: group,
            name: name.to_owned(),
        });
    }

    fn end_group_descriptions(&mut self) {
        self.push(SinkEvent::EndGroupDescriptions);
    }

    fn start_stat_descriptions(&mut self) {
        self.push(SinkEvent::StartStatDescriptions);
    }

    fn add_stat_description(&mut self, stat: StatId, name: &str, kind: StatKind, group: GroupId) {
        self.push(SinkEvent::Stat {
            id: stat,
            name: name.to_owned(),
            kind,
            group,
        });
    }

    fn end_stat_descriptions(&mut self) {
        self.push(SinkEvent::EndStatDescriptions);
    }

    fn end_descriptions(&mut self) {
        self.push(SinkEvent::EndDescriptions);
    }

    fn set_frame_number(&mut self, frame: u32) {
        self.push(SinkEvent::FrameNumber(frame));
    }

    fn write_cycle(&mut self, sample: &CycleSample) {
        self.push(SinkEvent::Cycle(*sample));
    }

    fn write_float(&mut self, stat: StatId, group: GroupId, value: f32) {
        self.push(SinkEvent::Float { stat, group, value });
    }

    fn write_dword(&mut self, stat: StatId, group: GroupId, value: u32) {
        self.push(SinkEvent::Dword { stat, group, value });
    }

    fn end_frame(&mut self) {
        self.push(SinkEvent::EndFrame);
    }

    fn shutdown(&mut self) {
        self.push(SinkEvent::Shutdown);
    }
}
