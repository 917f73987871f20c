//! Startup registration of groups, stats and sink factories.
//!
//! Every module that owns stats declares them on a [`Registry`] before the
//! manager is built. Nothing is instantiated here: the manager walks the
//! declarations once during construction.

use std::sync::Arc;

use framestat_core::{Error, GroupId, MemoryRegion, Result, StatId, StatKind, ThreadIndex};
use hashbrown::HashSet;

use crate::accumulator::{
    DwordAccumulator, DwordCounter, FloatAccumulator, FloatCounter, MemoryGauge, StatInfo,
    ValueStat,
};
use crate::cycle::CycleNode;
use crate::sink::SinkFactory;

/// A declared group.
#[derive(Debug, Clone)]
pub struct GroupDecl {
    pub name: String,
    pub group_id: GroupId,
}

/// A declared stat.
#[derive(Debug, Clone)]
pub struct StatDecl {
    pub name: String,
    pub stat_id: StatId,
    pub group_id: GroupId,
    pub kind: StatKind,
    /// Region of a memory stat.
    pub region: MemoryRegion,
    /// Keep reporting a memory stat while it reads zero.
    pub show_when_zero: bool,
    /// Skip histories for a cycle stat.
    pub offline_only: bool,
}

/// Pending declarations, consumed by the manager.
pub struct Registry {
    groups: Vec<GroupDecl>,
    stats: Vec<StatDecl>,
    group_ids: HashSet<GroupId>,
    stat_ids: HashSet<StatId>,
    sink_factories: Vec<Box<dyn SinkFactory>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("groups", &self.groups)
            .field("stats", &self.stats)
            .field("sink_factories", &self.sink_factories.len())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a registry holding the built-in groups and stats.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            groups: Vec::new(),
            stats: Vec::new(),
            group_ids: HashSet::new(),
            stat_ids: HashSet::new(),
            sink_factories: Vec::new(),
        };
        registry.push_builtins();
        registry
    }

    fn push_builtins(&mut self) {
        let builtins = [
            GroupDecl {
                name: "Default".into(),
                group_id: GroupId::DEFAULT,
            },
            GroupDecl {
                name: "StatSystem".into(),
                group_id: GroupId::STAT_SYSTEM,
            },
        ];
        for group in builtins {
            self.group_ids.insert(group.group_id);
            self.groups.push(group);
        }
        for (name, stat_id, group_id, kind) in [
            (
                "FrameTime",
                StatId::FRAME_TIME,
                GroupId::DEFAULT,
                StatKind::CycleCounter,
            ),
            (
                "TimingCodeCalls",
                StatId::TIMING_CODE_CALLS,
                GroupId::STAT_SYSTEM,
                StatKind::DwordCounter,
            ),
        ] {
            self.stat_ids.insert(stat_id);
            self.stats.push(StatDecl {
                name: name.into(),
                stat_id,
                group_id,
                kind,
                region: MemoryRegion::Physical,
                show_when_zero: false,
                offline_only: false,
            });
        }
    }

    /// Declare a group.
    pub fn declare_group(&mut self, name: &str, group_id: GroupId) -> Result<&mut Self> {
        if !self.group_ids.insert(group_id) {
            return Err(Error::DuplicateGroup(group_id));
        }
        self.groups.push(GroupDecl {
            name: name.to_owned(),
            group_id,
        });
        Ok(self)
    }

    /// Declare a stat. Prefer the kind-specific helpers.
    pub fn declare(&mut self, decl: StatDecl) -> Result<&mut Self> {
        let id = decl.stat_id;
        if id == StatId::ERROR || id == StatId::ROOT || id.is_dynamic() {
            return Err(Error::ReservedStat(id));
        }
        if !self.stat_ids.insert(id) {
            return Err(Error::DuplicateStat(id));
        }
        self.stats.push(decl);
        Ok(self)
    }

    fn declare_kind(
        &mut self,
        name: &str,
        stat_id: StatId,
        group_id: GroupId,
        kind: StatKind,
    ) -> Result<&mut Self> {
        self.declare(StatDecl {
            name: name.to_owned(),
            stat_id,
            group_id,
            kind,
            region: MemoryRegion::Physical,
            show_when_zero: false,
            offline_only: false,
        })
    }

    /// Declare a cycle stat.
    pub fn declare_cycle_stat(
        &mut self,
        name: &str,
        stat_id: StatId,
        group_id: GroupId,
    ) -> Result<&mut Self> {
        self.declare_kind(name, stat_id, group_id, StatKind::CycleCounter)
    }

    /// Declare a cycle stat whose nodes keep no history.
    pub fn declare_offline_cycle_stat(
        &mut self,
        name: &str,
        stat_id: StatId,
        group_id: GroupId,
    ) -> Result<&mut Self> {
        self.declare(StatDecl {
            name: name.to_owned(),
            stat_id,
            group_id,
            kind: StatKind::CycleCounter,
            region: MemoryRegion::Physical,
            show_when_zero: false,
            offline_only: true,
        })
    }

    /// Declare an integer counter.
    pub fn declare_dword_counter(
        &mut self,
        name: &str,
        stat_id: StatId,
        group_id: GroupId,
    ) -> Result<&mut Self> {
        self.declare_kind(name, stat_id, group_id, StatKind::DwordCounter)
    }

    /// Declare a float counter.
    pub fn declare_float_counter(
        &mut self,
        name: &str,
        stat_id: StatId,
        group_id: GroupId,
    ) -> Result<&mut Self> {
        self.declare_kind(name, stat_id, group_id, StatKind::FloatCounter)
    }

    /// Declare an integer accumulator.
    pub fn declare_dword_accumulator(
        &mut self,
        name: &str,
        stat_id: StatId,
        group_id: GroupId,
    ) -> Result<&mut Self> {
        self.declare_kind(name, stat_id, group_id, StatKind::DwordAccumulator)
    }

    /// Declare a float accumulator.
    pub fn declare_float_accumulator(
        &mut self,
        name: &str,
        stat_id: StatId,
        group_id: GroupId,
    ) -> Result<&mut Self> {
        self.declare_kind(name, stat_id, group_id, StatKind::FloatAccumulator)
    }

    /// Declare a memory gauge.
    pub fn declare_memory_stat(
        &mut self,
        name: &str,
        stat_id: StatId,
        group_id: GroupId,
        region: MemoryRegion,
        show_when_zero: bool,
    ) -> Result<&mut Self> {
        self.declare(StatDecl {
            name: name.to_owned(),
            stat_id,
            group_id,
            kind: StatKind::MemoryCounter,
            region,
            show_when_zero,
            offline_only: false,
        })
    }

    /// Register a factory producing a sink at manager construction.
    pub fn add_sink_factory(&mut self, factory: Box<dyn SinkFactory>) -> &mut Self {
        self.sink_factories.push(factory);
        self
    }

    /// Declared groups in declaration order.
    #[must_use]
    pub fn groups(&self) -> &[GroupDecl] {
        &self.groups
    }

    /// Declared stats in declaration order.
    #[must_use]
    pub fn stats(&self) -> &[StatDecl] {
        &self.stats
    }

    pub(crate) fn into_parts(self) -> (Vec<GroupDecl>, Vec<StatDecl>, Vec<Box<dyn SinkFactory>>) {
        (self.groups, self.stats, self.sink_factories)
    }
}

/// Sole creator of the instances of one stat.
#[derive(Debug)]
pub struct StatFactory {
    name: Arc<str>,
    stat_id: StatId,
    group_id: GroupId,
    kind: StatKind,
    region: MemoryRegion,
    show_when_zero: bool,
    offline_only: bool,
}

impl StatFactory {
    pub(crate) fn from_decl(decl: &StatDecl) -> Self {
        Self {
            name: Arc::from(decl.name.as_str()),
            stat_id: decl.stat_id,
            group_id: decl.group_id,
            kind: decl.kind,
            region: decl.region,
            show_when_zero: decl.show_when_zero,
            offline_only: decl.offline_only,
        }
    }

    /// Factory for a cycle stat named at runtime.
    pub(crate) fn dynamic(name: &str, stat_id: StatId, group_id: GroupId) -> Self {
        Self {
            name: Arc::from(name),
            stat_id,
            group_id,
            kind: StatKind::CycleCounter,
            region: MemoryRegion::Physical,
            show_when_zero: false,
            offline_only: false,
        }
    }

    /// Display name of the stat.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the stat.
    pub fn stat_id(&self) -> StatId {
        self.stat_id
    }

    /// Id of the owning group.
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Kind of the stat.
    pub fn kind(&self) -> StatKind {
        self.kind
    }

    fn info(&self) -> StatInfo {
        StatInfo::new(Arc::clone(&self.name), self.stat_id, self.group_id)
    }

    /// Create a cycle node; `None` for non-cycle stats.
    pub(crate) fn create_cycle_node(
        &self,
        thread: ThreadIndex,
        parent: Option<&Arc<CycleNode>>,
        instance_id: u32,
    ) -> Option<CycleNode> {
        (self.kind == StatKind::CycleCounter).then(|| {
            CycleNode::new(self.info(), thread, parent, instance_id, self.offline_only)
        })
    }

    /// Create the non-cycle instance; `None` for cycle stats.
    pub(crate) fn create_value_stat(&self) -> Option<ValueStat> {
        let info = self.info();
        Some(match self.kind {
            StatKind::CycleCounter => return None,
            StatKind::FloatAccumulator => {
                ValueStat::FloatAccumulator(Arc::new(FloatAccumulator::new(info)))
            }
            StatKind::DwordAccumulator => {
                ValueStat::DwordAccumulator(Arc::new(DwordAccumulator::new(info)))
            }
            StatKind::FloatCounter => ValueStat::FloatCounter(Arc::new(FloatCounter::new(info))),
            StatKind::DwordCounter => ValueStat::DwordCounter(Arc::new(DwordCounter::new(info))),
            StatKind::MemoryCounter => ValueStat::Memory(Arc::new(MemoryGauge::new(
                info,
                self.region,
                self.show_when_zero,
            ))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_present() {
        let registry = Registry::new();
        assert!(registry
            .groups()
            .iter()
            .any(|g| g.group_id == GroupId::DEFAULT));
        assert!(registry
            .stats()
            .iter()
            .any(|s| s.stat_id == StatId::FRAME_TIME && s.kind == StatKind::CycleCounter));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = Registry::new();
        registry.declare_group("Game", GroupId::GAME).unwrap();
        assert!(matches!(
            registry.declare_group("Game again", GroupId::GAME),
            Err(Error::DuplicateGroup(GroupId::GAME))
        ));

        registry
            .declare_cycle_stat("Tick", StatId(300), GroupId::GAME)
            .unwrap();
        assert!(matches!(
            registry.declare_dword_counter("Other", StatId(300), GroupId::GAME),
            Err(Error::DuplicateStat(StatId(300)))
        ));
    }

    #[test]
    fn reserved_ids_are_rejected_as_reserved() {
        let mut registry = Registry::new();
        registry.declare_group("Game", GroupId::GAME).unwrap();
        for id in [
            StatId::ERROR,
            StatId::ROOT,
            StatId::FIRST_DYNAMIC,
            StatId(StatId::FIRST_DYNAMIC.0 + 17),
            StatId::LAST_DYNAMIC,
        ] {
            assert!(
                matches!(
                    registry.declare_cycle_stat("Reserved", id, GroupId::GAME),
                    Err(Error::ReservedStat(found)) if found == id
                ),
                "{id} should be reserved"
            );
        }
        // Just past the runtime range is an ordinary id.
        registry
            .declare_cycle_stat("After", StatId(StatId::LAST_DYNAMIC.0 + 1), GroupId::GAME)
            .unwrap();
    }

    #[test]
    fn factory_creates_matching_instances() {
        let decl = StatDecl {
            name: "Textures".into(),
            stat_id: StatId(1000),
            group_id: GroupId::MEMORY,
            kind: StatKind::MemoryCounter,
            region: MemoryRegion::TexturePool1,
            show_when_zero: true,
            offline_only: false,
        };
        let factory = StatFactory::from_decl(&decl);
        assert!(factory
            .create_cycle_node(ThreadIndex(1), None, 1)
            .is_none());
        match factory.create_value_stat() {
            Some(ValueStat::Memory(gauge)) => {
                assert_eq!(gauge.region(), MemoryRegion::TexturePool1);
                assert!(gauge.show_when_zero());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
