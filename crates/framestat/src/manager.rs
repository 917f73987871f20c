//! The stats manager: scope engine, frame advance and sink broadcast.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use framestat_core::{Error, GroupId, MemoryRegion, Result, StatId, StatKind, ThreadIndex};
use hashbrown::{HashMap, HashSet};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::accumulator::{name_key, DwordCell, DwordCounter, FloatCell, StatCell, StatInfo, ValueStat};
use crate::clock::{CycleClock, SystemClock};
use crate::config::StatsConfig;
use crate::cycle::{self, CycleNode};
use crate::group::StatGroup;
use crate::history::FpsCounter;
use crate::hud::{DisplaySettings, RenderMode};
use crate::registry::{Registry, StatFactory};
use crate::scope::ActiveScope;
use crate::sink::capture::{CaptureHeader, CaptureSink, CAPTURE_FORMAT_VERSION};
use crate::sink::protocol::{
    CycleSample, DescriptionBlock, FrameRecord, GroupDescription, StatDescription, StatSample,
};
use crate::sink::{NamedEvents, SinkManager, StatSink};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default)]
struct FrameState {
    fps: FpsCounter,
    last_frame_cycles: Option<u32>,
}

#[derive(Debug)]
struct DynamicStats {
    by_key: HashMap<String, StatId>,
    factories: HashMap<StatId, Arc<StatFactory>>,
    next: u32,
    exhausted: bool,
}

/// Owns every group and stat and drives the per-frame cycle.
///
/// Sampling calls (`start_scope`, value mutations) never block on another
/// thread's sampling and never log. The frame advance, sinks and commands
/// take short locks.
pub struct StatManager {
    id: u64,
    clock: Arc<dyn CycleClock>,
    groups: Vec<Arc<StatGroup>>,
    group_index: HashMap<GroupId, usize>,
    group_keys: HashMap<String, usize>,
    factories: HashMap<StatId, Arc<StatFactory>>,
    stat_keys: HashMap<String, StatId>,
    values: HashMap<StatId, ValueStat>,
    dynamic: RwLock<DynamicStats>,
    roots: Mutex<Vec<Arc<CycleNode>>>,
    next_instance: AtomicU32,
    frame_time: Arc<CycleNode>,
    timing_calls: Option<Arc<DwordCounter>>,
    frame: Mutex<FrameState>,
    frame_number: Mutex<u32>,
    frame_ready: Condvar,
    sinks: Mutex<SinkManager>,
    sinks_listening: AtomicBool,
    force_enabled: AtomicBool,
    rendered_groups: AtomicUsize,
    non_grouped_mode: AtomicBool,
    named_events: RwLock<Option<Arc<dyn NamedEvents>>>,
    named_events_enabled: AtomicBool,
    display: RwLock<DisplaySettings>,
    active_set: Mutex<Option<String>>,
    config: RwLock<StatsConfig>,
    config_path: Option<PathBuf>,
    available_memory: [AtomicU32; MemoryRegion::COUNT],
}

impl std::fmt::Debug for StatManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatManager")
            .field("id", &self.id)
            .field("groups", &self.groups.len())
            .field("stats", &self.factories.len())
            .field("frame", &self.frame_number())
            .finish_non_exhaustive()
    }
}

impl StatManager {
    /// Build every group and stat from `registry`.
    ///
    /// Fails on a stat declared for an unknown group.
    pub fn new(registry: Registry, config: StatsConfig, clock: Arc<dyn CycleClock>) -> Result<Self> {
        let (group_decls, stat_decls, sink_factories) = registry.into_parts();

        let group_ids: HashSet<GroupId> = group_decls.iter().map(|g| g.group_id).collect();
        if let Some(stat) = stat_decls.iter().find(|s| !group_ids.contains(&s.group_id)) {
            return Err(Error::UnknownGroup {
                stat: stat.stat_id,
                group: stat.group_id,
            });
        }

        let next_instance = AtomicU32::new(1);
        let mut factories = HashMap::new();
        let mut stat_keys = HashMap::new();
        let mut values = HashMap::new();
        let mut members: HashMap<GroupId, (Vec<ValueStat>, Vec<Arc<CycleNode>>)> = HashMap::new();
        for decl in &stat_decls {
            let factory = Arc::new(StatFactory::from_decl(decl));
            let entry = members.entry(decl.group_id).or_default();
            if let Some(value) = factory.create_value_stat() {
                values.insert(decl.stat_id, value.clone());
                entry.0.push(value);
            } else if let Some(node) = factory.create_cycle_node(
                ThreadIndex::CANONICAL,
                None,
                next_instance.fetch_add(1, Ordering::Relaxed),
            ) {
                entry.1.push(Arc::new(node));
            }
            stat_keys.insert(name_key(&decl.name), decl.stat_id);
            factories.insert(decl.stat_id, factory);
        }

        let mut group_decls = group_decls;
        group_decls.sort_by_key(|g| g.group_id);
        let mut groups = Vec::with_capacity(group_decls.len());
        let mut group_index = HashMap::new();
        let mut group_keys = HashMap::new();
        for decl in group_decls {
            let (group_values, canonical) = members.remove(&decl.group_id).unwrap_or_default();
            group_index.insert(decl.group_id, groups.len());
            group_keys.insert(name_key(&decl.name), groups.len());
            groups.push(Arc::new(StatGroup::new(
                Arc::from(decl.name.as_str()),
                decl.group_id,
                config.is_net_enabled(&decl.name),
                group_values,
                canonical,
            )));
        }

        let frame_time = group_index
            .get(&GroupId::DEFAULT)
            .and_then(|&i| groups[i].canonical(StatId::FRAME_TIME))
            .ok_or(Error::UnknownStat(StatId::FRAME_TIME))?;
        let timing_calls = match values.get(&StatId::TIMING_CODE_CALLS) {
            Some(ValueStat::DwordCounter(counter)) => Some(Arc::clone(counter)),
            _ => None,
        };

        let manager = Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            clock,
            groups,
            group_index,
            group_keys,
            factories,
            stat_keys,
            values,
            dynamic: RwLock::new(DynamicStats {
                by_key: HashMap::new(),
                factories: HashMap::new(),
                next: StatId::FIRST_DYNAMIC.0,
                exhausted: false,
            }),
            roots: Mutex::new(Vec::new()),
            next_instance,
            frame_time,
            timing_calls,
            frame: Mutex::new(FrameState::default()),
            frame_number: Mutex::new(0),
            frame_ready: Condvar::new(),
            sinks: Mutex::new(SinkManager::new()),
            sinks_listening: AtomicBool::new(false),
            force_enabled: AtomicBool::new(false),
            rendered_groups: AtomicUsize::new(0),
            non_grouped_mode: AtomicBool::new(false),
            named_events: RwLock::new(None),
            named_events_enabled: AtomicBool::new(false),
            display: RwLock::new(DisplaySettings::from_config(&config)),
            active_set: Mutex::new(None),
            config: RwLock::new(config),
            config_path: None,
            available_memory: std::array::from_fn(|_| AtomicU32::new(0)),
        };

        {
            let mut sinks = manager.sinks.lock();
            sinks.set_descriptions(manager.build_descriptions());
            let config = manager.config.read();
            for factory in &sink_factories {
                if let Some(sink) = factory.create(&config) {
                    sinks.add(sink);
                }
            }
        }

        tracing::info!(
            "Stats manager initialized: {} groups, {} stats",
            manager.groups.len(),
            manager.factories.len()
        );
        Ok(manager)
    }

    /// Build with the system clock.
    pub fn with_system_clock(registry: Registry, config: StatsConfig) -> Result<Self> {
        Self::new(registry, config, Arc::new(SystemClock::new()))
    }

    /// Persist configuration changes (saved sets) to `path`.
    #[must_use]
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    // ---------------------------------------------------------------------
    // Lookups

    /// Every group, ordered by id.
    pub fn groups(&self) -> &[Arc<StatGroup>] {
        &self.groups
    }

    /// Group with id `group`.
    pub fn group(&self, group: GroupId) -> Option<&Arc<StatGroup>> {
        self.group_index.get(&group).map(|&i| &self.groups[i])
    }

    /// Group named `name`, case-insensitively.
    pub fn group_by_name(&self, name: &str) -> Option<&Arc<StatGroup>> {
        self.group_keys.get(&name_key(name)).map(|&i| &self.groups[i])
    }

    /// Factory of `stat`, declared or dynamic.
    pub fn factory(&self, stat: StatId) -> Option<Arc<StatFactory>> {
        self.factories
            .get(&stat)
            .cloned()
            .or_else(|| self.dynamic.read().factories.get(&stat).cloned())
    }

    /// Stat named `name`, case-insensitively.
    pub fn stat_id_by_name(&self, name: &str) -> Option<StatId> {
        let key = name_key(name);
        self.stat_keys
            .get(&key)
            .copied()
            .or_else(|| self.dynamic.read().by_key.get(&key).copied())
    }

    /// Non-cycle stat `stat`.
    pub fn value_stat(&self, stat: StatId) -> Option<&ValueStat> {
        self.values.get(&stat)
    }

    /// Non-cycle stat `stat`, checked against `kind`.
    pub fn typed_value_stat(&self, stat: StatId, kind: StatKind) -> Result<&ValueStat> {
        let value = self.values.get(&stat).ok_or(Error::UnknownStat(stat))?;
        if value.kind() == kind {
            Ok(value)
        } else {
            Err(Error::KindMismatch {
                stat,
                expected: kind,
                found: value.kind(),
            })
        }
    }

    /// The calling thread's node for `stat` under `thread`, if created.
    pub fn cycle_stat(&self, stat: StatId, thread: ThreadIndex) -> Option<Arc<CycleNode>> {
        let group = self.group(self.factory(stat)?.group_id())?;
        group
            .cycle_nodes()
            .into_iter()
            .find(|node| node.stat_id() == stat && node.thread() == thread)
    }

    /// Root of the calling thread's tree, if it has sampled.
    pub fn thread_root(&self) -> Option<Arc<CycleNode>> {
        cycle::thread_root(self.id)
    }

    /// Roots of every thread that has sampled.
    pub fn roots(&self) -> Vec<Arc<CycleNode>> {
        self.roots.lock().clone()
    }

    /// Clock used for scope timing.
    pub fn clock(&self) -> &dyn CycleClock {
        self.clock.as_ref()
    }

    /// Seconds per clock cycle.
    pub fn seconds_per_cycle(&self) -> f64 {
        self.clock.seconds_per_cycle()
    }

    // ---------------------------------------------------------------------
    // Cycle scopes

    fn next_instance(&self) -> u32 {
        self.next_instance.fetch_add(1, Ordering::Relaxed)
    }

    fn create_root(&self) -> Arc<CycleNode> {
        let info = StatInfo::new(Arc::from("Root"), StatId::ROOT, GroupId::DEFAULT);
        let root = Arc::new(CycleNode::new(
            info,
            ThreadIndex::current(),
            None,
            self.next_instance(),
            false,
        ));
        self.roots.lock().push(Arc::clone(&root));
        root
    }

    fn create_child(&self, parent: &Arc<CycleNode>, stat: StatId) -> Option<Arc<CycleNode>> {
        let factory = self.factory(stat)?;
        let Some(node) =
            factory.create_cycle_node(parent.thread(), Some(parent), self.next_instance())
        else {
            debug_assert!(false, "{stat} is not a cycle stat");
            return None;
        };
        let node = Arc::new(node);
        parent.insert_child(Arc::clone(&node));
        if let Some(group) = self.group(factory.group_id()) {
            group.add_cycle_node(Arc::clone(&node));
        }
        Some(node)
    }

    /// The node `stat` resolves to under the calling thread's current node.
    /// Direct recursion resolves to the current node itself.
    #[inline]
    fn resolve(&self, stat: StatId) -> Option<Arc<CycleNode>> {
        if stat == StatId::ERROR || stat == StatId::ROOT {
            return None;
        }
        let current = cycle::current_node(self.id, || self.create_root());
        if current.stat_id() == stat {
            return Some(current);
        }
        if let Some(child) = cycle::thread_child(self.id, &current, stat) {
            return Some(child);
        }
        let child = self.create_child(&current, stat)?;
        cycle::remember_child(self.id, &current, &child);
        Some(child)
    }

    /// Enter a scope for `stat` on the calling thread.
    #[inline]
    pub(crate) fn start_scope(&self, stat: StatId) -> Option<ActiveScope> {
        let node = self.resolve(stat)?;
        if node.enter() > 1 {
            return Some(ActiveScope { node, start: 0 });
        }
        cycle::set_current(self.id, Arc::clone(&node));
        if self.named_events_enabled.load(Ordering::Relaxed) {
            if let Some(events) = self.named_events.read().as_ref() {
                events.begin(node.info().name());
            }
        }
        let start = self.clock.cycles();
        Some(ActiveScope { node, start })
    }

    /// Leave a scope opened by [`Self::start_scope`].
    #[inline]
    pub(crate) fn stop_scope(&self, scope: ActiveScope) {
        let now = self.clock.cycles();
        if !scope.node.exit() {
            return;
        }
        scope.node.record(now.wrapping_sub(scope.start));
        if let Some(parent) = scope.node.parent() {
            cycle::set_current(self.id, parent);
        }
        if self.named_events_enabled.load(Ordering::Relaxed) {
            if let Some(events) = self.named_events.read().as_ref() {
                events.end();
            }
        }
    }

    /// Overwrite this frame's totals of `stat` under the calling thread's
    /// current node, for timings measured elsewhere.
    pub fn set_cycle_counter(&self, stat: StatId, cycles: u32, calls: u32) {
        if let Some(node) = self.resolve(stat) {
            node.set_frame(cycles, calls);
        }
    }

    /// Whether conditional scopes time this frame.
    #[inline]
    pub fn scopes_enabled(&self) -> bool {
        self.rendered_groups.load(Ordering::Relaxed) > 0
            || self.non_grouped_mode.load(Ordering::Relaxed)
            || self.force_enabled.load(Ordering::Relaxed)
            || self.sinks_listening.load(Ordering::Relaxed)
    }

    /// Force conditional scopes on.
    pub fn set_force_enabled(&self, enabled: bool) {
        self.force_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Whether conditional scopes are forced on.
    pub fn force_enabled(&self) -> bool {
        self.force_enabled.load(Ordering::Relaxed)
    }

    /// Install or clear the named-event hook.
    pub fn set_named_events(&self, events: Option<Arc<dyn NamedEvents>>) {
        let enabled = events.is_some();
        *self.named_events.write() = events;
        self.named_events_enabled.store(enabled, Ordering::Relaxed);
    }

    // ---------------------------------------------------------------------
    // Dynamic stats

    /// Id of the cycle stat named `name` in `group`, created on first use.
    ///
    /// Returns [`StatId::ERROR`] once the dynamic range is used up or when
    /// the group is unknown. The stat joins the canonical set and the sink
    /// descriptions at the next frame advance.
    pub fn find_stat_id_for_string(&self, name: &str, group: GroupId) -> StatId {
        let Some(target) = self.group(group) else {
            debug_assert!(false, "dynamic stat {name} for unknown {group}");
            return StatId::ERROR;
        };
        let key = name_key(name);
        if let Some(&stat) = self.dynamic.read().by_key.get(&key) {
            return stat;
        }

        let mut dynamic = self.dynamic.write();
        if let Some(&stat) = dynamic.by_key.get(&key) {
            return stat;
        }
        if dynamic.next > StatId::LAST_DYNAMIC.0 {
            if !dynamic.exhausted {
                dynamic.exhausted = true;
                tracing::warn!("Dynamic stat range exhausted; '{}' will not be sampled", name);
            }
            return StatId::ERROR;
        }
        let stat = StatId(dynamic.next);
        dynamic.next += 1;

        let factory = Arc::new(StatFactory::dynamic(name, stat, group));
        if let Some(node) = factory.create_cycle_node(ThreadIndex::CANONICAL, None, self.next_instance()) {
            target.queue_canonical(Arc::new(node));
        }
        dynamic.by_key.insert(key, stat);
        dynamic.factories.insert(stat, factory);
        stat
    }

    // ---------------------------------------------------------------------
    // Values

    fn dword_cell(&self, stat: StatId) -> Option<&DwordCell> {
        let value = self.values.get(&stat)?;
        debug_assert!(value.kind().is_dword(), "{stat} is not an integer stat");
        value.dword_cell()
    }

    fn float_cell(&self, stat: StatId) -> Option<&FloatCell> {
        let value = self.values.get(&stat)?;
        debug_assert!(value.kind().is_float(), "{stat} is not a float stat");
        value.float_cell()
    }

    /// Add to an integer stat.
    #[inline]
    pub fn increment_dword(&self, stat: StatId, by: u32) {
        if let Some(cell) = self.dword_cell(stat) {
            cell.increment(by);
        }
    }

    /// Subtract from an integer stat.
    #[inline]
    pub fn decrement_dword(&self, stat: StatId, by: u32) {
        if let Some(cell) = self.dword_cell(stat) {
            cell.decrement(by);
        }
    }

    /// Overwrite an integer stat.
    #[inline]
    pub fn set_dword(&self, stat: StatId, value: u32) {
        if let Some(cell) = self.dword_cell(stat) {
            cell.set(value);
        }
    }

    /// Add to a float stat.
    pub fn increment_float(&self, stat: StatId, by: f32) {
        if let Some(cell) = self.float_cell(stat) {
            cell.increment(by);
        }
    }

    /// Subtract from a float stat.
    pub fn decrement_float(&self, stat: StatId, by: f32) {
        if let Some(cell) = self.float_cell(stat) {
            cell.decrement(by);
        }
    }

    /// Overwrite a float stat.
    pub fn set_float(&self, stat: StatId, value: f32) {
        if let Some(cell) = self.float_cell(stat) {
            cell.set(value);
        }
    }

    /// Live value of an integer stat, 0 when unknown.
    pub fn dword_value(&self, stat: StatId) -> u32 {
        self.values
            .get(&stat)
            .and_then(ValueStat::dword_cell)
            .map_or(0, StatCell::get)
    }

    /// Live value of a float stat, 0 when unknown.
    pub fn float_value(&self, stat: StatId) -> f32 {
        self.values
            .get(&stat)
            .and_then(ValueStat::float_cell)
            .map_or(0.0, StatCell::get)
    }

    /// Bytes available in `region`, for percentages on the HUD.
    pub fn set_available_memory(&self, region: MemoryRegion, bytes: u32) {
        self.available_memory[region.index()].store(bytes, Ordering::Relaxed);
    }

    /// Bytes available in `region`; 0 when never set.
    pub fn available_memory(&self, region: MemoryRegion) -> u32 {
        self.available_memory[region.index()].load(Ordering::Relaxed)
    }

    // ---------------------------------------------------------------------
    // Visibility and display

    /// Show or hide every instance of `stat`. Returns false for unknown stats.
    pub fn set_stat_visibility(&self, stat: StatId, visible: bool) -> bool {
        let Some(group) = self.factory(stat).and_then(|f| self.group(f.group_id()).cloned()) else {
            return false;
        };
        group.for_each_instance(stat, |info| info.set_visible(visible));
        true
    }

    /// Whether the first instance of `stat` is visible.
    pub fn is_stat_visible(&self, stat: StatId) -> bool {
        let Some(group) = self.factory(stat).and_then(|f| self.group(f.group_id()).cloned()) else {
            return false;
        };
        let mut visible = false;
        let mut first = true;
        group.for_each_instance(stat, |info| {
            if first {
                visible = info.is_visible();
                first = false;
            }
        });
        visible
    }

    /// Show or hide a group. Showing a group makes all its stats visible.
    pub fn set_group_visible(&self, group: GroupId, visible: bool) -> bool {
        let Some(target) = self.group(group) else {
            return false;
        };
        let was = target.set_visible(visible);
        if visible {
            target.set_all_stats_visible(true);
        }
        match (was, visible) {
            (false, true) => {
                self.rendered_groups.fetch_add(1, Ordering::Relaxed);
            }
            (true, false) => {
                self.rendered_groups.fetch_sub(1, Ordering::Relaxed);
            }
            _ => {}
        }
        true
    }

    /// Number of groups the HUD renders.
    pub fn rendered_group_count(&self) -> usize {
        self.rendered_groups.load(Ordering::Relaxed)
    }

    /// Snapshot of the display settings.
    pub fn display(&self) -> DisplaySettings {
        self.display.read().clone()
    }

    /// Change the display settings.
    pub fn update_display(&self, f: impl FnOnce(&mut DisplaySettings)) {
        let mut display = self.display.write();
        f(&mut display);
        self.non_grouped_mode
            .store(display.mode != RenderMode::Grouped, Ordering::Relaxed);
    }

    pub(crate) fn active_set(&self) -> &Mutex<Option<String>> {
        &self.active_set
    }

    // ---------------------------------------------------------------------
    // Configuration

    /// Snapshot of the configuration.
    pub fn config(&self) -> StatsConfig {
        self.config.read().clone()
    }

    /// Change the configuration and persist it when a path is set.
    pub fn update_config(&self, f: impl FnOnce(&mut StatsConfig)) -> Result<()> {
        let mut config = self.config.write();
        f(&mut config);
        if let Some(path) = &self.config_path {
            config.save_to_path(path)?;
        }
        Ok(())
    }

    /// Backing file of the configuration.
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    // ---------------------------------------------------------------------
    // Sinks

    /// Attach a sink; it receives the current description block right away.
    pub fn add_sink(&self, sink: Box<dyn StatSink>) {
        self.sinks.lock().add(sink);
    }

    /// Detach the sink called `name`.
    pub fn remove_sink(&self, name: &str) -> bool {
        self.sinks.lock().remove(name)
    }

    /// Names of the attached sinks.
    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.lock().names()
    }

    /// Shut down every sink.
    pub fn shutdown_sinks(&self) {
        self.sinks.lock().shutdown_all();
    }

    /// Start a capture file, replacing any capture in progress.
    ///
    /// Without a path the file goes to the configured capture directory.
    pub fn start_writing_stats_file(&self, path: Option<&Path>) -> Result<PathBuf> {
        let config = self.config();
        let path = path.map_or_else(
            || {
                let stamp = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map_or(0, |d| d.as_secs());
                config
                    .capture_dir
                    .join(format!("framestat-{stamp}-{}.fstats", self.frame_number()))
            },
            Path::to_path_buf,
        );
        let sink = CaptureSink::create(
            &path,
            CaptureHeader {
                format_version: CAPTURE_FORMAT_VERSION,
                engine_version: config.engine_version,
                changelist: config.changelist,
            },
        )?;
        let mut sinks = self.sinks.lock();
        sinks.remove(CaptureSink::NAME);
        sinks.add(Box::new(sink));
        Ok(path)
    }

    /// Finish the capture in progress. Returns false when none was running.
    pub fn stop_writing_stats_file(&self) -> bool {
        self.sinks.lock().remove(CaptureSink::NAME)
    }

    /// Whether a capture is in progress.
    pub fn is_capturing(&self) -> bool {
        self.sinks.lock().contains(CaptureSink::NAME)
    }

    fn build_descriptions(&self) -> DescriptionBlock {
        let mut block = DescriptionBlock::default();
        for group in &self.groups {
            let enabled = group.is_net_enabled();
            let canonical: Vec<_> = group
                .canonical_stats()
                .into_iter()
                .filter(|node| enabled || node.stat_id() == StatId::FRAME_TIME)
                .collect();
            if !enabled && canonical.is_empty() {
                continue;
            }
            block.groups.push(GroupDescription {
                id: group.group_id(),
                name: group.name().to_owned(),
            });
            for node in canonical {
                block.stats.push(StatDescription {
                    id: node.stat_id(),
                    name: node.info().name().to_owned(),
                    kind: StatKind::CycleCounter,
                    group: group.group_id(),
                });
            }
            if enabled {
                for value in group.values() {
                    block.stats.push(StatDescription {
                        id: value.info().stat_id(),
                        name: value.info().name().to_owned(),
                        kind: value.kind(),
                        group: group.group_id(),
                    });
                }
            }
        }
        block
    }

    fn build_frame(&self, frame: u32) -> FrameRecord {
        let mut record = FrameRecord {
            frame,
            samples: Vec::new(),
        };
        for group in &self.groups {
            let enabled = group.is_net_enabled();
            let group_id = group.group_id();
            if enabled {
                for value in group.values() {
                    let stat = value.info().stat_id();
                    match value.broadcast_value() {
                        Some(crate::accumulator::FrameValue::Dword(value)) => {
                            record.samples.push(StatSample::Dword {
                                stat,
                                group: group_id,
                                value,
                            });
                        }
                        Some(crate::accumulator::FrameValue::Float(value)) => {
                            record.samples.push(StatSample::Float {
                                stat,
                                group: group_id,
                                value,
                            });
                        }
                        None => {}
                    }
                }
            }
            for node in group.canonical_stats() {
                if !enabled && node.stat_id() != StatId::FRAME_TIME {
                    continue;
                }
                record.samples.push(StatSample::Cycle(CycleSample {
                    stat: node.stat_id(),
                    group: group_id,
                    parent_stat: StatId::ERROR,
                    instance_id: node.instance_id(),
                    parent_instance: 0,
                    thread: ThreadIndex::CANONICAL,
                    inclusive_cycles: node.last_inclusive(),
                    calls: node.last_calls(),
                }));
            }
            if enabled {
                for node in group.cycle_nodes() {
                    let calls = node.last_calls();
                    if calls == 0 {
                        continue;
                    }
                    record.samples.push(StatSample::Cycle(CycleSample {
                        stat: node.stat_id(),
                        group: group_id,
                        parent_stat: node.parent_stat(),
                        instance_id: node.instance_id(),
                        parent_instance: node.parent_instance(),
                        thread: node.thread(),
                        inclusive_cycles: node.last_inclusive(),
                        calls,
                    }));
                }
            }
        }
        record
    }

    // ---------------------------------------------------------------------
    // Frames

    /// Number of frames advanced so far.
    pub fn frame_number(&self) -> u32 {
        *self.frame_number.lock()
    }

    /// Seconds between the last two frame advances, and the average FPS.
    pub fn fps(&self) -> (f64, f64) {
        let state = self.frame.lock();
        (state.fps.frame_time(), state.fps.average_fps())
    }

    /// Fold the calling thread's totals into the canonical stats and close
    /// its tree's frame. Called by worker threads after their frame's work.
    ///
    /// The frame-advance thread does not call this; [`Self::advance_frame`]
    /// covers it.
    pub fn advance_frame_for_thread(&self) {
        let thread = ThreadIndex::current();
        let calls = self
            .groups
            .iter()
            .fold(0u32, |total, group| total.wrapping_add(group.merge_thread(thread)));
        if let Some(root) = cycle::thread_root(self.id) {
            root.advance_children();
        }
        tracing::trace!("Thread {} merged {} calls", thread.0, calls);
    }

    /// Close the frame: publish to sinks, roll histories and wake waiters.
    pub fn advance_frame(&self) {
        let admitted: usize = self.groups.iter().map(|group| group.admit_pending()).sum();
        if admitted > 0 {
            tracing::debug!("Admitted {} dynamic stats", admitted);
            self.sinks.lock().set_descriptions(self.build_descriptions());
        }

        let thread = ThreadIndex::current();
        for group in &self.groups {
            group.merge_thread(thread);
        }

        let code_calls = self
            .groups
            .iter()
            .fold(0u32, |total, group| total.wrapping_add(group.canonical_live_calls()));
        if let Some(counter) = &self.timing_calls {
            counter.cell().set(code_calls);
        }
        {
            let mut state = self.frame.lock();
            let now = self.clock.cycles();
            let frame_cycles = state
                .last_frame_cycles
                .map_or(0, |last| now.wrapping_sub(last));
            state.last_frame_cycles = Some(now);
            state.fps.update(self.clock.seconds());
            self.frame_time.set_frame(frame_cycles, 1);
        }

        let frame = self.frame_number();
        {
            let mut sinks = self.sinks.lock();
            if sinks.has_active() {
                sinks.write_frame(&self.build_frame(frame));
            }
            self.sinks_listening
                .store(sinks.has_active(), Ordering::Relaxed);
        }

        for group in &self.groups {
            group.advance_values();
            group.advance_canonical();
        }
        if let Some(root) = cycle::thread_root(self.id) {
            root.advance_children();
        }

        let mut number = self.frame_number.lock();
        *number = number.saturating_add(1);
        self.frame_ready.notify_all();
    }

    /// Block until a frame later than `after` has been published.
    pub fn wait_for_frame(&self, after: u32) -> u32 {
        let mut number = self.frame_number.lock();
        while *number <= after {
            self.frame_ready.wait(&mut number);
        }
        *number
    }

    /// [`Self::wait_for_frame`] giving up after `timeout`.
    pub fn wait_for_frame_timeout(&self, after: u32, timeout: Duration) -> Option<u32> {
        let deadline = std::time::Instant::now() + timeout;
        let mut number = self.frame_number.lock();
        while *number <= after {
            if self.frame_ready.wait_until(&mut number, deadline).timed_out() {
                return (*number > after).then_some(*number);
            }
        }
        Some(*number)
    }
}

impl Drop for StatManager {
    fn drop(&mut self) {
        self.sinks.get_mut().shutdown_all();
        cycle::forget_thread(self.id);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::scope::CycleCounter;
    use crate::sink::{MemorySink, MemorySinkLog, SinkEvent};

    pub const WORK: StatId = StatId(300);
    pub const OUTER: StatId = StatId(301);
    pub const INNER: StatId = StatId(302);
    pub const FOO: StatId = StatId(303);
    pub const HITS: StatId = StatId(304);
    pub const MEM: StatId = StatId(1000);
    pub const WEIGHT: StatId = StatId(305);
    pub const PACKETS: StatId = StatId(400);

    pub fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .declare_group("Game", GroupId::GAME)
            .and_then(|r| r.declare_group("Memory", GroupId::MEMORY))
            .and_then(|r| r.declare_group("Net", GroupId::NET))
            .and_then(|r| r.declare_cycle_stat("Work", WORK, GroupId::GAME))
            .and_then(|r| r.declare_cycle_stat("Outer", OUTER, GroupId::GAME))
            .and_then(|r| r.declare_cycle_stat("Inner", INNER, GroupId::GAME))
            .and_then(|r| r.declare_cycle_stat("Foo", FOO, GroupId::GAME))
            .and_then(|r| r.declare_dword_counter("Hits", HITS, GroupId::GAME))
            .and_then(|r| r.declare_float_accumulator("Weight", WEIGHT, GroupId::GAME))
            .and_then(|r| {
                r.declare_memory_stat("Mem", MEM, GroupId::MEMORY, MemoryRegion::Physical, false)
            })
            .and_then(|r| r.declare_dword_counter("Packets", PACKETS, GroupId::NET))
            .unwrap();
        registry
    }

    pub fn manager_with(config: StatsConfig) -> (StatManager, ManualClock) {
        let clock = ManualClock::new();
        let manager = StatManager::new(registry(), config, Arc::new(clock.clone())).unwrap();
        (manager, clock)
    }

    pub fn manager() -> (StatManager, ManualClock) {
        manager_with(StatsConfig::default())
    }

    fn with_memory_sink(manager: &StatManager) -> MemorySinkLog {
        let (sink, log) = MemorySink::new("mem");
        manager.add_sink(Box::new(sink));
        log
    }

    #[test]
    fn nested_scopes_split_inclusive_and_exclusive() {
        let (manager, clock) = manager();
        {
            let _outer = CycleCounter::new(&manager, OUTER);
            clock.advance(700);
            {
                let _inner = CycleCounter::new(&manager, INNER);
                clock.advance(300);
            }
        }
        manager.advance_frame();

        let outer = manager.cycle_stat(OUTER, ThreadIndex::current()).unwrap();
        let inner = manager.cycle_stat(INNER, ThreadIndex::current()).unwrap();
        let outer_history = outer.history();
        assert_eq!(outer_history.inclusive.most_recent(), 1000);
        assert_eq!(outer_history.exclusive.most_recent(), 700);
        assert_eq!(outer_history.calls.most_recent(), 1);
        let inner_history = inner.history();
        assert_eq!(inner_history.inclusive.most_recent(), 300);
        assert_eq!(inner_history.exclusive.most_recent(), 300);
        assert_eq!(inner_history.calls.most_recent(), 1);
        assert_eq!(inner.parent_stat(), OUTER);
    }

    #[test]
    fn recursion_counts_one_call() {
        let (manager, clock) = manager();
        {
            let _outer = CycleCounter::new(&manager, FOO);
            clock.advance(200);
            {
                let _inner = CycleCounter::new(&manager, FOO);
                clock.advance(100);
            }
            clock.advance(200);
        }
        manager.advance_frame();

        let foo = manager.cycle_stat(FOO, ThreadIndex::current()).unwrap();
        let history = foo.history();
        assert_eq!(history.calls.most_recent(), 1);
        assert_eq!(history.inclusive.most_recent(), 500);
        assert_eq!(foo.depth(), 0);
        assert_eq!(foo.child_count(), 0);
    }

    #[test]
    fn scope_after_close_returns_to_parent() {
        let (manager, clock) = manager();
        {
            let _outer = CycleCounter::new(&manager, OUTER);
            {
                let _a = CycleCounter::new(&manager, INNER);
                clock.advance(10);
            }
            {
                let _b = CycleCounter::new(&manager, WORK);
                clock.advance(10);
            }
        }
        let outer = manager.cycle_stat(OUTER, ThreadIndex::current()).unwrap();
        assert_eq!(outer.child_count(), 2);
        let root = manager.thread_root().unwrap();
        assert_eq!(root.child_count(), 1);
    }

    #[test]
    fn reserved_ids_are_not_sampled() {
        let (manager, _clock) = manager();
        let guard = CycleCounter::new(&manager, StatId::ERROR);
        drop(guard);
        let guard = CycleCounter::new(&manager, StatId::ROOT);
        drop(guard);
        assert!(manager.thread_root().is_none());
    }

    #[test]
    fn counter_resets_at_frame_advance() {
        let (manager, _clock) = manager();
        manager.increment_dword(HITS, 3);
        manager.increment_dword(HITS, 4);
        manager.advance_frame();
        assert_eq!(manager.dword_value(HITS), 0);
        match manager.value_stat(HITS) {
            Some(ValueStat::DwordCounter(counter)) => {
                assert_eq!(counter.history().most_recent(), 7);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn memory_gauge_survives_frame_advance() {
        let (manager, _clock) = manager();
        manager.set_dword(MEM, 1024);
        for _ in 0..2 {
            manager.advance_frame();
            assert_eq!(manager.dword_value(MEM), 1024);
            match manager.value_stat(MEM) {
                Some(ValueStat::Memory(gauge)) => assert_eq!(gauge.history().most_recent(), 1024),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn worker_threads_merge_into_canonical_stat() {
        let (manager, clock) = manager();
        for cycles in [100, 250] {
            std::thread::scope(|s| {
                s.spawn(|| {
                    {
                        let _work = CycleCounter::new(&manager, WORK);
                        clock.advance(cycles);
                    }
                    manager.advance_frame_for_thread();
                });
            });
        }
        manager.advance_frame();

        let canonical = manager.group(GroupId::GAME).unwrap().canonical(WORK).unwrap();
        let history = canonical.history();
        assert_eq!(history.inclusive.most_recent(), 350);
        assert_eq!(history.calls.most_recent(), 2);
        assert_eq!(manager.group(GroupId::GAME).unwrap().cycle_nodes().len(), 2);
    }

    #[test]
    fn main_thread_samples_reach_canonical_stat() {
        let (manager, clock) = manager();
        {
            let _work = CycleCounter::new(&manager, WORK);
            clock.advance(40);
        }
        manager.advance_frame();
        let canonical = manager.group(GroupId::GAME).unwrap().canonical(WORK).unwrap();
        assert_eq!(canonical.history().inclusive.most_recent(), 40);
        match manager.value_stat(StatId::TIMING_CODE_CALLS) {
            Some(ValueStat::DwordCounter(counter)) => {
                assert_eq!(counter.history().most_recent(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn open_scope_lands_in_next_frame() {
        let (manager, clock) = manager();
        let guard = CycleCounter::new(&manager, WORK);
        clock.advance(60);
        manager.advance_frame();
        let node = manager.cycle_stat(WORK, ThreadIndex::current()).unwrap();
        assert_eq!(node.history().inclusive.most_recent(), 0);
        drop(guard);
        manager.advance_frame();
        assert_eq!(node.history().inclusive.most_recent(), 60);
    }

    #[test]
    fn advance_before_any_sample_reads_zero() {
        let (manager, clock) = manager();
        clock.set_seconds(1.0);
        manager.advance_frame();
        assert_eq!(manager.fps().0, 0.0);
        assert_eq!(manager.frame_number(), 1);
        let canonical = manager.group(GroupId::GAME).unwrap().canonical(WORK).unwrap();
        assert_eq!(canonical.history().inclusive.most_recent(), 0);
        clock.set_seconds(1.25);
        manager.advance_frame();
        assert!((manager.fps().0 - 0.25).abs() < 1e-9);
    }

    #[test]
    fn unknown_group_fails_construction() {
        let mut registry = Registry::new();
        registry
            .declare_cycle_stat("Orphan", StatId(300), GroupId::GAME)
            .unwrap();
        let result = StatManager::new(
            registry,
            StatsConfig::default(),
            Arc::new(ManualClock::new()),
        );
        assert!(matches!(result, Err(Error::UnknownGroup { .. })));
    }

    #[test]
    fn typed_lookup_reports_mismatch() {
        let (manager, _clock) = manager();
        assert!(manager.typed_value_stat(HITS, StatKind::DwordCounter).is_ok());
        assert!(matches!(
            manager.typed_value_stat(HITS, StatKind::FloatCounter),
            Err(Error::KindMismatch { .. })
        ));
        assert!(matches!(
            manager.typed_value_stat(StatId(999), StatKind::FloatCounter),
            Err(Error::UnknownStat(_))
        ));
        assert_eq!(manager.dword_value(StatId(999)), 0);
        manager.increment_float(WEIGHT, 1.5);
        assert!((manager.float_value(WEIGHT) - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn sinks_see_descriptions_before_samples() {
        let (manager, clock) = manager();
        let log = with_memory_sink(&manager);
        {
            let _work = CycleCounter::new(&manager, WORK);
            clock.advance(10);
        }
        manager.increment_dword(HITS, 2);
        manager.advance_frame();

        let events = log.events();
        let end_desc = events
            .iter()
            .position(|e| *e == SinkEvent::EndDescriptions)
            .unwrap();
        let first_frame = events
            .iter()
            .position(|e| matches!(e, SinkEvent::FrameNumber(_)))
            .unwrap();
        assert!(end_desc < first_frame);
        assert!(log.frame_events(0).contains(&SinkEvent::Dword {
            stat: HITS,
            group: GroupId::GAME,
            value: 2,
        }));
    }

    #[test]
    fn zero_counters_are_omitted() {
        let (manager, _clock) = manager();
        let log = with_memory_sink(&manager);
        manager.advance_frame();
        assert!(!log
            .frame_events(0)
            .iter()
            .any(|e| e.stat() == Some(HITS)));
    }

    #[test]
    fn disabled_groups_stay_off_the_stream_except_frame_time() {
        let config = StatsConfig {
            net_enabled_groups: vec!["Net".into()],
            ..StatsConfig::default()
        };
        let (manager, clock) = manager_with(config);
        let log = with_memory_sink(&manager);
        {
            let _work = CycleCounter::new(&manager, WORK);
            clock.advance(10);
        }
        manager.increment_dword(HITS, 1);
        manager.increment_dword(PACKETS, 5);
        manager.advance_frame();
        manager.advance_frame();

        let events = log.events();
        let stats: Vec<StatId> = events.iter().filter_map(SinkEvent::stat).collect();
        assert!(stats.contains(&StatId::FRAME_TIME));
        assert!(stats.contains(&PACKETS));
        assert!(!stats.contains(&WORK));
        assert!(!stats.contains(&HITS));
    }

    #[test]
    fn dynamic_stats_join_at_next_frame() {
        let (manager, clock) = manager();
        let log = with_memory_sink(&manager);
        let stat = manager.find_stat_id_for_string("Script Tick", GroupId::GAME);
        assert!(stat.is_dynamic());
        assert_eq!(
            manager.find_stat_id_for_string("script tick", GroupId::GAME),
            stat
        );
        assert_eq!(manager.stat_id_by_name("Script Tick"), Some(stat));
        let group = manager.group(GroupId::GAME).unwrap();
        assert!(group.canonical(stat).is_none());
        {
            let _tick = CycleCounter::new(&manager, stat);
            clock.advance(5);
        }
        manager.advance_frame();
        assert!(group.canonical(stat).is_some());
        assert!(log.events().iter().any(|e| matches!(
            e,
            SinkEvent::Stat { id, .. } if *id == stat
        )));
        assert_eq!(
            group.canonical(stat).unwrap().history().inclusive.most_recent(),
            5
        );
    }

    #[test]
    fn dynamic_range_exhaustion_returns_error_id() {
        let (manager, _clock) = manager();
        let capacity = StatId::LAST_DYNAMIC.0 - StatId::FIRST_DYNAMIC.0 + 1;
        for i in 0..capacity {
            let stat = manager.find_stat_id_for_string(&format!("dyn{i}"), GroupId::GAME);
            assert!(!stat.is_error());
        }
        let overflow = manager.find_stat_id_for_string("one too many", GroupId::GAME);
        assert_eq!(overflow, StatId::ERROR);
        // The error id is tolerated by the scope API.
        drop(CycleCounter::new(&manager, overflow));
    }

    #[test]
    fn set_cycle_counter_writes_frame_totals() {
        let (manager, _clock) = manager();
        manager.set_cycle_counter(WORK, 1234, 3);
        manager.advance_frame();
        let node = manager.cycle_stat(WORK, ThreadIndex::current()).unwrap();
        assert_eq!(node.history().inclusive.most_recent(), 1234);
        assert_eq!(node.history().calls.most_recent(), 3);
    }

    #[test]
    fn wait_for_frame_wakes_after_advance() {
        let (manager, _clock) = manager();
        std::thread::scope(|s| {
            let waiter = s.spawn(|| manager.wait_for_frame(0));
            manager.advance_frame();
            assert_eq!(waiter.join().unwrap(), 1);
        });
        assert_eq!(
            manager.wait_for_frame_timeout(5, Duration::from_millis(10)),
            None
        );
    }

    #[test]
    fn capture_round_trips_descriptions_and_frames() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("run.fstats");
        let (manager, clock) = manager();
        manager.start_writing_stats_file(Some(&path)).unwrap();
        assert!(manager.is_capturing());
        for frame in 0..3 {
            {
                let _work = CycleCounter::new(&manager, WORK);
                clock.advance(100 + frame);
            }
            manager.increment_dword(HITS, frame + 1);
            manager.advance_frame();
        }
        assert!(manager.stop_writing_stats_file());
        assert!(!manager.stop_writing_stats_file());

        let capture = crate::sink::CaptureReader::open(&path).unwrap();
        assert_eq!(capture.stat_name(WORK), Some("Work"));
        assert_eq!(capture.stats[&HITS].kind, StatKind::DwordCounter);
        assert_eq!(capture.frames.len(), 3);
        assert_eq!(capture.frames[1].frame, 1);
        assert!(capture.frames[2].samples.contains(&StatSample::Dword {
            stat: HITS,
            group: GroupId::GAME,
            value: 3,
        }));
    }
}
