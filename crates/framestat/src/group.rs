//! Stat groups.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use framestat_core::{GroupId, StatId, StatKind, ThreadIndex};
use parking_lot::{Mutex, RwLock};

use crate::accumulator::{name_key, ValueStat};
use crate::cycle::CycleNode;

/// A collection of stats shown and toggled together.
///
/// Non-cycle stats are fixed at manager init. Per-thread cycle nodes are
/// appended as threads first reach them. Canonical cycle stats, one per
/// cycle stat id, live here and never in a thread tree.
#[derive(Debug)]
pub struct StatGroup {
    name: Arc<str>,
    key: String,
    group_id: GroupId,
    visible: AtomicBool,
    net_enabled: bool,
    values: Vec<ValueStat>,
    canonical: RwLock<BTreeMap<StatId, Arc<CycleNode>>>,
    pending_canonical: Mutex<Vec<Arc<CycleNode>>>,
    cycle_nodes: Mutex<Vec<Arc<CycleNode>>>,
}

impl StatGroup {
    /// Create a hidden group.
    #[must_use]
    pub(crate) fn new(
        name: Arc<str>,
        group_id: GroupId,
        net_enabled: bool,
        mut values: Vec<ValueStat>,
        canonical: Vec<Arc<CycleNode>>,
    ) -> Self {
        // Listing order: kind first, then declaration order.
        values.sort_by_key(|stat| stat.kind() as u8);
        Self {
            key: name_key(&name),
            name,
            group_id,
            visible: AtomicBool::new(false),
            net_enabled,
            values,
            canonical: RwLock::new(
                canonical
                    .into_iter()
                    .map(|node| (node.stat_id(), node))
                    .collect(),
            ),
            pending_canonical: Mutex::new(Vec::new()),
            cycle_nodes: Mutex::new(Vec::new()),
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the display name.
    pub fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Lower-cased name used for lookups.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Id of the group.
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Whether the HUD renders this group.
    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    /// Show or hide the group; returns the previous state.
    pub(crate) fn set_visible(&self, visible: bool) -> bool {
        self.visible.swap(visible, Ordering::Relaxed)
    }

    /// Whether sinks receive this group's stats.
    pub fn is_net_enabled(&self) -> bool {
        self.net_enabled
    }

    /// Non-cycle stats, grouped by kind.
    pub fn values(&self) -> &[ValueStat] {
        &self.values
    }

    /// Non-cycle stats of one kind.
    pub fn values_of(&self, kind: StatKind) -> impl Iterator<Item = &ValueStat> {
        self.values.iter().filter(move |stat| stat.kind() == kind)
    }

    /// Canonical cycle stats ordered by stat id.
    pub fn canonical_stats(&self) -> Vec<Arc<CycleNode>> {
        self.canonical.read().values().cloned().collect()
    }

    /// Canonical stat for `stat`.
    pub fn canonical(&self, stat: StatId) -> Option<Arc<CycleNode>> {
        self.canonical.read().get(&stat).cloned()
    }

    /// Every per-thread node of this group's cycle stats.
    pub fn cycle_nodes(&self) -> Vec<Arc<CycleNode>> {
        self.cycle_nodes.lock().clone()
    }

    pub(crate) fn add_cycle_node(&self, node: Arc<CycleNode>) {
        self.cycle_nodes.lock().push(node);
    }

    /// Queue a canonical stat created at runtime; it joins at the next frame.
    pub(crate) fn queue_canonical(&self, node: Arc<CycleNode>) {
        self.pending_canonical.lock().push(node);
    }

    /// Move queued canonical stats in. Returns how many were admitted.
    pub(crate) fn admit_pending(&self) -> usize {
        let pending: Vec<_> = std::mem::take(&mut *self.pending_canonical.lock());
        let admitted = pending.len();
        if admitted > 0 {
            let mut canonical = self.canonical.write();
            for node in pending {
                canonical.insert(node.stat_id(), node);
            }
        }
        admitted
    }

    /// Add `thread`'s live per-frame totals into the canonical stats.
    ///
    /// Returns the number of calls merged.
    pub(crate) fn merge_thread(&self, thread: ThreadIndex) -> u32 {
        let canonical = self.canonical.read();
        let nodes = self.cycle_nodes.lock();
        let mut merged_calls = 0u32;
        for node in nodes.iter().filter(|node| node.thread() == thread) {
            if let Some(target) = canonical.get(&node.stat_id()) {
                let calls = node.live_calls();
                target.add_frame(node.live_cycles(), calls);
                merged_calls = merged_calls.wrapping_add(calls);
            }
        }
        merged_calls
    }

    /// Calls currently accumulated across canonical stats.
    pub(crate) fn canonical_live_calls(&self) -> u32 {
        self.canonical
            .read()
            .values()
            .fold(0u32, |total, node| total.wrapping_add(node.live_calls()))
    }

    /// Close the frame for canonical stats.
    pub(crate) fn advance_canonical(&self) {
        for node in self.canonical.read().values() {
            node.advance_frame();
        }
    }

    /// Close the frame for counters and memory gauges.
    pub(crate) fn advance_values(&self) {
        for stat in &self.values {
            stat.advance_frame();
        }
    }

    /// Set the visibility bit of every instance of every stat in the group.
    pub(crate) fn set_all_stats_visible(&self, visible: bool) {
        for stat in &self.values {
            stat.info().set_visible(visible);
        }
        for node in self.canonical.read().values() {
            node.info().set_visible(visible);
        }
        for node in self.cycle_nodes.lock().iter() {
            node.info().set_visible(visible);
        }
    }

    /// Apply `f` to every instance of `stat` held by this group.
    pub(crate) fn for_each_instance(&self, stat: StatId, mut f: impl FnMut(&crate::StatInfo)) {
        for value in self.values.iter().filter(|v| v.info().stat_id() == stat) {
            f(value.info());
        }
        if let Some(node) = self.canonical.read().get(&stat) {
            f(node.info());
        }
        for node in self.cycle_nodes.lock().iter().filter(|n| n.stat_id() == stat) {
            f(node.info());
        }
    }

    /// Whether any stat of the group could produce a HUD row.
    pub fn has_stats(&self) -> bool {
        !self.values.is_empty() || !self.canonical.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::StatInfo;

    fn cycle(stat: u32, thread: ThreadIndex, instance: u32) -> Arc<CycleNode> {
        Arc::new(CycleNode::new(
            StatInfo::new(Arc::from("Work"), StatId(stat), GroupId::GAME),
            thread,
            None,
            instance,
            false,
        ))
    }

    #[test]
    fn merge_only_takes_matching_thread() {
        let canonical = cycle(300, ThreadIndex::CANONICAL, 1);
        let group = StatGroup::new(
            Arc::from("Game"),
            GroupId::GAME,
            true,
            Vec::new(),
            vec![Arc::clone(&canonical)],
        );
        let a = cycle(300, ThreadIndex(7), 2);
        let b = cycle(300, ThreadIndex(8), 3);
        a.record(100);
        b.record(250);
        group.add_cycle_node(a);
        group.add_cycle_node(b);

        assert_eq!(group.merge_thread(ThreadIndex(7)), 1);
        assert_eq!(canonical.live_cycles(), 100);
        group.merge_thread(ThreadIndex(8));
        assert_eq!(canonical.live_cycles(), 350);

        group.advance_canonical();
        let history = canonical.history();
        assert_eq!(history.inclusive.most_recent(), 350);
        assert_eq!(history.calls.most_recent(), 2);
    }

    #[test]
    fn pending_canonical_waits_for_admission() {
        let group = StatGroup::new(Arc::from("Game"), GroupId::GAME, true, Vec::new(), Vec::new());
        group.queue_canonical(cycle(35_000, ThreadIndex::CANONICAL, 1));
        assert!(group.canonical(StatId(35_000)).is_none());
        assert_eq!(group.admit_pending(), 1);
        assert!(group.canonical(StatId(35_000)).is_some());
        assert_eq!(group.admit_pending(), 0);
    }
}
