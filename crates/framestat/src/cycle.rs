//! Cycle-stat tree nodes and the per-thread current-node cursor.
//!
//! Every thread owns a tree rooted at a node for [`StatId::ROOT`]. A node is
//! keyed by `(stat, thread, parent)`; its children are looked up by stat id.
//! Only the owning thread changes a tree's shape or enters and leaves its
//! scopes. Other threads read the per-frame totals, which are 32-bit atomics.
//! The owning thread also indexes the nodes it created in its thread-local
//! slot, so entering a scope takes no lock once the node exists.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use framestat_core::{StatId, ThreadIndex};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use crate::accumulator::StatInfo;
use crate::history::StatHistory;

/// Per-frame histories kept by a cycle node.
#[derive(Debug, Clone, Default)]
pub struct CycleHistory {
    /// Cycles including children.
    pub inclusive: StatHistory<u32>,
    /// Cycles excluding children.
    pub exclusive: StatHistory<u32>,
    /// Completed outermost calls.
    pub calls: StatHistory<u32>,
}

/// One node of a thread's cycle tree, or a group's canonical aggregate.
#[derive(Debug)]
pub struct CycleNode {
    info: StatInfo,
    thread: ThreadIndex,
    parent: Weak<CycleNode>,
    parent_stat: StatId,
    parent_instance: u32,
    instance_id: u32,
    offline_only: bool,
    children: RwLock<HashMap<StatId, Arc<CycleNode>>>,
    cycles: AtomicU32,
    calls: AtomicU32,
    recursion: AtomicU32,
    last_inclusive: AtomicU32,
    last_calls: AtomicU32,
    history: Mutex<CycleHistory>,
}

impl CycleNode {
    /// Create a node. The caller links it into `parent`'s children.
    #[must_use]
    pub fn new(
        info: StatInfo,
        thread: ThreadIndex,
        parent: Option<&Arc<Self>>,
        instance_id: u32,
        offline_only: bool,
    ) -> Self {
        Self {
            info,
            thread,
            parent: parent.map_or_else(Weak::new, Arc::downgrade),
            parent_stat: parent.map_or(StatId::ERROR, |p| p.stat_id()),
            parent_instance: parent.map_or(0, |p| p.instance_id),
            instance_id,
            offline_only,
            children: RwLock::new(HashMap::new()),
            cycles: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            recursion: AtomicU32::new(0),
            last_inclusive: AtomicU32::new(0),
            last_calls: AtomicU32::new(0),
            history: Mutex::new(CycleHistory::default()),
        }
    }

    /// Common stat data.
    pub fn info(&self) -> &StatInfo {
        &self.info
    }

    /// Id of the timed stat.
    #[inline]
    pub fn stat_id(&self) -> StatId {
        self.info.stat_id()
    }

    /// Owning thread, or [`ThreadIndex::CANONICAL`].
    pub fn thread(&self) -> ThreadIndex {
        self.thread
    }

    /// Monotonic id assigned at creation.
    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    /// Parent's stat id, or the error sentinel at a root.
    pub fn parent_stat(&self) -> StatId {
        self.parent_stat
    }

    /// Parent's instance id, or 0 at a root.
    pub fn parent_instance(&self) -> u32 {
        self.parent_instance
    }

    /// Parent node, if any.
    pub fn parent(&self) -> Option<Arc<Self>> {
        self.parent.upgrade()
    }

    /// Whether histories are skipped for this node.
    pub fn offline_only(&self) -> bool {
        self.offline_only
    }

    /// Link a freshly created child.
    pub fn insert_child(&self, child: Arc<Self>) {
        self.children.write().insert(child.stat_id(), child);
    }

    /// Children in creation order.
    pub fn children(&self) -> Vec<Arc<Self>> {
        let mut children: Vec<_> = self.children.read().values().cloned().collect();
        children.sort_by_key(|child| child.instance_id);
        children
    }

    /// Number of children.
    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    /// Enter the scope once more; returns the new recursion depth.
    #[inline]
    pub fn enter(&self) -> u32 {
        self.recursion.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Leave the scope once; returns true when the outermost entry closed.
    #[inline]
    pub fn exit(&self) -> bool {
        let previous = self
            .recursion
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                Some(depth.saturating_sub(1))
            })
            .unwrap_or_else(|depth| depth);
        debug_assert!(previous > 0, "cycle scope popped without a matching push");
        previous <= 1
    }

    /// Current recursion depth.
    pub fn depth(&self) -> u32 {
        self.recursion.load(Ordering::Acquire)
    }

    /// Account one completed outermost call.
    #[inline]
    pub fn record(&self, delta: u32) {
        self.cycles.fetch_add(delta, Ordering::AcqRel);
        self.calls.fetch_add(1, Ordering::AcqRel);
    }

    /// Add totals gathered elsewhere into this frame's cells.
    pub fn add_frame(&self, cycles: u32, calls: u32) {
        self.cycles.fetch_add(cycles, Ordering::AcqRel);
        self.calls.fetch_add(calls, Ordering::AcqRel);
    }

    /// Overwrite this frame's cells.
    pub fn set_frame(&self, cycles: u32, calls: u32) {
        self.cycles.store(cycles, Ordering::Release);
        self.calls.store(calls, Ordering::Release);
    }

    /// Cycles accumulated so far this frame.
    pub fn live_cycles(&self) -> u32 {
        self.cycles.load(Ordering::Acquire)
    }

    /// Calls completed so far this frame.
    pub fn live_calls(&self) -> u32 {
        self.calls.load(Ordering::Acquire)
    }

    /// Inclusive cycles published by the last frame advance.
    pub fn last_inclusive(&self) -> u32 {
        self.last_inclusive.load(Ordering::Acquire)
    }

    /// Calls published by the last frame advance.
    pub fn last_calls(&self) -> u32 {
        self.last_calls.load(Ordering::Acquire)
    }

    /// Snapshot of the histories.
    pub fn history(&self) -> CycleHistory {
        self.history.lock().clone()
    }

    /// Close the frame for this node and its subtree.
    ///
    /// Each cell is read and zeroed in one atomic exchange, so a scope that
    /// closes concurrently lands wholly in this frame or wholly in the next.
    /// Returns the inclusive cycles so the parent can derive its exclusive
    /// time.
    pub fn advance_frame(&self) -> u32 {
        let inclusive = self.cycles.swap(0, Ordering::AcqRel);
        let calls = self.calls.swap(0, Ordering::AcqRel);
        let child_time = self.advance_children();
        let exclusive = inclusive.saturating_sub(child_time);

        self.last_inclusive.store(inclusive, Ordering::Release);
        self.last_calls.store(calls, Ordering::Release);
        if !self.offline_only {
            let mut history = self.history.lock();
            history.inclusive.add(inclusive);
            history.exclusive.add(exclusive);
            history.calls.add(calls);
        }
        inclusive
    }

    /// Advance every child; returns their summed inclusive cycles.
    pub fn advance_children(&self) -> u32 {
        self.children
            .read()
            .values()
            .fold(0u32, |total, child| total.wrapping_add(child.advance_frame()))
    }
}

struct ThreadSlot {
    manager: u64,
    root: Arc<CycleNode>,
    current: Arc<CycleNode>,
    /// Every node this thread created, by parent instance and stat. Scope
    /// entry resolves children here instead of taking the node's lock.
    children: HashMap<(u32, StatId), Arc<CycleNode>>,
}

thread_local! {
    static SLOTS: RefCell<Vec<ThreadSlot>> = const { RefCell::new(Vec::new()) };
}

/// The calling thread's current node for `manager`, creating the root on
/// first use.
#[inline]
pub(crate) fn current_node(
    manager: u64,
    create_root: impl FnOnce() -> Arc<CycleNode>,
) -> Arc<CycleNode> {
    let found = SLOTS.with(|slots| {
        slots
            .borrow()
            .iter()
            .find(|slot| slot.manager == manager)
            .map(|slot| Arc::clone(&slot.current))
    });
    if let Some(current) = found {
        return current;
    }

    let root = create_root();
    SLOTS.with(|slots| {
        slots.borrow_mut().push(ThreadSlot {
            manager,
            root: Arc::clone(&root),
            current: Arc::clone(&root),
            children: HashMap::new(),
        });
    });
    root
}

/// Install `node` as the calling thread's current node.
#[inline]
pub(crate) fn set_current(manager: u64, node: Arc<CycleNode>) {
    SLOTS.with(|slots| {
        if let Some(slot) = slots
            .borrow_mut()
            .iter_mut()
            .find(|slot| slot.manager == manager)
        {
            slot.current = node;
        }
    });
}

/// Child of `parent` for `stat` from the calling thread's own index.
#[inline]
pub(crate) fn thread_child(
    manager: u64,
    parent: &CycleNode,
    stat: StatId,
) -> Option<Arc<CycleNode>> {
    SLOTS.with(|slots| {
        slots
            .borrow()
            .iter()
            .find(|slot| slot.manager == manager)
            .and_then(|slot| slot.children.get(&(parent.instance_id(), stat)))
            .cloned()
    })
}

/// Record a child the calling thread just created under `parent`.
pub(crate) fn remember_child(manager: u64, parent: &CycleNode, child: &Arc<CycleNode>) {
    SLOTS.with(|slots| {
        if let Some(slot) = slots
            .borrow_mut()
            .iter_mut()
            .find(|slot| slot.manager == manager)
        {
            let key = (parent.instance_id(), child.stat_id());
            slot.children.insert(key, Arc::clone(child));
        }
    });
}

/// The calling thread's root for `manager`, if it has sampled.
pub(crate) fn thread_root(manager: u64) -> Option<Arc<CycleNode>> {
    SLOTS.with(|slots| {
        slots
            .borrow()
            .iter()
            .find(|slot| slot.manager == manager)
            .map(|slot| Arc::clone(&slot.root))
    })
}

/// Drop the calling thread's cursor for `manager`.
pub(crate) fn forget_thread(manager: u64) {
    // The slot list may already be gone during thread teardown.
    let _ = SLOTS.try_with(|slots| {
        if let Ok(mut slots) = slots.try_borrow_mut() {
            slots.retain(|slot| slot.manager != manager);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use framestat_core::GroupId;

    fn node(stat: u32, parent: Option<&Arc<CycleNode>>, instance: u32) -> Arc<CycleNode> {
        let info = StatInfo::new(Arc::from(format!("Stat{stat}")), StatId(stat), GroupId::GAME);
        let node = Arc::new(CycleNode::new(
            info,
            ThreadIndex::current(),
            parent,
            instance,
            false,
        ));
        if let Some(parent) = parent {
            parent.insert_child(Arc::clone(&node));
        }
        node
    }

    #[test]
    fn exclusive_time_subtracts_children() {
        let root = node(StatId::ROOT.0, None, 1);
        let outer = node(300, Some(&root), 2);
        let inner = node(301, Some(&outer), 3);
        outer.record(1000);
        inner.record(300);

        root.advance_children();

        let outer_history = outer.history();
        assert_eq!(outer_history.inclusive.most_recent(), 1000);
        assert_eq!(outer_history.exclusive.most_recent(), 700);
        assert_eq!(outer_history.calls.most_recent(), 1);
        let inner_history = inner.history();
        assert_eq!(inner_history.inclusive.most_recent(), 300);
        assert_eq!(inner_history.exclusive.most_recent(), 300);
        assert_eq!(outer.live_cycles(), 0);
        assert_eq!(outer.live_calls(), 0);
    }

    #[test]
    fn parent_links_are_recorded() {
        let root = node(StatId::ROOT.0, None, 1);
        let child = node(300, Some(&root), 2);
        assert_eq!(child.parent_stat(), StatId::ROOT);
        assert_eq!(child.parent_instance(), 1);
        assert!(Arc::ptr_eq(&child.parent().unwrap(), &root));
        assert_eq!(root.parent_stat(), StatId::ERROR);
        assert!(root.parent().is_none());
    }

    #[test]
    fn recursion_depth_counts_entries() {
        let root = node(StatId::ROOT.0, None, 1);
        assert_eq!(root.enter(), 1);
        assert_eq!(root.enter(), 2);
        assert!(!root.exit());
        assert!(root.exit());
        assert_eq!(root.depth(), 0);
    }

    #[test]
    fn children_come_back_in_creation_order() {
        let root = node(StatId::ROOT.0, None, 1);
        node(305, Some(&root), 4);
        node(301, Some(&root), 2);
        node(309, Some(&root), 3);
        let order: Vec<_> = root.children().iter().map(|c| c.stat_id().0).collect();
        assert_eq!(order, vec![301, 309, 305]);
    }

    #[test]
    fn thread_index_resolves_only_remembered_children() {
        let manager = u64::MAX - 11;
        let root = current_node(manager, || node(StatId::ROOT.0, None, 1));
        let remembered = node(300, Some(&root), 2);
        remember_child(manager, &root, &remembered);
        // Linked into the tree but never recorded for this thread.
        node(301, Some(&root), 3);

        let found = thread_child(manager, &root, StatId(300)).unwrap();
        assert!(Arc::ptr_eq(&found, &remembered));
        assert!(thread_child(manager, &root, StatId(301)).is_none());
        assert!(thread_child(manager, &remembered, StatId(300)).is_none());
        assert!(thread_child(manager + 1, &root, StatId(300)).is_none());

        forget_thread(manager);
        assert!(thread_child(manager, &root, StatId(300)).is_none());
    }

    #[test]
    fn offline_nodes_skip_history() {
        let info = StatInfo::new(Arc::from("Offline"), StatId(310), GroupId::GAME);
        let offline = CycleNode::new(info, ThreadIndex::current(), None, 9, true);
        offline.record(50);
        assert_eq!(offline.advance_frame(), 50);
        assert_eq!(offline.last_inclusive(), 50);
        assert_eq!(offline.history().inclusive.count(), 0);
    }
}
