//! RAII guards timing a cycle scope.

use std::marker::PhantomData;
use std::sync::Arc;

use framestat_core::StatId;

use crate::cycle::CycleNode;
use crate::manager::StatManager;

/// A scope entered on the calling thread.
pub(crate) struct ActiveScope {
    pub(crate) node: Arc<CycleNode>,
    pub(crate) start: u32,
}

/// Times the enclosing scope unconditionally.
///
/// Guards are bound to the thread that created them.
#[must_use = "the scope is timed until the guard is dropped"]
pub struct CycleCounter<'a> {
    manager: &'a StatManager,
    scope: Option<ActiveScope>,
    _thread_bound: PhantomData<*const ()>,
}

impl<'a> CycleCounter<'a> {
    #[inline]
    pub fn new(manager: &'a StatManager, stat: StatId) -> Self {
        Self {
            manager,
            scope: manager.start_scope(stat),
            _thread_bound: PhantomData,
        }
    }

    /// Whether the scope is being timed.
    pub fn is_timing(&self) -> bool {
        self.scope.is_some()
    }
}

impl Drop for CycleCounter<'_> {
    #[inline]
    fn drop(&mut self) {
        if let Some(scope) = self.scope.take() {
            self.manager.stop_scope(scope);
        }
    }
}

/// Times the enclosing scope only while something consumes the results:
/// a visible group, a non-grouped HUD mode, a listening sink or forced
/// enabling. The check happens once, on entry.
#[must_use = "the scope is timed until the guard is dropped"]
pub struct ScopeCycleCounter<'a> {
    inner: CycleCounter<'a>,
}

impl<'a> ScopeCycleCounter<'a> {
    #[inline]
    pub fn new(manager: &'a StatManager, stat: StatId) -> Self {
        let scope = if manager.scopes_enabled() {
            manager.start_scope(stat)
        } else {
            None
        };
        Self {
            inner: CycleCounter {
                manager,
                scope,
                _thread_bound: PhantomData,
            },
        }
    }

    /// Whether the scope is being timed.
    pub fn is_timing(&self) -> bool {
        self.inner.is_timing()
    }
}

/// A guard that starts idle and times from [`Self::start`] until it is
/// stopped or dropped.
#[must_use = "the scope is timed until the guard is dropped"]
pub struct ConditionalCycleCounter<'a> {
    manager: &'a StatManager,
    scope: Option<ActiveScope>,
    _thread_bound: PhantomData<*const ()>,
}

impl<'a> ConditionalCycleCounter<'a> {
    pub fn new(manager: &'a StatManager) -> Self {
        Self {
            manager,
            scope: None,
            _thread_bound: PhantomData,
        }
    }

    /// Start timing `stat`, subject to the same check as
    /// [`ScopeCycleCounter`]. Ignored while already timing.
    pub fn start(&mut self, stat: StatId) {
        debug_assert!(self.scope.is_none(), "conditional scope started twice");
        if self.scope.is_none() && self.manager.scopes_enabled() {
            self.scope = self.manager.start_scope(stat);
        }
    }

    /// Stop timing early.
    pub fn stop(&mut self) {
        if let Some(scope) = self.scope.take() {
            self.manager.stop_scope(scope);
        }
    }

    /// Whether the scope is being timed.
    pub fn is_timing(&self) -> bool {
        self.scope.is_some()
    }
}

impl Drop for ConditionalCycleCounter<'_> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::{manager, WORK};
    use framestat_core::{GroupId, ThreadIndex};

    #[test]
    fn scope_counter_idles_until_something_listens() {
        let (manager, clock) = manager();
        {
            let guard = ScopeCycleCounter::new(&manager, WORK);
            assert!(!guard.is_timing());
            clock.advance(10);
        }
        assert!(manager.cycle_stat(WORK, ThreadIndex::current()).is_none());

        manager.set_group_visible(GroupId::GAME, true);
        {
            let guard = ScopeCycleCounter::new(&manager, WORK);
            assert!(guard.is_timing());
            clock.advance(10);
        }
        manager.advance_frame();
        let node = manager.cycle_stat(WORK, ThreadIndex::current()).unwrap();
        assert_eq!(node.history().inclusive.most_recent(), 10);
    }

    #[test]
    fn forced_enabling_turns_scopes_on() {
        let (manager, _clock) = manager();
        manager.set_force_enabled(true);
        assert!(ScopeCycleCounter::new(&manager, WORK).is_timing());
        manager.set_force_enabled(false);
        assert!(!ScopeCycleCounter::new(&manager, WORK).is_timing());
    }

    #[test]
    fn conditional_counter_times_between_start_and_stop() {
        let (manager, clock) = manager();
        manager.set_force_enabled(true);
        let mut guard = ConditionalCycleCounter::new(&manager);
        clock.advance(50);
        guard.start(WORK);
        assert!(guard.is_timing());
        clock.advance(20);
        guard.stop();
        clock.advance(50);
        drop(guard);
        manager.advance_frame();
        let node = manager.cycle_stat(WORK, ThreadIndex::current()).unwrap();
        assert_eq!(node.history().inclusive.most_recent(), 20);
    }
}
