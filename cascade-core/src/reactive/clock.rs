//! Clocks
//!
//! A clock is a propagation scope. It stages cell writes and resolves them
//! in ticks: apply changes, settle stale subclocks, re-run stale
//! computations, tear down disposed nodes, repeat until quiet.
//!
//! There is always a root clock. `subclock` creates a child clock: nodes
//! created inside it belong to it, and the parent runs it to its own
//! fixpoint before the parent's computations see any of its results. That
//! lets a group of computations iterate (write, re-run, write again) until
//! they converge, without outside observers seeing intermediate values.
//!
//! Each clock counts its own ticks; the time of a subclock as seen from
//! outside is the sum of its ancestors' times.

use std::collections::VecDeque;

use crate::graph::{ClockId, NodeId, Queue};
use super::context::{self, ContextGuard, Frame};
use super::runtime;

/// Batch state of a clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClockPhase {
    /// Idle. Writes to its cells propagate immediately.
    Current,

    /// A batch is open; writes are staged until it closes.
    Stale,

    /// The clock is draining its queues.
    Running,
}

/// Per-clock queues and time.
pub(crate) struct ClockState {
    pub parent: Option<ClockId>,
    pub children: Vec<ClockId>,
    pub time: u64,
    pub phase: ClockPhase,

    /// Cells with a staged value.
    pub changes: Queue<NodeId>,
    /// Computations marked stale.
    pub updates: Queue<NodeId>,
    /// Child clocks with pending work.
    pub subclocks: Queue<ClockId>,
    /// Nodes whose teardown was deferred to the end of the tick.
    pub disposes: Queue<NodeId>,

    /// Stale computations whose inputs have all settled this tick.
    pub ready: VecDeque<NodeId>,

    /// Whether this clock sits in its parent's `subclocks` queue.
    pub scheduled: bool,
    /// Live nodes belonging to this clock.
    pub members: usize,
    /// The scope that created this clock is gone.
    pub retired: bool,
}

impl ClockState {
    pub fn new(parent: Option<ClockId>) -> Self {
        Self {
            parent,
            children: Vec::new(),
            time: 0,
            phase: ClockPhase::Current,
            changes: Queue::new(),
            updates: Queue::new(),
            subclocks: Queue::new(),
            disposes: Queue::new(),
            ready: VecDeque::new(),
            scheduled: false,
            members: 0,
            retired: false,
        }
    }

    /// Whether any phase has queued work.
    pub fn has_work(&self) -> bool {
        !self.changes.is_empty()
            || !self.updates.is_empty()
            || !self.subclocks.is_empty()
            || !self.disposes.is_empty()
    }

    /// Whether the clock can be freed.
    pub fn is_collectable(&self) -> bool {
        self.parent.is_some()
            && self.retired
            && self.members == 0
            && self.children.is_empty()
            && self.phase == ClockPhase::Current
            && !self.has_work()
    }
}

/// Handle to a clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    id: ClockId,
}

impl Clock {
    pub(crate) fn from_id(id: ClockId) -> Self {
        Self { id }
    }

    /// The root clock of the current thread.
    pub fn root() -> Self {
        Self::from_id(runtime::with(|rt| rt.root_clock))
    }

    /// The clock new nodes are currently created in.
    pub fn current() -> Self {
        let frame = context::current();
        Self::from_id(runtime::with(|rt| rt.resolve_clock(frame.clock)))
    }

    /// Hierarchical time: this clock's ticks plus all of its ancestors'.
    ///
    /// Returns 0 once the clock has been collected.
    pub fn time(&self) -> u64 {
        runtime::with(|rt| {
            let mut total = 0;
            let mut current = Some(self.id);
            while let Some(id) = current {
                let Some(state) = rt.clocks.get(id) else {
                    break;
                };
                total += state.time;
                current = state.parent;
            }
            total
        })
    }

    /// Ticks run by this clock alone.
    pub fn local_time(&self) -> u64 {
        runtime::with(|rt| rt.clocks.get(self.id).map_or(0, |state| state.time))
    }

    /// Parent clock, `None` for the root.
    pub fn parent(&self) -> Option<Clock> {
        runtime::with(|rt| rt.clocks.get(self.id).and_then(|state| state.parent))
            .map(Clock::from_id)
    }

    /// Whether this clock is draining its queues right now.
    pub fn is_running(&self) -> bool {
        runtime::with(|rt| {
            rt.clocks
                .get(self.id)
                .is_some_and(|state| state.phase == ClockPhase::Running)
        })
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }
}

/// Run `f` in a new child of the current clock.
///
/// Cells and computations created inside `f` belong to the new clock. If
/// `f` runs inside a computation or root, the clock is retired when that
/// owner re-runs or is disposed; otherwise it is retired when `f` returns.
/// A retired clock is collected once its last node is gone.
pub fn subclock<R>(f: impl FnOnce(Clock) -> R) -> R {
    let frame = context::current();
    let id = runtime::with(|rt| {
        let parent = rt.resolve_clock(frame.clock);
        rt.new_clock(parent)
    });

    let attached = frame.owner.is_some_and(|owner| {
        let retire: crate::graph::Cleanup = Box::new(move |_| runtime::with(|rt| rt.retire_clock(id)));
        runtime::with(|rt| match rt.graph.node_mut(owner) {
            Some(node) if !node.is_disposed() => {
                node.cleanups.push(retire);
                true
            }
            _ => false,
        })
    });

    let result = {
        let _ctx = ContextGuard::enter(Frame {
            clock: Some(id),
            ..frame
        });
        f(Clock::from_id(id))
    };

    if !attached {
        tracing::trace!(clock = ?id, "ownerless subclock retired");
        runtime::with(|rt| rt.retire_clock(id));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_clock_has_no_parent() {
        let root = Clock::root();
        assert!(root.is_root());
        assert_eq!(Clock::current(), root);
    }

    #[test]
    fn subclock_is_current_inside_and_restored_after() {
        let root = Clock::root();
        let inner = subclock(|clock| {
            assert_eq!(Clock::current(), clock);
            assert_eq!(clock.parent(), Some(root));
            clock
        });
        assert_ne!(inner, root);
        assert_eq!(Clock::current(), root);
    }

    #[test]
    fn nested_subclock_time_sums_ancestors() {
        subclock(|outer| {
            subclock(|inner| {
                assert_eq!(inner.parent(), Some(outer));
                assert_eq!(inner.time(), outer.time() + inner.local_time());
            })
        });
    }

    #[test]
    fn ownerless_subclock_is_collected_when_empty() {
        let before = crate::reactive::stats().clocks;
        let inner = subclock(|clock| clock);
        assert_eq!(crate::reactive::stats().clocks, before);
        assert_eq!(inner.parent(), None);
        assert_eq!(inner.local_time(), 0);
    }

    #[test]
    fn ownerless_subclock_outlives_its_nodes_only() {
        let before = crate::reactive::stats().clocks;
        let cell = subclock(|_| crate::reactive::data(1).unwrap());
        assert_eq!(crate::reactive::stats().clocks, before + 1);
        drop(cell);
        assert_eq!(crate::reactive::stats().clocks, before);
    }

    #[test]
    fn fresh_state_is_idle() {
        let state = ClockState::new(None);
        assert!(!state.has_work());
        assert_eq!(state.phase, ClockPhase::Current);
        assert!(!state.is_collectable(), "root clocks are never collected");
    }
}
