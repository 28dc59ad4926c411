//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a cell is read, we can
//! register the current computation as a dependent.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Entering user code (a recompute
//! function, a root body, a sampled region) pushes a frame naming the
//! current owner, the current listener and the current clock; the returned
//! guard pops it when dropped.
//!
//! Owner and listener are separate: `sample` clears the listener but keeps
//! the owner, so computations created inside a sampled region are still
//! owned and disposed with their parent.

use std::cell::RefCell;

use crate::graph::{ClockId, NodeId};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Frame {
    /// Node that adopts computations created in this frame.
    pub owner: Option<NodeId>,
    /// Node that records a dependency on every source read in this frame.
    pub listener: Option<NodeId>,
    /// Clock new nodes are created in. `None` means the root clock.
    pub clock: Option<ClockId>,
    /// Children created in this frame survive their owner's re-runs.
    pub pinning: bool,
}

/// Guard that pops the context when dropped.
///
/// This ensures the context stack is properly maintained even if the
/// computation returns early with an error or panics.
pub(crate) struct ContextGuard {
    depth: usize,
}

impl ContextGuard {
    /// Push `frame` as the current context.
    pub fn enter(frame: Frame) -> Self {
        let depth = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(frame);
            stack.len()
        });
        Self { depth }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        // The thread may be tearing down its locals.
        let _ = CONTEXT_STACK.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "ReactiveContext mismatch: expected depth {}, got {}",
                self.depth,
                stack.len()
            );
            stack.pop();
        });
    }
}

/// The active frame, or the empty top-level frame.
pub(crate) fn current() -> Frame {
    CONTEXT_STACK.with(|stack| stack.borrow().last().copied().unwrap_or_default())
}

/// Frame with the same owner and clock but no listener.
pub(crate) fn untracked() -> Frame {
    Frame {
        listener: None,
        ..current()
    }
}

/// Frame with the same owner, listener and clock, adopting children as pinned.
pub(crate) fn pinned() -> Frame {
    Frame {
        pinning: true,
        ..current()
    }
}

/// Public view of the reactive context.
pub struct ReactiveContext;

impl ReactiveContext {
    /// Check if reads are currently being tracked.
    pub fn is_listening() -> bool {
        current().listener.is_some()
    }

    /// Check if there is an owner that new computations will attach to.
    pub fn has_owner() -> bool {
        current().owner.is_some()
    }

    /// Depth of the context stack.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}
