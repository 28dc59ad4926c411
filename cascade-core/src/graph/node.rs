//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//!
//! A node is either a data cell (a source with no inputs), a computation
//! (reads sources, may itself be read) or a root (a synthetic owner with no
//! body, created by `root`). All three share one struct so that the edge
//! bookkeeping and the owner tree can treat them uniformly.

use std::rc::Weak;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::arena::{ArenaKey, Key};
use super::edge::EdgeId;
use crate::error::Result;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Key);

impl ArenaKey for NodeId {
    fn from_key(key: Key) -> Self {
        Self(key)
    }

    fn key(self) -> Key {
        self.0
    }
}

/// Identifier of a clock (propagation scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClockId(Key);

impl ArenaKey for ClockId {
    fn from_key(key: Key) -> Self {
        Self(key)
    }

    fn key(self) -> Key {
        self.0
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A data cell. Cells are the roots of propagation: they have
    /// dependents but never dependencies.
    Data,

    /// A computation. It has dependencies, may have dependents, owns the
    /// computations created while it runs.
    Computation,

    /// A synthetic owner created by `root`. Owns children, never runs.
    Root,
}

/// Update state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// The node's value is up to date for its clock's current tick.
    Current,

    /// An input changed this tick; the node must re-run before its value
    /// can be trusted.
    Stale,

    /// The node's recompute function is on the call stack.
    Running,
}

/// The recompute callback of a computation.
pub type Body = Box<dyn FnMut() -> Result<()>>;

/// A cleanup callback. The flag is `true` when the owner is being disposed
/// and `false` when it is only re-running.
pub type Cleanup = Box<dyn FnOnce(bool)>;

/// The staged value of a data cell, applied when its clock ticks.
pub trait PendingChange {
    /// Move the pending value into place.
    fn commit(&self);

    /// Drop the pending value without applying it.
    fn discard(&self);
}

/// A node in the dependency graph.
pub struct Node {
    kind: NodeKind,

    /// Current update state.
    pub(crate) state: NodeState,

    /// Clock this node belongs to.
    pub(crate) clock: ClockId,

    /// Clock tick at which this node was last marked or updated.
    pub(crate) age: u64,

    /// Stale computation inputs still unresolved in the current tick.
    pub(crate) pending: u32,

    /// Run counter. Edges refreshed during the current run carry it.
    pub(crate) run: u64,

    /// Outbound edges (this node as a source).
    pub(crate) log: Vec<EdgeId>,

    /// Inbound edges keyed by source, in first-read order.
    pub(crate) sources: IndexMap<NodeId, EdgeId>,

    /// Inbound edges currently inactive but retained for reuse.
    pub(crate) inactive: usize,

    /// Structural owner, if any.
    pub(crate) owner: Option<NodeId>,

    /// Children torn down whenever this node re-runs.
    pub(crate) owned: SmallVec<[NodeId; 4]>,

    /// Children created under `pin`, torn down only on disposal.
    pub(crate) pinned: SmallVec<[NodeId; 2]>,

    pub(crate) cleanups: Vec<Cleanup>,

    /// `None` while running or once the node is inert.
    pub(crate) body: Option<Body>,

    /// Pending-value hook for data cells.
    pub(crate) change: Option<Weak<dyn PendingChange>>,

    /// Set once disposal has started; the node never runs again.
    pub(crate) disposed: bool,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind, clock: ClockId) -> Self {
        Self {
            kind,
            state: match kind {
                NodeKind::Computation => NodeState::Running, // Created in the middle of its first run
                NodeKind::Data | NodeKind::Root => NodeState::Current,
            },
            clock,
            age: 0,
            pending: 0,
            run: 0,
            log: Vec::new(),
            sources: IndexMap::new(),
            inactive: 0,
            owner: None,
            owned: SmallVec::new(),
            pinned: SmallVec::new(),
            cleanups: Vec::new(),
            body: None,
            change: None,
            disposed: false,
        }
    }

    /// Create a new data cell node.
    pub fn data(clock: ClockId) -> Self {
        Self::new(NodeKind::Data, clock)
    }

    /// Create a new computation node.
    pub fn computation(clock: ClockId) -> Self {
        let mut node = Self::new(NodeKind::Computation, clock);
        node.run = 1;
        node
    }

    /// Create a new root owner node.
    pub fn root(clock: ClockId) -> Self {
        Self::new(NodeKind::Root, clock)
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get the current update state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn clock(&self) -> ClockId {
        self.clock
    }

    pub fn is_computation(&self) -> bool {
        self.kind == NodeKind::Computation
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Number of active inbound edges.
    pub fn active_sources(&self) -> usize {
        self.sources.len() - self.inactive
    }

    /// Whether a freshly created computation can be reduced to a plain value.
    ///
    /// A computation that read nothing, owns nothing and registered no
    /// cleanups can never re-run, so it does not need a node.
    pub fn is_static(&self) -> bool {
        self.sources.is_empty()
            && self.owned.is_empty()
            && self.pinned.is_empty()
            && self.cleanups.is_empty()
    }

    /// Attach a child, pinned or cycle-scoped.
    pub fn adopt(&mut self, child: NodeId, pinned: bool) {
        if pinned {
            self.pinned.push(child);
        } else {
            self.owned.push(child);
        }
    }

    /// Detach a child from either owned list.
    pub fn release_child(&mut self, child: NodeId) {
        self.owned.retain(|c| *c != child);
        self.pinned.retain(|c| *c != child);
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("age", &self.age)
            .field("pending", &self.pending)
            .field("sources", &self.active_sources())
            .field("dependents", &self.log.len())
            .field("owned", &self.owned.len())
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::arena::Arena;

    fn clock() -> ClockId {
        let mut clocks: Arena<ClockId, ()> = Arena::new();
        clocks.insert(())
    }

    #[test]
    fn data_node_starts_current() {
        let node = Node::data(clock());
        assert_eq!(node.kind(), NodeKind::Data);
        assert_eq!(node.state(), NodeState::Current);
        assert!(!node.is_computation());
    }

    #[test]
    fn computation_node_starts_running() {
        let node = Node::computation(clock());
        assert_eq!(node.kind(), NodeKind::Computation);
        assert_eq!(node.state(), NodeState::Running);
        assert_eq!(node.run, 1);
    }

    #[test]
    fn fresh_computation_is_static() {
        let node = Node::computation(clock());
        assert!(node.is_static());
    }

    #[test]
    fn adopt_and_release_children() {
        let mut arena: Arena<NodeId, ()> = Arena::new();
        let a = arena.insert(());
        let b = arena.insert(());

        let mut owner = Node::root(clock());
        owner.adopt(a, false);
        owner.adopt(b, true);

        assert_eq!(owner.owned.as_slice(), &[a]);
        assert_eq!(owner.pinned.as_slice(), &[b]);
        assert!(!owner.is_static());

        owner.release_child(a);
        owner.release_child(b);
        assert!(owner.owned.is_empty());
        assert!(owner.pinned.is_empty());
    }
}
