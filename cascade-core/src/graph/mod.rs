//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between data cells and computations, and the algorithms that walk it.
//!
//! # Overview
//!
//! - Nodes are data cells, computations, or synthetic root owners.
//! - Edges represent dependencies: if computation C read source S during its
//!   latest run, there is an active edge from S to C.
//!
//! Two independent structures share the node arena:
//!
//! - the **dependency graph** (edges), describing data flow;
//! - the **owner tree** (`owner` / `owned` / `pinned`), describing
//!   structural lifetime for cascading disposal.
//!
//! # Design Decisions
//!
//! 1. Nodes and edges live in generational arenas and refer to each other by
//!    index only. There are no reference cycles to break, and a handle whose
//!    node is gone simply stops resolving.
//!
//! 2. Both directions are kept: every consumer knows its sources (to
//!    refresh and prune them per run) and every source knows its consumers
//!    (to mark them).
//!
//! 3. Nothing in this module calls user code. The reactive runtime takes
//!    callbacks out of nodes before invoking them.

mod arena;
mod edge;
mod node;
mod queue;
mod scheduler;

pub use arena::{Arena, ArenaKey, Key};
pub use edge::{Edge, EdgeId};
pub use node::{Body, Cleanup, ClockId, Node, NodeId, NodeKind, NodeState, PendingChange};
pub use queue::Queue;

/// Node and edge storage.
#[derive(Default)]
pub struct Graph {
    nodes: Arena<NodeId, Node>,
    edges: Arena<EdgeId, Edge>,

    /// Number of dependency-log compactions performed.
    pub(crate) compactions: u64,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph.
    pub fn insert(&mut self, node: Node) -> NodeId {
        self.nodes.insert(node)
    }

    /// Remove a node from the graph, freeing all edges touching it.
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.unlink_inbound(id);
        self.unlink_outbound(id);
        self.nodes.remove(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Iterate over live nodes.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    /// `id` and everything it transitively owns, parents before children.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            out.push(current);
            stack.extend(node.pinned.iter().rev().copied());
            stack.extend(node.owned.iter().rev().copied());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> ClockId {
        let mut clocks: Arena<ClockId, ()> = Arena::new();
        clocks.insert(())
    }

    #[test]
    fn add_and_remove_nodes() {
        let clock = clock();
        let mut graph = Graph::new();

        let id1 = graph.insert(Node::data(clock));
        let id2 = graph.insert(Node::computation(clock));
        graph.link(id1, id2);

        assert_eq!(graph.node_count(), 2);

        graph.remove(id1);
        assert_eq!(graph.node_count(), 1);
        assert!(graph.node(id1).is_none());
        assert!(graph.sources_of(id2).is_empty());
        assert_eq!(graph.edge_counts(), (0, 0));
    }

    #[test]
    fn subtree_lists_parents_first() {
        let clock = clock();
        let mut graph = Graph::new();

        let root = graph.insert(Node::root(clock));
        let child = graph.insert(Node::computation(clock));
        let pinned = graph.insert(Node::computation(clock));
        let grandchild = graph.insert(Node::computation(clock));

        graph.node_mut(root).unwrap().adopt(child, false);
        graph.node_mut(root).unwrap().adopt(pinned, true);
        graph.node_mut(child).unwrap().adopt(grandchild, false);

        let tree = graph.subtree(root);
        assert_eq!(tree, vec![root, child, grandchild, pinned]);
    }
}
