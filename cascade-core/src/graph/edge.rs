//! Dependency Log
//!
//! Edge bookkeeping between sources and the computations that read them.
//!
//! Each consumer keeps its inbound edges in an `IndexMap` keyed by source,
//! which gives at most one edge per (source, consumer) pair and a stable
//! first-read order. Each source keeps its outbound edges in a plain vector;
//! every edge remembers its slot in that vector so it can be removed with a
//! `swap_remove` in O(1).
//!
//! # Activation
//!
//! Reading a source during a run either reactivates the existing edge or
//! allocates a new one, stamping it with the consumer's run counter. At the
//! end of the run, edges that were not stamped are deactivated but kept, so
//! a branch that flips back next run reuses its edge instead of allocating.
//! Once a consumer holds more inactive edges than the configured threshold,
//! its log is compacted and the inactive edges go back to the arena's free
//! list.

use super::arena::{ArenaKey, Key};
use super::node::NodeId;
use super::Graph;

/// Identifier of an edge in the dependency log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(Key);

impl ArenaKey for EdgeId {
    fn from_key(key: Key) -> Self {
        Self(key)
    }

    fn key(self) -> Key {
        self.0
    }
}

/// A directed dependency from `source` to `consumer`.
#[derive(Debug, Clone)]
pub struct Edge {
    pub source: NodeId,
    pub consumer: NodeId,

    /// Whether the consumer's latest run read the source.
    pub active: bool,

    /// The consumer's run counter when the edge was last refreshed.
    pub run: u64,

    /// Position of this edge in the source's outbound log.
    slot: usize,
}

impl Graph {
    /// Record that `consumer` read `source` during its current run.
    ///
    /// Returns `true` if a new edge was allocated, `false` if an existing one
    /// was refreshed or the link was refused (self-read, dead or disposed
    /// endpoint).
    pub fn link(&mut self, source: NodeId, consumer: NodeId) -> bool {
        if source == consumer {
            return false;
        }
        match self.nodes.get(source) {
            Some(node) if !node.disposed => {}
            _ => return false,
        }

        let run = {
            let Some(consumer_node) = self.nodes.get_mut(consumer) else {
                return false;
            };
            if consumer_node.disposed {
                return false;
            }
            let run = consumer_node.run;

            if let Some(&edge_id) = consumer_node.sources.get(&source) {
                if let Some(edge) = self.edges.get_mut(edge_id) {
                    if !edge.active {
                        edge.active = true;
                        consumer_node.inactive -= 1;
                    }
                    edge.run = run;
                }
                return false;
            }
            run
        };

        let slot = self.nodes.get(source).map_or(0, |node| node.log.len());
        let edge_id = self.edges.insert(Edge {
            source,
            consumer,
            active: true,
            run,
            slot,
        });

        if let Some(source_node) = self.nodes.get_mut(source) {
            source_node.log.push(edge_id);
        }
        if let Some(consumer_node) = self.nodes.get_mut(consumer) {
            consumer_node.sources.insert(source, edge_id);
        }
        true
    }

    /// Deactivate every inbound edge of `consumer` not refreshed during its
    /// latest run. Compacts the log once more than `threshold` inactive
    /// edges accumulate.
    ///
    /// Returns the number of edges deactivated.
    pub fn prune(&mut self, consumer: NodeId, threshold: usize) -> usize {
        let Some(node) = self.nodes.get_mut(consumer) else {
            return 0;
        };
        let run = node.run;

        let mut deactivated = 0;
        for edge_id in node.sources.values() {
            if let Some(edge) = self.edges.get_mut(*edge_id) {
                if edge.active && edge.run != run {
                    edge.active = false;
                    deactivated += 1;
                }
            }
        }
        node.inactive += deactivated;

        if node.inactive > threshold {
            self.compact(consumer);
        }
        deactivated
    }

    /// Free all inactive inbound edges of `consumer`.
    ///
    /// Returns the number of edges freed.
    pub fn compact(&mut self, consumer: NodeId) -> usize {
        let Some(node) = self.nodes.get_mut(consumer) else {
            return 0;
        };
        if node.inactive == 0 {
            return 0;
        }

        let edges = &self.edges;
        let is_active = |edge_id: &EdgeId| edges.get(*edge_id).is_some_and(|e| e.active);

        let stale: Vec<_> = node
            .sources
            .values()
            .copied()
            .filter(|edge_id| !is_active(edge_id))
            .collect();
        node.sources.retain(|_, edge_id| is_active(&*edge_id));
        node.inactive = 0;

        for edge_id in &stale {
            self.detach_from_source(*edge_id);
        }
        self.compactions += 1;
        stale.len()
    }

    /// Free every inbound edge of `consumer`.
    pub fn unlink_inbound(&mut self, consumer: NodeId) {
        let Some(node) = self.nodes.get_mut(consumer) else {
            return;
        };
        let sources = std::mem::take(&mut node.sources);
        node.inactive = 0;

        for edge_id in sources.values() {
            self.detach_from_source(*edge_id);
        }
    }

    /// Free every outbound edge of `source`, removing it from each
    /// consumer's inbound log.
    pub fn unlink_outbound(&mut self, source: NodeId) {
        let Some(node) = self.nodes.get_mut(source) else {
            return;
        };
        let log = std::mem::take(&mut node.log);

        for edge_id in log {
            let Some(edge) = self.edges.remove(edge_id) else {
                continue;
            };
            if let Some(consumer) = self.nodes.get_mut(edge.consumer) {
                if consumer.sources.shift_remove(&source).is_some() && !edge.active {
                    consumer.inactive -= 1;
                }
            }
        }
    }

    /// Active consumers of `source`, with the run stamp of each edge.
    pub fn dependents(&self, source: NodeId) -> Vec<(NodeId, u64)> {
        let Some(node) = self.nodes.get(source) else {
            return Vec::new();
        };
        node.log
            .iter()
            .filter_map(|edge_id| self.edges.get(*edge_id))
            .filter(|edge| edge.active)
            .map(|edge| (edge.consumer, edge.run))
            .collect()
    }

    /// Active sources of `consumer` in first-read order.
    pub fn sources_of(&self, consumer: NodeId) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(consumer) else {
            return Vec::new();
        };
        node.sources
            .iter()
            .filter(|(_, edge_id)| self.edges.get(**edge_id).is_some_and(|e| e.active))
            .map(|(source, _)| *source)
            .collect()
    }

    pub fn edge(&self, edge_id: EdgeId) -> Option<&Edge> {
        self.edges.get(edge_id)
    }

    /// Count of (active, inactive) edges.
    pub fn edge_counts(&self) -> (usize, usize) {
        self.edges.iter().fold((0, 0), |(active, inactive), (_, edge)| {
            if edge.active {
                (active + 1, inactive)
            } else {
                (active, inactive + 1)
            }
        })
    }

    /// Remove an edge from the arena and from its source's outbound log.
    /// The consumer side is the caller's responsibility.
    fn detach_from_source(&mut self, edge_id: EdgeId) {
        let Some(edge) = self.edges.remove(edge_id) else {
            return;
        };
        let Some(source) = self.nodes.get_mut(edge.source) else {
            return;
        };

        let slot = edge.slot;
        if source.log.get(slot) != Some(&edge_id) {
            return;
        }
        source.log.swap_remove(slot);
        if let Some(&moved) = source.log.get(slot) {
            if let Some(moved_edge) = self.edges.get_mut(moved) {
                moved_edge.slot = slot;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{ClockId, Node};
    use crate::graph::arena::Arena;

    fn setup() -> (Graph, ClockId) {
        let mut clocks: Arena<ClockId, ()> = Arena::new();
        (Graph::new(), clocks.insert(()))
    }

    #[test]
    fn link_is_idempotent_per_pair() {
        let (mut graph, clock) = setup();
        let cell = graph.insert(Node::data(clock));
        let comp = graph.insert(Node::computation(clock));

        assert!(graph.link(cell, comp));
        assert!(!graph.link(cell, comp));
        assert!(!graph.link(cell, comp));

        assert_eq!(graph.edge_counts(), (1, 0));
        assert_eq!(graph.dependents(cell).len(), 1);
        assert_eq!(graph.sources_of(comp), vec![cell]);
    }

    #[test]
    fn self_link_is_refused() {
        let (mut graph, clock) = setup();
        let comp = graph.insert(Node::computation(clock));
        assert!(!graph.link(comp, comp));
        assert_eq!(graph.edge_counts(), (0, 0));
    }

    #[test]
    fn prune_deactivates_unrefreshed_edges() {
        let (mut graph, clock) = setup();
        let a = graph.insert(Node::data(clock));
        let b = graph.insert(Node::data(clock));
        let comp = graph.insert(Node::computation(clock));

        graph.link(a, comp);
        graph.link(b, comp);
        assert_eq!(graph.prune(comp, 16), 0);

        // Second run only reads `a`
        graph.node_mut(comp).unwrap().run += 1;
        graph.link(a, comp);
        assert_eq!(graph.prune(comp, 16), 1);

        assert_eq!(graph.edge_counts(), (1, 1));
        assert!(graph.dependents(b).is_empty());
        assert_eq!(graph.sources_of(comp), vec![a]);
    }

    #[test]
    fn inactive_edge_is_reused() {
        let (mut graph, clock) = setup();
        let a = graph.insert(Node::data(clock));
        let comp = graph.insert(Node::computation(clock));

        graph.link(a, comp);
        graph.node_mut(comp).unwrap().run += 1;
        graph.prune(comp, 16);
        assert_eq!(graph.edge_counts(), (0, 1));

        graph.node_mut(comp).unwrap().run += 1;
        assert!(!graph.link(a, comp), "re-read must reuse the edge");
        graph.prune(comp, 16);
        assert_eq!(graph.edge_counts(), (1, 0));
    }

    #[test]
    fn compaction_frees_inactive_edges_and_fixes_slots() {
        let (mut graph, clock) = setup();
        let source = graph.insert(Node::data(clock));
        let c1 = graph.insert(Node::computation(clock));
        let c2 = graph.insert(Node::computation(clock));
        let c3 = graph.insert(Node::computation(clock));

        graph.link(source, c1);
        graph.link(source, c2);
        graph.link(source, c3);

        // c1 drops the source; threshold 0 compacts immediately
        graph.node_mut(c1).unwrap().run += 1;
        graph.prune(c1, 0);
        assert_eq!(graph.edge_counts(), (2, 0));
        assert_eq!(graph.compactions, 1);

        let consumers: Vec<_> = graph.dependents(source).into_iter().map(|(c, _)| c).collect();
        assert_eq!(consumers.len(), 2);
        assert!(consumers.contains(&c2));
        assert!(consumers.contains(&c3));

        // The moved edge must still be removable through its slot
        graph.unlink_inbound(c3);
        assert_eq!(graph.dependents(source), vec![(c2, 1)]);
    }

    #[test]
    fn unlink_outbound_clears_consumers() {
        let (mut graph, clock) = setup();
        let source = graph.insert(Node::computation(clock));
        let consumer = graph.insert(Node::computation(clock));

        graph.link(source, consumer);
        graph.unlink_outbound(source);

        assert!(graph.sources_of(consumer).is_empty());
        assert_eq!(graph.edge_counts(), (0, 0));
    }

    #[test]
    fn disposed_nodes_cannot_gain_edges() {
        let (mut graph, clock) = setup();
        let source = graph.insert(Node::data(clock));
        let consumer = graph.insert(Node::computation(clock));
        graph.node_mut(consumer).unwrap().disposed = true;

        assert!(!graph.link(source, consumer));
        assert_eq!(graph.edge_counts(), (0, 0));
    }
}
