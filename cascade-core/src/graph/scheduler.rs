//! Propagation Engine
//!
//! The scheduler decides which computations must re-run after a tick's cell
//! changes, and in what order.
//!
//! # Algorithm
//!
//! Propagation is two-phase per tick:
//!
//! 1. **Mark.** Starting from each changed cell, walk active outbound edges
//!    and flip every reachable computation from `Current` to `Stale`. A
//!    consumer reached through a stale *computation* gets its pending count
//!    bumped once per such input. Dirtiness is fully propagated before any
//!    computation re-runs, so nothing downstream can run early.
//!
//! 2. **Notify.** Stale computations with a pending count of zero are ready.
//!    When a computation finishes (or is cancelled), each stale consumer's
//!    count drops by one; at zero it becomes ready itself. A computation with
//!    N stale inputs therefore runs exactly once, after all N settled.
//!
//! Dynamic dependencies can move a computation's inputs mid-tick. The
//! runtime covers that by forcing a synchronous update whenever a stale node
//! is read, and by sweeping any stale node whose count never reached zero.
//!
//! Both walks are iterative worklists, so deep chains do not grow the call
//! stack.

use std::collections::HashSet;

use super::node::{Node, NodeId, NodeState};
use super::Graph;

impl Graph {
    /// Mark everything downstream of `source` stale.
    ///
    /// Newly staled nodes are appended to `marked` in marking order, even when
    /// the walk stops early. Fails with the offending node if marking reaches
    /// a computation that is running in the same clock as `source`.
    pub fn mark(&mut self, source: NodeId, marked: &mut Vec<NodeId>) -> Result<(), NodeId> {
        let Some(origin_clock) = self.nodes.get(source).map(Node::clock) else {
            return Ok(());
        };

        let mut stack = vec![source];
        while let Some(current) = stack.pop() {
            let from_computation = self.nodes.get(current).is_some_and(Node::is_computation);

            for (consumer, _) in self.dependents(current) {
                let Some(node) = self.nodes.get_mut(consumer) else {
                    continue;
                };
                if node.disposed {
                    continue;
                }

                match node.state {
                    NodeState::Current => {
                        node.state = NodeState::Stale;
                        node.pending = u32::from(from_computation);
                        marked.push(consumer);
                        stack.push(consumer);
                    }
                    NodeState::Stale => {
                        if from_computation {
                            node.pending += 1;
                        }
                    }
                    NodeState::Running => {
                        // A running node in another clock is re-deriving
                        // right now and will see the settled value.
                        if node.clock == origin_clock {
                            return Err(consumer);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve `node` for the current tick and notify its consumers.
    ///
    /// Returns the consumers whose last pending input just settled.
    pub fn settle(&mut self, node: NodeId) -> Vec<NodeId> {
        if let Some(n) = self.nodes.get_mut(node) {
            n.pending = 0;
        }

        let mut ready = Vec::new();
        for (consumer, _) in self.dependents(node) {
            let Some(c) = self.nodes.get_mut(consumer) else {
                continue;
            };
            if c.state == NodeState::Stale && !c.disposed {
                c.pending = c.pending.saturating_sub(1);
                if c.pending == 0 {
                    ready.push(consumer);
                }
            }
        }
        ready
    }

    /// Return every stale computation downstream of `failed` to `Current`
    /// without running it, clearing its marks.
    ///
    /// Returns the cancelled nodes.
    pub fn cancel_downstream(&mut self, failed: NodeId) -> Vec<NodeId> {
        let mut cancelled = Vec::new();
        let mut stack = vec![failed];

        while let Some(current) = stack.pop() {
            for (consumer, _) in self.dependents(current) {
                let Some(node) = self.nodes.get_mut(consumer) else {
                    continue;
                };
                if node.state == NodeState::Stale {
                    node.state = NodeState::Current;
                    node.pending = 0;
                    cancelled.push(consumer);
                    stack.push(consumer);
                }
            }
        }
        cancelled
    }

    /// Whether a write to `cell` would feed back into a computation that is
    /// still running in the cell's clock.
    ///
    /// A running node only counts through an edge refreshed during its
    /// current run: an edge left over from a previous run is not a
    /// dependency of the value being computed.
    pub fn feeds_running(&self, cell: NodeId) -> bool {
        let Some(clock) = self.nodes.get(cell).map(Node::clock) else {
            return false;
        };

        let mut visited = HashSet::new();
        let mut stack = vec![cell];
        while let Some(current) = stack.pop() {
            for (consumer, run) in self.dependents(current) {
                let Some(node) = self.nodes.get(consumer) else {
                    continue;
                };
                match node.state {
                    NodeState::Running => {
                        if node.clock == clock && node.run == run {
                            return true;
                        }
                    }
                    NodeState::Current | NodeState::Stale => {
                        if visited.insert(consumer) {
                            stack.push(consumer);
                        }
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::arena::Arena;
    use crate::graph::node::ClockId;

    fn clock() -> ClockId {
        let mut clocks: Arena<ClockId, ()> = Arena::new();
        clocks.insert(())
    }

    fn settled(graph: &mut Graph, id: NodeId) {
        graph.node_mut(id).unwrap().state = NodeState::Current;
    }

    /// Build `cell -> a -> c` and `cell -> b -> c`.
    fn diamond() -> (Graph, [NodeId; 4]) {
        let clock = clock();
        let mut graph = Graph::new();
        let cell = graph.insert(Node::data(clock));
        let a = graph.insert(Node::computation(clock));
        let b = graph.insert(Node::computation(clock));
        let c = graph.insert(Node::computation(clock));

        graph.link(cell, a);
        graph.link(cell, b);
        graph.link(a, c);
        graph.link(b, c);
        for id in [a, b, c] {
            settled(&mut graph, id);
        }
        (graph, [cell, a, b, c])
    }

    #[test]
    fn mark_propagates_transitively() {
        let (mut graph, [cell, a, b, c]) = diamond();
        let mut marked = Vec::new();
        graph.mark(cell, &mut marked).unwrap();

        assert_eq!(marked.len(), 3);
        for id in [a, b, c] {
            assert_eq!(graph.node(id).unwrap().state(), NodeState::Stale);
        }
        // Inputs reached from the cell carry no pending count
        assert_eq!(graph.node(a).unwrap().pending, 0);
        assert_eq!(graph.node(b).unwrap().pending, 0);
        // Two stale computation inputs
        assert_eq!(graph.node(c).unwrap().pending, 2);
    }

    #[test]
    fn consumer_becomes_ready_after_all_inputs_settle() {
        let (mut graph, [cell, a, b, c]) = diamond();
        graph.mark(cell, &mut Vec::new()).unwrap();

        settled(&mut graph, a);
        assert!(graph.settle(a).is_empty());

        settled(&mut graph, b);
        assert_eq!(graph.settle(b), vec![c]);
    }

    #[test]
    fn mark_reaching_running_node_in_same_clock_is_circular() {
        let (mut graph, [cell, a, _, _]) = diamond();
        graph.node_mut(a).unwrap().state = NodeState::Running;

        let err = graph.mark(cell, &mut Vec::new()).unwrap_err();
        assert_eq!(err, a);
    }

    #[test]
    fn cancel_downstream_clears_marks() {
        let (mut graph, [cell, a, _, c]) = diamond();
        graph.mark(cell, &mut Vec::new()).unwrap();

        let cancelled = graph.cancel_downstream(a);
        assert_eq!(cancelled, vec![c]);
        assert_eq!(graph.node(c).unwrap().state(), NodeState::Current);
        assert_eq!(graph.node(c).unwrap().pending, 0);
    }

    #[test]
    fn feedback_detected_only_through_refreshed_edges() {
        let clock = clock();
        let mut graph = Graph::new();
        let cell = graph.insert(Node::data(clock));
        let writer = graph.insert(Node::computation(clock));

        graph.link(cell, writer);
        // `writer` is running its first run and has read `cell`
        assert!(graph.feeds_running(cell));

        // Next run has not read `cell` yet: the old edge does not count
        graph.node_mut(writer).unwrap().run += 1;
        assert!(!graph.feeds_running(cell));
    }

    #[test]
    fn feedback_detected_transitively() {
        let clock = clock();
        let mut graph = Graph::new();
        let cell = graph.insert(Node::data(clock));
        let middle = graph.insert(Node::computation(clock));
        let writer = graph.insert(Node::computation(clock));

        graph.link(cell, middle);
        settled(&mut graph, middle);
        graph.link(middle, writer);

        assert!(graph.feeds_running(cell));
    }
}
