//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects data cells and
//! computations. It owns the dependency graph and the clocks, and drives
//! propagation when cells change.
//!
//! # How It Works
//!
//! 1. A write outside any batch opens one on the root clock. Writes inside
//!    a batch are staged on the cell's clock instead.
//!
//! 2. Each clock runs in ticks. A tick applies the staged writes, marks
//!    everything downstream stale, runs child clocks to their own fixpoint,
//!    re-runs stale computations in dependency order, and tears down nodes
//!    whose disposal was deferred. Writes made during a tick are staged for
//!    the next one.
//!
//! 3. The batch ends when a tick finds every queue empty, or fails once the
//!    clock has ticked `runaway_limit` times.
//!
//! # Re-entrancy
//!
//! The runtime lives in a thread-local `RefCell`. User callbacks (recompute
//! functions, cleanups, value drops) are never invoked while it is
//! borrowed: they are moved out of the graph, called, and moved back. Every
//! entry point below borrows the runtime only for short bookkeeping steps.

use std::cell::RefCell;
use std::mem;
use std::rc::{Rc, Weak};

use tracing::{debug, error, trace, trace_span, warn};

use crate::config::{EngineConfig, EngineStats};
use crate::error::{ReactiveError, Result};
use crate::graph::{
    Arena, Body, Cleanup, ClockId, Graph, Node, NodeId, NodeKind, NodeState, PendingChange,
};

use super::clock::{ClockPhase, ClockState};
use super::context::{self, ContextGuard, Frame};

thread_local! {
    static RUNTIME: RefCell<Runtime> = RefCell::new(Runtime::new());

    // Cells dropped while the runtime was borrowed; freed on the next pass.
    static RELEASED: RefCell<Vec<NodeId>> = const { RefCell::new(Vec::new()) };
}

/// Run `f` with exclusive access to this thread's runtime.
///
/// `f` must not call back into user code.
pub(crate) fn with<R>(f: impl FnOnce(&mut Runtime) -> R) -> R {
    RUNTIME.with(|rt| f(&mut rt.borrow_mut()))
}

#[derive(Debug, Default)]
struct Counters {
    ticks: u64,
    batches: u64,
    runs: u64,
}

/// The per-thread reactive runtime.
pub(crate) struct Runtime {
    pub graph: Graph,
    pub clocks: Arena<ClockId, ClockState>,
    pub root_clock: ClockId,
    pub config: EngineConfig,

    /// Computations whose recompute function is on the stack.
    running: usize,
    counters: Counters,
}

/// What a read must do before the value can be returned.
enum ReadAction {
    Ready,
    Update,
    Circular,
    ResolveClock(ClockId),
}

/// Outcome of claiming a computation for a re-run.
enum Start {
    Skip,
    Circular,
    Run {
        body: Body,
        cleanups: Vec<Cleanup>,
        children: Vec<NodeId>,
        clock: ClockId,
    },
}

/// A node whose teardown has begun.
struct Doomed {
    id: NodeId,
    body: Option<Body>,
    cleanups: Vec<Cleanup>,
}

impl Runtime {
    fn new() -> Self {
        let mut clocks = Arena::new();
        let root_clock = clocks.insert(ClockState::new(None));
        Self {
            graph: Graph::new(),
            clocks,
            root_clock,
            config: EngineConfig::default(),
            running: 0,
            counters: Counters::default(),
        }
    }

    // ---- clocks ----

    /// The clock a frame creates nodes in.
    pub fn resolve_clock(&self, clock: Option<ClockId>) -> ClockId {
        clock
            .filter(|id| self.clocks.contains(*id))
            .unwrap_or(self.root_clock)
    }

    pub fn new_clock(&mut self, parent: ClockId) -> ClockId {
        let id = self.clocks.insert(ClockState::new(Some(parent)));
        if let Some(state) = self.clocks.get_mut(parent) {
            state.children.push(id);
        }
        trace!(clock = ?id, parent = ?parent, "subclock created");
        id
    }

    /// Mark a subclock as abandoned by its creator.
    pub fn retire_clock(&mut self, id: ClockId) {
        if let Some(state) = self.clocks.get_mut(id) {
            state.retired = true;
        }
        self.collect_clock(id);
    }

    /// Free `id` and any retired ancestors it was keeping alive.
    fn collect_clock(&mut self, id: ClockId) {
        let mut current = Some(id);
        while let Some(id) = current {
            if !self.clocks.get(id).is_some_and(ClockState::is_collectable) {
                return;
            }
            let Some(state) = self.clocks.remove(id) else {
                return;
            };
            trace!(clock = ?id, "subclock collected");
            current = state.parent;
            if let Some(parent) = state.parent.and_then(|p| self.clocks.get_mut(p)) {
                parent.children.retain(|c| *c != id);
            }
        }
    }

    /// Whether the root clock has an open batch.
    pub fn frozen(&self) -> bool {
        self.clocks
            .get(self.root_clock)
            .is_some_and(|state| state.phase != ClockPhase::Current)
    }

    /// Open a batch on the root clock. Returns `false` if one is already open.
    pub fn begin_freeze(&mut self) -> bool {
        match self.clocks.get_mut(self.root_clock) {
            Some(state) if state.phase == ClockPhase::Current => {
                state.phase = ClockPhase::Stale;
                true
            }
            _ => false,
        }
    }

    /// Whether `ancestor` is `clock` or one of its ancestors.
    fn encloses(&self, ancestor: ClockId, clock: ClockId) -> bool {
        let mut current = Some(clock);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.clocks.get(id).and_then(|state| state.parent);
        }
        false
    }

    fn clock_time(&self, clock: ClockId) -> u64 {
        self.clocks.get(clock).map_or(0, |state| state.time)
    }

    /// Queue `clock` in its ancestors' `subclocks` queues.
    fn schedule(&mut self, clock: ClockId) {
        let mut current = clock;
        loop {
            let Some(state) = self.clocks.get_mut(current) else {
                return;
            };
            let Some(parent) = state.parent else {
                return;
            };
            if state.scheduled || state.phase == ClockPhase::Running {
                return;
            }
            state.scheduled = true;
            let Some(parent_state) = self.clocks.get_mut(parent) else {
                return;
            };
            parent_state.subclocks.add(current);
            current = parent;
        }
    }

    fn node_clock(&self, id: NodeId) -> Option<ClockId> {
        self.graph.node(id).map(Node::clock)
    }

    pub fn enqueue_change(&mut self, cell: NodeId) {
        let Some(clock) = self.node_clock(cell) else {
            return;
        };
        if let Some(state) = self.clocks.get_mut(clock) {
            state.changes.add(cell);
        }
        self.schedule(clock);
    }

    fn enqueue_update(&mut self, node: NodeId) {
        let Some(clock) = self.node_clock(node) else {
            return;
        };
        if let Some(state) = self.clocks.get_mut(clock) {
            state.updates.add(node);
        }
        self.schedule(clock);
    }

    fn enqueue_dispose(&mut self, node: NodeId) {
        let Some(clock) = self.node_clock(node) else {
            return;
        };
        if let Some(state) = self.clocks.get_mut(clock) {
            state.disposes.add(node);
        }
        self.schedule(clock);
    }

    fn push_ready(&mut self, ready: Vec<NodeId>) {
        for id in ready {
            let Some(clock) = self.node_clock(id) else {
                continue;
            };
            if let Some(state) = self.clocks.get_mut(clock) {
                state.ready.push_back(id);
            }
        }
    }

    fn tick(&mut self, clock: ClockId) -> u64 {
        self.counters.ticks += 1;
        match self.clocks.get_mut(clock) {
            Some(state) => {
                state.time += 1;
                state.time
            }
            None => 0,
        }
    }

    fn has_work(&self, clock: ClockId) -> bool {
        self.clocks.get(clock).is_some_and(ClockState::has_work)
    }

    /// Hooks for every staged write in `clock`, with the changed cells.
    fn take_changes(&mut self, clock: ClockId) -> (Vec<NodeId>, Vec<Rc<dyn PendingChange>>) {
        let cells = match self.clocks.get_mut(clock) {
            Some(state) => state.changes.take(),
            None => return (Vec::new(), Vec::new()),
        };
        let hooks = cells
            .iter()
            .filter_map(|id| self.graph.node(*id)?.change.as_ref()?.upgrade())
            .collect();
        (cells, hooks)
    }

    fn take_subclocks(&mut self, clock: ClockId) -> Vec<ClockId> {
        let subclocks = match self.clocks.get_mut(clock) {
            Some(state) => state.subclocks.take(),
            None => return Vec::new(),
        };
        for sub in &subclocks {
            if let Some(state) = self.clocks.get_mut(*sub) {
                state.scheduled = false;
            }
        }
        subclocks
    }

    fn take_disposes(&mut self, clock: ClockId) -> Vec<NodeId> {
        self.clocks
            .get_mut(clock)
            .map(|state| state.disposes.take())
            .unwrap_or_default()
    }

    /// Mark everything downstream of a changed cell.
    fn mark_changed(&mut self, cell: NodeId) -> Result<()> {
        let mut marked = Vec::new();
        let result = self.graph.mark(cell, &mut marked);
        for id in marked {
            let Some(clock) = self.node_clock(id) else {
                continue;
            };
            let time = self.clock_time(clock);
            if let Some(node) = self.graph.node_mut(id) {
                node.age = time;
            }
            self.enqueue_update(id);
        }
        result.map_err(|node| {
            debug!(node = ?node, "change reached a running computation");
            ReactiveError::CircularDependency
        })
    }

    /// Clear the queues of `clock` and every clock below it.
    ///
    /// Returns the staged writes to discard and the nodes still awaiting
    /// teardown.
    fn abort(&mut self, clock: ClockId) -> (Vec<Rc<dyn PendingChange>>, Vec<NodeId>) {
        let mut hooks = Vec::new();
        let mut disposes = Vec::new();
        let mut stack = vec![clock];

        while let Some(id) = stack.pop() {
            let (_, staged) = self.take_changes(id);
            hooks.extend(staged);
            disposes.extend(self.take_disposes(id));

            let stale = self
                .clocks
                .get_mut(id)
                .map(|state| {
                    state.subclocks.clear();
                    state.ready.clear();
                    state.updates.take()
                })
                .unwrap_or_default();
            for node in stale {
                if let Some(node) = self.graph.node_mut(node) {
                    if node.state == NodeState::Stale {
                        node.state = NodeState::Current;
                        node.pending = 0;
                    }
                }
            }

            if let Some(state) = self.clocks.get_mut(id) {
                state.scheduled = false;
                stack.extend(state.children.iter().copied());
            }
        }
        (hooks, disposes)
    }

    fn finish_clock(&mut self, clock: ClockId) {
        let Some(state) = self.clocks.get_mut(clock) else {
            return;
        };
        state.phase = ClockPhase::Current;
        if state.parent.is_none() {
            self.counters.batches += 1;
            self.drain_released();
        } else {
            self.collect_clock(clock);
        }
    }

    // ---- nodes ----

    fn add_member(&mut self, clock: ClockId) {
        if let Some(state) = self.clocks.get_mut(clock) {
            state.members += 1;
        }
    }

    /// Remove a node from the graph, its owner and its clock.
    fn free(&mut self, id: NodeId) -> Option<Node> {
        let node = self.graph.remove(id)?;
        if let Some(owner) = node.owner.and_then(|owner| self.graph.node_mut(owner)) {
            owner.release_child(id);
        }
        if let Some(state) = self.clocks.get_mut(node.clock) {
            state.members = state.members.saturating_sub(1);
        }
        self.collect_clock(node.clock);
        Some(node)
    }

    fn adopt(&mut self, id: NodeId, frame: &Frame) -> Option<NodeId> {
        let owner = frame.owner.filter(|owner| self.graph.contains(*owner))?;
        if let Some(node) = self.graph.node_mut(owner) {
            node.adopt(id, frame.pinning);
        }
        if let Some(node) = self.graph.node_mut(id) {
            node.owner = Some(owner);
        }
        Some(owner)
    }

    /// Register a new data cell.
    pub fn alloc_data(&mut self, clock: Option<ClockId>, change: Weak<dyn PendingChange>) -> NodeId {
        self.drain_released();
        let clock = self.resolve_clock(clock);
        let mut node = Node::data(clock);
        node.change = Some(change);
        self.add_member(clock);
        self.graph.insert(node)
    }

    /// Register a computation that is about to run for the first time.
    fn alloc_computation(&mut self, frame: &Frame) -> (NodeId, ClockId) {
        self.drain_released();
        let clock = self.resolve_clock(frame.clock);
        let id = self.graph.insert(Node::computation(clock));
        if self.adopt(id, frame).is_none() && self.config.warn_unowned {
            warn!(node = ?id, "computation created without an owner; it will never be disposed");
        }
        self.add_member(clock);
        self.running += 1;
        self.counters.runs += 1;
        (id, clock)
    }

    /// Register a root owner. Roots are never adopted by the enclosing
    /// owner, so they survive its re-runs.
    fn alloc_root(&mut self, frame: &Frame) -> NodeId {
        let clock = self.resolve_clock(frame.clock);
        let id = self.graph.insert(Node::root(clock));
        self.add_member(clock);
        id
    }

    /// Store the recompute function after a successful first run.
    ///
    /// Hands the body back if the node does not need one: it was disposed
    /// during its first run, or it read nothing and can be elided.
    fn install(&mut self, id: NodeId, body: Body) -> Option<Body> {
        self.running = self.running.saturating_sub(1);
        let threshold = self.config.compaction_threshold;
        let time = self.node_clock(id).map_or(0, |clock| self.clock_time(clock));

        let Some(node) = self.graph.node_mut(id) else {
            return Some(body);
        };
        node.state = NodeState::Current;
        node.age = time;
        if node.disposed {
            return Some(body);
        }
        self.graph.prune(id, threshold);

        if self.graph.node(id).is_some_and(Node::is_static) {
            trace!(node = ?id, "computation elided");
            self.free(id);
            return Some(body);
        }
        if let Some(node) = self.graph.node_mut(id) {
            node.body = Some(body);
        }
        None
    }

    fn begin_update(&mut self, id: NodeId) -> Start {
        let Some(node) = self.graph.node_mut(id) else {
            return Start::Skip;
        };
        if node.disposed || node.kind() != NodeKind::Computation {
            return Start::Skip;
        }
        match node.state {
            NodeState::Running => return Start::Circular,
            NodeState::Current => return Start::Skip,
            NodeState::Stale => {}
        }
        let Some(body) = node.body.take() else {
            node.state = NodeState::Current;
            node.pending = 0;
            return Start::Skip;
        };

        node.state = NodeState::Running;
        node.run += 1;
        let cleanups = mem::take(&mut node.cleanups);
        let children = node.owned.drain(..).collect();
        let clock = node.clock;

        self.running += 1;
        self.counters.runs += 1;
        Start::Run {
            body,
            cleanups,
            children,
            clock,
        }
    }

    /// Put the body back after a re-run and notify consumers.
    fn finish_update(&mut self, id: NodeId, body: Body, ok: bool) -> Option<Body> {
        self.running = self.running.saturating_sub(1);
        let threshold = self.config.compaction_threshold;
        let time = self.node_clock(id).map_or(0, |clock| self.clock_time(clock));

        let Some(node) = self.graph.node_mut(id) else {
            return Some(body);
        };
        node.state = NodeState::Current;
        node.pending = 0;
        node.age = time;
        if node.disposed {
            return Some(body);
        }
        node.body = Some(body);

        if ok {
            self.graph.prune(id, threshold);
            let ready = self.graph.settle(id);
            self.push_ready(ready);
        } else {
            let cancelled = self.graph.cancel_downstream(id);
            if !cancelled.is_empty() {
                debug!(node = ?id, cancelled = cancelled.len(), "downstream of failed computation left unchanged");
            }
        }
        None
    }

    fn fail_creation(&mut self) {
        self.running = self.running.saturating_sub(1);
    }

    fn read_action(&self, id: NodeId, reader: Option<ClockId>) -> ReadAction {
        let Some(node) = self.graph.node(id) else {
            return ReadAction::Ready;
        };
        if node.disposed || node.kind() != NodeKind::Computation {
            return ReadAction::Ready;
        }

        let reader = self.resolve_clock(reader);
        let clock = node.clock();
        if !self.encloses(clock, reader) {
            let idle_with_work = self
                .clocks
                .get(clock)
                .is_some_and(|state| state.phase != ClockPhase::Running && state.has_work());
            if idle_with_work {
                return ReadAction::ResolveClock(clock);
            }
        }

        match node.state() {
            NodeState::Current => ReadAction::Ready,
            NodeState::Stale => ReadAction::Update,
            NodeState::Running => ReadAction::Circular,
        }
    }

    /// Whether a write to `cell` would feed a computation running right now.
    ///
    /// Subclocks are exempt: their computations may iterate on their own
    /// writes until they converge.
    pub fn is_feedback(&self, cell: NodeId) -> bool {
        if self.running == 0 {
            return false;
        }
        let Some(clock) = self.node_clock(cell) else {
            return false;
        };
        let root_level = self
            .clocks
            .get(clock)
            .is_some_and(|state| state.parent.is_none());
        root_level && self.graph.feeds_running(cell)
    }

    /// Mark a subtree inert and queue its teardown for the end of the tick.
    fn retire(&mut self, id: NodeId) {
        let subtree = self.graph.subtree(id);
        for node_id in &subtree {
            if let Some(node) = self.graph.node_mut(*node_id) {
                node.disposed = true;
                if node.state == NodeState::Stale {
                    node.state = NodeState::Current;
                }
                node.pending = 0;
            }
        }
        if !subtree.is_empty() {
            self.enqueue_dispose(id);
        }
    }

    /// Detach a subtree and take every callback out of it.
    fn begin_dispose(&mut self, id: NodeId) -> Vec<Doomed> {
        let subtree = self.graph.subtree(id);
        if let Some(owner) = self.graph.node(id).and_then(|node| node.owner) {
            if let Some(owner) = self.graph.node_mut(owner) {
                owner.release_child(id);
            }
        }

        subtree
            .into_iter()
            .filter_map(|node_id| {
                let node = self.graph.node_mut(node_id)?;
                node.disposed = true;
                if node.state == NodeState::Stale {
                    node.state = NodeState::Current;
                }
                node.pending = 0;
                Some(Doomed {
                    id: node_id,
                    body: node.body.take(),
                    cleanups: mem::take(&mut node.cleanups),
                })
            })
            .collect()
    }

    fn is_disposed(&self, id: NodeId) -> bool {
        self.graph.node(id).map_or(true, Node::is_disposed)
    }

    /// Free a root that ended up owning nothing.
    fn finish_root(&mut self, id: NodeId) {
        if self.graph.node(id).is_some_and(Node::is_static) {
            self.free(id);
        }
    }

    // ---- cells ----

    fn release_cell(&mut self, id: NodeId) {
        if self
            .graph
            .node(id)
            .is_some_and(|node| node.kind() == NodeKind::Data)
        {
            self.free(id);
        }
    }

    fn drain_released(&mut self) {
        let released = RELEASED
            .try_with(|released| mem::take(&mut *released.borrow_mut()))
            .unwrap_or_default();
        for id in released {
            self.release_cell(id);
        }
    }

    // ---- reporting ----

    fn stats(&self) -> EngineStats {
        let (active_edges, inactive_edges) = self.graph.edge_counts();
        EngineStats {
            nodes: self.graph.node_count(),
            computations: self
                .graph
                .nodes()
                .filter(|(_, node)| node.is_computation())
                .count(),
            clocks: self.clocks.len(),
            active_edges,
            inactive_edges,
            ticks: self.counters.ticks,
            batches: self.counters.batches,
            runs: self.counters.runs,
            compactions: self.graph.compactions,
        }
    }
}

/// Free a cell whose last handle was dropped.
///
/// Deferred if the runtime is busy or already torn down.
pub(crate) fn release(id: NodeId) {
    let _ = RUNTIME.try_with(|rt| match rt.try_borrow_mut() {
        Ok(mut rt) => rt.release_cell(id),
        Err(_) => {
            let _ = RELEASED.try_with(|released| released.borrow_mut().push(id));
        }
    });
}

/// Run `clock` until it has no queued work.
///
/// Returns the first error raised by any computation during the batch, or
/// [`ReactiveError::RunawayBatch`] if the clock was aborted.
pub(crate) fn run_clock(clock: ClockId) -> Result<()> {
    let (limit, is_root) = {
        let started = with(|rt| {
            let limit = rt.config.runaway_limit;
            let state = rt.clocks.get_mut(clock)?;
            if state.phase == ClockPhase::Running {
                return None;
            }
            state.phase = ClockPhase::Running;
            Some((limit, state.parent.is_none()))
        });
        match started {
            Some(started) => started,
            None => return Ok(()),
        }
    };

    let span = trace_span!("batch", clock = ?clock, root = is_root);
    let _enter = span.enter();

    let mut failure: Option<ReactiveError> = None;
    let mut ticks = 0usize;
    while with(|rt| rt.has_work(clock)) {
        if ticks == limit {
            error!(limit, "runaway batch aborted");
            abort_clock(clock);
            failure = Some(ReactiveError::RunawayBatch { limit });
            break;
        }
        ticks += 1;
        let time = with(|rt| rt.tick(clock));
        trace!(time, "tick");

        if let Err(e) = apply_changes(clock) {
            failure.get_or_insert(e);
        }
        for sub in with(|rt| rt.take_subclocks(clock)) {
            if let Err(e) = run_clock(sub) {
                failure.get_or_insert(e);
            }
        }
        if let Err(e) = run_updates(clock) {
            failure.get_or_insert(e);
        }
        for node in with(|rt| rt.take_disposes(clock)) {
            dispose_now(node);
        }
    }

    with(|rt| rt.finish_clock(clock));
    debug!(ticks, failed = failure.is_some(), "batch complete");
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Drop all staged work in `clock` and below.
fn abort_clock(clock: ClockId) {
    let (hooks, disposes) = with(|rt| rt.abort(clock));
    for hook in &hooks {
        hook.discard();
    }
    drop(hooks);
    for node in disposes {
        dispose_now(node);
    }

    // Teardown cleanups may have staged more work; it is dropped too.
    let (hooks, _) = with(|rt| rt.abort(clock));
    for hook in &hooks {
        hook.discard();
    }
}

/// Apply the staged writes of `clock` and mark their dependents.
fn apply_changes(clock: ClockId) -> Result<()> {
    let (cells, hooks) = with(|rt| rt.take_changes(clock));
    for hook in &hooks {
        hook.commit();
    }
    drop(hooks);

    with(|rt| {
        let mut result = Ok(());
        for cell in &cells {
            if let Err(e) = rt.mark_changed(*cell) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        if let Some(state) = rt.clocks.get_mut(clock) {
            state.changes.recycle(cells);
        }
        result
    })
}

/// Re-run the stale computations of `clock` in dependency order.
fn run_updates(clock: ClockId) -> Result<()> {
    let stale = with(|rt| {
        let stale = rt
            .clocks
            .get_mut(clock)
            .map(|state| state.updates.take())
            .unwrap_or_default();
        let ready: Vec<NodeId> = stale
            .iter()
            .copied()
            .filter(|id| {
                rt.graph
                    .node(*id)
                    .is_some_and(|node| node.state() == NodeState::Stale && node.pending == 0)
            })
            .collect();
        if let Some(state) = rt.clocks.get_mut(clock) {
            state.ready.extend(ready);
        }
        stale
    });

    let mut failure = None;
    let mut sweep = 0;
    loop {
        let next = with(|rt| {
            if let Some(id) = rt.clocks.get_mut(clock).and_then(|state| state.ready.pop_front()) {
                return Some(id);
            }
            // Anything still stale lost its pending inputs to a re-run
            while sweep < stale.len() {
                let id = stale[sweep];
                sweep += 1;
                let is_stale = rt
                    .graph
                    .node(id)
                    .is_some_and(|node| node.state() == NodeState::Stale && !node.is_disposed());
                if is_stale {
                    return Some(id);
                }
            }
            None
        });
        let Some(id) = next else {
            break;
        };
        if let Err(e) = update(id) {
            failure.get_or_insert(e);
        }
    }

    with(|rt| {
        if let Some(state) = rt.clocks.get_mut(clock) {
            state.ready.clear();
            state.updates.recycle(stale);
        }
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Re-run a stale computation now.
pub(crate) fn update(id: NodeId) -> Result<()> {
    let (mut body, cleanups, children, clock) = match with(|rt| rt.begin_update(id)) {
        Start::Skip => return Ok(()),
        Start::Circular => return Err(ReactiveError::CircularDependency),
        Start::Run {
            body,
            cleanups,
            children,
            clock,
        } => (body, cleanups, children, clock),
    };

    run_cleanups(cleanups, false);
    for child in children {
        dispose_now(child);
    }

    let result = {
        let _ctx = ContextGuard::enter(Frame {
            owner: Some(id),
            listener: Some(id),
            clock: Some(clock),
            pinning: false,
        });
        trace!(node = ?id, "update");
        body()
    };

    let leftover = with(|rt| rt.finish_update(id, body, result.is_ok()));
    drop(leftover);

    if let Err(e) = &result {
        debug!(node = ?id, error = %e, "computation failed");
    }
    result
}

/// Create a computation: run `first` under the new node and keep `body`
/// for later runs.
///
/// `first` returns the body to install. A computation created outside any
/// batch opens one, so writes made during its first run propagate before
/// this returns.
pub(crate) fn create(
    sample: bool,
    first: impl FnOnce() -> Result<Body>,
) -> Result<NodeId> {
    let toplevel = with(|rt| rt.begin_freeze());
    let created = build(sample, first);
    if !toplevel {
        return created;
    }
    let root = with(|rt| rt.root_clock);
    let drained = run_clock(root);
    let id = created?;
    drained.map(|()| id)
}

fn build(sample: bool, first: impl FnOnce() -> Result<Body>) -> Result<NodeId> {
    let frame = context::current();
    let (id, clock) = with(|rt| rt.alloc_computation(&frame));

    let result = {
        let _ctx = ContextGuard::enter(Frame {
            owner: Some(id),
            listener: (!sample).then_some(id),
            clock: Some(clock),
            pinning: false,
        });
        first()
    };

    match result {
        Ok(body) => {
            let leftover = with(|rt| rt.install(id, body));
            drop(leftover);
            Ok(id)
        }
        Err(e) => {
            with(|rt| rt.fail_creation());
            dispose_now(id);
            Err(e)
        }
    }
}

/// Bring `id` up to date and record it as a dependency of the listener.
pub(crate) fn track(id: NodeId) -> Result<()> {
    let frame = context::current();

    let mut resolved = false;
    loop {
        match with(|rt| rt.read_action(id, frame.clock)) {
            ReadAction::Ready => break,
            ReadAction::Update => {
                update(id)?;
                break;
            }
            ReadAction::Circular => return Err(ReactiveError::CircularDependency),
            ReadAction::ResolveClock(clock) if !resolved => {
                resolved = true;
                run_clock(clock)?;
            }
            ReadAction::ResolveClock(_) => break,
        }
    }

    observe(id);
    Ok(())
}

/// Record `id` as a dependency of the listener, if any.
pub(crate) fn observe(id: NodeId) {
    if let Some(listener) = context::current().listener {
        with(|rt| {
            if rt.graph.contains(id) {
                rt.graph.link(id, listener);
            }
        });
    }
}

/// Run cleanups in a frame with no owner or listener.
fn run_cleanups(cleanups: Vec<Cleanup>, disposing: bool) {
    if cleanups.is_empty() {
        return;
    }
    let _ctx = ContextGuard::enter(Frame {
        clock: context::current().clock,
        ..Frame::default()
    });
    for cleanup in cleanups {
        cleanup(disposing);
    }
}

/// Tear down `id` and everything it owns immediately.
pub(crate) fn dispose_now(id: NodeId) {
    let mut doomed = with(|rt| rt.begin_dispose(id));
    if doomed.is_empty() {
        return;
    }
    trace!(node = ?id, nodes = doomed.len(), "dispose");

    for node in &mut doomed {
        run_cleanups(mem::take(&mut node.cleanups), true);
    }
    with(|rt| {
        for node in doomed.iter().rev() {
            rt.free(node.id);
        }
    });

    // Bodies may own cell handles; drop them with the runtime released.
    for node in doomed {
        drop(node.body);
    }
}

/// Dispose `id` and its subtree, deferring teardown to the end of the
/// current tick if a batch is open.
///
/// Outside a batch, disposal opens one so that writes made by cleanups
/// propagate; its first error is returned.
pub(crate) fn dispose(id: NodeId) -> Result<()> {
    let toplevel = with(|rt| {
        if rt.is_disposed(id) {
            return None;
        }
        if rt.frozen() {
            rt.retire(id);
            return Some(false);
        }
        Some(rt.begin_freeze())
    });
    if toplevel != Some(true) {
        return Ok(());
    }

    dispose_now(id);
    let root = with(|rt| rt.root_clock);
    run_clock(root).inspect_err(|e| debug!(error = %e, "batch opened by disposal failed"))
}

/// Run `f` inside a root owner node.
pub(crate) fn with_root<R>(f: impl FnOnce(NodeId) -> R) -> R {
    let frame = context::current();
    let id = with(|rt| rt.alloc_root(&frame));
    let result = {
        let _ctx = ContextGuard::enter(Frame {
            owner: Some(id),
            listener: None,
            clock: frame.clock,
            pinning: false,
        });
        f(id)
    };
    with(|rt| rt.finish_root(id));
    result
}

/// Attach a cleanup to the current owner.
pub(crate) fn on_cleanup(cleanup: Cleanup) -> Result<()> {
    let owner = context::current()
        .owner
        .ok_or(ReactiveError::CleanupOutsideComputation)?;
    with(|rt| match rt.graph.node_mut(owner) {
        Some(node) if !node.is_disposed() => {
            node.cleanups.push(cleanup);
            Ok(())
        }
        _ => Err(ReactiveError::CleanupOutsideComputation),
    })
}

/// Run `f` as one atomic batch.
///
/// Writes inside `f` are staged and applied together once it returns. If
/// `f` fails, its staged writes are discarded.
pub(crate) fn batch<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    let toplevel = with(|rt| rt.begin_freeze());
    if !toplevel {
        return f();
    }

    let span = trace_span!("freeze");
    let _enter = span.enter();
    let root = with(|rt| rt.root_clock);
    match f() {
        Ok(value) => {
            run_clock(root)?;
            Ok(value)
        }
        Err(e) => {
            debug!(error = %e, "batch failed; staged writes discarded");
            abort_clock(root);
            if let Err(drain) = run_clock(root) {
                debug!(error = %drain, "draining failed batch");
            }
            Err(e)
        }
    }
}

pub(crate) fn is_batching() -> bool {
    with(|rt| rt.frozen())
}

pub(crate) fn is_disposed(id: NodeId) -> bool {
    with(|rt| rt.is_disposed(id))
}

pub(crate) fn active_sources(id: NodeId) -> usize {
    with(|rt| rt.graph.node(id).map_or(0, Node::active_sources))
}

pub(crate) fn dependents(id: NodeId) -> usize {
    with(|rt| rt.graph.dependents(id).len())
}

/// Replace this thread's engine settings.
pub fn configure(config: EngineConfig) -> Result<()> {
    config.validate()?;
    with(|rt| {
        debug!(?config, "engine configured");
        rt.config = config;
    });
    Ok(())
}

/// This thread's engine settings.
pub fn config() -> EngineConfig {
    with(|rt| rt.config.clone())
}

/// A snapshot of this thread's engine.
pub fn stats() -> EngineStats {
    with(|rt| rt.stats())
}
