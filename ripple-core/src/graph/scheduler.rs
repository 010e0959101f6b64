//! Update Scheduler
//!
//! `Graph` is the arena behind the runtime: every signal and computation is
//! addressed by its [`NodeId`], and edges are index-based, so there are no
//! reference cycles between sources and dependents and disposal is "unlink
//! by id" rather than pointer chasing.
//!
//! # Algorithm
//!
//! One frame of propagation is split into a mark phase and a run phase:
//!
//! 1. Advance the clock and commit every staged signal value.
//! 2. For each committed signal whose value changed, walk its edge log and
//!    mark each dependent:
//!    - wrote the signal earlier in the same propagation call: skip
//!    - already stamped with this frame's time: skip
//!    - held back by its gate: stamp, subscribe it to the gate's ticker, skip
//!    - otherwise: stamp, mark `Stale`, queue it, settle its children so they
//!      do not run, and recursively mark the dependents of its own log
//! 3. The runtime then runs the queue in the order nodes were first marked.
//!
//! Because staleness has fully cascaded before anything runs, a node read
//! during the run phase is either current or known to be stale (and gets
//! caught up first). No node sees a mix of old and new inputs, and no node
//! runs twice in one frame, whatever the shape of the graph.
//!
//! Only bookkeeping happens here. User code (bodies, cleanups, gate ticks) is
//! always invoked by the runtime after the arena borrow is released.

use std::collections::HashMap;
use std::mem;
use std::rc::{Rc, Weak};

use super::edge::EdgeLog;
use super::node::{
    Body, Cleanup, ComputationNode, DataNode, Hold, NodeId, RunState, Staged, Time,
};

/// What a disposal pulled out of the arena, to be finished without a borrow.
#[derive(Default)]
pub(crate) struct Teardown {
    /// Cleanups of the detached subtree, parent before children.
    pub cleanups: Vec<Cleanup>,

    /// Bodies of the detached nodes, dropped once the borrow is gone.
    pub bodies: Vec<Body>,

    /// Detached node ids, in detachment order.
    pub disposed: Vec<NodeId>,
}

/// The dependency graph and its scheduling queues.
pub(crate) struct Graph {
    time: Time,

    data: HashMap<NodeId, DataNode>,

    computations: HashMap<NodeId, ComputationNode>,

    /// Signals with a staged value waiting for the next frame.
    changes: Vec<NodeId>,

    /// Computations marked stale this frame, in marking order.
    updates: Vec<NodeId>,

    /// Disposals deferred until no body is running.
    disposes: Vec<NodeId>,

    /// Gates that held a node back this frame.
    held: Vec<Rc<dyn Hold>>,

    /// Signals with a non-empty writer set.
    written: Vec<NodeId>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            time: Time::default(),
            data: HashMap::new(),
            computations: HashMap::new(),
            changes: Vec::new(),
            updates: Vec::new(),
            disposes: Vec::new(),
            held: Vec::new(),
            written: Vec::new(),
        }
    }

    pub fn time(&self) -> Time {
        self.time
    }

    // ------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------

    /// Add a signal backed by `cell`.
    pub fn add_data(&mut self, id: NodeId, cell: Weak<dyn Staged>) {
        self.data.insert(id, DataNode::new(cell));
    }

    /// Forget signals whose last accessor was dropped.
    pub fn release(&mut self, ids: impl IntoIterator<Item = NodeId>) {
        for id in ids {
            self.data.remove(&id);
        }
    }

    /// Record that `id` now carries a staged value.
    ///
    /// `first` is set when the value was not staged before, which queues the
    /// signal for the next frame. A write from a running computation records
    /// the writer on the signal until [`Graph::clear_writers`].
    pub fn stage(&mut self, id: NodeId, writer: Option<NodeId>, first: bool) {
        if first {
            self.changes.push(id);
        }

        let (Some(writer), Some(node)) = (writer, self.data.get_mut(&id)) else {
            return;
        };
        if node.writers.is_empty() {
            self.written.push(id);
        }
        node.writers.insert(writer);
    }

    /// Forget who wrote what. Called when a propagation call ends.
    pub fn clear_writers(&mut self) {
        for id in self.written.drain(..) {
            if let Some(node) = self.data.get_mut(&id) {
                node.writers.clear();
            }
        }
    }

    /// Whether any signal is waiting to be committed.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    // ------------------------------------------------------------------
    // Computations
    // ------------------------------------------------------------------

    /// Add a computation created by `creator`'s body (if any).
    ///
    /// The new node inherits the creator's gate unless it brings its own.
    pub fn add_computation(&mut self, id: NodeId, mut node: ComputationNode, creator: Option<NodeId>) {
        if let Some(creator) = creator.and_then(|c| self.computations.get(&c)) {
            node.inherited = node.inherited.or_else(|| creator.inherited.clone());
        }
        if node.hold.is_none() {
            node.hold = node.inherited.clone();
        }
        self.computations.insert(id, node);
    }

    #[cfg(test)]
    pub fn computation(&self, id: NodeId) -> Option<&ComputationNode> {
        self.computations.get(&id)
    }

    pub fn computation_mut(&mut self, id: NodeId) -> Option<&mut ComputationNode> {
        self.computations.get_mut(&id)
    }

    /// Run state of a live computation.
    pub fn state(&self, id: NodeId) -> Option<RunState> {
        self.computations.get(&id).map(|node| node.state)
    }

    /// Whether `id` is stale and was marked by the frame in progress.
    pub fn stale_now(&self, id: NodeId) -> bool {
        self.computations
            .get(&id)
            .is_some_and(|node| node.state == RunState::Stale && node.generation == self.time)
    }

    /// Attach a finished computation to its owner's children.
    pub fn adopt(&mut self, owner: NodeId, child: NodeId) {
        if let Some(node) = self.computations.get_mut(&owner) {
            node.children.push(child);
        }
    }

    /// Number of computations currently in the arena.
    pub fn computation_count(&self) -> usize {
        self.computations.len()
    }

    #[cfg(test)]
    pub fn signal_count(&self) -> usize {
        self.data.len()
    }

    // ------------------------------------------------------------------
    // Edges
    // ------------------------------------------------------------------

    /// Record that `reader` read `source` during its current run.
    pub fn log_read(&mut self, source: NodeId, reader: NodeId) {
        if !self.computations.contains_key(&reader) {
            return;
        }

        let log = if let Some(node) = self.data.get_mut(&source) {
            node.edges.get_or_insert_with(EdgeLog::new)
        } else if let Some(node) = self.computations.get_mut(&source) {
            node.edges.get_or_insert_with(EdgeLog::new)
        } else {
            return;
        };

        if log.record(reader) {
            if let Some(node) = self.computations.get_mut(&reader) {
                node.sources.push(source);
            }
        }
    }

    /// Live dependents of a signal or computation.
    pub fn dependent_count(&self, source: NodeId) -> usize {
        let log = match self.data.get(&source) {
            Some(node) => node.edges.as_ref(),
            None => self
                .computations
                .get(&source)
                .and_then(|node| node.edges.as_ref()),
        };
        log.map_or(0, EdgeLog::live_count)
    }

    fn edges_mut(&mut self, source: NodeId) -> Option<&mut EdgeLog> {
        if let Some(node) = self.data.get_mut(&source) {
            return node.edges.as_mut();
        }
        self.computations
            .get_mut(&source)
            .and_then(|node| node.edges.as_mut())
    }

    // ------------------------------------------------------------------
    // Mark phase
    // ------------------------------------------------------------------

    /// Start a frame: advance the clock, commit staged values and mark
    /// everything that transitively depends on the ones that changed.
    ///
    /// Returns the number of committed signals.
    pub fn begin_frame(&mut self) -> usize {
        self.time = self.time.next();

        let mut changes = mem::take(&mut self.changes);
        for &id in &changes {
            let Some(node) = self.data.get_mut(&id) else {
                continue;
            };

            let changed = node.cell.upgrade().is_some_and(|cell| cell.commit());
            if !changed {
                continue;
            }

            let writers = node.writers.clone();
            let Some(dependents) = node.edges.as_mut().map(EdgeLog::sweep) else {
                continue;
            };
            for dependent in dependents {
                if !writers.contains(dependent) {
                    self.mark(dependent);
                }
            }
        }

        let committed = changes.len();
        changes.clear();
        if self.changes.is_empty() {
            // Keep the allocation for the next frame.
            self.changes = changes;
        }
        committed
    }

    fn mark(&mut self, id: NodeId) {
        let time = self.time;
        let Some(node) = self.computations.get_mut(&id) else {
            return;
        };

        if node.generation == time {
            return;
        }
        node.generation = time;

        if let Some(hold) = node.hold.clone() {
            if !hold.admits(time) {
                node.state = RunState::Current;
                self.log_read(hold.ticker(), id);
                self.held.push(hold);
                return;
            }
        }

        node.state = RunState::Stale;
        let children = mem::take(&mut node.children);
        let dependents = node.edges.as_mut().map(EdgeLog::sweep);

        self.updates.push(id);

        for &child in &children {
            self.settle(child);
        }
        if let Some(node) = self.computations.get_mut(&id) {
            node.children = children;
        }

        for dependent in dependents.into_iter().flatten() {
            self.mark(dependent);
        }
    }

    /// Stamp a subtree so it neither runs nor gets marked this frame. It is
    /// about to be disposed by its owner's re-run.
    fn settle(&mut self, id: NodeId) {
        let time = self.time;
        let Some(node) = self.computations.get_mut(&id) else {
            return;
        };

        node.generation = time;
        node.state = RunState::Current;
        let children = mem::take(&mut node.children);

        for &child in &children {
            self.settle(child);
        }
        if let Some(node) = self.computations.get_mut(&id) {
            node.children = children;
        }
    }

    /// Gates that held a node back during the last mark phase.
    pub fn take_held(&mut self) -> Vec<Rc<dyn Hold>> {
        mem::take(&mut self.held)
    }

    /// Computations queued by the last mark phase, in marking order.
    pub fn take_updates(&mut self) -> Vec<NodeId> {
        mem::take(&mut self.updates)
    }

    // ------------------------------------------------------------------
    // Run phase
    // ------------------------------------------------------------------

    /// Claim a stale computation for re-running.
    ///
    /// Flips it to `Updating` and hands back its cleanups, which the runtime
    /// runs before [`Graph::prepare_body`]. Returns `None` if the node is gone
    /// or no longer stale.
    pub fn begin_update(&mut self, id: NodeId) -> Option<Vec<Cleanup>> {
        let node = self.computations.get_mut(&id)?;
        if node.state != RunState::Stale {
            return None;
        }
        node.state = RunState::Updating;
        Some(mem::take(&mut node.cleanups))
    }

    /// Detach the previous run's children and edges and take the body out.
    pub fn prepare_body(&mut self, id: NodeId) -> Option<(Body, Teardown)> {
        let node = self.computations.get_mut(&id)?;
        let Some(body) = node.body.take() else {
            node.state = RunState::Current;
            return None;
        };

        let sources = mem::take(&mut node.sources);
        let children = mem::take(&mut node.children);

        for source in sources {
            if let Some(log) = self.edges_mut(source) {
                log.review(id);
            }
        }

        let mut teardown = Teardown::default();
        for child in children {
            self.detach_into(child, &mut teardown);
        }

        Some((body, teardown))
    }

    /// Put the body back and mark the node current.
    ///
    /// Returns the body if the node was disposed while it ran.
    pub fn finish_update(&mut self, id: NodeId, body: Body) -> Option<Body> {
        match self.computations.get_mut(&id) {
            Some(node) => {
                node.body = Some(body);
                node.state = RunState::Current;
                None
            }
            None => Some(body),
        }
    }

    // ------------------------------------------------------------------
    // Disposal
    // ------------------------------------------------------------------

    /// Defer a disposal until no body is running.
    pub fn queue_dispose(&mut self, id: NodeId) {
        self.disposes.push(id);
    }

    pub fn take_disposes(&mut self) -> Vec<NodeId> {
        mem::take(&mut self.disposes)
    }

    /// Remove a computation and its owned subtree from the graph.
    ///
    /// Unlinks it from its owner and from every log it reads. Unknown ids
    /// yield an empty teardown, which makes disposal idempotent.
    pub fn detach(&mut self, id: NodeId) -> Teardown {
        let mut teardown = Teardown::default();

        let owner = self.computations.get(&id).and_then(|node| node.owner);
        if let Some(owner) = owner.and_then(|owner| self.computations.get_mut(&owner)) {
            owner.children.retain(|&child| child != id);
        }

        self.detach_into(id, &mut teardown);
        teardown
    }

    fn detach_into(&mut self, id: NodeId, teardown: &mut Teardown) {
        let Some(mut node) = self.computations.remove(&id) else {
            return;
        };

        teardown.cleanups.append(&mut node.cleanups);
        teardown.bodies.extend(node.body.take());
        teardown.disposed.push(id);

        for source in node.sources.drain(..) {
            if let Some(log) = self.edges_mut(source) {
                log.review(id);
            }
        }

        for child in node.children.drain(..) {
            self.detach_into(child, teardown);
        }
    }

    // ------------------------------------------------------------------
    // Error recovery
    // ------------------------------------------------------------------

    /// Drop everything an aborted propagation call left behind: staged
    /// values, queued updates, writer sets and held gates. Deferred disposals
    /// are kept.
    pub fn abort(&mut self) {
        for id in self.changes.drain(..) {
            if let Some(cell) = self.data.get(&id).and_then(|node| node.cell.upgrade()) {
                cell.discard();
            }
        }
        self.clear_writers();

        for id in self.updates.drain(..) {
            if let Some(node) = self.computations.get_mut(&id) {
                if node.state == RunState::Stale {
                    node.state = RunState::Current;
                }
            }
        }

        self.held.clear();
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
