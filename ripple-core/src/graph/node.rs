//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//!
//! Values are not stored here. A data node points at its typed cell through a
//! weak, type-erased [`Staged`] handle, and a computation's body writes its
//! result straight into the cell owned by its accessor. The arena only keeps
//! what the scheduler needs: edges, generation stamps, run state, ownership.

use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use super::edge::EdgeLog;
use crate::error::Result;

/// Unique identifier for a node in the dependency graph.
///
/// Identifiers are handed out in creation order and never reused, so they
/// double as the key into every edge log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The logical clock. Advanced once per propagation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(u64);

impl Time {
    /// The clock value of the following frame.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the raw clock value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Run state of a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// The value reflects the latest committed inputs.
    Current,

    /// Marked for re-run in the current frame, not yet run.
    Stale,

    /// Running its body. Reading the node now is a cycle.
    Updating,
}

/// Computations that wrote a signal during the current propagation call.
///
/// A committed change never re-marks one of its own writers, which is what
/// lets a computation that writes the signal it reads settle. Writers of
/// other signals get no such pass, so a loop running through several
/// signals keeps going until the frame limit stops it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Writers(SmallVec<[NodeId; 4]>);

impl Writers {
    pub fn contains(&self, id: NodeId) -> bool {
        self.0.contains(&id)
    }

    pub fn insert(&mut self, id: NodeId) {
        if !self.contains(id) {
            self.0.push(id);
        }
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Type-erased view of a signal's value cell, used to commit staged writes.
pub(crate) trait Staged {
    /// Move the staged value into the committed slot.
    ///
    /// Returns `false` when the committed value is unchanged, in which case
    /// dependents are not marked.
    fn commit(&self) -> bool;

    /// Drop the staged value without committing it.
    fn discard(&self);
}

/// A gate consulted while marking, letting an external scheduler postpone a
/// computation's re-run past the frame that made it stale.
pub trait Hold {
    /// Whether the node may re-run in the frame stamped `time`.
    fn admits(&self, time: Time) -> bool;

    /// The signal whose write re-admits held nodes.
    fn ticker(&self) -> NodeId;

    /// Called once per held node, after the mark phase of the frame.
    fn held(&self);
}

/// Type-erased computation body. Writes its result into the accessor's cell.
///
/// This is the unit builder modifiers wrap.
pub type Body = Box<dyn FnMut() -> Result<()>>;

/// A registered teardown. The flag is `true` on final disposal.
pub(crate) type Cleanup = Box<dyn FnOnce(bool)>;

/// A settable value in the graph.
pub(crate) struct DataNode {
    /// The typed cell. Dead once the last accessor is dropped.
    pub cell: Weak<dyn Staged>,

    /// Computations that wrote this signal since the propagation call began.
    pub writers: Writers,

    /// Dependents, created on first tracked read.
    pub edges: Option<EdgeLog>,
}

impl DataNode {
    pub fn new(cell: Weak<dyn Staged>) -> Self {
        Self {
            cell,
            writers: Writers::default(),
            edges: None,
        }
    }
}

/// A derived value in the graph.
pub(crate) struct ComputationNode {
    /// Frame at which the node was last marked or created.
    pub generation: Time,

    pub state: RunState,

    /// The computation whose body created this one, unless orphaned.
    pub owner: Option<NodeId>,

    /// Logs this node is subscribed to, in the order they were read.
    pub sources: SmallVec<[NodeId; 4]>,

    /// Computations created by this node's body. Disposed on re-run.
    pub children: Vec<NodeId>,

    pub cleanups: Vec<Cleanup>,

    /// Taken out while the body runs.
    pub body: Option<Body>,

    /// Gate consulted when the node is marked.
    pub hold: Option<Rc<dyn Hold>>,

    /// Gate passed down to computations created by this node's body.
    pub inherited: Option<Rc<dyn Hold>>,

    /// Dependents reading this node's value.
    pub edges: Option<EdgeLog>,
}

impl ComputationNode {
    /// A node about to run its body for the first time.
    pub fn new(generation: Time, owner: Option<NodeId>) -> Self {
        Self {
            generation,
            state: RunState::Updating,
            owner,
            sources: SmallVec::new(),
            children: Vec::new(),
            cleanups: Vec::new(),
            body: None,
            hold: None,
            inherited: None,
            edges: None,
        }
    }
}

impl fmt::Debug for ComputationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputationNode")
            .field("generation", &self.generation)
            .field("state", &self.state)
            .field("owner", &self.owner)
            .field("sources", &self.sources)
            .field("children", &self.children)
            .field("cleanups", &self.cleanups.len())
            .field("gated", &self.hold.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique_and_ordered() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
        assert!(id1 < id2);
    }

    #[test]
    fn time_advances() {
        let t = Time::default();
        assert_eq!(t.next().raw(), t.raw() + 1);
        assert!(t.next() > t);
    }

    #[test]
    fn writers_deduplicate() {
        let a = NodeId::new();
        let b = NodeId::new();

        let mut writers = Writers::default();
        writers.insert(a);
        writers.insert(a);
        writers.insert(b);
        assert_eq!(writers.len(), 2);
        assert!(writers.contains(b));

        writers.clear();
        assert!(writers.is_empty());
    }

    #[test]
    fn new_computation_starts_updating() {
        let node = ComputationNode::new(Time::default(), None);
        assert_eq!(node.state, RunState::Updating);
        assert!(node.body.is_none());
        assert!(node.sources.is_empty());
    }
}
