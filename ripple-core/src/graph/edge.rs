//! Edge Logs
//!
//! An edge log belongs to one source (a signal or a computation) and records
//! which computations currently read it, in the order the edges were first
//! established. That order is the propagation order.
//!
//! Logs are reused across runs instead of being rebuilt. When a dependent
//! re-runs, each of its edges is flipped to `Reviewing`. Reads during the run
//! flip them back to `Live` in place, keeping their position. Whatever is
//! still `Reviewing` when the log is next swept is dead and gets compacted
//! out, so the work done is proportional to the edges that changed.

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::node::NodeId;

/// State of one dependent in a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// Established by the dependent's latest run.
    Live,

    /// The dependent is re-running or gone; not yet re-confirmed.
    Reviewing,
}

/// Adjacency record from one source to its dependents.
#[derive(Debug, Default)]
pub struct EdgeLog {
    links: IndexMap<NodeId, Link>,
}

impl EdgeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read by `dependent`.
    ///
    /// Returns `true` when the edge was not live yet, meaning the dependent
    /// must add this log to its sources.
    pub fn record(&mut self, dependent: NodeId) -> bool {
        match self.links.get_mut(&dependent) {
            Some(Link::Live) => false,
            Some(link) => {
                *link = Link::Live;
                true
            }
            None => {
                self.links.insert(dependent, Link::Live);
                true
            }
        }
    }

    /// Put `dependent`'s edge up for review ahead of a re-run or disposal.
    pub fn review(&mut self, dependent: NodeId) {
        if let Some(link) = self.links.get_mut(&dependent) {
            *link = Link::Reviewing;
        }
    }

    /// Compact out dead edges and return the live dependents in order.
    pub fn sweep(&mut self) -> SmallVec<[NodeId; 8]> {
        self.links.retain(|_, link| *link == Link::Live);
        self.links.keys().copied().collect()
    }

    /// Number of live edges.
    pub fn live_count(&self) -> usize {
        self.links
            .values()
            .filter(|link| **link == Link::Live)
            .count()
    }

    #[cfg(test)]
    pub fn link(&self, dependent: NodeId) -> Option<Link> {
        self.links.get(&dependent).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_reads_record_once() {
        let mut log = EdgeLog::new();
        let a = NodeId::new();

        assert!(log.record(a));
        assert!(!log.record(a));
        assert_eq!(log.live_count(), 1);
    }

    #[test]
    fn reconfirmed_edges_keep_their_position() {
        let mut log = EdgeLog::new();
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();

        log.record(a);
        log.record(b);
        log.record(c);

        // `a` re-runs and reads the source again.
        log.review(a);
        assert_eq!(log.link(a), Some(Link::Reviewing));
        assert!(log.record(a));

        assert_eq!(log.sweep().as_slice(), &[a, b, c]);
    }

    #[test]
    fn unclaimed_edges_are_swept() {
        let mut log = EdgeLog::new();
        let a = NodeId::new();
        let b = NodeId::new();

        log.record(a);
        log.record(b);
        log.review(a);

        assert_eq!(log.live_count(), 1);
        assert_eq!(log.sweep().as_slice(), &[b]);
        assert_eq!(log.link(a), None);

        // A later read re-establishes the edge at the end.
        assert!(log.record(a));
        assert_eq!(log.sweep().as_slice(), &[b, a]);
    }

    #[test]
    fn reviewing_unknown_dependent_is_a_no_op() {
        let mut log = EdgeLog::new();
        log.review(NodeId::new());
        assert!(log.sweep().is_empty());
    }
}
