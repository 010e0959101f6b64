//! Reactive Context
//!
//! The scheduling context records what the current call stack is doing:
//! which computation is running its body, whether reads are being sampled,
//! whether writes are being staged, and whether a disposal pass is active.
//!
//! # Implementation
//!
//! The context is a small `Copy` value held in a `Cell` by the thread's
//! runtime. Every nested entry (running a body, sampling, batching,
//! disposing) swaps in a new context and gets back a guard that restores the
//! previous one when dropped. Restoration therefore happens on every exit
//! path, including `?` returns and panics, and a failure never leaves the
//! engine in a state that affects later operations.

use std::cell::Cell;

use crate::graph::NodeId;

/// Snapshot of the scheduling flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerContext {
    /// The computation currently running its body.
    pub updating: Option<NodeId>,

    /// Reads do not record dependency edges.
    pub sampling: bool,

    /// Writes are staged rather than propagated immediately.
    pub batching: bool,

    /// Inside a disposal pass.
    pub disposing: bool,
}

impl SchedulerContext {
    /// Whether a read right now should record a dependency edge, and for
    /// which computation.
    pub fn tracking(&self) -> Option<NodeId> {
        if self.sampling || self.disposing {
            None
        } else {
            self.updating
        }
    }

    /// Context for running `node`'s body.
    pub fn running(self, node: NodeId) -> Self {
        Self {
            updating: Some(node),
            sampling: false,
            disposing: false,
            ..self
        }
    }

    /// Context with dependency recording suspended.
    pub fn sampled(self) -> Self {
        Self {
            sampling: true,
            ..self
        }
    }

    /// Context with writes staged.
    pub fn batched(self) -> Self {
        Self {
            batching: true,
            ..self
        }
    }

    /// Context for a disposal pass.
    pub fn disposal(self) -> Self {
        Self {
            disposing: true,
            ..self
        }
    }

    /// Context for the propagation loop itself: staged writes, no body.
    pub fn propagating(self) -> Self {
        Self {
            updating: None,
            sampling: false,
            batching: true,
            disposing: false,
        }
    }
}

/// Guard that restores the previous context when dropped.
pub(crate) struct ContextGuard<'a> {
    cell: &'a Cell<SchedulerContext>,
    previous: SchedulerContext,
}

impl<'a> ContextGuard<'a> {
    /// Install `next` until the guard is dropped.
    pub fn enter(cell: &'a Cell<SchedulerContext>, next: SchedulerContext) -> Self {
        let previous = cell.replace(next);
        Self { cell, previous }
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.cell.set(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_restores_on_drop() {
        let cell = Cell::new(SchedulerContext::default());
        let id = NodeId::new();

        {
            let _guard = ContextGuard::enter(&cell, SchedulerContext::default().running(id));
            assert_eq!(cell.get().updating, Some(id));
            assert!(!cell.get().batching);
        }

        assert_eq!(cell.get(), SchedulerContext::default());
    }

    #[test]
    fn nested_contexts() {
        let cell = Cell::new(SchedulerContext::default());
        let outer = NodeId::new();
        let inner = NodeId::new();

        {
            let _outer = ContextGuard::enter(&cell, cell.get().running(outer));
            assert_eq!(cell.get().tracking(), Some(outer));

            {
                let _sampled = ContextGuard::enter(&cell, cell.get().sampled());
                assert_eq!(cell.get().tracking(), None);
                assert_eq!(cell.get().updating, Some(outer));

                let _inner = ContextGuard::enter(&cell, cell.get().running(inner));
                assert_eq!(cell.get().tracking(), Some(inner));
            }

            // Sampling ended with the inner scope.
            assert_eq!(cell.get().tracking(), Some(outer));
        }

        assert!(cell.get().updating.is_none());
    }

    #[test]
    fn guard_restores_during_unwind() {
        let cell = Cell::new(SchedulerContext::default());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = ContextGuard::enter(&cell, cell.get().batched().disposal());
            panic!("body failed");
        }));

        assert!(result.is_err());
        assert_eq!(cell.get(), SchedulerContext::default());
    }

    #[test]
    fn propagating_clears_body_state() {
        let ctx = SchedulerContext::default()
            .running(NodeId::new())
            .sampled()
            .disposal();
        let next = ctx.propagating();

        assert!(next.batching);
        assert!(next.updating.is_none());
        assert!(!next.sampling);
        assert!(!next.disposing);
    }
}
