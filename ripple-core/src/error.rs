//! Error Types
//!
//! Every failure the engine reports is local and synchronous: it surfaces at
//! the operation that caused it and is never retried. When an error escapes a
//! propagation call, the runtime has already restored its scheduling context
//! and discarded the staged changes of that call.

use thiserror::Error;

use crate::graph::NodeId;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A computation read a computation that is still running its body.
    #[error("circular dependency: computation {node} was read while updating")]
    Cycle {
        /// The computation that was read mid-update.
        node: NodeId,
    },

    /// Two writes inside one batch staged different values on the same signal.
    #[error("conflicting changes to signal {node} within one batch")]
    ConflictingWrite {
        /// The signal that received the conflicting writes.
        node: NodeId,
    },

    /// `Runtime::on_cleanup` was called with no computation running.
    #[error("on_cleanup() must be called from within a computation")]
    CleanupOutsideComputation,

    /// A single external trigger cascaded through more frames than allowed.
    #[error("runaway propagation: more than {limit} frames from a single change")]
    Runaway {
        /// The configured frame bound.
        limit: usize,
    },
}
