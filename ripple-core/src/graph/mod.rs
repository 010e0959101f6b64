//! Dependency Graph
//!
//! This module implements the arena that tracks relationships between
//! signals and the computations that read them.
//!
//! # Overview
//!
//! - Nodes are signals (settable values) or computations (derived values).
//! - Every source owns an edge log listing the computations that read it
//!   during their latest run. Computations keep the reverse list, their
//!   `sources`, so a re-run can retire its old edges.
//! - Edges are rediscovered on every run. Reads that no longer happen stop
//!   being tracked; new reads start being tracked.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a central arena keyed by [`NodeId`] rather than owning
//!    each other, so sources and dependents never form reference cycles.
//!
//! 2. Staleness is marked in one pass and computations are run in a second
//!    pass, in the order they were first marked. This gives glitch-free,
//!    at-most-once-per-frame updates independent of graph shape.
//!
//! 3. Edge logs are reused across runs and pruned lazily when swept.

mod edge;
mod node;
mod scheduler;

pub use node::{Body, Hold, NodeId, RunState, Time};

pub(crate) use node::{Cleanup, ComputationNode, Staged};
pub(crate) use scheduler::{Graph, Teardown};
