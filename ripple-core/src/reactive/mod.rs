//! Reactive Primitives
//!
//! This module implements the user-facing side of the engine: settable
//! signals, derived computations, and the thread-local runtime that keeps
//! them consistent.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A [`Signal`] holds a value. Reading it from inside a running computation
//! registers that computation as a dependent; writing it re-runs every
//! dependent before the write returns (or, inside a batch, when the batch
//! ends).
//!
//! ## Computations
//!
//! A [`Computation`] runs a body once on creation and again whenever
//! something it read changes. Computations created inside another
//! computation's body are owned by it and disposed when it re-runs, unless
//! created through an orphan [`Builder`].
//!
//! ## Frames
//!
//! Changes are applied in frames. All staleness is marked before any body
//! runs, so within a frame every computation runs at most once and never
//! observes a mix of old and new inputs. Writes performed by bodies are
//! committed in the following frame.
//!
//! # Implementation Notes
//!
//! The runtime is thread-local. Handles are `!Send`; each thread has its own
//! graph, clock and configuration.

mod builder;
mod computation;
mod context;
mod gate;
mod runtime;
mod signal;

pub use builder::{Builder, Modifier};
pub use computation::Computation;
pub use context::SchedulerContext;
pub use gate::{Gate, Go};
pub use runtime::Runtime;
pub use signal::Signal;
