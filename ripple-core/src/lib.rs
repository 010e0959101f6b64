//! Ripple Core
//!
//! A fine-grained incremental computation engine. Settable [`Signal`]s feed
//! derived [`Computation`]s; dependencies are discovered automatically each
//! time a body runs, and a change re-runs exactly the computations that read
//! it, glitch-free and at most once per frame.
//!
//! # Architecture
//!
//! - `graph`: the node arena, edge logs and the mark phase of propagation
//! - `reactive`: signals, computations, builders, gates and the runtime
//! - `config`: runtime tuning, loadable from JSON
//! - `error`: the crate error type
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use ripple_core::{Computation, Runtime, Signal};
//!
//! let first = Signal::new("Ada".to_string());
//! let last = Signal::new("Lovelace".to_string());
//!
//! let full = Computation::memo({
//!     let (first, last) = (first.clone(), last.clone());
//!     move || Ok(format!("{} {}", first.get(), last.get()))
//! })
//! .unwrap();
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let _log = Computation::effect({
//!     let (full, seen) = (full.clone(), Rc::clone(&seen));
//!     move || {
//!         if let Some(name) = full.get()? {
//!             seen.borrow_mut().push(name);
//!         }
//!         Ok(())
//!     }
//! })
//! .unwrap();
//!
//! // Both writes land in one frame, so the effect runs once.
//! Runtime::batch(|| {
//!     first.set("Grace".to_string())?;
//!     last.set("Hopper".to_string())
//! })
//! .unwrap();
//!
//! assert_eq!(*seen.borrow(), ["Ada Lovelace", "Grace Hopper"]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use reactive::{Builder, Computation, Gate, Go, Runtime, Signal};
