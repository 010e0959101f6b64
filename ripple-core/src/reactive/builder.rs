//! Computation Builder
//!
//! A [`Builder`] collects how a computation should be constructed before it
//! is created: body modifiers, an optional [`Gate`], and whether the node is
//! owned by the computation that creates it.
//!
//! Modifiers are `(Body) -> Body` wrappers. They are applied once, before the
//! first run, so the initial run is subject to the same wrapping as every
//! re-run. The modifier added first ends up outermost.
//!
//! The builder is an immutable value: every method returns a new builder, so
//! a partially configured one can be cloned and reused.

use std::fmt::{self, Debug};
use std::rc::Rc;

use super::computation::{on_body, Computation};
use super::gate::Gate;
use super::runtime::Placement;
use crate::error::Result;
use crate::graph::{Body, Hold};

/// A body wrapper applied at construction time.
pub type Modifier = Rc<dyn Fn(Body) -> Body>;

/// Configuration for creating computations.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// use ripple_core::reactive::{Builder, Signal};
///
/// let runs = Rc::new(Cell::new(0));
/// let counted = {
///     let runs = Rc::clone(&runs);
///     Builder::new().modify(move |mut body| {
///         let runs = Rc::clone(&runs);
///         Box::new(move || {
///             runs.set(runs.get() + 1);
///             body()
///         })
///     })
/// };
///
/// let a = Signal::new(1);
/// let doubled = counted
///     .memo({
///         let a = a.clone();
///         move || Ok(a.get() * 2)
///     })
///     .unwrap();
///
/// a.set(2).unwrap();
/// assert_eq!(doubled.get().unwrap(), Some(4));
/// assert_eq!(runs.get(), 2);
/// ```
#[derive(Clone, Default)]
pub struct Builder {
    modifiers: Vec<Modifier>,
    gate: Option<Rc<dyn Hold>>,
    orphan: bool,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not attach created computations to the running computation.
    ///
    /// An orphan survives its creator's re-runs and must be disposed
    /// explicitly.
    pub fn orphan(mut self) -> Self {
        self.orphan = true;
        self
    }

    /// Add a body modifier.
    pub fn modify<M>(mut self, modifier: M) -> Self
    where
        M: Fn(Body) -> Body + 'static,
    {
        self.modifiers.push(Rc::new(modifier));
        self
    }

    /// Defer re-runs of created computations to `gate`.
    ///
    /// Computations created by a gated body inherit the gate.
    pub fn gated(mut self, gate: &Gate) -> Self {
        self.gate = Some(gate.hold());
        self
    }

    /// Create a computation whose body may decline to produce a value.
    pub fn computation<T, F>(&self, body: F) -> Result<Computation<T>>
    where
        T: Clone + 'static,
        F: FnMut() -> Result<Option<T>> + 'static,
    {
        Computation::build(body, self.placement(), |body| self.wrap(body))
    }

    /// Create a computation that always produces a value.
    pub fn memo<T, F>(&self, mut body: F) -> Result<Computation<T>>
    where
        T: Clone + 'static,
        F: FnMut() -> Result<T> + 'static,
    {
        self.computation(move || body().map(Some))
    }

    /// Create a computation run only for its side effects.
    pub fn effect<F>(&self, mut body: F) -> Result<Computation<()>>
    where
        F: FnMut() -> Result<()> + 'static,
    {
        self.computation(move || body().map(Some))
    }

    /// Create an event-driven computation; see [`Computation::on`].
    pub fn on<T, E, R>(&self, event: E, reduce: R, seed: T) -> Result<Computation<T>>
    where
        T: Clone + 'static,
        E: FnMut() -> Result<()> + 'static,
        R: FnMut(&T) -> Result<T> + 'static,
    {
        self.computation(on_body(event, reduce, seed))
    }

    fn placement(&self) -> Placement {
        Placement {
            orphan: self.orphan,
            hold: self.gate.clone(),
        }
    }

    fn wrap(&self, body: Body) -> Body {
        self.modifiers
            .iter()
            .rev()
            .fold(body, |body, modifier| modifier(body))
    }
}

impl Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("modifiers", &self.modifiers.len())
            .field("gated", &self.gate.is_some())
            .field("orphan", &self.orphan)
            .finish()
    }
}
