//! Computation Implementation
//!
//! A Computation is a derived node: a body that reads signals and other
//! computations, and whose latest result is cached in the accessor.
//!
//! # How Computations Work
//!
//! 1. On creation the body runs once, synchronously, to produce the initial
//!    value and discover which nodes it reads.
//!
//! 2. When something it read changes, the computation is marked stale and
//!    re-run during the next frame, after any cleanups it registered.
//!
//! 3. Reading a computation that is stale in the current frame runs it first,
//!    so a reader never sees an out-of-date value mid-propagation.
//!
//! A body that returns `Ok(None)` leaves the previous value in place.
//!
//! Dropping the accessor does not dispose the node; a computation lives
//! until [`Computation::dispose`] is called or its owner re-runs.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use serde::{Serialize, Serializer};

use super::runtime::{with_runtime, Placement};
use crate::error::Result;
use crate::graph::{Body, NodeId, RunState};

/// Accessor for a computation node.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::{Computation, Signal};
///
/// let count = Signal::new(2);
/// let doubled = Computation::memo({
///     let count = count.clone();
///     move || Ok(count.get() * 2)
/// })
/// .unwrap();
///
/// count.set(5).unwrap();
/// assert_eq!(doubled.get().unwrap(), Some(10));
/// ```
pub struct Computation<T> {
    id: NodeId,
    cell: Rc<RefCell<Option<T>>>,
}

impl<T> Computation<T>
where
    T: Clone + 'static,
{
    /// Create a computation whose body may decline to produce a value.
    pub fn new<F>(body: F) -> Result<Self>
    where
        F: FnMut() -> Result<Option<T>> + 'static,
    {
        Self::build(body, Placement::default(), |body| body)
    }

    /// Create a computation that always produces a value.
    pub fn memo<F>(mut body: F) -> Result<Self>
    where
        F: FnMut() -> Result<T> + 'static,
    {
        Self::new(move || body().map(Some))
    }

    /// Create a computation driven by `event`.
    ///
    /// Only the reads made by `event` are dependencies. The first run yields
    /// `seed`; each re-run replaces it with `reduce(&previous)`, which is
    /// evaluated without recording dependencies.
    pub fn on<E, R>(event: E, reduce: R, seed: T) -> Result<Self>
    where
        E: FnMut() -> Result<()> + 'static,
        R: FnMut(&T) -> Result<T> + 'static,
    {
        Self::build(on_body(event, reduce, seed), Placement::default(), |body| body)
    }

    pub(crate) fn build<F>(
        mut body: F,
        placement: Placement,
        wrap: impl FnOnce(Body) -> Body,
    ) -> Result<Self>
    where
        F: FnMut() -> Result<Option<T>> + 'static,
    {
        let cell = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&cell);

        let erased: Body = Box::new(move || {
            if let Some(value) = body()? {
                *slot.borrow_mut() = Some(value);
            }
            Ok(())
        });

        let id = with_runtime(|rt| rt.create(wrap(erased), placement))?;
        Ok(Self { id, cell })
    }

    /// Get the node's unique ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the latest value.
    ///
    /// Inside a running computation this records a dependency (unless
    /// sampling) and brings the node up to date first if it is stale.
    /// Fails with [`Error::Cycle`](crate::Error::Cycle) if the node is in the
    /// middle of its own run.
    pub fn get(&self) -> Result<Option<T>> {
        with_runtime(|rt| rt.read_computation(self.id))?;
        Ok(self.cell.borrow().clone())
    }

    /// Get the latest value without recording a dependency.
    pub fn get_untracked(&self) -> Result<Option<T>> {
        with_runtime(|rt| rt.sample(|| self.get()))
    }

    /// The node's run state, or `None` once disposed.
    pub fn state(&self) -> Option<RunState> {
        with_runtime(|rt| rt.state(self.id))
    }

    pub fn is_disposed(&self) -> bool {
        self.state().is_none()
    }

    /// Dispose the node and every computation its body created.
    ///
    /// Cleanups run with `true`. Inside a running body the disposal happens
    /// once the current run phase finishes. Disposing twice is a no-op.
    pub fn dispose(&self) {
        with_runtime(|rt| rt.dispose(self.id));
    }

    /// Get the number of computations currently reading this one.
    pub fn dependent_count(&self) -> usize {
        with_runtime(|rt| rt.dependent_count(self.id))
    }
}

impl Computation<()> {
    /// Create a computation run only for its side effects.
    pub fn effect<F>(mut body: F) -> Result<Self>
    where
        F: FnMut() -> Result<()> + 'static,
    {
        Self::new(move || body().map(Some))
    }
}

/// Body behind `on`: track `event`, fold with `reduce` after the first run.
pub(crate) fn on_body<T, E, R>(
    mut event: E,
    mut reduce: R,
    seed: T,
) -> impl FnMut() -> Result<Option<T>> + 'static
where
    T: Clone + 'static,
    E: FnMut() -> Result<()> + 'static,
    R: FnMut(&T) -> Result<T> + 'static,
{
    let mut value = seed;
    let mut first = true;

    move || {
        event()?;
        if first {
            first = false;
        } else {
            value = with_runtime(|rt| rt.sample(|| reduce(&value)))?;
        }
        Ok(Some(value.clone()))
    }
}

impl<T> Clone for Computation<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T> Debug for Computation<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("id", &self.id)
            .field("value", &*self.cell.borrow())
            .field("state", &with_runtime(|rt| rt.state(self.id)))
            .finish()
    }
}

/// Serializes the cached value, `None` if the body never produced one.
impl<T> Serialize for Computation<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.cell.borrow().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::reactive::{Runtime, Signal};
    use std::cell::Cell;

    fn counter() -> Rc<Cell<usize>> {
        Rc::new(Cell::new(0))
    }

    #[test]
    fn memo_recomputes_on_change() {
        let a = Signal::new(1);
        let runs = counter();

        let doubled = Computation::memo({
            let a = a.clone();
            let runs = Rc::clone(&runs);
            move || {
                runs.set(runs.get() + 1);
                Ok(a.get() * 2)
            }
        })
        .unwrap();

        assert_eq!(doubled.get().unwrap(), Some(2));
        assert_eq!(runs.get(), 1);

        a.set(4).unwrap();
        assert_eq!(doubled.get().unwrap(), Some(8));
        assert_eq!(runs.get(), 2);

        // Reading outside a computation never re-runs anything.
        doubled.get().unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn none_keeps_the_previous_value() {
        let a = Signal::new(1);

        let evens = Computation::new({
            let a = a.clone();
            move || {
                let v = a.get();
                Ok((v % 2 == 0).then_some(v))
            }
        })
        .unwrap();
        assert_eq!(evens.get().unwrap(), None);

        a.set(2).unwrap();
        assert_eq!(evens.get().unwrap(), Some(2));

        a.set(3).unwrap();
        assert_eq!(evens.get().unwrap(), Some(2));
    }

    #[test]
    fn computations_read_computations() {
        let a = Signal::new(1);
        let b = Computation::memo({
            let a = a.clone();
            move || Ok(a.get() + 1)
        })
        .unwrap();
        let c = Computation::memo({
            let b = b.clone();
            move || Ok(b.get()?.unwrap_or_default() * 10)
        })
        .unwrap();

        assert_eq!(b.dependent_count(), 1);

        a.set(2).unwrap();
        assert_eq!(c.get().unwrap(), Some(30));
    }

    #[test]
    fn reading_itself_is_a_cycle() {
        let slot: Rc<RefCell<Option<Computation<i32>>>> = Rc::new(RefCell::new(None));
        let a = Signal::new(0);

        let c = Computation::memo({
            let slot = Rc::clone(&slot);
            let a = a.clone();
            move || {
                let n = a.get();
                if let Some(me) = slot.borrow().as_ref() {
                    me.get()?;
                }
                Ok(n)
            }
        })
        .unwrap();
        *slot.borrow_mut() = Some(c.clone());

        let result = a.set(1);
        assert_eq!(result, Err(Error::Cycle { node: c.id() }));
        assert!(Runtime::current().is_none());

        // The failed frame left the engine usable.
        slot.borrow_mut().take();
        a.set(2).unwrap();
        assert_eq!(c.get().unwrap(), Some(2));
    }

    #[test]
    fn failed_creation_disposes_the_node() {
        let a = Signal::new(0);

        let result = Computation::memo({
            let a = a.clone();
            move || -> Result<i32> {
                a.get();
                Err(Error::CleanupOutsideComputation)
            }
        });

        assert!(result.is_err());
        assert_eq!(a.dependent_count(), 0);
    }

    #[test]
    fn dispose_is_idempotent() {
        let a = Signal::new(0);
        let cleanups = counter();

        let c = Computation::effect({
            let a = a.clone();
            let cleanups = Rc::clone(&cleanups);
            move || {
                a.get();
                let cleanups = Rc::clone(&cleanups);
                Runtime::on_cleanup(move |last| {
                    assert!(last);
                    cleanups.set(cleanups.get() + 1);
                })
            }
        })
        .unwrap();

        c.dispose();
        c.dispose();

        assert!(c.is_disposed());
        assert_eq!(cleanups.get(), 1);
        assert_eq!(a.dependent_count(), 0);

        // Writes no longer reach it.
        a.set(1).unwrap();
        assert_eq!(cleanups.get(), 1);
    }

    #[test]
    fn on_tracks_only_the_event() {
        let clicks = Signal::new(0);
        let step = Signal::new(10);

        let total = Computation::on(
            {
                let clicks = clicks.clone();
                move || {
                    clicks.get();
                    Ok(())
                }
            },
            {
                let step = step.clone();
                move |total: &i32| Ok(total + step.get())
            },
            0,
        )
        .unwrap();

        assert_eq!(total.get().unwrap(), Some(0));

        clicks.set(1).unwrap();
        assert_eq!(total.get().unwrap(), Some(10));

        // The reducer's read is not a dependency.
        step.set(1).unwrap();
        assert_eq!(total.get().unwrap(), Some(10));
        assert_eq!(step.dependent_count(), 0);

        clicks.set(2).unwrap();
        assert_eq!(total.get().unwrap(), Some(11));
    }

    #[test]
    fn state_reports_lifecycle() {
        let c = Computation::memo(|| Ok(1)).unwrap();
        assert_eq!(c.state(), Some(RunState::Current));

        c.dispose();
        assert_eq!(c.state(), None);
    }

    #[test]
    fn serializes_cached_value() {
        let c = Computation::memo(|| Ok("ready".to_string())).unwrap();
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"ready\"");

        let empty: Computation<i32> = Computation::new(|| Ok(None)).unwrap();
        assert_eq!(serde_json::to_string(&empty).unwrap(), "null");
    }
}
