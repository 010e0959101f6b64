//! Signal Implementation
//!
//! A Signal is the settable reactive primitive. It holds a committed value
//! and, while writes are being staged, at most one pending value.
//!
//! # How Signals Work
//!
//! 1. When a signal is read by a running computation (and not sampled), the
//!    read records an edge from the signal to that computation.
//!
//! 2. A write outside any batch commits and propagates before returning.
//!
//! 3. A write inside a batch or a running body is staged. Staged values are
//!    committed together at the start of the next frame.
//!
//! Committing a value equal to the current one does not mark dependents.
//!
//! Two staged writes that disagree are a conflict when they come from batch
//! code. A write from a running computation replaces the staged value, since
//! the computation reads staged values and so builds on them.
//!
//! # Memory Layout
//!
//! The value cell is shared by every clone of the accessor. The graph only
//! holds a weak, type-erased pointer to it; dropping the last clone releases
//! the node.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use serde::{Serialize, Serializer};

use super::runtime::{self, with_runtime, RuntimeState};
use crate::error::{Error, Result};
use crate::graph::{NodeId, Staged};

struct SignalCell<T> {
    id: NodeId,
    value: RefCell<T>,
    pending: RefCell<Option<T>>,
}

impl<T: PartialEq> Staged for SignalCell<T> {
    fn commit(&self) -> bool {
        let Some(value) = self.pending.borrow_mut().take() else {
            return false;
        };
        let mut current = self.value.borrow_mut();
        if *current == value {
            return false;
        }
        *current = value;
        true
    }

    fn discard(&self) {
        self.pending.borrow_mut().take();
    }
}

impl<T> Drop for SignalCell<T> {
    fn drop(&mut self) {
        runtime::release(self.id);
    }
}

/// A reactive, settable value of type `T`.
///
/// # Example
///
/// ```rust
/// use ripple_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5).unwrap();
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T> {
    cell: Rc<SignalCell<T>>,
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        let cell = Rc::new(SignalCell {
            id: NodeId::new(),
            value: RefCell::new(value),
            pending: RefCell::new(None),
        });

        let staged: Weak<dyn Staged> = Rc::downgrade(&cell) as Weak<dyn Staged>;
        with_runtime(|rt| rt.add_signal(cell.id, staged));

        Self { cell }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.cell.id
    }

    /// Get the current value.
    ///
    /// Inside a running computation this records a dependency (unless
    /// sampling) and returns the value staged earlier in the frame, if any.
    /// Everywhere else it returns the committed value.
    pub fn get(&self) -> T {
        let sees_staged = with_runtime(|rt| rt.read_signal(self.cell.id));
        if sees_staged {
            if let Some(staged) = self.cell.pending.borrow().as_ref() {
                return staged.clone();
            }
        }
        self.cell.value.borrow().clone()
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        with_runtime(|rt| rt.sample(|| self.get()))
    }

    /// Set a new value.
    ///
    /// Outside a batch, every dependent computation re-runs before this
    /// returns.
    pub fn set(&self, value: T) -> Result<()> {
        with_runtime(|rt| {
            let ctx = rt.context();
            if !ctx.batching {
                return self.write_now(rt, value);
            }

            let first = {
                let mut pending = self.cell.pending.borrow_mut();
                match pending.as_mut() {
                    Some(staged) if ctx.updating.is_some() => {
                        *staged = value;
                        false
                    }
                    Some(staged) if *staged != value => {
                        return Err(Error::ConflictingWrite { node: self.cell.id });
                    }
                    Some(_) => false,
                    None => {
                        *pending = Some(value);
                        true
                    }
                }
            };

            rt.stage(self.cell.id, first);
            Ok(())
        })
    }

    /// Apply `f` to the current value and write the result.
    ///
    /// Inside a batch `f` receives the staged value if there is one, so
    /// several updates fold together instead of conflicting.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        with_runtime(|rt| {
            if !rt.context().batching {
                let next = f(&self.cell.value.borrow());
                return self.write_now(rt, next);
            }

            let next = {
                let pending = self.cell.pending.borrow();
                match pending.as_ref() {
                    Some(staged) => f(staged),
                    None => f(&self.cell.value.borrow()),
                }
            };

            let first = self.cell.pending.borrow_mut().replace(next).is_none();
            rt.stage(self.cell.id, first);
            Ok(())
        })
    }

    fn write_now(&self, rt: &RuntimeState, value: T) -> Result<()> {
        if rt.dependent_count(self.cell.id) == 0 {
            *self.cell.value.borrow_mut() = value;
            return Ok(());
        }

        *self.cell.pending.borrow_mut() = Some(value);
        rt.stage(self.cell.id, true);
        rt.propagate()
    }

    /// Get the number of computations currently reading this signal.
    pub fn dependent_count(&self) -> usize {
        with_runtime(|rt| rt.dependent_count(self.cell.id))
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.cell.id)
            .field("value", &*self.cell.value.borrow())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

/// Serializes the committed value. Never records a dependency.
impl<T> Serialize for Signal<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.cell.value.borrow().serialize(serializer)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
