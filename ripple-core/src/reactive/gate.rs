//! Gating Hook
//!
//! A [`Gate`] lets an external scheduler decide when gated computations may
//! re-run. While marking, a gated computation that the gate does not admit
//! stays current, subscribes to the gate's ticker signal and is reported to
//! the scheduler through its tick callback. When the scheduler calls
//! [`Go::go`], the ticker is bumped and every held computation re-runs in
//! the following frame, reading whatever the inputs are by then.
//!
//! This is how time-based behavior (delay, debounce, throttle, pause) plugs
//! into the engine without the engine knowing about timers.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::trace;

use super::runtime::with_runtime;
use super::signal::Signal;
use crate::error::Result;
use crate::graph::{Hold, NodeId, Time};

struct GateInner {
    /// Bumped on every release, so each write is a change.
    ticker: Signal<u64>,

    /// Frame in which held computations are admitted.
    go_time: Cell<Option<Time>>,

    tick: RefCell<Box<dyn FnMut()>>,
}

impl Hold for GateInner {
    fn admits(&self, time: Time) -> bool {
        self.go_time.get() == Some(time)
    }

    fn ticker(&self) -> NodeId {
        self.ticker.id()
    }

    fn held(&self) {
        trace!(ticker = %self.ticker.id(), "held");
        // A tick that re-enters its own gate is dropped.
        if let Ok(mut tick) = self.tick.try_borrow_mut() {
            tick();
        }
    }
}

/// Handle given to a gate's scheduler for releasing held computations.
#[derive(Clone)]
pub struct Go {
    inner: Weak<GateInner>,
}

impl Go {
    /// Admit every held computation in the next frame.
    ///
    /// Outside a batch this propagates before returning. A no-op once the
    /// gate has been dropped.
    pub fn go(&self) -> Result<()> {
        let Some(inner) = self.inner.upgrade() else {
            return Ok(());
        };

        let next = with_runtime(|rt| rt.time()).next();
        inner.go_time.set(Some(next));
        inner.ticker.update(|n| n.wrapping_add(1))
    }
}

impl Debug for Go {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Go")
            .field("live", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// An external gate on computation re-runs.
///
/// # Example
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// use ripple_core::reactive::{Builder, Gate, Signal};
///
/// // A manual gate: the scheduler just keeps the `Go` handle around.
/// let handle = Rc::new(RefCell::new(None));
/// let gate = Gate::new({
///     let handle = Rc::clone(&handle);
///     move |go| {
///         *handle.borrow_mut() = Some(go);
///         || {}
///     }
/// });
///
/// let a = Signal::new(1);
/// let c = Builder::new()
///     .gated(&gate)
///     .memo({
///         let a = a.clone();
///         move || Ok(a.get())
///     })
///     .unwrap();
///
/// a.set(2).unwrap();
/// assert_eq!(c.get().unwrap(), Some(1));
///
/// handle.borrow().as_ref().unwrap().go().unwrap();
/// assert_eq!(c.get().unwrap(), Some(2));
/// ```
#[derive(Clone)]
pub struct Gate {
    inner: Rc<GateInner>,
}

impl Gate {
    /// Create a gate.
    ///
    /// `scheduler` is called once with the gate's [`Go`] handle and returns
    /// the tick callback, invoked once per held computation after each mark
    /// phase that held something.
    pub fn new<S, T>(scheduler: S) -> Self
    where
        S: FnOnce(Go) -> T,
        T: FnMut() + 'static,
    {
        let ticker = Signal::new(0);
        let inner = Rc::new_cyclic(|weak: &Weak<GateInner>| {
            let tick = scheduler(Go {
                inner: weak.clone(),
            });
            GateInner {
                ticker,
                go_time: Cell::new(None),
                tick: RefCell::new(Box::new(tick)),
            }
        });
        Self { inner }
    }

    /// A handle that releases this gate's held computations.
    pub fn go_handle(&self) -> Go {
        Go {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub(crate) fn hold(&self) -> Rc<dyn Hold> {
        Rc::clone(&self.inner) as Rc<dyn Hold>
    }

    /// Number of computations currently waiting on this gate.
    pub fn held_count(&self) -> usize {
        self.inner.ticker.dependent_count()
    }
}

impl Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("ticker", &self.inner.ticker.id())
            .field("go_time", &self.inner.go_time.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Builder, Computation, Runtime};

    fn manual() -> (Gate, Rc<Cell<usize>>) {
        let ticks = Rc::new(Cell::new(0));
        let gate = Gate::new({
            let ticks = Rc::clone(&ticks);
            move |_go| move || ticks.set(ticks.get() + 1)
        });
        (gate, ticks)
    }

    #[test]
    fn held_computations_wait_for_go() {
        let (gate, ticks) = manual();
        let a = Signal::new(0);
        let runs = Rc::new(Cell::new(0));

        let c = Builder::new()
            .gated(&gate)
            .memo({
                let a = a.clone();
                let runs = Rc::clone(&runs);
                move || {
                    runs.set(runs.get() + 1);
                    Ok(a.get())
                }
            })
            .unwrap();

        a.set(1).unwrap();
        a.set(2).unwrap();
        assert_eq!(c.get().unwrap(), Some(0));
        assert_eq!(runs.get(), 1);
        assert_eq!(ticks.get(), 2);
        assert_eq!(gate.held_count(), 1);

        gate.go_handle().go().unwrap();
        assert_eq!(c.get().unwrap(), Some(2));
        assert_eq!(runs.get(), 2);
        assert_eq!(gate.held_count(), 0);
    }

    #[test]
    fn go_without_held_nodes_is_quiet() {
        let (gate, ticks) = manual();
        let before = Runtime::time();

        gate.go_handle().go().unwrap();
        assert_eq!(Runtime::time(), before);
        assert_eq!(ticks.get(), 0);
    }

    #[test]
    fn children_inherit_the_gate() {
        let (gate, _ticks) = manual();
        let a = Signal::new(0);
        let b = Signal::new(0);
        let child: Rc<RefCell<Option<Computation<i32>>>> = Rc::new(RefCell::new(None));

        let _parent = Builder::new()
            .gated(&gate)
            .effect({
                let a = a.clone();
                let b = b.clone();
                let child = Rc::clone(&child);
                move || {
                    a.get();
                    let inner = Computation::memo({
                        let b = b.clone();
                        move || Ok(b.get())
                    })?;
                    *child.borrow_mut() = Some(inner);
                    Ok(())
                }
            })
            .unwrap();

        b.set(5).unwrap();
        let inner = child.borrow().clone().unwrap();
        assert_eq!(inner.get().unwrap(), Some(0));

        gate.go_handle().go().unwrap();
        assert_eq!(inner.get().unwrap(), Some(5));
    }

    #[test]
    fn go_after_drop_is_a_no_op() {
        let (gate, _ticks) = manual();
        let go = gate.go_handle();
        drop(gate);
        assert_eq!(go.go(), Ok(()));
    }
}
