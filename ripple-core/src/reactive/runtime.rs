//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals and
//! computations. It owns the dependency graph and the scheduling context,
//! and it drives propagation when signals change.
//!
//! # How It Works
//!
//! 1. A write outside any batch stages the value and runs propagation
//!    synchronously before returning. Inside a batch (or inside a running
//!    body) the write is only staged.
//!
//! 2. Propagation runs frames until nothing is staged. Each frame:
//!    a. advances the clock, commits staged values, marks stale computations
//!    b. notifies gates that held a node back
//!    c. re-runs stale computations in marking order
//!    d. performs disposals deferred during the run phase
//!
//! 3. Writes made by bodies during a frame are staged for the next one. The
//!    number of frames per external trigger is bounded by
//!    [`RuntimeConfig::max_frames`].
//!
//! 4. A computation is never re-marked by a signal it wrote itself during the
//!    same external trigger, so a body that writes what it reads settles.
//!    Loops through several signals get no such exemption and run into the
//!    frame limit.
//!
//! # Thread Model
//!
//! Each thread has its own runtime. All graph mutation happens synchronously
//! on that thread; user code (bodies, cleanups, gate ticks) is only ever
//! called while the graph is not borrowed, so it may freely read, write and
//! create nodes.

use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use super::context::{ContextGuard, SchedulerContext};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::graph::{Body, Cleanup, ComputationNode, Graph, Hold, NodeId, RunState, Staged, Teardown, Time};

thread_local! {
    static RUNTIME: RuntimeState = RuntimeState::new();
}

/// Run `f` against this thread's runtime.
pub(crate) fn with_runtime<R>(f: impl FnOnce(&RuntimeState) -> R) -> R {
    RUNTIME.with(f)
}

/// Queue a dropped signal for removal from the graph.
///
/// Uses `try_with` because signals may be dropped while the thread-local is
/// being torn down.
pub(crate) fn release(id: NodeId) {
    let _ = RUNTIME.try_with(|rt| {
        if let Ok(mut released) = rt.released.try_borrow_mut() {
            released.push(id);
        }
    });
}

/// How a new computation is attached to the graph.
#[derive(Default)]
pub(crate) struct Placement {
    /// Do not register the node as a child of the running computation.
    pub orphan: bool,

    /// Gate installed on the node and inherited by its children.
    pub hold: Option<Rc<dyn Hold>>,
}

/// Per-thread runtime state.
pub(crate) struct RuntimeState {
    graph: RefCell<Graph>,
    context: Cell<SchedulerContext>,
    config: Cell<RuntimeConfig>,

    /// Signals dropped since the last frame boundary. Kept apart from the
    /// graph so a drop never contends with an active graph borrow.
    released: RefCell<Vec<NodeId>>,
}

impl RuntimeState {
    fn new() -> Self {
        Self {
            graph: RefCell::new(Graph::new()),
            context: Cell::new(SchedulerContext::default()),
            config: Cell::new(RuntimeConfig::default()),
            released: RefCell::new(Vec::new()),
        }
    }

    pub fn context(&self) -> SchedulerContext {
        self.context.get()
    }

    fn enter(&self, next: SchedulerContext) -> ContextGuard<'_> {
        ContextGuard::enter(&self.context, next)
    }

    pub fn time(&self) -> Time {
        self.graph.borrow().time()
    }

    pub fn config(&self) -> RuntimeConfig {
        self.config.get()
    }

    pub fn configure(&self, config: RuntimeConfig) {
        self.config.set(config);
    }

    pub fn dependent_count(&self, source: NodeId) -> usize {
        self.graph.borrow().dependent_count(source)
    }

    pub fn state(&self, id: NodeId) -> Option<RunState> {
        self.graph.borrow().state(id)
    }

    pub fn computation_count(&self) -> usize {
        self.graph.borrow().computation_count()
    }

    // ------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------

    pub fn add_signal(&self, id: NodeId, cell: Weak<dyn Staged>) {
        self.collect_released();
        self.graph.borrow_mut().add_data(id, cell);
    }

    /// Record a read of signal `id`.
    ///
    /// Returns `true` when the reader is a running computation, which sees
    /// values staged earlier in the same frame.
    pub fn read_signal(&self, id: NodeId) -> bool {
        let ctx = self.context();
        if let Some(reader) = ctx.tracking() {
            self.graph.borrow_mut().log_read(id, reader);
        }
        ctx.updating.is_some()
    }

    /// Queue a staged value on `id`, attributing it to the running body.
    pub fn stage(&self, id: NodeId, first: bool) {
        let writer = self.context().updating;
        self.graph.borrow_mut().stage(id, writer, first);
    }

    // ------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------

    /// Run frames until nothing is staged.
    ///
    /// On error, everything staged by this call is discarded before
    /// returning.
    pub fn propagate(&self) -> Result<()> {
        let _guard = self.enter(self.context().propagating());

        let result = self.run_frames();
        {
            let mut graph = self.graph.borrow_mut();
            match result {
                Ok(()) => graph.clear_writers(),
                Err(_) => graph.abort(),
            }
        }
        self.dispose_queued();
        result
    }

    fn run_frames(&self) -> Result<()> {
        let limit = self.config.get().max_frames;
        let mut frames = 0usize;

        self.dispose_queued();

        loop {
            self.collect_released();

            let (time, committed, updates, held) = {
                let mut graph = self.graph.borrow_mut();
                if !graph.has_changes() {
                    break;
                }
                if frames >= limit {
                    warn!(limit, "runaway propagation, aborting");
                    return Err(Error::Runaway { limit });
                }
                frames += 1;

                let committed = graph.begin_frame();
                (graph.time(), committed, graph.take_updates(), graph.take_held())
            };

            debug!(
                time = time.raw(),
                committed,
                updates = updates.len(),
                held = held.len(),
                "frame"
            );

            for hold in held {
                hold.held();
            }

            // A failing body does not stop the rest of the frame: every node
            // marked here has to reflect the values committed above.
            let mut failure = None;
            for id in updates {
                if let Err(err) = self.update(id) {
                    warn!(node = %id, %err, "update failed");
                    failure.get_or_insert(err);
                }
            }

            self.dispose_queued();
            if let Some(err) = failure {
                return Err(err);
            }
        }

        Ok(())
    }

    fn collect_released(&self) {
        let released = mem::take(&mut *self.released.borrow_mut());
        if !released.is_empty() {
            self.graph.borrow_mut().release(released);
        }
    }

    /// Re-run a stale computation. Anything else is left alone.
    pub fn update(&self, id: NodeId) -> Result<()> {
        let Some(cleanups) = self.graph.borrow_mut().begin_update(id) else {
            return Ok(());
        };

        trace!(node = %id, "update");
        self.run_cleanups(cleanups, false);

        let Some((mut body, teardown)) = self.graph.borrow_mut().prepare_body(id) else {
            return Ok(());
        };
        self.finish_teardown(teardown);

        let result = {
            let _guard = self.enter(self.context().running(id));
            body()
        };

        let orphaned = self.graph.borrow_mut().finish_update(id, body);
        drop(orphaned);
        result
    }

    /// Run cleanups outside any body, with reads untracked.
    fn run_cleanups(&self, cleanups: Vec<Cleanup>, last: bool) {
        if cleanups.is_empty() {
            return;
        }

        let mut ctx = self.context().sampled();
        ctx.updating = None;
        if last {
            ctx = ctx.disposal();
        }
        let _guard = self.enter(ctx);

        for cleanup in cleanups {
            cleanup(last);
        }
    }

    fn finish_teardown(&self, teardown: Teardown) {
        if teardown.disposed.is_empty() {
            return;
        }

        trace!(disposed = ?teardown.disposed, "dispose");
        self.run_cleanups(teardown.cleanups, true);
        drop(teardown.bodies);
    }

    // ------------------------------------------------------------------
    // Computations
    // ------------------------------------------------------------------

    /// Create a computation and run its body once.
    ///
    /// Outside a batch, anything the body staged is propagated before
    /// returning.
    pub fn create(&self, mut body: Body, placement: Placement) -> Result<NodeId> {
        let ctx = self.context();
        let id = NodeId::new();
        let creator = ctx.updating;
        let owner = if placement.orphan { None } else { creator };

        {
            let mut graph = self.graph.borrow_mut();
            let mut node = ComputationNode::new(graph.time(), owner);
            node.hold = placement.hold.clone();
            node.inherited = placement.hold;
            graph.add_computation(id, node, creator);
        }

        let result = {
            let _guard = self.enter(ctx.batched().running(id));
            body()
        };

        let orphaned = self.graph.borrow_mut().finish_update(id, body);
        drop(orphaned);

        if let Err(err) = result {
            if !ctx.batching {
                self.graph.borrow_mut().abort();
            }
            self.dispose(id);
            if !ctx.batching {
                self.dispose_queued();
            }
            return Err(err);
        }

        if let Some(owner) = owner {
            self.graph.borrow_mut().adopt(owner, id);
        }

        trace!(node = %id, ?owner, "created");

        if !ctx.batching {
            self.propagate()?;
        }
        Ok(id)
    }

    /// Record a read of computation `id`, catching it up first if it is
    /// stale in the current frame.
    pub fn read_computation(&self, id: NodeId) -> Result<()> {
        let ctx = self.context();
        if ctx.updating.is_none() || ctx.disposing {
            return Ok(());
        }

        let (state, stale_now) = {
            let graph = self.graph.borrow();
            (graph.state(id), graph.stale_now(id))
        };
        match state {
            Some(RunState::Updating) => return Err(Error::Cycle { node: id }),
            Some(RunState::Stale) if stale_now => self.update(id)?,
            Some(_) | None => {}
        }

        if let Some(reader) = ctx.tracking() {
            self.graph.borrow_mut().log_read(id, reader);
        }
        Ok(())
    }

    /// Dispose a computation and everything it owns.
    ///
    /// Deferred while a body is running; idempotent.
    pub fn dispose(&self, id: NodeId) {
        if self.context().updating.is_some() {
            self.graph.borrow_mut().queue_dispose(id);
            return;
        }

        let teardown = self.graph.borrow_mut().detach(id);
        self.finish_teardown(teardown);
    }

    fn dispose_queued(&self) {
        debug_assert!(self.context().updating.is_none());
        loop {
            let queued = self.graph.borrow_mut().take_disposes();
            if queued.is_empty() {
                break;
            }
            for id in queued {
                self.dispose(id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    pub fn batch<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let ctx = self.context();
        if ctx.batching {
            return f();
        }

        let result = {
            let _guard = self.enter(ctx.batched());
            f()
        };

        match result {
            Ok(value) => {
                self.propagate()?;
                Ok(value)
            }
            Err(err) => {
                self.graph.borrow_mut().abort();
                self.dispose_queued();
                Err(err)
            }
        }
    }

    pub fn sample<R>(&self, f: impl FnOnce() -> R) -> R {
        let ctx = self.context();
        if ctx.updating.is_none() || ctx.sampling {
            return f();
        }

        let _guard = self.enter(ctx.sampled());
        f()
    }

    pub fn on_cleanup(&self, cleanup: Cleanup) -> Result<()> {
        let Some(id) = self.context().updating else {
            return Err(Error::CleanupOutsideComputation);
        };

        let rejected = match self.graph.borrow_mut().computation_mut(id) {
            Some(node) => {
                node.cleanups.push(cleanup);
                None
            }
            None => Some(cleanup),
        };

        // The node was disposed while its body ran; tear down right away.
        if let Some(cleanup) = rejected {
            self.run_cleanups(vec![cleanup], true);
        }
        Ok(())
    }
}

/// The reactive runtime of the current thread.
///
/// This is a facade over thread-local state: every thread gets its own
/// independent graph, clock and configuration.
#[derive(Debug, Clone, Copy)]
pub struct Runtime;

impl Runtime {
    /// Replace this thread's configuration.
    pub fn configure(config: RuntimeConfig) {
        with_runtime(|rt| rt.configure(config));
    }

    /// This thread's configuration.
    pub fn config() -> RuntimeConfig {
        with_runtime(RuntimeState::config)
    }

    /// Run `f` with writes staged, then commit them in a single propagation.
    ///
    /// Nested batches join the outermost one. If `f` fails, every write it
    /// staged is discarded.
    pub fn batch<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
        with_runtime(|rt| rt.batch(f))
    }

    /// Run `f` without recording dependencies.
    pub fn sample<R>(f: impl FnOnce() -> R) -> R {
        with_runtime(|rt| rt.sample(f))
    }

    /// Register a teardown for the running computation.
    ///
    /// It runs before the computation's next re-run (with `false`) or on its
    /// disposal (with `true`), whichever comes first.
    pub fn on_cleanup<F>(cleanup: F) -> Result<()>
    where
        F: FnOnce(bool) + 'static,
    {
        with_runtime(|rt| rt.on_cleanup(Box::new(cleanup)))
    }

    /// Current value of the logical clock.
    pub fn time() -> Time {
        with_runtime(RuntimeState::time)
    }

    /// Snapshot of the current scheduling flags.
    pub fn context() -> SchedulerContext {
        with_runtime(RuntimeState::context)
    }

    /// The computation currently running its body, if any.
    pub fn current() -> Option<NodeId> {
        with_runtime(|rt| rt.context().updating)
    }

    /// Number of live computations on this thread.
    pub fn computation_count() -> usize {
        with_runtime(RuntimeState::computation_count)
    }

    /// Whether reads right now record dependencies.
    pub fn is_tracking() -> bool {
        with_runtime(|rt| rt.context().tracking().is_some())
    }
}
