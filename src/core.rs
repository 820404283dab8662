use std::{
    cell::RefCell,
    marker::PhantomData,
    mem::{replace, take, transmute},
    rc::Rc,
    thread::AccessError,
};

use parse_display::Display;
use slabmap::SlabMap;

mod graph;
mod staleness;


pub use graph::SignalContext;
pub(crate) use graph::{AtomCore, BindKey, BindSink, BindSource, SourceBinder};
pub use staleness::DependenciesState;
pub(crate) use staleness::Invalidation;

use crate::reaction::{Reaction, ReactionError};
use crate::spy::SpyEvent;

/// Upper bound on queue sweeps in one reaction drain. A reaction that
/// keeps re-triggering itself is aborted once this many sweeps have run.
pub const MAX_REACTION_ITERATIONS: usize = 100;

thread_local! {
    static GLOBALS: RefCell<Globals> = RefCell::new(Globals::new());
}

type Scheduler = Rc<dyn Fn(&mut dyn FnMut(&mut ActionContext), &mut ActionContext)>;

/// Process-wide (per-thread) scheduler state: transaction depth, the
/// pending-reaction queue, and the listener registries.
pub(crate) struct Globals {
    pub(crate) is_runtime_exists: bool,
    pub(crate) in_batch: usize,
    pub(crate) is_running_reactions: bool,
    pub(crate) pending_reactions: Vec<Reaction>,
    pub(crate) suspends: Vec<Rc<dyn Suspend>>,
    pub(crate) scheduler: Option<Scheduler>,
    pub(crate) error_handlers: SlabMap<Rc<dyn Fn(&ReactionError, &Reaction)>>,
    pub(crate) spy_listeners: SlabMap<Rc<dyn Fn(&SpyEvent)>>,
    pub(crate) spy_depth: usize,
    run_id: u64,
    node_id: u64,
}

impl Globals {
    fn new() -> Self {
        Self {
            is_runtime_exists: false,
            in_batch: 0,
            is_running_reactions: false,
            pending_reactions: Vec::new(),
            suspends: Vec::new(),
            scheduler: None,
            error_handlers: SlabMap::new(),
            spy_listeners: SlabMap::new(),
            spy_depth: 0,
            run_id: 0,
            node_id: 0,
        }
    }
    pub(crate) fn with<T>(f: impl FnOnce(&mut Self) -> T) -> T {
        GLOBALS.with(|g| f(&mut g.borrow_mut()))
    }
    pub(crate) fn try_with<T>(f: impl FnOnce(&mut Self) -> T) -> Result<T, AccessError> {
        GLOBALS.try_with(|g| f(&mut g.borrow_mut()))
    }
}

pub(crate) fn next_run_id() -> u64 {
    Globals::with(|g| {
        g.run_id += 1;
        g.run_id
    })
}
/// The id of the most recently started tracking pass. A change stamped
/// with this value happened during (or after) any pass that is still
/// between its body and its `bind_dependencies`.
pub(crate) fn current_run_id() -> u64 {
    Globals::with(|g| g.run_id)
}
pub(crate) fn next_node_id() -> u64 {
    Globals::with(|g| {
        g.node_id += 1;
        g.node_id
    })
}

/// Reactive runtime handle.
///
/// At most one `Runtime` may exist per thread at a time. All writes go
/// through the [`ActionContext`] it hands out; untracked reads go through
/// [`Runtime::sc`].
pub struct Runtime {
    _not_send: PhantomData<*const ()>,
}

impl Runtime {
    pub fn new() -> Self {
        if Globals::with(|g| replace(&mut g.is_runtime_exists, true)) {
            panic!("Only one `Runtime` can exist in the same thread at the same time.");
        }
        Self {
            _not_send: PhantomData,
        }
    }

    /// Context for changing state.
    pub fn ac(&mut self) -> &mut ActionContext {
        ActionContext::new(self)
    }

    /// Untracked context for reading state.
    pub fn sc(&mut self) -> SignalContext<'_> {
        SignalContext::untracked()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Registrations and queued work die with the runtime.
        let _ = Globals::try_with(|g| *g = Globals::new());
    }
}

/// Context for changing state. Obtained from [`Runtime::ac`] and passed
/// down into reaction bodies; computed functions never see one, which is
/// what makes writes inside a computation impossible.
#[repr(transparent)]
pub struct ActionContext(Runtime);

impl ActionContext {
    fn new(rt: &mut Runtime) -> &mut Self {
        unsafe { transmute(rt) }
    }

    /// Untracked context for reading state.
    pub fn sc(&mut self) -> SignalContext<'_> {
        SignalContext::untracked()
    }
}

pub(crate) fn start_batch() {
    Globals::with(|g| g.in_batch += 1);
}

/// Closes one batch level; the outermost close drains the pending
/// reactions and then flushes deferred suspends.
pub(crate) fn end_batch(ac: &mut ActionContext) {
    let depth = Globals::with(|g| {
        g.in_batch -= 1;
        g.in_batch
    });
    if depth == 0 {
        run_reactions(ac);
    }
}

/// Closes one batch level without draining. Used on paths that cannot
/// schedule reactions (disposal), where only the depth and the suspend
/// queue need attention.
pub(crate) fn end_batch_silent() {
    let depth = Globals::with(|g| {
        g.in_batch -= 1;
        g.in_batch
    });
    if depth == 0 {
        flush_suspends();
    }
}

struct BatchGuard {
    armed: bool,
}
impl Drop for BatchGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = Globals::try_with(|g| g.in_batch -= 1);
        }
    }
}

/// Runs `f` inside one transaction: writes apply immediately, but
/// reactions only fire when the outermost batch closes.
///
/// Nesting is free; only the outermost `batch` drains. The batch depth is
/// restored even if `f` panics.
pub fn batch<T>(ac: &mut ActionContext, f: impl FnOnce(&mut ActionContext) -> T) -> T {
    start_batch();
    let mut guard = BatchGuard { armed: true };
    let result = f(ac);
    guard.armed = false;
    drop(guard);
    end_batch(ac);
    result
}

/// Drains the pending-reaction queue through the composed scheduler.
/// Returns immediately inside a batch or when a drain is already running.
pub(crate) fn run_reactions(ac: &mut ActionContext) {
    if Globals::with(|g| g.in_batch > 0 || g.is_running_reactions) {
        return;
    }
    let scheduler = Globals::with(|g| g.scheduler.clone());
    match scheduler {
        None => drain_pending_reactions(ac),
        Some(s) => s(&mut drain_pending_reactions, ac),
    }
    flush_suspends();
}

fn drain_pending_reactions(ac: &mut ActionContext) {
    struct RunningGuard;
    impl Drop for RunningGuard {
        fn drop(&mut self) {
            let _ = Globals::try_with(|g| g.is_running_reactions = false);
        }
    }
    if Globals::with(|g| replace(&mut g.is_running_reactions, true)) {
        return;
    }
    let _guard = RunningGuard;

    let mut iterations = 0;
    loop {
        let pending = Globals::with(|g| take(&mut g.pending_reactions));
        if pending.is_empty() {
            break;
        }
        iterations += 1;
        if iterations > MAX_REACTION_ITERATIONS {
            tracing::error!(
                reaction = pending[0].name(),
                "reactions did not converge after {} sweeps; clearing the pending queue",
                MAX_REACTION_ITERATIONS
            );
            for reaction in pending {
                reaction.mark_unscheduled();
            }
            break;
        }
        for reaction in pending {
            reaction.run_reaction(ac);
        }
    }
}

/// Wraps the current reaction scheduler with `f`.
///
/// `f` receives the previous scheduler chain as a callable and the action
/// context; calling the chain performs the drain. Composition preserves
/// ordering: the innermost (baseline) scheduler runs the drain
/// synchronously.
pub fn set_reaction_scheduler(
    f: impl Fn(&mut dyn FnMut(&mut ActionContext), &mut ActionContext) + 'static,
) {
    Globals::with(|g| {
        let next: Scheduler = match g.scheduler.take() {
            None => Rc::new(f),
            Some(prev) => Rc::new(move |run, ac| f(&mut |ac| prev(&mut *run, ac), ac)),
        };
        g.scheduler = Some(next);
    });
}

/// A node with deferred teardown: a computed value that lost its last
/// observer and, unless re-observed by flush time, drops its cache and
/// its upstream subscriptions.
pub(crate) trait Suspend {
    fn suspend(self: Rc<Self>);
}

pub(crate) fn schedule_suspend(node: Rc<dyn Suspend>) {
    Globals::with(|g| g.suspends.push(node));
}

pub(crate) fn flush_suspends() {
    if Globals::with(|g| g.in_batch > 0 || g.is_running_reactions) {
        return;
    }
    while let Some(node) = Globals::with(|g| g.suspends.pop()) {
        node.suspend();
    }
}

/// Re-entrant read of a computation that is still computing.
#[derive(Display, Debug)]
#[display("cycle detected in computation `{name}`")]
pub struct CycleError {
    pub name: String,
}

impl std::error::Error for CycleError {}
