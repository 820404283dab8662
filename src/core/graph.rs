use std::{
    cell::{Cell, RefCell},
    mem::take,
    rc::{Rc, Weak},
};

use slabmap::SlabMap;

use super::{current_run_id, next_node_id, next_run_id, DependenciesState, Invalidation};

/// Identifies one observer edge inside a source's [`SinkBindings`] slab.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub(crate) struct BindKey(usize);

/// Per-node bookkeeping shared by everything that can be observed.
///
/// `diff` and `last_observed_run` are transient markers owned by the
/// dependency-diffing pass; outside [`SourceBinder::track`] both are
/// meaningless.
pub(crate) struct AtomCore {
    name: String,
    pub(crate) sinks: RefCell<SinkBindings>,
    diff: Cell<usize>,
    last_observed_run: Cell<u64>,
    last_changed_run: Cell<u64>,
}

impl AtomCore {
    pub fn new(name: Option<String>, kind: &str) -> Self {
        let id = next_node_id();
        Self {
            name: name.unwrap_or_else(|| format!("{kind}@{id}")),
            sinks: RefCell::new(SinkBindings::new()),
            diff: Cell::new(0),
            last_observed_run: Cell::new(0),
            last_changed_run: Cell::new(0),
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn is_observed(&self) -> bool {
        !self.sinks.borrow().is_empty()
    }
    pub fn observer_count(&self) -> usize {
        self.sinks.borrow().len()
    }

    /// Propagates an invalidation to every observer edge, stamping this
    /// source with the current tracking epoch first.
    ///
    /// The stamp is what keeps a change visible to a derivation whose
    /// pass read this source but has not bound its edges yet: the notify
    /// itself reaches nobody then, and [`SourceBinder::bind_dependencies`]
    /// recovers the staleness from the stamp.
    pub fn notify_sinks(&self, invalidation: Invalidation) {
        self.last_changed_run.set(current_run_id());
        self.sinks.borrow_mut().notify(invalidation);
    }
}

/// A node that can be observed: an atom, an observable value, or a
/// computed value acting as a source for downstream derivations.
pub(crate) trait BindSource: 'static {
    fn atom_core(&self) -> &AtomCore;

    fn subscribe(self: Rc<Self>, sink: Weak<dyn BindSink>) -> BindKey {
        self.atom_core().sinks.borrow_mut().subscribe(sink)
    }
    fn unsubscribe(self: Rc<Self>, key: BindKey) {
        self.atom_core().sinks.borrow_mut().unsubscribe(key);
    }

    /// Bring this source up to date, then report whether the edge
    /// identified by `key` carries a confirmed change.
    ///
    /// Plain observables have nothing to recompute; computed values
    /// override this to recompute themselves first.
    fn resolve(self: Rc<Self>, key: BindKey) -> bool {
        self.atom_core().sinks.borrow().is_stale(key)
    }
}

/// A node that observes sources: a reaction or a computed value.
pub(crate) trait BindSink: 'static {
    fn notify(self: Rc<Self>, invalidation: Invalidation);
}

struct SinkBinding {
    sink: Weak<dyn BindSink>,
    state: DependenciesState,
}

impl SinkBinding {
    fn notify(&self, invalidation: Invalidation) {
        if let Some(sink) = self.sink.upgrade() {
            sink.notify(invalidation);
        }
    }
}

/// The observer half of the graph: every source owns one slab of edges,
/// keyed so the observing side can unsubscribe in O(1).
#[derive(Default)]
pub(crate) struct SinkBindings(SlabMap<SinkBinding>);

impl SinkBindings {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn subscribe(&mut self, sink: Weak<dyn BindSink>) -> BindKey {
        BindKey(self.0.insert(SinkBinding {
            sink,
            state: DependenciesState::UpToDate,
        }))
    }
    pub fn unsubscribe(&mut self, key: BindKey) {
        self.0.remove(key.0);
    }

    /// Marks every clean edge with `invalidation` and notifies its sink.
    ///
    /// Edges already stale or possibly stale are skipped: their sinks were
    /// notified when the edge first left the clean state.
    pub fn notify(&mut self, invalidation: Invalidation) {
        self.0.optimize();
        for binding in self.0.values_mut() {
            if binding.state.needs_notify() {
                binding.notify(invalidation);
            }
            binding.state |= invalidation;
        }
    }

    /// Resolves every possibly-stale edge after the owning computed value
    /// refreshed itself: `changed` decides whether they become stale or
    /// settle back to clean.
    pub fn settle(&mut self, changed: bool) {
        self.0.optimize();
        for binding in self.0.values_mut() {
            if binding.state == DependenciesState::PossiblyStale {
                binding.state = DependenciesState::from_is_stale(changed);
            }
        }
    }

    pub fn is_stale(&self, key: BindKey) -> bool {
        match self.0[key.0].state {
            DependenciesState::Stale => true,
            DependenciesState::PossiblyStale => {
                panic!("`is_stale` called on an unresolved edge")
            }
            _ => false,
        }
    }

    /// Resets an edge kept across a re-tracking pass: the observer has just
    /// recomputed, so whatever staleness the edge carried is consumed.
    pub fn reset_clean(&mut self, key: BindKey) {
        self.0[key.0].state = DependenciesState::UpToDate;
    }

    /// Marks an edge stale without notifying; the caller notifies the
    /// sink itself. Used when a bind discovers the source changed while
    /// the pass was still running.
    pub fn mark_stale(&mut self, key: BindKey) {
        self.0[key.0].state = DependenciesState::Stale;
    }
}

struct SourceBinding {
    source: Rc<dyn BindSource>,
    key: BindKey,
}

/// The observing half of the graph: the ordered set of sources a
/// derivation read during its last tracking pass.
#[derive(Default)]
pub(crate) struct SourceBindings(Vec<SourceBinding>);

impl SourceBindings {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Re-checks every source, forcing upstream computed values to
    /// recompute, and reports whether any dependency carries a confirmed
    /// change. Short-circuits on the first one that does.
    pub fn check(&self) -> bool {
        for binding in &self.0 {
            if binding.source.clone().resolve(binding.key) {
                return true;
            }
        }
        false
    }

    pub fn clear(&mut self) {
        for binding in self.0.drain(..) {
            binding.source.unsubscribe(binding.key);
        }
    }
}

/// Sources recorded while a derivation function runs. Consumed by
/// [`SourceBinder::bind_dependencies`] when the pass ends.
pub(crate) struct TrackingFrame {
    run_id: u64,
    observed: Vec<Rc<dyn BindSource>>,
}

/// Context for reading observable state.
///
/// While a derivation is being tracked the context carries the tracking
/// frame and every read registers a dependency; outside tracking the
/// context is inert and reads are plain reads.
pub struct SignalContext<'s> {
    frame: Option<&'s mut TrackingFrame>,
}

impl<'s> SignalContext<'s> {
    pub(crate) fn untracked() -> Self {
        Self { frame: None }
    }

    /// True while a derivation is recording its dependencies.
    pub fn is_tracking(&self) -> bool {
        self.frame.is_some()
    }

    /// Calls `f` with a context that does not track dependencies.
    pub fn untrack<T>(&mut self, f: impl FnOnce(&mut SignalContext) -> T) -> T {
        f(&mut SignalContext::untracked())
    }

    /// Records a read of `source` in the current tracking frame, if any.
    ///
    /// Repeated reads of the same source within one pass are recorded
    /// once: the source remembers the run id of the pass that last
    /// observed it.
    pub(crate) fn report_observed(&mut self, source: Rc<dyn BindSource>) -> bool {
        let Some(frame) = &mut self.frame else {
            return false;
        };
        let core = source.atom_core();
        if core.last_observed_run.get() != frame.run_id {
            core.last_observed_run.set(frame.run_id);
            frame.observed.push(source);
        }
        true
    }
}

/// The derivation core shared by computed values and reactions: owns the
/// staleness state and the observing set, runs tracked passes, and
/// rewires subscriptions incrementally after each pass.
pub(crate) struct SourceBinder {
    sink: Weak<dyn BindSink>,
    state: Cell<DependenciesState>,
    sources: RefCell<SourceBindings>,
}

impl SourceBinder {
    pub fn new(sink: Weak<dyn BindSink>) -> Self {
        Self {
            sink,
            state: Cell::new(DependenciesState::NotTracking),
            sources: RefCell::new(SourceBindings::default()),
        }
    }

    pub fn state(&self) -> DependenciesState {
        self.state.get()
    }
    pub fn observing_count(&self) -> usize {
        self.sources.borrow().len()
    }

    /// Reacts to an upstream invalidation. Returns true if the derivation
    /// was clean before, i.e. the caller should schedule or forward.
    pub fn on_notify(&self, invalidation: Invalidation) -> bool {
        let state = self.state.get();
        self.state.set(state | invalidation);
        state.needs_notify()
    }

    /// Decides whether the next run is necessary, resolving
    /// `PossiblyStale` by re-reading upstream computed values. Leaves the
    /// state at `Stale` or `UpToDate` accordingly.
    pub fn should_compute(&self) -> bool {
        match self.state.get() {
            DependenciesState::UpToDate => false,
            DependenciesState::NotTracking | DependenciesState::Stale => true,
            DependenciesState::PossiblyStale => {
                let stale = self.sources.borrow().check();
                self.state.set(DependenciesState::from_is_stale(stale));
                stale
            }
        }
    }

    /// Runs `f` under tracking and rewires subscriptions to exactly the
    /// set of sources read.
    ///
    /// A write landing on a dependency mid-pass re-stales the derivation
    /// and must survive the pass. Two mechanisms cover it: the state moves
    /// to `UpToDate` *before* `f` runs, so a notify through an existing
    /// edge sticks; and `bind_dependencies` consults each source's change
    /// stamp for writes that arrived while the edge did not exist yet.
    pub fn track<T>(&self, f: impl FnOnce(&mut SignalContext) -> T) -> T {
        self.state.set(DependenciesState::UpToDate);
        let mut frame = TrackingFrame {
            run_id: next_run_id(),
            observed: Vec::new(),
        };
        let result = f(&mut SignalContext {
            frame: Some(&mut frame),
        });
        self.bind_dependencies(frame);
        result
    }

    /// Diffs the sources read this pass against the previous observing set
    /// in O(old + new), using a marker cell on each source: kept sources
    /// adopt their existing edge key, fresh ones subscribe, leftovers
    /// unsubscribe. Duplicate reads collapse to a single edge.
    ///
    /// A source whose change stamp falls inside this pass was written
    /// after the body read it; its notify had no edge to travel (or hit
    /// one that was already consumed), so the edge is bound stale and the
    /// sink is re-staled once binding is done.
    fn bind_dependencies(&self, frame: TrackingFrame) {
        let old = take(&mut *self.sources.borrow_mut());
        for (index, binding) in old.0.iter().enumerate() {
            binding.source.atom_core().diff.set(index + 1);
        }

        let mut next = SourceBindings(Vec::with_capacity(frame.observed.len()));
        let mut changed_mid_pass = false;
        for source in frame.observed {
            let core = source.atom_core();
            let key = match core.diff.get() {
                0 => source.clone().subscribe(self.sink.clone()),
                usize::MAX => continue,
                marker => old.0[marker - 1].key,
            };
            if core.last_changed_run.get() >= frame.run_id {
                core.sinks.borrow_mut().mark_stale(key);
                changed_mid_pass = true;
            } else {
                core.sinks.borrow_mut().reset_clean(key);
            }
            core.diff.set(usize::MAX);
            next.0.push(SourceBinding { source, key });
        }

        for binding in old.0 {
            let core = binding.source.atom_core();
            let kept = core.diff.get() == usize::MAX;
            core.diff.set(0);
            if !kept {
                binding.source.unsubscribe(binding.key);
            }
        }
        for binding in &next.0 {
            binding.source.atom_core().diff.set(0);
        }
        *self.sources.borrow_mut() = next;

        if changed_mid_pass {
            if let Some(sink) = self.sink.upgrade() {
                sink.notify(Invalidation::Stale);
            }
        }
    }

    /// Unsubscribes from every source and returns to `NotTracking`.
    pub fn clear(&self) {
        self.sources.borrow_mut().clear();
        self.state.set(DependenciesState::NotTracking);
    }
}
