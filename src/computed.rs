use std::{
    cell::{Cell, Ref, RefCell},
    rc::{Rc, Weak},
};

use derive_ex::derive_ex;

use crate::core::{
    batch, schedule_suspend, ActionContext, AtomCore, BindSink, BindSource, CycleError,
    DependenciesState, Invalidation, SignalContext, SourceBinder, Suspend,
};
use crate::equality::{self, Comparer};


/// Construction options for [`ComputedValue`].
pub struct ComputedOptions<T> {
    pub(crate) name: Option<String>,
    pub(crate) equals: Option<Comparer<T>>,
    pub(crate) keep_alive: bool,
    pub(crate) requires_reaction: bool,
    pub(crate) setter: Option<Box<dyn Fn(T, &mut ActionContext)>>,
}

impl<T> ComputedOptions<T> {
    pub fn new() -> Self {
        Self {
            name: None,
            equals: None,
            keep_alive: false,
            requires_reaction: false,
            setter: None,
        }
    }
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
    pub fn equals(mut self, equals: Comparer<T>) -> Self {
        self.equals = Some(equals);
        self
    }
    /// Keeps the cache and the upstream subscriptions alive even while
    /// nothing observes this value.
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }
    /// Makes unobserved, untracked reads panic instead of silently
    /// recomputing on every access.
    pub fn requires_reaction(mut self, requires_reaction: bool) -> Self {
        self.requires_reaction = requires_reaction;
        self
    }
    /// Accepts writes by delegating them to `setter`, which typically
    /// updates the observables this value derives from.
    pub fn setter(mut self, setter: impl Fn(T, &mut ActionContext) + 'static) -> Self {
        self.setter = Some(Box::new(setter));
        self
    }
}

impl<T> Default for ComputedOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A derivation that is itself observable: recomputes lazily on read
/// when stale, memoises, and propagates to its own observers only when
/// the recomputed value differs under the equality policy.
#[derive_ex(Clone, bound())]
pub struct ComputedValue<T: 'static>(Rc<ComputedNode<T>>);

struct ComputedNode<T: 'static> {
    core: AtomCore,
    binder: SourceBinder,
    derive: RefCell<Box<dyn FnMut(&mut SignalContext) -> T>>,
    value: RefCell<Option<T>>,
    equals: Comparer<T>,
    setter: Option<Box<dyn Fn(T, &mut ActionContext)>>,
    keep_alive: bool,
    requires_reaction: bool,
    is_computing: Cell<bool>,
    is_running_setter: Cell<bool>,
    suspend_scheduled: Cell<bool>,
}

struct FlagGuard<'a>(&'a Cell<bool>);
impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<T: PartialEq + 'static> ComputedValue<T> {
    pub fn new(derive: impl FnMut(&mut SignalContext) -> T + 'static) -> Self {
        Self::with_options(derive, ComputedOptions::new())
    }
}

impl<T: 'static> ComputedValue<T> {
    pub fn with_options(
        derive: impl FnMut(&mut SignalContext) -> T + 'static,
        options: ComputedOptions<T>,
    ) -> Self
    where
        T: PartialEq,
    {
        ComputedValue(Rc::new_cyclic(|this: &Weak<ComputedNode<T>>| {
            let sink: Weak<dyn BindSink> = this.clone();
            ComputedNode {
                core: AtomCore::new(options.name, "ComputedValue"),
                binder: SourceBinder::new(sink),
                derive: RefCell::new(Box::new(derive)),
                value: RefCell::new(None),
                equals: options.equals.unwrap_or_else(equality::partial_eq),
                setter: options.setter,
                keep_alive: options.keep_alive,
                requires_reaction: options.requires_reaction,
                is_computing: Cell::new(false),
                is_running_setter: Cell::new(false),
                suspend_scheduled: Cell::new(false),
            }
        }))
    }

    pub fn name(&self) -> &str {
        self.0.core.name()
    }

    /// Gets the current value, recomputing first if any transitive
    /// dependency changed, and adds a dependency on this value to the
    /// tracking derivation, if any.
    pub fn get(&self, sc: &mut SignalContext) -> T
    where
        T: Clone,
    {
        self.borrow(sc).clone()
    }

    /// Borrowing form of [`get`](Self::get).
    ///
    /// When read while neither observed nor tracked (and not
    /// `keep_alive`), the value is computed transiently: the result is
    /// correct but no dependencies are cached, so the next such read
    /// computes again.
    pub fn borrow(&self, sc: &mut SignalContext) -> Ref<'_, T> {
        let node = &self.0;
        if node.is_computing.get() {
            panic!(
                "{}",
                CycleError {
                    name: node.core.name().to_string()
                }
            );
        }
        if sc.is_tracking() || node.core.is_observed() || node.keep_alive {
            sc.report_observed(node.clone());
            node.update();
        } else {
            if node.requires_reaction {
                panic!(
                    "computed value `{}` is configured to require an observer but is read outside any reactive context",
                    node.core.name()
                );
            }
            node.compute_transient();
        }
        Ref::map(node.value.borrow(), |v| v.as_ref().unwrap())
    }

    /// Forwards `value` to the setter supplied at construction.
    pub fn set(&self, value: T, ac: &mut ActionContext) {
        let node = &self.0;
        let Some(setter) = &node.setter else {
            panic!("computed value `{}` has no setter", node.core.name());
        };
        if node.is_running_setter.replace(true) {
            panic!(
                "the setter of computed value `{}` re-entered itself",
                node.core.name()
            );
        }
        let _guard = FlagGuard(&node.is_running_setter);
        batch(ac, |ac| setter(value, ac));
    }

    pub fn is_observed(&self) -> bool {
        self.0.core.is_observed()
    }
    pub fn observer_count(&self) -> usize {
        self.0.core.observer_count()
    }
    /// How many sources the last computation read. Zero while suspended.
    pub fn dependency_count(&self) -> usize {
        self.0.binder.observing_count()
    }

    /// Wakes every observer as if the value had changed. Used when the
    /// node is orphaned so observers re-run and rebind elsewhere.
    pub(crate) fn invalidate_observers(&self) {
        self.0.core.notify_sinks(Invalidation::Stale);
    }
}

impl<T: 'static> ComputedNode<T> {
    /// Brings the cache up to date. Recomputes only when
    /// [`SourceBinder::should_compute`] confirms a dependency change,
    /// then resolves the possibly-stale edges of downstream observers.
    fn update(self: &Rc<Self>) {
        if self.binder.state() == DependenciesState::UpToDate {
            return;
        }
        let changed = if self.binder.should_compute() {
            self.recompute()
        } else {
            false
        };
        self.core.sinks.borrow_mut().settle(changed);
    }

    fn recompute(self: &Rc<Self>) -> bool {
        self.is_computing.set(true);
        let value = {
            let _guard = FlagGuard(&self.is_computing);
            let derive = &mut *self.derive.borrow_mut();
            self.binder.track(|sc| derive(sc))
        };
        let mut cache = self.value.borrow_mut();
        let changed = match &*cache {
            None => true,
            Some(old) => !(self.equals)(old, &value),
        };
        *cache = Some(value);
        changed
    }

    fn compute_transient(&self) {
        self.is_computing.set(true);
        let value = {
            let _guard = FlagGuard(&self.is_computing);
            let derive = &mut *self.derive.borrow_mut();
            derive(&mut SignalContext::untracked())
        };
        *self.value.borrow_mut() = Some(value);
    }

    fn try_schedule_suspend(self: &Rc<Self>) {
        if self.keep_alive || self.core.is_observed() {
            return;
        }
        if !self.suspend_scheduled.replace(true) {
            schedule_suspend(self.clone());
        }
    }
}

impl<T: 'static> BindSource for ComputedNode<T> {
    fn atom_core(&self) -> &AtomCore {
        &self.core
    }

    fn unsubscribe(self: Rc<Self>, key: crate::core::BindKey) {
        self.core.sinks.borrow_mut().unsubscribe(key);
        self.try_schedule_suspend();
    }

    fn resolve(self: Rc<Self>, key: crate::core::BindKey) -> bool {
        self.update();
        self.core.sinks.borrow().is_stale(key)
    }
}

impl<T: 'static> BindSink for ComputedNode<T> {
    fn notify(self: Rc<Self>, invalidation: Invalidation) {
        // Whatever arrived from upstream, downstream observers only learn
        // that this value *may* have changed; a recompute confirms it.
        if self.binder.on_notify(invalidation) {
            self.core.notify_sinks(Invalidation::PossiblyStale);
        }
    }
}

impl<T: 'static> Suspend for ComputedNode<T> {
    fn suspend(self: Rc<Self>) {
        self.suspend_scheduled.set(false);
        if self.keep_alive || self.core.is_observed() {
            return;
        }
        self.binder.clear();
        *self.value.borrow_mut() = None;
    }
}

impl<T: std::fmt::Debug + 'static> std::fmt::Debug for ComputedValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.value.try_borrow() {
            Ok(value) => match &*value {
                Some(value) => value.fmt(f),
                None => write!(f, "<uncomputed>"),
            },
            Err(_) => write!(f, "<computing>"),
        }
    }
}
