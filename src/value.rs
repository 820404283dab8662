use std::{
    cell::{Ref, RefCell},
    mem::replace,
    rc::Rc,
};

use derive_ex::derive_ex;
use serde::{Deserialize, Serialize};

use crate::core::{batch, ActionContext, AtomCore, BindSource, Invalidation, SignalContext};
use crate::equality::{self, Comparer};
use crate::intercept::{run_interceptors, Handlers};
use crate::spy::{is_spy_enabled, spy_report_end, spy_report_start, SpyEvent};
use crate::Subscription;

#[cfg(test)]
mod tests;

/// Converts an incoming value into its stored form. Receives the value,
/// the previous one when present, and the node name.
///
/// The default policy stores values unchanged; a deep-conversion policy
/// belongs to the layer that owns the container types.
pub type Enhancer<T> = Rc<dyn Fn(T, Option<&T>, &str) -> T>;

/// The record handed to value listeners. `old_value` is absent only for
/// the immediate replay of [`ObservableValue::observe`].
pub struct ValueChange<'a, T> {
    pub new_value: &'a T,
    pub old_value: Option<&'a T>,
}

/// Construction options for [`ObservableValue`].
pub struct ValueOptions<T> {
    pub(crate) name: Option<String>,
    pub(crate) enhancer: Option<Enhancer<T>>,
    pub(crate) equals: Option<Comparer<T>>,
}

impl<T> ValueOptions<T> {
    pub fn new() -> Self {
        Self {
            name: None,
            enhancer: None,
            equals: None,
        }
    }
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
    pub fn enhancer(mut self, enhancer: Enhancer<T>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }
    pub fn equals(mut self, equals: Comparer<T>) -> Self {
        self.equals = Some(equals);
        self
    }
}

impl<T> Default for ValueOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A single observable value: an [`Atom`](crate::Atom) that owns its
/// current value.
///
/// Reads inside a tracked derivation subscribe the derivation; writes
/// compare against the old value through the equality policy and, on a
/// confirmed change, propagate staleness to every observer.
#[derive_ex(Clone, bound())]
pub struct ObservableValue<T: 'static>(Rc<ValueNode<T>>);

pub(crate) struct ValueNode<T: 'static> {
    core: AtomCore,
    value: RefCell<T>,
    equals: Comparer<T>,
    enhancer: Option<Enhancer<T>>,
    interceptors: Handlers<dyn Fn(T) -> Option<T>>,
    listeners: Handlers<dyn Fn(&ValueChange<T>)>,
}

impl<T: PartialEq + 'static> ObservableValue<T> {
    pub fn new(value: T) -> Self {
        Self::with_options(value, ValueOptions::new())
    }

    pub fn with_options(value: T, options: ValueOptions<T>) -> Self {
        let core = AtomCore::new(options.name, "ObservableValue");
        let value = match &options.enhancer {
            Some(enhance) => enhance(value, None, core.name()),
            None => value,
        };
        ObservableValue(Rc::new(ValueNode {
            core,
            value: RefCell::new(value),
            equals: options.equals.unwrap_or_else(equality::partial_eq),
            enhancer: options.enhancer,
            interceptors: Handlers::new(),
            listeners: Handlers::new(),
        }))
    }
}

impl<T: 'static> ObservableValue<T> {
    pub fn name(&self) -> &str {
        self.0.core.name()
    }

    /// Gets the current value, adding a dependency on this observable to
    /// the tracking derivation, if any.
    pub fn get(&self, sc: &mut SignalContext) -> T
    where
        T: Clone,
    {
        self.borrow(sc).clone()
    }

    /// Borrows the current value, adding a dependency on this observable
    /// to the tracking derivation, if any.
    pub fn borrow(&self, sc: &mut SignalContext) -> Ref<'_, T> {
        sc.report_observed(self.0.clone());
        self.0.value.borrow()
    }

    /// Reads without tracking, wherever the caller happens to be.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.0.value.borrow().clone()
    }

    /// Stores a new value and propagates to observers. A no-op when the
    /// interceptors cancel or the equality policy says nothing changed.
    pub fn set(&self, value: T, ac: &mut ActionContext) {
        batch(ac, |_| {
            if let Some(value) = self.0.prepare_new_value(value) {
                self.0.commit(value);
            }
        });
    }

    /// Registers an interceptor running before every write: it may
    /// substitute the value or cancel the write by returning `None`.
    pub fn intercept(&self, handler: impl Fn(T) -> Option<T> + 'static) -> Subscription {
        let key = self.0.interceptors.add(Rc::new(handler));
        Subscription::from_rc_fn(self.0.clone(), move |node| node.interceptors.remove(key))
    }

    /// Registers a listener fired after every committed change. With
    /// `fire_immediately` the listener first sees the current value.
    pub fn observe(
        &self,
        listener: impl Fn(&ValueChange<T>) + 'static,
        fire_immediately: bool,
    ) -> Subscription {
        let listener: Rc<dyn Fn(&ValueChange<T>)> = Rc::new(listener);
        if fire_immediately {
            let value = self.0.value.borrow();
            listener(&ValueChange {
                new_value: &value,
                old_value: None,
            });
        }
        let key = self.0.listeners.add(listener);
        Subscription::from_rc_fn(self.0.clone(), move |node| node.listeners.remove(key))
    }

    pub fn is_observed(&self) -> bool {
        self.0.core.is_observed()
    }
    pub fn observer_count(&self) -> usize {
        self.0.core.observer_count()
    }

    pub(crate) fn node(&self) -> &Rc<ValueNode<T>> {
        &self.0
    }
}

impl<T: 'static> ValueNode<T> {
    /// Runs enhancer, interceptors and the equality policy without
    /// committing. `None` means the write should be dropped.
    pub(crate) fn prepare_new_value(&self, value: T) -> Option<T> {
        let value = match &self.enhancer {
            Some(enhance) => {
                let old = self.value.borrow();
                enhance(value, Some(&old), self.core.name())
            }
            None => value,
        };
        let value = run_interceptors(&self.interceptors, value)?;
        if (self.equals)(&self.value.borrow(), &value) {
            return None;
        }
        Some(value)
    }

    /// Stores a prepared value and propagates, firing value listeners and
    /// the spy. Returns the previous value.
    pub(crate) fn commit(&self, value: T) -> T {
        let spying = is_spy_enabled();
        if spying {
            spy_report_start(SpyEvent::Update {
                object: self.core.name().to_string(),
                key: None,
            });
        }
        let old = self.assign_and_propagate(value);
        if !self.listeners.is_empty() {
            let new_value = self.value.borrow();
            let change = ValueChange {
                new_value: &*new_value,
                old_value: Some(&old),
            };
            for listener in self.listeners.snapshot() {
                listener(&change);
            }
        }
        if spying {
            spy_report_end();
        }
        old
    }

    /// Stores a prepared value and propagates staleness, nothing else.
    /// Returns the previous value. Used by administrations that emit
    /// their own change records.
    pub(crate) fn assign_and_propagate(&self, value: T) -> T {
        let old = replace(&mut *self.value.borrow_mut(), value);
        self.core.notify_sinks(Invalidation::Stale);
        old
    }

    /// Wakes every observer as if the value had changed. Used when the
    /// node is orphaned so observers re-run and rebind elsewhere.
    pub(crate) fn invalidate_observers(&self) {
        self.core.notify_sinks(Invalidation::Stale);
    }

}

impl<T: 'static> BindSource for ValueNode<T> {
    fn atom_core(&self) -> &AtomCore {
        &self.core
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ObservableValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.value.try_borrow() {
            Ok(value) => std::fmt::Debug::fmt(&*value, f),
            Err(_) => write!(f, "<borrowed>"),
        }
    }
}

impl<T> Serialize for ObservableValue<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        match self.0.value.try_borrow() {
            Ok(value) => T::serialize(&value, serializer),
            Err(_) => Err(serde::ser::Error::custom("borrowed")),
        }
    }
}

impl<'de, T> Deserialize<'de> for ObservableValue<T>
where
    T: Deserialize<'de> + PartialEq,
{
    fn deserialize<D>(deserializer: D) -> Result<ObservableValue<T>, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        T::deserialize(deserializer).map(ObservableValue::new)
    }
}
