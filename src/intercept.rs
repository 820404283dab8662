use std::{cell::RefCell, rc::Rc};

use slabmap::SlabMap;

/// An insertion-ordered registry of interceptor or listener callbacks.
///
/// Callbacks are snapshotted before invocation so a handler may register
/// or remove handlers without upsetting the walk in progress.
pub(crate) struct Handlers<F: ?Sized>(RefCell<SlabMap<Rc<F>>>);

impl<F: ?Sized> Handlers<F> {
    pub fn new() -> Self {
        Self(RefCell::new(SlabMap::new()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn add(&self, handler: Rc<F>) -> usize {
        self.0.borrow_mut().insert(handler)
    }

    pub fn remove(&self, key: usize) {
        self.0.borrow_mut().remove(key);
    }

    pub fn snapshot(&self) -> Vec<Rc<F>> {
        let mut handlers = self.0.borrow_mut();
        handlers.optimize();
        handlers.values().cloned().collect()
    }
}

impl<F: ?Sized> Default for Handlers<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `change` through the interceptor chain in insertion order. The
/// first handler returning `None` cancels the change; each handler may
/// substitute a modified one.
pub(crate) fn run_interceptors<C>(
    handlers: &Handlers<dyn Fn(C) -> Option<C>>,
    mut change: C,
) -> Option<C> {
    if handlers.is_empty() {
        return Some(change);
    }
    for handler in handlers.snapshot() {
        change = handler(change)?;
    }
    Some(change)
}

/// Notifies every listener with a borrowed change record.
pub(crate) fn notify_listeners<C: ?Sized>(handlers: &Handlers<dyn Fn(&C)>, change: &C) {
    if handlers.is_empty() {
        return;
    }
    for handler in handlers.snapshot() {
        handler(change);
    }
}
