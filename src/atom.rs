use std::rc::Rc;

use derive_ex::derive_ex;

use crate::core::{batch, ActionContext, AtomCore, BindSource, Invalidation, SignalContext};

#[cfg(test)]
mod tests;

/// An addressable unit of observable state with no value of its own: the
/// leaf of the dependency graph.
///
/// Containers and custom data sources own one `Atom` per independently
/// observable aspect, call [`report_observed`](Atom::report_observed) on
/// every read and [`report_changed`](Atom::report_changed) on every
/// write.
#[derive_ex(Clone)]
pub struct Atom(Rc<AtomNode>);

pub(crate) struct AtomNode {
    core: AtomCore,
}

impl Atom {
    pub fn new(name: impl Into<String>) -> Self {
        Atom(Rc::new(AtomNode {
            core: AtomCore::new(Some(name.into()), "Atom"),
        }))
    }

    pub fn name(&self) -> &str {
        self.0.core.name()
    }

    /// Registers this atom with the currently tracking derivation, if
    /// any. Returns whether a derivation is observing the read.
    pub fn report_observed(&self, sc: &mut SignalContext) -> bool {
        sc.report_observed(self.0.clone())
    }

    /// Propagates staleness to every observer. Brackets itself in a
    /// batch, so reactions fire before this returns unless an outer
    /// batch is open.
    pub fn report_changed(&self, ac: &mut ActionContext) {
        batch(ac, |_| {
            self.0.core.notify_sinks(Invalidation::Stale);
        });
    }

    pub fn is_observed(&self) -> bool {
        self.0.core.is_observed()
    }
    pub fn observer_count(&self) -> usize {
        self.0.core.observer_count()
    }
}

impl BindSource for AtomNode {
    fn atom_core(&self) -> &AtomCore {
        &self.core
    }
}

impl std::fmt::Debug for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Atom").field("name", &self.name()).finish()
    }
}
