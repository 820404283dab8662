use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use derive_ex::derive_ex;

use crate::core::{
    batch, end_batch_silent, next_node_id, run_reactions, start_batch, ActionContext, BindSink,
    Globals, Invalidation, SignalContext, SourceBinder,
};
use crate::spy::{is_spy_enabled, spy_report, spy_report_end, spy_report_start, SpyEvent};
use crate::Subscription;


/// An error value reported by a reaction body.
pub type ReactionError = Box<dyn std::error::Error>;

/// Context handed to a tracked reaction body: reads through
/// [`sc`](ReactionContext::sc) are tracked as dependencies, and writes
/// through [`ac`](ReactionContext::ac) are permitted (bounded by the
/// divergence guard when they hit the reaction's own dependencies).
pub struct ReactionContext<'a, 's> {
    sc: &'a mut SignalContext<'s>,
    ac: &'a mut ActionContext,
}

impl<'a, 's> ReactionContext<'a, 's> {
    pub fn sc(&mut self) -> &mut SignalContext<'s> {
        &mut *self.sc
    }
    pub fn ac(&mut self) -> &mut ActionContext {
        &mut *self.ac
    }
}

/// A derivation that is not observable: whenever a transitive dependency
/// changes it is pushed onto the pending queue, and the scheduler re-runs
/// it when the outermost batch closes.
///
/// The `on_invalidate` callback decides what a run means; it is expected
/// to call [`track`](Reaction::track) with the actual side-effecting
/// body. [`autorun`] packages the common case.
#[derive_ex(Clone)]
pub struct Reaction(Rc<ReactionNode>);

pub(crate) struct ReactionNode {
    name: String,
    binder: SourceBinder,
    #[allow(clippy::type_complexity)]
    on_invalidate: RefCell<Box<dyn FnMut(&Reaction, &mut ActionContext)>>,
    error_handler: RefCell<Option<Rc<dyn Fn(&ReactionError)>>>,
    is_scheduled: Cell<bool>,
    is_track_pending: Cell<bool>,
    is_running: Cell<bool>,
    is_disposed: Cell<bool>,
}

struct FlagGuard<'a>(&'a Cell<bool>);
impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Reaction {
    pub fn new(on_invalidate: impl FnMut(&Reaction, &mut ActionContext) + 'static) -> Self {
        Self::named(format!("Reaction@{}", next_node_id()), on_invalidate)
    }

    pub fn named(
        name: impl Into<String>,
        on_invalidate: impl FnMut(&Reaction, &mut ActionContext) + 'static,
    ) -> Self {
        Reaction(Rc::new_cyclic(|this: &Weak<ReactionNode>| {
            let sink: Weak<dyn BindSink> = this.clone();
            ReactionNode {
                name: name.into(),
                binder: SourceBinder::new(sink),
                on_invalidate: RefCell::new(Box::new(on_invalidate)),
                error_handler: RefCell::new(None),
                is_scheduled: Cell::new(false),
                is_track_pending: Cell::new(false),
                is_running: Cell::new(false),
                is_disposed: Cell::new(false),
            }
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }
    pub fn is_disposed(&self) -> bool {
        self.0.is_disposed.get()
    }
    /// How many sources the last tracked pass read.
    pub fn observing_count(&self) -> usize {
        self.0.binder.observing_count()
    }

    /// Routes errors from this reaction's body to `handler` instead of
    /// the global error bus.
    pub fn set_error_handler(&self, handler: impl Fn(&ReactionError) + 'static) {
        *self.0.error_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Queues this reaction and drains the queue unless a batch is open.
    pub fn schedule(&self, ac: &mut ActionContext) {
        self.enqueue();
        run_reactions(ac);
    }

    pub(crate) fn enqueue(&self) {
        let node = &self.0;
        if node.is_disposed.get() || node.is_scheduled.replace(true) {
            return;
        }
        Globals::with(|g| g.pending_reactions.push(self.clone()));
    }

    pub(crate) fn mark_unscheduled(&self) {
        self.0.is_scheduled.set(false);
    }

    /// One pass of the drain loop: re-checks the dependencies and invokes
    /// `on_invalidate` when a change is confirmed.
    pub(crate) fn run_reaction(&self, ac: &mut ActionContext) {
        let node = &self.0;
        if node.is_disposed.get() {
            return;
        }
        node.is_scheduled.set(false);
        batch(ac, |ac| {
            if node.binder.should_compute() {
                node.is_track_pending.set(true);
                let on_invalidate = &mut *node.on_invalidate.borrow_mut();
                on_invalidate(self, ac);
                if node.is_track_pending.replace(false) {
                    // The handler never re-tracked; surface that on the spy.
                    if is_spy_enabled() {
                        spy_report(SpyEvent::ScheduledReaction {
                            name: node.name.clone(),
                        });
                    }
                }
            }
        });
    }

    /// Runs `f` under tracking, rewiring this reaction's subscriptions to
    /// exactly the sources read. An `Err` result is routed through the
    /// reaction's error handler or the global error bus.
    pub fn track(
        &self,
        ac: &mut ActionContext,
        f: impl FnOnce(&mut ReactionContext) -> Result<(), ReactionError>,
    ) {
        let node = &self.0;
        if node.is_disposed.get() {
            return;
        }
        if node.is_running.replace(true) {
            panic!("cycle detected: reaction `{}` re-entered `track`", node.name);
        }
        node.is_track_pending.set(false);
        batch(ac, |ac| {
            let spying = is_spy_enabled();
            if spying {
                spy_report_start(SpyEvent::Reaction {
                    name: node.name.clone(),
                });
            }
            let result = {
                let _running = FlagGuard(&node.is_running);
                node.binder.track(|sc| f(&mut ReactionContext { sc, ac }))
            };
            if node.is_disposed.get() {
                node.binder.clear();
            }
            if let Err(error) = result {
                self.report_exception(&error);
            }
            if spying {
                spy_report_end();
            }
        });
    }

    /// Detaches the reaction from the graph. Idempotent, and safe to call
    /// from inside the reaction's own body: cleanup then happens when the
    /// running pass finishes.
    pub fn dispose(&self) {
        let node = &self.0;
        if node.is_disposed.replace(true) {
            return;
        }
        if !node.is_running.get() {
            start_batch();
            node.binder.clear();
            end_batch_silent();
        }
    }

    /// Wraps this reaction in a [`Subscription`] that disposes on drop.
    pub fn into_subscription(self) -> Subscription {
        Subscription::from_rc_fn(self.0, |node| Reaction(node).dispose())
    }

    fn report_exception(&self, error: &ReactionError) {
        let node = &self.0;
        if is_spy_enabled() {
            spy_report(SpyEvent::Error {
                name: node.name.clone(),
                message: error.to_string(),
            });
        }
        let own_handler = node.error_handler.borrow().clone();
        if let Some(handler) = own_handler {
            handler(error);
            return;
        }
        tracing::error!(
            reaction = node.name.as_str(),
            error = %error,
            "uncaught error in reaction"
        );
        let handlers = Globals::with(|g| g.error_handlers.values().cloned().collect::<Vec<_>>());
        for handler in handlers {
            handler(error, self);
        }
    }
}

impl BindSink for ReactionNode {
    fn notify(self: Rc<Self>, invalidation: Invalidation) {
        if self.is_disposed.get() {
            return;
        }
        if self.binder.on_notify(invalidation) {
            Reaction(self).enqueue();
        }
    }
}

impl std::fmt::Debug for Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaction")
            .field("name", &self.0.name)
            .field("disposed", &self.0.is_disposed.get())
            .finish()
    }
}

/// Runs `f` once immediately, then again whenever any observable it read
/// changes. Dropping the returned [`Subscription`] stops it.
pub fn autorun(
    ac: &mut ActionContext,
    mut f: impl FnMut(&mut ReactionContext) + 'static,
) -> Subscription {
    let reaction = Reaction::named(format!("Autorun@{}", next_node_id()), move |this, ac| {
        this.track(ac, |rcx| {
            f(rcx);
            Ok(())
        })
    });
    reaction.schedule(ac);
    reaction.into_subscription()
}

/// Fallible [`autorun`]: an `Err` from `f` is routed through the error
/// bus instead of unwinding.
pub fn try_autorun(
    ac: &mut ActionContext,
    mut f: impl FnMut(&mut ReactionContext) -> Result<(), ReactionError> + 'static,
) -> Subscription {
    let reaction = Reaction::named(format!("Autorun@{}", next_node_id()), move |this, ac| {
        this.track(ac, &mut f)
    });
    reaction.schedule(ac);
    reaction.into_subscription()
}

/// Registers a handler on the global reaction-error bus.
pub fn on_reaction_error(f: impl Fn(&ReactionError, &Reaction) + 'static) -> Subscription {
    let key = Globals::with(|g| g.error_handlers.insert(Rc::new(f)));
    Subscription::from_fn(move || {
        let _ = Globals::try_with(|g| {
            g.error_handlers.remove(key);
        });
    })
}
