use std::rc::Rc;

use serde::Serialize;

use crate::core::Globals;
use crate::Subscription;

/// One event on the introspection bus.
///
/// Events name the node they concern; the values themselves travel
/// through the typed listener records, not through the spy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SpyEvent {
    /// An observable value or object key was written.
    Update {
        object: String,
        key: Option<String>,
    },
    /// A key was added to an observable object.
    Add { object: String, key: String },
    /// A key was removed from an observable object.
    Remove { object: String, key: String },
    /// A reaction started running.
    Reaction { name: String },
    /// A reaction was invalidated but its handler never re-tracked.
    ScheduledReaction { name: String },
    /// A reaction body reported an error.
    Error { name: String, message: String },
    /// Closes the most recent nestable event.
    ReportEnd,
}

/// Registers `f` on the spy bus. Dropping the returned [`Subscription`]
/// unsubscribes. While no subscriber is registered the bus is disabled
/// and emission sites skip building events entirely.
pub fn spy_subscribe(f: impl Fn(&SpyEvent) + 'static) -> Subscription {
    let handler: Rc<dyn Fn(&SpyEvent)> = Rc::new(f);
    let key = Globals::with(|g| g.spy_listeners.insert(handler));
    Subscription::from_fn(move || {
        let _ = Globals::try_with(|g| {
            g.spy_listeners.remove(key);
        });
    })
}

pub(crate) fn is_spy_enabled() -> bool {
    Globals::with(|g| !g.spy_listeners.is_empty())
}

fn emit(event: &SpyEvent) {
    let listeners: Vec<Rc<dyn Fn(&SpyEvent)>> =
        Globals::with(|g| g.spy_listeners.values().cloned().collect());
    for listener in listeners {
        listener(event);
    }
}

/// Emits a one-shot event.
pub(crate) fn spy_report(event: SpyEvent) {
    if is_spy_enabled() {
        emit(&event);
    }
}

/// Opens a nestable event; pair with [`spy_report_end`].
pub(crate) fn spy_report_start(event: SpyEvent) {
    if is_spy_enabled() {
        Globals::with(|g| g.spy_depth += 1);
        emit(&event);
    }
}

pub(crate) fn spy_report_end() {
    if is_spy_enabled() {
        let open = Globals::with(|g| {
            if g.spy_depth > 0 {
                g.spy_depth -= 1;
                true
            } else {
                false
            }
        });
        if open {
            emit(&SpyEvent::ReportEnd);
        }
    }
}
