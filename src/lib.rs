//! Fine-grained reactivity runtime: observable state, lazily memoised
//! computed values, and eagerly scheduled reactions, wired into one
//! dependency graph at read time.
//!
//! Reads inside a tracked derivation subscribe it to exactly the
//! observables it touched; writes propagate staleness through the graph
//! and re-run affected reactions once per transaction, in a glitch-free
//! order bounded against self-triggering loops.

mod atom;
mod computed;
mod core;
pub mod equality;
mod intercept;
mod object;
mod reaction;
mod spy;
mod subscription;
mod value;

pub use atom::Atom;
pub use computed::{ComputedOptions, ComputedValue};
pub use crate::core::{
    batch, set_reaction_scheduler, ActionContext, CycleError, DependenciesState, Runtime,
    SignalContext, MAX_REACTION_ITERATIONS,
};
pub use equality::Comparer;
pub use object::{ObjectChange, ObjectOptions, ObjectWillChange, ObservableObject};
pub use reaction::{
    autorun, on_reaction_error, try_autorun, Reaction, ReactionContext, ReactionError,
};
pub use spy::{spy_subscribe, SpyEvent};
pub use subscription::Subscription;
pub use value::{Enhancer, ObservableValue, ValueChange, ValueOptions};
