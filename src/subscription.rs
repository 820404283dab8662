use std::{
    any::Any,
    mem::take,
    rc::Rc,
};

/// Detaches something when dropped: a reaction, a listener, an
/// interceptor, a spy subscriber or an error handler.
#[derive(Default)]
#[must_use]
pub struct Subscription(RawSubscription);

impl Subscription {
    /// A `Subscription` that detaches nothing.
    pub fn empty() -> Self {
        Subscription(RawSubscription::Empty)
    }

    /// A `Subscription` calling `f` when dropped.
    pub fn from_fn(f: impl FnOnce() + 'static) -> Self {
        Subscription(RawSubscription::Fn(Box::new(f)))
    }

    /// A `Subscription` calling `unsubscribe` with `this` when dropped.
    ///
    /// If `unsubscribe` is zero-sized no extra allocation occurs beyond
    /// the boxed shim.
    pub fn from_rc_fn<T: 'static>(
        this: Rc<T>,
        unsubscribe: impl Fn(Rc<T>) + Copy + 'static,
    ) -> Self {
        Subscription(RawSubscription::RcFn {
            this,
            unsubscribe: Box::new(move |this| unsubscribe(this.downcast().unwrap())),
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        match take(&mut self.0) {
            RawSubscription::Empty => {}
            RawSubscription::Fn(f) => f(),
            RawSubscription::RcFn { this, unsubscribe } => unsubscribe(this),
        }
    }
}

#[derive(Default)]
enum RawSubscription {
    #[default]
    Empty,
    Fn(Box<dyn FnOnce() + 'static>),
    RcFn {
        this: Rc<dyn Any>,
        unsubscribe: Box<dyn Fn(Rc<dyn Any>)>,
    },
}
