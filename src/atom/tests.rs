use std::{cell::Cell, rc::Rc};

use assert_call::{call, CallRecorder};

use crate::{autorun, Atom, Runtime};

/// A value the runtime knows nothing about, made observable by hand.
#[derive(Clone)]
struct Clock {
    seconds: Rc<Cell<u64>>,
    atom: Atom,
}

impl Clock {
    fn new() -> Self {
        Self {
            seconds: Rc::new(Cell::new(0)),
            atom: Atom::new("Clock"),
        }
    }
    fn get(&self, sc: &mut crate::SignalContext) -> u64 {
        self.atom.report_observed(sc);
        self.seconds.get()
    }
    fn tick(&self, ac: &mut crate::ActionContext) {
        self.seconds.set(self.seconds.get() + 1);
        self.atom.report_changed(ac);
    }
}

#[test]
fn report_observed_outside_tracking_returns_false() {
    let mut rt = Runtime::new();
    let atom = Atom::new("a");
    assert!(!atom.report_observed(&mut rt.sc()));
}

#[test]
fn report_changed_reruns_observers() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let clock = Clock::new();

    let c = clock.clone();
    let _s = autorun(rt.ac(), move |rcx| {
        call!("{}", c.get(rcx.sc()));
    });
    cr.verify("0");
    assert!(clock.atom.is_observed());
    assert_eq!(clock.atom.observer_count(), 1);

    clock.tick(rt.ac());
    cr.verify("1");
    clock.tick(rt.ac());
    cr.verify("2");
}

#[test]
fn disposed_observer_leaves_the_atom() {
    let mut rt = Runtime::new();
    let clock = Clock::new();
    let c = clock.clone();
    let s = autorun(rt.ac(), move |rcx| {
        c.get(rcx.sc());
    });
    assert_eq!(clock.atom.observer_count(), 1);
    drop(s);
    assert_eq!(clock.atom.observer_count(), 0);
}
