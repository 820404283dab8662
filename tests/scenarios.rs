//! End-to-end scenarios across observables, computed values and
//! reactions: tracking, batching, glitch-freedom, rewiring, divergence.

use assert_call::{call, CallRecorder};

use atomflow::{
    autorun, batch, ComputedValue, ObservableValue, Runtime, MAX_REACTION_ITERATIONS,
};

#[test]
fn basic_tracking_through_a_computed() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let a = ObservableValue::new(1);
    let b = ObservableValue::new(2);

    let (a0, b0) = (a.clone(), b.clone());
    let c = ComputedValue::new(move |sc| a0.get(sc) + b0.get(sc));

    let c0 = c.clone();
    let _r = autorun(rt.ac(), move |rcx| {
        call!("{}", c0.get(rcx.sc()));
    });
    cr.verify("3");

    batch(rt.ac(), |ac| a.set(10, ac));
    cr.verify("12");

    // Same value again: no propagation, no log.
    batch(rt.ac(), |ac| a.set(10, ac));
    cr.verify(());
}

#[test]
fn batching_suppresses_intermediate_states() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let a = ObservableValue::new(1);
    let b = ObservableValue::new(2);

    let (a0, b0) = (a.clone(), b.clone());
    let c = ComputedValue::new(move |sc| a0.get(sc) + b0.get(sc));

    let c0 = c.clone();
    let _r = autorun(rt.ac(), move |rcx| {
        call!("{}", c0.get(rcx.sc()));
    });
    cr.verify("3");

    batch(rt.ac(), |ac| {
        a.set(5, ac);
        a.set(7, ac);
        b.set(3, ac);
    });
    cr.verify("10");
}

#[test]
fn converging_computed_shields_downstream() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let x = ObservableValue::new(1);

    let x0 = x.clone();
    let y = ComputedValue::new(move |sc| x0.get(sc) > 0);

    let y0 = y.clone();
    let _r = autorun(rt.ac(), move |rcx| {
        call!("{}", y0.get(rcx.sc()));
    });
    cr.verify("true");

    x.set(2, rt.ac());
    cr.verify(());

    x.set(-1, rt.ac());
    cr.verify("false");
}

#[test]
fn no_longer_read_observables_are_unsubscribed() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let cond = ObservableValue::new(true);
    let a = ObservableValue::new(1);
    let b = ObservableValue::new(2);

    let (c0, a0, b0) = (cond.clone(), a.clone(), b.clone());
    let _r = autorun(rt.ac(), move |rcx| {
        let value = if c0.get(rcx.sc()) {
            a0.get(rcx.sc())
        } else {
            b0.get(rcx.sc())
        };
        call!("{value}");
    });
    cr.verify("1");
    assert_eq!(cond.observer_count(), 1);
    assert_eq!(a.observer_count(), 1);
    assert_eq!(b.observer_count(), 0);

    cond.set(false, rt.ac());
    cr.verify("2");
    assert_eq!(cond.observer_count(), 1);
    assert_eq!(a.observer_count(), 0);
    assert_eq!(b.observer_count(), 1);

    a.set(99, rt.ac());
    cr.verify(());
}

#[test]
fn runaway_reaction_aborts_without_overflow() {
    let mut rt = Runtime::new();
    let a = ObservableValue::new(0usize);

    let a0 = a.clone();
    let _r = autorun(rt.ac(), move |rcx| {
        let value = a0.get(rcx.sc());
        a0.set(value + 1, rcx.ac());
    });

    assert_eq!(a.get_untracked(), MAX_REACTION_ITERATIONS);

    // The queue was cleared; the runtime is quiescent again.
    let before = a.get_untracked();
    assert_eq!(a.get_untracked(), before);
}

#[test]
fn deep_chain_propagates_once_per_write() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let base = ObservableValue::new(1);

    let mut stage: ComputedValue<i64> = {
        let base = base.clone();
        ComputedValue::new(move |sc| base.get(sc))
    };
    for _ in 0..10 {
        let prev = stage.clone();
        stage = ComputedValue::new(move |sc| prev.get(sc) + 1);
    }

    let top = stage.clone();
    let _r = autorun(rt.ac(), move |rcx| {
        call!("{}", top.get(rcx.sc()));
    });
    cr.verify("11");

    base.set(5, rt.ac());
    cr.verify("15");
}

#[test]
fn diamond_reads_one_consistent_snapshot() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let n = ObservableValue::new(1);

    let n0 = n.clone();
    let left = ComputedValue::new(move |sc| n0.get(sc) * 10);
    let n1 = n.clone();
    let right = ComputedValue::new(move |sc| n1.get(sc) * 100);

    let (l0, r0) = (left.clone(), right.clone());
    let _r = autorun(rt.ac(), move |rcx| {
        call!("{}", l0.get(rcx.sc()) + r0.get(rcx.sc()));
    });
    cr.verify("110");

    // One write, one re-run, both arms already consistent.
    n.set(2, rt.ac());
    cr.verify("220");
}
