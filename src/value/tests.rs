use std::{cell::RefCell, rc::Rc};

use assert_call::{call, CallRecorder};

use crate::{autorun, equality, ObservableValue, Runtime, ValueOptions};

#[test]
fn new_and_get() {
    let mut rt = Runtime::new();
    let v = ObservableValue::new(10);
    assert_eq!(v.get(&mut rt.sc()), 10);
}

#[test]
fn set_updates_and_reruns_observers() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let v = ObservableValue::new(10);

    let v0 = v.clone();
    let _s = autorun(rt.ac(), move |rcx| {
        call!("{}", v0.get(rcx.sc()));
    });
    cr.verify("10");

    v.set(20, rt.ac());
    cr.verify("20");
    v.set(30, rt.ac());
    cr.verify("30");
}

#[test]
fn equal_write_is_a_no_op() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let v = ObservableValue::new(10);

    let v0 = v.clone();
    let _s = autorun(rt.ac(), move |rcx| {
        call!("{}", v0.get(rcx.sc()));
    });
    cr.verify("10");

    v.set(10, rt.ac());
    cr.verify(());
}

#[test]
fn never_equality_always_propagates() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let v = ObservableValue::with_options(10, ValueOptions::new().equals(equality::never()));

    let v0 = v.clone();
    let _s = autorun(rt.ac(), move |rcx| {
        call!("{}", v0.get(rcx.sc()));
    });
    cr.verify("10");

    v.set(10, rt.ac());
    cr.verify("10");
}

#[test]
fn enhancer_transforms_stored_values() {
    let mut rt = Runtime::new();
    let clamp = Rc::new(|value: i32, _old: Option<&i32>, _name: &str| value.clamp(0, 100));
    let v = ObservableValue::with_options(250, ValueOptions::new().enhancer(clamp));
    assert_eq!(v.get(&mut rt.sc()), 100);

    v.set(-5, rt.ac());
    assert_eq!(v.get(&mut rt.sc()), 0);
}

#[test]
fn interceptor_can_cancel_or_substitute() {
    let mut rt = Runtime::new();
    let v = ObservableValue::new(1);
    let _i = v.intercept(|value| if value < 0 { None } else { Some(value * 10) });

    v.set(-3, rt.ac());
    assert_eq!(v.get(&mut rt.sc()), 1);

    v.set(3, rt.ac());
    assert_eq!(v.get(&mut rt.sc()), 30);
}

#[test]
fn interceptors_run_in_insertion_order_and_first_none_cancels() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let v = ObservableValue::new(0);
    let _a = v.intercept(|value| {
        call!("first {value}");
        if value == 13 {
            None
        } else {
            Some(value + 1)
        }
    });
    let _b = v.intercept(|value| {
        call!("second {value}");
        Some(value)
    });

    v.set(1, rt.ac());
    cr.verify(["first 1", "second 2"]);
    assert_eq!(v.get(&mut rt.sc()), 2);

    v.set(13, rt.ac());
    cr.verify("first 13");
    assert_eq!(v.get(&mut rt.sc()), 2);
}

#[test]
fn observe_sees_old_and_new() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let v = ObservableValue::new(1);
    let _o = v.observe(
        |change| call!("{:?} -> {}", change.old_value, change.new_value),
        false,
    );

    v.set(2, rt.ac());
    cr.verify("Some(1) -> 2");
}

#[test]
fn observe_fire_immediately_replays_current_value() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let v = ObservableValue::new(7);
    let _o = v.observe(
        |change| call!("{:?} -> {}", change.old_value, change.new_value),
        true,
    );
    cr.verify("None -> 7");
}

#[test]
fn dropped_observe_subscription_stops_notifications() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let v = ObservableValue::new(1);
    let o = v.observe(|change| call!("{}", change.new_value), false);

    v.set(2, rt.ac());
    cr.verify("2");
    drop(o);
    v.set(3, rt.ac());
    cr.verify(());
}

#[test]
fn serde_passthrough() {
    let _rt = Runtime::new();
    let v = ObservableValue::new(vec![1, 2, 3]);
    let json = serde_json::to_string(&v).unwrap();
    assert_eq!(json, "[1,2,3]");

    let back: ObservableValue<Vec<i32>> = serde_json::from_str(&json).unwrap();
    assert_eq!(back.get_untracked(), vec![1, 2, 3]);
}

#[test]
fn debug_prints_value() {
    let _rt = Runtime::new();
    let v = ObservableValue::new(5);
    assert_eq!(format!("{v:?}"), "5");
}

#[test]
fn listener_registered_during_notification_waits_for_next_change() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let v = ObservableValue::new(0);
    let extra: Rc<RefCell<Vec<crate::Subscription>>> = Rc::new(RefCell::new(Vec::new()));

    let v0 = v.clone();
    let extra0 = extra.clone();
    let _o = v.observe(
        move |change| {
            call!("outer {}", change.new_value);
            if *change.new_value == 1 {
                let s = v0.observe(|change| call!("inner {}", change.new_value), false);
                extra0.borrow_mut().push(s);
            }
        },
        false,
    );

    v.set(1, rt.ac());
    cr.verify("outer 1");
    v.set(2, rt.ac());
    cr.verify(["outer 2", "inner 2"]);
}
