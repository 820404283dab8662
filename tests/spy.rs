//! The introspection bus: event kinds, nesting markers, and the
//! serialized form events take when shipped to an external sink.

use std::{cell::RefCell, rc::Rc};

use atomflow::{autorun, spy_subscribe, ObservableObject, ObservableValue, Runtime, SpyEvent};

fn collect() -> (Rc<RefCell<Vec<SpyEvent>>>, atomflow::Subscription) {
    let events = Rc::new(RefCell::new(Vec::new()));
    let events0 = events.clone();
    let sub = spy_subscribe(move |event| events0.borrow_mut().push(event.clone()));
    (events, sub)
}

#[test]
fn value_update_is_bracketed() {
    let mut rt = Runtime::new();
    let v = ObservableValue::with_options(1, atomflow::ValueOptions::new().name("answer"));
    let (events, _sub) = collect();

    v.set(2, rt.ac());
    assert_eq!(
        *events.borrow(),
        [
            SpyEvent::Update {
                object: "answer".to_string(),
                key: None,
            },
            SpyEvent::ReportEnd,
        ]
    );
}

#[test]
fn unchanged_write_emits_nothing() {
    let mut rt = Runtime::new();
    let v = ObservableValue::new(1);
    let (events, _sub) = collect();

    v.set(1, rt.ac());
    assert!(events.borrow().is_empty());
}

#[test]
fn reaction_runs_are_reported() {
    let mut rt = Runtime::new();
    let v = ObservableValue::new(1);
    let (events, _sub) = collect();

    let v0 = v.clone();
    let _r = autorun(rt.ac(), move |rcx| {
        v0.get(rcx.sc());
    });

    let names: Vec<_> = events
        .borrow()
        .iter()
        .filter_map(|event| match event {
            SpyEvent::Reaction { name } => Some(name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("Autorun@"));
}

#[test]
fn object_changes_carry_object_and_key() {
    let mut rt = Runtime::new();
    let obj = ObservableObject::with_options(atomflow::ObjectOptions::new().name("config"));
    let (events, _sub) = collect();

    obj.add("x", 1, rt.ac());
    obj.write("x", 2, rt.ac());
    obj.remove("x", rt.ac());

    let events = events.borrow();
    let mut it = events.iter().filter(|e| !matches!(e, SpyEvent::ReportEnd));
    assert_eq!(
        it.next(),
        Some(&SpyEvent::Add {
            object: "config".to_string(),
            key: "x".to_string(),
        })
    );
    assert_eq!(
        it.next(),
        Some(&SpyEvent::Update {
            object: "config".to_string(),
            key: Some("x".to_string()),
        })
    );
    assert_eq!(
        it.next(),
        Some(&SpyEvent::Remove {
            object: "config".to_string(),
            key: "x".to_string(),
        })
    );
}

#[test]
fn events_serialize_with_kebab_case_tags() {
    let event = SpyEvent::ScheduledReaction {
        name: "r".to_string(),
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "scheduled-reaction");
    assert_eq!(json["name"], "r");
}

#[test]
fn unsubscribed_spy_stops_receiving() {
    let mut rt = Runtime::new();
    let v = ObservableValue::new(1);
    let (events, sub) = collect();

    v.set(2, rt.ac());
    let seen = events.borrow().len();
    assert!(seen > 0);

    drop(sub);
    v.set(3, rt.ac());
    assert_eq!(events.borrow().len(), seen);
}
