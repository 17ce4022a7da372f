//! The ten end-to-end scenarios from the specification's testable
//! properties section, each as a literal integration test.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use reactor_core::{batch, hide, shuck, DrainError, Observer, Reactor};
use serde_json::json;

#[test]
fn basic_propagation() {
    let r = Reactor::new(json!({ "foo": "bar" })).unwrap();
    let counter = Rc::new(Cell::new(0));
    let tracker = Rc::new(RefCell::new(String::new()));

    let (counter_c, tracker_c, r_c) = (counter.clone(), tracker.clone(), r.clone());
    let o = Observer::new(move |_: ()| {
        counter_c.set(counter_c.get() + 1);
        *tracker_c.borrow_mut() = r_c.get("foo").as_str().unwrap().to_string();
    });

    o.call(());
    assert_eq!(counter.get(), 1);
    assert_eq!(tracker.borrow().as_str(), "bar");

    r.set("foo", json!("mux")).unwrap();
    assert_eq!(counter.get(), 2);
    assert_eq!(tracker.borrow().as_str(), "mux");
}

#[test]
fn nested_reactivity() {
    let r = Reactor::new(json!({ "foo": { "bar": "baz" } })).unwrap();
    let runs = Rc::new(Cell::new(0));
    let tracker = Rc::new(RefCell::new(String::new()));

    let (runs_c, tracker_c, r_c) = (runs.clone(), tracker.clone(), r.clone());
    let o = Observer::new(move |_: ()| {
        runs_c.set(runs_c.get() + 1);
        let inner = r_c.get("foo").get("bar").cloned().unwrap_or_default();
        *tracker_c.borrow_mut() = inner.as_str().unwrap_or_default().to_string();
    });
    o.call(());
    assert_eq!(tracker.borrow().as_str(), "baz");

    let mut foo = r.get("foo");
    foo["bar"] = json!("moo");
    r.set("foo", foo).unwrap();

    assert_eq!(tracker.borrow().as_str(), "moo");
    assert_eq!(runs.get(), 2);
}

#[test]
fn no_op_write_does_not_rerun() {
    let r = Reactor::new(json!({ "foo": "bar" })).unwrap();
    let counter = Rc::new(Cell::new(0));

    let (counter_c, r_c) = (counter.clone(), r.clone());
    let o = Observer::new(move |_: ()| {
        counter_c.set(counter_c.get() + 1);
        let _ = r_c.get("foo");
    });
    o.call(());
    assert_eq!(counter.get(), 1);

    r.set("foo", json!("bar")).unwrap();
    assert_eq!(counter.get(), 1);
}

#[test]
fn batch_coalesces_writes() {
    let r = Reactor::new(json!({ "value": "start" })).unwrap();
    let runs = Rc::new(Cell::new(0));
    let tracker = Rc::new(RefCell::new(String::new()));

    let (runs_c, tracker_c, r_c) = (runs.clone(), tracker.clone(), r.clone());
    let o = Observer::new(move |_: ()| {
        runs_c.set(runs_c.get() + 1);
        *tracker_c.borrow_mut() = r_c.get("value").as_str().unwrap().to_string();
    });
    o.call(());
    assert_eq!(runs.get(), 1);

    let r_b = r.clone();
    batch(move || {
        r_b.set("value", json!("a")).unwrap();
        r_b.set("value", json!("b")).unwrap();
        r_b.set("value", json!("c")).unwrap();
    })
    .unwrap();

    assert_eq!(runs.get(), 2);
    assert_eq!(tracker.borrow().as_str(), "c");
}

#[test]
fn hide_suppresses_subscription_but_not_writes() {
    let r = Reactor::new(json!({ "outer": 0, "inner": 0 })).unwrap();
    let runs = Rc::new(Cell::new(0));

    let (runs_c, r_c) = (runs.clone(), r.clone());
    let o = Observer::new(move |_: ()| {
        runs_c.set(runs_c.get() + 1);
        let _ = r_c.get("outer");
        let r_inner = r_c.clone();
        hide(move || {
            let _ = r_inner.get("inner");
        });
    });
    o.call(());
    assert_eq!(runs.get(), 1);

    r.set("inner", json!(1)).unwrap();
    assert_eq!(runs.get(), 1, "mutating a hidden read must not rerun the observer");

    r.set("outer", json!(1)).unwrap();
    assert_eq!(runs.get(), 2, "mutating a tracked read must rerun the observer");
}

#[test]
fn composite_error_from_two_failing_observers() {
    let r = Reactor::new(json!({ "value": 1 })).unwrap();

    let make = |r: Reactor| {
        Observer::new(move |_: ()| {
            let v = r.get("value").as_i64().unwrap_or(0);
            if v > 1 {
                panic!("value too large");
            }
        })
    };
    let o1 = make(r.clone());
    let o2 = make(r.clone());
    o1.call(());
    o2.call(());

    let err = r.set("value", json!(2)).unwrap_err();
    match err {
        DrainError::Composite { causes } => assert_eq!(causes.len(), 2),
        DrainError::Single(_) => panic!("expected a composite error with two causes"),
    }
}

#[test]
fn chained_write_flattens_to_one_composite() {
    let r = Reactor::new(json!({ "foo": "ok", "passthrough": "ok" })).unwrap();

    // A writes passthrough whenever foo is read.
    let r_a = r.clone();
    let a = Observer::new(move |_: ()| {
        let foo = r_a.get("foo");
        r_a.set("passthrough", foo).unwrap();
    });
    a.call(());

    let make_foo_watcher = |r: Reactor| {
        Observer::new(move |_: ()| {
            if r.get("foo").as_str() == Some("error") {
                panic!("foo is error");
            }
        })
    };
    let make_passthrough_watcher = |r: Reactor| {
        Observer::new(move |_: ()| {
            if r.get("passthrough").as_str() == Some("error") {
                panic!("passthrough is error");
            }
        })
    };
    let b1 = make_foo_watcher(r.clone());
    let b2 = make_foo_watcher(r.clone());
    let b3 = make_passthrough_watcher(r.clone());
    let b4 = make_passthrough_watcher(r.clone());
    b1.call(());
    b2.call(());
    b3.call(());
    b4.call(());

    let err = r.set("foo", json!("error")).unwrap_err();
    match err {
        DrainError::Composite { causes } => assert_eq!(causes.len(), 4),
        DrainError::Single(_) => panic!("expected a flattened composite error with four causes"),
    }
}

#[test]
fn host_object_compatibility_array() {
    let r = Reactor::new(json!([])).unwrap();
    assert!(r.is_array());
    assert_eq!(r.own_keys().len(), 0);

    r.set("0", json!("first")).unwrap();
    assert_eq!(r.own_keys(), vec!["0".to_string()]);
    assert_eq!(r.get("0"), json!("first"));

    let source = shuck(&r);
    assert!(source.borrow().as_array().is_some());
}

#[test]
fn has_and_own_keys_suppress_redundant_notifications() {
    let r = Reactor::new(json!({ "foo": "bar" })).unwrap();
    let runs = Rc::new(Cell::new(0));

    let (runs_c, r_c) = (runs.clone(), r.clone());
    let o = Observer::new(move |_: ()| {
        runs_c.set(runs_c.get() + 1);
        let _ = r_c.has("foo");
    });
    o.call(());
    assert_eq!(runs.get(), 1);

    r.set("foo", json!("baz")).unwrap();
    assert_eq!(runs.get(), 1, "existence of foo did not change");
}

#[test]
fn start_is_idempotent() {
    let r = Reactor::new(json!({ "value": 0 })).unwrap();
    let runs = Rc::new(Cell::new(0));

    let (runs_c, r_c) = (runs.clone(), r.clone());
    let o = Observer::new(move |_: ()| {
        runs_c.set(runs_c.get() + 1);
        let _ = r_c.get("value");
    });
    o.call(());
    assert_eq!(runs.get(), 1);

    o.start();
    o.start();
    assert_eq!(runs.get(), 1, "start() on an already-active observer must not rerun it");
}
