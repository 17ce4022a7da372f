//! Smoke test for the `tracing` instrumentation described in
//! `SPEC_FULL.md` §9: a subscriber can be installed and the crate's own
//! trace/debug/warn/error calls (write-with-no-subscribers, write-with-
//! subscribers, observer panic, composite-error) run under it without
//! panicking or requiring any configuration from this crate.

use std::cell::Cell;
use std::rc::Rc;

use reactor_core::{Observer, Reactor};
use serde_json::json;

#[test]
fn tracing_calls_run_under_an_installed_subscriber() {
    let subscriber = tracing_subscriber::fmt().with_test_writer().finish();

    tracing::subscriber::with_default(subscriber, || {
        let r = Reactor::new(json!({ "value": 1 })).unwrap();
        let runs = Rc::new(Cell::new(0));

        // No subscribers yet: exercises the `trace!` "no subscribers" path.
        r.set("value", json!(2)).unwrap();

        let (runs_c, r_c) = (runs.clone(), r.clone());
        let o = Observer::new(move |_: ()| {
            runs_c.set(runs_c.get() + 1);
            let _ = r_c.get("value");
        });
        o.call(());

        // One subscriber: exercises the `debug!` "notifying subscribers" path.
        r.set("value", json!(3)).unwrap();
        assert_eq!(runs.get(), 2);

        // Two failing observers: exercises the `warn!`/`error!` drain paths.
        let make = |r: Reactor| {
            Observer::new(move |_: ()| {
                if r.get("value").as_i64().unwrap_or(0) > 3 {
                    panic!("value too large");
                }
            })
        };
        let o1 = make(r.clone());
        let o2 = make(r.clone());
        o1.call(());
        o2.call(());
        assert!(r.set("value", json!(4)).is_err());
    });
}
