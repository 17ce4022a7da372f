#![forbid(unsafe_code)]

//! A transparent reactive object graph: [`Reactor`] cells and [`Observer`]
//! re-execution.
//!
//! Two primitives are exposed. A [`Reactor`] wraps a JSON-shaped value and
//! intercepts structural access (`get`/`set`/`has`/`delete`/`own_keys`). An
//! [`Observer`] wraps a function that is automatically re-scheduled whenever
//! any `Reactor` cell it previously read is mutated.
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use reactor_core::{Observer, Reactor};
//!
//! let r = Reactor::new(serde_json::json!({ "foo": "bar" })).unwrap();
//! let tracker = Rc::new(RefCell::new(String::new()));
//!
//! let t = tracker.clone();
//! let rc = r.clone();
//! let o = Observer::new(move |_: ()| {
//!     *t.borrow_mut() = rc.get("foo").as_str().unwrap_or_default().to_string();
//! });
//! o.call(());
//! assert_eq!(*tracker.borrow(), "bar");
//!
//! r.set("foo", serde_json::json!("mux")).unwrap();
//! assert_eq!(*tracker.borrow(), "mux");
//! ```
//!
//! # Concurrency
//!
//! This crate is deliberately single-threaded cooperative (spec §5): the
//! runtime backing every `Reactor`/`Observer` is a thread-local, and the
//! types are `!Send`/`!Sync` as a consequence of the `Rc`/`RefCell` they are
//! built from, not via `unsafe` opt-outs. There is no parallelism and no
//! suspension point — a write either drains synchronously or (inside
//! [`batch`]) defers its drain to the batch's exit, but both paths run to
//! completion on the calling thread before returning.
//!
//! # Errors
//!
//! Construction errors ([`ReactorError`]) are raised synchronously; writes
//! that trigger one or more failing observers raise [`DrainError`], either
//! a single failure or a composite with one level of cause-flattening.

mod error;
mod node;
mod observer;
mod reactor;
mod registry;
mod runtime;
mod value;

pub use error::{DrainError, ObserverPanic, ReactorError};
pub use node::AccessKey;
pub use observer::{batch, hide, Observer};
pub use reactor::{shuck, Reactor, Shuck};
pub use value::Value;
