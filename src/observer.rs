//! The observer lifecycle (spec §4.4): initial binding, re-execution on
//! trigger, dependency replacement, error aggregation, start/stop/redefine.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::{DrainError, ObserverPanic};
use crate::node::{ObserverId, ObserverState};
use crate::runtime::Runtime;

/// The type-erased half of an [`Observer`] the runtime needs: something it
/// can run, stop, and ask the state of, without knowing the observer's
/// argument or return type. `Observer<A, T>` is the typed handle a caller
/// holds; `AnyObserver` is what lives in the runtime's arena.
pub(crate) trait AnyObserver {
    fn run(&self) -> Result<(), ObserverPanic>;
    fn state(&self) -> ObserverState;
    fn set_state(&self, state: ObserverState);
}

struct Inner<A, T> {
    id: Cell<Option<ObserverId>>,
    execute: RefCell<Rc<dyn Fn(A) -> T>>,
    value: RefCell<Option<T>>,
    state: Cell<ObserverState>,
    last_args: RefCell<Option<A>>,
}

/// A callable record whose body re-runs whenever any [`Reactor`](crate::Reactor)
/// cell it last read is mutated (spec §3 "Observer record", §4.4).
///
/// `A` is the argument type the body is invoked with (use `()` for the
/// common no-argument case); `T` is its return type, retained as
/// [`Observer::value`].
pub struct Observer<A, T> {
    inner: Rc<Inner<A, T>>,
}

impl<A, T> Clone for Observer<A, T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<A, T> fmt::Debug for Observer<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.inner.id.get())
            .field("state", &self.inner.state.get())
            .finish()
    }
}

impl<A, T> AnyObserver for Inner<A, T>
where
    A: Clone + 'static,
    T: 'static,
{
    fn run(&self) -> Result<(), ObserverPanic> {
        let body = self.execute.borrow().clone();
        let args = self.last_args.borrow().clone();
        let Some(args) = args else {
            // Never invoked: there is nothing to replay. This only happens
            // if a write notifies an observer before its first `call`, which
            // cannot occur since subscriptions are only created from inside
            // a run.
            return Ok(());
        };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body(args)));
        match result {
            Ok(value) => {
                *self.value.borrow_mut() = Some(value);
                Ok(())
            }
            Err(payload) => Err(ObserverPanic::new(panic_message(payload))),
        }
    }

    fn state(&self) -> ObserverState {
        self.state.get()
    }

    fn set_state(&self, state: ObserverState) {
        self.state.set(state);
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "observer body panicked".to_string()
    }
}

impl<A, T> Observer<A, T>
where
    A: Clone + 'static,
    T: Clone + 'static,
{
    /// Constructs an observer around `f`. The observer is not run until
    /// first invoked via [`Observer::call`] (matching the spec's "invoke
    /// observer(...args)" entry: binding and running are the same action).
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(level = "trace", skip_all))]
    pub fn new(f: impl Fn(A) -> T + 'static) -> Self {
        let inner = Rc::new(Inner {
            id: Cell::new(None),
            execute: RefCell::new(Rc::new(f)),
            value: RefCell::new(None),
            state: Cell::new(ObserverState::Idle),
            last_args: RefCell::new(None),
        });
        let observer = Self { inner };
        let any: Rc<dyn AnyObserver> = observer.inner.clone();
        let id = Runtime::with(|rt| rt.insert_observer(&any));
        observer.inner.id.set(Some(id));
        observer
    }

    fn id(&self) -> ObserverId {
        self.inner.id.get().expect("Observer id set in new()")
    }

    /// Invokes the body with `args`, capturing `this`/arguments (spec's
    /// external-interface "invoke observer(...args)") for replay by
    /// [`Observer::start`]. Runs through the same lifecycle as a
    /// drain-triggered re-run (spec §4.4 "Run procedure"), so reads inside
    /// `f` register fresh subscriptions and a panic propagates to this
    /// caller rather than being swallowed.
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(level = "trace", skip_all))]
    pub fn call(&self, args: A) -> T {
        *self.inner.last_args.borrow_mut() = Some(args);
        let id = self.id();
        if self.inner.state.get() == ObserverState::Stopped {
            self.inner.state.set(ObserverState::Idle);
        }
        let any: Rc<dyn AnyObserver> = self.inner.clone();
        Runtime::with(|rt| {
            if let Err(panic) = rt.run_observer(id, &any) {
                // A first/explicit call's panic is not a drain error: there
                // is exactly one observer involved, so it propagates as a
                // plain panic rather than being wrapped in a `DrainError`.
                std::panic::resume_unwind(Box::new(panic));
            }
        });
        self.inner
            .value
            .borrow()
            .clone()
            .expect("run_observer leaves `value` set on success")
    }

    /// The last value a successful run returned. `None` until the first run.
    pub fn value(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }

    /// The currently-bound body.
    pub fn execute(&self) -> Rc<dyn Fn(A) -> T> {
        self.inner.execute.borrow().clone()
    }

    /// Replaces the body and immediately re-runs it with the most recent
    /// arguments (spec §4.4 "Redefinition semantics"), discarding the prior
    /// subscriptions. No-op (beyond storing the body) if the observer has
    /// never been called, since there are no arguments to replay yet.
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(level = "trace", skip_all))]
    pub fn set_execute(&self, f: impl Fn(A) -> T + 'static) {
        *self.inner.execute.borrow_mut() = Rc::new(f);
        if self.inner.last_args.borrow().is_some() {
            let id = self.id();
            let any: Rc<dyn AnyObserver> = self.inner.clone();
            Runtime::with(|rt| {
                if let Err(panic) = rt.run_observer(id, &any) {
                    std::panic::resume_unwind(Box::new(panic));
                }
            });
        }
    }

    /// Whether the observer is currently active (idle or running).
    pub fn is_active(&self) -> bool {
        self.inner.state.get() != ObserverState::Stopped
    }

    /// Transitions `stopped` → `idle` and triggers one run with the most
    /// recent `this`/arguments (spec §4.4 `start()`). Idempotent if the
    /// observer is already idle or running, and a no-op if it has never
    /// been called (nothing to replay). Runs in a hidden, observer-cleared
    /// scope (spec §4.2: "`start()` itself therefore runs in a hidden
    /// scope"), so calling `start()` from inside another observer's body
    /// does not subscribe the outer observer to whatever the inner one
    /// reads.
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(level = "trace", skip_all))]
    pub fn start(&self) {
        if self.inner.state.get() != ObserverState::Stopped {
            return;
        }
        if self.inner.last_args.borrow().is_none() {
            self.inner.state.set(ObserverState::Idle);
            return;
        }
        self.inner.state.set(ObserverState::Idle);
        let id = self.id();
        let any: Rc<dyn AnyObserver> = self.inner.clone();
        Runtime::with(|rt| {
            rt.without_observer(|| {
                rt.hide(|| {
                    if let Err(panic) = rt.run_observer(id, &any) {
                        std::panic::resume_unwind(Box::new(panic));
                    }
                })
            })
        });
    }

    /// Deactivates the observer and clears its subscriptions (spec §4.4
    /// `stop()`). Idempotent.
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(level = "trace", skip_all))]
    pub fn stop(&self) {
        if self.inner.state.get() == ObserverState::Stopped {
            return;
        }
        self.inner.state.set(ObserverState::Stopped);
        let id = self.id();
        Runtime::with(|rt| rt.stop_observer(id));
    }
}

impl<A, T> Drop for Observer<A, T> {
    /// A strong count of 1 here means this is the last `Observer` handle
    /// around `inner` (the runtime's own arena entry is a `Weak`, per spec
    /// §4.3 "weak keys ... so that ... stopped, unreferenced observers do
    /// not leak"); tear down its subscriptions and arena slot eagerly
    /// instead of waiting for the next incidental drain to notice the
    /// `Weak` has gone dead.
    fn drop(&mut self) {
        if Rc::strong_count(&self.inner) == 1 {
            if let Some(id) = self.inner.id.get() {
                Runtime::with(|rt| rt.forget_observer(id));
            }
        }
    }
}

/// Runs `f` with subscription tracking suppressed (spec §4.2 `hide`, §6
/// `hide(f)`). Reads performed inside `f` do not register subscriptions on
/// whichever observer is currently running; writes inside `f` still notify
/// as usual (spec §9's open question, resolved: hide masks reads only).
pub fn hide<T>(f: impl FnOnce() -> T) -> T {
    Runtime::with(|rt| rt.hide(f))
}

/// Runs `f` with notifications deferred until the outermost `batch` call
/// returns (spec §4.5 `batch`, §6 `batch(f)`). Writes inside `f` are applied
/// immediately and visible to subsequent reads inside `f`; only the drain is
/// deferred. Nested batches compose: only the outermost call drains.
///
/// # Errors
///
/// If the deferred drain produces one or more observer-body failures, they
/// are raised here (after `f` has already returned) as a [`DrainError`].
#[cfg_attr(feature = "tracing-instrument", tracing::instrument(level = "trace", skip_all))]
pub fn batch<T>(f: impl FnOnce() -> T) -> Result<T, DrainError> {
    let (value, error) = Runtime::with(|rt| rt.batch(f));
    match error {
        Some(error) => Err(error),
        None => Ok(value),
    }
}
