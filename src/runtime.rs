#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::hash::BuildHasherDefault;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHasher};
use slotmap::SlotMap;

use crate::error::{DrainError, ObserverPanic};
use crate::node::{AccessKey, ObserverId, ObserverState, SourceId};
use crate::observer::AnyObserver;
use crate::registry::CellRegistry;
use crate::value::Value;

type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

thread_local! {
    pub(crate) static RUNTIME: Runtime = Runtime::default();
}

/// The data structure that owns every source, every observer, the
/// dependency index between them, and the process-wide (here: thread-local,
/// since the core is single-threaded cooperative per spec §5) bookkeeping
/// the dependency-tracking algorithm needs: the current-observer stack, the
/// `hide` suppression flag, the pending queue, and the batch-depth counter.
///
/// `sources` and `observers` hold only [`Weak`] handles (spec §4.3 "The
/// registry uses weak keys on sources and observers so that unreferenced
/// wrappers and stopped, unreferenced observers do not leak"): the strong
/// owner of a source is whichever `Reactor` handle(s) the caller still
/// holds, and the strong owner of an observer's body is the `Observer<A, T>`
/// handle itself. Once the last such handle drops, `Reactor`/`Observer`'s
/// `Drop` impls notice their reference was the last one and proactively
/// call [`Runtime::forget_source`]/[`Runtime::forget_observer`]; a `Weak`
/// that fails to upgrade during ordinary traffic (lookup, drain) is pruned
/// lazily as a backstop.
#[derive(Default)]
pub(crate) struct Runtime {
    sources: RefCell<SlotMap<SourceId, Weak<RefCell<Value>>>>,
    source_index: RefCell<FxHashMap<usize, SourceId>>,
    observers: RefCell<SlotMap<ObserverId, Weak<dyn AnyObserver>>>,
    registry: CellRegistry,

    /// Top of the current-observer stack, plus whether reads are currently
    /// suppressed by `hide`. A single `Cell` slot is enough because the
    /// core never runs two observers concurrently (spec §5); nesting is
    /// handled by the caller saving and restoring the previous value.
    observer: Cell<Option<ObserverId>>,
    hidden: Cell<bool>,

    pending: RefCell<VecDeque<ObserverId>>,
    pending_set: RefCell<FxIndexSet<ObserverId>>,
    batch_depth: Cell<u32>,

    /// Set for the duration of `drain_if_unbatched`'s loop. A write
    /// performed by the observer currently being drained (e.g. observer A
    /// writes a cell while being run as part of draining a write to `foo`)
    /// re-enters `notify` synchronously; without this guard that re-entrant
    /// call would start a *second*, nested drain loop over the same shared
    /// `pending` queue, running entries the outer loop already owns (e.g.
    /// B1/B2, enqueued by the outer write but not yet popped) out of order
    /// and folding their errors into the wrong `DrainError`. With the guard,
    /// a re-entrant `notify` only enqueues; the outer loop's own iteration
    /// picks the new entries up on its next pass (spec §4.4: "These are
    /// added to the pending queue and drained after the current observer
    /// finishes").
    draining: Cell<bool>,
}

impl Runtime {
    pub(crate) fn with<T>(f: impl FnOnce(&Runtime) -> T) -> T {
        RUNTIME.with(f)
    }

    pub(crate) fn wrap_source(&self, source: Rc<RefCell<Value>>) -> SourceId {
        let ptr = Rc::as_ptr(&source) as usize;
        if let Some(id) = self.source_index.borrow().get(&ptr).copied() {
            if self.sources.borrow().get(id).is_some_and(|weak| weak.strong_count() > 0) {
                return id;
            }
            // The allocator reused this address after the previous source
            // at it was fully dropped without going through `Reactor`'s
            // `Drop` impl (e.g. it was never wrapped again to trigger the
            // lazy check). Drop its leftover registry cells before reusing
            // the slot for the new, unrelated source.
            self.registry.drop_source(id);
            self.sources.borrow_mut().remove(id);
            self.source_index.borrow_mut().remove(&ptr);
        }
        let id = self.sources.borrow_mut().insert(Rc::downgrade(&source));
        self.source_index.borrow_mut().insert(ptr, id);
        id
    }

    pub(crate) fn insert_observer(&self, observer: &Rc<dyn AnyObserver>) -> ObserverId {
        self.observers.borrow_mut().insert(Rc::downgrade(observer))
    }

    fn observer(&self, id: ObserverId) -> Option<Rc<dyn AnyObserver>> {
        self.observers.borrow().get(id).and_then(Weak::upgrade)
    }

    /// Registers a subscription on `(source, key)` against the observer
    /// currently on top of the stack, unless reads are hidden or there is no
    /// active observer (spec §4.1 `get`/`has`/`ownKeys` step 1).
    pub(crate) fn track(&self, source: SourceId, key: AccessKey) {
        if self.hidden.get() {
            return;
        }
        if let Some(observer) = self.observer.get() {
            self.registry.subscribe(observer, source, key);
        }
    }

    /// Notifies every subscriber of `(source, key)`: each is enqueued
    /// (de-duplicated), and if the batch depth is zero the queue drains
    /// immediately (spec §4.1 "Notification semantics").
    pub(crate) fn notify(&self, source: SourceId, key: &AccessKey) -> Option<DrainError> {
        let subscribers = self.registry.collect(source, key);
        if subscribers.is_empty() {
            tracing::trace!(?key, "write produced no subscribers to notify");
            return None;
        }
        tracing::debug!(count = subscribers.len(), ?key, "notifying subscribers");
        for observer in subscribers {
            self.enqueue(observer);
        }
        self.drain_if_unbatched()
    }

    fn enqueue(&self, observer: ObserverId) {
        if self.pending_set.borrow_mut().insert(observer) {
            self.pending.borrow_mut().push_back(observer);
        }
    }

    /// Drains the pending queue, unless a batch is open or a drain is
    /// already running further up the call stack (see the `draining` field
    /// doc comment). In the latter case, the caller's writes have already
    /// been enqueued by `notify`; the in-progress outer loop picks them up
    /// on a later iteration, so this call simply returns `None` rather than
    /// starting a second, nested loop over the same shared queue.
    fn drain_if_unbatched(&self) -> Option<DrainError> {
        if self.batch_depth.get() > 0 || self.draining.get() {
            return None;
        }
        self.draining.set(true);
        let mut causes = Vec::new();
        loop {
            let next = {
                let mut pending = self.pending.borrow_mut();
                let observer = pending.pop_front();
                if let Some(observer) = observer {
                    self.pending_set.borrow_mut().shift_remove(&observer);
                }
                observer
            };
            let Some(observer_id) = next else { break };
            let Some(observer) = self.observer(observer_id) else {
                // The observer's last strong handle was dropped without
                // going through `Observer::drop`'s eager cleanup (or the
                // drop raced this enqueue). GC its arena slot and any
                // leftover registry edges now rather than carrying a
                // pointer to nothing forever (spec §4.3 "weak keys").
                self.forget_observer(observer_id);
                continue;
            };
            if observer.state() != ObserverState::Idle {
                continue;
            }
            if let Err(panic) = self.run_observer(observer_id, &observer) {
                tracing::warn!(error = %panic, "observer body failed during drain");
                causes.push(panic);
            }
        }
        self.draining.set(false);
        if let Some(error) = DrainError::from_causes(causes) {
            tracing::error!(causes = error.causes().len(), "drain produced errors");
            Some(error)
        } else {
            None
        }
    }

    /// Runs `observer` through the lifecycle described in spec §4.4: mark
    /// `Running`, clear prior subscriptions, push onto the current-observer
    /// stack, invoke the body, pop, mark `Idle`. On panic the same
    /// teardown happens before the error is returned to the caller.
    pub(crate) fn run_observer(
        &self,
        id: ObserverId,
        observer: &Rc<dyn AnyObserver>,
    ) -> Result<(), ObserverPanic> {
        observer.set_state(ObserverState::Running);
        self.registry.unsubscribe_all(id);

        let prev_observer = self.observer.replace(Some(id));
        let result = observer.run();
        self.observer.set(prev_observer);

        if observer.state() != ObserverState::Stopped {
            observer.set_state(ObserverState::Idle);
        } else {
            self.registry.unsubscribe_all(id);
        }
        result
    }

    /// Runs `f` with tracking suppressed (spec §4.2 `hide`). Restored even
    /// if `f` panics.
    pub(crate) fn hide<T>(&self, f: impl FnOnce() -> T) -> T {
        let prev = self.hidden.replace(true);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
        self.hidden.set(prev);
        match result {
            Ok(value) => value,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    /// Runs `f` with the current-observer stack top temporarily cleared, so
    /// that anything `f` reads does not subscribe the caller's observer
    /// (used by `Observer::start()` per spec §4.2: "`start()` itself
    /// therefore runs in a hidden scope").
    pub(crate) fn without_observer<T>(&self, f: impl FnOnce() -> T) -> T {
        let prev = self.observer.take();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
        self.observer.set(prev);
        match result {
            Ok(value) => value,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    /// Runs `f` with the batch depth incremented; if depth returns to zero,
    /// drains the pending queue (spec §4.5).
    pub(crate) fn batch<T>(&self, f: impl FnOnce() -> T) -> (T, Option<DrainError>) {
        self.batch_depth.set(self.batch_depth.get() + 1);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
        self.batch_depth.set(self.batch_depth.get() - 1);
        let value = match result {
            Ok(value) => value,
            Err(payload) => std::panic::resume_unwind(payload),
        };
        let error = self.drain_if_unbatched();
        (value, error)
    }

    pub(crate) fn stop_observer(&self, id: ObserverId) {
        self.registry.unsubscribe_all(id);
    }

    /// Drops a source's cells from the registry and frees its arena slot.
    /// Called by `Reactor::drop` once `Rc::strong_count` shows the `Reactor`
    /// being dropped was the last strong handle to its source (spec §4.3
    /// "weak keys on sources ... so that unreferenced wrappers ... do not
    /// leak"); also reached lazily from `wrap_source` if a source's address
    /// gets reused before its `Drop` ran.
    pub(crate) fn forget_source(&self, id: SourceId) {
        self.registry.drop_source(id);
        self.sources.borrow_mut().remove(id);
        self.source_index.borrow_mut().retain(|_, &mut mapped| mapped != id);
    }

    /// Drops an observer's subscriptions and frees its arena slot. Called by
    /// `Observer::drop` once `Rc::strong_count` shows the `Observer` being
    /// dropped was the last strong handle to its body (spec §4.3 "weak keys
    /// ... so that ... stopped, unreferenced observers do not leak"); also
    /// reached lazily from the drain loop when a pending, GC'd observer's
    /// `Weak` fails to upgrade.
    pub(crate) fn forget_observer(&self, id: ObserverId) {
        self.registry.unsubscribe_all(id);
        self.observers.borrow_mut().remove(id);
    }
}
