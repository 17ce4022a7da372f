//! The explicit, cell-based stand-in for the spec's transparent `Proxy`
//! wrapper (spec §4.1, redesign decision recorded in `SPEC_FULL.md` §1).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{DrainError, ReactorError};
use crate::node::{AccessKey, SourceId};
use crate::runtime::Runtime;
use crate::value;

/// A wrapper around a JSON-shaped value that intercepts structural access
/// (spec §1, §4.1). Reads register subscriptions against whichever
/// [`Observer`](crate::Observer) is currently running; writes diff old and
/// new state and notify whoever is subscribed to what actually changed.
///
/// `Reactor` is a cheap handle: cloning it yields another handle to the same
/// underlying source (the `SourceId` indirection is what gives
/// `Reactor::new`/`Reactor::wrap` their identity-stability invariant, spec
/// §3 "A Reactor wrapper and its source share identity").
#[derive(Clone)]
pub struct Reactor {
    id: SourceId,
    source: Rc<RefCell<Value>>,
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor").field("value", &*self.source.borrow()).finish()
    }
}

impl PartialEq for Reactor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Drop for Reactor {
    /// A strong count of 1 here means this is the last `Reactor` handle
    /// around `source` (the runtime's own arena entry is a `Weak`, per spec
    /// §4.3 "weak keys on sources ... so that unreferenced wrappers ...
    /// do not leak"); release its registry cells and arena slot eagerly
    /// instead of waiting for `wrap_source` to notice the `Weak` has gone
    /// dead the next time this address happens to be reused.
    fn drop(&mut self) {
        if Rc::strong_count(&self.source) == 1 {
            Runtime::with(|rt| rt.forget_source(self.id));
        }
    }
}

impl Reactor {
    /// Wraps `value` (after serializing it to JSON) in a fresh `Reactor`.
    /// Non-finite floats are the crate's one construction error (spec §3:
    /// "Non-object inputs are rejected" generalizes, for a JSON-shaped
    /// backend, to "non-JSON-representable inputs are rejected").
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(level = "trace", skip_all))]
    pub fn new(value: impl Serialize) -> Result<Self, ReactorError> {
        let json = serde_json::to_value(value)?;
        Ok(Self::wrap(Rc::new(RefCell::new(json))))
    }

    /// Wraps an already-shared source. Wrapping the same `Rc` twice returns
    /// a `Reactor` comparing equal to the first (spec §3 identity-stability
    /// invariant: `Reactor(s) === Reactor(s)`).
    pub fn wrap(source: Rc<RefCell<Value>>) -> Self {
        let id = Runtime::with(|rt| rt.wrap_source(source.clone()));
        Self { id, source }
    }

    /// The source object's `Rc` handle. This is what `Runtime::wrap_source`
    /// keys identity off of, and what [`shuck`] returns.
    pub fn shuck(&self) -> Rc<RefCell<Value>> {
        self.source.clone()
    }

    /// Whether the underlying value is a JSON array.
    pub fn is_array(&self) -> bool {
        self.source.borrow().is_array()
    }

    /// Whether the underlying value is a JSON object.
    pub fn is_object(&self) -> bool {
        self.source.borrow().is_object()
    }

    /// Reads `key`, registering a subscription on `(source, Prop(key))`
    /// against the currently-running observer, if any (spec §4.1 `get`,
    /// step 1). Nested reactivity (spec scenario 2) is reached by chaining:
    /// `r.get("foo")` returns an owned [`Value`] snapshot, so further
    /// chaining (`.get("bar")`) is an ordinary untracked `serde_json::Value`
    /// lookup into that snapshot, not another tracked `Reactor` read.
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(level = "trace", skip(self)))]
    pub fn get(&self, key: &str) -> Value {
        let key_rc: Rc<str> = Rc::from(key);
        Runtime::with(|rt| rt.track(self.id, AccessKey::Prop(key_rc)));
        value::get_key(&self.source.borrow(), key)
    }

    /// Writes `new_value` at `key`. Diffs old and new observable state
    /// (value, existence, own-key set) and notifies exactly the cells whose
    /// projection changed (spec §4.1 `set`, steps 1–4). Returns whatever
    /// [`DrainError`] the resulting (possibly deferred) drain produced.
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(level = "trace", skip(self, new_value)))]
    pub fn set(&self, key: &str, new_value: Value) -> Result<(), DrainError> {
        let had_key_before = value::has_key(&self.source.borrow(), key);
        let changed = {
            let mut source = self.source.borrow_mut();
            match value::set_key(&mut source, key, new_value) {
                Ok(changed) => changed,
                Err(_err) => {
                    // A trap-propagated write failure (spec §4.1 step 2).
                    // `set_key` only fails for writes this backend cannot
                    // represent (e.g. a non-numeric array index); nothing
                    // was mutated, so there is nothing to notify.
                    return Ok(());
                }
            }
        };
        let has_key_after = value::has_key(&self.source.borrow(), key);
        self.notify_after_write(key, changed, had_key_before, has_key_after)
    }

    /// Deletes `key`. Behaves analogously to [`Reactor::set`] (spec §4.1
    /// `deleteProperty`): may change the value, HAS(key), and OWN_KEYS
    /// cells, and notifies exactly the ones whose projection changed.
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(level = "trace", skip(self)))]
    pub fn delete(&self, key: &str) -> Result<(), DrainError> {
        let had_key_before = value::has_key(&self.source.borrow(), key);
        {
            let mut source = self.source.borrow_mut();
            if let Err(_err) = value::delete_key(&mut source, key) {
                return Ok(());
            }
        }
        let has_key_after = value::has_key(&self.source.borrow(), key);
        // Deleting an absent key is a no-op (nothing existed to go away);
        // deleting a present one always changes its value projection from
        // "present" to "gone", independent of whatever `delete_key` itself
        // reports.
        self.notify_after_write(key, had_key_before, had_key_before, has_key_after)
    }

    fn notify_after_write(
        &self,
        key: &str,
        value_changed: bool,
        had_key_before: bool,
        has_key_after: bool,
    ) -> Result<(), DrainError> {
        let key_rc: Rc<str> = Rc::from(key);
        let existence_changed = had_key_before != has_key_after;

        if !value_changed && !existence_changed {
            // Spec §4.1 step 3 / §8 "Writes that produce no observable
            // change ... produce no notifications".
            return Ok(());
        }

        let mut error: Option<DrainError> = None;
        let mut merge = |next: Option<DrainError>| {
            let Some(next) = next else { return };
            error = Some(merge_drain_errors(error.take(), next));
        };

        if value_changed {
            merge(Runtime::with(|rt| rt.notify(self.id, &AccessKey::Prop(key_rc.clone()))));
        }
        if existence_changed {
            merge(Runtime::with(|rt| rt.notify(self.id, &AccessKey::Has(key_rc.clone()))));
        }
        if own_keys_changed(had_key_before, has_key_after) {
            merge(Runtime::with(|rt| rt.notify(self.id, &AccessKey::OwnKeys)));
        }

        match error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Checks whether `key` exists, registering a subscription on
    /// `(source, Has(key))` (spec §4.1 `has`).
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(level = "trace", skip(self)))]
    pub fn has(&self, key: &str) -> bool {
        let key_rc: Rc<str> = Rc::from(key);
        Runtime::with(|rt| rt.track(self.id, AccessKey::Has(key_rc)));
        value::has_key(&self.source.borrow(), key)
    }

    /// Returns the own-key set, registering a subscription on
    /// `(source, OwnKeys)` (spec §4.1 `ownKeys`).
    #[cfg_attr(feature = "tracing-instrument", tracing::instrument(level = "trace", skip(self)))]
    pub fn own_keys(&self) -> Vec<String> {
        Runtime::with(|rt| rt.track(self.id, AccessKey::OwnKeys));
        value::own_keys(&self.source.borrow())
    }
}

/// `own_keys` fires when the key existed-or-not pairing changes for this
/// particular key — an insert/removal always changes the own-key set for a
/// JSON object/array; a plain value overwrite does not, since existence was
/// already true both before and after. Reusing the existence diff keeps
/// this a single cheap check rather than diffing the full key set on every
/// write, which is equivalent for the single-key mutations `set`/`delete`
/// perform (they can only ever add or remove the one key they touch).
fn own_keys_changed(had_key_before: bool, has_key_after: bool) -> bool {
    had_key_before != has_key_after
}

/// Flattens two `DrainError`s collected back-to-back from the same write
/// (spec §4.1 "notify exactly the cells whose observable projection
/// changed" can mean notifying up to three cells per write, each of which
/// can independently produce a drain error) into one, one level flat, per
/// spec §7 point 3.
fn merge_drain_errors(first: Option<DrainError>, second: DrainError) -> DrainError {
    let mut causes = match first {
        None => Vec::new(),
        Some(DrainError::Single(e)) => vec![e],
        Some(DrainError::Composite { causes }) => causes,
    };
    match second {
        DrainError::Single(e) => causes.push(e),
        DrainError::Composite { causes: more } => causes.extend(more),
    }
    DrainError::from_causes(causes).expect("just pushed at least one cause")
}

/// The escape hatch retrieving the source object behind a wrapper (spec §6
/// `shuck(x)`): the source beneath a [`Reactor`], or the value itself if it
/// is not one.
///
/// Stable Rust has no specialization, so a single generic `impl<T> Shuck for
/// T` covering "anything that is not a `Reactor`" would overlap the
/// `Reactor` impl itself. [`Shuck`] is therefore implemented for `Reactor`
/// and `&Reactor` (unwrapping) plus the handful of plain value types callers
/// commonly pass through `shuck` unchanged; anything else is expected to be
/// matched on directly rather than routed through this helper.
pub fn shuck<T: Shuck>(value: T) -> T::Output {
    value.shuck()
}

/// See [`shuck`].
pub trait Shuck {
    type Output;
    fn shuck(self) -> Self::Output;
}

impl Shuck for Reactor {
    type Output = Rc<RefCell<Value>>;
    fn shuck(self) -> Self::Output {
        Reactor::shuck(&self)
    }
}

impl Shuck for &Reactor {
    type Output = Rc<RefCell<Value>>;
    fn shuck(self) -> Self::Output {
        Reactor::shuck(self)
    }
}

macro_rules! shuck_identity {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Shuck for $ty {
                type Output = $ty;
                fn shuck(self) -> Self::Output {
                    self
                }
            }
        )*
    };
}

shuck_identity!(Value, String, bool, i64, u64, f64, ());
