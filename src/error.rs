//! Error taxonomy (spec §7): construction errors, trap-propagated errors, and
//! drain-time observer-body errors, the last of which may be aggregated into
//! a composite whose causes are flattened one level (spec §7 point 3).

use std::fmt;

use thiserror::Error;

/// Raised synchronously when constructing a [`Reactor`](crate::Reactor) from
/// a value that cannot be represented in the wrapped data model, or when a
/// write/delete/define trap fails against the underlying source.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// The value could not be serialized to JSON (for example, a non-finite
    /// `f64`).
    #[error("value is not representable as JSON: {0}")]
    NotJson(#[from] serde_json::Error),

    /// A write, delete, or define trap failed against the source (spec
    /// §4.1: "if it fails... the trap propagates that failure").
    #[error("property {key:?} is not writable on this source")]
    NotWritable { key: String },
}

/// A single observer body's panic payload, captured as a string. The core
/// does not attempt to resume or inspect the original payload type: per
/// spec §7, the policy is "the core does not swallow errors", not "the core
/// faithfully re-throws the original error type".
#[derive(Debug)]
pub struct ObserverPanic {
    message: String,
}

impl ObserverPanic {
    pub(crate) fn new(message: String) -> Self {
        Self { message }
    }
}

impl fmt::Display for ObserverPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ObserverPanic {}

/// The result of draining the pending queue for one write (or one batch).
///
/// Spec §7: a single error from a single drained observer propagates as-is;
/// multiple errors from one drain are aggregated into a composite whose
/// `causes` is the ordered, one-level-flattened list of underlying errors.
/// The drain always runs every enqueued observer first — errors never abort
/// the drain early.
#[derive(Debug, Error)]
pub enum DrainError {
    /// Exactly one observer failed during this drain.
    #[error(transparent)]
    Single(#[from] ObserverPanic),

    /// More than one observer failed during this drain. The pending queue is
    /// a single flat FIFO for the whole drain cycle (chained writes append
    /// to the same queue rather than starting a nested drain of their own),
    /// so a chain across several observers already surfaces as one flat
    /// `causes` vector rather than a tree of composites needing separate
    /// flattening.
    #[error("{} observers failed during this drain", causes.len())]
    Composite { causes: Vec<ObserverPanic> },
}

impl DrainError {
    /// Builds a `DrainError` from the (possibly empty) list of failures
    /// collected during one drain cycle, applying one level of flattening.
    pub(crate) fn from_causes(mut causes: Vec<ObserverPanic>) -> Option<Self> {
        match causes.len() {
            0 => None,
            1 => Some(DrainError::Single(causes.pop().expect("len == 1"))),
            _ => Some(DrainError::Composite { causes }),
        }
    }

    /// The ordered list of underlying failures, whether this was a single
    /// error or a composite.
    pub fn causes(&self) -> &[ObserverPanic] {
        match self {
            DrainError::Single(e) => std::slice::from_ref(e),
            DrainError::Composite { causes } => causes,
        }
    }
}
