use std::rc::Rc;

slotmap::new_key_type! {
    /// Identifies a source object inside the runtime's source arena.
    pub(crate) struct SourceId;
}

slotmap::new_key_type! {
    /// Identifies an observer inside the runtime's observer arena.
    pub(crate) struct ObserverId;
}

/// The three kinds of structural access a [`Reactor`](crate::Reactor) cell can be
/// subscribed under, per a single property name.
///
/// `Prop`, `Has`, and `OwnKeys` are independent subscriptions: reading a value,
/// checking whether a key exists, and enumerating the own-key set are each
/// tracked separately, even though they often fire together.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AccessKey {
    /// The value stored at a property name.
    Prop(Rc<str>),
    /// Whether a property name currently exists on the source.
    Has(Rc<str>),
    /// The own-key set of the source, as a whole.
    OwnKeys,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ObserverState {
    Idle,
    Running,
    Stopped,
}
