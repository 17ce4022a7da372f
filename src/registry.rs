use std::cell::RefCell;
use std::hash::BuildHasherDefault;

use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHasher};
use slotmap::SecondaryMap;

use crate::node::{AccessKey, ObserverId, SourceId};

type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

/// The per-source, per-access-key subscription index (spec §4.3).
///
/// Forward edges (`cells`) let a write enumerate everyone who should be
/// notified; backward edges (`observer_cells`) let an observer tear down
/// every subscription it holds without needing to know which sources it
/// touched.
#[derive(Default)]
pub(crate) struct CellRegistry {
    cells: RefCell<SecondaryMap<SourceId, FxHashMap<AccessKey, FxIndexSet<ObserverId>>>>,
    observer_cells: RefCell<FxHashMap<ObserverId, FxIndexSet<(SourceId, AccessKey)>>>,
}

impl CellRegistry {
    pub(crate) fn subscribe(&self, observer: ObserverId, source: SourceId, key: AccessKey) {
        self.cells
            .borrow_mut()
            .entry(source)
            .or_default()
            .entry(key.clone())
            .or_default()
            .insert(observer);
        self.observer_cells
            .borrow_mut()
            .entry(observer)
            .or_default()
            .insert((source, key));
    }

    /// Removes `observer` from every cell it currently subscribes to. Called
    /// before each re-run (so the run can rebuild a fresh dependency set) and
    /// on `stop()`.
    pub(crate) fn unsubscribe_all(&self, observer: ObserverId) {
        let Some(edges) = self.observer_cells.borrow_mut().remove(&observer) else {
            return;
        };
        let mut cells = self.cells.borrow_mut();
        for (source, key) in edges {
            if let Some(by_key) = cells.get_mut(source) {
                if let Some(subs) = by_key.get_mut(&key) {
                    subs.shift_remove(&observer);
                }
            }
        }
    }

    /// Drops every cell belonging to `source` (used when a source is no
    /// longer reachable; see `Runtime::forget_source`).
    pub(crate) fn drop_source(&self, source: SourceId) {
        self.cells.borrow_mut().remove(source);
    }

    /// A snapshot of the subscribers for one cell. A copy is returned
    /// deliberately: a subscriber's own re-run mutates this same set (via
    /// `unsubscribe_all`/`subscribe`), so iterating the live set while
    /// running observers would alias a concurrently-mutated collection.
    pub(crate) fn collect(&self, source: SourceId, key: &AccessKey) -> Vec<ObserverId> {
        self.cells
            .borrow()
            .get(source)
            .and_then(|by_key| by_key.get(key))
            .map(|subs| subs.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use slotmap::SlotMap;

    #[test]
    fn unsubscribe_all_clears_every_cell_the_observer_touched() {
        let mut sources: SlotMap<SourceId, ()> = SlotMap::default();
        let mut observers: SlotMap<ObserverId, ()> = SlotMap::default();
        let source = sources.insert(());
        let observer = observers.insert(());

        let registry = CellRegistry::default();
        registry.subscribe(observer, source, AccessKey::Prop(Rc::from("foo")));
        registry.subscribe(observer, source, AccessKey::OwnKeys);
        assert_eq!(registry.collect(source, &AccessKey::Prop(Rc::from("foo"))), vec![observer]);

        registry.unsubscribe_all(observer);
        assert!(registry.collect(source, &AccessKey::Prop(Rc::from("foo"))).is_empty());
        assert!(registry.collect(source, &AccessKey::OwnKeys).is_empty());
    }

    #[test]
    fn collect_is_a_snapshot_independent_of_later_mutation() {
        let mut sources: SlotMap<SourceId, ()> = SlotMap::default();
        let mut observers: SlotMap<ObserverId, ()> = SlotMap::default();
        let source = sources.insert(());
        let a = observers.insert(());
        let b = observers.insert(());

        let registry = CellRegistry::default();
        registry.subscribe(a, source, AccessKey::OwnKeys);
        let snapshot = registry.collect(source, &AccessKey::OwnKeys);
        registry.subscribe(b, source, AccessKey::OwnKeys);

        assert_eq!(snapshot, vec![a]);
        assert_eq!(registry.collect(source, &AccessKey::OwnKeys), vec![a, b]);
    }
}
