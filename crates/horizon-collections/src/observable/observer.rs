//! Observer contract and change payloads for collections.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use horizon_collections_core::Signal;
use slotmap::new_key_type;

use super::collection::Collection;
use crate::sorting::CompareFn;

/// Bounds every collection item satisfies.
pub trait CollectionItem: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> CollectionItem for T {}

/// Bounds every collection key satisfies.
pub trait CollectionKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static> CollectionKey for K {}

/// Closure deriving an item's key.
pub type KeyFn<T, K> = Arc<dyn Fn(&T) -> K + Send + Sync>;

new_key_type! {
    /// Handle returned by [`Collection::add_observer`].
    pub struct ObserverId;
}

/// Items inserted as one contiguous run.
#[derive(Debug, Clone)]
pub struct AddDetails<T, K> {
    /// Index of the first inserted item, after insertion.
    pub at: usize,
    /// Inserted items, in collection order.
    pub items: Vec<T>,
    /// Keys of the inserted items.
    pub keys: Vec<K>,
}

/// Items removed as one contiguous run.
///
/// When one operation removes several runs they are reported from the last
/// run to the first, so each `at` is valid when the runs are applied in the
/// order received.
#[derive(Debug, Clone)]
pub struct RemoveDetails<T, K> {
    /// Index of the first removed item, before removal.
    pub at: usize,
    /// Removed items.
    pub items: Vec<T>,
    /// Keys of the removed items.
    pub keys: Vec<K>,
}

/// An item's contents changed.
#[derive(Debug, Clone)]
pub struct ItemChangeDetails<T, K> {
    /// The item in its updated form.
    pub item: T,
    /// The item's current key.
    pub key: K,
    /// The previous key, if the change altered it.
    pub old_key: Option<K>,
    /// Index of the item the change was inserted before: the old position,
    /// or one past it when the item moved towards the front.
    pub old_index: usize,
    /// The item's final position.
    pub new_index: usize,
    /// Whether the item moved.
    pub index_changed: bool,
    /// Names of the fields the caller reported as modified.
    pub modified: Vec<String>,
}

/// An item's key changed.
#[derive(Debug, Clone)]
pub struct UpdateKeyDetails<T, K> {
    /// The item in its updated form.
    pub item: T,
    /// The previous key.
    pub old_key: K,
    /// The new key.
    pub new_key: K,
    /// The item's position when the key changed.
    pub index: usize,
}

/// Counts of changes made inside one outermost update bracket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    /// Items added.
    pub added: usize,
    /// Items removed.
    pub removed: usize,
    /// Item change notifications.
    pub item_changes: usize,
    /// Key change notifications.
    pub key_updates: usize,
    /// Whether the collection was refreshed.
    pub refreshed: bool,
    /// Whether the collection was re-sorted.
    pub sorted: bool,
}

impl ChangeSummary {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        *self == ChangeSummary::default()
    }
}

/// Receives a collection's change notifications.
///
/// Every callback gets the collection that changed. All methods have empty
/// defaults, so observers implement only what they need.
///
/// Observers are called in ascending [`observer_priority`] order, before the
/// collection's signals fire. No collection lock is held during a callback,
/// so observers may read or mutate the source.
///
/// [`observer_priority`]: CollectionObserver::observer_priority
pub trait CollectionObserver<T: CollectionItem, K: CollectionKey>: Send + Sync {
    /// Lower values are notified first. Defaults to 0.
    fn observer_priority(&self) -> i32 {
        0
    }

    /// The outermost update bracket opened.
    fn on_collection_begin_update(&self, _source: &Collection<T, K>) {}

    /// The outermost update bracket closed.
    fn on_collection_end_update(&self, _source: &Collection<T, K>) {}

    /// The outermost update bracket was closed by a panic unwinding through
    /// it. Runs during the unwind, so it must not panic; observers that
    /// mirror the bracket close their own without notifying anyone.
    fn on_collection_update_abandoned(&self, _source: &Collection<T, K>) {}

    /// A contiguous run of items was inserted.
    fn on_collection_add(&self, _source: &Collection<T, K>, _details: &AddDetails<T, K>) {}

    /// A contiguous run of items was removed.
    fn on_collection_remove(&self, _source: &Collection<T, K>, _details: &RemoveDetails<T, K>) {}

    /// An item's contents changed.
    fn on_collection_item_change(
        &self,
        _source: &Collection<T, K>,
        _details: &ItemChangeDetails<T, K>,
    ) {
    }

    /// An item's key changed.
    fn on_collection_update_key(
        &self,
        _source: &Collection<T, K>,
        _details: &UpdateKeyDetails<T, K>,
    ) {
    }

    /// The contents were replaced wholesale.
    fn on_collection_refresh(&self, _source: &Collection<T, K>) {}

    /// The items were re-ordered by `sort_fn`.
    fn on_collection_sort(&self, _source: &Collection<T, K>, _sort_fn: Option<&CompareFn<T>>) {}
}

/// Signals emitted by a collection, after its observers have been notified.
pub struct CollectionSignals<T, K> {
    /// The outermost update bracket opened.
    pub begin_update: Signal<()>,
    /// The outermost update bracket closed.
    pub end_update: Signal<()>,
    /// Items were inserted.
    pub add: Signal<AddDetails<T, K>>,
    /// Items were removed.
    pub remove: Signal<RemoveDetails<T, K>>,
    /// An item changed.
    pub item_change: Signal<ItemChangeDetails<T, K>>,
    /// An item's key changed.
    pub update_key: Signal<UpdateKeyDetails<T, K>>,
    /// The contents were replaced.
    pub refresh: Signal<()>,
    /// The items were re-sorted.
    pub sort: Signal<()>,
    /// Emitted once per outermost update bracket in which something changed.
    pub data_changed: Signal<ChangeSummary>,
}

impl<T: 'static, K: 'static> CollectionSignals<T, K> {
    /// Creates a new set of collection signals.
    pub fn new() -> Self {
        Self {
            begin_update: Signal::new(),
            end_update: Signal::new(),
            add: Signal::new(),
            remove: Signal::new(),
            item_change: Signal::new(),
            update_key: Signal::new(),
            refresh: Signal::new(),
            sort: Signal::new(),
            data_changed: Signal::new(),
        }
    }
}

impl<T: 'static, K: 'static> Default for CollectionSignals<T, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, K> fmt::Debug for CollectionSignals<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionSignals").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_summary_is_empty() {
        assert!(ChangeSummary::default().is_empty());
        let summary = ChangeSummary {
            sorted: true,
            ..Default::default()
        };
        assert!(!summary.is_empty());
    }
}
