//! Filtered, independently sorted views of a collection.

use std::fmt;
use std::sync::Arc;

use horizon_collections_core::ConnectionId;
use horizon_collections_core::logging::targets;

use super::collection::Collection;
use super::observer::{
    AddDetails, CollectionItem, CollectionKey, CollectionObserver, ItemChangeDetails, ObserverId,
    RemoveDetails, UpdateKeyDetails,
};
use crate::error::Result;
use crate::filtering::FilterCollection;
use crate::sorting::CompareFn;

/// A child collection that mirrors a source through its own filters and
/// sorters.
///
/// The view observes the source and applies each change incrementally:
/// items that pass the filters are added, changed or removed as the source
/// changes. While the child has no sorters it keeps the source's order.
/// Mutating the child directly is allowed but is overwritten by the next
/// refresh of the source.
///
/// Dropping the view detaches it from the source.
///
/// ```
/// use horizon_collections::filtering::{Filter, FilterOperator};
/// use horizon_collections::observable::{Collection, CollectionView};
/// use serde_json::{json, Value};
///
/// let people = Collection::<Value, i64>::for_records(|p| p["id"].as_i64().unwrap_or(0));
/// let adults = CollectionView::new(&people).unwrap();
/// adults
///     .filters()
///     .add(Filter::new("age", Some(FilterOperator::Ge), 18).unwrap())
///     .unwrap();
///
/// people.add_all(vec![json!({ "id": 1, "age": 30 }), json!({ "id": 2, "age": 9 })]).unwrap();
/// assert_eq!(adults.collection().keys(), vec![1]);
/// ```
pub struct CollectionView<T: CollectionItem, K: CollectionKey> {
    source: Collection<T, K>,
    child: Collection<T, K>,
    filters: Arc<FilterCollection<T>>,
    observer_id: ObserverId,
    filter_connection: ConnectionId,
}

struct ViewObserver<T: CollectionItem, K: CollectionKey> {
    child: Collection<T, K>,
    filters: Arc<FilterCollection<T>>,
}

impl<T: CollectionItem, K: CollectionKey> ViewObserver<T, K> {
    fn passing(&self, items: &[T]) -> Vec<T> {
        match self.filters.get_filter_fn() {
            Some(pass) => items.iter().filter(|item| pass(item)).cloned().collect(),
            None => items.to_vec(),
        }
    }

    fn passes(&self, item: &T) -> bool {
        self.filters.get_filter_fn().is_none_or(|pass| pass(item))
    }

    /// Child index matching source position `source_index`: before the first
    /// later source item that is already in the child.
    fn mapped_index(&self, source: &Collection<T, K>, source_index: usize) -> usize {
        source
            .keys()
            .iter()
            .skip(source_index)
            .find_map(|key| self.child.index_of_key(key))
            .unwrap_or_else(|| self.child.len())
    }

    fn insert_mapped(&self, source: &Collection<T, K>, source_index: usize, items: Vec<T>) {
        let result = if self.child.is_sorted() {
            self.child.add_all(items)
        } else {
            let index = self.mapped_index(source, source_index);
            self.child.insert(index, items)
        };
        log_failure(result, "view insert failed");
    }

    fn reload(&self, source: &Collection<T, K>) {
        let items = self.passing(&source.items());
        tracing::debug!(target: targets::VIEW, len = items.len(), "view reloaded");
        log_failure(self.child.replace_all(items), "view reload failed");
    }
}

fn log_failure(result: Result<()>, message: &'static str) {
    if let Err(err) = result {
        tracing::warn!(target: targets::VIEW, %err, "{message}");
    }
}

impl<T: CollectionItem, K: CollectionKey> CollectionObserver<T, K> for ViewObserver<T, K> {
    fn on_collection_begin_update(&self, _source: &Collection<T, K>) {
        self.child.begin_update();
    }

    fn on_collection_end_update(&self, _source: &Collection<T, K>) {
        if let Err(err) = self.child.end_update() {
            tracing::warn!(target: targets::VIEW, %err, "unbalanced view update");
        }
    }

    fn on_collection_update_abandoned(&self, _source: &Collection<T, K>) {
        self.child.abandon_update();
    }

    fn on_collection_add(&self, source: &Collection<T, K>, details: &AddDetails<T, K>) {
        let items = self.passing(&details.items);
        if !items.is_empty() {
            self.insert_mapped(source, details.at + details.items.len(), items);
        }
    }

    fn on_collection_remove(&self, _source: &Collection<T, K>, details: &RemoveDetails<T, K>) {
        self.child.remove_keys(&details.keys);
    }

    fn on_collection_item_change(
        &self,
        source: &Collection<T, K>,
        details: &ItemChangeDetails<T, K>,
    ) {
        let present = self.child.contains_key(&details.key);
        match (present, self.passes(&details.item)) {
            (true, true) => log_failure(
                self.child.replace_item(&details.key, details.item.clone()),
                "view item update failed",
            ),
            (true, false) => {
                self.child.remove_by_key(&details.key);
            }
            (false, true) => {
                self.insert_mapped(source, details.new_index + 1, vec![details.item.clone()]);
            }
            (false, false) => {}
        }
    }

    fn on_collection_update_key(
        &self,
        _source: &Collection<T, K>,
        details: &UpdateKeyDetails<T, K>,
    ) {
        if self.child.contains_key(&details.old_key) {
            log_failure(
                self.child.replace_item(&details.old_key, details.item.clone()),
                "view key update failed",
            );
        }
    }

    fn on_collection_refresh(&self, source: &Collection<T, K>) {
        self.reload(source);
    }

    fn on_collection_sort(&self, source: &Collection<T, K>, _sort_fn: Option<&CompareFn<T>>) {
        if !self.child.is_sorted() {
            self.reload(source);
        }
    }
}

impl<T: CollectionItem, K: CollectionKey> CollectionView<T, K> {
    /// Creates an unfiltered view of `source`.
    pub fn new(source: &Collection<T, K>) -> Result<Self> {
        Self::with_filters(source, FilterCollection::with_reader(source.field_reader()))
    }

    /// Creates a view of `source` filtered by `filters`.
    pub fn with_filters(source: &Collection<T, K>, filters: FilterCollection<T>) -> Result<Self> {
        let child = Collection::from_parts(source.key_fn(), source.field_reader());
        let filters = Arc::new(filters);
        let observer = Arc::new(ViewObserver {
            child: child.clone(),
            filters: filters.clone(),
        });
        observer.reload(source);
        let observer_id = source.add_observer(observer.clone())?;

        let source_handle = source.clone();
        let filter_connection = filters.changed.connect(move |_| {
            observer.reload(&source_handle);
        });

        Ok(Self {
            source: source.clone(),
            child,
            filters,
            observer_id,
            filter_connection,
        })
    }

    /// The filtered child collection.
    pub fn collection(&self) -> &Collection<T, K> {
        &self.child
    }

    pub fn source(&self) -> &Collection<T, K> {
        &self.source
    }

    /// The view's filters. Changing them re-filters the view.
    pub fn filters(&self) -> &FilterCollection<T> {
        &self.filters
    }

    /// Re-applies the filters, for filters whose values changed in place.
    pub fn refilter(&self) {
        self.filters.refilter();
    }

    pub fn items(&self) -> Vec<T> {
        self.child.items()
    }

    pub fn len(&self) -> usize {
        self.child.len()
    }

    pub fn is_empty(&self) -> bool {
        self.child.is_empty()
    }
}

impl<T: CollectionItem, K: CollectionKey> Drop for CollectionView<T, K> {
    fn drop(&mut self) {
        self.filters.changed.disconnect(self.filter_connection);
        self.source.remove_observer(self.observer_id);
    }
}

impl<T: CollectionItem + fmt::Debug, K: CollectionKey> fmt::Debug for CollectionView<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionView")
            .field("items", &self.child.items())
            .field("filters", &self.filters)
            .finish()
    }
}

static_assertions::assert_impl_all!(CollectionView<serde_json::Value, i64>: Send, Sync);
