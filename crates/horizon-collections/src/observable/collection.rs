//! The observable, keyed, optionally sorted collection.
//!
//! [`Collection`] is a cheap-to-clone handle; clones share the same items.
//! Every structural change is computed on a snapshot, committed in one step,
//! and only then announced, first to observers (in priority order) and then
//! through [`CollectionSignals`]. No lock is held while comparators,
//! observers or slots run.
//!
//! # Example
//!
//! ```
//! use horizon_collections::observable::Collection;
//! use serde_json::{json, Value};
//!
//! let people = Collection::<Value, i64>::for_records(|p| p["id"].as_i64().unwrap_or(0));
//! people.sort_by("name", None).unwrap();
//! people.add_all(vec![
//!     json!({ "id": 1, "name": "Carol" }),
//!     json!({ "id": 2, "name": "Alice" }),
//! ]).unwrap();
//!
//! assert_eq!(people.keys(), vec![2, 1]);
//! ```

use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use horizon_collections_core::UpdateDepth;
use horizon_collections_core::logging::targets;
use parking_lot::{Mutex, RwLock};
use slotmap::SlotMap;

use super::observer::{
    AddDetails, ChangeSummary, CollectionItem, CollectionKey, CollectionObserver,
    CollectionSignals, ItemChangeDetails, KeyFn, ObserverId, RemoveDetails, UpdateKeyDetails,
};
use crate::error::{CollectionError, Result};
use crate::grouping::{GroupCollection, GroupKey, Grouper};
use crate::options::SortOptions;
use crate::sorting::{CompareFn, SortDirection, SortMode, SorterCollection, SorterDescriptor};
use crate::value::{FieldReader, Record, Value, record_reader};

type ObserverRef<T, K> = Arc<dyn CollectionObserver<T, K>>;

/// Aggregate functions over a record property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregation {
    /// Sum of the numeric values.
    Sum,
    /// Smallest non-null value.
    Min,
    /// Largest non-null value.
    Max,
    /// Sum of the numeric values divided by the item count.
    Average,
    /// Number of items.
    Count,
}

pub(crate) fn aggregate_values(values: &[Value], aggregation: Aggregation) -> Value {
    match aggregation {
        Aggregation::Count => Value::from(values.len()),
        Aggregation::Sum => sum_values(values),
        Aggregation::Average => {
            if values.is_empty() {
                Value::Null
            } else {
                let sum: f64 = values.iter().filter_map(Value::as_f64).sum();
                Value::Float(sum / values.len() as f64)
            }
        }
        Aggregation::Min => values
            .iter()
            .filter(|v| !v.is_null())
            .min_by(|a, b| a.compare(b))
            .cloned()
            .unwrap_or_default(),
        Aggregation::Max => values
            .iter()
            .filter(|v| !v.is_null())
            .max_by(|a, b| a.compare(b))
            .cloned()
            .unwrap_or_default(),
    }
}

fn sum_values(values: &[Value]) -> Value {
    let all_int = values
        .iter()
        .all(|v| matches!(v, Value::Int(_) | Value::Null));
    if all_int {
        Value::Int(values.iter().filter_map(Value::as_i64).sum())
    } else {
        Value::Float(values.iter().filter_map(Value::as_f64).sum())
    }
}

/// Rightmost position at which `item` can be inserted into sorted `items`.
pub(crate) fn insertion_point<T>(items: &[T], item: &T, cmp: &CompareFn<T>) -> usize {
    items.partition_point(|probe| cmp(probe, item) != Ordering::Greater)
}

struct State<T, K> {
    items: Vec<T>,
    keys: Vec<K>,
    index_map: HashMap<K, usize>,
    /// Bumped on every commit; used to detect changes made while a
    /// snapshot was being sorted.
    version: u64,
}

impl<T, K: CollectionKey> State<T, K> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            keys: Vec::new(),
            index_map: HashMap::new(),
            version: 0,
        }
    }

    fn commit(&mut self, items: Vec<T>, keys: Vec<K>) {
        self.index_map = keys
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, key)| (key, index))
            .collect();
        self.items = items;
        self.keys = keys;
        self.version += 1;
    }
}

struct Observers<T: CollectionItem, K: CollectionKey> {
    entries: SlotMap<ObserverId, ObserverRef<T, K>>,
    /// Notification order: ascending priority, then registration order.
    order: Vec<(i32, ObserverId)>,
}

struct Shared<T: CollectionItem, K: CollectionKey> {
    key_fn: KeyFn<T, K>,
    reader: Option<FieldReader<T>>,
    state: RwLock<State<T, K>>,
    sorters: SorterCollection<T>,
    sort_fn_override: RwLock<Option<CompareFn<T>>>,
    grouper: RwLock<Option<Arc<Grouper<T>>>>,
    /// Holds a `GroupCollection<T, K>`. Erased so that `Collection<T, K>`
    /// does not instantiate the collection of groups inside itself.
    groups: RwLock<Option<(Arc<dyn Any + Send + Sync>, ObserverId)>>,
    observers: RwLock<Observers<T, K>>,
    update_depth: UpdateDepth,
    pending: Mutex<ChangeSummary>,
    signals: CollectionSignals<T, K>,
}

/// An observable ordered collection of items, unique by key.
///
/// When sorters (or a custom sort function, or a grouper) are set, the
/// collection keeps itself sorted: inserted items are placed by comparator
/// and any requested index is ignored.
pub struct Collection<T: CollectionItem, K: CollectionKey> {
    shared: Arc<Shared<T, K>>,
}

impl<T: CollectionItem, K: CollectionKey> Clone for Collection<T, K> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: CollectionItem + Record, K: CollectionKey> Collection<T, K> {
    /// Creates an empty collection whose sorters, groupers and aggregates
    /// read fields through [`Record`].
    pub fn for_records<F>(key_fn: F) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self::from_parts(Arc::new(key_fn), Some(record_reader::<T>()))
    }
}

impl<T: CollectionItem, K: CollectionKey> Collection<T, K> {
    /// Creates an empty collection without a field reader. Only closure
    /// sorters can be used.
    pub fn new<F>(key_fn: F) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self::from_parts(Arc::new(key_fn), None)
    }

    /// Creates an empty collection reading fields through `reader`.
    pub fn with_reader<F>(key_fn: F, reader: FieldReader<T>) -> Self
    where
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self::from_parts(Arc::new(key_fn), Some(reader))
    }

    pub(crate) fn from_parts(key_fn: KeyFn<T, K>, reader: Option<FieldReader<T>>) -> Self {
        let shared = Arc::new(Shared {
            key_fn,
            sorters: SorterCollection::with_reader(reader.clone()),
            reader,
            state: RwLock::new(State::new()),
            sort_fn_override: RwLock::new(None),
            grouper: RwLock::new(None),
            groups: RwLock::new(None),
            observers: RwLock::new(Observers {
                entries: SlotMap::with_key(),
                order: Vec::new(),
            }),
            update_depth: UpdateDepth::new(),
            pending: Mutex::new(ChangeSummary::default()),
            signals: CollectionSignals::new(),
        });

        let weak = Arc::downgrade(&shared);
        shared.sorters.sort.connect(move |_| {
            if let Some(shared) = weak.upgrade() {
                Collection { shared }.sort_items();
            }
        });

        Self { shared }
    }

    /// Replaces the sort options (builder form).
    pub fn with_options(self, options: SortOptions) -> Self {
        self.shared.sorters.set_options(options);
        self
    }

    /// The collection's signals.
    pub fn signals(&self) -> &CollectionSignals<T, K> {
        &self.shared.signals
    }

    /// The collection's sorters. Changing them re-sorts the collection.
    pub fn sorters(&self) -> &SorterCollection<T> {
        &self.shared.sorters
    }

    /// The field reader, if any.
    pub fn field_reader(&self) -> Option<FieldReader<T>> {
        self.shared.reader.clone()
    }

    /// The key function.
    pub fn key_fn(&self) -> KeyFn<T, K> {
        self.shared.key_fn.clone()
    }

    /// Derives the key of `item`.
    pub fn key_of(&self, item: &T) -> K {
        (self.shared.key_fn)(item)
    }

    /// Whether two handles refer to the same collection.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Number of items.
    pub fn len(&self) -> usize {
        self.shared.state.read().items.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.shared.state.read().items.is_empty()
    }

    /// Snapshot of the items in order.
    pub fn items(&self) -> Vec<T> {
        self.shared.state.read().items.clone()
    }

    /// Snapshot of the keys in order.
    pub fn keys(&self) -> Vec<K> {
        self.shared.state.read().keys.clone()
    }

    /// Item with the given key.
    pub fn get(&self, key: &K) -> Option<T> {
        let state = self.shared.state.read();
        state
            .index_map
            .get(key)
            .and_then(|&index| state.items.get(index).cloned())
    }

    /// Item at `index`.
    pub fn get_at(&self, index: usize) -> Option<T> {
        self.shared.state.read().items.get(index).cloned()
    }

    /// Items in `range`, clamped to the collection bounds.
    pub fn get_range(&self, range: Range<usize>) -> Vec<T> {
        let state = self.shared.state.read();
        let end = range.end.min(state.items.len());
        let start = range.start.min(end);
        state.items[start..end].to_vec()
    }

    /// First item.
    pub fn first(&self) -> Option<T> {
        self.shared.state.read().items.first().cloned()
    }

    /// Last item.
    pub fn last(&self) -> Option<T> {
        self.shared.state.read().items.last().cloned()
    }

    /// Position of the item with the given key.
    pub fn index_of_key(&self, key: &K) -> Option<usize> {
        self.shared.state.read().index_map.get(key).copied()
    }

    /// Position of `item`, looked up by its key.
    pub fn index_of(&self, item: &T) -> Option<usize> {
        self.index_of_key(&self.key_of(item))
    }

    /// Whether an item with the given key is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.shared.state.read().index_map.contains_key(key)
    }

    // -------------------------------------------------------------------------
    // Observers and update brackets
    // -------------------------------------------------------------------------

    /// Registers an observer. Registering the same observer twice fails.
    pub fn add_observer(&self, observer: ObserverRef<T, K>) -> Result<ObserverId> {
        let priority = observer.observer_priority();
        let ptr = Arc::as_ptr(&observer) as *const ();

        let mut observers = self.shared.observers.write();
        if observers
            .entries
            .values()
            .any(|existing| Arc::as_ptr(existing) as *const () == ptr)
        {
            return Err(CollectionError::ObserverAlreadyAdded);
        }
        let id = observers.entries.insert(observer);
        let pos = observers.order.partition_point(|(p, _)| *p <= priority);
        observers.order.insert(pos, (priority, id));
        tracing::trace!(target: targets::COLLECTION, priority, "observer added");
        Ok(id)
    }

    /// Unregisters an observer. Returns `false` if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.shared.observers.write();
        if observers.entries.remove(id).is_none() {
            tracing::warn!(target: targets::COLLECTION, ?id, "removing unknown observer");
            return false;
        }
        observers.order.retain(|(_, entry)| *entry != id);
        true
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.shared.observers.read().entries.len()
    }

    fn observer_snapshot(&self) -> Vec<ObserverRef<T, K>> {
        let observers = self.shared.observers.read();
        observers
            .order
            .iter()
            .filter_map(|(_, id)| observers.entries.get(*id).cloned())
            .collect()
    }

    /// Opens an update bracket. Only the outermost bracket is announced.
    pub fn begin_update(&self) {
        if self.shared.update_depth.begin() {
            tracing::trace!(target: targets::UPDATE, "begin update");
            for observer in self.observer_snapshot() {
                observer.on_collection_begin_update(self);
            }
            self.shared.signals.begin_update.emit(());
        }
    }

    /// Closes an update bracket. Closing the outermost bracket notifies
    /// observers and emits `data_changed` if anything changed inside it.
    pub fn end_update(&self) -> Result<()> {
        if self.shared.update_depth.end()? {
            tracing::trace!(target: targets::UPDATE, "end update");
            for observer in self.observer_snapshot() {
                observer.on_collection_end_update(self);
            }
            self.shared.signals.end_update.emit(());

            let summary = std::mem::take(&mut *self.shared.pending.lock());
            if !summary.is_empty() {
                self.shared.signals.data_changed.emit(summary);
            }
        }
        Ok(())
    }

    /// Whether an update bracket is open.
    pub fn is_updating(&self) -> bool {
        self.shared.update_depth.is_updating()
    }

    /// Runs `f` inside one update bracket. The bracket is closed even if
    /// `f` panics.
    pub fn batch<R>(&self, f: impl FnOnce(&Self) -> R) -> Result<R> {
        let guard = self.update_guard();
        let result = f(self);
        guard.finish()?;
        Ok(result)
    }

    /// Opens an update bracket that closes when the returned guard drops.
    pub(crate) fn update_guard(&self) -> UpdateGuard<'_, T, K> {
        self.begin_update();
        UpdateGuard {
            collection: self,
            open: true,
        }
    }

    fn bracket(&self, f: impl FnOnce()) {
        let _guard = self.update_guard();
        f();
    }

    /// Closes a bracket while a panic unwinds: the depth drops but nobody is
    /// notified, and the changes made inside the bracket are not summarized.
    pub(crate) fn abandon_update(&self) {
        match self.shared.update_depth.end() {
            Ok(true) => {
                std::mem::take(&mut *self.shared.pending.lock());
                tracing::warn!(target: targets::UPDATE, "update bracket closed by panic");
                for observer in self.observer_snapshot() {
                    observer.on_collection_update_abandoned(self);
                }
            }
            Ok(false) => {}
            Err(err) => tracing::warn!(target: targets::UPDATE, %err, "unbalanced update bracket"),
        }
    }

    fn notify_add(&self, details: AddDetails<T, K>) {
        self.shared.pending.lock().added += details.items.len();
        for observer in self.observer_snapshot() {
            observer.on_collection_add(self, &details);
        }
        self.shared.signals.add.emit(details);
    }

    fn notify_remove(&self, details: RemoveDetails<T, K>) {
        self.shared.pending.lock().removed += details.items.len();
        for observer in self.observer_snapshot() {
            observer.on_collection_remove(self, &details);
        }
        self.shared.signals.remove.emit(details);
    }

    fn notify_item_change(&self, details: ItemChangeDetails<T, K>) {
        self.shared.pending.lock().item_changes += 1;
        for observer in self.observer_snapshot() {
            observer.on_collection_item_change(self, &details);
        }
        self.shared.signals.item_change.emit(details);
    }

    fn notify_update_key(&self, details: UpdateKeyDetails<T, K>) {
        self.shared.pending.lock().key_updates += 1;
        for observer in self.observer_snapshot() {
            observer.on_collection_update_key(self, &details);
        }
        self.shared.signals.update_key.emit(details);
    }

    fn notify_refresh(&self) {
        self.shared.pending.lock().refreshed = true;
        for observer in self.observer_snapshot() {
            observer.on_collection_refresh(self);
        }
        self.shared.signals.refresh.emit(());
    }

    fn notify_sort(&self, sort_fn: Option<&CompareFn<T>>) {
        self.shared.pending.lock().sorted = true;
        for observer in self.observer_snapshot() {
            observer.on_collection_sort(self, sort_fn);
        }
        self.shared.signals.sort.emit(());
    }

    // -------------------------------------------------------------------------
    // Sorting
    // -------------------------------------------------------------------------

    /// Adds sorters in `mode`; see [`SorterCollection::add_sort`]. The
    /// collection re-sorts once the sorters change.
    pub fn sort<I, D>(&self, descriptors: I, direction: Option<SortDirection>, mode: SortMode) -> Result<()>
    where
        I: IntoIterator<Item = D>,
        D: Into<SorterDescriptor<T>>,
    {
        self.shared
            .sorters
            .add_sort(descriptors, direction, mode)
            .map(drop)
    }

    /// Sorts by `property`, replacing the current sorters. Sorting by the
    /// current primary property again without a direction toggles it.
    pub fn sort_by(&self, property: &str, direction: Option<SortDirection>) -> Result<()> {
        self.shared
            .sorters
            .add_sort([property], direction, SortMode::Replace)
            .map(drop)
    }

    /// Installs (or clears) a comparator that takes precedence over the
    /// sorters, then re-sorts.
    pub fn set_sort_fn(&self, sort_fn: Option<CompareFn<T>>) {
        *self.shared.sort_fn_override.write() = sort_fn;
        self.sort_items();
    }

    /// Re-sorts with the current comparator and announces the sort.
    pub fn resort(&self) {
        self.sort_items();
    }

    /// Whether the collection keeps itself sorted.
    pub fn is_sorted(&self) -> bool {
        self.get_sort_fn().is_some()
    }

    /// The comparator the collection is kept sorted by: the grouper first (if
    /// any), then the custom sort function or the sorters.
    pub fn get_sort_fn(&self) -> Option<CompareFn<T>> {
        let base = self.item_sort_fn();
        let grouper = self.shared.grouper.read().clone();
        match (grouper, base) {
            (None, base) => base,
            (Some(grouper), None) => Some(Arc::new(move |a: &T, b: &T| grouper.sort(a, b))),
            (Some(grouper), Some(base)) => Some(Arc::new(move |a: &T, b: &T| {
                grouper.sort(a, b).then_with(|| base(a, b))
            })),
        }
    }

    /// The comparator without the grouper; this is what orders items inside
    /// each group.
    pub fn item_sort_fn(&self) -> Option<CompareFn<T>> {
        self.shared
            .sort_fn_override
            .read()
            .clone()
            .or_else(|| self.shared.sorters.get_sort_fn())
    }

    /// Rightmost index at which `item` would be inserted, using `cmp` or the
    /// collection's own comparator. Unsorted collections return the length.
    pub fn find_insertion_index(&self, item: &T, cmp: Option<&CompareFn<T>>) -> usize {
        let cmp = cmp.cloned().or_else(|| self.get_sort_fn());
        let items = self.items();
        match cmp {
            Some(cmp) => insertion_point(&items, item, &cmp),
            None => items.len(),
        }
    }

    #[tracing::instrument(skip_all, target = "horizon_collections::collection", level = "debug")]
    fn sort_items(&self) {
        let sort_fn = self.get_sort_fn();
        if let Some(cmp) = &sort_fn {
            loop {
                let (items, version) = {
                    let state = self.shared.state.read();
                    (state.items.clone(), state.version)
                };
                let mut order: Vec<usize> = (0..items.len()).collect();
                order.sort_by(|&a, &b| cmp(&items[a], &items[b]));

                let mut state = self.shared.state.write();
                if state.version != version {
                    continue;
                }
                if order.iter().enumerate().any(|(pos, &index)| pos != index) {
                    let keys = order.iter().map(|&i| state.keys[i].clone()).collect();
                    let sorted = order.iter().map(|&i| items[i].clone()).collect();
                    state.commit(sorted, keys);
                }
                break;
            }
        }
        tracing::debug!(target: targets::COLLECTION, len = self.len(), "collection sorted");
        self.bracket(|| self.notify_sort(sort_fn.as_ref()));
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Appends one item (or places it by comparator when sorted).
    pub fn add(&self, item: T) -> Result<()> {
        self.add_all(vec![item])
    }

    /// Appends items (or places them by comparator when sorted).
    pub fn add_all(&self, items: Vec<T>) -> Result<()> {
        let len = self.len();
        self.splice(len, 0, items).map(drop)
    }

    /// Inserts items at `index`. Sorted collections ignore the index.
    pub fn insert(&self, index: usize, items: Vec<T>) -> Result<()> {
        self.splice(index, 0, items).map(drop)
    }

    /// Removes `remove_count` items starting at `index`, then inserts `items`
    /// there (or by comparator when sorted). Returns the removed items.
    ///
    /// New keys must be unique among themselves and must not collide with
    /// items outside the removed range; on a collision nothing changes.
    /// Notifications are one `remove` for the range followed by one `add`
    /// per contiguous run of inserted items, inside one update bracket.
    pub fn splice(&self, index: usize, remove_count: usize, items: Vec<T>) -> Result<Vec<T>> {
        let new_keys: Vec<K> = items.iter().map(|item| self.key_of(item)).collect();
        let sort_fn = self.get_sort_fn();

        loop {
            let (current_items, current_keys, version, end) = {
                let state = self.shared.state.read();
                let len = state.items.len();
                if index > len {
                    return Err(CollectionError::IndexOutOfBounds { index, len });
                }
                let end = index + remove_count.min(len - index);

                let mut seen = HashSet::with_capacity(new_keys.len());
                for key in &new_keys {
                    let collides = state
                        .index_map
                        .get(key)
                        .is_some_and(|existing| !(index..end).contains(existing));
                    if !seen.insert(key) || collides {
                        return Err(CollectionError::duplicate_key(key));
                    }
                }
                (state.items.clone(), state.keys.clone(), state.version, end)
            };

            if end == index && items.is_empty() {
                return Ok(Vec::new());
            }

            let mut remaining_items = current_items;
            let mut remaining_keys = current_keys;
            let removed_items: Vec<T> = remaining_items.drain(index..end).collect();
            let removed_keys: Vec<K> = remaining_keys.drain(index..end).collect();

            let (final_items, final_keys, inserted) = place(
                remaining_items,
                remaining_keys,
                index,
                items.clone(),
                new_keys.clone(),
                sort_fn.as_ref(),
            );
            let runs = added_runs(&final_items, &final_keys, &inserted);

            {
                let mut state = self.shared.state.write();
                if state.version != version {
                    continue;
                }
                state.commit(final_items, final_keys);
            }

            tracing::trace!(
                target: targets::COLLECTION,
                index,
                removed = removed_items.len(),
                added = new_keys.len(),
                "splice"
            );
            self.bracket(|| {
                if !removed_items.is_empty() {
                    self.notify_remove(RemoveDetails {
                        at: index,
                        items: removed_items.clone(),
                        keys: removed_keys,
                    });
                }
                for run in runs {
                    self.notify_add(run);
                }
            });
            return Ok(removed_items);
        }
    }

    /// Replaces every item and announces a refresh.
    pub fn replace_all(&self, items: Vec<T>) -> Result<()> {
        let keys: Vec<K> = items.iter().map(|item| self.key_of(item)).collect();
        let mut seen = HashSet::with_capacity(keys.len());
        if let Some(duplicate) = keys.iter().find(|key| !seen.insert(*key)) {
            return Err(CollectionError::duplicate_key(duplicate));
        }

        let (items, keys) = match self.get_sort_fn() {
            Some(cmp) => {
                let mut order: Vec<usize> = (0..items.len()).collect();
                order.sort_by(|&a, &b| cmp(&items[a], &items[b]));
                (
                    order.iter().map(|&i| items[i].clone()).collect(),
                    order.iter().map(|&i| keys[i].clone()).collect(),
                )
            }
            None => (items, keys),
        };

        self.shared.state.write().commit(items, keys);
        tracing::debug!(target: targets::COLLECTION, len = self.len(), "collection replaced");
        self.bracket(|| self.notify_refresh());
        Ok(())
    }

    /// Removes every item and announces a refresh.
    pub fn clear(&self) {
        {
            let mut state = self.shared.state.write();
            if state.items.is_empty() {
                return;
            }
            state.commit(Vec::new(), Vec::new());
        }
        tracing::debug!(target: targets::COLLECTION, "collection cleared");
        self.bracket(|| self.notify_refresh());
    }

    /// Removes the item at `index`.
    pub fn remove_at(&self, index: usize) -> Result<T> {
        let len = self.len();
        if index >= len {
            return Err(CollectionError::IndexOutOfBounds { index, len });
        }
        self.splice(index, 1, Vec::new())?
            .into_iter()
            .next()
            .ok_or(CollectionError::IndexOutOfBounds { index, len })
    }

    /// Removes up to `count` items starting at `index`.
    pub fn remove_range(&self, index: usize, count: usize) -> Result<Vec<T>> {
        self.splice(index, count, Vec::new())
    }

    /// Removes the item with the given key.
    pub fn remove_by_key(&self, key: &K) -> Option<T> {
        self.remove_keys(std::slice::from_ref(key)).pop()
    }

    /// Removes the item with the same key as `item`.
    pub fn remove(&self, item: &T) -> Option<T> {
        self.remove_by_key(&self.key_of(item))
    }

    /// Removes every item whose key is listed. Unknown keys are ignored.
    /// Returns the removed items in collection order.
    pub fn remove_keys(&self, keys: &[K]) -> Vec<T> {
        let chunks = {
            let mut state = self.shared.state.write();
            let indices: BTreeSet<usize> = keys
                .iter()
                .filter_map(|key| state.index_map.get(key).copied())
                .collect();
            if indices.is_empty() {
                return Vec::new();
            }

            let mut chunks: Vec<RemoveDetails<T, K>> = Vec::new();
            for &index in &indices {
                match chunks.last_mut() {
                    Some(chunk) if chunk.at + chunk.items.len() == index => {
                        chunk.items.push(state.items[index].clone());
                        chunk.keys.push(state.keys[index].clone());
                    }
                    _ => chunks.push(RemoveDetails {
                        at: index,
                        items: vec![state.items[index].clone()],
                        keys: vec![state.keys[index].clone()],
                    }),
                }
            }

            let mut items = std::mem::take(&mut state.items);
            let mut keys = std::mem::take(&mut state.keys);
            let mut position = 0;
            items.retain(|_| {
                position += 1;
                !indices.contains(&(position - 1))
            });
            position = 0;
            keys.retain(|_| {
                position += 1;
                !indices.contains(&(position - 1))
            });
            state.commit(items, keys);
            chunks
        };

        let removed: Vec<T> = chunks
            .iter()
            .flat_map(|chunk| chunk.items.iter().cloned())
            .collect();
        tracing::trace!(target: targets::COLLECTION, removed = removed.len(), "items removed");
        self.bracket(|| {
            for chunk in chunks.into_iter().rev() {
                self.notify_remove(chunk);
            }
        });
        removed
    }

    /// Applies `f` to a copy of the item with the given key, then commits the
    /// change.
    ///
    /// `modified` names the fields the caller changed; it is passed through to
    /// observers. The updated item may carry a new key (announced as
    /// `update_key`) and, in a sorted collection, may move (announced as a
    /// `remove` and `add` pair). An `item_change` always follows. All of it
    /// happens inside one update bracket. On a key collision nothing changes.
    pub fn update_item<F>(&self, key: &K, modified: &[&str], f: F) -> Result<()>
    where
        F: FnOnce(&mut T),
    {
        let mut item = self.get(key).ok_or_else(|| CollectionError::key_not_found(key))?;
        f(&mut item);
        self.item_changed(key, item, modified)
    }

    /// Replaces the item stored under `key` with `item`; see
    /// [`update_item`](Self::update_item).
    pub fn replace_item(&self, key: &K, item: T) -> Result<()> {
        self.item_changed(key, item, &[])
    }

    fn item_changed(&self, key: &K, item: T, modified: &[&str]) -> Result<()> {
        let new_key = self.key_of(&item);
        let key_changed = new_key != *key;
        let sort_fn = self.get_sort_fn();

        loop {
            let (items, version, old_index) = {
                let state = self.shared.state.read();
                let old_index = *state
                    .index_map
                    .get(key)
                    .ok_or_else(|| CollectionError::key_not_found(key))?;
                if key_changed && state.index_map.contains_key(&new_key) {
                    return Err(CollectionError::duplicate_key(&new_key));
                }
                (state.items.clone(), state.version, old_index)
            };

            // -1: moved towards the front, 1: towards the back.
            let mut movement = 0i8;
            let mut new_index = old_index;
            if let Some(cmp) = sort_fn.as_ref().filter(|_| items.len() > 1) {
                if old_index > 0 && cmp(&items[old_index - 1], &item) == Ordering::Greater {
                    movement = -1;
                    new_index = insertion_point(&items[..old_index], &item, cmp);
                } else if old_index + 1 < items.len()
                    && cmp(&item, &items[old_index + 1]) == Ordering::Greater
                {
                    movement = 1;
                    new_index = old_index + insertion_point(&items[old_index + 1..], &item, cmp);
                }
            }

            {
                let mut state = self.shared.state.write();
                if state.version != version {
                    continue;
                }
                let mut items = std::mem::take(&mut state.items);
                let mut keys = std::mem::take(&mut state.keys);
                items.remove(old_index);
                keys.remove(old_index);
                items.insert(new_index, item.clone());
                keys.insert(new_index, new_key.clone());
                state.commit(items, keys);
            }

            tracing::trace!(
                target: targets::COLLECTION,
                old_index,
                new_index,
                key_changed,
                "item changed"
            );
            let details = ItemChangeDetails {
                item: item.clone(),
                key: new_key.clone(),
                old_key: key_changed.then(|| key.clone()),
                old_index: if movement < 0 { old_index + 1 } else { old_index },
                new_index,
                index_changed: movement != 0,
                modified: modified.iter().map(|m| m.to_string()).collect(),
            };
            self.bracket(|| {
                if key_changed {
                    self.notify_update_key(UpdateKeyDetails {
                        item: item.clone(),
                        old_key: key.clone(),
                        new_key: new_key.clone(),
                        index: old_index,
                    });
                }
                if movement != 0 {
                    self.notify_remove(RemoveDetails {
                        at: old_index,
                        items: vec![item.clone()],
                        keys: vec![new_key.clone()],
                    });
                    self.notify_add(AddDetails {
                        at: new_index,
                        items: vec![item.clone()],
                        keys: vec![new_key.clone()],
                    });
                }
                self.notify_item_change(details);
            });
            return Ok(());
        }
    }

    /// Re-derives the key of the item stored under `old_key`, for items
    /// whose identity changed through interior mutability.
    pub fn update_key(&self, old_key: &K) -> Result<()> {
        let item = self
            .get(old_key)
            .ok_or_else(|| CollectionError::key_not_found(old_key))?;
        let new_key = self.key_of(&item);
        if new_key == *old_key {
            return Ok(());
        }

        let index = {
            let mut state = self.shared.state.write();
            if state.index_map.contains_key(&new_key) {
                return Err(CollectionError::duplicate_key(&new_key));
            }
            let index = state
                .index_map
                .remove(old_key)
                .ok_or_else(|| CollectionError::key_not_found(old_key))?;
            state.keys[index] = new_key.clone();
            state.index_map.insert(new_key.clone(), index);
            state.version += 1;
            index
        };

        self.bracket(|| {
            self.notify_update_key(UpdateKeyDetails {
                item,
                old_key: old_key.clone(),
                new_key,
                index,
            })
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Grouping
    // -------------------------------------------------------------------------

    /// Groups items by `property`, or removes grouping with `None`.
    pub fn group_by(&self, property: Option<&str>) -> Result<()> {
        let grouper = match property {
            Some(property) => {
                let reader = self
                    .field_reader()
                    .ok_or_else(|| CollectionError::missing_reader(property))?;
                let mut grouper = Grouper::with_reader(property, reader);
                if let Some(root) = self.shared.sorters.options().root_property() {
                    grouper = grouper.with_root(root);
                }
                Some(Arc::new(grouper))
            }
            None => None,
        };
        self.set_grouper(grouper)
    }

    /// Installs (or removes) a grouper. The collection is re-sorted with the
    /// grouper as its primary criterion and a [`GroupCollection`] is built.
    pub fn set_grouper(&self, grouper: Option<Arc<Grouper<T>>>) -> Result<()> {
        let previous = self.shared.groups.write().take();
        if let Some((_, id)) = previous {
            self.remove_observer(id);
        }
        *self.shared.grouper.write() = grouper.clone();
        self.sort_items();

        if let Some(grouper) = grouper {
            let groups = GroupCollection::new(grouper, self.key_fn(), self.field_reader());
            groups.rebuild(self);
            let id = self.add_observer(Arc::new(groups.clone()))?;
            let erased: Arc<dyn Any + Send + Sync> = Arc::new(groups);
            *self.shared.groups.write() = Some((erased, id));
        }
        Ok(())
    }

    /// The current grouper.
    pub fn grouper(&self) -> Option<Arc<Grouper<T>>> {
        self.shared.grouper.read().clone()
    }

    /// The groups, when a grouper is set.
    pub fn groups(&self) -> Option<GroupCollection<T, K>> {
        self.shared
            .groups
            .read()
            .as_ref()
            .and_then(|(groups, _)| groups.downcast_ref::<GroupCollection<T, K>>().cloned())
    }

    // -------------------------------------------------------------------------
    // Aggregation
    // -------------------------------------------------------------------------

    fn property_values(&self, property: &str, items: &[T]) -> Result<Vec<Value>> {
        let reader = self
            .field_reader()
            .ok_or_else(|| CollectionError::missing_reader(property))?;
        let options = self.shared.sorters.options();
        let root = options.root_property();
        Ok(items.iter().map(|item| reader(item, root, property)).collect())
    }

    /// Applies `aggregation` to `property` over every item.
    pub fn aggregate(&self, property: &str, aggregation: Aggregation) -> Result<Value> {
        let values = self.property_values(property, &self.items())?;
        Ok(aggregate_values(&values, aggregation))
    }

    /// Applies `aggregation` to `property` within each group, in group
    /// order. Empty when the collection is not grouped.
    pub fn aggregate_by_group(
        &self,
        property: &str,
        aggregation: Aggregation,
    ) -> Result<Vec<(GroupKey, Value)>> {
        let Some(groups) = self.groups() else {
            return Ok(Vec::new());
        };
        groups
            .groups()
            .into_iter()
            .map(|group| {
                let values = self.property_values(property, &group.items())?;
                Ok((group.key().clone(), aggregate_values(&values, aggregation)))
            })
            .collect()
    }

    /// Sum of `property`. Integers sum to an integer.
    pub fn sum(&self, property: &str) -> Result<Value> {
        self.aggregate(property, Aggregation::Sum)
    }

    /// Smallest value of `property`, `Null` when empty.
    pub fn min(&self, property: &str) -> Result<Value> {
        self.aggregate(property, Aggregation::Min)
    }

    /// Largest value of `property`, `Null` when empty.
    pub fn max(&self, property: &str) -> Result<Value> {
        self.aggregate(property, Aggregation::Max)
    }

    /// Average of `property`, `None` when empty.
    pub fn average(&self, property: &str) -> Result<Option<f64>> {
        Ok(self.aggregate(property, Aggregation::Average)?.as_f64())
    }

    /// Number of items.
    pub fn count(&self) -> usize {
        self.len()
    }
}

/// Inserts `new_items` into `items`: at `at` when unsorted, or merged by
/// `cmp` (after equal items) when sorted. Returns the merged items and keys
/// plus a flag per position marking the inserted ones.
fn place<T, K>(
    mut items: Vec<T>,
    mut keys: Vec<K>,
    at: usize,
    new_items: Vec<T>,
    new_keys: Vec<K>,
    cmp: Option<&CompareFn<T>>,
) -> (Vec<T>, Vec<K>, Vec<bool>) {
    let Some(cmp) = cmp else {
        let tail_items = items.split_off(at);
        let tail_keys = keys.split_off(at);
        let mut inserted = vec![false; at];
        inserted.resize(at + new_items.len(), true);
        inserted.resize(at + new_items.len() + tail_items.len(), false);
        items.extend(new_items);
        items.extend(tail_items);
        keys.extend(new_keys);
        keys.extend(tail_keys);
        return (items, keys, inserted);
    };

    let mut order: Vec<usize> = (0..new_items.len()).collect();
    order.sort_by(|&a, &b| cmp(&new_items[a], &new_items[b]));
    let mut pending: Vec<Option<(T, K)>> = new_items.into_iter().zip(new_keys).map(Some).collect();

    let total = items.len() + pending.len();
    let mut out_items = Vec::with_capacity(total);
    let mut out_keys = Vec::with_capacity(total);
    let mut inserted = Vec::with_capacity(total);
    let mut existing = items.into_iter().zip(keys).peekable();

    for index in order {
        let Some((item, key)) = pending[index].take() else {
            continue;
        };
        while let Some((next, _)) = existing.peek() {
            if cmp(&item, next) == Ordering::Less {
                break;
            }
            if let Some((next_item, next_key)) = existing.next() {
                out_items.push(next_item);
                out_keys.push(next_key);
                inserted.push(false);
            }
        }
        out_items.push(item);
        out_keys.push(key);
        inserted.push(true);
    }
    for (item, key) in existing {
        out_items.push(item);
        out_keys.push(key);
        inserted.push(false);
    }
    (out_items, out_keys, inserted)
}

fn added_runs<T: Clone, K: Clone>(items: &[T], keys: &[K], inserted: &[bool]) -> Vec<AddDetails<T, K>> {
    let mut runs = Vec::new();
    let mut index = 0;
    while index < inserted.len() {
        if !inserted[index] {
            index += 1;
            continue;
        }
        let start = index;
        while index < inserted.len() && inserted[index] {
            index += 1;
        }
        runs.push(AddDetails {
            at: start,
            items: items[start..index].to_vec(),
            keys: keys[start..index].to_vec(),
        });
    }
    runs
}

/// An open update bracket on a [`Collection`], closed on drop.
///
/// Dropping the guard during a panic still unwinds the bracket depth, so a
/// panicking observer or comparator cannot leave the collection stuck in an
/// update.
pub(crate) struct UpdateGuard<'a, T: CollectionItem, K: CollectionKey> {
    collection: &'a Collection<T, K>,
    open: bool,
}

impl<T: CollectionItem, K: CollectionKey> UpdateGuard<'_, T, K> {
    /// Closes the bracket now, reporting an unbalanced close.
    pub(crate) fn finish(mut self) -> Result<()> {
        self.open = false;
        self.collection.end_update()
    }
}

impl<T: CollectionItem, K: CollectionKey> Drop for UpdateGuard<'_, T, K> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if std::thread::panicking() {
            self.collection.abandon_update();
        } else if let Err(err) = self.collection.end_update() {
            tracing::warn!(target: targets::UPDATE, %err, "unbalanced update bracket");
        }
    }
}

impl<T: CollectionItem + fmt::Debug, K: CollectionKey> fmt::Debug for Collection<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("Collection")
            .field("items", &state.items)
            .field("sorters", &self.shared.sorters)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(Collection<serde_json::Value, String>: Send, Sync, Clone);
