//! An ordered key-to-value collection.
//!
//! [`MixedCollection`] keeps values in insertion order alongside their keys
//! and an index map from key to position. It has one sort primitive, a stable
//! permutation of the entries by an entry comparator; every sort method is an
//! adapter over it. Each change is announced through [`MixedSignals`] once the
//! entries are consistent again.
//!
//! ```
//! use horizon_collections::mixed_collection::MixedCollection;
//! use horizon_collections::sorting::SortDirection;
//!
//! let scores = MixedCollection::<String, i64>::new();
//! scores.add("a".to_string(), 3).unwrap();
//! scores.add("b".to_string(), 1).unwrap();
//! scores.add("c".to_string(), 2).unwrap();
//!
//! scores.sort_by_value(SortDirection::Asc);
//! assert_eq!(scores.keys(), vec!["b", "c", "a"]);
//! ```

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use horizon_collections_core::Signal;
use horizon_collections_core::logging::targets;
use parking_lot::RwLock;

use crate::error::{CollectionError, Result};
use crate::observable::{CollectionItem, CollectionKey, KeyFn, insertion_point};
use crate::sorting::{CompareFn, SortDirection, SortMode, SorterCollection, SorterDescriptor};
use crate::value::{FieldReader, Record, record_reader};

/// What the legacy [`MixedCollection::sort_property`] orders by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortProperty {
    Key,
    #[default]
    Value,
    Index,
}

/// One entry as seen by an entry comparator.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a, K, V> {
    /// Position before sorting.
    pub index: usize,
    pub key: &'a K,
    pub value: &'a V,
}

/// A value was added or removed at `index`.
#[derive(Debug, Clone)]
pub struct MixedEntryEvent<K, V> {
    pub index: usize,
    pub key: K,
    pub value: V,
}

/// A value was replaced under an existing key.
#[derive(Debug, Clone)]
pub struct MixedReplaceEvent<K, V> {
    pub key: K,
    pub old_value: V,
    pub new_value: V,
}

/// A value was moved to a new key.
#[derive(Debug, Clone)]
pub struct MixedKeyChange<K> {
    pub old_key: K,
    pub new_key: K,
}

/// Signals emitted by a [`MixedCollection`].
pub struct MixedSignals<K, V> {
    pub add: Signal<MixedEntryEvent<K, V>>,
    pub remove: Signal<MixedEntryEvent<K, V>>,
    pub replace: Signal<MixedReplaceEvent<K, V>>,
    pub update_key: Signal<MixedKeyChange<K>>,
    /// Emitted once after any sort or reorder.
    pub sort: Signal<()>,
    pub clear: Signal<()>,
}

impl<K: 'static, V: 'static> MixedSignals<K, V> {
    fn new() -> Self {
        Self {
            add: Signal::new(),
            remove: Signal::new(),
            replace: Signal::new(),
            update_key: Signal::new(),
            sort: Signal::new(),
            clear: Signal::new(),
        }
    }
}

struct Entries<K, V> {
    keys: Vec<K>,
    values: Vec<V>,
    index_map: HashMap<K, usize>,
    version: u64,
}

impl<K: CollectionKey, V> Entries<K, V> {
    fn new() -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            index_map: HashMap::new(),
            version: 0,
        }
    }

    fn reindex(&mut self) {
        self.index_map = self
            .keys
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, key)| (key, index))
            .collect();
        self.version += 1;
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Ordered collection of values, each stored under a unique key.
pub struct MixedCollection<K: CollectionKey, V: CollectionItem> {
    entries: RwLock<Entries<K, V>>,
    key_fn: Option<KeyFn<V, K>>,
    sorters: SorterCollection<V>,
    signals: MixedSignals<K, V>,
}

impl<K: CollectionKey, V: CollectionItem + Record> MixedCollection<K, V> {
    /// Creates an empty collection whose sorters read fields through
    /// [`Record`].
    pub fn for_records() -> Self {
        Self::with_reader(Some(record_reader::<V>()))
    }
}

impl<K: CollectionKey, V: CollectionItem> Default for MixedCollection<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CollectionKey, V: CollectionItem> MixedCollection<K, V> {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::with_reader(None)
    }

    /// Creates an empty collection whose sorters read fields through `reader`.
    pub fn with_reader(reader: Option<FieldReader<V>>) -> Self {
        Self {
            entries: RwLock::new(Entries::new()),
            key_fn: None,
            sorters: SorterCollection::with_reader(reader),
            signals: MixedSignals::new(),
        }
    }

    /// Derives keys for [`add_value`](Self::add_value) with `key_fn`.
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&V) -> K + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    /// Signals emitted on every mutation.
    pub fn signals(&self) -> &MixedSignals<K, V> {
        &self.signals
    }

    /// The sorters applied by [`sort`](Self::sort) and used by
    /// [`find_insertion_index`](Self::find_insertion_index).
    pub fn sorters(&self) -> &SorterCollection<V> {
        &self.sorters
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the collection has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().keys.is_empty()
    }

    /// The keys in order.
    pub fn keys(&self) -> Vec<K> {
        self.entries.read().keys.clone()
    }

    /// The values in order.
    pub fn values(&self) -> Vec<V> {
        self.entries.read().values.clone()
    }

    /// The value stored under `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read();
        entries
            .index_map
            .get(key)
            .and_then(|&index| entries.values.get(index).cloned())
    }

    /// The value at `index`.
    pub fn get_at(&self, index: usize) -> Option<V> {
        self.entries.read().values.get(index).cloned()
    }

    /// The key at `index`.
    pub fn key_at(&self, index: usize) -> Option<K> {
        self.entries.read().keys.get(index).cloned()
    }

    /// Position of `key`, if present.
    pub fn index_of_key(&self, key: &K) -> Option<usize> {
        self.entries.read().index_map.get(key).copied()
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.read().index_map.contains_key(key)
    }

    /// The first value.
    pub fn first(&self) -> Option<V> {
        self.entries.read().values.first().cloned()
    }

    /// The last value.
    pub fn last(&self) -> Option<V> {
        self.entries.read().values.last().cloned()
    }

    /// Values in `range`, clamped to the collection bounds.
    pub fn get_range(&self, range: Range<usize>) -> Vec<V> {
        let entries = self.entries.read();
        let end = range.end.min(entries.len());
        let start = range.start.min(end);
        entries.values[start..end].to_vec()
    }

    /// First entry matching `predicate`.
    pub fn find_by(&self, predicate: impl Fn(&K, &V) -> bool) -> Option<(K, V)> {
        let entries = self.entries.read();
        entries
            .keys
            .iter()
            .zip(&entries.values)
            .find(|(key, value)| predicate(key, value))
            .map(|(key, value)| (key.clone(), value.clone()))
    }

    /// New collection holding the entries matching `predicate`, in order.
    /// Signal connections are not carried over.
    pub fn filter_by(&self, predicate: impl Fn(&K, &V) -> bool) -> Self {
        let filtered = self.empty_copy();
        {
            let entries = self.entries.read();
            let mut target = filtered.entries.write();
            for (key, value) in entries.keys.iter().zip(&entries.values) {
                if predicate(key, value) {
                    target.keys.push(key.clone());
                    target.values.push(value.clone());
                }
            }
            target.reindex();
        }
        filtered
    }

    fn empty_copy(&self) -> Self {
        let copy = Self {
            entries: RwLock::new(Entries::new()),
            key_fn: self.key_fn.clone(),
            sorters: SorterCollection::with_reader(self.sorters.field_reader())
                .with_options(self.sorters.options()),
            signals: MixedSignals::new(),
        };
        let sorters = self.sorters.items();
        if !sorters.is_empty() {
            if let Err(err) = copy.sorters.add_sort(sorters, None, SortMode::Replace) {
                tracing::warn!(target: targets::MIXED, %err, "sorters not copied");
            }
        }
        copy
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Appends `value` under `key`.
    pub fn add(&self, key: K, value: V) -> Result<()> {
        let len = self.len();
        self.insert(len, key, value)
    }

    /// Appends `value` under the key the key function derives.
    pub fn add_value(&self, value: V) -> Result<K> {
        let key_fn = self.key_fn.as_ref().ok_or(CollectionError::MissingKeyFn)?;
        let key = key_fn(&value);
        self.add(key.clone(), value)?;
        Ok(key)
    }

    /// Appends every entry. All keys are checked before any is added.
    pub fn add_all(&self, entries: Vec<(K, V)>) -> Result<()> {
        let events = {
            let mut state = self.entries.write();
            let mut seen = HashSet::with_capacity(entries.len());
            for (key, _) in &entries {
                if state.index_map.contains_key(key) || !seen.insert(key) {
                    return Err(CollectionError::duplicate_key(key));
                }
            }

            let start = state.len();
            let mut events = Vec::with_capacity(entries.len());
            for (offset, (key, value)) in entries.into_iter().enumerate() {
                state.index_map.insert(key.clone(), start + offset);
                state.keys.push(key.clone());
                state.values.push(value.clone());
                events.push(MixedEntryEvent {
                    index: start + offset,
                    key,
                    value,
                });
            }
            state.version += 1;
            events
        };

        tracing::trace!(target: targets::MIXED, added = events.len(), "entries added");
        for event in events {
            self.signals.add.emit(event);
        }
        Ok(())
    }

    /// Inserts `value` under `key` at `index`.
    pub fn insert(&self, index: usize, key: K, value: V) -> Result<()> {
        {
            let mut state = self.entries.write();
            let len = state.len();
            if index > len {
                return Err(CollectionError::IndexOutOfBounds { index, len });
            }
            if state.index_map.contains_key(&key) {
                return Err(CollectionError::duplicate_key(&key));
            }
            state.keys.insert(index, key.clone());
            state.values.insert(index, value.clone());
            if index == len {
                state.index_map.insert(key.clone(), index);
                state.version += 1;
            } else {
                state.reindex();
            }
        }
        self.signals.add.emit(MixedEntryEvent { index, key, value });
        Ok(())
    }

    /// Replaces the value under `key`, or appends it if the key is new.
    /// Returns the previous value.
    pub fn replace(&self, key: K, value: V) -> Option<V> {
        let old_value = {
            let mut state = self.entries.write();
            state.index_map.get(&key).copied().map(|index| {
                state.version += 1;
                std::mem::replace(&mut state.values[index], value.clone())
            })
        };

        match old_value {
            Some(old_value) => {
                self.signals.replace.emit(MixedReplaceEvent {
                    key,
                    old_value: old_value.clone(),
                    new_value: value,
                });
                Some(old_value)
            }
            None => {
                if let Err(err) = self.add(key, value) {
                    tracing::warn!(target: targets::MIXED, %err, "replace fell back to add and failed");
                }
                None
            }
        }
    }

    /// Removes the entry at `index`.
    pub fn remove_at(&self, index: usize) -> Result<(K, V)> {
        let mut removed = self.remove_range(index, 1)?;
        let len = self.len();
        removed
            .pop()
            .ok_or(CollectionError::IndexOutOfBounds { index, len })
    }

    /// Removes the entry under `key`.
    pub fn remove_by_key(&self, key: &K) -> Option<V> {
        let index = self.index_of_key(key)?;
        self.remove_at(index).ok().map(|(_, value)| value)
    }

    /// Removes up to `count` entries starting at `index`.
    pub fn remove_range(&self, index: usize, count: usize) -> Result<Vec<(K, V)>> {
        let removed: Vec<(K, V)> = {
            let mut state = self.entries.write();
            let len = state.len();
            if index >= len {
                return Err(CollectionError::IndexOutOfBounds { index, len });
            }
            let end = index + count.min(len - index);
            let keys: Vec<K> = state.keys.drain(index..end).collect();
            let values: Vec<V> = state.values.drain(index..end).collect();
            state.reindex();
            keys.into_iter().zip(values).collect()
        };

        tracing::trace!(target: targets::MIXED, index, removed = removed.len(), "entries removed");
        for (offset, (key, value)) in removed.iter().enumerate().rev() {
            self.signals.remove.emit(MixedEntryEvent {
                index: index + offset,
                key: key.clone(),
                value: value.clone(),
            });
        }
        Ok(removed)
    }

    /// Moves the entry under `old_key` to `new_key`, keeping its position.
    pub fn update_key(&self, old_key: &K, new_key: K) -> Result<()> {
        if *old_key == new_key {
            return Ok(());
        }
        {
            let mut state = self.entries.write();
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
        }
        self.signals.update_key.emit(MixedKeyChange {
            old_key: old_key.clone(),
            new_key,
        });
        Ok(())
    }

    /// Removes every entry.
    pub fn clear(&self) {
        {
            let mut state = self.entries.write();
            state.keys.clear();
            state.values.clear();
            state.reindex();
        }
        tracing::debug!(target: targets::MIXED, "mixed collection cleared");
        self.signals.clear.emit(());
    }

    // -------------------------------------------------------------------------
    // Sorting
    // -------------------------------------------------------------------------

    /// Stable sort of the entries by `cmp`, ties broken by original index.
    /// Rebuilds the keys and index map, then emits `sort`.
    #[tracing::instrument(skip_all, target = "horizon_collections::mixed", level = "debug")]
    fn sort_entries<F>(&self, cmp: F)
    where
        F: Fn(&Entry<'_, K, V>, &Entry<'_, K, V>) -> Ordering,
    {
        loop {
            let (keys, values, version) = {
                let state = self.entries.read();
                (state.keys.clone(), state.values.clone(), state.version)
            };
            let entry = |index: usize| Entry {
                index,
                key: &keys[index],
                value: &values[index],
            };
            let mut order: Vec<usize> = (0..keys.len()).collect();
            order.sort_by(|&a, &b| cmp(&entry(a), &entry(b)).then(a.cmp(&b)));

            let mut state = self.entries.write();
            if state.version != version {
                continue;
            }
            state.keys = order.iter().map(|&i| keys[i].clone()).collect();
            state.values = order.iter().map(|&i| values[i].clone()).collect();
            state.reindex();
            break;
        }
        self.signals.sort.emit(());
    }

    /// Sorts values by `cmp`.
    pub fn sort_by<F>(&self, cmp: F)
    where
        F: Fn(&V, &V) -> Ordering,
    {
        self.sort_entries(|a, b| cmp(a.value, b.value));
    }

    /// Sorts keys by `cmp` in `direction`.
    pub fn sort_by_key_with<F>(&self, direction: SortDirection, cmp: F)
    where
        F: Fn(&K, &K) -> Ordering,
    {
        self.sort_entries(|a, b| direction.apply(cmp(a.key, b.key)));
    }

    /// Sorts by key, compared case-insensitively by their text.
    pub fn sort_by_key(&self, direction: SortDirection)
    where
        K: fmt::Display,
    {
        self.sort_by_key_with(direction, |a, b| {
            a.to_string().to_lowercase().cmp(&b.to_string().to_lowercase())
        });
    }

    /// Sorts by value in natural order. Incomparable values are equal.
    pub fn sort_by_value(&self, direction: SortDirection)
    where
        V: PartialOrd,
    {
        self.sort_entries(|a, b| {
            direction.apply(a.value.partial_cmp(b.value).unwrap_or(Ordering::Equal))
        });
    }

    /// Legacy sort by key, value or index. `cmp` compares whole entries;
    /// without it the selected property is compared in natural order.
    pub fn sort_property(
        &self,
        property: SortProperty,
        direction: SortDirection,
        cmp: Option<&dyn Fn(&Entry<'_, K, V>, &Entry<'_, K, V>) -> Ordering>,
    ) where
        K: PartialOrd,
        V: PartialOrd,
    {
        self.sort_entries(|a, b| {
            let ordering = match cmp {
                Some(cmp) => cmp(a, b),
                None => match property {
                    SortProperty::Key => a.key.partial_cmp(b.key),
                    SortProperty::Value => a.value.partial_cmp(b.value),
                    SortProperty::Index => Some(a.index.cmp(&b.index)),
                }
                .unwrap_or(Ordering::Equal),
            };
            direction.apply(ordering)
        });
    }

    /// Adds sorters (see [`SorterCollection::add_sort`]) and sorts by them.
    pub fn sort<I, D>(&self, descriptors: I, direction: Option<SortDirection>, mode: SortMode) -> Result<()>
    where
        I: IntoIterator<Item = D>,
        D: Into<SorterDescriptor<V>>,
    {
        self.sorters.add_sort(descriptors, direction, mode)?;
        if let Some(sort_fn) = self.sorters.get_sort_fn() {
            self.sort_by(|a, b| sort_fn(a, b));
        }
        Ok(())
    }

    /// Rightmost index at which `value` would be inserted, by `cmp` or the
    /// sorters. Without either, the length.
    pub fn find_insertion_index(&self, value: &V, cmp: Option<&CompareFn<V>>) -> usize {
        let cmp = cmp.cloned().or_else(|| self.sorters.get_sort_fn());
        let values = self.values();
        match cmp {
            Some(cmp) => insertion_point(&values, value, &cmp),
            None => values.len(),
        }
    }

    /// Moves entries by an `old index -> new index` mapping. Entries not
    /// mapped fill the remaining positions in their original relative order.
    /// Emits `sort` once.
    pub fn reorder(&self, mapping: &HashMap<usize, usize>) -> Result<()> {
        {
            let mut state = self.entries.write();
            let len = state.len();
            let mut slots: Vec<Option<usize>> = vec![None; len];
            for (&from, &to) in mapping {
                if from >= len || to >= len {
                    return Err(CollectionError::InvalidMapping(format!(
                        "{from} -> {to} is outside 0..{len}"
                    )));
                }
                if slots[to].replace(from).is_some() {
                    return Err(CollectionError::InvalidMapping(format!(
                        "position {to} is targeted twice"
                    )));
                }
            }

            let mut unmapped = (0..len).filter(|index| !mapping.contains_key(index));
            let order: Vec<usize> = slots
                .into_iter()
                .filter_map(|slot| slot.or_else(|| unmapped.next()))
                .collect();

            state.keys = order.iter().map(|&i| state.keys[i].clone()).collect();
            state.values = order.iter().map(|&i| state.values[i].clone()).collect();
            state.reindex();
        }
        tracing::debug!(target: targets::MIXED, moved = mapping.len(), "entries reordered");
        self.signals.sort.emit(());
        Ok(())
    }
}

impl<K: CollectionKey, V: CollectionItem> Clone for MixedCollection<K, V> {
    /// Copies the entries, key function and sorters. Signal connections are
    /// not carried over.
    fn clone(&self) -> Self {
        self.filter_by(|_, _| true)
    }
}

impl<K: CollectionKey, V: CollectionItem + fmt::Debug> fmt::Debug for MixedCollection<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read();
        f.debug_map()
            .entries(entries.keys.iter().zip(&entries.values))
            .finish()
    }
}

static_assertions::assert_impl_all!(MixedCollection<String, serde_json::Value>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::{Value as Json, json};

    fn abc() -> MixedCollection<String, i64> {
        let collection = MixedCollection::new();
        collection
            .add_all(vec![("a".into(), 3), ("b".into(), 1), ("c".into(), 2)])
            .unwrap();
        collection
    }

    fn check_consistency<V: CollectionItem>(collection: &MixedCollection<String, V>) {
        let keys = collection.keys();
        assert_eq!(keys.len(), collection.values().len());
        for (index, key) in keys.iter().enumerate() {
            assert_eq!(collection.index_of_key(key), Some(index));
        }
    }

    #[test]
    fn test_add_and_lookup() {
        let collection = abc();
        assert_eq!(collection.len(), 3);
        assert_eq!(collection.get(&"b".to_string()), Some(1));
        assert_eq!(collection.get_at(2), Some(2));
        assert_eq!(collection.key_at(0).as_deref(), Some("a"));
        assert_eq!(collection.first(), Some(3));
        assert_eq!(collection.last(), Some(2));
        assert_eq!(collection.get_range(1..5), vec![1, 2]);
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let collection = abc();
        assert!(matches!(
            collection.add("a".into(), 9),
            Err(CollectionError::DuplicateKey { .. })
        ));
        assert!(matches!(
            collection.add_all(vec![("x".into(), 1), ("x".into(), 2)]),
            Err(CollectionError::DuplicateKey { .. })
        ));
        assert!(matches!(
            collection.insert(0, "b".into(), 9),
            Err(CollectionError::DuplicateKey { .. })
        ));
        assert_eq!(collection.len(), 3);
    }

    #[test]
    fn test_insert_reindexes() {
        let collection = abc();
        collection.insert(1, "z".into(), 26).unwrap();
        assert_eq!(collection.keys(), vec!["a", "z", "b", "c"]);
        assert!(collection.insert(9, "y".into(), 0).is_err());
        check_consistency(&collection);
    }

    #[test]
    fn test_sort_by_key_and_value() {
        let collection = abc();
        collection.sort_by_value(SortDirection::Asc);
        assert_eq!(collection.keys(), vec!["b", "c", "a"]);
        collection.sort_by_value(SortDirection::Asc);
        assert_eq!(collection.keys(), vec!["b", "c", "a"]);

        collection.sort_by_key(SortDirection::Asc);
        assert_eq!(collection.keys(), vec!["a", "b", "c"]);
        collection.sort_by_key(SortDirection::Asc);
        assert_eq!(collection.keys(), vec!["a", "b", "c"]);
        assert_eq!(collection.values(), vec![3, 1, 2]);
        check_consistency(&collection);
    }

    #[test]
    fn test_sort_by_key_is_case_insensitive() {
        let collection = MixedCollection::<String, i64>::new();
        for key in ["b", "A", "C", "a"] {
            collection.add(key.into(), 0).unwrap();
        }
        collection.sort_by_key(SortDirection::Asc);
        assert_eq!(collection.keys(), vec!["A", "a", "b", "C"]);

        collection.sort_by_key(SortDirection::Desc);
        assert_eq!(collection.keys(), vec!["C", "b", "A", "a"]);
    }

    #[test]
    fn test_sort_by_is_stable() {
        let collection = MixedCollection::<String, (i64, i64)>::new();
        for (i, group) in [2, 1, 2, 1, 2].into_iter().enumerate() {
            collection.add(format!("k{i}"), (group, i as i64)).unwrap();
        }
        collection.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(collection.keys(), vec!["k1", "k3", "k0", "k2", "k4"]);
    }

    #[test]
    fn test_legacy_sort_property() {
        let collection = abc();
        collection.sort_property(SortProperty::Value, SortDirection::Desc, None);
        assert_eq!(collection.keys(), vec!["a", "c", "b"]);
        collection.sort_property(SortProperty::Key, SortDirection::Asc, None);
        assert_eq!(collection.keys(), vec!["a", "b", "c"]);
        collection.sort_property(SortProperty::Index, SortDirection::Desc, None);
        assert_eq!(collection.keys(), vec!["c", "b", "a"]);

        fn by_parity_then_key(a: &Entry<'_, String, i64>, b: &Entry<'_, String, i64>) -> Ordering {
            (a.value % 2).cmp(&(b.value % 2)).then_with(|| a.key.cmp(b.key))
        }
        collection.sort_property(SortProperty::Value, SortDirection::Asc, Some(&by_parity_then_key));
        assert_eq!(collection.keys(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_sort_with_sorters() {
        let people = MixedCollection::<String, Json>::for_records();
        people.add("x".into(), json!({ "age": 30 })).unwrap();
        people.add("y".into(), json!({ "age": 10 })).unwrap();
        people.add("z".into(), json!({ "age": 20 })).unwrap();

        people.sort(["age"], None, SortMode::Replace).unwrap();
        assert_eq!(people.keys(), vec!["y", "z", "x"]);
        people.sort(["age"], None, SortMode::Replace).unwrap();
        assert_eq!(people.keys(), vec!["x", "z", "y"]);
        assert_eq!(people.find_insertion_index(&json!({ "age": 25 }), None), 1);
    }

    #[test]
    fn test_find_insertion_index() {
        let numbers = MixedCollection::<String, i64>::new();
        for n in [1, 3, 5, 7] {
            numbers.add(n.to_string(), n).unwrap();
        }
        let natural: CompareFn<i64> = Arc::new(|a, b| a.cmp(b));
        assert_eq!(numbers.find_insertion_index(&5, Some(&natural)), 3);
        assert_eq!(numbers.find_insertion_index(&0, Some(&natural)), 0);
        assert_eq!(numbers.find_insertion_index(&8, Some(&natural)), 4);
        assert_eq!(numbers.find_insertion_index(&4, None), 4);
    }

    #[test]
    fn test_reorder() {
        let collection = MixedCollection::<String, i64>::new();
        for (i, key) in ["a", "b", "c", "d"].into_iter().enumerate() {
            collection.add(key.into(), i as i64).unwrap();
        }
        let sorts = Arc::new(Mutex::new(0));
        let counter = sorts.clone();
        collection.signals().sort.connect(move |_| *counter.lock() += 1);

        collection.reorder(&HashMap::from([(3, 0), (0, 2)])).unwrap();
        assert_eq!(collection.keys(), vec!["d", "b", "a", "c"]);
        assert_eq!(*sorts.lock(), 1);
        check_consistency(&collection);

        assert!(matches!(
            collection.reorder(&HashMap::from([(0, 1), (2, 1)])),
            Err(CollectionError::InvalidMapping(_))
        ));
        assert!(matches!(
            collection.reorder(&HashMap::from([(9, 0)])),
            Err(CollectionError::InvalidMapping(_))
        ));
        assert_eq!(collection.keys(), vec!["d", "b", "a", "c"]);
    }

    #[test]
    fn test_remove_and_replace() {
        let collection = abc();
        let events = Arc::new(Mutex::new(Vec::new()));
        let removes = events.clone();
        collection
            .signals()
            .remove
            .connect(move |e| removes.lock().push(format!("remove {} {}", e.index, e.key)));
        let replaces = events.clone();
        collection
            .signals()
            .replace
            .connect(move |e| replaces.lock().push(format!("replace {} {}", e.key, e.new_value)));

        assert_eq!(collection.remove_by_key(&"b".to_string()), Some(1));
        assert_eq!(collection.replace("c".into(), 20), Some(2));
        assert_eq!(collection.replace("d".into(), 4), None);
        assert_eq!(collection.keys(), vec!["a", "c", "d"]);

        let removed = collection.remove_range(1, 5).unwrap();
        assert_eq!(removed, vec![("c".to_string(), 20), ("d".to_string(), 4)]);
        assert!(collection.remove_at(1).is_err());

        assert_eq!(
            *events.lock(),
            vec!["remove 1 b", "replace c 20", "remove 2 d", "remove 1 c"]
        );
        check_consistency(&collection);
    }

    #[test]
    fn test_update_key() {
        let collection = abc();
        collection.update_key(&"b".to_string(), "bb".into()).unwrap();
        assert_eq!(collection.keys(), vec!["a", "bb", "c"]);
        assert_eq!(collection.get(&"bb".to_string()), Some(1));
        assert!(collection.update_key(&"a".to_string(), "c".into()).is_err());
        assert!(collection.update_key(&"zz".to_string(), "y".into()).is_err());
        check_consistency(&collection);
    }

    #[test]
    fn test_key_fn_find_filter_clone() {
        let people = MixedCollection::<i64, Json>::new()
            .with_key_fn(|p: &Json| p["id"].as_i64().unwrap_or(0));
        assert_eq!(people.add_value(json!({ "id": 7, "ok": true })).unwrap(), 7);
        people.add_value(json!({ "id": 8, "ok": false })).unwrap();

        let (key, _) = people.find_by(|_, p| p["ok"] == false).unwrap();
        assert_eq!(key, 8);

        let ok = people.filter_by(|_, p| p["ok"] == true);
        assert_eq!(ok.keys(), vec![7]);
        assert_eq!(ok.add_value(json!({ "id": 9 })).unwrap(), 9);

        let copy = people.clone();
        copy.clear();
        assert_eq!(people.len(), 2);

        let keyless = MixedCollection::<i64, Json>::new();
        assert!(matches!(
            keyless.add_value(json!({})),
            Err(CollectionError::MissingKeyFn)
        ));
    }
}
