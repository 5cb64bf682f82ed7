//! A single group of items.

use std::fmt;

use super::grouper::GroupKey;
use crate::observable::{Collection, CollectionItem, CollectionKey, KeyFn};
use crate::sorting::CompareFn;
use crate::value::FieldReader;

/// The items sharing one group key, kept in the source's item order.
///
/// Groups are created and dropped by their
/// [`GroupCollection`](super::GroupCollection); a group is never empty while
/// it is part of one.
pub struct Group<T: CollectionItem, K: CollectionKey> {
    key: GroupKey,
    items: Collection<T, K>,
}

impl<T: CollectionItem, K: CollectionKey> Group<T, K> {
    pub(crate) fn new(
        key: GroupKey,
        key_fn: KeyFn<T, K>,
        reader: Option<FieldReader<T>>,
        sort_fn: Option<CompareFn<T>>,
    ) -> Self {
        let items = Collection::from_parts(key_fn, reader);
        if sort_fn.is_some() {
            items.set_sort_fn(sort_fn);
        }
        Self { key, items }
    }

    /// The group key.
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    /// The group's own collection. Observe it for per-group changes.
    pub fn collection(&self) -> &Collection<T, K> {
        &self.items
    }

    /// The group's items in order.
    pub fn items(&self) -> Vec<T> {
        self.items.items()
    }

    /// The item keys in order.
    pub fn keys(&self) -> Vec<K> {
        self.items.keys()
    }

    /// Number of items in the group.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the group has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The first item in group order.
    pub fn first(&self) -> Option<T> {
        self.items.first()
    }

    /// Whether an item with `key` is in the group.
    pub fn contains_key(&self, key: &K) -> bool {
        self.items.contains_key(key)
    }
}

impl<T: CollectionItem + fmt::Debug, K: CollectionKey> fmt::Debug for Group<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("key", &self.key)
            .field("items", &self.items.items())
            .finish()
    }
}
