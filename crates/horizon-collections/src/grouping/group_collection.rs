//! Incrementally maintained partition of a collection into groups.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use horizon_collections_core::logging::targets;
use parking_lot::RwLock;

use super::group::Group;
use super::grouper::{GroupKey, Grouper};
use crate::error::Result;
use crate::observable::{
    AddDetails, Collection, CollectionItem, CollectionKey, CollectionObserver, ItemChangeDetails,
    KeyFn, RemoveDetails, UpdateKeyDetails,
};
use crate::sorting::CompareFn;
use crate::value::FieldReader;

/// Notified before ordinary observers, so groups are current when views and
/// user observers react to the same change.
const GROUP_OBSERVER_PRIORITY: i32 = -100;

type ItemSortFn<T> = Arc<RwLock<Option<CompareFn<T>>>>;

struct Shared<T: CollectionItem, K: CollectionKey> {
    groups: Collection<Arc<Group<T, K>>, GroupKey>,
    grouper: Arc<Grouper<T>>,
    key_fn: KeyFn<T, K>,
    reader: Option<FieldReader<T>>,
    item_sort_fn: ItemSortFn<T>,
    item_group_keys: RwLock<HashMap<K, GroupKey>>,
}

/// The groups of a grouped [`Collection`], ordered by the grouper and then by
/// the source's item order over each group's first item.
///
/// Created by [`Collection::set_grouper`]; it observes the source and keeps
/// every source item in exactly one group. It never mutates the source.
/// Changes caused by one source notification are bracketed in one update on
/// [`collection`](Self::collection).
pub struct GroupCollection<T: CollectionItem, K: CollectionKey> {
    shared: Arc<Shared<T, K>>,
}

impl<T: CollectionItem, K: CollectionKey> Clone for GroupCollection<T, K> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

fn group_order<T: CollectionItem, K: CollectionKey>(
    grouper: Arc<Grouper<T>>,
    item_sort_fn: ItemSortFn<T>,
) -> CompareFn<Arc<Group<T, K>>> {
    Arc::new(move |a: &Arc<Group<T, K>>, b: &Arc<Group<T, K>>| {
        let by_first_item = match (a.first(), b.first()) {
            (Some(x), Some(y)) => {
                let item_sort = item_sort_fn.read().clone();
                grouper
                    .sort(&x, &y)
                    .then_with(|| item_sort.map_or(Ordering::Equal, |cmp| cmp(&x, &y)))
            }
            _ => Ordering::Equal,
        };
        by_first_item.then_with(|| a.key().cmp(b.key()))
    })
}

impl<T: CollectionItem, K: CollectionKey> GroupCollection<T, K> {
    pub(crate) fn new(
        grouper: Arc<Grouper<T>>,
        key_fn: KeyFn<T, K>,
        reader: Option<FieldReader<T>>,
    ) -> Self {
        let item_sort_fn: ItemSortFn<T> = Arc::new(RwLock::new(None));
        let groups = Collection::new(|group: &Arc<Group<T, K>>| group.key().clone());
        groups.set_sort_fn(Some(group_order(grouper.clone(), item_sort_fn.clone())));

        Self {
            shared: Arc::new(Shared {
                groups,
                grouper,
                key_fn,
                reader,
                item_sort_fn,
                item_group_keys: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// The collection of groups. Observe it for group-level changes.
    pub fn collection(&self) -> &Collection<Arc<Group<T, K>>, GroupKey> {
        &self.shared.groups
    }

    /// The grouper that assigns items to groups.
    pub fn grouper(&self) -> &Arc<Grouper<T>> {
        &self.shared.grouper
    }

    /// The groups in order.
    pub fn groups(&self) -> Vec<Arc<Group<T, K>>> {
        self.shared.groups.items()
    }

    /// The group keys in order.
    pub fn keys(&self) -> Vec<GroupKey> {
        self.shared.groups.keys()
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.shared.groups.len()
    }

    /// Whether there are no groups.
    pub fn is_empty(&self) -> bool {
        self.shared.groups.is_empty()
    }

    /// The group with the given key.
    pub fn get(&self, key: &GroupKey) -> Option<Arc<Group<T, K>>> {
        self.shared.groups.get(key)
    }

    /// The group the item with key `item_key` currently belongs to.
    pub fn group_of(&self, item_key: &K) -> Option<Arc<Group<T, K>>> {
        let group_key = self.shared.item_group_keys.read().get(item_key).cloned()?;
        self.get(&group_key)
    }

    fn bracket(&self, f: impl FnOnce()) {
        let _guard = self.shared.groups.update_guard();
        f();
    }

    fn new_group(&self, key: GroupKey) -> Group<T, K> {
        Group::new(
            key,
            self.shared.key_fn.clone(),
            self.shared.reader.clone(),
            self.shared.item_sort_fn.read().clone(),
        )
    }

    /// Buckets items by group key, in first-seen order, and records each
    /// item's group.
    fn partition<'a>(&self, items: impl IntoIterator<Item = (&'a T, &'a K)>) -> Vec<(GroupKey, Vec<T>)> {
        let mut buckets: Vec<(GroupKey, Vec<T>)> = Vec::new();
        let mut positions: HashMap<GroupKey, usize> = HashMap::new();
        let mut item_group_keys = self.shared.item_group_keys.write();

        for (item, key) in items {
            let group_key = self.shared.grouper.group_key(item);
            item_group_keys.insert(key.clone(), group_key.clone());
            match positions.get(&group_key) {
                Some(&pos) => buckets[pos].1.push(item.clone()),
                None => {
                    positions.insert(group_key.clone(), buckets.len());
                    buckets.push((group_key, vec![item.clone()]));
                }
            }
        }
        buckets
    }

    /// Discards every group and partitions the current source items.
    pub(crate) fn rebuild(&self, source: &Collection<T, K>) {
        *self.shared.item_sort_fn.write() = source.item_sort_fn();
        self.shared.item_group_keys.write().clear();

        let items = source.items();
        let keys = source.keys();
        let buckets = self.partition(items.iter().zip(&keys));

        let groups: Result<Vec<Arc<Group<T, K>>>> = buckets
            .into_iter()
            .map(|(key, items)| {
                let group = self.new_group(key);
                group.collection().replace_all(items)?;
                Ok(Arc::new(group))
            })
            .collect();

        let result = groups.and_then(|groups| self.shared.groups.replace_all(groups));
        match result {
            Ok(()) => tracing::debug!(
                target: targets::GROUP,
                groups = self.len(),
                items = items.len(),
                "groups rebuilt"
            ),
            Err(err) => tracing::warn!(target: targets::GROUP, %err, "group rebuild failed"),
        }
    }

    /// Re-inserts a group whose first item may have changed.
    fn reposition(&self, group: &Arc<Group<T, K>>) {
        if let Err(err) = self.shared.groups.replace_item(group.key(), group.clone()) {
            tracing::warn!(target: targets::GROUP, %err, "group reposition failed");
        }
    }

    fn add_to_group(&self, group_key: GroupKey, items: Vec<T>) {
        let result = match self.get(&group_key) {
            Some(group) => {
                let result = group.collection().add_all(items);
                self.reposition(&group);
                result
            }
            None => {
                let group = self.new_group(group_key.clone());
                group
                    .collection()
                    .add_all(items)
                    .and_then(|()| self.shared.groups.add(Arc::new(group)))
            }
        };
        match result {
            Ok(()) => tracing::trace!(target: targets::GROUP, ?group_key, "items grouped"),
            Err(err) => tracing::warn!(target: targets::GROUP, %err, ?group_key, "grouping failed"),
        }
    }

    fn remove_from_group(&self, group_key: &GroupKey, item_keys: &[K]) {
        let Some(group) = self.get(group_key) else {
            return;
        };
        group.collection().remove_keys(item_keys);
        if group.is_empty() {
            self.shared.groups.remove_by_key(group_key);
            tracing::trace!(target: targets::GROUP, ?group_key, "empty group removed");
        } else {
            self.reposition(&group);
        }
    }
}

impl<T: CollectionItem, K: CollectionKey> CollectionObserver<T, K> for GroupCollection<T, K> {
    fn observer_priority(&self) -> i32 {
        GROUP_OBSERVER_PRIORITY
    }

    fn on_collection_begin_update(&self, _source: &Collection<T, K>) {
        self.shared.groups.begin_update();
    }

    fn on_collection_end_update(&self, _source: &Collection<T, K>) {
        if let Err(err) = self.shared.groups.end_update() {
            tracing::warn!(target: targets::GROUP, %err, "unbalanced group update");
        }
    }

    fn on_collection_update_abandoned(&self, _source: &Collection<T, K>) {
        self.shared.groups.abandon_update();
    }

    fn on_collection_add(&self, _source: &Collection<T, K>, details: &AddDetails<T, K>) {
        self.bracket(|| {
            for (group_key, items) in self.partition(details.items.iter().zip(&details.keys)) {
                self.add_to_group(group_key, items);
            }
        });
    }

    fn on_collection_remove(&self, _source: &Collection<T, K>, details: &RemoveDetails<T, K>) {
        let mut by_group: Vec<(GroupKey, Vec<K>)> = Vec::new();
        {
            let mut item_group_keys = self.shared.item_group_keys.write();
            for key in &details.keys {
                let Some(group_key) = item_group_keys.remove(key) else {
                    continue;
                };
                match by_group.iter_mut().find(|(existing, _)| *existing == group_key) {
                    Some((_, keys)) => keys.push(key.clone()),
                    None => by_group.push((group_key, vec![key.clone()])),
                }
            }
        }

        self.bracket(|| {
            for (group_key, keys) in &by_group {
                self.remove_from_group(group_key, keys);
            }
        });
    }

    fn on_collection_update_key(
        &self,
        _source: &Collection<T, K>,
        details: &UpdateKeyDetails<T, K>,
    ) {
        let group_key = {
            let mut item_group_keys = self.shared.item_group_keys.write();
            let Some(group_key) = item_group_keys.remove(&details.old_key) else {
                return;
            };
            item_group_keys.insert(details.new_key.clone(), group_key.clone());
            group_key
        };

        if let Some(group) = self.get(&group_key) {
            self.bracket(|| {
                if let Err(err) = group
                    .collection()
                    .replace_item(&details.old_key, details.item.clone())
                {
                    tracing::warn!(target: targets::GROUP, %err, "group key update failed");
                }
            });
        }
    }

    fn on_collection_item_change(
        &self,
        _source: &Collection<T, K>,
        details: &ItemChangeDetails<T, K>,
    ) {
        // Moves were already delivered as a remove and an add.
        if details.index_changed {
            return;
        }

        let new_group_key = self.shared.grouper.group_key(&details.item);
        let Some(old_group_key) = self.shared.item_group_keys.read().get(&details.key).cloned()
        else {
            return;
        };

        self.bracket(|| {
            if old_group_key == new_group_key {
                if let Some(group) = self.get(&old_group_key) {
                    if let Err(err) = group
                        .collection()
                        .replace_item(&details.key, details.item.clone())
                    {
                        tracing::warn!(target: targets::GROUP, %err, "group item update failed");
                    }
                    self.reposition(&group);
                }
                return;
            }

            tracing::trace!(
                target: targets::GROUP,
                from = ?old_group_key,
                to = ?new_group_key,
                "item changed group"
            );
            self.remove_from_group(&old_group_key, std::slice::from_ref(&details.key));
            self.shared
                .item_group_keys
                .write()
                .insert(details.key.clone(), new_group_key.clone());
            self.add_to_group(new_group_key, vec![details.item.clone()]);
        });
    }

    fn on_collection_refresh(&self, source: &Collection<T, K>) {
        self.rebuild(source);
    }

    fn on_collection_sort(&self, source: &Collection<T, K>, _sort_fn: Option<&CompareFn<T>>) {
        let item_sort_fn = source.item_sort_fn();
        *self.shared.item_sort_fn.write() = item_sort_fn.clone();

        self.bracket(|| {
            for group in self.groups() {
                group.collection().set_sort_fn(item_sort_fn.clone());
            }
            self.shared.groups.resort();
        });
        tracing::debug!(target: targets::GROUP, groups = self.len(), "groups re-sorted");
    }
}

impl<T: CollectionItem + fmt::Debug, K: CollectionKey> fmt::Debug for GroupCollection<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupCollection")
            .field("grouper", &self.shared.grouper)
            .field("groups", &self.groups())
            .finish()
    }
}

static_assertions::assert_impl_all!(GroupCollection<serde_json::Value, i64>: Send, Sync, Clone);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sorting::SortDirection;
    use parking_lot::Mutex;
    use serde_json::{Value as Json, json};

    fn member(id: i64, team: &str) -> Json {
        json!({ "id": id, "team": team })
    }

    fn roster() -> Collection<Json, i64> {
        let roster = Collection::for_records(|m: &Json| m["id"].as_i64().unwrap_or(-1));
        roster.group_by(Some("team")).unwrap();
        roster
    }

    fn layout(groups: &GroupCollection<Json, i64>) -> Vec<(GroupKey, Vec<i64>)> {
        groups
            .groups()
            .iter()
            .map(|g| (g.key().clone(), g.keys()))
            .collect()
    }

    fn key(name: &str) -> GroupKey {
        Some(name.to_string())
    }

    #[test]
    fn test_add_partitions_items() {
        let roster = roster();
        roster
            .add_all(vec![member(1, "A"), member(2, "B"), member(3, "A")])
            .unwrap();
        let groups = roster.groups().unwrap();
        assert_eq!(
            layout(&groups),
            vec![(key("A"), vec![1, 3]), (key("B"), vec![2])]
        );
        assert_eq!(groups.group_of(&3).unwrap().key(), &key("A"));
    }

    #[test]
    fn test_remove_drops_empty_group() {
        let roster = roster();
        roster
            .add_all(vec![member(1, "A"), member(2, "B"), member(3, "A")])
            .unwrap();
        roster.remove_by_key(&2);
        let groups = roster.groups().unwrap();
        assert_eq!(layout(&groups), vec![(key("A"), vec![1, 3])]);
        assert!(groups.group_of(&2).is_none());
    }

    #[test]
    fn test_item_change_moves_between_groups() {
        let roster = roster();
        roster.add_all(vec![member(1, "A"), member(2, "C")]).unwrap();
        let groups = roster.groups().unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let add_events = events.clone();
        groups
            .collection()
            .signals()
            .add
            .connect(move |d| add_events.lock().push(format!("add {:?}", d.keys)));
        let remove_events = events.clone();
        groups
            .collection()
            .signals()
            .remove
            .connect(move |d| remove_events.lock().push(format!("remove {:?}", d.keys)));
        let refresh_events = events.clone();
        groups
            .collection()
            .signals()
            .refresh
            .connect(move |_| refresh_events.lock().push("refresh".to_string()));

        roster
            .update_item(&1, &["team"], |m| m["team"] = json!("B"))
            .unwrap();
        assert_eq!(roster.index_of_key(&1), Some(0));
        assert_eq!(
            layout(&groups),
            vec![(key("B"), vec![1]), (key("C"), vec![2])]
        );
        assert_eq!(
            *events.lock(),
            vec![
                format!("remove {:?}", vec![key("A")]),
                format!("add {:?}", vec![key("B")]),
            ]
        );
    }

    #[test]
    fn test_null_and_blank_groups_are_distinct() {
        let roster = roster();
        roster
            .add_all(vec![
                json!({ "id": 1, "team": "" }),
                json!({ "id": 2 }),
                json!({ "id": 3, "team": 0 }),
            ])
            .unwrap();
        let groups = roster.groups().unwrap();
        let mut keys = groups.keys();
        keys.sort();
        assert_eq!(keys, vec![None, key(""), key("0")]);
    }

    #[test]
    fn test_group_order_follows_grouper_direction() {
        let roster = roster();
        roster
            .add_all(vec![member(1, "B"), member(2, "A"), member(3, "C")])
            .unwrap();
        let groups = roster.groups().unwrap();
        assert_eq!(groups.keys(), vec![key("A"), key("B"), key("C")]);

        roster.grouper().unwrap().set_direction(SortDirection::Desc);
        roster.resort();
        assert_eq!(groups.keys(), vec![key("C"), key("B"), key("A")]);
        assert_eq!(roster.keys(), vec![3, 1, 2]);
    }

    #[test]
    fn test_source_sort_reorders_within_groups() {
        let roster = roster();
        roster
            .add_all(vec![
                json!({ "id": 1, "team": "A", "age": 30 }),
                json!({ "id": 2, "team": "A", "age": 20 }),
                json!({ "id": 3, "team": "B", "age": 10 }),
            ])
            .unwrap();
        let groups = roster.groups().unwrap();

        roster.sort_by("age", None).unwrap();
        assert_eq!(
            layout(&groups),
            vec![(key("A"), vec![2, 1]), (key("B"), vec![3])]
        );

        roster.sort_by("age", None).unwrap();
        assert_eq!(
            layout(&groups),
            vec![(key("A"), vec![1, 2]), (key("B"), vec![3])]
        );
    }

    #[test]
    fn test_refresh_rebuilds() {
        let roster = roster();
        roster.add_all(vec![member(1, "A")]).unwrap();
        roster
            .replace_all(vec![member(5, "X"), member(6, "Y"), member(7, "X")])
            .unwrap();
        let groups = roster.groups().unwrap();
        assert_eq!(
            layout(&groups),
            vec![(key("X"), vec![5, 7]), (key("Y"), vec![6])]
        );
        roster.clear();
        assert!(groups.is_empty());
    }

    #[test]
    fn test_key_change_keeps_group() {
        let roster = roster();
        roster.add_all(vec![member(1, "A"), member(2, "A")]).unwrap();
        roster
            .update_item(&1, &["id"], |m| m["id"] = json!(10))
            .unwrap();
        let groups = roster.groups().unwrap();
        let group = groups.get(&key("A")).unwrap();
        assert!(group.contains_key(&10));
        assert!(!group.contains_key(&1));
        assert_eq!(groups.group_of(&10).unwrap().key(), &key("A"));
    }

    #[test]
    fn test_one_bracket_per_source_event() {
        let roster = roster();
        let groups = roster.groups().unwrap();
        let brackets = Arc::new(Mutex::new(0));
        let counter = brackets.clone();
        groups
            .collection()
            .signals()
            .begin_update
            .connect(move |_| *counter.lock() += 1);

        roster
            .add_all(vec![member(1, "A"), member(2, "B"), member(3, "C")])
            .unwrap();
        assert_eq!(*brackets.lock(), 1);
    }

    #[test]
    fn test_ungrouping() {
        let roster = roster();
        roster.add(member(1, "A")).unwrap();
        roster.group_by(None).unwrap();
        assert!(roster.groups().is_none());
        assert_eq!(roster.observer_count(), 0);
    }
}
