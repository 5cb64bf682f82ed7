//! End-to-end behavior of the sorting, grouping and keyed-collection pipeline.

use std::sync::Arc;

use horizon_collections::prelude::*;
use parking_lot::Mutex;
use serde_json::{Value as Json, json};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn member(id: i64, team: &str) -> Json {
    json!({ "id": id, "team": team })
}

fn roster() -> Collection<Json, i64> {
    Collection::for_records(|m: &Json| m["id"].as_i64().unwrap_or(-1))
}

fn team(name: &str) -> GroupKey {
    Some(name.to_string())
}

fn layout(groups: &GroupCollection<Json, i64>) -> Vec<(GroupKey, Vec<i64>)> {
    groups
        .groups()
        .iter()
        .map(|g| (g.key().clone(), g.keys()))
        .collect()
}

#[test]
fn test_readding_primary_sorter_toggles_it() {
    init_tracing();
    let sorters = SorterCollection::<Json>::for_records();

    let added = sorters.add_sort(["name"], None, SortMode::Replace).unwrap();
    assert_eq!(sorters.len(), 1);
    assert_eq!(added[0].property().as_deref(), Some("name"));
    assert_eq!(added[0].direction(), SortDirection::Asc);

    let again = sorters.add_sort(["name"], None, SortMode::Replace).unwrap();
    assert_eq!(sorters.len(), 1);
    assert!(Arc::ptr_eq(&added[0], &again[0]));
    assert_eq!(again[0].direction(), SortDirection::Desc);
}

#[test]
fn test_removing_last_member_drops_group() {
    init_tracing();
    let roster = roster();
    roster.group_by(Some("team")).unwrap();
    roster
        .add_all(vec![member(1, "A"), member(2, "B"), member(3, "A")])
        .unwrap();

    let groups = roster.groups().unwrap();
    assert_eq!(
        layout(&groups),
        vec![(team("A"), vec![1, 3]), (team("B"), vec![2])]
    );

    roster.remove_by_key(&2);
    assert_eq!(groups.len(), 1);
    assert_eq!(layout(&groups), vec![(team("A"), vec![1, 3])]);
}

#[test]
fn test_mixed_collection_sorts_are_deterministic() {
    init_tracing();
    let mixed = MixedCollection::<String, i64>::new();
    mixed.add("a".into(), 3).unwrap();
    mixed.add("b".into(), 1).unwrap();
    mixed.add("c".into(), 2).unwrap();

    mixed.sort_by_value(SortDirection::Asc);
    assert_eq!(mixed.keys(), vec!["b", "c", "a"]);
    mixed.sort_by_value(SortDirection::Asc);
    assert_eq!(mixed.keys(), vec!["b", "c", "a"]);

    mixed.sort_by_key(SortDirection::Asc);
    assert_eq!(mixed.keys(), vec!["a", "b", "c"]);
    mixed.sort_by_key(SortDirection::Asc);
    assert_eq!(mixed.keys(), vec!["a", "b", "c"]);
    assert_eq!(mixed.values(), vec![3, 1, 2]);
}

#[test]
fn test_insertion_index_goes_after_equal_values() {
    init_tracing();
    let mixed = MixedCollection::<String, i64>::new();
    for (key, value) in [("w", 1), ("x", 3), ("y", 5), ("z", 7)] {
        mixed.add(key.into(), value).unwrap();
    }
    let ascending: CompareFn<i64> = Arc::new(|a: &i64, b: &i64| a.cmp(b));

    assert_eq!(mixed.find_insertion_index(&5, Some(&ascending)), 3);
    assert_eq!(mixed.find_insertion_index(&0, Some(&ascending)), 0);
    assert_eq!(mixed.find_insertion_index(&9, Some(&ascending)), 4);
}

#[test]
fn test_group_change_moves_item_without_refresh() {
    init_tracing();
    let roster = roster();
    roster.group_by(Some("team")).unwrap();
    roster
        .add_all(vec![member(1, "A"), member(2, "A"), member(3, "B")])
        .unwrap();
    let groups = roster.groups().unwrap();
    let group_a = groups.get(&team("A")).unwrap();
    let group_b = groups.get(&team("B")).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    group_a
        .collection()
        .signals()
        .remove
        .connect(move |d| sink.lock().push(format!("A remove {:?}", d.keys)));
    let sink = events.clone();
    group_b
        .collection()
        .signals()
        .add
        .connect(move |d| sink.lock().push(format!("B add {:?}", d.keys)));
    let sink = events.clone();
    groups
        .collection()
        .signals()
        .refresh
        .connect(move |_| sink.lock().push("groups refresh".to_string()));
    let sink = events.clone();
    roster
        .signals()
        .refresh
        .connect(move |_| sink.lock().push("source refresh".to_string()));

    roster
        .update_item(&2, &["team"], |m| m["team"] = json!("B"))
        .unwrap();

    assert_eq!(roster.index_of_key(&2), Some(1));
    assert_eq!(
        *events.lock(),
        vec!["A remove [2]".to_string(), "B add [2]".to_string()]
    );
    assert_eq!(group_a.keys(), vec![1]);
    assert!(group_b.contains_key(&2));
    assert_eq!(groups.group_of(&2).unwrap().key(), &team("B"));
}

#[test]
fn test_group_change_empties_and_creates_groups() {
    init_tracing();
    let roster = roster();
    roster.group_by(Some("team")).unwrap();
    roster.add_all(vec![member(1, "A"), member(2, "C")]).unwrap();
    let groups = roster.groups().unwrap();

    roster
        .update_item(&1, &["team"], |m| m["team"] = json!("B"))
        .unwrap();
    assert_eq!(
        layout(&groups),
        vec![(team("B"), vec![1]), (team("C"), vec![2])]
    );
}

#[test]
fn test_batch_emits_one_data_changed() {
    init_tracing();
    let roster = roster();
    let summaries = Arc::new(Mutex::new(Vec::new()));
    let sink = summaries.clone();
    roster
        .signals()
        .data_changed
        .connect(move |summary| sink.lock().push(*summary));

    roster
        .batch(|r| {
            r.add(member(1, "A")).unwrap();
            r.add(member(2, "B")).unwrap();
            r.remove_by_key(&1);
        })
        .unwrap();

    let summaries = summaries.lock();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].added, 2);
    assert_eq!(summaries[0].removed, 1);
}

#[test]
fn test_filtered_view_of_grouped_source() {
    init_tracing();
    let roster = roster();
    roster.group_by(Some("team")).unwrap();
    let view = CollectionView::new(&roster).unwrap();
    view.filters()
        .add(Filter::new("team", Some(FilterOperator::Eq), "A").unwrap())
        .unwrap();

    roster
        .add_all(vec![member(1, "B"), member(2, "A"), member(3, "A")])
        .unwrap();
    assert_eq!(roster.keys(), vec![2, 3, 1]);
    assert_eq!(view.collection().keys(), vec![2, 3]);

    roster
        .update_item(&1, &["team"], |m| m["team"] = json!("A"))
        .unwrap();
    assert_eq!(view.collection().keys(), vec![2, 3, 1]);
    assert_eq!(roster.groups().unwrap().len(), 1);
}

#[test]
fn test_multi_sort_by_descriptors() {
    init_tracing();
    let roster = roster();
    roster
        .add_all(vec![
            json!({ "id": 1, "team": "B", "age": 30 }),
            json!({ "id": 2, "team": "A", "age": 40 }),
            json!({ "id": 3, "team": "A", "age": 20 }),
        ])
        .unwrap();

    roster.sort(["age"], None, SortMode::Replace).unwrap();
    roster.sort(["team"], None, SortMode::Multi).unwrap();
    assert_eq!(roster.keys(), vec![3, 2, 1]);
    assert_eq!(
        roster
            .sorters()
            .items()
            .iter()
            .map(|s| s.property().unwrap_or_default())
            .collect::<Vec<_>>(),
        vec!["team", "age"]
    );

    // New items are merged at their sorted position.
    roster.add(json!({ "id": 4, "team": "A", "age": 25 })).unwrap();
    assert_eq!(roster.keys(), vec![3, 4, 2, 1]);
}
