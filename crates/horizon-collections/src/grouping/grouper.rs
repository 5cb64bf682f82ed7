//! Group key derivation and group ordering.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::sorting::{CompareFn, SerializedSorter, SortDirection, Sorter, SorterState};
use crate::value::{FieldReader, Record, Value, record_reader};

/// Key of a group. `None` is the group of items whose group value is null
/// or missing; it is distinct from the empty-string group.
pub type GroupKey = Option<String>;

/// Closure computing an item's group value.
pub type GroupFn<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;

struct GroupSpec<T> {
    property: String,
    root: Option<String>,
    reader: Option<FieldReader<T>>,
    group_fn: Option<GroupFn<T>>,
    sort_fn: Option<CompareFn<T>>,
}

impl<T> Clone for GroupSpec<T> {
    fn clone(&self) -> Self {
        Self {
            property: self.property.clone(),
            root: self.root.clone(),
            reader: self.reader.clone(),
            group_fn: self.group_fn.clone(),
            sort_fn: self.sort_fn.clone(),
        }
    }
}

impl<T> GroupSpec<T> {
    fn value(&self, item: &T) -> Value {
        if let Some(group_fn) = &self.group_fn {
            return group_fn(item);
        }
        match &self.reader {
            Some(reader) => reader(item, self.root.as_deref(), &self.property),
            None => Value::Null,
        }
    }
}

/// A sorter that also assigns each item to a group.
///
/// Items are grouped by the string form of their group value (a property
/// read through the field reader, or a custom closure). The embedded
/// [`Sorter`] orders items by that same value unless a custom comparator is
/// installed with [`with_sorter_fn`](Self::with_sorter_fn).
///
/// ```
/// use horizon_collections::grouping::Grouper;
/// use serde_json::json;
///
/// let grouper = Grouper::<serde_json::Value>::new("team");
/// assert_eq!(grouper.group_key(&json!({ "team": "A" })), Some("A".to_string()));
/// assert_eq!(grouper.group_key(&json!({})), None);
/// ```
pub struct Grouper<T> {
    spec: Arc<GroupSpec<T>>,
    sorter: Sorter<T>,
}

impl<T: Record + 'static> Grouper<T> {
    /// Groups by `property`, read through [`Record`].
    pub fn new(property: impl Into<String>) -> Self {
        Self::with_reader(property, record_reader::<T>())
    }
}

impl<T: 'static> Grouper<T> {
    /// Groups by `property`, read through `reader`.
    pub fn with_reader(property: impl Into<String>, reader: FieldReader<T>) -> Self {
        let property = property.into();
        let sorter = Sorter::from_fn(|_: &T, _: &T| Ordering::Equal).with_id(property.clone());
        Self::install(
            GroupSpec {
                property,
                root: None,
                reader: Some(reader),
                group_fn: None,
                sort_fn: None,
            },
            sorter,
        )
    }

    /// Groups by the value `group_fn` computes.
    pub fn from_fn<F>(group_fn: F) -> Self
    where
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        let sorter = Sorter::from_fn(|_: &T, _: &T| Ordering::Equal);
        Self::install(
            GroupSpec {
                property: String::new(),
                root: None,
                reader: None,
                group_fn: Some(Arc::new(group_fn)),
                sort_fn: None,
            },
            sorter,
        )
    }

    fn install(spec: GroupSpec<T>, sorter: Sorter<T>) -> Self {
        let spec = Arc::new(spec);
        match &spec.sort_fn {
            Some(sort_fn) => {
                let sort_fn = sort_fn.clone();
                sorter.set_sorter_fn(move |a, b| sort_fn(a, b));
            }
            None => {
                let compare_spec = spec.clone();
                sorter.set_sorter_fn(move |a, b| {
                    compare_spec.value(a).compare(&compare_spec.value(b))
                });
            }
        }
        Self { spec, sorter }
    }

    fn rebuild(self, update: impl FnOnce(&mut GroupSpec<T>)) -> Self {
        let mut spec = (*self.spec).clone();
        update(&mut spec);
        Self::install(spec, self.sorter)
    }

    /// Reads the property under `root`.
    pub fn with_root(self, root: impl Into<String>) -> Self {
        let root = root.into();
        self.rebuild(|spec| spec.root = Some(root))
    }

    /// Orders groups by `compare` instead of by group value.
    pub fn with_sorter_fn<F>(self, compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        let compare: CompareFn<T> = Arc::new(compare);
        self.rebuild(|spec| spec.sort_fn = Some(compare))
    }

    /// Sets the initial direction.
    pub fn with_direction(self, direction: SortDirection) -> Self {
        self.sorter.set_direction(direction);
        self
    }

    /// Sets the id.
    pub fn with_id(self, id: impl Into<String>) -> Self {
        Self {
            sorter: self.sorter.with_id(id),
            spec: self.spec,
        }
    }

    pub fn id(&self) -> &str {
        self.sorter.id()
    }

    /// Grouped property; empty for closure groupers.
    pub fn property(&self) -> &str {
        &self.spec.property
    }

    pub fn root(&self) -> Option<&str> {
        self.spec.root.as_deref()
    }

    pub fn direction(&self) -> SortDirection {
        self.sorter.direction()
    }

    pub fn set_direction(&self, direction: SortDirection) {
        self.sorter.set_direction(direction);
    }

    pub fn toggle(&self) {
        self.sorter.toggle();
    }

    /// The embedded sorter.
    pub fn sorter(&self) -> &Sorter<T> {
        &self.sorter
    }

    /// Raw group value of `item`.
    pub fn group_value(&self, item: &T) -> Value {
        self.spec.value(item)
    }

    /// Key of the group `item` belongs to.
    pub fn group_key(&self, item: &T) -> GroupKey {
        self.group_value(item).to_group_string()
    }

    /// Compares two items by group, honouring the direction.
    pub fn sort(&self, a: &T, b: &T) -> Ordering {
        self.sorter.sort(a, b)
    }

    pub fn get_state(&self) -> SorterState {
        SorterState {
            root: self.spec.root.clone(),
            property: (!self.spec.property.is_empty()).then(|| self.spec.property.clone()),
            direction: self.direction(),
        }
    }

    /// Remote-sort shape `{property, direction}`.
    pub fn serialize(&self) -> SerializedSorter {
        let state = self.get_state();
        SerializedSorter {
            property: state.property,
            direction: state.direction,
        }
    }
}

impl<T: 'static> fmt::Debug for Grouper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grouper")
            .field("id", &self.id())
            .field("property", &self.spec.property)
            .field("root", &self.spec.root)
            .field("direction", &self.direction())
            .finish()
    }
}

static_assertions::assert_impl_all!(Grouper<serde_json::Value>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value as Json, json};

    #[test]
    fn test_group_keys() {
        let grouper = Grouper::<Json>::new("team");
        assert_eq!(grouper.group_key(&json!({ "team": "A" })), Some("A".into()));
        assert_eq!(grouper.group_key(&json!({ "team": "" })), Some(String::new()));
        assert_eq!(grouper.group_key(&json!({ "team": 0 })), Some("0".into()));
        assert_eq!(grouper.group_key(&json!({ "team": null })), None);
        assert_eq!(grouper.group_key(&json!({})), None);
    }

    #[test]
    fn test_sort_by_group_value_and_direction() {
        let grouper = Grouper::<Json>::new("team");
        let a = json!({ "team": "A" });
        let b = json!({ "team": "B" });
        assert_eq!(grouper.sort(&a, &b), Ordering::Less);

        grouper.toggle();
        assert_eq!(grouper.direction(), SortDirection::Desc);
        assert_eq!(grouper.sort(&a, &b), Ordering::Greater);
    }

    #[test]
    fn test_root_and_closure_groupers() {
        let grouper = Grouper::<Json>::new("team").with_root("data");
        assert_eq!(
            grouper.group_key(&json!({ "data": { "team": "X" } })),
            Some("X".into())
        );
        assert_eq!(grouper.root(), Some("data"));

        let by_parity = Grouper::<i64>::from_fn(|n| Value::from(n % 2 == 0));
        assert_eq!(by_parity.group_key(&4), Some("true".into()));
        assert_eq!(by_parity.sort(&3, &4), Ordering::Less);
        assert!(by_parity.get_state().property.is_none());
    }

    #[test]
    fn test_custom_group_order() {
        let grouper = Grouper::<Json>::new("team")
            .with_sorter_fn(|a: &Json, b: &Json| b["rank"].as_i64().cmp(&a["rank"].as_i64()));
        let low = json!({ "team": "A", "rank": 1 });
        let high = json!({ "team": "B", "rank": 2 });
        assert_eq!(grouper.sort(&high, &low), Ordering::Less);
    }

    #[test]
    fn test_serialize() {
        let grouper = Grouper::<Json>::new("team").with_direction(SortDirection::Desc);
        let wire = serde_json::to_value(grouper.serialize()).unwrap();
        assert_eq!(wire, json!({ "property": "team", "direction": "DESC" }));
        assert_eq!(grouper.id(), "team");
    }
}
