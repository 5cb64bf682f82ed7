//! An ordered, observable set of sorters.
//!
//! The first sorter is the primary criterion; later sorters only break ties.
//! The combined comparator is memoized and rebuilt after every structural
//! change. Every change, including a plain re-sort request, emits the
//! [`SorterCollection::sort`] signal so owners can re-order their items.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use horizon_collections_core::Signal;
use horizon_collections_core::logging::targets;
use parking_lot::RwLock;

use super::sorter::{CompareFn, SerializedSorter, SortDirection, Sorter, SorterConfig};
use crate::error::{CollectionError, Result};
use crate::options::SortOptions;
use crate::value::{FieldReader, Record, record_reader};

/// Anything that can be turned into a [`Sorter`].
pub enum SorterDescriptor<T> {
    /// Sort by a property name.
    Property(String),
    /// Sort with a comparison closure.
    Function(CompareFn<T>),
    /// Sort by a deserialized config.
    Config(SorterConfig),
    /// Reuse an existing sorter.
    Sorter(Arc<Sorter<T>>),
}

impl<T> SorterDescriptor<T> {
    /// Wraps a comparison closure.
    pub fn function<F>(compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        SorterDescriptor::Function(Arc::new(compare))
    }
}

impl<T> From<&str> for SorterDescriptor<T> {
    fn from(property: &str) -> Self {
        SorterDescriptor::Property(property.to_string())
    }
}

impl<T> From<String> for SorterDescriptor<T> {
    fn from(property: String) -> Self {
        SorterDescriptor::Property(property)
    }
}

impl<T> From<SorterConfig> for SorterDescriptor<T> {
    fn from(config: SorterConfig) -> Self {
        SorterDescriptor::Config(config)
    }
}

impl<T> From<Arc<Sorter<T>>> for SorterDescriptor<T> {
    fn from(sorter: Arc<Sorter<T>>) -> Self {
        SorterDescriptor::Sorter(sorter)
    }
}

impl<T> From<Sorter<T>> for SorterDescriptor<T> {
    fn from(sorter: Sorter<T>) -> Self {
        SorterDescriptor::Sorter(Arc::new(sorter))
    }
}

impl<T: 'static> fmt::Debug for SorterDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SorterDescriptor::Property(p) => f.debug_tuple("Property").field(p).finish(),
            SorterDescriptor::Function(_) => f.write_str("Function(..)"),
            SorterDescriptor::Config(c) => f.debug_tuple("Config").field(c).finish(),
            SorterDescriptor::Sorter(s) => f.debug_tuple("Sorter").field(&s.id()).finish(),
        }
    }
}

/// Where [`SorterCollection::add_sort`] places new sorters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortMode {
    /// Discard the current sorters.
    #[default]
    Replace,
    /// Add after the current sorters.
    Append,
    /// Add before the current sorters.
    Prepend,
    /// Add before the current sorters, then drop sorters past the
    /// multi-sort limit.
    Multi,
}

impl FromStr for SortMode {
    type Err = CollectionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "replace" => Ok(SortMode::Replace),
            "append" => Ok(SortMode::Append),
            "prepend" => Ok(SortMode::Prepend),
            "multi" => Ok(SortMode::Multi),
            other => Err(CollectionError::UnknownSortMode(other.to_string())),
        }
    }
}

/// An ordered set of sorters combined into one comparator.
///
/// # Example
///
/// ```
/// use horizon_collections::sorting::{SortDirection, SortMode, SorterCollection};
///
/// let sorters = SorterCollection::<serde_json::Value>::for_records();
/// sorters.add_sort(["name"], None, SortMode::Replace).unwrap();
/// assert_eq!(sorters.get_at(0).unwrap().direction(), SortDirection::Asc);
///
/// // Re-adding the primary sorter toggles it.
/// sorters.add_sort(["name"], None, SortMode::Replace).unwrap();
/// assert_eq!(sorters.len(), 1);
/// assert_eq!(sorters.get_at(0).unwrap().direction(), SortDirection::Desc);
/// ```
pub struct SorterCollection<T> {
    sorters: RwLock<Vec<Arc<Sorter<T>>>>,
    /// Memoized combined comparator. Cleared while `sorters` is write-locked.
    sort_fn: RwLock<Option<CompareFn<T>>>,
    reader: Option<FieldReader<T>>,
    options: RwLock<SortOptions>,
    generation: AtomicU64,
    /// Emitted after every change with the sorters now in effect.
    pub sort: Signal<Vec<Arc<Sorter<T>>>>,
}

impl<T: Record + 'static> SorterCollection<T> {
    /// Creates an empty set that reads properties through [`Record`].
    pub fn for_records() -> Self {
        Self::with_reader(Some(record_reader::<T>()))
    }
}

impl<T: 'static> Default for SorterCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> SorterCollection<T> {
    /// Creates an empty set without a field reader. Only closure and
    /// pre-built sorters can be added.
    pub fn new() -> Self {
        Self::with_reader(None)
    }

    /// Creates an empty set using `reader` for property sorters.
    pub fn with_reader(reader: Option<FieldReader<T>>) -> Self {
        Self {
            sorters: RwLock::new(Vec::new()),
            sort_fn: RwLock::new(None),
            reader,
            options: RwLock::new(SortOptions::default()),
            generation: AtomicU64::new(0),
            sort: Signal::new(),
        }
    }

    /// Replaces the options (builder form).
    pub fn with_options(self, options: SortOptions) -> Self {
        *self.options.write() = options;
        self
    }

    /// Current options.
    pub fn options(&self) -> SortOptions {
        self.options.read().clone()
    }

    /// Replaces the options. Existing sorters keep their root.
    pub fn set_options(&self, options: SortOptions) {
        *self.options.write() = options;
    }

    /// The field reader used for property sorters.
    pub fn field_reader(&self) -> Option<FieldReader<T>> {
        self.reader.clone()
    }

    /// Counter bumped on every structural change.
    pub fn generation(&self) -> u64 {
        self.generation.load(AtomicOrdering::SeqCst)
    }

    /// Number of sorters.
    pub fn len(&self) -> usize {
        self.sorters.read().len()
    }

    /// Whether there are no sorters.
    pub fn is_empty(&self) -> bool {
        self.sorters.read().is_empty()
    }

    /// Snapshot of the sorters in priority order.
    pub fn items(&self) -> Vec<Arc<Sorter<T>>> {
        self.sorters.read().clone()
    }

    /// Sorter at `index`.
    pub fn get_at(&self, index: usize) -> Option<Arc<Sorter<T>>> {
        self.sorters.read().get(index).cloned()
    }

    /// Sorter with the given id.
    pub fn get(&self, id: &str) -> Option<Arc<Sorter<T>>> {
        self.sorters.read().iter().find(|s| s.id() == id).cloned()
    }

    /// First sorter on `property`.
    pub fn get_by_property(&self, property: &str) -> Option<Arc<Sorter<T>>> {
        self.sorters
            .read()
            .iter()
            .find(|s| s.property().as_deref() == Some(property))
            .cloned()
    }

    /// Adds sorters.
    ///
    /// `direction` applies to property and closure descriptors (configs
    /// carrying their own direction keep it; existing sorters are reused as
    /// they are). An empty descriptor list changes nothing but still emits the
    /// sort signal.
    ///
    /// A single property name that matches an existing sorter reuses that
    /// sorter: an explicit `direction` is applied to it, and with no direction
    /// it is toggled if it ends up as the primary sorter.
    ///
    /// All descriptors are validated before anything changes.
    #[tracing::instrument(skip_all, target = "horizon_collections::sorter", level = "debug")]
    pub fn add_sort<I, D>(
        &self,
        descriptors: I,
        direction: Option<SortDirection>,
        mode: SortMode,
    ) -> Result<Vec<Arc<Sorter<T>>>>
    where
        I: IntoIterator<Item = D>,
        D: Into<SorterDescriptor<T>>,
    {
        let descriptors: Vec<SorterDescriptor<T>> =
            descriptors.into_iter().map(Into::into).collect();
        if descriptors.is_empty() {
            self.resort();
            return Ok(Vec::new());
        }

        let options = self.options();
        let decoded = match self.reuse_existing(&descriptors, direction, mode) {
            Some(existing) => vec![existing],
            None => descriptors
                .into_iter()
                .map(|d| self.decode(d, direction, &options))
                .collect::<Result<Vec<_>>>()?,
        };

        if let Some(root) = options.root_property() {
            for sorter in &decoded {
                sorter.fill_root(root);
            }
        }

        self.mutate(|current| {
            let mut seen = HashSet::new();
            let incoming: Vec<_> = decoded
                .iter()
                .filter(|s| seen.insert(s.id().to_string()))
                .cloned()
                .collect();
            current.retain(|s| !seen.contains(s.id()));

            match mode {
                SortMode::Replace => *current = incoming,
                SortMode::Append => current.extend(incoming),
                SortMode::Prepend => {
                    current.splice(0..0, incoming);
                }
                SortMode::Multi => {
                    current.splice(0..0, incoming);
                    current.truncate(options.multi_sort_limit());
                }
            }
        });

        tracing::debug!(
            target: targets::SORTER,
            added = decoded.len(),
            ?mode,
            total = self.len(),
            "sorters added"
        );
        Ok(decoded)
    }

    /// Requests a re-sort with the current sorters.
    pub fn resort(&self) {
        tracing::trace!(target: targets::SORTER, "re-sort requested");
        self.sort.emit(self.items());
    }

    /// Finds the existing sorter a lone property name refers to, adjusting its
    /// direction.
    fn reuse_existing(
        &self,
        descriptors: &[SorterDescriptor<T>],
        direction: Option<SortDirection>,
        mode: SortMode,
    ) -> Option<Arc<Sorter<T>>> {
        let [SorterDescriptor::Property(property)] = descriptors else {
            return None;
        };
        let existing = self.get_by_property(property)?;

        match direction {
            Some(direction) => existing.set_direction(direction),
            None => {
                let primary_after = match mode {
                    SortMode::Append => self
                        .sorters
                        .read()
                        .iter()
                        .all(|s| Arc::ptr_eq(s, &existing)),
                    _ => true,
                };
                if primary_after {
                    existing.toggle();
                }
            }
        }
        Some(existing)
    }

    fn decode(
        &self,
        descriptor: SorterDescriptor<T>,
        direction: Option<SortDirection>,
        options: &SortOptions,
    ) -> Result<Arc<Sorter<T>>> {
        let direction = direction.unwrap_or(options.default_direction());
        let sorter = match descriptor {
            SorterDescriptor::Sorter(sorter) => return Ok(sorter),
            SorterDescriptor::Property(property) => {
                if property.is_empty() {
                    return Err(CollectionError::InvalidSorter(
                        "sorter property must not be empty".to_string(),
                    ));
                }
                let reader = self
                    .reader
                    .clone()
                    .ok_or_else(|| CollectionError::missing_reader(property.as_str()))?;
                Sorter::with_reader(property, reader).with_direction(direction)
            }
            SorterDescriptor::Function(compare) => {
                Sorter::from_compare_fn(compare).with_direction(direction)
            }
            SorterDescriptor::Config(config) => {
                Sorter::from_config(&config, self.reader.clone(), direction)?
            }
        };
        Ok(Arc::new(sorter))
    }

    /// Removes the sorter with the given id.
    pub fn remove(&self, id: &str) -> Option<Arc<Sorter<T>>> {
        let mut removed = None;
        self.mutate(|current| {
            if let Some(pos) = current.iter().position(|s| s.id() == id) {
                removed = Some(current.remove(pos));
            }
        });
        removed
    }

    /// Removes every sorter.
    pub fn clear(&self) {
        self.mutate(Vec::clear);
    }

    /// Applies a structural change, invalidates the memo and notifies.
    fn mutate(&self, f: impl FnOnce(&mut Vec<Arc<Sorter<T>>>)) {
        let snapshot = {
            let mut sorters = self.sorters.write();
            f(&mut sorters);
            *self.sort_fn.write() = None;
            self.generation.fetch_add(1, AtomicOrdering::SeqCst);
            sorters.clone()
        };
        self.sort.emit(snapshot);
    }

    /// The combined comparator, or `None` when there are no sorters.
    pub fn get_sort_fn(&self) -> Option<CompareFn<T>> {
        if let Some(sort_fn) = self.sort_fn.read().clone() {
            return Some(sort_fn);
        }
        let sorters = self.sorters.read();
        if sorters.is_empty() {
            return None;
        }
        let sort_fn = combine(sorters.clone(), None);
        *self.sort_fn.write() = Some(sort_fn.clone());
        Some(sort_fn)
    }

    /// Builds a comparator chaining the current sorters, then `next`.
    ///
    /// The result captures the current sorter list; later structural changes
    /// do not affect it, but direction changes on the sorters themselves do.
    pub fn create_comparator(&self, next: Option<CompareFn<T>>) -> CompareFn<T> {
        combine(self.items(), next)
    }

    /// Remote-sort shape of every sorter, in priority order.
    pub fn serialize(&self) -> Vec<SerializedSorter> {
        self.sorters.read().iter().map(|s| s.serialize()).collect()
    }
}

fn combine<T: 'static>(sorters: Vec<Arc<Sorter<T>>>, next: Option<CompareFn<T>>) -> CompareFn<T> {
    Arc::new(move |a: &T, b: &T| {
        sorters
            .iter()
            .map(|s| s.sort(a, b))
            .find(|o| o.is_ne())
            .or_else(|| next.as_ref().map(|next| next(a, b)))
            .unwrap_or(Ordering::Equal)
    })
}

impl<T: 'static> fmt::Debug for SorterCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SorterCollection")
            .field("sorters", &*self.sorters.read())
            .field("options", &*self.options.read())
            .finish()
    }
}

static_assertions::assert_impl_all!(SorterCollection<serde_json::Value>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::{Value as Json, json};

    fn sorters() -> SorterCollection<Json> {
        SorterCollection::for_records()
    }

    fn ids(sorters: &SorterCollection<Json>) -> Vec<String> {
        sorters.items().iter().map(|s| s.id().to_string()).collect()
    }

    #[test]
    fn test_descriptor_debug() {
        let property = SorterDescriptor::<Json>::from("name");
        assert_eq!(format!("{property:?}"), r#"Property("name")"#);

        let function = SorterDescriptor::<Json>::function(|a: &Json, b: &Json| {
            a["id"].as_i64().cmp(&b["id"].as_i64())
        });
        assert_eq!(format!("{function:?}"), "Function(..)");

        let sorter = SorterDescriptor::from(Sorter::<Json>::new("age").with_id("by-age"));
        assert_eq!(format!("{sorter:?}"), r#"Sorter("by-age")"#);
    }

    #[test]
    fn test_add_sort_twice_toggles() {
        let sorters = sorters();
        sorters.add_sort(["name"], None, SortMode::Replace).unwrap();
        let first = sorters.get_at(0).unwrap();
        assert_eq!(first.direction(), SortDirection::Asc);

        sorters.add_sort(["name"], None, SortMode::Replace).unwrap();
        assert_eq!(sorters.len(), 1);
        assert!(Arc::ptr_eq(&first, &sorters.get_at(0).unwrap()));
        assert_eq!(first.direction(), SortDirection::Desc);
    }

    #[test]
    fn test_explicit_direction_sets_instead_of_toggling() {
        let sorters = sorters();
        sorters
            .add_sort(["name"], Some(SortDirection::Desc), SortMode::Replace)
            .unwrap();
        sorters
            .add_sort(["name"], Some(SortDirection::Desc), SortMode::Replace)
            .unwrap();
        assert_eq!(sorters.get_at(0).unwrap().direction(), SortDirection::Desc);
    }

    #[test]
    fn test_modes() {
        let sorters = sorters();
        sorters.add_sort(["a"], None, SortMode::Replace).unwrap();
        sorters.add_sort(["b"], None, SortMode::Append).unwrap();
        sorters.add_sort(["c"], None, SortMode::Prepend).unwrap();
        assert_eq!(ids(&sorters), vec!["c", "a", "b"]);

        sorters.add_sort(["d"], None, SortMode::Replace).unwrap();
        assert_eq!(ids(&sorters), vec!["d"]);
    }

    #[test]
    fn test_multi_truncates_to_limit() {
        let sorters = sorters().with_options(SortOptions::new().with_multi_sort_limit(2));
        sorters.add_sort(["a"], None, SortMode::Multi).unwrap();
        sorters.add_sort(["b"], None, SortMode::Multi).unwrap();
        sorters.add_sort(["c"], None, SortMode::Multi).unwrap();
        assert_eq!(ids(&sorters), vec!["c", "b"]);
    }

    #[test]
    fn test_append_existing_non_primary_keeps_direction() {
        let sorters = sorters();
        sorters.add_sort(["a", "b"], None, SortMode::Replace).unwrap();
        sorters.add_sort(["a"], None, SortMode::Append).unwrap();
        assert_eq!(ids(&sorters), vec!["b", "a"]);
        assert_eq!(sorters.get("a").unwrap().direction(), SortDirection::Asc);
    }

    #[test]
    fn test_unknown_mode() {
        assert_eq!("multi".parse::<SortMode>().unwrap(), SortMode::Multi);
        assert!(matches!(
            "sideways".parse::<SortMode>(),
            Err(CollectionError::UnknownSortMode(_))
        ));
    }

    #[test]
    fn test_invalid_descriptor_changes_nothing() {
        let sorters = sorters();
        sorters.add_sort(["a"], None, SortMode::Replace).unwrap();
        let result = sorters.add_sort(
            vec![
                SorterDescriptor::from("b"),
                SorterDescriptor::Config(SorterConfig::default()),
            ],
            None,
            SortMode::Replace,
        );
        assert!(matches!(result, Err(CollectionError::InvalidSorter(_))));
        assert_eq!(ids(&sorters), vec!["a"]);
    }

    #[test]
    fn test_missing_reader() {
        let sorters = SorterCollection::<i32>::new();
        let err = sorters.add_sort(["x"], None, SortMode::Replace).unwrap_err();
        assert!(matches!(err, CollectionError::MissingFieldReader { .. }));

        sorters
            .add_sort([SorterDescriptor::function(|a: &i32, b: &i32| a.cmp(b))], None, SortMode::Replace)
            .unwrap();
        let sort_fn = sorters.get_sort_fn().unwrap();
        assert_eq!(sort_fn(&1, &2), Ordering::Less);
    }

    #[test]
    fn test_empty_add_sort_only_notifies() {
        let sorters = sorters();
        sorters.add_sort(["a"], None, SortMode::Replace).unwrap();
        let generation = sorters.generation();

        let notified = Arc::new(Mutex::new(0));
        let notified_clone = notified.clone();
        sorters.sort.connect(move |_| *notified_clone.lock() += 1);

        let added = sorters
            .add_sort(Vec::<SorterDescriptor<Json>>::new(), None, SortMode::Replace)
            .unwrap();
        assert!(added.is_empty());
        assert_eq!(*notified.lock(), 1);
        assert_eq!(sorters.generation(), generation);
        assert_eq!(ids(&sorters), vec!["a"]);
    }

    #[test]
    fn test_combined_comparator_chains() {
        let sorters = sorters();
        sorters.add_sort(["team", "age"], None, SortMode::Replace).unwrap();
        sorters.get("age").unwrap().set_direction(SortDirection::Desc);

        let cmp = sorters.get_sort_fn().unwrap();
        let a = json!({ "team": "A", "age": 30 });
        let b = json!({ "team": "A", "age": 40 });
        let c = json!({ "team": "B", "age": 50 });

        assert_eq!(cmp(&a, &c), Ordering::Less);
        assert_eq!(cmp(&a, &b), Ordering::Greater);
        assert_eq!(cmp(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_create_comparator_tie_break() {
        let sorters = sorters();
        sorters.add_sort(["team"], None, SortMode::Replace).unwrap();
        let cmp = sorters.create_comparator(Some(Arc::new(|a: &Json, b: &Json| {
            a["id"].as_i64().cmp(&b["id"].as_i64())
        })));

        let a = json!({ "team": "A", "id": 2 });
        let b = json!({ "team": "A", "id": 1 });
        assert_eq!(cmp(&a, &b), Ordering::Greater);
    }

    #[test]
    fn test_memo_invalidated_on_change() {
        let sorters = sorters();
        assert!(sorters.get_sort_fn().is_none());

        sorters.add_sort(["n"], None, SortMode::Replace).unwrap();
        let first = sorters.get_sort_fn().unwrap();
        let again = sorters.get_sort_fn().unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        sorters.remove("n");
        assert!(sorters.get_sort_fn().is_none());
    }

    #[test]
    fn test_root_back_filled() {
        let sorters = sorters().with_options(SortOptions::new().with_root_property("data"));
        let shared = Arc::new(Sorter::<Json>::new("name"));
        sorters
            .add_sort([shared.clone()], None, SortMode::Replace)
            .unwrap();
        assert_eq!(shared.root().as_deref(), Some("data"));

        let a = json!({ "data": { "name": "a" } });
        let b = json!({ "data": { "name": "b" } });
        assert_eq!(sorters.get_sort_fn().unwrap()(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_default_direction_from_options() {
        let sorters =
            sorters().with_options(SortOptions::new().with_default_direction(SortDirection::Desc));
        sorters.add_sort(["n"], None, SortMode::Replace).unwrap();
        assert_eq!(sorters.get_at(0).unwrap().direction(), SortDirection::Desc);
    }

    #[test]
    fn test_serialize() {
        let sorters = sorters();
        sorters.add_sort(["a", "b"], None, SortMode::Replace).unwrap();
        let wire = serde_json::to_value(sorters.serialize()).unwrap();
        assert_eq!(
            wire,
            json!([
                { "property": "a", "direction": "ASC" },
                { "property": "b", "direction": "ASC" },
            ])
        );
    }
}
