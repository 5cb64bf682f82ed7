//! An ordered set of filters combined with AND.

use std::fmt;
use std::sync::Arc;

use horizon_collections_core::Signal;
use horizon_collections_core::logging::targets;
use parking_lot::RwLock;

use super::filter::{Filter, FilterConfig, PredicateFn, SerializedFilter};
use crate::error::Result;
use crate::value::{FieldReader, Record, record_reader};

/// Anything that can be turned into a [`Filter`].
pub enum FilterDescriptor<T> {
    /// Build from a config.
    Config(FilterConfig),
    /// Reuse an existing filter.
    Filter(Arc<Filter<T>>),
}

impl<T> From<FilterConfig> for FilterDescriptor<T> {
    fn from(config: FilterConfig) -> Self {
        FilterDescriptor::Config(config)
    }
}

impl<T> From<Filter<T>> for FilterDescriptor<T> {
    fn from(filter: Filter<T>) -> Self {
        FilterDescriptor::Filter(Arc::new(filter))
    }
}

impl<T> From<Arc<Filter<T>>> for FilterDescriptor<T> {
    fn from(filter: Arc<Filter<T>>) -> Self {
        FilterDescriptor::Filter(filter)
    }
}

/// An ordered set of filters. An item passes when every enabled filter
/// accepts it.
pub struct FilterCollection<T> {
    filters: RwLock<Vec<Arc<Filter<T>>>>,
    reader: Option<FieldReader<T>>,
    /// Emitted after every change, and on [`FilterCollection::refilter`].
    pub changed: Signal<()>,
}

impl<T: Record + 'static> FilterCollection<T> {
    /// Creates an empty set that reads properties through [`Record`].
    pub fn for_records() -> Self {
        Self::with_reader(Some(record_reader::<T>()))
    }
}

impl<T: 'static> Default for FilterCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> FilterCollection<T> {
    /// Creates an empty set without a field reader.
    pub fn new() -> Self {
        Self::with_reader(None)
    }

    /// Creates an empty set using `reader` for config-built filters.
    pub fn with_reader(reader: Option<FieldReader<T>>) -> Self {
        Self {
            filters: RwLock::new(Vec::new()),
            reader,
            changed: Signal::new(),
        }
    }

    /// Number of filters, enabled or not.
    pub fn len(&self) -> usize {
        self.filters.read().len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.filters.read().is_empty()
    }

    /// Whether any filter is enabled.
    pub fn is_active(&self) -> bool {
        self.filters.read().iter().any(|f| !f.is_disabled())
    }

    /// Snapshot of the filters.
    pub fn items(&self) -> Vec<Arc<Filter<T>>> {
        self.filters.read().clone()
    }

    /// Filter with the given id.
    pub fn get(&self, id: &str) -> Option<Arc<Filter<T>>> {
        self.filters.read().iter().find(|f| f.id() == id).cloned()
    }

    /// Adds a filter. A filter with the same id is replaced in place.
    pub fn add(&self, descriptor: impl Into<FilterDescriptor<T>>) -> Result<Arc<Filter<T>>> {
        let mut added = self.add_all([descriptor])?;
        // add_all returns exactly one filter per descriptor
        Ok(added.remove(0))
    }

    /// Adds several filters. Every descriptor is validated before any is
    /// added.
    pub fn add_all<I, D>(&self, descriptors: I) -> Result<Vec<Arc<Filter<T>>>>
    where
        I: IntoIterator<Item = D>,
        D: Into<FilterDescriptor<T>>,
    {
        let filters = descriptors
            .into_iter()
            .map(|d| match d.into() {
                FilterDescriptor::Filter(filter) => Ok(filter),
                FilterDescriptor::Config(config) => {
                    Filter::from_config(&config, self.reader.clone()).map(Arc::new)
                }
            })
            .collect::<Result<Vec<_>>>()?;

        {
            let mut current = self.filters.write();
            for filter in &filters {
                match current.iter().position(|f| f.id() == filter.id()) {
                    Some(pos) => current[pos] = filter.clone(),
                    None => current.push(filter.clone()),
                }
            }
        }
        tracing::debug!(target: targets::FILTER, added = filters.len(), "filters added");
        self.changed.emit(());
        Ok(filters)
    }

    /// Removes the filter with the given id.
    pub fn remove(&self, id: &str) -> Option<Arc<Filter<T>>> {
        let removed = {
            let mut current = self.filters.write();
            current
                .iter()
                .position(|f| f.id() == id)
                .map(|pos| current.remove(pos))
        };
        if removed.is_some() {
            self.changed.emit(());
        }
        removed
    }

    /// Removes every filter.
    pub fn clear(&self) {
        let had_filters = !std::mem::take(&mut *self.filters.write()).is_empty();
        if had_filters {
            self.changed.emit(());
        }
    }

    /// Notifies owners that filter values changed and items must be
    /// re-tested.
    pub fn refilter(&self) {
        self.changed.emit(());
    }

    /// The combined predicate, or `None` when the set is empty.
    ///
    /// The predicate captures the current filters; whether each one is
    /// disabled is checked on every call.
    pub fn get_filter_fn(&self) -> Option<PredicateFn<T>> {
        let filters = self.items();
        if filters.is_empty() {
            return None;
        }
        Some(Arc::new(move |item: &T| {
            filters
                .iter()
                .filter(|f| !f.is_disabled())
                .all(|f| f.filter(item))
        }))
    }

    /// Wire shape of every enabled filter.
    pub fn serialize(&self) -> Vec<SerializedFilter> {
        self.filters
            .read()
            .iter()
            .filter(|f| !f.is_disabled())
            .map(|f| f.serialize())
            .collect()
    }
}

impl<T: 'static> fmt::Debug for FilterCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterCollection")
            .field("filters", &*self.filters.read())
            .finish()
    }
}

static_assertions::assert_impl_all!(FilterCollection<serde_json::Value>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filtering::FilterOperator;
    use parking_lot::Mutex;
    use serde_json::{Value as Json, json};

    #[test]
    fn test_and_semantics() {
        let filters = FilterCollection::<Json>::for_records();
        filters
            .add(Filter::new("age", Some(FilterOperator::Ge), 18).unwrap())
            .unwrap();
        filters
            .add(Filter::new("team", Some(FilterOperator::Eq), "A").unwrap())
            .unwrap();

        let pass = filters.get_filter_fn().unwrap();
        assert!(pass(&json!({ "age": 20, "team": "A" })));
        assert!(!pass(&json!({ "age": 20, "team": "B" })));
        assert!(!pass(&json!({ "age": 10, "team": "A" })));
    }

    #[test]
    fn test_disabled_filters_are_skipped() {
        let filters = FilterCollection::<Json>::for_records();
        let team = filters
            .add(Filter::new("team", Some(FilterOperator::Eq), "A").unwrap())
            .unwrap();
        let pass = filters.get_filter_fn().unwrap();
        assert!(!pass(&json!({ "team": "B" })));

        team.set_disabled(true);
        assert!(!filters.is_active());
        assert!(pass(&json!({ "team": "B" })));
        assert!(filters.serialize().is_empty());
    }

    #[test]
    fn test_same_id_replaces() {
        let filters = FilterCollection::<Json>::for_records();
        filters
            .add(Filter::new("age", Some(FilterOperator::Gt), 1).unwrap())
            .unwrap();
        filters
            .add(Filter::new("age", Some(FilterOperator::Gt), 5).unwrap())
            .unwrap();
        assert_eq!(filters.len(), 1);
        assert!(!filters.get_filter_fn().unwrap()(&json!({ "age": 3 })));
    }

    #[test]
    fn test_invalid_config_adds_nothing() {
        let filters = FilterCollection::<Json>::for_records();
        let result = filters.add_all([
            FilterConfig {
                property: Some("a".to_string()),
                value: Some(1.into()),
                ..Default::default()
            },
            FilterConfig::default(),
        ]);
        assert!(result.is_err());
        assert!(filters.is_empty());
    }

    #[test]
    fn test_changed_signal() {
        let filters = FilterCollection::<Json>::for_records();
        let count = Arc::new(Mutex::new(0));
        let count_clone = count.clone();
        filters.changed.connect(move |_| *count_clone.lock() += 1);

        filters.add(Filter::from_fn(|_: &Json| true)).unwrap();
        filters.refilter();
        filters.clear();
        filters.clear();
        assert_eq!(*count.lock(), 3);
        assert!(filters.get_filter_fn().is_none());
    }
}
