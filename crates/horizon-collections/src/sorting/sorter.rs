//! A single sort criterion.
//!
//! A [`Sorter`] compares two items either by a named property (read through a
//! [`FieldReader`]) or by a custom comparison closure. The raw three-way result
//! is then flipped for descending sorters.
//!
//! Sorters are shared: a sorter set stores `Arc<Sorter<T>>`, and the same
//! sorter may sit in several sets at once. Mutating it (toggling, changing the
//! property) is visible to every owner.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{CollectionError, Result};
use crate::value::{FieldReader, Record, Value, record_reader};

/// Closure type for a three-way item comparison.
pub type CompareFn<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Closure type for a value transform applied before comparing.
pub type TransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

static NEXT_SORTER_ID: AtomicUsize = AtomicUsize::new(1);

fn generated_id() -> String {
    format!("sorter-{}", NEXT_SORTER_ID.fetch_add(1, AtomicOrdering::Relaxed))
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    #[serde(alias = "asc")]
    Asc,
    /// Descending order.
    #[serde(alias = "desc")]
    Desc,
}

impl SortDirection {
    /// Returns the opposite direction.
    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }

    /// Applies the direction to an ascending comparison result.
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }

    /// Returns the wire name, `"ASC"` or `"DESC"`.
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortDirection {
    type Err = CollectionError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("asc") {
            Ok(SortDirection::Asc)
        } else if s.eq_ignore_ascii_case("desc") {
            Ok(SortDirection::Desc)
        } else {
            Err(CollectionError::UnknownDirection(s.to_string()))
        }
    }
}

/// How a sorter compares: by property or by closure. Never both.
enum Comparison<T> {
    Property(String),
    Custom(CompareFn<T>),
}

impl<T> Clone for Comparison<T> {
    fn clone(&self) -> Self {
        match self {
            Comparison::Property(p) => Comparison::Property(p.clone()),
            Comparison::Custom(f) => Comparison::Custom(f.clone()),
        }
    }
}

/// Immutable snapshot of a sorter's configuration; swapped on every change.
struct Spec<T> {
    comparison: Comparison<T>,
    reader: Option<FieldReader<T>>,
    root: Option<String>,
    transform: Option<TransformFn>,
    direction: SortDirection,
}

impl<T> Clone for Spec<T> {
    fn clone(&self) -> Self {
        Self {
            comparison: self.comparison.clone(),
            reader: self.reader.clone(),
            root: self.root.clone(),
            transform: self.transform.clone(),
            direction: self.direction,
        }
    }
}

/// State snapshot of a sorter, as returned by [`Sorter::get_state`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SorterState {
    /// Nested object the property is read from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Sorted property, `None` for custom comparators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    /// Sort direction.
    pub direction: SortDirection,
}

/// Remote-sort wire shape of a sorter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedSorter {
    /// Sorted property, `None` for custom comparators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
    /// Sort direction.
    pub direction: SortDirection,
}

/// Deserializable sorter descriptor.
///
/// ```
/// use horizon_collections::sorting::{SortDirection, SorterConfig};
///
/// let config: SorterConfig =
///     serde_json::from_str(r#"{ "property": "age", "direction": "DESC" }"#).unwrap();
/// assert_eq!(config.property.as_deref(), Some("age"));
/// assert_eq!(config.direction, Some(SortDirection::Desc));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SorterConfig {
    /// Sorter id. Defaults to the property name.
    pub id: Option<String>,
    /// Property to sort by.
    pub property: Option<String>,
    /// Nested object to read the property from.
    pub root: Option<String>,
    /// Direction. Defaults to the owner's default direction.
    pub direction: Option<SortDirection>,
}

impl SorterConfig {
    /// Creates a config sorting by `property`.
    pub fn property(property: impl Into<String>) -> Self {
        Self {
            property: Some(property.into()),
            ..Default::default()
        }
    }

    /// Sets the direction.
    pub fn direction(mut self, direction: SortDirection) -> Self {
        self.direction = Some(direction);
        self
    }
}

/// A single sort criterion with a direction.
///
/// # Example
///
/// ```
/// use horizon_collections::sorting::{Sorter, SortDirection};
/// use serde_json::json;
/// use std::cmp::Ordering;
///
/// let sorter = Sorter::<serde_json::Value>::new("age");
/// let (young, old) = (json!({ "age": 20 }), json!({ "age": 40 }));
///
/// assert_eq!(sorter.sort(&young, &old), Ordering::Less);
/// sorter.toggle();
/// assert_eq!(sorter.direction(), SortDirection::Desc);
/// assert_eq!(sorter.sort(&young, &old), Ordering::Greater);
/// ```
pub struct Sorter<T> {
    id: String,
    spec: RwLock<Arc<Spec<T>>>,
}

impl<T: Record + 'static> Sorter<T> {
    /// Creates an ascending sorter on `property`, reading fields through the
    /// item's [`Record`] implementation.
    pub fn new(property: impl Into<String>) -> Self {
        Self::with_reader(property, record_reader::<T>())
    }
}

impl<T: 'static> Sorter<T> {
    /// Creates an ascending sorter on `property` with a custom field reader.
    pub fn with_reader(property: impl Into<String>, reader: FieldReader<T>) -> Self {
        let property = property.into();
        Self {
            id: property.clone(),
            spec: RwLock::new(Arc::new(Spec {
                comparison: Comparison::Property(property),
                reader: Some(reader),
                root: None,
                transform: None,
                direction: SortDirection::Asc,
            })),
        }
    }

    /// Creates an ascending sorter from a comparison closure.
    pub fn from_fn<F>(compare: F) -> Self
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        Self::from_compare_fn(Arc::new(compare))
    }

    /// Creates an ascending sorter from a shared comparison closure.
    pub fn from_compare_fn(compare: CompareFn<T>) -> Self {
        Self {
            id: generated_id(),
            spec: RwLock::new(Arc::new(Spec {
                comparison: Comparison::Custom(compare),
                reader: None,
                root: None,
                transform: None,
                direction: SortDirection::Asc,
            })),
        }
    }

    /// Builds a sorter from a config.
    ///
    /// Fails with [`CollectionError::InvalidSorter`] when no property is
    /// given, and with [`CollectionError::MissingFieldReader`] when there is
    /// no reader to read it with.
    pub fn from_config(
        config: &SorterConfig,
        reader: Option<FieldReader<T>>,
        default_direction: SortDirection,
    ) -> Result<Self> {
        let property = config.property.clone().ok_or_else(|| {
            CollectionError::InvalidSorter(
                "a sorter requires either a property or a sorter function".to_string(),
            )
        })?;
        let reader = reader.ok_or_else(|| CollectionError::missing_reader(property.as_str()))?;

        let mut sorter = Self::with_reader(property, reader)
            .with_direction(config.direction.unwrap_or(default_direction));
        if let Some(root) = &config.root {
            sorter = sorter.with_root(root.as_str());
        }
        if let Some(id) = &config.id {
            sorter = sorter.with_id(id.as_str());
        }
        Ok(sorter)
    }

    /// Sets the direction (builder form).
    pub fn with_direction(mut self, direction: SortDirection) -> Self {
        self.spec_mut().direction = direction;
        self
    }

    /// Sets the root object the property is read from (builder form).
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.spec_mut().root = Some(root.into());
        self
    }

    /// Sets a transform applied to both values before comparing (builder form).
    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.spec_mut().transform = Some(Arc::new(transform));
        self
    }

    /// Overrides the id (builder form).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the field reader used for property comparisons (builder form).
    pub fn with_field_reader(mut self, reader: FieldReader<T>) -> Self {
        self.spec_mut().reader = Some(reader);
        self
    }

    fn spec_mut(&mut self) -> &mut Spec<T> {
        Arc::make_mut(self.spec.get_mut())
    }

    fn update(&self, f: impl FnOnce(&mut Spec<T>)) {
        let mut guard = self.spec.write();
        let mut next = Spec::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }

    fn snapshot(&self) -> Arc<Spec<T>> {
        self.spec.read().clone()
    }

    /// The sorter id. Defaults to the property name.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The sorted property, or `None` for a custom comparator.
    pub fn property(&self) -> Option<String> {
        match &self.snapshot().comparison {
            Comparison::Property(p) => Some(p.clone()),
            Comparison::Custom(_) => None,
        }
    }

    /// Whether this sorter uses a custom comparator.
    pub fn has_sorter_fn(&self) -> bool {
        matches!(self.snapshot().comparison, Comparison::Custom(_))
    }

    /// The nested object the property is read from.
    pub fn root(&self) -> Option<String> {
        self.snapshot().root.clone()
    }

    /// Current direction.
    pub fn direction(&self) -> SortDirection {
        self.snapshot().direction
    }

    /// Sets the direction.
    pub fn set_direction(&self, direction: SortDirection) {
        self.update(|spec| spec.direction = direction);
    }

    /// Flips the direction between ascending and descending.
    pub fn toggle(&self) {
        self.update(|spec| spec.direction = spec.direction.toggled());
    }

    /// Sets or clears the root object.
    pub fn set_root(&self, root: Option<String>) {
        self.update(|spec| spec.root = root);
    }

    /// Sets or clears the value transform.
    pub fn set_transform(&self, transform: Option<TransformFn>) {
        self.update(|spec| spec.transform = transform);
    }

    /// Switches to comparing by `property`, uninstalling any custom comparator.
    ///
    /// Fails if this sorter has no field reader.
    pub fn set_property(&self, property: impl Into<String>) -> Result<()> {
        let property = property.into();
        if self.snapshot().reader.is_none() {
            return Err(CollectionError::missing_reader(property));
        }
        self.update(|spec| spec.comparison = Comparison::Property(property));
        Ok(())
    }

    /// Switches to a custom comparator, clearing the property.
    pub fn set_sorter_fn<F>(&self, compare: F)
    where
        F: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        let compare: CompareFn<T> = Arc::new(compare);
        self.update(|spec| spec.comparison = Comparison::Custom(compare));
    }

    /// Back-fills the root if none is set. Returns `true` if it changed.
    pub(crate) fn fill_root(&self, root: &str) -> bool {
        let spec = self.snapshot();
        if spec.root.is_some() || !matches!(spec.comparison, Comparison::Property(_)) {
            return false;
        }
        self.set_root(Some(root.to_string()));
        true
    }

    /// Compares two items, honouring the direction.
    ///
    /// Missing fields read as [`Value::Null`], which sorts first and equals
    /// another null.
    pub fn sort(&self, a: &T, b: &T) -> Ordering {
        let spec = self.snapshot();
        let ordering = match &spec.comparison {
            Comparison::Custom(compare) => compare(a, b),
            Comparison::Property(property) => match &spec.reader {
                Some(reader) => {
                    let root = spec.root.as_deref();
                    let mut left = reader(a, root, property);
                    let mut right = reader(b, root, property);
                    if let Some(transform) = &spec.transform {
                        left = transform(left);
                        right = transform(right);
                    }
                    left.compare(&right)
                }
                None => Ordering::Equal,
            },
        };
        spec.direction.apply(ordering)
    }

    /// Returns `{root, property, direction}`.
    pub fn get_state(&self) -> SorterState {
        let spec = self.snapshot();
        SorterState {
            root: spec.root.clone(),
            property: match &spec.comparison {
                Comparison::Property(p) => Some(p.clone()),
                Comparison::Custom(_) => None,
            },
            direction: spec.direction,
        }
    }

    /// Returns the remote-sort shape `{property, direction}`.
    pub fn serialize(&self) -> SerializedSorter {
        let state = self.get_state();
        SerializedSorter {
            property: state.property,
            direction: state.direction,
        }
    }
}

impl<T: 'static> fmt::Debug for Sorter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.get_state();
        f.debug_struct("Sorter")
            .field("id", &self.id)
            .field("property", &state.property)
            .field("root", &state.root)
            .field("direction", &state.direction)
            .finish()
    }
}

static_assertions::assert_impl_all!(Sorter<serde_json::Value>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direction_parse_and_display() {
        assert_eq!("ASC".parse::<SortDirection>().unwrap(), SortDirection::Asc);
        assert_eq!("desc".parse::<SortDirection>().unwrap(), SortDirection::Desc);
        assert!(matches!(
            "up".parse::<SortDirection>(),
            Err(CollectionError::UnknownDirection(_))
        ));
        assert_eq!(SortDirection::Desc.to_string(), "DESC");
        assert_eq!(serde_json::to_string(&SortDirection::Asc).unwrap(), "\"ASC\"");
    }

    #[test]
    fn test_property_sort_and_toggle() {
        let sorter = Sorter::<serde_json::Value>::new("name");
        let a = json!({ "name": "a" });
        let b = json!({ "name": "b" });

        assert_eq!(sorter.id(), "name");
        assert_eq!(sorter.sort(&a, &b), Ordering::Less);
        sorter.toggle();
        assert_eq!(sorter.sort(&a, &b), Ordering::Greater);
        sorter.toggle();
        assert_eq!(sorter.direction(), SortDirection::Asc);
    }

    #[test]
    fn test_missing_values_do_not_fail() {
        let sorter = Sorter::<serde_json::Value>::new("age");
        let present = json!({ "age": 3 });
        let missing = json!({});

        assert_eq!(sorter.sort(&missing, &present), Ordering::Less);
        assert_eq!(sorter.sort(&present, &missing), Ordering::Greater);
        assert_eq!(sorter.sort(&missing, &json!({})), Ordering::Equal);
    }

    #[test]
    fn test_root_and_transform() {
        let sorter = Sorter::<serde_json::Value>::new("name")
            .with_root("data")
            .with_transform(|v| match v {
                Value::String(s) => Value::String(s.to_lowercase()),
                other => other,
            });
        let a = json!({ "data": { "name": "alpha" } });
        let b = json!({ "data": { "name": "Beta" } });

        assert_eq!(sorter.sort(&a, &b), Ordering::Less);
        assert_eq!(sorter.root().as_deref(), Some("data"));
    }

    #[test]
    fn test_transform_to_nan_still_sorts() {
        let sorter = Sorter::<serde_json::Value>::new("score").with_transform(|v| match v {
            Value::Int(n) if n % 3 == 0 => Value::Float(f64::NAN),
            other => other,
        });
        let mut records: Vec<serde_json::Value> = (0..200)
            .map(|i| json!({ "score": (i * 7919) % 1000 }))
            .collect();
        records.sort_by(|a, b| sorter.sort(a, b));

        let scores: Vec<i64> = records.iter().filter_map(|r| r["score"].as_i64()).collect();
        let numbers: Vec<i64> = scores.iter().copied().filter(|n| n % 3 != 0).collect();
        assert!(numbers.windows(2).all(|w| w[0] <= w[1]));
        // Everything mapped to NaN ends up after the numbers.
        let first_nan = scores.iter().position(|n| n % 3 == 0).unwrap();
        assert!(scores[first_nan..].iter().all(|n| n % 3 == 0));
    }

    #[test]
    fn test_property_and_fn_are_exclusive() {
        let sorter = Sorter::<serde_json::Value>::new("age");
        sorter.set_sorter_fn(|a, b| b["age"].as_i64().cmp(&a["age"].as_i64()));
        assert!(sorter.has_sorter_fn());
        assert_eq!(sorter.property(), None);

        let young = json!({ "age": 1 });
        let old = json!({ "age": 2 });
        assert_eq!(sorter.sort(&young, &old), Ordering::Greater);

        sorter.set_property("age").unwrap();
        assert!(!sorter.has_sorter_fn());
        assert_eq!(sorter.sort(&young, &old), Ordering::Less);
    }

    #[test]
    fn test_set_property_without_reader_fails() {
        let sorter = Sorter::<i32>::from_fn(|a, b| a.cmp(b));
        assert!(sorter.id().starts_with("sorter-"));
        assert!(matches!(
            sorter.set_property("x"),
            Err(CollectionError::MissingFieldReader { .. })
        ));
        assert_eq!(sorter.sort(&1, &2), Ordering::Less);
    }

    #[test]
    fn test_state_and_serialize() {
        let sorter = Sorter::<serde_json::Value>::new("age")
            .with_root("data")
            .with_direction(SortDirection::Desc);

        let state = sorter.get_state();
        assert_eq!(state.root.as_deref(), Some("data"));
        assert_eq!(state.property.as_deref(), Some("age"));

        let wire = serde_json::to_value(sorter.serialize()).unwrap();
        assert_eq!(wire, json!({ "property": "age", "direction": "DESC" }));
    }

    #[test]
    fn test_from_config() {
        let config = SorterConfig::property("age").direction(SortDirection::Desc);
        let sorter = Sorter::<serde_json::Value>::from_config(
            &config,
            Some(record_reader()),
            SortDirection::Asc,
        )
        .unwrap();
        assert_eq!(sorter.direction(), SortDirection::Desc);

        let err = Sorter::<serde_json::Value>::from_config(
            &SorterConfig::default(),
            Some(record_reader()),
            SortDirection::Asc,
        )
        .unwrap_err();
        assert!(matches!(err, CollectionError::InvalidSorter(_)));
    }

    #[test]
    fn test_shared_sorter_mutation_is_visible() {
        let sorter = Arc::new(Sorter::<serde_json::Value>::new("n"));
        let other_owner = sorter.clone();
        sorter.set_direction(SortDirection::Desc);
        assert_eq!(other_owner.direction(), SortDirection::Desc);
    }
}
