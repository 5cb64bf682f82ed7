//! A single filter predicate.
//!
//! A [`Filter`] either wraps a closure or tests one property of an item. A
//! property filter with an [`FilterOperator`] compares the property against
//! the filter value; one without an operator matches the property's string
//! form against a pattern built from the value (see [`Filter::matcher`]).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use horizon_collections_core::logging::targets;
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{CollectionError, Result};
use crate::sorting::TransformFn;
use crate::value::{FieldReader, Record, Value, record_reader};

/// Closure type for an item predicate.
pub type PredicateFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

static NEXT_FILTER_ID: AtomicUsize = AtomicUsize::new(1);

/// Comparison operator of a property filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    /// `<` (alias `lt`)
    Lt,
    /// `<=` (alias `le`)
    Le,
    /// `=` or `==` (alias `eq`): equality after coercing to the value's type.
    Eq,
    /// `===`: equality without coercion.
    StrictEq,
    /// `>=` (alias `ge`)
    Ge,
    /// `>` (alias `gt`)
    Gt,
    /// `!=` (alias `ne`)
    Ne,
    /// `!==`
    StrictNe,
    /// `in`: the property is one of a list of values.
    In,
    /// `like`: case-insensitive substring match.
    Like,
}

impl FilterOperator {
    /// Canonical symbol.
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOperator::Lt => "<",
            FilterOperator::Le => "<=",
            FilterOperator::Eq => "=",
            FilterOperator::StrictEq => "===",
            FilterOperator::Ge => ">=",
            FilterOperator::Gt => ">",
            FilterOperator::Ne => "!=",
            FilterOperator::StrictNe => "!==",
            FilterOperator::In => "in",
            FilterOperator::Like => "like",
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOperator {
    type Err = CollectionError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "<" | "lt" => FilterOperator::Lt,
            "<=" | "le" => FilterOperator::Le,
            "=" | "==" | "eq" => FilterOperator::Eq,
            "===" => FilterOperator::StrictEq,
            ">=" | "ge" => FilterOperator::Ge,
            ">" | "gt" => FilterOperator::Gt,
            "!=" | "ne" => FilterOperator::Ne,
            "!==" => FilterOperator::StrictNe,
            "in" => FilterOperator::In,
            "like" => FilterOperator::Like,
            other => return Err(CollectionError::InvalidOperator(other.to_string())),
        })
    }
}

impl Serialize for FilterOperator {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FilterOperator {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The value a filter compares against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// A single value.
    Single(Value),
    /// A list of values, for the `in` operator.
    List(Vec<Value>),
}

impl Default for FilterValue {
    fn default() -> Self {
        FilterValue::Single(Value::Null)
    }
}

impl FilterValue {
    /// Whether the value counts as empty for `disable_on_empty`.
    pub fn is_empty(&self) -> bool {
        match self {
            FilterValue::Single(v) => v.is_empty(),
            FilterValue::List(list) => list.is_empty(),
        }
    }

    fn single(&self) -> Option<&Value> {
        match self {
            FilterValue::Single(v) => Some(v),
            FilterValue::List(_) => None,
        }
    }
}

impl From<Value> for FilterValue {
    fn from(v: Value) -> Self {
        FilterValue::Single(v)
    }
}

impl From<&str> for FilterValue {
    fn from(v: &str) -> Self {
        FilterValue::Single(Value::from(v))
    }
}

impl From<String> for FilterValue {
    fn from(v: String) -> Self {
        FilterValue::Single(Value::from(v))
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Single(Value::Int(v))
    }
}

impl From<i32> for FilterValue {
    fn from(v: i32) -> Self {
        FilterValue::Single(Value::from(v))
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        FilterValue::Single(Value::Float(v))
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        FilterValue::Single(Value::Bool(v))
    }
}

impl From<Vec<Value>> for FilterValue {
    fn from(v: Vec<Value>) -> Self {
        FilterValue::List(v)
    }
}

/// Deserializable filter descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterConfig {
    /// Filter id. Defaults to the property name.
    pub id: Option<String>,
    /// Property to test.
    pub property: Option<String>,
    /// Nested object to read the property from.
    pub root: Option<String>,
    /// Value to compare against.
    pub value: Option<FilterValue>,
    /// Comparison operator. Without one, the value is matched as a string.
    pub operator: Option<FilterOperator>,
    /// Match anywhere in the string instead of at the start.
    pub any_match: bool,
    /// Require the whole string to match.
    pub exact_match: bool,
    /// Match case-sensitively.
    pub case_sensitive: bool,
    /// Start disabled.
    pub disabled: bool,
    /// Disable the filter whenever its value is empty.
    pub disable_on_empty: bool,
}

/// Remote-filter wire shape of a filter (`id` and `root` are omitted).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedFilter {
    /// Tested property.
    pub property: Option<String>,
    /// Operator, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<FilterOperator>,
    /// Compared value.
    pub value: FilterValue,
    /// Set when matching anywhere.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub any_match: bool,
    /// Set when the whole string must match.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exact_match: bool,
    /// Set for case-sensitive matching.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub case_sensitive: bool,
}

enum Test<T> {
    Property {
        property: String,
        reader: FieldReader<T>,
        operator: Option<FilterOperator>,
    },
    Custom(PredicateFn<T>),
}

impl<T> Clone for Test<T> {
    fn clone(&self) -> Self {
        match self {
            Test::Property {
                property,
                reader,
                operator,
            } => Test::Property {
                property: property.clone(),
                reader: reader.clone(),
                operator: *operator,
            },
            Test::Custom(f) => Test::Custom(f.clone()),
        }
    }
}

struct FilterSpec<T> {
    test: Test<T>,
    root: Option<String>,
    value: FilterValue,
    convert: Option<TransformFn>,
    any_match: bool,
    exact_match: bool,
    case_sensitive: bool,
    disabled: bool,
    disable_on_empty: bool,
    /// User-supplied pattern replacing the matcher built from the value.
    pattern: Option<Regex>,
}

impl<T> Clone for FilterSpec<T> {
    fn clone(&self) -> Self {
        Self {
            test: self.test.clone(),
            root: self.root.clone(),
            value: self.value.clone(),
            convert: self.convert.clone(),
            any_match: self.any_match,
            exact_match: self.exact_match,
            case_sensitive: self.case_sensitive,
            disabled: self.disabled,
            disable_on_empty: self.disable_on_empty,
            pattern: self.pattern.clone(),
        }
    }
}

/// A predicate over items.
///
/// # Example
///
/// ```
/// use horizon_collections::filtering::{Filter, FilterOperator};
/// use serde_json::json;
///
/// let adults = Filter::<serde_json::Value>::new("age", Some(FilterOperator::Ge), 18).unwrap();
/// assert!(adults.filter(&json!({ "age": 30 })));
/// assert!(!adults.filter(&json!({ "age": 12 })));
///
/// // Without an operator the value is matched against the start of the field.
/// let names = Filter::<serde_json::Value>::new("name", None, "al").unwrap();
/// assert!(names.filter(&json!({ "name": "Alice" })));
/// assert!(!names.filter(&json!({ "name": "Sally" })));
/// ```
pub struct Filter<T> {
    id: String,
    spec: RwLock<Arc<FilterSpec<T>>>,
    /// Cached string matcher, cleared whenever the spec changes.
    matcher: RwLock<Option<Option<Arc<Regex>>>>,
}

impl<T: Record + 'static> Filter<T> {
    /// Creates a property filter reading fields through [`Record`].
    pub fn new(
        property: impl Into<String>,
        operator: Option<FilterOperator>,
        value: impl Into<FilterValue>,
    ) -> Result<Self> {
        Self::with_reader(property, operator, value, record_reader::<T>())
    }
}

impl<T: 'static> Filter<T> {
    /// Creates a property filter with a custom field reader.
    pub fn with_reader(
        property: impl Into<String>,
        operator: Option<FilterOperator>,
        value: impl Into<FilterValue>,
        reader: FieldReader<T>,
    ) -> Result<Self> {
        let property = property.into();
        if property.is_empty() {
            return Err(CollectionError::InvalidFilter(
                "a filter requires either a property or a filter function".to_string(),
            ));
        }
        let value = value.into();
        if operator == Some(FilterOperator::In) && !matches!(value, FilterValue::List(_)) {
            return Err(CollectionError::InvalidFilter(
                "the 'in' operator requires a list value".to_string(),
            ));
        }
        Ok(Self::from_spec(
            property.clone(),
            FilterSpec {
                test: Test::Property {
                    property,
                    reader,
                    operator,
                },
                root: None,
                value,
                convert: None,
                any_match: false,
                exact_match: false,
                case_sensitive: false,
                disabled: false,
                disable_on_empty: false,
                pattern: None,
            },
        ))
    }

    /// Creates a filter from a predicate closure.
    pub fn from_fn<F>(predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let id = format!("filter-{}", NEXT_FILTER_ID.fetch_add(1, AtomicOrdering::Relaxed));
        Self::from_spec(
            id,
            FilterSpec {
                test: Test::Custom(Arc::new(predicate)),
                root: None,
                value: FilterValue::default(),
                convert: None,
                any_match: false,
                exact_match: false,
                case_sensitive: false,
                disabled: false,
                disable_on_empty: false,
                pattern: None,
            },
        )
    }

    /// Builds a filter from a config.
    ///
    /// A property is required, and so is either a value or an operator.
    pub fn from_config(config: &FilterConfig, reader: Option<FieldReader<T>>) -> Result<Self> {
        let property = config.property.clone().ok_or_else(|| {
            CollectionError::InvalidFilter(
                "a filter requires either a property or a filter function".to_string(),
            )
        })?;
        if config.value.is_none() && config.operator.is_none() {
            return Err(CollectionError::InvalidFilter(
                "a filter requires either a property and value, or a filter function".to_string(),
            ));
        }
        let reader = reader.ok_or_else(|| CollectionError::missing_reader(property.as_str()))?;

        let mut filter = Self::with_reader(
            property,
            config.operator,
            config.value.clone().unwrap_or_default(),
            reader,
        )?
        .with_any_match(config.any_match)
        .with_exact_match(config.exact_match)
        .with_case_sensitive(config.case_sensitive)
        .with_disabled(config.disabled)
        .with_disable_on_empty(config.disable_on_empty);
        if let Some(root) = &config.root {
            filter = filter.with_root(root.as_str());
        }
        if let Some(id) = &config.id {
            filter = filter.with_id(id.as_str());
        }
        Ok(filter)
    }

    fn from_spec(id: String, spec: FilterSpec<T>) -> Self {
        Self {
            id,
            spec: RwLock::new(Arc::new(spec)),
            matcher: RwLock::new(None),
        }
    }

    fn spec_mut(&mut self) -> &mut FilterSpec<T> {
        *self.matcher.get_mut() = None;
        Arc::make_mut(self.spec.get_mut())
    }

    fn update(&self, f: impl FnOnce(&mut FilterSpec<T>)) {
        let mut guard = self.spec.write();
        let mut next = FilterSpec::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
        *self.matcher.write() = None;
    }

    fn snapshot(&self) -> Arc<FilterSpec<T>> {
        self.spec.read().clone()
    }

    /// Overrides the id (builder form).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Reads the property from a nested object (builder form).
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.spec_mut().root = Some(root.into());
        self
    }

    /// Matches anywhere in the string (builder form).
    pub fn with_any_match(mut self, any_match: bool) -> Self {
        self.spec_mut().any_match = any_match;
        self
    }

    /// Requires a whole-string match (builder form).
    pub fn with_exact_match(mut self, exact_match: bool) -> Self {
        self.spec_mut().exact_match = exact_match;
        self
    }

    /// Matches case-sensitively (builder form).
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.spec_mut().case_sensitive = case_sensitive;
        self
    }

    /// Starts disabled (builder form).
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.spec_mut().disabled = disabled;
        self
    }

    /// Disables the filter whenever its value is empty (builder form).
    pub fn with_disable_on_empty(mut self, disable_on_empty: bool) -> Self {
        let spec = self.spec_mut();
        spec.disable_on_empty = disable_on_empty;
        spec.disabled = disable_on_empty && spec.value.is_empty();
        self
    }

    /// Converts the property value (and single filter values) before
    /// comparing (builder form).
    pub fn with_convert<F>(mut self, convert: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.spec_mut().convert = Some(Arc::new(convert));
        self
    }

    /// Uses a raw regular expression instead of the matcher built from the
    /// value (builder form). Only applies to filters without an operator.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)?;
        self.spec_mut().pattern = Some(regex);
        Ok(self)
    }

    /// The filter id. Defaults to the property name.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The tested property, `None` for closure filters.
    pub fn property(&self) -> Option<String> {
        match &self.snapshot().test {
            Test::Property { property, .. } => Some(property.clone()),
            Test::Custom(_) => None,
        }
    }

    /// The operator, if any.
    pub fn operator(&self) -> Option<FilterOperator> {
        match &self.snapshot().test {
            Test::Property { operator, .. } => *operator,
            Test::Custom(_) => None,
        }
    }

    /// The compared value.
    pub fn value(&self) -> FilterValue {
        self.snapshot().value.clone()
    }

    /// Replaces the compared value. Re-evaluates `disable_on_empty`.
    pub fn set_value(&self, value: impl Into<FilterValue>) {
        let value = value.into();
        self.update(|spec| {
            if spec.disable_on_empty {
                spec.disabled = value.is_empty();
            }
            spec.value = value;
        });
    }

    /// Replaces the operator.
    pub fn set_operator(&self, operator: Option<FilterOperator>) {
        self.update(|spec| {
            if let Test::Property { operator: op, .. } = &mut spec.test {
                *op = operator;
            }
        });
    }

    /// Whether the filter is currently disabled.
    pub fn is_disabled(&self) -> bool {
        self.snapshot().disabled
    }

    /// Enables or disables the filter.
    pub fn set_disabled(&self, disabled: bool) {
        self.update(|spec| spec.disabled = disabled);
    }

    /// Returns the string matcher used by operator-less filters, or `None`
    /// when the value is null.
    ///
    /// The value is escaped and anchored at the start unless `any_match` is
    /// set; with `exact_match` (and not `any_match`) it is anchored at the end
    /// too. Matching ignores case unless `case_sensitive` is set.
    pub fn matcher(&self) -> Option<Arc<Regex>> {
        if let Some(cached) = self.matcher.read().clone() {
            return cached;
        }
        let spec = self.snapshot();
        let matcher = match (&spec.pattern, spec.value.single()) {
            (Some(pattern), _) => Some(Arc::new(pattern.clone())),
            (None, None) | (None, Some(Value::Null)) => None,
            (None, Some(value)) => {
                let mut source = regex::escape(&value.to_string());
                if !spec.any_match {
                    source.insert(0, '^');
                    if spec.exact_match {
                        source.push('$');
                    }
                }
                match RegexBuilder::new(&source)
                    .case_insensitive(!spec.case_sensitive)
                    .build()
                {
                    Ok(regex) => Some(Arc::new(regex)),
                    Err(err) => {
                        tracing::warn!(target: targets::FILTER, %err, "failed to build matcher");
                        None
                    }
                }
            }
        };
        *self.matcher.write() = Some(matcher.clone());
        matcher
    }

    /// Tests an item. Disabled filters are not consulted here; callers
    /// (such as [`FilterCollection`](super::FilterCollection)) skip them.
    pub fn filter(&self, item: &T) -> bool {
        let spec = self.snapshot();
        let (property, reader, operator) = match &spec.test {
            Test::Custom(predicate) => return predicate(item),
            Test::Property {
                property,
                reader,
                operator,
            } => (property, reader, operator),
        };

        let mut candidate = reader(item, spec.root.as_deref(), property);
        if let Some(convert) = &spec.convert {
            candidate = convert(candidate);
        }

        let Some(operator) = operator else {
            return match self.matcher() {
                Some(matcher) => matcher.is_match(&candidate.to_string()),
                None => candidate.is_null(),
            };
        };

        if let FilterValue::List(list) = &spec.value {
            return match operator {
                FilterOperator::In => list.iter().any(|v| v.loose_eq(&candidate)),
                _ => false,
            };
        }
        let mut value = spec.value.single().cloned().unwrap_or_default();
        if let Some(convert) = &spec.convert {
            value = convert(value);
        }
        apply_operator(*operator, &candidate, &value)
    }

    /// Returns the wire shape of this filter.
    pub fn serialize(&self) -> SerializedFilter {
        let spec = self.snapshot();
        SerializedFilter {
            property: self.property(),
            operator: self.operator(),
            value: spec.value.clone(),
            any_match: spec.any_match,
            exact_match: spec.exact_match,
            case_sensitive: spec.case_sensitive,
        }
    }
}

/// Coerces `candidate` to the kind of `like`, the way loosely typed filter
/// values are compared.
fn coerce(candidate: &Value, like: &Value) -> Value {
    match (candidate, like) {
        (Value::Null, _) => Value::Null,
        (c, Value::String(_)) => Value::String(c.to_string()),
        (Value::String(s), Value::Int(_) | Value::Float(_)) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .map(Value::Int)
                .or_else(|_| trimmed.parse::<f64>().map(Value::Float))
                .unwrap_or_else(|_| candidate.clone())
        }
        (Value::String(s), Value::Bool(_)) => match s.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => candidate.clone(),
        },
        (c, _) => c.clone(),
    }
}

fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn apply_operator(operator: FilterOperator, candidate: &Value, value: &Value) -> bool {
    use std::cmp::Ordering::*;

    match operator {
        FilterOperator::StrictEq => strict_eq(candidate, value),
        FilterOperator::StrictNe => !strict_eq(candidate, value),
        FilterOperator::Eq => coerce(candidate, value).loose_eq(value),
        FilterOperator::Ne => !coerce(candidate, value).loose_eq(value),
        FilterOperator::Like => match value.as_str() {
            Some(needle) if !needle.is_empty() => {
                !candidate.is_null()
                    && candidate
                        .to_string()
                        .to_lowercase()
                        .contains(&needle.to_lowercase())
            }
            _ => false,
        },
        FilterOperator::In => candidate.loose_eq(value),
        ordering_op => {
            let candidate = coerce(candidate, value);
            if candidate.is_null() || value.is_null() {
                return false;
            }
            let ordering = candidate.compare(value);
            match ordering_op {
                FilterOperator::Lt => ordering == Less,
                FilterOperator::Le => ordering != Greater,
                FilterOperator::Ge => ordering != Less,
                FilterOperator::Gt => ordering == Greater,
                _ => false,
            }
        }
    }
}

impl<T: 'static> fmt::Debug for Filter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("id", &self.id)
            .field("property", &self.property())
            .field("operator", &self.operator())
            .field("value", &self.value())
            .field("disabled", &self.is_disabled())
            .finish()
    }
}

static_assertions::assert_impl_all!(Filter<serde_json::Value>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value as Json, json};

    fn filter(property: &str, operator: &str, value: impl Into<FilterValue>) -> Filter<Json> {
        Filter::new(property, Some(operator.parse().unwrap()), value).unwrap()
    }

    #[test]
    fn test_operator_parse() {
        assert_eq!("==".parse::<FilterOperator>().unwrap(), FilterOperator::Eq);
        assert_eq!("ge".parse::<FilterOperator>().unwrap(), FilterOperator::Ge);
        assert!(matches!(
            "~=".parse::<FilterOperator>(),
            Err(CollectionError::InvalidOperator(_))
        ));
    }

    #[test]
    fn test_ordering_operators() {
        let item = json!({ "age": 30 });
        assert!(filter("age", "<", 31).filter(&item));
        assert!(!filter("age", "<", 30).filter(&item));
        assert!(filter("age", "<=", 30).filter(&item));
        assert!(filter("age", ">=", 30).filter(&item));
        assert!(!filter("age", ">", 30).filter(&item));
        assert!(!filter("age", ">", 1).filter(&json!({})));
    }

    #[test]
    fn test_equality_coerces() {
        let item = json!({ "id": "5" });
        assert!(filter("id", "=", 5).filter(&item));
        assert!(!filter("id", "===", 5).filter(&item));
        assert!(filter("id", "!==", 5).filter(&item));
        assert!(!filter("id", "!=", 5).filter(&item));
    }

    #[test]
    fn test_in_and_like() {
        let item = json!({ "team": "Blue", "name": "Alice Smith" });
        let teams = filter("team", "in", vec![Value::from("Red"), Value::from("Blue")]);
        assert!(teams.filter(&item));
        assert!(filter("name", "like", "SMITH").filter(&item));
        assert!(!filter("name", "like", "").filter(&item));
    }

    #[test]
    fn test_in_requires_list() {
        let err = Filter::<Json>::new("team", Some(FilterOperator::In), "Red").unwrap_err();
        assert!(matches!(err, CollectionError::InvalidFilter(_)));
    }

    #[test]
    fn test_string_matcher_flags() {
        let item = json!({ "name": "Alice" });
        let starts = Filter::<Json>::new("name", None, "ali").unwrap();
        assert!(starts.filter(&item));

        let case = Filter::<Json>::new("name", None, "ali")
            .unwrap()
            .with_case_sensitive(true);
        assert!(!case.filter(&item));

        let any = Filter::<Json>::new("name", None, "ice")
            .unwrap()
            .with_any_match(true);
        assert!(any.filter(&item));

        let exact = Filter::<Json>::new("name", None, "ali")
            .unwrap()
            .with_exact_match(true);
        assert!(!exact.filter(&item));
        exact.set_value("alice");
        assert!(exact.filter(&item));
    }

    #[test]
    fn test_matcher_escapes_value() {
        let filter = Filter::<Json>::new("v", None, "a.b").unwrap();
        assert!(filter.filter(&json!({ "v": "a.b" })));
        assert!(!filter.filter(&json!({ "v": "axb" })));
    }

    #[test]
    fn test_custom_pattern() {
        let filter = Filter::<Json>::new("code", None, Value::Null)
            .unwrap()
            .with_pattern(r"^[A-Z]{2}\d+$")
            .unwrap();
        assert!(filter.filter(&json!({ "code": "AB12" })));
        assert!(!filter.filter(&json!({ "code": "ab12" })));

        let err = Filter::<Json>::new("code", None, "x").unwrap().with_pattern("(");
        assert!(matches!(err, Err(CollectionError::InvalidRegex(_))));
    }

    #[test]
    fn test_null_value_matches_missing() {
        let filter = Filter::<Json>::new("x", None, Value::Null).unwrap();
        assert!(filter.filter(&json!({})));
        assert!(!filter.filter(&json!({ "x": 1 })));
    }

    #[test]
    fn test_disable_on_empty() {
        let filter = Filter::<Json>::new("name", None, "")
            .unwrap()
            .with_disable_on_empty(true);
        assert!(filter.is_disabled());
        filter.set_value("a");
        assert!(!filter.is_disabled());
        filter.set_value(Value::Null);
        assert!(filter.is_disabled());
    }

    #[test]
    fn test_from_config_validation() {
        let reader = Some(record_reader::<Json>());
        let no_property = FilterConfig {
            value: Some("x".into()),
            ..Default::default()
        };
        assert!(matches!(
            Filter::from_config(&no_property, reader.clone()),
            Err(CollectionError::InvalidFilter(_))
        ));

        let no_value = FilterConfig {
            property: Some("name".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Filter::from_config(&no_value, reader.clone()),
            Err(CollectionError::InvalidFilter(_))
        ));

        let config: FilterConfig = serde_json::from_str(
            r#"{ "property": "age", "operator": ">", "value": 10, "root": "data" }"#,
        )
        .unwrap();
        let filter = Filter::from_config(&config, reader).unwrap();
        assert!(filter.filter(&json!({ "data": { "age": 11 } })));
    }

    #[test]
    fn test_serialize_omits_id_and_root() {
        let filter = filter("age", ">", 10).with_id("adults").with_root("data");
        let wire = serde_json::to_value(filter.serialize()).unwrap();
        assert_eq!(wire, json!({ "property": "age", "operator": ">", "value": 10 }));
    }

    #[test]
    fn test_closure_filter() {
        let filter = Filter::<Json>::from_fn(|item| item["flag"] == json!(true));
        assert!(filter.id().starts_with("filter-"));
        assert!(filter.filter(&json!({ "flag": true })));
        assert!(!filter.filter(&json!({ "flag": false })));
    }
}
