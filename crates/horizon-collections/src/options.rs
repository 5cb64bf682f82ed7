//! Sort options shared between a collection and its sorter set.
//!
//! [`SortOptions`] is an immutable value. Change it by building a new one with
//! the `with_*` methods or by merging a [`SortOptionsOverride`] on top.
//!
//! Options can be loaded from TOML or JSON:
//!
//! ```
//! use horizon_collections::options::SortOptions;
//! use horizon_collections::sorting::SortDirection;
//!
//! let options = SortOptions::from_toml_str(r#"
//!     default_direction = "DESC"
//!     multi_sort_limit = 2
//!     root_property = "data"
//! "#).unwrap();
//!
//! assert_eq!(options.default_direction(), SortDirection::Desc);
//! assert_eq!(options.multi_sort_limit(), 2);
//! assert_eq!(options.root_property(), Some("data"));
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sorting::SortDirection;

/// Default number of sorters kept by a `multi` sort.
pub const DEFAULT_MULTI_SORT_LIMIT: usize = 3;

/// Sorting policy supplied by the owner of a sorter set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortOptions {
    default_direction: SortDirection,
    multi_sort_limit: usize,
    root_property: Option<String>,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            default_direction: SortDirection::Asc,
            multi_sort_limit: DEFAULT_MULTI_SORT_LIMIT,
            root_property: None,
        }
    }
}

impl SortOptions {
    /// Creates the default options: ascending, limit 3, no root.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Parses options from a JSON document. Missing keys take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Direction given to sorters created without an explicit direction.
    pub fn default_direction(&self) -> SortDirection {
        self.default_direction
    }

    /// Maximum number of sorters kept after a `multi` sort.
    pub fn multi_sort_limit(&self) -> usize {
        self.multi_sort_limit
    }

    /// Name of the nested object that sorters read their properties from.
    pub fn root_property(&self) -> Option<&str> {
        self.root_property.as_deref()
    }

    /// Returns a copy with a different default direction.
    pub fn with_default_direction(mut self, direction: SortDirection) -> Self {
        self.default_direction = direction;
        self
    }

    /// Returns a copy with a different multi-sort limit.
    pub fn with_multi_sort_limit(mut self, limit: usize) -> Self {
        self.multi_sort_limit = limit;
        self
    }

    /// Returns a copy with a different root property.
    pub fn with_root_property(mut self, root: impl Into<String>) -> Self {
        self.root_property = Some(root.into());
        self
    }

    /// Returns a copy without a root property.
    pub fn without_root_property(mut self) -> Self {
        self.root_property = None;
        self
    }

    /// Returns a copy with every field set in `overrides` replaced.
    pub fn merged_with(&self, overrides: &SortOptionsOverride) -> Self {
        Self {
            default_direction: overrides.default_direction.unwrap_or(self.default_direction),
            multi_sort_limit: overrides.multi_sort_limit.unwrap_or(self.multi_sort_limit),
            root_property: overrides
                .root_property
                .clone()
                .or_else(|| self.root_property.clone()),
        }
    }
}

/// A partial set of options, merged onto [`SortOptions`] with
/// [`SortOptions::merged_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortOptionsOverride {
    /// Overrides the default direction.
    pub default_direction: Option<SortDirection>,
    /// Overrides the multi-sort limit.
    pub multi_sort_limit: Option<usize>,
    /// Overrides the root property.
    pub root_property: Option<String>,
}
