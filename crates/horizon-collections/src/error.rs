//! Error types for collection operations.

use horizon_collections_core::CoreError;

/// Result type alias for collection operations.
pub type Result<T> = std::result::Result<T, CollectionError>;

/// Errors raised by collections, sorters and filters.
///
/// Every variant describes a programming or configuration error. None of
/// them are transient, so none should be retried.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    /// An item was added under a key that is already present.
    #[error("Duplicate key '{key}'")]
    DuplicateKey { key: String },

    /// A key that the operation requires is not present.
    #[error("Key '{key}' not found")]
    KeyNotFound { key: String },

    /// An index is outside the collection bounds.
    #[error("Index {index} out of bounds for collection of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A sorter descriptor could not be turned into a sorter.
    #[error("Invalid sorter: {0}")]
    InvalidSorter(String),

    /// A sort insertion mode string was not recognized.
    #[error("Sorter insertion point must be \"multi\", \"prepend\", \"append\" or \"replace\", got '{0}'")]
    UnknownSortMode(String),

    /// A sort direction string was not recognized.
    #[error("Sort direction must be \"ASC\" or \"DESC\", got '{0}'")]
    UnknownDirection(String),

    /// A property-based sorter or filter was requested but no field reader
    /// is available for the item type.
    #[error("No field reader available to read property '{property}'")]
    MissingFieldReader { property: String },

    /// A value was added without a key to a collection that has no key
    /// function.
    #[error("No key function available to derive the key of an added value")]
    MissingKeyFn,

    /// The same observer was registered twice.
    #[error("Observer already added")]
    ObserverAlreadyAdded,

    /// A filter descriptor is incomplete or contradictory.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// A filter operator string was not recognized.
    #[error("Unknown filter operator '{0}'")]
    InvalidOperator(String),

    /// A filter pattern failed to compile.
    #[error("Invalid filter pattern: {0}")]
    InvalidRegex(#[from] regex::Error),

    /// A reorder mapping is not a valid partial permutation.
    #[error("Invalid reorder mapping: {0}")]
    InvalidMapping(String),

    /// Options could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Error from the core notification plumbing.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl CollectionError {
    /// Create a duplicate key error.
    pub fn duplicate_key(key: &impl std::fmt::Debug) -> Self {
        Self::DuplicateKey {
            key: format!("{key:?}"),
        }
    }

    /// Create a key-not-found error.
    pub fn key_not_found(key: &impl std::fmt::Debug) -> Self {
        Self::KeyNotFound {
            key: format!("{key:?}"),
        }
    }

    /// Create a missing field reader error.
    pub fn missing_reader(property: impl Into<String>) -> Self {
        Self::MissingFieldReader {
            property: property.into(),
        }
    }
}

impl From<serde_json::Error> for CollectionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<toml::de::Error> for CollectionError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}
