//! Prelude module for Horizon Collections.
//!
//! This module re-exports the most commonly used types for convenient importing:
//!
//! ```ignore
//! use horizon_collections::prelude::*;
//! ```

// ============================================================================
// Errors
// ============================================================================

pub use crate::error::{CollectionError, Result};

// ============================================================================
// Values and Records
// ============================================================================

pub use crate::value::{FieldReader, Record, Value, record_reader};

// ============================================================================
// Sorting and Filtering
// ============================================================================

pub use crate::filtering::{Filter, FilterCollection, FilterConfig, FilterOperator};
pub use crate::options::SortOptions;
pub use crate::sorting::{
    CompareFn, SortDirection, SortMode, Sorter, SorterCollection, SorterConfig,
};

// ============================================================================
// Collections and Observers
// ============================================================================

pub use crate::observable::{
    AddDetails, Aggregation, Collection, CollectionObserver, CollectionView, ItemChangeDetails,
    RemoveDetails, UpdateKeyDetails,
};

// ============================================================================
// Grouping
// ============================================================================

pub use crate::grouping::{Group, GroupCollection, GroupKey, Grouper};

// ============================================================================
// Mixed Collections
// ============================================================================

pub use crate::mixed_collection::MixedCollection;

// ============================================================================
// Signals
// ============================================================================

pub use horizon_collections_core::{ConnectionId, Signal};
