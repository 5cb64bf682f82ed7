//! Observable sorted, filtered and grouped in-memory collections.
//!
//! This crate provides an incrementally maintained data pipeline:
//!
//! - **Values and Records**: Field access through [`Record`] and [`FieldReader`]
//! - **Sorting**: [`Sorter`] and the ordered, observable [`SorterCollection`]
//! - **Filtering**: [`Filter`] and [`FilterCollection`] (AND semantics)
//! - **Collections**: The keyed, observable [`Collection`] and filtered
//!   [`CollectionView`]s over it
//! - **Grouping**: [`Grouper`], [`Group`] and the [`GroupCollection`] that keeps
//!   a collection partitioned as it changes
//! - **Mixed Collections**: The ordered key-to-value [`MixedCollection`]
//!
//! Change notification is built on [`horizon_collections_core`]: every
//! collection exposes typed [`Signal`]s, and [`Collection`] additionally
//! accepts [`CollectionObserver`]s that are called in priority order inside
//! begin/end update brackets.
//!
//! # Example
//!
//! ```
//! use horizon_collections::prelude::*;
//! use serde_json::{json, Value as Json};
//!
//! let roster = Collection::<Json, i64>::for_records(|m| m["id"].as_i64().unwrap_or(0));
//! roster.group_by(Some("team")).unwrap();
//! roster.add_all(vec![
//!     json!({ "id": 1, "team": "A" }),
//!     json!({ "id": 2, "team": "B" }),
//!     json!({ "id": 3, "team": "A" }),
//! ]).unwrap();
//!
//! let groups = roster.groups().unwrap();
//! assert_eq!(groups.get(&Some("A".into())).unwrap().keys(), vec![1, 3]);
//!
//! roster.remove_by_key(&2);
//! assert_eq!(groups.len(), 1);
//! ```

mod error;
pub mod filtering;
pub mod grouping;
pub mod mixed_collection;
pub mod observable;
pub mod options;
pub mod prelude;
pub mod sorting;
pub mod value;

pub use error::{CollectionError, Result};
pub use filtering::{Filter, FilterCollection, FilterConfig, FilterOperator};
pub use grouping::{Group, GroupCollection, GroupKey, Grouper};
pub use mixed_collection::MixedCollection;
pub use observable::{Collection, CollectionObserver, CollectionView};
pub use options::{SortOptions, SortOptionsOverride};
pub use sorting::{SortDirection, SortMode, Sorter, SorterCollection};
pub use value::{FieldReader, Record, Value};

pub use horizon_collections_core::Signal;
