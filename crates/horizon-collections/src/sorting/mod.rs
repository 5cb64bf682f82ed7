//! Sorters and sorter sets.

mod sorter;
mod sorter_collection;

pub use sorter::{
    CompareFn, SerializedSorter, SortDirection, Sorter, SorterConfig, SorterState, TransformFn,
};
pub use sorter_collection::{SortMode, SorterCollection, SorterDescriptor};
