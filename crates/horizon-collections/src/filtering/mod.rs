//! Filters and filter sets.

mod filter;
mod filter_collection;

pub use filter::{
    Filter, FilterConfig, FilterOperator, FilterValue, PredicateFn, SerializedFilter,
};
pub use filter_collection::{FilterCollection, FilterDescriptor};
