//! Grouping: groupers, groups, and the group collection that keeps a
//! collection partitioned by group key.

mod group;
mod group_collection;
mod grouper;

pub use group::Group;
pub use group_collection::GroupCollection;
pub use grouper::{GroupFn, GroupKey, Grouper};
