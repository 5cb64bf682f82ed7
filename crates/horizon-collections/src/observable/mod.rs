//! Observable keyed collections and views over them.
//!
//! - [`Collection`]: the ordered, keyed, optionally sorted and grouped
//!   container.
//! - [`CollectionObserver`]: the typed observer contract, with change payloads
//!   ([`AddDetails`], [`RemoveDetails`], [`ItemChangeDetails`],
//!   [`UpdateKeyDetails`]).
//! - [`CollectionView`]: a filtered child collection that follows a source.

mod collection;
mod observer;
mod view;

pub use collection::{Aggregation, Collection};
pub(crate) use collection::insertion_point;
pub use observer::{
    AddDetails, ChangeSummary, CollectionItem, CollectionKey, CollectionObserver,
    CollectionSignals, ItemChangeDetails, KeyFn, ObserverId, RemoveDetails, UpdateKeyDetails,
};
pub use view::CollectionView;
