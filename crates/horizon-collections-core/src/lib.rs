//! Core notification plumbing for Horizon Collections.
//!
//! This crate provides the pieces every observable collection is built on:
//!
//! - **Signal/Slot System**: Type-safe change notification for consumers
//! - **Update Brackets**: Re-entrant begin/end update nesting
//! - **Logging**: `tracing` targets for each subsystem
//!
//! # Signal/Slot Example
//!
//! ```
//! use horizon_collections_core::Signal;
//!
//! let items_added = Signal::<Vec<u32>>::new();
//!
//! let conn_id = items_added.connect(|items| {
//!     println!("added {} items", items.len());
//! });
//!
//! items_added.emit(vec![1, 2, 3]);
//! items_added.disconnect(conn_id);
//! ```

mod error;
pub mod logging;
pub mod signal;
pub mod update;

pub use error::{CoreError, Result};
pub use signal::{ConnectionGuard, ConnectionId, Signal};
pub use update::UpdateDepth;
