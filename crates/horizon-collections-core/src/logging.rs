//! Logging facilities for Horizon Collections.
//!
//! Horizon Collections uses the `tracing` crate for instrumentation. To see
//! logs, install a tracing subscriber in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("horizon_collections=debug")
//!         .init();
//! }
//! ```
//!
//! Structural mutations log at `trace`, bulk operations (refresh, re-sort,
//! group rebuilds) at `debug`.

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "horizon_collections_core";
    /// Signal/slot system target.
    pub const SIGNAL: &str = "horizon_collections_core::signal";
    /// Update bracket target.
    pub const UPDATE: &str = "horizon_collections_core::update";
    /// Keyed collection target.
    pub const COLLECTION: &str = "horizon_collections::collection";
    /// Chained view target.
    pub const VIEW: &str = "horizon_collections::view";
    /// Sorter and sorter collection target.
    pub const SORTER: &str = "horizon_collections::sorter";
    /// Filter and filter collection target.
    pub const FILTER: &str = "horizon_collections::filter";
    /// Grouping target.
    pub const GROUP: &str = "horizon_collections::group";
    /// Mixed collection target.
    pub const MIXED: &str = "horizon_collections::mixed";
}

