//! Error types for Horizon Collections core.

use std::fmt;

/// The error type for core notification plumbing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// `end_update` was called without a matching `begin_update`.
    UpdateUnderflow,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpdateUnderflow => {
                write!(f, "end_update called without a matching begin_update")
            }
        }
    }
}

impl std::error::Error for CoreError {}

/// A specialized Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
