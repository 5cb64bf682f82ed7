//! Re-entrant begin/end update brackets.
//!
//! Collections announce logically atomic changes inside a begin/end update
//! pair. Brackets nest: only the outermost `begin` and the outermost `end`
//! are reported, so observers that batch their work see exactly one bracket
//! per logical operation even when the operation is composed of several
//! smaller ones or when an observer re-enters the collection.
//!
//! # Example
//!
//! ```
//! use horizon_collections_core::UpdateDepth;
//!
//! let depth = UpdateDepth::new();
//! assert!(depth.begin());   // outermost
//! assert!(!depth.begin());  // nested
//! assert!(!depth.end().unwrap());
//! assert!(depth.end().unwrap()); // outermost end
//! assert!(depth.end().is_err());
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{CoreError, Result};
use crate::logging::targets;

/// A nesting counter for begin/end update brackets.
#[derive(Debug, Default)]
pub struct UpdateDepth {
    depth: AtomicUsize,
}

impl UpdateDepth {
    /// Creates a counter with no open bracket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a bracket. Returns `true` when this is the outermost one.
    pub fn begin(&self) -> bool {
        self.depth.fetch_add(1, Ordering::SeqCst) == 0
    }

    /// Closes a bracket. Returns `true` when the outermost bracket closed.
    ///
    /// Closing a bracket that was never opened is an error and leaves the
    /// counter untouched.
    pub fn end(&self) -> Result<bool> {
        let previous = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| {
                depth.checked_sub(1)
            })
            .map_err(|_| {
                tracing::warn!(target: targets::UPDATE, "update bracket underflow");
                CoreError::UpdateUnderflow
            })?;
        Ok(previous == 1)
    }

    /// Returns `true` while at least one bracket is open.
    pub fn is_updating(&self) -> bool {
        self.depth() > 0
    }

    /// The current nesting depth.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_brackets_report_outermost_only() {
        let depth = UpdateDepth::new();
        assert!(!depth.is_updating());

        assert!(depth.begin());
        assert!(!depth.begin());
        assert!(!depth.begin());
        assert_eq!(depth.depth(), 3);

        assert!(!depth.end().unwrap());
        assert!(!depth.end().unwrap());
        assert!(depth.is_updating());
        assert!(depth.end().unwrap());
        assert!(!depth.is_updating());
    }

    #[test]
    fn test_underflow_is_an_error() {
        let depth = UpdateDepth::new();
        assert_eq!(depth.end(), Err(CoreError::UpdateUnderflow));
        assert_eq!(depth.depth(), 0);

        // The counter still works after the failed end.
        assert!(depth.begin());
        assert!(depth.end().unwrap());
    }
}
