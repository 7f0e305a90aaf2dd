//! Error types for the object model.

use thiserror::Error;

/// Errors from parsing model values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A namespace pattern list was empty or contained an empty entry.
    #[error("namespace pattern must not be empty")]
    EmptyPattern,
}
