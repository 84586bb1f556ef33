//! Error types for the search-query compiler

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Search compilation errors.
///
/// `UnsupportedParameter` is a soft signal: the top-level compiler collects
/// those occurrences into the unsupported list instead of failing the search.
/// Every other variant is a deterministic client-input failure that surfaces
/// synchronously from `parse`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid search operation: {0}")]
    InvalidSearchOperation(String),

    #[error("Invalid search value: {0}")]
    InvalidValue(String),

    #[error("Invalid continuation token: {0}")]
    InvalidContinuationToken(String),

    #[error("Unsupported search parameter: {0}")]
    UnsupportedParameter(String),
}
