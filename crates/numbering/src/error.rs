//! Numbering Error Types
//!
//! Lookups never fail because of missing data, they fall back to identity.
//! What is left are failures of the local stores and of setting things up.

use derive_more::{Display, Error};

/// A numbering error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for numbering operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// One of the local stores could not be read or written.
    #[display("numbering store unavailable")]
    Cache,
    #[display("invalid configuration")]
    Config,
    /// The remote sources could not be constructed.
    #[display("could not set up remote mapping sources")]
    Remote,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cache)
    }
}
