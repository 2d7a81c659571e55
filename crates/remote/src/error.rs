//! Remote Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A remote source error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for remote source operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The HTTP client could not be constructed.
    #[display("could not build HTTP client")]
    Client,
    /// Connection failure, timeout, or the body could not be read.
    #[display("network error talking to {_0}")]
    Network(#[error(not(source))] String),
    /// The endpoint answered with a non-success HTTP status.
    #[display("{_0} responded with HTTP {_1}")]
    Status(#[error(not(source))] String, #[error(not(source))] u16),
    /// The body was not a mapping response.
    #[display("malformed response from {_0}")]
    Parse(#[error(not(source))] String),
    /// Every configured source failed.
    #[display("all mapping sources failed")]
    Exhausted,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Exhausted => true,
            Self::Status(_, status) => *status >= 500 || *status == 429,
            Self::Client | Self::Parse(_) => false,
        }
    }
}
