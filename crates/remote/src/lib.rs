//! Sources of community-maintained scene numbering.
//!
//! A [`MappingSource`] fetches the full indexer → scene mapping for one show.
//! [`HttpSource`] talks to a thexem.de-compatible endpoint, and
//! [`FallbackSource`] chains a primary source with a mirror that is only
//! asked when the primary has nothing to offer.

pub mod error;
mod fallback;
mod http;
#[cfg(any(test, feature = "mock"))]
mod mock;
pub mod models;

pub use crate::fallback::FallbackSource;
pub use crate::http::HttpSource;
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::{MockReply, MockSource};
pub use crate::models::{MapEntry, MapResponse, Numbering, ShowId};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub type SourceHandle = Arc<dyn MappingSource + Send + Sync>;

/// What a source produced when asked for a show's mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// A well-formed response. It may still report a failure (unknown show,
    /// no mapping) through [`MapResponse::is_success`].
    Response(MapResponse),
    /// The source answered with nothing at all (empty body or `null`).
    Empty,
}

/// Unified interface for mapping sources.
#[async_trait]
pub trait MappingSource: Send + Sync {
    /// Name of the source, used for logging only.
    fn name(&self) -> &str;

    /// Fetch the complete indexer → scene mapping for a show.
    ///
    /// Transport and parsing problems are errors; an empty answer is not.
    async fn fetch(&self, show: ShowId) -> Result<Fetched>;
}
