//! Indexer ↔ scene episode numbering.
//!
//! Release groups ("the scene") do not always number episodes the way the
//! metadata indexer does. A [`Resolver`] translates between the two using
//! user overrides first, the community mapping second, and identity last.

pub mod error;
mod refresh;
mod resolver;

pub use crate::refresh::{RefreshOutcome, RefreshPolicy, Refresher};
pub use crate::resolver::{Fallback, Resolver};
pub use scenemap_remote::{Numbering, ShowId};
