//! SQLite stores for scene numbering.
//!
//! Two databases are involved, each opened through [`Database`]:
//!
//! - The **primary** store holds user overrides ([`OverrideRepository`]).
//!   It is the only place those exist, so it must be kept.
//! - The **cache** store holds scene numbering fetched from the remote
//!   mapping service along with a per-show refresh marker
//!   ([`MappingRepository`]). Deleting it only costs a re-fetch.
//!
//! Connecting to either store runs its migrations, so the schema always
//! exists before a repository is handed out.

mod db;
pub mod error;
mod mappings;
mod models;
mod overrides;

pub use crate::db::{Database, Store};
pub use crate::mappings::MappingRepository;
pub use crate::overrides::OverrideRepository;
