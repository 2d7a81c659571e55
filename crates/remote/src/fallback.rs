//! Primary source with a mirror to fall back on.

use crate::error::{ErrorKind, Result};
use crate::models::ShowId;
use crate::{Fetched, MappingSource, SourceHandle};
use async_trait::async_trait;
use exn::ResultExt;

/// Asks the primary source first and the mirror only when the primary
/// produced nothing usable.
///
/// | Primary               | Mirror                | Result                     |
/// |-----------------------|-----------------------|----------------------------|
/// | `Response`            | (not asked)           | primary's response         |
/// | `Empty` or error      | `Response`            | mirror's response          |
/// | `Empty` or error      | `Empty`               | `Empty`                    |
/// | `Empty` or error      | error                 | [`ErrorKind::Exhausted`]   |
///
/// A response reporting failure (`"result": "failure"`) is still a response;
/// it is the service's answer for that show and the mirror is not asked.
#[derive(Clone)]
pub struct FallbackSource {
    name: String,
    primary: SourceHandle,
    mirror: SourceHandle,
}

impl FallbackSource {
    pub fn new(primary: SourceHandle, mirror: SourceHandle) -> Self {
        let name = format!("{}+{}", primary.name(), mirror.name());
        Self { name, primary, mirror }
    }
}

#[async_trait]
impl MappingSource for FallbackSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, show: ShowId) -> Result<Fetched> {
        match self.primary.fetch(show).await {
            Ok(Fetched::Response(response)) => return Ok(Fetched::Response(response)),
            Ok(Fetched::Empty) => {
                tracing::info!(show, primary = self.primary.name(), mirror = self.mirror.name(), "No scene mapping from primary source; trying mirror");
            },
            Err(err) => {
                tracing::warn!(show, primary = self.primary.name(), mirror = self.mirror.name(), error = ?err, "Primary mapping source failed; trying mirror");
            },
        }
        match self.mirror.fetch(show).await.or_raise(|| ErrorKind::Exhausted)? {
            Fetched::Empty => {
                tracing::info!(show, mirror = self.mirror.name(), "Mirror also has no scene mapping; giving up");
                Ok(Fetched::Empty)
            },
            response => Ok(response),
        }
    }
}
