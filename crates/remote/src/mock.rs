//! Scripted mapping source for testing.

use crate::error::{ErrorKind, Result};
use crate::models::{MapResponse, ShowId};
use crate::{Fetched, MappingSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// What a [`MockSource`] answers for a show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Respond(MapResponse),
    Empty,
    /// Behave like a network failure.
    Fail,
}

/// In-memory mapping source for testing.
///
/// Replies are configured per show; shows without a reply get
/// [`Fetched::Empty`]. Every call to [`fetch`](MappingSource::fetch) is
/// counted, so tests can assert how often the network would have been hit.
///
/// # Examples
///
/// ```
/// # #[cfg(feature = "mock")]
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use scenemap_remote::{MapEntry, MapResponse, MappingSource, MockReply, MockSource};
///
/// let source = MockSource::new("xem").with_reply(
///     76703,
///     MockReply::Respond(MapResponse::success([MapEntry::new((2, 1), (1, 14))])),
/// );
/// source.fetch(76703).await?;
/// assert_eq!(source.calls(), 1);
/// # Ok(())
/// # }
/// # #[cfg(not(feature = "mock"))]
/// # fn main() {}
/// ```
#[derive(Debug)]
pub struct MockSource {
    name: String,
    replies: RwLock<HashMap<ShowId, MockReply>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replies: RwLock::new(HashMap::new()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_reply(mut self, show: ShowId, reply: MockReply) -> Self {
        self.replies.get_mut().insert(show, reply);
        self
    }

    /// Wait this long before every reply, like a slow or unresponsive server.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Change the reply for a show after the source has been shared.
    pub async fn set_reply(&self, show: ShowId, reply: MockReply) {
        self.replies.write().await.insert(show, reply);
    }

    /// Number of fetches made so far, across all shows.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MappingSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, show: ShowId) -> Result<Fetched> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.replies.read().await.get(&show) {
            Some(MockReply::Respond(response)) => Ok(Fetched::Response(response.clone())),
            Some(MockReply::Empty) | None => Ok(Fetched::Empty),
            Some(MockReply::Fail) => exn::bail!(ErrorKind::Network(self.name.clone())),
        }
    }
}
