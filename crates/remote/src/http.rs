//! HTTP mapping source for thexem.de-compatible endpoints.

use crate::error::{ErrorKind, Result};
use crate::models::{MapResponse, ShowId};
use crate::{Fetched, MappingSource};
use async_trait::async_trait;
use exn::ResultExt;
use std::time::Duration;
use tracing::instrument;

/// Queries `{endpoint}?id={show}&origin=tvdb&destination=scene`.
///
/// # Examples
///
/// ```no_run
/// use scenemap_remote::{HttpSource, MappingSource};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let xem = HttpSource::new("xem", "https://thexem.de/map/all", Duration::from_secs(30), "scenemap")?;
/// let _fetched = xem.fetch(76703).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpSource {
    name: String,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSource {
    /// Create a new HTTP source.
    ///
    /// The timeout covers the whole request, from connecting until the body
    /// has been read. An unresponsive endpoint must not stall lookups for
    /// longer than that.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
        user_agent: impl AsRef<str>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.as_ref())
            .timeout(timeout)
            .build()
            .or_raise(|| ErrorKind::Client)?;
        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Turn a response body into a [`Fetched`].
///
/// Blank bodies and a bare `null` count as "nothing", anything else must be a
/// [`MapResponse`].
pub(crate) fn parse_body(source: &str, body: &str) -> Result<Fetched> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(Fetched::Empty);
    }
    let parsed: Option<MapResponse> =
        serde_json::from_str(body).or_raise(|| ErrorKind::Parse(source.to_string()))?;
    Ok(parsed.map_or(Fetched::Empty, Fetched::Response))
}

#[async_trait]
impl MappingSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument("fetching remote scene mapping", skip(self), fields(source = %self.name))]
    async fn fetch(&self, show: ShowId) -> Result<Fetched> {
        tracing::debug!(endpoint = %self.endpoint, "Looking up scene mapping");
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("id", show.to_string().as_str()), ("origin", "tvdb"), ("destination", "scene")])
            .send()
            .await
            .or_raise(|| ErrorKind::Network(self.name.clone()))?;
        let status = response.status();
        if !status.is_success() {
            exn::bail!(ErrorKind::Status(self.name.clone(), status.as_u16()));
        }
        let body = response.text().await.or_raise(|| ErrorKind::Network(self.name.clone()))?;
        parse_body(&self.name, &body)
    }
}
