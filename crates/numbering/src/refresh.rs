//! Keeping a show's cached remote mapping fresh.
//!
//! A show is either FRESH (the remote service answered for it within the
//! last `max_age`) or STALE (never answered, or answered too long ago).
//! Stale shows are refreshed inline, by whichever caller needs the data
//! first; there is no background task.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use scenemap_cache::MappingRepository;
use scenemap_remote::{Fetched, ShowId, SourceHandle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use time::UtcDateTime;
use tokio::sync::Mutex as AsyncMutex;
use tracing::instrument;

/// Decides whether a show's cached mapping is too old to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    max_age: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_AGE)
    }
}

impl RefreshPolicy {
    /// One day.
    pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(86_400);

    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// A show that was never refreshed is always stale. Otherwise it goes
    /// stale once strictly more than `max_age` has passed.
    pub fn is_stale(&self, last_refreshed: Option<UtcDateTime>, now: UtcDateTime) -> bool {
        let Some(last) = last_refreshed else {
            return true;
        };
        let max_age = i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX);
        now.unix_timestamp().saturating_sub(last.unix_timestamp()) > max_age
    }
}

/// What a refresh attempt did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The show's cached rows were replaced; this many are stored now.
    Replaced(usize),
    /// The service answered but reported a failure (with its message, if it
    /// sent one). Cached rows are untouched, the marker was updated.
    Rejected(Option<String>),
    /// Neither source produced an answer. Nothing was written, so the next
    /// lookup tries again.
    Unavailable,
}

/// Refresh bookkeeping for one show.
///
/// `attempts` only changes while `lock` is held. A caller that read it before
/// queueing on the lock can tell whether a refresh ran while it waited.
#[derive(Debug, Default)]
struct Slot {
    lock: AsyncMutex<()>,
    attempts: AtomicU64,
}

impl Slot {
    fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Acquire)
    }
}

/// One slot per show currently being refreshed.
///
/// Slots for shows nobody is refreshing are dropped the next time a slot is
/// handed out.
#[derive(Debug, Default)]
struct InFlight {
    slots: Mutex<HashMap<ShowId, Arc<Slot>>>,
}

impl InFlight {
    fn slot(&self, show: ShowId) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        Arc::clone(slots.entry(show).or_default())
    }
}

/// Fetches and stores remote mappings for stale shows.
#[derive(Clone)]
pub struct Refresher {
    mappings: MappingRepository,
    source: SourceHandle,
    policy: RefreshPolicy,
    in_flight: Arc<InFlight>,
}

impl Refresher {
    pub fn new(mappings: MappingRepository, source: SourceHandle, policy: RefreshPolicy) -> Self {
        Self {
            mappings,
            source,
            policy,
            in_flight: Arc::default(),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    pub async fn is_stale(&self, show: ShowId) -> Result<bool> {
        let last = self.mappings.last_refreshed(show).await.or_raise(|| ErrorKind::Cache)?;
        Ok(self.policy.is_stale(last, UtcDateTime::now()))
    }

    /// Refresh the show if it is stale.
    ///
    /// Concurrent callers for the same show wait for the one refresh in
    /// progress instead of starting their own, and take its result whether
    /// it succeeded or not. Only a later lookup tries a failed show again.
    pub async fn ensure_fresh(&self, show: ShowId) -> Result<()> {
        if !self.is_stale(show).await? {
            return Ok(());
        }
        let slot = self.in_flight.slot(show);
        let seen = slot.attempts();
        let _guard = slot.lock.lock().await;
        if slot.attempts() != seen {
            tracing::debug!(show, "Refresh already attempted while waiting");
            return Ok(());
        }
        // The lock may have been free while someone else refreshed and let go.
        if !self.is_stale(show).await? {
            return Ok(());
        }
        self.refresh_attempt(&slot, show).await?;
        Ok(())
    }

    /// Refresh the show now, whether it is stale or not.
    pub async fn refresh(&self, show: ShowId) -> Result<RefreshOutcome> {
        let slot = self.in_flight.slot(show);
        let _guard = slot.lock.lock().await;
        self.refresh_attempt(&slot, show).await
    }

    /// Must only be called while holding the slot's lock.
    async fn refresh_attempt(&self, slot: &Slot, show: ShowId) -> Result<RefreshOutcome> {
        let outcome = self.refresh_locked(show).await;
        slot.attempts.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    /// Must only be called while holding the show's slot lock.
    #[instrument("refreshing remote scene mapping", skip(self), fields(source = self.source.name()))]
    async fn refresh_locked(&self, show: ShowId) -> Result<RefreshOutcome> {
        tracing::debug!("Looking up remote scene mapping");
        let response = match self.source.fetch(show).await {
            Ok(Fetched::Response(response)) => response,
            Ok(Fetched::Empty) => {
                tracing::info!("Empty lookup result; no remote scene mapping for show");
                return Ok(RefreshOutcome::Unavailable);
            },
            Err(err) => {
                tracing::warn!(error = ?err, "Failed to refresh remote scene mapping; will retry on next lookup");
                return Ok(RefreshOutcome::Unavailable);
            },
        };
        // Any answer counts, even a failure report: asking again on every
        // lookup would not change it.
        self.mappings
            .mark_refreshed(show, UtcDateTime::now())
            .await
            .or_raise(|| ErrorKind::Cache)?;
        if !response.is_success() {
            tracing::info!(
                result = %response.result,
                message = response.message.as_deref().unwrap_or_default(),
                "Remote service has no scene mapping for show"
            );
            return Ok(RefreshOutcome::Rejected(response.message));
        }
        let stored = self
            .mappings
            .replace_for_show(show, response.pairs())
            .await
            .or_raise(|| ErrorKind::Cache)?;
        tracing::info!(stored, "Remote scene mapping refreshed");
        Ok(RefreshOutcome::Replaced(stored))
    }
}
