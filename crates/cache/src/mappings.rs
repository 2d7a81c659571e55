//! Repository for scene numbering fetched from the remote mapping service.
//!
//! Rows for a show are never patched: every successful refresh replaces all
//! of them at once. Next to the rows sits one refresh marker per show,
//! recording when the remote service last answered for it.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{NumberingRow, PairRow, Params};
use exn::ResultExt;
use scenemap_remote::{Numbering, ShowId};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use time::UtcDateTime;

#[derive(Debug, Clone)]
pub struct MappingRepository {
    pool: SqlitePool,
}
impl From<&Database> for MappingRepository {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}
impl MappingRepository {
    /// Create a new repository with the given connection pool.
    ///
    /// The pool must belong to a [`Store::Cache`](crate::Store::Cache) database.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Refresh markers
    // =========================================================================

    /// When the remote service last answered for this show, if ever.
    pub async fn last_refreshed(&self, show: ShowId) -> Result<Option<UtcDateTime>> {
        let timestamp: Option<i64> = sqlx::query_scalar(include_str!("../queries/get_last_refreshed.sql"))
            .bind(Params::show(show)?)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        timestamp
            .map(|ts| UtcDateTime::from_unix_timestamp(ts).or_raise(|| ErrorKind::InvalidData("refresh timestamp")))
            .transpose()
    }

    /// Record that the remote service answered for this show at `at`.
    pub async fn mark_refreshed(&self, show: ShowId, at: UtcDateTime) -> Result<()> {
        sqlx::query(include_str!("../queries/upsert_last_refreshed.sql"))
            .bind(Params::show(show)?)
            .bind(at.unix_timestamp())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    // =========================================================================
    // Replace
    // =========================================================================

    /// Replace every cached row for a show with the given
    /// `(indexer, scene)` pairs.
    ///
    /// Runs in one transaction: readers see either the complete old mapping
    /// or the complete new one. Pairs sharing an indexer numbering (double
    /// episodes) overwrite each other, the last one wins.
    ///
    /// Returns the number of rows stored.
    pub async fn replace_for_show(
        &self,
        show: ShowId,
        pairs: impl IntoIterator<Item = (Numbering, Numbering)>,
    ) -> Result<usize> {
        let show = Params::show(show)?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/delete_remote_for_show.sql"))
            .bind(show)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let mut written = BTreeMap::new();
        for (indexer, scene) in pairs {
            sqlx::query(include_str!("../queries/upsert_remote.sql"))
                .bind(show)
                .bind(i64::from(indexer.season))
                .bind(i64::from(indexer.episode))
                .bind(i64::from(scene.season))
                .bind(i64::from(scene.episode))
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            if let Some(previous) = written.insert(indexer, scene) {
                tracing::debug!(show, %indexer, %previous, %scene, "Double episode overwrote earlier scene numbering");
            }
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(written.len())
    }

    // =========================================================================
    // Get/Fetch
    // =========================================================================

    /// The cached scene numbering for an indexer episode.
    pub async fn find(&self, show: ShowId, numbering: Numbering) -> Result<Option<Numbering>> {
        let params = Params::new(show, numbering)?;
        let row: Option<PairRow> = sqlx::query_as(include_str!("../queries/find_remote.sql"))
            .bind(params.show)
            .bind(params.season)
            .bind(params.episode)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Numbering::try_from).transpose()
    }

    /// The cached indexer numbering for a scene episode.
    pub async fn find_by_scene(&self, show: ShowId, scene: Numbering) -> Result<Option<Numbering>> {
        let params = Params::new(show, scene)?;
        let row: Option<PairRow> = sqlx::query_as(include_str!("../queries/find_remote_by_scene.sql"))
            .bind(params.show)
            .bind(params.season)
            .bind(params.episode)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Numbering::try_from).transpose()
    }

    // =========================================================================
    // Listing
    // =========================================================================

    /// Every cached mapping for a show, keyed by indexer numbering.
    pub async fn list_for_show(&self, show: ShowId) -> Result<BTreeMap<Numbering, Numbering>> {
        let rows: Vec<NumberingRow> = sqlx::query_as(include_str!("../queries/list_remote_for_show.sql"))
            .bind(Params::show(show)?)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(<(Numbering, Numbering)>::try_from).collect()
    }

    /// Distinct scene seasons referenced by any cached episode of an indexer
    /// season, ascending. Empty when nothing is cached for that season.
    pub async fn list_scene_seasons(&self, show: ShowId, season: u32) -> Result<Vec<u32>> {
        let seasons: Vec<i64> = sqlx::query_scalar(include_str!("../queries/list_remote_scene_seasons.sql"))
            .bind(Params::show(show)?)
            .bind(i64::from(season))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        seasons
            .into_iter()
            .map(|s| u32::try_from(s).or_raise(|| ErrorKind::InvalidData("season")))
            .collect()
    }
}
