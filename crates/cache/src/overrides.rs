//! Repository for user-defined scene numbering overrides.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{NumberingRow, PairRow, Params};
use exn::ResultExt;
use scenemap_remote::{Numbering, ShowId};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

/// Explicit `(show, season, episode) → (scene season, scene episode)`
/// mappings set by a user.
///
/// An override always wins over anything fetched from the remote service. At
/// most one override exists per indexer episode; absence means "no override",
/// never "maps to nothing".
#[derive(Debug, Clone)]
pub struct OverrideRepository {
    pool: SqlitePool,
}
impl From<&Database> for OverrideRepository {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}
impl OverrideRepository {
    /// Create a new repository with the given connection pool.
    ///
    /// The pool must belong to a [`Store::Primary`](crate::Store::Primary) database.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The override for an indexer episode, or the episode itself.
    pub async fn get(&self, show: ShowId, numbering: Numbering) -> Result<Numbering> {
        Ok(self.find(show, numbering).await?.unwrap_or(numbering))
    }

    /// The override for an indexer episode, if one is set.
    pub async fn find(&self, show: ShowId, numbering: Numbering) -> Result<Option<Numbering>> {
        let params = Params::new(show, numbering)?;
        let row: Option<PairRow> = sqlx::query_as(include_str!("../queries/find_override.sql"))
            .bind(params.show)
            .bind(params.season)
            .bind(params.episode)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Numbering::try_from).transpose()
    }

    /// The indexer episode whose override points at the given scene episode.
    ///
    /// Nothing stops two indexer episodes from being overridden to the same
    /// scene episode; the lowest indexer numbering is returned.
    pub async fn find_by_scene(&self, show: ShowId, scene: Numbering) -> Result<Option<Numbering>> {
        let params = Params::new(show, scene)?;
        let row: Option<PairRow> = sqlx::query_as(include_str!("../queries/find_override_by_scene.sql"))
            .bind(params.show)
            .bind(params.season)
            .bind(params.episode)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Numbering::try_from).transpose()
    }

    /// Every override for a show, keyed (and therefore ordered) by indexer
    /// numbering.
    pub async fn list_for_show(&self, show: ShowId) -> Result<BTreeMap<Numbering, Numbering>> {
        let rows: Vec<NumberingRow> = sqlx::query_as(include_str!("../queries/list_overrides_for_show.sql"))
            .bind(Params::show(show)?)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(<(Numbering, Numbering)>::try_from).collect()
    }

    /// Set (or, with `None`, clear) the override for an indexer episode.
    ///
    /// Any existing override is deleted first and the new one inserted, in a
    /// single transaction.
    pub async fn set(&self, show: ShowId, numbering: Numbering, scene: Option<Numbering>) -> Result<()> {
        let params = Params::new(show, numbering)?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/delete_override.sql"))
            .bind(params.show)
            .bind(params.season)
            .bind(params.episode)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if let Some(scene) = scene {
            sqlx::query(include_str!("../queries/insert_override.sql"))
                .bind(params.show)
                .bind(params.season)
                .bind(params.episode)
                .bind(i64::from(scene.season))
                .bind(i64::from(scene.episode))
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        match scene {
            Some(scene) => tracing::debug!(show, %numbering, %scene, "Scene numbering override set"),
            None => tracing::debug!(show, %numbering, "Scene numbering override cleared"),
        }
        Ok(())
    }
}
