use crate::error::{ErrorKind, Result};
use crate::refresh::{RefreshOutcome, RefreshPolicy, Refresher};
use exn::ResultExt;
use scenemap_cache::{Database, MappingRepository, OverrideRepository, Store};
use scenemap_config::Config;
use scenemap_remote::{FallbackSource, HttpSource, Numbering, ShowId, SourceHandle};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

/// How far a lookup may go when there is no override.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fallback {
    /// Consult the remote mapping (refreshing it when stale), then identity.
    #[default]
    Remote,
    /// Go straight to identity.
    Identity,
}

/// Translates between indexer and scene numbering.
///
/// Every lookup resolves in three tiers:
///
/// 1. A user **override**, if one is set for the episode.
/// 2. The **remote** community mapping, refreshed first if it is stale.
/// 3. **Identity**: the episode maps to itself.
///
/// Lookups therefore always produce a numbering. The only errors are
/// failures of the local stores; remote failures are logged and skipped.
///
/// # Examples
///
/// ```no_run
/// use scenemap_config::Config;
/// use scenemap_numbering::{Numbering, Resolver};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let resolver = Resolver::open(&Config::load(None)?).await?;
/// let scene = resolver.scene_numbering(76703, Numbering::new(2, 1)).await?;
/// println!("S02E01 is released as {scene}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Resolver {
    overrides: OverrideRepository,
    mappings: MappingRepository,
    refresher: Refresher,
}

impl Resolver {
    pub fn new(
        overrides: OverrideRepository,
        mappings: MappingRepository,
        source: SourceHandle,
        policy: RefreshPolicy,
    ) -> Self {
        let refresher = Refresher::new(mappings.clone(), source, policy);
        Self { overrides, mappings, refresher }
    }

    /// Open both stores (creating and migrating them as needed) and set up
    /// the primary and mirror HTTP sources described by `config`.
    #[instrument("opening scene numbering stores", skip_all)]
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Config)?;
        let primary = open_store(Store::Primary, &config.database.primary).await?;
        let cache = open_store(Store::Cache, &config.database.cache).await?;
        let remote = &config.remote;
        let xem = HttpSource::new("thexem", &remote.primary, remote.timeout(), &remote.user_agent)
            .or_raise(|| ErrorKind::Remote)?;
        let mirror = HttpSource::new("mirror", &remote.mirror, remote.timeout(), &remote.user_agent)
            .or_raise(|| ErrorKind::Remote)?;
        let source: SourceHandle = Arc::new(FallbackSource::new(Arc::new(xem), Arc::new(mirror)));
        Ok(Self::new(
            OverrideRepository::from(&primary),
            MappingRepository::from(&cache),
            source,
            RefreshPolicy::new(config.refresh.max_age()),
        ))
    }

    // =========================================================================
    // Indexer → scene
    // =========================================================================

    /// Scene numbering for an indexer episode, consulting the remote mapping
    /// when there is no override.
    pub async fn scene_numbering(&self, show: ShowId, numbering: Numbering) -> Result<Numbering> {
        self.scene_numbering_with(show, numbering, Fallback::Remote).await
    }

    pub async fn scene_numbering_with(
        &self,
        show: ShowId,
        numbering: Numbering,
        fallback: Fallback,
    ) -> Result<Numbering> {
        if let Some(scene) = self.overrides.find(show, numbering).await.or_raise(|| ErrorKind::Cache)? {
            return Ok(scene);
        }
        if fallback == Fallback::Remote
            && let Some(scene) = self.find_remote(show, numbering).await?
        {
            return Ok(scene);
        }
        Ok(numbering)
    }

    // =========================================================================
    // Scene → indexer
    // =========================================================================

    /// Indexer numbering for a scene episode; the reverse of
    /// [`scene_numbering`](Self::scene_numbering).
    pub async fn indexer_numbering(&self, show: ShowId, scene: Numbering) -> Result<Numbering> {
        self.indexer_numbering_with(show, scene, Fallback::Remote).await
    }

    pub async fn indexer_numbering_with(&self, show: ShowId, scene: Numbering, fallback: Fallback) -> Result<Numbering> {
        if let Some(numbering) = self.overrides.find_by_scene(show, scene).await.or_raise(|| ErrorKind::Cache)? {
            return Ok(numbering);
        }
        if fallback == Fallback::Remote
            && let Some(numbering) = self.find_remote_by_scene(show, scene).await?
        {
            return Ok(numbering);
        }
        Ok(scene)
    }

    // =========================================================================
    // Whole show / season
    // =========================================================================

    /// Every override for a show, keyed by indexer numbering.
    ///
    /// Only overrides: remote mappings are not merged in. Use
    /// [`remote_numbering_for_show`](Self::remote_numbering_for_show) for those.
    pub async fn scene_numbering_for_show(&self, show: ShowId) -> Result<BTreeMap<Numbering, Numbering>> {
        self.overrides.list_for_show(show).await.or_raise(|| ErrorKind::Cache)
    }

    /// Every remote mapping for a show, keyed by indexer numbering.
    pub async fn remote_numbering_for_show(&self, show: ShowId) -> Result<BTreeMap<Numbering, Numbering>> {
        self.refresher.ensure_fresh(show).await?;
        self.mappings.list_for_show(show).await.or_raise(|| ErrorKind::Cache)
    }

    /// The scene seasons an indexer season is spread over, according to the
    /// remote mapping: `{season: [scene seasons…]}`.
    ///
    /// A season without any remote mapping maps to itself (`{season: [season]}`).
    pub async fn remote_numbering_for_season(&self, show: ShowId, season: u32) -> Result<BTreeMap<u32, Vec<u32>>> {
        self.refresher.ensure_fresh(show).await?;
        let mut scene_seasons = self.mappings.list_scene_seasons(show, season).await.or_raise(|| ErrorKind::Cache)?;
        if scene_seasons.is_empty() {
            scene_seasons.push(season);
        }
        Ok(BTreeMap::from([(season, scene_seasons)]))
    }

    // =========================================================================
    // Overrides & maintenance
    // =========================================================================

    /// Set the scene numbering override for an indexer episode. `None`
    /// clears it, so lookups fall through to the remote mapping again.
    pub async fn set_scene_numbering(&self, show: ShowId, numbering: Numbering, scene: Option<Numbering>) -> Result<()> {
        self.overrides.set(show, numbering, scene).await.or_raise(|| ErrorKind::Cache)
    }

    /// Fetch the show's remote mapping now, even if the cached one is fresh.
    pub async fn refresh(&self, show: ShowId) -> Result<RefreshOutcome> {
        self.refresher.refresh(show).await
    }

    async fn find_remote(&self, show: ShowId, numbering: Numbering) -> Result<Option<Numbering>> {
        self.refresher.ensure_fresh(show).await?;
        self.mappings.find(show, numbering).await.or_raise(|| ErrorKind::Cache)
    }

    async fn find_remote_by_scene(&self, show: ShowId, scene: Numbering) -> Result<Option<Numbering>> {
        self.refresher.ensure_fresh(show).await?;
        self.mappings.find_by_scene(show, scene).await.or_raise(|| ErrorKind::Cache)
    }
}

async fn open_store(store: Store, path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Cache)?;
    }
    Database::connect(store, path).await.or_raise(|| ErrorKind::Cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use scenemap_remote::{MapEntry, MapResponse, MockReply, MockSource};
    use time::UtcDateTime;

    const SHOW: ShowId = 1;

    struct Fixture {
        resolver: Resolver,
        mappings: MappingRepository,
        source: Arc<MockSource>,
    }

    async fn fixture(source: MockSource) -> Fixture {
        let primary = Database::connect_in_memory(Store::Primary).await.unwrap();
        let cache = Database::connect_in_memory(Store::Cache).await.unwrap();
        let mappings = MappingRepository::from(&cache);
        let source = Arc::new(source);
        let resolver = Resolver::new(
            OverrideRepository::from(&primary),
            mappings.clone(),
            source.clone(),
            RefreshPolicy::default(),
        );
        Fixture { resolver, mappings, source }
    }

    fn n(season: u32, episode: u32) -> Numbering {
        Numbering::new(season, episode)
    }

    fn xem(entries: impl IntoIterator<Item = MapEntry>) -> MockReply {
        MockReply::Respond(MapResponse::success(entries))
    }

    #[tokio::test]
    async fn test_identity_without_any_mapping() {
        let f = fixture(MockSource::new("xem")).await;
        assert_eq!(f.resolver.scene_numbering(SHOW, n(1, 1)).await.unwrap(), n(1, 1));
        assert_eq!(f.resolver.indexer_numbering(SHOW, n(1, 1)).await.unwrap(), n(1, 1));
    }

    #[tokio::test]
    async fn test_override_wins_over_remote() {
        let f = fixture(MockSource::new("xem").with_reply(SHOW, xem([MapEntry::new((1, 1), (1, 5))]))).await;
        assert_eq!(f.resolver.scene_numbering(SHOW, n(1, 1)).await.unwrap(), n(1, 5));
        f.resolver.set_scene_numbering(SHOW, n(1, 1), Some(n(1, 101))).await.unwrap();
        assert_eq!(f.resolver.scene_numbering(SHOW, n(1, 1)).await.unwrap(), n(1, 101));
        assert_eq!(f.resolver.indexer_numbering(SHOW, n(1, 101)).await.unwrap(), n(1, 1));
    }

    #[tokio::test]
    async fn test_clearing_override_falls_through() {
        let f = fixture(MockSource::new("xem").with_reply(SHOW, xem([MapEntry::new((1, 1), (1, 5))]))).await;
        f.resolver.set_scene_numbering(SHOW, n(1, 1), Some(n(1, 101))).await.unwrap();
        f.resolver.set_scene_numbering(SHOW, n(1, 1), None).await.unwrap();
        assert_eq!(f.resolver.scene_numbering(SHOW, n(1, 1)).await.unwrap(), n(1, 5));
        assert_eq!(f.resolver.scene_numbering_with(SHOW, n(1, 1), Fallback::Identity).await.unwrap(), n(1, 1));
    }

    #[rstest]
    #[case(n(1, 1), n(1, 101))]
    #[case(n(2, 1), n(1, 14))]
    #[case(n(3, 7), n(4, 1))]
    #[tokio::test]
    async fn test_indexer_numbering_inverts_override(#[case] numbering: Numbering, #[case] scene: Numbering) {
        let f = fixture(MockSource::new("xem")).await;
        f.resolver.set_scene_numbering(SHOW, numbering, Some(scene)).await.unwrap();
        let resolved = f.resolver.scene_numbering(SHOW, numbering).await.unwrap();
        assert_eq!(resolved, scene);
        assert_eq!(f.resolver.indexer_numbering(SHOW, resolved).await.unwrap(), numbering);
    }

    #[tokio::test]
    async fn test_remote_reverse_lookup() {
        let f = fixture(MockSource::new("xem").with_reply(SHOW, xem([MapEntry::new((2, 1), (1, 14))]))).await;
        assert_eq!(f.resolver.indexer_numbering(SHOW, n(1, 14)).await.unwrap(), n(2, 1));
        assert_eq!(f.resolver.indexer_numbering_with(SHOW, n(1, 14), Fallback::Identity).await.unwrap(), n(1, 14));
    }

    #[tokio::test]
    async fn test_fetches_once_per_window() {
        let f = fixture(MockSource::new("xem").with_reply(SHOW, xem([MapEntry::new((1, 1), (1, 2))]))).await;
        assert_eq!(f.mappings.last_refreshed(SHOW).await.unwrap(), None);
        f.resolver.scene_numbering(SHOW, n(1, 1)).await.unwrap();
        assert!(f.mappings.last_refreshed(SHOW).await.unwrap().is_some());
        f.resolver.scene_numbering(SHOW, n(1, 2)).await.unwrap();
        f.resolver.indexer_numbering(SHOW, n(1, 2)).await.unwrap();
        f.resolver.remote_numbering_for_show(SHOW).await.unwrap();
        assert_eq!(f.source.calls(), 1);
    }

    #[tokio::test]
    async fn test_identity_fallback_never_fetches() {
        let f = fixture(MockSource::new("xem")).await;
        f.resolver.scene_numbering_with(SHOW, n(1, 1), Fallback::Identity).await.unwrap();
        f.resolver.scene_numbering_for_show(SHOW).await.unwrap();
        assert_eq!(f.source.calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_rows_and_marker() {
        let f = fixture(MockSource::new("xem").with_reply(SHOW, xem([MapEntry::new((1, 1), (1, 2))]))).await;
        f.resolver.scene_numbering(SHOW, n(1, 1)).await.unwrap();
        let stale = UtcDateTime::now() - time::Duration::days(2);
        f.mappings.mark_refreshed(SHOW, stale).await.unwrap();

        f.source.set_reply(SHOW, MockReply::Fail).await;
        assert_eq!(f.resolver.scene_numbering(SHOW, n(1, 1)).await.unwrap(), n(1, 2));
        assert_eq!(f.source.calls(), 2);
        let marker = f.mappings.last_refreshed(SHOW).await.unwrap().unwrap();
        assert_eq!(marker.unix_timestamp(), stale.unix_timestamp());
        // Still stale, so the next lookup tries again.
        f.resolver.scene_numbering(SHOW, n(1, 1)).await.unwrap();
        assert_eq!(f.source.calls(), 3);
    }

    #[tokio::test]
    async fn test_reported_failure_keeps_rows_but_updates_marker() {
        let f = fixture(MockSource::new("xem").with_reply(SHOW, xem([MapEntry::new((1, 1), (1, 2))]))).await;
        f.resolver.scene_numbering(SHOW, n(1, 1)).await.unwrap();
        f.mappings.mark_refreshed(SHOW, UtcDateTime::now() - time::Duration::days(2)).await.unwrap();

        f.source.set_reply(SHOW, MockReply::Respond(MapResponse::failure("no data"))).await;
        assert_eq!(f.resolver.scene_numbering(SHOW, n(1, 1)).await.unwrap(), n(1, 2));
        f.resolver.scene_numbering(SHOW, n(1, 1)).await.unwrap();
        assert_eq!(f.source.calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_replaces_only_that_show() {
        let source = MockSource::new("xem")
            .with_reply(1, xem([MapEntry::new((1, 1), (1, 2)), MapEntry::new((1, 2), (1, 3))]))
            .with_reply(2, xem([MapEntry::new((1, 1), (2, 1))]));
        let f = fixture(source).await;
        f.resolver.remote_numbering_for_show(1).await.unwrap();
        f.resolver.remote_numbering_for_show(2).await.unwrap();

        f.source.set_reply(1, xem([MapEntry::new((1, 5), (1, 6))])).await;
        assert_eq!(f.resolver.refresh(1).await.unwrap(), RefreshOutcome::Replaced(1));
        let show1 = f.resolver.remote_numbering_for_show(1).await.unwrap();
        assert_eq!(show1, BTreeMap::from([(n(1, 5), n(1, 6))]));
        let show2 = f.resolver.remote_numbering_for_show(2).await.unwrap();
        assert_eq!(show2, BTreeMap::from([(n(1, 1), n(2, 1))]));
    }

    #[tokio::test]
    async fn test_show_dump_is_overrides_only() {
        let f = fixture(MockSource::new("xem").with_reply(SHOW, xem([MapEntry::new((1, 1), (1, 5))]))).await;
        f.resolver.set_scene_numbering(SHOW, n(2, 1), Some(n(1, 14))).await.unwrap();
        let dump = f.resolver.scene_numbering_for_show(SHOW).await.unwrap();
        assert_eq!(dump, BTreeMap::from([(n(2, 1), n(1, 14))]));
    }

    #[tokio::test]
    async fn test_season_mapping() {
        let f = fixture(MockSource::new("xem").with_reply(
            SHOW,
            xem([
                MapEntry::new((1, 1), (1, 1)),
                MapEntry::new((1, 12), (1, 12)),
                MapEntry::new((1, 13), (2, 1)),
                MapEntry::new((1, 14), (2, 2)),
            ]),
        ))
        .await;
        let season = f.resolver.remote_numbering_for_season(SHOW, 1).await.unwrap();
        assert_eq!(season, BTreeMap::from([(1, vec![1, 2])]));
        let unmapped = f.resolver.remote_numbering_for_season(SHOW, 5).await.unwrap();
        assert_eq!(unmapped, BTreeMap::from([(5, vec![5])]));
    }

    #[tokio::test]
    async fn test_open_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.primary = dir.path().join("nested/scenemap.db");
        config.database.cache = dir.path().join("nested/cache.db");
        let resolver = Resolver::open(&config).await.unwrap();
        resolver.set_scene_numbering(SHOW, n(1, 1), Some(n(1, 101))).await.unwrap();
        assert_eq!(resolver.scene_numbering_with(SHOW, n(1, 1), Fallback::Identity).await.unwrap(), n(1, 101));
        // Reopening keeps the overrides; migrations run again without harm.
        let reopened = Resolver::open(&config).await.unwrap();
        assert_eq!(reopened.scene_numbering_for_show(SHOW).await.unwrap().len(), 1);
    }
}
