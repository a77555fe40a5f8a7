mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use modverse::application::counts::CountAccessor;
use modverse::application::downloads::{DownloadError, DownloadService};
use modverse::application::favorites::{FavoriteError, ModFavoriteService};
use modverse::application::flags::FlagCache;
use modverse::application::likes::{LikeError, ModLikeService};
use modverse::application::counts::CountError;
use modverse::application::repos::{CounterColumnsRepo, CounterUpdate, RepoError};
use modverse::cache::{CounterStore, MemoryCounterStore};
use modverse::domain::types::{CounterColumn, Relation, ResourceId, ResourceType};
use tokio::sync::Notify;

use support::{FakeColumns, FakeRelations};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Services {
    store: Arc<MemoryCounterStore>,
    columns: Arc<FakeColumns>,
    relations: Arc<FakeRelations>,
    flags: Arc<FlagCache>,
    counts: Arc<CountAccessor>,
    likes: ModLikeService,
    favorites: ModFavoriteService,
    downloads: DownloadService,
}

fn services() -> Services {
    let store = Arc::new(MemoryCounterStore::new());
    let columns = Arc::new(FakeColumns::new());
    columns.insert_row(ResourceType::Mod, 42, &[(CounterColumn::Likes, 10)]);
    columns.insert_row(ResourceType::ModVersion, 7, &[(CounterColumn::Downloads, 3)]);
    let relations = Arc::new(FakeRelations::new(columns.clone()));

    let flags = Arc::new(FlagCache::new(store.clone(), relations.clone()));
    let counts = Arc::new(CountAccessor::new(store.clone(), columns.clone()));

    Services {
        likes: ModLikeService::new(relations.clone(), flags.clone(), counts.clone(), TIMEOUT),
        favorites: ModFavoriteService::new(relations.clone(), flags.clone(), TIMEOUT),
        downloads: DownloadService::new(counts.clone(), TIMEOUT),
        store,
        columns,
        relations,
        flags,
        counts,
    }
}

#[tokio::test]
async fn flag_miss_checks_durable_store_once_then_caches() {
    let s = services();

    assert!(!s.flags.check_flag(Relation::Like, 7, 42).await.unwrap());
    assert_eq!(s.relations.exists_calls(), 1);

    assert!(!s.flags.check_flag(Relation::Like, 7, 42).await.unwrap());
    assert_eq!(s.relations.exists_calls(), 1);

    assert_eq!(
        s.store.get("like:7:42").await.unwrap().as_deref(),
        Some("0")
    );
    assert!(s.store.ttl("like:7:42").is_some());
}

#[tokio::test]
async fn unrecognised_flag_value_is_reloaded() {
    let s = services();
    s.relations.seed(Relation::Favorite, 7, 42);
    s.store.set("favorite:7:42", "yes", None).await.unwrap();

    assert!(s.flags.check_flag(Relation::Favorite, 7, 42).await.unwrap());
    assert_eq!(s.relations.exists_calls(), 1);
    assert_eq!(
        s.store.get("favorite:7:42").await.unwrap().as_deref(),
        Some("1")
    );
}

#[tokio::test]
async fn created_favorite_is_visible_without_durable_round_trip() {
    let s = services();

    s.favorites.create_favorite(7, 42).await.unwrap();
    assert!(s.favorites.is_favorite(7, 42).await.unwrap());

    assert_eq!(s.relations.exists_calls(), 0);
    assert!(s.relations.contains(Relation::Favorite, 7, 42));
}

#[tokio::test]
async fn duplicate_favorite_is_rejected_and_flag_repaired() {
    let s = services();
    s.relations.seed(Relation::Favorite, 7, 42);
    s.store.set("favorite:7:42", "0", None).await.unwrap();

    let err = s.favorites.create_favorite(7, 42).await.unwrap_err();
    assert!(matches!(err, FavoriteError::AlreadyFavorite { mod_id: 42 }));
    assert!(s.favorites.is_favorite(7, 42).await.unwrap());
}

#[tokio::test]
async fn deleting_missing_favorite_reports_not_favorite() {
    let s = services();

    let err = s.favorites.delete_favorite(7, 42).await.unwrap_err();
    assert!(matches!(err, FavoriteError::NotFavorite { mod_id: 42 }));
    assert!(!s.favorites.is_favorite(7, 42).await.unwrap());
}

#[tokio::test]
async fn favorite_for_unknown_mod_is_not_found() {
    let s = services();

    let err = s.favorites.create_favorite(7, 999).await.unwrap_err();
    assert!(matches!(err, FavoriteError::ModNotFound { mod_id: 999 }));
    assert!(s.store.get("favorite:7:999").await.unwrap().is_none());
}

#[tokio::test]
async fn like_updates_durable_count_and_flag() {
    let s = services();

    // Warm the baseline so the like must overwrite it.
    let before = s
        .counts
        .get_count(ResourceType::Mod, 42, CounterColumn::Likes)
        .await
        .unwrap();
    assert_eq!(before, 10);

    s.likes.like_mod(7, 42).await.unwrap();

    assert!(s.likes.like_status(7, 42).await.unwrap());
    assert_eq!(
        s.columns.value(ResourceType::Mod, 42, CounterColumn::Likes),
        Some(11)
    );
    let after = s
        .counts
        .get_count(ResourceType::Mod, 42, CounterColumn::Likes)
        .await
        .unwrap();
    assert_eq!(after, 11);
}

/// Holds the first durable read after it has loaded its value.
struct StalledColumns {
    inner: Arc<FakeColumns>,
    armed: AtomicBool,
    loaded: Notify,
    resume: Notify,
}

impl StalledColumns {
    fn new(inner: Arc<FakeColumns>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(true),
            loaded: Notify::new(),
            resume: Notify::new(),
        }
    }
}

#[async_trait]
impl CounterColumnsRepo for StalledColumns {
    async fn read_counter(
        &self,
        resource: ResourceType,
        id: ResourceId,
        column: CounterColumn,
    ) -> Result<Option<i64>, RepoError> {
        let value = self.inner.read_counter(resource, id, column).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.loaded.notify_one();
            self.resume.notified().await;
        }
        Ok(value)
    }

    async fn write_counters(
        &self,
        resource: ResourceType,
        id: ResourceId,
        updates: &[CounterUpdate],
    ) -> Result<(), RepoError> {
        self.inner.write_counters(resource, id, updates).await
    }
}

#[tokio::test]
async fn like_during_cold_read_wins_over_the_stale_value() {
    let store = Arc::new(MemoryCounterStore::new());
    let columns = Arc::new(FakeColumns::new());
    columns.insert_row(ResourceType::Mod, 42, &[(CounterColumn::Likes, 10)]);
    let stalled = Arc::new(StalledColumns::new(columns.clone()));
    let relations = Arc::new(FakeRelations::new(columns.clone()));
    let flags = Arc::new(FlagCache::new(store.clone(), relations.clone()));
    let counts = Arc::new(CountAccessor::new(store.clone(), stalled.clone()));
    let likes = ModLikeService::new(relations, flags, counts.clone(), TIMEOUT);

    // The reader has loaded 10 but not cached it yet.
    let reader = tokio::spawn({
        let counts = counts.clone();
        async move {
            counts
                .get_count(ResourceType::Mod, 42, CounterColumn::Likes)
                .await
        }
    });
    stalled.loaded.notified().await;

    likes.like_mod(7, 42).await.unwrap();
    stalled.resume.notify_one();

    assert_eq!(reader.await.unwrap().unwrap(), 11);
    assert_eq!(
        store.get_field("counts:mod:42", "likes").await.unwrap(),
        Some("11".to_string())
    );
    let later = counts
        .get_count(ResourceType::Mod, 42, CounterColumn::Likes)
        .await
        .unwrap();
    assert_eq!(later, 11);
}

#[tokio::test]
async fn unlike_overwrites_cached_baseline() {
    let s = services();

    s.likes.like_mod(7, 42).await.unwrap();
    s.store
        .set_field("counts:mod:42", "likes", "99", None)
        .await
        .unwrap();
    s.likes.unlike_mod(7, 42).await.unwrap();

    assert_eq!(
        s.store.get_field("counts:mod:42", "likes").await.unwrap(),
        Some("10".to_string())
    );
}

#[tokio::test]
async fn liking_twice_is_rejected() {
    let s = services();

    s.likes.like_mod(7, 42).await.unwrap();
    let err = s.likes.like_mod(7, 42).await.unwrap_err();

    assert!(matches!(err, LikeError::AlreadyLiked { mod_id: 42 }));
    assert_eq!(
        s.columns.value(ResourceType::Mod, 42, CounterColumn::Likes),
        Some(11)
    );
}

#[tokio::test]
async fn unlike_reverses_like() {
    let s = services();

    s.likes.like_mod(7, 42).await.unwrap();
    s.likes.unlike_mod(7, 42).await.unwrap();

    assert!(!s.likes.like_status(7, 42).await.unwrap());
    assert_eq!(
        s.columns.value(ResourceType::Mod, 42, CounterColumn::Likes),
        Some(10)
    );
}

#[tokio::test]
async fn unlike_without_like_is_rejected() {
    let s = services();

    let err = s.likes.unlike_mod(7, 42).await.unwrap_err();
    assert!(matches!(err, LikeError::NotLiked { mod_id: 42 }));
}

#[tokio::test]
async fn like_for_unknown_mod_is_not_found() {
    let s = services();

    let err = s.likes.like_mod(7, 999).await.unwrap_err();
    assert!(matches!(err, LikeError::ModNotFound { mod_id: 999 }));
}

#[tokio::test]
async fn download_counts_version_and_parent_mod() {
    let s = services();

    let count = s.downloads.record_download(42, 7).await.unwrap();
    assert_eq!(count, 4);

    let count = s.downloads.record_download(42, 7).await.unwrap();
    assert_eq!(count, 5);

    let total = s
        .downloads
        .count(ResourceType::Mod, 42, CounterColumn::TotalDownloads)
        .await
        .unwrap();
    assert_eq!(total, 2);

    // Durable columns are untouched until reconciliation.
    assert_eq!(
        s.columns
            .value(ResourceType::ModVersion, 7, CounterColumn::Downloads),
        Some(3)
    );
}

#[tokio::test]
async fn download_for_missing_version_writes_no_delta() {
    let s = services();

    let err = s.downloads.record_download(42, 8).await.unwrap_err();
    assert!(matches!(
        err,
        DownloadError::Count(CountError::NotFound {
            resource: ResourceType::ModVersion,
            id: 8
        })
    ));
    assert!(!s.store.contains_key("counters:mod:42"));
}

#[tokio::test]
async fn count_rejects_column_of_another_resource() {
    let s = services();

    let err = s
        .downloads
        .count(ResourceType::ModVersion, 7, CounterColumn::Likes)
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::Count(CountError::Domain(_))));
}
