use crate::models::{ClickAggregate, ClickEvent, ClickGroupBy, ClickQuery, NewTour, Tour};
use crate::storage::{LookupMetadata, LookupResult, Storage, StorageResult};
use async_trait::async_trait;
use moka::future::Cache;
use moka::policy::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Found tours live for `ttl`, misses only for `miss_ttl`, so a tour added
/// by another process shows up quickly.
struct TourExpiry {
    ttl: Duration,
    miss_ttl: Duration,
}

impl TourExpiry {
    fn for_value(&self, value: &Option<Tour>) -> Option<Duration> {
        Some(if value.is_some() { self.ttl } else { self.miss_ttl })
    }
}

impl Expiry<String, Option<Tour>> for TourExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Option<Tour>,
        _created_at: Instant,
    ) -> Option<Duration> {
        self.for_value(value)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Option<Tour>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.for_value(value)
    }
}

/// Storage wrapper that caches tour lookups by slug.
///
/// Misses are cached too, so a burst of requests for an unknown slug only
/// hits the database once per miss TTL. Click writes and reports pass through.
pub struct CachedStorage {
    inner: Arc<dyn Storage>,
    tour_cache: Cache<String, Option<Tour>>,
}

impl CachedStorage {
    pub fn new(
        inner: Arc<dyn Storage>,
        max_cache_entries: u64,
        ttl: Duration,
        miss_ttl: Duration,
    ) -> Self {
        let tour_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .expire_after(TourExpiry { ttl, miss_ttl })
            .build();

        Self { inner, tour_cache }
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> StorageResult<()> {
        self.inner.init().await
    }

    async fn upsert_tour(&self, tour: &NewTour) -> StorageResult<Tour> {
        let result = self.inner.upsert_tour(tour).await?;

        self.tour_cache
            .insert(result.slug.clone(), Some(result.clone()))
            .await;

        Ok(result)
    }

    async fn get_tour_by_slug(&self, slug: &str) -> StorageResult<Option<Tour>> {
        Ok(self.get_tour_with_metadata(slug).await?.tour)
    }

    async fn get_tour_with_metadata(&self, slug: &str) -> StorageResult<LookupResult> {
        let cache_start = Instant::now();
        if let Some(cached) = self.tour_cache.get(slug).await {
            return Ok(LookupResult {
                tour: cached,
                metadata: LookupMetadata {
                    cache_hit: true,
                    cache_duration: Some(cache_start.elapsed()),
                    db_duration: None,
                },
            });
        }
        let cache_duration = cache_start.elapsed();

        let db_start = Instant::now();
        let tour = self.inner.get_tour_by_slug(slug).await?;
        let db_duration = db_start.elapsed();

        self.tour_cache.insert(slug.to_string(), tour.clone()).await;

        Ok(LookupResult {
            tour,
            metadata: LookupMetadata {
                cache_hit: false,
                cache_duration: Some(cache_duration),
                db_duration: Some(db_duration),
            },
        })
    }

    async fn list_tours(&self, limit: i64, offset: i64) -> StorageResult<Vec<Tour>> {
        self.inner.list_tours(limit, offset).await
    }

    async fn insert_click(&self, click: &ClickEvent) -> StorageResult<()> {
        self.inner.insert_click(click).await
    }

    async fn list_clicks(&self, query: &ClickQuery) -> StorageResult<Vec<ClickEvent>> {
        self.inner.list_clicks(query).await
    }

    async fn click_summary(
        &self,
        group_by: ClickGroupBy,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: i64,
    ) -> StorageResult<Vec<ClickAggregate>> {
        self.inner
            .click_summary(group_by, start_time, end_time, limit)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    async fn setup_with_miss_ttl(miss_ttl: Duration) -> (Arc<dyn Storage>, CachedStorage) {
        let sqlite = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        sqlite.init().await.unwrap();
        let inner: Arc<dyn Storage> = Arc::new(sqlite);
        let cached = CachedStorage::new(
            Arc::clone(&inner),
            100,
            Duration::from_secs(300),
            miss_ttl,
        );
        (inner, cached)
    }

    async fn setup() -> (Arc<dyn Storage>, CachedStorage) {
        setup_with_miss_ttl(Duration::from_secs(10)).await
    }

    fn tour(slug: &str, url: &str) -> NewTour {
        NewTour {
            slug: slug.to_string(),
            title: "Blue Eye Spring".to_string(),
            affiliate_url: Some(url.to_string()),
            operator_name: "BNAdventure".to_string(),
        }
    }

    #[tokio::test]
    async fn test_second_lookup_hits_cache() {
        let (inner, cached) = setup().await;
        inner
            .upsert_tour(&tour("blue-eye-spring", "https://www.bnadventure.com/a"))
            .await
            .unwrap();

        let first = cached.get_tour_with_metadata("blue-eye-spring").await.unwrap();
        assert!(!first.metadata.cache_hit);
        assert!(first.tour.is_some());

        let second = cached.get_tour_with_metadata("blue-eye-spring").await.unwrap();
        assert!(second.metadata.cache_hit);
        assert_eq!(first.tour, second.tour);
    }

    #[tokio::test]
    async fn test_misses_are_cached_until_upsert() {
        let (_inner, cached) = setup().await;

        assert!(cached.get_tour_by_slug("later").await.unwrap().is_none());
        let miss = cached.get_tour_with_metadata("later").await.unwrap();
        assert!(miss.metadata.cache_hit);
        assert!(miss.tour.is_none());

        cached
            .upsert_tour(&tour("later", "https://www.bnadventure.com/later"))
            .await
            .unwrap();
        let hit = cached.get_tour_by_slug("later").await.unwrap();
        assert_eq!(
            hit.and_then(|t| t.affiliate_url).as_deref(),
            Some("https://www.bnadventure.com/later")
        );
    }

    #[tokio::test]
    async fn test_misses_expire_before_hits() {
        let (inner, cached) = setup_with_miss_ttl(Duration::from_millis(100)).await;
        inner
            .upsert_tour(&tour("known", "https://www.bnadventure.com/known"))
            .await
            .unwrap();

        assert!(cached.get_tour_by_slug("known").await.unwrap().is_some());
        assert!(cached.get_tour_by_slug("added-elsewhere").await.unwrap().is_none());

        // Written straight to the database, as the admin CLI would
        inner
            .upsert_tour(&tour("added-elsewhere", "https://www.bnadventure.com/new"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let miss = cached.get_tour_with_metadata("added-elsewhere").await.unwrap();
        assert!(!miss.metadata.cache_hit);
        assert!(miss.tour.is_some());

        let hit = cached.get_tour_with_metadata("known").await.unwrap();
        assert!(hit.metadata.cache_hit);
    }
}
