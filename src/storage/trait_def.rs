use crate::models::{ClickAggregate, ClickEvent, ClickGroupBy, ClickQuery, NewTour, Tour};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Timing information about a tour lookup
#[derive(Debug, Clone, Default)]
pub struct LookupMetadata {
    pub cache_hit: bool,
    pub cache_duration: Option<Duration>,
    pub db_duration: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct LookupResult {
    pub tour: Option<Tour>,
    pub metadata: LookupMetadata,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> StorageResult<()>;

    /// Insert a tour or update the existing tour with the same slug
    async fn upsert_tour(&self, tour: &NewTour) -> StorageResult<Tour>;

    /// Get a tour by slug
    async fn get_tour_by_slug(&self, slug: &str) -> StorageResult<Option<Tour>>;

    /// Get a tour by slug along with lookup timing
    async fn get_tour_with_metadata(&self, slug: &str) -> StorageResult<LookupResult> {
        let start = Instant::now();
        let tour = self.get_tour_by_slug(slug).await?;
        Ok(LookupResult {
            tour,
            metadata: LookupMetadata {
                cache_hit: false,
                cache_duration: None,
                db_duration: Some(start.elapsed()),
            },
        })
    }

    /// List tours ordered by slug
    async fn list_tours(&self, limit: i64, offset: i64) -> StorageResult<Vec<Tour>>;

    /// Append a click event. Inserting the same click id twice is a no-op.
    async fn insert_click(&self, click: &ClickEvent) -> StorageResult<()>;

    /// List click events, newest first
    async fn list_clicks(&self, query: &ClickQuery) -> StorageResult<Vec<ClickEvent>>;

    /// Count clicks grouped by a dimension, largest groups first
    async fn click_summary(
        &self,
        group_by: ClickGroupBy,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: i64,
    ) -> StorageResult<Vec<ClickAggregate>>;
}

/// Shared validation for catalog writes
pub(crate) fn check_new_tour(tour: &NewTour) -> StorageResult<String> {
    let slug = crate::models::normalize_slug(&tour.slug)
        .ok_or_else(|| StorageError::InvalidInput(format!("invalid tour slug: {:?}", tour.slug)))?;
    if tour.title.trim().is_empty() {
        return Err(StorageError::InvalidInput(format!(
            "tour '{slug}' has an empty title"
        )));
    }
    if tour.operator_name.trim().is_empty() {
        return Err(StorageError::InvalidInput(format!(
            "tour '{slug}' has an empty operator name"
        )));
    }
    Ok(slug)
}
