use crate::models::{ClickAggregate, ClickEvent, ClickGroupBy, ClickQuery, NewTour, Tour};
use crate::storage::trait_def::check_new_tour;
use crate::storage::{now_secs, Storage, StorageResult};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;

const TOUR_COLUMNS: &str = "id, slug, title, affiliate_url, operator_name, created_at, updated_at";
const CLICK_COLUMNS: &str = "click_id, tour_id, tour_slug, ip_anonymized, user_agent_hash, \
    utm_source, utm_medium, utm_campaign, utm_content, utm_term, placement, clicked_at";

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn push_time_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    start_time: Option<i64>,
    end_time: Option<i64>,
) {
    if let Some(start) = start_time {
        qb.push(" AND clicked_at >= ").push_bind(start);
    }
    if let Some(end) = end_time {
        qb.push(" AND clicked_at < ").push_bind(end);
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tours (
                id BIGSERIAL PRIMARY KEY,
                slug TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                affiliate_url TEXT,
                operator_name TEXT NOT NULL,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        // No foreign key: clicks outlive the tours they point at
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clicks (
                id BIGSERIAL PRIMARY KEY,
                click_id TEXT NOT NULL UNIQUE,
                tour_id BIGINT NOT NULL,
                tour_slug TEXT NOT NULL,
                ip_anonymized TEXT,
                user_agent_hash TEXT,
                utm_source TEXT,
                utm_medium TEXT,
                utm_campaign TEXT,
                utm_content TEXT,
                utm_term TEXT,
                placement TEXT NOT NULL,
                clicked_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_clicks_clicked_at ON clicks(clicked_at)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_clicks_tour_slug ON clicks(tour_slug, clicked_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn upsert_tour(&self, tour: &NewTour) -> StorageResult<Tour> {
        let slug = check_new_tour(tour)?;
        let now = now_secs();

        let sql = format!(
            r#"
            INSERT INTO tours (slug, title, affiliate_url, operator_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (slug) DO UPDATE SET
                title = EXCLUDED.title,
                affiliate_url = EXCLUDED.affiliate_url,
                operator_name = EXCLUDED.operator_name,
                updated_at = EXCLUDED.updated_at
            RETURNING {TOUR_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, Tour>(&sql)
            .bind(&slug)
            .bind(tour.title.trim())
            .bind(tour.affiliate_url.as_deref().map(str::trim))
            .bind(tour.operator_name.trim())
            .bind(now)
            .bind(now)
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(row)
    }

    async fn get_tour_by_slug(&self, slug: &str) -> StorageResult<Option<Tour>> {
        let sql = format!("SELECT {TOUR_COLUMNS} FROM tours WHERE slug = $1");
        let tour = sqlx::query_as::<_, Tour>(&sql)
            .bind(slug)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(tour)
    }

    async fn list_tours(&self, limit: i64, offset: i64) -> StorageResult<Vec<Tour>> {
        let sql =
            format!("SELECT {TOUR_COLUMNS} FROM tours ORDER BY slug ASC LIMIT $1 OFFSET $2");
        let tours = sqlx::query_as::<_, Tour>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(tours)
    }

    async fn insert_click(&self, click: &ClickEvent) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO clicks (
                click_id, tour_id, tour_slug, ip_anonymized, user_agent_hash,
                utm_source, utm_medium, utm_campaign, utm_content, utm_term,
                placement, clicked_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (click_id) DO NOTHING
            "#,
        )
        .bind(&click.click_id)
        .bind(click.tour_id)
        .bind(&click.tour_slug)
        .bind(&click.ip_anonymized)
        .bind(&click.user_agent_hash)
        .bind(&click.utm_source)
        .bind(&click.utm_medium)
        .bind(&click.utm_campaign)
        .bind(&click.utm_content)
        .bind(&click.utm_term)
        .bind(&click.placement)
        .bind(click.clicked_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn list_clicks(&self, query: &ClickQuery) -> StorageResult<Vec<ClickEvent>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {CLICK_COLUMNS} FROM clicks WHERE 1 = 1"
        ));
        if let Some(slug) = &query.tour_slug {
            qb.push(" AND tour_slug = ").push_bind(slug.clone());
        }
        push_time_filters(&mut qb, query.start_time, query.end_time);
        qb.push(" ORDER BY clicked_at DESC, id DESC LIMIT ")
            .push_bind(query.limit);

        let clicks = qb
            .build_query_as::<ClickEvent>()
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(clicks)
    }

    async fn click_summary(
        &self,
        group_by: ClickGroupBy,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: i64,
    ) -> StorageResult<Vec<ClickAggregate>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} AS dimension, COUNT(*) AS clicks FROM clicks WHERE 1 = 1",
            group_by.sql_expression()
        ));
        push_time_filters(&mut qb, start_time, end_time);
        qb.push(" GROUP BY 1 ORDER BY clicks DESC, dimension ASC LIMIT ")
            .push_bind(limit);

        let aggregates = qb
            .build_query_as::<ClickAggregate>()
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(aggregates)
    }
}
