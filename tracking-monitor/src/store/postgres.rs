//! PostgreSQL health store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{HealthStore, RecordId, Result};
use crate::config::DatabaseConfig;
use crate::crawlers::CrawlerDefinition;
use crate::health::models::{HealthAggregate, HealthLogEntry, ResultStatus};
use crate::types::CrawlerId;

/// Get the monitor's database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    excluded_agent_types: Vec<String>,
}

impl PostgresStore {
    pub fn new(pool: PgPool, excluded_agent_types: Vec<String>) -> Self {
        Self {
            pool,
            excluded_agent_types,
        }
    }

    /// Open a pool sized by `config.pool`, applying migrations if configured.
    pub async fn connect(config: &DatabaseConfig, excluded_agent_types: Vec<String>) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool.max_connections)
            .min_connections(config.pool.min_connections)
            .acquire_timeout(config.pool.acquire_timeout)
            .idle_timeout(config.pool.idle_timeout)
            .max_lifetime(config.pool.max_lifetime)
            .connect(&config.url)
            .await?;

        if config.run_migrations {
            migrator().run(&pool).await?;
        }

        Ok(Self::new(pool, excluded_agent_types))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct AggregateRow {
    crawler_id: CrawlerId,
    count_ok: i64,
    count_error: i64,
}

#[async_trait]
impl HealthStore for PostgresStore {
    #[tracing::instrument(skip(self), err)]
    async fn list_active_crawlers(&self, as_of: DateTime<Utc>) -> Result<Vec<CrawlerDefinition>> {
        let crawlers = sqlx::query_as::<_, CrawlerDefinition>(
            r#"
            SELECT
                tci.id AS crawler_id,
                ci.id AS carrier_id,
                ci.carrier_code AS carrier_code,
                tci.name AS display_name,
                tci.heart_beat_no AS heartbeat_tracking_number,
                tci.type AS agent_type,
                tci.req_url AS agent_url,
                tci.start_time,
                tci.end_time,
                (tci.status = 1 AND tci.service_status = 1) AS active,
                tci.health_status AS healthy
            FROM tracking_crawler_info tci
            JOIN carrier_info ci ON ci.id = tci.carrier_id
            WHERE ci.status = 1
              AND tci.status = 1
              AND tci.service_status = 1
              AND ci.carrier_code IS NOT NULL
              AND tci.heart_beat_no IS NOT NULL
              AND tci.start_time <= $1
              AND tci.end_time >= $1
              AND NOT (tci.type = ANY($2))
            ORDER BY tci.id, tci.priority
            "#,
        )
        .bind(as_of)
        .bind(&self.excluded_agent_types)
        .fetch_all(&self.pool)
        .await?;

        Ok(crawlers)
    }

    #[tracing::instrument(skip(self, entry), fields(crawler_id = %entry.crawler_id), err)]
    async fn insert_health_log(&self, entry: &HealthLogEntry) -> Result<RecordId> {
        let id: RecordId = sqlx::query_scalar(
            r#"
            INSERT INTO crawler_health_log
                (crawler_id, tracking_no, timing, result_status, result_note, response_body,
                 create_time, update_time, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7, 1)
            RETURNING id
            "#,
        )
        .bind(entry.crawler_id)
        .bind(&entry.tracking_no)
        .bind(entry.timing_millis)
        .bind(entry.result_status.as_db_code())
        .bind(&entry.result_note)
        .bind(&entry.raw_response_body)
        .bind(entry.occurred_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    #[tracing::instrument(skip(self), err)]
    async fn aggregate_health_counts(&self, since: DateTime<Utc>) -> Result<Vec<HealthAggregate>> {
        let rows = sqlx::query_as::<_, AggregateRow>(
            r#"
            SELECT
                crawler_id,
                COUNT(*) FILTER (WHERE result_status = $2) AS count_ok,
                COUNT(*) FILTER (WHERE result_status = $3) AS count_error
            FROM crawler_health_log
            WHERE create_time > $1
            GROUP BY crawler_id
            ORDER BY crawler_id
            "#,
        )
        .bind(since)
        .bind(ResultStatus::Ok.as_db_code())
        .bind(ResultStatus::Error.as_db_code())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| HealthAggregate {
                crawler_id: row.crawler_id,
                count_ok: row.count_ok,
                count_error: row.count_error,
            })
            .collect())
    }

    #[tracing::instrument(skip(self), err)]
    async fn set_crawler_health_flag(&self, crawler_id: CrawlerId, healthy: bool) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE tracking_crawler_info
            SET health_status = $2, update_time = NOW()
            WHERE id = $1 AND health_status IS DISTINCT FROM $2
            "#,
        )
        .bind(crawler_id)
        .bind(healthy)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
