//! Build log repository.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use ccbuilder_core::{BuildLogEntry, BuildLogRepository, Result};

/// PostgreSQL implementation of BuildLogRepository.
#[derive(Clone)]
pub struct PgBuildLogRepository {
    pool: Pool<Postgres>,
}

impl PgBuildLogRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: PgRow) -> Result<BuildLogEntry> {
        Ok(BuildLogEntry {
            id: row.try_get("id")?,
            client_addr: row.try_get("client_addr")?,
            date: row.try_get("date")?,
            build_time_secs: row.try_get("build_time_secs")?,
            build_request_id: row.try_get("build_request_id")?,
        })
    }
}

#[async_trait]
impl BuildLogRepository for PgBuildLogRepository {
    async fn insert(&self, entry: &BuildLogEntry) -> Result<Uuid> {
        sqlx::query(
            "INSERT INTO build_log (id, client_addr, date, build_time_secs, build_request_id)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.id)
        .bind(&entry.client_addr)
        .bind(entry.date)
        .bind(entry.build_time_secs)
        .bind(entry.build_request_id)
        .execute(&self.pool)
        .await?;

        Ok(entry.id)
    }

    async fn list_for_request(&self, build_request_id: Uuid) -> Result<Vec<BuildLogEntry>> {
        let rows = sqlx::query(
            "SELECT id, client_addr, date, build_time_secs, build_request_id
             FROM build_log WHERE build_request_id = $1 ORDER BY date ASC",
        )
        .bind(build_request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::parse_row).collect()
    }
}
