//! Build request ledger.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use ccbuilder_core::{new_v7, BuildRequest, BuildRequestRepository, HelixType, Result};

/// PostgreSQL implementation of BuildRequestRepository.
#[derive(Clone)]
pub struct PgBuildRequestRepository {
    pool: Pool<Postgres>,
}

impl PgBuildRequestRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: PgRow) -> Result<BuildRequest> {
        let helix_type: String = row.try_get("helix_type")?;
        Ok(BuildRequest {
            id: row.try_get("id")?,
            parameter_ids: row.try_get("parameter_ids")?,
            helix_type: helix_type.parse()?,
            requested: row.try_get("requested")?,
        })
    }
}

#[async_trait]
impl BuildRequestRepository for PgBuildRequestRepository {
    async fn record(&self, parameter_ids: &[Uuid], helix_type: HelixType) -> Result<BuildRequest> {
        // Single-statement upsert so concurrent identical requests each
        // observe a distinct counter value.
        let row = sqlx::query(
            "INSERT INTO build_requests (id, parameter_ids, helix_type, requested, created_at)
             VALUES ($1, $2, $3, 1, $4)
             ON CONFLICT ON CONSTRAINT build_requests_key
             DO UPDATE SET requested = build_requests.requested + 1
             RETURNING id, parameter_ids, helix_type, requested",
        )
        .bind(new_v7())
        .bind(parameter_ids)
        .bind(helix_type.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Self::parse_row(row)
    }

    async fn find(
        &self,
        parameter_ids: &[Uuid],
        helix_type: HelixType,
    ) -> Result<Option<BuildRequest>> {
        let row = sqlx::query(
            "SELECT id, parameter_ids, helix_type, requested
             FROM build_requests WHERE parameter_ids = $1 AND helix_type = $2",
        )
        .bind(parameter_ids)
        .bind(helix_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::parse_row).transpose()
    }
}
