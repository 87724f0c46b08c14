//! Write-once model storage.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Executor, Pool, Postgres, Row};
use uuid::Uuid;

use ccbuilder_core::{KnobId, Model, ModelRepository, Result};

/// PostgreSQL implementation of ModelRepository.
#[derive(Clone)]
pub struct PgModelRepository {
    pool: Pool<Postgres>,
}

impl PgModelRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: PgRow) -> Result<Model> {
        let knob_ids: Json<Vec<KnobId>> = row.try_get("knob_ids")?;
        Ok(Model {
            id: row.try_get("id")?,
            pdb: row.try_get("pdb")?,
            score: row.try_get("score")?,
            mean_rpt_value: row.try_get("mean_rpt_value")?,
            knob_ids: knob_ids.0,
        })
    }
}

/// Insert `model` unless its id exists. Shared with job finalization so both
/// paths honour the same write-once rule.
pub(crate) async fn insert_model_once<'e, E>(executor: E, model: &Model) -> Result<bool>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        "INSERT INTO models (id, pdb, score, mean_rpt_value, knob_ids)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(model.id)
    .bind(&model.pdb)
    .bind(model.score)
    .bind(model.mean_rpt_value)
    .bind(Json(&model.knob_ids))
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl ModelRepository for PgModelRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Model>> {
        let row = sqlx::query(
            "SELECT id, pdb, score, mean_rpt_value, knob_ids FROM models WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::parse_row).transpose()
    }

    async fn insert_once(&self, model: &Model) -> Result<bool> {
        insert_model_once(&self.pool, model).await
    }
}
