//! Optimisation job repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use ccbuilder_core::{
    Error, JobRepository, JobStatus, Model, OptJob, OptimisedParameters, Result,
};

use crate::models::insert_model_once;

const JOB_COLUMNS: &str = "id, helix_type, initial_parameter_ids, oligomeric_state, heat, status,
     time_submitted, time_finished, final_parameters, model_id, error_message";

/// PostgreSQL implementation of JobRepository.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: Pool<Postgres>,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a job row into an OptJob.
    fn parse_job_row(row: PgRow) -> Result<OptJob> {
        let status: String = row.try_get("status")?;
        let final_parameters: Option<Json<OptimisedParameters>> =
            row.try_get("final_parameters")?;
        Ok(OptJob {
            id: row.try_get("id")?,
            helix_type: row.try_get("helix_type")?,
            initial_parameter_ids: row.try_get("initial_parameter_ids")?,
            oligomeric_state: row.try_get("oligomeric_state")?,
            heat: row.try_get("heat")?,
            status: status.parse()?,
            time_submitted: row.try_get("time_submitted")?,
            time_finished: row.try_get("time_finished")?,
            final_parameters: final_parameters.map(|p| p.0),
            model_id: row.try_get("model_id")?,
            error_message: row.try_get("error_message")?,
        })
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn insert(&self, job: &OptJob) -> Result<Uuid> {
        sqlx::query(
            "INSERT INTO opt_jobs (id, helix_type, initial_parameter_ids, oligomeric_state, heat,
                                   status, time_submitted, time_finished, final_parameters,
                                   model_id, error_message)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(job.id)
        .bind(&job.helix_type)
        .bind(&job.initial_parameter_ids)
        .bind(job.oligomeric_state)
        .bind(job.heat)
        .bind(job.status.as_str())
        .bind(job.time_submitted)
        .bind(job.time_finished)
        .bind(job.final_parameters.as_ref().map(Json))
        .bind(job.model_id)
        .bind(&job.error_message)
        .execute(&self.pool)
        .await?;

        Ok(job.id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<OptJob>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM opt_jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<OptJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM opt_jobs WHERE status = $1 ORDER BY time_submitted ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn transition(&self, id: Uuid, from: JobStatus, to: JobStatus) -> Result<bool> {
        from.transition(to)?;
        if to.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "{} is reached through complete() or fail()",
                to
            )));
        }

        let result = sqlx::query("UPDATE opt_jobs SET status = $1 WHERE id = $2 AND status = $3")
            .bind(to.as_str())
            .bind(id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;

        let applied = result.rows_affected() == 1;
        debug!(subsystem = "db", component = "jobs", job_id = %id, %from, %to, applied, "Job transition");
        Ok(applied)
    }

    async fn complete(
        &self,
        id: Uuid,
        final_parameters: &OptimisedParameters,
        model: &Model,
    ) -> Result<bool> {
        JobStatus::Running.transition(JobStatus::Complete)?;

        let mut tx = self.pool.begin().await?;

        // Lock the job row so the reaper cannot fail it between the check
        // and the update.
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM opt_jobs WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        if status.as_deref() != Some(JobStatus::Running.as_str()) {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_model_once(&mut *tx, model).await?;

        sqlx::query(
            "UPDATE opt_jobs
             SET status = $1, final_parameters = $2, time_finished = $3, model_id = $4
             WHERE id = $5",
        )
        .bind(JobStatus::Complete.as_str())
        .bind(Json(final_parameters))
        .bind(Utc::now())
        .bind(model.id)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn fail(&self, id: Uuid, from: JobStatus, error: &str) -> Result<bool> {
        from.transition(JobStatus::Failed)?;

        let result = sqlx::query(
            "UPDATE opt_jobs
             SET status = $1, time_finished = $2, error_message = $3
             WHERE id = $4 AND status = $5",
        )
        .bind(JobStatus::Failed.as_str())
        .bind(Utc::now())
        .bind(error)
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
