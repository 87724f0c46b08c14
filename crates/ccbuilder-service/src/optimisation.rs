//! Submission, status and results of asynchronous optimisation jobs.
//!
//! Submitting only records a `SUBMITTED` job; the poller queues it and a
//! worker runs it.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use ccbuilder_core::{
    ChainParameters, Error, HelixType, JobStatus, OptJob, OptimisationRequest, Result, Store,
};

use crate::canonical::canonicalize;
use crate::response::{ModelInfo, OptimisationResult};

/// Entry point for optimisation jobs.
#[derive(Clone)]
pub struct OptimisationService {
    store: Arc<dyn Store>,
}

impl OptimisationService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a new job and return its id.
    pub async fn submit_optimisation(
        &self,
        parameters: &[ChainParameters],
        helix_type: HelixType,
        heat: f64,
    ) -> Result<Uuid> {
        if !heat.is_finite() || heat < 0.0 {
            return Err(Error::InvalidInput(
                "`Heat` must be a non-negative number".to_string(),
            ));
        }

        let parameter_ids = canonicalize(&*self.store, parameters).await?;
        let job = OptJob::submitted(helix_type, parameter_ids, heat);
        let id = self.store.jobs().insert(&job).await?;

        info!(
            subsystem = "optimisation",
            op = "submit",
            job_id = %id,
            helix_type = %helix_type,
            oligomeric_state = job.oligomeric_state,
            heat,
            "Optimisation job submitted"
        );
        Ok(id)
    }

    /// Submit a raw `{"Helix Type", "Parameters", "Heat"}` body.
    pub async fn submit_json(&self, body: &JsonValue) -> Result<Uuid> {
        let request = OptimisationRequest::from_json(body)?;
        self.submit_optimisation(&request.parameters, request.helix_type, request.heat)
            .await
    }

    pub async fn poll_status(&self, job_id: Uuid) -> Result<JobStatus> {
        Ok(self.job(job_id).await?.status)
    }

    /// The full job record, including any error message.
    pub async fn job(&self, job_id: Uuid) -> Result<OptJob> {
        self.store
            .jobs()
            .get(job_id)
            .await?
            .ok_or(Error::JobNotFound(job_id))
    }

    /// Final parameters and model of a `COMPLETE` job.
    pub async fn retrieve_result(&self, job_id: Uuid) -> Result<OptimisationResult> {
        let job = self.job(job_id).await?;
        if job.status != JobStatus::Complete {
            return Err(Error::JobNotComplete {
                id: job_id,
                status: job.status,
            });
        }

        let model_id = job.model_id.ok_or_else(|| {
            Error::Internal(format!("job {} is COMPLETE without a model reference", job_id))
        })?;
        let model = self
            .store
            .models()
            .get(model_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("model {} for job {}", model_id, job_id)))?;
        let parameters = job.final_parameters.ok_or_else(|| {
            Error::NotFound(format!("final parameters for job {}", job_id))
        })?;

        Ok(OptimisationResult {
            model: ModelInfo::from_model(model, job.helix_type),
            parameters,
            oligomeric_state: job.oligomeric_state,
        })
    }
}
