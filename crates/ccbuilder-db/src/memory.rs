//! In-memory store implementing every repository trait.
//!
//! Used by tests and local development. All handles opened from one
//! [`MemoryStore`] share the same backing collections but carry their own
//! open/closed state, mirroring independent database connections.
//! [`MemoryStore::set_available`] simulates the store becoming unreachable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use ccbuilder_core::{
    new_v7, BuildLogEntry, BuildLogRepository, BuildRequest, BuildRequestRepository,
    ChainParameters, Error, HelixType, JobRepository, JobStatus, Model, ModelRepository, OptJob,
    OptimisedParameters, ParameterRepository, Result, Store, StoreConnector,
};

#[derive(Default)]
struct MemoryState {
    parameters: Vec<(Uuid, ChainParameters)>,
    build_requests: Vec<BuildRequest>,
    models: HashMap<Uuid, Model>,
    jobs: HashMap<Uuid, OptJob>,
    build_log: Vec<BuildLogEntry>,
}

/// Handle to a shared in-memory store.
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    available: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store and its first handle.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            available: Arc::new(AtomicBool::new(true)),
            closed: AtomicBool::new(false),
        }
    }

    /// Open another handle onto the same collections.
    pub fn handle(&self) -> Self {
        Self {
            state: self.state.clone(),
            available: self.available.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// Make every handle fail with `PersistenceUnavailable` until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        if self.is_closed() {
            return Err(Error::PersistenceUnavailable(
                "store handle is closed".to_string(),
            ));
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::PersistenceUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(self.state.lock().await)
    }
}

#[async_trait]
impl ParameterRepository for MemoryStore {
    async fn lookup_or_insert(&self, params: &ChainParameters) -> Result<Uuid> {
        let mut state = self.state().await?;
        if let Some((id, _)) = state.parameters.iter().find(|(_, p)| p == params) {
            return Ok(*id);
        }
        let id = new_v7();
        state.parameters.push((id, params.clone()));
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ChainParameters>> {
        let state = self.state().await?;
        Ok(state
            .parameters
            .iter()
            .find(|(pid, _)| *pid == id)
            .map(|(_, p)| p.clone()))
    }
}

#[async_trait]
impl BuildRequestRepository for MemoryStore {
    async fn record(&self, parameter_ids: &[Uuid], helix_type: HelixType) -> Result<BuildRequest> {
        let mut state = self.state().await?;
        if let Some(request) = state
            .build_requests
            .iter_mut()
            .find(|r| r.parameter_ids == parameter_ids && r.helix_type == helix_type)
        {
            request.requested += 1;
            return Ok(request.clone());
        }
        let request = BuildRequest {
            id: new_v7(),
            parameter_ids: parameter_ids.to_vec(),
            helix_type,
            requested: 1,
        };
        state.build_requests.push(request.clone());
        Ok(request)
    }

    async fn find(
        &self,
        parameter_ids: &[Uuid],
        helix_type: HelixType,
    ) -> Result<Option<BuildRequest>> {
        let state = self.state().await?;
        Ok(state
            .build_requests
            .iter()
            .find(|r| r.parameter_ids == parameter_ids && r.helix_type == helix_type)
            .cloned())
    }
}

#[async_trait]
impl ModelRepository for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<Model>> {
        Ok(self.state().await?.models.get(&id).cloned())
    }

    async fn insert_once(&self, model: &Model) -> Result<bool> {
        let mut state = self.state().await?;
        if state.models.contains_key(&model.id) {
            return Ok(false);
        }
        state.models.insert(model.id, model.clone());
        Ok(true)
    }
}

#[async_trait]
impl JobRepository for MemoryStore {
    async fn insert(&self, job: &OptJob) -> Result<Uuid> {
        let mut state = self.state().await?;
        if state.jobs.contains_key(&job.id) {
            return Err(Error::InvalidInput(format!("duplicate job id {}", job.id)));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(job.id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<OptJob>> {
        Ok(self.state().await?.jobs.get(&id).cloned())
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<OptJob>> {
        let state = self.state().await?;
        let mut jobs: Vec<OptJob> = state
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.time_submitted, j.id));
        Ok(jobs)
    }

    async fn transition(&self, id: Uuid, from: JobStatus, to: JobStatus) -> Result<bool> {
        from.transition(to)?;
        if to.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "{} is reached through complete() or fail()",
                to
            )));
        }
        let mut state = self.state().await?;
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == from => {
                job.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(
        &self,
        id: Uuid,
        final_parameters: &OptimisedParameters,
        model: &Model,
    ) -> Result<bool> {
        JobStatus::Running.transition(JobStatus::Complete)?;
        let mut state = self.state().await?;
        let running = matches!(state.jobs.get(&id), Some(job) if job.status == JobStatus::Running);
        if !running {
            return Ok(false);
        }
        state
            .models
            .entry(model.id)
            .or_insert_with(|| model.clone());
        if let Some(job) = state.jobs.get_mut(&id) {
            job.status = JobStatus::Complete;
            job.final_parameters = Some(final_parameters.clone());
            job.time_finished = Some(Utc::now());
            job.model_id = Some(model.id);
        }
        Ok(true)
    }

    async fn fail(&self, id: Uuid, from: JobStatus, error: &str) -> Result<bool> {
        from.transition(JobStatus::Failed)?;
        let mut state = self.state().await?;
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == from => {
                job.status = JobStatus::Failed;
                job.time_finished = Some(Utc::now());
                job.error_message = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl BuildLogRepository for MemoryStore {
    async fn insert(&self, entry: &BuildLogEntry) -> Result<Uuid> {
        self.state().await?.build_log.push(entry.clone());
        Ok(entry.id)
    }

    async fn list_for_request(&self, build_request_id: Uuid) -> Result<Vec<BuildLogEntry>> {
        let state = self.state().await?;
        Ok(state
            .build_log
            .iter()
            .filter(|e| e.build_request_id == build_request_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn parameters(&self) -> &dyn ParameterRepository {
        self
    }

    fn build_requests(&self) -> &dyn BuildRequestRepository {
        self
    }

    fn models(&self) -> &dyn ModelRepository {
        self
    }

    fn jobs(&self) -> &dyn JobRepository {
        self
    }

    fn build_log(&self) -> &dyn BuildLogRepository {
        self
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    async fn open(&self) -> Result<Arc<dyn Store>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::PersistenceUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(Arc::new(self.handle()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_handle_is_unavailable() {
        let store = MemoryStore::new();
        let other = store.handle();
        other.close().await;

        assert!(other.is_closed());
        let err = JobRepository::get(&other, Uuid::nil()).await.unwrap_err();
        assert!(err.is_transient());

        // The original handle is unaffected.
        assert!(JobRepository::get(&store, Uuid::nil()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_available_affects_all_handles() {
        let store = MemoryStore::new();
        let other = store.handle();
        store.set_available(false);

        assert!(ModelRepository::get(&other, Uuid::nil()).await.is_err());
        assert!(StoreConnector::open(&store).await.is_err());

        store.set_available(true);
        assert!(ModelRepository::get(&other, Uuid::nil()).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_job_insert_rejected() {
        let store = MemoryStore::new();
        let job = OptJob::submitted(HelixType::Alpha, vec![new_v7()], 1.0);
        store.jobs().insert(&job).await.unwrap();
        assert!(store.jobs().insert(&job).await.is_err());
    }
}
