//! Worker pool executing queued optimisation jobs.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use ccbuilder_core::defaults::{
    EVENT_BUS_CAPACITY, STORE_RETRY_ATTEMPTS, STORE_RETRY_BACKOFF_MS, WORKERS_DEVELOPMENT,
};
use ccbuilder_core::{
    BuildOutput, ChainParameters, Error, HelixType, JobStatus, ModelingEngine, OptJob,
    OptimisedParameters, Result, Store, StoreConnector,
};

use crate::assignments::AssignmentTable;
use crate::queue::JobQueue;
use crate::retry::{with_store_retry, RetryPolicy};

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Number of long-lived workers.
    pub workers: usize,
    /// Attempts per store step on `PersistenceUnavailable`.
    pub retry_attempts: u32,
    /// Initial backoff between store retries in milliseconds.
    pub retry_backoff_ms: u64,
    /// Whether to start any workers at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: WORKERS_DEVELOPMENT,
            retry_attempts: STORE_RETRY_ATTEMPTS,
            retry_backoff_ms: STORE_RETRY_BACKOFF_MS,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Set the number of workers (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }
}

/// Event emitted by the worker pool.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// A worker opened its store handle and is waiting for jobs.
    WorkerStarted { slot: usize },
    /// A job moved to `RUNNING`.
    JobStarted { job_id: Uuid, slot: usize },
    /// A job reached `COMPLETE`.
    JobCompleted {
        job_id: Uuid,
        slot: usize,
        model_id: Uuid,
    },
    /// A job reached `FAILED`.
    JobFailed {
        job_id: Uuid,
        slot: usize,
        error: String,
    },
    /// A worker closed its store handle and exited.
    WorkerStopped { slot: usize },
}

/// Handle for controlling a running pool.
pub struct PoolHandle {
    shutdown_tx: watch::Sender<bool>,
    event_tx: broadcast::Sender<WorkerEvent>,
    tasks: JoinSet<()>,
}

impl PoolHandle {
    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// A receiver that flips to `true` when shutdown is requested.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stop taking new jobs and wait for every worker to exit.
    ///
    /// Jobs already running are finished first.
    pub async fn shutdown(mut self) -> Result<()> {
        self.shutdown_tx.send_replace(true);

        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(subsystem = "jobs", component = "pool", error = ?e, "Worker supervisor failed");
            }
        }

        info!(subsystem = "jobs", component = "pool", "Worker pool stopped");
        Ok(())
    }
}

struct PoolInner {
    connector: Arc<dyn StoreConnector>,
    engine: Arc<dyn ModelingEngine>,
    queue: Arc<JobQueue>,
    assignments: Arc<AssignmentTable>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

/// Fixed pool of workers pulling job ids from a shared [`JobQueue`].
///
/// Worker `i` owns slot `i` of the pool's [`AssignmentTable`] and its own
/// store handle opened through the [`StoreConnector`].
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(
        connector: Arc<dyn StoreConnector>,
        engine: Arc<dyn ModelingEngine>,
        queue: Arc<JobQueue>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let assignments = Arc::new(AssignmentTable::new(config.workers.max(1)));
        Self {
            inner: Arc::new(PoolInner {
                connector,
                engine,
                queue,
                assignments,
                config,
                event_tx,
            }),
        }
    }

    /// The slot table shared with the reaper.
    pub fn assignments(&self) -> Arc<AssignmentTable> {
        self.inner.assignments.clone()
    }

    pub fn queue(&self) -> Arc<JobQueue> {
        self.inner.queue.clone()
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Spawn the workers and return a handle for control.
    pub fn start(self) -> PoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();

        if self.inner.config.enabled {
            info!(
                subsystem = "jobs",
                component = "pool",
                workers = self.inner.assignments.len(),
                retry_attempts = self.inner.config.retry_attempts,
                "Worker pool starting"
            );
            for slot in 0..self.inner.assignments.len() {
                tasks.spawn(supervise(self.inner.clone(), slot, shutdown_rx.clone()));
            }
        } else {
            info!(subsystem = "jobs", component = "pool", "Worker pool is disabled, not starting");
        }

        PoolHandle {
            shutdown_tx,
            event_tx: self.inner.event_tx.clone(),
            tasks,
        }
    }
}

/// Keep a worker alive in `slot`, replacing it if it panics.
async fn supervise(inner: Arc<PoolInner>, slot: usize, shutdown: watch::Receiver<bool>) {
    loop {
        let worker = tokio::spawn(inner.clone().run_worker(slot, shutdown.clone()));
        match worker.await {
            Ok(()) => break,
            Err(e) if e.is_panic() => {
                error!(
                    subsystem = "jobs",
                    component = "worker",
                    slot,
                    "Worker panicked, starting a replacement"
                );
                if *shutdown.borrow() {
                    break;
                }
            }
            Err(e) => {
                warn!(subsystem = "jobs", component = "worker", slot, error = ?e, "Worker cancelled");
                break;
            }
        }
    }
}

impl PoolInner {
    fn emit(&self, event: WorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Open this worker's store handle, waiting out store outages.
    async fn open_store(
        &self,
        slot: usize,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Arc<dyn Store>> {
        let policy = self.config.retry_policy();
        loop {
            let opened = tokio::select! {
                biased;
                _ = shutdown.changed() => return None,
                opened = with_store_retry(policy, "open_store", || self.connector.open()) => opened,
            };
            match opened {
                Ok(store) => return Some(store),
                Err(e) => {
                    error!(subsystem = "jobs", component = "worker", slot, error = %e, "Failed to open store handle");
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => return None,
                        _ = tokio::time::sleep(policy.backoff) => {}
                    }
                }
            }
        }
    }

    async fn run_worker(self: Arc<Self>, slot: usize, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }
        let Some(store) = self.open_store(slot, &mut shutdown).await else {
            return;
        };

        debug!(subsystem = "jobs", component = "worker", slot, "Worker started");
        self.emit(WorkerEvent::WorkerStarted { slot });

        loop {
            if *shutdown.borrow() {
                break;
            }
            let job_id = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                job_id = self.queue.pop() => job_id,
            };
            self.process(slot, store.as_ref(), job_id, &shutdown).await;
        }

        store.close().await;
        debug!(subsystem = "jobs", component = "worker", slot, "Worker stopped");
        self.emit(WorkerEvent::WorkerStopped { slot });
    }

    /// Run one dequeued job to a terminal state.
    async fn process(
        &self,
        slot: usize,
        store: &dyn Store,
        job_id: Uuid,
        shutdown: &watch::Receiver<bool>,
    ) {
        let policy = self.config.retry_policy();

        let job = match with_store_retry(policy, "load_job", || store.jobs().get(job_id)).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(subsystem = "jobs", component = "worker", slot, %job_id, "Dequeued unknown job");
                return;
            }
            Err(e) if e.is_transient() => {
                self.requeue(slot, job_id, &e).await;
                return;
            }
            Err(e) => {
                error!(subsystem = "jobs", component = "worker", slot, %job_id, error = %e, "Failed to load job");
                return;
            }
        };

        if job.status != JobStatus::Queued {
            debug!(
                subsystem = "jobs",
                component = "worker",
                slot,
                %job_id,
                status = %job.status,
                "Skipping job that is no longer queued"
            );
            return;
        }

        // Missing parameters fail the job once it is running; an outage puts
        // it back in line.
        let parameters = match self.load_parameters(store, &job).await {
            Err(e) if e.is_transient() => {
                self.requeue(slot, job_id, &e).await;
                return;
            }
            loaded => loaded,
        };

        let assignment = match self.assignments.assign(slot, job_id) {
            Ok(assignment) => assignment,
            Err(e) => {
                warn!(subsystem = "jobs", component = "worker", slot, %job_id, error = %e, "Job not assigned");
                return;
            }
        };

        match with_store_retry(policy, "mark_running", || {
            store
                .jobs()
                .transition(job_id, JobStatus::Queued, JobStatus::Running)
        })
        .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(subsystem = "jobs", component = "worker", slot, %job_id, "Job claimed elsewhere");
                return;
            }
            Err(e) if e.is_transient() => {
                drop(assignment);
                self.requeue(slot, job_id, &e).await;
                return;
            }
            Err(e) => {
                error!(subsystem = "jobs", component = "worker", slot, %job_id, error = %e, "Failed to mark job running");
                return;
            }
        }

        info!(
            subsystem = "jobs",
            component = "worker",
            slot,
            %job_id,
            helix_type = %job.helix_type,
            chains = job.oligomeric_state,
            heat = job.heat,
            "Processing job"
        );
        self.emit(WorkerEvent::JobStarted { job_id, slot });

        let start = Instant::now();
        match self.execute(&job, parameters).await {
            Ok((final_parameters, output)) => {
                self.finish_complete(slot, store, job_id, final_parameters, output, start, shutdown)
                    .await
            }
            Err(e) => {
                self.finish_failed(slot, store, job_id, e.to_string(), start, shutdown)
                    .await
            }
        }

        // Held until the terminal write settles.
        drop(assignment);
    }

    async fn requeue(&self, slot: usize, job_id: Uuid, cause: &Error) {
        warn!(
            subsystem = "jobs",
            component = "worker",
            slot,
            %job_id,
            error = %cause,
            "Store unavailable, returning job to the queue"
        );
        self.queue.push(job_id).await;
    }

    async fn load_parameters(&self, store: &dyn Store, job: &OptJob) -> Result<Vec<ChainParameters>> {
        let policy = self.config.retry_policy();
        let mut parameters = Vec::with_capacity(job.initial_parameter_ids.len());

        for &id in &job.initial_parameter_ids {
            let record =
                with_store_retry(policy, "load_parameters", || store.parameters().get(id)).await?;
            let record = record.ok_or_else(|| {
                Error::NotFound(format!(
                    "chain parameters {} referenced by job {}",
                    id, job.id
                ))
            })?;
            parameters.push(record);
        }

        Ok(parameters)
    }

    async fn execute(
        &self,
        job: &OptJob,
        parameters: Result<Vec<ChainParameters>>,
    ) -> Result<(OptimisedParameters, BuildOutput)> {
        let parameters = parameters?;
        let helix_type: HelixType = job.helix_type.parse()?;
        self.engine.optimise(&parameters, helix_type, job.heat).await
    }

    /// Write a job's terminal state, waiting out store outages.
    ///
    /// Transient errors are retried until the store comes back. Only a
    /// shutdown request abandons the write, leaving the job `RUNNING` for the
    /// reaper after restart.
    async fn settle<F, Fut>(
        &self,
        slot: usize,
        job_id: Uuid,
        op: &str,
        shutdown: &watch::Receiver<bool>,
        mut write: F,
    ) -> Result<bool>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let policy = self.config.retry_policy();
        let mut shutdown = shutdown.clone();
        loop {
            match with_store_retry(policy, op, &mut write).await {
                Err(e) if e.is_transient() => {
                    if *shutdown.borrow() {
                        return Err(e);
                    }
                    warn!(
                        subsystem = "jobs",
                        component = "worker",
                        op,
                        slot,
                        %job_id,
                        error = %e,
                        "Store unavailable, holding job result"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => return Err(e),
                        _ = tokio::time::sleep(policy.backoff) => {}
                    }
                }
                settled => return settled,
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_complete(
        &self,
        slot: usize,
        store: &dyn Store,
        job_id: Uuid,
        final_parameters: OptimisedParameters,
        output: BuildOutput,
        start: Instant,
        shutdown: &watch::Receiver<bool>,
    ) {
        let model = output.into_model(job_id);

        match self
            .settle(slot, job_id, "complete_job", shutdown, || {
                store.jobs().complete(job_id, &final_parameters, &model)
            })
            .await
        {
            Ok(true) => {
                info!(
                    subsystem = "jobs",
                    component = "worker",
                    slot,
                    %job_id,
                    score = model.score,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed successfully"
                );
                self.emit(WorkerEvent::JobCompleted {
                    job_id,
                    slot,
                    model_id: model.id,
                });
            }
            Ok(false) => {
                warn!(subsystem = "jobs", component = "worker", slot, %job_id, "Job no longer running, result discarded");
            }
            Err(e) => {
                error!(subsystem = "jobs", component = "worker", slot, %job_id, error = %e, "Failed to mark job as completed");
            }
        }
    }

    async fn finish_failed(
        &self,
        slot: usize,
        store: &dyn Store,
        job_id: Uuid,
        error: String,
        start: Instant,
        shutdown: &watch::Receiver<bool>,
    ) {
        match self
            .settle(slot, job_id, "fail_job", shutdown, || {
                store.jobs().fail(job_id, JobStatus::Running, &error)
            })
            .await
        {
            Ok(true) => {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    slot,
                    %job_id,
                    %error,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job failed"
                );
                self.emit(WorkerEvent::JobFailed { job_id, slot, error });
            }
            Ok(false) => {
                warn!(subsystem = "jobs", component = "worker", slot, %job_id, "Job no longer running, failure not recorded");
            }
            Err(e) => {
                error!(subsystem = "jobs", component = "worker", slot, %job_id, error = %e, "Failed to mark job as failed");
            }
        }
    }
}
