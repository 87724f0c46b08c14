//! Repository, store and engine abstractions.
//!
//! The persistence store is consumed only through point lookup, lookup by
//! field match, insert-returning-id and conditional update. Both the
//! PostgreSQL store and the in-memory store in `ccbuilder-db` implement these
//! traits.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// REPOSITORIES
// =============================================================================

/// Canonical storage for chain parameter records.
#[async_trait]
pub trait ParameterRepository: Send + Sync {
    /// Return the id of a content-equal record, inserting one if none exists.
    ///
    /// Comparison is field-by-field equality. Existing records are never
    /// modified.
    async fn lookup_or_insert(&self, params: &ChainParameters) -> Result<Uuid>;

    /// Get parameters by id.
    async fn get(&self, id: Uuid) -> Result<Option<ChainParameters>>;
}

/// Ledger of synchronous build requests.
#[async_trait]
pub trait BuildRequestRepository: Send + Sync {
    /// Create the request with `requested = 1`, or increment the counter of
    /// the existing request with the same ordered ids and helix type.
    async fn record(&self, parameter_ids: &[Uuid], helix_type: HelixType) -> Result<BuildRequest>;

    /// Find a request by its ordered ids and helix type.
    async fn find(&self, parameter_ids: &[Uuid], helix_type: HelixType)
        -> Result<Option<BuildRequest>>;
}

/// Write-once model storage.
#[async_trait]
pub trait ModelRepository: Send + Sync {
    /// Get a model by request or job id.
    async fn get(&self, id: Uuid) -> Result<Option<Model>>;

    /// Store a model unless one already exists for its id.
    ///
    /// Returns `false` when a model was already present; the stored model is
    /// left untouched.
    async fn insert_once(&self, model: &Model) -> Result<bool>;
}

/// Optimisation job records.
///
/// Every status change is conditional on the expected current status and is
/// checked against [`JobStatus::can_transition_to`] first.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job and return its id.
    async fn insert(&self, job: &OptJob) -> Result<Uuid>;

    /// Get a job by id.
    async fn get(&self, id: Uuid) -> Result<Option<OptJob>>;

    /// List jobs in a status, oldest submission first.
    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<OptJob>>;

    /// Move a job from `from` to a non-terminal `to`.
    ///
    /// Returns `false` if the job does not exist or is no longer in `from`.
    /// Terminal states are reached only through [`complete`](Self::complete)
    /// and [`fail`](Self::fail).
    async fn transition(&self, id: Uuid, from: JobStatus, to: JobStatus) -> Result<bool>;

    /// Store the model and mark a `RUNNING` job `COMPLETE` atomically.
    ///
    /// Sets the final parameters, finish time and model reference. Returns
    /// `false`, storing nothing, if the job is not `RUNNING`.
    async fn complete(
        &self,
        id: Uuid,
        final_parameters: &OptimisedParameters,
        model: &Model,
    ) -> Result<bool>;

    /// Mark a job `FAILED` if it is currently in `from`.
    async fn fail(&self, id: Uuid, from: JobStatus, error: &str) -> Result<bool>;
}

/// Append-only build log.
#[async_trait]
pub trait BuildLogRepository: Send + Sync {
    /// Record a fresh build.
    async fn insert(&self, entry: &BuildLogEntry) -> Result<Uuid>;

    /// List log entries for a build request, oldest first.
    async fn list_for_request(&self, build_request_id: Uuid) -> Result<Vec<BuildLogEntry>>;
}

// =============================================================================
// STORE HANDLES
// =============================================================================

/// An open handle to the persistence store.
///
/// The poller and every worker hold their own handle; handles are not shared
/// across worker boundaries.
#[async_trait]
pub trait Store: Send + Sync {
    fn parameters(&self) -> &dyn ParameterRepository;
    fn build_requests(&self) -> &dyn BuildRequestRepository;
    fn models(&self) -> &dyn ModelRepository;
    fn jobs(&self) -> &dyn JobRepository;
    fn build_log(&self) -> &dyn BuildLogRepository;

    /// Release the handle's connections.
    async fn close(&self);
}

/// Opens independent store handles.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn Store>>;
}

// =============================================================================
// MODELING ENGINE
// =============================================================================

/// The external model construction and optimisation routines.
///
/// Both calls may run for a long, unbounded time and may fail for invalid or
/// unsupported input. Failures are local to the request that caused them.
#[async_trait]
pub trait ModelingEngine: Send + Sync {
    /// Build and score a model from the given chains.
    async fn build(&self, parameters: &[ChainParameters], helix_type: HelixType)
        -> Result<BuildOutput>;

    /// Search for better parameters starting from the given chains.
    async fn optimise(
        &self,
        parameters: &[ChainParameters],
        helix_type: HelixType,
        heat: f64,
    ) -> Result<(OptimisedParameters, BuildOutput)>;
}
