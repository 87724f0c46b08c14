//! # ccbuilder-db
//!
//! Persistence layer for the CCBuilder job scheduler and build cache.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL implementations of the repository traits in `ccbuilder-core`
//! - [`PgConnector`], which opens an independent pool per store handle
//! - [`MemoryStore`], an in-memory store for tests and local runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use ccbuilder_db::{Database, HelixType, OptJob, Store};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/ccbuilder").await?;
//!     let job = OptJob::submitted(HelixType::Alpha, vec![], 5.0);
//!     let id = db.jobs().insert(&job).await?;
//!     println!("Submitted job: {}", id);
//!     Ok(())
//! }
//! ```
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

pub mod build_log;
pub mod build_requests;
pub mod jobs;
pub mod memory;
pub mod models;
pub mod parameters;
pub mod pool;

// Re-export core types
pub use ccbuilder_core::*;

pub use build_log::PgBuildLogRepository;
pub use build_requests::PgBuildRequestRepository;
pub use jobs::PgJobRepository;
pub use memory::MemoryStore;
pub use models::PgModelRepository;
pub use parameters::PgParameterRepository;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Canonical chain parameter records.
    pub parameters: PgParameterRepository,
    /// Build request ledger.
    pub build_requests: PgBuildRequestRepository,
    /// Write-once models.
    pub models: PgModelRepository,
    /// Optimisation jobs.
    pub jobs: PgJobRepository,
    /// Build log.
    pub build_log: PgBuildLogRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            parameters: PgParameterRepository::new(pool.clone()),
            build_requests: PgBuildRequestRepository::new(pool.clone()),
            models: PgModelRepository::new(pool.clone()),
            jobs: PgJobRepository::new(pool.clone()),
            build_log: PgBuildLogRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

#[async_trait]
impl Store for Database {
    fn parameters(&self) -> &dyn ParameterRepository {
        &self.parameters
    }

    fn build_requests(&self) -> &dyn BuildRequestRepository {
        &self.build_requests
    }

    fn models(&self) -> &dyn ModelRepository {
        &self.models
    }

    fn jobs(&self) -> &dyn JobRepository {
        &self.jobs
    }

    fn build_log(&self) -> &dyn BuildLogRepository {
        &self.build_log
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!(subsystem = "db", component = "pool", op = "closed", "Store handle closed");
    }
}

/// Opens a fresh [`Database`] with its own pool for every handle.
#[derive(Debug, Clone)]
pub struct PgConnector {
    url: String,
    config: PoolConfig,
}

impl PgConnector {
    pub fn new(url: impl Into<String>, config: PoolConfig) -> Self {
        Self {
            url: url.into(),
            config,
        }
    }
}

#[async_trait]
impl StoreConnector for PgConnector {
    async fn open(&self) -> Result<Arc<dyn Store>> {
        let db = Database::connect_with_config(&self.url, self.config.clone()).await?;
        Ok(Arc::new(db))
    }
}
