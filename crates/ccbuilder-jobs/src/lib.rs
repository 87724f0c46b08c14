//! # ccbuilder-jobs
//!
//! Asynchronous optimisation scheduler for CCBuilder.
//!
//! This crate provides:
//! - A FIFO queue of job ids with a producer lock for claim-then-push
//! - A fixed pool of workers, each with its own store handle
//! - A slot table recording which worker runs which job
//! - The poller/reaper that feeds the queue and fails orphaned jobs
//! - A modeling engine backed by an external executable
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ccbuilder_jobs::{JobQueue, Poller, ProcessEngine, WorkerConfig, WorkerPool};
//! use ccbuilder_db::{PgConnector, PoolConfig, StoreConnector};
//!
//! let connector = Arc::new(PgConnector::new("postgres://...", PoolConfig::worker()));
//! let queue = Arc::new(JobQueue::new());
//! let pool = WorkerPool::new(
//!     connector.clone(),
//!     Arc::new(ProcessEngine::new("ccbuilder-engine")),
//!     queue.clone(),
//!     WorkerConfig::default().with_workers(4),
//! );
//! let poller = Poller::new(connector.open().await?, queue, pool.assignments());
//!
//! let handle = pool.start();
//! poller.run(handle.shutdown_signal()).await;
//! handle.shutdown().await?;
//! ```

pub mod assignments;
pub mod engine;
pub mod mock;
pub mod poller;
pub mod queue;
pub mod retry;
pub mod worker;

// Re-export core types
pub use ccbuilder_core::*;

pub use assignments::{Assignment, AssignmentTable};
pub use engine::ProcessEngine;
pub use poller::{Poller, TickReport};
pub use queue::{JobQueue, QueueProducer};
pub use retry::{with_store_retry, RetryPolicy};
pub use worker::{PoolHandle, WorkerConfig, WorkerEvent, WorkerPool};
