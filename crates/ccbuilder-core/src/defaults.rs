//! Centralized default constants for CCBuilder.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates and binaries reference these constants instead of defining their
//! own magic numbers.

// =============================================================================
// BUILD CACHE
// =============================================================================

/// Number of identical build requests after which the model is cached.
///
/// Promotion fires on exactly this request; later identical requests are
/// served from the model cache and never reach the ledger's decision again.
pub const CACHE_PROMOTION_THRESHOLD: i32 = 5;

// =============================================================================
// OPTIMISATION SCHEDULER
// =============================================================================

/// Poller/reaper tick interval in seconds.
pub const POLL_INTERVAL_SECS: u64 = 10;

/// Worker count for the `development` profile.
pub const WORKERS_DEVELOPMENT: usize = 2;

/// Worker count for the `production` profile.
pub const WORKERS_PRODUCTION: usize = 4;

/// Attempts per store step before a `PersistenceUnavailable` error is surfaced.
pub const STORE_RETRY_ATTEMPTS: u32 = 3;

/// Base backoff between store retries in milliseconds (doubles per attempt).
pub const STORE_RETRY_BACKOFF_MS: u64 = 500;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Error recorded on jobs failed by the reaper.
pub const ORPHANED_JOB_ERROR: &str = "worker lost while job was running";

// =============================================================================
// EXTERNAL SERVICES
// =============================================================================

/// Default PostgreSQL connection URL.
pub const DATABASE_URL: &str = "postgres://localhost/ccbuilder";

/// Default executable implementing the modeling-engine protocol.
pub const ENGINE_COMMAND: &str = "ccbuilder-engine";

/// Connections per worker store handle.
pub const WORKER_POOL_CONNECTIONS: u32 = 2;
