//! # ccbuilder-service
//!
//! The operations CCBuilder exposes to its calling layer:
//!
//! - [`BuildService`]: synchronous builds, deduplicated through the build
//!   request ledger and served from the model cache once promoted
//! - [`OptimisationService`]: optimisation job submission, status polling
//!   and result retrieval
//!
//! plus the environment configuration shared with the `ccbuilder-optd`
//! daemon.

pub mod build;
pub mod cache;
pub mod canonical;
pub mod config;
pub mod ledger;
pub mod optimisation;
pub mod response;

pub use ccbuilder_core::*;

pub use build::BuildService;
pub use cache::{CacheStats, ModelCache};
pub use canonical::canonicalize;
pub use config::{Profile, ServiceConfig};
pub use ledger::{BuildRequestLedger, LedgerEntry};
pub use optimisation::OptimisationService;
pub use response::{BuildResponse, ModelInfo, OptimisationResult};
