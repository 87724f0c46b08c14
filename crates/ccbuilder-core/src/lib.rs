//! # ccbuilder-core
//!
//! Core types, traits, and abstractions for CCBuilder.
//!
//! This crate provides the domain model shared by the storage layer, the
//! optimisation scheduler and the service façade: validated chain parameters,
//! build requests, cached models, optimisation jobs and their state machine,
//! plus the repository and modeling-engine traits the other crates implement.

pub mod defaults;
pub mod error;
pub mod models;
pub mod traits;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
pub use uuid_utils::new_v7;
