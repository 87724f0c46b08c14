//! Synchronous build path with request deduplication and model caching.
//!
//! A build first canonicalizes its chains. If the same ordered chains and
//! helix type were already promoted to the cache, the stored model is
//! returned without touching the engine or the request counter. Otherwise
//! the request is counted, the engine builds the model, the model is cached
//! when the request reaches the promotion threshold, and the build is logged.
//! A failed log write is reported but does not fail the build.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use ccbuilder_core::{
    parse_parameter_list, BuildLogEntry, ChainParameters, Error, HelixType, ModelingEngine,
    Result, Store,
};

use crate::cache::ModelCache;
use crate::canonical::canonicalize;
use crate::config::ServiceConfig;
use crate::ledger::BuildRequestLedger;
use crate::response::{BuildResponse, ModelInfo};

/// Entry point for synchronous model builds.
#[derive(Clone)]
pub struct BuildService {
    store: Arc<dyn Store>,
    engine: Arc<dyn ModelingEngine>,
    ledger: BuildRequestLedger,
    cache: ModelCache,
}

impl BuildService {
    pub fn new(store: Arc<dyn Store>, engine: Arc<dyn ModelingEngine>) -> Self {
        Self {
            cache: ModelCache::new(store.clone()),
            store,
            engine,
            ledger: BuildRequestLedger::default(),
        }
    }

    /// Create a service using the configured promotion threshold.
    pub fn from_config(
        store: Arc<dyn Store>,
        engine: Arc<dyn ModelingEngine>,
        config: &ServiceConfig,
    ) -> Self {
        Self::new(store, engine).with_threshold(config.cache_promotion_threshold)
    }

    /// Override the number of identical requests before caching.
    pub fn with_threshold(mut self, threshold: i32) -> Self {
        self.ledger = BuildRequestLedger::new(threshold);
        self
    }

    pub fn threshold(&self) -> i32 {
        self.ledger.threshold()
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Build (or fetch) the model for `parameters`.
    ///
    /// `client` is the requester's address, recorded in the build log.
    pub async fn submit_build(
        &self,
        parameters: &[ChainParameters],
        helix_type: HelixType,
        client: Option<&str>,
    ) -> Result<BuildResponse> {
        let store = &*self.store;
        let parameter_ids = canonicalize(store, parameters).await?;

        if let Some(request) = store.build_requests().find(&parameter_ids, helix_type).await? {
            if let Some(model) = self.cache.get(request.id).await? {
                debug!(
                    subsystem = "build",
                    op = "submit_build",
                    request_id = %request.id,
                    "Serving cached model"
                );
                return Ok(BuildResponse {
                    model: ModelInfo::from_model(model, helix_type.as_str()),
                    cached: true,
                });
            }
        }

        let entry = self
            .ledger
            .record_request(store, &parameter_ids, helix_type)
            .await?;

        // Another request may have promoted this one since the lookup.
        if let Some(model) = self.cache.get(entry.request_id).await? {
            return Ok(BuildResponse {
                model: ModelInfo::from_model(model, helix_type.as_str()),
                cached: true,
            });
        }

        let start = Instant::now();
        let output = self.engine.build(parameters, helix_type).await?;
        let elapsed = start.elapsed();

        let model = output.into_model(entry.request_id);
        if entry.should_cache && !self.cache.put(&model).await? {
            warn!(
                subsystem = "build",
                request_id = %entry.request_id,
                "Promoted model was already cached"
            );
        }

        let log_entry = BuildLogEntry::new(client.map(str::to_string), elapsed, entry.request_id);
        if let Err(e) = store.build_log().insert(&log_entry).await {
            warn!(
                subsystem = "build",
                op = "submit_build",
                request_id = %entry.request_id,
                error = %e,
                "Failed to record build log entry"
            );
        }

        info!(
            subsystem = "build",
            op = "submit_build",
            helix_type = %helix_type,
            chains = parameters.len(),
            request_id = %entry.request_id,
            requested = entry.requested,
            promoted = entry.should_cache,
            duration_ms = elapsed.as_millis() as u64,
            "Model built"
        );

        Ok(BuildResponse {
            model: ModelInfo::from_model(model, helix_type.as_str()),
            cached: false,
        })
    }

    /// Build from a raw `{"Parameters": [...]}` body.
    pub async fn submit_build_json(
        &self,
        body: &JsonValue,
        helix_type: &str,
        client: Option<&str>,
    ) -> Result<BuildResponse> {
        let helix_type = helix_type.parse::<HelixType>()?;
        let parameters = parse_parameter_list(
            body.get("Parameters")
                .ok_or_else(|| Error::InvalidInput("missing field `Parameters`".to_string()))?,
        )?;
        self.submit_build(&parameters, helix_type, client).await
    }
}
