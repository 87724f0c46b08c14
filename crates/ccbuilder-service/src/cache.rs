//! Write-once model cache shared by the build and optimisation paths.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use ccbuilder_core::{Model, Result, Store};

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    /// `put` calls that found a model already stored.
    pub ignored: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    ignored: AtomicU64,
}

/// Model lookups keyed by build request id or job id.
#[derive(Clone)]
pub struct ModelCache {
    store: Arc<dyn Store>,
    counters: Arc<Counters>,
}

impl ModelCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            counters: Arc::new(Counters::default()),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Model>> {
        let model = self.store.models().get(id).await?;
        match model {
            Some(_) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(subsystem = "cache", op = "get", model_id = %id, "Cache HIT");
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(subsystem = "cache", op = "get", model_id = %id, "Cache MISS");
            }
        }
        Ok(model)
    }

    /// Store the model once. Returns `false` if one was already cached.
    pub async fn put(&self, model: &Model) -> Result<bool> {
        let inserted = self.store.models().insert_once(model).await?;
        if inserted {
            self.counters.inserts.fetch_add(1, Ordering::Relaxed);
            debug!(subsystem = "cache", op = "put", model_id = %model.id, "Cache SET");
        } else {
            self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            debug!(
                subsystem = "cache",
                op = "put",
                model_id = %model.id,
                "Model already cached, keeping stored copy"
            );
        }
        Ok(inserted)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
        }
    }
}
