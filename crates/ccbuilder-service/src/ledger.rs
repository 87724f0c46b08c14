//! Build request ledger and cache promotion.

use uuid::Uuid;

use ccbuilder_core::defaults::CACHE_PROMOTION_THRESHOLD;
use ccbuilder_core::{HelixType, Result, Store};

/// Outcome of recording one synchronous build request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub request_id: Uuid,
    /// Counter after this request.
    pub requested: i32,
    /// True only on the request that reaches the promotion threshold.
    pub should_cache: bool,
}

/// Counts identical build requests and decides when their model is cached.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequestLedger {
    threshold: i32,
}

impl Default for BuildRequestLedger {
    fn default() -> Self {
        Self::new(CACHE_PROMOTION_THRESHOLD)
    }
}

impl BuildRequestLedger {
    pub fn new(threshold: i32) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    /// Record a request for the ordered ids and helix type.
    pub async fn record_request(
        &self,
        store: &dyn Store,
        parameter_ids: &[Uuid],
        helix_type: HelixType,
    ) -> Result<LedgerEntry> {
        let request = store
            .build_requests()
            .record(parameter_ids, helix_type)
            .await?;
        Ok(LedgerEntry {
            request_id: request.id,
            requested: request.requested,
            should_cache: request.requested == self.threshold,
        })
    }
}
