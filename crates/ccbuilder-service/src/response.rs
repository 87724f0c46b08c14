//! Serializable results returned to the calling layer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ccbuilder_core::{KnobId, Model, OptimisedParameters};

/// Model fields as presented to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_id: Uuid,
    pub helix_type: String,
    pub pdb: String,
    pub score: f64,
    pub mean_rpt_value: f64,
    pub knob_ids: Vec<KnobId>,
}

impl ModelInfo {
    pub fn from_model(model: Model, helix_type: impl Into<String>) -> Self {
        Self {
            model_id: model.id,
            helix_type: helix_type.into(),
            pdb: model.pdb,
            score: model.score,
            mean_rpt_value: model.mean_rpt_value,
            knob_ids: model.knob_ids,
        }
    }
}

/// Response to a synchronous build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResponse {
    #[serde(flatten)]
    pub model: ModelInfo,
    /// Whether the model came from the cache instead of the engine.
    pub cached: bool,
}

/// Final result of a completed optimisation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimisationResult {
    #[serde(rename = "model_and_info")]
    pub model: ModelInfo,
    pub parameters: OptimisedParameters,
    pub oligomeric_state: i32,
}
