//! Domain models for CCBuilder.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::uuid_utils::new_v7;

// =============================================================================
// CHAIN PARAMETERS
// =============================================================================

/// Heptad register of the first residue of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Register {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
}

impl Register {
    pub fn as_str(self) -> &'static str {
        match self {
            Register::A => "a",
            Register::B => "b",
            Register::C => "c",
            Register::D => "d",
            Register::E => "e",
            Register::F => "f",
            Register::G => "g",
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Register {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "a" => Ok(Register::A),
            "b" => Ok(Register::B),
            "c" => Ok(Register::C),
            "d" => Ok(Register::D),
            "e" => Ok(Register::E),
            "f" => Ok(Register::F),
            "g" => Ok(Register::G),
            other => Err(Error::InvalidInput(format!(
                "register must be one of a-g, got {:?}",
                other
            ))),
        }
    }
}

/// Geometric and sequence description of one chain.
///
/// Identity is content equality: two records with equal fields are the same
/// parameters and canonicalize to the same id. Field names on the wire match
/// the builder front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainParameters {
    #[serde(rename = "Radius")]
    pub radius: f64,
    #[serde(rename = "Pitch")]
    pub pitch: f64,
    #[serde(rename = "Interface Angle")]
    pub interface_angle: f64,
    #[serde(rename = "Register")]
    pub register: Register,
    #[serde(rename = "Sequence")]
    pub sequence: String,
    /// `true` for an antiparallel chain.
    #[serde(rename = "Orientation")]
    pub orientation: bool,
    #[serde(rename = "Z-Shift")]
    pub z_shift: f64,
    #[serde(rename = "Super-Helical Rotation")]
    pub super_helical_rotation: f64,
    #[serde(rename = "Linked SHR")]
    pub linked_shr: bool,
}

impl ChainParameters {
    /// Validate a free-form JSON record into typed chain parameters.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let params: ChainParameters = serde_json::from_value(value.clone())
            .map_err(|e| Error::InvalidInput(format!("malformed chain parameters: {}", e)))?;
        params.validate()?;
        Ok(params)
    }

    /// Check the value constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let numeric = [
            ("Radius", self.radius),
            ("Pitch", self.pitch),
            ("Interface Angle", self.interface_angle),
            ("Z-Shift", self.z_shift),
            ("Super-Helical Rotation", self.super_helical_rotation),
        ];
        for (name, value) in numeric {
            if !value.is_finite() {
                return Err(Error::InvalidInput(format!(
                    "{} must be a finite number",
                    name
                )));
            }
        }
        if self.pitch == 0.0 {
            return Err(Error::InvalidInput("Pitch must be non-zero".to_string()));
        }
        if self.sequence.is_empty() {
            return Err(Error::InvalidInput("Sequence must not be empty".to_string()));
        }
        if let Some(c) = self.sequence.chars().find(|c| !c.is_ascii_uppercase()) {
            return Err(Error::InvalidInput(format!(
                "Sequence contains invalid residue code {:?}",
                c
            )));
        }
        Ok(())
    }
}

/// Validate a JSON list of chain parameter records.
pub fn parse_parameter_list(value: &JsonValue) -> Result<Vec<ChainParameters>> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::InvalidInput("Parameters must be a list".to_string()))?;
    if items.is_empty() {
        return Err(Error::InvalidInput(
            "Parameters must contain at least one chain".to_string(),
        ));
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            ChainParameters::from_json(item).map_err(|e| match e {
                Error::InvalidInput(msg) => Error::InvalidInput(format!("chain {}: {}", i, msg)),
                other => other,
            })
        })
        .collect()
}

// =============================================================================
// HELIX TYPE
// =============================================================================

/// Selects the construction and scoring path used by the modeling engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HelixType {
    /// Alpha-helical coiled coil.
    Alpha,
    /// Collagen triple helix.
    Collagen,
}

impl HelixType {
    pub fn as_str(self) -> &'static str {
        match self {
            HelixType::Alpha => "ALPHA",
            HelixType::Collagen => "COLLAGEN",
        }
    }
}

impl fmt::Display for HelixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HelixType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ALPHA" => Ok(HelixType::Alpha),
            "COLLAGEN" => Ok(HelixType::Collagen),
            _ => Err(Error::InvalidInput(format!("Unknown helix type: {:?}", s))),
        }
    }
}

// =============================================================================
// BUILD REQUESTS AND MODELS
// =============================================================================

/// Deduplicated synchronous build request.
///
/// Keyed by the ordered parameter id list plus the helix type; chain order
/// is significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub id: Uuid,
    pub parameter_ids: Vec<Uuid>,
    pub helix_type: HelixType,
    /// How many times this exact request has been made.
    pub requested: i32,
}

/// Knobs-into-holes annotation: `[chain id, residue id]` of a knob residue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnobId(pub String, pub String);

impl KnobId {
    pub fn new(chain: impl Into<String>, residue: impl Into<String>) -> Self {
        Self(chain.into(), residue.into())
    }

    pub fn chain(&self) -> &str {
        &self.0
    }

    pub fn residue(&self) -> &str {
        &self.1
    }
}

/// Result of one modeling-engine build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildOutput {
    /// Structure in PDB format.
    pub pdb: String,
    /// Interaction energy of the model.
    pub score: f64,
    /// Mean residues-per-turn across all chains.
    pub mean_rpt_value: f64,
    #[serde(default)]
    pub knob_ids: Vec<KnobId>,
}

impl BuildOutput {
    /// Attach the request or job id the result is cached under.
    pub fn into_model(self, id: Uuid) -> Model {
        Model {
            id,
            pdb: self.pdb,
            score: self.score,
            mean_rpt_value: self.mean_rpt_value,
            knob_ids: self.knob_ids,
        }
    }
}

/// A cached, immutable model keyed by build request id or job id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub id: Uuid,
    pub pdb: String,
    pub score: f64,
    pub mean_rpt_value: f64,
    pub knob_ids: Vec<KnobId>,
}

/// Append-only record of a fresh synchronous build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildLogEntry {
    pub id: Uuid,
    /// Address of the requesting client, when the calling layer knows it.
    pub client_addr: Option<String>,
    pub date: DateTime<Utc>,
    pub build_time_secs: f64,
    pub build_request_id: Uuid,
}

impl BuildLogEntry {
    pub fn new(client_addr: Option<String>, build_time: Duration, build_request_id: Uuid) -> Self {
        Self {
            id: new_v7(),
            client_addr,
            date: Utc::now(),
            build_time_secs: build_time.as_secs_f64(),
            build_request_id,
        }
    }
}

// =============================================================================
// OPTIMISATION JOBS
// =============================================================================

/// Lifecycle state of an optimisation job.
///
/// ```text
/// SUBMITTED -> QUEUED -> RUNNING -> COMPLETE
///                               \-> FAILED
/// ```
///
/// Every status change in the system is checked against
/// [`JobStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    Queued,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Submitted,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Complete,
        JobStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Submitted => "SUBMITTED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Failed => "FAILED",
        }
    }

    /// The transition table.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Submitted, JobStatus::Queued)
                | (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Complete)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    /// Return `next` if the table allows it, `InvalidTransition` otherwise.
    pub fn transition(self, next: JobStatus) -> Result<JobStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Serialization(format!("unknown job status {:?}", s)))
    }
}

/// Parameters of the best model found by an optimisation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimisedParameters {
    pub radius: f64,
    pub pitch: f64,
    #[serde(rename = "phiCA")]
    pub phi_ca: f64,
    pub sequence: String,
    pub register: Register,
}

/// Persisted record of one optimisation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptJob {
    pub id: Uuid,
    /// Stored as submitted; parsed by the worker that runs the job.
    pub helix_type: String,
    pub initial_parameter_ids: Vec<Uuid>,
    pub oligomeric_state: i32,
    /// Search intensity passed to the optimiser.
    pub heat: f64,
    pub status: JobStatus,
    pub time_submitted: DateTime<Utc>,
    pub time_finished: Option<DateTime<Utc>>,
    pub final_parameters: Option<OptimisedParameters>,
    pub model_id: Option<Uuid>,
    pub error_message: Option<String>,
}

impl OptJob {
    /// A fresh job in the initial `SUBMITTED` state.
    pub fn submitted(helix_type: HelixType, initial_parameter_ids: Vec<Uuid>, heat: f64) -> Self {
        Self {
            id: new_v7(),
            helix_type: helix_type.as_str().to_string(),
            oligomeric_state: initial_parameter_ids.len() as i32,
            initial_parameter_ids,
            heat,
            status: JobStatus::Submitted,
            time_submitted: Utc::now(),
            time_finished: None,
            final_parameters: None,
            model_id: None,
            error_message: None,
        }
    }
}

/// Body of an optimisation submission from the builder front end.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisationRequest {
    pub helix_type: HelixType,
    pub parameters: Vec<ChainParameters>,
    pub heat: f64,
}

impl OptimisationRequest {
    /// Validate `{"Helix Type": ..., "Parameters": [...], "Heat": ...}`.
    pub fn from_json(body: &JsonValue) -> Result<Self> {
        let helix_type = body
            .get("Helix Type")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::InvalidInput("missing field `Helix Type`".to_string()))?
            .parse::<HelixType>()?;
        let parameters = parse_parameter_list(
            body.get("Parameters")
                .ok_or_else(|| Error::InvalidInput("missing field `Parameters`".to_string()))?,
        )?;
        let heat = body
            .get("Heat")
            .and_then(JsonValue::as_f64)
            .ok_or_else(|| Error::InvalidInput("`Heat` must be a number".to_string()))?;
        if !heat.is_finite() || heat < 0.0 {
            return Err(Error::InvalidInput(
                "`Heat` must be a non-negative number".to_string(),
            ));
        }
        Ok(Self {
            helix_type,
            parameters,
            heat,
        })
    }
}
