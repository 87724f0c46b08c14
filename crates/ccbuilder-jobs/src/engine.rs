//! Modeling engine backed by an external executable.
//!
//! The executable is invoked once per call as `<command> build` or
//! `<command> optimise`. It reads one JSON request on stdin:
//!
//! ```json
//! {"helix_type": "ALPHA", "parameters": [{"Radius": 5.0, ...}], "heat": 298.0}
//! ```
//!
//! and writes one JSON document on stdout: a build output
//! (`pdb`, `score`, `mean_rpt_value`, `knob_ids`) for `build`, or
//! `{"parameters": {...}, "model": {...}}` for `optimise`. A non-zero exit
//! status fails the call with the captured stderr.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use ccbuilder_core::{
    BuildOutput, ChainParameters, Error, HelixType, ModelingEngine, OptimisedParameters, Result,
};

#[derive(Serialize)]
struct EngineRequest<'a> {
    helix_type: HelixType,
    parameters: &'a [ChainParameters],
    #[serde(skip_serializing_if = "Option::is_none")]
    heat: Option<f64>,
}

#[derive(Deserialize)]
struct OptimiseResponse {
    parameters: OptimisedParameters,
    model: BuildOutput,
}

/// [`ModelingEngine`] that shells out to an external modelling program.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    command: PathBuf,
}

impl ProcessEngine {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub fn command(&self) -> &PathBuf {
        &self.command
    }

    /// Check whether the executable can be started.
    pub async fn health_check(&self) -> bool {
        match Command::new(&self.command).arg("--version").output().await {
            Ok(output) => output.status.success(),
            Err(_) => false,
        }
    }

    async fn invoke(&self, subcommand: &str, request: &EngineRequest<'_>) -> Result<Vec<u8>> {
        let start = Instant::now();
        let body = serde_json::to_vec(request)?;

        let mut child = Command::new(&self.command)
            .arg(subcommand)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Optimization(format!(
                    "failed to start {}: {}",
                    self.command.display(),
                    e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&body).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                subsystem = "jobs",
                component = "engine",
                op = subcommand,
                status = %output.status,
                "Modeling engine failed"
            );
            return Err(Error::Optimization(format!(
                "engine exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        debug!(
            subsystem = "jobs",
            component = "engine",
            op = subcommand,
            duration_ms = start.elapsed().as_millis() as u64,
            "Modeling engine call finished"
        );
        Ok(output.stdout)
    }
}

fn parse_output<T: for<'de> Deserialize<'de>>(stdout: &[u8]) -> Result<T> {
    serde_json::from_slice(stdout)
        .map_err(|e| Error::Optimization(format!("unreadable engine output: {}", e)))
}

#[async_trait]
impl ModelingEngine for ProcessEngine {
    async fn build(
        &self,
        parameters: &[ChainParameters],
        helix_type: HelixType,
    ) -> Result<BuildOutput> {
        let request = EngineRequest {
            helix_type,
            parameters,
            heat: None,
        };
        let stdout = self.invoke("build", &request).await?;
        parse_output(&stdout)
    }

    async fn optimise(
        &self,
        parameters: &[ChainParameters],
        helix_type: HelixType,
        heat: f64,
    ) -> Result<(OptimisedParameters, BuildOutput)> {
        let request = EngineRequest {
            helix_type,
            parameters,
            heat: Some(heat),
        };
        let stdout = self.invoke("optimise", &request).await?;
        let response: OptimiseResponse = parse_output(&stdout)?;
        Ok((response.parameters, response.model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccbuilder_core::Register;

    fn chain() -> ChainParameters {
        ChainParameters {
            radius: 5.0,
            pitch: 200.0,
            interface_angle: 26.0,
            register: Register::A,
            sequence: "LKAIAQE".to_string(),
            orientation: false,
            z_shift: 0.0,
            super_helical_rotation: 0.0,
            linked_shr: false,
        }
    }

    #[test]
    fn test_request_serialization() {
        let chains = vec![chain()];
        let request = EngineRequest {
            helix_type: HelixType::Collagen,
            parameters: &chains,
            heat: Some(10.0),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["helix_type"], "COLLAGEN");
        assert_eq!(value["heat"], 10.0);
        assert_eq!(value["parameters"][0]["Sequence"], "LKAIAQE");

        let build = EngineRequest {
            helix_type: HelixType::Alpha,
            parameters: &chains,
            heat: None,
        };
        let value = serde_json::to_value(&build).unwrap();
        assert!(value.get("heat").is_none());
    }

    #[test]
    fn test_parse_optimise_output() {
        let stdout = br#"{
            "parameters": {"radius": 5.2, "pitch": 180.0, "phiCA": 20.5,
                           "sequence": "LKAIAQE", "register": "a"},
            "model": {"pdb": "ATOM", "score": -10.0, "mean_rpt_value": 3.6,
                      "knob_ids": [["A", "4"]]}
        }"#;
        let response: OptimiseResponse = parse_output(stdout).unwrap();
        assert_eq!(response.parameters.phi_ca, 20.5);
        assert_eq!(response.model.knob_ids.len(), 1);
    }

    #[test]
    fn test_unreadable_output_is_optimization_error() {
        let result: Result<BuildOutput> = parse_output(b"not json");
        assert!(matches!(result, Err(Error::Optimization(_))));
    }

    #[tokio::test]
    async fn test_missing_executable_fails_call() {
        let engine = ProcessEngine::new("/nonexistent/ccbuilder-engine");
        assert!(!engine.health_check().await);

        let result = engine.build(&[chain()], HelixType::Alpha).await;
        assert!(matches!(result, Err(Error::Optimization(_))));
    }
}
