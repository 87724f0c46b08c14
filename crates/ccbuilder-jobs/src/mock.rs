//! Mock modeling engine for deterministic testing.
//!
//! Outputs are a pure function of the input chains, so identical requests
//! always produce identical models. Calls are logged for assertions, and
//! failures, panics, latency and a release gate can be configured.
//!
//! ## Usage
//!
//! ```rust
//! use ccbuilder_jobs::mock::MockEngine;
//!
//! let engine = MockEngine::new().with_optimise_failure("diverged");
//! assert_eq!(engine.optimise_call_count(), 0);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use ccbuilder_core::{
    BuildOutput, ChainParameters, Error, HelixType, KnobId, ModelingEngine, OptimisedParameters,
    Result,
};

/// Mock modeling engine.
#[derive(Clone, Default)]
pub struct MockEngine {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

#[derive(Debug, Clone, Default)]
struct MockConfig {
    latency_ms: u64,
    build_failure: Option<String>,
    optimise_failure: Option<String>,
    panic_on_optimise: bool,
    gate: Option<Arc<Semaphore>>,
}

/// One logged engine call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub operation: &'static str,
    pub helix_type: HelixType,
    pub sequences: Vec<String>,
    pub heat: Option<f64>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set simulated latency for all operations.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    /// Fail every build with `message`.
    pub fn with_build_failure(mut self, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).build_failure = Some(message.into());
        self
    }

    /// Fail every optimisation with `message`.
    pub fn with_optimise_failure(mut self, message: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).optimise_failure = Some(message.into());
        self
    }

    /// Panic inside every optimisation, simulating a crashing worker.
    pub fn with_panic_on_optimise(mut self) -> Self {
        Arc::make_mut(&mut self.config).panic_on_optimise = true;
        self
    }

    /// Block each optimisation until a permit is added to `gate`.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        Arc::make_mut(&mut self.config).gate = Some(gate);
        self
    }

    fn log(&self) -> MutexGuard<'_, Vec<MockCall>> {
        self.call_log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<MockCall> {
        self.log().clone()
    }

    pub fn build_call_count(&self) -> usize {
        self.log().iter().filter(|c| c.operation == "build").count()
    }

    pub fn optimise_call_count(&self) -> usize {
        self.log().iter().filter(|c| c.operation == "optimise").count()
    }

    fn log_call(
        &self,
        operation: &'static str,
        parameters: &[ChainParameters],
        helix_type: HelixType,
        heat: Option<f64>,
    ) {
        self.log().push(MockCall {
            operation,
            helix_type,
            sequences: parameters.iter().map(|p| p.sequence.clone()).collect(),
            heat,
        });
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    /// The deterministic model for `parameters`.
    pub fn expected_output(parameters: &[ChainParameters], helix_type: HelixType) -> BuildOutput {
        let mut pdb = format!("HEADER    MOCK {}\n", helix_type);
        let mut residues = 0usize;
        let mut knob_ids = Vec::new();

        for (index, chain) in parameters.iter().enumerate() {
            let chain_id = chain_letter(index);
            residues += chain.sequence.len();
            pdb.push_str(&format!(
                "REMARK    CHAIN {} R={:.3} P={:.3} SEQ={}\n",
                chain_id, chain.radius, chain.pitch, chain.sequence
            ));
            if helix_type == HelixType::Alpha && !chain.sequence.is_empty() {
                knob_ids.push(KnobId::new(chain_id.to_string(), "1"));
            }
        }
        pdb.push_str("END\n");

        let radius_sum: f64 = parameters.iter().map(|p| p.radius).sum();
        let mean_rpt_value = match helix_type {
            HelixType::Alpha => 3.5,
            HelixType::Collagen => 3.3,
        };

        BuildOutput {
            pdb,
            score: -(residues as f64) * 1.5 - radius_sum,
            mean_rpt_value,
            knob_ids,
        }
    }
}

fn chain_letter(index: usize) -> char {
    (b'A' + (index % 26) as u8) as char
}

#[async_trait]
impl ModelingEngine for MockEngine {
    async fn build(
        &self,
        parameters: &[ChainParameters],
        helix_type: HelixType,
    ) -> Result<BuildOutput> {
        self.log_call("build", parameters, helix_type, None);
        self.simulate_latency().await;

        if let Some(message) = &self.config.build_failure {
            return Err(Error::Optimization(message.clone()));
        }

        Ok(Self::expected_output(parameters, helix_type))
    }

    async fn optimise(
        &self,
        parameters: &[ChainParameters],
        helix_type: HelixType,
        heat: f64,
    ) -> Result<(OptimisedParameters, BuildOutput)> {
        self.log_call("optimise", parameters, helix_type, Some(heat));

        if let Some(gate) = &self.config.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| Error::Internal("mock gate closed".to_string()))?;
            permit.forget();
        }
        self.simulate_latency().await;

        if self.config.panic_on_optimise {
            panic!("mock engine crashed");
        }
        if let Some(message) = &self.config.optimise_failure {
            return Err(Error::Optimization(message.clone()));
        }

        let first = parameters
            .first()
            .ok_or_else(|| Error::InvalidInput("no chains to optimise".to_string()))?;
        let optimised = OptimisedParameters {
            radius: first.radius + 0.1,
            pitch: first.pitch,
            phi_ca: first.interface_angle,
            sequence: first.sequence.clone(),
            register: first.register,
        };
        Ok((optimised, Self::expected_output(parameters, helix_type)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccbuilder_core::Register;

    fn chain(sequence: &str) -> ChainParameters {
        ChainParameters {
            radius: 5.0,
            pitch: 200.0,
            interface_angle: 26.0,
            register: Register::A,
            sequence: sequence.to_string(),
            orientation: false,
            z_shift: 0.0,
            super_helical_rotation: 0.0,
            linked_shr: false,
        }
    }

    #[tokio::test]
    async fn test_build_is_deterministic() {
        let engine = MockEngine::new();
        let chains = vec![chain("LKAIAQE"), chain("LKAIAQE")];

        let first = engine.build(&chains, HelixType::Alpha).await.unwrap();
        let second = engine.build(&chains, HelixType::Alpha).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.knob_ids.len(), 2);
        assert!(first.pdb.contains("SEQ=LKAIAQE"));
        assert_eq!(engine.build_call_count(), 2);
    }

    #[tokio::test]
    async fn test_optimise_uses_first_chain() {
        let engine = MockEngine::new();
        let (params, model) = engine
            .optimise(&[chain("EIAALKQE")], HelixType::Collagen, 298.0)
            .await
            .unwrap();

        assert_eq!(params.sequence, "EIAALKQE");
        assert_eq!(params.phi_ca, 26.0);
        assert!(model.knob_ids.is_empty());
        assert_eq!(engine.calls()[0].heat, Some(298.0));
    }

    #[tokio::test]
    async fn test_configured_failures() {
        let engine = MockEngine::new()
            .with_build_failure("bad geometry")
            .with_optimise_failure("diverged");

        assert!(matches!(
            engine.build(&[chain("LKAIAQE")], HelixType::Alpha).await,
            Err(Error::Optimization(m)) if m == "bad geometry"
        ));
        assert!(engine
            .optimise(&[chain("LKAIAQE")], HelixType::Alpha, 1.0)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_gate_holds_optimisation() {
        let gate = Arc::new(Semaphore::new(0));
        let engine = MockEngine::new().with_gate(gate.clone());

        let task = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .optimise(&[chain("LKAIAQE")], HelixType::Alpha, 1.0)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        gate.add_permits(1);
        assert!(task.await.unwrap().is_ok());
    }
}
