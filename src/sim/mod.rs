// src/sim/mod.rs — Simulation interface and gateway

pub mod netlist;
pub mod ngspice;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::infra::errors::SimulationFailure;

/// Opaque description of which analyses to run. The controller passes it
/// through untouched; only simulators interpret it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolChainSpec(serde_json::Value);

impl ToolChainSpec {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Raw simulator output: produced files keyed by name, plus the console log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsRaw {
    pub artifacts: BTreeMap<String, String>,
    pub log: String,
}

impl MetricsRaw {
    pub fn artifact(&self, name: &str) -> Option<&str> {
        self.artifacts.get(name).map(String::as_str)
    }
}

/// Something that can turn circuit text into raw measurements.
#[async_trait]
pub trait Simulator: Send + Sync {
    fn name(&self) -> &str;

    async fn simulate(
        &self,
        circuit: &str,
        tool_chain: &ToolChainSpec,
        timeout: Duration,
    ) -> Result<MetricsRaw, SimulationFailure>;
}

/// Boundary between the controller and the simulator. Enforces the timeout,
/// and files raw artifacts away for later inspection.
pub struct SimulationGateway {
    simulator: Arc<dyn Simulator>,
    tool_chain: ToolChainSpec,
    timeout: Duration,
}

impl SimulationGateway {
    pub fn new(simulator: Arc<dyn Simulator>, tool_chain: ToolChainSpec, timeout: Duration) -> Self {
        Self {
            simulator,
            tool_chain,
            timeout,
        }
    }

    /// Simulate one circuit. Artifacts land in `artifact_dir` when given;
    /// a failed write is logged and never masks the result.
    pub async fn run(
        &self,
        circuit: &str,
        artifact_dir: Option<&Path>,
    ) -> Result<MetricsRaw, SimulationFailure> {
        let call = self
            .simulator
            .simulate(circuit, &self.tool_chain, self.timeout);

        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(r) => r,
            Err(_) => Err(SimulationFailure::Timeout {
                secs: self.timeout.as_secs(),
            }),
        };

        if let Some(dir) = artifact_dir {
            if let Err(e) = write_artifacts(dir, circuit, &result) {
                tracing::warn!(dir = %dir.display(), "Failed to write simulation artifacts: {}", e);
            }
        }

        match &result {
            Ok(raw) => tracing::debug!(
                simulator = self.simulator.name(),
                artifacts = raw.artifacts.len(),
                "Simulation succeeded"
            ),
            Err(e) => tracing::debug!(simulator = self.simulator.name(), "Simulation failed: {}", e),
        }
        result
    }
}

fn write_artifacts(
    dir: &Path,
    circuit: &str,
    result: &Result<MetricsRaw, SimulationFailure>,
) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join("circuit.cir"), circuit)?;
    match result {
        Ok(raw) => {
            for (name, content) in &raw.artifacts {
                // Artifact names come from the simulator; keep them inside `dir`
                let file_name = Path::new(name)
                    .file_name()
                    .map(|n| n.to_os_string())
                    .unwrap_or_else(|| "artifact".into());
                std::fs::write(dir.join(file_name), content)?;
            }
            std::fs::write(dir.join("simulator.log"), &raw.log)?;
        }
        Err(e) => std::fs::write(dir.join("failure.txt"), e.to_string())?,
    }
    Ok(())
}
