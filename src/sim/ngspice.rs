// src/sim/ngspice.rs — ngspice batch-mode simulator
//
// Interprets the tool chain's simulation calls, rewrites the circuit's
// control block to run them with `wrdata`, and runs `ngspice -b` in a
// scratch directory. An operating-point call prints the transistor bias
// table to the console instead of writing a data file. Extraction calls in
// the tool chain are ignored here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::netlist::{insert_control_block, strip_control_blocks};
use super::{MetricsRaw, Simulator, ToolChainSpec};
use crate::infra::errors::{SimulationFailure, SizerError};
use crate::util::tail_str;

pub const AC_DATA: &str = "output_ac.dat";
pub const TRAN_DATA: &str = "output_tran.dat";
pub const DC_DATA: &str = "output_dc.dat";

const DIAGNOSTIC_LIMIT: usize = 2_000;

/// Prints `device` / `vgs` / `vth` rows for every MOSFET.
const BIAS_TABLE_COMMAND: &str = "show m : vgs vth";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisKind {
    Ac,
    Tran,
    Dc,
    Op,
}

impl AnalysisKind {
    fn from_call(call: &serde_json::Value) -> Option<Self> {
        let by_type = call
            .get("simulation_type")
            .and_then(|v| v.as_str())
            .and_then(|t| match t {
                "ac" => Some(AnalysisKind::Ac),
                "transient" | "tran" => Some(AnalysisKind::Tran),
                "dc" => Some(AnalysisKind::Dc),
                "op" => Some(AnalysisKind::Op),
                _ => None,
            });
        by_type.or_else(|| match call.get("name").and_then(|v| v.as_str())? {
            "ac_simulation" => Some(AnalysisKind::Ac),
            "tran_simulation" | "transient_simulation" => Some(AnalysisKind::Tran),
            "dc_simulation" => Some(AnalysisKind::Dc),
            "op_simulation" | "vgs_check" => Some(AnalysisKind::Op),
            _ => None,
        })
    }

    fn default_command(self) -> &'static str {
        match self {
            AnalysisKind::Ac => "ac dec 10 1 1e9",
            AnalysisKind::Tran => "tran 50n 500u",
            AnalysisKind::Dc => "dc Vcm 0 1.2 0.001",
            AnalysisKind::Op => "op",
        }
    }

    /// File written by `wrdata`; the operating point only reaches the log.
    pub fn data_file(self) -> Option<&'static str> {
        match self {
            AnalysisKind::Ac => Some(AC_DATA),
            AnalysisKind::Tran => Some(TRAN_DATA),
            AnalysisKind::Dc => Some(DC_DATA),
            AnalysisKind::Op => None,
        }
    }
}

/// One analysis to run, with the ngspice command that performs it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPlan {
    pub kind: AnalysisKind,
    pub command: String,
}

/// Read the simulation calls out of a tool chain such as
/// `{"tool_calls":[{"name":"ac_simulation"},{"name":"ac_gain"}]}`.
/// A call may override its command with `"args": {"command": "..."}`.
/// A chain with no simulation calls runs a single AC analysis.
pub fn plan_analyses(tool_chain: &ToolChainSpec) -> Vec<AnalysisPlan> {
    let mut plans: Vec<AnalysisPlan> = Vec::new();
    let calls = tool_chain
        .as_value()
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    for call in &calls {
        let Some(kind) = AnalysisKind::from_call(call) else {
            continue;
        };
        if plans.iter().any(|p| p.kind == kind) {
            continue;
        }
        let command = call
            .get("args")
            .and_then(|a| a.get("command"))
            .and_then(|c| c.as_str())
            .unwrap_or(kind.default_command())
            .to_string();
        plans.push(AnalysisPlan { kind, command });
    }

    if plans.is_empty() {
        plans.push(AnalysisPlan {
            kind: AnalysisKind::Ac,
            command: AnalysisKind::Ac.default_command().to_string(),
        });
    }
    plans
}

/// Circuit text with its control block replaced by the planned analyses.
pub fn build_deck(circuit: &str, plans: &[AnalysisPlan], signal: &str) -> String {
    let mut commands = Vec::with_capacity(plans.len() * 2);
    for plan in plans {
        commands.push(plan.command.clone());
        match plan.kind.data_file() {
            Some(file) => commands.push(format!("wrdata {file} {signal}")),
            None => commands.push(BIAS_TABLE_COMMAND.to_string()),
        }
    }
    insert_control_block(&strip_control_blocks(circuit), &commands)
}

pub struct NgspiceSimulator {
    bin: PathBuf,
    signal: String,
    scratch_root: PathBuf,
}

impl NgspiceSimulator {
    pub fn new(bin: impl Into<PathBuf>, signal: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            signal: signal.into(),
            scratch_root: std::env::temp_dir(),
        }
    }

    /// Use the configured binary, or find `ngspice` on PATH.
    pub fn locate(configured: Option<&str>, signal: &str) -> Result<Self, SizerError> {
        let bin = match configured {
            Some(path) => PathBuf::from(path),
            None => which::which("ngspice").map_err(|_| SizerError::NoSimulator)?,
        };
        Ok(Self::new(bin, signal))
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    async fn run_in(
        &self,
        work_dir: &Path,
        circuit: &str,
        tool_chain: &ToolChainSpec,
        timeout: Duration,
    ) -> Result<MetricsRaw, SimulationFailure> {
        let plans = plan_analyses(tool_chain);
        let deck = build_deck(circuit, &plans, &self.signal);
        let deck_path = work_dir.join("netlist.cir");
        tokio::fs::write(&deck_path, &deck)
            .await
            .map_err(|e| SimulationFailure::Unavailable(format!("cannot write deck: {e}")))?;

        tracing::debug!(bin = %self.bin.display(), analyses = plans.len(), "Running ngspice");

        let child = Command::new(&self.bin)
            .arg("-b")
            .arg(&deck_path)
            .current_dir(work_dir)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(SimulationFailure::Unavailable(e.to_string())),
            Err(_) => {
                return Err(SimulationFailure::Timeout {
                    secs: timeout.as_secs(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let log = format!("{stdout}\n{stderr}");

        if !output.status.success() {
            let tail = if stderr.trim().is_empty() { &stdout } else { &stderr };
            return Err(SimulationFailure::NonZeroExit {
                code: output.status.code(),
                diagnostic: tail_str(tail.trim(), DIAGNOSTIC_LIMIT).to_string(),
            });
        }

        let mut raw = MetricsRaw {
            log,
            ..Default::default()
        };
        for name in plans.iter().filter_map(|p| p.kind.data_file()) {
            match tokio::fs::read_to_string(work_dir.join(name)).await {
                Ok(content) => {
                    raw.artifacts.insert(name.to_string(), content);
                }
                Err(_) => {
                    return Err(SimulationFailure::MissingArtifact {
                        name: name.to_string(),
                    })
                }
            }
        }
        Ok(raw)
    }
}

#[async_trait]
impl Simulator for NgspiceSimulator {
    fn name(&self) -> &str {
        "ngspice"
    }

    async fn simulate(
        &self,
        circuit: &str,
        tool_chain: &ToolChainSpec,
        timeout: Duration,
    ) -> Result<MetricsRaw, SimulationFailure> {
        let work_dir = self
            .scratch_root
            .join(format!("ampsizer-sim-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| SimulationFailure::Unavailable(format!("cannot create scratch dir: {e}")))?;

        let result = self.run_in(&work_dir, circuit, tool_chain, timeout).await;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            tracing::debug!(dir = %work_dir.display(), "Failed to clean scratch dir: {}", e);
        }
        result
    }
}
