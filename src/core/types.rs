// src/core/types.rs — Core domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::retry::RetryPolicy;
use crate::infra::errors::SizerError;
use crate::sim::ToolChainSpec;

// ─── Targets ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Lt => value < threshold,
            Comparison::Ge => value >= threshold,
            Comparison::Le => value <= threshold,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Gt => ">",
            Comparison::Lt => "<",
            Comparison::Ge => ">=",
            Comparison::Le => "<=",
        }
    }

    fn higher_is_better(self) -> bool {
        matches!(self, Comparison::Gt | Comparison::Ge)
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Comparison {
    type Err = SizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(Comparison::Gt),
            "<" => Ok(Comparison::Lt),
            ">=" => Ok(Comparison::Ge),
            "<=" => Ok(Comparison::Le),
            other => Err(SizerError::InvalidTarget {
                input: other.to_string(),
                message: "operator must be one of >, <, >=, <=".into(),
            }),
        }
    }
}

/// A performance requirement a candidate circuit must meet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub metric: String,
    pub op: Comparison,
    pub threshold: f64,
    #[serde(default)]
    pub unit: String,
}

impl Target {
    pub fn new(metric: impl Into<String>, op: Comparison, threshold: f64, unit: &str) -> Self {
        Self {
            metric: metric.into(),
            op,
            threshold,
            unit: unit.to_string(),
        }
    }

    /// Unmeasured (or non-finite) values never satisfy a target.
    pub fn is_satisfied(&self, metrics: &Metrics) -> bool {
        metrics
            .get(&self.metric)
            .map(|v| v.is_finite() && self.op.holds(v, self.threshold))
            .unwrap_or(false)
    }

    /// Signed distance to the threshold in the direction of the comparison.
    /// Positive means short of the target; unmeasured is infinitely far.
    pub fn distance(&self, value: Option<f64>) -> f64 {
        match value {
            Some(v) if v.is_finite() => {
                if self.op.higher_is_better() {
                    self.threshold - v
                } else {
                    v - self.threshold
                }
            }
            _ => f64::INFINITY,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.metric, self.op, self.threshold)?;
        if !self.unit.is_empty() {
            write!(f, " {}", self.unit)?;
        }
        Ok(())
    }
}

impl FromStr for Target {
    type Err = SizerError;

    /// Parse `metric<op>threshold[unit]`, e.g. `ac_gain_db>=60dB` or `power_w < 1e-3 W`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| SizerError::InvalidTarget {
            input: s.to_string(),
            message: message.to_string(),
        };

        let op_start = s
            .find(['<', '>'])
            .ok_or_else(|| invalid("missing comparison operator"))?;
        let metric = s[..op_start].trim();
        if metric.is_empty() {
            return Err(invalid("missing metric name"));
        }

        let rest = &s[op_start..];
        let op_len = if rest[1..].starts_with('=') { 2 } else { 1 };
        let op: Comparison = rest[..op_len].parse()?;

        let value_part = rest[op_len..].trim();
        let numeric_end = (1..=value_part.len())
            .rev()
            .filter(|&end| value_part.is_char_boundary(end))
            .find(|&end| value_part[..end].parse::<f64>().is_ok())
            .ok_or_else(|| invalid("missing numeric threshold"))?;

        let threshold: f64 = value_part[..numeric_end]
            .parse()
            .map_err(|_| invalid("missing numeric threshold"))?;
        if !threshold.is_finite() {
            return Err(invalid("threshold must be a finite number"));
        }

        Ok(Target::new(
            metric,
            op,
            threshold,
            value_part[numeric_end..].trim(),
        ))
    }
}

// ─── Metrics ────────────────────────────────────────────────────

/// Named measurements of one simulation. `None` marks a metric that was
/// requested but could not be extracted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metrics {
    values: BTreeMap<String, Option<f64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Option<f64>) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied().flatten()
    }

    pub fn is_measured(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<f64>)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, Option<f64>)> for Metrics {
    fn from_iter<I: IntoIterator<Item = (String, Option<f64>)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Operating-point bias of one transistor, as reported by the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceBias {
    pub name: String,
    pub vgs: f64,
    pub vth: f64,
}

impl DeviceBias {
    /// Gate overdrive `|vgs| - |vth|`. Sign-agnostic so PMOS devices read
    /// the same as NMOS; negative means the device is not turned on.
    pub fn margin(&self) -> f64 {
        self.vgs.abs() - self.vth.abs()
    }
}

// ─── Model reply objects ────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Increase,
    Decrease,
    Replace,
    Tweak,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Increase => write!(f, "increase"),
            Action::Decrease => write!(f, "decrease"),
            Action::Replace => write!(f, "replace"),
            Action::Tweak => write!(f, "tweak"),
        }
    }
}

/// One machine-actionable change to a circuit component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub component: String,
    #[serde(default, alias = "parameter", skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    pub action: Action,
    #[serde(
        default,
        alias = "value",
        deserialize_with = "de_magnitude",
        skip_serializing_if = "Option::is_none"
    )]
    pub magnitude: Option<String>,
    pub rationale: String,
}

/// Magnitudes arrive as either `"10%"` or a bare number.
fn de_magnitude<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "magnitude must be a string or number, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailingMetric {
    pub metric: String,
    pub reason: String,
}

/// The model's reading of one set of simulation results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub pass: bool,
    pub reasons: Vec<FailingMetric>,
    pub suggestions: Vec<Suggestion>,
}

/// Either a full candidate circuit or an explicit refusal. Never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizingResponse {
    Circuit {
        netlist_text: String,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl SizingResponse {
    pub fn circuit_text(&self) -> Option<&str> {
        match self {
            SizingResponse::Circuit { netlist_text } => Some(netlist_text),
            SizingResponse::Error { .. } => None,
        }
    }
}

// ─── Iterations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationState {
    Pending,
    Simulated,
    Analyzed,
    Proposed,
    Sized,
    Applied,
    Sealed,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationDecision {
    Accepted,
    Rejected,
    NoChange,
    Errored,
}

impl std::fmt::Display for IterationDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IterationDecision::Accepted => write!(f, "accepted"),
            IterationDecision::Rejected => write!(f, "rejected"),
            IterationDecision::NoChange => write!(f, "no-change"),
            IterationDecision::Errored => write!(f, "errored"),
        }
    }
}

/// Model-query stages that share the bounded-retry discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Analyze,
    Propose,
    Size,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Analyze => write!(f, "analyze"),
            Stage::Propose => write!(f, "propose"),
            Stage::Size => write!(f, "size"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    SimulationFailed,
    AnalysisUnparseable,
    ProposalUnparseable,
    SizingUnparseable,
    QueryFailed,
    ApplyFailed,
}

impl FailureReason {
    pub fn unparseable(stage: Stage) -> Self {
        match stage {
            Stage::Analyze => FailureReason::AnalysisUnparseable,
            Stage::Propose => FailureReason::ProposalUnparseable,
            Stage::Size => FailureReason::SizingUnparseable,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::SimulationFailed => "simulation-failed",
            FailureReason::AnalysisUnparseable => "analysis-unparseable",
            FailureReason::ProposalUnparseable => "proposal-unparseable",
            FailureReason::SizingUnparseable => "sizing-unparseable",
            FailureReason::QueryFailed => "query-failed",
            FailureReason::ApplyFailed => "apply-failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationFailure {
    pub reason: FailureReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub detail: String,
}

/// Number of model queries issued per stage (1 + retries used).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAttempts {
    pub analyze: u32,
    pub propose: u32,
    pub size: u32,
}

impl StageAttempts {
    pub fn record(&mut self, stage: Stage, attempts: u32) {
        match stage {
            Stage::Analyze => self.analyze = attempts,
            Stage::Propose => self.propose = attempts,
            Stage::Size => self.size = attempts,
        }
    }
}

/// One pass of the simulate → analyze → propose → size → apply pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    pub index: u32,
    pub input_circuit: String,
    pub input_digest: String,
    pub metrics: Option<Metrics>,
    /// Transistor bias of the input circuit, when the simulator reported it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bias: Vec<DeviceBias>,
    pub analysis: Option<AnalysisSummary>,
    pub suggestions: Vec<Suggestion>,
    pub sizing: Option<SizingResponse>,
    pub candidate_circuit: Option<String>,
    pub candidate_digest: Option<String>,
    pub candidate_metrics: Option<Metrics>,
    /// Copy of the apply-path file taken before the candidate replaced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_backup: Option<PathBuf>,
    pub decision: IterationDecision,
    pub state: IterationState,
    pub failure: Option<IterationFailure>,
    pub attempts: StageAttempts,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Iteration {
    pub fn new(index: u32, input_circuit: &str) -> Self {
        Self {
            index,
            input_circuit: input_circuit.to_string(),
            input_digest: circuit_digest(input_circuit),
            metrics: None,
            bias: Vec::new(),
            analysis: None,
            suggestions: Vec::new(),
            sizing: None,
            candidate_circuit: None,
            candidate_digest: None,
            candidate_metrics: None,
            applied_backup: None,
            decision: IterationDecision::Errored,
            state: IterationState::Pending,
            failure: None,
            attempts: StageAttempts::default(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// True when an accepted candidate moved at least one target metric
    /// strictly closer to its threshold than `best`, the smallest distance
    /// per target seen earlier in the run (same order as `targets`).
    pub fn improves_on(&self, targets: &[Target], best: &[f64]) -> bool {
        if self.decision != IterationDecision::Accepted {
            return false;
        }
        let Some(after) = &self.candidate_metrics else {
            return false;
        };
        targets
            .iter()
            .zip(best)
            .any(|(t, &b)| t.distance(after.get(&t.metric)) < b)
    }

    /// The iteration was abandoned because its input could not be simulated.
    /// A rejected candidate also records a simulation failure but is not one.
    pub fn is_simulation_failure(&self) -> bool {
        self.decision == IterationDecision::Errored
            && self
                .failure
                .as_ref()
                .is_some_and(|f| f.reason == FailureReason::SimulationFailed)
    }
}

/// Hex SHA-256 of a circuit text, recorded for auditability.
pub fn circuit_digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

// ─── Runs ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Converged,
    Exhausted,
    Stalled,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Converged => "converged",
            RunStatus::Exhausted => "exhausted",
            RunStatus::Stalled => "stalled",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One optimization lineage. The history is append-only and the best-accepted
/// circuit only moves on acceptance; both are mutated by the controller alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    id: String,
    initial_circuit: String,
    targets: Vec<Target>,
    iterations: Vec<Iteration>,
    best_circuit: String,
    best_metrics: Option<Metrics>,
    status: RunStatus,
    started_at: DateTime<Utc>,
}

impl Run {
    pub fn new(initial_circuit: impl Into<String>, targets: Vec<Target>) -> Self {
        let initial_circuit = initial_circuit.into();
        Self {
            id: new_run_id(),
            best_circuit: initial_circuit.clone(),
            initial_circuit,
            targets,
            iterations: Vec::new(),
            best_metrics: None,
            status: RunStatus::Running,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn initial_circuit(&self) -> &str {
        &self.initial_circuit
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn iterations(&self) -> &[Iteration] {
        &self.iterations
    }

    pub fn best_circuit(&self) -> &str {
        &self.best_circuit
    }

    pub fn best_metrics(&self) -> Option<&Metrics> {
        self.best_metrics.as_ref()
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn next_index(&self) -> u32 {
        self.iterations.len() as u32
    }

    pub fn targets_met(&self) -> bool {
        self.best_metrics
            .as_ref()
            .is_some_and(|m| self.targets.iter().all(|t| t.is_satisfied(m)))
    }

    pub(crate) fn append(&mut self, iteration: Iteration) {
        debug_assert_eq!(iteration.index, self.next_index());
        self.iterations.push(iteration);
    }

    pub(crate) fn accept(&mut self, circuit: String, metrics: Metrics) {
        self.best_circuit = circuit;
        self.best_metrics = Some(metrics);
    }

    /// Record a fresh measurement of the current best circuit.
    pub(crate) fn remeasure_best(&mut self, metrics: Metrics) {
        self.best_metrics = Some(metrics);
    }

    pub(crate) fn finish(&mut self, status: RunStatus) {
        self.status = status;
    }
}

/// Sortable, collision-resistant run identifier: `20261017T101500Z-1a2b3c4d`.
fn new_run_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"), &uuid[..8])
}

// ─── Progress ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    RunStart {
        run_id: String,
        max_iterations: u32,
    },
    IterationStart {
        index: u32,
        max_iterations: u32,
    },
    StageRetry {
        index: u32,
        stage: Stage,
        attempt: u32,
        reason: String,
    },
    IterationEnd {
        index: u32,
        decision: IterationDecision,
        failure: Option<FailureReason>,
    },
    Complete {
        status: RunStatus,
        iterations: u32,
        targets_met: bool,
    },
}

// ─── Engine configuration ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageRetries {
    pub analyze: u32,
    pub propose: u32,
    pub size: u32,
}

impl StageRetries {
    pub fn for_stage(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Analyze => self.analyze,
            Stage::Propose => self.propose,
            Stage::Size => self.size,
        }
    }
}

impl Default for StageRetries {
    fn default() -> Self {
        Self {
            analyze: 2,
            propose: 2,
            size: 2,
        }
    }
}

/// Configuration for one controller run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub max_iterations: u32,
    pub patience: u32,
    pub max_consecutive_sim_failures: u32,
    pub retries: StageRetries,
    pub retry_policy: RetryPolicy,
    pub simulation_timeout: Duration,
    pub query_timeout: Duration,
    pub targets: Vec<Target>,
    pub tool_chain: ToolChainSpec,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Netlist file that follows the run's candidates, if any.
    pub apply_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            patience: 3,
            max_consecutive_sim_failures: 25,
            retries: StageRetries::default(),
            retry_policy: RetryPolicy::default(),
            simulation_timeout: Duration::from_secs(300),
            query_timeout: Duration::from_secs(120),
            targets: Vec::new(),
            tool_chain: ToolChainSpec::default(),
            model: "gpt-4o".into(),
            temperature: None,
            max_tokens: None,
            apply_path: None,
        }
    }
}

impl From<&crate::infra::config::Config> for RunConfig {
    fn from(cfg: &crate::infra::config::Config) -> Self {
        Self {
            max_iterations: cfg.run.max_iterations,
            patience: cfg.run.patience,
            max_consecutive_sim_failures: cfg.run.max_consecutive_sim_failures,
            retries: StageRetries {
                analyze: cfg.retries.analysis,
                propose: cfg.retries.proposal,
                size: cfg.retries.sizing,
            },
            retry_policy: RetryPolicy::from(&cfg.retries),
            simulation_timeout: Duration::from_secs(cfg.timeouts.simulation_secs),
            query_timeout: Duration::from_secs(cfg.timeouts.query_secs),
            targets: cfg.targets.clone(),
            tool_chain: ToolChainSpec::new(cfg.simulator.tool_chain.clone()),
            model: cfg.model.model.clone(),
            temperature: cfg.model.temperature,
            max_tokens: cfg.model.max_tokens,
            apply_path: cfg.run.apply_path.as_ref().map(PathBuf::from),
        }
    }
}
