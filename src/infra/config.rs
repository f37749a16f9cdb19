// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::types::Target;
use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunSection,

    #[serde(default)]
    pub retries: RetriesConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub simulator: SimulatorConfig,

    #[serde(default)]
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub max_iterations: u32,
    pub patience: u32,
    pub max_consecutive_sim_failures: u32,
    /// Root for per-run artifact directories. Defaults to the data dir.
    #[serde(default)]
    pub artifacts_dir: Option<String>,
    /// Netlist file rewritten with each accepted candidate.
    #[serde(default)]
    pub apply_path: Option<String>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            patience: 3,
            max_consecutive_sim_failures: 25,
            artifacts_dir: None,
            apply_path: None,
        }
    }
}

/// Per-stage retry budgets plus the pacing between attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetriesConfig {
    pub analysis: u32,
    pub proposal: u32,
    pub sizing: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetriesConfig {
    fn default() -> Self {
        Self {
            analysis: 2,
            proposal: 2,
            sizing: 2,
            initial_delay_ms: 500,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub simulation_secs: u64,
    pub query_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            simulation_secs: 300,
            query_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            temperature: None,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Explicit ngspice binary. Falls back to a PATH lookup.
    #[serde(default)]
    pub ngspice_bin: Option<String>,
    /// Output node written by the generated `wrdata` commands.
    pub signal: String,
    /// Peak-to-peak amplitude of the transient stimulus, for gain.
    pub input_pp_v: f64,
    /// Opaque analysis description handed to the simulator untouched.
    #[serde(default = "default_tool_chain")]
    pub tool_chain: serde_json::Value,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            ngspice_bin: None,
            signal: "out".into(),
            input_pp_v: 2e-6,
            tool_chain: default_tool_chain(),
        }
    }
}

fn default_tool_chain() -> serde_json::Value {
    serde_json::json!({
        "tool_calls": [
            {"name": "ac_simulation"},
            {"name": "tran_simulation"}
        ]
    })
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject target thresholds no measurement could ever meet.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(t) = self.targets.iter().find(|t| !t.threshold.is_finite()) {
            anyhow::bail!(
                "target '{}' has a non-finite threshold ({})",
                t.metric,
                t.threshold
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Comparison;

    #[test]
    fn test_defaults_reasonable() {
        let c = Config::default();
        assert_eq!(c.run.max_iterations, 10);
        assert_eq!(c.run.patience, 3);
        assert_eq!(c.run.max_consecutive_sim_failures, 25);
        assert_eq!(c.retries.analysis, 2);
        assert_eq!(c.timeouts.simulation_secs, 300);
        assert!(c.targets.is_empty());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.run.max_iterations, 10);
        assert_eq!(config.simulator.signal, "out");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[run]
max_iterations = 20
patience = 5
max_consecutive_sim_failures = 4
artifacts_dir = "/tmp/runs"

[retries]
analysis = 3
proposal = 1
sizing = 0
initial_delay_ms = 100
backoff_factor = 1.5
max_delay_ms = 2000

[timeouts]
simulation_secs = 60
query_secs = 30

[model]
base_url = "http://localhost:11434/v1"
model = "qwen2.5"
api_key_env = "LOCAL_KEY"
temperature = 0.2

[simulator]
ngspice_bin = "/opt/ngspice/bin/ngspice"
signal = "vout"
input_pp_v = 0.001

[simulator.tool_chain]
tool_calls = [{ name = "ac_simulation" }, { name = "ac_gain" }]

[[targets]]
metric = "ac_gain_db"
op = ">="
threshold = 60.0
unit = "dB"

[[targets]]
metric = "phase_margin_deg"
op = ">"
threshold = 45
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.run.max_iterations, 20);
        assert_eq!(config.run.artifacts_dir.as_deref(), Some("/tmp/runs"));
        assert_eq!(config.retries.sizing, 0);
        assert!((config.retries.backoff_factor - 1.5).abs() < 1e-9);
        assert_eq!(config.timeouts.query_secs, 30);
        assert_eq!(config.model.model, "qwen2.5");
        assert_eq!(config.model.temperature, Some(0.2));
        assert!(config.model.max_tokens.is_none());
        assert_eq!(config.simulator.signal, "vout");
        assert_eq!(
            config.simulator.tool_chain["tool_calls"][1]["name"],
            "ac_gain"
        );
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.targets[0].op, Comparison::Ge);
        assert_eq!(config.targets[1].unit, "");
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let toml_str = "[run]\nmax_iterations = 20\n[model]\nmodel = \"gpt-4o-mini\"\n[retries]\nsizing = 0\n";
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.run.max_iterations, 20);
        assert_eq!(config.run.patience, 3);
        assert_eq!(config.run.max_consecutive_sim_failures, 25);
        assert_eq!(config.model.model, "gpt-4o-mini");
        assert_eq!(config.model.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.retries.sizing, 0);
        assert_eq!(config.retries.analysis, 2);
        assert_eq!(config.retries.max_delay_ms, 10_000);
    }

    #[test]
    fn test_partial_simulator_section_keeps_tool_chain() {
        let config: Config = toml::from_str("[simulator]\nsignal = \"vout\"\n").unwrap();
        assert_eq!(config.simulator.signal, "vout");
        assert!((config.simulator.input_pp_v - 2e-6).abs() < 1e-12);
        assert_eq!(
            config.simulator.tool_chain["tool_calls"][0]["name"],
            "ac_simulation"
        );
    }

    #[test]
    fn test_load_rejects_non_finite_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[[targets]]\nmetric = \"gain\"\nop = \">=\"\nthreshold = nan\n",
        )
        .unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("non-finite"));
    }

    #[test]
    fn test_rejects_unknown_operator() {
        let toml_str = r#"
[[targets]]
metric = "gain"
op = "=="
threshold = 1.0
"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.run.patience, config.run.patience);
        assert_eq!(deserialized.simulator.tool_chain, config.simulator.tool_chain);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[run]\nmax_iterations = 4\npatience = 2\nmax_consecutive_sim_failures = 3\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.run.max_iterations, 4);
        assert_eq!(config.retries.proposal, 2);
    }
}
