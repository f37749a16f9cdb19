// src/cli/simulate.rs — `ampsizer simulate`: one simulation, metrics as JSON

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::analysis::MetricsExtractor;
use crate::infra::config::Config;
use crate::sim::ngspice::NgspiceSimulator;
use crate::sim::{SimulationGateway, ToolChainSpec};

pub async fn run_simulate(netlist: &Path, config: &Config) -> anyhow::Result<()> {
    let circuit = super::run::read_netlist(netlist)?;

    let simulator = NgspiceSimulator::locate(
        config.simulator.ngspice_bin.as_deref(),
        &config.simulator.signal,
    )?;
    let gateway = SimulationGateway::new(
        Arc::new(simulator),
        ToolChainSpec::new(config.simulator.tool_chain.clone()),
        Duration::from_secs(config.timeouts.simulation_secs),
    );
    let extractor = MetricsExtractor::for_targets(&config.targets, config.simulator.input_pp_v);

    let raw = gateway
        .run(&circuit, None)
        .await
        .map_err(|e| anyhow::anyhow!("simulation failed: {e}"))?;
    let metrics = extractor.extract(&raw);

    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}
