// src/cli/run.rs — `ampsizer run`: size a circuit through the iteration loop

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

use super::RunArgs;
use crate::analysis::MetricsExtractor;
use crate::core::orchestrator::{CancelHandle, IterationController};
use crate::core::retry::RetryPolicy;
use crate::core::types::{Run, RunConfig, Target};
use crate::infra::config::Config;
use crate::infra::paths;
use crate::provider::openai_compat::OpenAICompatProvider;
use crate::provider::scripted::ScriptedProvider;
use crate::provider::ModelProvider;
use crate::sim::netlist;
use crate::sim::ngspice::NgspiceSimulator;
use crate::sim::{SimulationGateway, ToolChainSpec};
use crate::store::FsArtifactStore;

/// Engine config from the file, with command-line overrides applied.
pub fn resolve_run_config(args: &RunArgs, config: &Config) -> anyhow::Result<RunConfig> {
    let mut run_config = RunConfig::from(config);

    if !args.targets.is_empty() {
        run_config.targets = args
            .targets
            .iter()
            .map(|t| t.parse::<Target>())
            .collect::<Result<_, _>>()?;
    }
    if let Some(max) = args.max_iterations {
        run_config.max_iterations = max;
    }
    if let Some(patience) = args.patience {
        run_config.patience = patience;
    }
    if let Some(ref model) = args.model {
        run_config.model = model.clone();
    }
    if let Some(ref path) = args.apply_path {
        run_config.apply_path = Some(path.clone());
    }
    if args.script.is_some() {
        // Scripted replies arrive instantly; waiting between them is pointless
        run_config.retry_policy = RetryPolicy::immediate();
    }
    Ok(run_config)
}

/// Where this invocation keeps its runs: flag, then config, then data dir.
pub fn resolve_runs_dir(args: &RunArgs, config: &Config) -> PathBuf {
    args.runs_dir
        .clone()
        .or_else(|| config.run.artifacts_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(paths::runs_dir)
}

fn build_provider(args: &RunArgs, config: &Config) -> anyhow::Result<Arc<dyn ModelProvider>> {
    match args.script {
        Some(ref path) => {
            let script = std::fs::read_to_string(path)
                .with_context(|| format!("reading script {}", path.display()))?;
            Ok(Arc::new(ScriptedProvider::from_json_str(&script)?))
        }
        None => Ok(Arc::new(OpenAICompatProvider::from_config(&config.model)?)),
    }
}

/// Read a netlist and reject text the simulator could not possibly accept.
pub fn read_netlist(path: &Path) -> anyhow::Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading netlist {}", path.display()))?;
    netlist::check_syntax(&text)
        .map_err(|e| anyhow::anyhow!("{} is not a usable netlist: {}", path.display(), e))?;
    Ok(text)
}

pub async fn run_sizing(args: &RunArgs, config: &Config, quiet: bool) -> anyhow::Result<()> {
    let circuit = read_netlist(&args.netlist)?;
    let run_config = resolve_run_config(args, config)?;
    if run_config.targets.is_empty() {
        tracing::warn!("No targets configured; the run will stop after the first simulation");
    }

    let provider = build_provider(args, config)?;
    let simulator = NgspiceSimulator::locate(
        config.simulator.ngspice_bin.as_deref(),
        &config.simulator.signal,
    )?;
    let gateway = SimulationGateway::new(
        Arc::new(simulator),
        ToolChainSpec::new(config.simulator.tool_chain.clone()),
        run_config.simulation_timeout,
    );
    let extractor = MetricsExtractor::for_targets(&run_config.targets, config.simulator.input_pp_v);
    let store = FsArtifactStore::new(resolve_runs_dir(args, config));
    let runs_root = store.root().to_path_buf();

    let cancel = CancelHandle::new();
    let mut controller = IterationController::new(
        provider,
        gateway,
        extractor,
        Arc::new(store),
        run_config,
    )
    .with_cancel(cancel.clone());
    if !quiet {
        controller = controller.with_progress(super::progress::terminal_progress());
    }

    // Ctrl-C lets the in-flight iteration finish, then stops the run
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("[cancel] finishing current iteration...");
            cancel.cancel();
        }
    });

    let run = controller.run(&circuit).await;
    report(&run, &runs_root.join(run.id()), quiet);
    Ok(())
}

fn report(run: &Run, run_dir: &Path, quiet: bool) {
    if !quiet {
        if let Some(metrics) = run.best_metrics() {
            for t in run.targets() {
                let value = metrics
                    .get(&t.metric)
                    .map(|v| format!("{v:.4}"))
                    .unwrap_or_else(|| "unmeasured".into());
                let mark = if t.is_satisfied(metrics) { "ok" } else { "--" };
                eprintln!("  [{mark}] {t}: {value}");
            }
        }
        eprintln!("  artifacts: {}", run_dir.display());
    }
    print!("{}", run.best_circuit());
}
