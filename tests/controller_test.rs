// tests/controller_test.rs — Integration test: iteration controller with scripted model and fake simulator

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use ampsizer::analysis::MetricsExtractor;
use ampsizer::core::orchestrator::{CancelHandle, IterationController};
use ampsizer::core::retry::RetryPolicy;
use ampsizer::core::types::*;
use ampsizer::infra::errors::SimulationFailure;
use ampsizer::provider::scripted::{ScriptedProvider, ScriptedReply};
use ampsizer::sim::netlist::{parse_value, Netlist};
use ampsizer::sim::{MetricsRaw, SimulationGateway, Simulator, ToolChainSpec};
use ampsizer::store::{ArtifactStore, FsArtifactStore, NullStore};

// ─── Fakes ──────────────────────────────────────────────────────

/// Reports `gain = R1 / 100` (so 4k → 40 dB). Circuits mentioning FAIL,
/// or every circuit when `fail_all` is set, make the simulator exit non-zero.
struct GainSimulator {
    fail_all: bool,
    calls: AtomicUsize,
}

impl GainSimulator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_all: false,
            calls: AtomicUsize::new(0),
        })
    }

    fn broken() -> Arc<Self> {
        Arc::new(Self {
            fail_all: true,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Simulator for GainSimulator {
    fn name(&self) -> &str {
        "gain-fake"
    }

    async fn simulate(
        &self,
        circuit: &str,
        _tool_chain: &ToolChainSpec,
        _timeout: Duration,
    ) -> Result<MetricsRaw, SimulationFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all || circuit.contains("FAIL") {
            return Err(SimulationFailure::NonZeroExit {
                code: Some(1),
                diagnostic: "singular matrix".into(),
            });
        }
        let r1 = Netlist::parse(circuit)
            .element("R1")
            .and_then(|e| e.primary_value())
            .and_then(parse_value)
            .unwrap_or(0.0);
        Ok(MetricsRaw {
            artifacts: BTreeMap::new(),
            log: format!("gain = {}\n", r1 / 100.0),
        })
    }
}

// ─── Fixtures ───────────────────────────────────────────────────

const ANALYZE: &str = "Decide whether every target is met";
const PROPOSE: &str = "Choose the component changes";

fn circuit(r1: &str) -> String {
    format!("amp\nVDD vdd 0 1.8\nM1 out in 0 0 nmos W=1u L=180n\nR1 vdd out {r1}\n.end\n")
}

fn analysis_reply() -> String {
    r#"Gain is short of the target.
```json
{"pass": false,
 "reasons": [{"metric": "gain", "reason": "load resistance too small"}],
 "suggestions": [{"component": "R1", "action": "increase", "magnitude": "50%", "rationale": "raise gm*R"}]}
```"#
        .to_string()
}

fn proposal_reply() -> String {
    r#"```json
{"changes": [{"component": "R1", "action": "increase", "magnitude": "50%", "rationale": "raise gm*R"}]}
```"#
        .to_string()
}

fn sizing_reply(netlist_text: &str) -> String {
    format!(
        "```json\n{}\n```",
        serde_json::json!({ "netlist_text": netlist_text })
    )
}

fn targets() -> Vec<Target> {
    vec![Target::new("gain", Comparison::Ge, 60.0, "dB")]
}

fn config(max_iterations: u32, patience: u32) -> RunConfig {
    RunConfig {
        max_iterations,
        patience,
        targets: targets(),
        retry_policy: RetryPolicy::immediate(),
        ..Default::default()
    }
}

fn controller(
    provider: Arc<ScriptedProvider>,
    simulator: Arc<GainSimulator>,
    store: Arc<dyn ArtifactStore>,
    cfg: RunConfig,
) -> IterationController {
    let gateway = SimulationGateway::new(simulator, ToolChainSpec::default(), cfg.simulation_timeout);
    let extractor = MetricsExtractor::for_targets(&cfg.targets, 2e-6);
    IterationController::new(provider, gateway, extractor, store, cfg)
}

/// Replay the history and check that every iteration started from the
/// best-accepted circuit as of the end of the previous one.
fn assert_rollback_correct(run: &Run) {
    let mut best = run.initial_circuit().to_string();
    for it in run.iterations() {
        assert_eq!(it.input_circuit, best, "iteration {} input", it.index);
        if it.decision == IterationDecision::Accepted {
            best = it.candidate_circuit.clone().unwrap();
        }
    }
    assert_eq!(run.best_circuit(), best);
}

fn assert_gapless(run: &Run) {
    let indices: Vec<u32> = run.iterations().iter().map(|it| it.index).collect();
    let expected: Vec<u32> = (0..run.iterations().len() as u32).collect();
    assert_eq!(indices, expected);
}

// ─── Scenarios ──────────────────────────────────────────────────

#[tokio::test]
async fn test_simulator_always_failing_exhausts_with_original_circuit() {
    let provider = Arc::new(ScriptedProvider::new());
    let initial = circuit("4k");
    let c = controller(provider.clone(), GainSimulator::broken(), Arc::new(NullStore), config(4, 3));

    let run = c.run(&initial).await;

    assert_eq!(run.status(), RunStatus::Exhausted);
    assert_eq!(run.iterations().len(), 4);
    assert_eq!(run.best_circuit(), initial);
    for it in run.iterations() {
        assert_eq!(it.state, IterationState::Errored);
        assert_eq!(it.decision, IterationDecision::Errored);
        assert_eq!(
            it.failure.as_ref().map(|f| f.reason),
            Some(FailureReason::SimulationFailed)
        );
    }
    assert_eq!(provider.call_count(), 0);
    assert_gapless(&run);
}

#[tokio::test]
async fn test_valid_candidate_converges_on_first_iteration() {
    let provider = Arc::new(ScriptedProvider::new().with_sequence([
        analysis_reply(),
        proposal_reply(),
        sizing_reply(&circuit("6.5k")),
    ]));
    let sim = GainSimulator::new();
    let c = controller(provider.clone(), sim.clone(), Arc::new(NullStore), config(10, 3));

    let run = c.run(&circuit("4k")).await;

    assert_eq!(run.status(), RunStatus::Converged);
    assert_eq!(run.iterations().len(), 1);
    let it = &run.iterations()[0];
    assert_eq!(it.index, 0);
    assert_eq!(it.decision, IterationDecision::Accepted);
    assert_eq!(it.state, IterationState::Sealed);
    assert_eq!(it.metrics.as_ref().and_then(|m| m.get("gain")), Some(40.0));
    assert_eq!(it.candidate_metrics.as_ref().and_then(|m| m.get("gain")), Some(65.0));
    assert_eq!(it.candidate_digest.as_deref(), Some(circuit_digest(&circuit("6.5k")).as_str()));
    assert_eq!(it.attempts, StageAttempts { analyze: 1, propose: 1, size: 1 });
    assert_eq!(run.best_circuit(), circuit("6.5k"));
    assert!(run.targets_met());
    assert_eq!(provider.call_count(), 3);
    assert_eq!(sim.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_sizing_error_errors_iteration_and_keeps_best() {
    let refusal = "```json\n{\"error\": \"cannot size\", \"reason\": \"R1 is fixed\"}\n```";
    let provider = Arc::new(
        ScriptedProvider::new()
            .on_prompt(ANALYZE, analysis_reply())
            .on_prompt(PROPOSE, proposal_reply())
            .with_fallback(refusal),
    );
    let initial = circuit("4k");
    let c = controller(provider, GainSimulator::new(), Arc::new(NullStore), config(1, 3));

    let run = c.run(&initial).await;

    assert_eq!(run.status(), RunStatus::Exhausted);
    let it = &run.iterations()[0];
    assert_eq!(it.state, IterationState::Errored);
    assert_eq!(it.failure.as_ref().map(|f| f.reason), Some(FailureReason::ApplyFailed));
    assert!(it.failure.as_ref().unwrap().detail.contains("cannot size"));
    assert!(matches!(it.sizing, Some(SizingResponse::Error { .. })));
    assert_eq!(it.candidate_circuit, None);
    assert_eq!(run.best_circuit(), initial);
}

#[tokio::test]
async fn test_unparseable_analysis_retried_then_errored() {
    let provider = Arc::new(
        ScriptedProvider::new().with_fallback("I think you should make the transistor bigger."),
    );
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let c = controller(provider.clone(), GainSimulator::new(), Arc::new(NullStore), config(2, 5))
        .with_progress(move |e| sink.lock().unwrap().push(e));

    let run = c.run(&circuit("4k")).await;

    assert_eq!(run.status(), RunStatus::Exhausted);
    assert_eq!(run.iterations().len(), 2);
    for it in run.iterations() {
        let failure = it.failure.as_ref().unwrap();
        assert_eq!(failure.reason, FailureReason::AnalysisUnparseable);
        assert_eq!(failure.stage, Some(Stage::Analyze));
        assert_eq!(it.attempts.analyze, 3);
        assert_eq!(it.attempts.propose, 0);
    }
    // Same prompt re-issued on every retry
    let prompts = provider.prompts();
    assert_eq!(prompts.len(), 6);
    assert!(prompts[..3].iter().all(|p| p == &prompts[0]));

    let retries = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, ProgressEvent::StageRetry { stage: Stage::Analyze, .. }))
        .count();
    assert_eq!(retries, 4);
}

// ─── Invariants ─────────────────────────────────────────────────

#[tokio::test]
async fn test_rejected_candidate_rolls_back() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .on_call(2, sizing_reply(&circuit("5k")))
            .on_call(5, sizing_reply(&format!("{}* FAIL\n", circuit("5.5k"))))
            .on_call(8, sizing_reply(&circuit("6.2k")))
            .on_prompt(ANALYZE, analysis_reply())
            .on_prompt(PROPOSE, proposal_reply()),
    );
    let c = controller(provider, GainSimulator::new(), Arc::new(NullStore), config(10, 3));

    let run = c.run(&circuit("4k")).await;

    let decisions: Vec<IterationDecision> = run.iterations().iter().map(|it| it.decision).collect();
    assert_eq!(
        decisions,
        vec![
            IterationDecision::Accepted,
            IterationDecision::Rejected,
            IterationDecision::Accepted
        ]
    );
    let rejected = &run.iterations()[1];
    assert_eq!(rejected.state, IterationState::Sealed);
    assert_eq!(
        rejected.failure.as_ref().map(|f| f.reason),
        Some(FailureReason::SimulationFailed)
    );
    assert_eq!(run.iterations()[2].input_circuit, circuit("5k"));
    assert_eq!(run.status(), RunStatus::Converged);
    assert_eq!(run.best_circuit(), circuit("6.2k"));
    assert_rollback_correct(&run);
    assert_gapless(&run);
}

#[tokio::test]
async fn test_indices_gapless_across_mixed_failures() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .on_call(0, "no json here")
            .on_call(
                2,
                "```json\n{\"changes\": [{\"component\": \"R9\", \"action\": \"increase\", \"rationale\": \"x\"}]}\n```",
            )
            .on_call(3, sizing_reply("garbage"))
            .on_prompt(ANALYZE, analysis_reply())
            .on_prompt(PROPOSE, proposal_reply())
            .with_fallback(sizing_reply(&circuit("4.4k"))),
    );
    let mut cfg = config(4, 10);
    cfg.retries = StageRetries {
        analyze: 0,
        propose: 0,
        size: 0,
    };
    let c = controller(provider, GainSimulator::new(), Arc::new(NullStore), cfg);

    let run = c.run(&circuit("4k")).await;

    assert_eq!(run.status(), RunStatus::Exhausted);
    assert_gapless(&run);
    assert_rollback_correct(&run);
    let reasons: Vec<Option<FailureReason>> = run
        .iterations()
        .iter()
        .map(|it| it.failure.as_ref().map(|f| f.reason))
        .collect();
    // 0: analysis unparseable; 1: sizing text unusable and R9 does not exist
    assert_eq!(reasons[0], Some(FailureReason::AnalysisUnparseable));
    assert_eq!(reasons[1], Some(FailureReason::ApplyFailed));
    assert_eq!(run.iterations()[2].decision, IterationDecision::Accepted);
}

#[tokio::test]
async fn test_input_already_meeting_targets_converges_without_queries() {
    let provider = Arc::new(ScriptedProvider::new());
    let c = controller(provider.clone(), GainSimulator::new(), Arc::new(NullStore), config(10, 3));

    let run = c.run(&circuit("7k")).await;

    assert_eq!(run.status(), RunStatus::Converged);
    assert_eq!(run.iterations().len(), 1);
    assert_eq!(run.iterations()[0].decision, IterationDecision::NoChange);
    assert_eq!(provider.call_count(), 0);
}

#[tokio::test]
async fn test_empty_proposals_stall_after_patience() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .on_prompt(ANALYZE, analysis_reply())
            .on_prompt(PROPOSE, "```json\n{\"changes\": []}\n```"),
    );
    let c = controller(provider.clone(), GainSimulator::new(), Arc::new(NullStore), config(10, 2));

    let run = c.run(&circuit("4k")).await;

    assert_eq!(run.status(), RunStatus::Stalled);
    assert_eq!(run.iterations().len(), 2);
    assert!(run
        .iterations()
        .iter()
        .all(|it| it.decision == IterationDecision::NoChange));
    assert_eq!(provider.call_count(), 4);
}

#[tokio::test]
async fn test_query_timeout_is_query_failure() {
    let provider = Arc::new(ScriptedProvider::new().with_fallback(ScriptedReply::Delayed {
        delay_ms: 500,
        reply: analysis_reply(),
    }));
    let mut cfg = config(1, 3);
    cfg.query_timeout = Duration::from_millis(50);
    cfg.retries.analyze = 1;
    let c = controller(provider, GainSimulator::new(), Arc::new(NullStore), cfg);

    let run = c.run(&circuit("4k")).await;

    let it = &run.iterations()[0];
    assert_eq!(it.failure.as_ref().map(|f| f.reason), Some(FailureReason::QueryFailed));
    assert_eq!(it.attempts.analyze, 2);
}

#[tokio::test]
async fn test_rate_limited_query_recovers_on_retry() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .on_call(
                0,
                ScriptedReply::Failure {
                    error: "429".into(),
                    retry_after_ms: Some(10),
                },
            )
            .on_call(1, analysis_reply())
            .on_call(2, proposal_reply())
            .on_call(3, sizing_reply(&circuit("6.5k"))),
    );
    let c = controller(provider, GainSimulator::new(), Arc::new(NullStore), config(3, 3));

    let run = c.run(&circuit("4k")).await;

    assert_eq!(run.status(), RunStatus::Converged);
    assert_eq!(run.iterations()[0].attempts.analyze, 2);
}

#[tokio::test]
async fn test_rejected_query_is_not_retried() {
    // Unscripted calls are refused outright by the scripted provider
    let provider = Arc::new(ScriptedProvider::new());
    let c = controller(provider.clone(), GainSimulator::new(), Arc::new(NullStore), config(1, 3));

    let run = c.run(&circuit("4k")).await;

    let it = &run.iterations()[0];
    let failure = it.failure.as_ref().unwrap();
    assert_eq!(failure.reason, FailureReason::QueryFailed);
    assert!(failure.detail.contains("rejected"));
    assert_eq!(it.attempts.analyze, 1);
    assert_eq!(provider.call_count(), 1);
    assert_eq!(run.best_circuit(), circuit("4k"));
}

#[tokio::test]
async fn test_transient_provider_error_is_retried() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .on_call(
                0,
                ScriptedReply::Failure {
                    error: "HTTP 503".into(),
                    retry_after_ms: None,
                },
            )
            .on_prompt(ANALYZE, analysis_reply())
            .on_prompt(PROPOSE, proposal_reply())
            .with_fallback(sizing_reply(&circuit("6.5k"))),
    );
    let c = controller(provider, GainSimulator::new(), Arc::new(NullStore), config(3, 3));

    let run = c.run(&circuit("4k")).await;

    assert_eq!(run.status(), RunStatus::Converged);
    assert_eq!(run.iterations()[0].attempts.analyze, 2);
}

// ─── Cancellation ───────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_before_start_runs_nothing() {
    let cancel = CancelHandle::new();
    cancel.cancel();
    let c = controller(
        Arc::new(ScriptedProvider::new()),
        GainSimulator::new(),
        Arc::new(NullStore),
        config(10, 3),
    )
    .with_cancel(cancel);

    let run = c.run(&circuit("4k")).await;

    assert_eq!(run.status(), RunStatus::Cancelled);
    assert!(run.iterations().is_empty());
    assert_eq!(run.best_circuit(), circuit("4k"));
}

#[tokio::test]
async fn test_cancel_takes_effect_between_iterations() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .on_prompt(ANALYZE, analysis_reply())
            .on_prompt(PROPOSE, proposal_reply())
            .with_fallback(sizing_reply(&circuit("5k"))),
    );
    let cancel = CancelHandle::new();
    let trigger = cancel.clone();
    let c = controller(provider, GainSimulator::new(), Arc::new(NullStore), config(10, 3))
        .with_cancel(cancel)
        .with_progress(move |e| {
            if let ProgressEvent::IterationEnd { index: 0, .. } = e {
                trigger.cancel();
            }
        });

    let run = c.run(&circuit("4k")).await;

    assert_eq!(run.status(), RunStatus::Cancelled);
    assert_eq!(run.iterations().len(), 1);
    assert_eq!(run.iterations()[0].decision, IterationDecision::Accepted);
    assert_eq!(run.best_circuit(), circuit("5k"));
}

// ─── Persistence ────────────────────────────────────────────────

#[tokio::test]
async fn test_run_layout_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::new(dir.path());
    let provider = Arc::new(ScriptedProvider::new().with_sequence([
        analysis_reply(),
        proposal_reply(),
        sizing_reply(&circuit("6.5k")),
    ]));
    let c = controller(provider, GainSimulator::new(), Arc::new(store.clone()), config(10, 3));

    let run = c.run(&circuit("4k")).await;

    let run_dir = store.run_dir(run.id());
    assert!(run_dir.join("iteration_0000.json").is_file());
    assert_eq!(
        std::fs::read_to_string(run_dir.join("iteration_0000/input/circuit.cir")).unwrap(),
        circuit("4k")
    );
    assert_eq!(
        std::fs::read_to_string(run_dir.join("iteration_0000/candidate/circuit.cir")).unwrap(),
        circuit("6.5k")
    );
    assert!(run_dir.join("iteration_0000/candidate/simulator.log").is_file());
    assert_eq!(
        std::fs::read_to_string(run_dir.join("final_circuit.cir")).unwrap(),
        circuit("6.5k")
    );

    let csv = std::fs::read_to_string(run_dir.join("metrics.csv")).unwrap();
    assert_eq!(
        csv.lines().collect::<Vec<_>>(),
        vec!["iteration,decision,failure,gain,gain_candidate", "0,accepted,,40,65"]
    );

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(run_dir.join("run.json")).unwrap()).unwrap();
    assert_eq!(summary["status"], "converged");
    assert_eq!(summary["targets_met"], true);
}

#[tokio::test]
async fn test_store_failure_does_not_abort_run() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();
    let provider = Arc::new(ScriptedProvider::new().with_sequence([
        analysis_reply(),
        proposal_reply(),
        sizing_reply(&circuit("6.5k")),
    ]));
    let c = controller(
        provider,
        GainSimulator::new(),
        Arc::new(FsArtifactStore::new(&blocker)),
        config(10, 3),
    );

    let run = c.run(&circuit("4k")).await;

    assert_eq!(run.status(), RunStatus::Converged);
    assert_eq!(run.best_circuit(), circuit("6.5k"));
}

#[tokio::test]
async fn test_apply_path_follows_accepted_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let netlist = dir.path().join("amp.cir");
    std::fs::write(&netlist, circuit("4k")).unwrap();

    let provider = Arc::new(
        ScriptedProvider::new()
            .on_call(2, sizing_reply(&circuit("5k")))
            .on_call(5, sizing_reply(&format!("{}* FAIL\n", circuit("5.5k"))))
            .on_call(8, sizing_reply(&circuit("6.2k")))
            .on_prompt(ANALYZE, analysis_reply())
            .on_prompt(PROPOSE, proposal_reply()),
    );
    let cfg = RunConfig {
        apply_path: Some(netlist.clone()),
        ..config(10, 3)
    };
    let c = controller(provider, GainSimulator::new(), Arc::new(NullStore), cfg);

    let run = c.run(&circuit("4k")).await;

    assert_eq!(run.status(), RunStatus::Converged);
    assert_eq!(std::fs::read_to_string(&netlist).unwrap(), circuit("6.2k"));

    // Every write kept what it replaced; the rejected candidate was undone
    let backed_up: Vec<String> = run
        .iterations()
        .iter()
        .map(|it| std::fs::read_to_string(it.applied_backup.as_ref().unwrap()).unwrap())
        .collect();
    assert_eq!(backed_up, vec![circuit("4k"), circuit("5k"), circuit("5k")]);
}
