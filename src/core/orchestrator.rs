// src/core/orchestrator.rs — Iteration controller
//
// Drives simulate → analyze → propose → size → apply once per iteration,
// owns stage retries and rollback, and asks the convergence evaluator after
// every iteration whether to go on.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::applier;
use super::convergence::ConvergenceEvaluator;
use super::prompts;
use super::retry::rate_limit_hint;
use super::types::*;
use super::validator;
use crate::analysis::MetricsExtractor;
use crate::infra::errors::{QueryFailure, ValidationFailure};
use crate::provider::{ChatRequest, Message, ModelProvider};
use crate::sim::SimulationGateway;
use crate::store::{ArtifactRole, ArtifactStore, NetlistTarget};

/// Cooperative cancellation flag, checked before each iteration starts.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why one model-query attempt did not produce a usable object.
#[derive(Debug, thiserror::Error)]
enum StageError {
    #[error(transparent)]
    Query(#[from] QueryFailure),
    #[error(transparent)]
    Invalid(#[from] ValidationFailure),
}

impl StageError {
    /// Unparseable replies are always worth another attempt; a query the
    /// provider rejected outright is not.
    fn is_retriable(&self) -> bool {
        match self {
            StageError::Query(q) => q.is_retriable(),
            StageError::Invalid(_) => true,
        }
    }

    fn into_failure(self, stage: Stage) -> IterationFailure {
        let reason = match self {
            StageError::Query(_) => FailureReason::QueryFailed,
            StageError::Invalid(_) => FailureReason::unparseable(stage),
        };
        IterationFailure {
            reason,
            stage: Some(stage),
            detail: self.to_string(),
        }
    }
}

/// Sequences the sizing pipeline for one run at a time. Holds no state
/// between runs, so one controller can serve several runs one after another.
pub struct IterationController {
    provider: Arc<dyn ModelProvider>,
    gateway: SimulationGateway,
    extractor: MetricsExtractor,
    store: Arc<dyn ArtifactStore>,
    evaluator: ConvergenceEvaluator,
    apply_target: Option<NetlistTarget>,
    config: RunConfig,
    cancel: CancelHandle,
    /// Optional callback for real-time progress events.
    on_progress: Option<Box<dyn Fn(ProgressEvent) + Send + Sync>>,
}

impl IterationController {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        gateway: SimulationGateway,
        extractor: MetricsExtractor,
        store: Arc<dyn ArtifactStore>,
        config: RunConfig,
    ) -> Self {
        Self {
            provider,
            gateway,
            extractor,
            store,
            evaluator: ConvergenceEvaluator::from(&config),
            apply_target: config.apply_path.as_ref().map(NetlistTarget::new),
            config,
            cancel: CancelHandle::new(),
            on_progress: None,
        }
    }

    /// Set a callback for real-time progress events.
    pub fn with_progress(mut self, cb: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    /// Share a cancellation flag with the caller (e.g. a Ctrl-C handler).
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    /// Run the loop from `initial_circuit` until the evaluator stops it or
    /// the run is cancelled. Never fails: every problem is recorded in the
    /// iteration history and the best-accepted circuit is always returned.
    pub async fn run(&self, initial_circuit: &str) -> Run {
        let mut run = Run::new(initial_circuit, self.config.targets.clone());
        tracing::info!(
            run = run.id(),
            targets = run.targets().len(),
            max_iterations = self.config.max_iterations,
            "Run started"
        );
        self.emit(ProgressEvent::RunStart {
            run_id: run.id().to_string(),
            max_iterations: self.config.max_iterations,
        });

        let status = loop {
            if self.cancel.is_cancelled() {
                tracing::info!(run = run.id(), "Run cancelled");
                break RunStatus::Cancelled;
            }
            if run.next_index() >= self.config.max_iterations {
                break RunStatus::Exhausted;
            }

            let index = run.next_index();
            self.emit(ProgressEvent::IterationStart {
                index,
                max_iterations: self.config.max_iterations,
            });

            let iteration = self.iterate(&mut run, index).await;
            self.emit(ProgressEvent::IterationEnd {
                index,
                decision: iteration.decision,
                failure: iteration.failure.as_ref().map(|f| f.reason),
            });

            if let Err(e) = self.store.seal(&run, &iteration) {
                tracing::warn!(run = run.id(), index, "Failed to persist iteration: {}", e);
            }
            run.append(iteration);

            if let Some(status) = self.evaluator.evaluate(&run).status() {
                break status;
            }
        };

        run.finish(status);
        if let Err(e) = self.store.finish(&run) {
            tracing::warn!(run = run.id(), "Failed to persist run summary: {}", e);
        }

        tracing::info!(
            run = run.id(),
            status = %status,
            iterations = run.iterations().len(),
            targets_met = run.targets_met(),
            "Run finished"
        );
        self.emit(ProgressEvent::Complete {
            status,
            iterations: run.iterations().len() as u32,
            targets_met: run.targets_met(),
        });
        run
    }

    /// One pass of the pipeline. The returned iteration is either sealed or
    /// errored; the run's best circuit only moves on acceptance.
    async fn iterate(&self, run: &mut Run, index: u32) -> Iteration {
        let started = Instant::now();
        let mut it = Iteration::new(index, run.best_circuit());

        if let Err(failure) = self.advance(run, &mut it).await {
            tracing::info!(
                index,
                reason = %failure.reason,
                "Iteration errored: {}",
                crate::util::truncate_str(&failure.detail, 200)
            );
            it.decision = IterationDecision::Errored;
            it.state = IterationState::Errored;
            it.failure = Some(failure);
        } else {
            tracing::info!(index, decision = %it.decision, "Iteration sealed");
        }

        it.duration_ms = started.elapsed().as_millis() as u64;
        it
    }

    async fn advance(&self, run: &mut Run, it: &mut Iteration) -> Result<(), IterationFailure> {
        // Pending → Simulated
        let input_dir = self
            .store
            .artifact_dir(run.id(), it.index, ArtifactRole::Input);
        let raw = self
            .gateway
            .run(&it.input_circuit, input_dir.as_deref())
            .await
            .map_err(|e| IterationFailure {
                reason: FailureReason::SimulationFailed,
                stage: None,
                detail: e.to_string(),
            })?;
        let metrics = self.extractor.extract(&raw);
        run.remeasure_best(metrics.clone());
        it.metrics = Some(metrics.clone());
        it.bias = self.extractor.bias(&raw);
        it.state = IterationState::Simulated;

        if run.targets_met() {
            it.decision = IterationDecision::NoChange;
            it.state = IterationState::Sealed;
            return Ok(());
        }

        // Simulated → Analyzed
        let prompt = prompts::analysis_prompt(&it.input_circuit, run.targets(), &metrics, &it.bias)
            .map_err(|e| render_failure(Stage::Analyze, e))?;
        let analysis = self
            .query_stage(it, Stage::Analyze, &prompt, validator::validate_analysis)
            .await?;
        it.state = IterationState::Analyzed;

        // Analyzed → Proposed
        let prompt = prompts::proposal_prompt(&it.input_circuit, run.targets(), &analysis)
            .map_err(|e| render_failure(Stage::Propose, e))?;
        it.analysis = Some(analysis);
        let changes = self
            .query_stage(it, Stage::Propose, &prompt, validator::validate_proposal)
            .await?;
        it.suggestions = changes;
        it.state = IterationState::Proposed;

        if it.suggestions.is_empty() {
            it.decision = IterationDecision::NoChange;
            it.state = IterationState::Sealed;
            return Ok(());
        }

        // Proposed → Sized
        let prompt = prompts::sizing_prompt(&it.input_circuit, &it.suggestions)
            .map_err(|e| render_failure(Stage::Size, e))?;
        let sizing = self
            .query_stage(it, Stage::Size, &prompt, validator::validate_sizing)
            .await?;
        it.sizing = Some(sizing.clone());
        it.state = IterationState::Sized;

        // Sized → Applied
        let candidate = applier::apply(&it.input_circuit, &it.suggestions, &sizing).map_err(|e| {
            IterationFailure {
                reason: FailureReason::ApplyFailed,
                stage: None,
                detail: e.to_string(),
            }
        })?;
        it.candidate_digest = Some(circuit_digest(&candidate));
        it.candidate_circuit = Some(candidate.clone());
        it.state = IterationState::Applied;

        // Outer Some: the candidate reached the apply path and may need undoing
        let written = self.write_candidate(&candidate);
        if let Some(ref backup) = written {
            it.applied_backup = backup.clone();
        }

        // Applied → Sealed
        let candidate_dir = self
            .store
            .artifact_dir(run.id(), it.index, ArtifactRole::Candidate);
        match self.gateway.run(&candidate, candidate_dir.as_deref()).await {
            Ok(raw) => {
                let metrics = self.extractor.extract(&raw);
                it.candidate_metrics = Some(metrics.clone());
                run.accept(candidate, metrics);
                it.decision = IterationDecision::Accepted;
            }
            Err(e) => {
                // Candidate discarded; the best circuit stays where it was
                it.failure = Some(IterationFailure {
                    reason: FailureReason::SimulationFailed,
                    stage: None,
                    detail: e.to_string(),
                });
                it.decision = IterationDecision::Rejected;
                if let Some(backup) = written {
                    self.revert_candidate(backup.as_deref());
                }
            }
        }
        it.state = IterationState::Sealed;
        Ok(())
    }

    /// Copy the candidate onto the apply path. Failures are logged and
    /// leave the run itself unaffected.
    fn write_candidate(&self, candidate: &str) -> Option<Option<PathBuf>> {
        let target = self.apply_target.as_ref()?;
        match target.replace(candidate) {
            Ok(backup) => Some(backup),
            Err(e) => {
                tracing::warn!(path = %target.path().display(), "Failed to apply candidate: {}", e);
                None
            }
        }
    }

    fn revert_candidate(&self, backup: Option<&Path>) {
        let Some(ref target) = self.apply_target else {
            return;
        };
        if let Err(e) = target.revert(backup) {
            tracing::warn!(path = %target.path().display(), "Failed to revert candidate: {}", e);
        }
    }

    /// Query the model for one stage, re-issuing the same prompt until the
    /// reply validates or the stage's retry budget is spent.
    async fn query_stage<T>(
        &self,
        it: &mut Iteration,
        stage: Stage,
        prompt: &str,
        parse: fn(&str) -> Result<T, ValidationFailure>,
    ) -> Result<T, IterationFailure> {
        let max_attempts = 1 + self.config.retries.for_stage(stage);
        let mut attempt = 1;

        loop {
            it.attempts.record(stage, attempt);
            let error = match self.query(prompt).await {
                Ok(text) => match parse(&text) {
                    Ok(parsed) => return Ok(parsed),
                    Err(e) => StageError::from(e),
                },
                Err(e) => StageError::from(e),
            };

            if attempt >= max_attempts || !error.is_retriable() {
                return Err(error.into_failure(stage));
            }

            let hint = match &error {
                StageError::Query(q) => rate_limit_hint(q),
                StageError::Invalid(_) => None,
            };
            let delay = self.config.retry_policy.delay_for_attempt(attempt - 1, hint);
            tracing::warn!(
                index = it.index,
                stage = %stage,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Stage attempt failed: {}",
                error
            );
            self.emit(ProgressEvent::StageRetry {
                index: it.index,
                stage,
                attempt: attempt + 1,
                reason: error.to_string(),
            });
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    /// One model call under the configured timeout.
    async fn query(&self, prompt: &str) -> Result<String, QueryFailure> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![Message::user(prompt)],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: Some(prompts::SYSTEM_PROMPT.to_string()),
        };

        match tokio::time::timeout(self.config.query_timeout, self.provider.chat(request)).await {
            Ok(Ok(response)) => {
                tracing::debug!(
                    provider = self.provider.id(),
                    tokens = response.usage.total(),
                    "Model replied"
                );
                Ok(response.content)
            }
            Ok(Err(e)) => Err(QueryFailure::from(e)),
            Err(_) => Err(QueryFailure::Timeout {
                secs: self.config.query_timeout.as_secs(),
            }),
        }
    }
}

fn render_failure(stage: Stage, e: minijinja::Error) -> IterationFailure {
    IterationFailure {
        reason: FailureReason::QueryFailed,
        stage: Some(stage),
        detail: format!("prompt rendering failed: {e}"),
    }
}
