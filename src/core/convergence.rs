// src/core/convergence.rs — Decide whether a run continues after each iteration

use super::types::{IterationDecision, Metrics, Run, RunConfig, RunStatus, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Converged,
    Stalled,
    Exhausted,
    Failed,
}

impl Verdict {
    /// Terminal run status for a stopping verdict.
    pub fn status(self) -> Option<RunStatus> {
        match self {
            Verdict::Continue => None,
            Verdict::Converged => Some(RunStatus::Converged),
            Verdict::Stalled => Some(RunStatus::Stalled),
            Verdict::Exhausted => Some(RunStatus::Exhausted),
            Verdict::Failed => Some(RunStatus::Failed),
        }
    }
}

/// Rules, in order: iteration cap, simulator-unavailable cap, all targets
/// met by the best-accepted metrics, no progress within the patience window.
///
/// Progress means an accepted candidate moved at least one target metric
/// strictly closer to its threshold than any measurement earlier in the run.
/// Iterations lost to simulation failure say nothing about the proposals and
/// are left out of the patience window; every other outcome without such an
/// improvement counts against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceEvaluator {
    pub max_iterations: u32,
    pub patience: u32,
    pub max_consecutive_sim_failures: u32,
}

impl From<&RunConfig> for ConvergenceEvaluator {
    fn from(cfg: &RunConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            patience: cfg.patience,
            max_consecutive_sim_failures: cfg.max_consecutive_sim_failures,
        }
    }
}

impl ConvergenceEvaluator {
    pub fn evaluate(&self, run: &Run) -> Verdict {
        let history = run.iterations();

        if history.len() as u32 >= self.max_iterations {
            return Verdict::Exhausted;
        }

        if self.max_consecutive_sim_failures > 0 {
            let failing_streak = history
                .iter()
                .rev()
                .take_while(|it| it.is_simulation_failure())
                .count() as u32;
            if failing_streak >= self.max_consecutive_sim_failures {
                return Verdict::Failed;
            }
        }

        if run.targets_met() {
            return Verdict::Converged;
        }

        if self.patience > 0 {
            let window: Vec<bool> = progress_flags(run)
                .into_iter()
                .zip(history)
                .rev()
                .filter(|(_, it)| !it.is_simulation_failure())
                .take(self.patience as usize)
                .map(|(progressed, _)| progressed)
                .collect();
            if window.len() as u32 == self.patience && window.iter().all(|p| !p) {
                return Verdict::Stalled;
            }
        }

        Verdict::Continue
    }
}

/// Whether each iteration beat the best per-target distance seen before it.
fn progress_flags(run: &Run) -> Vec<bool> {
    let targets = run.targets();
    let mut best = vec![f64::INFINITY; targets.len()];

    run.iterations()
        .iter()
        .map(|it| {
            if let Some(input) = &it.metrics {
                lower_best(&mut best, targets, input);
            }
            let progressed = it.improves_on(targets, &best);
            if it.decision == IterationDecision::Accepted {
                if let Some(candidate) = &it.candidate_metrics {
                    lower_best(&mut best, targets, candidate);
                }
            }
            progressed
        })
        .collect()
}

fn lower_best(best: &mut [f64], targets: &[Target], metrics: &Metrics) {
    for (b, t) in best.iter_mut().zip(targets) {
        *b = b.min(t.distance(metrics.get(&t.metric)));
    }
}
