// src/store/mod.rs — Append-only persistence of run and iteration records
//
// Layout under the runs root:
//   <run_id>/iteration_0000.json         one sealed record per iteration
//   <run_id>/iteration_0000/input/...    raw simulator artifacts
//   <run_id>/iteration_0000/candidate/...
//   <run_id>/metrics.csv                 one row per iteration
//   <run_id>/final_circuit.cir
//   <run_id>/run.json

pub mod apply;

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{
    FailureReason, Iteration, IterationDecision, Metrics, Run, RunStatus, Target,
};
use crate::infra::errors::SizerError;

pub use apply::NetlistTarget;

/// Which simulation of an iteration a raw artifact directory belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
    Input,
    Candidate,
}

impl ArtifactRole {
    fn dir_name(self) -> &'static str {
        match self {
            ArtifactRole::Input => "input",
            ArtifactRole::Candidate => "candidate",
        }
    }
}

/// Persistence seam used by the iteration controller. Every method is
/// best-effort from the caller's point of view: failures are logged there
/// and never change the in-memory run.
pub trait ArtifactStore: Send + Sync {
    /// Persist one sealed iteration. `run` is the state before the
    /// iteration is appended to its history.
    fn seal(&self, run: &Run, iteration: &Iteration) -> Result<(), SizerError>;

    /// Directory for raw simulator output, if this store keeps any.
    fn artifact_dir(&self, run_id: &str, index: u32, role: ArtifactRole) -> Option<PathBuf>;

    /// Write the final circuit and run summary once the run has stopped.
    fn finish(&self, run: &Run) -> Result<(), SizerError>;
}

/// Keeps nothing. For callers that only want the in-memory run.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl ArtifactStore for NullStore {
    fn seal(&self, _run: &Run, _iteration: &Iteration) -> Result<(), SizerError> {
        Ok(())
    }

    fn artifact_dir(&self, _run_id: &str, _index: u32, _role: ArtifactRole) -> Option<PathBuf> {
        None
    }

    fn finish(&self, _run: &Run) -> Result<(), SizerError> {
        Ok(())
    }
}

/// Filesystem store: one directory per run under `root`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    fn ensure_run_dir(&self, run_id: &str) -> Result<PathBuf, SizerError> {
        let dir = self.run_dir(run_id);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

fn record_name(index: u32) -> String {
    format!("iteration_{index:04}")
}

impl ArtifactStore for FsArtifactStore {
    fn seal(&self, run: &Run, iteration: &Iteration) -> Result<(), SizerError> {
        let dir = self.ensure_run_dir(run.id())?;
        let json = serde_json::to_string_pretty(iteration)?;
        write_new_atomic(&dir, &format!("{}.json", record_name(iteration.index)), &json)?;
        append_metrics_row(&dir.join("metrics.csv"), run.targets(), iteration)?;
        tracing::debug!(run = run.id(), index = iteration.index, "Iteration sealed to disk");
        Ok(())
    }

    fn artifact_dir(&self, run_id: &str, index: u32, role: ArtifactRole) -> Option<PathBuf> {
        Some(
            self.run_dir(run_id)
                .join(record_name(index))
                .join(role.dir_name()),
        )
    }

    fn finish(&self, run: &Run) -> Result<(), SizerError> {
        let dir = self.ensure_run_dir(run.id())?;
        write_atomic(&dir, "final_circuit.cir", run.best_circuit())?;
        let summary = RunSummary::from(run);
        write_atomic(&dir, "run.json", &serde_json::to_string_pretty(&summary)?)?;
        Ok(())
    }
}

/// Temp file + rename. Replaces an existing file.
fn write_atomic(dir: &Path, name: &str, contents: &str) -> Result<(), SizerError> {
    let tmp = dir.join(format!(".{name}.tmp"));
    let dst = dir.join(name);
    let mut f = std::fs::File::create(&tmp)?;
    f.write_all(contents.as_bytes())?;
    f.flush()?;
    f.sync_all()?;
    std::fs::rename(&tmp, &dst)?;
    Ok(())
}

/// Like `write_atomic`, but a record that already exists is never replaced.
/// The hard link fails with `AlreadyExists` instead of clobbering, even
/// against a concurrent writer.
fn write_new_atomic(dir: &Path, name: &str, contents: &str) -> Result<(), SizerError> {
    let tmp = dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));
    let dst = dir.join(name);
    let mut f = std::fs::File::create(&tmp)?;
    f.write_all(contents.as_bytes())?;
    f.flush()?;
    f.sync_all()?;
    drop(f);

    let linked = std::fs::hard_link(&tmp, &dst);
    let _ = std::fs::remove_file(&tmp);
    linked.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            SizerError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already sealed", dst.display()),
            ))
        } else {
            SizerError::Io(e)
        }
    })
}

// ─── metrics.csv ────────────────────────────────────────────────

/// Target metric names in first-seen order, without duplicates.
fn metric_columns(targets: &[Target]) -> Vec<&str> {
    let mut cols: Vec<&str> = Vec::new();
    for t in targets {
        if !cols.contains(&t.metric.as_str()) {
            cols.push(&t.metric);
        }
    }
    cols
}

fn csv_header(targets: &[Target]) -> String {
    let mut header = String::from("iteration,decision,failure");
    for m in metric_columns(targets) {
        header.push_str(&format!(",{m},{m}_candidate"));
    }
    header
}

fn cell(metrics: Option<&Metrics>, name: &str) -> String {
    metrics
        .and_then(|m| m.get(name))
        .map(|v| v.to_string())
        .unwrap_or_default()
}

fn csv_row(targets: &[Target], iteration: &Iteration) -> String {
    let failure = iteration
        .failure
        .as_ref()
        .map(|f| f.reason.to_string())
        .unwrap_or_default();
    let mut row = format!("{},{},{}", iteration.index, iteration.decision, failure);
    for m in metric_columns(targets) {
        row.push_str(&format!(
            ",{},{}",
            cell(iteration.metrics.as_ref(), m),
            cell(iteration.candidate_metrics.as_ref(), m)
        ));
    }
    row
}

fn append_metrics_row(
    path: &Path,
    targets: &[Target],
    iteration: &Iteration,
) -> Result<(), SizerError> {
    let is_new = !path.exists();
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    if is_new {
        writeln!(f, "{}", csv_header(targets))?;
    }
    writeln!(f, "{}", csv_row(targets, iteration))?;
    Ok(())
}

// ─── run.json ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub index: u32,
    pub decision: IterationDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub duration_ms: u64,
}

/// What `run.json` holds: outcome plus a compact history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub targets: Vec<Target>,
    pub targets_met: bool,
    pub best_circuit: String,
    pub best_metrics: Option<Metrics>,
    pub iterations: Vec<IterationSummary>,
}

impl From<&Run> for RunSummary {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.id().to_string(),
            status: run.status(),
            started_at: run.started_at(),
            targets: run.targets().to_vec(),
            targets_met: run.targets_met(),
            best_circuit: run.best_circuit().to_string(),
            best_metrics: run.best_metrics().cloned(),
            iterations: run
                .iterations()
                .iter()
                .map(|it| IterationSummary {
                    index: it.index,
                    decision: it.decision,
                    failure: it.failure.as_ref().map(|f| f.reason),
                    duration_ms: it.duration_ms,
                })
                .collect(),
        }
    }
}
