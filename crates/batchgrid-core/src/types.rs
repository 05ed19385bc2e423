//! Domain types shared by the dispatcher and its callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Stable index of a task across every retry round.
pub type OriginalId = usize;

/// Position of a job within a single round.
pub type JobId = usize;

// ── Tasks ──────────────────────────────────────────────────────────

/// One unit of work as handed over by the caller.
///
/// The dispatcher never looks inside the values; they are written in order
/// to the job's storage file and read back by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskPayload(pub Vec<Value>);

impl TaskPayload {
    pub fn single(value: Value) -> Self {
        Self(vec![value])
    }

    /// Interpret a JSON value from a task list: arrays are a sequence of
    /// values, anything else is a task carrying that one value.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Array(values) => Self(values),
            other => Self::single(other),
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

/// A task bound to a job slot of the current round.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUnit {
    pub job_id: JobId,
    pub original_id: OriginalId,
    pub payload: TaskPayload,
    pub storage_path: PathBuf,
    pub launcher_path: PathBuf,
    pub result_path: PathBuf,
    pub log_path: PathBuf,
    pub err_path: PathBuf,
}

// ── Batches ────────────────────────────────────────────────────────

/// Submission parameters for one round.
///
/// A fresh batch is built per round; `name` stays fixed while `suffix`
/// grows a round tag so every round gets its own job folder.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionBatch {
    pub name: String,
    pub suffix: String,
    /// 1-based round counter.
    pub round: u32,
    pub max_rounds: u32,
    /// Name under which jobs show up in the scheduler listing.
    pub job_name: String,
    pub cores_per_job: u32,
    pub max_concurrent: usize,
    pub queue: Option<String>,
    pub pe: Option<String>,
    pub priority: i32,
    pub additional_flags: String,
    /// Skip the computed per-job memory request.
    pub disable_mem_flag: bool,
}

impl SubmissionBatch {
    /// Directory name of this round's job folder.
    pub fn folder_name(&self) -> String {
        format!("{}_folder{}", self.name, self.suffix)
    }

    pub fn is_last_round(&self) -> bool {
        self.round >= self.max_rounds
    }
}

// ── Results ────────────────────────────────────────────────────────

/// Where a batch was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    GridEngine,
    Slurm,
    Local,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::GridEngine => write!(f, "grid-engine"),
            Backend::Slurm => write!(f, "slurm"),
            Backend::Local => write!(f, "local"),
        }
    }
}

/// What happened in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    pub suffix: String,
    pub job_name: String,
    pub cores_per_job: u32,
    pub submitted: usize,
    pub missing: usize,
}

/// Final outcome of a dispatch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub name: String,
    pub backend: Backend,
    /// Result artifact of every task, keyed by original id.
    pub results: BTreeMap<OriginalId, PathBuf>,
    pub rounds: Vec<RoundSummary>,
}

impl DispatchReport {
    pub fn rounds_run(&self) -> usize {
        self.rounds.len()
    }

    pub fn result_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.results.values()
    }

    /// Cores per job of each round, in order.
    pub fn cores_history(&self) -> Vec<u32> {
        self.rounds.iter().map(|r| r.cores_per_job).collect()
    }
}
