//! Scheduler adapters.
//!
//! A [`SchedulerBackend`] hides the command syntax of one cluster batch
//! system behind submit / count / cancel. Two implementations exist:
//! [`GridEngine`] (`qsub`/`qstat`/`qdel`) and [`Slurm`]
//! (`sbatch`/`squeue`/`scancel`). Which one is used is decided by
//! `[scheduler] kind` in the configuration.

pub mod grid_engine;
pub mod slurm;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use batchgrid_core::{Backend, DispatchConfig, JobUnit, SchedulerKind, SubmissionBatch};
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};
use crate::layout::JobFolder;
use crate::names::truncated;
use crate::runner::CommandRunner;

pub use grid_engine::GridEngine;
pub use slurm::Slurm;

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Submit, status and cancel operations of an external batch scheduler.
pub trait SchedulerBackend: Send + Sync {
    fn kind(&self) -> Backend;

    /// Number of leading job-name characters the status listing shows.
    fn name_width(&self) -> usize;

    /// Reject batches this backend cannot express. Runs before anything is
    /// written to disk.
    fn validate(&self, batch: &SubmissionBatch) -> DispatchResult<()>;

    /// Whether escalation should rewrite memory requests in the flags.
    fn escalates_memory(&self) -> bool {
        false
    }

    /// Cheap status command; `false` means the scheduler is unusable.
    fn probe(&self) -> BackendFuture<'_, bool>;

    /// Hand one job to the scheduler without waiting for it.
    ///
    /// A rejected submission is logged; the job then simply produces no
    /// result artifact and is picked up by the next round.
    fn submit<'a>(&'a self, unit: &'a JobUnit, batch: &'a SubmissionBatch)
        -> BackendFuture<'a, ()>;

    /// Jobs of the current user whose name matches `job_name`.
    fn count_running<'a>(&'a self, job_name: &'a str) -> BackendFuture<'a, DispatchResult<usize>>;

    /// Cancel every job whose name matches `job_name`.
    fn cancel_all<'a>(&'a self, job_name: &'a str) -> BackendFuture<'a, DispatchResult<()>>;

    /// Ask the scheduler to notify the user once the batch has finished.
    fn notify_completion<'a>(
        &'a self,
        batch: &'a SubmissionBatch,
        _folder: &'a JobFolder,
    ) -> BackendFuture<'a, DispatchResult<()>> {
        Box::pin(async move {
            debug!(
                job_name = %batch.job_name,
                backend = %self.kind(),
                "completion notification not supported, skipping"
            );
            Ok(())
        })
    }
}

/// Build the backend selected in `config`, if any.
pub fn create_backend(
    config: &DispatchConfig,
    runner: Arc<dyn CommandRunner>,
) -> Option<Arc<dyn SchedulerBackend>> {
    match config.scheduler.kind {
        SchedulerKind::GridEngine => Some(Arc::new(GridEngine::new(config.resolved_user(), runner))),
        SchedulerKind::Slurm => Some(Arc::new(Slurm::from_config(config, runner))),
        SchedulerKind::None => None,
    }
}

/// Count listing lines that mention the first `width` characters of `job_name`.
pub fn count_matching_lines(listing: &str, job_name: &str, width: usize) -> usize {
    let key = truncated(job_name, width);
    if key.is_empty() {
        return 0;
    }
    listing.lines().filter(|line| line.contains(key)).count()
}

/// Run a status or cancel command and return its stdout.
pub(crate) async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
) -> DispatchResult<String> {
    let out = runner
        .run(program, args)
        .await
        .map_err(|e| DispatchError::Command(format!("{program}: {e}")))?;
    if !out.success {
        return Err(DispatchError::Command(format!(
            "{program} exited with {:?}: {}",
            out.code,
            out.stderr.trim()
        )));
    }
    Ok(out.stdout)
}
