//! Grid engine adapter (`qsub` / `qstat` / `qdel`).

use std::ops::RangeInclusive;
use std::sync::Arc;

use batchgrid_core::{Backend, JobUnit, SubmissionBatch};
use tracing::{debug, info, warn};

use super::{BackendFuture, SchedulerBackend, count_matching_lines, run_checked};
use crate::error::{DispatchError, DispatchResult};
use crate::flags::split_flags;
use crate::names::truncated;
use crate::runner::CommandRunner;

pub struct GridEngine {
    user: String,
    runner: Arc<dyn CommandRunner>,
}

impl GridEngine {
    /// `qstat` shows the first ten characters of a job name.
    pub const NAME_WIDTH: usize = 10;
    pub const PRIORITY_RANGE: RangeInclusive<i32> = -1024..=1023;

    pub fn new(user: String, runner: Arc<dyn CommandRunner>) -> Self {
        Self { user, runner }
    }

    /// Arguments of the `qsub` call for `unit`.
    ///
    /// A parallel environment takes precedence over a named queue.
    pub fn submit_args(&self, unit: &JobUnit, batch: &SubmissionBatch) -> DispatchResult<Vec<String>> {
        let mut args = match (&batch.pe, &batch.queue) {
            (Some(pe), _) => vec!["-pe".to_string(), pe.clone(), batch.cores_per_job.to_string()],
            (None, Some(queue)) => vec!["-q".to_string(), queue.clone()],
            (None, None) => {
                return Err(DispatchError::Config(
                    "grid engine needs a queue or a parallel environment".into(),
                ));
            }
        };
        args.extend([
            "-o".to_string(),
            unit.log_path.display().to_string(),
            "-e".to_string(),
            unit.err_path.display().to_string(),
            "-N".to_string(),
            batch.job_name.clone(),
            "-p".to_string(),
            batch.priority.to_string(),
        ]);
        args.extend(split_flags(&batch.additional_flags));
        args.push(unit.launcher_path.display().to_string());
        Ok(args)
    }

    fn status_args(&self) -> Vec<String> {
        vec!["-u".to_string(), self.user.clone()]
    }

    /// Scheduler job ids of listing lines that match `job_name`.
    pub fn job_ids(listing: &str, job_name: &str) -> Vec<String> {
        let key = truncated(job_name, Self::NAME_WIDTH);
        if key.is_empty() {
            return Vec::new();
        }
        listing
            .lines()
            .filter(|line| line.contains(key))
            .filter_map(|line| {
                line.split_whitespace()
                    .find(|tok| tok.chars().all(|c| c.is_ascii_digit()))
                    .map(str::to_string)
            })
            .collect()
    }
}

impl SchedulerBackend for GridEngine {
    fn kind(&self) -> Backend {
        Backend::GridEngine
    }

    fn name_width(&self) -> usize {
        Self::NAME_WIDTH
    }

    fn validate(&self, batch: &SubmissionBatch) -> DispatchResult<()> {
        if batch.pe.is_none() && batch.queue.is_none() {
            return Err(DispatchError::Config(
                "grid engine needs a queue or a parallel environment".into(),
            ));
        }
        if !Self::PRIORITY_RANGE.contains(&batch.priority) {
            return Err(DispatchError::Config(format!(
                "priority {} outside {:?}",
                batch.priority,
                Self::PRIORITY_RANGE
            )));
        }
        Ok(())
    }

    fn probe(&self) -> BackendFuture<'_, bool> {
        Box::pin(async move {
            matches!(self.runner.run("qstat", &[]).await, Ok(out) if out.success)
        })
    }

    fn submit<'a>(&'a self, unit: &'a JobUnit, batch: &'a SubmissionBatch) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let args = match self.submit_args(unit, batch) {
                Ok(args) => args,
                Err(e) => {
                    warn!(job_id = unit.job_id, error = %e, "qsub arguments rejected");
                    return;
                }
            };
            match self.runner.run("qsub", &args).await {
                Ok(out) if out.success => {
                    debug!(job_id = unit.job_id, original_id = unit.original_id, "submitted to grid engine");
                }
                Ok(out) => warn!(
                    job_id = unit.job_id,
                    original_id = unit.original_id,
                    stderr = %out.stderr.trim(),
                    "qsub rejected job"
                ),
                Err(e) => warn!(job_id = unit.job_id, error = %e, "failed to run qsub"),
            }
        })
    }

    fn count_running<'a>(&'a self, job_name: &'a str) -> BackendFuture<'a, DispatchResult<usize>> {
        Box::pin(async move {
            let listing = run_checked(self.runner.as_ref(), "qstat", &self.status_args()).await?;
            Ok(count_matching_lines(&listing, job_name, Self::NAME_WIDTH))
        })
    }

    fn cancel_all<'a>(&'a self, job_name: &'a str) -> BackendFuture<'a, DispatchResult<()>> {
        Box::pin(async move {
            let listing = run_checked(self.runner.as_ref(), "qstat", &self.status_args()).await?;
            let ids = Self::job_ids(&listing, job_name);
            if ids.is_empty() {
                info!(%job_name, "no grid engine jobs to cancel");
                return Ok(());
            }
            run_checked(self.runner.as_ref(), "qdel", &ids).await?;
            info!(%job_name, cancelled = ids.len(), "grid engine jobs cancelled");
            Ok(())
        })
    }
}
