//! Slurm adapter (`sbatch` / `squeue` / `scancel`).

use std::sync::Arc;

use batchgrid_core::{Backend, DispatchConfig, JobUnit, SubmissionBatch};
use tracing::{debug, info, warn};

use super::{BackendFuture, SchedulerBackend, count_matching_lines, run_checked};
use crate::error::{DispatchError, DispatchResult};
use crate::flags::{has_memory_flag, has_time_flag, normalize_for_slurm, split_flags};
use crate::layout::JobFolder;
use crate::runner::CommandRunner;

pub struct Slurm {
    user: String,
    time_limit: String,
    cores_per_node: u32,
    mem_per_node_mb: u64,
    runner: Arc<dyn CommandRunner>,
}

impl Slurm {
    /// `squeue` shows the first eight characters of a job name.
    pub const NAME_WIDTH: usize = 8;

    pub fn new(
        user: String,
        time_limit: String,
        cores_per_node: u32,
        mem_per_node_mb: u64,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            user,
            time_limit,
            cores_per_node,
            mem_per_node_mb,
            runner,
        }
    }

    pub fn from_config(config: &DispatchConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(
            config.resolved_user(),
            config.scheduler.time_limit.clone(),
            config.resources.cores_per_node,
            config.resources.mem_per_node_mb,
            runner,
        )
    }

    /// Memory share of a job using `cores` cores, in megabytes.
    pub fn memory_limit_mb(&self, cores: u32) -> u64 {
        self.mem_per_node_mb * u64::from(cores) / u64::from(self.cores_per_node.max(1))
    }

    /// Arguments of the `sbatch` call for `unit`.
    pub fn submit_args(&self, unit: &JobUnit, batch: &SubmissionBatch) -> Vec<String> {
        let (flags, _) = normalize_for_slurm(&batch.additional_flags);
        let mut args = split_flags(&flags);
        if batch.cores_per_job > 1 {
            args.push(format!("-n{}", batch.cores_per_job));
        }
        if !has_time_flag(&flags) {
            args.push(format!("--time={}", self.time_limit));
        }
        if !batch.disable_mem_flag && !has_memory_flag(&flags) {
            args.push(format!("--mem={}M", self.memory_limit_mb(batch.cores_per_job)));
        }
        args.push(format!("--output={}", unit.log_path.display()));
        args.push(format!("--error={}", unit.err_path.display()));
        args.push(format!("--job-name={}", batch.job_name));
        args.push(unit.launcher_path.display().to_string());
        args
    }

    /// Arguments of the empty singleton job that mails the user when the
    /// batch's jobs are done.
    pub fn notification_args(&self, batch: &SubmissionBatch, folder: &JobFolder) -> Vec<String> {
        vec![
            "--ntasks-per-node".to_string(),
            "1".to_string(),
            format!("--output={}", folder.log_dir().join("singleton.log").display()),
            format!("--error={}", folder.err_dir().join("singleton.log").display()),
            "--quiet".to_string(),
            format!("--job-name={}", batch.job_name),
            "--mail-type=END".to_string(),
            folder.sh_dir().join("singleton.sh").display().to_string(),
        ]
    }

    fn status_args(&self) -> Vec<String> {
        vec!["-u".to_string(), self.user.clone()]
    }
}

impl SchedulerBackend for Slurm {
    fn kind(&self) -> Backend {
        Backend::Slurm
    }

    fn name_width(&self) -> usize {
        Self::NAME_WIDTH
    }

    fn validate(&self, batch: &SubmissionBatch) -> DispatchResult<()> {
        if batch.priority != 0 {
            warn!(priority = batch.priority, "priorities are not supported with slurm, ignoring");
        }
        if normalize_for_slurm(&batch.additional_flags).1 {
            warn!("additional flags contain the grid engine flag -V, converting to --export=ALL");
        }
        if batch.cores_per_job > self.cores_per_node {
            return Err(DispatchError::Config(format!(
                "{} cores per job exceed the node limit of {}",
                batch.cores_per_job, self.cores_per_node
            )));
        }
        if !batch.disable_mem_flag && !has_memory_flag(&batch.additional_flags) {
            info!(
                mem_mb = self.memory_limit_mb(batch.cores_per_job),
                cores = batch.cores_per_job,
                cores_per_node = self.cores_per_node,
                "memory not set explicitly, requesting the cores' share of node memory"
            );
        }
        Ok(())
    }

    fn escalates_memory(&self) -> bool {
        true
    }

    fn probe(&self) -> BackendFuture<'_, bool> {
        Box::pin(async move {
            matches!(self.runner.run("squeue", &[]).await, Ok(out) if out.success)
        })
    }

    fn submit<'a>(&'a self, unit: &'a JobUnit, batch: &'a SubmissionBatch) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let args = self.submit_args(unit, batch);
            match self.runner.run("sbatch", &args).await {
                Ok(out) if out.success => {
                    debug!(job_id = unit.job_id, original_id = unit.original_id, "submitted to slurm");
                }
                Ok(out) => warn!(
                    job_id = unit.job_id,
                    original_id = unit.original_id,
                    stderr = %out.stderr.trim(),
                    "sbatch rejected job"
                ),
                Err(e) => warn!(job_id = unit.job_id, error = %e, "failed to run sbatch"),
            }
        })
    }

    fn count_running<'a>(&'a self, job_name: &'a str) -> BackendFuture<'a, DispatchResult<usize>> {
        Box::pin(async move {
            let listing = run_checked(self.runner.as_ref(), "squeue", &self.status_args()).await?;
            Ok(count_matching_lines(&listing, job_name, Self::NAME_WIDTH))
        })
    }

    fn cancel_all<'a>(&'a self, job_name: &'a str) -> BackendFuture<'a, DispatchResult<()>> {
        Box::pin(async move {
            let args = vec!["-n".to_string(), job_name.to_string()];
            run_checked(self.runner.as_ref(), "scancel", &args).await?;
            info!(%job_name, "slurm jobs cancelled");
            Ok(())
        })
    }

    fn notify_completion<'a>(
        &'a self,
        batch: &'a SubmissionBatch,
        folder: &'a JobFolder,
    ) -> BackendFuture<'a, DispatchResult<()>> {
        Box::pin(async move {
            let script = folder.sh_dir().join("singleton.sh");
            std::fs::write(&script, "#!/bin/bash -l\n")
                .map_err(|e| DispatchError::materialize(&script, e))?;
            run_checked(
                self.runner.as_ref(),
                "sbatch",
                &self.notification_args(batch, folder),
            )
            .await?;
            info!(job_name = %batch.job_name, "completion notification submitted");
            Ok(())
        })
    }
}
