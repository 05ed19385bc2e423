//! Local fallback executor.
//!
//! Runs launchers as `sh <launcher>` on a bounded pool of child processes
//! when no cluster scheduler is reachable. Captured output is written to the
//! job's `log/` and `err/` files and scanned for diagnostics; the scan only
//! produces log lines; success is still decided by result artifacts alone.

use std::sync::Arc;

use batchgrid_core::JobUnit;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Level, debug, error, info, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::runner::{CommandOutput, CommandRunner};

/// What the output scan noticed in a job's captured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finding {
    Clean,
    Warning,
    Error,
}

/// Counters of one pool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackSummary {
    pub launched: usize,
    pub failed_to_start: usize,
    pub flagged: usize,
}

/// Worker pool size: `max(1, min(cpus / cores_per_job, cpus, n_jobs))`.
pub fn pool_size(cpu_count: usize, cores_per_job: u32, n_jobs: usize) -> usize {
    let per_job = (cores_per_job as usize).max(1);
    (cpu_count / per_job).min(cpu_count).min(n_jobs).max(1)
}

pub fn local_cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Classify captured output.
///
/// With `verbose`, "error" or "killed" anywhere is an error and "warning" a
/// warning. Regardless of verbosity, "error" on stderr is an error.
pub fn scan_output(stdout: &str, stderr: &str, verbose: bool) -> Finding {
    let out = stdout.to_lowercase();
    let err = stderr.to_lowercase();
    let mut finding = Finding::Clean;
    if verbose {
        if ["error", "killed"]
            .iter()
            .any(|needle| out.contains(needle) || err.contains(needle))
        {
            finding = Finding::Error;
        } else if out.contains("warning") || err.contains("warning") {
            finding = Finding::Warning;
        }
    }
    if err.contains("error") {
        finding = Finding::Error;
    }
    finding
}

pub struct LocalExecutor {
    runner: Arc<dyn CommandRunner>,
    cpu_count: usize,
}

impl LocalExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            cpu_count: local_cpu_count(),
        }
    }

    /// Override the detected cpu count.
    pub fn with_cpu_count(mut self, cpu_count: usize) -> Self {
        self.cpu_count = cpu_count.max(1);
        self
    }

    /// Run every unit's launcher and wait for the pool to drain.
    pub async fn run(&self, name: &str, units: &[JobUnit], cores_per_job: u32) -> DispatchResult<FallbackSummary> {
        let size = pool_size(self.cpu_count, cores_per_job, units.len());
        info!(
            %name,
            tasks = units.len(),
            workers = size,
            cores_per_job,
            "running batch on local fallback pool"
        );

        let permits = Arc::new(Semaphore::new(size));
        let mut pool = JoinSet::new();
        for unit in units {
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| DispatchError::Runtime(e.to_string()))?;
            let runner = self.runner.clone();
            let unit = unit.clone();
            pool.spawn(async move {
                let _permit = permit;
                let args = vec![unit.launcher_path.display().to_string()];
                let output = runner.run("sh", &args).await;
                (unit, output)
            });
        }

        let verbose = tracing::enabled!(Level::DEBUG);
        let mut summary = FallbackSummary::default();
        while let Some(joined) = pool.join_next().await {
            let (unit, output) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!(%name, error = %e, "local job task panicked");
                    summary.failed_to_start += 1;
                    continue;
                }
            };
            match output {
                Ok(output) => {
                    summary.launched += 1;
                    if report(name, &unit, &output, verbose) != Finding::Clean {
                        summary.flagged += 1;
                    }
                }
                Err(e) => {
                    summary.failed_to_start += 1;
                    error!(%name, job_id = unit.job_id, error = %e, "failed to start local job");
                }
            }
        }

        if summary.flagged > 0 {
            warn!(%name, flagged = summary.flagged, "local jobs reported problems in their output");
        }
        Ok(summary)
    }
}

/// Persist captured output next to the job and log anything suspicious.
fn report(name: &str, unit: &JobUnit, output: &CommandOutput, verbose: bool) -> Finding {
    for (path, text) in [(&unit.log_path, &output.stdout), (&unit.err_path, &output.stderr)] {
        if let Err(e) = std::fs::write(path, text) {
            warn!(path = %path.display(), error = %e, "could not store captured output");
        }
    }

    let finding = scan_output(&output.stdout, &output.stderr, verbose);
    match finding {
        Finding::Error => error!(
            %name,
            job_id = unit.job_id,
            original_id = unit.original_id,
            stdout = %output.stdout.trim(),
            stderr = %output.stderr.trim(),
            "local job reported an error"
        ),
        Finding::Warning => warn!(
            %name,
            job_id = unit.job_id,
            stdout = %output.stdout.trim(),
            stderr = %output.stderr.trim(),
            "local job reported a warning"
        ),
        Finding::Clean => debug!(%name, job_id = unit.job_id, success = output.success, "local job finished"),
    }
    finding
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::JobFolder;
    use crate::materialize::{LaunchSpec, materialize, prepare_folder};
    use crate::runner::SystemRunner;
    use batchgrid_core::TaskPayload;
    use serde_json::json;

    #[test]
    fn pool_size_bounds() {
        assert_eq!(pool_size(8, 1, 100), 8);
        assert_eq!(pool_size(8, 3, 100), 2);
        assert_eq!(pool_size(8, 1, 3), 3);
        assert_eq!(pool_size(8, 16, 100), 1);
        assert_eq!(pool_size(8, 0, 100), 8);
    }

    #[test]
    fn stderr_error_always_flagged() {
        assert_eq!(scan_output("", "Traceback...\nValueError: bad", false), Finding::Error);
    }

    #[test]
    fn stdout_only_flagged_when_verbose() {
        assert_eq!(scan_output("process Killed", "", false), Finding::Clean);
        assert_eq!(scan_output("process Killed", "", true), Finding::Error);
        assert_eq!(scan_output("WARNING: slow", "", true), Finding::Warning);
        assert_eq!(scan_output("all good", "", true), Finding::Clean);
    }

    fn units(folder: &JobFolder, n: usize) -> Vec<JobUnit> {
        (0..n)
            .map(|i| JobUnit {
                job_id: i,
                original_id: i,
                payload: TaskPayload::single(json!(i)),
                storage_path: folder.storage_path(i),
                launcher_path: folder.launcher_path(i),
                result_path: folder.result_path(i),
                log_path: folder.log_path(i),
                err_path: folder.err_path(i),
            })
            .collect()
    }

    #[tokio::test]
    async fn runs_launchers_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let worker = dir.path().join("worker.sh");
        std::fs::write(&worker, "echo running \"$1\"\necho \"error: job failed\" >&2\ncp \"$1\" \"$2\"\n").unwrap();

        let folder = JobFolder::new(dir.path(), "local", "");
        prepare_folder(&folder).unwrap();
        let launch = LaunchSpec {
            interpreter: "sh".into(),
            program: worker,
            working_dir: dir.path().to_path_buf(),
        };
        let units = units(&folder, 4);
        for u in &units {
            materialize(u, &launch).unwrap();
        }

        let exec = LocalExecutor::new(Arc::new(SystemRunner)).with_cpu_count(2);
        let summary = exec.run("local", &units, 1).await.unwrap();

        assert_eq!(summary.launched, 4);
        assert_eq!(summary.flagged, 4);
        assert_eq!(folder.count_results(), 4);
        let log = std::fs::read_to_string(folder.log_path(0)).unwrap();
        assert!(log.contains("running"));
        let err = std::fs::read_to_string(folder.err_path(3)).unwrap();
        assert!(err.contains("error: job failed"));
    }
}
