//! Resubmission controller.
//!
//! Drives a batch through rounds of submit, monitor and reconcile. Tasks
//! whose result artifact is missing after a round are resubmitted with more
//! cores per job under a fresh folder suffix and job name, until everything
//! succeeded or the round budget is spent.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use batchgrid_core::{
    Backend, DispatchConfig, DispatchReport, JobUnit, OriginalId, RoundSummary, SubmissionBatch,
    TaskPayload,
};
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::escalate::escalate;
use crate::fallback::LocalExecutor;
use crate::layout::JobFolder;
use crate::materialize::{LaunchSpec, materialize, prepare_folder};
use crate::monitor::CompletionMonitor;
use crate::names::resolve_job_name;
use crate::partition::{max_concurrent, partition};
use crate::reconcile::reconcile;
use crate::runner::{CommandRunner, SystemRunner};
use crate::scheduler::{SchedulerBackend, create_backend};

/// Job-name width used when no scheduler listing constrains it.
const LOCAL_NAME_WIDTH: usize = 10;

/// Per-call submission options. Unset fields fall back to the configuration.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub suffix: String,
    pub job_name: Option<String>,
    pub cores_per_job: u32,
    pub max_concurrent: Option<usize>,
    pub priority: i32,
    pub additional_flags: Option<String>,
    pub queue: Option<String>,
    pub pe: Option<String>,
    pub max_rounds: Option<u32>,
    /// Run on the local pool even when a scheduler is reachable.
    pub disable_cluster: bool,
    pub disable_mem_flag: bool,
    /// Keep going when every job of a fresh first round failed.
    pub allow_resubmit_all_fail: bool,
    pub send_notification: bool,
    pub remove_jobfolder: bool,
    /// Copy result artifacts here, named by original id.
    pub collect_dir: Option<PathBuf>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            suffix: String::new(),
            job_name: None,
            cores_per_job: 1,
            max_concurrent: None,
            priority: 0,
            additional_flags: None,
            queue: None,
            pe: None,
            max_rounds: None,
            disable_cluster: false,
            disable_mem_flag: false,
            allow_resubmit_all_fail: false,
            send_notification: false,
            remove_jobfolder: false,
            collect_dir: None,
        }
    }
}

/// Whether the first round may trip the total-failure guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Fresh,
    Resume,
}

/// Where the rounds of a dispatch run.
enum Route {
    Cluster(Arc<dyn SchedulerBackend>),
    Local,
}

impl Route {
    fn backend(&self) -> Backend {
        match self {
            Route::Cluster(b) => b.kind(),
            Route::Local => Backend::Local,
        }
    }

    fn name_width(&self) -> usize {
        match self {
            Route::Cluster(b) => b.name_width(),
            Route::Local => LOCAL_NAME_WIDTH,
        }
    }
}

/// Entry point for submitting, resuming and cancelling batches.
pub struct Dispatcher {
    config: DispatchConfig,
    backend: Option<Arc<dyn SchedulerBackend>>,
    runner: Arc<dyn CommandRunner>,
    local_cpus: Option<usize>,
}

impl Dispatcher {
    /// Dispatcher using the scheduler named in `config` and real processes.
    pub fn new(config: DispatchConfig) -> DispatchResult<Self> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        let backend = create_backend(&config, runner.clone());
        Self::with_backend(config, backend, runner)
    }

    /// Dispatcher with an explicit backend and command runner.
    pub fn with_backend(
        config: DispatchConfig,
        backend: Option<Arc<dyn SchedulerBackend>>,
        runner: Arc<dyn CommandRunner>,
    ) -> DispatchResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            runner,
            local_cpus: None,
        })
    }

    /// Size the local pool as if the machine had `cpus` cores.
    pub fn with_local_cpus(mut self, cpus: usize) -> Self {
        self.local_cpus = Some(cpus);
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Backend a dispatch would use right now.
    pub async fn probe(&self) -> Backend {
        self.select_route(false).await.backend()
    }

    /// Run every task to completion, resubmitting failures.
    ///
    /// `tasks[i]` gets original id `i`. On success the report maps every
    /// original id to its result artifact.
    pub async fn dispatch(
        &self,
        name: &str,
        tasks: Vec<TaskPayload>,
        options: &DispatchOptions,
    ) -> DispatchResult<DispatchReport> {
        let pending: Vec<(OriginalId, TaskPayload)> = tasks.into_iter().enumerate().collect();
        self.run(name, pending, options, Origin::Fresh, BTreeMap::new(), Vec::new())
            .await
    }

    /// Finish an earlier dispatch of the same `name` and suffix.
    ///
    /// Artifacts already present in the earlier job folder are kept; only the
    /// remaining tasks are submitted, under the suffix `<suffix>_resumed`.
    pub async fn resume(
        &self,
        name: &str,
        tasks: Vec<TaskPayload>,
        options: &DispatchOptions,
    ) -> DispatchResult<DispatchReport> {
        let previous = JobFolder::new(&self.config.work_root, name, &options.suffix);
        if !previous.exists() {
            return Err(DispatchError::ResumeFolderMissing(previous.root().to_path_buf()));
        }

        let n_tasks = tasks.len();
        let mut done = BTreeMap::new();
        for (job_id, path) in previous.result_files()? {
            if job_id < n_tasks {
                done.insert(job_id, path);
            } else {
                warn!(job_id, n_tasks, "ignoring result artifact without a matching task");
            }
        }

        let pending: Vec<(OriginalId, TaskPayload)> = tasks
            .into_iter()
            .enumerate()
            .filter(|(id, _)| !done.contains_key(id))
            .collect();
        info!(
            %name,
            folder = %previous.root().display(),
            done = done.len(),
            remaining = pending.len(),
            "resuming batch"
        );

        if pending.is_empty() {
            let backend = match &self.backend {
                Some(b) if !options.disable_cluster => b.kind(),
                _ => Backend::Local,
            };
            let report = DispatchReport {
                name: name.to_string(),
                backend,
                results: done,
                rounds: Vec::new(),
            };
            return self.finish(report, options, vec![previous]);
        }

        let options = DispatchOptions {
            suffix: format!("{}_resumed", options.suffix),
            ..options.clone()
        };
        self.run(name, pending, &options, Origin::Resume, done, vec![previous])
            .await
    }

    /// Cancel every scheduler job named `job_name`.
    pub async fn cancel(&self, job_name: &str) -> DispatchResult<()> {
        let backend = self.require_backend()?;
        info!(%job_name, backend = %backend.kind(), "cancelling jobs");
        backend.cancel_all(job_name).await
    }

    /// Jobs named `job_name` the scheduler still lists.
    pub async fn count_running(&self, job_name: &str) -> DispatchResult<usize> {
        self.require_backend()?.count_running(job_name).await
    }

    fn require_backend(&self) -> DispatchResult<&Arc<dyn SchedulerBackend>> {
        self.backend
            .as_ref()
            .ok_or_else(|| DispatchError::Config("no cluster scheduler configured".into()))
    }

    async fn select_route(&self, disable_cluster: bool) -> Route {
        if disable_cluster {
            info!("cluster submission disabled, using local pool");
            return Route::Local;
        }
        match &self.backend {
            None => {
                debug!("no scheduler configured, using local pool");
                Route::Local
            }
            Some(backend) => {
                if backend.probe().await {
                    Route::Cluster(backend.clone())
                } else {
                    info!(
                        backend = %backend.kind(),
                        "scheduler status command failed, falling back to local pool"
                    );
                    Route::Local
                }
            }
        }
    }

    fn first_batch(&self, name: &str, options: &DispatchOptions, route: &Route, n_tasks: usize) -> SubmissionBatch {
        let scheduler = &self.config.scheduler;
        SubmissionBatch {
            name: name.to_string(),
            suffix: options.suffix.clone(),
            round: 1,
            max_rounds: options.max_rounds.unwrap_or(self.config.retry.max_rounds),
            job_name: resolve_job_name(options.job_name.as_deref(), route.name_width()),
            cores_per_job: options.cores_per_job,
            max_concurrent: max_concurrent(
                options.max_concurrent,
                self.config.resources.total_cores,
                options.cores_per_job,
                n_tasks,
            ),
            queue: options.queue.clone().or_else(|| scheduler.queue.clone()),
            pe: options.pe.clone().or_else(|| scheduler.pe.clone()),
            priority: options.priority,
            additional_flags: options
                .additional_flags
                .clone()
                .unwrap_or_else(|| scheduler.additional_flags.clone()),
            disable_mem_flag: options.disable_mem_flag,
        }
    }

    fn check_batch(&self, batch: &SubmissionBatch, route: &Route) -> DispatchResult<()> {
        if batch.name.is_empty() || batch.name.contains(std::path::MAIN_SEPARATOR) {
            return Err(DispatchError::Config(format!("invalid batch name {:?}", batch.name)));
        }
        if batch.job_name.trim().is_empty() {
            return Err(DispatchError::Config("job name must not be empty".into()));
        }
        if batch.max_rounds == 0 {
            return Err(DispatchError::Config("max_rounds must be at least 1".into()));
        }
        if batch.cores_per_job == 0 {
            return Err(DispatchError::Config("cores per job must be positive".into()));
        }
        let per_node = self.config.resources.cores_per_node;
        if batch.cores_per_job > per_node {
            return Err(DispatchError::Config(format!(
                "{} cores per job exceed the node limit of {per_node}",
                batch.cores_per_job
            )));
        }
        if let Route::Cluster(backend) = route {
            backend.validate(batch)?;
        }
        Ok(())
    }

    async fn run(
        &self,
        name: &str,
        mut pending: Vec<(OriginalId, TaskPayload)>,
        options: &DispatchOptions,
        origin: Origin,
        mut results: BTreeMap<OriginalId, PathBuf>,
        mut folders: Vec<JobFolder>,
    ) -> DispatchResult<DispatchReport> {
        if pending.is_empty() {
            return Err(DispatchError::Config("no tasks to dispatch".into()));
        }

        let route = self.select_route(options.disable_cluster).await;
        let mut batch = self.first_batch(name, options, &route, pending.len());
        self.check_batch(&batch, &route)?;

        let launch = LaunchSpec {
            interpreter: self.config.worker.interpreter.clone(),
            program: self.config.worker_program(name),
            working_dir: self.config.working_dir.clone(),
        };
        let memory_flags = match &route {
            Route::Cluster(backend) => backend.escalates_memory(),
            Route::Local => false,
        };
        let mut rounds = Vec::new();

        loop {
            let folder = JobFolder::for_batch(&self.config.work_root, &batch);
            let part = partition(
                &pending,
                &folder,
                batch.cores_per_job,
                options.max_concurrent,
                self.config.resources.total_cores,
            )?;
            batch.max_concurrent = part.max_concurrent;

            prepare_folder(&folder)?;
            for unit in &part.units {
                materialize(unit, &launch)?;
            }
            folders.push(folder.clone());

            info!(
                %name,
                round = batch.round,
                max_rounds = batch.max_rounds,
                tasks = part.units.len(),
                cores_per_job = batch.cores_per_job,
                max_concurrent = batch.max_concurrent,
                job_name = %batch.job_name,
                backend = %route.backend(),
                "starting round"
            );

            match &route {
                Route::Cluster(backend) => {
                    self.run_on_cluster(backend.as_ref(), &part.units, &batch, &folder, options)
                        .await?
                }
                Route::Local => self.run_locally(name, &part.units, &batch).await?,
            }

            let outcome = reconcile(&folder, &part.units)?;
            rounds.push(RoundSummary {
                round: batch.round,
                suffix: batch.suffix.clone(),
                job_name: batch.job_name.clone(),
                cores_per_job: batch.cores_per_job,
                submitted: part.units.len(),
                missing: outcome.missing.len(),
            });

            if batch.round == 1
                && origin == Origin::Fresh
                && outcome.succeeded.is_empty()
                && !options.allow_resubmit_all_fail
            {
                error!(
                    %name,
                    folder = %folder.root().display(),
                    "every job of the first round failed, check the err/ logs"
                );
                return Err(DispatchError::AllJobsFailed {
                    name: name.to_string(),
                });
            }

            results.extend(outcome.succeeded.clone());
            if outcome.is_complete() {
                break;
            }
            if batch.is_last_round() {
                error!(
                    %name,
                    rounds = batch.round,
                    missing = ?outcome.missing,
                    "tasks still missing after the last round"
                );
                return Err(DispatchError::MissingTasks {
                    name: name.to_string(),
                    rounds: batch.round,
                    missing: outcome.missing,
                });
            }

            warn!(
                %name,
                round = batch.round,
                missing = outcome.missing.len(),
                "resubmitting missing tasks with more cores"
            );
            let missing: HashSet<OriginalId> = outcome.missing.into_iter().collect();
            pending.retain(|(id, _)| missing.contains(id));
            let job_name = resolve_job_name(None, route.name_width());
            batch = escalate(&batch, self.config.resources.cores_per_node, memory_flags, job_name);
        }

        info!(%name, tasks = results.len(), rounds = rounds.len(), "batch complete");
        let report = DispatchReport {
            name: name.to_string(),
            backend: route.backend(),
            results,
            rounds,
        };
        self.finish(report, options, folders)
    }

    async fn run_on_cluster(
        &self,
        backend: &dyn SchedulerBackend,
        units: &[JobUnit],
        batch: &SubmissionBatch,
        folder: &JobFolder,
        options: &DispatchOptions,
    ) -> DispatchResult<()> {
        let delay = self.config.submit_delay()?;
        for (i, unit) in units.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            backend.submit(unit, batch).await;
        }
        debug!(job_name = %batch.job_name, submitted = units.len(), "round submitted");

        let monitor = CompletionMonitor::new(self.config.poll_interval()?, self.config.monitor_timeout()?);
        monitor.wait(backend, &batch.job_name, folder, units.len()).await;

        if options.send_notification {
            if let Err(e) = backend.notify_completion(batch, folder).await {
                warn!(job_name = %batch.job_name, error = %e, "could not submit completion notification");
            }
        }
        Ok(())
    }

    async fn run_locally(&self, name: &str, units: &[JobUnit], batch: &SubmissionBatch) -> DispatchResult<()> {
        let mut executor = LocalExecutor::new(self.runner.clone());
        if let Some(cpus) = self.local_cpus {
            executor = executor.with_cpu_count(cpus);
        }
        executor.run(name, units, batch.cores_per_job).await?;
        Ok(())
    }

    /// Copy results to the collect directory and remove job folders.
    fn finish(
        &self,
        mut report: DispatchReport,
        options: &DispatchOptions,
        folders: Vec<JobFolder>,
    ) -> DispatchResult<DispatchReport> {
        if let Some(dir) = &options.collect_dir {
            std::fs::create_dir_all(dir).map_err(|e| DispatchError::materialize(dir, e))?;
            for (id, path) in report.results.iter_mut() {
                let target = dir.join(format!("result_{id}.pkl"));
                std::fs::copy(&*path, &target).map_err(|e| DispatchError::materialize(&target, e))?;
                *path = target;
            }
            info!(dir = %dir.display(), collected = report.results.len(), "results collected");
        }

        if options.remove_jobfolder {
            if options.collect_dir.is_none() {
                warn!(name = %report.name, "removing job folders without collecting results");
            }
            for folder in &folders {
                if folder.exists() {
                    std::fs::remove_dir_all(folder.root())?;
                    debug!(path = %folder.root().display(), "job folder removed");
                }
            }
        }
        Ok(report)
    }
}
