//! Task partitioner. Binds pending tasks to the job slots of a round.

use batchgrid_core::{JobUnit, OriginalId, TaskPayload};

use crate::error::{DispatchError, DispatchResult};
use crate::layout::JobFolder;

/// The job units of one round and the co-processing budget they run under.
#[derive(Debug, Clone)]
pub struct Partition {
    pub units: Vec<JobUnit>,
    pub max_concurrent: usize,
}

/// Number of jobs allowed to run side by side.
///
/// Defaults to `total_cores / cores_per_job`; the result is clamped to
/// `[1, n_tasks]`.
pub fn max_concurrent(
    requested: Option<usize>,
    total_cores: u32,
    cores_per_job: u32,
    n_tasks: usize,
) -> usize {
    let budget = requested.unwrap_or((total_cores / cores_per_job.max(1)) as usize);
    budget.clamp(1, n_tasks.max(1))
}

/// Assign `job_id = position` to every pending task.
///
/// Payloads are copied; the caller keeps its own task list for later rounds.
pub fn partition(
    tasks: &[(OriginalId, TaskPayload)],
    folder: &JobFolder,
    cores_per_job: u32,
    requested_concurrency: Option<usize>,
    total_cores: u32,
) -> DispatchResult<Partition> {
    if cores_per_job == 0 {
        return Err(DispatchError::Config("cores per job must be positive".into()));
    }
    if tasks.is_empty() {
        return Err(DispatchError::Config("no tasks to dispatch".into()));
    }

    let units = tasks
        .iter()
        .enumerate()
        .map(|(job_id, (original_id, payload))| JobUnit {
            job_id,
            original_id: *original_id,
            payload: payload.clone(),
            storage_path: folder.storage_path(job_id),
            launcher_path: folder.launcher_path(job_id),
            result_path: folder.result_path(job_id),
            log_path: folder.log_path(job_id),
            err_path: folder.err_path(job_id),
        })
        .collect();

    Ok(Partition {
        units,
        max_concurrent: max_concurrent(
            requested_concurrency,
            total_cores,
            cores_per_job,
            tasks.len(),
        ),
    })
}
