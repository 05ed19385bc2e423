//! On-disk layout of a job folder.
//!
//! ```text
//! <work_root>/<name>_folder<suffix>/
//!   storage/job_<id>.pkl   serialized task payload
//!   sh/job_<id>.sh         launcher script
//!   log/job_<id>.log       captured stdout
//!   err/job_<id>.log       captured stderr
//!   out/job_<id>.pkl       result artifact, written by the worker on success
//! ```

use std::path::{Path, PathBuf};

use batchgrid_core::{JobId, SubmissionBatch};

const SUBDIRS: [&str; 5] = ["storage", "sh", "log", "err", "out"];

/// Paths of one round's job folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFolder {
    root: PathBuf,
}

impl JobFolder {
    pub fn new(work_root: &Path, name: &str, suffix: &str) -> Self {
        Self {
            root: work_root.join(format!("{name}_folder{suffix}")),
        }
    }

    /// Folder of the round described by `batch`.
    pub fn for_batch(work_root: &Path, batch: &SubmissionBatch) -> Self {
        Self {
            root: work_root.join(batch.folder_name()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    pub fn subdirs(&self) -> impl Iterator<Item = PathBuf> + '_ {
        SUBDIRS.iter().map(|d| self.root.join(d))
    }

    pub fn sh_dir(&self) -> PathBuf {
        self.root.join("sh")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    pub fn err_dir(&self) -> PathBuf {
        self.root.join("err")
    }

    pub fn out_dir(&self) -> PathBuf {
        self.root.join("out")
    }

    pub fn storage_path(&self, job_id: JobId) -> PathBuf {
        self.root.join("storage").join(format!("job_{job_id}.pkl"))
    }

    pub fn launcher_path(&self, job_id: JobId) -> PathBuf {
        self.sh_dir().join(format!("job_{job_id}.sh"))
    }

    pub fn result_path(&self, job_id: JobId) -> PathBuf {
        self.out_dir().join(format!("job_{job_id}.pkl"))
    }

    pub fn log_path(&self, job_id: JobId) -> PathBuf {
        self.log_dir().join(format!("job_{job_id}.log"))
    }

    pub fn err_path(&self, job_id: JobId) -> PathBuf {
        self.err_dir().join(format!("job_{job_id}.log"))
    }

    /// Result artifacts currently present in `out/`, sorted by job id.
    ///
    /// Files that do not follow the `job_<id>.pkl` pattern are ignored.
    pub fn result_files(&self) -> std::io::Result<Vec<(JobId, PathBuf)>> {
        let out = self.out_dir();
        if !out.is_dir() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&out)? {
            let path = entry?.path();
            if let Some(id) = job_id_from_result(&path) {
                found.push((id, path));
            }
        }
        found.sort_by_key(|(id, _)| *id);
        Ok(found)
    }

    /// Number of result artifacts, zero if `out/` cannot be read.
    pub fn count_results(&self) -> usize {
        self.result_files().map(|f| f.len()).unwrap_or(0)
    }
}

/// Recover the job id embedded in a result filename.
pub fn job_id_from_result(path: &Path) -> Option<JobId> {
    path.file_name()?
        .to_str()?
        .strip_prefix("job_")?
        .strip_suffix(".pkl")?
        .parse()
        .ok()
}
