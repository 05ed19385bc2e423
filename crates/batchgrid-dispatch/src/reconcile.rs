//! Result reconciliation.
//!
//! Maps the artifacts in a round's `out/` directory back to original task
//! ids through the round's id table.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use batchgrid_core::{JobId, JobUnit, OriginalId};
use tracing::{debug, warn};

use crate::error::DispatchResult;
use crate::layout::JobFolder;

/// Succeeded and missing tasks of one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundOutcome {
    pub succeeded: BTreeMap<OriginalId, PathBuf>,
    /// Ascending.
    pub missing: Vec<OriginalId>,
}

impl RoundOutcome {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Compare `units` against the result artifacts present in `folder`.
pub fn reconcile(folder: &JobFolder, units: &[JobUnit]) -> DispatchResult<RoundOutcome> {
    let table: HashMap<JobId, OriginalId> = units.iter().map(|u| (u.job_id, u.original_id)).collect();

    let mut succeeded = BTreeMap::new();
    for (job_id, path) in folder.result_files()? {
        match table.get(&job_id) {
            Some(&original_id) => {
                succeeded.insert(original_id, path);
            }
            None => warn!(
                job_id,
                path = %path.display(),
                "result artifact does not belong to any job of this round"
            ),
        }
    }

    let mut missing: Vec<OriginalId> = units
        .iter()
        .map(|u| u.original_id)
        .filter(|id| !succeeded.contains_key(id))
        .collect();
    missing.sort_unstable();

    debug!(
        folder = %folder.root().display(),
        succeeded = succeeded.len(),
        missing = missing.len(),
        "round reconciled"
    );
    Ok(RoundOutcome { succeeded, missing })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::partition;
    use batchgrid_core::TaskPayload;
    use serde_json::json;

    fn units(folder: &JobFolder, ids: &[OriginalId]) -> Vec<JobUnit> {
        let tasks: Vec<_> = ids.iter().map(|&i| (i, TaskPayload::single(json!(i)))).collect();
        partition(&tasks, folder, 1, None, 20).unwrap().units
    }

    #[test]
    fn maps_job_ids_back_to_original_ids() {
        let dir = tempfile::tempdir().unwrap();
        let folder = JobFolder::new(dir.path(), "r", "_iter1");
        std::fs::create_dir_all(folder.out_dir()).unwrap();
        let units = units(&folder, &[7, 42, 99]);
        std::fs::write(folder.result_path(0), b"r").unwrap();
        std::fs::write(folder.result_path(2), b"r").unwrap();

        let outcome = reconcile(&folder, &units).unwrap();
        assert_eq!(outcome.succeeded.keys().copied().collect::<Vec<_>>(), vec![7, 99]);
        assert_eq!(outcome.succeeded[&99], folder.result_path(2));
        assert_eq!(outcome.missing, vec![42]);
        assert!(!outcome.is_complete());
    }

    #[test]
    fn foreign_job_ids_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let folder = JobFolder::new(dir.path(), "r", "");
        std::fs::create_dir_all(folder.out_dir()).unwrap();
        let units = units(&folder, &[0]);
        std::fs::write(folder.result_path(0), b"r").unwrap();
        std::fs::write(folder.result_path(5), b"r").unwrap();

        let outcome = reconcile(&folder, &units).unwrap();
        assert_eq!(outcome.succeeded.len(), 1);
        assert!(outcome.is_complete());
    }

    #[test]
    fn empty_out_dir_means_everything_missing() {
        let dir = tempfile::tempdir().unwrap();
        let folder = JobFolder::new(dir.path(), "r", "");
        std::fs::create_dir_all(folder.out_dir()).unwrap();
        let units = units(&folder, &[3, 1, 2]);
        let outcome = reconcile(&folder, &units).unwrap();
        assert!(outcome.succeeded.is_empty());
        assert_eq!(outcome.missing, vec![1, 2, 3]);
    }
}
