//! End-to-end runs on the local pool with a real `sh` worker.

use std::fs::File;
use std::path::Path;

use batchgrid_core::codec::decode_payloads;
use batchgrid_core::{Backend, DispatchConfig, SchedulerKind, TaskPayload};
use batchgrid_dispatch::{DispatchError, DispatchOptions, Dispatcher, JobFolder};
use serde_json::json;

/// Copies the storage file to the result path unless the payload says "fail".
const WORKER: &str = r#"echo "wd=$BATCHGRID_WD"
if grep -aq '"fail"' "$1"; then
    echo "error: task refused" >&2
    exit 1
fi
cp "$1" "$2"
"#;

fn setup(root: &Path, name: &str) -> DispatchConfig {
    std::fs::write(root.join(format!("{name}.sh")), WORKER).unwrap();
    let mut config = DispatchConfig::local(root.join("jobs"), root);
    config.worker.interpreter = "sh".into();
    config.worker.script_folder = root.to_path_buf();
    config.worker.script_template = "{name}.sh".into();
    config
}

fn dispatcher(config: DispatchConfig) -> Dispatcher {
    Dispatcher::new(config).unwrap().with_local_cpus(4)
}

fn task(i: usize, fail: bool) -> TaskPayload {
    let status = if fail { "fail" } else { "ok" };
    TaskPayload(vec![json!(i), json!(status)])
}

#[tokio::test]
async fn every_task_produces_its_result() {
    let dir = tempfile::tempdir().unwrap();
    let d = dispatcher(setup(dir.path(), "render"));
    let tasks: Vec<TaskPayload> = (0..12).map(|i| task(i, false)).collect();

    let report = d
        .dispatch("render", tasks.clone(), &DispatchOptions::default())
        .await
        .unwrap();

    assert_eq!(report.backend, Backend::Local);
    assert_eq!(report.rounds_run(), 1);
    assert_eq!(report.results.len(), 12);
    for (id, path) in &report.results {
        let stored = decode_payloads(File::open(path).unwrap()).unwrap();
        assert_eq!(stored, tasks[*id].0);
    }
}

#[tokio::test]
async fn launcher_exports_working_directory() {
    let dir = tempfile::tempdir().unwrap();
    let d = dispatcher(setup(dir.path(), "render"));

    d.dispatch("render", vec![task(0, false)], &DispatchOptions::default())
        .await
        .unwrap();

    let folder = JobFolder::new(&dir.path().join("jobs"), "render", "");
    let log = std::fs::read_to_string(folder.log_path(0)).unwrap();
    assert_eq!(log.trim(), format!("wd={}", dir.path().display()));
}

#[tokio::test]
async fn failing_tasks_retried_then_reported() {
    let dir = tempfile::tempdir().unwrap();
    let d = dispatcher(setup(dir.path(), "render"));
    let tasks: Vec<TaskPayload> = (0..8).map(|i| task(i, i == 2 || i == 5)).collect();

    let err = d
        .dispatch("render", tasks, &DispatchOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.missing_ids(), Some(&[2usize, 5][..]));
    let work = dir.path().join("jobs");
    let last = JobFolder::new(&work, "render", "_iter1_iter2");
    assert!(last.exists());
    assert_eq!(last.count_results(), 0);
    let err_log = std::fs::read_to_string(last.err_path(0)).unwrap();
    assert!(err_log.contains("task refused"));
}

#[tokio::test]
async fn all_failing_batch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let d = dispatcher(setup(dir.path(), "render"));
    let tasks: Vec<TaskPayload> = (0..3).map(|i| task(i, true)).collect();

    let err = d
        .dispatch("render", tasks, &DispatchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::AllJobsFailed { .. }));
}

#[tokio::test]
async fn resume_picks_up_fixed_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = setup(dir.path(), "render");
    config.retry.max_rounds = 1;
    let d = dispatcher(config);
    let broken: Vec<TaskPayload> = (0..5).map(|i| task(i, i == 3)).collect();

    let err = d
        .dispatch("render", broken, &DispatchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.missing_ids(), Some(&[3usize][..]));

    let fixed: Vec<TaskPayload> = (0..5).map(|i| task(i, false)).collect();
    let report = d
        .resume("render", fixed, &DispatchOptions::default())
        .await
        .unwrap();

    assert_eq!(report.results.len(), 5);
    let resumed = JobFolder::new(&dir.path().join("jobs"), "render", "_resumed");
    assert!(report.results[&3].starts_with(resumed.root()));
    assert_eq!(resumed.count_results(), 1);
}

#[tokio::test]
async fn disabled_cluster_skips_scheduler_probe() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = setup(dir.path(), "render");
    config.scheduler.kind = SchedulerKind::Slurm;
    let d = dispatcher(config);
    let options = DispatchOptions {
        disable_cluster: true,
        ..DispatchOptions::default()
    };

    let report = d
        .dispatch("render", vec![task(0, false), task(1, false)], &options)
        .await
        .unwrap();
    assert_eq!(report.backend, Backend::Local);
    assert_eq!(report.results.len(), 2);
}
