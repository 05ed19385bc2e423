use std::path::Path;

use anyhow::{Context, bail};
use batchgrid_core::{DispatchReport, TaskPayload};
use batchgrid_dispatch::{DispatchError, DispatchOptions};
use serde_json::Value;

use crate::TaskArgs;

pub async fn run(args: &TaskArgs, resume: bool) -> anyhow::Result<()> {
    let dispatcher = super::load_dispatcher(&args.config)?;
    let tasks = load_tasks(&args.params)?;
    let options = options(args);

    let outcome = if resume {
        dispatcher.resume(&args.name, tasks, &options).await
    } else {
        dispatcher.dispatch(&args.name, tasks, &options).await
    };

    match outcome {
        Ok(report) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(())
        }
        Err(e) => {
            if let DispatchError::MissingTasks { missing, .. } = &e {
                eprintln!("Missing task ids: {missing:?}");
            }
            Err(e).with_context(|| format!("batch '{}' did not complete", args.name))
        }
    }
}

fn options(args: &TaskArgs) -> DispatchOptions {
    DispatchOptions {
        suffix: args.suffix.clone(),
        job_name: args.job_name.clone(),
        cores_per_job: args.cores,
        max_concurrent: args.max_concurrent,
        priority: args.priority,
        additional_flags: args.flags.clone(),
        queue: args.queue.clone(),
        pe: args.pe.clone(),
        max_rounds: args.max_rounds,
        disable_cluster: args.local,
        disable_mem_flag: args.no_mem_flag,
        allow_resubmit_all_fail: args.allow_resubmit_all_fail,
        send_notification: args.notify,
        remove_jobfolder: args.remove_jobfolder,
        collect_dir: args.collect.clone(),
    }
}

/// Read a JSON array of tasks.
pub fn load_tasks(path: &Path) -> anyhow::Result<Vec<TaskPayload>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read params file {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("params file {} is not valid JSON", path.display()))?;
    let Value::Array(tasks) = value else {
        bail!("params file {} must contain a JSON array of tasks", path.display());
    };
    Ok(tasks.into_iter().map(TaskPayload::from_json).collect())
}

fn print_report(report: &DispatchReport) {
    println!(
        "✓ {} task(s) of '{}' complete on {} after {} round(s)",
        report.results.len(),
        report.name,
        report.backend,
        report.rounds_run()
    );
    for round in &report.rounds {
        println!(
            "  round {}: {} job(s), {} core(s) each, {} missing, job name {}",
            round.round, round.submitted, round.cores_per_job, round.missing, round.job_name
        );
    }
    for (id, path) in &report.results {
        println!("{id}\t{}", path.display());
    }
}
