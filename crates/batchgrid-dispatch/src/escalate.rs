//! Resource escalation between rounds.

use batchgrid_core::SubmissionBatch;

use crate::flags::escalated_flags;

/// Batch for the next round after a partial failure.
///
/// Cores per job grow by two, capped at `cores_per_node`. With
/// `memory_flags` (Slurm) the previous memory and cpu requests are dropped,
/// and reaching the node limit pins memory to the whole node. The suffix is
/// tagged with the round that just finished.
pub fn escalate(
    batch: &SubmissionBatch,
    cores_per_node: u32,
    memory_flags: bool,
    job_name: String,
) -> SubmissionBatch {
    let cores_per_job = (batch.cores_per_job + 2).min(cores_per_node).max(batch.cores_per_job);
    let additional_flags = if memory_flags {
        escalated_flags(&batch.additional_flags, cores_per_job == cores_per_node)
    } else {
        batch.additional_flags.clone()
    };

    SubmissionBatch {
        name: batch.name.clone(),
        suffix: format!("{}_iter{}", batch.suffix, batch.round),
        round: batch.round + 1,
        max_rounds: batch.max_rounds,
        job_name,
        cores_per_job,
        max_concurrent: batch.max_concurrent,
        queue: batch.queue.clone(),
        pe: batch.pe.clone(),
        priority: batch.priority,
        additional_flags,
        disable_mem_flag: false,
    }
}
