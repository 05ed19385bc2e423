//! Completion monitor.
//!
//! Polls the scheduler until no job of the batch is listed any more. Progress
//! is measured by result artifacts in `out/`, since that is the only thing a
//! finished job leaves behind.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::layout::JobFolder;
use crate::scheduler::SchedulerBackend;

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub elapsed: Duration,
    pub polls: u32,
    pub timed_out: bool,
    /// The status command failed and waiting was abandoned.
    pub status_failed: bool,
}

#[derive(Debug, Clone)]
pub struct CompletionMonitor {
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl CompletionMonitor {
    pub fn new(poll_interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// Block until `count_running(job_name)` reaches zero.
    pub async fn wait(
        &self,
        backend: &dyn SchedulerBackend,
        job_name: &str,
        folder: &JobFolder,
        expected: usize,
    ) -> MonitorReport {
        let started = Instant::now();
        let mut polls = 0u32;
        let mut last_done = None;

        loop {
            polls += 1;
            let running = match backend.count_running(job_name).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(%job_name, error = %e, "status command failed, no longer waiting for jobs");
                    return MonitorReport {
                        elapsed: started.elapsed(),
                        polls,
                        timed_out: false,
                        status_failed: true,
                    };
                }
            };
            if running == 0 {
                break;
            }

            let done = folder.count_results();
            if last_done != Some(done) {
                info!(%job_name, done, expected, running, "waiting for jobs");
                last_done = Some(done);
            } else {
                debug!(%job_name, running, "jobs still listed");
            }

            if self.timeout.is_some_and(|limit| started.elapsed() >= limit) {
                warn!(
                    %job_name,
                    running,
                    timeout = ?self.timeout,
                    "monitor timeout reached, unfinished jobs will count as missing"
                );
                return MonitorReport {
                    elapsed: started.elapsed(),
                    polls,
                    timed_out: true,
                    status_failed: false,
                };
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        let elapsed = started.elapsed();
        info!(
            %job_name,
            done = folder.count_results(),
            expected,
            elapsed = ?elapsed,
            "no jobs left in the scheduler"
        );
        MonitorReport {
            elapsed,
            polls,
            timed_out: false,
            status_failed: false,
        }
    }
}
