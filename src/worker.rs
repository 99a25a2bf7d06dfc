//! Worker loop: take a job, solve it, submit it
//!
//! A worker registers once, then repeats `get_job` / solve / `submit`. An
//! empty queue is answered by waiting `retry_delay` and asking again. A
//! heartbeat task keeps the lease alive while long searches run. A job whose
//! solver output is unusable is released and counted as failed; only a
//! solver that cannot run ends the loop.

use std::time::Duration;

use backend::BookQueue;
use solver_driver::{KillHandle, SolverDriver, SolverError, SolverStatus};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Totals reported when a worker stops
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkSummary {
    pub submitted: u64,
    /// Jobs whose solver went away before finishing
    pub abandoned: u64,
    /// Jobs whose solver output was rejected
    pub failed: u64,
}

pub struct Worker {
    queue: BookQueue,
    driver: SolverDriver,
    kill: KillHandle,
    retry_delay: Duration,
    hostname: String,
}

impl Worker {
    pub fn new(queue: BookQueue, driver: SolverDriver, retry_delay: Duration) -> Self {
        let kill = driver.kill_handle();
        Self {
            queue,
            driver,
            kill,
            retry_delay,
            hostname: "worker".to_string(),
        }
    }

    /// Name reported in the client lease
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Stops the worker's solver; the loop then ends after the current job
    pub fn kill_handle(&self) -> KillHandle {
        self.kill.clone()
    }

    /// Run until `max_jobs` results were submitted or the solver is killed
    pub async fn run(&mut self, max_jobs: Option<u64>) -> anyhow::Result<WorkSummary> {
        let client_id = self
            .queue
            .register_client(&self.hostname, option_env!("GIT_COMMIT"))
            .await?
            .client_id;
        let heartbeat = self.spawn_heartbeat(client_id);
        let outcome = self.work(client_id, max_jobs).await;
        heartbeat.abort();
        self.driver.kill().await;
        outcome
    }

    async fn work(&mut self, client_id: Uuid, max_jobs: Option<u64>) -> anyhow::Result<WorkSummary> {
        let mut summary = WorkSummary::default();

        while max_jobs.is_none_or(|max| summary.submitted < max) {
            if self.kill.is_killed() || self.driver.status() == SolverStatus::Killed {
                break;
            }

            let job = match self.queue.get_job(client_id).await? {
                Some(job) => job,
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_delay) => {}
                        _ = self.kill.killed() => {}
                    }
                    continue;
                }
            };

            match self.driver.do_job_sync(&job).await {
                Ok(Some(result)) => {
                    let evaluation = result.evaluation;
                    info!(
                        %client_id,
                        position = %job.position,
                        level = job.level,
                        depth = evaluation.depth,
                        score = evaluation.score,
                        elapsed_ms = result.computation_time.as_millis() as u64,
                        "job solved"
                    );
                    self.queue.submit(client_id, &[evaluation]).await?;
                    summary.submitted += 1;
                }
                Ok(None) => {
                    warn!(%client_id, position = %job.position, "job ended without result");
                    self.queue.release_job(client_id).await?;
                    summary.abandoned += 1;
                }
                Err(SolverError::Killed) => break,
                Err(err) if err.is_job_failure() => {
                    warn!(%client_id, position = %job.position, error = %err, "job failed");
                    self.queue.release_job(client_id).await?;
                    summary.failed += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        info!(
            %client_id,
            submitted = summary.submitted,
            abandoned = summary.abandoned,
            failed = summary.failed,
            "worker stopped"
        );
        Ok(summary)
    }

    fn spawn_heartbeat(&self, client_id: Uuid) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let period = (queue.config().lease_ttl / 3).max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                if let Err(err) = queue.heartbeat(client_id).await {
                    warn!(%client_id, error = %err, "heartbeat failed");
                }
            }
        })
    }
}
