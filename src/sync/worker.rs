//! Sync worker
//!
//! Long-running loop that claims pending jobs and executes them on their own
//! tasks, bounded by a semaphore. On shutdown, jobs in flight are paused at
//! their next stop point and requeued so the next worker continues them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{gauge, histogram};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::controller::{JobController, JobReport};
use crate::config::WorkerConfig;
use crate::error::SyncEngineError;
use crate::models::sync_job::JobStatus;
use crate::models::sync_job_command::JobCommand;

type JobResult = (Uuid, Result<JobReport, SyncEngineError>);

pub struct SyncWorker {
    controller: JobController,
    config: WorkerConfig,
    permits: Arc<Semaphore>,
}

impl SyncWorker {
    pub fn new(controller: JobController, config: WorkerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            controller,
            config,
            permits,
        }
    }

    /// Run the worker loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), SyncEngineError> {
        info!(
            tick_ms = self.config.tick_ms,
            concurrency = self.config.concurrency,
            claim_batch = self.config.claim_batch,
            "Starting sync worker"
        );
        let tick = Duration::from_millis(self.config.tick_ms);
        let mut in_flight: JoinSet<JobResult> = JoinSet::new();
        let mut active: HashSet<Uuid> = HashSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sync worker shutdown requested");
                    break;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    Self::reap(joined, &mut active);
                }
                _ = sleep(tick) => {
                    let started = Instant::now();
                    match self.claim_and_spawn(&mut in_flight, &mut active).await {
                        Ok(0) => {}
                        Ok(count) => debug!(count, "Claimed sync jobs"),
                        Err(err) => error!(error = ?err, "Worker tick failed"),
                    }
                    histogram!("order_sync_worker_tick_duration_ms")
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
            gauge!("order_sync_jobs_in_flight").set(active.len() as f64);
        }

        self.drain(in_flight, active).await;
        info!("Sync worker stopped");
        Ok(())
    }

    /// Claims as many pending jobs as there are free permits (up to the
    /// batch size) and spawns one task per job.
    async fn claim_and_spawn(
        &self,
        in_flight: &mut JoinSet<JobResult>,
        active: &mut HashSet<Uuid>,
    ) -> Result<usize, SyncEngineError> {
        let free = self.permits.available_permits() as u64;
        let limit = free.min(self.config.claim_batch);
        if limit == 0 {
            return Ok(0);
        }

        let jobs = self.controller.jobs().claim_pending(limit).await?;
        let count = jobs.len();

        for job in jobs {
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                // Only fails once the semaphore is closed
                warn!(job_id = %job.id, "Worker is closing; leaving claimed job to stale recovery");
                continue;
            };

            let controller = self.controller.clone();
            active.insert(job.id);
            in_flight.spawn(async move {
                let _permit = permit; // held until the job stops
                let job_id = job.id;
                (job_id, controller.run_claimed(job).await)
            });
        }

        Ok(count)
    }

    /// Asks every job in flight to pause, waits for them, and requeues the
    /// ones that stopped paused.
    async fn drain(&self, mut in_flight: JoinSet<JobResult>, mut active: HashSet<Uuid>) {
        if active.is_empty() {
            return;
        }

        info!(jobs = active.len(), "Pausing in-flight jobs for shutdown");
        for job_id in &active {
            if let Err(err) = self
                .controller
                .jobs()
                .enqueue_command(*job_id, JobCommand::Pause)
                .await
            {
                warn!(job_id = %job_id, error = ?err, "Could not request pause");
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Ok((job_id, Ok(report))) = &joined
                && report.status == JobStatus::Paused
            {
                match self.controller.resume(*job_id, None).await {
                    Ok(_) => info!(job_id = %job_id, "Requeued job paused by shutdown"),
                    Err(err) => warn!(job_id = %job_id, error = ?err, "Could not requeue job"),
                }
            }
            Self::reap(joined, &mut active);
        }
    }

    fn reap(joined: Result<JobResult, JoinError>, active: &mut HashSet<Uuid>) {
        match joined {
            Ok((job_id, result)) => {
                active.remove(&job_id);
                match result {
                    Ok(report) => debug!(
                        job_id = %job_id,
                        status = report.status.as_str(),
                        "Sync job task finished"
                    ),
                    Err(err) => error!(job_id = %job_id, error = %err, "Sync job task failed"),
                }
            }
            // The job id is lost with a panicked task; its heartbeat goes
            // stale and the job becomes resumable.
            Err(err) => error!(error = %err, "Sync job task panicked"),
        }
    }
}
