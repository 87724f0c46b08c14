//! Poller/reaper: promotes submitted jobs into the queue and fails orphaned
//! running jobs.
//!
//! Exactly one poller is expected to run against a store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use ccbuilder_core::defaults::{ORPHANED_JOB_ERROR, POLL_INTERVAL_SECS};
use ccbuilder_core::{JobStatus, Result, Store};

use crate::assignments::AssignmentTable;
use crate::queue::JobQueue;

/// What one poller tick changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Jobs moved from `SUBMITTED` to `QUEUED` and enqueued.
    pub claimed: usize,
    /// `RUNNING` jobs failed because no worker held them.
    pub reaped: usize,
}

/// Periodic scheduler driving `SUBMITTED` jobs into the queue.
pub struct Poller {
    store: Arc<dyn Store>,
    queue: Arc<JobQueue>,
    assignments: Arc<AssignmentTable>,
    interval: Duration,
}

impl Poller {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<JobQueue>,
        assignments: Arc<AssignmentTable>,
    ) -> Self {
        Self {
            store,
            queue,
            assignments,
            interval: Duration::from_secs(POLL_INTERVAL_SECS),
        }
    }

    /// Set the tick interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Re-enqueue jobs a previous process left `QUEUED`, oldest first.
    ///
    /// Jobs already waiting in the queue or held by a worker are skipped.
    pub async fn recover_queued(&self) -> Result<usize> {
        let jobs = self.store.jobs().list_by_status(JobStatus::Queued).await?;

        let mut producer = self.queue.lock().await;
        let mut recovered = 0;
        for job in jobs {
            if producer.contains(job.id) || self.assignments.holders(job.id) > 0 {
                continue;
            }
            producer.push(job.id);
            recovered += 1;
        }

        if recovered > 0 {
            info!(subsystem = "jobs", component = "poller", recovered, "Re-enqueued queued jobs");
        }
        Ok(recovered)
    }

    /// Claim every `SUBMITTED` job, oldest first, and enqueue it.
    ///
    /// Each claim and its push happen under the queue's producer lock, so no
    /// worker can observe the id before the job is `QUEUED`.
    pub async fn promote_submitted(&self) -> Result<usize> {
        let mut jobs = self.store.jobs().list_by_status(JobStatus::Submitted).await?;
        jobs.sort_by_key(|job| (job.time_submitted, job.id));

        let mut claimed = 0;
        for job in jobs {
            let mut producer = self.queue.lock().await;
            let applied = self
                .store
                .jobs()
                .transition(job.id, JobStatus::Submitted, JobStatus::Queued)
                .await?;
            if applied {
                producer.push(job.id);
                claimed += 1;
                debug!(subsystem = "jobs", component = "poller", job_id = %job.id, "Job queued");
            }
        }

        Ok(claimed)
    }

    /// Fail `RUNNING` jobs not held by exactly one worker slot.
    pub async fn reap_orphans(&self) -> Result<usize> {
        let running = self.store.jobs().list_by_status(JobStatus::Running).await?;

        let mut reaped = 0;
        for job in running {
            let holders = self.assignments.holders(job.id);
            if holders == 1 {
                continue;
            }
            if self
                .store
                .jobs()
                .fail(job.id, JobStatus::Running, ORPHANED_JOB_ERROR)
                .await?
            {
                warn!(
                    subsystem = "jobs",
                    component = "poller",
                    job_id = %job.id,
                    holders,
                    "Reaped orphaned job"
                );
                reaped += 1;
            }
        }

        Ok(reaped)
    }

    /// One scheduling pass: promote, then reap.
    pub async fn tick(&self) -> Result<TickReport> {
        let claimed = self.promote_submitted().await?;
        let reaped = self.reap_orphans().await?;
        Ok(TickReport { claimed, reaped })
    }

    /// Tick on the configured interval until `shutdown` flips, then close the
    /// store handle.
    ///
    /// Store outages are logged and retried on the next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            subsystem = "jobs",
            component = "poller",
            interval_ms = self.interval.as_millis() as u64,
            "Poller started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut recovered = false;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            if !recovered {
                match self.recover_queued().await {
                    Ok(_) => recovered = true,
                    Err(e) => {
                        warn!(subsystem = "jobs", component = "poller", error = %e, "Queue recovery failed, retrying next tick");
                        continue;
                    }
                }
            }

            let start = Instant::now();
            match self.tick().await {
                Ok(report) if report.claimed > 0 || report.reaped > 0 => {
                    info!(
                        subsystem = "jobs",
                        component = "poller",
                        claimed = report.claimed,
                        reaped = report.reaped,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Poller tick"
                    );
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    warn!(subsystem = "jobs", component = "poller", error = %e, "Store unavailable, skipping tick");
                }
                Err(e) => {
                    error!(subsystem = "jobs", component = "poller", error = %e, "Poller tick failed");
                }
            }
        }

        self.store.close().await;
        info!(subsystem = "jobs", component = "poller", "Poller stopped");
    }
}
