//! Bounded, FIFO-fair admission of pending jobs.

pub mod fifo;
pub mod pool;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{IntegrationJob, JobState, Object, ObjectKey};
use crate::error::{OperatorError, Result};
use crate::pipeline::PipelineManager;
use crate::store::Client;

use fifo::fifo_compare;
use pool::JobPool;

const MAX_CONFLICT_RETRIES: u32 = 3;

/// Admits pending jobs while fewer than `max_pipeline_run` are running.
///
/// State changes are fed in through [`notify`](Self::notify); the pool
/// coalesces them into a single-slot signal that one scheduling task drains.
pub struct Scheduler {
    client: Client,
    manager: Arc<dyn PipelineManager>,
    pool: JobPool,
    max_pipeline_run: usize,
    receiver: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Scheduler {
    pub fn new(
        client: Client,
        manager: Arc<dyn PipelineManager>,
        max_pipeline_run: usize,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(1);
        Arc::new(Self {
            client,
            manager,
            pool: JobPool::new(tx, Box::new(fifo_compare)),
            max_pipeline_run,
            receiver: Mutex::new(Some(rx)),
        })
    }

    pub fn pool(&self) -> &JobPool {
        &self.pool
    }

    /// Feeds a job snapshot to the pool. Never blocks on a scheduling pass.
    pub fn notify(&self, job: &IntegrationJob) {
        self.pool.sync_job(job);
    }

    /// Spawns the scheduling task. Each signal runs one pass, followed by
    /// `gap` during which further signals coalesce.
    ///
    /// Returns `None` if the task was already started.
    pub fn start(
        self: &Arc<Self>,
        gap: Duration,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let mut rx = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        let scheduler = Arc::clone(self);
        Some(tokio::spawn(async move {
            info!(
                "Scheduler started (max running jobs: {})",
                scheduler.max_pipeline_run
            );
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    signal = rx.recv() => {
                        if signal.is_none() {
                            break;
                        }
                        scheduler.schedule().await;
                    }
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(gap) => {}
                }
            }
            info!("Scheduler stopped");
        }))
    }

    /// Runs one FIFO pass: admits the eldest pending job until either the
    /// pending list runs dry or capacity is exhausted.
    ///
    /// A failed admission ends the pass with the job still at the head of
    /// the pending list, and another pass is signalled. Younger jobs never
    /// overtake it.
    pub async fn schedule(&self) {
        let mut attempted = HashSet::new();

        loop {
            let running = self.pool.running().len();
            if running >= self.max_pipeline_run {
                debug!(
                    "Capacity exhausted ({}/{} running)",
                    running, self.max_pipeline_run
                );
                break;
            }

            // A head already attempted this pass made no progress
            let Some(candidate) = self.pool.pending().first() else {
                break;
            };
            if !attempted.insert(candidate.id()) {
                break;
            }

            if let Err(e) = self.admit(candidate.job()).await {
                if matches!(&e, OperatorError::Store(s) if s.is_conflict()) {
                    debug!("Job {} kept changing while scheduling", candidate.job().key());
                } else {
                    warn!("Failed to schedule job {}: {}", candidate.job().key(), e);
                }
                self.pool.send_schedule();
                break;
            }
        }
    }

    async fn admit(&self, snapshot: &IntegrationJob) -> Result<()> {
        let key = snapshot.key();
        let mut conflicts = 0;

        loop {
            let Some(job) = self.client.jobs.find(&key).await? else {
                let mut gone = snapshot.clone();
                gone.metadata.deletion_timestamp = Some(Utc::now());
                self.pool.sync_job(&gone);
                return Ok(());
            };

            if job.is_completed()
                || job.metadata.deletion_timestamp.is_some()
                || job.state() != Some(JobState::Pending)
            {
                self.pool.sync_job(&job);
                return Ok(());
            }

            match self.start_job(job).await {
                Err(OperatorError::Store(e))
                    if e.is_conflict() && conflicts < MAX_CONFLICT_RETRIES =>
                {
                    conflicts += 1;
                    debug!(
                        "Job {} changed while scheduling, retrying ({}/{})",
                        key, conflicts, MAX_CONFLICT_RETRIES
                    );
                }
                result => return result,
            }
        }
    }

    /// Creates the job's run if it does not exist yet and patches the job
    /// Running, or Failed when the run cannot be created.
    async fn start_job(&self, job: IntegrationJob) -> Result<()> {
        let key = job.key();
        let run_key = ObjectKey::new(&job.metadata.namespace, self.manager.name(&job));
        let created = match self.client.pipeline_runs.find(&run_key).await? {
            Some(_) => Ok(()),
            None => self.create_run(&job).await,
        };

        let patched = match created {
            Ok(()) => {
                let mut running = job;
                running.status.state = Some(JobState::Running);
                running.status.start_time = Some(Utc::now());
                let patched = self.client.jobs.patch(running).await?;
                info!("Scheduled job {}", key);
                patched
            }
            Err(e) => {
                warn!("Cannot create pipeline run for job {}: {}", key, e);
                let mut failed = job;
                failed.status.state = Some(JobState::Failed);
                failed.status.message = e.to_string();
                failed.status.completion_time = Some(Utc::now());
                self.client.jobs.patch(failed).await?
            }
        };
        self.pool.sync_job(&patched);
        Ok(())
    }

    async fn create_run(&self, job: &IntegrationJob) -> Result<()> {
        let run = self.manager.generate(job)?;
        match self.client.pipeline_runs.create(run).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
