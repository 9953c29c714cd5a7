use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};

use super::{Action, Reconciler};
use crate::api::job::FINALIZER;
use crate::api::{IntegrationJob, JobState, Object, ObjectKey};
use crate::error::Result;
use crate::pipeline::PipelineManager;
use crate::scheduler::Scheduler;
use crate::store::Client;

/// Mirrors pipeline run progress into jobs and keeps the scheduler's pool in
/// step with every job it sees.
pub struct JobReconciler {
    client: Client,
    scheduler: Arc<Scheduler>,
    manager: Arc<dyn PipelineManager>,
}

impl JobReconciler {
    pub fn new(
        client: Client,
        scheduler: Arc<Scheduler>,
        manager: Arc<dyn PipelineManager>,
    ) -> Self {
        Self {
            client,
            scheduler,
            manager,
        }
    }

    async fn sync(&self, job: &mut IntegrationJob) -> Result<()> {
        if job.is_completed() {
            return Ok(());
        }

        let original = job.status.clone();
        job.status.set_defaults();

        let config_key = ObjectKey::new(&job.metadata.namespace, &job.spec.config_ref.name);
        match self.client.configs.get(&config_key).await {
            Err(e) => {
                warn!("Cannot get IntegrationConfig of job {}: {}", job.key(), e);
                let now = Utc::now();
                job.status.state = Some(JobState::Failed);
                job.status.message = e.to_string();
                job.status.start_time.get_or_insert(now);
                job.status.completion_time = Some(now);
            }
            Ok(config) => {
                let run_key = ObjectKey::new(&job.metadata.namespace, self.manager.name(job));
                let run = self.client.pipeline_runs.find(&run_key).await?;
                self.manager.reflect_status(run.as_ref(), job, &config)?;
            }
        }

        if job.status != original {
            *job = self.client.jobs.patch(job.clone()).await?;
            if job.is_completed() {
                info!(
                    "Job {} finished as {}",
                    job.key(),
                    job.state().unwrap_or(JobState::Failed)
                );
            }
        }
        Ok(())
    }

    async fn finalize(&self, mut job: IntegrationJob) -> Result<()> {
        self.scheduler.notify(&job);

        job.metadata.remove_finalizer(FINALIZER);
        self.client.jobs.patch(job.clone()).await?;
        debug!("Finalized IntegrationJob {}", job.key());
        Ok(())
    }
}

#[async_trait]
impl Reconciler for JobReconciler {
    type Object = IntegrationJob;

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let Some(mut job) = self.client.jobs.find(key).await? else {
            return Ok(Action::Done);
        };

        // Terminating objects never get the finalizer back
        if job.metadata.deletion_timestamp.is_some() {
            if job.metadata.has_finalizer(FINALIZER) {
                self.finalize(job).await?;
            }
            return Ok(Action::Done);
        }

        if !job.metadata.has_finalizer(FINALIZER) {
            job.metadata.finalizers.push(FINALIZER.to_string());
            self.client.jobs.patch(job).await?;
            debug!("Added finalizer to IntegrationJob {}", key);
            return Ok(Action::Done);
        }

        let result = self.sync(&mut job).await;
        self.scheduler.notify(&job);
        result.map(|()| Action::Done)
    }
}
