//! Execution backend: turns jobs into pipeline runs and reads their progress
//! back into job status.

mod ordering;

use chrono::Utc;

use crate::api::custom_run::{param, KIND_APPROVAL, KIND_EMAIL};
use crate::api::job::{LABEL_CONFIG, LABEL_JOB};
use crate::api::pipeline_run::{reason, CustomTaskRef, CONDITION_SUCCEEDED};
use crate::api::{
    IntegrationConfig, IntegrationJob, JobState, JobTask, Object, ObjectMeta, Param, PipelineRun,
    PipelineRunSpec, TaskState, TaskStatus,
};
use crate::error::Result;

pub use ordering::order_tasks;

/// Contract between the scheduler/job reconciler and the execution engine.
pub trait PipelineManager: Send + Sync {
    /// Name of the execution resource backing `job`.
    fn name(&self, job: &IntegrationJob) -> String {
        job.metadata.name.clone()
    }

    /// Builds the execution resource for `job`.
    fn generate(&self, job: &IntegrationJob) -> Result<PipelineRun>;

    /// Copies the run's progress into `job.status`. `run` is `None` when the
    /// run does not exist (yet, or any more).
    fn reflect_status(
        &self,
        run: Option<&PipelineRun>,
        job: &mut IntegrationJob,
        config: &IntegrationConfig,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultPipelineManager;

impl DefaultPipelineManager {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineManager for DefaultPipelineManager {
    fn generate(&self, job: &IntegrationJob) -> Result<PipelineRun> {
        let mut tasks = order_tasks(&job.spec.jobs)?;
        for (task, spec) in tasks.iter_mut().zip(&job.spec.jobs) {
            task.custom = custom_task(job, spec);
        }

        let mut metadata = ObjectMeta::new(job.metadata.namespace.clone(), self.name(job));
        metadata
            .labels
            .insert(LABEL_JOB.to_string(), job.metadata.name.clone());
        metadata
            .labels
            .insert(LABEL_CONFIG.to_string(), job.spec.config_ref.name.clone());
        metadata.owner_references.push(job.owner_reference());

        Ok(PipelineRun {
            metadata,
            spec: PipelineRunSpec {
                service_account_name: format!("{}-sa", job.spec.config_ref.name),
                tasks,
            },
            status: Default::default(),
        })
    }

    fn reflect_status(
        &self,
        run: Option<&PipelineRun>,
        job: &mut IntegrationJob,
        _config: &IntegrationConfig,
    ) -> Result<()> {
        let now = Utc::now();

        if job.status.jobs.len() != job.spec.jobs.len() {
            job.status.jobs = job
                .spec
                .jobs
                .iter()
                .map(|t| TaskStatus {
                    name: t.name.clone(),
                    ..Default::default()
                })
                .collect();
        }

        match run {
            None => {
                if job.status.state == Some(JobState::Running) {
                    job.status.state = Some(JobState::Failed);
                    job.status.message = format!("pipeline run {} does not exist", self.name(job));
                }
            }
            Some(run) => {
                job.status.state = Some(JobState::Running);
                job.status.start_time = run.metadata.creation_timestamp;
                job.status.completion_time = run.status.completion_time;

                if let Some(cond) = run.status.conditions.get(CONDITION_SUCCEEDED) {
                    job.status.message = cond.message.clone();
                    match cond.reason.as_str() {
                        reason::SUCCEEDED | reason::COMPLETED => {
                            job.status.state = Some(JobState::Completed);
                        }
                        reason::FAILED | reason::CANCELLED | reason::TIMED_OUT => {
                            job.status.state = Some(JobState::Failed);
                        }
                        _ => {}
                    }
                }

                for task in job.status.jobs.iter_mut() {
                    reflect_task(run, task);
                }
            }
        }

        if job.status.state.is_some_and(|s| s.is_terminal()) {
            job.status.start_time.get_or_insert(now);
            job.status.completion_time.get_or_insert(now);
        }

        Ok(())
    }
}

fn reflect_task(run: &PipelineRun, task: &mut TaskStatus) {
    let Some(task_run) = run.task_run(&task.name) else {
        task.state = TaskState::Pending;
        return;
    };

    task.start_time = task_run.start_time;
    task.completion_time = task_run.completion_time;
    task.state = TaskState::Pending;

    if let Some(cond) = task_run.conditions.get(CONDITION_SUCCEEDED) {
        task.message = cond.message.clone();
        if task_run.completion_time.is_some() {
            task.state = if cond.is_true() {
                TaskState::Success
            } else {
                TaskState::Failure
            };
        }
    }
}

/// Approval and email tasks are delegated back to the controller.
fn custom_task(job: &IntegrationJob, task: &JobTask) -> Option<CustomTaskRef> {
    let sender = job.spec.refs.sender.clone().unwrap_or_default();
    let common = || {
        vec![
            Param::string(param::INTEGRATION_JOB, job.metadata.name.clone()),
            Param::string(param::JOB_NAME, task.name.clone()),
        ]
    };

    if let Some(approval) = &task.approval {
        let mut params = common();
        params.extend([
            Param::array(param::APPROVERS, approval.approvers.clone()),
            Param::string(param::MESSAGE, approval.request_message.clone()),
            Param::string(param::SENDER_NAME, sender.name),
            Param::string(param::SENDER_EMAIL, sender.email),
            Param::string(param::LINK, job.spec.refs.link.clone()),
        ]);
        return Some(CustomTaskRef {
            kind: KIND_APPROVAL.to_string(),
            params,
        });
    }

    task.email.as_ref().map(|email| {
        let mut params = common();
        params.extend([
            Param::array(param::RECEIVERS, email.receivers.clone()),
            Param::string(param::TITLE, email.title.clone()),
            Param::string(param::CONTENT, email.content.clone()),
        ]);
        CustomTaskRef {
            kind: KIND_EMAIL.to_string(),
            params,
        }
    })
}
