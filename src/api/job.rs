use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::meta::{impl_object, ObjectMeta};
use super::IntegrationConfig;
use crate::error::{OperatorError, Result};
use crate::structs::graph::job_graph;
use crate::utils::{bounded_name, random_string};

pub const LABEL_PREFIX: &str = "cicd.tmax.io/";
pub const LABEL_CONFIG: &str = "cicd.tmax.io/integration-config";
pub const LABEL_TYPE: &str = "cicd.tmax.io/integration-type";
pub const LABEL_ID: &str = "cicd.tmax.io/integration-id";
pub const LABEL_JOB: &str = "cicd.tmax.io/integration-job";
pub const LABEL_PERIODIC_JOB: &str = "cicd.tmax.io/periodic-job";

/// Finalizer placed on Configs and Jobs by their reconcilers.
pub const FINALIZER: &str = "cicd.tmax.io/finalizer";

const JOB_ID_LEN: usize = 20;
const NAME_SUFFIX_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobType {
    PreSubmit,
    PostSubmit,
    Periodic,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::PreSubmit => "preSubmit",
            JobType::PostSubmit => "postSubmit",
            JobType::Periodic => "periodic",
        }
    }

    fn short_name(&self) -> &'static str {
        match self {
            JobType::PreSubmit => "pre",
            JobType::PostSubmit => "post",
            JobType::Periodic => "periodic",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pre" | "preSubmit" | "pre-submit" => Ok(JobType::PreSubmit),
            "post" | "postSubmit" | "post-submit" => Ok(JobType::PostSubmit),
            "periodic" => Ok(JobType::Periodic),
            other => Err(OperatorError::InvalidParameter(format!(
                "unknown job type '{other}'"
            ))),
        }
    }
}

/// Who may approve a task and what they are told.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobApproval {
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default)]
    pub request_message: String,
}

/// A task that only sends a mail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEmail {
    #[serde(default)]
    pub receivers: Vec<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// One named task of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTask {
    pub name: String,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub script: String,

    /// Names of tasks that must finish before this one starts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<JobApproval>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<JobEmail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: JobType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSender {
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// The git event that triggered the job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRefs {
    pub repository: String,
    #[serde(default)]
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<JobSender>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationJobSpec {
    pub config_ref: ConfigRef,
    pub id: String,
    pub jobs: Vec<JobTask>,
    #[serde(default)]
    pub refs: JobRefs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "Pending",
            JobState::Running => "Running",
            JobState::Completed => "Completed",
            JobState::Failed => "Failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[default]
    Pending,
    Success,
    Failure,
}

/// Observed state of a single task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub name: String,
    #[serde(default)]
    pub state: TaskState,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationJobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<TaskStatus>,
}

impl IntegrationJobStatus {
    pub fn set_defaults(&mut self) {
        if self.state.is_none() {
            self.state = Some(JobState::Pending);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationJob {
    pub metadata: ObjectMeta,
    pub spec: IntegrationJobSpec,
    #[serde(default)]
    pub status: IntegrationJobStatus,
}

impl_object!(IntegrationJob, "IntegrationJob");

impl IntegrationJob {
    /// A job with a completion time never changes state again.
    pub fn is_completed(&self) -> bool {
        self.status.completion_time.is_some()
    }

    pub fn state(&self) -> Option<JobState> {
        self.status.state
    }

    /// Identity used for FIFO tie-breaking.
    pub fn ns_name(&self) -> String {
        format!("{}_{}", self.metadata.namespace, self.metadata.name)
    }
}

/// Builds a new job from the config's templates of `job_type`.
///
/// With `wanted`, only that task and its transitive predecessors are kept,
/// in declaration order. The returned job has no state; the job reconciler
/// defaults it to `Pending`.
///
/// # Errors
///
/// Returns an error if the config's graph for `job_type` is invalid, or if
/// `wanted` names a task the config does not declare.
pub fn generate_job(
    config: &IntegrationConfig,
    job_type: JobType,
    wanted: Option<&str>,
) -> Result<IntegrationJob> {
    let templates = config.spec.jobs.for_type(job_type);

    let tasks = match wanted {
        None => {
            job_graph(&templates)?;
            templates
        }
        Some(wanted) => filter_with_predecessors(&templates, wanted)?,
    };

    let id = random_string(JOB_ID_LEN);
    let prefix = match (job_type, wanted) {
        (JobType::Periodic, Some(task)) => {
            format!("{}-{}-{}", config.metadata.name, job_type.short_name(), task)
        }
        _ => format!("{}-{}", config.metadata.name, job_type.short_name()),
    };

    let mut job = new_job(config, job_type, &id, &prefix, tasks);
    if let (JobType::Periodic, Some(task)) = (job_type, wanted) {
        job.metadata
            .labels
            .insert(LABEL_PERIODIC_JOB.to_string(), task.to_string());
    }
    Ok(job)
}

/// Keeps `wanted` and every task it transitively depends on.
pub fn filter_with_predecessors(tasks: &[JobTask], wanted: &str) -> Result<Vec<JobTask>> {
    if !tasks.iter().any(|t| t.name == wanted) {
        return Err(OperatorError::JobNotDeclared(wanted.to_string()));
    }

    let graph = job_graph(tasks)?;
    let mut keep = graph.get_pres(wanted);
    keep.push(wanted.to_string());

    Ok(tasks
        .iter()
        .filter(|t| keep.iter().any(|k| k == &t.name))
        .cloned()
        .collect())
}

fn new_job(
    config: &IntegrationConfig,
    job_type: JobType,
    id: &str,
    prefix: &str,
    tasks: Vec<JobTask>,
) -> IntegrationJob {
    let suffix: String = id.chars().take(NAME_SUFFIX_LEN).collect();

    let mut metadata = ObjectMeta::new(
        config.metadata.namespace.clone(),
        bounded_name(prefix, &suffix),
    );
    metadata
        .labels
        .insert(LABEL_CONFIG.to_string(), config.metadata.name.clone());
    metadata
        .labels
        .insert(LABEL_TYPE.to_string(), job_type.as_str().to_string());
    metadata.labels.insert(LABEL_ID.to_string(), id.to_string());

    IntegrationJob {
        metadata,
        spec: IntegrationJobSpec {
            config_ref: ConfigRef {
                name: config.metadata.name.clone(),
                type_: job_type,
            },
            id: id.to_string(),
            jobs: tasks,
            refs: JobRefs {
                repository: config.spec.git.repository.clone(),
                link: String::new(),
                sender: Some(JobSender::default()),
            },
        },
        status: IntegrationJobStatus::default(),
    }
}
