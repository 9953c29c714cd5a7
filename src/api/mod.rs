//! Object kinds stored and reconciled by the operator.

pub mod approval;
pub mod condition;
pub mod custom_run;
pub mod integration_config;
pub mod job;
pub mod meta;
pub mod pipeline_run;
pub mod resources;

pub use approval::{Approval, ApprovalResult, ApprovalSender, ApprovalSpec, ApprovalStatus, Decision};
pub use condition::{Condition, ConditionStatus, Conditions};
pub use custom_run::{CustomRun, CustomRunSpec, CustomRunStatus, Param, ParamValue};
pub use integration_config::{
    ConfigJobs, GitConfig, GitToken, GitType, IntegrationConfig, IntegrationConfigSpec,
    IntegrationConfigStatus, Periodic, SecretKeyRef,
};
pub use job::{
    generate_job, IntegrationJob, IntegrationJobSpec, IntegrationJobStatus, JobState, JobTask,
    JobType, TaskState, TaskStatus,
};
pub use meta::{Object, ObjectKey, ObjectMeta, OwnerReference};
pub use pipeline_run::{PipelineRun, PipelineRunSpec, PipelineRunStatus, PipelineTask};
pub use resources::{Role, RoleBinding, Secret, SecretType, ServiceAccount};
