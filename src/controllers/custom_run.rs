use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::{Action, Reconciler};
use crate::api::approval::{CONDITION_SENT_REQUEST_MAIL, CONDITION_SENT_RESULT_MAIL};
use crate::api::custom_run::{param, KIND_APPROVAL, KIND_EMAIL};
use crate::api::pipeline_run::CONDITION_SUCCEEDED;
use crate::api::{
    Approval, ApprovalResult, ApprovalSender, ApprovalSpec, Condition, ConditionStatus,
    CustomRun, IntegrationJob, Object, ObjectKey, ObjectMeta, PipelineRun,
};
use crate::config::OperatorConfig;
use crate::error::{OperatorError, Result};
use crate::mail::{render, Mailer};
use crate::store::Client;

const VAR_INTEGRATION_JOB_NAME: &str = "$INTEGRATION_JOB_NAME";
const VAR_JOB_NAME: &str = "$JOB_NAME";

pub mod reason {
    pub const AWAITING: &str = "Awaiting";
    pub const CANNOT_CREATE_APPROVAL: &str = "CannotCreateApproval";
    pub const ERROR_GETTING_APPROVAL: &str = "ErrorGettingApproval";
    pub const INSUFFICIENT_PARAMS: &str = "InsufficientParams";
    pub const CANNOT_COMPILE_CONTENT: &str = "CannotCompileContent";
    pub const EMAIL_ERROR: &str = "EmailError";
    pub const SENT_MAIL: &str = "SentMail";
}

/// Handles the custom runs of one kind.
///
/// Implementations must leave runs with a completion time untouched.
#[async_trait]
pub trait KindHandler: Send + Sync {
    async fn handle(&self, run: &mut CustomRun) -> Result<()>;
}

/// Dispatches custom runs to the handler registered for their kind.
pub struct CustomRunReconciler {
    client: Client,
    handlers: HashMap<String, Box<dyn KindHandler>>,
}

impl CustomRunReconciler {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            handlers: HashMap::new(),
        }
    }

    pub fn with_handler(mut self, kind: &str, handler: Box<dyn KindHandler>) -> Self {
        self.handlers.insert(kind.to_string(), handler);
        self
    }

    /// Approval and email handlers.
    pub fn with_default_handlers(
        client: Client,
        mailer: Arc<dyn Mailer>,
        config: Arc<OperatorConfig>,
    ) -> Self {
        Self::new(client.clone())
            .with_handler(
                KIND_APPROVAL,
                Box::new(ApprovalRunHandler::new(client.clone(), Arc::clone(&config))),
            )
            .with_handler(
                KIND_EMAIL,
                Box::new(EmailRunHandler::new(client, mailer, config)),
            )
    }
}

#[async_trait]
impl Reconciler for CustomRunReconciler {
    type Object = CustomRun;

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let Some(mut run) = self.client.custom_runs.find(key).await? else {
            return Ok(Action::Done);
        };
        if run.is_completed() {
            return Ok(Action::Done);
        }
        let Some(handler) = self.handlers.get(&run.spec.kind) else {
            debug!("No handler for custom run {} of kind {}", key, run.spec.kind);
            return Ok(Action::Done);
        };

        let original = run.status.clone();
        handler.handle(&mut run).await?;
        if run.status != original {
            self.client.custom_runs.patch(run).await?;
        }
        Ok(Action::Done)
    }
}

/// Default `Succeeded` condition of a run that has not reported yet.
fn succeeded_or(run: &CustomRun, message: &str) -> Condition {
    run.status
        .conditions
        .get(CONDITION_SUCCEEDED)
        .cloned()
        .unwrap_or_else(|| {
            let mut cond = Condition::new(CONDITION_SUCCEEDED, ConditionStatus::Unknown);
            cond.set(ConditionStatus::Unknown, reason::AWAITING, message);
            cond
        })
}

/// Whether the run already reached a verdict.
fn is_settled(run: &CustomRun) -> bool {
    run.is_completed()
        || run
            .status
            .conditions
            .get(CONDITION_SUCCEEDED)
            .is_some_and(|c| !c.is_unknown())
}

/// Blocks a pipeline step until an [`Approval`] named after the run is
/// decided.
pub struct ApprovalRunHandler {
    client: Client,
    config: Arc<OperatorConfig>,
}

impl ApprovalRunHandler {
    pub fn new(client: Client, config: Arc<OperatorConfig>) -> Self {
        Self { client, config }
    }

    fn new_approval(&self, run: &CustomRun) -> Result<Approval> {
        let spec = &run.spec;
        let pipeline_run = run
            .metadata
            .owner_references
            .iter()
            .find(|o| o.kind == PipelineRun::KIND)
            .map_or_else(|| "none".to_string(), |o| o.name.clone());

        let users = spec.array_param(param::APPROVERS)?.to_vec();
        let message = spec.string_param(param::MESSAGE)?.to_string();
        let integration_job = spec.string_param(param::INTEGRATION_JOB)?.to_string();
        let job_name = spec.string_param(param::JOB_NAME)?.to_string();
        let sender_name = spec.string_param(param::SENDER_NAME)?.to_string();
        let sender_email = spec.optional_string_param(param::SENDER_EMAIL).to_string();
        let link = spec.string_param(param::LINK)?.to_string();

        let mut metadata = ObjectMeta::new(&run.metadata.namespace, &run.metadata.name);
        metadata.owner_references.push(run.owner_reference());

        Ok(Approval {
            metadata,
            spec: ApprovalSpec {
                users,
                skip_send_mail: !self.config.mail.enabled,
                sender: Some(ApprovalSender {
                    name: sender_name,
                    email: sender_email,
                }),
                integration_job,
                job_name,
                pipeline_run,
                message,
                link,
            },
            status: Default::default(),
        })
    }

    async fn create_approval(&self, run: &CustomRun) -> Result<()> {
        let approval = self.new_approval(run)?;
        match self.client.approvals.create(approval).await {
            Ok(created) => {
                info!("Created approval {}", created.key());
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl KindHandler for ApprovalRunHandler {
    async fn handle(&self, run: &mut CustomRun) -> Result<()> {
        if is_settled(run) {
            return Ok(());
        }

        let now = Utc::now();
        let mut cond = succeeded_or(run, "waiting for approval");
        run.status.start_time.get_or_insert(now);

        match self.client.approvals.find(&run.key()).await {
            Ok(None) => {
                if let Err(e) = self.create_approval(run).await {
                    warn!("Cannot create approval for run {}: {}", run.key(), e);
                    cond.set(
                        ConditionStatus::False,
                        reason::CANNOT_CREATE_APPROVAL,
                        &e.to_string(),
                    );
                }
            }
            Ok(Some(approval)) => reflect_approval(&approval, &mut cond, run, now),
            Err(e) => {
                warn!("Cannot get approval for run {}: {}", run.key(), e);
                cond.set(
                    ConditionStatus::False,
                    reason::ERROR_GETTING_APPROVAL,
                    &e.to_string(),
                );
            }
        }

        run.status.conditions.set(cond);
        Ok(())
    }
}

fn reflect_approval(
    approval: &Approval,
    cond: &mut Condition,
    run: &mut CustomRun,
    now: DateTime<Utc>,
) {
    let status = &approval.status;
    let Some(decided_at) = status.decision_time else {
        let failed_mails: Vec<String> = [
            ("RequestMail", CONDITION_SENT_REQUEST_MAIL),
            ("ResultMail", CONDITION_SENT_RESULT_MAIL),
        ]
        .into_iter()
        .filter_map(|(label, type_)| {
            status
                .conditions
                .get(type_)
                .filter(|c| c.is_false())
                .map(|c| format!("{} : {}-{}", label, c.reason, c.message))
        })
        .collect();
        let reason = cond.reason.clone();
        cond.set(ConditionStatus::Unknown, &reason, &failed_mails.join(", "));
        return;
    };

    let verdict = if status.result == ApprovalResult::Approved {
        ConditionStatus::True
    } else {
        ConditionStatus::False
    };
    let result = status.result.to_string();
    let message = format!(
        "{} {} this approval, reason: {}, decisionTime: {}",
        status.approver,
        result.to_lowercase(),
        status.reason,
        decided_at.to_rfc3339()
    );
    cond.set(verdict, &result, &message);
    run.status.completion_time = Some(now);
}

/// Sends one mail and completes the run.
pub struct EmailRunHandler {
    client: Client,
    mailer: Arc<dyn Mailer>,
    config: Arc<OperatorConfig>,
}

impl EmailRunHandler {
    pub fn new(client: Client, mailer: Arc<dyn Mailer>, config: Arc<OperatorConfig>) -> Self {
        Self {
            client,
            mailer,
            config,
        }
    }

    async fn compile(&self, run: &CustomRun, content: &str) -> Result<String> {
        let integration_job = run.spec.optional_string_param(param::INTEGRATION_JOB);
        let job_name = run.spec.optional_string_param(param::JOB_NAME);

        let key = ObjectKey::new(&run.metadata.namespace, integration_job);
        let job: IntegrationJob = self.client.jobs.get(&key).await?;

        let content = content
            .replace(VAR_INTEGRATION_JOB_NAME, integration_job)
            .replace(VAR_JOB_NAME, job_name);
        let state = job.state().map(|s| s.to_string()).unwrap_or_default();
        Ok(render(
            &content,
            &[
                ("name", job.metadata.name.as_str()),
                ("repository", job.spec.refs.repository.as_str()),
                ("state", state.as_str()),
                ("message", job.status.message.as_str()),
            ],
        ))
    }
}

fn read_email_params(run: &CustomRun) -> Result<(Vec<String>, String, String)> {
    Ok((
        run.spec.array_param(param::RECEIVERS)?.to_vec(),
        run.spec.string_param(param::TITLE)?.to_string(),
        run.spec.string_param(param::CONTENT)?.to_string(),
    ))
}

#[async_trait]
impl KindHandler for EmailRunHandler {
    async fn handle(&self, run: &mut CustomRun) -> Result<()> {
        if is_settled(run) {
            return Ok(());
        }

        let mut cond = succeeded_or(run, "Sending email");
        run.status.start_time.get_or_insert(Utc::now());

        let (receivers, title, content) = match read_email_params(run) {
            Ok(params) => params,
            Err(e) => {
                warn!("Email run {} has invalid params: {}", run.key(), e);
                cond.set(
                    ConditionStatus::False,
                    reason::INSUFFICIENT_PARAMS,
                    &e.to_string(),
                );
                run.status.conditions.set(cond);
                return Ok(());
            }
        };

        let compiled = match self.compile(run, &title).await {
            Ok(title) => self.compile(run, &content).await.map(|body| (title, body)),
            Err(e) => Err(e),
        };
        let (title, body) = match compiled {
            Ok(compiled) => compiled,
            Err(e) => {
                warn!("Cannot compile mail of run {}: {}", run.key(), e);
                cond.set(
                    ConditionStatus::False,
                    reason::CANNOT_COMPILE_CONTENT,
                    &e.to_string(),
                );
                run.status.conditions.set(cond);
                return Ok(());
            }
        };

        let sent = if self.config.mail.enabled {
            self.mailer.send(&receivers, &title, &body).await
        } else {
            Err(OperatorError::Mail("email is disabled".to_string()))
        };
        match sent {
            Ok(()) => {
                info!("Sent mail of run {} to [{}]", run.key(), receivers.join(", "));
                cond.set(ConditionStatus::True, reason::SENT_MAIL, "");
            }
            Err(e) => {
                warn!("Failed to send mail of run {}: {}", run.key(), e);
                cond.set(ConditionStatus::False, reason::EMAIL_ERROR, &e.to_string());
            }
        }

        run.status.completion_time = Some(Utc::now());
        run.status.conditions.set(cond);
        Ok(())
    }
}
