use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};

use super::{Action, Reconciler};
use crate::api::approval::{CONDITION_SENT_REQUEST_MAIL, CONDITION_SENT_RESULT_MAIL};
use crate::api::job::LABEL_PREFIX;
use crate::api::resources::{PolicyRule, RoleRef, Subject, SubjectKind};
use crate::api::{
    Approval, ApprovalResult, Condition, ConditionStatus, Decision, Object, ObjectKey, ObjectMeta,
    Role, RoleBinding,
};
use crate::config::{MailTemplates, OperatorConfig};
use crate::error::Result;
use crate::mail::{render, Mailer};
use crate::store::{Client, ObjectStore};

pub const API_GROUP: &str = "cicdapi.tmax.io";
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

const ROLE_PREFIX: &str = "cicd-approval-";

pub mod reason {
    pub const EMAIL_DISABLED: &str = "EmailDisabled";
    pub const ERROR_SENDING_MAIL: &str = "ErrorSendingMail";
    pub const NO_RECEIVERS: &str = "NoMailReceivers";
}

/// Grants approvers the right to decide an approval and mails them about it.
pub struct ApprovalReconciler {
    client: Client,
    mailer: Arc<dyn Mailer>,
    config: Arc<OperatorConfig>,
}

impl ApprovalReconciler {
    pub fn new(client: Client, mailer: Arc<dyn Mailer>, config: Arc<OperatorConfig>) -> Self {
        Self {
            client,
            mailer,
            config,
        }
    }

    async fn ensure_role(&self, approval: &Approval) -> Result<()> {
        let rules = vec![PolicyRule {
            api_groups: vec![API_GROUP.to_string()],
            resources: vec![
                "approvals/approve".to_string(),
                "approvals/reject".to_string(),
            ],
            resource_names: vec![approval.metadata.name.clone()],
            verbs: vec!["update".to_string()],
        }];

        let metadata = rbac_meta(approval);
        match self.client.roles.find(&metadata.key()).await? {
            None => {
                let role = self.client.roles.create(Role { metadata, rules }).await?;
                debug!("Created role {}", role.key());
            }
            Some(mut role) => {
                let owned = role
                    .metadata
                    .is_owned_by(Approval::KIND, &approval.metadata.name);
                if role.rules != rules || !owned {
                    role.rules = rules;
                    adopt(&mut role.metadata, metadata);
                    self.client.roles.patch(role).await?;
                }
            }
        }
        Ok(())
    }

    async fn ensure_role_binding(&self, approval: &Approval) -> Result<()> {
        let metadata = rbac_meta(approval);
        let role_ref = RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: Role::KIND.to_string(),
            name: metadata.name.clone(),
        };

        match self.client.role_bindings.find(&metadata.key()).await? {
            None => {
                let mut binding = RoleBinding {
                    metadata,
                    role_ref,
                    subjects: Vec::new(),
                };
                merge_subjects(&mut binding.subjects, approval);
                let binding = self.client.role_bindings.create(binding).await?;
                debug!("Created role binding {}", binding.key());
            }
            Some(mut binding) => {
                let before = binding.clone();
                binding.role_ref = role_ref;
                merge_subjects(&mut binding.subjects, approval);
                adopt(&mut binding.metadata, metadata);
                if binding != before {
                    self.client.role_bindings.patch(binding).await?;
                }
            }
        }
        Ok(())
    }

    async fn send_request_mail(&self, approval: &Approval, condition: &mut Condition) {
        let templates = &self.config.mail.templates;
        let vars = mail_vars(approval);
        let subject = render(&templates.request_title, &vars);
        let body = render(&templates.request_content, &vars);

        let to = approval.approver_emails();
        self.send(&to, &subject, &body, condition).await;
        if condition.is_true() {
            info!("Sent approval request mail for {}", approval.key());
        }
    }

    async fn send_result_mail(&self, approval: &Approval, to: String, condition: &mut Condition) {
        let MailTemplates {
            result_title,
            result_content,
            ..
        } = &self.config.mail.templates;
        let vars = mail_vars(approval);
        let subject = render(result_title, &vars);
        let body = render(result_content, &vars);

        self.send(&[to], &subject, &body, condition).await;
        if condition.is_true() {
            info!("Sent approval result mail for {}", approval.key());
        }
    }

    async fn send(&self, to: &[String], subject: &str, body: &str, condition: &mut Condition) {
        if !self.config.mail.enabled {
            condition.set(ConditionStatus::False, reason::EMAIL_DISABLED, "");
            return;
        }
        if to.is_empty() {
            condition.set(
                ConditionStatus::False,
                reason::NO_RECEIVERS,
                "no receiver has an email address",
            );
            return;
        }

        match self.mailer.send(to, subject, body).await {
            Ok(()) => condition.set(ConditionStatus::True, "", ""),
            Err(e) => {
                warn!("Failed to send mail to [{}]: {}", to.join(", "), e);
                condition.set(
                    ConditionStatus::False,
                    reason::ERROR_SENDING_MAIL,
                    &e.to_string(),
                );
            }
        }
    }
}

fn rbac_meta(approval: &Approval) -> ObjectMeta {
    let mut metadata = ObjectMeta::new(
        &approval.metadata.namespace,
        format!("{}{}", ROLE_PREFIX, approval.metadata.name),
    );
    metadata.labels = rbac_labels(approval);
    metadata.owner_references.push(approval.owner_reference());
    metadata
}

fn rbac_labels(approval: &Approval) -> BTreeMap<String, String> {
    let sender = approval
        .spec
        .sender
        .as_ref()
        .map(|s| s.name.clone())
        .unwrap_or_default();
    BTreeMap::from([
        (format!("{LABEL_PREFIX}approval"), approval.metadata.name.clone()),
        (
            format!("{LABEL_PREFIX}integrationJob"),
            approval.spec.integration_job.clone(),
        ),
        (format!("{LABEL_PREFIX}sender"), sender),
    ])
}

/// Copies desired labels and the owner reference onto existing metadata.
fn adopt(current: &mut ObjectMeta, desired: ObjectMeta) {
    current.labels.extend(desired.labels);
    for owner in desired.owner_references {
        if !current.owner_references.contains(&owner) {
            current.owner_references.push(owner);
        }
    }
}

/// Appends a subject for every approver not bound yet. Malformed
/// service-account identities are skipped.
fn merge_subjects(subjects: &mut Vec<Subject>, approval: &Approval) {
    for user in approval.users() {
        let subject = if user.is_service_account() {
            let Some((namespace, name)) = user.service_account() else {
                debug!("Skipping malformed service account {}", user.name);
                continue;
            };
            Subject {
                kind: SubjectKind::ServiceAccount,
                api_group: String::new(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            }
        } else {
            Subject {
                kind: SubjectKind::User,
                api_group: RBAC_API_GROUP.to_string(),
                name: user.name.to_string(),
                namespace: approval.metadata.namespace.clone(),
            }
        };

        if !subjects.contains(&subject) {
            subjects.push(subject);
        }
    }
}

fn mail_vars(approval: &Approval) -> Vec<(&str, &str)> {
    let spec = &approval.spec;
    let sender = spec.sender.as_ref().map(|s| s.name.as_str()).unwrap_or("");
    let result = match approval.status.result {
        ApprovalResult::Approved => "approved",
        ApprovalResult::Rejected => "rejected",
        ApprovalResult::Awaiting => "awaiting",
        ApprovalResult::Error => "error",
    };
    vec![
        ("name", approval.metadata.name.as_str()),
        ("job_name", spec.job_name.as_str()),
        ("integration_job", spec.integration_job.as_str()),
        ("pipeline_run", spec.pipeline_run.as_str()),
        ("sender", sender),
        ("message", spec.message.as_str()),
        ("link", spec.link.as_str()),
        ("result", result),
        ("approver", approval.status.approver.as_str()),
        ("reason", approval.status.reason.as_str()),
    ]
}

#[async_trait]
impl Reconciler for ApprovalReconciler {
    type Object = Approval;

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let Some(mut approval) = self.client.approvals.find(key).await? else {
            return Ok(Action::Done);
        };
        let original = approval.status.clone();

        let mut request = approval
            .status
            .conditions
            .get_or_unknown(CONDITION_SENT_REQUEST_MAIL);
        let mut result = approval
            .status
            .conditions
            .get_or_unknown(CONDITION_SENT_RESULT_MAIL);

        let provisioned = match self.ensure_role(&approval).await {
            Ok(()) => self.ensure_role_binding(&approval).await,
            Err(e) => Err(e),
        };

        match provisioned {
            Err(e) => {
                warn!("Cannot grant approvers of {}: {}", key, e);
                approval.status.result = ApprovalResult::Error;
                approval.status.reason = e.to_string();
            }
            Ok(()) if !approval.spec.skip_send_mail => {
                if request.is_unknown() {
                    self.send_request_mail(&approval, &mut request).await;
                }

                if approval.status.result.is_decided() && result.is_unknown() {
                    if let Some(to) = approval.sender_email().map(str::to_string) {
                        self.send_result_mail(&approval, to, &mut result).await;
                    }
                }
            }
            Ok(()) => {}
        }

        approval.status.conditions.set(request);
        approval.status.conditions.set(result);

        if approval.status != original {
            self.client.approvals.patch(approval).await?;
        }
        Ok(Action::Done)
    }
}

/// Records `approver`'s decision on the stored approval.
///
/// # Errors
///
/// Returns [`OperatorError::Decision`](crate::error::OperatorError::Decision)
/// if the approval is already decided or `approver` is not requested, and a
/// store error if the approval does not exist or changed concurrently.
pub async fn decide_approval(
    store: &dyn ObjectStore<Approval>,
    key: &ObjectKey,
    approver: &str,
    decision: Decision,
    reason: &str,
) -> Result<Approval> {
    let mut approval = store.get(key).await?;
    approval.decide(approver, decision, reason, Utc::now())?;
    let approval = store.patch(approval).await?;
    info!(
        "Approval {} is {} by {}",
        key, approval.status.result, approver
    );
    Ok(approval)
}
