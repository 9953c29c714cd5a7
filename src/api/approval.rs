use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::condition::Conditions;
use super::meta::{impl_object, ObjectMeta};
use crate::error::{OperatorError, Result};

pub const CONDITION_SENT_REQUEST_MAIL: &str = "SentRequestMail";
pub const CONDITION_SENT_RESULT_MAIL: &str = "SentResultMail";

pub const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ApprovalResult {
    #[default]
    Awaiting,
    Approved,
    Rejected,
    Error,
}

impl ApprovalResult {
    pub fn is_decided(&self) -> bool {
        matches!(self, ApprovalResult::Approved | ApprovalResult::Rejected)
    }
}

impl fmt::Display for ApprovalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalResult::Awaiting => "Awaiting",
            ApprovalResult::Approved => "Approved",
            ApprovalResult::Rejected => "Rejected",
            ApprovalResult::Error => "Error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    fn result(&self) -> ApprovalResult {
        match self {
            Decision::Approve => ApprovalResult::Approved,
            Decision::Reject => ApprovalResult::Rejected,
        }
    }
}

/// An entry of `spec.users`: `name`, `name=email`, or a service account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalUser<'a> {
    pub name: &'a str,
    pub email: Option<&'a str>,
}

impl<'a> ApprovalUser<'a> {
    pub fn parse(raw: &'a str) -> Self {
        match raw.split_once('=') {
            Some((name, email)) if !email.is_empty() => Self {
                name,
                email: Some(email),
            },
            Some((name, _)) => Self { name, email: None },
            None => Self {
                name: raw,
                email: None,
            },
        }
    }

    /// `(namespace, name)` for `system:serviceaccount:<ns>:<name>` entries.
    /// `None` for plain users and for malformed service-account strings.
    pub fn service_account(&self) -> Option<(&'a str, &'a str)> {
        let rest = self.name.strip_prefix(SERVICE_ACCOUNT_PREFIX)?;
        let mut parts = rest.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => Some((ns, name)),
            _ => None,
        }
    }

    pub fn is_service_account(&self) -> bool {
        self.name.starts_with(SERVICE_ACCOUNT_PREFIX)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalSender {
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalSpec {
    pub users: Vec<String>,
    #[serde(default)]
    pub skip_send_mail: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<ApprovalSender>,
    #[serde(default)]
    pub integration_job: String,
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub pipeline_run: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub link: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalStatus {
    #[serde(default)]
    pub result: ApprovalResult,
    #[serde(default)]
    pub approver: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Conditions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub metadata: ObjectMeta,
    pub spec: ApprovalSpec,
    #[serde(default)]
    pub status: ApprovalStatus,
}

impl_object!(Approval, "Approval");

impl Approval {
    pub fn users(&self) -> impl Iterator<Item = ApprovalUser<'_>> {
        self.spec.users.iter().map(|u| ApprovalUser::parse(u))
    }

    pub fn is_approver(&self, user: &str) -> bool {
        self.users().any(|u| u.name == user)
    }

    /// Email addresses of the requested approvers.
    pub fn approver_emails(&self) -> Vec<String> {
        self.users()
            .filter_map(|u| u.email.map(str::to_string))
            .collect()
    }

    /// Address the result mail goes to, if any.
    pub fn sender_email(&self) -> Option<&str> {
        self.spec
            .sender
            .as_ref()
            .map(|s| s.email.as_str())
            .filter(|e| !e.is_empty())
    }

    /// Records `approver`'s decision.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::Decision`] if the approval is not awaiting a
    /// decision or `approver` is not one of the requested users.
    pub fn decide(
        &mut self,
        approver: &str,
        decision: Decision,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.status.result != ApprovalResult::Awaiting {
            return Err(OperatorError::Decision(format!(
                "approval {} is already in {} status",
                self.metadata.key(),
                self.status.result
            )));
        }
        if !self.is_approver(approver) {
            return Err(OperatorError::Decision(format!(
                "approval {} is not requested to {}",
                self.metadata.key(),
                approver
            )));
        }

        self.status.result = decision.result();
        self.status.approver = approver.to_string();
        self.status.reason = reason.to_string();
        self.status.decision_time = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approval(users: &[&str]) -> Approval {
        Approval {
            metadata: ObjectMeta::new("default", "approve-deploy"),
            spec: ApprovalSpec {
                users: users.iter().map(|u| u.to_string()).collect(),
                ..Default::default()
            },
            status: ApprovalStatus::default(),
        }
    }

    mod approval_user {
        use super::*;

        #[test]
        fn parses_name_and_email() {
            let user = ApprovalUser::parse("alice=alice@example.com");
            assert_eq!(user.name, "alice");
            assert_eq!(user.email, Some("alice@example.com"));
        }

        #[test]
        fn parses_plain_name() {
            let user = ApprovalUser::parse("bob");
            assert_eq!(user.name, "bob");
            assert_eq!(user.email, None);
        }

        #[test]
        fn splits_service_account() {
            let user = ApprovalUser::parse("system:serviceaccount:ci:deployer");
            assert_eq!(user.service_account(), Some(("ci", "deployer")));
        }

        #[test]
        fn rejects_malformed_service_account() {
            let user = ApprovalUser::parse("system:serviceaccount:only-namespace");
            assert!(user.is_service_account());
            assert_eq!(user.service_account(), None);

            let user = ApprovalUser::parse("system:serviceaccount:a:b:c");
            assert_eq!(user.service_account(), None);
        }
    }

    mod decide {
        use super::*;

        #[test]
        fn records_decision_of_listed_user() {
            let mut a = approval(&["alice=alice@example.com"]);
            let now = Utc::now();

            a.decide("alice", Decision::Approve, "looks good", now).unwrap();

            assert_eq!(a.status.result, ApprovalResult::Approved);
            assert_eq!(a.status.approver, "alice");
            assert_eq!(a.status.reason, "looks good");
            assert_eq!(a.status.decision_time, Some(now));
        }

        #[test]
        fn rejects_unlisted_user() {
            let mut a = approval(&["alice"]);

            let result = a.decide("mallory", Decision::Approve, "", Utc::now());

            assert!(result.is_err());
            assert_eq!(a.status.result, ApprovalResult::Awaiting);
        }

        #[test]
        fn rejects_second_decision() {
            let mut a = approval(&["alice", "bob"]);
            a.decide("alice", Decision::Reject, "no", Utc::now()).unwrap();

            let result = a.decide("bob", Decision::Approve, "yes", Utc::now());

            assert!(result.is_err());
            assert_eq!(a.status.result, ApprovalResult::Rejected);
            assert_eq!(a.status.approver, "alice");
        }
    }

    #[test]
    fn approver_emails_skips_users_without_address() {
        let a = approval(&["alice=alice@example.com", "bob", "carol=carol@example.com"]);
        assert_eq!(
            a.approver_emails(),
            vec!["alice@example.com".to_string(), "carol@example.com".to_string()]
        );
    }
}
