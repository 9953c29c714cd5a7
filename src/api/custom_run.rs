use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::condition::Conditions;
use super::meta::{impl_object, ObjectMeta};
use crate::error::{OperatorError, Result};

pub const KIND_APPROVAL: &str = "Approval";
pub const KIND_EMAIL: &str = "Email";

pub mod param {
    pub const APPROVERS: &str = "approvers";
    pub const MESSAGE: &str = "message";
    pub const INTEGRATION_JOB: &str = "integration-job";
    pub const JOB_NAME: &str = "job-name";
    pub const SENDER_NAME: &str = "sender-name";
    pub const SENDER_EMAIL: &str = "sender-email";
    pub const LINK: &str = "link";
    pub const RECEIVERS: &str = "receivers";
    pub const TITLE: &str = "title";
    pub const CONTENT: &str = "content";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Array(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: ParamValue,
}

impl Param {
    pub fn string(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: ParamValue::String(value.into()),
        }
    }

    pub fn array(name: &str, values: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            value: ParamValue::Array(values),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomRunSpec {
    pub kind: String,
    #[serde(default)]
    pub params: Vec<Param>,
}

impl CustomRunSpec {
    fn find(&self, key: &str) -> Result<&ParamValue> {
        self.params
            .iter()
            .find(|p| p.name == key)
            .map(|p| &p.value)
            .ok_or_else(|| OperatorError::InvalidParameter(format!("there is no param {key} for run")))
    }

    pub fn string_param(&self, key: &str) -> Result<&str> {
        match self.find(key)? {
            ParamValue::String(s) => Ok(s),
            ParamValue::Array(_) => Err(OperatorError::InvalidParameter(format!(
                "parameter {key} is expected to be a string, got an array"
            ))),
        }
    }

    pub fn array_param(&self, key: &str) -> Result<&[String]> {
        match self.find(key)? {
            ParamValue::Array(v) => Ok(v),
            ParamValue::String(_) => Err(OperatorError::InvalidParameter(format!(
                "parameter {key} is expected to be an array, got a string"
            ))),
        }
    }

    /// Like [`string_param`](Self::string_param), but an absent param is empty.
    pub fn optional_string_param(&self, key: &str) -> &str {
        self.string_param(key).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRunStatus {
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomRun {
    pub metadata: ObjectMeta,
    pub spec: CustomRunSpec,
    #[serde(default)]
    pub status: CustomRunStatus,
}

impl_object!(CustomRun, "CustomRun");

impl CustomRun {
    pub fn is_completed(&self) -> bool {
        self.status.completion_time.is_some()
    }
}
