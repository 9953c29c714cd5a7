use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// A typed, independently updatable piece of an object's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(type_: &str, status: ConditionStatus) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: String::new(),
            message: String::new(),
            last_transition_time: None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    pub fn is_false(&self) -> bool {
        self.status == ConditionStatus::False
    }

    pub fn is_unknown(&self) -> bool {
        self.status == ConditionStatus::Unknown
    }

    pub fn set(&mut self, status: ConditionStatus, reason: &str, message: &str) {
        self.status = status;
        self.reason = reason.to_string();
        self.message = message.to_string();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    /// Returns the condition, or a new one with `Unknown` status.
    pub fn get_or_unknown(&self, type_: &str) -> Condition {
        self.get(type_)
            .cloned()
            .unwrap_or_else(|| Condition::new(type_, ConditionStatus::Unknown))
    }

    /// Inserts or replaces the condition with the same type. Returns whether
    /// anything changed. The transition time moves only when the status does.
    pub fn set(&mut self, mut condition: Condition) -> bool {
        match self.0.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status
                    && existing.reason == condition.reason
                    && existing.message == condition.message
                {
                    return false;
                }
                condition.last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time
                } else {
                    Some(Utc::now())
                };
                *existing = condition;
                true
            }
            None => {
                condition.last_transition_time = Some(Utc::now());
                self.0.push(condition);
                true
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod set {
        use super::*;

        #[test]
        fn inserts_new_condition() {
            let mut conditions = Conditions::default();

            let changed = conditions.set(Condition::new("Ready", ConditionStatus::True));

            assert!(changed);
            assert!(conditions.get("Ready").is_some_and(Condition::is_true));
            assert!(conditions
                .get("Ready")
                .and_then(|c| c.last_transition_time)
                .is_some());
        }

        #[test]
        fn reports_no_change_for_identical_condition() {
            let mut conditions = Conditions::default();
            conditions.set(Condition::new("Ready", ConditionStatus::False));

            let changed = conditions.set(Condition::new("Ready", ConditionStatus::False));

            assert!(!changed);
            assert_eq!(conditions.len(), 1);
        }

        #[test]
        fn keeps_transition_time_when_only_reason_changes() {
            let mut conditions = Conditions::default();
            conditions.set(Condition::new("Ready", ConditionStatus::False));
            let first = conditions.get("Ready").and_then(|c| c.last_transition_time);

            let mut updated = Condition::new("Ready", ConditionStatus::False);
            updated.reason = "SomethingElse".to_string();
            assert!(conditions.set(updated));

            let second = conditions.get("Ready").and_then(|c| c.last_transition_time);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn get_or_unknown_defaults_missing_condition() {
        let conditions = Conditions::default();
        let cond = conditions.get_or_unknown("SentRequestMail");
        assert!(cond.is_unknown());
        assert_eq!(cond.type_, "SentRequestMail");
    }
}
