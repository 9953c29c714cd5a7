//! Outbound mail used by approvals and email tasks.

mod template;

use async_trait::async_trait;
use log::info;

use crate::error::Result;

pub use template::render;

/// Mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<()>;
}

/// Writes every mail to the log instead of delivering it.
#[derive(Debug, Clone, Default)]
pub struct LogMailer {
    sender: String,
}

impl LogMailer {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<()> {
        info!(
            "Mail from {} to [{}]: {}\n{}",
            self.sender,
            to.join(", "),
            subject,
            body
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Mutex, PoisonError};

    use super::*;
    use crate::error::OperatorError;

    #[derive(Debug, Clone, PartialEq)]
    pub struct SentMail {
        pub to: Vec<String>,
        pub subject: String,
        pub body: String,
    }

    /// Records mails; fails every send when `fail` is set.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<SentMail>>,
        pub fail: bool,
    }

    impl RecordingMailer {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn sent(&self) -> Vec<SentMail> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<()> {
            if self.fail {
                return Err(OperatorError::Mail("connection refused".to_string()));
            }
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(SentMail {
                    to: to.to_vec(),
                    subject: subject.to_string(),
                    body: body.to_string(),
                });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let mailer = LogMailer::new("ci@example.com");
        mailer
            .send(&["a@example.com".to_string()], "subject", "body")
            .await
            .unwrap();
    }
}
