use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::{Action, Reconciler};
use crate::api::integration_config::{CONDITION_READY, CONDITION_WEBHOOK_REGISTERED};
use crate::api::job::FINALIZER;
use crate::api::resources::{
    BASIC_AUTH_PASSWORD_KEY, BASIC_AUTH_USERNAME_KEY, GIT_HOST_ANNOTATION,
};
use crate::api::{
    Condition, ConditionStatus, IntegrationConfig, Object, ObjectKey, ObjectMeta, Secret,
    SecretType, ServiceAccount,
};
use crate::auth::Token;
use crate::config::OperatorConfig;
use crate::error::{OperatorError, Result};
use crate::git::{resolve_token, GitClientFactory, GitError};
use crate::periodic::TriggerRegistry;
use crate::store::Client;
use crate::utils::random_string;

const SECRET_LEN: usize = 20;

pub mod reason {
    pub const NO_GIT_TOKEN: &str = "NoGitToken";
    pub const RATE_LIMITED: &str = "RateLimited";
    pub const WEBHOOK_REGISTER_FAILED: &str = "WebhookRegisterFailed";
    pub const SECRET_NOT_SET: &str = "SecretNotSet";
    pub const WEBHOOK_NOT_REGISTERED: &str = "WebhookNotRegistered";
    pub const CANNOT_CREATE_GIT_SECRET: &str = "CannotCreateGitSecret";
    pub const CANNOT_CREATE_SERVICE_ACCOUNT: &str = "CannotCreateServiceAccount";
}

/// Registers the config's webhook, provisions its credentials and keeps its
/// periodic trigger in sync.
pub struct ConfigReconciler {
    client: Client,
    git: Arc<dyn GitClientFactory>,
    triggers: Arc<TriggerRegistry>,
    config: Arc<OperatorConfig>,
}

impl ConfigReconciler {
    pub fn new(
        client: Client,
        git: Arc<dyn GitClientFactory>,
        triggers: Arc<TriggerRegistry>,
        config: Arc<OperatorConfig>,
    ) -> Self {
        Self {
            client,
            git,
            triggers,
            config,
        }
    }

    /// Sets `WebhookRegistered`. Returns a requeue delay while rate limited.
    async fn ensure_webhook(
        &self,
        config: &mut IntegrationConfig,
        token: &Result<Option<Token>>,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let current = config
            .status
            .conditions
            .get_or_unknown(CONDITION_WEBHOOK_REGISTERED);
        if current.is_true() {
            return None;
        }
        if let Some(reset) = config.status.rate_limit_reset.filter(|r| *r > now) {
            debug!(
                "Webhook registration of {} is rate limited until {}",
                config.key(),
                reset
            );
            return Some(remaining(reset, now));
        }

        let mut condition = Condition::new(CONDITION_WEBHOOK_REGISTERED, ConditionStatus::False);
        let mut requeue = None;
        match token {
            Err(e) => {
                warn!("Cannot read git token of {}: {}", config.key(), e);
                condition.set(
                    ConditionStatus::False,
                    reason::WEBHOOK_REGISTER_FAILED,
                    &e.to_string(),
                );
            }
            Ok(None) => {
                condition.set(
                    ConditionStatus::False,
                    reason::NO_GIT_TOKEN,
                    "git token is not configured, skipping webhook registration",
                );
            }
            Ok(Some(token)) => match self.register_webhook(config, token.clone()).await {
                Ok(()) => {
                    info!("Webhook of {} is registered", config.key());
                    condition.set(ConditionStatus::True, "", "");
                    config.status.rate_limit_reset = None;
                }
                Err(OperatorError::Git(GitError::RateLimited { reset_at })) => {
                    let message = GitError::RateLimited { reset_at }.to_string();
                    warn!("Registering webhook of {}: {}", config.key(), message);
                    condition.set(ConditionStatus::False, reason::RATE_LIMITED, &message);
                    config.status.rate_limit_reset = reset_at;
                    requeue = Some(match reset_at {
                        Some(reset) => remaining(reset, now),
                        None => self.config.resync_period(),
                    });
                }
                Err(e) => {
                    warn!("Failed to register webhook of {}: {}", config.key(), e);
                    condition.set(
                        ConditionStatus::False,
                        reason::WEBHOOK_REGISTER_FAILED,
                        &e.to_string(),
                    );
                }
            },
        }

        config.status.conditions.set(condition);
        requeue
    }

    async fn register_webhook(&self, config: &IntegrationConfig, token: Token) -> Result<()> {
        let git = self.git.client(&config.spec.git, token)?;
        let url = config.webhook_url(&self.config.external_hostname);

        let hooks = git.list_webhooks().await?;
        if hooks.iter().any(|h| h.url == url) {
            debug!("Webhook {} of {} already exists", url, config.key());
            return Ok(());
        }

        git.register_webhook(&url, &config.status.secrets).await?;
        Ok(())
    }

    async fn delete_webhooks(&self, config: &IntegrationConfig) -> Result<()> {
        let Some(token) = resolve_token(config, self.client.secrets.as_ref()).await? else {
            return Ok(());
        };
        let git = self.git.client(&config.spec.git, token)?;
        let url = config.webhook_url(&self.config.external_hostname);

        for hook in git.list_webhooks().await?.into_iter().filter(|h| h.url == url) {
            match git.delete_webhook(hook.id).await {
                Ok(()) => info!("Deleted webhook {} of {}", hook.id, config.key()),
                Err(e) => warn!(
                    "Failed to delete webhook {} of {}: {}",
                    hook.id,
                    config.key(),
                    e
                ),
            }
        }
        Ok(())
    }

    /// Basic-auth credentials the pipeline engine uses to clone the repository.
    async fn ensure_git_secret(&self, config: &IntegrationConfig, password: &str) -> Result<()> {
        let host = config.spec.git.git_host()?;
        let mut desired = Secret::new(ObjectMeta::new(
            &config.metadata.namespace,
            config.git_secret_name(),
        ));
        desired.type_ = SecretType::BasicAuth;
        desired
            .metadata
            .annotations
            .insert(GIT_HOST_ANNOTATION.to_string(), host);
        desired.metadata.owner_references.push(config.owner_reference());
        desired.data.insert(
            BASIC_AUTH_USERNAME_KEY.to_string(),
            self.config.git_bot_username.clone(),
        );
        desired
            .data
            .insert(BASIC_AUTH_PASSWORD_KEY.to_string(), password.to_string());

        match self.client.secrets.find(&desired.key()).await? {
            None => {
                let created = self.client.secrets.create(desired).await?;
                info!("Created git credential {}", created.key());
            }
            Some(mut current) => {
                let annotation = desired.metadata.annotations.get(GIT_HOST_ANNOTATION);
                if current.type_ != desired.type_
                    || current.data != desired.data
                    || current.metadata.annotations.get(GIT_HOST_ANNOTATION) != annotation
                {
                    current.type_ = desired.type_;
                    current.data = desired.data;
                    current.metadata.annotations.extend(desired.metadata.annotations);
                    let patched = self.client.secrets.patch(current).await?;
                    info!("Updated git credential {}", patched.key());
                }
            }
        }
        Ok(())
    }

    async fn ensure_service_account(&self, config: &IntegrationConfig) -> Result<()> {
        let key = ObjectKey::new(&config.metadata.namespace, config.service_account_name());
        let secret = config.git_secret_name();

        match self.client.service_accounts.find(&key).await? {
            None => {
                let mut metadata = ObjectMeta::new(&key.namespace, &key.name);
                metadata.owner_references.push(config.owner_reference());
                self.client
                    .service_accounts
                    .create(ServiceAccount {
                        metadata,
                        secrets: vec![secret],
                    })
                    .await?;
                info!("Created service account {}", key);
            }
            Some(mut account) if !account.secrets.contains(&secret) => {
                account.secrets.push(secret);
                self.client.service_accounts.patch(account).await?;
                info!("Added git credential to service account {}", key);
            }
            Some(_) => {}
        }
        Ok(())
    }

    async fn finalize(&self, mut config: IntegrationConfig) -> Result<()> {
        let key = config.key();
        if config.spec.git.has_token() {
            if let Err(e) = self.delete_webhooks(&config).await {
                warn!("Failed to delete webhooks of {}: {}", key, e);
            }
        }

        self.triggers.stop(&key).await;

        config.metadata.remove_finalizer(FINALIZER);
        self.client.configs.patch(config).await?;
        info!("Finalized IntegrationConfig {}", key);
        Ok(())
    }
}

fn remaining(until: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (until - now).to_std().unwrap_or(Duration::ZERO)
}

#[async_trait]
impl Reconciler for ConfigReconciler {
    type Object = IntegrationConfig;

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let Some(mut config) = self.client.configs.find(key).await? else {
            return Ok(Action::Done);
        };

        // Terminating objects never get the finalizer back
        if config.metadata.deletion_timestamp.is_some() {
            if config.metadata.has_finalizer(FINALIZER) {
                self.finalize(config).await?;
            }
            return Ok(Action::Done);
        }

        if !config.metadata.has_finalizer(FINALIZER) {
            config.metadata.finalizers.push(FINALIZER.to_string());
            self.client.configs.patch(config).await?;
            debug!("Added finalizer to IntegrationConfig {}", key);
            return Ok(Action::Done);
        }

        let original = config.status.clone();
        let now = Utc::now();

        if config.status.secrets.is_empty() {
            config.status.secrets = random_string(SECRET_LEN);
        }

        let token = resolve_token(&config, self.client.secrets.as_ref()).await;
        let requeue = self.ensure_webhook(&mut config, &token, now).await;

        let webhook = config
            .status
            .conditions
            .get_or_unknown(CONDITION_WEBHOOK_REGISTERED);
        let mut ready = Condition::new(CONDITION_READY, ConditionStatus::True);
        if config.status.secrets.is_empty() {
            ready.set(
                ConditionStatus::False,
                reason::SECRET_NOT_SET,
                "webhook secret is not set",
            );
        } else if !webhook.is_true() && webhook.reason != reason::NO_GIT_TOKEN {
            ready.set(
                ConditionStatus::False,
                reason::WEBHOOK_NOT_REGISTERED,
                &webhook.message,
            );
        }

        let password = match &token {
            Ok(Some(token)) => token.as_str().to_string(),
            _ => String::new(),
        };
        if let Err(e) = self.ensure_git_secret(&config, &password).await {
            warn!("Cannot provision git credential of {}: {}", key, e);
            ready.set(
                ConditionStatus::False,
                reason::CANNOT_CREATE_GIT_SECRET,
                &e.to_string(),
            );
        }
        if let Err(e) = self.ensure_service_account(&config).await {
            warn!("Cannot provision service account of {}: {}", key, e);
            ready.set(
                ConditionStatus::False,
                reason::CANNOT_CREATE_SERVICE_ACCOUNT,
                &e.to_string(),
            );
        }
        config.status.conditions.set(ready);

        let has_periodic = !config.spec.jobs.periodic.is_empty();
        if config.status != original {
            self.client.configs.patch(config).await?;
        }

        self.triggers.sync(key, has_periodic).await;

        Ok(requeue.map_or(Action::Done, Action::RequeueAfter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{GitConfig, GitToken, IntegrationConfigSpec, JobTask, Periodic};
    use crate::git::{GitClient, GitResult, WebhookEntry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};

    #[derive(Default)]
    struct FakeGitClient {
        hooks: Mutex<Vec<WebhookEntry>>,
        registered: AtomicUsize,
        rate_limit: Mutex<Option<Option<DateTime<Utc>>>>,
    }

    impl FakeGitClient {
        fn hooks(&self) -> Vec<WebhookEntry> {
            self.hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        fn limit(&self, reset_at: Option<DateTime<Utc>>) {
            *self.rate_limit.lock().unwrap() = Some(reset_at);
        }
    }

    #[async_trait]
    impl GitClient for FakeGitClient {
        async fn list_webhooks(&self) -> GitResult<Vec<WebhookEntry>> {
            Ok(self.hooks())
        }

        async fn register_webhook(&self, url: &str, _secret: &str) -> GitResult<()> {
            if let Some(reset_at) = *self.rate_limit.lock().unwrap() {
                return Err(GitError::RateLimited { reset_at });
            }
            let id = self.registered.fetch_add(1, Ordering::SeqCst) as u64 + 1;
            self.hooks.lock().unwrap().push(WebhookEntry {
                id,
                url: url.to_string(),
            });
            Ok(())
        }

        async fn delete_webhook(&self, id: u64) -> GitResult<()> {
            self.hooks.lock().unwrap().retain(|h| h.id != id);
            Ok(())
        }
    }

    struct FakeFactory {
        git: Arc<FakeGitClient>,
        calls: AtomicUsize,
    }

    impl GitClientFactory for FakeFactory {
        fn client(&self, _git: &GitConfig, _token: Token) -> GitResult<Arc<dyn GitClient>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let git: Arc<dyn GitClient> = self.git.clone();
            Ok(git)
        }
    }

    struct Fixture {
        client: Client,
        git: Arc<FakeGitClient>,
        factory: Arc<FakeFactory>,
        triggers: Arc<TriggerRegistry>,
        reconciler: ConfigReconciler,
    }

    fn fixture() -> Fixture {
        let client = Client::in_memory();
        let git = Arc::new(FakeGitClient::default());
        let factory = Arc::new(FakeFactory {
            git: Arc::clone(&git),
            calls: AtomicUsize::new(0),
        });
        let triggers = Arc::new(TriggerRegistry::new(
            client.clone(),
            Duration::from_secs(3600),
        ));
        let reconciler = ConfigReconciler::new(
            client.clone(),
            factory.clone(),
            Arc::clone(&triggers),
            Arc::new(OperatorConfig::default()),
        );
        Fixture {
            client,
            git,
            factory,
            triggers,
            reconciler,
        }
    }

    fn sample(token: Option<&str>) -> IntegrationConfig {
        let mut spec = IntegrationConfigSpec::default();
        spec.git.repository = "org/repo".to_string();
        spec.git.token = token.map(|t| GitToken {
            value: Some(t.to_string()),
            value_from: None,
        });
        IntegrationConfig {
            metadata: ObjectMeta::new("default", "sample"),
            spec,
            status: Default::default(),
        }
    }

    fn key() -> ObjectKey {
        ObjectKey::new("default", "sample")
    }

    async fn stored(f: &Fixture) -> IntegrationConfig {
        f.client.configs.get(&key()).await.unwrap()
    }

    fn condition(config: &IntegrationConfig, type_: &str) -> Condition {
        config.status.conditions.get_or_unknown(type_)
    }

    #[tokio::test]
    async fn first_pass_only_adds_finalizer() {
        let f = fixture();
        f.client.configs.create(sample(Some("abc"))).await.unwrap();

        let action = f.reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(action, Action::Done);
        let config = stored(&f).await;
        assert!(config.metadata.has_finalizer(FINALIZER));
        assert!(config.status.secrets.is_empty());
        assert_eq!(f.factory.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.git.registered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn registers_webhook_and_provisions_credentials() {
        let f = fixture();
        f.client.configs.create(sample(Some("abc"))).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();

        f.reconciler.reconcile(&key()).await.unwrap();

        let config = stored(&f).await;
        assert_eq!(config.status.secrets.len(), SECRET_LEN);
        assert!(condition(&config, CONDITION_WEBHOOK_REGISTERED).is_true());
        assert!(condition(&config, CONDITION_READY).is_true());
        assert_eq!(
            f.git.hooks()[0].url,
            "http://localhost:24335/webhook/default/sample"
        );

        let secret = f
            .client
            .secrets
            .get(&ObjectKey::new("default", "sample-git-credential"))
            .await
            .unwrap();
        assert_eq!(secret.type_, SecretType::BasicAuth);
        assert_eq!(secret.data[BASIC_AUTH_USERNAME_KEY], "tmax-cicd-bot");
        assert_eq!(secret.data[BASIC_AUTH_PASSWORD_KEY], "abc");
        assert_eq!(
            secret.metadata.annotations[GIT_HOST_ANNOTATION],
            "https://github.com"
        );
        assert!(secret.metadata.is_owned_by("IntegrationConfig", "sample"));

        let account = f
            .client
            .service_accounts
            .get(&ObjectKey::new("default", "sample-sa"))
            .await
            .unwrap();
        assert_eq!(account.secrets, vec!["sample-git-credential"]);
    }

    #[tokio::test]
    async fn later_passes_keep_secret_and_skip_registration() {
        let f = fixture();
        f.client.configs.create(sample(Some("abc"))).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();
        let secret = stored(&f).await.status.secrets;
        let version = stored(&f).await.metadata.resource_version;

        f.reconciler.reconcile(&key()).await.unwrap();

        let config = stored(&f).await;
        assert_eq!(config.status.secrets, secret);
        assert_eq!(config.metadata.resource_version, version);
        assert_eq!(f.git.registered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn existing_remote_webhook_is_not_duplicated() {
        let f = fixture();
        f.git.hooks.lock().unwrap().push(WebhookEntry {
            id: 7,
            url: "http://localhost:24335/webhook/default/sample".to_string(),
        });
        f.client.configs.create(sample(Some("abc"))).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();

        f.reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(f.git.registered.load(Ordering::SeqCst), 0);
        assert!(condition(&stored(&f).await, CONDITION_WEBHOOK_REGISTERED).is_true());
    }

    #[tokio::test]
    async fn rate_limit_requeues_until_reset() {
        let f = fixture();
        let reset = Utc::now() + chrono::Duration::seconds(60);
        f.git.limit(Some(reset));
        f.client.configs.create(sample(Some("abc"))).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();

        let action = f.reconciler.reconcile(&key()).await.unwrap();

        let Action::RequeueAfter(delay) = action else {
            panic!("expected a requeue, got {action:?}");
        };
        assert!(delay <= Duration::from_secs(60));
        assert!(delay > Duration::from_secs(50));
        let config = stored(&f).await;
        let webhook = condition(&config, CONDITION_WEBHOOK_REGISTERED);
        assert_eq!(webhook.reason, reason::RATE_LIMITED);
        assert_eq!(config.status.rate_limit_reset, Some(reset));
        assert!(condition(&config, CONDITION_READY).is_false());

        // No new attempt before the reset time
        let calls = f.factory.calls.load(Ordering::SeqCst);
        let action = f.reconciler.reconcile(&key()).await.unwrap();
        assert!(matches!(action, Action::RequeueAfter(_)));
        assert_eq!(f.factory.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn rate_limit_without_reset_uses_resync_period() {
        let f = fixture();
        f.git.limit(None);
        f.client.configs.create(sample(Some("abc"))).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();

        let action = f.reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(action, Action::RequeueAfter(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn missing_token_skips_webhook_but_is_ready() {
        let f = fixture();
        f.client.configs.create(sample(None)).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();

        f.reconciler.reconcile(&key()).await.unwrap();

        let config = stored(&f).await;
        let webhook = condition(&config, CONDITION_WEBHOOK_REGISTERED);
        assert!(webhook.is_false());
        assert_eq!(webhook.reason, reason::NO_GIT_TOKEN);
        assert!(condition(&config, CONDITION_READY).is_true());
        assert_eq!(f.factory.calls.load(Ordering::SeqCst), 0);

        let secret = f
            .client
            .secrets
            .get(&ObjectKey::new("default", "sample-git-credential"))
            .await
            .unwrap();
        assert_eq!(secret.data[BASIC_AUTH_PASSWORD_KEY], "");
    }

    #[tokio::test]
    async fn invalid_api_url_fails_git_secret_only() {
        let f = fixture();
        let mut config = sample(None);
        config.spec.git.api_url = "not a url".to_string();
        f.client.configs.create(config).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();

        f.reconciler.reconcile(&key()).await.unwrap();

        let config = stored(&f).await;
        let ready = condition(&config, CONDITION_READY);
        assert!(ready.is_false());
        assert_eq!(ready.reason, reason::CANNOT_CREATE_GIT_SECRET);
        assert!(f
            .client
            .service_accounts
            .find(&ObjectKey::new("default", "sample-sa"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn service_account_keeps_existing_secrets() {
        let f = fixture();
        f.client
            .service_accounts
            .create(ServiceAccount {
                metadata: ObjectMeta::new("default", "sample-sa"),
                secrets: vec!["registry".to_string()],
            })
            .await
            .unwrap();
        f.client.configs.create(sample(None)).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();

        f.reconciler.reconcile(&key()).await.unwrap();

        let account = f
            .client
            .service_accounts
            .get(&ObjectKey::new("default", "sample-sa"))
            .await
            .unwrap();
        assert_eq!(account.secrets, vec!["registry", "sample-git-credential"]);
    }

    #[tokio::test]
    async fn periodic_jobs_start_the_trigger() {
        let f = fixture();
        let mut config = sample(None);
        config.spec.jobs.periodic.push(Periodic {
            cron: "@every 1h".to_string(),
            job: JobTask {
                name: "nightly".to_string(),
                ..Default::default()
            },
        });
        f.client.configs.create(config).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();

        f.reconciler.reconcile(&key()).await.unwrap();

        assert!(f.triggers.is_running(&key()).await);
        f.triggers.shutdown().await;
    }

    #[tokio::test]
    async fn deletion_removes_webhook_trigger_and_finalizer() {
        let f = fixture();
        let mut config = sample(Some("abc"));
        config.spec.jobs.periodic.push(Periodic {
            cron: "@every 1h".to_string(),
            job: JobTask {
                name: "nightly".to_string(),
                ..Default::default()
            },
        });
        f.client.configs.create(config).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(f.git.hooks().len(), 1);

        f.client.configs.delete(&key()).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();

        assert!(f.git.hooks().is_empty());
        assert!(!f.triggers.is_running(&key()).await);
        assert!(f.client.configs.find(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminating_config_is_finalized_once() {
        let f = fixture();
        let mut config = sample(Some("abc"));
        config.metadata.finalizers.push("other.io/keep".to_string());
        f.client.configs.create(config).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();
        f.reconciler.reconcile(&key()).await.unwrap();
        f.client.configs.delete(&key()).await.unwrap();

        f.reconciler.reconcile(&key()).await.unwrap();
        let finalized = stored(&f).await;
        let clients = f.factory.calls.load(Ordering::SeqCst);
        for _ in 0..3 {
            let action = f.reconciler.reconcile(&key()).await.unwrap();
            assert_eq!(action, Action::Done);
        }

        let config = stored(&f).await;
        assert_eq!(config.metadata.finalizers, vec!["other.io/keep"]);
        assert!(config.metadata.deletion_timestamp.is_some());
        assert_eq!(
            config.metadata.resource_version,
            finalized.metadata.resource_version
        );
        assert_eq!(f.factory.calls.load(Ordering::SeqCst), clients);
        assert!(f.git.hooks().is_empty());
    }

    #[tokio::test]
    async fn missing_config_is_done() {
        let f = fixture();

        let action = f.reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(action, Action::Done);
    }
}
