use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::cron::CronRegistry;
use crate::api::job::{LABEL_CONFIG, LABEL_PERIODIC_JOB};
use crate::api::{generate_job, IntegrationJob, JobType, Object, ObjectKey};
use crate::error::Result;
use crate::store::Client;

/// Creates periodic jobs of one config when their schedule fires.
pub struct PeriodicTrigger {
    client: Client,
    config: ObjectKey,
    cron: CronRegistry,
}

impl PeriodicTrigger {
    pub fn new(client: Client, config: ObjectKey) -> Self {
        Self {
            client,
            config,
            cron: CronRegistry::new(),
        }
    }

    /// Polls every `tick` until cancelled.
    pub async fn run(mut self, tick: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if let Err(e) = self.tick(Utc::now()).await {
                warn!("Periodic trigger for {} failed: {}", self.config, e);
            }
        }
        info!("Periodic trigger for {} stopped", self.config);
    }

    /// One polling step. Returns the names of the created jobs.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let Some(config) = self.client.configs.find(&self.config).await? else {
            return Ok(Vec::new());
        };
        if config.metadata.deletion_timestamp.is_some() {
            return Ok(Vec::new());
        }

        if let Err(e) = self.cron.sync(&config.spec.jobs.periodic, now) {
            warn!("Invalid periodic schedule in {}: {}", self.config, e);
        }

        let fired = self.cron.queued_jobs(now);
        if fired.is_empty() {
            return Ok(Vec::new());
        }

        let existing: Vec<IntegrationJob> = self
            .client
            .jobs
            .list(&self.config.namespace)
            .await?
            .into_iter()
            .filter(|j| {
                j.metadata.labels.get(LABEL_CONFIG) == Some(&config.metadata.name)
            })
            .collect();

        let mut created = Vec::new();
        for name in fired {
            if let Some(latest) = latest_instance(&existing, &name) {
                if !latest.is_completed() {
                    info!(
                        "Skipping periodic job {} of {}: {} is still running",
                        name,
                        self.config,
                        latest.key()
                    );
                    continue;
                }
            }

            let job = generate_job(&config, JobType::Periodic, Some(&name))?;
            let job = self.client.jobs.create(job).await?;
            info!("Created periodic job {}", job.key());
            created.push(job.metadata.name);
        }

        Ok(created)
    }
}

fn latest_instance<'a>(jobs: &'a [IntegrationJob], periodic: &str) -> Option<&'a IntegrationJob> {
    jobs.iter()
        .filter(|j| j.metadata.labels.get(LABEL_PERIODIC_JOB).map(String::as_str) == Some(periodic))
        .max_by_key(|j| j.status.start_time.or(j.metadata.creation_timestamp))
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns one [`PeriodicTrigger`] task per config.
pub struct TriggerRegistry {
    client: Client,
    tick: Duration,
    triggers: Mutex<HashMap<ObjectKey, Running>>,
}

impl TriggerRegistry {
    pub fn new(client: Client, tick: Duration) -> Self {
        Self {
            client,
            tick,
            triggers: Mutex::new(HashMap::new()),
        }
    }

    /// Starts the config's trigger if it declares periodic jobs, stops it
    /// otherwise.
    pub async fn sync(&self, key: &ObjectKey, has_periodic: bool) {
        if !has_periodic {
            self.stop(key).await;
            return;
        }

        let mut triggers = self.triggers.lock().await;
        if triggers.get(key).is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let trigger = PeriodicTrigger::new(self.client.clone(), key.clone());
        let handle = tokio::spawn(trigger.run(self.tick, cancel.clone()));
        triggers.insert(key.clone(), Running { cancel, handle });
        info!("Started periodic trigger for {}", key);
    }

    /// Cancels the config's trigger and waits for it to exit.
    pub async fn stop(&self, key: &ObjectKey) {
        let running = self.triggers.lock().await.remove(key);
        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(e) = running.handle.await {
                warn!("Periodic trigger for {} did not stop cleanly: {}", key, e);
            }
        }
    }

    pub async fn is_running(&self, key: &ObjectKey) -> bool {
        self.triggers.lock().await.contains_key(key)
    }

    pub async fn shutdown(&self) {
        let keys: Vec<ObjectKey> = self.triggers.lock().await.keys().cloned().collect();
        for key in keys {
            self.stop(&key).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        IntegrationConfig, IntegrationConfigSpec, JobState, JobTask, ObjectMeta, Periodic,
    };
    use chrono::TimeZone;

    fn config(periodic: Vec<Periodic>) -> IntegrationConfig {
        let mut spec = IntegrationConfigSpec::default();
        spec.git.repository = "org/repo".to_string();
        spec.jobs.periodic = periodic;
        IntegrationConfig {
            metadata: ObjectMeta::new("default", "sample"),
            spec,
            status: Default::default(),
        }
    }

    fn every_minute(name: &str) -> Periodic {
        Periodic {
            cron: "@every 1m".to_string(),
            job: JobTask {
                name: name.to_string(),
                image: "alpine".to_string(),
                ..Default::default()
            },
        }
    }

    fn at(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, m, 0).unwrap()
    }

    async fn setup(periodic: Vec<Periodic>) -> (Client, PeriodicTrigger) {
        let client = Client::in_memory();
        client.configs.create(config(periodic)).await.unwrap();
        let trigger = PeriodicTrigger::new(client.clone(), ObjectKey::new("default", "sample"));
        (client, trigger)
    }

    mod tick {
        use super::*;

        #[tokio::test]
        async fn creates_job_when_schedule_fires() {
            let (client, mut trigger) = setup(vec![every_minute("nightly")]).await;

            assert!(trigger.tick(at(0)).await.unwrap().is_empty());
            let created = trigger.tick(at(1)).await.unwrap();

            assert_eq!(created.len(), 1);
            assert!(created[0].starts_with("sample-periodic-nightly-"));
            let jobs = client.jobs.list("default").await.unwrap();
            assert_eq!(jobs.len(), 1);
            assert_eq!(jobs[0].spec.config_ref.type_, JobType::Periodic);
        }

        #[tokio::test]
        async fn skips_while_previous_instance_is_unfinished() {
            let (client, mut trigger) = setup(vec![every_minute("nightly")]).await;
            trigger.tick(at(0)).await.unwrap();
            trigger.tick(at(1)).await.unwrap();

            let created = trigger.tick(at(2)).await.unwrap();

            assert!(created.is_empty());
            assert_eq!(client.jobs.list("default").await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn creates_again_after_previous_instance_completed() {
            let (client, mut trigger) = setup(vec![every_minute("nightly")]).await;
            trigger.tick(at(0)).await.unwrap();
            trigger.tick(at(1)).await.unwrap();
            let mut first = client.jobs.list("default").await.unwrap().remove(0);
            first.status.state = Some(JobState::Completed);
            first.status.completion_time = Some(at(1));
            client.jobs.patch(first).await.unwrap();

            let created = trigger.tick(at(2)).await.unwrap();

            assert_eq!(created.len(), 1);
            assert_eq!(client.jobs.list("default").await.unwrap().len(), 2);
        }

        #[tokio::test]
        async fn periodic_jobs_are_tracked_independently() {
            let (client, mut trigger) =
                setup(vec![every_minute("a"), every_minute("b")]).await;
            trigger.tick(at(0)).await.unwrap();

            let mut created = trigger.tick(at(1)).await.unwrap();
            created.sort();

            assert_eq!(created.len(), 2);
            assert_eq!(client.jobs.list("default").await.unwrap().len(), 2);
        }

        #[tokio::test]
        async fn missing_config_creates_nothing() {
            let client = Client::in_memory();
            let mut trigger = PeriodicTrigger::new(client.clone(), ObjectKey::new("default", "ghost"));

            assert!(trigger.tick(at(5)).await.unwrap().is_empty());
        }
    }

    mod registry {
        use super::*;

        #[tokio::test]
        async fn starts_and_stops_trigger() {
            let client = Client::in_memory();
            let registry = TriggerRegistry::new(client, Duration::from_millis(10));
            let key = ObjectKey::new("default", "sample");

            registry.sync(&key, true).await;
            assert!(registry.is_running(&key).await);

            registry.stop(&key).await;
            assert!(!registry.is_running(&key).await);
        }

        #[tokio::test]
        async fn sync_without_periodic_jobs_stops_trigger() {
            let client = Client::in_memory();
            let registry = TriggerRegistry::new(client, Duration::from_millis(10));
            let key = ObjectKey::new("default", "sample");
            registry.sync(&key, true).await;

            registry.sync(&key, false).await;

            assert!(!registry.is_running(&key).await);
        }

        #[tokio::test]
        async fn shutdown_stops_everything() {
            let client = Client::in_memory();
            let registry = TriggerRegistry::new(client, Duration::from_millis(10));
            let a = ObjectKey::new("default", "a");
            let b = ObjectKey::new("default", "b");
            registry.sync(&a, true).await;
            registry.sync(&b, true).await;

            registry.shutdown().await;

            assert!(!registry.is_running(&a).await);
            assert!(!registry.is_running(&b).await);
        }
    }
}
