//! Runs every controller of the operator against one [`Client`].

use std::sync::Arc;

use futures::future::join_all;
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::JobCollector;
use crate::config::OperatorConfig;
use crate::controllers::{
    ApprovalReconciler, ConfigReconciler, Controller, CustomRunReconciler, JobReconciler,
    Reconciler,
};
use crate::git::{DefaultGitClientFactory, GitClientFactory};
use crate::mail::{LogMailer, Mailer};
use crate::periodic::TriggerRegistry;
use crate::pipeline::{DefaultPipelineManager, PipelineManager};
use crate::scheduler::Scheduler;
use crate::store::{Client, ObjectStore};

pub struct Operator {
    client: Client,
    config: Arc<OperatorConfig>,
    mailer: Arc<dyn Mailer>,
    git: Arc<dyn GitClientFactory>,
    manager: Arc<dyn PipelineManager>,
}

impl Operator {
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        let mailer = Arc::new(LogMailer::new(config.mail.sender.clone()));
        Self {
            client,
            config: Arc::new(config),
            mailer,
            git: Arc::new(DefaultGitClientFactory),
            manager: Arc::new(DefaultPipelineManager::new()),
        }
    }

    fn controller<R: Reconciler>(
        &self,
        reconciler: R,
        store: Arc<dyn ObjectStore<R::Object>>,
    ) -> Controller<R> {
        Controller::new(
            Arc::new(reconciler),
            store,
            self.config.resync_period(),
            self.config.error_backoff(),
        )
    }

    /// Runs until `shutdown` is cancelled, then waits for every task and
    /// periodic trigger to stop.
    pub async fn run(self, shutdown: CancellationToken) {
        let client = &self.client;
        let config = &self.config;
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let scheduler = Scheduler::new(
            client.clone(),
            Arc::clone(&self.manager),
            config.max_pipeline_run,
        );
        tasks.extend(scheduler.start(config.scheduling_gap(), shutdown.clone()));

        let triggers = Arc::new(TriggerRegistry::new(client.clone(), config.periodic_tick()));

        let configs = self
            .controller(
                ConfigReconciler::new(
                    client.clone(),
                    Arc::clone(&self.git),
                    Arc::clone(&triggers),
                    Arc::clone(config),
                ),
                Arc::clone(&client.configs),
            )
            .owns(Arc::clone(&client.secrets))
            .owns(Arc::clone(&client.service_accounts));
        tasks.push(tokio::spawn(configs.run(shutdown.clone())));

        let jobs = self
            .controller(
                JobReconciler::new(
                    client.clone(),
                    Arc::clone(&scheduler),
                    Arc::clone(&self.manager),
                ),
                Arc::clone(&client.jobs),
            )
            .owns(Arc::clone(&client.pipeline_runs));
        tasks.push(tokio::spawn(jobs.run(shutdown.clone())));

        let approvals = self
            .controller(
                ApprovalReconciler::new(
                    client.clone(),
                    Arc::clone(&self.mailer),
                    Arc::clone(config),
                ),
                Arc::clone(&client.approvals),
            )
            .owns(Arc::clone(&client.roles))
            .owns(Arc::clone(&client.role_bindings));
        tasks.push(tokio::spawn(approvals.run(shutdown.clone())));

        let custom_runs = self
            .controller(
                CustomRunReconciler::with_default_handlers(
                    client.clone(),
                    Arc::clone(&self.mailer),
                    Arc::clone(config),
                ),
                Arc::clone(&client.custom_runs),
            )
            .owns(Arc::clone(&client.approvals));
        tasks.push(tokio::spawn(custom_runs.run(shutdown.clone())));

        let collector = JobCollector::new(client.clone(), config.job_ttl());
        tasks.push(tokio::spawn(collector.run(config.gc_period(), shutdown.clone())));

        info!("Operator started with {} tasks", tasks.len());
        shutdown.cancelled().await;

        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!("Operator task ended abnormally: {}", e);
            }
        }
        triggers.shutdown().await;
        info!("Operator stopped");
    }
}

/// Returns a token cancelled on the first SIGTERM or SIGINT.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
#[cfg(unix)]
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    use tokio::signal::unix::{signal, SignalKind};

    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
        cancel.cancel();
    });

    Ok(token)
}

#[cfg(not(unix))]
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
        }
        cancel.cancel();
    });
    Ok(token)
}
