use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use log::info;
use std::path::PathBuf;

use crate::auth::Token;
use crate::client::{default_token_path, read_token_file, ApiClient};
use crate::config::OperatorConfig;
use crate::manifests;
use crate::operator::{install_shutdown_handler, Operator};
use crate::store::Client;

#[derive(Parser)]
#[command(name = "cicd-operator")]
#[command(author, version, about = "CI/CD job controller and client", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Connection settings shared by the client subcommands.
#[derive(Args, Debug, Clone)]
struct Connection {
    /// Base URL of the operator API server
    #[arg(short, long, env = "CICD_SERVER", default_value = "http://localhost:24335")]
    server: String,

    /// Bearer token; falls back to the token file in the user config dir
    #[arg(short, long, env = "CICD_TOKEN")]
    token: Option<String>,

    #[arg(short, long, env = "CICD_NAMESPACE", default_value = "default")]
    namespace: String,
}

impl Connection {
    fn client(&self) -> Result<ApiClient> {
        let token = match &self.token {
            Some(token) => Some(Token::from(token.as_str())),
            None => match default_token_path() {
                Some(path) => read_token_file(&path)
                    .with_context(|| format!("Failed to read token file: {}", path.display()))?,
                None => None,
            },
        };
        Ok(ApiClient::new(&self.server, &self.namespace, token)?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the controllers until SIGTERM or SIGINT
    Controller {
        /// Operator configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Manifest file or directory loaded into the store at startup
        #[arg(short, long)]
        manifests: Option<PathBuf>,
    },

    /// Triggers jobs of an IntegrationConfig
    Run {
        #[command(subcommand)]
        kind: RunKind,

        #[command(flatten)]
        connection: Connection,
    },

    /// Approves an Approval
    Approve {
        approval: String,
        reason: String,

        #[command(flatten)]
        connection: Connection,
    },

    /// Rejects an Approval
    Reject {
        approval: String,
        reason: String,

        #[command(flatten)]
        connection: Connection,
    },

    /// Shows the webhook URL and secret of an IntegrationConfig
    Webhook {
        config: String,

        #[command(flatten)]
        connection: Connection,
    },
}

#[derive(Subcommand)]
enum RunKind {
    /// Triggers preSubmit jobs for a pull request
    Pre {
        config: String,

        #[arg(long)]
        head_branch: String,

        #[arg(long, default_value = "")]
        base_branch: String,
    },

    /// Triggers postSubmit jobs for a push
    Post {
        config: String,

        #[arg(long, default_value = "")]
        branch: String,
    },
}

impl Cli {
    async fn execute_controller(
        &self,
        config: Option<&std::path::Path>,
        manifest_path: Option<&std::path::Path>,
    ) -> Result<()> {
        let settings = OperatorConfig::load(config)?;
        let client = Client::in_memory();

        if let Some(path) = manifest_path {
            let loaded = manifests::load_path(path)
                .with_context(|| format!("Failed to load manifests: {}", path.display()))?;
            manifests::apply(&client, loaded).await?;
        }

        let shutdown = install_shutdown_handler().context("Failed to install signal handlers")?;
        info!("Starting controller");
        Operator::new(client, settings).run(shutdown).await;
        Ok(())
    }

    async fn execute_run(&self, kind: &RunKind, connection: &Connection) -> Result<()> {
        let client = connection.client()?;
        let (config, label) = match kind {
            RunKind::Pre {
                config,
                head_branch,
                base_branch,
            } => {
                client.run_pre(config, head_branch, base_branch).await?;
                (config, "pre")
            }
            RunKind::Post { config, branch } => {
                client.run_post(config, branch).await?;
                (config, "post")
            }
        };

        println!(
            "{} Triggered {} jobs for IntegrationConfig {}/{}",
            style("✓").green(),
            label,
            client.namespace(),
            style(config).bold()
        );
        Ok(())
    }

    async fn execute_decision(
        &self,
        approve: bool,
        approval: &str,
        reason: &str,
        connection: &Connection,
    ) -> Result<()> {
        let client = connection.client()?;
        let verb = if approve {
            client.approve(approval, reason).await?;
            "Approved"
        } else {
            client.reject(approval, reason).await?;
            "Rejected"
        };

        println!(
            "{} {} Approval {}/{}",
            style("✓").green(),
            verb,
            client.namespace(),
            style(approval).bold()
        );
        Ok(())
    }

    async fn execute_webhook(&self, config: &str, connection: &Connection) -> Result<()> {
        let info = connection.client()?.webhook_info(config).await?;

        println!("{}\t: {}", style("Webhook URL").cyan(), info.url);
        println!("{}\t: {}", style("Webhook Secret").cyan(), info.secret);
        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Controller { config, manifests } => {
                self.execute_controller(config.as_deref(), manifests.as_deref())
                    .await
            }
            Commands::Run { kind, connection } => self.execute_run(kind, connection).await,
            Commands::Approve {
                approval,
                reason,
                connection,
            } => {
                self.execute_decision(true, approval, reason, connection)
                    .await
            }
            Commands::Reject {
                approval,
                reason,
                connection,
            } => {
                self.execute_decision(false, approval, reason, connection)
                    .await
            }
            Commands::Webhook { config, connection } => {
                self.execute_webhook(config, connection).await
            }
        }
    }
}
