use anyhow::Result;
use clap::Parser;
use cicd_operator::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    cli.execute().await?;

    Ok(())
}
