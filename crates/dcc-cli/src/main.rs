//! `dcc` binary: serve the interaction webhook, run migrations, or
//! refresh the problem catalog once and exit.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dcc_bot::{serve, Bot, BotConfig, DiscordMessenger, Messenger};
use dcc_engine::{ChallengeEngine, PgEngine};
use dcc_judge::{JudgeClient, JudgeConfig, LeetCodeClient};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "dcc", about = "Daily coding challenge bot", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Run migrations, register commands, broadcast today's problems,
    /// and serve the interaction webhook (the default).
    Serve,
    /// Apply pending database migrations and exit.
    Migrate,
    /// Refresh the problem catalog from the judge and exit.
    Refresh,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = BotConfig::from_env();

    match cli.command.unwrap_or(CliCommand::Serve) {
        CliCommand::Serve => run_serve(config).await,
        CliCommand::Migrate => run_migrate(config).await,
        CliCommand::Refresh => run_refresh(config).await,
    }
}

async fn run_serve(config: BotConfig) -> anyhow::Result<()> {
    let engine = connect_engine(&config).await?;
    engine.migrate().await.context("running migrations")?;

    let judge = LeetCodeClient::new(JudgeConfig::default()).context("building judge client")?;
    let messenger = DiscordMessenger::new(&config).context("building messenger")?;
    let bot = Bot::new(
        Arc::new(engine) as Arc<dyn ChallengeEngine>,
        Arc::new(judge) as Arc<dyn JudgeClient>,
        Arc::new(messenger) as Arc<dyn Messenger>,
        config,
    );

    bot.startup().await?;

    let scheduler = bot.build_broadcast_scheduler().await?;
    scheduler.start().await.context("starting scheduler")?;
    info!(cron = %bot.config().broadcast_cron, "broadcast scheduler running");

    serve(bot).await
}

async fn run_migrate(config: BotConfig) -> anyhow::Result<()> {
    let engine = connect_engine(&config).await?;
    engine.migrate().await.context("running migrations")?;
    info!("migrations applied");
    Ok(())
}

async fn run_refresh(config: BotConfig) -> anyhow::Result<()> {
    let engine = connect_engine(&config).await?;
    engine.migrate().await.context("running migrations")?;

    let judge = LeetCodeClient::new(JudgeConfig::default()).context("building judge client")?;
    let messenger = DiscordMessenger::new(&config).context("building messenger")?;
    let bot = Bot::new(
        Arc::new(engine) as Arc<dyn ChallengeEngine>,
        Arc::new(judge) as Arc<dyn JudgeClient>,
        Arc::new(messenger) as Arc<dyn Messenger>,
        config,
    );
    let upserted = bot.refresh_catalog().await?;
    info!(upserted, "catalog refresh complete");
    Ok(())
}

async fn connect_engine(config: &BotConfig) -> anyhow::Result<PgEngine> {
    PgEngine::connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))
}
