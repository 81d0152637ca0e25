// sheetbotd: spreadsheet-driven notification bot.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use sheetbot_daemon::config::{default_config_path, BotConfig, EnvConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sheetbotd", version, about = "Spreadsheet-driven notification bot")]
struct Cli {
    /// Config file (default: ~/.sheetbot/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let env = EnvConfig::from_env();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&env.log_filter)).init();

    let path = cli
        .config
        .or_else(default_config_path)
        .context("cannot determine config path: no home directory")?;
    let config = BotConfig::load_from(&path)
        .with_context(|| format!("failed to load config `{}`", path.display()))?;

    info!(config = %path.display(), "starting sheetbot daemon");
    sheetbot_daemon::runtime::run(config, env).await.context("sheetbot daemon terminated")
}
