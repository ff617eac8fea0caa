use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use evolution_chat::app::{self, AppConfig};

#[derive(Parser, Debug)]
#[command(name = "evolution-chat", about = "Terminal chat client for an Evolution WhatsApp gateway")]
struct Cli {
    /// Config file (defaults to <config dir>/evolution-chat.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a config template and exit
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.init {
        let path = match cli.config {
            Some(path) => path,
            None => AppConfig::default_path().context("no config directory on this platform")?,
        };
        AppConfig::load_from(&path)?.save_to(&path)?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    let config = AppConfig::load(cli.config.as_deref()).context("loading config")?;
    app::run(config).await
}
