//! cmdbus CLI
//!
//! Operator tooling for the action log database

use clap::{Parser, Subcommand};
use cmdbus_core::logging_facility;
use cmdbus_engine::EngineConfig;
use std::path::PathBuf;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "cmdbus")]
#[command(about = "cmdbus - command execution audit log tooling", long_about = None)]
struct Cli {
    /// Engine config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path; overrides the config file and CMDBUS_DB_PATH
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Inspect action log entries
    Log(commands::log::LogArgs),
}

fn main() {
    let cli = Cli::parse();

    let result = resolve_config(&cli).and_then(|config| {
        logging_facility::init(config.logging.profile);
        match cli.command {
            Commands::Migrate => commands::migrate::execute(&config),
            Commands::Log(args) => commands::log::execute(args, config),
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn resolve_config(cli: &Cli) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default().with_env_overrides(),
    };
    if let Some(db) = &cli.db {
        config.store.path = Some(db.clone());
    }
    Ok(config)
}
