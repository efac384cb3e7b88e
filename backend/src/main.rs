//! Backup Keeper - Main Entry Point

use clap::Parser;

use backup_keeper_backend::{cli, config::Config, error::Result, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    telemetry::init_tracing(&config.log_level);

    let args = cli::KeeperCli::parse();
    tracing::debug!(command = ?args.command, store = %config.store_path, "Starting Backup Keeper");

    cli::run(args, config).await
}
