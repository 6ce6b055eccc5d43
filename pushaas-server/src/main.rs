use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cli;
mod commands;
mod config;
mod db;

use cli::{Args, Mode};
use config::ServerConfig;

/// Initialize tracing with dual output:
/// 1. Console output (stderr)
/// 2. File output (~/.pushaas/server.log)
fn initialize_tracing() -> Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "info,\
         pushaas_server=debug,\
         pushaas_orchestrations=debug,\
         sqlx::query=warn"
            .into()
    });

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let pushaas_dir = PathBuf::from(home).join(".pushaas");
    std::fs::create_dir_all(&pushaas_dir).ok();

    let file_appender = tracing_appender::rolling::never(&pushaas_dir, "server.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops file logging
    std::mem::forget(guard);

    let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);
    let console_layer = fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    initialize_tracing()?;

    match args.mode {
        Mode::Standalone { port, workers } => {
            commands::server::run_standalone_mode(ServerConfig::load()?, port, workers).await
        }
        Mode::Api { port } => commands::server::run_api_mode(ServerConfig::load()?, port).await,
        Mode::Worker { workers } => {
            commands::server::run_worker_mode(ServerConfig::load()?, workers).await
        }
        Mode::Create {
            name,
            plan,
            team,
            user,
        } => commands::instance::run_create(&args.api_url, name, plan, team, user).await,
        Mode::Delete { name } => commands::instance::run_delete(&args.api_url, name).await,
        Mode::Status { name } => commands::instance::run_status(&args.api_url, name).await,
        Mode::List { output } => commands::instance::run_list(&args.api_url, output).await,
    }
}
