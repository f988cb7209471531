use anyhow::Result;
use clap::{Parser, Subcommand};
use fedstream_backend::api;
use fedstream_backend::config::FedstreamConfig;
use fedstream_backend::database::Database;
use fedstream_backend::federation::registry::PeerRegistry;
use fedstream_backend::telemetry;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about = "Fedstream federation node daemon")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (Axum) for the REST/federation API
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let args = Args::parse();

    let config = FedstreamConfig::from_env()?;
    let database = Database::connect(&config.paths)?;
    database.ensure_migrations()?;

    let registry = Arc::new(PeerRegistry::from_file(
        &config.paths.peers_path,
        api::build_http_client(&config)?,
    )?);
    tracing::info!(
        peers = registry.all_peers().len(),
        public_url = %config.public_url,
        "bootstrap complete"
    );

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => api::serve_http(config, database, registry).await,
    }
}
