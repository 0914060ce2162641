use anyhow::{Context, Result};
use clap::Parser;
use notebox::cli::{Cli, Commands};
use notebox::commands;
use notebox_core::{DataStore, StoreConfig};
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    // RUST_LOG wins over the command-line flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = StoreConfig::load(&cli.data_dir)
        .await
        .with_context(|| format!("Failed to load configuration from {}", cli.data_dir.display()))?;
    debug!(?config, "Opening data store");

    let mut store = DataStore::open(&config);
    store.init().await.context("Failed to open data store")?;

    let result = match cli.command {
        Commands::Unit(args) => commands::handle_unit(args, &mut store).await,
        Commands::Folder(args) => commands::handle_folder(args, &mut store).await,
        Commands::Note(args) => commands::handle_note(args, &mut store).await,
        Commands::Tags { unit } => commands::handle_tags(&unit, &store),
    };

    store.close();
    result
}
