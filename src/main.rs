//! darts-search - Main Entry Point

use clap::Parser;
use darts_search::cli::{cmd_primitives, cmd_search, Cli, Commands};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "darts_search=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search(args) => cmd_search(&args)?,
        Commands::Primitives => cmd_primitives()?,
    }

    Ok(())
}
