//! Loom CLI - inspect adapter catalogs and dry-run composition plans

mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{CatalogCommands, Cli, Commands, ConfigCommands};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = cli.output.unwrap_or_default();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Catalog(CatalogCommands::List { path, base, kind, all }) => {
            commands::catalog::run_list(&path, base.as_deref(), kind, all, format)?;
        }
        Commands::Catalog(CatalogCommands::Validate {
            path,
            verify_artifacts,
            artifact_root,
        }) => {
            commands::catalog::run_validate(&config, &path, verify_artifacts, artifact_root, format)
                .await?;
        }
        Commands::Plan(args) => {
            commands::plan::run(&config, &args, format)?;
        }
        Commands::Config(ConfigCommands::Show) => {
            commands::config_cmd::run_show(&config, format)?;
        }
    }
    Ok(())
}
