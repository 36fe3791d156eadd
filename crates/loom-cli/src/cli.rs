//! CLI command definitions using clap

use crate::output::OutputFormat;
use clap::{Args, Parser, Subcommand};
use loom_kernel::adapter::AdapterKind;
use loom_kernel::composition::CompositionStrategy;
use std::path::PathBuf;

/// Loom CLI - inspect adapter catalogs and dry-run composition plans
#[derive(Parser)]
#[command(name = "loom")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json, table)
    #[arg(short = 'o', long, global = true)]
    pub output: Option<OutputFormat>,

    /// Federation configuration file
    #[arg(short = 'c', long, global = true, env = "LOOM_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Adapter catalog inspection
    #[command(subcommand)]
    Catalog(CatalogCommands),

    /// Plan a composition without building it
    Plan(PlanArgs),

    /// Configuration inspection
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Catalog subcommands
#[derive(Subcommand)]
pub enum CatalogCommands {
    /// List the adapters of a catalog
    List {
        /// Catalog file (yaml, toml, json, ...)
        path: PathBuf,

        /// Only adapters compatible with this base model
        #[arg(short, long)]
        base: Option<String>,

        /// Only adapters of this kind
        #[arg(short, long)]
        kind: Option<AdapterKind>,

        /// Include every version, not only the latest
        #[arg(short, long)]
        all: bool,
    },

    /// Register a catalog and report rejected records
    Validate {
        /// Catalog file
        path: PathBuf,

        /// Fetch every artifact and check its checksum
        #[arg(long)]
        verify_artifacts: bool,

        /// Directory relative artifact paths resolve against
        #[arg(long)]
        artifact_root: Option<PathBuf>,
    },
}

/// Arguments of `loom plan`
#[derive(Args)]
pub struct PlanArgs {
    /// Catalog file
    #[arg(long)]
    pub catalog: PathBuf,

    #[arg(long, default_value = "cli")]
    pub tenant: String,

    #[arg(long)]
    pub retailer: String,

    #[arg(long)]
    pub brand: String,

    #[arg(long)]
    pub task: String,

    /// Base model id
    #[arg(long)]
    pub base: String,

    /// Force a composition strategy
    #[arg(long)]
    pub strategy: Option<CompositionStrategy>,

    /// Roles allowed to stay unresolved (repeatable)
    #[arg(long = "optional")]
    pub optional: Vec<AdapterKind>,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
}
