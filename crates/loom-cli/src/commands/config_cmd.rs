//! `loom config` command implementation

use loom_foundation::FederationConfig;

use crate::output::{OutputFormat, print_json};

/// Execute the `loom config show` command
pub fn run_show(config: &FederationConfig, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(config),
        OutputFormat::Text | OutputFormat::Table => {
            print!("{}", serde_yaml::to_string(config)?);
            Ok(())
        }
    }
}
