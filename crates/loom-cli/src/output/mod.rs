//! Output formatting for CLI commands

mod table;

pub use table::Table;

use serde::Serialize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output for automation
    Json,
    /// Table-formatted output
    Table,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::Table => write!(f, "table"),
        }
    }
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Render serializable rows as a table. Column order follows the first row.
pub fn print_table<T: Serialize>(rows: &[T]) -> anyhow::Result<()> {
    let json = serde_json::to_value(rows)?;
    if let Some(arr) = json.as_array() {
        println!("{}", Table::from_json_array(arr));
    }
    Ok(())
}
