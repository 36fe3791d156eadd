//! Configuration loading
//!
//! Federation settings can live in any of the formats the `config` crate
//! understands: YAML, TOML, JSON, INI, RON, JSON5.
//!
//! ## Features
//!
//! - Format detected from the file extension
//! - Environment variable substitution (`${VAR}` and `$VAR` syntax)
//! - Layering of several sources, later ones winning
//! - Prefixed environment overrides (`LOOM_CACHE__MEMORY_BUDGET_BYTES=...`)

use std::path::Path;

use config::{Config as Cfg, Environment, File};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::debug;

pub use config::FileFormat;

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

static BRACED_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex is valid")
});

static BARE_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("static regex is valid"));

/// Detect configuration format from file extension
///
/// # Supported Extensions
///
/// - YAML: `.yaml`, `.yml`
/// - TOML: `.toml`
/// - JSON: `.json`
/// - INI: `.ini`
/// - RON: `.ron`
/// - JSON5: `.json5`
pub fn detect_format(path: impl AsRef<Path>) -> ConfigResult<FileFormat> {
    let ext = path
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Substitute environment variables in a string
///
/// `${VAR}` is replaced first, then bare `$VAR`. Unset variables are left as
/// written so the parse error points at them.
pub fn substitute_env_vars(content: &str) -> String {
    let lookup = |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    };

    let braced = BRACED_VAR.replace_all(content, lookup);
    BARE_VAR.replace_all(&braced, lookup).into_owned()
}

fn read_source(path: &Path) -> ConfigResult<File<config::FileSourceString, FileFormat>> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    debug!(path = %path.display(), ?format, bytes = content.len(), "read config source");
    Ok(File::from_str(&substitute_env_vars(&content), format))
}

fn finish<T>(builder: config::ConfigBuilder<config::builder::DefaultState>) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let config = builder
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load configuration from a file, detecting its format from the extension.
///
/// # Example
///
/// ```rust,ignore
/// use loom_kernel::config::load_config;
///
/// let config: FederationConfig = load_config("loom.yaml")?;
/// ```
pub fn load_config<T>(path: impl AsRef<Path>) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    finish(Cfg::builder().add_source(read_source(path.as_ref())?))
}

/// Load configuration from a string with explicit format
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    finish(Cfg::builder().add_source(File::from_str(&substitute_env_vars(content), format)))
}

/// Merge multiple configuration sources
///
/// Later sources override earlier ones key by key.
pub fn merge_configs<T>(sources: &[(&str, FileFormat)]) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let mut builder = Cfg::builder();
    for (content, format) in sources {
        builder = builder.add_source(File::from_str(&substitute_env_vars(content), *format));
    }
    finish(builder)
}

/// Load several files, later files overriding earlier ones.
pub fn load_merged<T, P>(paths: &[P]) -> ConfigResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let mut builder = Cfg::builder();
    for path in paths {
        builder = builder.add_source(read_source(path.as_ref())?);
    }
    finish(builder)
}

/// Load a file, then apply environment overrides.
///
/// Variables are prefixed with `env_prefix` and use `__` for nesting, so
/// `LOOM_CACHE__BUCKETS=32` sets `cache.buckets`.
pub fn load_with_env<T>(path: impl AsRef<Path>, env_prefix: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    debug!(prefix = env_prefix, "applying environment overrides");
    finish(
        Cfg::builder()
            .add_source(read_source(path.as_ref())?)
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            ),
    )
}
