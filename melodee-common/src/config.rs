//! Configuration loading and setting resolution
//!
//! Every tunable resolves in the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`MELODEE_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "MELODEE_CONFIG";

/// Environment variable naming the data root folder
pub const ROOT_ENV_VAR: &str = "MELODEE_ROOT";

/// Default number of scanner and processor workers
pub const DEFAULT_WORKERS: usize = 4;

/// Default ledger retention window
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Contents of `melodee.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Root folder for ledgers, staging, quarantine and the catalog database
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub scan: ScanSection,
    pub process: ProcessSection,
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[scan]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSection {
    pub workers: Option<usize>,
    pub output_dir: Option<PathBuf>,
    pub retention_days: Option<u32>,
}

/// `[process]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSection {
    pub workers: Option<usize>,
    /// Physical moves per second; unset or 0 disables rate limiting
    pub rate_limit: Option<u32>,
    pub staging_dir: Option<PathBuf>,
    pub quarantine_dir: Option<PathBuf>,
    /// Catalog database holding staging items, quarantine records and artists/albums/tracks
    pub database: Option<PathBuf>,
}

impl TomlConfig {
    /// Parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
    }

    /// Parse config text
    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Root folder resolved from the config file or the OS default
    pub fn root_folder(&self) -> PathBuf {
        resolve_root_folder(None, self)
    }
}

/// Load configuration for a binary
///
/// An explicitly named file (flag or `MELODEE_CONFIG`) must exist and parse.
/// The per-user default file is optional: when missing, compiled defaults are used.
pub fn load_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit {
        return TomlConfig::load(path);
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return TomlConfig::load(Path::new(&path));
        }
    }

    match default_config_path() {
        Some(path) if path.exists() => TomlConfig::load(&path),
        Some(path) => {
            debug!("No config file at {}, using defaults", path.display());
            Ok(TomlConfig::default())
        }
        None => {
            warn!("Could not determine config directory, using defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Per-user config file location (`~/.config/melodee/melodee.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("melodee").join("melodee.toml"))
}

/// Resolve the data root folder: CLI > `MELODEE_ROOT` > TOML > OS default
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("melodee"))
        .unwrap_or_else(|| PathBuf::from("./melodee_data"))
}

/// Resolve one setting through the CLI > ENV > TOML > default chain
///
/// Unparseable environment values are ignored with a warning rather than aborting.
pub fn resolve_setting<T>(cli: Option<T>, env_var: &str, toml: Option<T>, default: T) -> T
where
    T: FromStr,
{
    if let Some(value) = cli {
        return value;
    }

    if let Ok(raw) = std::env::var(env_var) {
        match raw.trim().parse::<T>() {
            Ok(value) => return value,
            Err(_) => warn!(env_var, value = %raw, "Ignoring unparseable environment setting"),
        }
    }

    toml.unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = TomlConfig::parse(
            r#"
            root_folder = "/srv/melodee"

            [logging]
            level = "debug"

            [scan]
            workers = 8
            retention_days = 30

            [process]
            rate_limit = 25
            staging_dir = "/srv/melodee/staging"
            "#,
        )
        .unwrap();

        assert_eq!(config.root_folder, Some(PathBuf::from("/srv/melodee")));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.scan.workers, Some(8));
        assert_eq!(config.scan.retention_days, Some(30));
        assert_eq!(config.process.rate_limit, Some(25));
        assert_eq!(config.process.workers, None);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TomlConfig::parse("").unwrap();
        assert_eq!(config, TomlConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_malformed_config_is_error() {
        assert!(TomlConfig::parse("[scan]\nworkers = \"many\"").is_err());
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let result = load_config(Some(Path::new("/nonexistent/melodee.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
