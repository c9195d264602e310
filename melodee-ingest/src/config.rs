//! Settings resolution for the ingest binaries
//!
//! Every value resolves CLI flag > `MELODEE_*` environment variable > TOML
//! config > compiled default. Directory defaults live under the data root
//! folder (see [`melodee_common::config::resolve_root_folder`]).

use melodee_common::config::{
    resolve_root_folder, resolve_setting, TomlConfig, DEFAULT_RETENTION_DAYS, DEFAULT_WORKERS,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SCAN_WORKERS_ENV: &str = "MELODEE_SCAN_WORKERS";
pub const SCAN_OUTPUT_ENV: &str = "MELODEE_SCAN_OUTPUT";
pub const RETENTION_DAYS_ENV: &str = "MELODEE_RETENTION_DAYS";
pub const PROCESS_WORKERS_ENV: &str = "MELODEE_PROCESS_WORKERS";
pub const RATE_LIMIT_ENV: &str = "MELODEE_RATE_LIMIT";
pub const STAGING_DIR_ENV: &str = "MELODEE_STAGING_DIR";
pub const QUARANTINE_DIR_ENV: &str = "MELODEE_QUARANTINE_DIR";
pub const DATABASE_ENV: &str = "MELODEE_DATABASE";

/// Resolved settings for `scan-inbound`
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    /// Directory receiving `{scan_id}.db` ledgers
    pub output_dir: PathBuf,
    pub workers: usize,
    pub retention_days: u32,
}

impl ScanSettings {
    pub fn resolve(
        cli_output: Option<PathBuf>,
        cli_workers: Option<usize>,
        config: &TomlConfig,
    ) -> Self {
        let root = resolve_root_folder(None, config);
        Self {
            output_dir: resolve_setting(
                cli_output,
                SCAN_OUTPUT_ENV,
                config.scan.output_dir.clone(),
                root.join("scans"),
            ),
            workers: resolve_setting(cli_workers, SCAN_WORKERS_ENV, config.scan.workers, DEFAULT_WORKERS)
                .max(1),
            retention_days: resolve_setting(
                None,
                RETENTION_DAYS_ENV,
                config.scan.retention_days,
                DEFAULT_RETENTION_DAYS,
            ),
        }
    }

    /// Ledger retention window
    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60)
    }
}

/// Command-line overrides for `process-scan`
#[derive(Debug, Clone, Default)]
pub struct ProcessOverrides {
    pub staging_dir: Option<PathBuf>,
    pub quarantine_dir: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub workers: Option<usize>,
    pub rate_limit: Option<u32>,
}

/// Resolved settings for `process-scan`
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSettings {
    pub staging_dir: PathBuf,
    pub quarantine_dir: PathBuf,
    /// Catalog database; without one nothing is persisted
    pub database: Option<PathBuf>,
    pub workers: usize,
    /// Moves per second, `None` when unlimited
    pub rate_limit: Option<u32>,
}

impl ProcessSettings {
    pub fn resolve(overrides: ProcessOverrides, config: &TomlConfig) -> Self {
        let root = resolve_root_folder(None, config);

        let database = resolve_setting(
            overrides.database,
            DATABASE_ENV,
            config.process.database.clone(),
            PathBuf::new(),
        );
        let rate_limit = resolve_setting(overrides.rate_limit, RATE_LIMIT_ENV, config.process.rate_limit, 0);

        Self {
            staging_dir: resolve_setting(
                overrides.staging_dir,
                STAGING_DIR_ENV,
                config.process.staging_dir.clone(),
                root.join("staging"),
            ),
            quarantine_dir: resolve_setting(
                overrides.quarantine_dir,
                QUARANTINE_DIR_ENV,
                config.process.quarantine_dir.clone(),
                root.join("quarantine"),
            ),
            database: non_empty_path(database),
            workers: resolve_setting(
                overrides.workers,
                PROCESS_WORKERS_ENV,
                config.process.workers,
                DEFAULT_WORKERS,
            )
            .max(1),
            rate_limit: (rate_limit > 0).then_some(rate_limit),
        }
    }
}

fn non_empty_path(path: PathBuf) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}

/// Catalog database path for `melodee-staging`: flag > env > TOML > `{root}/melodee.db`
pub fn resolve_database(cli: Option<PathBuf>, config: &TomlConfig) -> PathBuf {
    let root = resolve_root_folder(None, config);
    resolve_setting(
        cli,
        DATABASE_ENV,
        config.process.database.clone(),
        default_database_path(&root),
    )
}

pub fn default_database_path(root: &Path) -> PathBuf {
    root.join("melodee.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            SCAN_WORKERS_ENV,
            SCAN_OUTPUT_ENV,
            RETENTION_DAYS_ENV,
            PROCESS_WORKERS_ENV,
            RATE_LIMIT_ENV,
            STAGING_DIR_ENV,
            QUARANTINE_DIR_ENV,
            DATABASE_ENV,
            melodee_common::config::ROOT_ENV_VAR,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_scan_defaults_under_root() {
        clear_env();
        let config = TomlConfig {
            root_folder: Some(PathBuf::from("/srv/melodee")),
            ..Default::default()
        };

        let settings = ScanSettings::resolve(None, None, &config);
        assert_eq!(settings.output_dir, PathBuf::from("/srv/melodee/scans"));
        assert_eq!(settings.workers, DEFAULT_WORKERS);
        assert_eq!(settings.retention_days, 90);
        assert_eq!(settings.retention(), Duration::from_secs(90 * 86_400));
    }

    #[test]
    #[serial]
    fn test_cli_beats_env_beats_toml() {
        clear_env();
        let mut config = TomlConfig::default();
        config.scan.workers = Some(2);

        assert_eq!(ScanSettings::resolve(None, None, &config).workers, 2);

        std::env::set_var(SCAN_WORKERS_ENV, "6");
        assert_eq!(ScanSettings::resolve(None, None, &config).workers, 6);
        assert_eq!(ScanSettings::resolve(None, Some(8), &config).workers, 8);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_process_settings() {
        clear_env();
        let mut config = TomlConfig {
            root_folder: Some(PathBuf::from("/data")),
            ..Default::default()
        };

        let settings = ProcessSettings::resolve(ProcessOverrides::default(), &config);
        assert_eq!(settings.staging_dir, PathBuf::from("/data/staging"));
        assert_eq!(settings.quarantine_dir, PathBuf::from("/data/quarantine"));
        assert_eq!(settings.database, None);
        assert_eq!(settings.rate_limit, None);

        config.process.rate_limit = Some(25);
        config.process.database = Some(PathBuf::from("/data/catalog.db"));
        let settings = ProcessSettings::resolve(
            ProcessOverrides {
                staging_dir: Some(PathBuf::from("/fast/staging")),
                ..Default::default()
            },
            &config,
        );
        assert_eq!(settings.staging_dir, PathBuf::from("/fast/staging"));
        assert_eq!(settings.database, Some(PathBuf::from("/data/catalog.db")));
        assert_eq!(settings.rate_limit, Some(25));

        std::env::set_var(RATE_LIMIT_ENV, "0");
        let settings = ProcessSettings::resolve(ProcessOverrides::default(), &config);
        assert_eq!(settings.rate_limit, None);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_resolve_database_default() {
        clear_env();
        let config = TomlConfig {
            root_folder: Some(PathBuf::from("/data")),
            ..Default::default()
        };
        assert_eq!(resolve_database(None, &config), PathBuf::from("/data/melodee.db"));
        assert_eq!(
            resolve_database(Some(PathBuf::from("/tmp/x.db")), &config),
            PathBuf::from("/tmp/x.db")
        );
    }
}
