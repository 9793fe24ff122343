//! Deployment configuration loading from file and environment variables.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use vellum_core::{CreateMode, DatabaseConfiguration, DatabaseError, Role, RoleSet, UpgradeMode};

use crate::pool::SqliteSettings;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Engine-independent database settings.
    #[serde(default)]
    pub database: DatabaseSection,

    /// SQLite file and connection settings.
    #[serde(default)]
    pub sqlite: SqliteConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The `[database]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    #[serde(default)]
    pub create: CreateMode,

    #[serde(default)]
    pub upgrade: UpgradeMode,

    /// Every role connections may be opened as.
    #[serde(default = "default_roles")]
    pub roles: Vec<Role>,

    /// Role for working connections.
    #[serde(default = "default_role_name")]
    pub default_role: String,

    /// Role that creates and upgrades the schema.
    #[serde(default = "default_role_name")]
    pub owner_role: String,
}

/// The `[sqlite]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Size of the working-connection pool; unset opens a fresh connection
    /// per session.
    #[serde(default)]
    pub pool_max_size: Option<u32>,

    #[serde(default = "default_true")]
    pub foreign_keys: bool,

    #[serde(default = "default_true")]
    pub wal: bool,
}

/// The `[logging]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "vellum_core=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_role_name() -> String {
    "owner".to_string()
}

fn default_roles() -> Vec<Role> {
    vec![Role::new(default_role_name(), "", "")]
}

fn default_db_path() -> PathBuf {
    PathBuf::from("vellum.db")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            create: CreateMode::default(),
            upgrade: UpgradeMode::default(),
            roles: default_roles(),
            default_role: default_role_name(),
            owner_role: default_role_name(),
        }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: None,
            foreign_keys: true,
            wal: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl DatabaseSection {
    /// Validates the section and builds the configuration the factory
    /// consumes.
    ///
    /// # Errors
    ///
    /// Returns `error-configuration` for duplicate role names or designated
    /// roles that are not listed.
    pub fn to_configuration(&self) -> Result<DatabaseConfiguration, DatabaseError> {
        let roles = RoleSet::from_roles(self.roles.iter().cloned())?;
        Ok(
            DatabaseConfiguration::new(roles, &self.default_role, &self.owner_role)?
                .with_create(self.create)
                .with_upgrade(self.upgrade),
        )
    }
}

impl SqliteConfig {
    pub fn settings(&self) -> SqliteSettings {
        SqliteSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            foreign_keys: self.foreign_keys,
            wal: self.wal,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `VELLUM_DB_PATH` overrides `sqlite.path`
/// - `VELLUM_LOG_LEVEL` overrides `logging.level`
/// - `VELLUM_LOG_JSON` overrides `logging.json` ("true" or "1" enables it)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Ok(db_path) = std::env::var("VELLUM_DB_PATH") {
        config.sqlite.path = PathBuf::from(db_path);
    }
    if let Ok(level) = std::env::var("VELLUM_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("VELLUM_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").expect("empty config should parse");

        assert_eq!(config.sqlite.path, PathBuf::from("vellum.db"));
        assert_eq!(config.sqlite.busy_timeout_ms, 5_000);
        assert_eq!(config.sqlite.pool_max_size, None);
        assert!(config.sqlite.wal);
        assert_eq!(config.logging.level, "info");

        let configuration = config
            .database
            .to_configuration()
            .expect("default roles should be valid");
        assert_eq!(configuration.owner_role().name, "owner");
        assert_eq!(configuration.default_role().name, "owner");
    }

    #[test]
    fn full_file_parses() {
        let config: Config = toml::from_str(
            r#"
            [database]
            create = "fail-if-missing"
            upgrade = "fail-instead-of-upgrading"
            default_role = "worker"
            owner_role = "owner"

            [[database.roles]]
            name = "owner"

            [[database.roles]]
            name = "worker"
            username = "app"
            password = "secret"

            [sqlite]
            path = "/var/lib/app/app.db"
            busy_timeout_ms = 250
            pool_max_size = 4
            foreign_keys = false

            [logging]
            level = "vellum_core=debug"
            json = true
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.sqlite.pool_max_size, Some(4));
        assert!(!config.sqlite.settings().foreign_keys);
        assert!(config.sqlite.settings().wal);
        assert!(config.logging.json);

        let configuration = config
            .database
            .to_configuration()
            .expect("roles should be valid");
        assert_eq!(configuration.create(), CreateMode::FailIfMissing);
        assert_eq!(configuration.upgrade(), UpgradeMode::FailInsteadOfUpgrading);
        assert_eq!(configuration.default_role().username, "app");
    }

    #[test]
    fn undeclared_designated_role_is_rejected() {
        let section = DatabaseSection {
            owner_role: "admin".to_string(),
            ..DatabaseSection::default()
        };
        let err = section
            .to_configuration()
            .expect_err("admin is not declared");
        assert_eq!(err.code(), "error-configuration");
    }

    #[test]
    fn environment_overrides_file_values() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("vellum.toml");
        std::fs::write(&path, "[logging]\nlevel = \"warn\"\njson = false\n")
            .expect("should write file");

        std::env::set_var("VELLUM_DB_PATH", "/srv/words.db");
        std::env::set_var("VELLUM_LOG_LEVEL", "debug");
        std::env::set_var("VELLUM_LOG_JSON", "1");
        let config = load_config(path.to_str());
        std::env::remove_var("VELLUM_DB_PATH");
        std::env::remove_var("VELLUM_LOG_LEVEL");
        std::env::remove_var("VELLUM_LOG_JSON");

        let config = config.expect("config should load");
        assert_eq!(config.sqlite.path, PathBuf::from("/srv/words.db"));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("absent.toml");

        let config = load_config(path.to_str()).expect("missing file should not fail");
        assert_eq!(config.sqlite.busy_timeout_ms, 5_000);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("vellum.toml");
        std::fs::write(&path, "[sqlite]\nbusy_timeout_ms = \"soon\"").expect("should write file");

        let err = load_config(path.to_str()).expect_err("bad value should fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
