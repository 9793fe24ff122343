//! Server address settings for the PostgreSQL engine.

use serde::Deserialize;

/// The `[postgres]` section of a deployment file.
///
/// Credentials are not part of this section; they come from the role a
/// connection is opened as.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    /// Reported to the server as `application_name`.
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "vellum".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            application_name: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}
