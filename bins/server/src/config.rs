use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use telemetry_engine::ServiceSettings;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "apollo-server", about = "Spacecraft journey telemetry service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml", env = "APOLLO_CONFIG")]
    pub config: String,

    /// Page cursor signing secret; overrides `[cursor] secret`
    #[arg(long, env = "APOLLO_CURSOR_SECRET", hide_env_values = true)]
    pub cursor_secret: Option<String>,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest accepted ingest body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub cursor: CursorConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Refuse to start on a store that cannot show a client its own
    /// acknowledged writes on the next query.
    #[serde(default)]
    pub require_read_your_writes: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            store_timeout_ms: default_store_timeout_ms(),
            require_read_your_writes: false,
        }
    }
}

impl QueryConfig {
    pub fn settings(&self) -> ServiceSettings {
        ServiceSettings {
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            require_read_your_writes: self.require_read_your_writes,
        }
    }
}

/// Replicas behind one load balancer must share the secret, otherwise a
/// cursor minted by one is rejected by the others.
#[derive(Debug, Default, Deserialize)]
pub struct CursorConfig {
    pub secret: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Default, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Backend-specific table, e.g. `data_dir` for the file backend.
    #[serde(default)]
    pub config: Option<toml::Table>,
}

impl StoreConfig {
    /// Decode `[store.config]` into the backend's own config type.
    pub fn backend_config<T: DeserializeOwned>(&self) -> Result<T, ServerError> {
        let table = self.config.clone().unwrap_or_default();
        toml::Value::Table(table).try_into().map_err(|e| ServerError::Config {
            context: "store.config",
            detail: e.to_string(),
        })
    }
}

fn default_api_port() -> u16 {
    9200
}
fn default_bind() -> String {
    "0.0.0.0".into()
}
fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}
fn default_page_size() -> usize {
    telemetry_engine::DEFAULT_PAGE_SIZE
}
fn default_max_page_size() -> usize {
    telemetry_engine::MAX_PAGE_SIZE
}
fn default_store_timeout_ms() -> u64 {
    5000
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path).map_err(|e| ServerError::Config {
            context: "read",
            detail: format!("'{path}': {e}"),
        })?;
        Self::parse(&content).map_err(|e| match e {
            ServerError::Config { context, detail } => ServerError::Config {
                context,
                detail: format!("'{path}': {detail}"),
            },
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, ServerError> {
        toml::from_str(content).map_err(|e| ServerError::Config {
            context: "parse",
            detail: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage_file::FileStoreConfig;

    #[test]
    fn empty_file_gives_defaults() {
        let config = ServerConfig::parse("").unwrap();
        assert_eq!(config.api_port, 9200);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.max_body_bytes, 4 * 1024 * 1024);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.cursor.secret.is_none());

        let settings = config.query.settings();
        assert_eq!(settings.default_page_size, 10);
        assert_eq!(settings.max_page_size, 1000);
        assert_eq!(settings.store_timeout, Duration::from_secs(5));
        assert!(!settings.require_read_your_writes);
    }

    #[test]
    fn file_backend_with_options() {
        let config = ServerConfig::parse(
            r#"
            api_port = 8080

            [query]
            max_page_size = 200
            require_read_your_writes = true

            [cursor]
            secret = "shared-between-replicas"

            [store]
            backend = "file"

            [store.config]
            data_dir = "/var/lib/apollo"
            buffer_records = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.query.max_page_size, 200);
        assert_eq!(config.query.default_page_size, 10);
        assert!(config.query.require_read_your_writes);
        assert_eq!(config.cursor.secret.as_deref(), Some("shared-between-replicas"));
        assert_eq!(config.store.backend, StoreBackend::File);

        let file: FileStoreConfig = config.store.backend_config().unwrap();
        assert_eq!(file.data_dir, std::path::PathBuf::from("/var/lib/apollo"));
        assert_eq!(file.buffer_records, 0);
    }

    #[test]
    fn file_backend_without_data_dir_is_a_config_error() {
        let config = ServerConfig::parse("[store]\nbackend = \"file\"\n").unwrap();
        let res: Result<FileStoreConfig, _> = config.store.backend_config();
        assert!(matches!(res, Err(ServerError::Config { context: "store.config", .. })));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let res = ServerConfig::parse("[store]\nbackend = \"cassandra\"\n");
        assert!(matches!(res, Err(ServerError::Config { context: "parse", .. })));
    }
}
