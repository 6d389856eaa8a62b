//! Application settings and configuration

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::storage::CopySource;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseSettings,
    /// Ingestion pipeline configuration
    #[serde(default)]
    pub loader: LoaderSettings,
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum number of connections in the pool.
    ///
    /// When unset the pool is sized to 75% of the server's `max_connections`.
    #[serde(default)]
    pub max_connections: Option<u32>,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_database_url() -> String {
    database_url_from_env().unwrap_or_else(|| "postgresql://localhost/stockgame".into())
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: None,
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }
}

/// Ingestion pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderSettings {
    /// Directory holding one `<SYMBOL>.csv` file per symbol
    #[serde(default = "default_prices_dir")]
    pub prices_dir: PathBuf,
    /// Symbol metadata CSV (12 columns)
    #[serde(default = "default_metadata_file")]
    pub metadata_file: PathBuf,
    /// Preprocessing worker count (defaults to twice the CPU count)
    #[serde(default)]
    pub workers: Option<usize>,
    /// Upper bound on simultaneous bulk loads
    #[serde(default = "default_max_concurrent_loads")]
    pub max_concurrent_loads: usize,
    /// Where the COPY statement reads cleaned files from
    #[serde(default)]
    pub copy_source: CopySource,
}

fn default_prices_dir() -> PathBuf {
    PathBuf::from("./data/raw/stocks")
}

fn default_metadata_file() -> PathBuf {
    PathBuf::from("./data/raw/symbols_valid_meta.csv")
}

fn default_max_concurrent_loads() -> usize {
    4
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            prices_dir: default_prices_dir(),
            metadata_file: default_metadata_file(),
            workers: None,
            max_concurrent_loads: default_max_concurrent_loads(),
            copy_source: CopySource::default(),
        }
    }
}

impl LoaderSettings {
    /// Preprocessing pool size
    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|&n| n > 0)
            .unwrap_or_else(|| num_cpus::get() * 2)
    }
}

/// Resolve a database URL from `DATABASE_URL` or the individual `DB_*` variables
pub fn database_url_from_env() -> Option<String> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        if !url.is_empty() {
            return Some(url);
        }
    }

    let host = std::env::var("DB_HOST").ok()?;
    let port = std::env::var("DB_PORT").unwrap_or_else(|_| "5432".into());
    let user = std::env::var("DB_USER").ok()?;
    let password = std::env::var("DB_PASSWORD").unwrap_or_default();
    let name = std::env::var("DB_NAME").ok()?;

    Some(build_database_url(&host, &port, &user, &password, &name))
}

fn build_database_url(host: &str, port: &str, user: &str, password: &str, name: &str) -> String {
    if password.is_empty() {
        format!("postgresql://{}@{}:{}/{}?sslmode=disable", user, host, port, name)
    } else {
        format!(
            "postgresql://{}:{}@{}:{}/{}?sslmode=disable",
            user, password, host, port, name
        )
    }
}

impl Settings {
    /// Load settings from configuration files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_prefix("DATA_LOADER")
    }

    /// Load settings with a custom environment variable prefix
    pub fn load_with_prefix(env_prefix: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        // Production deployments inject the environment directly
        if run_mode != "production" {
            dotenv::dotenv().ok();
        }

        let config_dir = Self::config_dir();

        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // e.g. DATA_LOADER__LOADER__PRICES_DIR
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    /// Get the configuration directory path
    fn config_dir() -> String {
        std::env::var("DATA_LOADER_CONFIG_DIR").unwrap_or_else(|_| "config".into())
    }

    /// Create default settings (useful for testing)
    pub fn default_settings() -> Self {
        Settings {
            database: DatabaseSettings::default(),
            loader: LoaderSettings::default(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::default_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default_settings();
        assert_eq!(settings.database.max_connections, None);
        assert_eq!(settings.database.min_connections, 2);
        assert_eq!(settings.loader.max_concurrent_loads, 4);
        assert_eq!(settings.loader.copy_source, CopySource::Server);
    }

    #[test]
    fn test_worker_count_defaults_to_twice_cpus() {
        let mut loader = LoaderSettings::default();
        assert_eq!(loader.worker_count(), num_cpus::get() * 2);

        loader.workers = Some(3);
        assert_eq!(loader.worker_count(), 3);

        // Zero is treated as unset
        loader.workers = Some(0);
        assert_eq!(loader.worker_count(), num_cpus::get() * 2);
    }

    #[test]
    fn test_build_database_url() {
        assert_eq!(
            build_database_url("db", "5433", "app", "secret", "stocks"),
            "postgresql://app:secret@db:5433/stocks?sslmode=disable"
        );
        assert_eq!(
            build_database_url("db", "5432", "app", "", "stocks"),
            "postgresql://app@db:5432/stocks?sslmode=disable"
        );
    }

    #[test]
    fn test_loader_section_deserializes_partial() {
        let s = Config::builder()
            .set_override("loader.max_concurrent_loads", 2)
            .unwrap()
            .set_override("loader.copy_source", "stdin")
            .unwrap()
            .build()
            .unwrap();
        let settings: Settings = s.try_deserialize().unwrap();

        assert_eq!(settings.loader.max_concurrent_loads, 2);
        assert_eq!(settings.loader.copy_source, CopySource::Stdin);
        assert_eq!(settings.loader.prices_dir, PathBuf::from("./data/raw/stocks"));
    }
}
