//! Configuration loaded from environment variables.
//!
//! # Server
//! - `HOST` - bind address (default: 0.0.0.0)
//! - `PORT` - listen port (default: 3000)
//! - `ADMIN_PASSWORD` - shared secret for admin endpoints (required)
//! - `DATABASE_URL` - PostgreSQL connection string; when unset the JSON file backend is used
//! - `DB_MAX_CONNECTIONS` - pool size for PostgreSQL (default: 5)
//! - `DB_FILE` - path of the JSON file backend (default: database.json)
//!
//! # Client
//! - `API_URL` - base URL of the API (default: http://localhost:3000/api)
//! - `POLL_INTERVAL_MS` - data poll period (default: 3000)
//! - `RESULTS_INTERVAL_MS` - results visibility check period (default: 5000)
//! - `VOTER_STATE_FILE` - local voter state (default: .voter-state.json)
//! - `REQUEST_TIMEOUT_MS` - per-request timeout (default: 5000)

use std::fmt::Display;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use tracing::{debug, info};

const CLOCK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Debug, Clone)]
pub enum StorageConfig {
    File {
        path: PathBuf,
    },
    Postgres {
        url: SecretString,
        max_connections: u32,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub admin_password: SecretString,
    pub storage: StorageConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let storage = match lookup("DATABASE_URL").filter(|url| !url.is_empty()) {
            Some(url) => StorageConfig::Postgres {
                url: SecretString::from(url),
                max_connections: try_load(&lookup, "DB_MAX_CONNECTIONS", "5")?,
            },
            None => StorageConfig::File {
                path: try_load(&lookup, "DB_FILE", "database.json")?,
            },
        };

        let admin_password = lookup("ADMIN_PASSWORD")
            .filter(|p| !p.is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("ADMIN_PASSWORD".to_string()))?;

        Ok(Self {
            host: try_load(&lookup, "HOST", "0.0.0.0")?,
            port: try_load(&lookup, "PORT", "3000")?,
            admin_password,
            storage,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub poll_interval: Duration,
    pub results_interval: Duration,
    pub clock_interval: Duration,
    pub request_timeout: Duration,
    pub voter_state_path: PathBuf,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url: String = try_load(&lookup, "API_URL", "http://localhost:3000/api")?;

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            poll_interval: load_millis(&lookup, "POLL_INTERVAL_MS", "3000")?,
            results_interval: load_millis(&lookup, "RESULTS_INTERVAL_MS", "5000")?,
            clock_interval: CLOCK_INTERVAL,
            request_timeout: load_millis(&lookup, "REQUEST_TIMEOUT_MS", "5000")?,
            voter_state_path: try_load(&lookup, "VOTER_STATE_FILE", ".voter-state.json")?,
        })
    }
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        debug!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn load_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<Duration, ConfigError> {
    let millis: u64 = try_load(lookup, key, default)?;
    if millis == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_millis(millis))
}

/// Loads `.env` if present. Missing files are fine.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => info!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Failed to load .env: {e}"),
    }
}
