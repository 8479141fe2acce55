//! Server configuration module.
//!
//! Parses configuration from environment variables for the Feedgate server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `DASHBOARD_USERNAME` | No | `admin` | Dashboard login username |
//! | `DASHBOARD_PASSWORD` | No | `admin` | Dashboard login password |
//! | `DASHBOARD_API_KEY` | No | - | Enables `X-API-Key` auth on API endpoints |
//! | `PORT` | No | 3000 | HTTP server port |
//! | `DB_PATH` | No | `$DATA_DIR/messages.db` | SQLite message database |
//! | `DATA_DIR` | No | `data` | Directory holding the default database |
//! | `PUBLIC_DIR` | No | `public` | Static assets and HTML pages |
//!
//! Empty values are treated as unset. Falling back to the default username
//! or password logs a warning.

use std::env;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

use crate::auth::{Credentials, DEFAULT_PASSWORD, DEFAULT_USERNAME};

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 3000;

/// Default data directory.
const DEFAULT_DATA_DIR: &str = "data";

/// Database file name inside the data directory.
const DATABASE_FILE_NAME: &str = "messages.db";

/// Default static asset directory.
const DEFAULT_PUBLIC_DIR: &str = "public";

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Dashboard username, password, and optional API key.
    pub credentials: Credentials,

    /// HTTP server port.
    pub port: u16,

    /// Path of the SQLite message database.
    pub db_path: PathBuf,

    /// Directory served under `/public` and holding the HTML pages.
    pub public_dir: PathBuf,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `PORT` is not a valid port number or any
    /// variable contains invalid unicode.
    pub fn from_env() -> Result<Self, ConfigError> {
        let username = match parse_string_env("DASHBOARD_USERNAME")? {
            Some(username) => username,
            None => {
                warn!("DASHBOARD_USERNAME not set, using default username");
                DEFAULT_USERNAME.to_string()
            }
        };

        let password = match parse_string_env("DASHBOARD_PASSWORD")? {
            Some(password) => password,
            None => {
                warn!("DASHBOARD_PASSWORD not set, using default password");
                DEFAULT_PASSWORD.to_string()
            }
        };

        let api_key = parse_string_env("DASHBOARD_API_KEY")?;

        let db_path = match parse_string_env("DB_PATH")? {
            Some(path) => PathBuf::from(path),
            None => {
                let data_dir = parse_string_env("DATA_DIR")?
                    .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
                PathBuf::from(data_dir).join(DATABASE_FILE_NAME)
            }
        };

        let public_dir = parse_string_env("PUBLIC_DIR")?
            .map_or_else(|| PathBuf::from(DEFAULT_PUBLIC_DIR), PathBuf::from);

        Ok(Self {
            credentials: Credentials::new(username, password, api_key),
            port: parse_port()?,
            db_path,
            public_dir,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            port: DEFAULT_PORT,
            db_path: PathBuf::from(DEFAULT_DATA_DIR).join(DATABASE_FILE_NAME),
            public_dir: PathBuf::from(DEFAULT_PUBLIC_DIR),
        }
    }
}

/// Read an optional string variable. Empty values count as unset.
fn parse_string_env(name: &str) -> Result<Option<String>, ConfigError> {
    match env::var(name) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: name.to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match parse_string_env("PORT")? {
        Some(port_str) => Ok(port_str.trim().parse()?),
        None => Ok(DEFAULT_PORT),
    }
}
