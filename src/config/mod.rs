//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or malformed.
//! The database URL is wrapped in secrecy::SecretString to keep it out of logs.

use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;

pub use secrecy::ExposeSecret;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Extra `.toml` module and template definitions merged over the builtins.
    pub catalog_dir: Option<PathBuf>,
    /// TOML role directory used to resolve task assignees.
    pub directory_file: Option<PathBuf>,
    /// Channel capacity of each change-feed subscription.
    pub feed_buffer: usize,
    /// Default page size for listings.
    pub page_size: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var(&lookup, "DATABASE_URL")?),
            otel_endpoint: lookup("OTEL_ENDPOINT"),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            catalog_dir: lookup("TASKWIRE_CATALOG_DIR").map(PathBuf::from),
            directory_file: lookup("TASKWIRE_DIRECTORY_FILE").map(PathBuf::from),
            feed_buffer: parsed_var(&lookup, "TASKWIRE_FEED_BUFFER", 256)?,
            page_size: parsed_var(&lookup, "TASKWIRE_PAGE_SIZE", 50)?,
        })
    }
}

fn required_var(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<String> {
    lookup(name)
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
    }
}
