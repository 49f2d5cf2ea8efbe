//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! The database password is wrapped in secrecy::SecretString to prevent
//! log leaks.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// `gs://bucket` for GCS, or a plain directory path for local dev.
    pub storage_bucket: String,
    /// Prefix under the bucket for archived media.
    pub storage_root: String,
    /// Worker identity; defaults to the host-assigned pod name.
    pub worker_id: String,
    /// Exploration bounds of the identifier address space.
    pub cert_min: i64,
    pub cert_max: i64,
    /// Stop after this many processed items.
    pub max_items: u64,
    /// Inter-request wait range (seconds), randomized per item.
    pub wait_range_secs: (u64, u64),
    /// Random jump range for exploration candidates.
    pub jump_range: (i64, i64),
    /// Full-stop duration after repeated consecutive failures.
    pub cooldown: Duration,
    /// Consecutive transient errors before entering cooldown.
    pub error_threshold: u32,
    /// Page render and media download timeout.
    pub fetch_timeout: Duration,
    /// Base URL of the certificate pages.
    pub cert_page_base: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In the cluster, the pod spec provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: database_url_from_env()?,
            storage_bucket: required_var("STORAGE_BUCKET")?,
            storage_root: var_or("STORAGE_ROOT", "png"),
            worker_id: std::env::var("WORKER_ID")
                .or_else(|_| std::env::var("HOSTNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
            cert_min: parsed_var("CERT_MIN", 100_000_001)?,
            cert_max: parsed_var("CERT_MAX", 123_371_178)?,
            max_items: parsed_var("MAX_ITEMS", 10_000)?,
            wait_range_secs: (
                parsed_var("WAIT_MIN_SECS", 20)?,
                parsed_var("WAIT_MAX_SECS", 30)?,
            ),
            jump_range: (parsed_var("JUMP_MIN", 100)?, parsed_var("JUMP_MAX", 500)?),
            cooldown: Duration::from_secs(parsed_var("RATE_LIMIT_COOLDOWN_SECS", 600)?),
            error_threshold: parsed_var("CONSECUTIVE_ERRORS_THRESHOLD", 3)?,
            fetch_timeout: Duration::from_secs(parsed_var("FETCH_TIMEOUT_SECS", 15)?),
            cert_page_base: var_or("CERT_PAGE_BASE", "https://www.psacard.com/cert"),
        })
    }
}

/// `DATABASE_URL` wins; otherwise the URL is assembled from the discrete
/// `DB_HOST`/`DB_USER`/`DB_PASSWORD`/`DB_NAME` vars the cluster provides.
fn database_url_from_env() -> Result<SecretString> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(url));
    }

    let host = required_var("DB_HOST")?;
    let user = var_or("DB_USER", "harvest");
    let name = var_or("DB_NAME", "harvest");
    let password = SecretString::from(std::env::var("DB_PASSWORD").unwrap_or_default());

    tracing::info!(%host, %user, db = %name, "assembling database URL from discrete vars");

    Ok(SecretString::from(format!(
        "postgres://{user}:{}@{host}/{name}",
        password.expose_secret()
    )))
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("could not parse {name}={raw}"))),
        Err(_) => Ok(default),
    }
}
