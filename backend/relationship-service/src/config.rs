/// Configuration management for Relationship Service
///
/// Loads configuration from environment variables (and `.env` when present).
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use resilience::RetryConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub consistency: ConsistencyConfig,
    pub reset: ResetSettings,
    pub email: EmailSettings,
    pub assets: AssetSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
    pub storage: StorageBackend,
    /// Emit JSON log lines instead of human-readable ones
    pub json_logs: bool,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL; required for the postgres backend
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Optimistic concurrency, timeouts and repair cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyConfig {
    pub conflict_max_retries: u32,
    pub conflict_backoff_ms: u64,
    /// Deadline for short operations (follow toggles, token operations)
    pub request_timeout_ms: u64,
    pub reconcile_interval_secs: u64,
    pub reconcile_batch_size: usize,
}

impl ConsistencyConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::for_conflicts(
            self.conflict_max_retries,
            Duration::from_millis(self.conflict_backoff_ms),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            conflict_max_retries: 5,
            conflict_backoff_ms: 10,
            request_timeout_ms: 5_000,
            reconcile_interval_secs: 300,
            reconcile_batch_size: 200,
        }
    }
}

/// Upper bound for reset token lifetime (one week)
pub const MAX_RESET_TOKEN_TTL_MINUTES: i64 = 7 * 24 * 60;

/// Password reset settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetSettings {
    pub token_ttl_minutes: i64,
    /// Prefix for the link mailed to the user; the raw token is appended
    pub base_url: String,
}

impl Default for ResetSettings {
    fn default() -> Self {
        Self {
            token_ttl_minutes: 30,
            base_url: "http://localhost:3000/password/reset".to_string(),
        }
    }
}

/// Email service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: String,
    pub use_starttls: bool,
}

/// Asset store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSettings {
    pub bucket: String,
    pub public_base_url: String,
}

// Default values
fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid {name}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let storage = match env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "postgres" => StorageBackend::Postgres,
            "memory" => StorageBackend::Memory,
            other => bail!("Invalid STORAGE_BACKEND: {other}"),
        };

        let app = AppConfig {
            env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            storage,
            json_logs: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").ok(),
            max_connections: parse_var("DB_MAX_CONNECTIONS", default_max_connections())?,
            min_connections: parse_var("DB_MIN_CONNECTIONS", default_min_connections())?,
        };

        if storage == StorageBackend::Postgres && database.url.is_none() {
            bail!("DATABASE_URL environment variable not set");
        }

        let defaults = ConsistencyConfig::default();
        let consistency = ConsistencyConfig {
            conflict_max_retries: parse_var("CONFLICT_MAX_RETRIES", defaults.conflict_max_retries)?,
            conflict_backoff_ms: parse_var("CONFLICT_BACKOFF_MS", defaults.conflict_backoff_ms)?,
            request_timeout_ms: parse_var("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms)?,
            reconcile_interval_secs: parse_var(
                "RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval_secs,
            )?,
            reconcile_batch_size: parse_var("RECONCILE_BATCH_SIZE", defaults.reconcile_batch_size)?,
        };

        if consistency.request_timeout_ms == 0 {
            bail!("REQUEST_TIMEOUT_MS must be greater than zero");
        }
        if consistency.reconcile_interval_secs == 0 {
            bail!("RECONCILE_INTERVAL_SECS must be greater than zero");
        }
        if consistency.reconcile_batch_size == 0 {
            bail!("RECONCILE_BATCH_SIZE must be greater than zero");
        }

        let reset_defaults = ResetSettings::default();
        let reset = ResetSettings {
            token_ttl_minutes: parse_var("RESET_TOKEN_TTL_MINUTES", reset_defaults.token_ttl_minutes)?,
            base_url: env::var("PASSWORD_RESET_BASE_URL").unwrap_or(reset_defaults.base_url),
        };

        if !(1..=MAX_RESET_TOKEN_TTL_MINUTES).contains(&reset.token_ttl_minutes) {
            bail!(
                "RESET_TOKEN_TTL_MINUTES must be between 1 and {MAX_RESET_TOKEN_TTL_MINUTES}, got {}",
                reset.token_ttl_minutes
            );
        }

        let email = EmailSettings {
            smtp_host: env::var("SMTP_HOST").unwrap_or_default(),
            smtp_port: parse_var("SMTP_PORT", 587)?,
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from: env::var("SMTP_FROM").unwrap_or_else(|_| "noreply@nova.dev".to_string()),
            use_starttls: env::var("SMTP_USE_STARTTLS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        };

        let assets = AssetSettings {
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "nova-profile-assets".to_string()),
            public_base_url: env::var("S3_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "https://cdn.nova.dev".to_string()),
        };

        Ok(Config {
            app,
            database,
            consistency,
            reset,
            email,
            assets,
        })
    }
}
