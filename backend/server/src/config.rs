use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use roster::RetryPolicy;
use tracing::{info, warn};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend {other:?}")),
        }
    }
}

pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub store_backend: StoreBackend,
    pub collection: String,
    pub page_ttl: Duration,
    pub retry: RetryPolicy,
    pub entry_path: String,
    pub session_secret: String,
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        let secrets_dir: String = try_load("SECRETS_DIR", "/run/secrets")?;

        Ok(Self {
            port: try_load("RUST_PORT", "1111")?,
            redis_url: try_load("REDIS_URL", "redis://redis:6379")?,
            store_backend: try_load("STORE_BACKEND", "redis")?,
            collection: try_load("ROSTER_COLLECTION", "users")?,
            page_ttl: Duration::from_secs(try_load("PAGE_TTL_SECS", "1800")?),
            retry: RetryPolicy {
                attempts: try_load("WRITE_ATTEMPTS", "3")?,
                backoff: Duration::from_millis(try_load("WRITE_BACKOFF_MS", "100")?),
            },
            entry_path: try_load("ENTRY_PATH", "/")?,
            session_secret: read_secret(&secrets_dir, "SESSION_SECRET")?,
        })
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, AppError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
            AppError::Config(format!("invalid {key}: {e}"))
        })
}

fn read_secret(secrets_dir: &str, secret_name: &str) -> Result<String, AppError> {
    let path = format!("{secrets_dir}/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
            AppError::Config(format!("missing secret {secret_name}"))
        })
}
