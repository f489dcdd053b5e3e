//! Runtime configuration from environment variables (and `.env`)

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.bootcs.dev";
pub const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_url: String,
    /// Opaque bearer token for the evaluation service
    pub token: Option<SecretString>,
    pub cache_dir: PathBuf,
    /// Local checks root consulted before the cache
    pub checks_path: Option<PathBuf>,
    pub check_timeout: Duration,
    pub cache_ttl: Duration,
}

impl AppConfig {
    /// Read `EXERCHECK_*` variables from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let api_url = non_empty("EXERCHECK_API_URL").unwrap_or_else(|| DEFAULT_API_URL.into());
        let token = non_empty("EXERCHECK_TOKEN").map(SecretString::from);
        let cache_dir = match non_empty("EXERCHECK_CACHE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_cache_dir()?,
        };
        let checks_path = non_empty("EXERCHECK_CHECKS_PATH").map(PathBuf::from);

        let check_timeout = parse_secs(
            "EXERCHECK_CHECK_TIMEOUT_SECS",
            non_empty("EXERCHECK_CHECK_TIMEOUT_SECS"),
            DEFAULT_CHECK_TIMEOUT_SECS,
        )?;
        if check_timeout.is_zero() {
            anyhow::bail!("EXERCHECK_CHECK_TIMEOUT_SECS must be positive");
        }
        let cache_ttl = parse_secs(
            "EXERCHECK_CACHE_TTL_SECS",
            non_empty("EXERCHECK_CACHE_TTL_SECS"),
            DEFAULT_CACHE_TTL_SECS,
        )?;

        Ok(Self {
            api_url,
            token,
            cache_dir,
            checks_path,
            check_timeout,
            cache_ttl,
        })
    }
}

fn parse_secs(key: &str, value: Option<String>, default: u64) -> Result<Duration> {
    let secs = match value {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{} must be a whole number of seconds, got {:?}", key, raw))?,
        None => default,
    };
    Ok(Duration::from_secs(secs))
}

fn default_cache_dir() -> Result<PathBuf> {
    let dirs = directories::BaseDirs::new().context("Could not determine the home directory")?;
    Ok(dirs.home_dir().join(".exercheck").join("checks"))
}
