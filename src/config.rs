//! Service configuration read from the environment (and `.env`).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::engine::{ChromeLauncherConfig, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}': {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct DocgenConfig {
    pub template_root: PathBuf,
    pub storage_root: PathBuf,
    /// Registry JSON file; the embedded registry is used when unset.
    pub registry_path: Option<PathBuf>,
    pub chrome_path: Option<PathBuf>,
    pub chrome_sandbox: bool,
    pub engine_max_attempts: u32,
    pub engine_backoff: Duration,
    pub engine_launch_timeout: Duration,
    pub engine_idle_timeout: Duration,
    pub template_cache_ttl: Duration,
    pub strict_templates: bool,
}

impl Default for DocgenConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            template_root: PathBuf::from("./templates"),
            storage_root: PathBuf::from("./storage"),
            registry_path: None,
            chrome_path: None,
            chrome_sandbox: false,
            engine_max_attempts: retry.max_attempts,
            engine_backoff: retry.base_delay,
            engine_launch_timeout: retry.launch_timeout,
            engine_idle_timeout: ChromeLauncherConfig::default().idle_timeout,
            template_cache_ttl: Duration::from_secs(10 * 60),
            strict_templates: false,
        }
    }
}

impl DocgenConfig {
    /// Load from process environment, after reading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            template_root: path_var("DOCGEN_TEMPLATE_ROOT").unwrap_or(defaults.template_root),
            storage_root: path_var("DOCGEN_STORAGE_ROOT").unwrap_or(defaults.storage_root),
            registry_path: path_var("DOCGEN_REGISTRY_PATH"),
            chrome_path: path_var("CHROME_PATH"),
            chrome_sandbox: parse_var("DOCGEN_CHROME_SANDBOX")?.unwrap_or(defaults.chrome_sandbox),
            engine_max_attempts: parse_var("DOCGEN_ENGINE_MAX_ATTEMPTS")?
                .unwrap_or(defaults.engine_max_attempts),
            engine_backoff: parse_var("DOCGEN_ENGINE_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.engine_backoff),
            engine_launch_timeout: parse_var("DOCGEN_ENGINE_LAUNCH_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.engine_launch_timeout),
            engine_idle_timeout: parse_var("DOCGEN_ENGINE_IDLE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.engine_idle_timeout),
            template_cache_ttl: parse_var("DOCGEN_TEMPLATE_CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.template_cache_ttl),
            strict_templates: parse_var("DOCGEN_STRICT_TEMPLATES")?
                .unwrap_or(defaults.strict_templates),
        };

        if config.engine_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "DOCGEN_ENGINE_MAX_ATTEMPTS",
                value: "0".into(),
                reason: "at least one launch attempt is required".into(),
            });
        }

        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.engine_max_attempts,
            base_delay: self.engine_backoff,
            launch_timeout: self.engine_launch_timeout,
        }
    }

    pub fn chrome(&self) -> ChromeLauncherConfig {
        ChromeLauncherConfig {
            chrome_path: self.chrome_path.clone(),
            sandbox: self.chrome_sandbox,
            idle_timeout: self.engine_idle_timeout,
        }
    }
}

fn path_var(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_var<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => return Ok(None),
    };

    value
        .trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            name,
            value,
            reason: e.to_string(),
        })
}
