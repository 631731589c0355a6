//! Gateway configuration.
//!
//! Layered lowest to highest:
//! 1. Built-in defaults
//! 2. `~/.a2a-gateway/config.toml` (or the file passed with `--config`)
//! 3. `A2A_GATEWAY__*` environment variables, `__` separating nested keys
//! 4. `A2A_RATE_LIMIT_*` shorthands for the admission limits
//! 5. Command-line flags, applied by the binary

use crate::a2a::error::{A2aError, Result};
use crate::a2a::events::{DEFAULT_HISTORY_CAPACITY, MAX_HISTORY_CAPACITY};
use crate::a2a::rate_limit::{self, RateLimitConfig};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 18790;

const ENV_PREFIX: &str = "A2A_GATEWAY";
const RATE_LIMIT_ENV_PREFIX: &str = "A2A_RATE_LIMIT_";

/// Short names accepted for endpoints in env vars and `[rate_limit.overrides]`.
const ENDPOINT_ALIASES: &[(&str, &str)] = &[
    ("SEND_MESSAGE", rate_limit::SEND_MESSAGE),
    ("GET_TASK", rate_limit::GET_TASK),
    ("LIST_TASKS", rate_limit::LIST_TASKS),
    ("CANCEL_TASK", rate_limit::CANCEL_TASK),
    ("AGENT_CARD", rate_limit::AGENT_CARD),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
    /// Events retained for `Last-Event-ID` replay.
    pub event_history_capacity: usize,
    pub log_format: LogFormat,
    pub rate_limit: RateLimitConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            event_history_capacity: DEFAULT_HISTORY_CAPACITY,
            log_format: LogFormat::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// A loaded config plus findings to report once logging is up.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: GatewayConfig,
    /// `A2A_RATE_LIMIT_*` variables that matched no setting.
    pub ignored_env: Vec<String>,
}

/// `~/.a2a-gateway/config.toml`, or `./.a2a-gateway/config.toml` without a home dir.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".a2a-gateway")
        .join("config.toml")
}

impl GatewayConfig {
    /// Load from file and process environment.
    ///
    /// An explicit `path` must exist; the default location is optional.
    /// Nothing is logged here, since logging is configured from the result.
    pub fn load(path: Option<&Path>) -> Result<LoadedConfig> {
        let file = path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);

        let settings = Config::builder()
            .add_source(
                File::from(file.as_path())
                    .format(FileFormat::Toml)
                    .required(path.is_some()),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| A2aError::Configuration(format!("{}: {}", file.display(), e)))?;

        let mut config: GatewayConfig = settings
            .try_deserialize()
            .map_err(|e| A2aError::Configuration(e.to_string()))?;

        let ignored_env = config.apply_rate_limit_env(std::env::vars())?;
        config.normalize_overrides()?;
        config.validate()?;

        Ok(LoadedConfig {
            config,
            ignored_env,
        })
    }

    /// Apply `A2A_RATE_LIMIT_<NAME>_RPM`, `A2A_RATE_LIMIT_DEFAULT_RPM`,
    /// `A2A_RATE_LIMIT_ENABLED` and the cleanup timings from `vars`.
    ///
    /// Returns the names of prefixed variables that matched nothing.
    pub fn apply_rate_limit_env<I>(&mut self, vars: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut ignored = Vec::new();
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(RATE_LIMIT_ENV_PREFIX) else {
                continue;
            };
            let value = value.trim();
            match name {
                "ENABLED" => self.rate_limit.enabled = parse_env(&key, value)?,
                "DEFAULT_RPM" => self.rate_limit.default_rpm = parse_env(&key, value)?,
                "CLEANUP_INTERVAL_SECS" => {
                    self.rate_limit.cleanup_interval_secs = parse_env(&key, value)?
                }
                "IDLE_THRESHOLD_SECS" => {
                    self.rate_limit.idle_threshold_secs = parse_env(&key, value)?
                }
                other => {
                    let endpoint = other
                        .strip_suffix("_RPM")
                        .and_then(resolve_alias);
                    match endpoint {
                        Some(endpoint) => {
                            let rpm = parse_env(&key, value)?;
                            self.rate_limit.overrides.insert(endpoint.to_string(), rpm);
                        }
                        None => ignored.push(key),
                    }
                }
            }
        }
        Ok(ignored)
    }

    /// Rewrite override keys into normalized `METHOD /path` form.
    ///
    /// Accepts aliases (`send_message`) and concrete paths
    /// (`post /a2a/tasks/abc/cancel`) alike.
    pub fn normalize_overrides(&mut self) -> Result<()> {
        let mut normalized = HashMap::with_capacity(self.rate_limit.overrides.len());
        for (key, rpm) in self.rate_limit.overrides.drain() {
            let endpoint = match key.trim().split_once(' ') {
                Some((method, path)) => rate_limit::normalize_endpoint(method, path.trim()),
                None => resolve_alias(&key)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        A2aError::Configuration(format!("unknown rate limit endpoint '{}'", key))
                    })?,
            };
            normalized.insert(endpoint, rpm);
        }
        self.rate_limit.overrides = normalized;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind.trim().is_empty() {
            return Err(A2aError::Configuration("bind address must not be empty".into()));
        }
        if self.event_history_capacity == 0 || self.event_history_capacity > MAX_HISTORY_CAPACITY {
            return Err(A2aError::Configuration(format!(
                "event_history_capacity must be between 1 and {}",
                MAX_HISTORY_CAPACITY
            )));
        }
        let limits = &self.rate_limit;
        if limits.default_rpm == 0 {
            return Err(A2aError::Configuration("rate_limit.default_rpm must be positive".into()));
        }
        if limits.cleanup_interval_secs == 0 || limits.idle_threshold_secs == 0 {
            return Err(A2aError::Configuration(
                "rate_limit cleanup timings must be positive".into(),
            ));
        }
        if let Some((endpoint, _)) = limits.overrides.iter().find(|(_, rpm)| **rpm == 0) {
            return Err(A2aError::Configuration(format!(
                "rate limit for '{}' must be positive",
                endpoint
            )));
        }
        Ok(())
    }
}

fn resolve_alias(alias: &str) -> Option<&'static str> {
    let alias = alias.trim().to_ascii_uppercase();
    ENDPOINT_ALIASES
        .iter()
        .find(|(name, _)| *name == alias)
        .map(|(_, endpoint)| *endpoint)
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| A2aError::Configuration(format!("{} has invalid value '{}'", key, value)))
}
