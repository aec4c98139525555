//! Gateway configuration loaded from environment variables.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CB_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_CB_WINDOW_MS: u64 = 30_000;
const DEFAULT_CB_COOLDOWN_MS: u64 = 10_000;
const DEFAULT_BH_MAX_CONCURRENCY: usize = 8;
const DEFAULT_BH_QUEUE_LIMIT: usize = 64;
const DEFAULT_BH_QUEUE_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_RETRY_MAX: u32 = 2;
const DEFAULT_RETRY_BASE_MS: u64 = 150;
const DEFAULT_RETRY_JITTER_MS: u64 = 100;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Tunables for the upstream invocation layer.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the credential authority, no trailing slash.
    pub auth_service_url: String,
    /// Failures within the rolling window that open the circuit.
    pub breaker_failure_threshold: u32,
    /// Rolling window anchored at the first tracked failure.
    pub breaker_window: Duration,
    /// How long the circuit stays open before admitting a probe.
    pub breaker_cooldown: Duration,
    /// Maximum concurrent in-flight upstream calls.
    pub bulkhead_max_concurrency: usize,
    /// Maximum callers waiting for a slot.
    pub bulkhead_queue_limit: usize,
    /// How long a queued caller waits before giving up.
    pub bulkhead_queue_timeout: Duration,
    /// Extra attempts for idempotent calls.
    pub retry_max: u32,
    /// Base of the exponential backoff.
    pub retry_base_backoff: Duration,
    /// Upper bound of the random jitter added to each backoff.
    pub retry_max_jitter: Duration,
}

impl GatewayConfig {
    /// Load configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load configuration from an explicit variable map.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// fails validation.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let auth_service_url = vars
            .get("KEYGATE_AUTH_SERVICE_URL")
            .map(|v| v.trim_end_matches('/').to_string())
            .ok_or_else(|| ConfigError::MissingVariable("KEYGATE_AUTH_SERVICE_URL".to_string()))?;

        let config = Self {
            auth_service_url,
            breaker_failure_threshold: parse_var(
                vars,
                "KEYGATE_CB_FAILURE_THRESHOLD",
                DEFAULT_CB_FAILURE_THRESHOLD,
            )?,
            breaker_window: Duration::from_millis(parse_var(
                vars,
                "KEYGATE_CB_WINDOW_MS",
                DEFAULT_CB_WINDOW_MS,
            )?),
            breaker_cooldown: Duration::from_millis(parse_var(
                vars,
                "KEYGATE_CB_COOLDOWN_MS",
                DEFAULT_CB_COOLDOWN_MS,
            )?),
            bulkhead_max_concurrency: parse_var(
                vars,
                "KEYGATE_BH_MAX_CONCURRENCY",
                DEFAULT_BH_MAX_CONCURRENCY,
            )?,
            bulkhead_queue_limit: parse_var(
                vars,
                "KEYGATE_BH_QUEUE_LIMIT",
                DEFAULT_BH_QUEUE_LIMIT,
            )?,
            bulkhead_queue_timeout: Duration::from_millis(parse_var(
                vars,
                "KEYGATE_BH_QUEUE_TIMEOUT_MS",
                DEFAULT_BH_QUEUE_TIMEOUT_MS,
            )?),
            retry_max: parse_var(vars, "KEYGATE_RETRY_MAX", DEFAULT_RETRY_MAX)?,
            retry_base_backoff: Duration::from_millis(parse_var(
                vars,
                "KEYGATE_RETRY_BASE_MS",
                DEFAULT_RETRY_BASE_MS,
            )?),
            retry_max_jitter: Duration::from_millis(parse_var(
                vars,
                "KEYGATE_RETRY_JITTER_MS",
                DEFAULT_RETRY_JITTER_MS,
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.breaker_failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                name: "KEYGATE_CB_FAILURE_THRESHOLD".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.bulkhead_max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "KEYGATE_BH_MAX_CONCURRENCY".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_var<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(name) {
        Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: format!("{e}"),
        }),
        None => Ok(default),
    }
}
