//! Service configuration loaded from environment variables.
//!
//! Configuration is constructed once at process start and passed to every
//! component by reference. There is no global accessor.

use common::secret::SecretString;
use std::collections::HashMap;
use thiserror::Error;

/// Default bind address for the HTTP listener.
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8084";

/// Default JWT issuer.
const DEFAULT_JWT_ISSUER: &str = "keygate";

/// Default access token lifetime (15 minutes).
const DEFAULT_ACCESS_TTL_SECONDS: i64 = 900;

/// Default refresh token lifetime (14 days). Also the session TTL.
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 1_209_600;

/// Default grace window during which the previous jti is still accepted.
const DEFAULT_GRACE_SECONDS: u64 = 30;

/// Default idempotency window during which the last issued refresh token
/// is replayed to racing callers.
const DEFAULT_IDEMPOTENCY_SECONDS: u64 = 45;

/// Default sliding threshold. Zero means every presented token rotates.
const DEFAULT_SLIDING_THRESHOLD_SECONDS: u64 = 0;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

/// Session service configuration.
///
/// Sensitive values (store URL, signing key) are held as [`SecretString`]
/// so a derived `Debug` never leaks them into logs.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP listener binds to.
    pub bind_address: String,
    /// Redis connection URL, may embed credentials.
    pub redis_url: SecretString,
    /// Base64-encoded PKCS8 Ed25519 signing key.
    pub signing_key: SecretString,
    /// Issuer claim stamped into and required of every token.
    pub jwt_issuer: String,
    /// Access token lifetime in seconds.
    pub access_ttl_seconds: i64,
    /// Refresh token lifetime in seconds. Doubles as the session TTL.
    pub refresh_ttl_seconds: i64,
    /// Grace window for the previous jti after a rotation.
    pub rotation_grace_seconds: u64,
    /// Idempotency window for the last issued refresh token.
    pub rotation_idempotency_seconds: u64,
    /// Remaining-lifetime threshold above which a presented token is
    /// "touched" instead of rotated. Zero disables touching.
    pub sliding_threshold_seconds: u64,
}

impl Config {
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

    /// Load configuration from an explicit variable map. Split out from
    /// [`Config::from_env`] so tests never mutate process state.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// fails validation.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("KEYGATE_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let redis_url = vars
            .get("KEYGATE_REDIS_URL")
            .map(|v| SecretString::from(v.clone()))
            .ok_or_else(|| ConfigError::MissingVariable("KEYGATE_REDIS_URL".to_string()))?;

        let signing_key = vars
            .get("KEYGATE_SIGNING_KEY")
            .map(|v| SecretString::from(v.clone()))
            .ok_or_else(|| ConfigError::MissingVariable("KEYGATE_SIGNING_KEY".to_string()))?;

        let jwt_issuer = vars
            .get("KEYGATE_JWT_ISSUER")
            .cloned()
            .unwrap_or_else(|| DEFAULT_JWT_ISSUER.to_string());

        let access_ttl_seconds =
            parse_var(vars, "KEYGATE_ACCESS_TTL_SECONDS", DEFAULT_ACCESS_TTL_SECONDS)?;
        let refresh_ttl_seconds = parse_var(
            vars,
            "KEYGATE_REFRESH_TTL_SECONDS",
            DEFAULT_REFRESH_TTL_SECONDS,
        )?;
        let rotation_grace_seconds =
            parse_var(vars, "KEYGATE_ROTATION_GRACE_SECONDS", DEFAULT_GRACE_SECONDS)?;
        let rotation_idempotency_seconds = parse_var(
            vars,
            "KEYGATE_ROTATION_IDEMPOTENCY_SECONDS",
            DEFAULT_IDEMPOTENCY_SECONDS,
        )?;
        let sliding_threshold_seconds = parse_var(
            vars,
            "KEYGATE_SLIDING_THRESHOLD_SECONDS",
            DEFAULT_SLIDING_THRESHOLD_SECONDS,
        )?;

        let config = Self {
            bind_address,
            redis_url,
            signing_key,
            jwt_issuer,
            access_ttl_seconds,
            refresh_ttl_seconds,
            rotation_grace_seconds,
            rotation_idempotency_seconds,
            sliding_threshold_seconds,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.access_ttl_seconds <= 0 {
            return Err(ConfigError::InvalidValue {
                name: "KEYGATE_ACCESS_TTL_SECONDS".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.refresh_ttl_seconds <= 0 {
            return Err(ConfigError::InvalidValue {
                name: "KEYGATE_REFRESH_TTL_SECONDS".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.rotation_grace_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                name: "KEYGATE_ROTATION_GRACE_SECONDS".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        // The idempotency window serves replays of the previous jti, so it
        // must outlive the grace window or racers fail closed too early.
        if self.rotation_idempotency_seconds < self.rotation_grace_seconds {
            return Err(ConfigError::InvalidValue {
                name: "KEYGATE_ROTATION_IDEMPOTENCY_SECONDS".to_string(),
                reason: "must be >= KEYGATE_ROTATION_GRACE_SECONDS".to_string(),
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
