//! Environment-backed runtime configuration for `eventq-tail`.

use std::{env, error::Error, fmt, time::Duration};

use eventq_core::{BackoffPolicy, EngineConfig};
use eventq_http::{DEFAULT_REQUEST_TIMEOUT, ServerConfig};

const MIN_REQUEST_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_BACKOFF_UNIT_MS: u64 = 1_000;
const DEFAULT_RECENT_LIMIT: usize = 200;

/// Runtime configuration used by the tail app.
#[derive(Debug, Clone)]
pub struct TailConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    /// Messages kept in memory for the console view.
    pub recent_limit: usize,
}

impl TailConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let base_url = required_trimmed_env("EVENTQ_SERVER_URL", &mut lookup)?;
        let email = required_trimmed_env("EVENTQ_EMAIL", &mut lookup)?;
        let api_key = required_trimmed_env("EVENTQ_API_KEY", &mut lookup)?;

        let request_timeout = match parse_optional_u64("EVENTQ_REQUEST_TIMEOUT_MS", &mut lookup)? {
            Some(ms) if ms < MIN_REQUEST_TIMEOUT_MS => {
                return Err(ConfigError::InvalidValue {
                    key: "EVENTQ_REQUEST_TIMEOUT_MS",
                    value: ms.to_string(),
                    reason: format!("must be at least {MIN_REQUEST_TIMEOUT_MS}"),
                });
            }
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_REQUEST_TIMEOUT,
        };
        let message_retention = parse_optional_usize(
            "EVENTQ_MESSAGE_RETENTION",
            EngineConfig::default().message_retention,
            &mut lookup,
        )?;
        let backoff_unit_ms = parse_optional_u64("EVENTQ_BACKOFF_UNIT_MS", &mut lookup)?
            .unwrap_or(DEFAULT_BACKOFF_UNIT_MS);
        if backoff_unit_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EVENTQ_BACKOFF_UNIT_MS",
                value: backoff_unit_ms.to_string(),
                reason: "must be greater than zero".to_owned(),
            });
        }
        let recent_limit =
            parse_optional_usize("EVENTQ_TAIL_RECENT_LIMIT", DEFAULT_RECENT_LIMIT, &mut lookup)?
                .max(1);

        Ok(Self {
            server: ServerConfig::new(base_url, email, api_key)
                .with_request_timeout(request_timeout),
            engine: EngineConfig {
                backoff: BackoffPolicy::new(backoff_unit_ms),
                message_retention,
            },
            recent_limit,
        })
    }
}

/// Errors returned while parsing tail configuration from environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is unset or blank.
    Missing { key: &'static str },
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { key } => write!(f, "missing required {key}"),
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn required_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    optional_trimmed_env(key, lookup).ok_or(ConfigError::Missing { key })
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_usize<F>(
    key: &'static str,
    default: usize,
    lookup: &mut F,
) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
