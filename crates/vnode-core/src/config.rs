use std::path::Path;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VnodeError};

/// Default interval between provider pings (and lease renewals).
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);

/// Default interval between full status publishes when leases are in use.
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Largest accepted interval or lease duration, in seconds. Lease durations
/// are carried as `i32` seconds.
pub const MAX_INTERVAL_SECS: u64 = i32::MAX as u64;

/// Heartbeat supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Seconds between pings. Doubles as the status interval when leases
    /// are not in use.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds between status publishes when leases are supported.
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,

    /// Upper bound on a single ping, in seconds.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,

    /// Lease configuration.
    #[serde(default)]
    pub lease: LeaseConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            status_interval_secs: default_status_interval(),
            ping_timeout_secs: default_ping_timeout(),
            lease: LeaseConfig::default(),
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| VnodeError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);

        let config: Self = toml::from_str(&content)
            .map_err(|e| VnodeError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the supervisor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.lease.retry.max_attempts == 0 {
            return Err(VnodeError::Config(
                "lease.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.lease.duration_multiplier == 0 {
            return Err(VnodeError::Config(
                "lease.duration_multiplier must be at least 1".to_string(),
            ));
        }

        for (field, secs) in [
            ("ping_interval_secs", self.ping_interval_secs),
            ("status_interval_secs", self.status_interval_secs),
            ("ping_timeout_secs", self.ping_timeout_secs),
        ] {
            if secs > MAX_INTERVAL_SECS {
                return Err(VnodeError::Config(format!(
                    "{} must be at most {} seconds",
                    field, MAX_INTERVAL_SECS
                )));
            }
        }

        let lease_secs = self
            .ping_interval()
            .as_secs()
            .checked_mul(u64::from(self.lease.duration_multiplier));
        if !matches!(lease_secs, Some(secs) if secs <= MAX_INTERVAL_SECS) {
            return Err(VnodeError::Config(format!(
                "ping interval times lease.duration_multiplier must be at most {} seconds",
                MAX_INTERVAL_SECS
            )));
        }
        Ok(())
    }

    /// Ping interval, with zero meaning the default.
    pub fn ping_interval(&self) -> Duration {
        non_zero_or(self.ping_interval_secs, DEFAULT_PING_INTERVAL)
    }

    /// Status interval, with zero meaning the default.
    pub fn status_interval(&self) -> Duration {
        non_zero_or(self.status_interval_secs, DEFAULT_STATUS_INTERVAL)
    }

    /// Ping timeout, with zero meaning the default.
    pub fn ping_timeout(&self) -> Duration {
        non_zero_or(self.ping_timeout_secs, Duration::from_secs(default_ping_timeout()))
    }

    /// Duration hint written into the node lease.
    pub fn lease_duration(&self) -> Duration {
        self.ping_interval()
            .saturating_mul(self.lease.duration_multiplier)
    }
}

/// Lease configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Whether to use a lease store when one is supplied.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Lease duration as a multiple of the ping interval.
    #[serde(default = "default_duration_multiplier")]
    pub duration_multiplier: u32,

    /// Retry-on-conflict policy for renewals.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_multiplier: default_duration_multiplier(),
            retry: RetryConfig::default(),
        }
    }
}

/// Bounded exponential retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Ceiling on any single delay, in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.initial_backoff_ms);
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        base.saturating_mul(factor)
            .min(Duration::from_millis(self.max_backoff_ms))
    }
}

fn non_zero_or(secs: u64, default: Duration) -> Duration {
    if secs == 0 {
        default
    } else {
        Duration::from_secs(secs)
    }
}

fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL.as_secs()
}

fn default_status_interval() -> u64 {
    DEFAULT_STATUS_INTERVAL.as_secs()
}

fn default_ping_timeout() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_duration_multiplier() -> u32 {
    5
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    10
}

fn default_max_backoff() -> u64 {
    1000
}

static ENV_VAR: Lazy<regex_lite::Regex> = Lazy::new(|| {
    regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern is valid")
});

/// Substitute `${VAR}` references with environment values.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    for cap in ENV_VAR.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}
