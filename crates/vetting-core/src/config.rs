//! Service configuration
//!
//! Loaded from TOML, then overridden by `VETTING_*` environment variables.
//!
//! ```toml
//! default_session_minutes = 90
//! focus_grace_secs = 5
//!
//! [deadlines.author]
//! days = 7
//! hours = 0
//! minutes = 0
//!
//! [log]
//! level = "debug"
//! json = true
//! ```

use crate::error::ConfigError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use vetting_session::CoordinatorSettings;
use vetting_workflow::DeadlinePlan;

pub const ENV_WARNING_CAPACITY: &str = "VETTING_WARNING_CAPACITY";
pub const ENV_FOCUS_GRACE_SECS: &str = "VETTING_FOCUS_GRACE_SECS";
pub const ENV_PRESENCE_TTL_SECS: &str = "VETTING_PRESENCE_TTL_SECS";
pub const ENV_DEFAULT_SESSION_MINUTES: &str = "VETTING_DEFAULT_SESSION_MINUTES";
pub const ENV_BROADCAST_CAPACITY: &str = "VETTING_BROADCAST_CAPACITY";

/// Upper bound for the focus grace period and the typing indicator lifetime
pub const MAX_WATCHDOG_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Vetting service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VettingConfig {
    pub deadlines: DeadlinePlan,
    /// Warnings retained per participant
    pub warning_capacity: usize,
    pub focus_grace_secs: u64,
    pub presence_ttl_secs: u64,
    /// Session length when the final authority does not give one
    pub default_session_minutes: u32,
    pub broadcast_capacity: usize,
    pub log: LogConfig,
}

impl Default for VettingConfig {
    fn default() -> Self {
        Self {
            deadlines: DeadlinePlan::default(),
            warning_capacity: 50,
            focus_grace_secs: 5,
            presence_ttl_secs: 3,
            default_session_minutes: 60,
            broadcast_capacity: 256,
            log: LogConfig::default(),
        }
    }
}

impl VettingConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_deadlines(mut self, plan: DeadlinePlan) -> Self {
        self.deadlines = plan;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_warning_capacity(mut self, capacity: usize) -> Self {
        self.warning_capacity = capacity;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_focus_grace_secs(mut self, secs: u64) -> Self {
        self.focus_grace_secs = secs;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_presence_ttl_secs(mut self, secs: u64) -> Self {
        self.presence_ttl_secs = secs;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_default_session_minutes(mut self, minutes: u32) -> Self {
        self.default_session_minutes = minutes;
        self
    }

    /// Parse TOML. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML and
    /// [`ConfigError::Invalid`] when a value fails validation.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file and apply environment overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, or an
    /// override is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)?.with_env_overrides()
    }

    /// Apply `VETTING_*` overrides from the process environment
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] when a variable does not parse.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a custom lookup
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] when a variable does not parse.
    pub fn with_env_overrides_from<F>(mut self, get_env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env(&get_env, ENV_WARNING_CAPACITY)? {
            self.warning_capacity = v;
        }
        if let Some(v) = parse_env(&get_env, ENV_FOCUS_GRACE_SECS)? {
            self.focus_grace_secs = v;
        }
        if let Some(v) = parse_env(&get_env, ENV_PRESENCE_TTL_SECS)? {
            self.presence_ttl_secs = v;
        }
        if let Some(v) = parse_env(&get_env, ENV_DEFAULT_SESSION_MINUTES)? {
            self.default_session_minutes = v;
        }
        if let Some(v) = parse_env(&get_env, ENV_BROADCAST_CAPACITY)? {
            self.broadcast_capacity = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject zero capacities and durations, and watchdog periods longer
    /// than [`MAX_WATCHDOG_SECS`]
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let too_long = [
            ("focus_grace_secs", self.focus_grace_secs),
            ("presence_ttl_secs", self.presence_ttl_secs),
        ];
        if let Some((field, _)) = too_long.iter().find(|(_, secs)| *secs > MAX_WATCHDOG_SECS) {
            return Err(ConfigError::Invalid(format!(
                "{field} must be at most {MAX_WATCHDOG_SECS}"
            )));
        }
        let zero = [
            ("warning_capacity", self.warning_capacity == 0),
            ("focus_grace_secs", self.focus_grace_secs == 0),
            ("presence_ttl_secs", self.presence_ttl_secs == 0),
            ("default_session_minutes", self.default_session_minutes == 0),
            ("broadcast_capacity", self.broadcast_capacity == 0),
            ("deadlines.author", self.deadlines.author.total_ms() == 0),
            ("deadlines.compiler", self.deadlines.compiler.total_ms() == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(ConfigError::Invalid(format!("{field} must be non-zero"))),
            None => Ok(()),
        }
    }

    /// Out-of-range periods fall back to the coordinator defaults
    #[must_use]
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        let defaults = CoordinatorSettings::default();
        CoordinatorSettings {
            warning_capacity: self.warning_capacity,
            focus_grace: bounded_secs(self.focus_grace_secs).unwrap_or(defaults.focus_grace),
            presence_ttl: bounded_secs(self.presence_ttl_secs).unwrap_or(defaults.presence_ttl),
            broadcast_capacity: self.broadcast_capacity,
        }
    }
}

fn bounded_secs(secs: u64) -> Option<Duration> {
    if secs > MAX_WATCHDOG_SECS {
        return None;
    }
    Duration::try_seconds(i64::try_from(secs).ok()?)
}

fn parse_env<T, F>(get_env: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match get_env(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env {
                key: key.to_string(),
                value: raw,
            }),
    }
}
