use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;
use crate::runner::IsolationMode;

/// File looked up in the directory passed to [`Config::load`].
pub const CONFIG_FILE: &str = "checkrun.toml";

pub const ENV_FORK: &str = "CHECKRUN_FORK";
pub const ENV_DEFAULT_TIMEOUT: &str = "CHECKRUN_DEFAULT_TIMEOUT";
pub const ENV_TIMEOUT_MULTIPLIER: &str = "CHECKRUN_TIMEOUT_MULTIPLIER";
pub const ENV_RUN_SUITE: &str = "CHECKRUN_RUN_SUITE";
pub const ENV_RUN_CASE: &str = "CHECKRUN_RUN_CASE";
pub const ENV_INCLUDE_TAGS: &str = "CHECKRUN_INCLUDE_TAGS";
pub const ENV_EXCLUDE_TAGS: &str = "CHECKRUN_EXCLUDE_TAGS";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub isolation: IsolationMode,
    /// Timeout for cases that do not set their own. Zero disables it.
    pub default_timeout_secs: f64,
    /// Scales every timeout, including ones set on a case.
    pub timeout_multiplier: f64,
    pub filter: FilterConfig,
}

/// Which suites, cases and tags a run selects.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FilterConfig {
    /// Glob over suite names.
    pub suite: Option<String>,
    /// Glob over case names.
    pub case: Option<String>,
    pub include_tags: Option<String>,
    pub exclude_tags: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            isolation: IsolationMode::Isolated,
            default_timeout_secs: 4.0,
            timeout_multiplier: 1.0,
            filter: FilterConfig::default(),
        }
    }
}

impl Config {
    /// Load `checkrun.toml` from `dir`, falling back to defaults if absent or invalid.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        match toml::from_str::<Self>(&content) {
            Ok(config) => match config.validate() {
                Ok(()) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring invalid config");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unparsable config");
                Self::default()
            }
        }
    }

    /// Layer `CHECKRUN_*` environment variables on top of `self`.
    pub fn from_env(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Like [`Config::from_env`] with an arbitrary variable lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_FORK) {
            self.isolation = match value.trim() {
                "yes" => IsolationMode::Isolated,
                "no" => IsolationMode::Inline,
                _ => {
                    return Err(ConfigError::InvalidSwitch {
                        key: ENV_FORK.to_string(),
                        value,
                    });
                }
            };
        }
        if let Some(value) = lookup(ENV_DEFAULT_TIMEOUT) {
            self.default_timeout_secs = parse_secs(ENV_DEFAULT_TIMEOUT, &value)?;
        }
        if let Some(value) = lookup(ENV_TIMEOUT_MULTIPLIER) {
            self.timeout_multiplier = parse_secs(ENV_TIMEOUT_MULTIPLIER, &value)?;
        }
        if let Some(value) = lookup(ENV_RUN_SUITE) {
            self.filter.suite = Some(value);
        }
        if let Some(value) = lookup(ENV_RUN_CASE) {
            self.filter.case = Some(value);
        }
        if let Some(value) = lookup(ENV_INCLUDE_TAGS) {
            self.filter.include_tags = Some(value);
        }
        if let Some(value) = lookup(ENV_EXCLUDE_TAGS) {
            self.filter.exclude_tags = Some(value);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_secs("default_timeout_secs", self.default_timeout_secs)?;
        check_secs("timeout_multiplier", self.timeout_multiplier)?;
        Ok(())
    }

    /// Timeout a case actually runs under, or `None` when disabled.
    pub fn effective_timeout(&self, case_timeout: Option<Duration>) -> Option<Duration> {
        let base = match case_timeout {
            Some(t) => t,
            None => Duration::try_from_secs_f64(self.default_timeout_secs).ok()?,
        };
        let scaled = Duration::try_from_secs_f64(base.as_secs_f64() * self.timeout_multiplier).ok()?;
        (!scaled.is_zero()).then_some(scaled)
    }
}

fn parse_secs(key: &str, value: &str) -> Result<f64, ConfigError> {
    let secs = value
        .trim()
        .parse::<f64>()
        .map_err(|_| ConfigError::InvalidNumber {
            key: key.to_string(),
            value: value.to_string(),
        })?;
    check_secs(key, secs)?;
    Ok(secs)
}

fn check_secs(key: &str, secs: f64) -> Result<(), ConfigError> {
    if secs.is_finite() && secs >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidNumber {
            key: key.to_string(),
            value: secs.to_string(),
        })
    }
}
