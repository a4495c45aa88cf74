//! Runtime settings.
//!
//! Defaults can be overridden through `CAIRN_*` environment variables; the
//! CLI applies its own flags on top.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::consts::{
  DEFAULT_RETRY_BUDGET, DEFAULT_STATE_DIR, ENV_RETRY_BUDGET, ENV_STATE_DIR, ENV_WAIT_INTERVAL, ENV_WAIT_PROMPT,
  ENV_WAIT_TIMEOUT,
};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("{var}: invalid duration '{value}': {source}")]
  InvalidDuration {
    var: &'static str,
    value: String,
    #[source]
    source: humantime::DurationError,
  },

  #[error("{var}: expected a positive number, got '{value}'")]
  InvalidNumber { var: &'static str, value: String },

  #[error("{var}: expected true or false, got '{value}'")]
  InvalidBool { var: &'static str, value: String },
}

/// How long to poll a resource that is still converging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitSettings {
  pub at_most: Duration,
  pub check_every: Duration,
  /// Ask the operator whether to keep waiting once `at_most` elapses.
  pub prompt: bool,
}

impl Default for WaitSettings {
  fn default() -> Self {
    Self {
      at_most: Duration::from_secs(10),
      check_every: Duration::from_secs(1),
      prompt: true,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
  pub state_dir: PathBuf,
  pub retry_budget: usize,
  pub wait: WaitSettings,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      state_dir: PathBuf::from(DEFAULT_STATE_DIR),
      retry_budget: DEFAULT_RETRY_BUDGET,
      wait: WaitSettings::default(),
    }
  }
}

impl Settings {
  /// Defaults overridden by whatever `CAIRN_*` variables are set.
  pub fn from_env() -> Result<Self, ConfigError> {
    let mut settings = Settings::default();

    if let Some(dir) = std::env::var_os(ENV_STATE_DIR) {
      settings.state_dir = PathBuf::from(dir);
    }
    if let Some(value) = env(ENV_RETRY_BUDGET) {
      settings.retry_budget = match value.parse::<usize>() {
        Ok(n) if n > 0 => n,
        _ => return Err(ConfigError::InvalidNumber { var: ENV_RETRY_BUDGET, value }),
      };
    }
    if let Some(value) = env(ENV_WAIT_TIMEOUT) {
      settings.wait.at_most = duration(ENV_WAIT_TIMEOUT, value)?;
    }
    if let Some(value) = env(ENV_WAIT_INTERVAL) {
      settings.wait.check_every = duration(ENV_WAIT_INTERVAL, value)?;
    }
    if let Some(value) = env(ENV_WAIT_PROMPT) {
      settings.wait.prompt = match value.to_lowercase().as_str() {
        "1" | "true" | "yes" => true,
        "0" | "false" | "no" => false,
        _ => return Err(ConfigError::InvalidBool { var: ENV_WAIT_PROMPT, value }),
      };
    }

    Ok(settings)
  }
}

fn env(var: &str) -> Option<String> {
  std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn duration(var: &'static str, value: String) -> Result<Duration, ConfigError> {
  humantime::parse_duration(value.trim()).map_err(|source| ConfigError::InvalidDuration { var, value, source })
}
