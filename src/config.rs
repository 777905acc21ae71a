use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(100);
pub const DEFAULT_SIMULATED_DELAY: (Duration, Duration) =
    (Duration::from_millis(500), Duration::from_millis(1500));
pub const DEFAULT_JS_MEMORY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{var}: expected a number, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{var}: expected a range like `500..1500`, got {value:?}")]
    InvalidRange { var: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Used when the caller does not pass a timeout.
    pub default_timeout: Duration,
    /// How long pending async callbacks may run after the script body returns.
    pub grace_period: Duration,
    /// Inclusive bounds of the artificial latency for simulated languages.
    pub simulated_delay: (Duration, Duration),
    pub js_memory_limit: Option<usize>,
    /// Interpreter executables probed in order when bootstrapping Python.
    pub python_candidates: Vec<String>,
    /// Where Python sources are written before running.
    pub scratch_dir: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            default_timeout: DEFAULT_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            simulated_delay: DEFAULT_SIMULATED_DELAY,
            js_memory_limit: Some(DEFAULT_JS_MEMORY_BYTES),
            python_candidates: vec!["python3".to_string(), "python".to_string()],
            scratch_dir: std::env::temp_dir().join("codeexec"),
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ExecutorConfig::default();

        if let Some(value) = lookup("CODEEXEC_TIMEOUT_MS") {
            config.default_timeout = millis("CODEEXEC_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("CODEEXEC_GRACE_MS") {
            config.grace_period = millis("CODEEXEC_GRACE_MS", &value)?;
        }
        if let Some(value) = lookup("CODEEXEC_SIM_DELAY_MS") {
            config.simulated_delay = millis_range("CODEEXEC_SIM_DELAY_MS", &value)?;
        }
        if let Some(value) = lookup("CODEEXEC_JS_MEMORY_BYTES") {
            let bytes = number("CODEEXEC_JS_MEMORY_BYTES", &value)?;
            // 0 lifts the limit
            config.js_memory_limit = (bytes > 0).then_some(bytes as usize);
        }
        if let Some(value) = lookup("CODEEXEC_PYTHON") {
            let candidates: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if !candidates.is_empty() {
                config.python_candidates = candidates;
            }
        }
        if let Some(value) = lookup("CODEEXEC_SCRATCH_DIR") {
            config.scratch_dir = PathBuf::from(value);
        }

        Ok(config)
    }
}

fn number(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: value.to_string(),
    })
}

fn millis(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    number(var, value).map(Duration::from_millis)
}

fn millis_range(var: &'static str, value: &str) -> Result<(Duration, Duration), ConfigError> {
    let invalid = || ConfigError::InvalidRange {
        var,
        value: value.to_string(),
    };
    let (min, max) = value.split_once("..").ok_or_else(invalid)?;
    let min = min.trim().parse::<u64>().map_err(|_| invalid())?;
    let max = max.trim().parse::<u64>().map_err(|_| invalid())?;
    if min > max {
        return Err(invalid());
    }
    Ok((Duration::from_millis(min), Duration::from_millis(max)))
}
