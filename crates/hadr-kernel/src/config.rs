//! Engine configuration
//!
//! ```toml
//! treat_warnings_as_errors = false
//! disabled_validators = ["Checking listener configuration"]
//!
//! [validation.policy]
//! kind = "run_once"
//!
//! [tasks.policy]
//! kind = "fixed_retry_count"
//! retries = 3
//! backoff_ms = 1000
//! ```

use crate::policy::{
    ExecutionPolicy, FixedRetryCountPolicy, FixedTimeoutRetryPolicy, RunOncePolicy,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Backoff between task attempts when a policy does not set one.
pub const DEFAULT_BACKOFF_MS: u64 = 1_000;
/// Retries of the default task policy.
pub const DEFAULT_TASK_RETRIES: u32 = 3;

/// Why a configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {}", path.display())]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying read failure.
        #[source]
        source: std::io::Error,
    },
    /// The TOML did not match the expected shape.
    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),
    /// A value was out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Serializable description of an [`ExecutionPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicySpec {
    /// One attempt, no retries.
    RunOnce,
    /// A fixed number of retries after the first attempt.
    FixedRetryCount {
        /// Retries after the first attempt.
        retries: u32,
        /// Pause between attempts.
        #[serde(default = "default_backoff_ms")]
        backoff_ms: u64,
    },
    /// Retry until a wall-clock budget runs out.
    FixedTimeoutRetry {
        /// Total budget, measured from the first attempt.
        timeout_ms: u64,
        /// Pause between attempts.
        #[serde(default = "default_backoff_ms")]
        backoff_ms: u64,
    },
}

fn default_backoff_ms() -> u64 {
    DEFAULT_BACKOFF_MS
}

impl PolicySpec {
    /// A fresh policy for one invocation.
    pub fn build(&self) -> Box<dyn ExecutionPolicy> {
        match *self {
            PolicySpec::RunOnce => Box::new(RunOncePolicy::new()),
            PolicySpec::FixedRetryCount {
                retries,
                backoff_ms,
            } => Box::new(FixedRetryCountPolicy::new(
                retries,
                Duration::from_millis(backoff_ms),
            )),
            PolicySpec::FixedTimeoutRetry {
                timeout_ms,
                backoff_ms,
            } => Box::new(FixedTimeoutRetryPolicy::new(
                Duration::from_millis(timeout_ms),
                Duration::from_millis(backoff_ms),
            )),
        }
    }

    fn validate(&self, phase: &str) -> Result<(), ConfigError> {
        match *self {
            PolicySpec::FixedTimeoutRetry {
                timeout_ms,
                backoff_ms,
            } => {
                if timeout_ms == 0 {
                    return Err(ConfigError::Invalid(format!(
                        "{phase}.policy.timeout_ms must be greater than zero"
                    )));
                }
                if backoff_ms >= timeout_ms {
                    return Err(ConfigError::Invalid(format!(
                        "{phase}.policy.backoff_ms ({backoff_ms}) must be smaller than timeout_ms ({timeout_ms})"
                    )));
                }
                Ok(())
            }
            PolicySpec::RunOnce | PolicySpec::FixedRetryCount { .. } => Ok(()),
        }
    }
}

/// Settings of one phase, validation or tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseConfig {
    /// Policy built fresh for each validator or task.
    pub policy: PolicySpec,
}

impl PhaseConfig {
    /// A phase running under `policy`.
    pub fn new(policy: PolicySpec) -> Self {
        Self { policy }
    }
}

fn default_validation() -> PhaseConfig {
    PhaseConfig::new(PolicySpec::RunOnce)
}

fn default_tasks() -> PhaseConfig {
    PhaseConfig::new(PolicySpec::FixedRetryCount {
        retries: DEFAULT_TASK_RETRIES,
        backoff_ms: DEFAULT_BACKOFF_MS,
    })
}

/// Runner settings, loaded from TOML or built in code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Policy for validators. Defaults to run-once.
    #[serde(default = "default_validation")]
    pub validation: PhaseConfig,
    /// Policy for tasks. Defaults to 3 retries one second apart.
    #[serde(default = "default_tasks")]
    pub tasks: PhaseConfig,
    /// Stop on validation warnings instead of recording them.
    #[serde(default)]
    pub treat_warnings_as_errors: bool,
    /// Validators skipped by name.
    #[serde(default)]
    pub disabled_validators: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            validation: default_validation(),
            tasks: default_tasks(),
            treat_warnings_as_errors: false,
            disabled_validators: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&input)?;
        tracing::debug!(path = %path.display(), "engine config loaded");
        Ok(config)
    }

    /// Reject empty validator names and unusable timeout policies.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validation.policy.validate("validation")?;
        self.tasks.policy.validate("tasks")?;
        if let Some(blank) = self
            .disabled_validators
            .iter()
            .position(|name| name.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "disabled_validators[{blank}] is empty"
            )));
        }
        Ok(())
    }

    /// Whether the runner skips the validator called `name`.
    pub fn is_validator_disabled(&self, name: &str) -> bool {
        self.disabled_validators.iter().any(|d| d == name)
    }

    /// Skip the validator called `name`.
    pub fn disable_validator(mut self, name: impl Into<String>) -> Self {
        self.disabled_validators.push(name.into());
        self
    }

    /// Replace the task policy.
    pub fn with_task_policy(mut self, policy: PolicySpec) -> Self {
        self.tasks.policy = policy;
        self
    }

    /// Replace the validation policy.
    pub fn with_validation_policy(mut self, policy: PolicySpec) -> Self {
        self.validation.policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.validation.policy, PolicySpec::RunOnce);
    }

    #[test]
    fn backoff_defaults_when_omitted() {
        let config = EngineConfig::from_toml_str(
            r#"
            [tasks.policy]
            kind = "fixed_retry_count"
            retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(
            config.tasks.policy,
            PolicySpec::FixedRetryCount {
                retries: 5,
                backoff_ms: DEFAULT_BACKOFF_MS
            }
        );
    }

    #[test]
    fn backoff_longer_than_timeout_is_invalid() {
        let err = EngineConfig::from_toml_str(
            r#"
            [tasks.policy]
            kind = "fixed_timeout_retry"
            timeout_ms = 100
            backoff_ms = 500
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_kind_is_a_parse_error() {
        let err = EngineConfig::from_toml_str(
            r#"
            [tasks.policy]
            kind = "exponential"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn built_policies_are_fresh() {
        let spec = PolicySpec::FixedRetryCount {
            retries: 1,
            backoff_ms: 0,
        };
        let mut first = spec.build();
        assert!(first.resume_execution());
        assert!(first.resume_execution());
        assert!(!first.resume_execution());
        let mut second = spec.build();
        assert!(second.resume_execution());
    }
}
