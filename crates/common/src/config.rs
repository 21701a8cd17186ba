//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for a single action invocation
    pub per_step_timeout_ms: u64,

    /// Stop a scenario at the first non-optional fatal failure
    pub fail_fast: bool,

    /// Number of scenarios run concurrently by the suite runner
    pub parallelism: usize,

    /// Retry configuration
    pub retry: RetryConfig,

    /// Probe configuration
    pub probe: ProbeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            per_step_timeout_ms: 10_000,
            fail_fast: true,
            parallelism: 1,
            retry: RetryConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

/// Backoff strategy between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

impl std::fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackoffStrategy::Fixed => write!(f, "fixed"),
            BackoffStrategy::Linear => write!(f, "linear"),
            BackoffStrategy::Exponential => write!(f, "exponential"),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempt ceiling, including the first attempt
    pub max_attempts: u32,

    /// How the delay grows between attempts
    pub backoff: BackoffStrategy,

    /// Base delay the strategy scales
    pub base_delay_ms: u64,

    /// Optional cap on any single delay
    pub max_delay_ms: Option<u64>,

    /// Random extra delay as a fraction of the computed delay (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Fixed,
            base_delay_ms: 1_000,
            max_delay_ms: None,
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_ms.map(Duration::from_millis)
    }

    /// Check the contract rules for a retry configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.jitter.is_finite() || !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::InvalidConfig(format!(
                "retry.jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }
        if let Some(max) = self.max_delay_ms {
            if max < self.base_delay_ms {
                return Err(Error::InvalidConfig(format!(
                    "retry.max_delay_ms ({}) is below retry.base_delay_ms ({})",
                    max, self.base_delay_ms
                )));
            }
        }
        Ok(())
    }
}

/// Probe configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// How long an `expect` step or branch probe keeps polling
    pub timeout_ms: u64,

    /// Delay between two polls of the environment
    pub poll_interval_ms: u64,

    /// How long action preconditions may take to appear
    pub precondition_timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 4_000,
            poll_interval_ms: 100,
            precondition_timeout_ms: 2_000,
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn precondition_timeout(&self) -> Duration {
        Duration::from_millis(self.precondition_timeout_ms)
    }
}

impl EngineConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject malformed configuration before any scenario starts
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        if self.probe.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "probe.poll_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.parallelism == 0 {
            return Err(Error::InvalidConfig(
                "parallelism must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn per_step_timeout(&self) -> Duration {
        Duration::from_millis(self.per_step_timeout_ms)
    }
}
