use steward_model::SamplingOptions;

use crate::error::ConfigError;
use crate::model_client::RetryPolicy;

const DEFAULT_MAX_STEPS: usize = 10;

/// Tunables of the reasoning loop.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentConfig {
    /// Model calls allowed in one turn.
    pub max_steps: usize,
    /// Retries of transient model failures.
    pub retry: RetryPolicy,
    /// Sampling parameters sent with every model request.
    pub sampling: SamplingOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            retry: RetryPolicy::default(),
            sampling: SamplingOptions::default(),
        }
    }
}

impl AgentConfig {
    /// Checks the values, reporting the first invalid one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::new("max_steps", "must be at least 1"));
        }
        if self.retry.initial_interval > self.retry.max_interval {
            return Err(ConfigError::new(
                "retry.initial_interval",
                "must not exceed retry.max_interval",
            ));
        }
        let SamplingOptions {
            temperature,
            top_p,
            max_tokens,
        } = self.sampling;
        if let Some(temperature) = temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::new(
                    "temperature",
                    format!("{temperature} is outside [0, 2]"),
                ));
            }
        }
        if let Some(top_p) = top_p {
            if !(top_p > 0.0 && top_p <= 1.0) {
                return Err(ConfigError::new(
                    "top_p",
                    format!("{top_p} is outside (0, 1]"),
                ));
            }
        }
        if max_tokens == Some(0) {
            return Err(ConfigError::new("max_tokens", "must be at least 1"));
        }
        Ok(())
    }
}
