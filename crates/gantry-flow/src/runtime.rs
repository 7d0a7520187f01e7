//! Runtime configuration for the orchestration engine.
//!
//! Limits are explicit and environment-driven so operators can tune batch
//! sizing and retry ceilings per deployment without code changes. Values
//! must be positive integers; anything else is rejected at startup.

use crate::error::{Error, Result};
use crate::operation::BatchingOptions;
use crate::orchestrator::OrchestratorConfig;
use crate::retry::RetryPolicy;

const ENV_BATCH_SIZE: &str = "GANTRY_FLOW_BATCH_SIZE";
const ENV_MAX_PARALLEL_BATCHES: &str = "GANTRY_FLOW_MAX_PARALLEL_BATCHES";
const ENV_RETRY_MAX_ATTEMPTS: &str = "GANTRY_FLOW_RETRY_MAX_ATTEMPTS";
const ENV_MAX_WAVES_PER_SEGMENT: &str = "GANTRY_FLOW_MAX_WAVES_PER_SEGMENT";

const DEFAULT_BATCH_SIZE: u64 = 100;
const DEFAULT_MAX_PARALLEL_BATCHES: u64 = 2;
const DEFAULT_RETRY_MAX_ATTEMPTS: u64 = 4;
const DEFAULT_MAX_WAVES_PER_SEGMENT: u64 = 8;

/// Engine-wide runtime limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRuntimeConfig {
    /// Watermarks per batch.
    pub batch_size: usize,
    /// Batches dispatched per wave.
    pub max_parallel_batches: usize,
    /// Attempt ceiling for the retry policy.
    pub retry_max_attempts: u32,
    /// Waves per execution segment before continuing as new.
    pub max_waves_per_segment: usize,
}

impl Default for FlowRuntimeConfig {
    fn default() -> Self {
        Self {
            batch_size: usize::try_from(DEFAULT_BATCH_SIZE).unwrap_or(100),
            max_parallel_batches: usize::try_from(DEFAULT_MAX_PARALLEL_BATCHES).unwrap_or(2),
            retry_max_attempts: u32::try_from(DEFAULT_RETRY_MAX_ATTEMPTS).unwrap_or(4),
            max_waves_per_segment: usize::try_from(DEFAULT_MAX_WAVES_PER_SEGMENT).unwrap_or(8),
        }
    }
}

impl FlowRuntimeConfig {
    /// Loads runtime config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error when an environment value is not a
    /// positive integer.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads runtime config with a custom environment source.
    ///
    /// This entry point is test-friendly and accepts a key lookup function.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error when an environment value is not a
    /// positive integer.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let batch_size = parse_positive_u64_env(&get_env, ENV_BATCH_SIZE, DEFAULT_BATCH_SIZE)?;
        let max_parallel_batches = parse_positive_u64_env(
            &get_env,
            ENV_MAX_PARALLEL_BATCHES,
            DEFAULT_MAX_PARALLEL_BATCHES,
        )?;
        let retry_max_attempts = parse_positive_u64_env(
            &get_env,
            ENV_RETRY_MAX_ATTEMPTS,
            DEFAULT_RETRY_MAX_ATTEMPTS,
        )?;
        let max_waves_per_segment = parse_positive_u64_env(
            &get_env,
            ENV_MAX_WAVES_PER_SEGMENT,
            DEFAULT_MAX_WAVES_PER_SEGMENT,
        )?;

        Ok(Self {
            batch_size: usize::try_from(batch_size)
                .map_err(|_| range_error(ENV_BATCH_SIZE, batch_size))?,
            max_parallel_batches: usize::try_from(max_parallel_batches)
                .map_err(|_| range_error(ENV_MAX_PARALLEL_BATCHES, max_parallel_batches))?,
            retry_max_attempts: u32::try_from(retry_max_attempts)
                .map_err(|_| range_error(ENV_RETRY_MAX_ATTEMPTS, retry_max_attempts))?,
            max_waves_per_segment: usize::try_from(max_waves_per_segment)
                .map_err(|_| range_error(ENV_MAX_WAVES_PER_SEGMENT, max_waves_per_segment))?,
        })
    }

    /// Builds the orchestrator configuration these limits describe.
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            batching: BatchingOptions {
                size: self.batch_size,
                max_parallel: self.max_parallel_batches,
            },
            retry: RetryPolicy::with_max_attempts(self.retry_max_attempts),
            max_waves_per_segment: self.max_waves_per_segment,
            ..OrchestratorConfig::default()
        }
    }
}

fn range_error(key: &str, value: u64) -> Error {
    Error::invalid_input(format!("{key} value {value} exceeds supported range"))
}

fn parse_positive_u64_env<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };

    let parsed = raw.parse::<u64>().map_err(|_| {
        Error::invalid_input(format!("{key} must be a positive integer, got '{raw}'"))
    })?;
    if parsed == 0 {
        return Err(Error::invalid_input(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_environment() {
        let config = FlowRuntimeConfig::from_env_with(|_| None).unwrap();
        assert_eq!(config, FlowRuntimeConfig::default());
    }

    #[test]
    fn environment_overrides_apply() {
        let config = FlowRuntimeConfig::from_env_with(|key| match key {
            ENV_BATCH_SIZE => Some("500".into()),
            ENV_MAX_PARALLEL_BATCHES => Some("4".into()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.batch_size, 500);
        assert_eq!(config.max_parallel_batches, 4);
        assert_eq!(config.retry_max_attempts, 4);
    }

    #[test]
    fn rejects_zero_values() {
        let result = FlowRuntimeConfig::from_env_with(|key| {
            (key == ENV_BATCH_SIZE).then(|| "0".to_string())
        });
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
    }

    #[test]
    fn rejects_garbage_values() {
        let result = FlowRuntimeConfig::from_env_with(|key| {
            (key == ENV_RETRY_MAX_ATTEMPTS).then(|| "many".to_string())
        });
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
    }

    #[test]
    fn orchestrator_config_carries_limits() {
        let runtime = FlowRuntimeConfig {
            batch_size: 25,
            retry_max_attempts: 2,
            ..FlowRuntimeConfig::default()
        };

        let config = runtime.orchestrator_config();
        assert_eq!(config.batching.size, 25);
        assert_eq!(config.retry.max_attempts, 2);
    }
}
