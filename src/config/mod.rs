use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use crate::consensus::ConsensusConfig;
use crate::errors::{OrchestraError, OrchestraResult};
use crate::guardian::ValidatorConfig;
use crate::orchestrator::{BarrierConfig, OrchestratorConfig};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::trading::{AllocatorConfig, RegimeConfig, RiskConfig};

/// Environment variable naming a JSON file to start from instead of defaults
pub const CONFIG_FILE_VAR: &str = "ORCHESTRA_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Breakers around individual worker calls
    pub breaker: CircuitBreakerConfig,
    /// Breakers around whole sub-orchestrator runs
    pub domain_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub domain_retry: RetryConfig,
    pub barrier: BarrierConfig,
    pub consensus: ConsensusConfig,
    pub allocator: AllocatorConfig,
    pub risk: RiskConfig,
    pub regime: RegimeConfig,
    pub validator: ValidatorConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            domain_breaker: CircuitBreakerConfig::for_sub_orchestrators(),
            retry: RetryConfig::default(),
            domain_retry: RetryConfig {
                max_retries: 1,
                ..RetryConfig::default()
            },
            barrier: BarrierConfig::default(),
            consensus: ConsensusConfig::default(),
            allocator: AllocatorConfig::default(),
            risk: RiskConfig::default(),
            regime: RegimeConfig::default(),
            validator: ValidatorConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file - this sets env vars that aren't already set
        dotenv::dotenv().ok();

        let mut config = match env::var(CONFIG_FILE_VAR) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply scalar overrides from `lookup`, normally the process environment
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_with(&lookup, "ORCHESTRA_FAIL_MAX", &mut self.breaker.fail_max)?;
        override_with(&lookup, "ORCHESTRA_RESET_TIMEOUT_SECS", &mut self.breaker.reset_timeout_secs)?;
        override_with(&lookup, "ORCHESTRA_CALL_TIMEOUT_SECS", &mut self.breaker.call_timeout_secs)?;
        override_with(&lookup, "ORCHESTRA_MAX_RETRIES", &mut self.retry.max_retries)?;
        override_with(&lookup, "ORCHESTRA_BASE_DELAY_MS", &mut self.retry.base_delay_ms)?;
        override_with(&lookup, "ORCHESTRA_BARRIER_TIMEOUT_SECS", &mut self.barrier.timeout_secs)?;
        override_with(&lookup, "ORCHESTRA_NUMERIC_WEIGHT", &mut self.consensus.numeric_weight)?;
        override_with(&lookup, "ORCHESTRA_CATEGORICAL_WEIGHT", &mut self.consensus.categorical_weight)?;
        override_with(&lookup, "ORCHESTRA_CONVICTION_WEIGHT", &mut self.allocator.conviction_weight)?;
        override_with(&lookup, "ORCHESTRA_MAX_TOTAL_ALLOCATION", &mut self.allocator.max_total_allocation)?;
        override_with(&lookup, "ORCHESTRA_STALENESS_SECS", &mut self.validator.staleness_threshold_secs)?;
        override_with(&lookup, "ORCHESTRA_DRIFT_Z_THRESHOLD", &mut self.validator.drift.z_threshold)?;
        override_with(&lookup, "ORCHESTRA_DRIFT_MIN_SAMPLES", &mut self.validator.drift.min_samples)?;
        override_with(&lookup, "ORCHESTRA_QUARANTINE_SEVERITY", &mut self.validator.quarantine_severity)?;
        override_with(
            &lookup,
            "ORCHESTRA_GUARDIAN_MAX_RETRIES",
            &mut self.orchestrator.max_guardian_retries,
        )?;
        Ok(())
    }

    pub fn validate(&self) -> OrchestraResult<()> {
        for (label, breaker) in [("breaker", &self.breaker), ("domain_breaker", &self.domain_breaker)] {
            if breaker.fail_max == 0 {
                return Err(OrchestraError::config_error(format!(
                    "{}.fail_max must be at least 1",
                    label
                )));
            }
            let timeouts_valid = breaker.reset_timeout_secs >= 0.0 && breaker.call_timeout_secs > 0.0;
            if !timeouts_valid {
                return Err(OrchestraError::config_error(format!(
                    "{} timeouts must be positive",
                    label
                )));
            }
        }
        if self.barrier.timeout_secs.is_nan() || self.barrier.timeout_secs <= 0.0 {
            return Err(OrchestraError::config_error("barrier timeout must be positive"));
        }
        self.consensus.validate()?;
        self.allocator.validate()?;
        self.risk.validate()?;
        self.validator.validate()?;
        Ok(())
    }
}

fn override_with<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| anyhow!("{}", e))
            .with_context(|| format!("Invalid {} value", key))?;
    }
    Ok(())
}
