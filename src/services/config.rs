//! Typed configuration for the swarm execution core.
//!
//! All recognized options are enumerated here; unknown keys are rejected at
//! load time. Every section has defaults so an empty file is a valid
//! configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::services::load_balancer::{StrategyKind, StrategyWeights};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
    #[error("Failed to read configuration: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed for {field}: {reason}")]
    ValidationError { field: String, reason: String },
}

/// Engine section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    /// Max retries per task.
    pub retry_attempts: u32,
    /// Initial backoff delay in milliseconds.
    pub retry_delay_ms: u64,
    /// Exponential backoff multiplier.
    pub retry_backoff_multiplier: f64,
    /// Whether descendants of failed tasks attempt anyway.
    pub continue_on_failure: bool,
    /// Cap on in-flight tasks per level; absent means the level size.
    pub concurrency_limit: Option<usize>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 100,
            retry_backoff_multiplier: 2.0,
            continue_on_failure: false,
            concurrency_limit: None,
        }
    }
}

/// Circuit breaker section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerSection {
    /// Consecutive failures to trip closed -> open.
    pub failure_threshold: u32,
    /// Consecutive successes to reclose in half-open.
    pub success_threshold: u32,
    /// Delay open -> half-open in milliseconds.
    pub reset_timeout_ms: u64,
    /// Trial admission cap while half-open.
    pub half_open_max_calls: u32,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 30_000,
            half_open_max_calls: 1,
        }
    }
}

/// Budget section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BudgetSection {
    /// Whether an exceeded budget stops the agent runtime.
    pub auto_stop: bool,
    /// Warn threshold fraction, in (0, 1].
    pub warn_fraction: f64,
    /// Stop threshold fraction, in (0, 1].
    pub stop_fraction: f64,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            auto_stop: false,
            warn_fraction: 0.8,
            stop_fraction: 1.0,
        }
    }
}

/// Load-balancing strategy section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategySection {
    /// Active strategy.
    pub kind: StrategyKind,
    /// Weight on inverse cost for the weighted strategy.
    pub weight_cost: f64,
    /// Weight on average speed for the weighted strategy.
    pub weight_speed: f64,
    /// Weight on reliability for the weighted strategy.
    pub weight_reliability: f64,
    /// Virtual nodes per agent for consistent hashing.
    pub ring_replicas: usize,
}

impl Default for StrategySection {
    fn default() -> Self {
        let weights = StrategyWeights::default();
        Self {
            kind: StrategyKind::default(),
            weight_cost: weights.cost,
            weight_speed: weights.speed,
            weight_reliability: weights.reliability,
            ring_replicas: crate::services::load_balancer::DEFAULT_RING_REPLICAS,
        }
    }
}

impl StrategySection {
    pub fn weights(&self) -> StrategyWeights {
        StrategyWeights {
            cost: self.weight_cost,
            speed: self.weight_speed,
            reliability: self.weight_reliability,
        }
    }
}

/// Registry section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySection {
    /// Heartbeat staleness cutoff in milliseconds.
    pub liveness_timeout_ms: u64,
    /// Liveness sweep interval in milliseconds.
    pub health_check_interval_ms: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            liveness_timeout_ms: 30_000,
            health_check_interval_ms: 5_000,
        }
    }
}

/// Event bus section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventsSection {
    /// Per-subscriber queue capacity.
    pub channel_capacity: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Root configuration record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SwarmConfig {
    pub engine: EngineSection,
    pub breaker: BreakerSection,
    pub budget: BudgetSection,
    pub strategy: StrategySection,
    pub registry: RegistrySection,
    pub events: EventsSection,
}

impl SwarmConfig {
    /// Load from a TOML file. Unknown keys are rejected.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse from a TOML string and validate.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fraction = |field: &str, value: f64| -> Result<(), ConfigError> {
            if value <= 0.0 || value > 1.0 {
                return Err(ConfigError::ValidationError {
                    field: field.to_string(),
                    reason: format!("must be in (0, 1], got {value}"),
                });
            }
            Ok(())
        };

        fraction("budget.warn_fraction", self.budget.warn_fraction)?;
        fraction("budget.stop_fraction", self.budget.stop_fraction)?;
        if self.budget.warn_fraction > self.budget.stop_fraction {
            return Err(ConfigError::ValidationError {
                field: "budget.warn_fraction".to_string(),
                reason: "must not exceed budget.stop_fraction".to_string(),
            });
        }

        self.strategy
            .weights()
            .validate()
            .map_err(|reason| ConfigError::ValidationError {
                field: "strategy.weights".to_string(),
                reason,
            })?;

        if self.strategy.ring_replicas == 0 {
            return Err(ConfigError::ValidationError {
                field: "strategy.ring_replicas".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError {
                field: "breaker.failure_threshold".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.breaker.success_threshold == 0 {
            return Err(ConfigError::ValidationError {
                field: "breaker.success_threshold".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.breaker.half_open_max_calls == 0 {
            return Err(ConfigError::ValidationError {
                field: "breaker.half_open_max_calls".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.registry.liveness_timeout_ms == 0 {
            return Err(ConfigError::ValidationError {
                field: "registry.liveness_timeout_ms".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}
