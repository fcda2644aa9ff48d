//! Budget accounts and enforcement scopes.

use serde::{Deserialize, Serialize};

/// Scope a budget applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetScope {
    /// One agent's spend.
    Agent(String),
    /// Aggregate spend of a named team.
    Team(String),
    /// Process-wide spend.
    Global,
}

impl BudgetScope {
    pub fn agent(id: impl Into<String>) -> Self {
        Self::Agent(id.into())
    }

    pub fn team(name: impl Into<String>) -> Self {
        Self::Team(name.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Agent(_) => "agent",
            Self::Team(_) => "team",
            Self::Global => "global",
        }
    }
}

impl std::fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent(id) => write!(f, "agent:{id}"),
            Self::Team(name) => write!(f, "team:{name}"),
            Self::Global => write!(f, "global"),
        }
    }
}

/// Derived status of a budget account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Ok,
    Warning,
    Exceeded,
}

/// A spend account with warn/stop thresholds expressed as fractions of the
/// limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAccount {
    pub scope: BudgetScope,
    /// Spend limit in USD.
    pub limit: f64,
    /// Accumulated spend in USD; never negative.
    pub current_spend: f64,
    /// Fraction of the limit at which warnings begin, in (0, 1].
    pub warn_fraction: f64,
    /// Fraction of the limit at which dispatch stops, in (0, 1].
    pub stop_fraction: f64,
}

impl BudgetAccount {
    pub fn new(scope: BudgetScope, limit: f64) -> Self {
        Self {
            scope,
            limit,
            current_spend: 0.0,
            warn_fraction: 0.8,
            stop_fraction: 1.0,
        }
    }

    pub fn with_thresholds(mut self, warn_fraction: f64, stop_fraction: f64) -> Self {
        self.warn_fraction = warn_fraction;
        self.stop_fraction = stop_fraction;
        self
    }

    /// Status is a pure function of spend and thresholds.
    pub fn status(&self) -> BudgetStatus {
        if self.limit <= 0.0 {
            return BudgetStatus::Ok;
        }
        let consumed = self.current_spend / self.limit;
        if consumed >= self.stop_fraction {
            BudgetStatus::Exceeded
        } else if consumed >= self.warn_fraction {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Ok
        }
    }

    /// Record additional spend. Negative amounts are clamped to zero.
    pub fn record_spend(&mut self, amount: f64) {
        self.current_spend += amount.max(0.0);
    }

    /// Set spend to an absolute value (used when reconciling against the
    /// live cost tracker). Negative values clamp to zero.
    pub fn set_spend(&mut self, amount: f64) {
        self.current_spend = amount.max(0.0);
    }

    pub fn remaining(&self) -> f64 {
        (self.limit - self.current_spend).max(0.0)
    }

    /// Reset spend to zero, e.g. on a billing window rollover.
    pub fn reset(&mut self) {
        self.current_spend = 0.0;
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.warn_fraction) || self.warn_fraction == 0.0 {
            return Err(format!(
                "warn_fraction must be in (0, 1], got {}",
                self.warn_fraction
            ));
        }
        if !(0.0..=1.0).contains(&self.stop_fraction) || self.stop_fraction == 0.0 {
            return Err(format!(
                "stop_fraction must be in (0, 1], got {}",
                self.stop_fraction
            ));
        }
        if self.warn_fraction > self.stop_fraction {
            return Err("warn_fraction must not exceed stop_fraction".to_string());
        }
        Ok(())
    }
}
