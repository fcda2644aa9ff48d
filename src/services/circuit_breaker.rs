//! Circuit breaker pattern for per-agent failure detection and recovery.
//!
//! Each agent has at most one breaker, indexed by name. A breaker trips open
//! after a run of consecutive failures, rejects dispatch while open, admits
//! a bounded number of concurrent trial calls once the reset timeout
//! elapses, and recloses after enough consecutive trial successes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::errors::{SwarmError, SwarmResult};
use crate::domain::ports::SharedClock;
use crate::services::event_bus::{EventBus, EventPayload, SwarmEvent};

/// Configuration for circuit breakers.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit open.
    pub failure_threshold: u32,
    /// Consecutive successes in half-open that reclose the circuit.
    pub success_threshold: u32,
    /// How long the circuit stays open before admitting trial calls.
    pub reset_timeout_ms: u64,
    /// Maximum concurrent trial calls admitted while half-open.
    pub half_open_max_calls: u32,
    /// Window for the failure-rate metric.
    pub monitoring_window_ms: u64,
    /// Whether breakers gate dispatch at all.
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_ms: 30_000,
            half_open_max_calls: 1,
            monitoring_window_ms: 60_000,
            enabled: true,
        }
    }
}

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected.
    Open,
    /// Bounded trial calls probe for recovery.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// One breaker's mutable state.
#[derive(Debug, Clone)]
struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<DateTime<Utc>>,
    opened_count: u32,
    total_calls: u64,
    rejected_calls: u64,
    last_error: Option<String>,
    last_failure_time: Option<DateTime<Utc>>,
    /// Trial calls currently admitted in half-open.
    trial_in_flight: u32,
    /// (timestamp, success) outcomes for the failure-rate window.
    outcomes: VecDeque<(DateTime<Utc>, bool)>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            opened_count: 0,
            total_calls: 0,
            rejected_calls: 0,
            last_error: None,
            last_failure_time: None,
            trial_in_flight: 0,
            outcomes: VecDeque::new(),
        }
    }

    fn prune_outcomes(&mut self, now: DateTime<Utc>, window_ms: u64) {
        let cutoff = now - chrono::Duration::milliseconds(window_ms as i64);
        while let Some(&(ts, _)) = self.outcomes.front() {
            if ts <= cutoff {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|(_, ok)| !ok).count();
        failures as f64 / self.outcomes.len() as f64
    }
}

/// Point-in-time metrics for one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub opened_count: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub failure_rate: f64,
    pub last_error: Option<String>,
    pub last_failure_time: Option<DateTime<Utc>>,
}

/// Result of asking a breaker whether dispatch is permitted.
#[derive(Debug, Clone, PartialEq)]
pub enum BreakerDecision {
    /// Circuit closed; dispatch freely.
    Allowed,
    /// Half-open trial admitted. The caller must report the outcome.
    Trial,
    /// Circuit open; dispatch rejected.
    Rejected { retry_after: Option<DateTime<Utc>> },
}

impl BreakerDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed | Self::Trial)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Registry of per-agent circuit breakers.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    clock: SharedClock,
    event_bus: Arc<EventBus>,
    breakers: RwLock<HashMap<String, Breaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: SharedClock, event_bus: Arc<EventBus>) -> Self {
        Self {
            config,
            clock,
            event_bus,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Ask whether a dispatch to `name` is permitted. Open circuits whose
    /// reset timeout has elapsed transition to half-open and admit up to
    /// `half_open_max_calls` concurrent trials.
    pub async fn check(&self, name: &str) -> BreakerDecision {
        if !self.config.enabled {
            return BreakerDecision::Allowed;
        }

        let now = self.clock.now();
        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(name.to_string()).or_insert_with(Breaker::new);

        match breaker.state {
            CircuitState::Closed => {
                breaker.total_calls += 1;
                BreakerDecision::Allowed
            }
            CircuitState::Open => {
                let opened_at = breaker.opened_at.unwrap_or(now);
                let elapsed = (now - opened_at).num_milliseconds();
                if elapsed >= self.config.reset_timeout_ms as i64 {
                    self.transition(name, breaker, CircuitState::HalfOpen);
                    breaker.trial_in_flight = 1;
                    breaker.total_calls += 1;
                    BreakerDecision::Trial
                } else {
                    breaker.rejected_calls += 1;
                    BreakerDecision::Rejected {
                        retry_after: Some(
                            opened_at
                                + chrono::Duration::milliseconds(self.config.reset_timeout_ms as i64),
                        ),
                    }
                }
            }
            CircuitState::HalfOpen => {
                if breaker.trial_in_flight < self.config.half_open_max_calls {
                    breaker.trial_in_flight += 1;
                    breaker.total_calls += 1;
                    BreakerDecision::Trial
                } else {
                    breaker.rejected_calls += 1;
                    BreakerDecision::Rejected { retry_after: None }
                }
            }
        }
    }

    /// Record a successful call outcome.
    pub async fn record_success(&self, name: &str) {
        if !self.config.enabled {
            return;
        }
        let now = self.clock.now();
        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(name.to_string()).or_insert_with(Breaker::new);

        breaker.consecutive_failures = 0;
        breaker.consecutive_successes += 1;
        breaker.outcomes.push_back((now, true));
        breaker.prune_outcomes(now, self.config.monitoring_window_ms);

        if breaker.state == CircuitState::HalfOpen {
            breaker.trial_in_flight = breaker.trial_in_flight.saturating_sub(1);
            if breaker.consecutive_successes >= self.config.success_threshold {
                self.transition(name, breaker, CircuitState::Closed);
            }
        }
    }

    /// Record a failed call outcome.
    pub async fn record_failure(&self, name: &str, error: impl Into<String>) {
        if !self.config.enabled {
            return;
        }
        let now = self.clock.now();
        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(name.to_string()).or_insert_with(Breaker::new);

        breaker.consecutive_successes = 0;
        breaker.consecutive_failures += 1;
        breaker.last_error = Some(error.into());
        breaker.last_failure_time = Some(now);
        breaker.outcomes.push_back((now, false));
        breaker.prune_outcomes(now, self.config.monitoring_window_ms);

        match breaker.state {
            CircuitState::Closed => {
                if breaker.consecutive_failures >= self.config.failure_threshold {
                    self.open_breaker(name, breaker, now);
                }
            }
            CircuitState::HalfOpen => {
                // Any trial failure reopens the circuit.
                breaker.trial_in_flight = 0;
                self.open_breaker(name, breaker, now);
            }
            CircuitState::Open => {}
        }
    }

    /// Force a circuit open (manual override).
    pub async fn force_open(&self, name: &str) {
        let now = self.clock.now();
        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(name.to_string()).or_insert_with(Breaker::new);
        if breaker.state != CircuitState::Open {
            self.open_breaker(name, breaker, now);
        }
    }

    /// Force a circuit closed (manual override).
    pub async fn force_close(&self, name: &str) {
        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(name.to_string()).or_insert_with(Breaker::new);
        if breaker.state != CircuitState::Closed {
            self.transition(name, breaker, CircuitState::Closed);
        }
        breaker.consecutive_failures = 0;
        breaker.consecutive_successes = 0;
        breaker.trial_in_flight = 0;
    }

    /// Reset a breaker to pristine closed state, clearing counters.
    pub async fn reset(&self, name: &str) {
        let mut breakers = self.breakers.write().await;
        if let Some(breaker) = breakers.get_mut(name) {
            let was = breaker.state;
            *breaker = Breaker::new();
            if was != CircuitState::Closed {
                self.emit_transition(name, was, CircuitState::Closed);
            }
        }
    }

    /// Force every known breaker open.
    pub async fn open_all(&self) {
        let names: Vec<String> = {
            let breakers = self.breakers.read().await;
            breakers.keys().cloned().collect()
        };
        for name in names {
            self.force_open(&name).await;
        }
    }

    /// Force every known breaker closed.
    pub async fn force_close_all(&self) {
        let names: Vec<String> = {
            let breakers = self.breakers.read().await;
            breakers.keys().cloned().collect()
        };
        for name in names {
            self.force_close(&name).await;
        }
    }

    /// Current state of one breaker, if it exists.
    pub async fn state(&self, name: &str) -> Option<CircuitState> {
        self.breakers.read().await.get(name).map(|b| b.state)
    }

    /// Metrics snapshot of every breaker.
    pub async fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let now = self.clock.now();
        let mut breakers = self.breakers.write().await;
        let mut result: Vec<BreakerSnapshot> = breakers
            .iter_mut()
            .map(|(name, b)| {
                b.prune_outcomes(now, self.config.monitoring_window_ms);
                BreakerSnapshot {
                    name: name.clone(),
                    state: b.state,
                    consecutive_failures: b.consecutive_failures,
                    consecutive_successes: b.consecutive_successes,
                    opened_at: b.opened_at,
                    opened_count: b.opened_count,
                    total_calls: b.total_calls,
                    rejected_calls: b.rejected_calls,
                    failure_rate: b.failure_rate(),
                    last_error: b.last_error.clone(),
                    last_failure_time: b.last_failure_time,
                }
            })
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        result
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn open_breaker(&self, name: &str, breaker: &mut Breaker, now: DateTime<Utc>) {
        breaker.opened_at = Some(now);
        breaker.opened_count += 1;
        breaker.consecutive_successes = 0;
        self.transition(name, breaker, CircuitState::Open);
    }

    fn transition(&self, name: &str, breaker: &mut Breaker, to: CircuitState) {
        let from = breaker.state;
        if from == to {
            return;
        }
        breaker.state = to;
        if to == CircuitState::Closed {
            breaker.opened_at = None;
            breaker.consecutive_failures = 0;
        }
        if to == CircuitState::HalfOpen {
            breaker.consecutive_successes = 0;
        }
        self.emit_transition(name, from, to);
    }

    fn emit_transition(&self, name: &str, from: CircuitState, to: CircuitState) {
        tracing::debug!(breaker = name, from = from.as_str(), to = to.as_str(), "breaker transition");
        self.event_bus.publish(SwarmEvent::new(
            "circuit_breaker",
            EventPayload::BreakerStateChanged {
                name: name.to_string(),
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            },
        ));
    }
}

/// Execute `operation` under the named breaker, reporting the outcome.
/// Rejection surfaces as `SwarmError::CircuitOpen` unless a fallback result
/// is supplied.
pub async fn with_breaker<T, F>(
    registry: &CircuitBreakerRegistry,
    name: &str,
    operation: F,
    fallback: Option<T>,
) -> SwarmResult<T>
where
    F: std::future::Future<Output = SwarmResult<T>>,
{
    match registry.check(name).await {
        BreakerDecision::Rejected { .. } => match fallback {
            Some(value) => Ok(value),
            None => Err(SwarmError::CircuitOpen {
                agent_id: name.to_string(),
            }),
        },
        BreakerDecision::Allowed | BreakerDecision::Trial => match operation.await {
            Ok(value) => {
                registry.record_success(name).await;
                Ok(value)
            }
            Err(e) => {
                registry.record_failure(name, e.to_string()).await;
                Err(e)
            }
        },
    }
}
