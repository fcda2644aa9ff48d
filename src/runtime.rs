//! Explicit runtime wiring.
//!
//! One `SwarmRuntime` value owns the component graph, constructed leaf-first
//! from a `SwarmConfig`: event bus, cost tracker, budget enforcer, circuit
//! breakers, registry, selector, engine, shutdown coordinator. Tests build a
//! fresh runtime per case; there are no process-wide globals.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::models::RateTable;
use crate::domain::ports::{SharedClock, SharedExecutor, SystemClock};
use crate::services::agent_registry::{AgentRegistry, RegistryConfig};
use crate::services::agent_selector::AgentSelector;
use crate::services::budget_enforcer::{BudgetEnforcer, BudgetEnforcerConfig};
use crate::services::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::services::config::SwarmConfig;
use crate::services::cost_tracker::{CostTracker, CostTrackerConfig};
use crate::services::decomposer::TaskDecomposer;
use crate::services::engine::{EngineConfig, ExecutionEngine};
use crate::services::event_bus::{EventBus, EventBusConfig};
use crate::services::load_balancer::make_strategy;
use crate::services::shutdown::ShutdownCoordinator;

/// The assembled swarm execution core.
pub struct SwarmRuntime {
    pub event_bus: Arc<EventBus>,
    pub cost_tracker: Arc<CostTracker>,
    pub budget_enforcer: Arc<BudgetEnforcer>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub registry: Arc<AgentRegistry>,
    pub selector: Arc<AgentSelector>,
    pub decomposer: TaskDecomposer,
    pub engine: Arc<ExecutionEngine>,
    pub shutdown: Arc<ShutdownCoordinator>,
    clock: SharedClock,
    liveness_handle: tokio::task::JoinHandle<()>,
}

impl SwarmRuntime {
    /// Build a runtime with the system clock.
    pub async fn new(config: SwarmConfig, executor: SharedExecutor) -> Self {
        Self::with_clock(config, executor, Arc::new(SystemClock)).await
    }

    /// Build a runtime with an explicit clock (virtual time in tests).
    pub async fn with_clock(
        config: SwarmConfig,
        executor: SharedExecutor,
        clock: SharedClock,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(EventBusConfig {
            channel_capacity: config.events.channel_capacity,
        }));

        let cost_tracker = Arc::new(CostTracker::new(
            RateTable::default(),
            CostTrackerConfig {
                warn_fraction: config.budget.warn_fraction,
                stop_fraction: config.budget.stop_fraction,
            },
            clock.clone(),
            event_bus.clone(),
        ));

        let budget_enforcer = Arc::new(BudgetEnforcer::new(
            BudgetEnforcerConfig {
                warn_fraction: config.budget.warn_fraction,
                stop_fraction: config.budget.stop_fraction,
                auto_stop: config.budget.auto_stop,
            },
            cost_tracker.clone(),
            event_bus.clone(),
        ));

        let breakers = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig {
                failure_threshold: config.breaker.failure_threshold,
                success_threshold: config.breaker.success_threshold,
                reset_timeout_ms: config.breaker.reset_timeout_ms,
                half_open_max_calls: config.breaker.half_open_max_calls,
                ..Default::default()
            },
            clock.clone(),
            event_bus.clone(),
        ));

        let registry = Arc::new(AgentRegistry::new(
            RegistryConfig {
                liveness_timeout_ms: config.registry.liveness_timeout_ms,
                health_check_interval_ms: config.registry.health_check_interval_ms,
            },
            clock.clone(),
            event_bus.clone(),
        ));
        budget_enforcer.set_runtime_control(registry.clone()).await;

        let strategy = make_strategy(
            config.strategy.kind,
            config.strategy.weights(),
            config.strategy.ring_replicas,
        );
        let selector = Arc::new(AgentSelector::new(registry.clone(), strategy));

        let engine = Arc::new(ExecutionEngine::new(
            selector.clone(),
            registry.clone(),
            breakers.clone(),
            budget_enforcer.clone(),
            cost_tracker.clone(),
            executor,
            clock.clone(),
            event_bus.clone(),
            EngineConfig {
                retry_attempts: config.engine.retry_attempts,
                retry_delay_ms: config.engine.retry_delay_ms,
                retry_backoff_multiplier: config.engine.retry_backoff_multiplier,
                continue_on_failure: config.engine.continue_on_failure,
                concurrency_limit: config.engine.concurrency_limit,
            },
        ));

        let shutdown = Arc::new(ShutdownCoordinator::new(event_bus.clone()));
        let liveness_handle = registry.spawn_liveness_monitor(shutdown.token());

        {
            let registry = registry.clone();
            shutdown
                .register_hook("registry-drain", 10, Duration::from_secs(5), move || {
                    let registry = registry.clone();
                    async move {
                        registry.clear().await;
                        Ok(())
                    }
                })
                .await;
        }

        Self {
            event_bus,
            cost_tracker,
            budget_enforcer,
            breakers,
            registry,
            selector,
            decomposer: TaskDecomposer::new(),
            engine,
            shutdown,
            clock,
            liveness_handle,
        }
    }

    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    /// Graceful teardown: run shutdown hooks and stop background tasks.
    pub async fn shutdown(&self) {
        self.shutdown.shutdown().await;
        self.liveness_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::SwarmResult;
    use crate::domain::models::Subtask;
    use crate::domain::ports::{ExecutionContext, Executor};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct NoopExecutor;

    #[async_trait]
    impl Executor for NoopExecutor {
        async fn execute(
            &self,
            _agent_id: &str,
            _task: &Subtask,
            _ctx: &ExecutionContext,
        ) -> SwarmResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        async fn cancel(&self, _agent_id: &str, _task_id: Uuid) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_runtime_wires_and_shuts_down() {
        let runtime = SwarmRuntime::new(SwarmConfig::default(), Arc::new(NoopExecutor)).await;
        assert!(runtime.registry.is_empty().await);
        assert_eq!(runtime.selector.strategy_name().await, "round_robin");

        runtime.shutdown().await;
        assert!(runtime.shutdown.is_shutting_down());
    }

    #[tokio::test]
    async fn test_fresh_runtimes_are_independent() {
        let first = SwarmRuntime::new(SwarmConfig::default(), Arc::new(NoopExecutor)).await;
        let second = SwarmRuntime::new(SwarmConfig::default(), Arc::new(NoopExecutor)).await;

        first
            .registry
            .register(crate::domain::models::Agent::new(
                "a1",
                crate::domain::models::AgentCapabilities::new(),
            ))
            .await
            .unwrap();

        assert_eq!(first.registry.len().await, 1);
        assert!(second.registry.is_empty().await);

        first.shutdown().await;
        second.shutdown().await;
    }
}
