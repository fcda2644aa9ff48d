//! Application services for the swarm execution core.

pub mod agent_registry;
pub mod agent_selector;
pub mod budget_enforcer;
pub mod circuit_breaker;
pub mod config;
pub mod cost_tracker;
pub mod decomposer;
pub mod dependency_resolver;
pub mod engine;
pub mod event_bus;
pub mod load_balancer;
pub mod shutdown;

pub use agent_registry::{AgentRegistry, RegistryConfig};
pub use agent_selector::{AgentSelector, SelectionRequirements};
pub use budget_enforcer::{BudgetEnforcer, BudgetEnforcerConfig, Enforcement};
pub use circuit_breaker::{
    with_breaker, BreakerDecision, BreakerSnapshot, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitState,
};
pub use config::{ConfigError, SwarmConfig};
pub use cost_tracker::{CostTracker, CostTrackerConfig};
pub use decomposer::{DecompositionKind, DecompositionStrategy, TaskDecomposer};
pub use dependency_resolver::DependencyResolver;
pub use engine::{
    DefaultRetryClassifier, EngineConfig, ExecutionEngine, ExecutionResult, ExecutionStatus,
    PlanPolicy, PlanStatusReport, RetryClassifier,
};
pub use event_bus::{
    EventBus, EventBusConfig, EventCategory, EventFilter, EventId, EventMeta, EventPayload,
    EventSeverity, EventSink, EventSubscription, SequenceNumber, SwarmEvent,
};
pub use load_balancer::{
    make_strategy, AgentStats, ConsistentHash, DispatchSample, LeastConnections, LeastLoaded,
    LoadBalancingStrategy, RoundRobin, SelectionContext, StrategyKind, StrategyWeights, Weighted,
};
pub use shutdown::ShutdownCoordinator;
