//! Hivemind - Swarm Execution Core
//!
//! A multi-agent orchestration core:
//! - Task decomposition into dependency-layered execution plans
//! - A live agent registry with pluggable load-balancing strategies
//! - A level-parallel DAG engine with retry, timeout, and cooperative
//!   cancellation
//! - Per-agent circuit breakers gating dispatch
//! - Budget enforcement and cost tracking coupled to the scheduler
//! - A typed event substrate with correlation propagation

pub mod domain;
pub mod runtime;
pub mod services;

// Re-export key types for convenience
pub use domain::correlation::CorrelationContext;
pub use domain::errors::{ErrorKind, SwarmError, SwarmResult};
pub use domain::models::{
    Agent, AgentCapabilities, AgentState, BudgetAccount, BudgetScope, BudgetStatus, CostSession,
    ExecutionLevel, ExecutionPlan, RateTable, RetryPolicy, RuntimeKind, Subtask, TaskError,
    TaskIntent, TaskPriority, TaskResult, TaskState, TokenUsage,
};
pub use domain::ports::{Clock, ExecutionContext, Executor, ManualClock, RuntimeControl, SystemClock};
pub use runtime::SwarmRuntime;
pub use services::{
    AgentRegistry, AgentSelector, BudgetEnforcer, CircuitBreakerRegistry, CostTracker,
    DecompositionKind, DependencyResolver, Enforcement, EventBus, EventPayload, ExecutionEngine,
    ExecutionResult, ExecutionStatus, PlanPolicy, SwarmConfig, TaskDecomposer,
};
