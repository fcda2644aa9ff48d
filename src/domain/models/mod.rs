//! Domain models for the swarm execution core.

pub mod agent;
pub mod budget;
pub mod cost;
pub mod intent;
pub mod plan;
pub mod task;

pub use agent::{Agent, AgentCapabilities, AgentState};
pub use budget::{BudgetAccount, BudgetScope, BudgetStatus};
pub use cost::{CostSession, RateTable, RuntimeKind, TokenRate, TokenUsage};
pub use intent::{ComponentHint, DomainHint, FileHint, IntentHints, StageHint, TaskIntent};
pub use plan::{ExecutionLevel, ExecutionPlan};
pub use task::{RetryPolicy, Subtask, TaskError, TaskPriority, TaskResult, TaskState};
