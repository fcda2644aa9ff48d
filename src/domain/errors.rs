//! Domain errors for the Hivemind swarm execution core.

use thiserror::Error;
use uuid::Uuid;

/// Classification of an error by kind, used by the engine's retry and
/// propagation policy. Kinds are stable across error variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Timeout, connection refused/reset. Retried per policy.
    Transient,
    /// Malformed task, cycle, unknown skill. Fails the task immediately.
    FatalInput,
    /// Budget threshold exceeded. Not retried; may stop the runtime.
    Budget,
    /// Target agent's circuit is open. Retry on a different candidate.
    CircuitOpen,
    /// No eligible agent for the task.
    Capacity,
    /// Cancellation token fired.
    Cancelled,
    /// Self-check failed; aborts the plan.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::FatalInput => "fatal_input",
            Self::Budget => "budget",
            Self::CircuitOpen => "circuit_open",
            Self::Capacity => "capacity",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

/// Errors surfaced by the swarm execution core.
#[derive(Debug, Clone, Error)]
pub enum SwarmError {
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Task timed out after {0} seconds")]
    TaskTimeout(u64),

    #[error("Invalid input: {0}")]
    FatalInput(String),

    #[error("Decomposition strategy '{strategy}' produced no subtasks")]
    DecompositionEmpty { strategy: String },

    #[error("Dependency cycle detected: {}", format_cycle(witness))]
    DependencyCycle { witness: Vec<Uuid> },

    #[error("Unknown decomposition strategy: {0}")]
    UnknownStrategy(String),

    #[error("Budget exceeded for scope {scope} while dispatching to agent {agent_id}")]
    BudgetExceeded { agent_id: String, scope: String },

    #[error("Circuit open for agent {agent_id}")]
    CircuitOpen { agent_id: String },

    #[error("All candidate circuits open for task {task_id}")]
    AllCircuitsOpen { task_id: Uuid },

    #[error("No eligible agent for task {task_id} (required skills: {required_skills:?})")]
    NoEligibleAgent {
        task_id: Uuid,
        required_skills: Vec<String>,
    },

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent {0} was forcibly evicted with tasks in flight")]
    AgentEvicted(String),

    #[error("Agent {agent_id} has in-flight assignments and cannot be removed")]
    AgentBusy { agent_id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Plan not found: {0}")]
    PlanNotFound(Uuid),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Internal invariant violated: {0}")]
    Internal(String),
}

fn format_cycle(witness: &[Uuid]) -> String {
    witness
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl SwarmError {
    /// The error's kind, driving retry and propagation policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransientNetwork(_) | Self::TaskTimeout(_) => ErrorKind::Transient,
            Self::FatalInput(_)
            | Self::DecompositionEmpty { .. }
            | Self::DependencyCycle { .. }
            | Self::UnknownStrategy(_)
            | Self::InvalidStateTransition { .. }
            | Self::PlanNotFound(_)
            | Self::ExecutionFailed(_) => ErrorKind::FatalInput,
            Self::BudgetExceeded { .. } => ErrorKind::Budget,
            Self::CircuitOpen { .. } | Self::AllCircuitsOpen { .. } => ErrorKind::CircuitOpen,
            Self::NoEligibleAgent { .. }
            | Self::AgentNotFound(_)
            | Self::AgentBusy { .. } => ErrorKind::Capacity,
            Self::AgentEvicted(_) => ErrorKind::Transient,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable error code carried on events and operator-visible failures.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransientNetwork(_) => "E_TRANSIENT_NETWORK",
            Self::TaskTimeout(_) => "E_TASK_TIMEOUT",
            Self::FatalInput(_) => "E_FATAL_INPUT",
            Self::DecompositionEmpty { .. } => "E_DECOMPOSITION_EMPTY",
            Self::DependencyCycle { .. } => "E_CYCLE",
            Self::UnknownStrategy(_) => "E_UNKNOWN_STRATEGY",
            Self::BudgetExceeded { .. } => "E_BUDGET_EXCEEDED",
            Self::CircuitOpen { .. } => "E_CIRCUIT_OPEN",
            Self::AllCircuitsOpen { .. } => "E_ALL_CIRCUITS_OPEN",
            Self::NoEligibleAgent { .. } => "E_NO_ELIGIBLE_AGENT",
            Self::AgentNotFound(_) => "E_AGENT_NOT_FOUND",
            Self::AgentEvicted(_) => "E_AGENT_EVICTED",
            Self::AgentBusy { .. } => "E_AGENT_BUSY",
            Self::InvalidStateTransition { .. } => "E_INVALID_TRANSITION",
            Self::PlanNotFound(_) => "E_PLAN_NOT_FOUND",
            Self::Cancelled => "E_CANCELLED",
            Self::ExecutionFailed(_) => "E_EXECUTION_FAILED",
            Self::Internal(_) => "E_INTERNAL",
        }
    }

    /// Whether the engine's retry loop may retry this error locally.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }
}

pub type SwarmResult<T> = Result<T, SwarmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            SwarmError::TransientNetwork("reset".into()).kind(),
            ErrorKind::Transient
        );
        assert_eq!(SwarmError::TaskTimeout(30).kind(), ErrorKind::Transient);
        assert_eq!(
            SwarmError::BudgetExceeded {
                agent_id: "a1".into(),
                scope: "agent".into()
            }
            .kind(),
            ErrorKind::Budget
        );
        assert_eq!(SwarmError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            SwarmError::Internal("finished twice".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_retryability() {
        assert!(SwarmError::TransientNetwork("timeout".into()).is_retryable());
        assert!(SwarmError::TaskTimeout(10).is_retryable());
        assert!(!SwarmError::FatalInput("bad payload".into()).is_retryable());
        assert!(!SwarmError::Cancelled.is_retryable());
        assert!(!SwarmError::CircuitOpen { agent_id: "a1".into() }.is_retryable());
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(SwarmError::Cancelled.code(), "E_CANCELLED");
        assert_eq!(
            SwarmError::DependencyCycle { witness: vec![] }.code(),
            "E_CYCLE"
        );
    }

    #[test]
    fn test_cycle_display_includes_witness() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let err = SwarmError::DependencyCycle { witness: vec![a, b, a] };
        let msg = err.to_string();
        assert!(msg.contains(&a.to_string()));
        assert!(msg.contains("->"));
    }
}
