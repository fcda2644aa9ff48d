//! Subtask domain model.
//!
//! Subtasks are discrete units of work produced by decomposition. They form
//! a DAG through their dependency lists and carry the retry and timeout
//! policy the engine applies when dispatching them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::{ErrorKind, SwarmError};

/// Terminal and in-flight states of a task within one plan execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Defined but not yet scheduled.
    Pending,
    /// Dispatched to an agent.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with a terminal error.
    Failed,
    /// Not attempted because an upstream dependency failed.
    Skipped,
    /// Stopped by cancellation.
    Cancelled,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }
}

/// Priority of a subtask. Orders descending in plan levels: critical first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Retry budget for a subtask: attempt count plus backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retries after the initial attempt.
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds.
    pub initial_delay_ms: u64,
    /// Exponential multiplier applied per attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry `attempt` (1-based): `initial · mult^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let millis = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exp as i32);
        Duration::from_millis(millis.min(u64::MAX as f64) as u64)
    }
}

/// A unit of work produced by decomposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    /// Identity, unique within the decomposition.
    pub id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// Skills an agent must have to execute this task.
    pub required_skills: BTreeSet<String>,
    /// Optional input-language requirement.
    pub language: Option<String>,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Ids of tasks that must complete before this one starts.
    pub dependencies: Vec<Uuid>,
    /// Per-dispatch deadline.
    pub timeout: Duration,
    /// Retry budget.
    pub retry: RetryPolicy,
    /// Opaque payload handed to the executor.
    pub payload: serde_json::Value,
}

impl Subtask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            required_skills: BTreeSet::new(),
            language: None,
            priority: TaskPriority::default(),
            dependencies: Vec::new(),
            timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.required_skills.insert(skill.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, dep: Uuid) -> Self {
        self.dependencies.push(dep);
        self
    }

    pub fn with_dependencies<I: IntoIterator<Item = Uuid>>(mut self, deps: I) -> Self {
        self.dependencies.extend(deps);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Error details recorded on a failed task result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Error kind name (stable).
    pub kind: String,
    /// Stable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl TaskError {
    pub fn from_swarm_error(err: &SwarmError) -> Self {
        Self {
            kind: err.kind().as_str().to_string(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.kind.as_str() {
            "transient" => Some(ErrorKind::Transient),
            "fatal_input" => Some(ErrorKind::FatalInput),
            "budget" => Some(ErrorKind::Budget),
            "circuit_open" => Some(ErrorKind::CircuitOpen),
            "capacity" => Some(ErrorKind::Capacity),
            "cancelled" => Some(ErrorKind::Cancelled),
            "internal" => Some(ErrorKind::Internal),
            _ => None,
        }
    }
}

/// Outcome of one task within a plan execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub state: TaskState,
    /// Opaque output from the executor, when completed.
    pub output: Option<serde_json::Value>,
    /// Terminal error, when failed.
    pub error: Option<TaskError>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    /// Total attempts made (1 = no retries).
    pub attempts: u32,
    /// Agent that produced the terminal outcome, if any was dispatched.
    pub agent_id: Option<String>,
}

impl TaskResult {
    pub fn pending(task_id: Uuid) -> Self {
        Self {
            task_id,
            state: TaskState::Pending,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: 0,
            attempts: 0,
            agent_id: None,
        }
    }

    pub fn skipped(task_id: Uuid, cause: &SwarmError) -> Self {
        Self {
            state: TaskState::Skipped,
            error: Some(TaskError::from_swarm_error(cause)),
            ..Self::pending(task_id)
        }
    }

    pub fn cancelled(task_id: Uuid) -> Self {
        Self {
            state: TaskState::Cancelled,
            error: Some(TaskError::from_swarm_error(&SwarmError::Cancelled)),
            ..Self::pending(task_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Medium);
        assert!(TaskPriority::Medium > TaskPriority::Low);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!(TaskPriority::parse_str("critical"), Some(TaskPriority::Critical));
        assert_eq!(TaskPriority::parse_str("normal"), Some(TaskPriority::Medium));
        assert_eq!(TaskPriority::parse_str("unknown"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Skipped.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }

    #[test]
    fn test_retry_backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_subtask_builder() {
        let dep = Uuid::new_v4();
        let task = Subtask::new("compile")
            .with_skill("rust")
            .with_priority(TaskPriority::High)
            .with_dependency(dep)
            .with_timeout(Duration::from_secs(60));

        assert_eq!(task.name, "compile");
        assert!(task.required_skills.contains("rust"));
        assert_eq!(task.priority, TaskPriority::High);
        assert_eq!(task.dependencies, vec![dep]);
    }

    #[test]
    fn test_task_error_round_trips_kind() {
        let err = SwarmError::TransientNetwork("connection reset".into());
        let task_err = TaskError::from_swarm_error(&err);
        assert_eq!(task_err.error_kind(), Some(ErrorKind::Transient));
        assert_eq!(task_err.code, "E_TRANSIENT_NETWORK");
    }
}
