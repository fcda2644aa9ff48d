//! Task intents: the free-form input to decomposition.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::task::{RetryPolicy, TaskPriority};

/// A named component of the goal, for component-based decomposition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentHint {
    pub name: String,
    pub skills: Vec<String>,
    /// Names of components this one builds on.
    pub depends_on: Vec<String>,
}

/// A problem domain of the goal, for domain-based decomposition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainHint {
    pub name: String,
    pub skills: Vec<String>,
}

/// A file to touch, for file-based decomposition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileHint {
    pub path: String,
    pub skills: Vec<String>,
}

/// A sequential stage, for pipeline decomposition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageHint {
    pub name: String,
    pub skills: Vec<String>,
}

/// Structured hints accompanying a goal. A strategy consumes the hint list
/// matching its shape and ignores the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentHints {
    pub components: Vec<ComponentHint>,
    pub domains: Vec<DomainHint>,
    pub files: Vec<FileHint>,
    pub stages: Vec<StageHint>,
}

/// A high-level task intent: goal text plus optional structured hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskIntent {
    /// Free-form goal description.
    pub goal: String,
    /// Structured decomposition hints.
    pub hints: IntentHints,
    /// Priority applied to emitted subtasks.
    pub priority: TaskPriority,
    /// Per-task timeout applied to emitted subtasks.
    pub timeout: Duration,
    /// Retry budget applied to emitted subtasks.
    pub retry: RetryPolicy,
}

impl TaskIntent {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            hints: IntentHints::default(),
            priority: TaskPriority::default(),
            timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_component(
        mut self,
        name: impl Into<String>,
        skills: Vec<String>,
        depends_on: Vec<String>,
    ) -> Self {
        self.hints.components.push(ComponentHint {
            name: name.into(),
            skills,
            depends_on,
        });
        self
    }

    pub fn with_domain(mut self, name: impl Into<String>, skills: Vec<String>) -> Self {
        self.hints.domains.push(DomainHint {
            name: name.into(),
            skills,
        });
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, skills: Vec<String>) -> Self {
        self.hints.files.push(FileHint {
            path: path.into(),
            skills,
        });
        self
    }

    pub fn with_stage(mut self, name: impl Into<String>, skills: Vec<String>) -> Self {
        self.hints.stages.push(StageHint {
            name: name.into(),
            skills,
        });
        self
    }
}
