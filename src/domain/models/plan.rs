//! Execution plan for DAG-based task execution.
//!
//! A plan is a topologically-layered view of a subtask DAG: level 0 holds
//! tasks with no dependencies, level L+1 holds tasks whose dependencies all
//! lie in levels 0..=L. Tasks within a level can run concurrently.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::task::Subtask;

/// One level of the plan: tasks whose dependencies are satisfied by all
/// earlier levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLevel {
    /// Level number (0-indexed).
    pub level: usize,
    /// Tasks executable concurrently at this level, ordered by
    /// (priority desc, id asc) for determinism.
    pub tasks: Vec<Subtask>,
}

impl ExecutionLevel {
    pub fn new(level: usize, tasks: Vec<Subtask>) -> Self {
        Self { level, tasks }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task_ids(&self) -> Vec<Uuid> {
        self.tasks.iter().map(|t| t.id).collect()
    }
}

/// An immutable, validated execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Plan identity, used for cancellation and status queries.
    pub id: Uuid,
    /// Levels in topological order.
    pub levels: Vec<ExecutionLevel>,
}

impl ExecutionPlan {
    pub fn new(levels: Vec<ExecutionLevel>) -> Self {
        Self {
            id: Uuid::new_v4(),
            levels,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Total number of tasks across all levels.
    pub fn total_tasks(&self) -> usize {
        self.levels.iter().map(ExecutionLevel::task_count).sum()
    }

    /// Critical path length in levels. With tight layering every level
    /// extends the longest chain by one, so this equals the level count.
    pub fn longest_path(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn get_level(&self, level: usize) -> Option<&ExecutionLevel> {
        self.levels.get(level)
    }

    /// All task ids in level order.
    pub fn all_task_ids(&self) -> Vec<Uuid> {
        self.levels
            .iter()
            .flat_map(|l| l.tasks.iter().map(|t| t.id))
            .collect()
    }

    /// Find a task by id.
    pub fn get_task(&self, id: Uuid) -> Option<&Subtask> {
        self.levels
            .iter()
            .flat_map(|l| l.tasks.iter())
            .find(|t| t.id == id)
    }

    /// Validate plan structure: sequential level numbers, no empty levels,
    /// no duplicate ids, and every dependency resolved in an earlier level.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut earlier: HashSet<Uuid> = HashSet::new();

        for (idx, level) in self.levels.iter().enumerate() {
            if level.level != idx {
                return Err(format!(
                    "Level {} has incorrect level number {}",
                    idx, level.level
                ));
            }
            if level.is_empty() {
                return Err(format!("Level {idx} is empty"));
            }
            for task in &level.tasks {
                if !seen.insert(task.id) {
                    return Err(format!("Duplicate task id: {}", task.id));
                }
                for dep in &task.dependencies {
                    if !earlier.contains(dep) {
                        return Err(format!(
                            "Task {} at level {} depends on {} which is not in an earlier level",
                            task.id, idx, dep
                        ));
                    }
                }
            }
            earlier.extend(level.tasks.iter().map(|t| t.id));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::Subtask;

    #[test]
    fn test_plan_totals() {
        let a = Subtask::new("a");
        let b = Subtask::new("b");
        let c = Subtask::new("c").with_dependency(a.id).with_dependency(b.id);

        let plan = ExecutionPlan::new(vec![
            ExecutionLevel::new(0, vec![a, b]),
            ExecutionLevel::new(1, vec![c]),
        ]);

        assert_eq!(plan.total_tasks(), 3);
        assert_eq!(plan.longest_path(), 2);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_empty_plan() {
        let plan = ExecutionPlan::empty();
        assert_eq!(plan.total_tasks(), 0);
        assert!(plan.is_empty());
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_forward_dependency() {
        let a = Subtask::new("a");
        let b = Subtask::new("b").with_dependency(a.id);

        // b placed before a
        let plan = ExecutionPlan::new(vec![
            ExecutionLevel::new(0, vec![b]),
            ExecutionLevel::new(1, vec![a]),
        ]);

        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_duplicates() {
        let a = Subtask::new("a");
        let plan = ExecutionPlan::new(vec![
            ExecutionLevel::new(0, vec![a.clone()]),
            ExecutionLevel::new(1, vec![a]),
        ]);

        let err = plan.validate().unwrap_err();
        assert!(err.contains("Duplicate"));
    }

    #[test]
    fn test_validation_rejects_empty_level() {
        let a = Subtask::new("a");
        let plan = ExecutionPlan::new(vec![
            ExecutionLevel::new(0, vec![a]),
            ExecutionLevel::new(1, vec![]),
        ]);

        let err = plan.validate().unwrap_err();
        assert!(err.contains("empty"));
    }

    #[test]
    fn test_get_task() {
        let a = Subtask::new("a");
        let id = a.id;
        let plan = ExecutionPlan::new(vec![ExecutionLevel::new(0, vec![a])]);
        assert_eq!(plan.get_task(id).unwrap().name, "a");
        assert!(plan.get_task(Uuid::new_v4()).is_none());
    }
}
