//! Dependency resolution: graph validation, cycle detection, and layered
//! topological planning.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::domain::errors::{SwarmError, SwarmResult};
use crate::domain::models::{ExecutionLevel, ExecutionPlan, Subtask};

/// Builds an adjacency view over a set of subtasks, verifies acyclicity, and
/// computes a deterministic layered execution plan.
#[derive(Debug, Default)]
pub struct DependencyResolver {
    tasks: HashMap<Uuid, Subtask>,
    plan: Option<ExecutionPlan>,
}

// Standalone DFS helper for cycle detection; returns true when a cycle is
// found and leaves the witness path in `path`.
fn detect_cycle_dfs(
    node: Uuid,
    graph: &HashMap<Uuid, Vec<Uuid>>,
    visited: &mut HashSet<Uuid>,
    rec_stack: &mut HashSet<Uuid>,
    path: &mut Vec<Uuid>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(&node) {
        for &neighbor in neighbors {
            if !visited.contains(&neighbor) {
                if detect_cycle_dfs(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(&neighbor) {
                if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..cycle_start);
                    path.push(neighbor);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(&node);
    path.pop();
    false
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest tasks and validate the graph. Fails with a cycle witness on
    /// circular dependencies and with a fatal input error on duplicate ids
    /// or references to tasks outside the set.
    pub fn build_graph(&mut self, tasks: Vec<Subtask>) -> SwarmResult<()> {
        let mut by_id: HashMap<Uuid, Subtask> = HashMap::with_capacity(tasks.len());
        for task in tasks {
            if by_id.insert(task.id, task).is_some() {
                return Err(SwarmError::FatalInput(
                    "Duplicate task id in decomposition".to_string(),
                ));
            }
        }

        for task in by_id.values() {
            for dep in &task.dependencies {
                if !by_id.contains_key(dep) {
                    return Err(SwarmError::FatalInput(format!(
                        "Task {} depends on unknown task {}",
                        task.id, dep
                    )));
                }
            }
        }

        if let Some(witness) = Self::detect_cycle(&by_id) {
            return Err(SwarmError::DependencyCycle { witness });
        }

        self.plan = None;
        self.tasks = by_id;
        Ok(())
    }

    /// Detect a cycle, returning a witness path when one exists.
    fn detect_cycle(tasks: &HashMap<Uuid, Subtask>) -> Option<Vec<Uuid>> {
        let mut graph: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for task in tasks.values() {
            graph
                .entry(task.id)
                .or_default()
                .extend(task.dependencies.iter().copied());
        }

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        let mut ids: Vec<Uuid> = graph.keys().copied().collect();
        ids.sort();
        for id in ids {
            if !visited.contains(&id)
                && detect_cycle_dfs(id, &graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path);
            }
        }
        None
    }

    /// The layered execution plan. Level 0 holds tasks with no dependencies;
    /// level L+1 holds tasks whose dependencies all lie in levels 0..=L.
    /// Ties within a level break by (priority desc, id asc). Idempotent:
    /// repeated calls return the same plan.
    pub fn execution_plan(&mut self) -> SwarmResult<ExecutionPlan> {
        if let Some(ref plan) = self.plan {
            return Ok(plan.clone());
        }

        let mut remaining: HashSet<Uuid> = self.tasks.keys().copied().collect();
        let mut placed: HashSet<Uuid> = HashSet::new();
        let mut levels: Vec<ExecutionLevel> = Vec::new();

        while !remaining.is_empty() {
            let mut ready: Vec<&Subtask> = remaining
                .iter()
                .map(|id| &self.tasks[id])
                .filter(|task| task.dependencies.iter().all(|dep| placed.contains(dep)))
                .collect();

            if ready.is_empty() {
                // Unreachable after build_graph validation; surface rather
                // than loop forever if an invariant broke.
                return Err(SwarmError::Internal(
                    "Layering stalled on a validated graph".to_string(),
                ));
            }

            ready.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

            let level_tasks: Vec<Subtask> = ready.into_iter().cloned().collect();
            for task in &level_tasks {
                remaining.remove(&task.id);
                placed.insert(task.id);
            }
            levels.push(ExecutionLevel::new(levels.len(), level_tasks));
        }

        let plan = ExecutionPlan::new(levels);
        self.plan = Some(plan.clone());
        Ok(plan)
    }

    /// Pure query: are all of `id`'s dependencies in `completed`?
    pub fn dependencies_met(&self, id: Uuid, completed: &HashSet<Uuid>) -> bool {
        self.tasks
            .get(&id)
            .is_some_and(|task| task.dependencies.iter().all(|dep| completed.contains(dep)))
    }

    /// Transitive dependents of a task, used for skip propagation.
    pub fn all_dependents(&self, id: Uuid) -> HashSet<Uuid> {
        let mut dependents_of: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for task in self.tasks.values() {
            for dep in &task.dependencies {
                dependents_of.entry(*dep).or_default().push(task.id);
            }
        }

        let mut result = HashSet::new();
        let mut queue: Vec<Uuid> = dependents_of.get(&id).cloned().unwrap_or_default();
        while let Some(next) = queue.pop() {
            if result.insert(next) {
                if let Some(children) = dependents_of.get(&next) {
                    queue.extend(children.iter().copied());
                }
            }
        }
        result
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}
