//! Property tests for the dependency resolver's layered planning.

use hivemind::{DependencyResolver, Subtask, TaskPriority};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Generate an acyclic task set: each task may depend on a random subset of
/// earlier tasks, so the graph is acyclic by construction.
fn acyclic_tasks(size: usize, edge_seed: u64) -> Vec<Subtask> {
    let ids: Vec<Uuid> = (0..size).map(|_| Uuid::new_v4()).collect();
    let mut state = edge_seed.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    ids.iter()
        .enumerate()
        .map(|(i, &id)| {
            let mut task = Subtask::new(format!("task-{i}"));
            task.id = id;
            for &candidate in ids.iter().take(i) {
                if next() % 3 == 0 {
                    task.dependencies.push(candidate);
                }
            }
            task
        })
        .collect()
}

proptest! {
    /// Every task appears in exactly one level.
    #[test]
    fn prop_plan_partitions_tasks(size in 1usize..25, seed in any::<u64>()) {
        let tasks = acyclic_tasks(size, seed);
        let expected: HashSet<Uuid> = tasks.iter().map(|t| t.id).collect();

        let mut resolver = DependencyResolver::new();
        resolver.build_graph(tasks).unwrap();
        let plan = resolver.execution_plan().unwrap();

        let placed = plan.all_task_ids();
        let placed_set: HashSet<Uuid> = placed.iter().copied().collect();
        prop_assert_eq!(placed.len(), placed_set.len(), "no duplicates");
        prop_assert_eq!(placed_set, expected, "no lost or invented tasks");
    }

    /// Every dependency lies in a strictly earlier level.
    #[test]
    fn prop_dependencies_precede_dependents(size in 1usize..25, seed in any::<u64>()) {
        let tasks = acyclic_tasks(size, seed);

        let mut resolver = DependencyResolver::new();
        resolver.build_graph(tasks).unwrap();
        let plan = resolver.execution_plan().unwrap();

        let mut level_of: HashMap<Uuid, usize> = HashMap::new();
        for level in &plan.levels {
            for task in &level.tasks {
                level_of.insert(task.id, level.level);
            }
        }

        for level in &plan.levels {
            for task in &level.tasks {
                for dep in &task.dependencies {
                    prop_assert!(
                        level_of[dep] < level_of[&task.id],
                        "dependency {} at level {} not before task {} at level {}",
                        dep, level_of[dep], task.id, level_of[&task.id]
                    );
                }
            }
        }
    }

    /// The plan validates against its own structural rules.
    #[test]
    fn prop_plan_validates(size in 1usize..25, seed in any::<u64>()) {
        let tasks = acyclic_tasks(size, seed);
        let mut resolver = DependencyResolver::new();
        resolver.build_graph(tasks).unwrap();
        let plan = resolver.execution_plan().unwrap();
        prop_assert!(plan.validate().is_ok());
    }

    /// Layering is tight: every task beyond level 0 has at least one
    /// dependency in the directly preceding level.
    #[test]
    fn prop_layering_is_tight(size in 1usize..25, seed in any::<u64>()) {
        let tasks = acyclic_tasks(size, seed);
        let mut resolver = DependencyResolver::new();
        resolver.build_graph(tasks).unwrap();
        let plan = resolver.execution_plan().unwrap();

        let mut level_of: HashMap<Uuid, usize> = HashMap::new();
        for level in &plan.levels {
            for task in &level.tasks {
                level_of.insert(task.id, level.level);
            }
        }

        for level in plan.levels.iter().skip(1) {
            for task in &level.tasks {
                let max_dep_level = task
                    .dependencies
                    .iter()
                    .map(|dep| level_of[dep])
                    .max()
                    .expect("non-root task has dependencies");
                prop_assert_eq!(max_dep_level, level.level - 1);
            }
        }
    }

    /// Levels order by (priority desc, id asc).
    #[test]
    fn prop_levels_are_deterministically_ordered(size in 1usize..25, seed in any::<u64>()) {
        let mut tasks = acyclic_tasks(size, seed);
        for (i, task) in tasks.iter_mut().enumerate() {
            task.priority = match i % 4 {
                0 => TaskPriority::Critical,
                1 => TaskPriority::High,
                2 => TaskPriority::Medium,
                _ => TaskPriority::Low,
            };
        }

        let mut resolver = DependencyResolver::new();
        resolver.build_graph(tasks).unwrap();
        let plan = resolver.execution_plan().unwrap();

        for level in &plan.levels {
            for pair in level.tasks.windows(2) {
                let ordered = pair[0].priority > pair[1].priority
                    || (pair[0].priority == pair[1].priority && pair[0].id < pair[1].id);
                prop_assert!(ordered, "level {} not ordered", level.level);
            }
        }
    }
}

#[test]
fn cycle_yields_witness_not_plan() {
    let mut a = Subtask::new("a");
    let mut b = Subtask::new("b");
    let mut c = Subtask::new("c");
    b.dependencies.push(a.id);
    c.dependencies.push(b.id);
    a.dependencies.push(c.id);

    let mut resolver = DependencyResolver::new();
    let err = resolver.build_graph(vec![a, b, c]).unwrap_err();
    match err {
        hivemind::SwarmError::DependencyCycle { witness } => {
            assert!(witness.len() >= 3);
        }
        other => panic!("expected cycle, got {other:?}"),
    }
}
