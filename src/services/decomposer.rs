//! Task decomposition: turn a high-level intent into validated subtasks.
//!
//! Each strategy is a pure function from intent to subtasks; the decomposer
//! validates the output (unique ids, resolvable dependencies, acyclic) before
//! handing it to the resolver.

use serde_json::json;
use std::collections::HashMap;

use crate::domain::errors::{SwarmError, SwarmResult};
use crate::domain::models::{Subtask, TaskIntent};
use crate::services::dependency_resolver::DependencyResolver;

/// The built-in decomposition strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecompositionKind {
    ComponentBased,
    DomainBased,
    FileBased,
    Pipeline,
}

impl DecompositionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ComponentBased => "component-based",
            Self::DomainBased => "domain-based",
            Self::FileBased => "file-based",
            Self::Pipeline => "pipeline",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "component-based" | "component_based" => Some(Self::ComponentBased),
            "domain-based" | "domain_based" => Some(Self::DomainBased),
            "file-based" | "file_based" => Some(Self::FileBased),
            "pipeline" => Some(Self::Pipeline),
            _ => None,
        }
    }
}

/// A pure decomposition function.
pub trait DecompositionStrategy: Send + Sync {
    fn decompose(&self, intent: &TaskIntent) -> Vec<Subtask>;
    fn name(&self) -> &'static str;
}

fn base_task(intent: &TaskIntent, name: String) -> Subtask {
    Subtask::new(name)
        .with_priority(intent.priority)
        .with_timeout(intent.timeout)
        .with_retry(intent.retry.clone())
}

// ---------------------------------------------------------------------------
// component-based
// ---------------------------------------------------------------------------

/// One subtask per named component; dependencies follow the declared
/// component graph.
pub struct ComponentBased;

impl DecompositionStrategy for ComponentBased {
    fn decompose(&self, intent: &TaskIntent) -> Vec<Subtask> {
        let mut ids_by_name: HashMap<&str, uuid::Uuid> = HashMap::new();
        let mut tasks = Vec::with_capacity(intent.hints.components.len());

        for component in &intent.hints.components {
            let mut task = base_task(intent, format!("component: {}", component.name))
                .with_payload(json!({
                    "goal": intent.goal,
                    "component": component.name,
                }));
            for skill in &component.skills {
                task = task.with_skill(skill.clone());
            }
            ids_by_name.insert(component.name.as_str(), task.id);
            tasks.push(task);
        }

        for (component, task) in intent.hints.components.iter().zip(tasks.iter_mut()) {
            for dep_name in &component.depends_on {
                match ids_by_name.get(dep_name.as_str()) {
                    Some(dep_id) if *dep_id != task.id => task.dependencies.push(*dep_id),
                    Some(_) => {}
                    None => {
                        tracing::warn!(
                            component = %component.name,
                            dependency = %dep_name,
                            "component dependency not in decomposition, dropping edge"
                        );
                    }
                }
            }
        }

        tasks
    }

    fn name(&self) -> &'static str {
        "component-based"
    }
}

// ---------------------------------------------------------------------------
// domain-based
// ---------------------------------------------------------------------------

/// One independent subtask per problem domain, plus an integration task
/// joining them when more than one domain is involved.
pub struct DomainBased;

impl DecompositionStrategy for DomainBased {
    fn decompose(&self, intent: &TaskIntent) -> Vec<Subtask> {
        let mut tasks: Vec<Subtask> = intent
            .hints
            .domains
            .iter()
            .map(|domain| {
                let mut task = base_task(intent, format!("domain: {}", domain.name))
                    .with_payload(json!({
                        "goal": intent.goal,
                        "domain": domain.name,
                    }));
                for skill in &domain.skills {
                    task = task.with_skill(skill.clone());
                }
                task
            })
            .collect();

        if tasks.len() > 1 {
            let deps: Vec<uuid::Uuid> = tasks.iter().map(|t| t.id).collect();
            let integrate = base_task(intent, format!("integrate: {}", intent.goal))
                .with_skill("integration")
                .with_dependencies(deps)
                .with_payload(json!({ "goal": intent.goal }));
            tasks.push(integrate);
        }

        tasks
    }

    fn name(&self) -> &'static str {
        "domain-based"
    }
}

// ---------------------------------------------------------------------------
// file-based
// ---------------------------------------------------------------------------

fn skill_for_extension(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    match ext {
        "rs" => Some("rust"),
        "py" => Some("python"),
        "ts" | "tsx" => Some("typescript"),
        "js" | "jsx" => Some("javascript"),
        "go" => Some("go"),
        "md" => Some("docs"),
        _ => None,
    }
}

/// One independent subtask per file. Skills default from the file extension
/// when the hint declares none.
pub struct FileBased;

impl DecompositionStrategy for FileBased {
    fn decompose(&self, intent: &TaskIntent) -> Vec<Subtask> {
        intent
            .hints
            .files
            .iter()
            .map(|file| {
                let mut task = base_task(intent, format!("file: {}", file.path))
                    .with_payload(json!({
                        "goal": intent.goal,
                        "path": file.path,
                    }));
                if file.skills.is_empty() {
                    if let Some(skill) = skill_for_extension(&file.path) {
                        task = task.with_skill(skill);
                    }
                } else {
                    for skill in &file.skills {
                        task = task.with_skill(skill.clone());
                    }
                }
                task
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "file-based"
    }
}

// ---------------------------------------------------------------------------
// pipeline
// ---------------------------------------------------------------------------

/// Sequential chain: each stage depends on the previous one.
pub struct Pipeline;

impl DecompositionStrategy for Pipeline {
    fn decompose(&self, intent: &TaskIntent) -> Vec<Subtask> {
        let mut previous: Option<uuid::Uuid> = None;
        intent
            .hints
            .stages
            .iter()
            .enumerate()
            .map(|(index, stage)| {
                let mut task = base_task(intent, format!("stage {}: {}", index + 1, stage.name))
                    .with_payload(json!({
                        "goal": intent.goal,
                        "stage": stage.name,
                        "position": index,
                    }));
                for skill in &stage.skills {
                    task = task.with_skill(skill.clone());
                }
                if let Some(prev) = previous {
                    task.dependencies.push(prev);
                }
                previous = Some(task.id);
                task
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "pipeline"
    }
}

// ---------------------------------------------------------------------------
// decomposer
// ---------------------------------------------------------------------------

/// Front door for decomposition: dispatches to a strategy and validates the
/// output.
#[derive(Debug, Default)]
pub struct TaskDecomposer;

impl TaskDecomposer {
    pub fn new() -> Self {
        Self
    }

    /// Decompose with a strategy named at the call site.
    pub fn decompose_named(&self, intent: &TaskIntent, strategy: &str) -> SwarmResult<Vec<Subtask>> {
        let kind = DecompositionKind::parse_str(strategy)
            .ok_or_else(|| SwarmError::UnknownStrategy(strategy.to_string()))?;
        self.decompose(intent, kind)
    }

    /// Decompose with a known strategy kind and validate the result.
    pub fn decompose(&self, intent: &TaskIntent, kind: DecompositionKind) -> SwarmResult<Vec<Subtask>> {
        let strategy: Box<dyn DecompositionStrategy> = match kind {
            DecompositionKind::ComponentBased => Box::new(ComponentBased),
            DecompositionKind::DomainBased => Box::new(DomainBased),
            DecompositionKind::FileBased => Box::new(FileBased),
            DecompositionKind::Pipeline => Box::new(Pipeline),
        };

        let tasks = strategy.decompose(intent);
        if tasks.is_empty() {
            return Err(SwarmError::DecompositionEmpty {
                strategy: kind.as_str().to_string(),
            });
        }

        // Output validation: unique ids, resolvable dependencies, acyclic.
        let mut resolver = DependencyResolver::new();
        resolver.build_graph(tasks.clone())?;

        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_strategy() {
        let decomposer = TaskDecomposer::new();
        let intent = TaskIntent::new("build a thing");
        let err = decomposer.decompose_named(&intent, "ml-based").unwrap_err();
        assert!(matches!(err, SwarmError::UnknownStrategy(_)));
    }

    #[test]
    fn test_empty_decomposition_rejected() {
        let decomposer = TaskDecomposer::new();
        let intent = TaskIntent::new("goal with no hints");
        let err = decomposer
            .decompose(&intent, DecompositionKind::Pipeline)
            .unwrap_err();
        assert!(matches!(err, SwarmError::DecompositionEmpty { .. }));
    }

    #[test]
    fn test_component_based_wires_dependencies() {
        let decomposer = TaskDecomposer::new();
        let intent = TaskIntent::new("ship the api")
            .with_component("storage", vec!["rust".into()], vec![])
            .with_component("api", vec!["rust".into()], vec!["storage".into()])
            .with_component("docs", vec!["docs".into()], vec!["api".into()]);

        let tasks = decomposer
            .decompose(&intent, DecompositionKind::ComponentBased)
            .unwrap();
        assert_eq!(tasks.len(), 3);

        let storage = &tasks[0];
        let api = &tasks[1];
        let docs = &tasks[2];
        assert!(storage.dependencies.is_empty());
        assert_eq!(api.dependencies, vec![storage.id]);
        assert_eq!(docs.dependencies, vec![api.id]);
    }

    #[test]
    fn test_component_unknown_dependency_dropped() {
        let decomposer = TaskDecomposer::new();
        let intent = TaskIntent::new("goal").with_component(
            "api",
            vec!["rust".into()],
            vec!["nonexistent".into()],
        );

        let tasks = decomposer
            .decompose(&intent, DecompositionKind::ComponentBased)
            .unwrap();
        assert!(tasks[0].dependencies.is_empty());
    }

    #[test]
    fn test_domain_based_adds_integration() {
        let decomposer = TaskDecomposer::new();
        let intent = TaskIntent::new("overhaul the product")
            .with_domain("frontend", vec!["typescript".into()])
            .with_domain("backend", vec!["rust".into()]);

        let tasks = decomposer
            .decompose(&intent, DecompositionKind::DomainBased)
            .unwrap();
        assert_eq!(tasks.len(), 3);

        let integrate = tasks.last().unwrap();
        assert!(integrate.required_skills.contains("integration"));
        assert_eq!(integrate.dependencies.len(), 2);
    }

    #[test]
    fn test_domain_based_single_domain_no_integration() {
        let decomposer = TaskDecomposer::new();
        let intent = TaskIntent::new("goal").with_domain("backend", vec!["rust".into()]);
        let tasks = decomposer
            .decompose(&intent, DecompositionKind::DomainBased)
            .unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[test]
    fn test_file_based_infers_skills() {
        let decomposer = TaskDecomposer::new();
        let intent = TaskIntent::new("rename everything")
            .with_file("src/main.rs", vec![])
            .with_file("README.md", vec![])
            .with_file("scripts/run.py", vec!["scripting".into()]);

        let tasks = decomposer
            .decompose(&intent, DecompositionKind::FileBased)
            .unwrap();
        assert!(tasks[0].required_skills.contains("rust"));
        assert!(tasks[1].required_skills.contains("docs"));
        // Explicit skills win over inference.
        assert!(tasks[2].required_skills.contains("scripting"));
        assert!(!tasks[2].required_skills.contains("python"));
    }

    #[test]
    fn test_pipeline_chains_stages() {
        let decomposer = TaskDecomposer::new();
        let intent = TaskIntent::new("release")
            .with_stage("build", vec!["rust".into()])
            .with_stage("test", vec!["testing".into()])
            .with_stage("deploy", vec!["ops".into()]);

        let tasks = decomposer
            .decompose(&intent, DecompositionKind::Pipeline)
            .unwrap();
        assert_eq!(tasks.len(), 3);
        assert!(tasks[0].dependencies.is_empty());
        assert_eq!(tasks[1].dependencies, vec![tasks[0].id]);
        assert_eq!(tasks[2].dependencies, vec![tasks[1].id]);
    }

    #[test]
    fn test_tasks_inherit_intent_policy() {
        use crate::domain::models::TaskPriority;
        use std::time::Duration;

        let decomposer = TaskDecomposer::new();
        let intent = TaskIntent::new("goal")
            .with_priority(TaskPriority::Critical)
            .with_timeout(Duration::from_secs(42))
            .with_stage("only", vec![]);

        let tasks = decomposer
            .decompose(&intent, DecompositionKind::Pipeline)
            .unwrap();
        assert_eq!(tasks[0].priority, TaskPriority::Critical);
        assert_eq!(tasks[0].timeout, Duration::from_secs(42));
    }

    #[test]
    fn test_kind_parse_round_trip() {
        for kind in [
            DecompositionKind::ComponentBased,
            DecompositionKind::DomainBased,
            DecompositionKind::FileBased,
            DecompositionKind::Pipeline,
        ] {
            assert_eq!(DecompositionKind::parse_str(kind.as_str()), Some(kind));
        }
    }
}
