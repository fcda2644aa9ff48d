//! Agent selection: requirement matching over the registry, ordered by the
//! active load-balancing strategy.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::{Agent, TaskPriority};
use crate::services::agent_registry::AgentRegistry;
use crate::services::load_balancer::{
    AgentStats, DispatchSample, LoadBalancingStrategy, SelectionContext,
};

/// What a task requires from an agent.
#[derive(Debug, Clone, Default)]
pub struct SelectionRequirements {
    pub required_skills: BTreeSet<String>,
    pub language: Option<String>,
    pub priority: TaskPriority,
    /// Sticky-selection key for affinity-aware strategies.
    pub affinity_key: Option<String>,
}

impl SelectionRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.required_skills.insert(skill.into());
        self
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_skills.extend(skills.into_iter().map(Into::into));
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_affinity(mut self, key: impl Into<String>) -> Self {
        self.affinity_key = Some(key.into());
        self
    }
}

/// Wraps the registry and the active strategy into one selection surface.
pub struct AgentSelector {
    registry: Arc<AgentRegistry>,
    strategy: RwLock<Box<dyn LoadBalancingStrategy>>,
}

impl AgentSelector {
    pub fn new(registry: Arc<AgentRegistry>, strategy: Box<dyn LoadBalancingStrategy>) -> Self {
        Self {
            registry,
            strategy: RwLock::new(strategy),
        }
    }

    /// Swap the active strategy.
    pub async fn set_strategy(&self, strategy: Box<dyn LoadBalancingStrategy>) {
        *self.strategy.write().await = strategy;
    }

    pub async fn strategy_name(&self) -> &'static str {
        self.strategy.read().await.name()
    }

    /// Agents satisfying the requirements, ordered by the active strategy:
    /// the strategy's pick leads, the remaining matches follow in stable id
    /// order so the caller can fail over deterministically.
    pub async fn select_candidates(
        &self,
        task_id: Uuid,
        requirements: &SelectionRequirements,
    ) -> Vec<Agent> {
        let matching = self.matching_agents(requirements).await;
        if matching.is_empty() {
            return matching;
        }

        let mut ctx = SelectionContext::for_task(task_id);
        if let Some(ref key) = requirements.affinity_key {
            ctx = ctx.with_affinity(key.clone());
        }

        let strategy = self.strategy.read().await;
        let Some(picked) = strategy.select(&matching, &ctx) else {
            return matching;
        };
        drop(strategy);

        let mut ordered = Vec::with_capacity(matching.len());
        let mut rest = Vec::new();
        for agent in matching {
            if agent.id == picked {
                ordered.push(agent);
            } else {
                rest.push(agent);
            }
        }
        ordered.extend(rest);
        ordered
    }

    /// Report a dispatch outcome to the active strategy.
    pub async fn record_sample(&self, agent_id: &str, sample: DispatchSample) {
        self.strategy.read().await.record_sample(agent_id, sample);
    }

    /// Rolling statistics from the active strategy.
    pub async fn stats(&self) -> HashMap<String, AgentStats> {
        self.strategy.read().await.stats()
    }

    /// Matching: skills ⊇ required, language accepted, state eligible.
    /// Returned in stable id order.
    async fn matching_agents(&self, requirements: &SelectionRequirements) -> Vec<Agent> {
        self.registry
            .all()
            .await
            .into_iter()
            .filter(|agent| {
                agent.is_eligible()
                    && agent.capabilities.has_skills(&requirements.required_skills)
                    && requirements
                        .language
                        .as_deref()
                        .is_none_or(|lang| agent.capabilities.accepts_language(lang))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AgentCapabilities, AgentState};
    use crate::domain::ports::ManualClock;
    use crate::services::agent_registry::RegistryConfig;
    use crate::services::event_bus::EventBus;
    use crate::services::load_balancer::RoundRobin;

    async fn make_selector() -> (Arc<AgentSelector>, Arc<AgentRegistry>) {
        let clock = Arc::new(ManualClock::default());
        let bus = Arc::new(EventBus::with_defaults());
        let registry = Arc::new(AgentRegistry::new(RegistryConfig::default(), clock, bus));
        let selector = Arc::new(AgentSelector::new(
            registry.clone(),
            Box::new(RoundRobin::new()),
        ));
        (selector, registry)
    }

    fn agent_with_skills(id: &str, skills: &[&str]) -> Agent {
        Agent::new(
            id,
            AgentCapabilities::new().with_skills(skills.iter().copied()),
        )
    }

    #[tokio::test]
    async fn test_skill_matching_filters() {
        let (selector, registry) = make_selector().await;
        registry
            .register(agent_with_skills("a1", &["rust", "testing"]))
            .await
            .unwrap();
        registry
            .register(agent_with_skills("a2", &["python"]))
            .await
            .unwrap();

        let requirements = SelectionRequirements::new().with_skill("rust");
        let candidates = selector
            .select_candidates(Uuid::new_v4(), &requirements)
            .await;

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "a1");
    }

    #[tokio::test]
    async fn test_ineligible_states_excluded() {
        let (selector, registry) = make_selector().await;
        registry
            .register(agent_with_skills("a1", &["rust"]))
            .await
            .unwrap();
        registry
            .register(agent_with_skills("a2", &["rust"]))
            .await
            .unwrap();
        registry
            .update_state("a2", AgentState::Paused)
            .await
            .unwrap();

        let requirements = SelectionRequirements::new().with_skill("rust");
        let candidates = selector
            .select_candidates(Uuid::new_v4(), &requirements)
            .await;

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "a1");
    }

    #[tokio::test]
    async fn test_language_filter() {
        let (selector, registry) = make_selector().await;
        let mut agent = agent_with_skills("a1", &["rust"]);
        agent.capabilities = agent.capabilities.with_language("en");
        registry.register(agent).await.unwrap();

        let requirements = SelectionRequirements::new()
            .with_skill("rust")
            .with_language("de");
        let candidates = selector
            .select_candidates(Uuid::new_v4(), &requirements)
            .await;
        assert!(candidates.is_empty());

        let requirements = SelectionRequirements::new()
            .with_skill("rust")
            .with_language("en");
        let candidates = selector
            .select_candidates(Uuid::new_v4(), &requirements)
            .await;
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_strategy_leads_ordering() {
        let (selector, registry) = make_selector().await;
        for id in ["a1", "a2", "a3"] {
            registry
                .register(agent_with_skills(id, &["rust"]))
                .await
                .unwrap();
        }

        let requirements = SelectionRequirements::new().with_skill("rust");
        // Round-robin: first call picks a1, second picks a2.
        let first = selector
            .select_candidates(Uuid::new_v4(), &requirements)
            .await;
        assert_eq!(first[0].id, "a1");
        assert_eq!(first.len(), 3);

        let second = selector
            .select_candidates(Uuid::new_v4(), &requirements)
            .await;
        assert_eq!(second[0].id, "a2");
        // Failover tail keeps stable order.
        assert_eq!(second[1].id, "a1");
        assert_eq!(second[2].id, "a3");
    }

    #[tokio::test]
    async fn test_empty_pool_returns_empty() {
        let (selector, _registry) = make_selector().await;
        let requirements = SelectionRequirements::new().with_skill("rust");
        let candidates = selector
            .select_candidates(Uuid::new_v4(), &requirements)
            .await;
        assert!(candidates.is_empty());
    }
}
