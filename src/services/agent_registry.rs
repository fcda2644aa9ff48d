//! Live agent pool.
//!
//! The registry owns all agent records. Writes are serialized behind one
//! lock; reads return cloned snapshots. Every observable mutation publishes
//! an event. A background liveness task marks idle/busy agents unhealthy
//! when their heartbeat goes stale.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{SwarmError, SwarmResult};
use crate::domain::models::{Agent, AgentState};
use crate::domain::ports::{RuntimeControl, SharedClock};
use crate::services::event_bus::{EventBus, EventPayload, SwarmEvent};

/// Configuration for the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Heartbeat staleness cutoff before an agent is marked unhealthy.
    pub liveness_timeout_ms: u64,
    /// Interval of the background liveness sweep.
    pub health_check_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            liveness_timeout_ms: 30_000,
            health_check_interval_ms: 5_000,
        }
    }
}

/// Shared registry of worker agents.
pub struct AgentRegistry {
    config: RegistryConfig,
    clock: SharedClock,
    event_bus: Arc<EventBus>,
    agents: RwLock<HashMap<String, Agent>>,
    /// Agents forcibly evicted with work in flight. Consulted by the engine
    /// so their in-flight tasks fail with the eviction error kind.
    evicted: RwLock<HashSet<String>>,
}

impl AgentRegistry {
    pub fn new(config: RegistryConfig, clock: SharedClock, event_bus: Arc<EventBus>) -> Self {
        Self {
            config,
            clock,
            event_bus,
            agents: RwLock::new(HashMap::new()),
            evicted: RwLock::new(HashSet::new()),
        }
    }

    /// Register an agent. A freshly created agent is promoted to idle and
    /// becomes eligible for dispatch.
    pub async fn register(&self, mut agent: Agent) -> SwarmResult<()> {
        agent
            .capabilities
            .validate()
            .map_err(SwarmError::FatalInput)?;

        {
            let agents = self.agents.read().await;
            if agents.contains_key(&agent.id) {
                return Err(SwarmError::FatalInput(format!(
                    "Agent {} is already registered",
                    agent.id
                )));
            }
        }

        if agent.state == AgentState::Created {
            agent.transition_to(AgentState::Idle)?;
        }
        agent.last_seen = self.clock.now();

        let skills: Vec<String> = agent.capabilities.skills.iter().cloned().collect();
        let id = agent.id.clone();

        self.agents.write().await.insert(id.clone(), agent);
        self.evicted.write().await.remove(&id);

        self.event_bus.publish(SwarmEvent::new(
            "agent_registry",
            EventPayload::AgentRegistered { agent_id: id, skills },
        ));
        Ok(())
    }

    /// Remove an agent. Fails with `AgentBusy` when assignments are in
    /// flight unless `force` is set; forced eviction causes those tasks to
    /// fail with the eviction error kind.
    pub async fn unregister(&self, agent_id: &str, force: bool) -> SwarmResult<Agent> {
        let removed = {
            let mut agents = self.agents.write().await;
            let agent = agents
                .get(agent_id)
                .ok_or_else(|| SwarmError::AgentNotFound(agent_id.to_string()))?;

            if agent.in_flight > 0 && !force {
                return Err(SwarmError::AgentBusy {
                    agent_id: agent_id.to_string(),
                });
            }
            agents.remove(agent_id).expect("checked above")
        };

        if force && removed.in_flight > 0 {
            self.evicted.write().await.insert(agent_id.to_string());
        }

        self.event_bus.publish(SwarmEvent::new(
            "agent_registry",
            EventPayload::AgentUnregistered {
                agent_id: agent_id.to_string(),
                forced: force,
            },
        ));
        Ok(removed)
    }

    /// Whether an agent was forcibly evicted while work was in flight.
    pub async fn is_evicted(&self, agent_id: &str) -> bool {
        self.evicted.read().await.contains(agent_id)
    }

    /// Transition an agent's state, enforcing the state machine.
    pub async fn update_state(&self, agent_id: &str, state: AgentState) -> SwarmResult<AgentState> {
        let (from, to) = {
            let mut agents = self.agents.write().await;
            let agent = agents
                .get_mut(agent_id)
                .ok_or_else(|| SwarmError::AgentNotFound(agent_id.to_string()))?;
            let from = agent.state;
            agent.transition_to(state)?;
            (from, agent.state)
        };
        self.emit_state_changed(agent_id, from, to);
        Ok(to)
    }

    /// Resume a paused agent to its interrupted state.
    pub async fn resume(&self, agent_id: &str) -> SwarmResult<AgentState> {
        let (from, to) = {
            let mut agents = self.agents.write().await;
            let agent = agents
                .get_mut(agent_id)
                .ok_or_else(|| SwarmError::AgentNotFound(agent_id.to_string()))?;
            let from = agent.state;
            agent.resume()?;
            (from, agent.state)
        };
        self.emit_state_changed(agent_id, from, to);
        Ok(to)
    }

    /// Record a heartbeat. An unhealthy agent that heartbeats recovers to
    /// idle.
    pub async fn heartbeat(&self, agent_id: &str) -> SwarmResult<()> {
        let recovered = {
            let mut agents = self.agents.write().await;
            let agent = agents
                .get_mut(agent_id)
                .ok_or_else(|| SwarmError::AgentNotFound(agent_id.to_string()))?;
            agent.last_seen = self.clock.now();
            if agent.state == AgentState::Unhealthy {
                agent.transition_to(AgentState::Idle)?;
                true
            } else {
                false
            }
        };
        if recovered {
            self.emit_state_changed(agent_id, AgentState::Unhealthy, AgentState::Idle);
        }
        Ok(())
    }

    /// Snapshot of one agent.
    pub async fn get(&self, agent_id: &str) -> Option<Agent> {
        self.agents.read().await.get(agent_id).cloned()
    }

    /// Consistent snapshot of the whole pool.
    pub async fn all(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Agents currently in `state`.
    pub async fn by_state(&self, state: AgentState) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self
            .agents
            .read()
            .await
            .values()
            .filter(|a| a.state == state)
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    /// Remove every agent. A clear-then-register sequence yields a pool
    /// containing exactly the re-registered agents.
    pub async fn clear(&self) {
        let ids: Vec<String> = {
            let mut agents = self.agents.write().await;
            let ids = agents.keys().cloned().collect();
            agents.clear();
            ids
        };
        self.evicted.write().await.clear();
        for agent_id in ids {
            self.event_bus.publish(SwarmEvent::new(
                "agent_registry",
                EventPayload::AgentUnregistered {
                    agent_id,
                    forced: false,
                },
            ));
        }
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// Record the start of an assignment: bump the in-flight gauge and move
    /// an idle agent to busy.
    pub async fn begin_assignment(&self, agent_id: &str) -> SwarmResult<()> {
        let transition = {
            let mut agents = self.agents.write().await;
            let agent = agents
                .get_mut(agent_id)
                .ok_or_else(|| SwarmError::AgentNotFound(agent_id.to_string()))?;
            agent.in_flight += 1;
            if agent.state == AgentState::Idle {
                agent.transition_to(AgentState::Busy)?;
                Some((AgentState::Idle, AgentState::Busy))
            } else {
                None
            }
        };
        if let Some((from, to)) = transition {
            self.emit_state_changed(agent_id, from, to);
        }
        Ok(())
    }

    /// Record the end of an assignment: drop the gauge and return a drained
    /// busy agent to idle. Missing agents are tolerated (eviction races).
    pub async fn end_assignment(&self, agent_id: &str) {
        let transition = {
            let mut agents = self.agents.write().await;
            let Some(agent) = agents.get_mut(agent_id) else {
                return;
            };
            agent.in_flight = agent.in_flight.saturating_sub(1);
            if agent.in_flight == 0 && agent.state == AgentState::Busy {
                if agent.transition_to(AgentState::Idle).is_ok() {
                    Some((AgentState::Busy, AgentState::Idle))
                } else {
                    None
                }
            } else {
                None
            }
        };
        if let Some((from, to)) = transition {
            self.emit_state_changed(agent_id, from, to);
        }
    }

    /// One liveness sweep: mark idle/busy agents unhealthy when their
    /// heartbeat is older than the liveness timeout.
    pub async fn check_liveness(&self) {
        let cutoff =
            self.clock.now() - chrono::Duration::milliseconds(self.config.liveness_timeout_ms as i64);
        let stale: Vec<(String, AgentState)> = {
            let mut agents = self.agents.write().await;
            let mut stale = Vec::new();
            for agent in agents.values_mut() {
                if matches!(agent.state, AgentState::Idle | AgentState::Busy)
                    && agent.last_seen < cutoff
                {
                    let from = agent.state;
                    if agent.transition_to(AgentState::Unhealthy).is_ok() {
                        stale.push((agent.id.clone(), from));
                    }
                }
            }
            stale
        };
        for (agent_id, from) in stale {
            tracing::warn!(agent = %agent_id, "agent missed liveness window, marking unhealthy");
            self.emit_state_changed(&agent_id, from, AgentState::Unhealthy);
        }
    }

    /// Spawn the background liveness monitor. Stops when `token` fires.
    pub fn spawn_liveness_monitor(
        self: &Arc<Self>,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = Duration::from_millis(registry.config.health_check_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        registry.check_liveness().await;
                    }
                }
            }
        })
    }

    fn emit_state_changed(&self, agent_id: &str, from: AgentState, to: AgentState) {
        self.event_bus.publish(SwarmEvent::new(
            "agent_registry",
            EventPayload::AgentStateChanged {
                agent_id: agent_id.to_string(),
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            },
        ));
    }
}

#[async_trait]
impl RuntimeControl for AgentRegistry {
    async fn stop_runtime(&self, agent_id: &str) -> SwarmResult<()> {
        let transition = {
            let mut agents = self.agents.write().await;
            let agent = agents
                .get_mut(agent_id)
                .ok_or_else(|| SwarmError::AgentNotFound(agent_id.to_string()))?;
            if agent.state == AgentState::Stopped {
                None
            } else {
                let from = agent.state;
                agent.transition_to(AgentState::Stopped)?;
                Some(from)
            }
        };
        if let Some(from) = transition {
            self.emit_state_changed(agent_id, from, AgentState::Stopped);
        }
        Ok(())
    }
}
