//! Agent domain model.
//!
//! Agents are worker identities in the federation. Each carries an immutable
//! id, a mutable lifecycle state, and a capability profile used by the
//! selector and the load-balancing strategies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Registered but not yet accepting work.
    Created,
    /// Available for dispatch.
    Idle,
    /// Executing at least one task.
    Busy,
    /// Temporarily withdrawn from dispatch; resumes to the previous state.
    Paused,
    /// Missed heartbeats or failed health checks.
    Unhealthy,
    /// Runtime stopped; terminal.
    Stopped,
}

impl Default for AgentState {
    fn default() -> Self {
        Self::Created
    }
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Paused => "paused",
            Self::Unhealthy => "unhealthy",
            Self::Stopped => "stopped",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "created" => Some(Self::Created),
            "idle" => Some(Self::Idle),
            "busy" => Some(Self::Busy),
            "paused" => Some(Self::Paused),
            "unhealthy" => Some(Self::Unhealthy),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }

    /// Valid transitions from this state. `Stopped` is reachable from any
    /// non-terminal state; `Paused` resumes to the state it interrupted.
    pub fn valid_transitions(&self) -> &'static [AgentState] {
        match self {
            Self::Created => &[Self::Idle, Self::Stopped],
            Self::Idle => &[Self::Busy, Self::Paused, Self::Unhealthy, Self::Stopped],
            Self::Busy => &[Self::Idle, Self::Paused, Self::Unhealthy, Self::Stopped],
            Self::Paused => &[Self::Idle, Self::Busy, Self::Stopped],
            Self::Unhealthy => &[Self::Idle, Self::Stopped],
            Self::Stopped => &[],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Capability profile of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    /// Skills this agent can apply (task matching is skills ⊇ required).
    pub skills: BTreeSet<String>,
    /// Input languages the agent accepts.
    pub languages: BTreeSet<String>,
    /// Free-form specialties, used for display and affinity hints.
    pub specialties: Vec<String>,
    /// Cost per hour in USD.
    pub cost_per_hour: f64,
    /// Average speed score (higher is faster).
    pub avg_speed: f64,
    /// Reliability score in [0, 1].
    pub reliability: f64,
    /// Maximum concurrent assignments, when bounded.
    pub max_connections: Option<u32>,
    /// Current load gauge in [0, 1].
    pub current_load: f64,
}

impl Default for AgentCapabilities {
    fn default() -> Self {
        Self {
            skills: BTreeSet::new(),
            languages: BTreeSet::new(),
            specialties: Vec::new(),
            cost_per_hour: 1.0,
            avg_speed: 1.0,
            reliability: 1.0,
            max_connections: None,
            current_load: 0.0,
        }
    }
}

impl AgentCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skills.insert(skill.into());
        self
    }

    pub fn with_skills<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills.extend(skills.into_iter().map(Into::into));
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.languages.insert(language.into());
        self
    }

    pub fn with_specialty(mut self, specialty: impl Into<String>) -> Self {
        self.specialties.push(specialty.into());
        self
    }

    pub fn with_cost_per_hour(mut self, cost: f64) -> Self {
        self.cost_per_hour = cost;
        self
    }

    pub fn with_avg_speed(mut self, speed: f64) -> Self {
        self.avg_speed = speed;
        self
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Validate score invariants (reliability and load in [0, 1]).
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.reliability) {
            return Err(format!(
                "Reliability must be in [0, 1], got {}",
                self.reliability
            ));
        }
        if !(0.0..=1.0).contains(&self.current_load) {
            return Err(format!(
                "Current load must be in [0, 1], got {}",
                self.current_load
            ));
        }
        if self.cost_per_hour < 0.0 {
            return Err(format!(
                "Cost per hour must be non-negative, got {}",
                self.cost_per_hour
            ));
        }
        Ok(())
    }

    pub fn has_skills(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.skills)
    }

    pub fn accepts_language(&self, language: &str) -> bool {
        self.languages.is_empty() || self.languages.contains(language)
    }
}

/// A worker agent record owned by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Immutable identity (operator-assigned, stable across restarts).
    pub id: String,
    /// Current lifecycle state.
    pub state: AgentState,
    /// State interrupted by a pause; restored on resume.
    pub paused_from: Option<AgentState>,
    /// Capability profile.
    pub capabilities: AgentCapabilities,
    /// Number of in-flight assignments.
    pub in_flight: u32,
    /// Last heartbeat.
    pub last_seen: DateTime<Utc>,
    /// When the agent was registered.
    pub registered_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(id: impl Into<String>, capabilities: AgentCapabilities) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            state: AgentState::Created,
            paused_from: None,
            capabilities,
            in_flight: 0,
            last_seen: now,
            registered_at: now,
        }
    }

    /// Transition to a new state, enforcing the state machine.
    ///
    /// Pausing records the interrupted state; resuming from `Paused` must
    /// target that recorded state.
    pub fn transition_to(&mut self, next: AgentState) -> Result<(), crate::domain::errors::SwarmError> {
        use crate::domain::errors::SwarmError;

        if !self.state.can_transition_to(next) {
            return Err(SwarmError::InvalidStateTransition {
                from: self.state.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        if self.state == AgentState::Paused && next != AgentState::Stopped {
            let expected = self.paused_from.unwrap_or(AgentState::Idle);
            if next != expected {
                return Err(SwarmError::InvalidStateTransition {
                    from: self.state.as_str().to_string(),
                    to: next.as_str().to_string(),
                });
            }
        }

        self.paused_from = if next == AgentState::Paused {
            Some(self.state)
        } else {
            None
        };
        self.state = next;
        Ok(())
    }

    /// Resume from `Paused` back to the interrupted state.
    pub fn resume(&mut self) -> Result<(), crate::domain::errors::SwarmError> {
        let target = self.paused_from.unwrap_or(AgentState::Idle);
        self.transition_to(target)
    }

    /// Record a heartbeat.
    pub fn heartbeat(&mut self) {
        self.last_seen = Utc::now();
    }

    /// Whether the agent can accept a new assignment: idle, or busy with
    /// remaining connection slack.
    pub fn is_eligible(&self) -> bool {
        match self.state {
            AgentState::Idle => true,
            AgentState::Busy => self.has_slack(),
            _ => false,
        }
    }

    /// Busy-with-slack: below the connection cap when one is set, otherwise
    /// below a saturated load gauge.
    pub fn has_slack(&self) -> bool {
        match self.capabilities.max_connections {
            Some(max) => self.in_flight < max,
            None => self.capabilities.current_load < 1.0,
        }
    }
}
