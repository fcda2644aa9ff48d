//! Per-agent cost session tracking.
//!
//! Sessions meter agent runtime and token usage against a rate table. The
//! live cost of an agent is the sum of its closed sessions plus the accrued
//! cost of any open session. Declared per-agent thresholds fire
//! `cost.threshold_warning` / `cost.threshold_exceeded` events on the
//! crossing edge only; dropping back below re-arms them.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{SwarmError, SwarmResult};
use crate::domain::models::{CostSession, RateTable, RuntimeKind, TokenUsage};
use crate::domain::ports::SharedClock;
use crate::services::event_bus::{EventBus, EventPayload, SwarmEvent};

/// Threshold fractions applied to declared per-agent cost thresholds.
#[derive(Debug, Clone)]
pub struct CostTrackerConfig {
    /// Fraction of a threshold at which the warning fires, in (0, 1].
    pub warn_fraction: f64,
    /// Fraction of a threshold at which the exceeded event fires, in (0, 1].
    pub stop_fraction: f64,
}

impl Default for CostTrackerConfig {
    fn default() -> Self {
        Self {
            warn_fraction: 0.8,
            stop_fraction: 1.0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ThresholdEdges {
    warned: bool,
    exceeded: bool,
}

#[derive(Default)]
struct Inner {
    /// Closed sessions per agent.
    closed: HashMap<String, Vec<CostSession>>,
    /// At most one open session per agent.
    open: HashMap<String, CostSession>,
    /// Declared cost thresholds per agent (USD).
    thresholds: HashMap<String, f64>,
    /// Edge state per agent for idempotent event emission.
    edges: HashMap<String, ThresholdEdges>,
}

/// Service metering per-agent spend.
pub struct CostTracker {
    rates: RateTable,
    config: CostTrackerConfig,
    clock: SharedClock,
    event_bus: Arc<EventBus>,
    inner: RwLock<Inner>,
}

impl CostTracker {
    pub fn new(
        rates: RateTable,
        config: CostTrackerConfig,
        clock: SharedClock,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            rates,
            config,
            clock,
            event_bus,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Start a cost session for an agent. An already-open session for the
    /// same agent is closed first.
    pub async fn start_session(
        &self,
        agent_id: &str,
        runtime: RuntimeKind,
        model: Option<&str>,
    ) -> Uuid {
        let now = self.clock.now();
        let mut session = CostSession::start(agent_id, runtime, now);
        if let Some(model) = model {
            session = session.with_model(model);
        }
        let id = session.id;

        let mut inner = self.inner.write().await;
        if let Some(mut previous) = inner.open.remove(agent_id) {
            previous.close(now);
            self.emit_session_closed(&previous, now);
            inner.closed.entry(agent_id.to_string()).or_default().push(previous);
        }
        inner.open.insert(agent_id.to_string(), session);
        drop(inner);

        self.check_thresholds_for(agent_id).await;
        id
    }

    /// Record token usage on the agent's open session.
    pub async fn record_tokens(&self, agent_id: &str, usage: TokenUsage) -> SwarmResult<()> {
        {
            let mut inner = self.inner.write().await;
            let session = inner
                .open
                .get_mut(agent_id)
                .ok_or_else(|| SwarmError::AgentNotFound(agent_id.to_string()))?;
            session.record_tokens(usage);
        }
        self.check_thresholds_for(agent_id).await;
        Ok(())
    }

    /// Close the agent's open session, returning it. Emits
    /// `cost.session_closed`.
    pub async fn close_session(&self, agent_id: &str) -> Option<CostSession> {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        let mut session = inner.open.remove(agent_id)?;
        session.close(now);
        self.emit_session_closed(&session, now);
        inner
            .closed
            .entry(agent_id.to_string())
            .or_default()
            .push(session.clone());
        Some(session)
    }

    /// Live cost for an agent: closed sessions plus the accrued-so-far cost
    /// of the open one.
    pub async fn agent_cost(&self, agent_id: &str) -> f64 {
        let now = self.clock.now();
        let inner = self.inner.read().await;
        let closed: f64 = inner
            .closed
            .get(agent_id)
            .map(|sessions| sessions.iter().map(|s| s.cost(&self.rates, now)).sum())
            .unwrap_or(0.0);
        let open = inner
            .open
            .get(agent_id)
            .map_or(0.0, |s| s.cost(&self.rates, now));
        closed + open
    }

    /// Total cost across all agents.
    pub async fn total_cost(&self) -> f64 {
        let now = self.clock.now();
        let inner = self.inner.read().await;
        let closed: f64 = inner
            .closed
            .values()
            .flatten()
            .map(|s| s.cost(&self.rates, now))
            .sum();
        let open: f64 = inner.open.values().map(|s| s.cost(&self.rates, now)).sum();
        closed + open
    }

    /// Snapshot of the agent's open session, if any.
    pub async fn open_session(&self, agent_id: &str) -> Option<CostSession> {
        self.inner.read().await.open.get(agent_id).cloned()
    }

    /// Declare a cost threshold (USD) for an agent. Crossing
    /// `warn_fraction`/`stop_fraction` of it fires the threshold events.
    pub async fn set_threshold(&self, agent_id: &str, amount: f64) {
        let mut inner = self.inner.write().await;
        inner.thresholds.insert(agent_id.to_string(), amount);
        inner.edges.entry(agent_id.to_string()).or_default();
    }

    /// Re-evaluate declared thresholds for one agent, emitting edge events.
    pub async fn check_thresholds_for(&self, agent_id: &str) {
        let threshold = {
            let inner = self.inner.read().await;
            match inner.thresholds.get(agent_id) {
                Some(t) => *t,
                None => return,
            }
        };
        let cost = self.agent_cost(agent_id).await;

        let warn_at = threshold * self.config.warn_fraction;
        let stop_at = threshold * self.config.stop_fraction;

        let mut inner = self.inner.write().await;
        let edges = inner.edges.entry(agent_id.to_string()).or_default();

        if cost >= stop_at {
            if !edges.exceeded {
                edges.exceeded = true;
                self.event_bus.publish(SwarmEvent::new(
                    "cost_tracker",
                    EventPayload::CostThresholdExceeded {
                        agent_id: agent_id.to_string(),
                        cost,
                        threshold: stop_at,
                    },
                ));
            }
        } else {
            edges.exceeded = false;
        }

        if cost >= warn_at {
            if !edges.warned {
                edges.warned = true;
                self.event_bus.publish(SwarmEvent::new(
                    "cost_tracker",
                    EventPayload::CostThresholdWarning {
                        agent_id: agent_id.to_string(),
                        cost,
                        threshold: warn_at,
                    },
                ));
            }
        } else {
            edges.warned = false;
        }
    }

    /// Re-evaluate all declared thresholds.
    pub async fn check_thresholds(&self) {
        let agents: Vec<String> = {
            let inner = self.inner.read().await;
            inner.thresholds.keys().cloned().collect()
        };
        for agent_id in agents {
            self.check_thresholds_for(&agent_id).await;
        }
    }

    pub fn rates(&self) -> &RateTable {
        &self.rates
    }

    fn emit_session_closed(&self, session: &CostSession, now: chrono::DateTime<chrono::Utc>) {
        self.event_bus.publish(SwarmEvent::new(
            "cost_tracker",
            EventPayload::CostSessionClosed {
                session_id: session.id,
                agent_id: session.agent_id.clone(),
                cost: session.cost(&self.rates, now),
            },
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ManualClock;
    use std::time::Duration;

    fn make_tracker() -> (Arc<CostTracker>, Arc<ManualClock>, Arc<EventBus>) {
        let clock = Arc::new(ManualClock::default());
        let bus = Arc::new(EventBus::with_defaults());
        let tracker = Arc::new(CostTracker::new(
            RateTable::default(),
            CostTrackerConfig::default(),
            clock.clone(),
            bus.clone(),
        ));
        (tracker, clock, bus)
    }

    #[tokio::test]
    async fn test_open_session_accrues_over_time() {
        let (tracker, clock, _bus) = make_tracker();
        tracker.start_session("a1", RuntimeKind::E2b, None).await;

        assert!(tracker.agent_cost("a1").await < 1e-9);

        clock.advance(Duration::from_secs(3600));
        // One hour of e2b at $0.35/h
        let cost = tracker.agent_cost("a1").await;
        assert!((cost - 0.35).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_closed_plus_open_sums() {
        let (tracker, clock, _bus) = make_tracker();
        tracker.start_session("a1", RuntimeKind::E2b, None).await;
        clock.advance(Duration::from_secs(3600));
        tracker.close_session("a1").await.unwrap();

        tracker.start_session("a1", RuntimeKind::E2b, None).await;
        clock.advance(Duration::from_secs(1800));

        // 1h closed + 0.5h open = 1.5h * 0.35
        let cost = tracker.agent_cost("a1").await;
        assert!((cost - 0.525).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_token_recording_requires_open_session() {
        let (tracker, _clock, _bus) = make_tracker();
        let result = tracker.record_tokens("ghost", TokenUsage::new(100, 50)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_token_cost_included() {
        let (tracker, _clock, _bus) = make_tracker();
        tracker
            .start_session("a1", RuntimeKind::Native, Some("sonnet"))
            .await;
        tracker
            .record_tokens("a1", TokenUsage::new(2000, 1000))
            .await
            .unwrap();

        // Native runtime is free; 2k prompt + 1k completion on sonnet = 0.021
        let cost = tracker.agent_cost("a1").await;
        assert!((cost - 0.021).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_threshold_events_fire_once_per_edge() {
        let (tracker, clock, bus) = make_tracker();
        let mut sub = bus.subscribe();

        tracker.set_threshold("a1", 0.35).await;
        tracker.start_session("a1", RuntimeKind::E2b, None).await;

        clock.advance(Duration::from_secs(3600));
        tracker.check_thresholds().await;
        tracker.check_thresholds().await;

        let mut warnings = 0;
        let mut exceeded = 0;
        while let Some(event) = sub.try_recv() {
            match event.payload {
                EventPayload::CostThresholdWarning { .. } => warnings += 1,
                EventPayload::CostThresholdExceeded { .. } => exceeded += 1,
                _ => {}
            }
        }
        assert_eq!(warnings, 1);
        assert_eq!(exceeded, 1);
    }

    #[tokio::test]
    async fn test_session_closed_event() {
        let (tracker, clock, bus) = make_tracker();
        let mut sub = bus.subscribe_filtered(crate::services::event_bus::EventFilter::topic(
            "cost.session_closed",
        ));

        tracker.start_session("a1", RuntimeKind::Worktree, None).await;
        clock.advance(Duration::from_secs(60));
        tracker.close_session("a1").await.unwrap();

        let event = sub.try_recv().unwrap();
        assert_eq!(event.topic(), "cost.session_closed");
    }

    #[tokio::test]
    async fn test_restart_closes_previous_session() {
        let (tracker, clock, _bus) = make_tracker();
        tracker.start_session("a1", RuntimeKind::E2b, None).await;
        clock.advance(Duration::from_secs(3600));
        tracker.start_session("a1", RuntimeKind::E2b, None).await;

        // Previous hour is frozen in a closed session.
        clock.advance(Duration::from_secs(3600));
        let cost = tracker.agent_cost("a1").await;
        assert!((cost - 0.70).abs() < 1e-9);
        assert!(tracker.open_session("a1").await.is_some());
    }
}
