//! Budget enforcement across agent, team, and global scopes.
//!
//! The enforcer owns budget accounts and answers the scheduler's
//! `check_enforcement` call before every dispatch. Spend is read live from
//! the cost tracker. Threshold events are edge-triggered per
//! (scope, threshold): a sustained exceeded state fires once, and re-fires
//! only after spend drops below the threshold and crosses it again.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::errors::SwarmResult;
use crate::domain::models::{BudgetAccount, BudgetScope, BudgetStatus};
use crate::domain::ports::RuntimeControl;
use crate::services::cost_tracker::CostTracker;
use crate::services::event_bus::{EventBus, EventPayload, SwarmEvent};

/// Decision returned to the scheduler for one agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Enforcement {
    /// Under all thresholds; dispatch freely.
    None,
    /// At or over the warn threshold of some scope; dispatch but surface it.
    Warn { scope: BudgetScope },
    /// At or over the stop threshold of some scope; forbid new dispatch.
    Stop { scope: BudgetScope },
}

impl Enforcement {
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop { .. })
    }

    pub fn is_warn(&self) -> bool {
        matches!(self, Self::Warn { .. })
    }
}

/// Configuration for the enforcer.
#[derive(Debug, Clone)]
pub struct BudgetEnforcerConfig {
    /// Default warn threshold fraction for new accounts, in (0, 1].
    pub warn_fraction: f64,
    /// Default stop threshold fraction for new accounts, in (0, 1].
    pub stop_fraction: f64,
    /// Whether a stop decision also stops the agent's runtime.
    pub auto_stop: bool,
}

impl Default for BudgetEnforcerConfig {
    fn default() -> Self {
        Self {
            warn_fraction: 0.8,
            stop_fraction: 1.0,
            auto_stop: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ScopeEdges {
    warned: bool,
    exceeded: bool,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<BudgetScope, BudgetAccount>,
    /// Agent id -> team name, for team scope resolution.
    teams: HashMap<String, String>,
    edges: HashMap<BudgetScope, ScopeEdges>,
    /// Agents already auto-stopped, to keep the stop idempotent.
    stopped: std::collections::HashSet<String>,
}

/// Service enforcing spend limits before dispatch.
pub struct BudgetEnforcer {
    config: BudgetEnforcerConfig,
    cost_tracker: Arc<CostTracker>,
    event_bus: Arc<EventBus>,
    /// Injected after construction; the registry is built later in the
    /// dependency order and implements this port.
    runtime_control: RwLock<Option<Arc<dyn RuntimeControl>>>,
    inner: RwLock<Inner>,
}

impl BudgetEnforcer {
    pub fn new(
        config: BudgetEnforcerConfig,
        cost_tracker: Arc<CostTracker>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            cost_tracker,
            event_bus,
            runtime_control: RwLock::new(None),
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Wire the runtime-control port (implemented by the agent registry).
    pub async fn set_runtime_control(&self, control: Arc<dyn RuntimeControl>) {
        *self.runtime_control.write().await = Some(control);
    }

    /// Declare or replace a budget for a scope, using the default fractions.
    pub async fn set_budget(&self, scope: BudgetScope, limit: f64) {
        self.set_budget_with_thresholds(
            scope,
            limit,
            self.config.warn_fraction,
            self.config.stop_fraction,
        )
        .await;
    }

    /// Declare or replace a budget with explicit thresholds.
    pub async fn set_budget_with_thresholds(
        &self,
        scope: BudgetScope,
        limit: f64,
        warn_fraction: f64,
        stop_fraction: f64,
    ) {
        let account =
            BudgetAccount::new(scope.clone(), limit).with_thresholds(warn_fraction, stop_fraction);
        let mut inner = self.inner.write().await;
        inner.accounts.insert(scope.clone(), account);
        inner.edges.entry(scope).or_default();
    }

    /// Remove a scope's budget.
    pub async fn remove_budget(&self, scope: &BudgetScope) {
        let mut inner = self.inner.write().await;
        inner.accounts.remove(scope);
        inner.edges.remove(scope);
    }

    /// Assign an agent to a team for team-scope accounting.
    pub async fn set_team(&self, agent_id: &str, team: &str) {
        let mut inner = self.inner.write().await;
        inner.teams.insert(agent_id.to_string(), team.to_string());
    }

    /// Reset a scope's edge state and spend baseline (e.g. after raising a
    /// limit or rolling a billing window). The underlying cost history is
    /// unchanged; only enforcement state resets.
    pub async fn reset_scope(&self, scope: &BudgetScope) {
        let mut inner = self.inner.write().await;
        if let Some(account) = inner.accounts.get_mut(scope) {
            account.reset();
        }
        inner.edges.insert(scope.clone(), ScopeEdges::default());
        if let BudgetScope::Agent(agent_id) = scope {
            inner.stopped.remove(agent_id);
        }
    }

    /// Raise (or change) a scope's limit, re-arming enforcement.
    pub async fn set_limit(&self, scope: &BudgetScope, limit: f64) {
        let mut inner = self.inner.write().await;
        if let Some(account) = inner.accounts.get_mut(scope) {
            account.limit = limit;
        }
        inner.edges.insert(scope.clone(), ScopeEdges::default());
        if let BudgetScope::Agent(agent_id) = scope {
            inner.stopped.remove(agent_id);
        }
    }

    /// Snapshot of all accounts with spend refreshed.
    pub async fn accounts(&self) -> Vec<BudgetAccount> {
        let scopes: Vec<BudgetScope> = {
            let inner = self.inner.read().await;
            inner.accounts.keys().cloned().collect()
        };
        let mut result = Vec::with_capacity(scopes.len());
        for scope in scopes {
            let spend = self.scope_spend(&scope).await;
            let mut inner = self.inner.write().await;
            if let Some(account) = inner.accounts.get_mut(&scope) {
                account.set_spend(spend);
                result.push(account.clone());
            }
        }
        result
    }

    /// The scheduler's gate: evaluate every scope covering `agent_id` and
    /// return the most severe decision. Emits threshold events on edges and
    /// performs the auto-stop when configured.
    pub async fn check_enforcement(&self, agent_id: &str) -> Enforcement {
        let scopes = self.scopes_for(agent_id).await;

        let mut decision = Enforcement::None;
        for scope in scopes {
            let spend = self.scope_spend(&scope).await;
            let status = {
                let mut inner = self.inner.write().await;
                let Some(account) = inner.accounts.get_mut(&scope) else {
                    continue;
                };
                account.set_spend(spend);
                let status = account.status();
                let limit = account.limit;
                let edges = inner.edges.entry(scope.clone()).or_default();

                match status {
                    BudgetStatus::Exceeded => {
                        if !edges.exceeded {
                            edges.exceeded = true;
                            self.event_bus.publish(SwarmEvent::new(
                                "budget_enforcer",
                                EventPayload::BudgetExceeded {
                                    scope: scope.to_string(),
                                    current_spend: spend,
                                    limit,
                                },
                            ));
                        }
                    }
                    BudgetStatus::Warning => {
                        edges.exceeded = false;
                        if !edges.warned {
                            edges.warned = true;
                            self.event_bus.publish(SwarmEvent::new(
                                "budget_enforcer",
                                EventPayload::BudgetWarning {
                                    scope: scope.to_string(),
                                    current_spend: spend,
                                    limit,
                                },
                            ));
                        }
                    }
                    BudgetStatus::Ok => {
                        *edges = ScopeEdges::default();
                    }
                }
                status
            };

            match status {
                BudgetStatus::Exceeded => {
                    decision = Enforcement::Stop { scope };
                    break;
                }
                BudgetStatus::Warning => {
                    if decision == Enforcement::None {
                        decision = Enforcement::Warn { scope };
                    }
                }
                BudgetStatus::Ok => {}
            }
        }

        if let Enforcement::Stop { ref scope } = decision {
            if self.config.auto_stop {
                self.auto_stop(agent_id, scope).await;
            }
        }

        decision
    }

    /// Stop the agent's runtime: registry transition, session close, event.
    /// Idempotent per agent until the scope is reset.
    async fn auto_stop(&self, agent_id: &str, scope: &BudgetScope) {
        {
            let mut inner = self.inner.write().await;
            if !inner.stopped.insert(agent_id.to_string()) {
                return;
            }
        }

        let control = self.runtime_control.read().await.clone();
        if let Some(control) = control {
            if let Err(e) = control.stop_runtime(agent_id).await {
                tracing::warn!("Failed to stop runtime for agent {}: {}", agent_id, e);
            }
        }
        self.cost_tracker.close_session(agent_id).await;

        self.event_bus.publish(SwarmEvent::new(
            "budget_enforcer",
            EventPayload::RuntimeStopped {
                agent_id: agent_id.to_string(),
                scope: scope.to_string(),
            },
        ));
    }

    /// Stop an agent runtime on demand (manual override path).
    pub async fn stop_runtime(&self, agent_id: &str) -> SwarmResult<()> {
        let control = self.runtime_control.read().await.clone();
        if let Some(control) = control {
            control.stop_runtime(agent_id).await?;
        }
        self.cost_tracker.close_session(agent_id).await;
        self.event_bus.publish(SwarmEvent::new(
            "budget_enforcer",
            EventPayload::RuntimeStopped {
                agent_id: agent_id.to_string(),
                scope: "manual".to_string(),
            },
        ));
        Ok(())
    }

    /// Scopes covering an agent, in precedence order: agent, team, global.
    async fn scopes_for(&self, agent_id: &str) -> Vec<BudgetScope> {
        let inner = self.inner.read().await;
        let mut scopes = vec![BudgetScope::agent(agent_id)];
        if let Some(team) = inner.teams.get(agent_id) {
            scopes.push(BudgetScope::team(team.clone()));
        }
        scopes.push(BudgetScope::Global);
        scopes
    }

    /// Live spend for a scope, read from the cost tracker.
    async fn scope_spend(&self, scope: &BudgetScope) -> f64 {
        match scope {
            BudgetScope::Agent(agent_id) => self.cost_tracker.agent_cost(agent_id).await,
            BudgetScope::Team(team) => {
                let members: Vec<String> = {
                    let inner = self.inner.read().await;
                    inner
                        .teams
                        .iter()
                        .filter(|(_, t)| *t == team)
                        .map(|(a, _)| a.clone())
                        .collect()
                };
                let mut total = 0.0;
                for member in members {
                    total += self.cost_tracker.agent_cost(&member).await;
                }
                total
            }
            BudgetScope::Global => self.cost_tracker.total_cost().await,
        }
    }
}
