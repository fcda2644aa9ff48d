//! Cost sessions and rate tables.
//!
//! A cost session covers one span of agent runtime. Cost is a function of
//! elapsed runtime (hourly rate per runtime kind) plus token usage (per-model
//! rates per thousand tokens).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Kind of runtime an agent executes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeKind {
    E2b,
    Kata,
    Worktree,
    Native,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E2b => "e2b",
            Self::Kata => "kata",
            Self::Worktree => "worktree",
            Self::Native => "native",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "e2b" => Some(Self::E2b),
            "kata" => Some(Self::Kata),
            "worktree" => Some(Self::Worktree),
            "native" => Some(Self::Native),
            _ => None,
        }
    }
}

/// Token counts accumulated by a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
}

impl TokenUsage {
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self { prompt, completion }
    }

    pub fn total(&self) -> u64 {
        self.prompt + self.completion
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
    }
}

/// Per-model token pricing in USD per thousand tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenRate {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

/// Rate table mapping runtime kinds to hourly cost and model names to token
/// rates. Model lookup matches by substring so version-suffixed names resolve
/// to their alias entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateTable {
    /// USD per hour of runtime, by kind.
    pub hourly: HashMap<RuntimeKind, f64>,
    /// USD per thousand tokens, by model name or alias.
    pub token_rates: HashMap<String, TokenRate>,
}

impl Default for RateTable {
    fn default() -> Self {
        let mut hourly = HashMap::new();
        hourly.insert(RuntimeKind::E2b, 0.35);
        hourly.insert(RuntimeKind::Kata, 0.20);
        hourly.insert(RuntimeKind::Worktree, 0.05);
        hourly.insert(RuntimeKind::Native, 0.0);

        let mut token_rates = HashMap::new();
        token_rates.insert(
            "opus".to_string(),
            TokenRate { prompt_per_1k: 0.015, completion_per_1k: 0.075 },
        );
        token_rates.insert(
            "sonnet".to_string(),
            TokenRate { prompt_per_1k: 0.003, completion_per_1k: 0.015 },
        );
        token_rates.insert(
            "haiku".to_string(),
            TokenRate { prompt_per_1k: 0.0008, completion_per_1k: 0.004 },
        );

        Self { hourly, token_rates }
    }
}

impl RateTable {
    pub fn hourly_rate(&self, kind: RuntimeKind) -> f64 {
        self.hourly.get(&kind).copied().unwrap_or(0.0)
    }

    /// Look up token pricing by model name. Matches known aliases as
    /// substrings, so "claude-sonnet-4-5-20250929" resolves via "sonnet".
    pub fn token_rate(&self, model: &str) -> Option<TokenRate> {
        let model_lower = model.to_lowercase();
        if let Some(rate) = self.token_rates.get(&model_lower) {
            return Some(*rate);
        }
        self.token_rates
            .iter()
            .find(|(name, _)| model_lower.contains(name.as_str()))
            .map(|(_, rate)| *rate)
    }

    /// Token cost: `prompt/1000 · prompt_rate + completion/1000 · completion_rate`.
    pub fn token_cost(&self, model: &str, tokens: TokenUsage) -> f64 {
        match self.token_rate(model) {
            Some(rate) => {
                tokens.prompt as f64 / 1000.0 * rate.prompt_per_1k
                    + tokens.completion as f64 / 1000.0 * rate.completion_per_1k
            }
            None => 0.0,
        }
    }
}

/// One span of agent runtime being metered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostSession {
    pub id: Uuid,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    /// When the session closed; `None` while open. Always ≥ `started_at`.
    pub ended_at: Option<DateTime<Utc>>,
    pub runtime: RuntimeKind,
    pub tokens: TokenUsage,
    /// Model identifier for token pricing, when the session is token-based.
    pub model: Option<String>,
}

impl CostSession {
    pub fn start(agent_id: impl Into<String>, runtime: RuntimeKind, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            started_at: now,
            ended_at: None,
            runtime,
            tokens: TokenUsage::default(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Close the session. The end time is clamped so it never precedes the
    /// start time.
    pub fn close(&mut self, now: DateTime<Utc>) {
        self.ended_at = Some(now.max(self.started_at));
    }

    pub fn record_tokens(&mut self, usage: TokenUsage) {
        self.tokens.add(usage);
    }

    /// Elapsed runtime as of `now` (or the end time once closed).
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        let end = self.ended_at.unwrap_or(now).max(self.started_at);
        end - self.started_at
    }

    /// Total cost as of `now`: runtime hours at the hourly rate plus token
    /// cost for the session's model.
    pub fn cost(&self, rates: &RateTable, now: DateTime<Utc>) -> f64 {
        let hours = self.elapsed(now).num_milliseconds() as f64 / 3_600_000.0;
        let runtime_cost = hours * rates.hourly_rate(self.runtime);
        let token_cost = self
            .model
            .as_deref()
            .map_or(0.0, |m| rates.token_cost(m, self.tokens));
        runtime_cost + token_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_token_rate_alias_match() {
        let rates = RateTable::default();
        let rate = rates.token_rate("claude-sonnet-4-5-20250929").unwrap();
        assert!((rate.prompt_per_1k - 0.003).abs() < f64::EPSILON);
        assert!(rates.token_rate("unknown-model").is_none());
    }

    #[test]
    fn test_token_cost_formula() {
        let rates = RateTable::default();
        // 2000 prompt + 1000 completion on sonnet:
        // 2 * 0.003 + 1 * 0.015 = 0.021
        let cost = rates.token_cost("sonnet", TokenUsage::new(2000, 1000));
        assert!((cost - 0.021).abs() < 1e-9);
    }

    #[test]
    fn test_session_runtime_cost() {
        let rates = RateTable::default();
        let start = Utc::now();
        let session = CostSession::start("a1", RuntimeKind::E2b, start);

        // One hour at $0.35/h
        let cost = session.cost(&rates, start + Duration::hours(1));
        assert!((cost - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_closed_session_stops_accruing() {
        let rates = RateTable::default();
        let start = Utc::now();
        let mut session = CostSession::start("a1", RuntimeKind::E2b, start);
        session.close(start + Duration::hours(1));

        let cost_at_close = session.cost(&rates, start + Duration::hours(1));
        let cost_later = session.cost(&rates, start + Duration::hours(5));
        assert!((cost_at_close - cost_later).abs() < 1e-9);
    }

    #[test]
    fn test_end_never_precedes_start() {
        let start = Utc::now();
        let mut session = CostSession::start("a1", RuntimeKind::Native, start);
        session.close(start - Duration::hours(1));
        assert_eq!(session.ended_at, Some(start));
    }

    #[test]
    fn test_combined_runtime_and_token_cost() {
        let rates = RateTable::default();
        let start = Utc::now();
        let mut session = CostSession::start("a1", RuntimeKind::Worktree, start).with_model("haiku");
        session.record_tokens(TokenUsage::new(10_000, 5_000));

        // 1h * 0.05 + 10 * 0.0008 + 5 * 0.004 = 0.05 + 0.008 + 0.02 = 0.078
        let cost = session.cost(&rates, start + Duration::hours(1));
        assert!((cost - 0.078).abs() < 1e-9);
    }
}
