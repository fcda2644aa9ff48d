//! Load-balancing strategies for agent selection.
//!
//! A strategy orders the selector's candidate list down to one agent. All
//! strategies are deterministic: given identical candidates and identical
//! recorded state, they return the same agent. Sample feedback from the
//! engine flows back through `record_sample` and must be visible to
//! subsequent selections.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::models::Agent;

/// Default virtual nodes per agent on the consistent-hash ring.
pub const DEFAULT_RING_REPLICAS: usize = 150;

/// Default rolling-window size for strategy statistics.
pub const DEFAULT_SAMPLE_WINDOW: usize = 100;

/// Context for one selection.
#[derive(Debug, Clone)]
pub struct SelectionContext {
    pub task_id: Uuid,
    /// Sticky-selection key; falls back to the task id when absent.
    pub affinity_key: Option<String>,
}

impl SelectionContext {
    pub fn for_task(task_id: Uuid) -> Self {
        Self {
            task_id,
            affinity_key: None,
        }
    }

    pub fn with_affinity(mut self, key: impl Into<String>) -> Self {
        self.affinity_key = Some(key.into());
        self
    }

    fn hash_key(&self) -> String {
        self.affinity_key
            .clone()
            .unwrap_or_else(|| self.task_id.to_string())
    }
}

/// One dispatch outcome reported back to the strategy.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSample {
    pub duration_ms: u64,
    pub success: bool,
    pub cost: f64,
}

/// Aggregated rolling statistics for one agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentStats {
    pub samples: usize,
    pub failure_rate: f64,
    pub mean_duration_ms: f64,
    pub total_cost: f64,
}

/// Bounded rolling window of samples per agent.
#[derive(Debug, Default)]
struct SampleBook {
    window: usize,
    samples: HashMap<String, VecDeque<DispatchSample>>,
}

impl SampleBook {
    fn new(window: usize) -> Self {
        Self {
            window,
            samples: HashMap::new(),
        }
    }

    fn record(&mut self, agent_id: &str, sample: DispatchSample) {
        let window = self.samples.entry(agent_id.to_string()).or_default();
        window.push_back(sample);
        while window.len() > self.window {
            window.pop_front();
        }
    }

    fn stats_for(&self, agent_id: &str) -> AgentStats {
        let Some(window) = self.samples.get(agent_id) else {
            return AgentStats::default();
        };
        if window.is_empty() {
            return AgentStats::default();
        }
        let failures = window.iter().filter(|s| !s.success).count();
        let total_duration: u64 = window.iter().map(|s| s.duration_ms).sum();
        AgentStats {
            samples: window.len(),
            failure_rate: failures as f64 / window.len() as f64,
            mean_duration_ms: total_duration as f64 / window.len() as f64,
            total_cost: window.iter().map(|s| s.cost).sum(),
        }
    }

    fn all_stats(&self) -> HashMap<String, AgentStats> {
        self.samples
            .keys()
            .map(|id| (id.clone(), self.stats_for(id)))
            .collect()
    }
}

/// Pluggable load-balancing strategy.
pub trait LoadBalancingStrategy: Send + Sync {
    /// Pick one agent from the candidate list. Candidates arrive in a
    /// stable (id-sorted) order. Returns `None` when the list is empty.
    fn select(&self, candidates: &[Agent], ctx: &SelectionContext) -> Option<String>;

    /// Report a dispatch outcome. Must be observed by subsequent `select`
    /// calls.
    fn record_sample(&self, agent_id: &str, sample: DispatchSample);

    /// Rolling statistics per agent.
    fn stats(&self) -> HashMap<String, AgentStats>;

    /// Strategy name, matching its configuration key.
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// round-robin
// ---------------------------------------------------------------------------

/// Cycle candidates in their stable order; O(1) selection.
pub struct RoundRobin {
    index: AtomicUsize,
    book: Mutex<SampleBook>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            index: AtomicUsize::new(0),
            book: Mutex::new(SampleBook::new(DEFAULT_SAMPLE_WINDOW)),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancingStrategy for RoundRobin {
    fn select(&self, candidates: &[Agent], _ctx: &SelectionContext) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.index.fetch_add(1, Ordering::Relaxed);
        let selected = &candidates[index % candidates.len()];
        tracing::debug!(strategy = "round_robin", agent = %selected.id, "selected");
        Some(selected.id.clone())
    }

    fn record_sample(&self, agent_id: &str, sample: DispatchSample) {
        self.book.lock().expect("lock poisoned").record(agent_id, sample);
    }

    fn stats(&self) -> HashMap<String, AgentStats> {
        self.book.lock().expect("lock poisoned").all_stats()
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

// ---------------------------------------------------------------------------
// least-connections
// ---------------------------------------------------------------------------

/// Pick the candidate with the fewest active connections; ties break by the
/// lowest total connections ever seen, then by id.
pub struct LeastConnections {
    totals: Mutex<HashMap<String, u64>>,
    book: Mutex<SampleBook>,
}

impl LeastConnections {
    pub fn new() -> Self {
        Self {
            totals: Mutex::new(HashMap::new()),
            book: Mutex::new(SampleBook::new(DEFAULT_SAMPLE_WINDOW)),
        }
    }
}

impl Default for LeastConnections {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancingStrategy for LeastConnections {
    fn select(&self, candidates: &[Agent], _ctx: &SelectionContext) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let mut totals = self.totals.lock().expect("lock poisoned");
        let selected = candidates
            .iter()
            .min_by(|a, b| {
                let total_a = totals.get(&a.id).copied().unwrap_or(0);
                let total_b = totals.get(&b.id).copied().unwrap_or(0);
                a.in_flight
                    .cmp(&b.in_flight)
                    .then(total_a.cmp(&total_b))
                    .then(a.id.cmp(&b.id))
            })
            .expect("non-empty candidates");

        *totals.entry(selected.id.clone()).or_insert(0) += 1;
        tracing::debug!(strategy = "least_connections", agent = %selected.id, "selected");
        Some(selected.id.clone())
    }

    fn record_sample(&self, agent_id: &str, sample: DispatchSample) {
        self.book.lock().expect("lock poisoned").record(agent_id, sample);
    }

    fn stats(&self) -> HashMap<String, AgentStats> {
        self.book.lock().expect("lock poisoned").all_stats()
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}

// ---------------------------------------------------------------------------
// least-loaded
// ---------------------------------------------------------------------------

/// Ceiling against which rolling mean durations are normalized into a load
/// gauge.
const LOAD_DURATION_CEILING_MS: f64 = 60_000.0;

/// Pick the candidate with the lowest load. The static capability gauge is
/// overridden by a rolling load derived from observed sample durations once
/// samples exist.
pub struct LeastLoaded {
    book: Mutex<SampleBook>,
}

impl LeastLoaded {
    pub fn new() -> Self {
        Self {
            book: Mutex::new(SampleBook::new(DEFAULT_SAMPLE_WINDOW)),
        }
    }

    fn effective_load(&self, agent: &Agent, book: &SampleBook) -> f64 {
        let stats = book.stats_for(&agent.id);
        if stats.samples == 0 {
            agent.capabilities.current_load
        } else {
            (stats.mean_duration_ms / LOAD_DURATION_CEILING_MS).min(1.0)
        }
    }
}

impl Default for LeastLoaded {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancingStrategy for LeastLoaded {
    fn select(&self, candidates: &[Agent], _ctx: &SelectionContext) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let book = self.book.lock().expect("lock poisoned");
        let selected = candidates
            .iter()
            .min_by(|a, b| {
                let load_a = self.effective_load(a, &book);
                let load_b = self.effective_load(b, &book);
                load_a
                    .partial_cmp(&load_b)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.id.cmp(&b.id))
            })
            .expect("non-empty candidates");
        tracing::debug!(strategy = "least_loaded", agent = %selected.id, "selected");
        Some(selected.id.clone())
    }

    fn record_sample(&self, agent_id: &str, sample: DispatchSample) {
        self.book.lock().expect("lock poisoned").record(agent_id, sample);
    }

    fn stats(&self) -> HashMap<String, AgentStats> {
        self.book.lock().expect("lock poisoned").all_stats()
    }

    fn name(&self) -> &'static str {
        "least_loaded"
    }
}

// ---------------------------------------------------------------------------
// weighted
// ---------------------------------------------------------------------------

/// Scoring weights for the weighted strategy. Must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyWeights {
    pub cost: f64,
    pub speed: f64,
    pub reliability: f64,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            cost: 0.3,
            speed: 0.3,
            reliability: 0.4,
        }
    }
}

impl StrategyWeights {
    pub fn validate(&self) -> Result<(), String> {
        let sum = self.cost + self.speed + self.reliability;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(format!("Strategy weights must sum to 1, got {sum}"));
        }
        if self.cost < 0.0 || self.speed < 0.0 || self.reliability < 0.0 {
            return Err("Strategy weights must be non-negative".to_string());
        }
        Ok(())
    }
}

/// Score candidates by weighted cost/speed/reliability; pick the maximum.
pub struct Weighted {
    weights: StrategyWeights,
    book: Mutex<SampleBook>,
}

impl Weighted {
    pub fn new(weights: StrategyWeights) -> Self {
        Self {
            weights,
            book: Mutex::new(SampleBook::new(DEFAULT_SAMPLE_WINDOW)),
        }
    }

    fn score(&self, agent: &Agent) -> f64 {
        let caps = &agent.capabilities;
        let inverse_cost = if caps.cost_per_hour > 0.0 {
            1.0 / caps.cost_per_hour
        } else {
            1.0
        };
        self.weights.cost * inverse_cost
            + self.weights.speed * caps.avg_speed
            + self.weights.reliability * caps.reliability
    }
}

impl Default for Weighted {
    fn default() -> Self {
        Self::new(StrategyWeights::default())
    }
}

impl LoadBalancingStrategy for Weighted {
    fn select(&self, candidates: &[Agent], _ctx: &SelectionContext) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let selected = candidates
            .iter()
            .max_by(|a, b| {
                self.score(a)
                    .partial_cmp(&self.score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    // max_by keeps the later of equal elements; invert the id
                    // order so ties resolve to the ascending id.
                    .then(b.id.cmp(&a.id))
            })
            .expect("non-empty candidates");
        tracing::debug!(strategy = "weighted", agent = %selected.id, "selected");
        Some(selected.id.clone())
    }

    fn record_sample(&self, agent_id: &str, sample: DispatchSample) {
        self.book.lock().expect("lock poisoned").record(agent_id, sample);
    }

    fn stats(&self) -> HashMap<String, AgentStats> {
        self.book.lock().expect("lock poisoned").all_stats()
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}

// ---------------------------------------------------------------------------
// consistent-hash
// ---------------------------------------------------------------------------

fn ring_hash(value: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Hash the selection key onto a ring of virtual nodes; pick the first agent
/// clockwise. Membership changes rehome only the keys owned by the changed
/// agents (≤ 1/N of keys on expectation).
pub struct ConsistentHash {
    replicas: usize,
    ring: Mutex<BTreeMap<u64, String>>,
    members: Mutex<HashSet<String>>,
    book: Mutex<SampleBook>,
}

impl ConsistentHash {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            ring: Mutex::new(BTreeMap::new()),
            members: Mutex::new(HashSet::new()),
            book: Mutex::new(SampleBook::new(DEFAULT_SAMPLE_WINDOW)),
        }
    }

    /// Reconcile the ring with the candidate set: hash in new agents, drop
    /// departed ones. Unchanged agents keep their virtual-node positions.
    fn sync_ring(&self, candidates: &[Agent]) {
        let current: HashSet<String> = candidates.iter().map(|a| a.id.clone()).collect();
        let mut members = self.members.lock().expect("lock poisoned");
        if *members == current {
            return;
        }
        let mut ring = self.ring.lock().expect("lock poisoned");

        for departed in members.difference(&current) {
            for replica in 0..self.replicas {
                ring.remove(&ring_hash(&format!("{departed}:{replica}")));
            }
        }
        for joined in current.difference(&*members) {
            for replica in 0..self.replicas {
                ring.insert(ring_hash(&format!("{joined}:{replica}")), joined.clone());
            }
        }
        *members = current;
    }
}

impl Default for ConsistentHash {
    fn default() -> Self {
        Self::new(DEFAULT_RING_REPLICAS)
    }
}

impl LoadBalancingStrategy for ConsistentHash {
    fn select(&self, candidates: &[Agent], ctx: &SelectionContext) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        self.sync_ring(candidates);

        let key = ring_hash(&ctx.hash_key());
        let ring = self.ring.lock().expect("lock poisoned");
        let selected = ring
            .range(key..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, id)| id.clone());
        if let Some(ref id) = selected {
            tracing::debug!(strategy = "consistent_hash", agent = %id, "selected");
        }
        selected
    }

    fn record_sample(&self, agent_id: &str, sample: DispatchSample) {
        self.book.lock().expect("lock poisoned").record(agent_id, sample);
    }

    fn stats(&self) -> HashMap<String, AgentStats> {
        self.book.lock().expect("lock poisoned").all_stats()
    }

    fn name(&self) -> &'static str {
        "consistent_hash"
    }
}

// ---------------------------------------------------------------------------
// strategy kinds and construction
// ---------------------------------------------------------------------------

/// The built-in strategy variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    RoundRobin,
    LeastConnections,
    LeastLoaded,
    Weighted,
    ConsistentHash,
}

impl Default for StrategyKind {
    fn default() -> Self {
        Self::RoundRobin
    }
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastConnections => "least_connections",
            Self::LeastLoaded => "least_loaded",
            Self::Weighted => "weighted",
            Self::ConsistentHash => "consistent_hash",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "round_robin" => Some(Self::RoundRobin),
            "least_connections" => Some(Self::LeastConnections),
            "least_loaded" => Some(Self::LeastLoaded),
            "weighted" => Some(Self::Weighted),
            "consistent_hash" => Some(Self::ConsistentHash),
            _ => None,
        }
    }
}

/// Instantiate a strategy by kind.
pub fn make_strategy(
    kind: StrategyKind,
    weights: StrategyWeights,
    ring_replicas: usize,
) -> Box<dyn LoadBalancingStrategy> {
    match kind {
        StrategyKind::RoundRobin => Box::new(RoundRobin::new()),
        StrategyKind::LeastConnections => Box::new(LeastConnections::new()),
        StrategyKind::LeastLoaded => Box::new(LeastLoaded::new()),
        StrategyKind::Weighted => Box::new(Weighted::new(weights)),
        StrategyKind::ConsistentHash => Box::new(ConsistentHash::new(ring_replicas)),
    }
}
