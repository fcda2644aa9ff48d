//! EventBus service for unified event streaming and distribution.
//!
//! Every operation that changes observable state publishes a typed event
//! here. Delivery is broadcast-based and non-blocking: each subscriber has a
//! bounded queue and slow subscribers lose the oldest events (the drop count
//! is surfaced on the receiver). Optional sinks receive a synchronous
//! fan-out of every event and must not block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::correlation::CorrelationContext;

/// Version stamped on every event's metadata. Consumers must ignore unknown
/// payload fields so newer producers stay compatible.
pub const EVENT_SCHEMA_VERSION: u32 = 1;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing sequence number assigned by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

/// Event severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Event category, the first segment of the topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Plan,
    Task,
    Agent,
    Breaker,
    Budget,
    Cost,
    Runtime,
    Shutdown,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Plan => "plan",
            Self::Task => "task",
            Self::Agent => "agent",
            Self::Breaker => "breaker",
            Self::Budget => "budget",
            Self::Cost => "cost",
            Self::Runtime => "runtime",
            Self::Shutdown => "shutdown",
        };
        write!(f, "{s}")
    }
}

/// Typed event payloads, one variant per topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    // Plan lifecycle
    PlanStarted {
        plan_id: Uuid,
        total_tasks: usize,
        level_count: usize,
    },
    PlanCompleted {
        plan_id: Uuid,
        completed: usize,
        failed: usize,
        skipped: usize,
        cancelled: usize,
        duration_ms: u64,
    },
    PlanCancelled {
        plan_id: Uuid,
    },
    PlanAborted {
        plan_id: Uuid,
        reason: String,
    },

    // Task lifecycle
    TaskStarted {
        task_id: Uuid,
        task_name: String,
        agent_id: String,
        attempt: u32,
    },
    TaskCompleted {
        task_id: Uuid,
        agent_id: String,
        duration_ms: u64,
        attempts: u32,
    },
    TaskFailed {
        task_id: Uuid,
        error_kind: String,
        error_code: String,
        message: String,
        agent_id: Option<String>,
        circuit_open: bool,
        attempts: u32,
    },
    TaskSkipped {
        task_id: Uuid,
        reason: String,
    },
    TaskRetrying {
        task_id: Uuid,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    },
    TaskCancelled {
        task_id: Uuid,
    },

    // Agent pool
    AgentRegistered {
        agent_id: String,
        skills: Vec<String>,
    },
    AgentUnregistered {
        agent_id: String,
        forced: bool,
    },
    AgentStateChanged {
        agent_id: String,
        from: String,
        to: String,
    },

    // Circuit breakers
    BreakerStateChanged {
        name: String,
        from: String,
        to: String,
    },

    // Budgets
    BudgetWarning {
        scope: String,
        current_spend: f64,
        limit: f64,
    },
    BudgetExceeded {
        scope: String,
        current_spend: f64,
        limit: f64,
    },

    // Cost tracking
    CostThresholdWarning {
        agent_id: String,
        cost: f64,
        threshold: f64,
    },
    CostThresholdExceeded {
        agent_id: String,
        cost: f64,
        threshold: f64,
    },
    CostSessionClosed {
        session_id: Uuid,
        agent_id: String,
        cost: f64,
    },

    // Runtime control
    RuntimeStopped {
        agent_id: String,
        scope: String,
    },

    // Shutdown
    ShutdownStarted {
        hook_count: usize,
    },
    ShutdownHookCompleted {
        name: String,
        success: bool,
        duration_ms: u64,
    },
    ShutdownCompleted {
        duration_ms: u64,
    },
}

impl EventPayload {
    /// The event's topic string, e.g. `task.started`.
    pub fn topic(&self) -> &'static str {
        match self {
            Self::PlanStarted { .. } => "plan.started",
            Self::PlanCompleted { .. } => "plan.completed",
            Self::PlanCancelled { .. } => "plan.cancelled",
            Self::PlanAborted { .. } => "plan.aborted",
            Self::TaskStarted { .. } => "task.started",
            Self::TaskCompleted { .. } => "task.completed",
            Self::TaskFailed { .. } => "task.failed",
            Self::TaskSkipped { .. } => "task.skipped",
            Self::TaskRetrying { .. } => "task.retrying",
            Self::TaskCancelled { .. } => "task.cancelled",
            Self::AgentRegistered { .. } => "agent.registered",
            Self::AgentUnregistered { .. } => "agent.unregistered",
            Self::AgentStateChanged { .. } => "agent.state_changed",
            Self::BreakerStateChanged { .. } => "breaker.state_changed",
            Self::BudgetWarning { .. } => "budget.warning",
            Self::BudgetExceeded { .. } => "budget.exceeded",
            Self::CostThresholdWarning { .. } => "cost.threshold_warning",
            Self::CostThresholdExceeded { .. } => "cost.threshold_exceeded",
            Self::CostSessionClosed { .. } => "cost.session_closed",
            Self::RuntimeStopped { .. } => "runtime.stopped",
            Self::ShutdownStarted { .. } => "shutdown.started",
            Self::ShutdownHookCompleted { .. } => "shutdown.hook_completed",
            Self::ShutdownCompleted { .. } => "shutdown.completed",
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            Self::PlanStarted { .. }
            | Self::PlanCompleted { .. }
            | Self::PlanCancelled { .. }
            | Self::PlanAborted { .. } => EventCategory::Plan,
            Self::TaskStarted { .. }
            | Self::TaskCompleted { .. }
            | Self::TaskFailed { .. }
            | Self::TaskSkipped { .. }
            | Self::TaskRetrying { .. }
            | Self::TaskCancelled { .. } => EventCategory::Task,
            Self::AgentRegistered { .. }
            | Self::AgentUnregistered { .. }
            | Self::AgentStateChanged { .. } => EventCategory::Agent,
            Self::BreakerStateChanged { .. } => EventCategory::Breaker,
            Self::BudgetWarning { .. } | Self::BudgetExceeded { .. } => EventCategory::Budget,
            Self::CostThresholdWarning { .. }
            | Self::CostThresholdExceeded { .. }
            | Self::CostSessionClosed { .. } => EventCategory::Cost,
            Self::RuntimeStopped { .. } => EventCategory::Runtime,
            Self::ShutdownStarted { .. }
            | Self::ShutdownHookCompleted { .. }
            | Self::ShutdownCompleted { .. } => EventCategory::Shutdown,
        }
    }

    /// Default severity for this payload.
    pub fn severity(&self) -> EventSeverity {
        match self {
            Self::TaskFailed { .. } | Self::PlanAborted { .. } => EventSeverity::Error,
            Self::TaskRetrying { .. }
            | Self::TaskSkipped { .. }
            | Self::BudgetWarning { .. }
            | Self::CostThresholdWarning { .. }
            | Self::BreakerStateChanged { .. } => EventSeverity::Warning,
            Self::BudgetExceeded { .. } | Self::CostThresholdExceeded { .. } => {
                EventSeverity::Warning
            }
            _ => EventSeverity::Info,
        }
    }
}

/// Versioned event metadata, carrying the correlation tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u32,
    pub correlation_id: Option<Uuid>,
    pub trace_id: Option<Uuid>,
    pub span_id: Option<Uuid>,
    pub parent_span_id: Option<Uuid>,
}

impl EventMeta {
    pub fn empty() -> Self {
        Self {
            version: EVENT_SCHEMA_VERSION,
            correlation_id: None,
            trace_id: None,
            span_id: None,
            parent_span_id: None,
        }
    }

    pub fn from_context(ctx: &CorrelationContext) -> Self {
        Self {
            version: EVENT_SCHEMA_VERSION,
            correlation_id: Some(ctx.correlation_id),
            trace_id: Some(ctx.trace_id),
            span_id: Some(ctx.span_id),
            parent_span_id: ctx.parent_span_id,
        }
    }
}

/// Immutable event record published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmEvent {
    pub id: EventId,
    /// Assigned by the bus on publish.
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    /// Component that produced the event.
    pub source: String,
    pub meta: EventMeta,
    pub payload: EventPayload,
}

impl SwarmEvent {
    /// Build an event with defaults; sequence is assigned on publish.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            sequence: SequenceNumber(0),
            timestamp: Utc::now(),
            severity: payload.severity(),
            source: source.into(),
            meta: EventMeta::empty(),
            payload,
        }
    }

    pub fn with_context(mut self, ctx: &CorrelationContext) -> Self {
        self.meta = EventMeta::from_context(ctx);
        self
    }

    pub fn with_severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn topic(&self) -> &'static str {
        self.payload.topic()
    }

    pub fn category(&self) -> EventCategory {
        self.payload.category()
    }
}

/// A sink receiving a synchronous fan-out of every published event.
/// Implementations MUST NOT block and MAY drop.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &SwarmEvent);
}

/// Subscription filter. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub categories: Option<HashSet<EventCategory>>,
    pub topics: Option<HashSet<&'static str>>,
    pub min_severity: Option<EventSeverity>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn category(category: EventCategory) -> Self {
        Self {
            categories: Some(HashSet::from([category])),
            ..Self::default()
        }
    }

    pub fn topic(topic: &'static str) -> Self {
        Self {
            topics: Some(HashSet::from([topic])),
            ..Self::default()
        }
    }

    pub fn with_min_severity(mut self, severity: EventSeverity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn matches(&self, event: &SwarmEvent) -> bool {
        if let Some(ref categories) = self.categories {
            if !categories.contains(&event.category()) {
                return false;
            }
        }
        if let Some(ref topics) = self.topics {
            if !topics.contains(event.topic()) {
                return false;
            }
        }
        if let Some(min) = self.min_severity {
            if event.severity < min {
                return false;
            }
        }
        true
    }
}

/// Receiver side of a filtered subscription. Slow consumers lose the oldest
/// events; `dropped()` reports how many.
pub struct EventSubscription {
    receiver: broadcast::Receiver<SwarmEvent>,
    filter: EventFilter,
    dropped: u64,
}

impl EventSubscription {
    /// Receive the next matching event, skipping non-matching ones.
    /// Returns `None` when the bus is gone.
    pub async fn recv(&mut self) -> Option<SwarmEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped += n;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive of the next matching event.
    pub fn try_recv(&mut self) -> Option<SwarmEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.dropped += n;
                }
                Err(_) => return None,
            }
        }
    }

    /// Events lost to overflow on this subscription.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Per-subscriber queue capacity; overflow drops the oldest events.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Central event bus broadcasting to subscribers and sinks.
pub struct EventBus {
    sender: broadcast::Sender<SwarmEvent>,
    sequence: AtomicU64,
    sinks: std::sync::RwLock<Vec<Arc<dyn EventSink>>>,
    published: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
            sinks: std::sync::RwLock::new(Vec::new()),
            published: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EventBusConfig::default())
    }

    /// Attach a durable or observing sink. Sinks see every event after
    /// sequence assignment.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().expect("sink lock poisoned").push(sink);
    }

    /// Publish an event: assign its sequence, fan out to sinks, broadcast to
    /// subscribers. Never blocks; events to slow subscribers are dropped
    /// oldest-first by the channel.
    pub fn publish(&self, mut event: SwarmEvent) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        event.sequence = SequenceNumber(seq);
        self.published.fetch_add(1, Ordering::Relaxed);

        {
            let sinks = self.sinks.read().expect("sink lock poisoned");
            for sink in sinks.iter() {
                sink.publish(&event);
            }
        }

        // Send errors only mean there are no subscribers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events.
    pub fn subscribe(&self) -> EventSubscription {
        self.subscribe_filtered(EventFilter::all())
    }

    /// Subscribe with a filter.
    pub fn subscribe_filtered(&self, filter: EventFilter) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            filter,
            dropped: 0,
        }
    }

    /// Next sequence number to be assigned.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    /// Total events published on this bus.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_started(plan_id: Uuid) -> SwarmEvent {
        SwarmEvent::new(
            "engine",
            EventPayload::PlanStarted {
                plan_id,
                total_tasks: 4,
                level_count: 3,
            },
        )
    }

    #[tokio::test]
    async fn test_sequence_assignment() {
        let bus = EventBus::with_defaults();
        let mut sub = bus.subscribe();

        bus.publish(plan_started(Uuid::new_v4()));
        bus.publish(plan_started(Uuid::new_v4()));

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.sequence.0, 0);
        assert_eq!(second.sequence.0, 1);
        assert_eq!(bus.current_sequence().0, 2);
    }

    #[tokio::test]
    async fn test_filtered_subscription() {
        let bus = EventBus::with_defaults();
        let mut sub = bus.subscribe_filtered(EventFilter::category(EventCategory::Task));

        bus.publish(plan_started(Uuid::new_v4()));
        let task_id = Uuid::new_v4();
        bus.publish(SwarmEvent::new(
            "engine",
            EventPayload::TaskCancelled { task_id },
        ));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.category(), EventCategory::Task);
        assert_eq!(event.topic(), "task.cancelled");
    }

    #[tokio::test]
    async fn test_topic_filter() {
        let bus = EventBus::with_defaults();
        let mut sub = bus.subscribe_filtered(EventFilter::topic("task.retrying"));

        bus.publish(SwarmEvent::new(
            "engine",
            EventPayload::TaskCancelled { task_id: Uuid::new_v4() },
        ));
        bus.publish(SwarmEvent::new(
            "engine",
            EventPayload::TaskRetrying {
                task_id: Uuid::new_v4(),
                attempt: 1,
                max_attempts: 3,
                delay_ms: 100,
            },
        ));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.topic(), "task.retrying");
    }

    #[tokio::test]
    async fn test_drop_oldest_on_overflow() {
        let bus = EventBus::new(EventBusConfig { channel_capacity: 4 });
        let mut sub = bus.subscribe();

        for _ in 0..10 {
            bus.publish(plan_started(Uuid::new_v4()));
        }

        // The oldest events were dropped; the newest four remain.
        let first = sub.recv().await.unwrap();
        assert!(first.sequence.0 >= 6);
        assert!(sub.dropped() > 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_block() {
        let bus = EventBus::with_defaults();
        bus.publish(plan_started(Uuid::new_v4()));
        assert_eq!(bus.published_count(), 1);
    }

    #[test]
    fn test_sink_receives_events() {
        struct CountingSink(AtomicU64);
        impl EventSink for CountingSink {
            fn publish(&self, _event: &SwarmEvent) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let bus = EventBus::with_defaults();
        let sink = Arc::new(CountingSink(AtomicU64::new(0)));
        bus.add_sink(sink.clone());

        bus.publish(plan_started(Uuid::new_v4()));
        bus.publish(plan_started(Uuid::new_v4()));
        assert_eq!(sink.0.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_correlation_metadata_carried() {
        let ctx = CorrelationContext::root();
        let event = plan_started(Uuid::new_v4()).with_context(&ctx);
        assert_eq!(event.meta.trace_id, Some(ctx.trace_id));
        assert_eq!(event.meta.span_id, Some(ctx.span_id));
        assert_eq!(event.meta.version, EVENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_payload_forward_compat_ignores_unknown_fields() {
        let json = r#"{"type":"TaskCancelled","data":{"task_id":"6f01a1a0-5f3a-4f26-9f8e-25e65ae5f3a1","extra_field":42}}"#;
        let payload: EventPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.topic(), "task.cancelled");
    }
}
