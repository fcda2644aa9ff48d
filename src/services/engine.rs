//! Level-parallel DAG execution engine.
//!
//! Consumes an `ExecutionPlan` level by level. Within a level, tasks run
//! concurrently under a semaphore bound; across levels, every task starts
//! strictly after the previous level settled. Per task, the engine asks the
//! selector for candidates, gates dispatch through the circuit breaker and
//! the budget enforcer, invokes the external executor with a deadline, and
//! feeds outcome samples back to the strategy, the breaker, and the cost
//! tracker. Cancellation is cooperative at every blocking point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::correlation::CorrelationContext;
use crate::domain::errors::{ErrorKind, SwarmError, SwarmResult};
use crate::domain::models::{
    ExecutionPlan, RetryPolicy, Subtask, TaskError, TaskResult, TaskState,
};
use crate::domain::ports::{ExecutionContext, SharedClock, SharedExecutor};
use crate::services::agent_registry::AgentRegistry;
use crate::services::agent_selector::{AgentSelector, SelectionRequirements};
use crate::services::budget_enforcer::{BudgetEnforcer, Enforcement};
use crate::services::circuit_breaker::{BreakerDecision, CircuitBreakerRegistry};
use crate::services::cost_tracker::CostTracker;
use crate::services::event_bus::{EventBus, EventPayload, SwarmEvent};
use crate::services::load_balancer::DispatchSample;

/// Classifies executor errors as transient (retryable) or fatal.
pub trait RetryClassifier: Send + Sync {
    fn is_transient(&self, error: &SwarmError) -> bool;
}

/// Default classification: the error's own kind, plus network/timeout
/// keyword matching on opaque executor failures.
#[derive(Debug, Default)]
pub struct DefaultRetryClassifier;

const TRANSIENT_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "connection refused",
    "connection reset",
    "network",
    "unavailable",
    "too many requests",
];

impl RetryClassifier for DefaultRetryClassifier {
    fn is_transient(&self, error: &SwarmError) -> bool {
        if error.is_retryable() {
            return true;
        }
        match error {
            SwarmError::ExecutionFailed(message) => {
                let message = message.to_lowercase();
                TRANSIENT_KEYWORDS.iter().any(|kw| message.contains(kw))
            }
            _ => false,
        }
    }
}

/// Engine-wide execution defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Max retries per task when the plan policy does not override.
    pub retry_attempts: u32,
    /// Initial backoff delay.
    pub retry_delay_ms: u64,
    /// Exponential backoff multiplier.
    pub retry_backoff_multiplier: f64,
    /// Whether descendants of failed tasks are attempted anyway.
    pub continue_on_failure: bool,
    /// Cap on in-flight tasks per level; `None` means the level size.
    pub concurrency_limit: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay_ms: 100,
            retry_backoff_multiplier: 2.0,
            continue_on_failure: false,
            concurrency_limit: None,
        }
    }
}

/// Per-plan policy overrides on top of the engine defaults.
#[derive(Debug, Clone, Default)]
pub struct PlanPolicy {
    /// Overrides every task's retry budget when set.
    pub retry: Option<RetryPolicy>,
    /// Overrides `EngineConfig::continue_on_failure` when set.
    pub continue_on_failure: Option<bool>,
    /// Overrides `EngineConfig::concurrency_limit` when set.
    pub concurrency_limit: Option<usize>,
    /// Overrides each task's own deadline when set.
    pub task_timeout: Option<Duration>,
    /// External cancellation token; the engine links its own to it.
    pub cancellation: Option<CancellationToken>,
}

/// Terminal disposition of one plan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Running,
    Completed,
    PartialSuccess,
    Failed,
    Cancelled,
    Aborted,
}

/// Aggregated outcome of one plan execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub plan_id: Uuid,
    pub results: HashMap<Uuid, TaskResult>,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    /// Terminal errors across all failed tasks, in no particular order.
    pub errors: Vec<TaskError>,
}

impl ExecutionResult {
    pub fn total_tasks(&self) -> usize {
        self.results.len()
    }

    pub fn status(&self) -> ExecutionStatus {
        if self.cancelled > 0 {
            ExecutionStatus::Cancelled
        } else if self.failed == 0 && self.skipped == 0 {
            ExecutionStatus::Completed
        } else if self.completed > 0 {
            ExecutionStatus::PartialSuccess
        } else {
            ExecutionStatus::Failed
        }
    }
}

/// Status snapshot for `status(plan_id)`.
#[derive(Debug, Clone)]
pub struct PlanStatusReport {
    pub plan_id: Uuid,
    pub status: ExecutionStatus,
    pub task_states: HashMap<Uuid, TaskState>,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

struct PlanHandle {
    token: CancellationToken,
    status: ExecutionStatus,
    results: Arc<RwLock<HashMap<Uuid, TaskResult>>>,
}

/// The execution engine.
pub struct ExecutionEngine {
    selector: Arc<AgentSelector>,
    registry: Arc<AgentRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    enforcer: Arc<BudgetEnforcer>,
    cost_tracker: Arc<CostTracker>,
    executor: SharedExecutor,
    clock: SharedClock,
    event_bus: Arc<EventBus>,
    classifier: Arc<dyn RetryClassifier>,
    config: EngineConfig,
    plans: RwLock<HashMap<Uuid, PlanHandle>>,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        selector: Arc<AgentSelector>,
        registry: Arc<AgentRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        enforcer: Arc<BudgetEnforcer>,
        cost_tracker: Arc<CostTracker>,
        executor: SharedExecutor,
        clock: SharedClock,
        event_bus: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        Self {
            selector,
            registry,
            breakers,
            enforcer,
            cost_tracker,
            executor,
            clock,
            event_bus,
            classifier: Arc::new(DefaultRetryClassifier),
            config,
            plans: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the transient-vs-fatal classifier.
    pub fn with_retry_classifier(mut self, classifier: Arc<dyn RetryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Execute a plan end to end. Returns once every task reached a
    /// terminal state.
    pub async fn submit_plan(
        self: &Arc<Self>,
        plan: ExecutionPlan,
        policy: PlanPolicy,
        ctx: CorrelationContext,
    ) -> SwarmResult<ExecutionResult> {
        plan.validate().map_err(SwarmError::FatalInput)?;

        let token = match policy.cancellation {
            Some(ref external) => external.child_token(),
            None => CancellationToken::new(),
        };
        let continue_on_failure = policy
            .continue_on_failure
            .unwrap_or(self.config.continue_on_failure);

        let results: Arc<RwLock<HashMap<Uuid, TaskResult>>> = Arc::new(RwLock::new(
            plan.all_task_ids()
                .into_iter()
                .map(|id| (id, TaskResult::pending(id)))
                .collect(),
        ));

        {
            let mut plans = self.plans.write().await;
            plans.insert(
                plan.id,
                PlanHandle {
                    token: token.clone(),
                    status: ExecutionStatus::Running,
                    results: results.clone(),
                },
            );
        }

        let started_at = self.clock.now();
        let started_instant = std::time::Instant::now();

        self.event_bus.publish(
            SwarmEvent::new(
                "engine",
                EventPayload::PlanStarted {
                    plan_id: plan.id,
                    total_tasks: plan.total_tasks(),
                    level_count: plan.levels.len(),
                },
            )
            .with_context(&ctx),
        );

        let mut aborted: Option<String> = None;

        'levels: for level in &plan.levels {
            if token.is_cancelled() {
                break;
            }

            // Partition the level into runnable and skipped tasks based on
            // upstream terminal states.
            let mut runnable: Vec<Subtask> = Vec::new();
            {
                let mut results_guard = results.write().await;
                for task in &level.tasks {
                    match self
                        .skip_cause(task, &results_guard, continue_on_failure)
                    {
                        Some(cause) => {
                            let skipped = TaskResult::skipped(task.id, &cause);
                            results_guard.insert(task.id, skipped);
                            self.event_bus.publish(
                                SwarmEvent::new(
                                    "engine",
                                    EventPayload::TaskSkipped {
                                        task_id: task.id,
                                        reason: cause.to_string(),
                                    },
                                )
                                .with_context(&ctx),
                            );
                        }
                        None => runnable.push(task.clone()),
                    }
                }
            }

            if runnable.is_empty() {
                continue;
            }

            let limit = policy
                .concurrency_limit
                .or(self.config.concurrency_limit)
                .unwrap_or(runnable.len())
                .max(1);
            let semaphore = Arc::new(Semaphore::new(limit));

            let mut handles = Vec::with_capacity(runnable.len());
            for task in runnable {
                let engine = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                let token = token.clone();
                let task_ctx = ctx.child();
                let policy = policy.clone();
                let results = results.clone();

                handles.push(tokio::spawn(async move {
                    let permit = tokio::select! {
                        permit = semaphore.acquire_owned() => permit,
                        () = token.cancelled() => return (task.id, TaskResult::cancelled(task.id)),
                    };
                    let _permit = permit.expect("semaphore closed");

                    if token.is_cancelled() {
                        return (task.id, TaskResult::cancelled(task.id));
                    }

                    let upstream = engine.upstream_outputs(&task, &results).await;
                    let result = engine
                        .run_task(&task, &policy, &task_ctx, &token, upstream)
                        .await;
                    (task.id, result)
                }));
            }

            for handle in handles {
                let Ok((task_id, result)) = handle.await else {
                    aborted = Some("Task worker panicked".to_string());
                    break 'levels;
                };

                let mut results_guard = results.write().await;
                if let Some(existing) = results_guard.get(&task_id) {
                    if existing.state.is_terminal() && existing.state != TaskState::Cancelled {
                        // A task settled twice; state has diverged.
                        aborted = Some(format!("Task {task_id} finished twice"));
                        break 'levels;
                    }
                }
                if result.state == TaskState::Cancelled {
                    self.event_bus.publish(
                        SwarmEvent::new("engine", EventPayload::TaskCancelled { task_id })
                            .with_context(&ctx),
                    );
                }
                let capacity_failure = result.state == TaskState::Failed
                    && result
                        .error
                        .as_ref()
                        .and_then(TaskError::error_kind)
                        .is_some_and(|kind| kind == ErrorKind::Capacity);
                results_guard.insert(task_id, result);
                drop(results_guard);

                // An empty registry cannot make progress on anything; stop
                // scheduling and let the remaining tasks settle as
                // cancelled.
                if capacity_failure && self.registry.is_empty().await {
                    tracing::error!(plan = %plan.id, "registry empty, cancelling remaining tasks");
                    token.cancel();
                }
            }
        }

        let aborted_plan = aborted.is_some();
        if let Some(reason) = aborted {
            token.cancel();
            self.event_bus.publish(
                SwarmEvent::new(
                    "engine",
                    EventPayload::PlanAborted {
                        plan_id: plan.id,
                        reason: reason.clone(),
                    },
                )
                .with_context(&ctx),
            );
            tracing::error!(plan = %plan.id, reason = %reason, "plan aborted on internal invariant");
        }

        // Any task that never reached a terminal state was cut off by
        // cancellation or abort.
        {
            let mut results_guard = results.write().await;
            for (task_id, result) in results_guard.iter_mut() {
                if !result.state.is_terminal() {
                    *result = TaskResult::cancelled(*task_id);
                    self.event_bus.publish(
                        SwarmEvent::new("engine", EventPayload::TaskCancelled { task_id: *task_id })
                            .with_context(&ctx),
                    );
                }
            }
        }

        let completed_at = self.clock.now();
        let duration_ms = started_instant.elapsed().as_millis() as u64;
        let final_results = results.read().await.clone();

        let mut execution = ExecutionResult {
            plan_id: plan.id,
            completed: 0,
            failed: 0,
            skipped: 0,
            cancelled: 0,
            started_at,
            completed_at,
            duration_ms,
            errors: Vec::new(),
            results: final_results,
        };
        for result in execution.results.values() {
            match result.state {
                TaskState::Completed => execution.completed += 1,
                TaskState::Failed => {
                    execution.failed += 1;
                    if let Some(ref error) = result.error {
                        execution.errors.push(error.clone());
                    }
                }
                TaskState::Skipped => execution.skipped += 1,
                TaskState::Cancelled => execution.cancelled += 1,
                TaskState::Pending | TaskState::Running => {}
            }
        }

        let status = if aborted_plan {
            ExecutionStatus::Aborted
        } else {
            execution.status()
        };
        {
            let mut plans = self.plans.write().await;
            if let Some(handle) = plans.get_mut(&plan.id) {
                handle.status = status;
            }
        }

        self.event_bus.publish(
            SwarmEvent::new(
                "engine",
                EventPayload::PlanCompleted {
                    plan_id: plan.id,
                    completed: execution.completed,
                    failed: execution.failed,
                    skipped: execution.skipped,
                    cancelled: execution.cancelled,
                    duration_ms,
                },
            )
            .with_context(&ctx),
        );

        Ok(execution)
    }

    /// Cancel a running plan. Returns `true` on the transition edge: the
    /// first cancel of a live plan. Repeat calls and calls on terminated or
    /// unknown plans return `false`.
    pub async fn cancel(&self, plan_id: Uuid) -> bool {
        let plans = self.plans.read().await;
        let Some(handle) = plans.get(&plan_id) else {
            return false;
        };
        if handle.status != ExecutionStatus::Running || handle.token.is_cancelled() {
            return false;
        }
        handle.token.cancel();
        self.event_bus.publish(SwarmEvent::new(
            "engine",
            EventPayload::PlanCancelled { plan_id },
        ));
        true
    }

    /// Status of a submitted plan.
    pub async fn status(&self, plan_id: Uuid) -> Option<PlanStatusReport> {
        let plans = self.plans.read().await;
        let handle = plans.get(&plan_id)?;
        let results = handle.results.read().await;

        let mut report = PlanStatusReport {
            plan_id,
            status: handle.status,
            task_states: results.iter().map(|(id, r)| (*id, r.state)).collect(),
            completed: 0,
            failed: 0,
            skipped: 0,
            cancelled: 0,
        };
        for state in report.task_states.values() {
            match state {
                TaskState::Completed => report.completed += 1,
                TaskState::Failed => report.failed += 1,
                TaskState::Skipped => report.skipped += 1,
                TaskState::Cancelled => report.cancelled += 1,
                _ => {}
            }
        }
        Some(report)
    }

    /// Why a task must be skipped, if any upstream dependency settled
    /// unsuccessfully. Budget failures always propagate a skip, regardless
    /// of `continue_on_failure`.
    fn skip_cause(
        &self,
        task: &Subtask,
        results: &HashMap<Uuid, TaskResult>,
        continue_on_failure: bool,
    ) -> Option<SwarmError> {
        for dep in &task.dependencies {
            let Some(dep_result) = results.get(dep) else {
                continue;
            };
            match dep_result.state {
                TaskState::Completed => {}
                TaskState::Failed | TaskState::Skipped | TaskState::Cancelled => {
                    let budget_failure = dep_result
                        .error
                        .as_ref()
                        .and_then(TaskError::error_kind)
                        .is_some_and(|kind| kind == ErrorKind::Budget);
                    if budget_failure || !continue_on_failure {
                        return Some(SwarmError::ExecutionFailed(format!(
                            "Dependency {} ended {}",
                            dep,
                            dep_result.state.as_str()
                        )));
                    }
                }
                TaskState::Pending | TaskState::Running => {}
            }
        }
        None
    }

    /// Outputs of completed dependencies, passed to the executor as context.
    async fn upstream_outputs(
        &self,
        task: &Subtask,
        results: &Arc<RwLock<HashMap<Uuid, TaskResult>>>,
    ) -> HashMap<Uuid, serde_json::Value> {
        let results = results.read().await;
        task.dependencies
            .iter()
            .filter_map(|dep| {
                results.get(dep).and_then(|r| {
                    (r.state == TaskState::Completed)
                        .then(|| r.output.clone())
                        .flatten()
                        .map(|output| (*dep, output))
                })
            })
            .collect()
    }

    /// Execute one task with candidate failover, gating, deadline, and
    /// retry. Returns its terminal result.
    async fn run_task(
        &self,
        task: &Subtask,
        policy: &PlanPolicy,
        ctx: &CorrelationContext,
        token: &CancellationToken,
        upstream: HashMap<Uuid, serde_json::Value>,
    ) -> TaskResult {
        let started_at = self.clock.now();
        let started_instant = std::time::Instant::now();

        let retry = policy.retry.clone().unwrap_or_else(|| RetryPolicy {
            max_retries: task.retry.max_retries.min(self.config.retry_attempts),
            initial_delay_ms: task.retry.initial_delay_ms,
            backoff_multiplier: task.retry.backoff_multiplier,
        });
        let timeout = policy.task_timeout.unwrap_or(task.timeout);
        let max_attempts = retry.max_retries + 1;

        let requirements = {
            let mut reqs = SelectionRequirements::new()
                .with_skills(task.required_skills.iter().cloned())
                .with_priority(task.priority);
            if let Some(ref language) = task.language {
                reqs = reqs.with_language(language.clone());
            }
            reqs
        };

        let mut attempts = 0u32;
        let mut last_agent: Option<String> = None;

        loop {
            attempts += 1;

            if token.is_cancelled() {
                return self.cancelled_result(task.id, started_at, started_instant, attempts - 1, last_agent);
            }

            // Candidate selection.
            let candidates = self
                .selector
                .select_candidates(task.id, &requirements)
                .await;
            if candidates.is_empty() {
                let error = SwarmError::NoEligibleAgent {
                    task_id: task.id,
                    required_skills: task.required_skills.iter().cloned().collect(),
                };
                return self.failed_result(task, &error, started_at, started_instant, attempts, last_agent, ctx);
            }

            // Breaker gate: take the first candidate whose circuit admits
            // the call.
            let mut chosen: Option<String> = None;
            for candidate in &candidates {
                match self.breakers.check(&candidate.id).await {
                    BreakerDecision::Allowed | BreakerDecision::Trial => {
                        chosen = Some(candidate.id.clone());
                        break;
                    }
                    BreakerDecision::Rejected { .. } => {}
                }
            }
            let Some(agent_id) = chosen else {
                let error = SwarmError::AllCircuitsOpen { task_id: task.id };
                return self.failed_result(task, &error, started_at, started_instant, attempts, last_agent, ctx);
            };
            last_agent = Some(agent_id.clone());

            // Budget gate. Warnings are emitted by the enforcer itself.
            match self.enforcer.check_enforcement(&agent_id).await {
                Enforcement::Stop { scope } => {
                    let error = SwarmError::BudgetExceeded {
                        agent_id: agent_id.clone(),
                        scope: scope.to_string(),
                    };
                    return self.failed_result(task, &error, started_at, started_instant, attempts, last_agent, ctx);
                }
                Enforcement::Warn { .. } | Enforcement::None => {}
            }

            if self.registry.begin_assignment(&agent_id).await.is_err() {
                // The agent vanished between selection and assignment.
                continue;
            }

            self.event_bus.publish(
                SwarmEvent::new(
                    "engine",
                    EventPayload::TaskStarted {
                        task_id: task.id,
                        task_name: task.name.clone(),
                        agent_id: agent_id.clone(),
                        attempt: attempts,
                    },
                )
                .with_context(ctx),
            );

            let exec_ctx = ExecutionContext {
                correlation: ctx.clone(),
                cancellation: token.clone(),
                attempt: attempts,
                upstream: upstream.clone(),
            };

            let dispatch_started = std::time::Instant::now();
            let outcome = tokio::select! {
                outcome = tokio::time::timeout(
                    timeout,
                    self.executor.execute(&agent_id, task, &exec_ctx),
                ) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(SwarmError::TaskTimeout(timeout.as_secs())),
                },
                () = token.cancelled() => {
                    self.executor.cancel(&agent_id, task.id).await;
                    self.registry.end_assignment(&agent_id).await;
                    return self.cancelled_result(task.id, started_at, started_instant, attempts, last_agent);
                }
            };
            let dispatch_ms = dispatch_started.elapsed().as_millis() as u64;

            self.registry.end_assignment(&agent_id).await;

            match outcome {
                Ok(output) => {
                    if self.registry.is_evicted(&agent_id).await {
                        let error = SwarmError::AgentEvicted(agent_id.clone());
                        self.report_failure_sample(&agent_id, dispatch_ms, &error).await;
                        if attempts < max_attempts {
                            self.emit_retrying(task.id, attempts, max_attempts, &retry, ctx).await;
                            if self.backoff(&retry, attempts, token).await {
                                return self.cancelled_result(task.id, started_at, started_instant, attempts, last_agent);
                            }
                            continue;
                        }
                        return self.failed_result(task, &error, started_at, started_instant, attempts, last_agent, ctx);
                    }

                    self.selector
                        .record_sample(
                            &agent_id,
                            DispatchSample {
                                duration_ms: dispatch_ms,
                                success: true,
                                cost: self.cost_tracker.agent_cost(&agent_id).await,
                            },
                        )
                        .await;
                    self.breakers.record_success(&agent_id).await;
                    self.cost_tracker.check_thresholds_for(&agent_id).await;

                    let duration_ms = started_instant.elapsed().as_millis() as u64;
                    self.event_bus.publish(
                        SwarmEvent::new(
                            "engine",
                            EventPayload::TaskCompleted {
                                task_id: task.id,
                                agent_id: agent_id.clone(),
                                duration_ms,
                                attempts,
                            },
                        )
                        .with_context(ctx),
                    );

                    return TaskResult {
                        task_id: task.id,
                        state: TaskState::Completed,
                        output: Some(output),
                        error: None,
                        started_at: Some(started_at),
                        completed_at: Some(self.clock.now()),
                        duration_ms,
                        attempts,
                        agent_id: Some(agent_id),
                    };
                }
                Err(error) => {
                    if matches!(error, SwarmError::Cancelled) || token.is_cancelled() {
                        return self.cancelled_result(task.id, started_at, started_instant, attempts, last_agent);
                    }

                    self.report_failure_sample(&agent_id, dispatch_ms, &error).await;

                    let transient = self.classifier.is_transient(&error);
                    if transient && attempts < max_attempts {
                        self.emit_retrying(task.id, attempts, max_attempts, &retry, ctx).await;
                        if self.backoff(&retry, attempts, token).await {
                            return self.cancelled_result(task.id, started_at, started_instant, attempts, last_agent);
                        }
                        continue;
                    }

                    return self.failed_result(task, &error, started_at, started_instant, attempts, last_agent, ctx);
                }
            }
        }
    }

    async fn report_failure_sample(&self, agent_id: &str, duration_ms: u64, error: &SwarmError) {
        self.selector
            .record_sample(
                agent_id,
                DispatchSample {
                    duration_ms,
                    success: false,
                    cost: self.cost_tracker.agent_cost(agent_id).await,
                },
            )
            .await;
        self.breakers.record_failure(agent_id, error.to_string()).await;
        self.cost_tracker.check_thresholds_for(agent_id).await;
    }

    async fn emit_retrying(
        &self,
        task_id: Uuid,
        attempt: u32,
        max_attempts: u32,
        retry: &RetryPolicy,
        ctx: &CorrelationContext,
    ) {
        self.event_bus.publish(
            SwarmEvent::new(
                "engine",
                EventPayload::TaskRetrying {
                    task_id,
                    attempt,
                    max_attempts,
                    delay_ms: retry.delay_for_attempt(attempt).as_millis() as u64,
                },
            )
            .with_context(ctx),
        );
    }

    /// Sleep the backoff delay; returns `true` when cancelled mid-sleep.
    async fn backoff(&self, retry: &RetryPolicy, attempt: u32, token: &CancellationToken) -> bool {
        self.clock
            .sleep(retry.delay_for_attempt(attempt), token)
            .await;
        token.is_cancelled()
    }

    fn cancelled_result(
        &self,
        task_id: Uuid,
        started_at: chrono::DateTime<chrono::Utc>,
        started_instant: std::time::Instant,
        attempts: u32,
        agent_id: Option<String>,
    ) -> TaskResult {
        TaskResult {
            task_id,
            state: TaskState::Cancelled,
            output: None,
            error: Some(TaskError::from_swarm_error(&SwarmError::Cancelled)),
            started_at: Some(started_at),
            completed_at: Some(self.clock.now()),
            duration_ms: started_instant.elapsed().as_millis() as u64,
            attempts,
            agent_id,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn failed_result(
        &self,
        task: &Subtask,
        error: &SwarmError,
        started_at: chrono::DateTime<chrono::Utc>,
        started_instant: std::time::Instant,
        attempts: u32,
        agent_id: Option<String>,
        ctx: &CorrelationContext,
    ) -> TaskResult {
        let circuit_open = matches!(
            error,
            SwarmError::CircuitOpen { .. } | SwarmError::AllCircuitsOpen { .. }
        );
        self.event_bus.publish(
            SwarmEvent::new(
                "engine",
                EventPayload::TaskFailed {
                    task_id: task.id,
                    error_kind: error.kind().as_str().to_string(),
                    error_code: error.code().to_string(),
                    message: error.to_string(),
                    agent_id: agent_id.clone(),
                    circuit_open,
                    attempts,
                },
            )
            .with_context(ctx),
        );

        TaskResult {
            task_id: task.id,
            state: TaskState::Failed,
            output: None,
            error: Some(TaskError::from_swarm_error(error)),
            started_at: Some(started_at),
            completed_at: Some(self.clock.now()),
            duration_ms: started_instant.elapsed().as_millis() as u64,
            attempts,
            agent_id,
        }
    }
}
