//! Circuit trip and recovery through the selection path.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{manual_runtime, register_agent, ScriptedExecutor};
use hivemind::services::CircuitState;
use hivemind::{
    CorrelationContext, DependencyResolver, ExecutionPlan, PlanPolicy, Subtask, SwarmConfig,
    TaskState,
};

fn single_task_plan(name: &str) -> (ExecutionPlan, uuid::Uuid) {
    let task = Subtask::new(name).with_skill("work");
    let id = task.id;
    let mut resolver = DependencyResolver::new();
    resolver.build_graph(vec![task]).unwrap();
    (resolver.execution_plan().unwrap(), id)
}

fn breaker_config() -> SwarmConfig {
    let mut config = SwarmConfig::default();
    config.breaker.failure_threshold = 3;
    config.breaker.reset_timeout_ms = 500;
    config.breaker.success_threshold = 1;
    config
}

#[tokio::test]
async fn s4_tripped_agent_is_avoided_then_recovers() {
    let executor = Arc::new(ScriptedExecutor::new());
    let (runtime, clock) = manual_runtime(breaker_config(), executor.clone()).await;
    for id in ["a1", "a2", "a3"] {
        register_agent(&runtime, id, &["work"]).await;
    }

    // Trip a2 via direct failure recording.
    for _ in 0..3 {
        runtime.breakers.record_failure("a2", "induced failure").await;
    }
    assert_eq!(runtime.breakers.state("a2").await, Some(CircuitState::Open));

    // The next five dispatches never land on a2.
    for i in 0..5 {
        let (plan, task_id) = single_task_plan(&format!("t{i}"));
        let result = runtime
            .engine
            .submit_plan(plan, PlanPolicy::default(), CorrelationContext::root())
            .await
            .unwrap();
        assert_eq!(result.results[&task_id].state, TaskState::Completed);
    }
    assert!(executor.agents_used().iter().all(|agent| agent != "a2"));

    // After the reset timeout, a2 is admitted again and recloses.
    clock.advance(Duration::from_millis(600));
    for i in 0..6 {
        let (plan, _) = single_task_plan(&format!("r{i}"));
        runtime
            .engine
            .submit_plan(plan, PlanPolicy::default(), CorrelationContext::root())
            .await
            .unwrap();
    }
    assert!(executor.agents_used().iter().any(|agent| agent == "a2"));
    assert_eq!(runtime.breakers.state("a2").await, Some(CircuitState::Closed));

    runtime.shutdown().await;
}

#[tokio::test]
async fn all_circuits_open_fails_the_task() {
    let executor = Arc::new(ScriptedExecutor::new());
    let (runtime, _clock) = manual_runtime(breaker_config(), executor.clone()).await;
    register_agent(&runtime, "a1", &["work"]).await;
    register_agent(&runtime, "a2", &["work"]).await;

    runtime.breakers.force_open("a1").await;
    runtime.breakers.force_open("a2").await;

    let (plan, task_id) = single_task_plan("t");
    let result = runtime
        .engine
        .submit_plan(plan, PlanPolicy::default(), CorrelationContext::root())
        .await
        .unwrap();

    let task_result = &result.results[&task_id];
    assert_eq!(task_result.state, TaskState::Failed);
    assert_eq!(task_result.error.as_ref().unwrap().code, "E_ALL_CIRCUITS_OPEN");
    assert_eq!(executor.calls(), 0);

    runtime.shutdown().await;
}

#[tokio::test]
async fn open_breaker_fails_over_to_next_candidate() {
    let executor = Arc::new(ScriptedExecutor::new());
    let (runtime, _clock) = manual_runtime(breaker_config(), executor.clone()).await;
    register_agent(&runtime, "a1", &["work"]).await;
    register_agent(&runtime, "a2", &["work"]).await;

    runtime.breakers.force_open("a1").await;

    let (plan, task_id) = single_task_plan("t");
    let result = runtime
        .engine
        .submit_plan(plan, PlanPolicy::default(), CorrelationContext::root())
        .await
        .unwrap();

    assert_eq!(result.results[&task_id].state, TaskState::Completed);
    assert_eq!(result.results[&task_id].agent_id.as_deref(), Some("a2"));

    runtime.shutdown().await;
}

#[tokio::test]
async fn engine_failures_feed_the_breaker() {
    let executor = Arc::new(ScriptedExecutor::new());
    let mut config = breaker_config();
    // Disable engine retries so each plan contributes exactly one failure.
    config.engine.retry_attempts = 0;
    let (runtime, _clock) = manual_runtime(config, executor.clone()).await;
    register_agent(&runtime, "a1", &["work"]).await;

    for i in 0..3 {
        let name = format!("t{i}");
        executor.fail_fatal(&name);
        let (plan, _) = single_task_plan(&name);
        runtime
            .engine
            .submit_plan(plan, PlanPolicy::default(), CorrelationContext::root())
            .await
            .unwrap();
    }

    assert_eq!(runtime.breakers.state("a1").await, Some(CircuitState::Open));

    let snapshot = runtime.breakers.snapshot().await;
    let a1 = snapshot.iter().find(|s| s.name == "a1").unwrap();
    assert_eq!(a1.consecutive_failures, 3);
    assert_eq!(a1.opened_count, 1);

    runtime.shutdown().await;
}
