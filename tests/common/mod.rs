//! Shared test fixtures: a scripted executor and runtime builders.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use hivemind::domain::ports::{ExecutionContext, Executor};
use hivemind::{
    Agent, AgentCapabilities, ManualClock, Subtask, SwarmConfig, SwarmError, SwarmResult,
    SwarmRuntime,
};

/// Install a tracing subscriber writing into the test capture buffer.
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Executor with scripted outcomes per task name.
#[derive(Default)]
pub struct ScriptedExecutor {
    /// Real delay per invocation, observing cancellation.
    pub delay: Option<Duration>,
    /// Remaining transient failures per task name.
    transient_failures: Mutex<HashMap<String, u32>>,
    /// Task names that always fail fatally.
    fatal: Mutex<HashSet<String>>,
    calls: AtomicU32,
    /// Task names in dispatch order.
    dispatch_order: Mutex<Vec<String>>,
    /// Agent ids in dispatch order.
    agents_used: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Script `count` transient failures before success for `task_name`.
    pub fn fail_transient(&self, task_name: &str, count: u32) {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(task_name.to_string(), count);
    }

    /// Script a permanent fatal failure for `task_name`.
    pub fn fail_fatal(&self, task_name: &str) {
        self.fatal.lock().unwrap().insert(task_name.to_string());
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn dispatch_order(&self) -> Vec<String> {
        self.dispatch_order.lock().unwrap().clone()
    }

    pub fn agents_used(&self) -> Vec<String> {
        self.agents_used.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(
        &self,
        agent_id: &str,
        task: &Subtask,
        ctx: &ExecutionContext,
    ) -> SwarmResult<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.dispatch_order.lock().unwrap().push(task.name.clone());
        self.agents_used.lock().unwrap().push(agent_id.to_string());

        if let Some(delay) = self.delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = ctx.cancellation.cancelled() => return Err(SwarmError::Cancelled),
            }
        }

        if self.fatal.lock().unwrap().contains(&task.name) {
            return Err(SwarmError::ExecutionFailed(format!(
                "scripted fatal failure for {}",
                task.name
            )));
        }

        let mut transient = self.transient_failures.lock().unwrap();
        if let Some(remaining) = transient.get_mut(&task.name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SwarmError::TransientNetwork(format!(
                    "scripted connection reset for {}",
                    task.name
                )));
            }
        }
        drop(transient);

        Ok(serde_json::json!({ "task": task.name, "agent": agent_id }))
    }

    async fn cancel(&self, _agent_id: &str, _task_id: Uuid) -> bool {
        true
    }
}

/// Runtime on a manual clock (instant retry backoff, virtual cost time).
pub async fn manual_runtime(
    config: SwarmConfig,
    executor: Arc<ScriptedExecutor>,
) -> (SwarmRuntime, Arc<ManualClock>) {
    init_tracing();
    let clock = Arc::new(ManualClock::default());
    let runtime = SwarmRuntime::with_clock(config, executor, clock.clone()).await;
    (runtime, clock)
}

/// Runtime on the system clock (for real-delay cancellation tests).
pub async fn system_runtime(config: SwarmConfig, executor: Arc<ScriptedExecutor>) -> SwarmRuntime {
    init_tracing();
    SwarmRuntime::new(config, executor).await
}

/// Register an idle agent with the given skills.
pub async fn register_agent(runtime: &SwarmRuntime, id: &str, skills: &[&str]) {
    let agent = Agent::new(
        id,
        AgentCapabilities::new().with_skills(skills.iter().copied()),
    );
    runtime.registry.register(agent).await.unwrap();
}
