//! Ports consumed and exposed by the execution core.
//!
//! The engine calls out through these traits: the opaque worker invocation
//! (`Executor`), time (`Clock`), and runtime control (`RuntimeControl`,
//! implemented by the registry and consumed by the budget enforcer so the
//! two stay decoupled).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::correlation::CorrelationContext;
use super::errors::SwarmResult;
use super::models::Subtask;

/// Context handed to the executor for one dispatch attempt.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Correlation context for this unit of work (child of the plan's).
    pub correlation: CorrelationContext,
    /// Cooperative cancellation token. The executor MUST honor it.
    pub cancellation: CancellationToken,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Outputs of completed upstream dependencies.
    pub upstream: std::collections::HashMap<Uuid, serde_json::Value>,
}

/// Opaque worker invocation. The computation an agent performs is outside
/// the core; the engine only times the call and interprets the result.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute `task` on `agent_id`. Must return promptly when the
    /// cancellation token in `ctx` fires.
    async fn execute(
        &self,
        agent_id: &str,
        task: &Subtask,
        ctx: &ExecutionContext,
    ) -> SwarmResult<serde_json::Value>;

    /// Attempt to cancel an in-flight call. Returns whether a cancellation
    /// was delivered.
    async fn cancel(&self, agent_id: &str, task_id: Uuid) -> bool;
}

/// Time source. All time reads and sleeps in the core go through this so
/// tests can drive virtual time.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for `duration`, returning early when `token` fires.
    async fn sleep(&self, duration: Duration, token: &CancellationToken);
}

/// Wall-clock implementation used in production.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration, token: &CancellationToken) {
        tokio::select! {
            () = tokio::time::sleep(duration) => {}
            () = token.cancelled() => {}
        }
    }
}

/// Virtual clock for tests: `sleep` advances the clock instead of waiting.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now = instant;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }

    async fn sleep(&self, duration: Duration, token: &CancellationToken) {
        if token.is_cancelled() {
            return;
        }
        self.advance(duration);
        // Yield so concurrently-scheduled tasks make progress.
        tokio::task::yield_now().await;
    }
}

/// Downward-only control surface for stopping an agent runtime. The budget
/// enforcer invokes this on auto-stop; the registry implements it.
#[async_trait]
pub trait RuntimeControl: Send + Sync {
    /// Stop the agent's runtime: transition it to `Stopped` and release its
    /// resources.
    async fn stop_runtime(&self, agent_id: &str) -> SwarmResult<()>;
}

/// Shared handle types used throughout the core.
pub type SharedClock = Arc<dyn Clock>;
pub type SharedExecutor = Arc<dyn Executor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_advances_on_sleep() {
        let clock = ManualClock::default();
        let start = clock.now();
        let token = CancellationToken::new();

        clock.sleep(Duration::from_secs(60), &token).await;
        assert_eq!(clock.now() - start, chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_system_clock_sleep_observes_token() {
        let clock = SystemClock;
        let token = CancellationToken::new();
        token.cancel();

        let started = std::time::Instant::now();
        clock.sleep(Duration::from_secs(10), &token).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
