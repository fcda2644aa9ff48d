//! Coordinated shutdown with prioritized hooks.
//!
//! Components register named hooks with a priority and a timeout. On
//! shutdown the coordinator fires the root cancellation token, then runs
//! hooks in ascending priority order, each bounded by its own timeout. Hook
//! failures are logged and do not block later hooks. Shutdown is idempotent.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::SwarmResult;
use crate::services::event_bus::{EventBus, EventPayload, SwarmEvent};

type HookFuture = Pin<Box<dyn Future<Output = SwarmResult<()>> + Send>>;
type HookFn = Box<dyn Fn() -> HookFuture + Send + Sync>;

struct ShutdownHook {
    name: String,
    priority: i32,
    timeout: Duration,
    callback: HookFn,
}

/// Coordinates cancellation and teardown across the runtime.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    event_bus: Arc<EventBus>,
    hooks: Mutex<Vec<ShutdownHook>>,
    started: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            token: CancellationToken::new(),
            event_bus,
            hooks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// The root cancellation token. Components derive child tokens from it
    /// so shutdown reaches every blocking point.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Register a named hook. Lower priorities run first.
    pub async fn register_hook<F, Fut>(
        &self,
        name: impl Into<String>,
        priority: i32,
        timeout: Duration,
        callback: F,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SwarmResult<()>> + Send + 'static,
    {
        let mut hooks = self.hooks.lock().await;
        hooks.push(ShutdownHook {
            name: name.into(),
            priority,
            timeout,
            callback: Box::new(move || Box::pin(callback())),
        });
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Run the shutdown sequence. Safe to call more than once; only the
    /// first call runs the hooks.
    pub async fn shutdown(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let started = std::time::Instant::now();
        self.token.cancel();

        let mut hooks = {
            let mut guard = self.hooks.lock().await;
            std::mem::take(&mut *guard)
        };
        hooks.sort_by_key(|hook| hook.priority);

        self.event_bus.publish(SwarmEvent::new(
            "shutdown",
            EventPayload::ShutdownStarted {
                hook_count: hooks.len(),
            },
        ));

        for hook in hooks {
            let hook_started = std::time::Instant::now();
            let outcome = tokio::time::timeout(hook.timeout, (hook.callback)()).await;
            let success = match outcome {
                Ok(Ok(())) => true,
                Ok(Err(error)) => {
                    tracing::warn!(hook = %hook.name, %error, "shutdown hook failed");
                    false
                }
                Err(_) => {
                    tracing::warn!(hook = %hook.name, timeout_ms = hook.timeout.as_millis() as u64, "shutdown hook timed out");
                    false
                }
            };
            self.event_bus.publish(SwarmEvent::new(
                "shutdown",
                EventPayload::ShutdownHookCompleted {
                    name: hook.name,
                    success,
                    duration_ms: hook_started.elapsed().as_millis() as u64,
                },
            ));
        }

        self.event_bus.publish(SwarmEvent::new(
            "shutdown",
            EventPayload::ShutdownCompleted {
                duration_ms: started.elapsed().as_millis() as u64,
            },
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::SwarmError;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_hooks_run_in_priority_order() {
        let bus = Arc::new(EventBus::with_defaults());
        let coordinator = ShutdownCoordinator::new(bus);
        let order = Arc::new(Mutex::new(Vec::new()));

        for (name, priority) in [("last", 20), ("first", 0), ("middle", 10)] {
            let order = order.clone();
            coordinator
                .register_hook(name, priority, Duration::from_secs(1), move || {
                    let order = order.clone();
                    async move {
                        order.lock().await.push(name);
                        Ok(())
                    }
                })
                .await;
        }

        coordinator.shutdown().await;
        assert_eq!(*order.lock().await, vec!["first", "middle", "last"]);
    }

    #[tokio::test]
    async fn test_failed_hook_does_not_block_later_hooks() {
        let bus = Arc::new(EventBus::with_defaults());
        let coordinator = ShutdownCoordinator::new(bus.clone());
        let ran = Arc::new(AtomicBool::new(false));

        coordinator
            .register_hook("failing", 0, Duration::from_secs(1), || async {
                Err(SwarmError::Internal("boom".into()))
            })
            .await;
        {
            let ran = ran.clone();
            coordinator
                .register_hook("after", 1, Duration::from_secs(1), move || {
                    let ran = ran.clone();
                    async move {
                        ran.store(true, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await;
        }

        coordinator.shutdown().await;
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_hung_hook_times_out() {
        let bus = Arc::new(EventBus::with_defaults());
        let coordinator = ShutdownCoordinator::new(bus.clone());
        let mut sub = bus.subscribe_filtered(crate::services::event_bus::EventFilter::topic(
            "shutdown.hook_completed",
        ));

        coordinator
            .register_hook("hung", 0, Duration::from_millis(50), || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        coordinator.shutdown().await;
        let event = sub.try_recv().unwrap();
        match event.payload {
            EventPayload::ShutdownHookCompleted { success, .. } => assert!(!success),
            _ => panic!("unexpected payload"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let bus = Arc::new(EventBus::with_defaults());
        let coordinator = ShutdownCoordinator::new(bus);
        let count = Arc::new(AtomicU32::new(0));
        {
            let count = count.clone();
            coordinator
                .register_hook("once", 0, Duration::from_secs(1), move || {
                    let count = count.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .await;
        }

        coordinator.shutdown().await;
        coordinator.shutdown().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_fires_on_shutdown() {
        let bus = Arc::new(EventBus::with_defaults());
        let coordinator = ShutdownCoordinator::new(bus);
        let token = coordinator.token();
        assert!(!token.is_cancelled());

        coordinator.shutdown().await;
        assert!(token.is_cancelled());
        assert!(coordinator.is_shutting_down());
    }
}
