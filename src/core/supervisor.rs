//! Supervision for the tail and directory tasks.
//!
//! Tasks are independent: a failing task is logged and its siblings keep
//! running. The group can be asked to shut down, which every task observes
//! through its [`ShutdownSignal`], and then joined.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

struct Inner {
    shutdown: watch::Sender<bool>,
    active: watch::Sender<usize>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Decrements the active count even when the task panics.
struct ActiveGuard(Arc<Inner>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[derive(Clone)]
pub struct TaskGroup {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("active", &self.active())
            .field("shutdown_requested", &self.is_shutdown_requested())
            .finish()
    }
}

impl TaskGroup {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        let (active, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                shutdown,
                active,
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Run `task` on the tokio runtime and log how it ended.
    ///
    /// Nothing is spawned once shutdown has been requested.
    pub fn spawn<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        if self.is_shutdown_requested() {
            tracing::debug!("Not starting {} during shutdown", name);
            return;
        }

        self.inner.active.send_modify(|n| *n += 1);
        let guard = ActiveGuard(Arc::clone(&self.inner));

        let handle = tokio::spawn(async move {
            let _guard = guard;
            match task.await {
                Ok(()) => tracing::debug!("Task {} finished", name),
                Err(err) => tracing::error!("Task {} failed: {:#}", name, err),
            }
        });

        let mut handles = self
            .inner
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.inner.shutdown.subscribe(),
        }
    }

    pub fn request_shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Number of tasks that have not finished yet.
    pub fn active(&self) -> usize {
        *self.inner.active.borrow()
    }

    /// Resolves once no task is running.
    pub async fn idle(&self) {
        let mut rx = self.inner.active.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Resolves once shutdown has been requested.
    pub async fn shutdown_requested(&self) {
        self.shutdown_signal().recv().await;
    }

    /// Signal every task to stop and wait for all of them.
    pub async fn shutdown(&self) {
        self.request_shutdown();

        loop {
            let handles = std::mem::take(
                &mut *self
                    .inner
                    .handles
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            );
            if handles.is_empty() {
                break;
            }

            for handle in handles {
                if let Err(err) = handle.await {
                    if err.is_panic() {
                        tracing::error!("Task panicked: {}", err);
                    }
                }
            }
        }
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-task view of the group's shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown is requested or the group is gone. Cancel safe.
    pub async fn recv(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_idle_after_tasks_finish() {
        let group = TaskGroup::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let counter = Arc::clone(&counter);
            group.spawn(format!("task-{i}"), async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        tokio::time::timeout(Duration::from_secs(2), group.idle())
            .await
            .expect("group should become idle");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(group.active(), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_siblings() {
        let group = TaskGroup::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        group.spawn("failing", async { Err::<(), _>(anyhow::anyhow!("boom")) });
        group.spawn("panicking", async {
            let explode = true;
            if explode {
                panic!("boom");
            }
            Ok(())
        });
        group.spawn("healthy", async move {
            tx.send("done").unwrap();
            Ok(())
        });

        assert_eq!(rx.recv().await, Some("done"));
        tokio::time::timeout(Duration::from_secs(2), group.idle())
            .await
            .expect("panicking task still counts as finished");
    }

    #[tokio::test]
    async fn test_shutdown_stops_waiting_tasks() {
        let group = TaskGroup::new();

        for i in 0..4 {
            let mut shutdown = group.shutdown_signal();
            group.spawn(format!("waiter-{i}"), async move {
                shutdown.recv().await;
                Ok(())
            });
        }
        assert_eq!(group.active(), 4);

        tokio::time::timeout(Duration::from_secs(2), group.shutdown())
            .await
            .expect("shutdown should join every task");
        assert_eq!(group.active(), 0);
        assert!(group.shutdown_signal().is_set());

        group.spawn("late", async { Ok(()) });
        assert_eq!(group.active(), 0);
    }
}
