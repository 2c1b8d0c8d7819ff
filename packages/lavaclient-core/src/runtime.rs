//! Task spawning abstraction.
//!
//! Channel receive loops and the dispatcher run as background tasks. They are
//! spawned through [`TaskSpawner`] so the embedding application decides which
//! runtime hosts them.

use std::future::Future;

/// Abstraction for spawning background tasks.
///
/// Spawned tasks are detached: they run until their own cancellation token
/// fires or their work completes.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a background task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-based spawner.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn spawned_task_runs_on_handle() {
        let spawner = TokioSpawner::current();
        let executed = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let flag = Arc::clone(&executed);

        spawner.spawn(async move {
            flag.store(true, Ordering::SeqCst);
            let _ = done_tx.send(());
        });

        done_rx.await.unwrap();
        assert!(executed.load(Ordering::SeqCst));
    }
}
