//! Bounded worker pool shared by every module for blocking work.
//!
//! The scan manager never submits anything here; it only reads the counters to
//! decide whether background work is still outstanding.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use tokio::sync::oneshot;
use tracing::error;

pub struct TaskPool {
    pool: ThreadPool,
    queued: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
}

/// Moves a task from "running" back to nothing, even if it panics.
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TaskPool {
    pub fn new(threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|idx| format!("spyglass-worker-{idx}"))
            .panic_handler(|_| error!("A task in the worker pool panicked"))
            .build()?;
        Ok(Self {
            pool,
            queued: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Fire-and-forget submission.
    pub fn spawn<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let queued = Arc::clone(&self.queued);
        let running = Arc::clone(&self.running);
        queued.fetch_add(1, Ordering::SeqCst);
        self.pool.spawn(move || {
            running.fetch_add(1, Ordering::SeqCst);
            queued.fetch_sub(1, Ordering::SeqCst);
            let _guard = RunningGuard(running);
            task();
        });
    }

    /// Runs `task` on the pool and awaits its result.
    ///
    /// Returns `None` if the task panicked.
    pub async fn run<F, T>(&self, task: F) -> Option<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.spawn(move || {
            let _ = tx.send(task());
        });
        rx.await.ok()
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Submitted tasks that have not completed yet.
    pub fn outstanding(&self) -> usize {
        self.queued() + self.running()
    }
}

impl std::fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPool")
            .field("threads", &self.threads())
            .field("queued", &self.queued())
            .field("running", &self.running())
            .finish()
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[tokio::test]
    async fn run_returns_result_and_counters_settle() {
        let pool = TaskPool::new(2).unwrap();
        let sum = pool.run(|| (1..=10).sum::<u32>()).await;
        assert_eq!(sum, Some(55));
        for _ in 0..500 {
            if pool.outstanding() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn outstanding_counts_blocked_tasks() {
        let pool = TaskPool::new(1).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        pool.spawn(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        });
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        pool.spawn(|| {});

        assert_eq!(pool.running(), 1);
        assert_eq!(pool.queued(), 1);
        assert_eq!(pool.outstanding(), 2);

        release_tx.send(()).unwrap();
        for _ in 0..500 {
            if pool.outstanding() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(pool.outstanding(), 0);
    }
}
