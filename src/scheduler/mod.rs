//! Safe recurring task scheduler
//!
//! Runs named tasks on fixed intervals plus random jitter, each on its own
//! tokio task. Per task:
//!
//! ```text
//!   Idle ──tick──▶ Running ──ok──────────────▶ Idle
//!                     │
//!                     └─fail/timeout/panic──▶ Retrying ──(backoff)──▶ Running
//!                                                 │
//!                                                 └─retries spent──▶ Idle (logged)
//! ```
//!
//! - Overlap is governed by [`OverrunPolicy`] (`skip` by default)
//! - Every attempt is raced against the task timeout; a timed-out attempt is
//!   abandoned, not killed
//! - Panics and errors are logged with task label, duration and error, and
//!   never reach the host process
//!
//! # Example
//!
//! ```ignore
//! let mut scheduler = Scheduler::new();
//! let handle = scheduler.every(
//!     "mention-poller",
//!     TaskOptions::new(Duration::from_secs(60)).with_jitter(Duration::from_secs(5)),
//!     move || { let poller = poller.clone(); async move { poller.poll().await } },
//! )?;
//! ```
//!
//! Dropping every [`TaskHandle`] of a task also stops its timer.

pub mod error;
pub mod task;

use std::future::Future;
use std::sync::Arc;

pub use error::{SchedulerError, SchedulerResult};
pub use task::{OverrunPolicy, TaskHandle, TaskOptions, TaskStatus};

/// Owner of all scheduled tasks in the process
#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<(TaskHandle, tokio::task::JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start running `task` every `options.interval` (plus jitter)
    pub fn every<F, Fut>(
        &mut self,
        label: impl Into<String>,
        options: TaskOptions,
        task: F,
    ) -> SchedulerResult<TaskHandle>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        options.validate()?;

        let task: task::TaskFn = Arc::new(move || Box::pin(task()) as task::TaskFuture);
        let (handle, join) = task::spawn(label.into(), options, task);
        self.tasks.push((handle.clone(), join));
        Ok(handle)
    }

    pub fn handles(&self) -> impl Iterator<Item = &TaskHandle> {
        self.tasks.iter().map(|(h, _)| h)
    }

    pub fn statuses(&self) -> Vec<TaskStatus> {
        self.handles().map(TaskHandle::status).collect()
    }

    pub fn stop_all(&self) {
        for handle in self.handles() {
            handle.stop();
        }
    }

    /// Stop every timer and wait for the timer loops to exit
    pub async fn shutdown(self) {
        self.stop_all();
        for (handle, join) in self.tasks {
            if let Err(e) = join.await {
                tracing::warn!(task = handle.label(), error = %e, "Timer loop ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::utils::retry::RetryConfig;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_never_overlaps() {
        let mut scheduler = Scheduler::new();
        let active = counter();
        let max_active = counter();
        let invocations = counter();

        let (a, m, n) = (active.clone(), max_active.clone(), invocations.clone());
        let handle = scheduler
            .every("slow", TaskOptions::new(Duration::from_millis(100)), move || {
                let (a, m, n) = (a.clone(), m.clone(), n.clone());
                async move {
                    n.fetch_add(1, Ordering::SeqCst);
                    let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                    m.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    a.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        handle.stop();

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        let runs = invocations.load(Ordering::SeqCst);
        assert!(runs >= 1 && runs <= 1_000 / 100 + 1, "runs = {runs}");
        assert!(handle.status().skipped > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_allows_overlap() {
        let mut scheduler = Scheduler::new();
        let active = counter();
        let max_active = counter();

        let (a, m) = (active.clone(), max_active.clone());
        let _handle = scheduler
            .every(
                "parallel",
                TaskOptions::new(Duration::from_millis(100)).on_overrun(OverrunPolicy::Parallel),
                move || {
                    let (a, m) = (a.clone(), m.clone());
                    async move {
                        let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                        m.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(350)).await;
                        a.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(max_active.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_runs_back_to_back() {
        let mut scheduler = Scheduler::new();
        let active = counter();
        let max_active = counter();
        let invocations = counter();

        let (a, m, n) = (active.clone(), max_active.clone(), invocations.clone());
        let handle = scheduler
            .every(
                "waiting",
                TaskOptions::new(Duration::from_millis(100)).on_overrun(OverrunPolicy::Wait),
                move || {
                    let (a, m, n) = (a.clone(), m.clone(), n.clone());
                    async move {
                        n.fetch_add(1, Ordering::SeqCst);
                        let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                        m.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(250)).await;
                        a.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        handle.stop();

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(invocations.load(Ordering::SeqCst) >= 3);
        assert_eq!(handle.status().skipped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_run_is_retried() {
        let mut scheduler = Scheduler::new();
        let attempts = counter();

        let a = attempts.clone();
        let handle = scheduler
            .every(
                "flaky",
                TaskOptions::new(Duration::from_secs(3_600))
                    .run_immediately(true)
                    .with_retry(RetryConfig::with_delays(3, 100, 1_000)),
                move || {
                    let a = a.clone();
                    async move {
                        if a.fetch_add(1, Ordering::SeqCst) < 2 {
                            anyhow::bail!("not yet");
                        }
                        Ok(())
                    }
                },
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(handle.status().failures, 0);
        assert!(handle.last_run().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let mut scheduler = Scheduler::new();
        let attempts = counter();

        let a = attempts.clone();
        let handle = scheduler
            .every(
                "hanging",
                TaskOptions::new(Duration::from_secs(3_600))
                    .run_immediately(true)
                    .with_timeout(Duration::from_millis(200))
                    .with_retry(RetryConfig::with_delays(2, 100, 1_000)),
                move || {
                    let a = a.clone();
                    async move {
                        a.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(())
                    }
                },
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(handle.status().failures, 1);
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_isolated() {
        let mut scheduler = Scheduler::new();
        let invocations = counter();

        let n = invocations.clone();
        let handle = scheduler
            .every(
                "panicky",
                TaskOptions::new(Duration::from_millis(100)),
                move || {
                    let n = n.clone();
                    async move {
                        n.fetch_add(1, Ordering::SeqCst);
                        panic!("task exploded");
                    }
                },
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(550)).await;
        assert!(invocations.load(Ordering::SeqCst) >= 3);
        assert!(handle.status().failures >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_timer() {
        let mut scheduler = Scheduler::new();
        let invocations = counter();

        let n = invocations.clone();
        let handle = scheduler
            .every("stoppable", TaskOptions::new(Duration::from_millis(100)), move || {
                let n = n.clone();
                async move {
                    n.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(handle.next_run().is_some());
        handle.stop();
        let seen = invocations.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(invocations.load(Ordering::SeqCst), seen);
        assert!(handle.next_run().is_none());
        scheduler.shutdown().await;
    }

    #[test]
    fn test_every_rejects_zero_interval() {
        // Validation happens before anything is spawned
        let mut scheduler = Scheduler::new();
        let result = scheduler.every("bad", TaskOptions::new(Duration::ZERO), || async { Ok(()) });
        assert!(matches!(result, Err(SchedulerError::InvalidOptions { .. })));
        assert_eq!(scheduler.statuses().len(), 0);
    }
}
