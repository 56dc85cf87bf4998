//! One recurring task: timer loop, overrun gate, timeout and retry

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::metrics;
use crate::utils::retry::{backoff, RetryConfig};

use super::error::{SchedulerError, SchedulerResult};

pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub(crate) type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

// ============================================================================
// Options
// ============================================================================

/// What to do when a tick fires while the previous invocation still runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrunPolicy {
    /// Log and drop this tick
    #[default]
    Skip,
    /// Hold the timer until the previous invocation finishes
    Wait,
    /// Run concurrently; only for idempotent tasks
    Parallel,
}

/// Per-task settings
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub interval: Duration,
    pub on_overrun: OverrunPolicy,
    /// Upper bound of the random delay added to every interval
    pub jitter: Duration,
    pub timeout: Duration,
    /// Retries after a failed invocation, outside the normal cadence
    pub retry: RetryConfig,
    /// Fire once right after start instead of waiting one interval
    pub run_immediately: bool,
}

impl TaskOptions {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            on_overrun: OverrunPolicy::Skip,
            jitter: Duration::ZERO,
            timeout: Duration::from_secs(60),
            retry: RetryConfig::new(0),
            run_immediately: false,
        }
    }

    pub fn on_overrun(mut self, policy: OverrunPolicy) -> Self {
        self.on_overrun = policy;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn run_immediately(mut self, yes: bool) -> Self {
        self.run_immediately = yes;
        self
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.interval.is_zero() {
            return Err(SchedulerError::invalid_options("interval", "must be positive"));
        }
        if self.timeout.is_zero() {
            return Err(SchedulerError::invalid_options("timeout", "must be positive"));
        }
        Ok(())
    }

    fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.interval;
        }
        self.interval + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

// ============================================================================
// Shared state and handle
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct TaskState {
    running: AtomicUsize,
    runs: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
    last_run: Mutex<Option<DateTime<Utc>>>,
    next_run: Mutex<Option<DateTime<Utc>>>,
}

fn read<T: Copy>(slot: &Mutex<T>) -> T {
    *slot.lock().unwrap_or_else(|p| p.into_inner())
}

fn write<T>(slot: &Mutex<T>, value: T) {
    *slot.lock().unwrap_or_else(|p| p.into_inner()) = value;
}

/// Decrements the running count on every exit path
struct RunningGuard(Arc<TaskState>);

impl RunningGuard {
    fn enter(state: &Arc<TaskState>) -> Self {
        state.running.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(state))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Point-in-time view of a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub label: String,
    pub running: bool,
    pub stopped: bool,
    pub runs: u64,
    pub failures: u64,
    pub skipped: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

/// Control surface of a scheduled task; clones refer to the same task
#[derive(Clone)]
pub struct TaskHandle {
    label: String,
    state: Arc<TaskState>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl TaskHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stop the timer. In-flight invocations run to completion.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Whether an invocation is executing right now
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst) > 0
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        read(&self.state.last_run)
    }

    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        if self.is_stopped() {
            return None;
        }
        read(&self.state.next_run)
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            label: self.label.clone(),
            running: self.is_running(),
            stopped: self.is_stopped(),
            runs: self.state.runs.load(Ordering::SeqCst),
            failures: self.state.failures.load(Ordering::SeqCst),
            skipped: self.state.skipped.load(Ordering::SeqCst),
            last_run: self.last_run(),
            next_run: self.next_run(),
        }
    }
}

// ============================================================================
// Timer loop
// ============================================================================

pub(crate) fn spawn(
    label: String,
    options: TaskOptions,
    task: TaskFn,
) -> (TaskHandle, tokio::task::JoinHandle<()>) {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let state = Arc::new(TaskState::default());
    let handle = TaskHandle {
        label: label.clone(),
        state: Arc::clone(&state),
        shutdown: Arc::new(shutdown),
    };

    let join = tokio::spawn(timer_loop(label, options, task, state, shutdown_rx));
    (handle, join)
}

async fn timer_loop(
    label: String,
    options: TaskOptions,
    task: TaskFn,
    state: Arc<TaskState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let gate = Arc::new(Semaphore::new(1));
    let mut first = true;

    tracing::info!(
        task = %label,
        interval_ms = options.interval.as_millis() as u64,
        policy = ?options.on_overrun,
        "Scheduled task started"
    );

    loop {
        let delay = if first && options.run_immediately {
            Duration::ZERO
        } else {
            options.next_delay()
        };
        first = false;

        let delay_chrono = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        write(&state.next_run, Some(Utc::now() + delay_chrono));

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => break,
        }
        if *shutdown_rx.borrow() {
            break;
        }

        let permit = match options.on_overrun {
            OverrunPolicy::Parallel => None,
            OverrunPolicy::Skip => match Arc::clone(&gate).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    state.skipped.fetch_add(1, Ordering::SeqCst);
                    metrics::record_task_run(&label, "skipped");
                    tracing::debug!(task = %label, "Previous run still active, skipping tick");
                    continue;
                }
            },
            OverrunPolicy::Wait => {
                tokio::select! {
                    acquired = Arc::clone(&gate).acquire_owned() => match acquired {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
        };

        tokio::spawn(run_invocation(
            label.clone(),
            options.clone(),
            Arc::clone(&task),
            Arc::clone(&state),
            permit,
        ));
    }

    tracing::info!(task = %label, "Scheduled task stopped");
}

async fn run_invocation(
    label: String,
    options: TaskOptions,
    task: TaskFn,
    state: Arc<TaskState>,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let _running = RunningGuard::enter(&state);
    write(&state.last_run, Some(Utc::now()));
    state.runs.fetch_add(1, Ordering::SeqCst);

    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        match run_attempt(&label, &task, options.timeout).await {
            Ok(()) => {
                metrics::record_task_run(&label, "success");
                tracing::debug!(
                    task = %label,
                    attempt = attempt,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Task run succeeded"
                );
                return;
            }
            Err(e) if attempt < options.retry.max_retries => {
                attempt += 1;
                metrics::record_task_run(&label, "retry");
                tracing::warn!(
                    task = %label,
                    attempt = attempt,
                    max_retries = options.retry.max_retries,
                    error = %e,
                    "Task run failed, retrying"
                );
                backoff(&options.retry, attempt, &label).await;
            }
            Err(e) => {
                state.failures.fetch_add(1, Ordering::SeqCst);
                metrics::record_task_run(&label, e.outcome());
                tracing::error!(
                    task = %label,
                    attempts = attempt + 1,
                    duration_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "Task failed, giving up until next tick"
                );
                return;
            }
        }
    }
}

/// One attempt on its own tokio task, raced against `timeout`. A timed-out
/// attempt keeps running detached; only the wait is abandoned.
async fn run_attempt(label: &str, task: &TaskFn, timeout: Duration) -> Result<(), SchedulerError> {
    let work = AssertUnwindSafe(task()).catch_unwind();
    let handle = tokio::spawn(work);

    match tokio::time::timeout(timeout, handle).await {
        Err(_) => Err(SchedulerError::Timeout {
            label: label.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
        Ok(Err(join_error)) => Err(SchedulerError::Panicked {
            label: label.to_string(),
            message: join_error.to_string(),
        }),
        Ok(Ok(Err(panic))) => Err(SchedulerError::Panicked {
            label: label.to_string(),
            message: panic_message(panic.as_ref()),
        }),
        Ok(Ok(Ok(result))) => result.map_err(|e| SchedulerError::Failed {
            label: label.to_string(),
            reason: format!("{e:#}"),
        }),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
