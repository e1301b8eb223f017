//! Batch executor for independent tasks with per-task timeouts.
//!
//! A batch runs either sequentially or in parallel on the tokio runtime.
//! Every submitted task appears in the [`BatchResult`], including those that
//! timed out or panicked.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use crate::error::{AppResult, ExecutorError};

/// How a batch is scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One task at a time, in submission order.
    Sequential,
    /// All tasks spawned concurrently, bounded by the executor's parallelism.
    #[default]
    Parallel,
}

/// A unit of work submitted to the executor.
pub struct Task<T> {
    /// Caller-chosen identifier echoed back in the result.
    pub id: String,
    /// Per-task timeout; the executor default applies when `None`.
    pub timeout: Option<Duration>,
    future: BoxFuture<'static, AppResult<T>>,
}

impl<T> Task<T> {
    /// Wrap a future as a task.
    pub fn new<F>(id: impl Into<String>, future: F) -> Self
    where
        F: std::future::Future<Output = AppResult<T>> + Send + 'static,
    {
        Self {
            id: id.into(),
            timeout: None,
            future: future.boxed(),
        }
    }

    /// Override the timeout for this task.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Terminal status of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus<T> {
    Completed { value: T },
    Failed { error: String },
    TimedOut { timeout_ms: u64 },
}

/// Outcome of one task within a batch.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome<T> {
    pub task_id: String,
    #[serde(flatten)]
    pub status: TaskStatus<T>,
    pub duration_ms: u64,
}

impl<T> TaskOutcome<T> {
    /// Whether the task produced a value.
    pub fn is_completed(&self) -> bool {
        matches!(self.status, TaskStatus::Completed { .. })
    }

    /// Whether the task hit its timeout.
    pub fn is_timed_out(&self) -> bool {
        matches!(self.status, TaskStatus::TimedOut { .. })
    }
}

/// Results of a whole batch, in submission order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult<T> {
    pub mode: ExecutionMode,
    pub outcomes: Vec<TaskOutcome<T>>,
    pub elapsed_ms: u64,
}

impl<T> BatchResult<T> {
    /// Count of completed tasks.
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_completed()).count()
    }

    /// Count of timed-out tasks.
    pub fn timed_out(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_timed_out()).count()
    }

    /// Count of failed tasks (errors and panics).
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.completed() - self.timed_out()
    }
}

/// Executes batches of independent tasks.
#[derive(Clone)]
pub struct ConcurrentExecutor {
    permits: Arc<Semaphore>,
    default_timeout: Duration,
    max_parallelism: usize,
}

impl ConcurrentExecutor {
    /// Create an executor from configuration.
    pub fn new(config: &ExecutorConfig) -> Self {
        let max_parallelism = config.max_parallelism.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_parallelism)),
            default_timeout: Duration::from_millis(config.task_timeout_ms),
            max_parallelism,
        }
    }

    /// Maximum number of tasks running at once in parallel mode.
    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    /// Run a batch and await every outcome.
    pub async fn execute_async<T>(&self, tasks: Vec<Task<T>>, mode: ExecutionMode) -> BatchResult<T>
    where
        T: Send + 'static,
    {
        let start = Instant::now();
        let count = tasks.len();
        debug!(tasks = count, mode = ?mode, "Executing batch");

        let outcomes = match mode {
            ExecutionMode::Sequential => {
                let mut outcomes = Vec::with_capacity(count);
                for task in tasks {
                    let timeout = task.timeout.unwrap_or(self.default_timeout);
                    outcomes.push(run_task(task.id, task.future, timeout).await);
                }
                outcomes
            }
            ExecutionMode::Parallel => {
                let handles: Vec<_> = tasks
                    .into_iter()
                    .map(|Task { id, timeout, future }| {
                        let permits = Arc::clone(&self.permits);
                        let timeout = timeout.unwrap_or(self.default_timeout);
                        let task_id = id.clone();
                        let handle = tokio::spawn(async move {
                            // The semaphore is never closed, so acquisition only fails on shutdown.
                            let _permit = permits.acquire_owned().await.ok();
                            run_task(task_id, future, timeout).await
                        });
                        (id, handle)
                    })
                    .collect();

                let (ids, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
                join_all(handles)
                    .await
                    .into_iter()
                    .zip(ids)
                    .map(|(joined, id)| match joined {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!(task_id = %id, error = %e, "Task panicked or was cancelled");
                            TaskOutcome {
                                task_id: id,
                                status: TaskStatus::Failed {
                                    error: format!("task aborted: {}", e),
                                },
                                duration_ms: 0,
                            }
                        }
                    })
                    .collect()
            }
        };

        let result = BatchResult {
            mode,
            outcomes,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            tasks = count,
            mode = ?mode,
            completed = result.completed(),
            timed_out = result.timed_out(),
            failed = result.failed(),
            elapsed_ms = result.elapsed_ms,
            "Batch finished"
        );

        result
    }

    /// Run a batch, blocking the calling thread until it finishes.
    ///
    /// Inside a multi-thread runtime the worker is handed over with
    /// `block_in_place`; outside any runtime a temporary one is built.
    pub fn execute_sync<T>(
        &self,
        tasks: Vec<Task<T>>,
        mode: ExecutionMode,
    ) -> Result<BatchResult<T>, ExecutorError>
    where
        T: Send + 'static,
    {
        match Handle::try_current() {
            Ok(handle) => match handle.runtime_flavor() {
                RuntimeFlavor::MultiThread => Ok(tokio::task::block_in_place(|| {
                    handle.block_on(self.execute_async(tasks, mode))
                })),
                _ => Err(ExecutorError::BlockingInCurrentThreadRuntime),
            },
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(self.max_parallelism.min(8))
                    .enable_all()
                    .build()?;
                Ok(runtime.block_on(self.execute_async(tasks, mode)))
            }
        }
    }
}

async fn run_task<T>(
    id: String,
    future: BoxFuture<'static, AppResult<T>>,
    timeout: Duration,
) -> TaskOutcome<T> {
    let start = Instant::now();
    let guarded = AssertUnwindSafe(future).catch_unwind();
    let status = match tokio::time::timeout(timeout, guarded).await {
        Ok(Ok(Ok(value))) => TaskStatus::Completed { value },
        Ok(Ok(Err(e))) => TaskStatus::Failed {
            error: e.to_string(),
        },
        Ok(Err(payload)) => {
            let message = panic_message(&*payload);
            warn!(task_id = %id, panic = %message, "Task panicked");
            TaskStatus::Failed {
                error: format!("task panicked: {}", message),
            }
        }
        Err(_) => {
            warn!(task_id = %id, timeout_ms = timeout.as_millis() as u64, "Task timed out");
            TaskStatus::TimedOut {
                timeout_ms: timeout.as_millis() as u64,
            }
        }
    };
    TaskOutcome {
        task_id: id,
        status,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn executor() -> ConcurrentExecutor {
        ConcurrentExecutor::new(&ExecutorConfig {
            max_parallelism: 8,
            task_timeout_ms: 1000,
        })
    }

    fn sleeper(id: usize, ms: u64) -> Task<usize> {
        Task::new(format!("task-{}", id), async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(id)
        })
    }

    #[tokio::test]
    async fn test_results_keep_submission_order() {
        let tasks = vec![sleeper(0, 30), sleeper(1, 5), sleeper(2, 15)];
        let result = executor().execute_async(tasks, ExecutionMode::Parallel).await;
        let ids: Vec<_> = result.outcomes.iter().map(|o| o.task_id.as_str()).collect();
        assert_eq!(ids, vec!["task-0", "task-1", "task-2"]);
        assert_eq!(result.completed(), 3);
    }

    #[tokio::test]
    async fn test_timeout_reported_without_cancelling_siblings() {
        let tasks = vec![
            sleeper(0, 10),
            sleeper(1, 500).with_timeout(Duration::from_millis(20)),
            sleeper(2, 10),
        ];
        let result = executor().execute_async(tasks, ExecutionMode::Parallel).await;
        assert_eq!(result.outcomes.len(), 3);
        assert!(result.outcomes[0].is_completed());
        assert!(result.outcomes[1].is_timed_out());
        assert!(result.outcomes[2].is_completed());
        assert_eq!(result.timed_out(), 1);
    }

    #[tokio::test]
    async fn test_failed_task_is_reported() {
        let tasks = vec![
            Task::new("ok", async { Ok(1) }),
            Task::new("bad", async {
                Err(AppError::Internal {
                    message: "boom".to_string(),
                })
            }),
        ];
        let result = executor().execute_async(tasks, ExecutionMode::Sequential).await;
        assert_eq!(result.completed(), 1);
        assert_eq!(result.failed(), 1);
        match &result.outcomes[1].status {
            TaskStatus::Failed { error } => assert!(error.contains("boom")),
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panicking_task_fails_alone() {
        for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
            let tasks = vec![
                sleeper(0, 1),
                Task::new("boom", async {
                    let parsed: Option<usize> = None;
                    Ok(parsed.expect("bad input"))
                }),
                sleeper(2, 1),
            ];
            let result = executor().execute_async(tasks, mode).await;
            assert_eq!(result.outcomes.len(), 3);
            assert_eq!(result.completed(), 2);
            assert_eq!(result.failed(), 1);
            match &result.outcomes[1].status {
                TaskStatus::Failed { error } => assert!(error.contains("bad input"), "{}", error),
                other => panic!("unexpected status {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_parallel_faster_than_sequential() {
        let exec = executor();
        let seq = exec
            .execute_async((0..6).map(|i| sleeper(i, 40)).collect(), ExecutionMode::Sequential)
            .await;
        let par = exec
            .execute_async((0..6).map(|i| sleeper(i, 40)).collect(), ExecutionMode::Parallel)
            .await;
        assert_eq!(seq.completed(), 6);
        assert_eq!(par.completed(), 6);
        assert!(par.elapsed_ms < seq.elapsed_ms, "{} vs {}", par.elapsed_ms, seq.elapsed_ms);
    }

    #[test]
    fn test_execute_sync_outside_runtime() {
        let result = executor()
            .execute_sync(vec![sleeper(0, 5), sleeper(1, 5)], ExecutionMode::Parallel)
            .unwrap();
        assert_eq!(result.completed(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_execute_sync_inside_multi_thread_runtime() {
        let result = executor()
            .execute_sync(vec![sleeper(0, 5)], ExecutionMode::Sequential)
            .unwrap();
        assert_eq!(result.completed(), 1);
    }

    #[tokio::test]
    async fn test_execute_sync_rejects_current_thread_runtime() {
        let result = executor().execute_sync(vec![sleeper(0, 5)], ExecutionMode::Sequential);
        assert!(matches!(
            result,
            Err(ExecutorError::BlockingInCurrentThreadRuntime)
        ));
    }
}
