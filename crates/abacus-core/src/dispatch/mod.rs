//! Lease-based task dispatch.
//!
//! Workers pull: `fetch_task` atomically leases the oldest pending task
//! (at-most-one worker per task), and `submit_result` records the outcome
//! with conditional transitions so stale or duplicated submissions are
//! acknowledged no-ops. A worker-reported error bounces the task back to
//! pending for retry; an optional retry cap turns the bounce into a
//! terminal failure instead.

use std::env;

use tracing::{info, warn};

use abacus_db::models::ExpressionStatus;
use abacus_db::store::{Store, StoreError};

use crate::latency::OperationTimes;
use crate::rpc::{TaskAssignment, TaskInfo, TaskOutcome};

/// Seconds a worker should wait before polling again when no task is
/// pending.
pub const DEFAULT_RETRY_AFTER_SECONDS: i32 = 5;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Retry hint returned with `NoTask`.
    pub retry_after_seconds: i32,
    /// When set, a task whose retry counter reaches this value on a
    /// worker-reported error is moved to the terminal failed state and its
    /// expression marked error. Unset: errors retry forever.
    pub max_retries: Option<i32>,
}

impl DispatchConfig {
    /// Read the optional retry cap from `ABACUS_TASK_MAX_RETRIES`.
    pub fn from_env() -> Self {
        let max_retries = env::var("ABACUS_TASK_MAX_RETRIES")
            .ok()
            .and_then(|raw| raw.trim().parse::<i32>().ok())
            .filter(|cap| *cap > 0);
        Self {
            retry_after_seconds: DEFAULT_RETRY_AFTER_SECONDS,
            max_retries,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_after_seconds: DEFAULT_RETRY_AFTER_SECONDS,
            max_retries: None,
        }
    }
}

/// Lease the oldest pending task for a worker.
///
/// Returns the assignment with the operator's configured latency attached,
/// or a retry hint when no task is pending. Store failure propagates to
/// the RPC layer, which surfaces it as an internal error for the worker to
/// retry.
pub async fn fetch_task(
    store: &dyn Store,
    times: &OperationTimes,
    config: &DispatchConfig,
    worker_id: &str,
) -> Result<TaskInfo, StoreError> {
    match store.lease_pending_task().await? {
        Some(task) => {
            info!(worker_id, task_id = task.id, operation = %task.operation, "leased task");
            Ok(TaskInfo::Task(TaskAssignment {
                id: task.id,
                arg1: task.arg1,
                arg2: task.arg2,
                operation: task.operation,
                operation_time_ms: times.for_operator(task.operation),
            }))
        }
        None => {
            info!(worker_id, "no pending task");
            Ok(TaskInfo::NoTask {
                retry_after_seconds: config.retry_after_seconds,
            })
        }
    }
}

/// Record a worker-reported outcome for a task.
///
/// Only in-progress tasks transition; anything else is a logged no-op and
/// the submission is still acknowledged (idempotent retry). The caller is
/// expected to fire-and-forget the lifecycle manager's `on_task_completed`
/// after this returns.
pub async fn submit_result(
    store: &dyn Store,
    config: &DispatchConfig,
    task_id: i64,
    worker_id: &str,
    outcome: &TaskOutcome,
) -> Result<(), StoreError> {
    match outcome {
        TaskOutcome::Result(value) => {
            let applied = store.complete_task(task_id, *value).await?;
            if applied {
                info!(worker_id, task_id, value, "task completed");
            } else {
                warn!(worker_id, task_id, "stale result submission ignored");
            }
        }
        TaskOutcome::Error { message } => {
            warn!(worker_id, task_id, error = %message, "worker reported task error");
            match store.fail_task(task_id).await? {
                Some(retries) => {
                    info!(task_id, retries, "task returned to pending for retry");
                    if let Some(cap) = config.max_retries {
                        if retries >= cap {
                            fail_terminally(store, task_id, retries, message).await?;
                        }
                    }
                }
                None => {
                    warn!(worker_id, task_id, "stale error submission ignored");
                }
            }
        }
    }
    Ok(())
}

/// Retry cap exceeded: pending -> failed, and the owning expression is
/// marked error with a diagnostic.
async fn fail_terminally(
    store: &dyn Store,
    task_id: i64,
    retries: i32,
    message: &str,
) -> Result<(), StoreError> {
    if !store.fail_task_terminal(task_id).await? {
        // Another worker leased the bounced task in the meantime; let that
        // attempt run.
        return Ok(());
    }
    warn!(task_id, retries, "retry cap reached, task terminally failed");

    if let Some(task) = store.get_task(task_id).await? {
        let diagnostic = format!("task {task_id} failed after {retries} retries: {message}");
        store
            .update_expression(
                task.expression_id,
                ExpressionStatus::Error,
                None,
                Some(&diagnostic),
            )
            .await?;
    }
    Ok(())
}
