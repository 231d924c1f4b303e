//! The `abacus work` command: a pull-based compute worker.
//!
//! Each worker loop asks the orchestrator for a task, computes the binary
//! operation, pads its response time up to the task's configured latency,
//! and submits the result or the arithmetic error. Ctrl-C cancels every
//! loop via a shared token.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use abacus_core::rpc::{
    FetchTaskRequest, SubmitResultRequest, SubmitResultResponse, TaskAssignment, TaskInfo,
    TaskOutcome,
};
use abacus_core::worker::{compute, remaining_gate};

/// Backoff after a transport failure.
const TRANSPORT_RETRY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Base URL of the orchestrator, e.g. `http://localhost:8080`.
    pub orchestrator_url: String,
    /// Number of concurrent worker loops.
    pub concurrency: usize,
    /// Prefix for worker ids; loop `i` identifies as `<name>-<i>`.
    pub name: String,
}

/// Default worker concurrency: `COMPUTING_POWER` env var, else 1.
pub fn default_concurrency() -> usize {
    std::env::var("COMPUTING_POWER")
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1)
}

pub async fn run_work(options: &WorkerOptions) -> Result<()> {
    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested, stopping workers");
                cancel.cancel();
            }
        });
    }

    tracing::info!(
        orchestrator = %options.orchestrator_url,
        concurrency = options.concurrency,
        "workers starting"
    );

    let mut handles = Vec::with_capacity(options.concurrency);
    for i in 0..options.concurrency {
        let client = client.clone();
        let base = options.orchestrator_url.trim_end_matches('/').to_owned();
        let worker_id = format!("{}-{i}", options.name);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            worker_loop(client, base, worker_id, cancel).await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
    tracing::info!("all workers stopped");
    Ok(())
}

async fn worker_loop(
    client: reqwest::Client,
    base: String,
    worker_id: String,
    cancel: CancellationToken,
) {
    let fetch_url = format!("{base}/internal/v1/task/fetch");
    let result_url = format!("{base}/internal/v1/task/result");

    tracing::info!(%worker_id, "worker loop started");

    while !cancel.is_cancelled() {
        let info = match fetch_task(&client, &fetch_url, &worker_id).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(%worker_id, error = %e, "fetch failed, backing off");
                if sleep_or_cancelled(&cancel, TRANSPORT_RETRY).await {
                    break;
                }
                continue;
            }
        };

        match info {
            TaskInfo::Task(assignment) => {
                process_assignment(&client, &result_url, &worker_id, &assignment, &cancel).await;
            }
            TaskInfo::NoTask {
                retry_after_seconds,
            } => {
                let wait = Duration::from_secs(retry_after_seconds.max(1) as u64);
                tracing::debug!(%worker_id, ?wait, "no task available");
                if sleep_or_cancelled(&cancel, wait).await {
                    break;
                }
            }
        }
    }

    tracing::info!(%worker_id, "worker loop stopped");
}

async fn fetch_task(
    client: &reqwest::Client,
    url: &str,
    worker_id: &str,
) -> Result<TaskInfo> {
    let response = client
        .post(url)
        .json(&FetchTaskRequest {
            worker_id: worker_id.to_owned(),
        })
        .send()
        .await
        .context("fetch request failed")?
        .error_for_status()
        .context("fetch returned an error status")?;

    response.json().await.context("invalid fetch response")
}

async fn process_assignment(
    client: &reqwest::Client,
    result_url: &str,
    worker_id: &str,
    assignment: &TaskAssignment,
    cancel: &CancellationToken,
) {
    tracing::info!(
        worker_id,
        task_id = assignment.id,
        operation = %assignment.operation,
        arg1 = assignment.arg1,
        arg2 = assignment.arg2,
        time_ms = assignment.operation_time_ms,
        "received task"
    );

    let started = Instant::now();
    let outcome = match compute(assignment.operation, assignment.arg1, assignment.arg2) {
        Ok(value) => TaskOutcome::Result(value),
        Err(e) => {
            tracing::warn!(worker_id, task_id = assignment.id, error = %e, "compute failed");
            TaskOutcome::Error {
                message: e.to_string(),
            }
        }
    };

    // Gate the response to the configured operation time.
    if let Some(delay) = remaining_gate(started.elapsed(), assignment.operation_time_ms) {
        // Finish the task even when shutdown was requested mid-gate; the
        // lease would otherwise be stranded.
        tokio::time::sleep(delay).await;
    }

    let request = SubmitResultRequest {
        task_id: assignment.id,
        worker_id: worker_id.to_owned(),
        outcome,
    };

    match submit_result(client, result_url, &request).await {
        Ok(ack) => {
            tracing::info!(
                worker_id,
                task_id = assignment.id,
                acknowledged = ack.acknowledged,
                "result submitted"
            );
        }
        Err(e) => {
            // No result reached the orchestrator; the task stays leased
            // until an operator requeues it.
            tracing::warn!(worker_id, task_id = assignment.id, error = %e, "submit failed");
            let _ = sleep_or_cancelled(cancel, TRANSPORT_RETRY).await;
        }
    }
}

async fn submit_result(
    client: &reqwest::Client,
    url: &str,
    request: &SubmitResultRequest,
) -> Result<SubmitResultResponse> {
    let response = client
        .post(url)
        .json(request)
        .send()
        .await
        .context("submit request failed")?
        .error_for_status()
        .context("submit returned an error status")?;

    response.json().await.context("invalid submit response")
}

/// Sleep for `duration`, returning `true` if cancelled first.
async fn sleep_or_cancelled(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
