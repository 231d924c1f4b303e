//! Wire types for the worker RPC.
//!
//! Request/response messages exchanged between pulling workers and the
//! dispatcher, as externally-tagged JSON unions: a fetch response is
//! either `{"task": {...}}` or `{"no_task": {...}}`, and a submitted
//! outcome is either `{"result": ...}` or `{"error": {"message": ...}}`.

use serde::{Deserialize, Serialize};

use abacus_db::models::Operator;

/// Worker request for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchTaskRequest {
    pub worker_id: String,
}

/// Dispatcher response to a fetch: a leased task, or a retry hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskInfo {
    Task(TaskAssignment),
    NoTask { retry_after_seconds: i32 },
}

/// A leased task plus the configured latency for its operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub id: i64,
    pub arg1: f64,
    pub arg2: f64,
    pub operation: Operator,
    pub operation_time_ms: i32,
}

/// The outcome a worker reports for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Result(f64),
    Error { message: String },
}

/// Worker submission of a task outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResultRequest {
    pub task_id: i64,
    pub worker_id: String,
    pub outcome: TaskOutcome,
}

/// Dispatcher acknowledgement of a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResultResponse {
    pub acknowledged: bool,
}
