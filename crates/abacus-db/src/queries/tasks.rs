//! Database query functions for the `tasks` table.

use sqlx::PgPool;

use crate::models::{Operator, Task};
use crate::store::StoreError;

/// Insert a new pending task. Returns the inserted row with
/// server-generated defaults (id, status, retries, timestamps).
pub async fn insert_task(
    pool: &PgPool,
    expression_id: i64,
    operation: Operator,
    arg1: f64,
    arg2: f64,
) -> Result<Task, StoreError> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (expression_id, operation, arg1, arg2) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(expression_id)
    .bind(operation)
    .bind(arg1)
    .bind(arg2)
    .fetch_one(pool)
    .await
    .map_err(StoreError::db("failed to insert task"))?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: i64) -> Result<Option<Task>, StoreError> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::db("failed to fetch task"))?;

    Ok(task)
}

/// List all tasks for an expression, oldest first.
pub async fn list_tasks_for_expression(
    pool: &PgPool,
    expression_id: i64,
) -> Result<Vec<Task>, StoreError> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE expression_id = $1 ORDER BY created_at ASC, id ASC",
    )
    .bind(expression_id)
    .fetch_all(pool)
    .await
    .map_err(StoreError::db("failed to list tasks for expression"))?;

    Ok(tasks)
}

/// Atomically lease the oldest pending task: pending -> in_progress.
///
/// The select-and-mark is a single statement; `FOR UPDATE SKIP LOCKED`
/// keeps concurrent callers from leasing the same row. FIFO order is
/// creation time ascending, then id ascending.
pub async fn lease_pending_task(pool: &PgPool) -> Result<Option<Task>, StoreError> {
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'in_progress', updated_at = now() \
         WHERE id = ( \
             SELECT id FROM tasks \
             WHERE status = 'pending' \
             ORDER BY created_at ASC, id ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING *",
    )
    .fetch_optional(pool)
    .await
    .map_err(StoreError::db("failed to lease pending task"))?;

    Ok(task)
}

/// Conditional in_progress -> done with a result value.
///
/// The WHERE clause keys on `status = 'in_progress'`, so a stale update
/// (task already completed, or bounced back to pending) affects no rows.
/// Returns whether the update applied.
pub async fn complete_task(pool: &PgPool, id: i64, value: f64) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'done', result = $2, updated_at = now() \
         WHERE id = $1 AND status = 'in_progress'",
    )
    .bind(id)
    .bind(value)
    .execute(pool)
    .await
    .map_err(StoreError::db("failed to complete task"))?;

    Ok(result.rows_affected() > 0)
}

/// Conditional in_progress -> pending with `retries += 1`.
///
/// Returns the new retry count, or `None` when the task was not
/// in-progress (stale update, no-op).
pub async fn fail_task(pool: &PgPool, id: i64) -> Result<Option<i32>, StoreError> {
    let retries: Option<(i32,)> = sqlx::query_as(
        "UPDATE tasks \
         SET status = 'pending', retries = retries + 1, updated_at = now() \
         WHERE id = $1 AND status = 'in_progress' \
         RETURNING retries",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::db("failed to fail task"))?;

    Ok(retries.map(|(r,)| r))
}

/// Conditional pending -> failed (terminal). Only reached through the
/// optional retry cap. Returns whether the update applied.
pub async fn fail_task_terminal(pool: &PgPool, id: i64) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'failed', updated_at = now() \
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .execute(pool)
    .await
    .map_err(StoreError::db("failed to mark task terminally failed"))?;

    Ok(result.rows_affected() > 0)
}

/// Whether the expression has any task still pending or in-progress.
pub async fn has_pending_tasks(pool: &PgPool, expression_id: i64) -> Result<bool, StoreError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS( \
             SELECT 1 FROM tasks \
             WHERE expression_id = $1 AND status IN ('pending', 'in_progress') \
         )",
    )
    .bind(expression_id)
    .fetch_one(pool)
    .await
    .map_err(StoreError::db("failed to check pending tasks"))?;

    Ok(exists)
}

/// Requeue tasks stranded in_progress by a crashed worker or orchestrator:
/// in_progress -> pending with `retries += 1`.
///
/// Operator-invoked restart recovery; there is no automatic lease expiry.
/// Returns the tasks that were requeued.
pub async fn reset_orphaned_tasks(pool: &PgPool) -> Result<Vec<Task>, StoreError> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'pending', retries = retries + 1, updated_at = now() \
         WHERE status = 'in_progress' \
         RETURNING *",
    )
    .fetch_all(pool)
    .await
    .map_err(StoreError::db("failed to reset orphaned tasks"))?;

    Ok(tasks)
}
