//! Expression lifecycle manager.
//!
//! Glues the parser, planner, and store together: `submit` fans out the
//! initial tasks for a new expression, and `on_task_completed` re-plans
//! after each result until the root of the operator tree has a value.
//! This is the only component that decides when an expression is done.
//!
//! The operator tree is rebuilt from the stored expression text on every
//! pass and never shared between invocations.

use tracing::{debug, error, info, warn};

use abacus_db::models::{ExpressionStatus, Task, TaskStatus};
use abacus_db::store::{Store, StoreError};

use crate::parser;
use crate::planner;

/// Persist and plan a newly submitted expression, returning its id.
///
/// A malformed expression still gets an id: it is recorded in the error
/// state with the parser's message as its diagnostic, visible on the next
/// fetch.
pub async fn submit(store: &dyn Store, user_id: i64, raw: &str) -> Result<i64, StoreError> {
    let id = store.create_expression(user_id, raw).await?;

    let root = match parser::parse(raw) {
        Ok(node) => node,
        Err(e) => {
            warn!(expression_id = id, error = %e, "submitted expression failed to parse");
            let diagnostic = format!("parse error: {e}");
            store
                .update_expression(id, ExpressionStatus::Error, None, Some(&diagnostic))
                .await?;
            return Ok(id);
        }
    };

    let created = match planner::plan(store, id, &root, &[]).await {
        Ok(created) => created,
        Err(e) => {
            // Best-effort: leave a diagnostic behind before surfacing the
            // store failure to the caller.
            let diagnostic = format!("planning failed: {e}");
            let _ = store
                .update_expression(id, ExpressionStatus::Error, None, Some(&diagnostic))
                .await;
            return Err(e);
        }
    };

    if let Some(value) = root.value() {
        // A bare number: no tasks, immediately done with a trivial trace.
        let steps = serde_json::json!([format!("Result: {value}")]).to_string();
        store
            .update_expression(id, ExpressionStatus::Done, Some(value), Some(&steps))
            .await?;
        info!(expression_id = id, value, "expression completed without tasks");
    } else {
        store
            .update_expression(id, ExpressionStatus::InProgress, None, None)
            .await?;
        info!(
            expression_id = id,
            tasks = created.len(),
            "expression planned"
        );
    }

    Ok(id)
}

/// Re-plan an expression after one of its tasks completed.
///
/// Fire-and-forget from the dispatcher's point of view: a missing task or
/// expression is logged and swallowed, never surfaced to the worker.
pub async fn on_task_completed(store: &dyn Store, task_id: i64) -> Result<(), StoreError> {
    let Some(task) = store.get_task(task_id).await? else {
        warn!(task_id, "completed task not found, skipping");
        return Ok(());
    };
    let Some(expression) = store.get_expression(task.expression_id).await? else {
        warn!(
            task_id,
            expression_id = task.expression_id,
            "expression for completed task not found, skipping"
        );
        return Ok(());
    };

    let mut root = match parser::parse(&expression.expression) {
        Ok(node) => node,
        Err(e) => {
            // The text was parseable at submission, so this indicates
            // stored-data corruption.
            error!(
                expression_id = expression.id,
                error = %e,
                "stored expression no longer parses"
            );
            let diagnostic = format!("parse error: {e}");
            store
                .update_expression(
                    expression.id,
                    ExpressionStatus::Error,
                    None,
                    Some(&diagnostic),
                )
                .await?;
            return Ok(());
        }
    };

    let tasks = store.list_tasks(expression.id).await?;
    let done: Vec<Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Done)
        .cloned()
        .collect();

    planner::fill_completed_values(&mut root, &done);
    planner::plan(store, expression.id, &root, &tasks).await?;

    if let Some(value) = root.value() {
        store
            .update_expression(expression.id, ExpressionStatus::Done, Some(value), None)
            .await?;
        info!(expression_id = expression.id, value, "expression done");
    } else {
        store
            .update_expression(expression.id, ExpressionStatus::InProgress, None, None)
            .await?;
        debug!(expression_id = expression.id, "expression still in progress");
    }

    Ok(())
}
