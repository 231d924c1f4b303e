//! The Task Store contract.
//!
//! The orchestrator core (planner, dispatcher, lifecycle manager) only ever
//! talks to storage through the [`Store`] trait, so it can be driven against
//! an in-memory fake in tests. [`PgStore`] is the production implementation,
//! delegating to the query functions in [`crate::queries`].

use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::{Expression, ExpressionStatus, Operator, Task};
use crate::queries::{expressions, tasks};

/// Error returned by store operations on I/O failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{context}: {source}")]
    Database {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl StoreError {
    /// Build a mapper attaching a fixed context string to an `sqlx::Error`.
    pub(crate) fn db(context: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Database { context, source }
    }
}

/// Persistence operations the orchestrator core depends on.
///
/// Semantics the implementations must honour:
///
/// - `lease_pending_task` is atomic: select the oldest pending task
///   (creation time ascending, then id ascending) and mark it in-progress
///   in one step. Two concurrent calls never lease the same task.
/// - `complete_task` and `fail_task` are conditional on the task being
///   in-progress; a stale update is a no-op, not an error.
/// - `update_expression` is an unconditional overwrite of status, result,
///   and steps.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a pending expression, returning its id.
    async fn create_expression(&self, user_id: i64, expression: &str)
    -> Result<i64, StoreError>;

    /// Fetch an expression regardless of owner.
    async fn get_expression(&self, id: i64) -> Result<Option<Expression>, StoreError>;

    /// Fetch an expression, enforcing ownership.
    async fn get_expression_for_user(
        &self,
        id: i64,
        user_id: i64,
    ) -> Result<Option<Expression>, StoreError>;

    /// List a user's expressions, newest first.
    async fn list_expressions(&self, user_id: i64) -> Result<Vec<Expression>, StoreError>;

    /// Overwrite an expression's status, result, and steps.
    async fn update_expression(
        &self,
        id: i64,
        status: ExpressionStatus,
        result: Option<f64>,
        steps: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Insert a pending task with fully materialised operands.
    async fn create_task(
        &self,
        expression_id: i64,
        operation: Operator,
        arg1: f64,
        arg2: f64,
    ) -> Result<Task, StoreError>;

    /// Atomically lease the oldest pending task, or `None` when idle.
    async fn lease_pending_task(&self) -> Result<Option<Task>, StoreError>;

    /// Conditional in-progress -> done with a result value.
    ///
    /// Returns `false` when the task was not in-progress (stale update).
    async fn complete_task(&self, id: i64, value: f64) -> Result<bool, StoreError>;

    /// Conditional in-progress -> pending with `retries += 1`.
    ///
    /// Returns the new retry count, or `None` when the task was not
    /// in-progress (stale update).
    async fn fail_task(&self, id: i64) -> Result<Option<i32>, StoreError>;

    /// Conditional pending -> failed (terminal). Used only by the optional
    /// retry cap. Returns `false` when the task was not pending.
    async fn fail_task_terminal(&self, id: i64) -> Result<bool, StoreError>;

    /// Fetch a task by id.
    async fn get_task(&self, id: i64) -> Result<Option<Task>, StoreError>;

    /// List all tasks for an expression, oldest first.
    async fn list_tasks(&self, expression_id: i64) -> Result<Vec<Task>, StoreError>;

    /// Whether the expression has any pending or in-progress task.
    async fn has_pending_tasks(&self, expression_id: i64) -> Result<bool, StoreError>;
}

/// PostgreSQL-backed [`Store`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_expression(
        &self,
        user_id: i64,
        expression: &str,
    ) -> Result<i64, StoreError> {
        expressions::insert_expression(&self.pool, user_id, expression).await
    }

    async fn get_expression(&self, id: i64) -> Result<Option<Expression>, StoreError> {
        expressions::get_expression(&self.pool, id).await
    }

    async fn get_expression_for_user(
        &self,
        id: i64,
        user_id: i64,
    ) -> Result<Option<Expression>, StoreError> {
        expressions::get_expression_for_user(&self.pool, id, user_id).await
    }

    async fn list_expressions(&self, user_id: i64) -> Result<Vec<Expression>, StoreError> {
        expressions::list_expressions_for_user(&self.pool, user_id).await
    }

    async fn update_expression(
        &self,
        id: i64,
        status: ExpressionStatus,
        result: Option<f64>,
        steps: Option<&str>,
    ) -> Result<(), StoreError> {
        expressions::update_expression(&self.pool, id, status, result, steps).await
    }

    async fn create_task(
        &self,
        expression_id: i64,
        operation: Operator,
        arg1: f64,
        arg2: f64,
    ) -> Result<Task, StoreError> {
        tasks::insert_task(&self.pool, expression_id, operation, arg1, arg2).await
    }

    async fn lease_pending_task(&self) -> Result<Option<Task>, StoreError> {
        tasks::lease_pending_task(&self.pool).await
    }

    async fn complete_task(&self, id: i64, value: f64) -> Result<bool, StoreError> {
        tasks::complete_task(&self.pool, id, value).await
    }

    async fn fail_task(&self, id: i64) -> Result<Option<i32>, StoreError> {
        tasks::fail_task(&self.pool, id).await
    }

    async fn fail_task_terminal(&self, id: i64) -> Result<bool, StoreError> {
        tasks::fail_task_terminal(&self.pool, id).await
    }

    async fn get_task(&self, id: i64) -> Result<Option<Task>, StoreError> {
        tasks::get_task(&self.pool, id).await
    }

    async fn list_tasks(&self, expression_id: i64) -> Result<Vec<Task>, StoreError> {
        tasks::list_tasks_for_expression(&self.pool, expression_id).await
    }

    async fn has_pending_tasks(&self, expression_id: i64) -> Result<bool, StoreError> {
        tasks::has_pending_tasks(&self.pool, expression_id).await
    }
}
