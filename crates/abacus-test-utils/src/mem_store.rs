//! In-memory [`Store`] implementation.
//!
//! Mirrors the semantics of the PostgreSQL store: atomic FIFO lease
//! (creation time ascending, then id ascending), conditional
//! complete/fail transitions that no-op when stale, and unconditional
//! expression overwrites. A single mutex serialises every operation, so
//! two concurrent leases can never hand out the same task.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use abacus_db::models::{Expression, ExpressionStatus, Operator, Task, TaskStatus};
use abacus_db::store::{Store, StoreError};

#[derive(Debug, Default)]
struct Inner {
    next_expression_id: i64,
    next_task_id: i64,
    expressions: BTreeMap<i64, Expression>,
    tasks: BTreeMap<i64, Task>,
}

/// An in-memory store fake for tests.
#[derive(Debug, Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every task, ordered by id. Test-only inspection helper.
    pub fn all_tasks(&self) -> Vec<Task> {
        let inner = self.inner.lock().unwrap();
        inner.tasks.values().cloned().collect()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn create_expression(
        &self,
        user_id: i64,
        expression: &str,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_expression_id += 1;
        let id = inner.next_expression_id;
        let now = Utc::now();
        inner.expressions.insert(
            id,
            Expression {
                id,
                user_id,
                expression: expression.to_owned(),
                status: ExpressionStatus::Pending,
                result: None,
                steps: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn get_expression(&self, id: i64) -> Result<Option<Expression>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.expressions.get(&id).cloned())
    }

    async fn get_expression_for_user(
        &self,
        id: i64,
        user_id: i64,
    ) -> Result<Option<Expression>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .expressions
            .get(&id)
            .filter(|e| e.user_id == user_id)
            .cloned())
    }

    async fn list_expressions(&self, user_id: i64) -> Result<Vec<Expression>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut exprs: Vec<Expression> = inner
            .expressions
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        exprs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(exprs)
    }

    async fn update_expression(
        &self,
        id: i64,
        status: ExpressionStatus,
        result: Option<f64>,
        steps: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(expr) = inner.expressions.get_mut(&id) {
            expr.status = status;
            expr.result = result;
            expr.steps = steps.map(str::to_owned);
            expr.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn create_task(
        &self,
        expression_id: i64,
        operation: Operator,
        arg1: f64,
        arg2: f64,
    ) -> Result<Task, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_task_id += 1;
        let id = inner.next_task_id;
        let now = Utc::now();
        let task = Task {
            id,
            expression_id,
            operation,
            arg1,
            arg2,
            result: None,
            status: TaskStatus::Pending,
            retries: 0,
            created_at: now,
            updated_at: now,
        };
        inner.tasks.insert(id, task.clone());
        Ok(task)
    }

    async fn lease_pending_task(&self) -> Result<Option<Task>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let oldest = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by_key(|t| (t.created_at, t.id))
            .map(|t| t.id);
        let Some(id) = oldest else {
            return Ok(None);
        };
        let task = inner.tasks.get_mut(&id).unwrap();
        task.status = TaskStatus::InProgress;
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn complete_task(&self, id: i64, value: f64) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::InProgress => {
                task.status = TaskStatus::Done;
                task.result = Some(value);
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_task(&self, id: i64) -> Result<Option<i32>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::InProgress => {
                task.status = TaskStatus::Pending;
                task.retries += 1;
                task.updated_at = Utc::now();
                Ok(Some(task.retries))
            }
            _ => Ok(None),
        }
    }

    async fn fail_task_terminal(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Failed;
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_task(&self, id: i64) -> Result<Option<Task>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self, expression_id: i64) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.expression_id == expression_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.created_at, t.id));
        Ok(tasks)
    }

    async fn has_pending_tasks(&self, expression_id: i64) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tasks.values().any(|t| {
            t.expression_id == expression_id
                && matches!(t.status, TaskStatus::Pending | TaskStatus::InProgress)
        }))
    }
}
