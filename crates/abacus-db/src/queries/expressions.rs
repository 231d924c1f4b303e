//! Database query functions for the `expressions` table.

use sqlx::PgPool;

use crate::models::{Expression, ExpressionStatus};
use crate::store::StoreError;

/// Insert a new pending expression, returning its id.
pub async fn insert_expression(
    pool: &PgPool,
    user_id: i64,
    expression: &str,
) -> Result<i64, StoreError> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO expressions (user_id, expression) VALUES ($1, $2) RETURNING id",
    )
    .bind(user_id)
    .bind(expression)
    .fetch_one(pool)
    .await
    .map_err(StoreError::db("failed to insert expression"))?;

    Ok(id)
}

/// Fetch an expression by id, regardless of owner.
pub async fn get_expression(pool: &PgPool, id: i64) -> Result<Option<Expression>, StoreError> {
    let expr = sqlx::query_as::<_, Expression>("SELECT * FROM expressions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::db("failed to fetch expression"))?;

    Ok(expr)
}

/// Fetch an expression by id, enforcing ownership.
pub async fn get_expression_for_user(
    pool: &PgPool,
    id: i64,
    user_id: i64,
) -> Result<Option<Expression>, StoreError> {
    let expr = sqlx::query_as::<_, Expression>(
        "SELECT * FROM expressions WHERE id = $1 AND user_id = $2",
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::db("failed to fetch expression for user"))?;

    Ok(expr)
}

/// List a user's expressions, newest first.
pub async fn list_expressions_for_user(
    pool: &PgPool,
    user_id: i64,
) -> Result<Vec<Expression>, StoreError> {
    let exprs = sqlx::query_as::<_, Expression>(
        "SELECT * FROM expressions WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(StoreError::db("failed to list expressions"))?;

    Ok(exprs)
}

/// List the most recent expressions across all users (operator view).
pub async fn list_recent_expressions(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<Expression>, StoreError> {
    let exprs = sqlx::query_as::<_, Expression>(
        "SELECT * FROM expressions ORDER BY created_at DESC, id DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(StoreError::db("failed to list recent expressions"))?;

    Ok(exprs)
}

/// Unconditionally overwrite an expression's status, result, and steps.
///
/// Status monotonicity (pending -> in_progress -> done | error) is the
/// lifecycle manager's responsibility, not the store's.
pub async fn update_expression(
    pool: &PgPool,
    id: i64,
    status: ExpressionStatus,
    result: Option<f64>,
    steps: Option<&str>,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE expressions \
         SET status = $2, result = $3, steps = $4, updated_at = now() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(status)
    .bind(result)
    .bind(steps)
    .execute(pool)
    .await
    .map_err(StoreError::db("failed to update expression"))?;

    Ok(())
}
