//! Database query functions for the `users` table.
//!
//! Auth sits outside the scheduling core, so these return `anyhow::Result`
//! rather than going through the [`crate::store::Store`] contract.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::User;

/// Insert a new user. Returns `Ok(None)` when the login is already taken.
pub async fn insert_user(pool: &PgPool, login: &str, password_hash: &str) -> Result<Option<i64>> {
    let result: Result<(i64,), sqlx::Error> = sqlx::query_as(
        "INSERT INTO users (login, password_hash) VALUES ($1, $2) RETURNING id",
    )
    .bind(login)
    .bind(password_hash)
    .fetch_one(pool)
    .await;

    match result {
        Ok((id,)) => Ok(Some(id)),
        Err(e) => {
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    return Ok(None);
                }
            }
            Err(e).context("failed to insert user")
        }
    }
}

/// Fetch a user by login.
pub async fn get_user_by_login(pool: &PgPool, login: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE login = $1")
        .bind(login)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to fetch user {login:?}"))?;

    Ok(user)
}
