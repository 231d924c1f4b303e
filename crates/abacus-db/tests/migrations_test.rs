//! Migration smoke tests against a real PostgreSQL instance.

use abacus_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn migrations_create_expected_tables() {
    let (pool, db_name) = create_test_db().await;

    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT tablename::text FROM pg_tables \
         WHERE schemaname = 'public' ORDER BY tablename",
    )
    .fetch_all(&pool)
    .await
    .expect("should list tables");

    let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
    for expected in ["users", "expressions", "tasks"] {
        assert!(
            names.contains(&expected),
            "table {expected} missing, got: {names:?}"
        );
    }

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (pool, db_name) = create_test_db().await;

    // A second run applies nothing and succeeds.
    abacus_db::pool::run_migrations(&pool)
        .await
        .expect("re-running migrations should be a no-op");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn status_check_constraint_rejects_unknown_status() {
    let (pool, db_name) = create_test_db().await;

    let user_id: i64 =
        sqlx::query_scalar("INSERT INTO users (login, password_hash) VALUES ('u', 'h') RETURNING id")
            .fetch_one(&pool)
            .await
            .unwrap();

    let result = sqlx::query(
        "INSERT INTO expressions (user_id, expression, status) VALUES ($1, '1+1', 'bogus')",
    )
    .bind(user_id)
    .execute(&pool)
    .await;
    assert!(result.is_err(), "CHECK constraint should reject bogus status");

    pool.close().await;
    drop_test_db(&db_name).await;
}
