//! Task lease lifecycle against a real PostgreSQL instance: FIFO order,
//! atomicity under concurrency, and the conditional complete/fail
//! transitions.

use abacus_db::models::{Operator, TaskStatus};
use abacus_db::queries::{expressions, tasks, users};
use abacus_test_utils::{create_test_db, drop_test_db};
use sqlx::PgPool;

async fn seed_expression(pool: &PgPool, text: &str) -> i64 {
    let uid = users::insert_user(pool, "worker-tests", "h")
        .await
        .unwrap()
        .expect("login is unique per test database");
    expressions::insert_expression(pool, uid, text).await.unwrap()
}

#[tokio::test]
async fn lease_complete_lifecycle() {
    let (pool, db_name) = create_test_db().await;
    let expr_id = seed_expression(&pool, "2*3").await;

    let created = tasks::insert_task(&pool, expr_id, Operator::Mul, 2.0, 3.0)
        .await
        .unwrap();
    assert_eq!(created.status, TaskStatus::Pending);
    assert_eq!(created.retries, 0);

    let leased = tasks::lease_pending_task(&pool)
        .await
        .unwrap()
        .expect("a pending task should be leased");
    assert_eq!(leased.id, created.id);
    assert_eq!(leased.status, TaskStatus::InProgress);

    let applied = tasks::complete_task(&pool, leased.id, 6.0).await.unwrap();
    assert!(applied);

    let done = tasks::get_task(&pool, leased.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Done);
    assert_eq!(done.result, Some(6.0));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn lease_is_fifo_by_creation_then_id() {
    let (pool, db_name) = create_test_db().await;
    let expr_id = seed_expression(&pool, "1+2+3").await;

    let first = tasks::insert_task(&pool, expr_id, Operator::Add, 1.0, 2.0)
        .await
        .unwrap();
    let second = tasks::insert_task(&pool, expr_id, Operator::Add, 3.0, 4.0)
        .await
        .unwrap();

    let a = tasks::lease_pending_task(&pool).await.unwrap().unwrap();
    let b = tasks::lease_pending_task(&pool).await.unwrap().unwrap();
    assert_eq!(a.id, first.id);
    assert_eq!(b.id, second.id);

    assert!(tasks::lease_pending_task(&pool).await.unwrap().is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn concurrent_leases_never_hand_out_the_same_task() {
    let (pool, db_name) = create_test_db().await;
    let expr_id = seed_expression(&pool, "2+3").await;
    tasks::insert_task(&pool, expr_id, Operator::Add, 2.0, 3.0)
        .await
        .unwrap();

    // One pending task, many concurrent fetches: exactly one wins.
    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            tasks::lease_pending_task(&pool).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one worker may hold the lease");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn complete_is_conditional_on_in_progress() {
    let (pool, db_name) = create_test_db().await;
    let expr_id = seed_expression(&pool, "2+3").await;
    let task = tasks::insert_task(&pool, expr_id, Operator::Add, 2.0, 3.0)
        .await
        .unwrap();

    // Pending -> done directly is rejected.
    let applied = tasks::complete_task(&pool, task.id, 5.0).await.unwrap();
    assert!(!applied);

    tasks::lease_pending_task(&pool).await.unwrap().unwrap();
    assert!(tasks::complete_task(&pool, task.id, 5.0).await.unwrap());

    // A duplicate completion is a no-op.
    assert!(!tasks::complete_task(&pool, task.id, 99.0).await.unwrap());
    let done = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(done.result, Some(5.0));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn fail_bounces_to_pending_and_counts_retries() {
    let (pool, db_name) = create_test_db().await;
    let expr_id = seed_expression(&pool, "4/0").await;
    let task = tasks::insert_task(&pool, expr_id, Operator::Div, 4.0, 0.0)
        .await
        .unwrap();

    // Not leased yet: fail is a no-op.
    assert_eq!(tasks::fail_task(&pool, task.id).await.unwrap(), None);

    tasks::lease_pending_task(&pool).await.unwrap().unwrap();
    assert_eq!(tasks::fail_task(&pool, task.id).await.unwrap(), Some(1));

    // Bounced task is leasable again; retries keep climbing.
    tasks::lease_pending_task(&pool).await.unwrap().unwrap();
    assert_eq!(tasks::fail_task(&pool, task.id).await.unwrap(), Some(2));

    let bounced = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(bounced.status, TaskStatus::Pending);
    assert_eq!(bounced.retries, 2);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn terminal_fail_requires_pending() {
    let (pool, db_name) = create_test_db().await;
    let expr_id = seed_expression(&pool, "4/0").await;
    let task = tasks::insert_task(&pool, expr_id, Operator::Div, 4.0, 0.0)
        .await
        .unwrap();

    assert!(tasks::fail_task_terminal(&pool, task.id).await.unwrap());
    let failed = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);

    // Terminal state sticks.
    assert!(!tasks::fail_task_terminal(&pool, task.id).await.unwrap());
    assert!(tasks::lease_pending_task(&pool).await.unwrap().is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn has_pending_tasks_tracks_open_work() {
    let (pool, db_name) = create_test_db().await;
    let expr_id = seed_expression(&pool, "2+3").await;

    assert!(!tasks::has_pending_tasks(&pool, expr_id).await.unwrap());

    let task = tasks::insert_task(&pool, expr_id, Operator::Add, 2.0, 3.0)
        .await
        .unwrap();
    assert!(tasks::has_pending_tasks(&pool, expr_id).await.unwrap());

    // Leased (in-progress) still counts as open work.
    tasks::lease_pending_task(&pool).await.unwrap().unwrap();
    assert!(tasks::has_pending_tasks(&pool, expr_id).await.unwrap());

    tasks::complete_task(&pool, task.id, 5.0).await.unwrap();
    assert!(!tasks::has_pending_tasks(&pool, expr_id).await.unwrap());

    assert!(!tasks::has_pending_tasks(&pool, 9999).await.unwrap());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reset_orphaned_tasks_requeues_stranded_leases() {
    let (pool, db_name) = create_test_db().await;
    let expr_id = seed_expression(&pool, "2+3").await;

    let stranded = tasks::insert_task(&pool, expr_id, Operator::Add, 2.0, 3.0)
        .await
        .unwrap();
    let untouched = tasks::insert_task(&pool, expr_id, Operator::Mul, 3.0, 4.0)
        .await
        .unwrap();

    // Lease the first, then pretend the worker crashed.
    tasks::lease_pending_task(&pool).await.unwrap().unwrap();

    let reset = tasks::reset_orphaned_tasks(&pool).await.unwrap();
    assert_eq!(reset.len(), 1);
    assert_eq!(reset[0].id, stranded.id);
    assert_eq!(reset[0].status, TaskStatus::Pending);
    assert_eq!(reset[0].retries, 1);

    let other = tasks::get_task(&pool, untouched.id).await.unwrap().unwrap();
    assert_eq!(other.retries, 0, "pending tasks are untouched");

    pool.close().await;
    drop_test_db(&db_name).await;
}
