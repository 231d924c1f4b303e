//! The `abacus recover` command: requeue tasks stranded in progress by a
//! crashed worker or orchestrator.
//!
//! There is no automatic lease expiry, so this is the operator's lever
//! when a worker died between fetch and submit.

use anyhow::Result;
use sqlx::PgPool;

use abacus_db::queries::tasks;

pub async fn run_recover(pool: &PgPool) -> Result<()> {
    let reset = tasks::reset_orphaned_tasks(pool).await?;

    if reset.is_empty() {
        println!("No in-progress tasks to requeue.");
        return Ok(());
    }

    println!("Requeued {} task(s):", reset.len());
    for task in &reset {
        println!(
            "  task {} (expression {}): {} {} {} -- retry {}",
            task.id, task.expression_id, task.arg1, task.operation, task.arg2, task.retries,
        );
    }

    Ok(())
}
