//! The `abacus status` command: operator view of recent expressions and
//! their task progress.

use anyhow::Result;
use sqlx::PgPool;

use abacus_db::models::TaskStatus;
use abacus_db::queries::{expressions, tasks};

pub async fn run_status(pool: &PgPool, limit: i64) -> Result<()> {
    let recent = expressions::list_recent_expressions(pool, limit).await?;

    if recent.is_empty() {
        println!("No expressions submitted yet.");
        return Ok(());
    }

    println!(
        "{:>6}  {:<12} {:>12}  {:>7}  {}",
        "ID", "STATUS", "RESULT", "TASKS", "EXPRESSION"
    );
    for expr in &recent {
        let all_tasks = tasks::list_tasks_for_expression(pool, expr.id).await?;
        let done = all_tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .count();

        let result = match expr.result {
            Some(v) => format!("{v}"),
            None => "-".to_owned(),
        };

        println!(
            "{:>6}  {:<12} {:>12}  {:>3}/{:<3}  {}",
            expr.id,
            expr.status.to_string(),
            result,
            done,
            all_tasks.len(),
            expr.expression,
        );

        if let Some(steps) = &expr.steps {
            println!("        {steps}");
        }
    }

    Ok(())
}
