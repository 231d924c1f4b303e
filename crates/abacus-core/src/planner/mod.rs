//! Planner: walks an operator tree against the tasks already recorded for
//! an expression, grafting completed results upward and materialising a
//! durable task for every node whose children are both numeric.
//!
//! Idempotent by construction: a node's task is keyed on the
//! (operator, arg1, arg2) triple, and no task is created while another
//! task with the same triple is pending, in progress, or done. Operand
//! comparison is bitwise (`f64::to_bits`): operands are exact copies of
//! either a parsed literal or a prior task result, so no numeric
//! normalisation may happen between storing and comparing.

use std::collections::HashSet;

use tracing::debug;

use abacus_db::models::{Operator, Task, TaskStatus};
use abacus_db::store::{Store, StoreError};

use crate::parser::Node;

/// Key identifying a task within one expression: operator plus the bit
/// patterns of both operands.
type OpKey = (Operator, u64, u64);

fn op_key(op: Operator, arg1: f64, arg2: f64) -> OpKey {
    (op, arg1.to_bits(), arg2.to_bits())
}

/// Fill values into the tree from completed tasks (post-order).
///
/// At each internal node whose children are both numeric, the matching
/// done task with the lowest id wins. Ties only arise from literal
/// duplicate sub-expressions, where any match is algebraically safe.
pub fn fill_completed_values(node: &mut Node, done: &[Task]) {
    let Node::Binary {
        op,
        left,
        right,
        value,
    } = node
    else {
        return;
    };
    if value.is_some() {
        return;
    }
    fill_completed_values(left, done);
    fill_completed_values(right, done);
    if let (Some(lv), Some(rv)) = (left.value(), right.value()) {
        let key = op_key(*op, lv, rv);
        let matched = done
            .iter()
            .filter(|t| op_key(t.operation, t.arg1, t.arg2) == key && t.result.is_some())
            .min_by_key(|t| t.id);
        if let Some(task) = matched {
            *value = task.result;
        }
    }
}

/// Create a pending task for every ready node that does not already have
/// one, and return the created tasks.
///
/// `existing` is the full task list for the expression; tasks in any
/// non-terminal-failed state block re-creation of their triple. Running
/// the planner twice against the same state therefore creates nothing the
/// second time.
pub async fn plan(
    store: &dyn Store,
    expression_id: i64,
    node: &Node,
    existing: &[Task],
) -> Result<Vec<Task>, StoreError> {
    let mut seen: HashSet<OpKey> = existing
        .iter()
        .filter(|t| {
            matches!(
                t.status,
                TaskStatus::Pending | TaskStatus::InProgress | TaskStatus::Done
            )
        })
        .map(|t| op_key(t.operation, t.arg1, t.arg2))
        .collect();

    let mut wanted = Vec::new();
    collect_ready_operations(node, &mut seen, &mut wanted);

    let mut created = Vec::with_capacity(wanted.len());
    for (op, arg1, arg2) in wanted {
        let task = store.create_task(expression_id, op, arg1, arg2).await?;
        debug!(
            expression_id,
            task_id = task.id,
            operation = %op,
            arg1,
            arg2,
            "created task"
        );
        created.push(task);
    }
    Ok(created)
}

/// Post-order collection of ready-but-untasked operations.
///
/// Literal duplicates within one pass collapse onto a single task via the
/// `seen` set; the duplicated nodes later adopt the same result.
fn collect_ready_operations(
    node: &Node,
    seen: &mut HashSet<OpKey>,
    out: &mut Vec<(Operator, f64, f64)>,
) {
    let Node::Binary {
        op,
        left,
        right,
        value,
    } = node
    else {
        return;
    };
    if value.is_some() {
        return;
    }
    collect_ready_operations(left, seen, out);
    collect_ready_operations(right, seen, out);
    if let (Some(lv), Some(rv)) = (left.value(), right.value()) {
        if seen.insert(op_key(*op, lv, rv)) {
            out.push((*op, lv, rv));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abacus_test_utils::MemStore;
    use chrono::Utc;

    use crate::parser::parse;

    fn done_task(id: i64, op: Operator, arg1: f64, arg2: f64, result: f64) -> Task {
        let now = Utc::now();
        Task {
            id,
            expression_id: 1,
            operation: op,
            arg1,
            arg2,
            result: Some(result),
            status: TaskStatus::Done,
            retries: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn initial_plan_creates_only_ready_operations() {
        let store = MemStore::new();
        let mut tree = parse("(2+3)*4").unwrap();
        fill_completed_values(&mut tree, &[]);

        let created = plan(&store, 1, &tree, &[]).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].operation, Operator::Add);
        assert_eq!(created[0].arg1, 2.0);
        assert_eq!(created[0].arg2, 3.0);
    }

    #[tokio::test]
    async fn precedence_determines_first_task() {
        let store = MemStore::new();
        let tree = parse("2+3*4").unwrap();

        let created = plan(&store, 1, &tree, &[]).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].operation, Operator::Mul);
        assert_eq!(created[0].arg1, 3.0);
        assert_eq!(created[0].arg2, 4.0);
    }

    #[tokio::test]
    async fn completed_task_unlocks_parent() {
        let store = MemStore::new();
        let mut tree = parse("(2+3)*4").unwrap();
        let done = vec![done_task(1, Operator::Add, 2.0, 3.0, 5.0)];

        fill_completed_values(&mut tree, &done);
        let created = plan(&store, 1, &tree, &done).await.unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].operation, Operator::Mul);
        assert_eq!(created[0].arg1, 5.0);
        assert_eq!(created[0].arg2, 4.0);
    }

    #[tokio::test]
    async fn root_value_fills_when_all_tasks_done() {
        let done = vec![
            done_task(1, Operator::Add, 2.0, 3.0, 5.0),
            done_task(2, Operator::Mul, 5.0, 4.0, 20.0),
        ];
        let mut tree = parse("(2+3)*4").unwrap();
        fill_completed_values(&mut tree, &done);
        assert_eq!(tree.value(), Some(20.0));
    }

    #[tokio::test]
    async fn planner_is_idempotent() {
        let store = MemStore::new();
        let tree = parse("2+3").unwrap();

        let first = plan(&store, 1, &tree, &[]).await.unwrap();
        assert_eq!(first.len(), 1);

        // Second run sees the task recorded by the first.
        let existing = store.all_tasks();
        let second = plan(&store, 1, &tree, &existing).await.unwrap();
        assert!(second.is_empty(), "second plan run must create nothing");
    }

    #[tokio::test]
    async fn pending_task_blocks_duplicate_creation() {
        let store = MemStore::new();
        // (2+3)+(2+3): both ready sub-operations share a triple.
        let tree = parse("(2+3)+(2+3)").unwrap();

        let created = plan(&store, 1, &tree, &[]).await.unwrap();
        assert_eq!(
            created.len(),
            1,
            "duplicate literal sub-expressions share one task"
        );
    }

    #[tokio::test]
    async fn duplicate_sub_expressions_adopt_shared_result() {
        // 2+2 + 2+2 parses as ((2+2)+2)+2; use an explicit duplicated
        // grouping instead.
        let mut tree = parse("(2+2)*(2+2)").unwrap();
        let done = vec![done_task(1, Operator::Add, 2.0, 2.0, 4.0)];
        fill_completed_values(&mut tree, &done);

        let store = MemStore::new();
        let created = plan(&store, 1, &tree, &done).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].operation, Operator::Mul);
        assert_eq!(created[0].arg1, 4.0);
        assert_eq!(created[0].arg2, 4.0);
    }

    #[tokio::test]
    async fn earliest_done_task_wins_on_tie() {
        let mut tree = parse("2+2").unwrap();
        // Two done tasks for the same triple; results would normally be
        // identical, but the tie-break must pick the lowest id.
        let done = vec![
            done_task(7, Operator::Add, 2.0, 2.0, 99.0),
            done_task(3, Operator::Add, 2.0, 2.0, 4.0),
        ];
        fill_completed_values(&mut tree, &done);
        assert_eq!(tree.value(), Some(4.0));
    }

    #[tokio::test]
    async fn bare_number_needs_no_tasks() {
        let store = MemStore::new();
        let tree = parse("7").unwrap();
        assert_eq!(tree.value(), Some(7.0));

        let created = plan(&store, 1, &tree, &[]).await.unwrap();
        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn operand_matching_is_bitwise() {
        // (0-2)*0 produces -0.0; the negative-zero bit pattern must not be
        // conflated with +0.0 when matching.
        let mut tree = parse("(0-2)*0").unwrap();
        let done = vec![done_task(1, Operator::Sub, 0.0, 2.0, -2.0)];
        fill_completed_values(&mut tree, &done);

        let store = MemStore::new();
        let created = plan(&store, 1, &tree, &done).await.unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].arg1, -2.0);

        // A done task recorded with -0.0 as a result is matched by bits.
        let done2 = vec![
            done_task(1, Operator::Sub, 0.0, 2.0, -2.0),
            done_task(2, Operator::Mul, -2.0, 0.0, -0.0),
        ];
        let mut tree2 = parse("(0-2)*0").unwrap();
        fill_completed_values(&mut tree2, &done2);
        let root = tree2.value().expect("root should be valued");
        assert_eq!(root.to_bits(), (-0.0f64).to_bits());
    }
}
