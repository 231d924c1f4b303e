//! Worker-side compute helpers.
//!
//! The worker process itself lives in the CLI crate; the arithmetic and
//! the response-time gating calculation are here so they can be tested
//! without a transport.

use std::time::Duration;

use thiserror::Error;

use abacus_db::models::Operator;

/// Arithmetic failure detected by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeError {
    #[error("division by zero")]
    DivisionByZero,
}

/// Apply a binary operation to fully materialised operands.
pub fn compute(op: Operator, arg1: f64, arg2: f64) -> Result<f64, ComputeError> {
    match op {
        Operator::Add => Ok(arg1 + arg2),
        Operator::Sub => Ok(arg1 - arg2),
        Operator::Mul => Ok(arg1 * arg2),
        Operator::Div => {
            if arg2 == 0.0 {
                Err(ComputeError::DivisionByZero)
            } else {
                Ok(arg1 / arg2)
            }
        }
    }
}

/// How much longer the worker must hold its response to honour the task's
/// configured operation time. `None` when the elapsed compute time already
/// covers it.
pub fn remaining_gate(elapsed: Duration, operation_time_ms: i32) -> Option<Duration> {
    if operation_time_ms <= 0 {
        return None;
    }
    let required = Duration::from_millis(operation_time_ms as u64);
    required.checked_sub(elapsed).filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_all_operators() {
        assert_eq!(compute(Operator::Add, 2.0, 3.0), Ok(5.0));
        assert_eq!(compute(Operator::Sub, 10.0, 4.0), Ok(6.0));
        assert_eq!(compute(Operator::Mul, 3.0, 4.0), Ok(12.0));
        assert_eq!(compute(Operator::Div, 9.0, 2.0), Ok(4.5));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(
            compute(Operator::Div, 4.0, 0.0),
            Err(ComputeError::DivisionByZero)
        );
    }

    #[test]
    fn gate_pads_fast_computations() {
        let remaining = remaining_gate(Duration::from_millis(100), 1000);
        assert_eq!(remaining, Some(Duration::from_millis(900)));
    }

    #[test]
    fn gate_is_noop_when_already_slow() {
        assert_eq!(remaining_gate(Duration::from_millis(1500), 1000), None);
        assert_eq!(remaining_gate(Duration::from_millis(1000), 1000), None);
    }

    #[test]
    fn gate_is_noop_when_unconfigured() {
        assert_eq!(remaining_gate(Duration::from_millis(0), 0), None);
    }
}
