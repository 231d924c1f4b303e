//! Per-operator artificial latency table.
//!
//! Initialised once at startup from the environment and injected into the
//! dispatcher; read-only afterwards. The latency is attached to each task
//! when it is handed out so the worker can gate its response time.

use std::env;

use tracing::warn;

use abacus_db::models::Operator;

/// Default latency applied when a variable is absent or unusable.
pub const DEFAULT_OPERATION_TIME_MS: i32 = 1000;

/// Configured latency in milliseconds per operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTimes {
    pub addition_ms: i32,
    pub subtraction_ms: i32,
    pub multiplication_ms: i32,
    pub division_ms: i32,
}

impl OperationTimes {
    /// Read the table from `TIME_ADDITION_MS`, `TIME_SUBTRACTION_MS`,
    /// `TIME_MULTIPLICATION_MS`, and `TIME_DIVISION_MS`.
    ///
    /// Each defaults to 1000 when absent, non-numeric, or negative.
    pub fn from_env() -> Self {
        Self {
            addition_ms: read_time_env("TIME_ADDITION_MS"),
            subtraction_ms: read_time_env("TIME_SUBTRACTION_MS"),
            multiplication_ms: read_time_env("TIME_MULTIPLICATION_MS"),
            division_ms: read_time_env("TIME_DIVISION_MS"),
        }
    }

    /// Latency for the given operator.
    pub fn for_operator(&self, op: Operator) -> i32 {
        match op {
            Operator::Add => self.addition_ms,
            Operator::Sub => self.subtraction_ms,
            Operator::Mul => self.multiplication_ms,
            Operator::Div => self.division_ms,
        }
    }
}

impl Default for OperationTimes {
    fn default() -> Self {
        Self {
            addition_ms: DEFAULT_OPERATION_TIME_MS,
            subtraction_ms: DEFAULT_OPERATION_TIME_MS,
            multiplication_ms: DEFAULT_OPERATION_TIME_MS,
            division_ms: DEFAULT_OPERATION_TIME_MS,
        }
    }
}

fn read_time_env(key: &str) -> i32 {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<i32>() {
            Ok(ms) if ms >= 0 => ms,
            _ => {
                warn!(key, value = %raw, "unusable operation time, using default");
                DEFAULT_OPERATION_TIME_MS
            }
        },
        Err(_) => DEFAULT_OPERATION_TIME_MS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    // Env vars are process-global; serialise tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn clear_time_vars() {
        for key in [
            "TIME_ADDITION_MS",
            "TIME_SUBTRACTION_MS",
            "TIME_MULTIPLICATION_MS",
            "TIME_DIVISION_MS",
        ] {
            unsafe { env::remove_var(key) };
        }
    }

    #[test]
    fn defaults_when_unset() {
        let _lock = lock_env();
        clear_time_vars();

        let times = OperationTimes::from_env();
        assert_eq!(times, OperationTimes::default());
    }

    #[test]
    fn reads_configured_values() {
        let _lock = lock_env();
        clear_time_vars();
        unsafe {
            env::set_var("TIME_ADDITION_MS", "250");
            env::set_var("TIME_DIVISION_MS", "0");
        }

        let times = OperationTimes::from_env();
        assert_eq!(times.addition_ms, 250);
        assert_eq!(times.subtraction_ms, DEFAULT_OPERATION_TIME_MS);
        assert_eq!(times.division_ms, 0);

        clear_time_vars();
    }

    #[test]
    fn non_numeric_and_negative_fall_back_to_default() {
        let _lock = lock_env();
        clear_time_vars();
        unsafe {
            env::set_var("TIME_MULTIPLICATION_MS", "fast");
            env::set_var("TIME_SUBTRACTION_MS", "-5");
        }

        let times = OperationTimes::from_env();
        assert_eq!(times.multiplication_ms, DEFAULT_OPERATION_TIME_MS);
        assert_eq!(times.subtraction_ms, DEFAULT_OPERATION_TIME_MS);

        clear_time_vars();
    }

    #[test]
    fn per_operator_lookup() {
        let times = OperationTimes {
            addition_ms: 1,
            subtraction_ms: 2,
            multiplication_ms: 3,
            division_ms: 4,
        };
        assert_eq!(times.for_operator(Operator::Add), 1);
        assert_eq!(times.for_operator(Operator::Sub), 2);
        assert_eq!(times.for_operator(Operator::Mul), 3);
        assert_eq!(times.for_operator(Operator::Div), 4);
    }
}
