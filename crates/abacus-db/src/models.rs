use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExpressionStatus {
    Pending,
    InProgress,
    Done,
    Error,
}

impl fmt::Display for ExpressionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for ExpressionStatus {
    type Err = ExpressionStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            other => Err(ExpressionStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ExpressionStatus`] string.
#[derive(Debug, Clone)]
pub struct ExpressionStatusParseError(pub String);

impl fmt::Display for ExpressionStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid expression status: {:?}", self.0)
    }
}

impl std::error::Error for ExpressionStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a task.
///
/// `Failed` is terminal and only ever entered through the optional retry
/// cap; with the cap unset a worker error bounces the task back to
/// `Pending` indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// A primitive binary arithmetic operator, stored as its symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
pub enum Operator {
    #[sqlx(rename = "+")]
    #[serde(rename = "+")]
    Add,
    #[sqlx(rename = "-")]
    #[serde(rename = "-")]
    Sub,
    #[sqlx(rename = "*")]
    #[serde(rename = "*")]
    Mul,
    #[sqlx(rename = "/")]
    #[serde(rename = "/")]
    Div,
}

impl Operator {
    /// The operator's symbol as a static string.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Operator {
    type Err = OperatorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Self::Add),
            "-" => Ok(Self::Sub),
            "*" => Ok(Self::Mul),
            "/" => Ok(Self::Div),
            other => Err(OperatorParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Operator`] string.
#[derive(Debug, Clone)]
pub struct OperatorParseError(pub String);

impl fmt::Display for OperatorParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid operator: {:?}", self.0)
    }
}

impl std::error::Error for OperatorParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A registered user. The password hash never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub login: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// A submitted expression and its lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Expression {
    pub id: i64,
    pub user_id: i64,
    pub expression: String,
    pub status: ExpressionStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<f64>,
    /// Diagnostic message when `status` is `Error`, or a step trace when
    /// the expression completed without dispatching any task.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub steps: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One binary arithmetic operation with fully materialised operands.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub expression_id: i64,
    pub operation: Operator,
    pub arg1: f64,
    pub arg2: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<f64>,
    pub status: TaskStatus,
    pub retries: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_status_display_roundtrip() {
        let variants = [
            ExpressionStatus::Pending,
            ExpressionStatus::InProgress,
            ExpressionStatus::Done,
            ExpressionStatus::Error,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: ExpressionStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn expression_status_invalid() {
        let result = "bogus".parse::<ExpressionStatus>();
        assert!(result.is_err());
    }

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Done,
            TaskStatus::Failed,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_invalid() {
        let result = "nope".parse::<TaskStatus>();
        assert!(result.is_err());
    }

    #[test]
    fn operator_display_roundtrip() {
        let variants = [Operator::Add, Operator::Sub, Operator::Mul, Operator::Div];
        for v in &variants {
            let s = v.to_string();
            let parsed: Operator = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn operator_invalid() {
        let result = "%".parse::<Operator>();
        assert!(result.is_err());
    }

    #[test]
    fn operator_serde_uses_symbols() {
        let json = serde_json::to_string(&Operator::Mul).unwrap();
        assert_eq!(json, "\"*\"");
        let parsed: Operator = serde_json::from_str("\"/\"").unwrap();
        assert_eq!(parsed, Operator::Div);
    }
}
