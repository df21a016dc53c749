//! DataNode - the narrow data-access surface the harness needs from a store endpoint

use crate::error::ExecutionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single column value as reported by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    /// Interpret a scalar as a row count
    pub fn as_count(&self) -> Option<u64> {
        match self {
            Value::Integer(n) if *n >= 0 => Some(*n as u64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Blank values are hidden from narrated rows
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Real(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// One result row, columns kept in the order the store returned them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column
    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.push((column.into(), value.into()));
    }

    /// Builder-style append
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, value);
        self
    }

    /// Look up a column by name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Render as `column: value` lines sorted by column, blank values omitted
    pub fn prettify(&self) -> String {
        let mut visible: Vec<_> = self
            .columns
            .iter()
            .filter(|(_, value)| !value.is_blank())
            .collect();
        visible.sort_by(|a, b| a.0.cmp(&b.0));
        visible
            .into_iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A single database endpoint
///
/// Every call blocks the invoking task until the store answers. Nothing is
/// retried here; retry policy belongs to the caller.
#[async_trait]
pub trait DataNode: Send + Sync {
    /// Logical node name
    fn name(&self) -> &str;

    /// Execute one statement, discarding any result
    async fn execute(&self, sql: &str) -> Result<(), ExecutionError>;

    /// Run every row-producing query and collect the rows
    async fn query_rows(&self, sql: &str) -> Result<Vec<Row>, ExecutionError>;

    /// Execute statements in order, stopping at the first failure
    async fn execute_batch(&self, statements: &[&str]) -> Result<(), ExecutionError> {
        for sql in statements {
            self.execute(sql).await?;
        }
        Ok(())
    }

    /// Execute a statement and hand back the failure instead of propagating it
    async fn try_execute(&self, sql: &str) -> Option<ExecutionError> {
        self.execute(sql).await.err()
    }

    /// First row of a query; fails if there is none
    async fn query_row(&self, sql: &str) -> Result<Row, ExecutionError> {
        self.query_rows(sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ExecutionError::empty_result(self.name(), sql))
    }

    /// Exactly one row with exactly one column
    async fn query_scalar(&self, sql: &str) -> Result<Value, ExecutionError> {
        let rows = self.query_rows(sql).await?;
        if rows.len() != 1 {
            return Err(ExecutionError::shape_mismatch(
                self.name(),
                sql,
                format!("expected 1 row, got {}", rows.len()),
            ));
        }
        let row = &rows[0];
        if row.len() != 1 {
            return Err(ExecutionError::shape_mismatch(
                self.name(),
                sql,
                format!("expected 1 column, got {}", row.len()),
            ));
        }
        Ok(row.columns[0].1.clone())
    }

    /// Number of replication events not yet applied, if the store exposes it
    async fn replication_lag(&self) -> Result<Option<u64>, ExecutionError> {
        Ok(None)
    }
}
