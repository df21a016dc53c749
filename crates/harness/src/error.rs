//! Harness errors

use thiserror::Error;

/// What went wrong while talking to a node
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    #[error("statement failed")]
    Statement,

    #[error("node is down")]
    NodeDown,

    #[error("query returned no rows")]
    EmptyResult,

    #[error("unexpected result shape")]
    ShapeMismatch,

    #[error("node is read-only")]
    ReadOnly,
}

/// A node I/O or statement failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{node}: {kind}: {message}")]
pub struct ExecutionError {
    /// Logical name of the node the statement ran against
    pub node: String,
    /// Failure category
    pub kind: ExecutionErrorKind,
    /// Statement that failed (empty when not statement-specific)
    pub statement: String,
    /// Store-reported detail
    pub message: String,
}

impl ExecutionError {
    pub fn new(
        node: impl Into<String>,
        kind: ExecutionErrorKind,
        statement: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            node: node.into(),
            kind,
            statement: statement.into(),
            message: message.into(),
        }
    }

    pub fn statement(node: &str, sql: &str, message: impl Into<String>) -> Self {
        Self::new(node, ExecutionErrorKind::Statement, sql, message)
    }

    pub fn node_down(node: &str, sql: &str) -> Self {
        Self::new(node, ExecutionErrorKind::NodeDown, sql, "connection refused")
    }

    pub fn empty_result(node: &str, sql: &str) -> Self {
        Self::new(node, ExecutionErrorKind::EmptyResult, sql, "no rows returned")
    }

    pub fn shape_mismatch(node: &str, sql: &str, message: impl Into<String>) -> Self {
        Self::new(node, ExecutionErrorKind::ShapeMismatch, sql, message)
    }

    pub fn read_only(node: &str, sql: &str) -> Self {
        Self::new(
            node,
            ExecutionErrorKind::ReadOnly,
            sql,
            "the server is running with read-only access",
        )
    }
}

/// Invalid replica-set mutation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("cannot remove primary node '{0}'")]
    PrimaryRemoval(String),

    #[error("node '{0}' is already a member")]
    DuplicateNode(String),

    #[error("node '{0}' is not a member")]
    UnknownNode(String),

    #[error("lifecycle operation on '{node}' failed: {message}")]
    Lifecycle { node: String, message: String },
}

/// Exclusion gate protocol violation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateMisuseError {
    #[error("gate released with {holders} recorded holders")]
    UnpairedRelease { holders: usize },
}

/// Any harness failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HarnessError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    GateMisuse(#[from] GateMisuseError),
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
