//! Simulated node - one SQLite database playing a primary or a replica

use crate::binlog::{StatementLog, LOG_FILE};
use crate::dialect::{self, AdminCommand};
use crate::error::SimError;
use async_trait::async_trait;
use parking_lot::Mutex;
use replica_harness::{DataNode, ExecutionError, Row, Value};
use rusqlite::{types::ValueRef, Connection};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Replica-side replication progress
#[derive(Debug, Clone, Default)]
pub struct ReplicationState {
    pub running: bool,
    /// Last applied log position
    pub position: u64,
    pub last_error: Option<String>,
}

pub(crate) enum Role {
    Primary,
    Replica {
        source: String,
        read_only: bool,
        replication: Mutex<ReplicationState>,
    },
}

/// Shared state behind every handle to a node
pub(crate) struct NodeState {
    pub name: String,
    pub role: Role,
    pub log: StatementLog,
    pub up: AtomicBool,
    conn: Mutex<Connection>,
}

impl NodeState {
    pub fn open(name: &str, role: Role, log: StatementLog) -> Result<Self, SimError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("ATTACH DATABASE ':memory:' AS test;")?;
        Ok(Self {
            name: name.to_string(),
            role,
            log,
            up: AtomicBool::new(true),
            conn: Mutex::new(conn),
        })
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    pub fn replication(&self) -> Option<&Mutex<ReplicationState>> {
        match &self.role {
            Role::Replica { replication, .. } => Some(replication),
            Role::Primary => None,
        }
    }

    /// Run a statement on the local database, logging it when this is the primary
    pub fn apply(&self, sql: &str) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock();
        conn.execute_batch(&dialect::translate(sql))?;
        if matches!(self.role, Role::Primary) && dialect::is_mutating(sql) {
            // Appended under the connection lock so log order matches commit order
            self.log.append(sql);
        }
        Ok(())
    }

    fn select(&self, sql: &str) -> Result<Vec<Row>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&dialect::translate(sql))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query([])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut result = Row::new();
            for (i, column) in columns.iter().enumerate() {
                let value = match row.get_ref(i)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(n) => Value::Integer(n),
                    ValueRef::Real(x) => Value::Real(x),
                    ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(b) => Value::Text(format!("<{} bytes>", b.len())),
                };
                result.push(column.clone(), value);
            }
            out.push(result);
        }
        Ok(out)
    }

    /// Events in the primary's log this node has not applied yet
    pub fn behind(&self) -> u64 {
        match self.replication() {
            Some(replication) => self.log.head().saturating_sub(replication.lock().position),
            None => 0,
        }
    }
}

/// Client connection to a simulated node
#[derive(Clone)]
pub struct SimNode {
    state: Arc<NodeState>,
    /// Privileged clients bypass `read_only`
    privileged: bool,
}

impl SimNode {
    pub(crate) fn new(state: Arc<NodeState>, privileged: bool) -> Self {
        Self { state, privileged }
    }

    fn ensure_up(&self, sql: &str) -> Result<(), ExecutionError> {
        if self.state.is_up() {
            Ok(())
        } else {
            Err(ExecutionError::node_down(&self.state.name, sql))
        }
    }

    fn statement_error(&self, sql: &str, e: impl ToString) -> ExecutionError {
        ExecutionError::statement(&self.state.name, sql, e.to_string())
    }

    /// Apply a non-admin statement, enforcing read-only for unprivileged clients
    fn write(&self, sql: &str) -> Result<(), ExecutionError> {
        if let Role::Replica { read_only: true, .. } = self.state.role {
            if !self.privileged && dialect::is_mutating(sql) {
                return Err(ExecutionError::read_only(&self.state.name, sql));
            }
        }

        self.state
            .apply(sql)
            .map_err(|e| self.statement_error(sql, e))
    }

    fn run_admin(&self, sql: &str, command: AdminCommand) -> Result<Vec<Row>, ExecutionError> {
        let name = &self.state.name;
        let replica_only = || self.statement_error(sql, "this server is not configured as a replica");

        match command {
            AdminCommand::StartReplica => {
                let replication = self.state.replication().ok_or_else(replica_only)?;
                let mut replication = replication.lock();
                replication.running = true;
                replication.last_error = None;
                tracing::debug!("{}: replication started at position {}", name, replication.position);
                Ok(Vec::new())
            }
            AdminCommand::StopReplica => {
                let replication = self.state.replication().ok_or_else(replica_only)?;
                replication.lock().running = false;
                tracing::debug!("{}: replication stopped", name);
                Ok(Vec::new())
            }
            AdminCommand::ChangeSource { position } => {
                let replication = self.state.replication().ok_or_else(replica_only)?;
                let mut replication = replication.lock();
                if replication.running {
                    return Err(self.statement_error(
                        sql,
                        "this operation cannot be performed with a running replica; run STOP REPLICA first",
                    ));
                }
                replication.position = position;
                replication.last_error = None;
                Ok(Vec::new())
            }
            AdminCommand::ShowPrimaryStatus => match self.state.role {
                Role::Primary => Ok(vec![Row::new()
                    .with("File", LOG_FILE)
                    .with("Position", self.state.log.head() as i64)]),
                Role::Replica { .. } => Ok(Vec::new()),
            },
            AdminCommand::ShowReplicaStatus => match &self.state.role {
                Role::Primary => Ok(Vec::new()),
                Role::Replica {
                    source,
                    read_only,
                    replication,
                } => {
                    let state = replication.lock().clone();
                    let behind = self.state.log.head().saturating_sub(state.position);
                    Ok(vec![Row::new()
                        .with("Source_Host", source.as_str())
                        .with("Source_Log_File", LOG_FILE)
                        .with("Replica_Running", if state.running { "Yes" } else { "No" })
                        .with("Read_Only", if *read_only { "Yes" } else { "No" })
                        .with("Exec_Source_Log_Pos", state.position as i64)
                        .with("Events_Behind_Source", behind as i64)
                        .with("Last_Error", state.last_error.unwrap_or_default())])
                }
            },
            AdminCommand::Describe { schema, table } => {
                let pragma = match schema {
                    Some(schema) => format!("PRAGMA {}.table_info({})", schema, table),
                    None => format!("PRAGMA table_info({})", table),
                };
                let rows = self.state.select(&pragma).map_err(|e| self.statement_error(sql, e))?;
                if rows.is_empty() {
                    return Err(self.statement_error(sql, format!("table '{}' doesn't exist", table)));
                }
                Ok(rows)
            }
        }
    }
}

#[async_trait]
impl DataNode for SimNode {
    fn name(&self) -> &str {
        &self.state.name
    }

    async fn execute(&self, sql: &str) -> Result<(), ExecutionError> {
        self.ensure_up(sql)?;

        if let Some(command) = AdminCommand::parse(sql) {
            return self.run_admin(sql, command).map(|_| ());
        }

        self.write(sql)
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<Row>, ExecutionError> {
        self.ensure_up(sql)?;

        if let Some(command) = AdminCommand::parse(sql) {
            return self.run_admin(sql, command);
        }

        // Writes take the same path as `execute` whichever method carries them
        if dialect::is_mutating(sql) {
            self.write(sql)?;
            return Ok(Vec::new());
        }

        self.state
            .select(sql)
            .map_err(|e| self.statement_error(sql, e))
    }

    async fn replication_lag(&self) -> Result<Option<u64>, ExecutionError> {
        self.ensure_up("")?;
        Ok(Some(self.state.behind()))
    }
}
