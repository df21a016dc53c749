//! MySQL-flavoured statement handling on top of SQLite
//!
//! Replication control and status statements never reach SQLite; they are
//! recognised here and served by the node itself. A few plain SQL forms
//! SQLite lacks are rewritten.

use std::borrow::Cow;

/// Statement served by the simulated node instead of SQLite
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    StartReplica,
    StopReplica,
    /// Reposition the replica's applier in the primary's statement log
    ChangeSource { position: u64 },
    ShowPrimaryStatus,
    ShowReplicaStatus,
    /// `DESCRIBE schema.table`
    Describe { schema: Option<String>, table: String },
}

/// Collapse whitespace and uppercase, for keyword matching only
fn normalize(sql: &str) -> String {
    sql.trim()
        .trim_end_matches(';')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

impl AdminCommand {
    /// Recognise an administrative statement
    pub fn parse(sql: &str) -> Option<Self> {
        let norm = normalize(sql);
        match norm.as_str() {
            "START REPLICA" | "START SLAVE" => return Some(Self::StartReplica),
            "STOP REPLICA" | "STOP SLAVE" => return Some(Self::StopReplica),
            "SHOW PRIMARY STATUS" | "SHOW MASTER STATUS" | "SHOW BINARY LOG STATUS" => {
                return Some(Self::ShowPrimaryStatus)
            }
            "SHOW REPLICA STATUS" | "SHOW SLAVE STATUS" => return Some(Self::ShowReplicaStatus),
            _ => {}
        }

        if norm.starts_with("CHANGE REPLICATION SOURCE TO") || norm.starts_with("CHANGE MASTER TO")
        {
            let position = norm
                .split(',')
                .filter_map(|part| part.split_once('='))
                .find(|(key, _)| key.trim().ends_with("_LOG_POS"))
                .and_then(|(_, value)| value.trim().parse().ok())
                .unwrap_or(0);
            return Some(Self::ChangeSource { position });
        }

        let words: Vec<&str> = sql.split_whitespace().collect();
        if let [keyword, target] = words.as_slice() {
            if keyword.eq_ignore_ascii_case("DESCRIBE") || keyword.eq_ignore_ascii_case("DESC") {
                let target = target.trim_end_matches(';');
                let (schema, table) = match target.split_once('.') {
                    Some((schema, table)) => (Some(schema.to_string()), table.to_string()),
                    None => (None, target.to_string()),
                };
                return Some(Self::Describe { schema, table });
            }
        }

        None
    }
}

/// Whether a statement changes data or schema
pub fn is_mutating(sql: &str) -> bool {
    let first = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase();
    matches!(
        first.as_str(),
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" | "CREATE" | "DROP" | "ALTER" | "TRUNCATE"
    )
}

/// Rewrite statements SQLite does not understand
pub fn translate(sql: &str) -> Cow<'_, str> {
    if normalize(sql).starts_with("TRUNCATE TABLE ") {
        if let Some(name) = sql.split_whitespace().nth(2) {
            return Cow::Owned(format!("DELETE FROM {}", name.trim_end_matches(';')));
        }
    }
    Cow::Borrowed(sql)
}
