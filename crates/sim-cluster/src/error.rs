//! Simulated cluster errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("invalid cluster layout: {0}")]
    Layout(String),
}
