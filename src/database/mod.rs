pub mod connection;
pub mod models;
pub mod repositories;
pub mod schema;

#[cfg(test)]
pub(crate) mod fixtures;

pub use connection::Gateway;

use crate::config::DatabaseConfig;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(#[source] rusqlite::Error),

    #[error("Statement failed: {sql}: {source}")]
    Statement {
        sql: String,
        #[source]
        source: rusqlite::Error,
    },
}

impl DatabaseError {
    pub fn statement(sql: &str, source: rusqlite::Error) -> Self {
        DatabaseError::Statement {
            sql: sql.to_string(),
            source,
        }
    }

    /// Statement text of a failed statement, if any.
    pub fn sql(&self) -> Option<&str> {
        match self {
            DatabaseError::Statement { sql, .. } => Some(sql),
            DatabaseError::Connection(_) => None,
        }
    }
}

pub fn establish_connection(config: &DatabaseConfig) -> Result<Gateway, DatabaseError> {
    let gateway = Gateway::open(&config.path)?;
    gateway
        .connection()
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(DatabaseError::Connection)?;
    Ok(gateway)
}
