use super::DatabaseError;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Params, Row};
use std::path::Path;

/// Single connection to the relational store.
///
/// Every statement failure comes back as [`DatabaseError::Statement`] carrying
/// the statement text, so callers can log it and move on to the next record.
#[derive(Debug)]
pub struct Gateway {
    conn: Connection,
}

impl Gateway {
    /// Open an existing store. A missing file is a connection error, never an
    /// empty store.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(DatabaseError::Connection)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::Connection)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(DatabaseError::Connection)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run a write statement, returning the number of affected rows.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize, DatabaseError> {
        self.conn
            .execute(sql, params)
            .map_err(|e| DatabaseError::statement(sql, e))
    }

    pub fn query_all<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Vec<T>, DatabaseError>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| DatabaseError::statement(sql, e))?;
        let rows = stmt
            .query_map(params, map)
            .map_err(|e| DatabaseError::statement(sql, e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| DatabaseError::statement(sql, e))
    }

    pub fn query_one<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Option<T>, DatabaseError>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.conn
            .query_row(sql, params, map)
            .optional()
            .map_err(|e| DatabaseError::statement(sql, e))
    }

    /// Rowid of the most recent successful INSERT on this connection.
    pub fn last_insert_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn gateway() -> Gateway {
        let gateway = Gateway::open_in_memory().unwrap();
        gateway
            .execute("CREATE TABLE Item (Id INTEGER PRIMARY KEY, Name TEXT NOT NULL)", [])
            .unwrap();
        gateway
    }

    #[test]
    fn test_execute_reports_affected_rows() {
        let gateway = gateway();
        gateway
            .execute("INSERT INTO Item (Name) VALUES (?1)", params!["first"])
            .unwrap();
        gateway
            .execute("INSERT INTO Item (Name) VALUES (?1)", params!["second"])
            .unwrap();

        let affected = gateway
            .execute("UPDATE Item SET Name = 'x' WHERE Id > ?1", params![0])
            .unwrap();
        assert_eq!(affected, 2);
    }

    #[test]
    fn test_last_insert_id_follows_inserts() {
        let gateway = gateway();
        gateway
            .execute("INSERT INTO Item (Name) VALUES (?1)", params!["first"])
            .unwrap();
        assert_eq!(gateway.last_insert_id(), 1);

        gateway
            .execute("INSERT INTO Item (Id, Name) VALUES (?1, ?2)", params![42, "second"])
            .unwrap();
        assert_eq!(gateway.last_insert_id(), 42);
    }

    #[test]
    fn test_query_all_maps_rows() {
        let gateway = gateway();
        for name in ["a", "b", "c"] {
            gateway
                .execute("INSERT INTO Item (Name) VALUES (?1)", params![name])
                .unwrap();
        }

        let names = gateway
            .query_all("SELECT Name FROM Item ORDER BY Id DESC", [], |row| {
                row.get::<_, String>(0)
            })
            .unwrap();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_query_one_absent_row() {
        let gateway = gateway();
        let name = gateway
            .query_one("SELECT Name FROM Item WHERE Id = ?1", params![42], |row| {
                row.get::<_, String>(0)
            })
            .unwrap();
        assert!(name.is_none());
    }

    #[test]
    fn test_failed_statement_carries_sql() {
        let gateway = gateway();
        let err = gateway
            .execute("UPDATE Missing SET Name = 'x'", [])
            .unwrap_err();
        assert_eq!(err.sql(), Some("UPDATE Missing SET Name = 'x'"));
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let gateway = Gateway::open_in_memory().unwrap();
        let enabled = gateway
            .query_one("PRAGMA foreign_keys", [], |row| row.get::<_, i64>(0))
            .unwrap();
        assert_eq!(enabled, Some(1));
    }
}
