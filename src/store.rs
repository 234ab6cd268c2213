//! Persistence contract used by the cascade engine, and its SQLite
//! implementation. The engine only sequences calls into a [`CascadeStore`];
//! statement execution, transactions and the foreign-key switch belong here.

use std::path::Path;

use rusqlite::{Connection, params_from_iter, types::Value};

use crate::{
    errors::CascadeError,
    query::{ScopedQuery, quote},
};

pub trait CascadeStore {
    fn execute(&self, sql: &str) -> Result<(), CascadeError>;
    fn begin(&self) -> Result<(), CascadeError>;
    fn commit(&self) -> Result<(), CascadeError>;
    fn rollback(&self) -> Result<(), CascadeError>;
    fn integrity_checks(&self) -> Result<bool, CascadeError>;
    fn set_integrity_checks(&self, enabled: bool) -> Result<(), CascadeError>;
    fn delete_matching(&self, query: &ScopedQuery) -> Result<usize, CascadeError>;
    fn update_matching(
        &self,
        query: &ScopedQuery,
        assignments: &[(String, Value)],
    ) -> Result<usize, CascadeError>;
    fn count_matching(&self, query: &ScopedQuery) -> Result<usize, CascadeError>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CascadeError> {
        let conn =
            Connection::open(path).map_err(|e| CascadeError::connection(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, CascadeError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CascadeError::connection(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl CascadeStore for SqliteStore {
    fn execute(&self, sql: &str) -> Result<(), CascadeError> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| CascadeError::query(e.to_string()))
    }

    fn begin(&self) -> Result<(), CascadeError> {
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| CascadeError::transaction(e.to_string()))
    }

    fn commit(&self) -> Result<(), CascadeError> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| CascadeError::transaction(e.to_string()))
    }

    fn rollback(&self) -> Result<(), CascadeError> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| CascadeError::transaction(e.to_string()))
    }

    fn integrity_checks(&self) -> Result<bool, CascadeError> {
        self.conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get::<_, i64>(0))
            .map(|value| value != 0)
            .map_err(|e| CascadeError::integrity_check(e.to_string()))
    }

    fn set_integrity_checks(&self, enabled: bool) -> Result<(), CascadeError> {
        let sql = if enabled {
            "PRAGMA foreign_keys = ON"
        } else {
            "PRAGMA foreign_keys = OFF"
        };
        self.conn
            .execute_batch(sql)
            .map_err(|e| CascadeError::integrity_check(e.to_string()))?;
        // SQLite silently ignores the pragma while a transaction is open
        if self.integrity_checks()? != enabled {
            return Err(CascadeError::integrity_check(format!(
                "foreign_keys could not be set to {enabled}, a transaction is already open"
            )));
        }
        Ok(())
    }

    fn delete_matching(&self, query: &ScopedQuery) -> Result<usize, CascadeError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            quote(&query.table),
            quote(&query.id_column),
            query.select_sql
        );
        self.conn
            .execute(&sql, params_from_iter(query.params.iter()))
            .map_err(|e| CascadeError::query(format!("{}: {e}", query.entity)))
    }

    fn update_matching(
        &self,
        query: &ScopedQuery,
        assignments: &[(String, Value)],
    ) -> Result<usize, CascadeError> {
        if assignments.is_empty() {
            return Err(CascadeError::invalid_input("update needs at least one column"));
        }
        let set = assignments
            .iter()
            .map(|(column, _)| format!("{} = ?", quote(column)))
            .collect::<Vec<_>>()
            .join(", ");
        // selection placeholders come first in the text so numbered ones (?1)
        // keep their meaning, assignment values are bound after them
        let sql = format!(
            "WITH doomed AS ({}) UPDATE {} SET {set} WHERE {} IN (SELECT * FROM doomed)",
            query.select_sql,
            quote(&query.table),
            quote(&query.id_column)
        );
        let values = query
            .params
            .iter()
            .chain(assignments.iter().map(|(_, value)| value));
        self.conn
            .execute(&sql, params_from_iter(values))
            .map_err(|e| CascadeError::query(format!("{}: {e}", query.entity)))
    }

    fn count_matching(&self, query: &ScopedQuery) -> Result<usize, CascadeError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} IN ({})",
            quote(&query.table),
            quote(&query.id_column),
            query.select_sql
        );
        self.conn
            .query_row(&sql, params_from_iter(query.params.iter()), |row| {
                row.get::<_, i64>(0)
            })
            .map(|count| count as usize)
            .map_err(|e| CascadeError::query(format!("{}: {e}", query.entity)))
    }
}
