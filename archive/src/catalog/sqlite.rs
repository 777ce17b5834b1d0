//! SQLite-backed catalog store

use std::path::Path;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, OpenFlags, ToSql};
use tracing::debug;

use super::{CatalogConnection, CatalogError, Row, Value};

/// Catalog stored in a SQLite database file
#[derive(Debug)]
pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    /// Open an existing catalog; a missing file is a connection error
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| CatalogError::Connection(format!("cannot open '{}': {}", path.display(), e)))?;

        let catalog = SqliteCatalog { conn };
        catalog.configure_pragmas()?;
        debug!("Opened catalog {}", path.display());
        Ok(catalog)
    }

    /// Create (or open) a catalog file and make sure the schema exists
    pub fn create(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| CatalogError::Connection(format!("cannot create '{}': {}", path.display(), e)))?;

        let catalog = SqliteCatalog { conn };
        catalog.configure_pragmas()?;
        catalog.initialize_schema()?;
        Ok(catalog)
    }

    /// In-memory catalog with the schema applied
    pub fn open_in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory()?;
        let catalog = SqliteCatalog { conn };
        catalog.configure_pragmas()?;
        catalog.initialize_schema()?;
        Ok(catalog)
    }

    fn configure_pragmas(&self) -> Result<(), CatalogError> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Apply the catalog schema; idempotent
    pub fn initialize_schema(&self) -> Result<(), CatalogError> {
        self.conn.execute_batch(include_str!("schema.sql"))?;
        debug!("Catalog schema initialized");
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Whether writes are pending a commit
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

impl CatalogConnection for SqliteCatalog {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, CatalogError> {
        let mut stmt = self.conn.prepare(sql)?;

        if !stmt.readonly() && self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }

        if stmt.column_count() == 0 {
            let changed = stmt.execute(params_from_iter(params.iter()))?;
            debug!(changed, "Catalog statement executed");
            return Ok(Vec::new());
        }

        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut result = Vec::new();

        while let Some(row) = rows.next()? {
            let mut columns = Vec::with_capacity(names.len());
            for (index, name) in names.iter().enumerate() {
                columns.push((name.clone(), from_value_ref(row.get_ref(index)?)));
            }
            result.push(Row::new(columns));
        }

        Ok(result)
    }

    fn commit(&self) -> Result<(), CatalogError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
            debug!("Catalog transaction committed");
        }
        Ok(())
    }

    fn rollback(&self) -> Result<(), CatalogError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK")?;
            debug!("Catalog transaction rolled back");
        }
        Ok(())
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(value) => ToSqlOutput::from(*value),
            Value::Real(value) => ToSqlOutput::from(*value),
            Value::Text(value) => ToSqlOutput::from(value.as_str()),
            Value::Blob(value) => ToSqlOutput::from(value.as_slice()),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(value) => Value::Integer(value),
        ValueRef::Real(value) => Value::Real(value),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        let unreachable = matches!(
            &err,
            rusqlite::Error::SqliteFailure(failure, _) if matches!(
                failure.code,
                ErrorCode::CannotOpen
                    | ErrorCode::NotADatabase
                    | ErrorCode::PermissionDenied
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
            )
        );

        if unreachable {
            CatalogError::Connection(err.to_string())
        } else {
            CatalogError::Query(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_file_is_connection_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = SqliteCatalog::open(temp_dir.path().join("missing.db"));
        assert!(matches!(result, Err(CatalogError::Connection(_))));
    }

    #[test]
    fn test_create_then_open() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("catalog.db");

        let catalog = SqliteCatalog::create(&path).unwrap();
        catalog
            .execute(
                "INSERT INTO archive (name, root) VALUES (?1, ?2)",
                &[Value::from("home"), Value::from("/data")],
            )
            .unwrap();
        catalog.commit().unwrap();
        drop(catalog);

        let catalog = SqliteCatalog::open(&path).unwrap();
        let rows = catalog
            .execute("SELECT name, root FROM archive", &[])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text("root"), Some("/data"));
    }

    #[test]
    fn test_writes_pending_until_commit() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        assert!(!catalog.in_transaction());

        catalog
            .execute("INSERT INTO archive (name, root) VALUES ('a', '/a')", &[])
            .unwrap();
        assert!(catalog.in_transaction());

        catalog.rollback().unwrap();
        let rows = catalog.execute("SELECT name FROM archive", &[]).unwrap();
        assert!(rows.is_empty());

        catalog
            .execute("INSERT INTO archive (name, root) VALUES ('b', '/b')", &[])
            .unwrap();
        catalog.commit().unwrap();
        assert!(!catalog.in_transaction());
        let rows = catalog.execute("SELECT name FROM archive", &[]).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_value_round_trip_types() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let rows = catalog
            .execute(
                "SELECT ?1 AS n, ?2 AS i, ?3 AS t",
                &[Value::Null, Value::Integer(7), Value::from("x")],
            )
            .unwrap();

        assert!(rows[0].get("n").unwrap().is_null());
        assert_eq!(rows[0].integer("i"), Some(7));
        assert_eq!(rows[0].text("t"), Some("x"));
    }

    #[test]
    fn test_bad_sql_is_query_error() {
        let catalog = SqliteCatalog::open_in_memory().unwrap();
        let result = catalog.execute("SELEC nonsense", &[]);
        assert!(matches!(result, Err(CatalogError::Query(_))));
    }
}
