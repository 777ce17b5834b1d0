//! Catalog access
//!
//! The catalog is an external relational store. Everything in this crate
//! talks to it through [`CatalogConnection`]; [`SqliteCatalog`] is the
//! implementation shipped with the tools.

pub mod reader;
pub mod sqlite;
pub mod writer;

use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

pub use reader::{CatalogFiles, CatalogReader, FileQuery};
pub use sqlite::SqliteCatalog;
pub use writer::CatalogWriter;

/// A value bound to or read from a catalog query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One result row, columns addressable by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    /// Text column; `None` for NULL or a missing column
    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    /// Integer column; `None` for NULL or a missing column
    pub fn integer(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_i64)
    }

    /// Required text column
    pub fn require_text(&self, column: &str) -> Result<&str, CatalogError> {
        self.text(column)
            .ok_or_else(|| CatalogError::Query(format!("column '{}' missing or not text", column)))
    }
}

/// Failures reported by a catalog collaborator
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The store cannot be reached or opened
    #[error("{0}")]
    Connection(String),

    /// The statement failed
    #[error("{0}")]
    Query(String),
}

impl From<CatalogError> for ArchiveError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Connection(message) => ArchiveError::CatalogConnection(message),
            CatalogError::Query(message) => ArchiveError::Catalog(message),
        }
    }
}

/// Query interface of the catalog store
///
/// Writes issued through `execute` stay pending until `commit`; callers own
/// their transaction boundaries.
pub trait CatalogConnection {
    /// Run one statement and return its rows (empty for writes)
    fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, CatalogError>;

    /// Make pending writes durable
    fn commit(&self) -> Result<(), CatalogError>;

    /// Discard pending writes
    fn rollback(&self) -> Result<(), CatalogError>;
}

impl<C: CatalogConnection + ?Sized> CatalogConnection for &C {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, CatalogError> {
        (**self).execute(sql, params)
    }

    fn commit(&self) -> Result<(), CatalogError> {
        (**self).commit()
    }

    fn rollback(&self) -> Result<(), CatalogError> {
        (**self).rollback()
    }
}
