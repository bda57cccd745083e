//! The seam between the transfer core and a concrete store driver.
//!
//! A [`Connector`] opens a [`StoreConnection`] for one request; the
//! connection is released when it is dropped. Connections speak in SQL text
//! and JSON cells. Query assembly and type mapping stay in
//! [`StoreReader`](super::StoreReader) and [`StoreWriter`](super::StoreWriter),
//! so every driver (and the in-memory fake) sees the same statements.

use crate::config::ConnectionConfig;
use crate::deadline::Deadline;
use crate::error::{Result, TransferError};
use crate::types::ScanKind;
use regex::Regex;
use serde_json::Value as Json;
use std::sync::LazyLock;

static TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.]+$").unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

/// Name, store type, and wire kind of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
    pub scan: ScanKind,
}

/// Materialized result of a read statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Json>>,
}

impl QueryResult {
    /// Build a result, deriving each column's [`ScanKind`] from its first
    /// non-null cell.
    #[must_use]
    pub fn new(columns: Vec<(String, String)>, rows: Vec<Vec<Json>>) -> Self {
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(idx, (name, type_name))| {
                let scan = rows
                    .iter()
                    .filter_map(|r| r.get(idx))
                    .find(|cell| !cell.is_null())
                    .map_or(ScanKind::Unknown, ScanKind::of);
                ColumnMeta {
                    name,
                    type_name,
                    scan,
                }
            })
            .collect();
        Self { columns, rows }
    }

    #[must_use]
    pub const fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Text of column `idx` in every row. Non-string cells are rendered as
    /// JSON text.
    #[must_use]
    pub fn column_text(&self, idx: usize) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|r| r.get(idx))
            .map(|cell| match cell {
                Json::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }
}

/// Rows to insert in one round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub table: String,
    pub columns: Vec<String>,
    /// Encoded cells, one vector per row, in `columns` order.
    pub rows: Vec<Vec<Json>>,
}

impl Batch {
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Append one encoded row. Its width must match the column list.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Validation`] on a width mismatch.
    pub fn append(&mut self, row: Vec<Json>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(TransferError::Validation(format!(
                "batch row has {} cells, expected {}",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The `INSERT` statement that introduces the batch payload.
    #[must_use]
    pub fn statement(&self) -> String {
        format!(
            "INSERT INTO {} ({}) FORMAT JSONEachRow",
            self.table,
            self.columns.join(", ")
        )
    }

    /// Newline-delimited JSON objects, one per row.
    #[must_use]
    pub fn to_json_each_row(&self) -> String {
        let mut out = String::new();
        for row in &self.rows {
            let obj: serde_json::Map<String, Json> = self
                .columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect();
            out.push_str(&Json::Object(obj).to_string());
            out.push('\n');
        }
        out
    }
}

/// One open, request-scoped connection to the store.
///
/// All methods block and honor the deadline the connection was opened with.
pub trait StoreConnection {
    /// Run a statement that returns rows.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Query`] if the store rejects the statement,
    /// [`TransferError::NotFound`] if it names a missing table,
    /// [`TransferError::Connection`] if the store is unreachable, and
    /// [`TransferError::Timeout`] if the deadline passes.
    fn query(&self, sql: &str) -> Result<QueryResult>;

    /// Run a statement that returns nothing (DDL).
    ///
    /// # Errors
    ///
    /// Same as [`query`](Self::query).
    fn execute(&self, sql: &str) -> Result<()>;

    /// Send a whole batch in one round trip.
    ///
    /// # Errors
    ///
    /// Same as [`query`](Self::query).
    fn send(&self, batch: &Batch) -> Result<()>;
}

/// Opens [`StoreConnection`]s.
pub trait Connector {
    type Connection: StoreConnection;

    /// Open and verify a connection. It is released when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Connection`] if the store is unreachable or
    /// rejects the credentials, [`TransferError::Validation`] for an unusable
    /// config, and [`TransferError::Timeout`] if the deadline passes.
    fn connect(&self, config: &ConnectionConfig, deadline: Deadline) -> Result<Self::Connection>;
}

/// Check that a table name is a plain (optionally database-qualified)
/// identifier before it is spliced into a statement.
///
/// # Errors
///
/// Returns [`TransferError::Validation`] if the name is empty, longer than
/// 255 bytes, or contains anything but ASCII alphanumerics, `_`, and `.`.
pub fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TransferError::Validation("table name cannot be empty".into()));
    }
    if name.len() > 255 {
        return Err(TransferError::Validation(
            "table name too long (max 255 characters)".into(),
        ));
    }
    if !TABLE_NAME.is_match(name) {
        return Err(TransferError::Validation(format!(
            "table name {name:?} contains invalid characters"
        )));
    }
    Ok(())
}
