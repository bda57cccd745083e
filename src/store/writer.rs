//! Table creation and batched import.

use super::traits::{Batch, StoreConnection, validate_table_name};
use crate::error::{Result, TransferError};
use crate::schema;
use crate::types::{ScanKind, encode};
use crate::value::{Column, Row, TableDescriptor, Value};
use log::{debug, info, warn};

/// Whether [`StoreWriter::ensure_schema`] found the table or made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    Existing,
    Created,
}

/// Replace everything but ASCII alphanumerics with `_` and make sure the
/// name does not start with a digit.
///
/// ```
/// use tablebridge::store::sanitize_column_name;
///
/// assert_eq!(sanitize_column_name("first name"), "first_name");
/// assert_eq!(sanitize_column_name("2nd-place"), "_2nd_place");
/// assert_eq!(sanitize_column_name(""), "column");
/// ```
#[must_use]
pub fn sanitize_column_name(name: &str) -> String {
    if name.is_empty() {
        return "column".to_string();
    }
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Writes into the store over one open connection.
pub struct StoreWriter<'a, S: StoreConnection> {
    conn: &'a S,
}

impl<'a, S: StoreConnection> StoreWriter<'a, S> {
    pub const fn new(conn: &'a S) -> Self {
        Self { conn }
    }

    /// # Errors
    ///
    /// Returns [`TransferError::Query`] if the store rejects the check.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        validate_table_name(table)?;
        let sql = format!("EXISTS TABLE {table}");
        debug!("store write: {sql}");
        let result = self.conn.query(&sql)?;
        Ok(result
            .rows
            .first()
            .and_then(|r| r.first())
            .is_some_and(|cell| match cell {
                serde_json::Value::Number(n) => n.as_u64() == Some(1),
                serde_json::Value::String(s) => s == "1",
                serde_json::Value::Bool(b) => *b,
                _ => false,
            }))
    }

    /// Create `table` with `columns` unless it already exists. Column names
    /// are sanitized.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Validation`] for a bad table name or an empty
    /// column list, and [`TransferError::Query`] if the store rejects the DDL.
    pub fn create_table(&self, table: &str, columns: &[Column]) -> Result<()> {
        validate_table_name(table)?;
        if columns.is_empty() {
            return Err(TransferError::Validation(format!(
                "cannot create table {table} without columns"
            )));
        }
        let defs = columns
            .iter()
            .map(|c| format!("{} {}", sanitize_column_name(&c.name), c.store_type))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} ({defs}) ENGINE = MergeTree() ORDER BY tuple()"
        );
        debug!("store write: {sql}");
        self.conn.execute(&sql)?;
        info!("created table {table} with {} columns", columns.len());
        Ok(())
    }

    /// Make sure `table` exists. An existing table's live schema is
    /// returned; otherwise one is inferred from `rows` and created.
    ///
    /// # Errors
    ///
    /// Propagates store failures from the existence check, the describe, or
    /// the create.
    pub fn ensure_schema(&self, table: &str, rows: &[Row]) -> Result<(TableDescriptor, SchemaState)> {
        if self.table_exists(table)? {
            let live = self.live_schema(table)?;
            return Ok((schema::infer(table, rows, Some(live))?, SchemaState::Existing));
        }
        let inferred = schema::infer(table, rows, None)?;
        let sanitized = inferred
            .columns()
            .iter()
            .map(|c| Column {
                name: sanitize_column_name(&c.name),
                ..c.clone()
            })
            .collect();
        let created = TableDescriptor::new(table, sanitized)?;
        self.create_table(table, created.columns())?;
        Ok((created, SchemaState::Created))
    }

    fn live_schema(&self, table: &str) -> Result<TableDescriptor> {
        let sql = format!("DESCRIBE TABLE {table}");
        debug!("store write: {sql}");
        let result = self.conn.query(&sql)?;
        let columns = result
            .column_text(0)
            .into_iter()
            .zip(result.column_text(1))
            .map(|(name, store_type)| Column::from_store(name, store_type, ScanKind::Unknown))
            .collect();
        TableDescriptor::new(table, columns)
    }

    /// Insert `rows` into `table` as one batch, creating the table first if
    /// needed. Returns the number of rows sent.
    ///
    /// The column list is taken from the first row. Rows missing one of
    /// those columns write null for it.
    ///
    /// # Errors
    ///
    /// - [`TransferError::NoData`] for an empty row set, before any store call.
    /// - [`TransferError::SchemaMismatch`] if an existing table lacks one of
    ///   the rows' columns. Nothing is sent.
    /// - [`TransferError::BatchAppend`] if a row cannot be coerced to the
    ///   table's column types. Nothing is sent.
    /// - [`TransferError::BatchSend`] if the store rejects the batch.
    pub fn import_rows(&self, table: &str, rows: &[Row]) -> Result<usize> {
        if rows.is_empty() {
            return Err(TransferError::NoData);
        }
        let (descriptor, state) = self.ensure_schema(table, rows)?;
        debug!("importing {} rows into {table} ({state:?} table)", rows.len());

        let order = schema::column_order(rows);
        let resolved: Vec<Option<Column>> = order
            .iter()
            .map(|name| {
                descriptor
                    .column(name)
                    .or_else(|| descriptor.column(&sanitize_column_name(name)))
                    .cloned()
            })
            .collect();
        let missing: Vec<String> = order
            .iter()
            .zip(&resolved)
            .filter(|(_, c)| c.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        if !missing.is_empty() {
            warn!("{table} has no column for {missing:?}");
            let valid = order
                .iter()
                .zip(&resolved)
                .filter(|(_, c)| c.is_some())
                .map(|(name, _)| name.clone())
                .collect();
            return Err(TransferError::SchemaMismatch {
                table: table.to_string(),
                valid,
                missing,
            });
        }
        let targets: Vec<Column> = resolved.into_iter().flatten().collect();

        let mut batch = Batch::new(table, targets.iter().map(|c| c.name.clone()).collect());
        for (idx, row) in rows.iter().enumerate() {
            let encoded = order
                .iter()
                .zip(&targets)
                .map(|(name, column)| encode(row.get(name).unwrap_or(&Value::Null), column))
                .collect::<Result<Vec<_>>>()
                .and_then(|cells| batch.append(cells));
            if let Err(source) = encoded {
                warn!("row #{idx} rejected for {table}: {source}");
                return Err(TransferError::BatchAppend {
                    row: idx,
                    appended: batch.len(),
                    source: Box::new(source),
                });
            }
        }

        let appended = batch.len();
        if let Err(e) = self.conn.send(&batch) {
            warn!("batch of {appended} rows to {table} failed: {e}");
            return Err(TransferError::BatchSend {
                appended,
                message: e.to_string(),
            });
        }
        info!("sent batch of {appended} rows to {table}");
        Ok(appended)
    }
}
