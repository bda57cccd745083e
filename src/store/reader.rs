//! Column-validated reads against the store.

use super::traits::{QueryResult, StoreConnection, validate_table_name};
use crate::config::Settings;
use crate::error::{Result, TransferError};
use crate::types::{ScanKind, decode};
use crate::value::{Column, Row, TableDescriptor};
use log::{debug, warn};

const INTROSPECTION: &str = " SETTINGS allow_introspection_functions=1";

/// Reads table metadata and rows over one open connection.
pub struct StoreReader<'a, S: StoreConnection> {
    conn: &'a S,
    settings: &'a Settings,
}

impl<'a, S: StoreConnection> StoreReader<'a, S> {
    pub const fn new(conn: &'a S, settings: &'a Settings) -> Self {
        Self { conn, settings }
    }

    fn query(&self, sql: &str) -> Result<QueryResult> {
        debug!("store read: {sql}");
        self.conn.query(sql)
    }

    /// Names of every table in the configured database.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Connection`] if the store is unreachable.
    pub fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.query("SHOW TABLES")?.column_text(0))
    }

    /// Column names and store types of `table`, in table order.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotFound`] if the table does not exist.
    pub fn describe_table(&self, table: &str) -> Result<Vec<Column>> {
        validate_table_name(table)?;
        let result = self.query(&format!("DESCRIBE TABLE {table}"))?;
        if result.rows.is_empty() {
            return Err(TransferError::NotFound(format!(
                "table {table} does not exist"
            )));
        }
        let names = result.column_text(0);
        let types = result.column_text(1);
        Ok(names
            .into_iter()
            .zip(types)
            .map(|(name, store_type)| Column::from_store(name, store_type, ScanKind::Unknown))
            .collect())
    }

    /// [`describe_table`](Self::describe_table) as a [`TableDescriptor`].
    ///
    /// # Errors
    ///
    /// Same as [`describe_table`](Self::describe_table).
    pub fn describe(&self, table: &str) -> Result<TableDescriptor> {
        TableDescriptor::new(table, self.describe_table(table)?)
    }

    /// Check `requested` against the live columns of `table`.
    ///
    /// Returns the requested names unchanged when all of them exist.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::SchemaMismatch`] listing the requested
    /// columns that exist (in request order) and every one that does not.
    pub fn validate_columns(&self, table: &str, requested: &[String]) -> Result<Vec<String>> {
        let live = self.describe_table(table)?;
        let (valid, missing): (Vec<String>, Vec<String>) = requested
            .iter()
            .cloned()
            .partition(|name| live.iter().any(|c| c.name == *name));
        if missing.is_empty() {
            Ok(valid)
        } else {
            Err(TransferError::SchemaMismatch {
                table: table.to_string(),
                valid,
                missing,
            })
        }
    }

    /// Read `columns` of `table`. A `limit` of zero or less reads every row.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Validation`] for an empty column list,
    /// [`TransferError::SchemaMismatch`] for unknown columns, and
    /// [`TransferError::Query`] if the store rejects the statement.
    pub fn fetch(&self, table: &str, columns: &[String], limit: i64) -> Result<Vec<Row>> {
        if columns.is_empty() {
            return Err(TransferError::Validation(
                "no columns selected for fetch".into(),
            ));
        }
        let columns = self.validate_columns(table, columns)?;
        let sql = self.finish(format!("SELECT {} FROM {table}", columns.join(", ")), limit);
        let result = self.query(&sql)?;
        materialize(result, &columns)
    }

    /// Read `columns` from `tables` joined under `condition`.
    ///
    /// The condition is placed into the statement as given, so this is only
    /// allowed when [`Settings::allow_raw_join_condition`] is set.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Validation`] for fewer than two tables, an
    /// empty column list, or a disabled passthrough. None of these send a
    /// query. Returns [`TransferError::Query`] if the store rejects the join.
    pub fn join(
        &self,
        tables: &[String],
        condition: &str,
        columns: &[String],
        limit: i64,
    ) -> Result<Vec<Row>> {
        if tables.len() < 2 {
            return Err(TransferError::Validation(format!(
                "a join needs at least 2 tables, got {}",
                tables.len()
            )));
        }
        if columns.is_empty() {
            return Err(TransferError::Validation(
                "no columns selected for join".into(),
            ));
        }
        if !self.settings.allow_raw_join_condition {
            return Err(TransferError::Validation(
                "raw join conditions are disabled (allow_raw_join_condition = false)".into(),
            ));
        }
        for table in tables {
            validate_table_name(table)?;
        }
        warn!("passing join condition to the store unparsed: {condition}");
        let sql = self.finish(
            format!(
                "SELECT {} FROM {} ON {condition}",
                columns.join(", "),
                tables.join(" JOIN ")
            ),
            limit,
        );
        let result = self.query(&sql)?;
        materialize(result, columns)
    }

    fn finish(&self, mut sql: String, limit: i64) -> String {
        if limit > 0 {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if self.settings.introspection_settings {
            sql.push_str(INTROSPECTION);
        }
        sql
    }
}

/// Decode every cell and key rows by the selected names. If the store
/// returned a different number of columns, its own names are used.
fn materialize(result: QueryResult, selected: &[String]) -> Result<Vec<Row>> {
    let columns: Vec<Column> = result
        .columns
        .iter()
        .enumerate()
        .map(|(idx, meta)| {
            let name = if selected.len() == result.columns.len() {
                selected[idx].clone()
            } else {
                meta.name.clone()
            };
            Column::from_store(name, meta.type_name.clone(), meta.scan)
        })
        .collect();

    let mut rows = Vec::with_capacity(result.rows.len());
    for cells in &result.rows {
        let mut row = Row::with_capacity(columns.len());
        for (column, cell) in columns.iter().zip(cells) {
            row.insert(column.name.clone(), decode(column, cell)?);
        }
        rows.push(row);
    }
    Ok(rows)
}
