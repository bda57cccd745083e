//! The transfer orchestrator.
//!
//! Every request runs three phases on the caller's thread:
//!
//! 1. **Fetch** the whole source into memory: a join or single-table read
//!    for the store, or a full read for a flat file.
//! 2. **Preview-or-proceed**: a preview returns a prefix of the fetched rows
//!    and stops without touching the target.
//! 3. **Write** the fetched rows to the target: a batched import for the
//!    store, a truncating write for a flat file.
//!
//! Nothing persists between phases beyond the row set, and a failed write
//! is neither retried nor rolled back.

use crate::config::{ConnectionConfig, FlatFileConfig, Settings};
use crate::deadline::Deadline;
use crate::error::{Result, TransferError};
use crate::flatfile::FlatFile;
use crate::store::{Connector, StoreReader, StoreWriter};
use crate::value::{Column, Row};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One side of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Endpoint {
    Store(ConnectionConfig),
    FlatFile(FlatFileConfig),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(cfg) => write!(f, "store {}", cfg.base_url()),
            Self::FlatFile(cfg) => write!(f, "file {}", cfg.file_name),
        }
    }
}

/// What to move, from where, to where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub source: Endpoint,
    pub target: Endpoint,
    /// Source table for a single-table store read, and the target table for
    /// a store write.
    #[serde(default)]
    pub table_name: String,
    #[serde(default)]
    pub selected_tables: Vec<String>,
    #[serde(default)]
    pub join_condition: String,
    #[serde(default)]
    pub selected_columns: Vec<String>,
    #[serde(default)]
    pub preview_only: bool,
    /// Non-positive means the configured default.
    #[serde(default)]
    pub preview_limit: i64,
}

impl TransferRequest {
    pub fn new(source: Endpoint, target: Endpoint) -> Self {
        Self {
            source,
            target,
            table_name: String::new(),
            selected_tables: Vec::new(),
            join_condition: String::new(),
            selected_columns: Vec::new(),
            preview_only: false,
            preview_limit: 0,
        }
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table_name = table.into();
        self
    }

    #[must_use]
    pub fn with_join<I, S>(mut self, tables: I, condition: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_tables = tables.into_iter().map(Into::into).collect();
        self.join_condition = condition.into();
        self
    }

    #[must_use]
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn preview_only(mut self, limit: i64) -> Self {
        self.preview_only = true;
        self.preview_limit = limit;
        self
    }

    /// Whether the store source is read through a join.
    #[must_use]
    pub fn is_join(&self) -> bool {
        self.selected_tables.len() > 1 && !self.join_condition.is_empty()
    }

    /// The table a single-table store read uses.
    #[must_use]
    pub fn source_table(&self) -> &str {
        if self.table_name.is_empty() {
            self.selected_tables.first().map_or("", String::as_str)
        } else {
            &self.table_name
        }
    }
}

/// A row-limited look at a source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub rows: Vec<Row>,
    /// Rows the source produced before truncation.
    pub total: usize,
}

/// Result of [`Transfer::ingest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum IngestOutcome {
    Previewed(Preview),
    Written { records: usize },
}

impl IngestOutcome {
    /// Rows written, or rows fetched for a preview.
    #[must_use]
    pub const fn record_count(&self) -> usize {
        match self {
            Self::Previewed(p) => p.total,
            Self::Written { records } => *records,
        }
    }
}

/// Runs transfer requests against stores opened by `C`.
#[derive(Debug, Clone)]
pub struct Transfer<C> {
    connector: C,
    settings: Settings,
}

impl<C: Connector> Transfer<C> {
    pub const fn new(connector: C, settings: Settings) -> Self {
        Self {
            connector,
            settings,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub const fn connector(&self) -> &C {
        &self.connector
    }

    fn metadata_deadline(&self) -> Deadline {
        Deadline::after(self.settings.metadata_timeout())
    }

    /// Tables in the configured database.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Connection`] if the store cannot be reached.
    pub fn list_tables(&self, config: &ConnectionConfig) -> Result<Vec<String>> {
        let conn = self.connector.connect(config, self.metadata_deadline())?;
        StoreReader::new(&conn, &self.settings).list_tables()
    }

    /// Columns of `table` with their store types.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotFound`] for a missing table.
    pub fn describe_columns(&self, config: &ConnectionConfig, table: &str) -> Result<Vec<Column>> {
        let conn = self.connector.connect(config, self.metadata_deadline())?;
        StoreReader::new(&conn, &self.settings).describe_table(table)
    }

    /// The header of a flat file as `String` columns.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::NotFound`] if the file does not exist.
    pub fn infer_file_schema(&self, config: &FlatFileConfig) -> Result<Vec<Column>> {
        let file = FlatFile::new(config, &self.settings, self.metadata_deadline())?;
        file.validate()?;
        file.schema()
    }

    fn preview_limit(&self, requested: i64) -> usize {
        usize::try_from(requested)
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(self.settings.default_preview_limit)
    }

    /// Read at most `preview_limit` rows from the source. The target is not
    /// touched.
    ///
    /// # Errors
    ///
    /// Propagates source failures.
    pub fn preview(&self, req: &TransferRequest) -> Result<Preview> {
        let deadline = self.metadata_deadline();
        let limit = self.preview_limit(req.preview_limit);
        let rows = match &req.source {
            Endpoint::Store(cfg) => {
                let limit = i64::try_from(limit).unwrap_or(i64::MAX);
                self.read_store(cfg, req, limit, deadline)?
            }
            Endpoint::FlatFile(cfg) => FlatFile::new(cfg, &self.settings, deadline)?.preview(limit)?,
        };
        info!("previewed {} rows from {}", rows.len(), req.source);
        let total = rows.len();
        Ok(Preview { rows, total })
    }

    /// Fetch the whole source, then either return a preview of it or write
    /// it to the target.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Validation`] for a store target without a
    /// table name, [`TransferError::NoData`] when there is nothing to import
    /// into the store, and propagates source and target failures.
    pub fn ingest(&self, req: &TransferRequest) -> Result<IngestOutcome> {
        let deadline = Deadline::after(self.settings.ingest_timeout());
        if !req.preview_only
            && matches!(req.target, Endpoint::Store(_))
            && req.table_name.is_empty()
        {
            return Err(TransferError::Validation(
                "a store target needs a table name".into(),
            ));
        }

        let rows = match &req.source {
            Endpoint::Store(cfg) => self.read_store(cfg, req, 0, deadline)?,
            Endpoint::FlatFile(cfg) => {
                FlatFile::new(cfg, &self.settings, deadline)?.read_all(&req.selected_columns)?
            }
        };
        info!("fetched {} rows from {}", rows.len(), req.source);

        if req.preview_only {
            let total = rows.len();
            let limit = self.preview_limit(req.preview_limit).min(total);
            let rows = rows.into_iter().take(limit).collect();
            return Ok(IngestOutcome::Previewed(Preview { rows, total }));
        }

        let records = match &req.target {
            Endpoint::Store(cfg) => {
                let conn = self.connector.connect(cfg, deadline)?;
                StoreWriter::new(&conn).import_rows(&req.table_name, &rows)?
            }
            Endpoint::FlatFile(cfg) => {
                FlatFile::new(cfg, &self.settings, deadline)?.write(&rows, &req.selected_columns)?
            }
        };
        info!("wrote {records} rows to {}", req.target);
        Ok(IngestOutcome::Written { records })
    }

    fn read_store(
        &self,
        cfg: &ConnectionConfig,
        req: &TransferRequest,
        limit: i64,
        deadline: Deadline,
    ) -> Result<Vec<Row>> {
        let conn = self.connector.connect(cfg, deadline)?;
        let reader = StoreReader::new(&conn, &self.settings);
        if req.is_join() {
            reader.join(
                &req.selected_tables,
                &req.join_condition,
                &req.selected_columns,
                limit,
            )
        } else {
            reader.fetch(req.source_table(), &req.selected_columns, limit)
        }
    }
}

#[cfg(feature = "clickhouse-http")]
fn http_transfer() -> Result<Transfer<crate::store::HttpConnector>> {
    let settings = Settings::from_env()?;
    let connector = crate::store::HttpConnector::new(settings.user_agent.clone());
    Ok(Transfer::new(connector, settings))
}

/// [`Transfer::list_tables`] over HTTP with settings from the environment.
///
/// # Errors
///
/// See [`Transfer::list_tables`].
#[cfg(feature = "clickhouse-http")]
pub fn list_tables(config: &ConnectionConfig) -> Result<Vec<String>> {
    http_transfer()?.list_tables(config)
}

/// [`Transfer::describe_columns`] over HTTP with settings from the environment.
///
/// # Errors
///
/// See [`Transfer::describe_columns`].
#[cfg(feature = "clickhouse-http")]
pub fn describe_columns(config: &ConnectionConfig, table: &str) -> Result<Vec<Column>> {
    http_transfer()?.describe_columns(config, table)
}

/// [`Transfer::infer_file_schema`] with settings from the environment.
///
/// # Errors
///
/// See [`Transfer::infer_file_schema`].
#[cfg(feature = "clickhouse-http")]
pub fn infer_file_schema(config: &FlatFileConfig) -> Result<Vec<Column>> {
    http_transfer()?.infer_file_schema(config)
}

/// [`Transfer::preview`] over HTTP with settings from the environment.
///
/// # Errors
///
/// See [`Transfer::preview`].
#[cfg(feature = "clickhouse-http")]
pub fn preview(req: &TransferRequest) -> Result<Preview> {
    http_transfer()?.preview(req)
}

/// [`Transfer::ingest`] over HTTP with settings from the environment.
///
/// # Errors
///
/// See [`Transfer::ingest`].
#[cfg(feature = "clickhouse-http")]
pub fn ingest(req: &TransferRequest) -> Result<IngestOutcome> {
    http_transfer()?.ingest(req)
}
