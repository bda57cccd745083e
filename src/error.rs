//! Error type shared by every transfer operation.
//!
//! All fallible operations in this crate return [`Result<T>`], whose error is
//! [`TransferError`]. Variants are grouped into coarse categories through
//! [`TransferError::kind`] so a transport layer can map them to responses
//! without matching on every variant:
//!
//! - `Connection` - store unreachable or credentials rejected
//! - `NotFound` - table or file absent
//! - `SchemaMismatch` - requested columns not present
//! - `NoData` - empty input to a write
//! - `Query` - execution-time failure of an accepted statement
//! - `File` - I/O failure on a flat file
//! - `Timeout` - deadline exceeded
//! - `Validation` / `Coercion` / `Config` - bad input
//!
//! Nothing in the crate retries; the first error aborts the request.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TransferError>;

/// Coarse error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    NotFound,
    SchemaMismatch,
    NoData,
    Query,
    File,
    Timeout,
    Validation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connection => "ConnectionError",
            Self::NotFound => "NotFoundError",
            Self::SchemaMismatch => "SchemaMismatchError",
            Self::NoData => "NoDataError",
            Self::Query => "QueryError",
            Self::File => "FileError",
            Self::Timeout => "TimeoutError",
            Self::Validation => "ValidationError",
        };
        f.write_str(s)
    }
}

/// Every failure a transfer can produce.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("columns not found in table {table}: {}", missing.join(", "))]
    SchemaMismatch {
        table: String,
        /// Requested columns that do exist, in request order.
        valid: Vec<String>,
        /// Every requested column that does not exist.
        missing: Vec<String>,
    },

    #[error("no data to import")]
    NoData,

    #[error("query failed: {0}")]
    Query(String),

    #[error("file error on {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("operation exceeded deadline of {0:?}")]
    Timeout(Duration),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("column {column}: cannot represent {found} as {expected}")]
    Coercion {
        column: String,
        expected: String,
        found: String,
    },

    #[error("failed to append row #{row} to batch ({appended} rows appended, none sent): {source}")]
    BatchAppend {
        row: usize,
        appended: usize,
        #[source]
        source: Box<TransferError>,
    },

    #[error("failed to send batch of {appended} rows: {message}")]
    BatchSend { appended: usize, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl TransferError {
    /// The coarse category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            Self::NoData => ErrorKind::NoData,
            Self::Query(_) | Self::BatchSend { .. } => ErrorKind::Query,
            Self::File { .. } | Self::Csv { .. } => ErrorKind::File,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Validation(_) | Self::Coercion { .. } | Self::Config(_) => {
                ErrorKind::Validation
            }
            Self::BatchAppend { source, .. } => source.kind(),
        }
    }

    /// Rows appended to a batch before the failure, for batch errors.
    #[must_use]
    pub const fn appended(&self) -> Option<usize> {
        match self {
            Self::BatchAppend { appended, .. } | Self::BatchSend { appended, .. } => {
                Some(*appended)
            }
            _ => None,
        }
    }

    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(format!("file does not exist: {}", path.display()));
        }
        Self::File { path, source }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}

impl From<anyhow::Error> for TransferError {
    fn from(err: anyhow::Error) -> Self {
        Self::Config(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_mismatch_lists_missing_names() {
        let err = TransferError::SchemaMismatch {
            table: "events".into(),
            valid: vec!["id".into()],
            missing: vec!["foo".into(), "bar".into()],
        };
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        assert_eq!(err.to_string(), "columns not found in table events: foo, bar");
    }

    #[test]
    fn batch_append_inherits_source_kind() {
        let err = TransferError::BatchAppend {
            row: 3,
            appended: 2,
            source: Box::new(TransferError::Coercion {
                column: "age".into(),
                expected: "Int64".into(),
                found: "String(\"x\")".into(),
            }),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.appended(), Some(2));
    }

    #[test]
    fn missing_file_maps_to_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = TransferError::file("/tmp/nope.csv", io);
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
