//! # tablebridge
//!
//! Move tabular data between a **ClickHouse-style columnar store** and
//! **delimited flat files**, in either direction, with optional multi-table
//! joins and previews.
//!
//! ## Key Features
//!
//! - **Typed cells** - store types map onto a closed [`TypeTag`] set through
//!   one ordered dispatch table, and every cell becomes a [`Value`]
//! - **Ordered rows** - a [`Row`] keeps its columns in a fixed order, so
//!   inferred schemas and default CSV headers are reproducible
//! - **Schema inference** - target tables are created on first import from
//!   the rows being written
//! - **Batched import** - one `INSERT .. FORMAT JSONEachRow` round trip per
//!   import, with coercion checked before anything is sent
//! - **Joins** - multi-table reads with a caller-supplied condition, behind an
//!   explicit opt-in
//! - **Flat files** - any single-byte delimiter, proper quoting, and a
//!   deterministic parallel writer (feature `parallel-io`)
//! - **Deadlines** - every operation runs against a [`Deadline`] and fails
//!   with [`TransferError::Timeout`] once it passes
//!
//! ## Quick Start
//!
//! ```no_run
//! use tablebridge::*;
//!
//! # fn main() -> tablebridge::Result<()> {
//! let store = ConnectionConfig::new("localhost", "8123").with_credentials("default", "");
//! let file = FlatFileConfig::new("data/people.csv");
//!
//! let req = TransferRequest::new(Endpoint::FlatFile(file), Endpoint::Store(store))
//!     .with_table("people_import");
//! let outcome = tablebridge::ingest(&req)?;
//! println!("imported {} rows", outcome.record_count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Request Flow
//!
//! Each request is **Fetch → Preview-or-Proceed → Write**:
//!
//! 1. The source is read in full ([`StoreReader::fetch`] or
//!    [`StoreReader::join`] for the store, [`FlatFile::read_all`] for a file).
//! 2. A preview returns a prefix of the rows and stops.
//! 3. Otherwise the rows go to the target ([`StoreWriter::import_rows`] or
//!    [`FlatFile::write`]).
//!
//! [`Transfer`] runs this against any [`Connector`]. The free functions
//! ([`list_tables`], [`describe_columns`], [`infer_file_schema`],
//! [`preview`], [`ingest`]) use the HTTP driver with settings read from
//! `TABLEBRIDGE_*` environment variables.
//!
//! ## Testing Without a Store
//!
//! [`MemoryStore`] interprets the statements the reader and writer emit,
//! records them, and can be told to fail:
//!
//! ```
//! use tablebridge::*;
//!
//! # fn main() -> tablebridge::Result<()> {
//! let store = MemoryStore::new();
//! let transfer = Transfer::new(store.clone(), Settings::default());
//! let cfg = ConnectionConfig::new("localhost", "8123");
//! assert!(transfer.list_tables(&cfg)?.is_empty());
//! assert_eq!(store.statements(), vec!["SHOW TABLES"]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `clickhouse-http` (default): the `reqwest` HTTP driver and the free
//!   functions
//! - `parallel-io` (default): rayon-backed parallel flat-file writes

pub mod config;
pub mod deadline;
pub mod error;
pub mod flatfile;
pub mod schema;
pub mod store;
pub mod testing;
pub mod transfer;
pub mod types;
pub mod value;

pub use config::{ConnectionConfig, FlatFileConfig, Settings};
pub use deadline::Deadline;
pub use error::{ErrorKind, Result, TransferError};
pub use flatfile::FlatFile;
pub use store::{
    Connector, MemoryStore, SchemaState, StoreConnection, StoreReader, StoreWriter,
};
pub use transfer::{Endpoint, IngestOutcome, Preview, Transfer, TransferRequest};
pub use types::{ScanKind, decode, encode};
pub use value::{Column, Row, TableDescriptor, TypeTag, Value};

#[cfg(feature = "clickhouse-http")]
pub use store::HttpConnector;
#[cfg(feature = "clickhouse-http")]
pub use transfer::{describe_columns, infer_file_schema, ingest, list_tables, preview};
