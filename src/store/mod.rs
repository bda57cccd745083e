//! Reading from and writing to the columnar store.
//!
//! - [`traits`]: the [`Connector`] / [`StoreConnection`] seam
//! - [`reader`]: metadata, validated fetches, and joins
//! - [`writer`]: table creation and batched import
//! - [`memory`]: an in-memory store for tests
//! - `clickhouse`: the HTTP driver (feature `clickhouse-http`)

#[cfg(feature = "clickhouse-http")]
pub mod clickhouse;
pub mod memory;
pub mod reader;
pub mod traits;
pub mod writer;

#[cfg(feature = "clickhouse-http")]
pub use clickhouse::{ClickHouseConnection, HttpConnector};
pub use memory::{MemoryConnection, MemoryStore};
pub use reader::StoreReader;
pub use traits::{Batch, ColumnMeta, Connector, QueryResult, StoreConnection, validate_table_name};
pub use writer::{SchemaState, StoreWriter, sanitize_column_name};
