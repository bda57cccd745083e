//! In-memory store for tests.
//!
//! [`MemoryStore`] is both a [`Connector`] and, through [`MemoryConnection`],
//! a [`StoreConnection`]. All clones share state, so a test can hand one clone
//! to the orchestrator and inspect the other afterwards.
//!
//! It understands exactly the statement shapes the reader and writer emit:
//!
//! - `SHOW TABLES`
//! - `DESCRIBE TABLE t`
//! - `EXISTS TABLE t`
//! - `SELECT a, b FROM t [LIMIT n] [SETTINGS ..]`
//! - `CREATE TABLE IF NOT EXISTS t (a T, ..) ENGINE = ..`
//!
//! plus [`Batch`] sends. Join queries are answered from canned results
//! registered with [`MemoryStore::with_canned`]. Every statement is recorded
//! and can be read back with [`MemoryStore::statements`].

use super::traits::{Batch, Connector, QueryResult, StoreConnection};
use crate::config::ConnectionConfig;
use crate::deadline::Deadline;
use crate::error::{Result, TransferError};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
struct MemTable {
    /// `(name, store type)` in declaration order.
    columns: Vec<(String, String)>,
    rows: Vec<Vec<Json>>,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, MemTable>,
    statements: Vec<String>,
    canned: Vec<(String, QueryResult)>,
    connects: usize,
    open: usize,
    fail_connect: Option<String>,
    fail_query: Option<(String, String)>,
    fail_send: Option<String>,
}

/// Shared, in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Add (or replace) a table. `schema` is `(name, store type)` pairs.
    #[must_use]
    pub fn with_table(self, name: &str, schema: &[(&str, &str)], rows: Vec<Vec<Json>>) -> Self {
        let table = MemTable {
            columns: schema
                .iter()
                .map(|(n, t)| ((*n).to_string(), (*t).to_string()))
                .collect(),
            rows,
        };
        self.lock().tables.insert(name.to_string(), table);
        self
    }

    /// Answer any query containing `needle` with `result`.
    #[must_use]
    pub fn with_canned(self, needle: &str, result: QueryResult) -> Self {
        self.lock().canned.push((needle.to_string(), result));
        self
    }

    /// Make every connect attempt fail with a connection error.
    #[must_use]
    pub fn failing_connect(self, message: &str) -> Self {
        self.lock().fail_connect = Some(message.to_string());
        self
    }

    /// Make statements containing `needle` fail with a query error.
    #[must_use]
    pub fn failing_query(self, needle: &str, message: &str) -> Self {
        self.lock().fail_query = Some((needle.to_string(), message.to_string()));
        self
    }

    /// Make batch sends fail with `message`.
    #[must_use]
    pub fn failing_send(self, message: &str) -> Self {
        self.lock().fail_send = Some(message.to_string());
        self
    }

    /// Every statement executed so far, in order. Batch sends appear as their
    /// `INSERT` statement.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// Number of successful connects.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Number of connections currently open (not yet dropped).
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.lock().open
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.lock().tables.keys().cloned().collect()
    }

    /// `(name, store type)` pairs of a table, if it exists.
    #[must_use]
    pub fn schema(&self, table: &str) -> Option<Vec<(String, String)>> {
        self.lock().tables.get(table).map(|t| t.columns.clone())
    }

    /// Stored rows of a table, if it exists.
    #[must_use]
    pub fn rows(&self, table: &str) -> Option<Vec<Vec<Json>>> {
        self.lock().tables.get(table).map(|t| t.rows.clone())
    }
}

impl Connector for MemoryStore {
    type Connection = MemoryConnection;

    fn connect(&self, config: &ConnectionConfig, deadline: Deadline) -> Result<MemoryConnection> {
        deadline.check()?;
        config.validate()?;
        let mut state = self.lock();
        if let Some(message) = &state.fail_connect {
            return Err(TransferError::Connection(message.clone()));
        }
        state.connects += 1;
        state.open += 1;
        drop(state);
        Ok(MemoryConnection {
            store: self.clone(),
            deadline,
        })
    }
}

/// A connection handle onto a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryConnection {
    store: MemoryStore,
    deadline: Deadline,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let mut state = self.store.lock();
        state.open = state.open.saturating_sub(1);
    }
}

impl MemoryConnection {
    fn begin(&self, sql: &str) -> Result<MutexGuard<'_, State>> {
        self.deadline.check()?;
        let mut state = self.store.lock();
        state.statements.push(sql.to_string());
        if let Some((needle, message)) = &state.fail_query
            && sql.contains(needle.as_str())
        {
            return Err(TransferError::Query(message.clone()));
        }
        Ok(state)
    }
}

impl StoreConnection for MemoryConnection {
    fn query(&self, sql: &str) -> Result<QueryResult> {
        let state = self.begin(sql)?;
        if let Some((_, canned)) = state.canned.iter().find(|(n, _)| sql.contains(n.as_str())) {
            return Ok(canned.clone());
        }
        let trimmed = sql.trim().trim_end_matches(';');
        let upper = trimmed.to_ascii_uppercase();

        if upper == "SHOW TABLES" {
            let rows = state
                .tables
                .keys()
                .map(|k| vec![Json::String(k.clone())])
                .collect();
            return Ok(QueryResult::new(
                vec![("name".into(), "String".into())],
                rows,
            ));
        }
        if let Some(name) = strip_keyword(trimmed, "DESCRIBE TABLE ") {
            let table = lookup(&state, name)?;
            let rows = table
                .columns
                .iter()
                .map(|(n, t)| {
                    let mut row = vec![Json::String(n.clone()), Json::String(t.clone())];
                    row.extend(std::iter::repeat_n(Json::String(String::new()), 5));
                    row
                })
                .collect();
            let meta = [
                "name",
                "type",
                "default_type",
                "default_expression",
                "comment",
                "codec_expression",
                "ttl_expression",
            ]
            .iter()
            .map(|n| ((*n).to_string(), "String".to_string()))
            .collect();
            return Ok(QueryResult::new(meta, rows));
        }
        if let Some(name) = strip_keyword(trimmed, "EXISTS TABLE ") {
            let exists = u8::from(state.tables.contains_key(name.trim()));
            return Ok(QueryResult::new(
                vec![("result".into(), "UInt8".into())],
                vec![vec![Json::from(exists)]],
            ));
        }
        if upper.starts_with("SELECT ") {
            if upper.contains(" JOIN ") {
                return Err(TransferError::Query(format!(
                    "no canned result for join query: {sql}"
                )));
            }
            return select(&state, trimmed);
        }
        Err(TransferError::Query(format!("unsupported statement: {sql}")))
    }

    fn execute(&self, sql: &str) -> Result<()> {
        let mut state = self.begin(sql)?;
        let trimmed = sql.trim();
        let Some(rest) = strip_keyword(trimmed, "CREATE TABLE IF NOT EXISTS ") else {
            return Err(TransferError::Query(format!("unsupported statement: {sql}")));
        };
        let open = rest
            .find('(')
            .ok_or_else(|| TransferError::Query(format!("malformed CREATE: {sql}")))?;
        let close = rest
            .rfind(") ENGINE")
            .ok_or_else(|| TransferError::Query(format!("malformed CREATE: {sql}")))?;
        let name = rest[..open].trim().to_string();
        let columns = split_top_level(&rest[open + 1..close])
            .into_iter()
            .filter_map(|def| {
                let (n, t) = def.trim().split_once(' ')?;
                Some((n.to_string(), t.trim().to_string()))
            })
            .collect();
        state.tables.entry(name).or_insert(MemTable {
            columns,
            rows: Vec::new(),
        });
        Ok(())
    }

    fn send(&self, batch: &Batch) -> Result<()> {
        let mut state = self.begin(&batch.statement())?;
        if let Some(message) = &state.fail_send {
            return Err(TransferError::Query(message.clone()));
        }
        let table = state.tables.get_mut(&batch.table).ok_or_else(|| {
            TransferError::NotFound(format!("table {} does not exist", batch.table))
        })?;
        let mut positions = Vec::with_capacity(table.columns.len());
        for (name, _) in &table.columns {
            positions.push(batch.columns.iter().position(|c| c == name));
        }
        for col in &batch.columns {
            if !table.columns.iter().any(|(n, _)| n == col) {
                return Err(TransferError::Query(format!(
                    "no such column {col} in table {}",
                    batch.table
                )));
            }
        }
        for row in &batch.rows {
            let stored = positions
                .iter()
                .map(|p| p.and_then(|i| row.get(i).cloned()).unwrap_or(Json::Null))
                .collect();
            table.rows.push(stored);
        }
        Ok(())
    }
}

fn strip_keyword<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let head = sql.get(..keyword.len())?;
    head.eq_ignore_ascii_case(keyword)
        .then(|| sql[keyword.len()..].trim())
}

fn lookup<'a>(state: &'a State, name: &str) -> Result<&'a MemTable> {
    state
        .tables
        .get(name.trim())
        .ok_or_else(|| TransferError::NotFound(format!("table {} does not exist", name.trim())))
}

/// Split on commas that are not nested inside parentheses.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < s.len() {
        parts.push(&s[start..]);
    }
    parts
}

fn select(state: &State, sql: &str) -> Result<QueryResult> {
    let body = &sql["SELECT ".len()..];
    let upper = body.to_ascii_uppercase();
    let from = upper
        .find(" FROM ")
        .ok_or_else(|| TransferError::Query(format!("malformed SELECT: {sql}")))?;
    let projection: Vec<&str> = body[..from].split(',').map(str::trim).collect();
    let mut tail = body[from + " FROM ".len()..].split_whitespace();
    let table_name = tail
        .next()
        .ok_or_else(|| TransferError::Query(format!("malformed SELECT: {sql}")))?;
    let mut limit = None;
    while let Some(tok) = tail.next() {
        if tok.eq_ignore_ascii_case("LIMIT") {
            limit = tail.next().and_then(|n| n.parse::<usize>().ok());
        }
    }

    let table = lookup(state, table_name)?;
    let mut indices = Vec::with_capacity(projection.len());
    let mut meta = Vec::with_capacity(projection.len());
    for col in &projection {
        let idx = table
            .columns
            .iter()
            .position(|(n, _)| n == col)
            .ok_or_else(|| {
                TransferError::Query(format!("Missing columns: '{col}' in table {table_name}"))
            })?;
        indices.push(idx);
        meta.push(table.columns[idx].clone());
    }
    let rows = table
        .rows
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|r| indices.iter().map(|&i| r.get(i).cloned().unwrap_or(Json::Null)).collect())
        .collect();
    Ok(QueryResult::new(meta, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conn(store: &MemoryStore) -> MemoryConnection {
        store
            .connect(&ConnectionConfig::new("localhost", "8123"), Deadline::unbounded())
            .expect("connect")
    }

    #[test]
    fn select_projects_and_limits() -> Result<()> {
        let store = MemoryStore::new().with_table(
            "t",
            &[("a", "Int32"), ("b", "String")],
            vec![vec![json!(1), json!("x")], vec![json!(2), json!("y")]],
        );
        let r = conn(&store).query("SELECT b FROM t LIMIT 1 SETTINGS allow_introspection_functions=1")?;
        assert_eq!(r.rows, vec![vec![json!("x")]]);
        assert_eq!(r.columns[0].type_name, "String");
        Ok(())
    }

    #[test]
    fn create_parses_nested_types() -> Result<()> {
        let store = MemoryStore::new();
        conn(&store).execute(
            "CREATE TABLE IF NOT EXISTS t (a Decimal(38, 10), b Array(String)) ENGINE = MergeTree() ORDER BY tuple()",
        )?;
        assert_eq!(
            store.schema("t"),
            Some(vec![
                ("a".to_string(), "Decimal(38, 10)".to_string()),
                ("b".to_string(), "Array(String)".to_string()),
            ])
        );
        Ok(())
    }

    #[test]
    fn dropped_connection_is_released() {
        let store = MemoryStore::new();
        {
            let _c = conn(&store);
            assert_eq!(store.open_connections(), 1);
        }
        assert_eq!(store.open_connections(), 0);
        assert_eq!(store.connects(), 1);
    }
}
