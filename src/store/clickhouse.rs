//! ClickHouse driver over the HTTP interface.
//!
//! Statements are POSTed to `/` with `default_format=JSONCompact`, so every
//! read comes back as `{"meta": [{"name", "type"}], "data": [[..]]}`.
//! Batches are sent as `INSERT .. FORMAT JSONEachRow` with the rows as the
//! request body. Credentials travel in the `X-ClickHouse-User` and
//! `X-ClickHouse-Key` headers; the caller's token is forwarded unchanged.
//!
//! The blocking `reqwest` client does the I/O. Each request gets the time
//! left on the connection's [`Deadline`] as its timeout.

use super::traits::{Batch, Connector, QueryResult, StoreConnection};
use crate::config::ConnectionConfig;
use crate::deadline::Deadline;
use crate::error::{Result, TransferError};
use log::{debug, info};
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value as Json;
use std::sync::LazyLock;

/// ClickHouse `UNKNOWN_TABLE`.
const UNKNOWN_TABLE: u32 = 60;
/// `UNKNOWN_USER`, `WRONG_PASSWORD`, `REQUIRED_PASSWORD`, `AUTHENTICATION_FAILED`.
const AUTH_FAILURES: [u32; 4] = [192, 193, 194, 516];

static ERROR_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Code: (\d+)").unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

#[derive(Debug, Deserialize)]
struct CompactMeta {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
}

#[derive(Debug, Deserialize)]
struct CompactResponse {
    #[serde(default)]
    meta: Vec<CompactMeta>,
    #[serde(default)]
    data: Vec<Vec<Json>>,
}

/// Opens [`ClickHouseConnection`]s.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    user_agent: String,
}

impl HttpConnector {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new(crate::config::Settings::default().user_agent)
    }
}

impl Connector for HttpConnector {
    type Connection = ClickHouseConnection;

    fn connect(&self, config: &ConnectionConfig, deadline: Deadline) -> Result<ClickHouseConnection> {
        config.validate()?;
        let client = Client::builder()
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| TransferError::Connection(format!("build HTTP client: {e}")))?;
        let conn = ClickHouseConnection {
            client,
            base_url: config.base_url(),
            database: config.database.clone(),
            username: config.username.clone(),
            token: config.jwt_token.clone(),
            deadline,
        };
        conn.ping()?;
        info!("connected to ClickHouse at {}", conn.base_url);
        Ok(conn)
    }
}

/// One verified HTTP connection context.
pub struct ClickHouseConnection {
    client: Client,
    base_url: String,
    database: String,
    username: String,
    token: String,
    deadline: Deadline,
}

impl Drop for ClickHouseConnection {
    fn drop(&mut self) {
        debug!("released ClickHouse connection to {}", self.base_url);
    }
}

impl ClickHouseConnection {
    fn authorized(&self, req: RequestBuilder) -> Result<RequestBuilder> {
        let mut req = req.timeout(self.deadline.remaining()?);
        if !self.username.is_empty() {
            req = req.header("X-ClickHouse-User", &self.username);
        }
        if !self.token.is_empty() {
            req = req.header("X-ClickHouse-Key", &self.token);
        }
        Ok(req)
    }

    fn ping(&self) -> Result<()> {
        let req = self.authorized(self.client.get(format!("{}/ping", self.base_url)))?;
        let resp = req.send().map_err(|e| self.transport_error(&e, true))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(TransferError::Connection(format!(
                "ping {} returned {}",
                self.base_url,
                resp.status()
            )))
        }
    }

    fn params<'a>(&'a self, query: Option<&'a str>) -> Vec<(&'static str, &'a str)> {
        let mut params = vec![("default_format", "JSONCompact")];
        if !self.database.is_empty() {
            params.push(("database", self.database.as_str()));
        }
        if let Some(q) = query {
            params.push(("query", q));
        }
        params
    }

    /// POST `body`; `query` goes in the URL when the body carries data.
    fn post(&self, query: Option<&str>, body: String) -> Result<String> {
        let req = self
            .client
            .post(format!("{}/", self.base_url))
            .query(&self.params(query))
            .body(body);
        let resp = self
            .authorized(req)?
            .send()
            .map_err(|e| self.transport_error(&e, true))?;
        let status = resp.status();
        let text = resp.text().map_err(|e| self.transport_error(&e, false))?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(classify_server_error(&text, status.as_u16()))
        }
    }

    fn transport_error(&self, err: &reqwest::Error, before_response: bool) -> TransferError {
        if err.is_timeout() {
            TransferError::Timeout(self.deadline.budget())
        } else if before_response || err.is_connect() {
            TransferError::Connection(format!("{}: {err}", self.base_url))
        } else {
            TransferError::Query(err.to_string())
        }
    }
}

fn classify_server_error(body: &str, status: u16) -> TransferError {
    let message = format!("HTTP {status}: {}", body.trim());
    let code = ERROR_CODE
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok());
    match code {
        Some(UNKNOWN_TABLE) => TransferError::NotFound(message),
        Some(c) if AUTH_FAILURES.contains(&c) => TransferError::Connection(message),
        _ if status == 401 || status == 403 => TransferError::Connection(message),
        _ => TransferError::Query(message),
    }
}

impl StoreConnection for ClickHouseConnection {
    fn query(&self, sql: &str) -> Result<QueryResult> {
        debug!("query: {sql}");
        let text = self.post(None, sql.to_string())?;
        let parsed: CompactResponse = serde_json::from_str(&text)
            .map_err(|e| TransferError::Query(format!("decode JSONCompact response: {e}")))?;
        let columns = parsed
            .meta
            .into_iter()
            .map(|m| (m.name, m.type_name))
            .collect();
        Ok(QueryResult::new(columns, parsed.data))
    }

    fn execute(&self, sql: &str) -> Result<()> {
        debug!("execute: {sql}");
        self.post(None, sql.to_string()).map(drop)
    }

    fn send(&self, batch: &Batch) -> Result<()> {
        let statement = batch.statement();
        debug!("send: {statement} ({} rows)", batch.len());
        self.post(Some(&statement), batch.to_json_each_row()).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn server_errors_are_classified_by_code() {
        let missing = "Code: 60. DB::Exception: Table default.nope does not exist. (UNKNOWN_TABLE)";
        assert_eq!(classify_server_error(missing, 404).kind(), ErrorKind::NotFound);
        let auth = "Code: 516. DB::Exception: default: Authentication failed";
        assert_eq!(classify_server_error(auth, 401).kind(), ErrorKind::Connection);
        let syntax = "Code: 62. DB::Exception: Syntax error";
        assert_eq!(classify_server_error(syntax, 400).kind(), ErrorKind::Query);
    }

    #[test]
    fn unreachable_store_is_a_connection_error() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let cfg = ConnectionConfig::new("127.0.0.1", "9");
        let err = HttpConnector::default()
            .connect(&cfg, Deadline::after(std::time::Duration::from_secs(5)))
            .err()
            .map(|e| e.kind());
        assert!(matches!(err, Some(ErrorKind::Connection | ErrorKind::Timeout)));
    }

    #[test]
    fn compact_response_parses() {
        let text = r#"{"meta":[{"name":"id","type":"UInt64"}],"data":[["7"]],"rows":1}"#;
        let parsed: CompactResponse = serde_json::from_str(text).unwrap();
        assert_eq!(parsed.meta[0].type_name, "UInt64");
        assert_eq!(parsed.data, vec![vec![Json::String("7".into())]]);
    }
}
