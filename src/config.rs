//! Connection, file, and process settings.
//!
//! Nothing here is global. A [`ConnectionConfig`] or [`FlatFileConfig`]
//! travels inside each request, and a [`Settings`] value is handed to the
//! orchestrator when it is built.
//!
//! [`Settings`] can come from three places, later ones overriding earlier:
//!
//! 1. [`Settings::default`]
//! 2. a TOML file ([`Settings::load`]) or string ([`Settings::from_toml_str`])
//! 3. `TABLEBRIDGE_*` environment variables ([`Settings::apply_env`])
//!
//! ```toml
//! metadata_timeout_secs = 30
//! ingest_timeout_secs = 300
//! default_preview_limit = 100
//! allow_raw_join_condition = false
//! ```

use crate::error::{Result, TransferError};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "TABLEBRIDGE_";

// ============================================================================
// Store connection
// ============================================================================

/// Where and as whom to reach the store.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: String,
    pub database: String,
    pub username: String,
    /// Caller-supplied credential, forwarded to the store verbatim.
    pub jwt_token: String,
    pub is_https: bool,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, token: impl Into<String>) -> Self {
        self.username = username.into();
        self.jwt_token = token.into();
        self
    }

    #[must_use]
    pub const fn with_https(mut self, is_https: bool) -> Self {
        self.is_https = is_https;
        self
    }

    /// `scheme://host:port`.
    #[must_use]
    pub fn base_url(&self) -> String {
        let scheme = if self.is_https { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Reject configs with nothing to connect to.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Validation`] if host or port is empty or the
    /// port is not a number.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(TransferError::Validation("store host is empty".into()));
        }
        if self.port.trim().parse::<u16>().is_err() {
            return Err(TransferError::Validation(format!(
                "store port {:?} is not a valid port number",
                self.port
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("jwt_token", &"<redacted>")
            .field("is_https", &self.is_https)
            .finish()
    }
}

// ============================================================================
// Flat file
// ============================================================================

fn default_delimiter() -> String {
    ",".to_string()
}

const fn default_true() -> bool {
    true
}

/// Path and dialect of a delimited file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatFileConfig {
    pub file_name: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Always treated as true: the first line names the columns.
    #[serde(default = "default_true")]
    pub has_header: bool,
}

impl FlatFileConfig {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            delimiter: default_delimiter(),
            has_header: true,
        }
    }

    #[must_use]
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// The delimiter as a single byte. An empty delimiter means comma.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Validation`] unless the delimiter is exactly
    /// one ASCII character.
    pub fn delimiter_byte(&self) -> Result<u8> {
        match self.delimiter.as_bytes() {
            [] => Ok(b','),
            [b] if b.is_ascii() => Ok(*b),
            _ => Err(TransferError::Validation(format!(
                "delimiter {:?} must be a single ASCII character",
                self.delimiter
            ))),
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Process-level knobs shared by every request an orchestrator serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Deadline for listing, describing, schema inference, and previews.
    pub metadata_timeout_secs: u64,
    /// Deadline for a full ingestion (fetch plus write).
    pub ingest_timeout_secs: u64,
    /// Preview row limit when a request does not give a positive one.
    pub default_preview_limit: usize,
    /// Allow join conditions to be passed to the store unparsed.
    pub allow_raw_join_condition: bool,
    /// Append `SETTINGS allow_introspection_functions=1` to reads.
    pub introspection_settings: bool,
    /// Row count above which file writes encode in parallel.
    pub parallel_write_threshold: usize,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            metadata_timeout_secs: 30,
            ingest_timeout_secs: 300,
            default_preview_limit: 100,
            allow_raw_join_condition: false,
            introspection_settings: true,
            parallel_write_threshold: 50_000,
            user_agent: concat!("tablebridge/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Settings {
    #[must_use]
    pub const fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    #[must_use]
    pub const fn ingest_timeout(&self) -> Duration {
        Duration::from_secs(self.ingest_timeout_secs)
    }

    #[must_use]
    pub const fn with_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout_secs = timeout.as_secs();
        self
    }

    #[must_use]
    pub const fn with_ingest_timeout(mut self, timeout: Duration) -> Self {
        self.ingest_timeout_secs = timeout.as_secs();
        self
    }

    #[must_use]
    pub const fn with_raw_join_condition(mut self, allow: bool) -> Self {
        self.allow_raw_join_condition = allow;
        self
    }

    #[must_use]
    pub const fn with_default_preview_limit(mut self, limit: usize) -> Self {
        self.default_preview_limit = limit;
        self
    }

    #[must_use]
    pub const fn with_parallel_write_threshold(mut self, rows: usize) -> Self {
        self.parallel_write_threshold = rows;
        self
    }

    /// Parse settings from TOML text. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Config`] if the text is not valid TOML or a
    /// key has the wrong type.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| TransferError::Config(e.to_string()))
    }

    /// Load settings from a TOML file, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Config`] if the file cannot be read or parsed,
    /// or an override is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read settings {}", path.display()))?;
        let settings: Self = toml::from_str(&text)
            .with_context(|| format!("parse settings {}", path.display()))?;
        settings.apply_env()
    }

    /// Defaults with environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Config`] if an override is malformed.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    /// Override fields from `TABLEBRIDGE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Config`] if a variable cannot be parsed.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(std::env::vars())
    }

    /// Override fields from an explicit set of `(key, value)` pairs.
    ///
    /// Keys carry the [`ENV_PREFIX`]; unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Config`] if a value cannot be parsed.
    pub fn apply_vars<I, K, V>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match name.to_ascii_lowercase().as_str() {
                "metadata_timeout_secs" => self.metadata_timeout_secs = parse_var(name, value)?,
                "ingest_timeout_secs" => self.ingest_timeout_secs = parse_var(name, value)?,
                "default_preview_limit" => self.default_preview_limit = parse_var(name, value)?,
                "allow_raw_join_condition" => {
                    self.allow_raw_join_condition = parse_var(name, value)?;
                }
                "introspection_settings" => self.introspection_settings = parse_var(name, value)?,
                "parallel_write_threshold" => {
                    self.parallel_write_threshold = parse_var(name, value)?;
                }
                "user_agent" => self.user_agent = value.to_string(),
                _ => {}
            }
        }
        Ok(self)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        TransferError::Config(format!("{ENV_PREFIX}{name}: cannot parse {value:?}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_only_given_keys() -> Result<()> {
        let s = Settings::from_toml_str("ingest_timeout_secs = 10\nallow_raw_join_condition = true")?;
        assert_eq!(s.ingest_timeout(), Duration::from_secs(10));
        assert!(s.allow_raw_join_condition);
        assert_eq!(s.default_preview_limit, 100);
        Ok(())
    }

    #[test]
    fn env_style_vars_override() -> Result<()> {
        let s = Settings::default().apply_vars([
            ("TABLEBRIDGE_DEFAULT_PREVIEW_LIMIT", "5"),
            ("TABLEBRIDGE_ALLOW_RAW_JOIN_CONDITION", "true"),
            ("PATH", "/usr/bin"),
        ])?;
        assert_eq!(s.default_preview_limit, 5);
        assert!(s.allow_raw_join_condition);
        Ok(())
    }

    #[test]
    fn malformed_var_is_config_error() {
        let err = Settings::default()
            .apply_vars([("TABLEBRIDGE_INGEST_TIMEOUT_SECS", "soon")])
            .unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));
    }

    #[test]
    fn delimiter_must_be_one_ascii_char() {
        assert_eq!(FlatFileConfig::new("a.csv").delimiter_byte().unwrap(), b',');
        assert_eq!(
            FlatFileConfig::new("a.csv").with_delimiter("|").delimiter_byte().unwrap(),
            b'|'
        );
        assert!(FlatFileConfig::new("a.csv").with_delimiter("||").delimiter_byte().is_err());
        assert!(FlatFileConfig::new("a.csv").with_delimiter("§").delimiter_byte().is_err());
    }

    #[test]
    fn connection_debug_redacts_token() {
        let c = ConnectionConfig::new("localhost", "8123").with_credentials("default", "secret");
        assert!(!format!("{c:?}").contains("secret"));
        assert_eq!(c.base_url(), "http://localhost:8123");
    }

    #[test]
    fn request_json_uses_camel_case() {
        let c: ConnectionConfig = serde_json::from_str(
            r#"{"host":"h","port":"9000","database":"db","username":"u","jwtToken":"t","isHttps":true}"#,
        )
        .unwrap();
        assert!(c.is_https);
        assert_eq!(c.jwt_token, "t");
        let f: FlatFileConfig = serde_json::from_str(r#"{"fileName":"x.csv"}"#).unwrap();
        assert_eq!(f.delimiter, ",");
        assert!(f.has_header);
    }
}
