//! Where table bytes come from.
//!
//! A [`TableSource`] resolves a table name to its contents. The store
//! does not care whether tables live in a local directory, behind an HTTP
//! base URL, or in memory:
//! - [`DirectoryTableSource`]: Files in a local directory
//! - [`HttpTableSource`]: Names joined onto a base URL
//! - [`MemoryTableSource`]: A fixed map, for tests and embedding

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use louis_worker_common::{ConfigError, TableError, TableSourceConfig};

/// Largest table accepted from any source.
pub const MAX_TABLE_BYTES: usize = 10 * 1024 * 1024;

/// A content location that serves tables by name.
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Fetch the contents of the named table.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::FetchFailed`] if the table does not exist or
    /// cannot be retrieved.
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, TableError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Build the source described by `config`.
pub fn source_from_config(config: &TableSourceConfig) -> Result<Arc<dyn TableSource>, ConfigError> {
    match config {
        TableSourceConfig::Directory { path } => Ok(Arc::new(DirectoryTableSource::new(path))),
        TableSourceConfig::Http {
            base_url,
            timeout_secs,
        } => {
            let source = HttpTableSource::new(base_url, Duration::from_secs(*timeout_secs))?;
            Ok(Arc::new(source))
        }
    }
}

/// Tables stored as files in a local directory.
#[derive(Debug, Clone)]
pub struct DirectoryTableSource {
    root: PathBuf,
}

impl DirectoryTableSource {
    /// Serve tables from `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl TableSource for DirectoryTableSource {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, TableError> {
        let path = self.root.join(name);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| TableError::fetch_failed(name, format!("{}: {e}", path.display())))?;

        if bytes.len() > MAX_TABLE_BYTES {
            return Err(TableError::fetch_failed(
                name,
                format!("table is larger than {MAX_TABLE_BYTES} bytes"),
            ));
        }

        debug!(table = name, bytes = bytes.len(), "Table read from directory");
        Ok(bytes)
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }
}

/// Tables served over HTTP(S) relative to a base URL.
pub struct HttpTableSource {
    /// HTTP client (shared, connection pooled).
    client: Client,

    /// Base URL; always ends in `/`.
    base_url: Url,
}

impl HttpTableSource {
    /// Serve tables from `base_url` with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the URL does not parse or the
    /// client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(4)
            .user_agent(concat!("louis-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::invalid(format!("Failed to create HTTP client: {e}")))?;

        Self::with_client(client, base_url)
    }

    /// Create with a custom HTTP client.
    pub fn with_client(client: Client, base_url: &str) -> Result<Self, ConfigError> {
        // Url::join replaces the last segment unless the base ends in '/'.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| ConfigError::invalid(format!("Invalid table base URL '{base_url}': {e}")))?;

        Ok(Self { client, base_url })
    }

    /// URL a table name resolves to.
    pub fn table_url(&self, name: &str) -> Result<Url, TableError> {
        self.base_url
            .join(name)
            .map_err(|e| TableError::fetch_failed(name, format!("invalid table URL: {e}")))
    }
}

#[async_trait]
impl TableSource for HttpTableSource {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, TableError> {
        let url = self.table_url(name)?;
        debug!(table = name, url = %url, "Fetching table");

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                "request timed out".to_string()
            } else if e.is_connect() {
                format!("connection failed: {e}")
            } else {
                e.to_string()
            };
            warn!(table = name, url = %url, reason = %reason, "Table request failed");
            TableError::fetch_failed(name, reason)
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TableError::fetch_failed(name, "not found"));
        }
        if !status.is_success() {
            return Err(TableError::fetch_failed(name, format!("HTTP {status}")));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > MAX_TABLE_BYTES as u64 {
                warn!(
                    table = name,
                    content_length = content_length,
                    max = MAX_TABLE_BYTES,
                    "Table too large"
                );
                return Err(TableError::fetch_failed(name, "table too large"));
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TableError::fetch_failed(name, format!("failed to read body: {e}")))?;

        if body.len() > MAX_TABLE_BYTES {
            return Err(TableError::fetch_failed(name, "table too large"));
        }

        debug!(table = name, status = status.as_u16(), bytes = body.len(), "Table fetched");
        Ok(body.to_vec())
    }

    fn describe(&self) -> String {
        format!("http {}", self.base_url)
    }
}

/// Tables held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTableSource {
    tables: HashMap<String, Vec<u8>>,
}

impl MemoryTableSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table.
    #[must_use]
    pub fn with_table(mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.tables.insert(name.into(), contents.into());
        self
    }
}

#[async_trait]
impl TableSource for MemoryTableSource {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, TableError> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| TableError::fetch_failed(name, "not found"))
    }

    fn describe(&self) -> String {
        format!("memory ({} tables)", self.tables.len())
    }
}
