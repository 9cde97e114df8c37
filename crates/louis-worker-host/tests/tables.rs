//! Integration tests for table sources and the table store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_test::assert_ok;

use louis_worker_common::TableError;
use louis_worker_host::{HttpTableSource, PrivateFs, TableSource, TableStore};

/// In-memory source that counts fetches and can change between calls.
#[derive(Default)]
struct CountingSource {
    tables: Mutex<HashMap<String, Vec<u8>>>,
    fetches: AtomicUsize,
}

impl CountingSource {
    fn with(tables: &[(&str, &str)]) -> Arc<Self> {
        let source = Self::default();
        for (name, contents) in tables {
            source.add(name, contents);
        }
        Arc::new(source)
    }

    fn add(&self, name: &str, contents: &str) {
        self.tables
            .lock()
            .unwrap()
            .insert(name.to_string(), contents.as_bytes().to_vec());
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableSource for CountingSource {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, TableError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.tables
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| TableError::fetch_failed(name, "not found"))
    }

    fn describe(&self) -> String {
        "counting".into()
    }
}

fn store(source: &Arc<CountingSource>) -> TableStore {
    TableStore::new(source.clone(), PrivateFs::create().unwrap())
}

// ============================================================================
// Test: Install
// ============================================================================

#[tokio::test]
async fn test_install_writes_into_private_fs() {
    let source = CountingSource::with(&[("en-us-g1.ctb", "# grade 1\n")]);
    let mut store = store(&source);

    assert!(store.install("en-us-g1.ctb").await.unwrap());

    let written = std::fs::read_to_string(store.root().join("en-us-g1.ctb")).unwrap();
    assert_eq!(written, "# grade 1\n");
    assert!(store.is_installed("en-us-g1.ctb"));
    assert_eq!(store.installed(), vec!["en-us-g1.ctb"]);
}

#[tokio::test]
async fn test_second_install_is_noop() {
    let source = CountingSource::with(&[("en-us-g1.ctb", "# grade 1\n")]);
    let mut store = store(&source);

    store.install("en-us-g1.ctb").await.unwrap();
    std::fs::remove_file(store.root().join("en-us-g1.ctb")).unwrap();

    assert!(!store.install("en-us-g1.ctb").await.unwrap());
    assert_eq!(source.fetches(), 1);
    // Not rewritten either.
    assert!(!store.root().join("en-us-g1.ctb").exists());
}

#[tokio::test]
async fn test_includes_installed_transitively() {
    let source = CountingSource::with(&[
        ("en-ueb-g2.ctb", "include en-ueb-g1.ctb\ninclude chardefs.cti\n"),
        ("en-ueb-g1.ctb", "include chardefs.cti\n"),
        ("chardefs.cti", "# characters\n"),
    ]);
    let mut store = store(&source);

    store.install("en-ueb-g2.ctb").await.unwrap();

    assert_eq!(
        store.installed(),
        vec!["chardefs.cti", "en-ueb-g1.ctb", "en-ueb-g2.ctb"]
    );
    assert_eq!(source.fetches(), 3);
    assert!(store.root().join("chardefs.cti").exists());
}

#[tokio::test]
async fn test_include_cycle_terminates() {
    let source = CountingSource::with(&[("a.ctb", "include b.ctb\n"), ("b.ctb", "include a.ctb\n")]);
    let mut store = store(&source);

    store.install("a.ctb").await.unwrap();

    assert!(store.is_installed("a.ctb"));
    assert!(store.is_installed("b.ctb"));
    assert_eq!(source.fetches(), 2);
}

#[tokio::test]
async fn test_includes_ignored_when_disabled() {
    let source = CountingSource::with(&[("a.ctb", "include missing.cti\n")]);
    let mut store = store(&source).with_include_resolution(false);

    store.install("a.ctb").await.unwrap();

    assert_eq!(store.installed(), vec!["a.ctb"]);
}

#[tokio::test]
async fn test_install_list() {
    let source = CountingSource::with(&[("a.ctb", ""), ("b.ctb", "")]);
    let mut store = store(&source);

    store.install_list("a.ctb, b.ctb").await.unwrap();

    assert_ok!(store.require_installed("a.ctb,b.ctb"));
}

// ============================================================================
// Test: Failures
// ============================================================================

#[tokio::test]
async fn test_missing_table_fails_and_can_be_retried() {
    let source = CountingSource::with(&[]);
    let mut store = store(&source);

    let result = store.install("missing.ctb").await;
    assert!(matches!(result, Err(TableError::FetchFailed { name, .. }) if name == "missing.ctb"));
    assert_eq!(store.record("missing.ctb").map(|r| r.installed), Some(false));
    assert!(matches!(
        store.require_installed("missing.ctb"),
        Err(TableError::NotInstalled { .. })
    ));

    source.add("missing.ctb", "# now present\n");
    assert!(store.install("missing.ctb").await.unwrap());
    assert!(store.is_installed("missing.ctb"));
}

#[tokio::test]
async fn test_missing_include_installs_nothing() {
    let source = CountingSource::with(&[("a.ctb", "include gone.cti\n")]);
    let mut store = store(&source);

    let result = store.install("a.ctb").await;

    assert!(matches!(result, Err(TableError::FetchFailed { name, .. }) if name == "gone.cti"));
    assert!(store.installed().is_empty());
    assert!(!store.root().join("a.ctb").exists());
}

#[tokio::test]
async fn test_escaping_include_is_rejected() {
    let source = CountingSource::with(&[("a.ctb", "include ../../etc/passwd\n")]);
    let mut store = store(&source);

    let result = store.install("a.ctb").await;

    assert!(matches!(result, Err(TableError::FetchFailed { .. })));
    assert_eq!(source.fetches(), 1);
}

#[tokio::test]
async fn test_invalid_name_rejected_before_fetch() {
    let source = CountingSource::with(&[]);
    let mut store = store(&source);

    let result = store.install("../secret.ctb").await;

    assert!(matches!(result, Err(TableError::InvalidName { .. })));
    assert_eq!(source.fetches(), 0);
    assert!(store.record("../secret.ctb").is_none());
}

#[tokio::test]
async fn test_write_failure_reported() {
    let source = CountingSource::with(&[("a.ctb", "")]);
    let mut store = store(&source);
    std::fs::remove_dir_all(store.root()).unwrap();

    let result = store.install("a.ctb").await;

    assert!(matches!(result, Err(TableError::WriteFailed { .. })));
    assert!(!store.is_installed("a.ctb"));
}

// ============================================================================
// Test: HTTP Source
// ============================================================================

/// Serve `body` for `/tables/<present>` and 404 for anything else.
async fn serve_once(present: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0; 4096];
        let n = socket.read(&mut buf).await.unwrap();
        let request = String::from_utf8_lossy(&buf[..n]);

        let response = if request.starts_with(&format!("GET /tables/{present} ")) {
            format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
        } else {
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
        };
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
    });

    format!("http://{addr}/tables")
}

#[tokio::test]
async fn test_http_source_fetches_table() {
    let base = serve_once("en-us-g1.ctb", "# grade 1\n").await;
    let source = HttpTableSource::new(&base, Duration::from_secs(5)).unwrap();

    let bytes = source.fetch("en-us-g1.ctb").await.unwrap();
    assert_eq!(bytes, b"# grade 1\n");
}

#[tokio::test]
async fn test_http_source_not_found() {
    let base = serve_once("en-us-g1.ctb", "").await;
    let source = HttpTableSource::new(&base, Duration::from_secs(5)).unwrap();

    let result = source.fetch("missing.ctb").await;
    assert!(
        matches!(result, Err(TableError::FetchFailed { name, reason }) if name == "missing.ctb" && reason == "not found")
    );
}
