//! HTTP JSON fetching with bounded retries, plus the persisted detector-profile store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
pub use rodash_engine::ProfileBook;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "rodash-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Upper bound on requests in flight across all sources.
    pub global_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            global_concurrency: 8,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("response from {url} is not valid JSON: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("fetcher is shutting down")]
    Closed,
}

/// One shared client for every refresh; cheap to clone behind `Arc`.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;

        let mut attempt = 0usize;
        loop {
            let retry = match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.bytes().await?.to_vec());
                    }
                    let final_url = resp.url().to_string();
                    if classify_status(status) == RetryDisposition::NonRetryable
                        || attempt >= self.backoff.max_retries
                    {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                        });
                    }
                    status.as_u16().to_string()
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::NonRetryable
                        || attempt >= self.backoff.max_retries
                    {
                        return Err(FetchError::Request(err));
                    }
                    err.to_string()
                }
            };
            let delay = self.backoff.delay_for_attempt(attempt);
            debug!(attempt, reason = %retry, delay_ms = delay.as_millis() as u64, "retrying fetch");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// GET `url` and decode the body as JSON.
    pub async fn fetch_json(
        &self,
        refresh_id: Uuid,
        source: &str,
        url: &str,
    ) -> Result<JsonValue, FetchError> {
        let span = info_span!("http_fetch", %refresh_id, source, url);
        async {
            let body = self.fetch_bytes(url).await?;
            serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
                url: url.to_string(),
                source,
            })
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, Error)]
pub enum ProfileStoreError {
    #[error("profile store io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("profile store at {path} holds invalid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serializing profiles: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An edit applied to the stored book. Returning `false` leaves the store untouched.
pub type BookEdit<'a> = Box<dyn FnOnce(&mut ProfileBook) -> bool + Send + 'a>;

/// Opaque persistence for detector profiles and the update-notice marker.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load(&self) -> Result<ProfileBook, ProfileStoreError>;
    async fn save(&self, book: &ProfileBook) -> Result<(), ProfileStoreError>;

    /// Load, edit and save while holding the store's write lock, so concurrent
    /// writers never drop each other's changes. Returns the saved book, or
    /// `None` when the edit declined.
    async fn update(&self, edit: BookEdit<'_>) -> Result<Option<ProfileBook>, ProfileStoreError>;
}

/// JSON file, replaced atomically through a temp file and rename.
#[derive(Debug)]
pub struct FileProfileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, path: &Path) -> impl FnOnce(std::io::Error) -> ProfileStoreError {
        let path = path.to_path_buf();
        move |source| ProfileStoreError::Io { path, source }
    }

    async fn read_book(&self) -> Result<ProfileBook, ProfileStoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no profile store yet; starting empty");
                return Ok(ProfileBook::default());
            }
            Err(err) => return Err(self.io_error(&self.path)(err)),
        };
        serde_json::from_slice(&bytes).map_err(|source| ProfileStoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    async fn write_book(&self, book: &ProfileBook) -> Result<(), ProfileStoreError> {
        let bytes = serde_json::to_vec_pretty(book)?;
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .map_err(self.io_error(&parent))?;

        let temp_path = parent.join(format!(".profiles.{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(self.io_error(&temp_path))?;
        file.write_all(&bytes)
            .await
            .map_err(self.io_error(&temp_path))?;
        file.flush().await.map_err(self.io_error(&temp_path))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                warn!(path = %temp_path.display(), error = %cleanup, "leaving stale temp profile file");
            }
            return Err(self.io_error(&self.path)(err));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for FileProfileStore {
    async fn load(&self) -> Result<ProfileBook, ProfileStoreError> {
        self.read_book().await
    }

    async fn save(&self, book: &ProfileBook) -> Result<(), ProfileStoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_book(book).await
    }

    async fn update(&self, edit: BookEdit<'_>) -> Result<Option<ProfileBook>, ProfileStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut book = self.read_book().await?;
        if !edit(&mut book) {
            return Ok(None);
        }
        self.write_book(&book).await?;
        Ok(Some(book))
    }
}

/// In-process store for tests and ephemeral servers.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    book: Mutex<ProfileBook>,
}

impl MemoryProfileStore {
    pub fn new(book: ProfileBook) -> Self {
        Self {
            book: Mutex::new(book),
        }
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load(&self) -> Result<ProfileBook, ProfileStoreError> {
        Ok(self.book.lock().await.clone())
    }

    async fn save(&self, book: &ProfileBook) -> Result<(), ProfileStoreError> {
        *self.book.lock().await = book.clone();
        Ok(())
    }

    async fn update(&self, edit: BookEdit<'_>) -> Result<Option<ProfileBook>, ProfileStoreError> {
        let mut current = self.book.lock().await;
        let mut book = current.clone();
        if !edit(&mut book) {
            return Ok(None);
        }
        *current = book.clone();
        Ok(Some(book))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rodash_engine::{DetectorProfile, DetectorRule};
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn only_server_errors_and_throttling_retry() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), RetryDisposition::NonRetryable);
    }

    fn sample_book() -> ProfileBook {
        let mut book = ProfileBook::default();
        book.upsert(
            "ops",
            DetectorProfile {
                rules: vec![DetectorRule {
                    tag: "quiet".into(),
                    conditions: Vec::new(),
                }],
                ..DetectorProfile::default()
            },
        );
        book.set_default("ops");
        book.last_seen_version = Some("7".into());
        book
    }

    #[tokio::test]
    async fn missing_profile_file_loads_empty_book() {
        let dir = tempdir().expect("tempdir");
        let store = FileProfileStore::new(dir.path().join("profiles.json"));
        assert_eq!(store.load().await.expect("load"), ProfileBook::default());
    }

    #[tokio::test]
    async fn profile_book_survives_atomic_save() {
        let dir = tempdir().expect("tempdir");
        let store = FileProfileStore::new(dir.path().join("state/profiles.json"));
        let book = sample_book();
        store.save(&book).await.expect("save");
        store.save(&book).await.expect("overwrite");
        assert_eq!(store.load().await.expect("load"), book);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("state"))
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn corrupt_profile_file_is_reported() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("profiles.json");
        std::fs::write(&path, b"{not json").expect("write");
        let err = FileProfileStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, ProfileStoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryProfileStore::default();
        store.save(&sample_book()).await.expect("save");
        assert_eq!(store.load().await.expect("load").default_profile.as_deref(), Some("ops"));
    }

    fn add_profile(name: &'static str) -> BookEdit<'static> {
        Box::new(move |book: &mut ProfileBook| {
            book.upsert(name, DetectorProfile::default());
            true
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_file_updates_keep_both_edits() {
        let dir = tempdir().expect("tempdir");
        let store = FileProfileStore::new(dir.path().join("profiles.json"));
        store.save(&sample_book()).await.expect("seed");

        let (a, b) = tokio::join!(store.update(add_profile("alpha")), store.update(add_profile("beta")));
        a.expect("first update");
        b.expect("second update");

        let book = store.load().await.expect("load");
        assert!(book.profile("alpha").is_some());
        assert!(book.profile("beta").is_some());
        assert!(book.profile("ops").is_some());
    }

    #[tokio::test]
    async fn concurrent_memory_updates_keep_both_edits() {
        let store = MemoryProfileStore::new(sample_book());
        let (a, b) = tokio::join!(store.update(add_profile("alpha")), store.update(add_profile("beta")));
        assert!(a.expect("first").is_some());
        assert!(b.expect("second").is_some());

        let book = store.load().await.expect("load");
        assert_eq!(book.profiles.len(), 3);
    }

    #[tokio::test]
    async fn declined_update_leaves_file_untouched() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("profiles.json");
        let store = FileProfileStore::new(&path);
        let outcome = store.update(Box::new(|_: &mut ProfileBook| false)).await.expect("update");
        assert!(outcome.is_none());
        assert!(!path.exists());
    }

    /// Serves `responses` in order, one per connection.
    async fn serve(responses: Vec<(u16, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
            }
        });
        format!("http://{addr}/feed")
    }

    fn fast_fetcher() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            backoff: BackoffPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..HttpClientConfig::default()
        })
        .expect("client")
    }

    #[tokio::test]
    async fn fetch_json_retries_server_errors() {
        let url = serve(vec![(503, "{}"), (200, r#"{"data": [1, 2]}"#)]).await;
        let payload = fast_fetcher()
            .fetch_json(Uuid::new_v4(), "activity", &url)
            .await
            .expect("payload");
        assert_eq!(payload["data"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn fetch_json_reports_client_errors_and_bad_bodies() {
        let url = serve(vec![(404, "{}")]).await;
        let err = fast_fetcher()
            .fetch_json(Uuid::new_v4(), "arrivals", &url)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus { status: 404, .. }));

        let url = serve(vec![(200, "<html>")]).await;
        let err = fast_fetcher()
            .fetch_json(Uuid::new_v4(), "arrivals", &url)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
    }
}
