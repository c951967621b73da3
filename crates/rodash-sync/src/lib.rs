//! Refresh orchestration: fetch every enabled source concurrently, normalize,
//! and rebuild the record store in one piece.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rodash_adapters::{normalize_with, NormalizerConfig};
use rodash_core::{RecordStore, SourceKind};
use rodash_storage::{
    FetchError, FileProfileStore, HttpClientConfig, HttpFetcher, ProfileBook, ProfileStore,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::fs;
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "rodash-sync";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Path is appended to the API base URL.
    #[default]
    Http,
    /// Path is a JSON file relative to the workspace root.
    Fixture,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub path: String,
    #[serde(default)]
    pub mode: SourceMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    #[serde(flatten)]
    pub endpoint: Endpoint,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// A failing critical source aborts the refresh instead of degrading.
    #[serde(default)]
    pub critical: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub settings: Option<Endpoint>,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
}

impl SourceRegistry {
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry")
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub api_base: String,
    pub sources_file: PathBuf,
    pub profiles_path: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub workspace_root: PathBuf,
}

impl RefreshConfig {
    pub fn from_env() -> Self {
        Self {
            api_base: std::env::var("RODASH_API_BASE")
                .unwrap_or_else(|_| "http://localhost:8080/api".to_string()),
            sources_file: std::env::var("RODASH_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("sources.yaml")),
            profiles_path: std::env::var("RODASH_PROFILES_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./state/profiles.json")),
            user_agent: std::env::var("RODASH_USER_AGENT")
                .unwrap_or_else(|_| "rodash/0.1".to_string()),
            http_timeout_secs: std::env::var("RODASH_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            workspace_root: PathBuf::from("."),
        }
    }

    pub fn sources_path(&self) -> PathBuf {
        self.workspace_root.join(&self.sources_file)
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("critical source {} failed: {source}", .kind.as_str())]
    CriticalSource {
        kind: SourceKind,
        #[source]
        source: SourceError,
    },
}

/// The fetch boundary: one endpoint in, one JSON document out.
#[async_trait]
pub trait PayloadSource: Send + Sync {
    async fn fetch(
        &self,
        refresh_id: Uuid,
        label: &str,
        endpoint: &Endpoint,
    ) -> Result<JsonValue, SourceError>;
}

/// Routes HTTP endpoints to the shared fetcher and fixture endpoints to disk.
pub struct ApiPayloads {
    http: HttpFetcher,
    api_base: String,
    workspace_root: PathBuf,
}

impl ApiPayloads {
    pub fn new(http: HttpFetcher, api_base: impl Into<String>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            workspace_root: workspace_root.into(),
        }
    }

    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

pub async fn read_json_file(path: &Path) -> Result<JsonValue, SourceError> {
    let text = fs::read_to_string(path).await.map_err(|source| SourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| SourceError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl PayloadSource for ApiPayloads {
    async fn fetch(
        &self,
        refresh_id: Uuid,
        label: &str,
        endpoint: &Endpoint,
    ) -> Result<JsonValue, SourceError> {
        match endpoint.mode {
            SourceMode::Http => {
                let url = self.url_for(&endpoint.path);
                Ok(self.http.fetch_json(refresh_id, label, &url).await?)
            }
            SourceMode::Fixture => read_json_file(&self.workspace_root.join(&endpoint.path)).await,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceDiagnostic {
    pub kind: SourceKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub kind: SourceKind,
    pub records: usize,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub refresh_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub enabled_sources: usize,
    pub sources: Vec<SourceReport>,
    pub diagnostics: Vec<SourceDiagnostic>,
    /// Version to announce once; `None` when the user has already seen it.
    pub update_notice: Option<String>,
    #[serde(skip)]
    pub store: Arc<RecordStore>,
}

/// Canonical text of a settings `version`, which may arrive as a number or a string.
pub fn settings_version(settings: &JsonValue) -> Option<String> {
    match settings.get("version")? {
        JsonValue::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        JsonValue::Number(n) => Some(match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        }),
        _ => None,
    }
}

/// Returns the version to announce when it differs from the last one shown.
pub fn update_notice_due(settings: &JsonValue, last_seen: Option<&str>) -> Option<String> {
    let current = settings_version(settings)?;
    match last_seen {
        Some(seen) if seen.trim() == current => None,
        _ => Some(current),
    }
}

type SourceOutcome = (SourceConfig, Result<JsonValue, SourceError>);

pub struct RefreshPipeline {
    config: RefreshConfig,
    payloads: Arc<dyn PayloadSource>,
    profiles: Arc<dyn ProfileStore>,
}

impl RefreshPipeline {
    pub fn new(config: RefreshConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let payloads = ApiPayloads::new(http, config.api_base.clone(), config.workspace_root.clone());
        let profiles = FileProfileStore::new(config.workspace_root.join(&config.profiles_path));
        Ok(Self::with_parts(config, Arc::new(payloads), Arc::new(profiles)))
    }

    pub fn with_parts(
        config: RefreshConfig,
        payloads: Arc<dyn PayloadSource>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            config,
            payloads,
            profiles,
        }
    }

    pub fn profiles(&self) -> Arc<dyn ProfileStore> {
        Arc::clone(&self.profiles)
    }

    pub async fn load_source_registry(&self) -> Result<SourceRegistry> {
        let path = self.config.sources_path();
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        SourceRegistry::from_yaml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub async fn run_once(&self) -> Result<RefreshSummary> {
        let registry = self.load_source_registry().await?;
        self.run_with_registry(&registry).await
    }

    pub async fn run_with_registry(&self, registry: &SourceRegistry) -> Result<RefreshSummary> {
        let started_at = Utc::now();
        let refresh_id = Uuid::new_v4();
        let span = info_span!("refresh", %refresh_id);

        async {
            let enabled: Vec<SourceConfig> = registry.enabled().cloned().collect();
            let mut tasks: JoinSet<SourceOutcome> = JoinSet::new();
            for source in enabled.iter().cloned() {
                let payloads = Arc::clone(&self.payloads);
                tasks.spawn(
                    async move {
                        let result = payloads
                            .fetch(refresh_id, source.kind.as_str(), &source.endpoint)
                            .await;
                        (source, result)
                    }
                    .in_current_span(),
                );
            }

            let settings = match &registry.settings {
                Some(endpoint) => match self.payloads.fetch(refresh_id, "settings", endpoint).await {
                    Ok(payload) => Some(payload),
                    Err(err) => {
                        warn!(error = %err, "settings unavailable; skipping update notice");
                        None
                    }
                },
                None => None,
            };

            let mut outcomes = Vec::with_capacity(enabled.len());
            while let Some(joined) = tasks.join_next().await {
                outcomes.push(joined.context("refresh task panicked")?);
            }
            // Completion order is arbitrary; absorb in registry order.
            outcomes.sort_by_key(|(source, _)| {
                enabled
                    .iter()
                    .position(|s| s == source)
                    .unwrap_or(usize::MAX)
            });

            let mut store = RecordStore::default();
            let mut reports = Vec::new();
            let mut diagnostics = Vec::new();
            for (source, result) in outcomes {
                match result {
                    Ok(payload) => {
                        let batch = normalize_with(&payload, source.kind, &registry.normalizer);
                        reports.push(SourceReport {
                            kind: source.kind,
                            records: batch.records.len(),
                            skipped_rows: batch.skipped_rows,
                        });
                        store.absorb(batch.records);
                    }
                    Err(err) if source.critical => {
                        return Err(RefreshError::CriticalSource {
                            kind: source.kind,
                            source: err,
                        }
                        .into());
                    }
                    Err(err) => {
                        warn!(source = source.kind.as_str(), error = %err, "source failed; using empty set");
                        diagnostics.push(SourceDiagnostic {
                            kind: source.kind,
                            message: err.to_string(),
                        });
                        reports.push(SourceReport {
                            kind: source.kind,
                            records: 0,
                            skipped_rows: 0,
                        });
                    }
                }
            }

            let update_notice = match settings {
                Some(settings) => self.record_update_notice(&settings).await,
                None => None,
            };

            let finished_at = Utc::now();
            info!(
                sources = enabled.len(),
                failed = diagnostics.len(),
                activity = store.activity.len(),
                "refresh complete"
            );
            Ok::<_, anyhow::Error>(RefreshSummary {
                refresh_id,
                started_at,
                finished_at,
                enabled_sources: enabled.len(),
                sources: reports,
                diagnostics,
                update_notice,
                store: Arc::new(store),
            })
        }
        .instrument(span)
        .await
    }

    /// Marks the settings version as seen. Store failures only cost the notice marker.
    async fn record_update_notice(&self, settings: &JsonValue) -> Option<String> {
        let mut due = None;
        let outcome = self
            .profiles
            .update(Box::new(|book: &mut ProfileBook| {
                let Some(version) = update_notice_due(settings, book.last_seen_version.as_deref())
                else {
                    return false;
                };
                book.last_seen_version = Some(version.clone());
                due = Some(version);
                true
            }))
            .await;
        if let Err(err) = outcome {
            warn!(error = %err, "could not record update notice marker");
        }
        due
    }
}

pub async fn run_refresh_once_from_env() -> Result<RefreshSummary> {
    let pipeline = RefreshPipeline::new(RefreshConfig::from_env())?;
    pipeline.run_once().await
}
