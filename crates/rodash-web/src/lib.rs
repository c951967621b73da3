//! Axum JSON surface: view outputs, detector profiles and manual refresh.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use rodash_core::RecordStore;
use rodash_engine::{
    activity_view, document_view, lead_view, milestone_view, time_to_engage_view,
    working_hours_view, Detection, DetectorProfile, ProfileBook, ViewRequest,
};
use rodash_storage::{BookEdit, ProfileStore};
use rodash_sync::{RefreshConfig, RefreshPipeline, RefreshSummary};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

pub const CRATE_NAME: &str = "rodash-web";

pub struct AppState {
    store: RwLock<Arc<RecordStore>>,
    last_refresh: RwLock<Option<RefreshSummary>>,
    profiles: Arc<dyn ProfileStore>,
    pipeline: Option<Arc<RefreshPipeline>>,
    refresh_lock: Mutex<()>,
}

impl AppState {
    pub fn new(store: RecordStore, profiles: Arc<dyn ProfileStore>) -> Self {
        Self {
            store: RwLock::new(Arc::new(store)),
            last_refresh: RwLock::new(None),
            profiles,
            pipeline: None,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_pipeline(mut self, pipeline: Arc<RefreshPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Swaps in a freshly built store; readers holding the old `Arc` keep it.
    /// A summary that started before the installed one is dropped; returns
    /// whether the swap happened.
    pub async fn install(&self, summary: RefreshSummary) -> bool {
        let mut last = self.last_refresh.write().await;
        if let Some(current) = last.as_ref() {
            if summary.started_at < current.started_at {
                warn!(
                    refresh_id = %summary.refresh_id,
                    installed = %current.refresh_id,
                    "discarding refresh older than the installed one"
                );
                return false;
            }
        }
        *self.store.write().await = Arc::clone(&summary.store);
        *last = Some(summary);
        true
    }

    async fn snapshot(&self) -> Arc<RecordStore> {
        Arc::clone(&*self.store.read().await)
    }
}

/// A view request plus the optional detector profile to run over it.
#[derive(Debug, Default, Deserialize)]
struct ViewBody {
    #[serde(flatten)]
    request: ViewRequest,
    /// Profile name; `"default"` resolves to the book's default profile.
    #[serde(default)]
    profile: Option<String>,
    /// Reference day for named detector windows; today when absent.
    #[serde(default)]
    today: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    refreshed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_refresh: Option<RefreshSummary>,
    records: Vec<(&'static str, usize)>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/refresh", post(refresh_handler))
        .route("/api/views/activity", post(activity_handler))
        .route("/api/views/leads", post(leads_handler))
        .route("/api/views/time-to-engage", post(time_to_engage_handler))
        .route("/api/views/documents", post(documents_handler))
        .route("/api/views/working-hours", post(working_hours_handler))
        .route("/api/views/arrivals", post(arrivals_handler))
        .route("/api/views/drug-tests", post(drug_tests_handler))
        .route("/api/profiles", get(profiles_handler))
        .route(
            "/api/profiles/{name}",
            put(upsert_profile_handler).delete(delete_profile_handler),
        )
        .route("/api/profiles/{name}/default", post(default_profile_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("RODASH_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let pipeline = Arc::new(RefreshPipeline::new(RefreshConfig::from_env())?);
    let state = AppState::new(RecordStore::default(), pipeline.profiles())
        .with_pipeline(Arc::clone(&pipeline));
    match pipeline.run_once().await {
        Ok(summary) => {
            state.install(summary).await;
        }
        Err(err) => warn!(error = %err, "initial refresh failed; serving an empty store"),
    }

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving dashboard api");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn server_error(err: impl std::fmt::Display) -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    let store = state.snapshot().await;
    let last_refresh = state.last_refresh.read().await.clone();
    Json(StatusBody {
        refreshed: last_refresh.is_some(),
        last_refresh,
        records: store.counts(),
    })
    .into_response()
}

async fn refresh_handler(State(state): State<Arc<AppState>>) -> Response {
    let Some(pipeline) = state.pipeline.clone() else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "refresh is not configured");
    };
    // One refresh at a time; a second request waits and then pulls again.
    let _running = state.refresh_lock.lock().await;
    match pipeline.run_once().await {
        Ok(summary) => {
            state.install(summary.clone()).await;
            Json(summary).into_response()
        }
        // The previous store stays in place.
        Err(err) => error_response(StatusCode::BAD_GATEWAY, format!("{err:#}")),
    }
}

/// Resolves the requested profile: its rules, and its pinned filters folded into the request.
async fn resolve_profile(
    state: &AppState,
    body: ViewBody,
) -> Result<(ViewRequest, Option<DetectorProfile>, NaiveDate), Response> {
    let today = body.today.unwrap_or_else(|| Utc::now().date_naive());
    let Some(name) = body.profile else {
        return Ok((body.request, None, today));
    };
    let book = state.profiles.load().await.map_err(server_error)?;
    let profile = if name == "default" {
        book.active()
    } else {
        book.profile(&name)
    };
    let Some(profile) = profile.cloned() else {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            format!("no detector profile named {name}"),
        ));
    };
    let mut request = body.request;
    request.criteria = profile.filters.apply_to(request.criteria);
    Ok((request, Some(profile), today))
}

async fn activity_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ViewBody>,
) -> Response {
    let (request, profile, today) = match resolve_profile(&state, body).await {
        Ok(resolved) => resolved,
        Err(resp) => return resp,
    };
    let store = state.snapshot().await;
    let detection = profile.as_ref().map(|p| Detection {
        rules: &p.rules,
        today,
    });
    Json(activity_view(&store.activity, &request, detection)).into_response()
}

async fn leads_handler(State(state): State<Arc<AppState>>, Json(body): Json<ViewBody>) -> Response {
    let store = state.snapshot().await;
    Json(lead_view(&store.lead_assignments, &body.request)).into_response()
}

async fn time_to_engage_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ViewBody>,
) -> Response {
    let store = state.snapshot().await;
    Json(time_to_engage_view(&store.time_to_engage, &body.request)).into_response()
}

async fn documents_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ViewBody>,
) -> Response {
    let store = state.snapshot().await;
    Json(document_view(&store.documents, &body.request)).into_response()
}

async fn working_hours_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ViewBody>,
) -> Response {
    let store = state.snapshot().await;
    Json(working_hours_view(&store.events, &body.request)).into_response()
}

async fn arrivals_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ViewBody>,
) -> Response {
    let store = state.snapshot().await;
    Json(milestone_view(&store.arrivals, &body.request)).into_response()
}

async fn drug_tests_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ViewBody>,
) -> Response {
    let store = state.snapshot().await;
    Json(milestone_view(&store.drug_tests, &body.request)).into_response()
}

async fn profiles_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.profiles.load().await {
        Ok(book) => Json(book).into_response(),
        Err(err) => server_error(err),
    }
}

/// Applies one edit under the store's write lock. A declined edit means `name` is unknown.
async fn edit_book(state: &AppState, name: &str, edit: BookEdit<'_>) -> Response {
    match state.profiles.update(edit).await {
        Ok(Some(book)) => Json(book).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("no detector profile named {name}"),
        ),
        Err(err) => server_error(err),
    }
}

async fn upsert_profile_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(profile): Json<DetectorProfile>,
) -> Response {
    if name.trim().is_empty() || name == "default" {
        return error_response(StatusCode::BAD_REQUEST, "profile name is reserved or empty");
    }
    let key = name.clone();
    edit_book(
        &state,
        &name,
        Box::new(move |book: &mut ProfileBook| {
            book.upsert(key, profile);
            true
        }),
    )
    .await
}

async fn delete_profile_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    let edit: BookEdit<'_> = Box::new(|book: &mut ProfileBook| book.remove(&name).is_some());
    edit_book(&state, &name, edit).await
}

async fn default_profile_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    let edit: BookEdit<'_> = Box::new(|book: &mut ProfileBook| book.set_default(&name));
    edit_book(&state, &name, edit).await
}
