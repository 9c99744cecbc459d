use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use include_dir::{include_dir, Dir};
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::{
    config::Config,
    error::AppError,
    gemini::GenerationClient,
    intake::{HandleRegistry, Role},
    models::{CatalogEntry, KeyEvent, SessionSnapshot, StyleUpdate, ZoomState},
    session::Session,
    style::STYLE_CATALOG,
};

static ASSETS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/assets");

pub type SessionStore = Arc<RwLock<HashMap<Uuid, Arc<Session>>>>;

#[derive(Clone)]
pub struct AppState {
    pub store: SessionStore,
    pub registry: HandleRegistry,
    pub gemini: Arc<dyn GenerationClient>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, gemini: Arc<dyn GenerationClient>) -> Self {
        Self {
            store: Arc::default(),
            registry: HandleRegistry::new(),
            gemini,
            config: Arc::new(config),
        }
    }

    /// Looks up a session; any request for it counts as activity.
    fn session(&self, id: &Uuid) -> Result<Arc<Session>, AppError> {
        let session = self.store.read().get(id).cloned().ok_or(AppError::SessionNotFound)?;
        session.touch();
        Ok(session)
    }

    /// Periodically tears down sessions whose page went away without
    /// saying so.
    pub fn spawn_idle_sweeper(&self, idle: Duration) -> JoinHandle<()> {
        let store = self.store.clone();
        let period = (idle / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sweep_idle_sessions(&store, idle);
            }
        })
    }
}

fn sweep_idle_sessions(store: &SessionStore, idle: Duration) -> usize {
    let expired: Vec<Arc<Session>> = {
        let mut sessions = store.write();
        let ids: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, session)| session.idle_for() >= idle)
            .map(|(id, _)| *id)
            .collect();
        ids.iter().filter_map(|id| sessions.remove(id)).collect()
    };
    for session in &expired {
        session.teardown();
    }
    if !expired.is_empty() {
        tracing::info!("🧹 Swept {} idle session(s)", expired.len());
    }
    expired.len()
}

pub fn router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/", get(index))
        .route("/api/styles", get(list_styles))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/images/:role", put(upload_image).delete(clear_image))
        .route("/api/sessions/:id/style", put(set_style))
        .route("/api/sessions/:id/generate", post(generate))
        .route("/api/sessions/:id/zoom", post(open_zoom).delete(dismiss_zoom))
        .route("/api/sessions/:id/keys", post(key_event))
        .route("/api/sessions/:id/download", get(download))
        .route("/api/handles/:handle", get(get_handle))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .with_state(state)
}

pub async fn index() -> Response {
    match ASSETS.get_file("index.html").and_then(|f| f.contents_utf8()) {
        Some(page) => Html(page).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub async fn list_styles() -> Json<Vec<CatalogEntry>> {
    Json(STYLE_CATALOG.iter().map(CatalogEntry::from).collect())
}

pub async fn create_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<SessionSnapshot>) {
    let session = Session::new(state.registry.clone());
    state.store.write().insert(session.id, session.clone());
    tracing::info!("🆕 Session {} created", session.id);
    (StatusCode::CREATED, Json(session.snapshot()))
}

pub async fn get_session(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<SessionSnapshot>, AppError> {
    Ok(Json(state.session(&id)?.snapshot()))
}

pub async fn delete_session(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let session = state.store.write().remove(&id).ok_or(AppError::SessionNotFound)?;
    session.teardown();
    Ok(StatusCode::NO_CONTENT)
}

pub async fn upload_image(
    Path((id, role)): Path<(Uuid, Role)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SessionSnapshot>, AppError> {
    let session = state.session(&id)?;
    let media_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if let Err(e) = session.upload(role, body, media_type) {
        tracing::warn!("🚫 {} upload rejected for session {}: {}", role, id, e);
        return Err(e.into());
    }
    Ok(Json(session.snapshot()))
}

pub async fn clear_image(
    Path((id, role)): Path<(Uuid, Role)>,
    State(state): State<AppState>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let session = state.session(&id)?;
    session.clear(role);
    Ok(Json(session.snapshot()))
}

pub async fn set_style(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<StyleUpdate>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let session = state.session(&id)?;
    session.set_style(body.category, body.custom_text);
    Ok(Json(session.snapshot()))
}

pub async fn generate(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<SessionSnapshot>), AppError> {
    let session = state.session(&id)?;
    // The task outlives the request; its result lands in the session.
    session.start_generation(state.gemini.clone(), state.config.generation_timeout)?;
    Ok((StatusCode::ACCEPTED, Json(session.snapshot())))
}

pub async fn open_zoom(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ZoomState>, AppError> {
    let session = state.session(&id)?;
    if !session.open_zoom() {
        return Err(AppError::NoResult);
    }
    Ok(Json(ZoomState { open: true }))
}

pub async fn dismiss_zoom(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ZoomState>, AppError> {
    state.session(&id)?.dismiss_zoom();
    Ok(Json(ZoomState { open: false }))
}

pub async fn key_event(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<KeyEvent>,
) -> Result<Json<ZoomState>, AppError> {
    let session = state.session(&id)?;
    session.key(body.key);
    Ok(Json(ZoomState { open: session.snapshot().zoom_open }))
}

pub async fn download(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let file = state.session(&id)?.download().ok_or(AppError::NoResult)?;
    tracing::info!(
        "💾 Download of {} ({} bytes) for session {}",
        file.file_name,
        file.content.len(),
        id
    );
    let headers = [
        (header::CONTENT_TYPE, file.media_type),
        (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file.file_name)),
    ];
    Ok((StatusCode::OK, headers, file.content).into_response())
}

pub async fn get_handle(
    Path(handle): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let image = state.registry.get(&handle).ok_or(AppError::HandleNotFound)?;
    Ok(([(header::CONTENT_TYPE, image.media_type)], image.content).into_response())
}
