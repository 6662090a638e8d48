//! HTTP server for violation logging and credibility reads.
//!
//! Exam clients log violations and manage sessions; reviewers read session
//! detail, scores and per-user history.
//!
//! # Routes
//!
//! ```text
//! GET  /health
//! POST /sessions                      {exam_id, user_id}
//! GET  /sessions?exam_id=&status=
//! GET  /sessions/:id
//! POST /sessions/:id/complete
//! GET  /sessions/:id/credibility
//! GET  /users/:user_id/history
//! POST /violations                    {session_id, type, severity?, metadata?}
//! GET  /violations/:session_id
//! ```

use crate::collector::types::{Severity, ViolationEvent, ViolationType};
use crate::config::{Config, SeverityMap};
use crate::error::LifecycleError;
use crate::scoring::{CredibilityScore, ScoringEngine, SeverityHistogram};
use crate::session::{Session, SessionFilter, SessionRegistry};
use crate::sink::{JsonlStore, MemoryStore, ViolationStore};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Persist sessions and violations under `agent.data_path`; otherwise
    /// everything is kept in memory
    pub persist: bool,
    /// Data location, scoring and severity settings
    pub agent: Config,
}

impl ServerConfig {
    pub fn new(port: u16, persist: bool, agent: Config) -> Self {
        Self {
            port,
            persist,
            agent,
        }
    }

    /// Persistent server on the configured port.
    pub fn from_agent_config(agent: Config) -> Self {
        Self::new(agent.server_port, true, agent)
    }
}

/// Shared server state
pub struct ServerState {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn ViolationStore>,
    engine: ScoringEngine,
    severities: SeverityMap,
}

impl ServerState {
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        let agent = &config.agent;
        let (registry, store): (SessionRegistry, Arc<dyn ViolationStore>) = if config.persist {
            agent.ensure_directories()?;
            (
                SessionRegistry::with_persistence(agent.sessions_path())?,
                Arc::new(JsonlStore::new(agent.violation_log_path())),
            )
        } else {
            (SessionRegistry::new(), Arc::new(MemoryStore::new()))
        };
        Ok(Self::with_backends(Arc::new(registry), store, &config.agent))
    }

    /// Build state over explicit backends.
    pub fn with_backends(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn ViolationStore>,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            store,
            engine: ScoringEngine::from_config(config),
            severities: config.severity_map.clone(),
        }
    }

    /// Violations of a session, or an empty list if the store is unreadable.
    fn violations_of(&self, session_id: &str) -> Vec<ViolationEvent> {
        self.store.list_by_session(session_id).unwrap_or_else(|e| {
            tracing::warn!(session_id, "violation store unreadable: {e}");
            Vec::new()
        })
    }

    fn summarize(&self, session: Session) -> SessionSummary {
        let violations = self.violations_of(&session.id);
        let credibility = self.engine.score(&violations);
        SessionSummary {
            violation_count: violations.len(),
            credibility_score: credibility.score,
            latest_violation: violations.into_iter().max_by_key(|v| v.timestamp),
            session,
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

fn session_not_found(session_id: &str) -> ApiError {
    api_error(
        StatusCode::NOT_FOUND,
        "SESSION_NOT_FOUND",
        format!("Session {session_id} not found"),
    )
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub exam_id: String,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LogViolationRequest {
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: ViolationType,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// A session with its violation statistics.
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: Session,
    pub violation_count: usize,
    pub credibility_score: u32,
    pub latest_violation: Option<ViolationEvent>,
}

/// Full session detail for reviewers.
#[derive(Debug, Serialize)]
pub struct SessionDetail {
    pub session: Session,
    pub violations: Vec<ViolationEvent>,
    pub credibility_score: u32,
    pub violations_by_severity: SeverityHistogram,
    pub total_violations: usize,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Run registry and store work off the async runtime.
async fn blocking<R, F>(state: &Arc<ServerState>, f: F) -> Result<R, ApiError>
where
    R: Send + 'static,
    F: FnOnce(&ServerState) -> R + Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            tracing::error!("Blocking task failed: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", e.to_string())
        })
}

fn lifecycle_error(session_id: &str, err: LifecycleError) -> ApiError {
    match err {
        LifecycleError::AlreadyCompleted(_) => {
            api_error(StatusCode::CONFLICT, "SESSION_COMPLETED", err.to_string())
        }
        LifecycleError::UnknownSession(_) => session_not_found(session_id),
        other => {
            tracing::error!("Session {} unavailable: {}", session_id, other);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORE_ERROR",
                other.to_string(),
            )
        }
    }
}

/// POST /sessions
async fn create_session(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let Json(request) = payload
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, "INVALID_REQUEST", e.body_text()))?;
    if request.exam_id.trim().is_empty() || request.user_id.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST",
            "exam_id and user_id are required",
        ));
    }

    let session = blocking(&state, move |state| {
        state
            .registry
            .create(request.exam_id, request.user_id, Utc::now())
    })
    .await?
    .map_err(|e| {
        tracing::error!("Failed to create session: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", e.to_string())
    })?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /sessions/:id/complete
async fn complete_session(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let id = session_id.clone();
    blocking(&state, move |state| state.registry.complete(&id, Utc::now()))
        .await?
        .map(Json)
        .map_err(|e| lifecycle_error(&session_id, e))
}

/// GET /sessions
async fn list_sessions(
    State(state): State<Arc<ServerState>>,
    Query(filter): Query<SessionFilter>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    blocking(&state, move |state| {
        let sessions = state.registry.list(&filter);
        sessions.into_iter().map(|s| state.summarize(s)).collect::<Vec<_>>()
    })
    .await
    .map(Json)
}

/// GET /users/:user_id/history
async fn user_history(
    State(state): State<Arc<ServerState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    blocking(&state, move |state| {
        let sessions = state.registry.history(&user_id);
        sessions.into_iter().map(|s| state.summarize(s)).collect::<Vec<_>>()
    })
    .await
    .map(Json)
}

/// GET /sessions/:id
async fn get_session(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let id = session_id.clone();
    let found = blocking(&state, move |state| {
        state
            .registry
            .get(&id)
            .map(|session| (session, state.violations_of(&id)))
    })
    .await?;
    let (session, violations) = found.ok_or_else(|| session_not_found(&session_id))?;
    let credibility = state.engine.score(&violations);

    Ok(Json(SessionDetail {
        session,
        violations_by_severity: SeverityHistogram::from_events(&violations),
        credibility_score: credibility.score,
        total_violations: violations.len(),
        violations,
    }))
}

/// GET /sessions/:id/credibility
async fn get_credibility(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<Json<CredibilityScore>, ApiError> {
    let id = session_id.clone();
    let violations = blocking(&state, move |state| {
        state.registry.get(&id).map(|_| state.violations_of(&id))
    })
    .await?
    .ok_or_else(|| session_not_found(&session_id))?;
    Ok(Json(state.engine.score(&violations)))
}

/// POST /violations
///
/// The write happens while the session is held open, so a violation is
/// never stored against a completed session. Never fails the exam because
/// of storage: if the write fails, a provisional record is returned with
/// `202 Accepted`.
async fn log_violation(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<LogViolationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ViolationEvent>), ApiError> {
    let Json(request) = payload
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, "INVALID_VIOLATION", e.body_text()))?;

    let now = Utc::now();
    let severity = request
        .severity
        .unwrap_or_else(|| state.severities.severity_for(request.kind));
    let mut event = ViolationEvent::new(&request.session_id, request.kind, severity, now);
    event.metadata = request.metadata;

    let pending = event.clone();
    let appended = blocking(&state, move |state| {
        state
            .registry
            .while_in_progress(&pending.session_id, |_| state.store.append(&pending))
    })
    .await?
    .map_err(|e| lifecycle_error(&request.session_id, e))?;

    match appended {
        Ok(stored) => Ok((StatusCode::CREATED, Json(stored))),
        Err(e) => {
            tracing::error!(
                session_id = %event.session_id,
                kind = %event.kind,
                "Failed to persist violation, returning provisional record: {}",
                e
            );
            event.id = format!("provisional-{}", now.timestamp_millis());
            Ok((StatusCode::ACCEPTED, Json(event)))
        }
    }
}

/// GET /violations/:session_id
async fn list_violations(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<ViolationEvent>>, ApiError> {
    let id = session_id.clone();
    let listed = blocking(&state, move |state| {
        state
            .registry
            .get(&id)
            .map(|_| state.store.list_by_session(&id))
    })
    .await?
    .ok_or_else(|| session_not_found(&session_id))?;
    listed.map(Json).map_err(|e| {
        tracing::error!("Failed to read violations for {}: {}", session_id, e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", e.to_string())
    })
}

/// Build the router over existing state.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/complete", post(complete_session))
        .route("/sessions/:id/credibility", get(get_credibility))
        .route("/users/:user_id/history", get(user_history))
        .route("/violations", post(log_violation))
        .route("/violations/:session_id", get(list_violations))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://localhost:5173"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(config: ServerConfig) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new(&config)?);
    serve(state, config.port).await
}

/// Serve `state` on `port` until the returned sender fires.
pub async fn serve(
    state: Arc<ServerState>,
    port: u16,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Exam integrity server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
