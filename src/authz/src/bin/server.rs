//! # Warden HTTP Server
//!
//! Demonstration service whose handlers run behind interception chains.
//!
//! ## Endpoints
//!
//! - `GET /api/v1/hello` - `ROLE_ADMIN`, audited as `HELLO`
//! - `GET /api/v1/user` - `ROLE_USER`
//! - `GET /api/v1/common` - `ROLE_ADMIN` or `ROLE_USER`
//! - `GET /auth/profile` - any authenticated caller
//! - `GET /auth/admin/users` - `ROLE_ADMIN`
//! - `GET /api/v1/audit` - permission `audit:read`
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics
//!
//! ## Identity
//!
//! Token verification is out of scope. The caller is taken from the
//! `X-Principal` header (principal id) and `X-Authorities` header
//! (comma-separated authorities). No `X-Principal` means anonymous.
//!
//! ## Configuration
//!
//! - `WARDEN_CONFIG` - TOML file (default: built-in `config/warden.toml`)
//! - `WARDEN_AUDIT_WORKERS`, `WARDEN_AUDIT_CAPACITY`, `WARDEN_AUDIT_OVERFLOW`
//! - `RUST_LOG` - Log level (default: info)

use axum::{
    async_trait,
    extract::{FromRequestParts, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    serve, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_authz::{
    AuditRecord, AuditSink, Denial, GateMetrics, InMemoryAuditStore, InterceptionChain,
    OperationRegistry, Outcome, Principal, SecurityContextAccessor, StatusKind, WardenConfig,
};

const DEFAULT_CONFIG: &str = include_str!("../../config/warden.toml");

const PRINCIPAL_HEADER: &str = "x-principal";
const AUTHORITIES_HEADER: &str = "x-authorities";

/// Shared application state
#[derive(Clone)]
struct AppState {
    chains: Arc<HashMap<String, InterceptionChain>>,
    sink: Arc<AuditSink>,
    store: Arc<InMemoryAuditStore>,
    metrics: Option<Arc<GateMetrics>>,
    start_time: std::time::Instant,
}

/// Uniform response body
#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    code: u16,
    message: String,
    data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: "OK".to_string(),
            data: Some(data),
        }
    }
}

/// Application error type
#[derive(Debug)]
enum AppError {
    Denied(Denial),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Denied(denial) => {
                let status = match denial.status {
                    StatusKind::Unauthorized => StatusCode::UNAUTHORIZED,
                    StatusKind::Forbidden => StatusCode::FORBIDDEN,
                };
                (status, denial.message)
            }
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ApiResponse::<()> {
            code: status.as_u16(),
            message,
            data: None,
        });

        (status, body).into_response()
    }
}

/// Caller identity resolved from request headers
#[derive(Debug, Clone)]
struct Caller(Option<Principal>);

impl Caller {
    fn from_headers(headers: &HeaderMap) -> Self {
        let id = headers
            .get(PRINCIPAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let Some(id) = id else {
            return Caller(None);
        };

        let authorities = headers
            .get(AUTHORITIES_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty());

        Caller(Some(Principal::new(id).with_authorities(authorities)))
    }
}

impl SecurityContextAccessor for Caller {
    fn resolve_principal(&self) -> Option<Principal> {
        self.0.clone()
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Caller::from_headers(&parts.headers))
    }
}

impl AppState {
    /// Run `op` behind the chain registered for `action`
    fn guarded<A, T, F>(
        &self,
        action: &str,
        caller: &Caller,
        args: A,
        op: F,
    ) -> Result<Json<ApiResponse<T>>, AppError>
    where
        A: Debug,
        F: FnOnce(Option<&Principal>, A) -> Result<T, AppError>,
    {
        let chain = self
            .chains
            .get(action)
            .ok_or_else(|| AppError::Internal(format!("no chain registered for '{}'", action)))?;

        match chain.call_with(caller, args, op) {
            Outcome::Allowed(data) => Ok(Json(ApiResponse::ok(data))),
            Outcome::Denied(denial) => Err(AppError::Denied(denial)),
            Outcome::OperationFailed(err) => Err(err),
        }
    }
}

#[derive(Debug, Serialize)]
struct Profile {
    username: String,
    authorities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    actor: Option<String>,
    #[serde(default = "default_audit_limit")]
    limit: usize,
}

fn default_audit_limit() -> usize {
    50
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    version: String,
    audit_queued: usize,
}

/// Metrics response (Prometheus format)
struct MetricsResponse {
    metrics: String,
}

impl IntoResponse for MetricsResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            self.metrics,
        )
            .into_response()
    }
}

/// GET /api/v1/hello
async fn hello(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<ApiResponse<String>>, AppError> {
    state.guarded("hello", &caller, (), |_, _| {
        Ok("Hello, World! You have admin permissions.".to_string())
    })
}

/// GET /api/v1/user
async fn user(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<ApiResponse<String>>, AppError> {
    state.guarded("user", &caller, (), |_, _| {
        Ok("Hello, User! You are logged in.".to_string())
    })
}

/// GET /api/v1/common
async fn common(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<ApiResponse<String>>, AppError> {
    state.guarded("common", &caller, (), |_, _| {
        Ok("Hello! Welcome authenticated user.".to_string())
    })
}

/// GET /auth/profile
async fn profile(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<ApiResponse<Profile>>, AppError> {
    state.guarded("profile", &caller, (), |principal, _| {
        let principal = principal
            .ok_or_else(|| AppError::Internal("profile requested without a principal".into()))?;
        Ok(Profile {
            username: principal.id.clone(),
            authorities: principal.authorities.iter().cloned().collect(),
        })
    })
}

/// GET /auth/admin/users
async fn admin_users(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<ApiResponse<Vec<String>>>, AppError> {
    state.guarded("admin_users", &caller, (), |_, _| {
        Ok(vec!["admin".to_string(), "user".to_string()])
    })
}

/// GET /api/v1/audit
async fn audit_log(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<AuditQuery>,
) -> Result<Json<ApiResponse<Vec<AuditRecord>>>, AppError> {
    let store = Arc::clone(&state.store);
    state.guarded("audit_log", &caller, &query, move |_, query| {
        let limit = query.limit.min(1_000);
        Ok(match &query.actor {
            Some(actor) => store.query_by_actor(actor, limit),
            None => store.recent(limit),
        })
    })
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: warden_authz::VERSION.to_string(),
        audit_queued: state.sink.stats().queued,
    })
}

/// GET /metrics
async fn metrics(State(state): State<AppState>) -> MetricsResponse {
    let audit = state.sink.stats();
    let mut metrics = match &state.metrics {
        Some(collector) => collector.export_prometheus(Some(&audit)),
        None => String::new(),
    };

    metrics.push_str(&format!(
        "\n# HELP warden_uptime_seconds Server uptime in seconds\n\
         # TYPE warden_uptime_seconds gauge\n\
         warden_uptime_seconds {}\n",
        state.start_time.elapsed().as_secs()
    ));

    MetricsResponse { metrics }
}

/// Create the HTTP router with all endpoints
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http()
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/api/v1/hello", get(hello))
        .route("/api/v1/user", get(user))
        .route("/api/v1/common", get(common))
        .route("/api/v1/audit", get(audit_log))
        .route("/auth/profile", get(profile))
        .route("/auth/admin/users", get(admin_users))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(ServiceBuilder::new().layer(trace).layer(cors))
        .with_state(state)
}

fn load_config() -> warden_authz::Result<WardenConfig> {
    let mut config = match std::env::var("WARDEN_CONFIG") {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            WardenConfig::from_file(path)?
        }
        Err(_) => WardenConfig::from_toml_str(DEFAULT_CONFIG)?,
    };

    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

fn build_chains(
    registry: &OperationRegistry,
    sink: &Arc<AuditSink>,
    metrics: &Option<Arc<GateMetrics>>,
) -> warden_authz::Result<HashMap<String, InterceptionChain>> {
    let mut chains = HashMap::new();

    for action in registry.actions() {
        let mut builder = registry.chain(action, sink.clone())?;
        if let Some(metrics) = metrics {
            builder = builder.metrics(Arc::clone(metrics));
        }
        chains.insert(action.to_string(), builder.build()?);
    }

    Ok(chains)
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

/// Main server entrypoint
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Warden server v{}", warden_authz::VERSION);

    let config = load_config()?;
    info!("Configuration:");
    info!("  Listen: {}", config.server.listen_addr);
    info!(
        "  Audit: workers={}, capacity={}, overflow={:?}",
        config.audit.workers, config.audit.capacity, config.audit.overflow
    );
    info!("  Operations: {}", config.operations.len());

    let registry = OperationRegistry::from_config(&config.operations)?;

    let store = Arc::new(InMemoryAuditStore::new());
    let sink = Arc::new(AuditSink::start(config.audit.clone(), store.clone())?);
    let metrics = config.metrics_enabled.then(|| Arc::new(GateMetrics::new()));

    let chains = build_chains(&registry, &sink, &metrics)?;

    let state = AppState {
        chains: Arc::new(chains),
        sink: Arc::clone(&sink),
        store,
        metrics,
        start_time: std::time::Instant::now(),
    };

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Starting HTTP server on {}", addr);

    let server = serve(listener, create_router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        error!("HTTP server error: {}", e);
    }

    if !sink.flush(Duration::from_secs(5)).await {
        warn!("Audit queue not fully drained before shutdown");
    }
    sink.shutdown().await;

    info!("Server shut down gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_caller_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(PRINCIPAL_HEADER, HeaderValue::from_static("alice"));
        headers.insert(
            AUTHORITIES_HEADER,
            HeaderValue::from_static("ROLE_ADMIN, audit:read,,"),
        );

        let principal = Caller::from_headers(&headers).resolve_principal().unwrap();
        assert_eq!(principal.id, "alice");
        assert_eq!(principal.authorities.len(), 2);
        assert!(principal.has_authority("audit:read"));
    }

    #[test]
    fn test_missing_principal_header_is_anonymous() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORITIES_HEADER, HeaderValue::from_static("ROLE_ADMIN"));
        assert!(Caller::from_headers(&headers).resolve_principal().is_none());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = WardenConfig::from_toml_str(DEFAULT_CONFIG).unwrap();
        assert!(config.validate().is_ok());

        let registry = OperationRegistry::from_config(&config.operations).unwrap();
        for action in ["hello", "user", "common", "profile", "admin_users", "audit_log"] {
            assert!(registry.get(action).is_ok(), "missing {}", action);
        }
        assert_eq!(registry.audit_action("hello"), Some("HELLO"));
    }

    #[test]
    fn test_denial_status_mapping() {
        let response =
            AppError::Denied(Denial::unauthorized(warden_authz::GateKind::Authentication, "x"))
                .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response =
            AppError::Denied(Denial::forbidden(warden_authz::GateKind::Role, "x")).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
