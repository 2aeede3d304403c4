//! REST front-end for the user registry.

use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::registry::{Upserted, UserParams};
use crate::storage::{create_storage, Storage};
use crate::telemetry;
use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, Path, Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Form, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

type SharedStorage = Arc<dyn Storage>;

#[derive(Clone)]
struct AppState {
    storage: SharedStorage,
    config: Arc<RegistryConfig>,
    metrics: Option<PrometheusHandle>,
    addr: SocketAddr,
    hostname: Arc<str>,
}

impl AppState {
    async fn observe(&self, operation: &'static str, outcome: &'static str) {
        if self.metrics.is_none() {
            return;
        }
        telemetry::record_operation(operation, outcome);
        if let Ok(size) = self.storage.len().await {
            telemetry::record_registry_size(size);
        }
    }
}

#[derive(Clone, Copy, Default)]
struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string()).ok()?;
        Some(RequestId::new(id))
    }
}

#[derive(Deserialize, Default)]
struct RawParams {
    age: Option<Value>,
    occupation: Option<Value>,
}

fn scalar(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// How a request body should be read, from its `Content-Type`.
#[derive(Debug, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
    Other,
}

impl BodyKind {
    fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let Some(value) = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        else {
            return BodyKind::Other;
        };

        let essence = value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.split_once('/') {
            Some(("application", "json")) => BodyKind::Json,
            Some(("application", subtype)) if subtype.ends_with("+json") => BodyKind::Json,
            Some(("application", "x-www-form-urlencoded")) => BodyKind::Form,
            _ => BodyKind::Other,
        }
    }
}

/// `age` and `occupation` taken from a JSON or form body, falling back to
/// the query string. Nothing is required.
struct RequestParams(UserParams);

impl<S> FromRequest<S> for RequestParams
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(
        mut req: Request,
        state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let query = Query::<RawParams>::try_from_uri(req.uri())
            .map(|Query(params)| params)
            .unwrap_or_default();

        let kind = BodyKind::from_headers(req.headers());

        let body = if kind == BodyKind::Json {
            let bytes = Bytes::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            if bytes.is_empty() {
                RawParams::default()
            } else {
                serde_json::from_slice(&bytes).map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        Json(format!("Invalid JSON body: {}", e)),
                    )
                        .into_response()
                })?
            }
        } else if kind == BodyKind::Form {
            // Form only accepts the canonical spelling.
            req.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
            let Form(params) = Form::<RawParams>::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            params
        } else {
            RawParams::default()
        };

        Ok(Self(UserParams {
            age: scalar(body.age).or_else(|| scalar(query.age)),
            occupation: scalar(body.occupation).or_else(|| scalar(query.occupation)),
        }))
    }
}

#[derive(Serialize)]
struct HealthReport {
    hostname: String,
    status: &'static str,
    timestamp: u64,
    results: Vec<CheckResult>,
}

#[derive(Serialize)]
struct CheckResult {
    checker: &'static str,
    output: String,
    passed: bool,
    timestamp: u64,
}

/// Kernel host name, falling back to `HOSTNAME` and `/etc/hostname`.
fn hostname() -> String {
    let from_file = |path: &str| {
        std::fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    from_file("/proc/sys/kernel/hostname")
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()))
        .or_else(|| from_file("/etc/hostname"))
        .unwrap_or_else(|| "localhost".to_string())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// The user registry server.
///
/// Serves `GET/POST/PUT/DELETE /user/{name}` plus health, environment,
/// stats and metrics endpoints, all under the configured route prefix.
pub struct RegistryServer {
    addr: SocketAddr,
    prefix: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl RegistryServer {
    /// Creates and starts a new registry server with the given configuration.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use user_registry::{RegistryServer, RegistryConfig};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = RegistryConfig::seeded().with_service_name("crud");
    /// let server = RegistryServer::new(config).await?;
    /// println!("Users at {}/user/Jonas", server.url());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(config: RegistryConfig) -> Result<Self> {
        config.validate()?;

        let bind_addr = if let Some(port) = config.port {
            format!("{}:{}", config.host, port)
        } else {
            format!("{}:0", config.host)
        };

        let listener = TcpListener::bind(&bind_addr).await?;
        let addr = listener.local_addr()?;

        let metrics = if config.metrics_enabled {
            Some(telemetry::install_recorder()?)
        } else {
            None
        };

        let storage = create_storage(&config);
        let prefix = config.route_prefix();
        let tracing_enabled = config.tracing_enabled;

        let state = AppState {
            storage,
            config: Arc::new(config),
            metrics,
            addr,
            hostname: hostname().into(),
        };

        let app = router(state, &prefix, tracing_enabled);

        info!("User registry listening on {}{}", addr, prefix);

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let shutdown = async {
                rx.await.ok();
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!("Server stopped with error: {}", e);
            }
        });

        Ok(Self {
            addr,
            prefix,
            shutdown: Some(tx),
            handle,
        })
    }

    /// Returns the socket address the server is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the base URL, route prefix included.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use user_registry::{RegistryServer, RegistryConfig};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let server = RegistryServer::new(RegistryConfig::seeded()).await?;
    /// println!("Registry URL: {}", server.url());
    /// # Ok(())
    /// # }
    /// ```
    pub fn url(&self) -> String {
        format!("http://{}{}", self.addr, self.prefix)
    }

    /// Returns the port number the server is listening on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stops accepting connections and waits for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        if let Err(e) = self.handle.await {
            warn!("Server task failed: {}", e);
        }
    }
}

fn router(state: AppState, prefix: &str, tracing_enabled: bool) -> Router {
    let mut routes = Router::new()
        .route("/", get(index))
        .route("/ping", get(ping))
        .route("/healthcheck", get(health_check))
        .route("/environment", get(environment))
        .route("/stats", get(stats))
        .route(
            "/user/{name}",
            get(get_user)
                .post(create_user)
                .put(upsert_user)
                .delete(delete_user),
        );

    if state.metrics.is_some() {
        routes = routes
            .route("/metrics", get(metrics_text))
            .route_layer(middleware::from_fn(telemetry::track_requests));
    }

    let routes = if prefix.is_empty() {
        routes
    } else {
        Router::new()
            .route(&format!("{}/", prefix), get(index))
            .nest(prefix, routes)
    };

    let mut app = routes.with_state(state);

    if tracing_enabled {
        app = app.layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<Body>| {
                let request_id = req
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default();
                tracing::info_span!(
                    "request",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = %request_id,
                )
            }),
        );
    }

    app.layer(
        tower::ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}

async fn index(State(state): State<AppState>) -> Json<String> {
    Json(format!(
        "This is the user registry service - GET/POST/PUT/DELETE - http://{}{}/user/{{name}}",
        state.addr,
        state.config.route_prefix()
    ))
}

async fn ping(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::FOUND,
        [(
            header::LOCATION,
            format!("{}/healthcheck", state.config.route_prefix()),
        )],
    )
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let now = unix_now();
    let (passed, output) = match state.storage.len().await {
        Ok(size) => (true, format!("{} users registered", size)),
        Err(e) => (false, e.to_string()),
    };

    let report = HealthReport {
        hostname: state.hostname.to_string(),
        status: if passed { "success" } else { "failure" },
        timestamp: now,
        results: vec![CheckResult {
            checker: "registry",
            output,
            passed,
            timestamp: now,
        }],
    };

    let status = if passed {
        StatusCode::OK
    } else {
        warn!("Health check failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (status, Json(report))
}

async fn environment(State(state): State<AppState>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "application": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "service_name": config.service_name,
            "route_prefix": config.route_prefix(),
            "address": state.addr.to_string(),
        },
        "os": {
            "family": std::env::consts::FAMILY,
            "platform": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        },
        "process": {
            "pid": std::process::id(),
        },
        "features": {
            "metrics": config.metrics_enabled,
            "tracing": config.tracing_enabled,
            "stats": {
                "max_delay_ms": config.stats.max_delay.as_millis() as u64,
                "failure_rate": config.stats.failure_rate,
            },
        },
    }))
}

async fn stats(State(state): State<AppState>) -> Response {
    let stats = &state.config.stats;
    let (delay_ms, fail) = {
        let mut rng = rand::thread_rng();
        let max_ms = stats.max_delay.as_millis() as u64;
        (rng.gen_range(0..=max_ms), rng.gen_bool(stats.failure_rate))
    };

    tokio::time::sleep(Duration::from_millis(delay_ms)).await;

    if fail {
        warn!("Synthetic stats failure after {}ms", delay_ms);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json("Internal stats error"),
        )
            .into_response();
    }

    debug!("Stats served after {}ms", delay_ms);
    (StatusCode::OK, Json(json!({ "delay_ms": delay_ms }))).into_response()
}

async fn metrics_text(State(state): State<AppState>) -> Response {
    match state.metrics.as_ref() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            telemetry::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn internal_error(e: RegistryError) -> Response {
    warn!("Registry operation failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, Json(e.to_string())).into_response()
}

async fn get_user(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    debug!("Getting user: {}", name);

    match state.storage.find(&name).await {
        Ok(Some(user)) => {
            state.observe("get", "found").await;
            (StatusCode::OK, Json(user)).into_response()
        }
        Ok(None) => {
            state.observe("get", "not_found").await;
            (StatusCode::NOT_FOUND, Json("User not found")).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn create_user(
    State(state): State<AppState>,
    Path(name): Path<String>,
    RequestParams(params): RequestParams,
) -> Response {
    match state.storage.create(&name, params).await {
        Ok(user) => {
            info!("Created user: {}", name);
            state.observe("create", "created").await;
            (StatusCode::CREATED, Json(user)).into_response()
        }
        Err(e @ RegistryError::Conflict(_)) => {
            warn!("Rejected duplicate user: {}", name);
            state.observe("create", "conflict").await;
            (StatusCode::BAD_REQUEST, Json(e.to_string())).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn upsert_user(
    State(state): State<AppState>,
    Path(name): Path<String>,
    RequestParams(params): RequestParams,
) -> Response {
    match state.storage.upsert(&name, params).await {
        Ok(Upserted::Updated(user)) => {
            info!("Updated user: {}", name);
            state.observe("upsert", "updated").await;
            (StatusCode::OK, Json(user)).into_response()
        }
        Ok(Upserted::Created(user)) => {
            info!("Created user via upsert: {}", name);
            state.observe("upsert", "created").await;
            (StatusCode::CREATED, Json(user)).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn delete_user(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.storage.delete(&name).await {
        Ok(removed) => {
            info!("Deleted user: {} ({} removed)", name, removed);
            state.observe("delete", if removed > 0 { "deleted" } else { "absent" }).await;
            (StatusCode::OK, Json(format!("{} is deleted.", name))).into_response()
        }
        Err(e) => internal_error(e),
    }
}
