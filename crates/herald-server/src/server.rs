//! `HeraldServer`: HTTP, WebSocket and SSE surface over the push core.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use herald_bus::Bus;
use herald_core::{Identity, IdentityResolver, RecipientKey};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::auth::credentials_from_request;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::http::{ApiError, ApiResponse, ApiResult};
use crate::push::{CloseReason, ConnectionRegistry, FanoutRouter, PublishReport};
use crate::shutdown::ShutdownCoordinator;
use crate::sse::StreamLifecycle;
use crate::sse::handler::{sse_close_handler, sse_handler};
use crate::websocket::DuplexLifecycle;
use crate::websocket::handler::ws_handler;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Fan-out router.
    pub router: Arc<FanoutRouter>,
    /// Duplex transport lifecycle.
    pub duplex: Arc<DuplexLifecycle>,
    /// Stream transport lifecycle.
    pub stream: Arc<StreamLifecycle>,
    /// Resolves request credentials to an identity.
    pub resolver: Arc<dyn IdentityResolver>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    /// Resolve the caller of a request.
    pub fn identify(&self, headers: &HeaderMap, query: &HashMap<String, String>) -> ApiResult<Identity> {
        let credentials = credentials_from_request(headers, query, &self.config.token_query_param);
        Ok(self.resolver.resolve(&credentials)?)
    }
}

/// One push instance.
pub struct HeraldServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    router: Arc<FanoutRouter>,
    duplex: Arc<DuplexLifecycle>,
    stream: Arc<StreamLifecycle>,
    resolver: Arc<dyn IdentityResolver>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics_handle: Option<PrometheusHandle>,
}

impl HeraldServer {
    /// Create a server publishing on `bus` and authenticating with `resolver`.
    pub fn new(
        config: ServerConfig,
        bus: Arc<dyn Bus>,
        resolver: Arc<dyn IdentityResolver>,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(FanoutRouter::new(registry.clone(), bus, config.topic.clone()));
        let duplex = Arc::new(DuplexLifecycle::new(
            router.clone(),
            config.heartbeat.clone(),
            config.websocket.send_queue_capacity,
        ));
        let stream = Arc::new(StreamLifecycle::new(
            registry.clone(),
            config.sse.send_queue_capacity,
            std::time::Duration::from_secs(config.sse.keep_alive_secs.max(1)),
        ));
        Self {
            config: Arc::new(config),
            registry,
            router,
            duplex,
            stream,
            resolver,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics_handle,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            config: self.config.clone(),
            router: self.router.clone(),
            duplex: self.duplex.clone(),
            stream: self.stream.clone(),
            resolver: self.resolver.clone(),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
        };

        let mut app = Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route(&self.config.api_route("send"), get(send_handler))
            .route(&self.config.api_route("sendAll"), get(send_all_handler));
        if self.config.websocket.enabled {
            app = app.route(&self.config.websocket.path, get(ws_handler));
        }
        if self.config.sse.enabled {
            app = app
                .route(&self.config.sse.path, get(sse_handler))
                .route(&self.config.sse_close_path(), get(sse_close_handler));
        }

        app.with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind, subscribe to the shared topic, and serve until shutdown.
    ///
    /// Returns the bound address and the server task. The bus subscription is
    /// live when this returns.
    pub async fn listen(&self) -> io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;

        let token = self.shutdown.token();
        let subscriber = self.router.start(token.clone()).await.map_err(io::Error::other)?;
        let app = self.router();
        let instance_id = self.config.instance_id.clone();

        info!(%addr, instance_id, topic = self.router.topic(), "herald server listening");
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server error");
            }
            let _ = subscriber.await;
            info!(instance_id, "herald server stopped");
        });
        Ok((addr, handle))
    }

    /// Close every connection with `1001 going away` and stop serving.
    pub fn shutdown(&self) {
        let closed = self.registry.close_all(CloseReason::GoingAway);
        info!(closed, "shutdown requested");
        self.shutdown.shutdown();
    }

    /// Shutdown coordinator.
    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Connection registry of this instance.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Fan-out router of this instance.
    pub fn fanout(&self) -> &Arc<FanoutRouter> {
        &self.router
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.router.registry();
    Json(health::health_check(
        state.start_time,
        &state.config.instance_id,
        registry.handle_count(),
        registry.key_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendQuery {
    user_id: Option<String>,
    msg: Option<String>,
}

/// GET {api}/send?userId=&msg=
///
/// `userId` may list several recipients separated by commas.
async fn send_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(raw): Query<HashMap<String, String>>,
    Query(query): Query<SendQuery>,
) -> ApiResult<ApiResponse<PublishReport>> {
    let _caller = state.identify(&headers, &raw)?;
    let targets: BTreeSet<RecipientKey> = query
        .user_id
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(RecipientKey::from)
        .collect();
    if targets.is_empty() {
        return Err(ApiError::bad_request("userId is required"));
    }
    let msg = query.msg.ok_or_else(|| ApiError::bad_request("msg is required"))?;

    let report = state.router.publish(&targets, &msg).await?;
    Ok(ApiResponse::ok(report))
}

/// GET {api}/sendAll?msg=
async fn send_all_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(raw): Query<HashMap<String, String>>,
    Query(query): Query<SendQuery>,
) -> ApiResult<ApiResponse<()>> {
    let _caller = state.identify(&headers, &raw)?;
    let msg = query.msg.ok_or_else(|| ApiError::bad_request("msg is required"))?;
    state.router.publish_all(&msg).await?;
    Ok(ApiResponse::empty())
}
