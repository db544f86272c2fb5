//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create Axum Router with the gateway handler as the catch-all
//! - Wire up middleware (tracing, request ID, body limit)
//! - Bind server to listener
//! - Match requests against the current route table snapshot
//! - Apply CORS and trace headers, authenticate, forward to the event bus
//! - Wait for the correlated reply and render it
//! - Hot swap the route table on config updates
//! - Observability (metrics, correlation IDs)
//!
//! # Design Decisions
//! - Every request works on one route table snapshot from start to finish
//! - Service existence is checked before the body is read
//! - A spooled stream is discarded when the request fails before forwarding

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, DefaultBodyLimit, State},
    http::{header, HeaderMap, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::bus::{EventBus, StreamRegistry};
use crate::config::GatewayConfig;
use crate::dispatch::{authenticate, forward, select_auth_service, Correlator, PendingReply, TraceContext};
use crate::error::{GatewayError, GatewayResult};
use crate::http::body::{self, BodyContext};
use crate::http::headers::{canonical_headers, insert_all};
use crate::http::request::{assemble, resolve_trace_id, sanitize_path, trace_path, AsyncHttpRequest};
use crate::http::response::render;
use crate::http::static_files::StaticFiles;
use crate::observability::metrics;
use crate::routing::{RouteInfo, RouteMatch, RouteTable, RouteTableBuilder, SharedRouteTable};

/// Prefix of the address replies are sent to.
pub const REPLY_PREFIX: &str = "async.http.response";
const REQUEST_ID: &str = "x-request-id";

/// Compile the `rest`, `cors` and `headers` sections.
pub fn build_route_table(config: &GatewayConfig) -> RouteTable {
    let mut builder = RouteTableBuilder::new();
    builder.load_headers(&config.headers);
    builder.load_cors(&config.cors);
    builder.load_rest(&config.rest);
    let rejected = builder.rejected().len();
    if rejected > 0 {
        tracing::warn!(rejected, "Some configuration entries were skipped");
    }
    builder.finish()
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: SharedRouteTable,
    pub bus: Arc<dyn EventBus>,
    pub correlator: Arc<Correlator>,
    pub streams: Arc<StreamRegistry>,
    pub body: BodyContext,
    pub static_files: Option<Arc<StaticFiles>>,
    pub trace_headers: Arc<[String]>,
    /// Address this instance receives replies on.
    pub reply_to: Arc<str>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
    stream_ttl: Duration,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    ///
    /// The caller registers [`HttpServer::correlator`] on the bus under
    /// [`HttpServer::reply_address`].
    pub fn new(config: &GatewayConfig, bus: Arc<dyn EventBus>, streams: Arc<StreamRegistry>) -> Self {
        let settings = &config.gateway;
        let origin = if settings.origin.trim().is_empty() {
            uuid::Uuid::new_v4().simple().to_string()
        } else {
            settings.origin.trim().to_string()
        };

        let state = AppState {
            routes: SharedRouteTable::new(build_route_table(config)),
            bus,
            correlator: Arc::new(Correlator::new()),
            body: BodyContext {
                streams: Arc::clone(&streams),
                max_buffered: settings.max_buffered_body,
            },
            streams,
            static_files: settings
                .static_root
                .as_ref()
                .map(|root| Arc::new(StaticFiles::new(root, settings.default_document.clone()))),
            trace_headers: settings.trace_headers.clone().into(),
            reply_to: format!("{}@{}", REPLY_PREFIX, origin).into(),
        };

        let router = Self::build_router(state.clone());
        Self {
            router,
            state,
            stream_ttl: Duration::from_secs(settings.stream_ttl_secs.max(1)),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(gateway_handler)
            .with_state(state)
            .layer(DefaultBodyLimit::disable())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn routes(&self) -> SharedRouteTable {
        self.state.routes.clone()
    }

    pub fn correlator(&self) -> Arc<Correlator> {
        Arc::clone(&self.state.correlator)
    }

    pub fn reply_address(&self) -> &str {
        &self.state.reply_to
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: Option<mpsc::UnboundedReceiver<GatewayConfig>>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, reply_to = %self.state.reply_to, "HTTP server starting");

        let reloader = config_updates.map(|mut updates| {
            let routes = self.state.routes.clone();
            tokio::spawn(async move {
                while let Some(config) = updates.recv().await {
                    routes.swap(build_route_table(&config));
                }
            })
        });

        let sweeper = {
            let streams = Arc::clone(&self.state.streams);
            let ttl = self.stream_ttl;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval((ttl / 2).max(Duration::from_secs(1)));
                loop {
                    interval.tick().await;
                    streams.expire(ttl);
                }
            })
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        sweeper.abort();
        if let Some(reloader) = reloader {
            reloader.abort();
        }
        tracing::info!("HTTP server stopped");
        result
    }
}

/// Headers and labels collected while dispatching, applied to every outcome.
#[derive(Default)]
struct Outcome {
    headers: Vec<(String, String)>,
    service: Option<String>,
}

/// Main gateway handler. Every request lands here.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let method = request.method().as_str().to_string();
    let path = sanitize_path(request.uri().path());

    tracing::debug!(request_id = %request_id, method = %method, path = %path, "Dispatching request");

    let mut outcome = Outcome::default();
    let mut response = match dispatch(&state, request, &path, &mut outcome).await {
        Ok(response) => response,
        Err(e) => {
            if e.status().is_server_error() || e.status() == StatusCode::REQUEST_TIMEOUT {
                tracing::warn!(request_id = %request_id, method = %method, path = %path, error = %e, "Request failed");
            } else {
                tracing::debug!(request_id = %request_id, method = %method, path = %path, error = %e, "Request rejected");
            }
            e.into_response_for(&path)
        }
    };
    insert_all(response.headers_mut(), outcome.headers.iter().map(|(k, v)| (k, v)));

    let service = outcome.service.as_deref().unwrap_or("none");
    metrics::record_request(&method, response.status().as_u16(), service, start_time);
    response
}

async fn dispatch(
    state: &AppState,
    request: Request<Body>,
    path: &str,
    outcome: &mut Outcome,
) -> GatewayResult<Response> {
    let table = state.routes.load();
    let route = match table.find(request.method().as_str(), path) {
        RouteMatch::Matched(route) => route,
        RouteMatch::MethodNotAllowed => return Err(GatewayError::MethodNotAllowed),
        RouteMatch::NotFound => return serve_static(state, request.method(), request.headers(), path).await,
    };
    let info = Arc::clone(&route.info);

    let cors = info.cors_id.as_deref().and_then(|id| table.cors(id));
    if request.method() == Method::OPTIONS {
        let cors = cors
            .filter(|c| !c.options.is_empty())
            .ok_or(GatewayError::MethodNotAllowed)?;
        let mut response = StatusCode::NO_CONTENT.into_response();
        let preflight = canonical_headers(&cors.options);
        insert_all(response.headers_mut(), preflight.iter().map(|(k, v)| (k, v)));
        return Ok(response);
    }
    if let Some(cors) = cors {
        outcome.headers.extend(canonical_headers(&cors.headers));
    }
    outcome.service = Some(info.primary.clone());

    if !state.bus.exists(&info.primary).await {
        return Err(GatewayError::ServiceUnavailable(info.primary.clone()));
    }
    let auth_service = select_auth_service(&info, request.headers());
    if let Some(service) = &auth_service {
        if !state.bus.exists(service).await {
            return Err(GatewayError::ServiceUnavailable(service.clone()));
        }
    }

    let (parts, body) = request.into_parts();
    let remote = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    let mut req = assemble(&parts, path, &route, &table, remote);

    let trace = if info.tracing {
        let (label, id) = resolve_trace_id(&parts.headers, &state.trace_headers);
        outcome.headers.push((label, id.clone()));
        Some(TraceContext {
            id,
            path: trace_path(parts.method.as_str(), path, parts.uri.query()),
        })
    } else {
        None
    };

    if let Some(strategy) = body::select(&parts.method, &parts.headers, info.threshold) {
        tracing::debug!(path = %path, strategy = %strategy, "Reading request body");
        body::materialize(strategy, Request::from_parts(parts, body), &mut req, &state.body).await?;
    }

    let spooled = req.stream.clone();
    let pending = match authorize_and_forward(state, &info, auth_service, &mut req, trace.as_ref()).await {
        Ok(pending) => pending,
        Err(e) => {
            if let Some(id) = spooled {
                state.streams.discard(&id);
            }
            return Err(e);
        }
    };

    let reply = pending.wait(Duration::from_secs(info.timeout_secs)).await?;
    let transform = info
        .response_transform_id
        .as_deref()
        .and_then(|id| table.response_transform(id));
    render(reply, transform, &state.streams).await
}

async fn authorize_and_forward(
    state: &AppState,
    info: &RouteInfo,
    auth_service: Option<String>,
    req: &mut AsyncHttpRequest,
    trace: Option<&TraceContext>,
) -> GatewayResult<PendingReply> {
    if let Some(service) = auth_service {
        let timeout = Duration::from_secs(info.timeout_secs);
        let session = authenticate(state.bus.as_ref(), &service, req, timeout).await?;
        req.session = session;
    }
    let pending = state
        .correlator
        .register(&req.method, &req.url, info.response_transform_id.clone());
    forward(state.bus.as_ref(), info, req, pending.id(), &state.reply_to, trace).await?;
    Ok(pending)
}

async fn serve_static(state: &AppState, method: &Method, headers: &HeaderMap, path: &str) -> GatewayResult<Response> {
    if method == Method::GET {
        if let Some(files) = &state.static_files {
            let if_none_match = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok());
            if let Some(response) = files.serve(path, if_none_match).await {
                return Ok(response);
            }
        }
    }
    Err(GatewayError::NotFound)
}
