//! Sidecar HTTP server and route dispatch.
//!
//! All routes are GET. Every response, including 404s and upstream failures,
//! echoes the inbound `x-cloud-trace-context` header when one was sent and
//! carries a generated `x-request-id`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

use crate::config::SidecarConfig;
use crate::error::{ErrorResponse, SidecarError, SidecarResult};
use crate::forward::{Forwarder, RemoteCall};
use crate::headers::{build_identity_headers, echo_trace, trace_token, HEADER_REQUEST_ID};
use crate::lifecycle::LifecycleManager;
use crate::probe::probe;

/// Sidecar server.
pub struct SidecarServer {
    state: Arc<ServerState>,
}

/// Shared per-process state handed to every connection task.
struct ServerState {
    /// Configuration.
    config: SidecarConfig,
    /// Lifecycle manager owning the current handle.
    manager: Arc<LifecycleManager>,
    /// Forwarder for remote calls.
    forwarder: Forwarder,
    /// Start time for uptime reporting.
    started_at: Instant,
}

impl SidecarServer {
    /// Create a server with the default REST client factory.
    pub fn new(config: SidecarConfig) -> Self {
        let manager = Arc::new(LifecycleManager::new(&config));
        Self::with_manager(config, manager)
    }

    /// Create a server around an existing lifecycle manager.
    ///
    /// Used by tests and embeddings that inject their own client factory.
    pub fn with_manager(config: SidecarConfig, manager: Arc<LifecycleManager>) -> Self {
        let forwarder = Forwarder::new(manager.clone(), config.spanner.forward_timeout);
        Self {
            state: Arc::new(ServerState {
                config,
                manager,
                forwarder,
                started_at: Instant::now(),
            }),
        }
    }

    /// Run the server until ctrl-c.
    pub async fn run(self) -> SidecarResult<()> {
        let addr = SocketAddr::new(
            self.state
                .config
                .server
                .listen_addr
                .parse()
                .map_err(|e| SidecarError::config(format!("invalid listen address: {e}")))?,
            self.state.config.server.listen_port,
        );

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SidecarError::server(format!("failed to bind: {e}")))?;

        info!("spangate listening on {}", addr);
        info!("spanner endpoint: {}", self.state.config.spanner.endpoint);

        loop {
            let (stream, peer_addr) = tokio::select! {
                conn = listener.accept() => match conn {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                        continue;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            };

            let state = self.state.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req| {
                    let state = state.clone();
                    async move {
                        Ok::<_, Infallible>(handle_request(req, state, peer_addr).await)
                    }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("connection error: {}", e);
                }
            });
        }

        // Destroy the published handle on the way out, best-effort.
        self.state.manager.shutdown().await;
        Ok(())
    }
}

/// Handle one inbound request.
async fn handle_request(
    req: Request<Incoming>,
    state: Arc<ServerState>,
    peer_addr: SocketAddr,
) -> Response<Full<Bytes>> {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = Uuid::now_v7().to_string();
    let trace = trace_token(req.headers());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
        peer = %peer_addr,
    );

    async {
        let response = dispatch(&method, &path, req.headers(), &state, &request_id).await;

        info!(
            status = %response.status(),
            duration_ms = %start.elapsed().as_millis(),
            "request completed"
        );

        finalize_response(response, trace.as_deref(), &request_id)
    }
    .instrument(span)
    .await
}

/// Route a request to its handler.
async fn dispatch(
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    state: &ServerState,
    request_id: &str,
) -> Response<Full<Bytes>> {
    if method != Method::GET {
        return error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            &format!("unsupported method: {method}"),
            request_id,
        );
    }

    let trace = trace_token(headers);
    // Leading slash only: trailing empty segments are real (empty) parameters
    // that fall back to the configured defaults.
    let segments: Vec<&str> = path.strip_prefix('/').unwrap_or(path).split('/').collect();
    let defaults = &state.config.defaults;

    match segments.as_slice() {
        ["init", project, instance, database] => {
            // Path parameters bind per request; the env-derived defaults only
            // fill in for an empty segment.
            let project = param_or_default(project, &defaults.project_id);
            let instance = param_or_default(instance, &defaults.instance_id);
            let database = param_or_default(database, &defaults.database_id);

            let ready = state
                .manager
                .initialize(project, instance, database, trace.as_deref())
                .await;
            json_response(StatusCode::OK, &ready)
        }
        ["test", project] => {
            let project = param_or_default(project, &defaults.project_id);
            let identity = build_identity_headers(state.manager.identity(), project, trace.as_deref());

            let ok = match state.manager.current() {
                Some(handle) => {
                    probe(&handle, &identity, state.manager.probe_timeout())
                        .await
                        .ok
                }
                None => false,
            };
            json_response(StatusCode::OK, &ok)
        }
        ["listInstances", project] => {
            let project = param_or_default(project, &defaults.project_id);
            let identity = build_identity_headers(state.manager.identity(), project, trace.as_deref());
            let call = RemoteCall::ListInstances {
                parent: format!("projects/{project}"),
            };

            match state.forwarder.forward(call, &identity).await {
                Ok(body) => json_response(StatusCode::OK, &body),
                Err(e) => {
                    let status = StatusCode::from_u16(e.status_code())
                        .unwrap_or(StatusCode::BAD_GATEWAY);
                    error_response(status, e.category(), &e.to_string(), request_id)
                }
            }
        }
        ["health"] => {
            let health = serde_json::json!({
                "state": state.manager.state(),
                "version": crate::VERSION,
                "uptime_seconds": state.started_at.elapsed().as_secs(),
            });
            json_response(StatusCode::OK, &health)
        }
        _ => error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            &format!("unknown route: {path}"),
            request_id,
        ),
    }
}

/// Fall back to the configured default when a path parameter is empty.
fn param_or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}

/// Stamp the trace echo and request id onto an outgoing response.
///
/// Applied on every path, success or failure, so the caller's correlation
/// token always round-trips.
fn finalize_response(
    mut response: Response<Full<Bytes>>,
    trace: Option<&str>,
    request_id: &str,
) -> Response<Full<Bytes>> {
    echo_trace(response.headers_mut(), trace);

    if let Ok(value) = HeaderValue::from_str(request_id) {
        response
            .headers_mut()
            .insert(HEADER_REQUEST_ID.clone(), value);
    }

    response
}

/// Create a JSON response.
fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());

    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from("{}")))
                .unwrap()
        })
}

/// Create an error response.
fn error_response(
    status: StatusCode,
    category: &str,
    message: &str,
    request_id: &str,
) -> Response<Full<Bytes>> {
    let error = ErrorResponse::new(category, message).with_request_id(request_id);
    json_response(status, &error)
}
