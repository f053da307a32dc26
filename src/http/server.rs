//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create the Axum router and wire up middleware (trace id, tracing)
//! - Bind the listener and serve with graceful shutdown
//! - Route each request: redirect, proxy pass, or local asset
//! - Build missing or stale assets through the dispatcher
//! - Stop idempotently, destroying every live function

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Request, StatusCode},
    middleware,
    response::Response,
    routing::any,
    Router,
};
use notify::RecommendedWatcher;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

use crate::assets::artifact::BuildArtifact;
use crate::assets::store;
use crate::builds::builder::BuilderCatalog;
use crate::config::schema::DevConfig;
use crate::config::watcher::ProjectWatcher;
use crate::error::DevError;
use crate::http::invoke::{build_payload, relay_result};
use crate::http::proxy::{self, MAX_PROXY_BODY};
use crate::http::request::{trace_request, RequestTrace};
use crate::http::response::{self, DevErrorResponse, ErrorCode};
use crate::http::serve::{apply_route, merge_route_headers, serve_blob, serve_static};
use crate::http::state::DevState;
use crate::lifecycle::shutdown::signalled;
use crate::observability::metrics;
use crate::routing::{RouteAction, RouteDecision};

/// The local dev server.
pub struct DevServer {
    state: Arc<DevState>,
    local_addr: SocketAddr,
    server_task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl DevServer {
    /// Load the project, bind the listener and start serving.
    ///
    /// Configuration errors are fatal here.
    pub async fn start(config: DevConfig, catalog: BuilderCatalog) -> Result<Self, DevError> {
        if config.observability.metrics_enabled {
            let addr = config
                .observability
                .metrics_address
                .parse()
                .map_err(|_| DevError::MetricsAddress(config.observability.metrics_address.clone()))?;
            metrics::init_metrics(addr)?;
        }

        let bind_address = config.listener.bind_address.clone();
        let state = DevState::initialize(config, catalog).await?;

        let listener = TcpListener::bind(&bind_address).await.map_err(|source| DevError::Bind {
            address: bind_address.clone(),
            source,
        })?;
        let local_addr = listener.local_addr()?;

        let app = router(state.clone()).into_make_service_with_connect_info::<SocketAddr>();
        let stop = signalled(state.shutdown.subscribe());
        let server_task = tokio::spawn(async move { axum::serve(listener, app).with_graceful_shutdown(stop).await });

        let watcher = if state.config.watch.enabled {
            spawn_watcher(&state)
        } else {
            None
        };

        tracing::info!(address = %local_addr, pod_id = %state.pod_id, "Dev server ready");
        Ok(Self {
            state,
            local_addr,
            server_task: Mutex::new(Some(server_task)),
            watcher: Mutex::new(watcher),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &Arc<DevState> {
        &self.state
    }

    /// Stop the server. Calling it again is a no-op.
    ///
    /// New requests fail fast as soon as this begins; every function in the
    /// asset store is destroyed before the listener is awaited.
    pub async fn stop(&self) -> Result<(), DevError> {
        if !self.state.shutdown.trigger() {
            return Ok(());
        }
        tracing::info!(
            subscribers = self.state.shutdown.receiver_count(),
            in_flight_builds = self.state.dispatcher.in_flight_count(),
            "Stopping dev server"
        );

        self.watcher.lock().await.take();
        self.state.dispatcher.clear();
        store::teardown(self.state.assets.clear()).await;

        if let Some(task) = self.server_task.lock().await.take() {
            task.await??;
        }
        tracing::info!("Dev server stopped");
        Ok(())
    }
}

/// Watch the project and drop cached builds of changed entrypoints.
///
/// The project file listing is cached for as long as this runs.
fn spawn_watcher(state: &Arc<DevState>) -> Option<RecommendedWatcher> {
    let (watcher, mut changes) = ProjectWatcher::new(&state.config.project.root, state.config.watch.poll_interval());
    let handle = match watcher.run() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "File watching unavailable, builds are only refreshed on demand");
            return None;
        }
    };

    state.enable_file_cache();
    let state = state.clone();
    let mut stop = state.shutdown.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = changes.recv() => match changed {
                    Some(path) => {
                        state.invalidate_project_files();
                        state.dispatcher.invalidate_entrypoint(&path).await;
                    }
                    None => break,
                },
                _ = stop.recv() => break,
            }
        }
    });
    Some(handle)
}

/// Build the Axum router with all middleware layers.
pub fn router(state: Arc<DevState>) -> Router {
    Router::new()
        .route("/", any(dev_handler))
        .route("/{*path}", any(dev_handler))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(state, trace_request))
        .layer(TraceLayer::new_for_http())
}

/// Main handler: route, then redirect, proxy, or serve locally.
async fn dev_handler(State(state): State<Arc<DevState>>, request: Request<Body>) -> Response {
    if state.shutdown.is_triggered() {
        return response::unavailable();
    }

    let project = state.current_project().await;
    let path = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), |p| p.as_str().to_string());
    let decision = project.routes.resolve(&path);
    tracing::debug!(
        destination = %decision.destination,
        status = decision.status_code(),
        rule = ?decision.matched_rule,
        "Route resolved"
    );

    match &decision.action {
        RouteAction::Redirect { location } => {
            let status = StatusCode::from_u16(decision.status_code()).unwrap_or(StatusCode::FOUND);
            let mut response = response::redirect(status, location);
            merge_route_headers(&mut response, &decision.headers);
            response
        }
        RouteAction::Proxy => {
            let accept = request.headers().clone();
            match proxy::proxy_pass(&state.client, &decision.destination, request).await {
                Ok(mut response) => {
                    merge_route_headers(&mut response, &decision.headers);
                    response
                }
                Err(e) => {
                    tracing::error!(destination = %decision.destination, error = %e, "Proxy pass failed");
                    DevErrorResponse::new(ErrorCode::ProxyError, e.to_string()).render(&accept)
                }
            }
        }
        RouteAction::Local => serve_local(&state, &decision, request).await,
    }
}

async fn serve_local(state: &DevState, decision: &RouteDecision, request: Request<Body>) -> Response {
    let force = should_rebuild(request.headers());
    let existing = state.assets.get(&decision.destination);
    let needs_build = match &existing {
        None => true,
        Some(asset) => force && asset.entry.origin.is_some(),
    };

    let resolved = if needs_build {
        match state.resolve_asset(&decision.destination, existing, force).await {
            Ok(resolved) => resolved,
            Err(e) => {
                return DevErrorResponse::new(ErrorCode::BuildFailed, e.to_string()).render(request.headers());
            }
        }
    } else {
        existing
    };

    let Some(asset) = resolved else {
        tracing::debug!(destination = %decision.destination, "No asset for destination");
        return DevErrorResponse::not_found().render(request.headers());
    };

    match &asset.entry.artifact {
        BuildArtifact::StaticFile(file) => {
            let mut response = serve_static(&file.path, request).await;
            apply_route(&mut response, decision.status, &decision.headers);
            response
        }
        BuildArtifact::Blob(blob) => {
            let mut response = serve_blob(&asset.key, blob, request.method());
            apply_route(&mut response, decision.status, &decision.headers);
            response
        }
        BuildArtifact::Function(function) => {
            let headers = request.headers().clone();
            let remote = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0);
            let trace = request
                .extensions()
                .get::<RequestTrace>()
                .cloned()
                .unwrap_or_else(|| RequestTrace::generate(&state.pod_id));

            let (parts, body) = request.into_parts();
            let body = match axum::body::to_bytes(body, MAX_PROXY_BODY).await {
                Ok(body) => body,
                Err(e) => {
                    return DevErrorResponse::new(ErrorCode::InvalidRequestBody, e.to_string()).render(&headers);
                }
            };

            let payload = build_payload(&parts, &body, &trace, remote, &decision.captured_args);
            tracing::debug!(entrypoint = %function.entrypoint, path = %payload.path, "Invoking function");
            let result = match function.handle.invoke(payload).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(entrypoint = %function.entrypoint, error = %e, "Function invocation failed");
                    return DevErrorResponse::new(ErrorCode::NoStatusCodeFromLambda, e.to_string()).render(&headers);
                }
            };

            match relay_result(result) {
                Ok(mut response) => {
                    merge_route_headers(&mut response, &decision.headers);
                    response
                }
                Err(e) => {
                    tracing::error!(entrypoint = %function.entrypoint, code = e.code.as_str(), error = %e.message, "Invalid function response");
                    e.render(&headers)
                }
            }
        }
    }
}

/// True when the client asked to bypass caches.
pub fn should_rebuild(headers: &HeaderMap) -> bool {
    [header::PRAGMA, header::CACHE_CONTROL].iter().any(|name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("no-cache"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use tower::ServiceExt;

    #[test]
    fn no_cache_requests_force_rebuild() {
        let mut headers = HeaderMap::new();
        assert!(!should_rebuild(&headers));

        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        assert!(should_rebuild(&headers));

        let mut pragma = HeaderMap::new();
        pragma.insert(header::PRAGMA, HeaderValue::from_static("No-Cache"));
        assert!(should_rebuild(&pragma));

        let mut other = HeaderMap::new();
        other.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
        assert!(!should_rebuild(&other));
    }

    #[tokio::test]
    async fn requests_during_shutdown_fail_fast() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        let mut config = DevConfig::default();
        config.project.root = dir.path().to_path_buf();
        config.watch.enabled = false;
        let state = DevState::initialize(config, BuilderCatalog::with_defaults()).await.unwrap();

        assert!(state.shutdown.trigger());
        let response = router(state)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONNECTION], "close");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("FILE_NOT_FOUND"));
    }
}
