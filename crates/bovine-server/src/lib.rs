//! bovine-server: the pages middleware mounted in an axum router.
//!
//! The middleware owns every request except ACME challenges, which pass
//! through to the inner router standing in for the host proxy's next
//! handler. Embedders can swap that fallback for their own service.

mod handlers;
pub mod middleware;

use axum::{
    Router,
    http::{HeaderValue, StatusCode, header},
    middleware::from_fn_with_state,
    routing::any,
};
use bovine_core::Pages;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across the middleware and handlers.
pub struct AppState {
    pub pages: Arc<Pages>,
}

/// Default `next` handler: reached only by ACME challenges when no host
/// proxy sits behind the middleware.
async fn acme_fallthrough() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "no ACME challenge handler mounted")
}

/// Build the router with the pages middleware wrapped around `next`.
pub fn build_router(state: Arc<AppState>) -> Router {
    build_router_with_next(state, Router::new().fallback(any(acme_fallthrough)))
}

/// Build the router around an embedder-provided next handler.
pub fn build_router_with_next(state: Arc<AppState>, next: Router) -> Router {
    next.layer(from_fn_with_state(state, middleware::pages_middleware))
        .layer(SetResponseHeaderLayer::overriding(
            header::SERVER,
            HeaderValue::from_static("bovine"),
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(
                tower_http::trace::DefaultMakeSpan::new()
                    .level(tracing::Level::INFO)
                    .include_headers(false),
            ),
        )
}

/// Run the server with graceful shutdown support.
///
/// The server drains in-flight connections when receiving SIGINT (Ctrl+C)
/// or SIGTERM (Docker stop / Kubernetes terminate).
pub async fn serve(pages: Pages) -> anyhow::Result<()> {
    let server_config = pages.config().server.clone().unwrap_or_default();

    let state = Arc::new(AppState {
        pages: Arc::new(pages),
    });
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", server_config.host, server_config.port).parse()?;

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections...");
}
