//! The pages middleware: classify every request and dispatch.
//!
//! Runs on all routes via `from_fn_with_state`. `Next` is the host
//! proxy's next handler and is reached only by ACME challenges.

use crate::AppState;
use crate::handlers;
use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bovine_core::{Route, classify};
use std::sync::Arc;

/// Classify a request by host and path and dispatch it. Every branch but
/// the ACME challenge writes the response itself.
pub async fn pages_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| request.uri().host())
        .unwrap_or("")
        .to_string();
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(String::from);
    let forwarded_proto = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|h| h.to_str().ok())
        .map(String::from);

    let config = state.pages.config();
    let route = classify(
        &host,
        &path,
        query.as_deref(),
        forwarded_proto.as_deref(),
        &config.pages.domain,
        config.pages.enable_custom_domains,
    );

    match route {
        Route::AcmeChallenge => next.run(request).await,
        Route::LoadRedirects => handlers::load_redirects(&state, &host).await,
        Route::HttpsRedirect { location } => match location.parse::<axum::http::HeaderValue>() {
            Ok(value) => (
                StatusCode::MOVED_PERMANENTLY,
                [(header::LOCATION, value)],
            )
                .into_response(),
            Err(_) => handlers::error_page(&state, StatusCode::BAD_REQUEST, "invalid host").await,
        },
        Route::Landing => handlers::landing(&state).await,
        Route::Pages {
            coordinate,
            file_path,
        } => handlers::serve_pages(&state, coordinate, &file_path, request).await,
        Route::CustomDomain { host, file_path } => {
            handlers::serve_custom_domain(&state, &host, &file_path, request).await
        }
        Route::Invalid { reason } => {
            handlers::error_page(&state, StatusCode::BAD_REQUEST, &reason).await
        }
    }
}
