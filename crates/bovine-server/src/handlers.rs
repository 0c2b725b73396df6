//! Request handlers for the pages middleware.

use crate::AppState;
use axum::{
    extract::{FromRequest, Request},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bovine_core::{
    Error, PagesManifest, RepoCoordinate, SiteContent, error_pages,
    session::{self, SessionScope},
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn html_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        )],
        body,
    )
        .into_response()
}

/// Render `status` through the custom error-page table.
pub async fn error_page(state: &Arc<AppState>, status: StatusCode, message: &str) -> Response {
    let body = state
        .pages
        .error_pages()
        .render(status.as_u16(), message)
        .await;
    html_response(status, body)
}

/// Map a core error to its HTTP rendering.
async fn error_response(state: &Arc<AppState>, err: &Error) -> Response {
    let (status, message) = match err {
        Error::NotFound(what) => (StatusCode::NOT_FOUND, what.clone()),
        Error::Forbidden(_) => (
            StatusCode::FORBIDDEN,
            "this repository is private and no forge credential is configured".to_string(),
        ),
        Error::Unauthorized => (StatusCode::UNAUTHORIZED, "authentication required".to_string()),
        Error::InvalidRequest(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
        Error::Upstream(_) => (
            StatusCode::BAD_GATEWAY,
            "the forge API is unavailable, try again shortly".to_string(),
        ),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
    };
    if status.is_server_error() {
        tracing::error!("request failed: {}", err);
    }
    error_page(state, status, &message).await
}

/// The bare pages domain: the preloaded landing page, else 400.
pub async fn landing(state: &Arc<AppState>) -> Response {
    match state.pages.error_pages().landing().await {
        Some(body) => html_response(StatusCode::OK, body),
        None => {
            error_page(
                state,
                StatusCode::BAD_REQUEST,
                "this is the pages domain itself; sites live at <user>.<pages-domain>",
            )
            .await
        }
    }
}

/// Serve a `<owner>.<pagesDomain>` request and trigger custom-domain
/// registration as a side effect of success.
pub async fn serve_pages(
    state: &Arc<AppState>,
    coordinate: RepoCoordinate,
    file_path: &str,
    request: Request,
) -> Response {
    let manifest = match require_manifest(state, &coordinate).await {
        Ok(manifest) => manifest,
        Err(response) => return *response,
    };

    if let Some(intercept) = password_gate(
        state,
        &coordinate,
        SessionScope::Main,
        manifest.password.as_deref(),
        request,
    )
    .await
    {
        return intercept;
    }

    let content = match state.pages.load_content(&coordinate, file_path, &manifest).await {
        Ok(content) => content,
        Err(e) => return error_response(state, &e).await,
    };

    // Registration must never affect the response that triggered it.
    state
        .pages
        .spawn_registration(coordinate.owner.clone(), coordinate.repo.clone());

    content_response(state, content)
}

/// Serve a request on an activated custom domain (main or branch).
pub async fn serve_custom_domain(
    state: &Arc<AppState>,
    host: &str,
    file_path: &str,
    request: Request,
) -> Response {
    let coordinate = match state.pages.lookup_custom_domain(host).await {
        Ok(Some(coordinate)) => coordinate,
        Ok(None) => {
            let body =
                error_pages::activation_help(host, &state.pages.config().pages.domain);
            return html_response(StatusCode::NOT_FOUND, body);
        }
        Err(e) => return error_response(state, &e).await,
    };

    let manifest = match require_manifest(state, &coordinate).await {
        Ok(manifest) => manifest,
        Err(response) => return *response,
    };

    let (scope, expected_hash) = if coordinate.branch.is_some() {
        (SessionScope::Branch, manifest.branches_password.as_deref())
    } else {
        (SessionScope::Main, manifest.password.as_deref())
    };
    if let Some(intercept) =
        password_gate(state, &coordinate, scope, expected_hash, request).await
    {
        return intercept;
    }

    match state.pages.load_content(&coordinate, file_path, &manifest).await {
        Ok(content) => content_response(state, content),
        Err(e) => error_response(state, &e).await,
    }
}

/// `.pages` presence check: 404 when the repository does not opt in.
async fn require_manifest(
    state: &Arc<AppState>,
    coordinate: &RepoCoordinate,
) -> Result<PagesManifest, Box<Response>> {
    match state.pages.manifest(&coordinate.owner, &coordinate.repo).await {
        Ok(Some(manifest)) if manifest.enabled => Ok(manifest),
        Ok(_) => Err(Box::new(
            error_page(
                state,
                StatusCode::NOT_FOUND,
                &format!("{} is not configured for pages", coordinate),
            )
            .await,
        )),
        Err(e) => Err(Box::new(error_response(state, &e).await)),
    }
}

#[derive(serde::Deserialize)]
struct LoginForm {
    #[serde(default)]
    password: String,
}

/// Password gate. `None` means the request may proceed to content;
/// `Some(response)` intercepts it (login form, login result, or error).
async fn password_gate(
    state: &Arc<AppState>,
    coordinate: &RepoCoordinate,
    scope: SessionScope,
    expected_hash: Option<&str>,
    request: Request,
) -> Option<Response> {
    let expected_hash = expected_hash?;
    let secret = state.pages.auth_secret();
    let max_age = state.pages.config().auth.cookie_duration;
    let cookie_name = session::cookie_name(&coordinate.owner, &coordinate.repo, scope);
    let site = coordinate.to_string();

    if let Some(cookie_header) = request
        .headers()
        .get(header::COOKIE)
        .and_then(|h| h.to_str().ok())
        && let Some(value) = session::cookie_from_header(cookie_header, &cookie_name)
        && session::verify(
            secret,
            &value,
            &coordinate.owner,
            &coordinate.repo,
            scope,
            now_unix(),
            max_age,
        )
    {
        return None;
    }

    if request.method() != axum::http::Method::POST {
        return Some(html_response(
            StatusCode::UNAUTHORIZED,
            session::login_page(&site, false),
        ));
    }

    // Login attempt: verify the submitted password's SHA-256 against the
    // manifest hash, then 303 back to the original URL to drop POST state.
    let original_uri = request.uri().clone();
    let form = match axum::extract::Form::<LoginForm>::from_request(request, &()).await {
        Ok(axum::extract::Form(form)) => form,
        Err(_) => {
            return Some(html_response(
                StatusCode::UNAUTHORIZED,
                session::login_page(&site, true),
            ));
        }
    };

    let submitted_hash = session::hash_password(&form.password);
    if !session::constant_time_str_eq(&submitted_hash, &expected_hash.to_lowercase()) {
        return Some(html_response(
            StatusCode::UNAUTHORIZED,
            session::login_page(&site, true),
        ));
    }

    let cookie_value = session::mint(
        secret,
        &coordinate.owner,
        &coordinate.repo,
        scope,
        now_unix(),
    );
    let set_cookie = session::set_cookie_header(&cookie_name, &cookie_value, max_age);
    let location = original_uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut response = StatusCode::SEE_OTHER.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&location) {
        headers.insert(header::LOCATION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&set_cookie) {
        headers.insert(header::SET_COOKIE, value);
    }
    Some(response)
}

/// Emit site content with caching headers.
fn content_response(state: &Arc<AppState>, content: SiteContent) -> Response {
    let cache_control = format!("public, max-age={}", state.pages.config().pages.cache_ttl);
    let mut response = (StatusCode::OK, content.body).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&content.content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&cache_control) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    headers.insert(
        "x-cache-status",
        HeaderValue::from_static(content.cache_status.as_str()),
    );
    response
}

/// `/LOAD_REDIRECTS`: recompile the host's `.redirects` rules. Only valid
/// on an activated custom domain.
pub async fn load_redirects(state: &Arc<AppState>, host: &str) -> Response {
    let config = state.pages.config();
    let host = bovine_core::route::normalize_host(host);

    if host == config.pages.domain || host.ends_with(&format!(".{}", config.pages.domain)) {
        return error_page(
            state,
            StatusCode::BAD_REQUEST,
            "/LOAD_REDIRECTS is only valid on a custom domain",
        )
        .await;
    }

    let coordinate = match state.pages.lookup_custom_domain(&host).await {
        Ok(Some(coordinate)) => coordinate,
        Ok(None) => {
            let body = error_pages::activation_help(&host, &config.pages.domain);
            return html_response(StatusCode::NOT_FOUND, body);
        }
        Err(e) => return error_response(state, &e).await,
    };

    match state.pages.load_redirects(&host, &coordinate).await {
        Ok(count) => {
            tracing::info!("compiled {} redirect rules for {}", count, host);
            html_response(
                StatusCode::OK,
                format!(
                    "<!DOCTYPE html><html><body><p>Loaded {} redirect rule(s) for {}.</p></body></html>",
                    count, host
                ),
            )
        }
        Err(Error::NotFound(_)) => {
            html_response(StatusCode::NOT_FOUND, error_pages::redirects_help())
        }
        Err(e) => error_response(state, &e).await,
    }
}
