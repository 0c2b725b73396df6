//! Forgejo/Gitea API client.
//!
//! Read-only consumer of the Gitea-compatible REST API: repository
//! metadata, file contents, directory listings, branch existence. Requests
//! carry a 10s transport timeout and the operator token if configured.
//! The client never retries; failures propagate to the caller.

use crate::error::{Error, Result};
use base64::Engine;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;

/// Repository metadata relevant to serving.
#[derive(Debug, Clone)]
pub struct RepoInfo {
    pub private: bool,
    pub default_branch: String,
}

/// One entry from a directory listing.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Name of the opt-in manifest at the repository root.
pub const MANIFEST_FILE: &str = ".pages";

pub struct ForgeClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ApiRepo {
    private: bool,
    default_branch: String,
}

#[derive(Deserialize)]
struct ApiContents {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: u64,
    encoding: Option<String>,
    content: Option<String>,
}

impl ForgeClient {
    /// Create a client for the forge at `host` (e.g. `https://codeberg.org`).
    pub fn new(host: &str, token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("bovine"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            // Forgejo/Gitea uses "token" prefix instead of "Bearer"
            let value = HeaderValue::from_str(&format!("token {}", token))
                .map_err(|_| Error::Config("forge token contains invalid characters".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to build forge client: {}", e)))?;
        Ok(Self {
            client,
            base_url: format!("{}/api/v1", host.trim_end_matches('/')),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, what: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("forge request failed: {}", e)))?;

        match response.status() {
            s if s.is_success() => response
                .json()
                .await
                .map_err(|e| Error::Upstream(format!("forge response decode failed: {}", e))),
            StatusCode::NOT_FOUND => Err(Error::NotFound(what.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(Error::Forbidden(what.to_string()))
            }
            s => Err(Error::Upstream(format!("forge returned {} for {}", s, what))),
        }
    }

    /// Repository metadata. Not-found is distinguished from transport
    /// errors via [`Error::NotFound`].
    pub async fn get_repo(&self, owner: &str, repo: &str) -> Result<RepoInfo> {
        let url = format!("{}/repos/{}/{}", self.base_url, owner, repo);
        let api: ApiRepo = self.get_json(&url, &format!("{}/{}", owner, repo)).await?;
        Ok(RepoInfo {
            private: api.private,
            default_branch: api.default_branch,
        })
    }

    /// Whether the repository opts in to pages serving. A private
    /// repository without an API credential fails closed with `Forbidden`.
    pub async fn has_manifest(&self, owner: &str, repo: &str) -> Result<bool> {
        match self.get_file_raw(owner, repo, MANIFEST_FILE, None).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Fetch a file's decoded bytes and derived content type.
    pub async fn get_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        branch: Option<&str>,
    ) -> Result<(Bytes, String)> {
        let data = self.get_file_raw(owner, repo, path, branch).await?;
        let content_type = content_type_for(path, &data);
        Ok((data, content_type))
    }

    /// Fetch a file's decoded bytes without content-type derivation.
    pub async fn get_file_raw(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        branch: Option<&str>,
    ) -> Result<Bytes> {
        let mut url = format!("{}/repos/{}/{}/contents/{}", self.base_url, owner, repo, path);
        if let Some(branch) = branch {
            url.push_str("?ref=");
            url.push_str(branch);
        }
        let what = format!("{}/{}:{}", owner, repo, path);
        let value: serde_json::Value = self.get_json(&url, &what).await?;
        if value.is_array() {
            // The contents API answers with an array for directories.
            return Err(Error::NotFound(format!("{} is a directory", path)));
        }
        let api: ApiContents = serde_json::from_value(value)
            .map_err(|e| Error::Upstream(format!("forge response decode failed: {}", e)))?;
        if api.kind != "file" {
            return Err(Error::NotFound(format!("{} is not a file", path)));
        }
        match (api.encoding.as_deref(), api.content) {
            (Some("base64"), Some(content)) => decode_base64_content(&content),
            (None, Some(content)) => Ok(Bytes::from(content)),
            _ => Err(Error::Upstream(format!(
                "forge returned no content for {}",
                path
            ))),
        }
    }

    /// List a directory on the given branch.
    pub async fn list_dir(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        branch: Option<&str>,
    ) -> Result<Vec<DirEntry>> {
        let mut url = format!("{}/repos/{}/{}/contents/{}", self.base_url, owner, repo, path);
        if let Some(branch) = branch {
            url.push_str("?ref=");
            url.push_str(branch);
        }
        let entries: Vec<ApiContents> = self
            .get_json(&url, &format!("{}/{}:{}", owner, repo, path))
            .await?;
        Ok(entries
            .into_iter()
            .map(|e| DirEntry {
                is_dir: e.kind == "dir",
                name: e.name,
                path: e.path,
                size: e.size,
            })
            .collect())
    }

    /// Whether the named branch exists.
    pub async fn get_branch(&self, owner: &str, repo: &str, branch: &str) -> Result<bool> {
        let url = format!("{}/repos/{}/{}/branches/{}", self.base_url, owner, repo, branch);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("forge request failed: {}", e)))?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Forbidden(format!(
                "{}/{}@{}",
                owner, repo, branch
            ))),
            s => Err(Error::Upstream(format!(
                "forge returned {} for branch {}",
                s, branch
            ))),
        }
    }
}

/// Decode the API's base64 file payload, tolerating the newlines Gitea
/// inserts into long content.
pub fn decode_base64_content(content: &str) -> Result<Bytes> {
    let stripped: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(stripped)
        .map(Bytes::from)
        .map_err(|e| Error::Upstream(format!("invalid base64 content: {}", e)))
}

/// Derive a Content-Type from the path suffix, byte-sniffing unknowns.
pub fn content_type_for(path: &str, data: &[u8]) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let extension = file_name.rsplit('.').next().filter(|e| *e != file_name);
    let from_extension = match extension.map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("html") | Some("htm") => Some("text/html; charset=utf-8"),
        Some("css") => Some("text/css; charset=utf-8"),
        Some("js") | Some("mjs") => Some("application/javascript"),
        Some("json") => Some("application/json"),
        Some("png") => Some("image/png"),
        Some("jpg") | Some("jpeg") => Some("image/jpeg"),
        Some("gif") => Some("image/gif"),
        Some("svg") => Some("image/svg+xml"),
        Some("webp") => Some("image/webp"),
        Some("ico") => Some("image/x-icon"),
        Some("woff") => Some("font/woff"),
        Some("woff2") => Some("font/woff2"),
        Some("ttf") => Some("font/ttf"),
        Some("otf") => Some("font/otf"),
        Some("pdf") => Some("application/pdf"),
        Some("xml") => Some("application/xml"),
        Some("txt") => Some("text/plain; charset=utf-8"),
        _ => None,
    };
    if let Some(ct) = from_extension {
        return ct.to_string();
    }
    if let Some(guess) = extension.and_then(|e| mime_guess::from_ext(e).first()) {
        return guess.essence_str().to_string();
    }
    if looks_like_html(data) {
        return "text/html; charset=utf-8".to_string();
    }
    match infer::get(data) {
        Some(kind) => kind.mime_type().to_string(),
        None if std::str::from_utf8(data).is_ok() => "text/plain; charset=utf-8".to_string(),
        None => "application/octet-stream".to_string(),
    }
}

/// HTML sniff for extensionless paths (e.g. a cached body resolved from
/// an `index.html` fallback).
fn looks_like_html(data: &[u8]) -> bool {
    let head = &data[..data.len().min(256)];
    let Ok(text) = std::str::from_utf8(head) else {
        return false;
    };
    let trimmed = text.trim_start().to_ascii_lowercase();
    trimmed.starts_with("<!doctype html") || trimmed.starts_with("<html")
}
