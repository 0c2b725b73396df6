//! # bovine-core
//!
//! Core library for bovine - a pages middleware for Forgejo/Gitea forges.
//!
//! This crate provides the domain logic without any HTTP-server or CLI
//! concerns: request classification, the two-level cache (content cache
//! plus persistent routing/mapping store), the RESP client with its
//! bounded connection pool, the forge API client, `.pages` manifest
//! parsing, custom-domain activation, password-gate sessions, the
//! `.redirects` compiler, and the reaper.
//!
//! ## Request model
//!
//! A request to `<user>.<pages-domain>/<repo>/...` (or an activated
//! custom domain) is classified by [`route::classify`], resolved to a
//! [`route::RepoCoordinate`], optionally gated by a password session, and
//! served from the content cache or fetched from the forge on a miss.
//! A served pages-domain response triggers custom-domain registration as
//! a fire-and-forget side effect.
//!
//! ## Quick start
//!
//! ```ignore
//! use bovine_core::{Pages, resolve_config};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = resolve_config(None)?;
//! let pages = Arc::new(Pages::from_config(config).await?);
//! let manifest = pages.manifest("alice", "site").await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
mod config;
mod error;
pub mod error_pages;
pub mod forge;
pub mod manifest;
pub mod reaper;
pub mod redirects;
pub mod registrar;
pub mod resp;
pub mod redis;
pub mod route;
pub mod session;
pub mod store;

pub use config::{
    AuthConfig, BovineConfig, Config, ConfigValue, DnsConfig, ForgeConfig, PagesConfig,
    RedisConfig, ServerConfig, TraefikConfig, resolve_config,
};
pub use error::{Error, Result};
pub use manifest::PagesManifest;
pub use route::{RepoCoordinate, Route, classify};

use crate::cache::{Cache, MemoryCache, Store};
use crate::error_pages::ErrorPages;
use crate::forge::ForgeClient;
use crate::redis::RedisCache;
use crate::registrar::{Registrar, RegistrarSettings, SystemTxtResolver, TxtLookup};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// TTL bounding `.pages` refetches on the password/manifest cache.
pub const MANIFEST_CACHE_TTL: u64 = 60;

/// Whether a response body came from the content cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    /// Value of the `X-Cache-Status` response header.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// A resolved piece of site content ready to emit.
#[derive(Debug, Clone)]
pub struct SiteContent {
    pub body: Bytes,
    pub content_type: String,
    pub cache_status: CacheStatus,
}

/// Placeholder resolver used when DNS verification is disabled; the
/// registrar never consults it.
struct DisabledTxtResolver;

#[async_trait]
impl TxtLookup for DisabledTxtResolver {
    async fn txt_records(&self, _host: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Main entry point for bovine functionality.
///
/// Holds the shared cache/store, the forge client, the registrar, and the
/// error-page table. Operator configuration is immutable after startup.
pub struct Pages {
    config: BovineConfig,
    cache: Arc<dyn Store>,
    domain_memo: MemoryCache,
    forge: Arc<ForgeClient>,
    registrar: Arc<Registrar>,
    error_pages: Arc<ErrorPages>,
    auth_secret: String,
}

impl Pages {
    /// Build the service from validated configuration: forge client,
    /// Redis-or-memory cache, registrar, and (best-effort) the custom
    /// error-page table.
    pub async fn from_config(config: BovineConfig) -> Result<Self> {
        config.validate()?;

        let token = match &config.forge.token {
            Some(value) => Some(value.resolve()?),
            None => None,
        };
        let forge = Arc::new(ForgeClient::new(&config.forge.host, token.as_deref())?);

        let cache: Arc<dyn Store> = if config.redis.host.is_empty() {
            tracing::info!("no redis host configured; caches run in-memory only");
            Arc::new(MemoryCache::new(config.pages.cache_ttl))
        } else {
            tracing::info!(
                "using redis at {}:{} (pool {}, ceiling {})",
                config.redis.host,
                config.redis.port,
                config.redis.pool_size,
                config.redis.max_connections
            );
            Arc::new(RedisCache::from_config(&config.redis, config.pages.cache_ttl)?)
        };

        let auth_secret = match &config.auth.secret_key {
            Some(value) => value.resolve()?,
            None => String::new(),
        };
        if auth_secret.is_empty() {
            tracing::warn!(
                "auth.secret_key is not set; password sessions degrade to \
                 timestamp-only cookies"
            );
        }

        let txt: Arc<dyn TxtLookup> = if config.dns.verify_custom_domains {
            Arc::new(SystemTxtResolver::new()?)
        } else {
            Arc::new(DisabledTxtResolver)
        };

        let registrar = Arc::new(Registrar::new(
            cache.clone(),
            forge.clone(),
            txt,
            RegistrarSettings {
                verify_dns: config.dns.verify_custom_domains,
                router_enabled: config.traefik.router_enabled,
                root_key: config.traefik.root_key.clone(),
                cert_resolver: config.traefik.cert_resolver.clone(),
                router_ttl: config.traefik.router_ttl,
            },
        ));

        let error_pages = Arc::new(ErrorPages::new());
        if !config.pages.error_pages_repo.is_empty() {
            error_pages
                .preload(&forge, &config.pages.error_pages_repo)
                .await;
        }

        let domain_memo = MemoryCache::new(config.pages.custom_domain_cache_ttl);

        Ok(Self {
            config,
            cache,
            domain_memo,
            forge,
            registrar,
            error_pages,
            auth_secret,
        })
    }

    pub fn config(&self) -> &BovineConfig {
        &self.config
    }

    pub fn forge(&self) -> &ForgeClient {
        &self.forge
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.cache
    }

    pub fn error_pages(&self) -> &ErrorPages {
        &self.error_pages
    }

    pub fn auth_secret(&self) -> &str {
        &self.auth_secret
    }

    /// Resolve a custom domain to its bound coordinate, if activated.
    /// Lookups memoize in-process for `custom_domain_cache_ttl` seconds.
    pub async fn lookup_custom_domain(&self, host: &str) -> Result<Option<RepoCoordinate>> {
        let key = store::forward_key(host);

        if let Some(binding) = self.domain_memo.get(&key).await? {
            let binding = String::from_utf8_lossy(&binding).into_owned();
            return Ok(Some(store::parse_binding(&binding)?));
        }

        match self.cache.get(&key).await? {
            Some(binding) => {
                let binding = String::from_utf8_lossy(&binding).into_owned();
                let coordinate = store::parse_binding(&binding)?;
                let _ = self.domain_memo.set(&key, Bytes::from(binding)).await;
                Ok(Some(coordinate))
            }
            None => Ok(None),
        }
    }

    /// Read and parse a repository's `.pages` manifest, bounded by the
    /// 60-second manifest cache. `Ok(None)` means the repository does not
    /// opt in to pages serving.
    pub async fn manifest(&self, owner: &str, repo: &str) -> Result<Option<PagesManifest>> {
        let key = store::password_key(owner, repo);

        if let Some(text) = self.cache.get(&key).await? {
            let text = String::from_utf8_lossy(&text).into_owned();
            return Ok(Some(PagesManifest::parse(&text)));
        }

        match self
            .forge
            .get_file_raw(owner, repo, forge::MANIFEST_FILE, None)
            .await
        {
            Ok(raw) => {
                let text = String::from_utf8_lossy(&raw).into_owned();
                // Content path: a failed cache write is not an error.
                if let Err(e) = self
                    .cache
                    .set_with_ttl(&key, Bytes::from(text.clone()), MANIFEST_CACHE_TTL)
                    .await
                {
                    tracing::debug!("manifest cache write failed: {}", e);
                }
                Ok(Some(PagesManifest::parse(&text)))
            }
            Err(Error::NotFound(_)) => {
                // Distinguish a missing repository from one that exists
                // but has not opted in.
                self.forge.get_repo(owner, repo).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Load site content for a coordinate: content cache first, then the
    /// forge with the `index.html` fallback for extensionless paths, then
    /// a generated directory listing when the manifest allows it.
    pub async fn load_content(
        &self,
        coordinate: &RepoCoordinate,
        file_path: &str,
        manifest: &PagesManifest,
    ) -> Result<SiteContent> {
        let key = store::content_key(coordinate, file_path);

        if let Some(body) = self.cache.get(&key).await? {
            let content_type = forge::content_type_for(file_path, &body);
            return Ok(SiteContent {
                body,
                content_type,
                cache_status: CacheStatus::Hit,
            });
        }

        let (body, content_type) = self.fetch_with_fallbacks(coordinate, file_path, manifest).await?;

        if let Err(e) = self
            .cache
            .set_with_ttl(&key, body.clone(), self.config.pages.cache_ttl)
            .await
        {
            tracing::debug!("content cache write failed: {}", e);
        }

        Ok(SiteContent {
            body,
            content_type,
            cache_status: CacheStatus::Miss,
        })
    }

    async fn fetch_with_fallbacks(
        &self,
        coordinate: &RepoCoordinate,
        file_path: &str,
        manifest: &PagesManifest,
    ) -> Result<(Bytes, String)> {
        let branch = coordinate.branch.as_deref();

        match self
            .forge
            .get_file(&coordinate.owner, &coordinate.repo, file_path, branch)
            .await
        {
            Ok(found) => return Ok(found),
            Err(e) if e.is_not_found() && !has_extension(file_path) => {}
            Err(e) => return Err(e),
        }

        // Extensionless miss: try <path>/index.html
        let index_path = format!("{}/index.html", file_path);
        match self
            .forge
            .get_file(&coordinate.owner, &coordinate.repo, &index_path, branch)
            .await
        {
            Ok(found) => return Ok(found),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        if manifest.directory_index {
            let entries = self
                .forge
                .list_dir(&coordinate.owner, &coordinate.repo, file_path, branch)
                .await?;
            let html = render_listing(coordinate, file_path, &entries);
            return Ok((Bytes::from(html), "text/html; charset=utf-8".to_string()));
        }

        Err(Error::NotFound(format!(
            "{} has no {} (and no index.html)",
            coordinate, file_path
        )))
    }

    /// Kick off custom-domain registration for a served pages-domain
    /// response. Fire and forget: failures are logged, never surfaced to
    /// the response that triggered them.
    pub fn spawn_registration(self: &Arc<Self>, owner: String, repo: String) {
        let pages = self.clone();
        tokio::spawn(async move {
            match pages.manifest(&owner, &repo).await {
                Ok(Some(manifest)) => {
                    if let Err(e) = pages.registrar.register(&owner, &repo, &manifest).await {
                        tracing::warn!(
                            "custom-domain registration for {}/{} failed: {}",
                            owner,
                            repo,
                            e
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        "manifest read for registration of {}/{} failed: {}",
                        owner,
                        repo,
                        e
                    );
                }
            }
        });
    }

    /// Compile the coordinate's `.redirects` file and publish the records
    /// for `host`. Returns the number of rules written; `NotFound` when
    /// the repository has no `.redirects` file.
    pub async fn load_redirects(&self, host: &str, coordinate: &RepoCoordinate) -> Result<usize> {
        let raw = self
            .forge
            .get_file_raw(
                &coordinate.owner,
                &coordinate.repo,
                ".redirects",
                coordinate.branch.as_deref(),
            )
            .await?;
        let text = String::from_utf8_lossy(&raw).into_owned();
        let rules = redirects::parse_redirects(&text, self.config.pages.max_redirects);
        redirects::publish(
            self.cache.as_ref(),
            &self.config.traefik.root_key,
            host,
            &self.config.traefik.cert_resolver,
            self.config.traefik.router_ttl,
            &rules,
        )
        .await
    }
}

/// Whether the final path segment carries a file extension.
fn has_extension(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .is_some_and(|segment| segment.contains('.'))
}

/// Render an HTML directory listing.
fn render_listing(
    coordinate: &RepoCoordinate,
    file_path: &str,
    entries: &[forge::DirEntry],
) -> String {
    let mut rows = String::new();
    for entry in entries {
        let (href, label) = if entry.is_dir {
            (format!("{}/", entry.name), format!("{}/", entry.name))
        } else {
            (entry.name.clone(), entry.name.clone())
        };
        rows.push_str(&format!(
            "<tr><td><a href=\"{href}\">{label}</a></td><td>{}</td></tr>\n",
            if entry.is_dir {
                "-".to_string()
            } else {
                entry.size.to_string()
            }
        ));
    }
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Index of {path}</title></head>
<body style="font-family: sans-serif; max-width: 40rem; margin: 2rem auto;">
<h1>Index of {path}</h1>
<p><small>{coordinate}</small></p>
<table>
<tr><th align="left">Name</th><th align="left">Size</th></tr>
{rows}</table>
</body>
</html>
"#,
        path = file_path,
        coordinate = coordinate,
        rows = rows
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_extension() {
        assert!(has_extension("public/style.css"));
        assert!(has_extension("public/a.b/c.txt"));
        assert!(!has_extension("public"));
        assert!(!has_extension("public/docs"));
        // a dotted directory doesn't make the leaf extensioned
        assert!(!has_extension("public/v1.0/docs"));
    }

    #[test]
    fn test_cache_status_header_values() {
        assert_eq!(CacheStatus::Hit.as_str(), "HIT");
        assert_eq!(CacheStatus::Miss.as_str(), "MISS");
    }

    #[test]
    fn test_render_listing() {
        let coordinate = RepoCoordinate::new("alice", "site");
        let entries = vec![
            forge::DirEntry {
                name: "docs".to_string(),
                path: "public/docs".to_string(),
                is_dir: true,
                size: 0,
            },
            forge::DirEntry {
                name: "style.css".to_string(),
                path: "public/style.css".to_string(),
                is_dir: false,
                size: 120,
            },
        ];
        let html = render_listing(&coordinate, "public", &entries);
        assert!(html.contains("href=\"docs/\""));
        assert!(html.contains("href=\"style.css\""));
        assert!(html.contains("120"));
        assert!(html.contains("alice/site"));
    }
}
