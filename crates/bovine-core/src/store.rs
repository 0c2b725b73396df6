//! Routing-store key schema.
//!
//! Every key read or written in the mapping/routing store is built here,
//! from structured identifiers. The registrar, the redirects compiler,
//! and the reaper all go through these functions; the strings are part of
//! the contract with the host proxy and must not drift.

use crate::error::{Error, Result};
use crate::route::RepoCoordinate;

/// Middleware reference that serves pages content, the terminal element
/// of every published router chain.
pub const PAGES_MIDDLEWARE: &str = "pages-server@file";

/// Router priority for all published custom-domain routers.
pub const ROUTER_PRIORITY: u32 = 10;

// === Mapping keys ===

/// Forward mapping: hostname → coordinate.
pub fn forward_key(host: &str) -> String {
    format!("custom_domain:{}", host)
}

/// Reverse mapping for a main-site binding: coordinate → hostname.
pub fn reverse_key(owner: &str, repo: &str) -> String {
    format!("{}:{}", owner, repo)
}

/// Reverse mapping for a branch binding.
pub fn reverse_branch_key(owner: &str, repo: &str, branch: &str) -> String {
    format!("{}:{}:branch:{}", owner, repo, branch)
}

/// Content-cache key for a file on a coordinate. The branch component is
/// empty for the default branch.
pub fn content_key(coordinate: &RepoCoordinate, file_path: &str) -> String {
    format!(
        "{}:{}:{}:{}",
        coordinate.owner,
        coordinate.repo,
        coordinate.branch.as_deref().unwrap_or(""),
        file_path
    )
}

/// Password-cache key (60s TTL bound on `.pages` refetches).
pub fn password_key(owner: &str, repo: &str) -> String {
    format!("password:{}:{}", owner, repo)
}

// === Binding values ===

/// Encode a coordinate as a forward-mapping value:
/// `owner:repo` or `owner:repo:branch`.
pub fn encode_binding(coordinate: &RepoCoordinate) -> String {
    match &coordinate.branch {
        Some(branch) => format!("{}:{}:{}", coordinate.owner, coordinate.repo, branch),
        None => format!("{}:{}", coordinate.owner, coordinate.repo),
    }
}

/// Parse a forward-mapping value back into a coordinate.
pub fn parse_binding(value: &str) -> Result<RepoCoordinate> {
    let parts: Vec<&str> = value.split(':').collect();
    match parts.as_slice() {
        [owner, repo] if !owner.is_empty() && !repo.is_empty() => {
            Ok(RepoCoordinate::new(*owner, *repo))
        }
        [owner, repo, branch] if !owner.is_empty() && !repo.is_empty() && !branch.is_empty() => {
            Ok(RepoCoordinate::with_branch(*owner, *repo, *branch))
        }
        _ => Err(Error::InvalidRequest(format!(
            "malformed domain binding: {:?}",
            value
        ))),
    }
}

// === Traefik router records ===

fn dashed(host: &str) -> String {
    host.replace('.', "-")
}

/// Router name for a hostname: `custom-<host-with-dots-to-dashes>`.
pub fn router_name(host: &str) -> String {
    format!("custom-{}", dashed(host))
}

/// The stable key set describing a host-proxy router for `host`, with the
/// given middleware chain in order. Key order within one hostname is
/// stable across updates.
pub fn router_keys(
    root: &str,
    host: &str,
    middlewares: &[String],
    cert_resolver: &str,
) -> Vec<(String, String)> {
    let prefix = format!("{}/http/routers/{}", root, router_name(host));
    let mut keys = vec![
        (format!("{}/rule", prefix), format!("Host(`{}`)", host)),
        (format!("{}/entryPoints/0", prefix), "web".to_string()),
        (format!("{}/entryPoints/1", prefix), "websecure".to_string()),
    ];
    for (i, middleware) in middlewares.iter().enumerate() {
        keys.push((format!("{}/middlewares/{}", prefix, i), middleware.clone()));
    }
    keys.push((format!("{}/service", prefix), "noop@internal".to_string()));
    keys.push((
        format!("{}/tls/certResolver", prefix),
        cert_resolver.to_string(),
    ));
    keys.push((format!("{}/priority", prefix), ROUTER_PRIORITY.to_string()));
    keys
}

/// Prefix under which every key of a host's router lives; the reaper
/// deletes by this prefix.
pub fn router_prefix(root: &str, host: &str) -> String {
    format!("{}/http/routers/{}/", root, router_name(host))
}

// === Redirect middleware records ===

/// Middleware name for rule `index` of a host's `.redirects` file.
pub fn redirect_middleware_name(host: &str, index: usize) -> String {
    format!("redirects-{}-{}", dashed(host), index)
}

/// The key set for one compiled redirect rule.
pub fn redirect_middleware_keys(
    root: &str,
    host: &str,
    index: usize,
    from: &str,
    to: &str,
) -> Vec<(String, String)> {
    let prefix = format!(
        "{}/http/middlewares/{}/redirectregex",
        root,
        redirect_middleware_name(host, index)
    );
    let replacement = if to.starts_with('/') || to.contains("://") {
        to.to_string()
    } else {
        format!("/{}", to)
    };
    vec![
        (
            format!("{}/regex", prefix),
            format!("^/{}$", escape_regex(from.trim_start_matches('/'))),
        ),
        (format!("{}/replacement", prefix), replacement),
        (format!("{}/permanent", prefix), "true".to_string()),
    ]
}

/// Prefix covering every redirect middleware published for a host.
pub fn redirect_middleware_prefix(root: &str, host: &str) -> String {
    format!("{}/http/middlewares/redirects-{}-", root, dashed(host))
}

/// Escape regex metacharacters so a literal FROM path matches itself and
/// nothing else once Traefik compiles it.
pub fn escape_regex(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(
            c,
            '.' | '+' | '*' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
