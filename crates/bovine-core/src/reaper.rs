//! Garbage collection of stale routing records.
//!
//! The reaper runs as a separate process (`bovine reap`). It scans every
//! forward mapping, asks the forge whether the bound repository still
//! opts in, and removes mappings and router records for the ones that
//! don't. Transport failures never trigger deletion: a forge outage must
//! not tear down live sites.

use crate::cache::Store;
use crate::error::{Error, Result};
use crate::forge::ForgeClient;
use crate::store;

/// Outcome of one reaper pass. The CLI maps this to exit codes.
#[derive(Debug, Default)]
pub struct ReaperReport {
    /// Forward mappings examined.
    pub scanned: usize,
    /// Hostnames whose records were removed (or would be, in dry-run).
    pub removed: Vec<String>,
    /// Hostnames kept because their repository still opts in.
    pub kept: usize,
    /// Hostnames skipped because the opt-in check failed; described.
    pub failures: Vec<String>,
    pub dry_run: bool,
}

impl ReaperReport {
    /// True when every mapping was either kept or cleanly removed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Scan all forward mappings and remove records whose source repository
/// no longer advertises `.pages`. With `dry_run`, intended deletions are
/// reported but not applied.
pub async fn run(
    cache: &dyn Store,
    forge: &ForgeClient,
    root_key: &str,
    dry_run: bool,
) -> Result<ReaperReport> {
    let mut report = ReaperReport {
        dry_run,
        ..Default::default()
    };

    let forward_keys = cache.keys("custom_domain:*").await?;
    report.scanned = forward_keys.len();

    for key in forward_keys {
        let Some(host) = key.strip_prefix("custom_domain:") else {
            continue;
        };

        let binding = match cache.get(&key).await? {
            Some(value) => String::from_utf8_lossy(&value).into_owned(),
            None => {
                // Raced with a concurrent delete; nothing left to do.
                continue;
            }
        };

        let coordinate = match store::parse_binding(&binding) {
            Ok(c) => c,
            Err(_) => {
                tracing::warn!("removing unparseable binding {} = {:?}", key, binding);
                report.removed.push(host.to_string());
                if !dry_run {
                    remove_host(cache, root_key, host, &key, None).await?;
                }
                continue;
            }
        };

        match forge.has_manifest(&coordinate.owner, &coordinate.repo).await {
            Ok(true) => {
                report.kept += 1;
            }
            Ok(false) | Err(Error::NotFound(_)) => {
                tracing::info!(
                    "{} no longer opts in to pages; reaping {}",
                    coordinate,
                    host
                );
                report.removed.push(host.to_string());
                if !dry_run {
                    remove_host(cache, root_key, host, &key, Some(&coordinate)).await?;
                }
            }
            Err(e) => {
                tracing::warn!("skipping {}: opt-in check failed: {}", host, e);
                report.failures.push(format!("{}: {}", host, e));
            }
        }
    }

    Ok(report)
}

/// Delete everything recorded for one hostname: forward mapping, reverse
/// mapping, router keys, and redirect middlewares.
async fn remove_host(
    cache: &dyn Store,
    root_key: &str,
    host: &str,
    forward_key: &str,
    coordinate: Option<&crate::route::RepoCoordinate>,
) -> Result<()> {
    cache.delete(forward_key).await?;

    if let Some(coordinate) = coordinate {
        let reverse = match &coordinate.branch {
            Some(branch) => {
                store::reverse_branch_key(&coordinate.owner, &coordinate.repo, branch)
            }
            None => store::reverse_key(&coordinate.owner, &coordinate.repo),
        };
        cache.delete(&reverse).await?;
    }

    for pattern in [
        format!("{}*", store::router_prefix(root_key, host)),
        format!("{}*", store::redirect_middleware_prefix(root_key, host)),
    ] {
        for key in cache.keys(&pattern).await? {
            cache.delete(&key).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, KeyScan, MemoryCache};
    use bytes::Bytes;

    async fn seed_binding(cache: &MemoryCache, host: &str, binding: &str) {
        cache
            .set_with_ttl(
                &store::forward_key(host),
                Bytes::from(binding.to_string()),
                0,
            )
            .await
            .unwrap();
        let parts: Vec<&str> = binding.split(':').collect();
        let reverse = match parts.as_slice() {
            [owner, repo] => store::reverse_key(owner, repo),
            [owner, repo, branch] => store::reverse_branch_key(owner, repo, branch),
            _ => unreachable!(),
        };
        cache
            .set_with_ttl(&reverse, Bytes::from(host.to_string()), 0)
            .await
            .unwrap();
        for (key, value) in store::router_keys(
            "traefik",
            host,
            &[store::PAGES_MIDDLEWARE.to_string()],
            "letsencrypt-http",
        ) {
            cache.set_with_ttl(&key, Bytes::from(value), 0).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_unparseable_binding_removed() {
        let cache = MemoryCache::new(0);
        cache
            .set_with_ttl(
                "custom_domain:broken.test",
                Bytes::from_static(b"garbage"),
                0,
            )
            .await
            .unwrap();

        let forge = ForgeClient::new("https://forge.invalid", None).unwrap();
        let report = run(&cache, &forge, "traefik", false).await.unwrap();

        assert_eq!(report.scanned, 1);
        assert_eq!(report.removed, vec!["broken.test"]);
        assert!(cache.get("custom_domain:broken.test").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_forge_is_failure_not_deletion() {
        let cache = MemoryCache::new(0);
        seed_binding(&cache, "www.alice.test", "alice:site").await;

        // forge.invalid never resolves: the opt-in check errors out
        let forge = ForgeClient::new("https://forge.invalid", None).unwrap();
        let report = run(&cache, &forge, "traefik", false).await.unwrap();

        assert_eq!(report.scanned, 1);
        assert!(report.removed.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_clean());
        // nothing was deleted
        assert!(cache.get("custom_domain:www.alice.test").await.unwrap().is_some());
        assert!(cache.get("alice:site").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dry_run_never_deletes() {
        let cache = MemoryCache::new(0);
        cache
            .set_with_ttl(
                "custom_domain:broken.test",
                Bytes::from_static(b"garbage"),
                0,
            )
            .await
            .unwrap();

        let forge = ForgeClient::new("https://forge.invalid", None).unwrap();
        let report = run(&cache, &forge, "traefik", true).await.unwrap();

        assert_eq!(report.removed, vec!["broken.test"]);
        assert!(report.dry_run);
        assert!(cache.get("custom_domain:broken.test").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_host_clears_all_records() {
        let cache = MemoryCache::new(0);
        seed_binding(&cache, "www.alice.test", "alice:site").await;
        // plus a compiled redirect
        let rules = crate::redirects::parse_redirects("old:new\n", 25);
        crate::redirects::publish(&cache, "traefik", "www.alice.test", "r", 0, &rules)
            .await
            .unwrap();

        let coordinate = crate::route::RepoCoordinate::new("alice", "site");
        remove_host(
            &cache,
            "traefik",
            "www.alice.test",
            "custom_domain:www.alice.test",
            Some(&coordinate),
        )
        .await
        .unwrap();

        assert!(cache.keys("custom_domain:*").await.unwrap().is_empty());
        assert!(cache.keys("traefik/*").await.unwrap().is_empty());
        assert!(cache.get("alice:site").await.unwrap().is_none());
    }
}
