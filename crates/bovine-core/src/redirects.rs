//! `.redirects` rule parsing and compilation into proxy middleware records.
//!
//! Grammar: one `FROM:TO` rule per line, `#` line comments and blank lines
//! permitted, empty FROM or TO invalid. The rule count is capped to bound
//! routing-store growth.

use crate::cache::Store;
use crate::error::Result;
use crate::store;
use bytes::Bytes;

/// One parsed redirect rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectRule {
    pub from: String,
    pub to: String,
}

/// Parse `.redirects` text, honoring at most `max` rules.
pub fn parse_redirects(text: &str, max: usize) -> Vec<RedirectRule> {
    let mut rules = Vec::new();
    for (lineno, raw_line) in text.lines().enumerate() {
        if rules.len() >= max {
            tracing::warn!("ignoring redirect rules beyond the cap of {}", max);
            break;
        }
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((from, to)) = line.split_once(':') else {
            tracing::warn!("skipping malformed redirect on line {}: {:?}", lineno + 1, line);
            continue;
        };
        let from = from.trim();
        let to = to.trim();
        if from.is_empty() || to.is_empty() {
            tracing::warn!("skipping redirect with empty side on line {}", lineno + 1);
            continue;
        }
        rules.push(RedirectRule {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    rules
}

/// The full key set compiling `rules` for `host`: one `redirectregex`
/// middleware per rule, plus a router whose chain lists every redirect
/// middleware in order before the pages middleware.
pub fn compile_keys(
    root: &str,
    host: &str,
    cert_resolver: &str,
    rules: &[RedirectRule],
) -> Vec<(String, String)> {
    let mut keys = Vec::new();
    let mut chain = Vec::with_capacity(rules.len() + 1);
    for (i, rule) in rules.iter().enumerate() {
        keys.extend(store::redirect_middleware_keys(
            root, host, i, &rule.from, &rule.to,
        ));
        chain.push(store::redirect_middleware_name(host, i));
    }
    chain.push(store::PAGES_MIDDLEWARE.to_string());
    keys.extend(store::router_keys(root, host, &chain, cert_resolver));
    keys
}

/// Publish compiled records for `host`. Stale middleware records from a
/// previous, longer rule set are removed first so two runs over the same
/// file converge to the same key set. Returns the number of rules written.
pub async fn publish(
    cache: &dyn Store,
    root: &str,
    host: &str,
    cert_resolver: &str,
    router_ttl: u64,
    rules: &[RedirectRule],
) -> Result<usize> {
    let stale_pattern = format!("{}*", store::redirect_middleware_prefix(root, host));
    for key in cache.keys(&stale_pattern).await? {
        cache.delete(&key).await?;
    }
    let router_pattern = format!("{}*", store::router_prefix(root, host));
    for key in cache.keys(&router_pattern).await? {
        cache.delete(&key).await?;
    }

    for (key, value) in compile_keys(root, host, cert_resolver, rules) {
        cache
            .set_with_ttl(&key, Bytes::from(value), router_ttl)
            .await?;
    }
    Ok(rules.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, MemoryCache};

    #[test]
    fn test_parse_basic_rules() {
        let rules = parse_redirects("old:new\nfoo:/bar\n", 25);
        assert_eq!(
            rules,
            vec![
                RedirectRule {
                    from: "old".into(),
                    to: "new".into()
                },
                RedirectRule {
                    from: "foo".into(),
                    to: "/bar".into()
                },
            ]
        );
    }

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let rules = parse_redirects("# header\n\nold:new\n  # tail\n", 25);
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn test_parse_rejects_empty_sides() {
        assert!(parse_redirects(":new\nold:\n:\n", 25).is_empty());
    }

    #[test]
    fn test_parse_skips_lines_without_separator() {
        assert!(parse_redirects("no separator here\n", 25).is_empty());
    }

    #[test]
    fn test_parse_honors_cap() {
        let text = (0..40)
            .map(|i| format!("from{}:to{}\n", i, i))
            .collect::<String>();
        assert_eq!(parse_redirects(&text, 25).len(), 25);
    }

    #[test]
    fn test_parse_to_may_contain_colon() {
        let rules = parse_redirects("old:https://elsewhere.test/x\n", 25);
        assert_eq!(rules[0].to, "https://elsewhere.test/x");
    }

    #[test]
    fn test_compile_orders_redirects_before_pages() {
        let rules = parse_redirects("a:b\nc:d\n", 25);
        let keys = compile_keys("traefik", "www.alice.test", "letsencrypt-http", &rules);
        let chain: Vec<&str> = keys
            .iter()
            .filter(|(k, _)| k.contains("/middlewares/") && k.contains("/routers/"))
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(
            chain,
            vec![
                "redirects-www-alice-test-0",
                "redirects-www-alice-test-1",
                "pages-server@file",
            ]
        );
    }

    #[test]
    fn test_compile_is_idempotent() {
        let rules = parse_redirects("old:new\n", 25);
        let first = compile_keys("traefik", "h.test", "r", &rules);
        let second = compile_keys("traefik", "h.test", "r", &rules);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_publish_writes_expected_records() {
        let cache = MemoryCache::new(0);
        let rules = parse_redirects("old:new\n", 25);
        let written = publish(&cache, "traefik", "www.alice.test", "letsencrypt-http", 0, &rules)
            .await
            .unwrap();
        assert_eq!(written, 1);

        let regex = cache
            .get("traefik/http/middlewares/redirects-www-alice-test-0/redirectregex/regex")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&regex[..], b"^/old$");

        let replacement = cache
            .get("traefik/http/middlewares/redirects-www-alice-test-0/redirectregex/replacement")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&replacement[..], b"/new");

        let chain_head = cache
            .get("traefik/http/routers/custom-www-alice-test/middlewares/0")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&chain_head[..], b"redirects-www-alice-test-0");
    }

    #[tokio::test]
    async fn test_publish_twice_converges() {
        use crate::cache::KeyScan;

        let cache = MemoryCache::new(0);
        let rules = parse_redirects("a:b\nc:d\n", 25);
        publish(&cache, "traefik", "h.test", "r", 0, &rules).await.unwrap();
        let first = cache.keys("traefik/*").await.unwrap();

        publish(&cache, "traefik", "h.test", "r", 0, &rules).await.unwrap();
        let second = cache.keys("traefik/*").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_publish_removes_stale_rules() {
        let cache = MemoryCache::new(0);
        let long = parse_redirects("a:b\nc:d\ne:f\n", 25);
        publish(&cache, "traefik", "h.test", "r", 0, &long).await.unwrap();

        let short = parse_redirects("a:b\n", 25);
        publish(&cache, "traefik", "h.test", "r", 0, &short).await.unwrap();

        assert!(
            cache
                .get("traefik/http/middlewares/redirects-h-test-2/redirectregex/regex")
                .await
                .unwrap()
                .is_none()
        );
        // the router chain shrank with it
        assert!(
            cache
                .get("traefik/http/routers/custom-h-test/middlewares/2")
                .await
                .unwrap()
                .is_none()
        );
    }
}
