//! Password-gate sessions: HMAC-signed cookies and the login page.
//!
//! Cookie value is `<unix-seconds>|<hex-hmac>`. The HMAC message binds the
//! timestamp to the coordinate (`<ts>:<owner>:<repo>`, with a `:branch`
//! scope suffix for branch-subdomain sessions) so a cookie minted for one
//! site never validates on another.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Session scope: the main site or the repository's branch subdomains.
/// Branch sessions gate every enabled branch of the repo collectively,
/// matching the single `branches_password` in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionScope {
    Main,
    Branch,
}

/// Cookie name for a coordinate's session in the given scope.
pub fn cookie_name(owner: &str, repo: &str, scope: SessionScope) -> String {
    match scope {
        SessionScope::Main => format!("pages_auth_{}_{}", owner, repo),
        SessionScope::Branch => format!("pages_branch_auth_{}_{}", owner, repo),
    }
}

fn message(ts: u64, owner: &str, repo: &str, scope: SessionScope) -> String {
    match scope {
        SessionScope::Main => format!("{}:{}:{}", ts, owner, repo),
        SessionScope::Branch => format!("{}:{}:{}:branch", ts, owner, repo),
    }
}

fn sign(secret: &str, msg: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(msg.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Mint a session cookie value at `now` (unix seconds).
///
/// With an empty secret the signature half is empty and sessions degrade
/// to timestamp-only checks; startup logs this misconfiguration.
pub fn mint(secret: &str, owner: &str, repo: &str, scope: SessionScope, now: u64) -> String {
    if secret.is_empty() {
        return format!("{}|", now);
    }
    let sig = sign(secret, &message(now, owner, repo, scope));
    format!("{}|{}", now, sig)
}

/// Verify a cookie value: timestamp within `max_age`, signature matching
/// under `secret`. Comparison is constant-time. Cookies from the future
/// never verify.
pub fn verify(
    secret: &str,
    cookie_value: &str,
    owner: &str,
    repo: &str,
    scope: SessionScope,
    now: u64,
    max_age: u64,
) -> bool {
    let Some((ts_str, sig)) = cookie_value.split_once('|') else {
        return false;
    };
    let Ok(ts) = ts_str.parse::<u64>() else {
        return false;
    };
    let Some(age) = now.checked_sub(ts) else {
        return false;
    };
    if age >= max_age {
        return false;
    }
    if secret.is_empty() {
        return true;
    }
    let expected = sign(secret, &message(ts, owner, repo, scope));
    constant_time_str_eq(sig, &expected)
}

/// Hex-encoded SHA-256, the password-hash form stored in `.pages`.
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Compare two hex digests without leaking a prefix-length timing signal.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// `Set-Cookie` header value for a freshly minted session.
pub fn set_cookie_header(name: &str, value: &str, max_age: u64) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; Secure; SameSite=Strict",
        name, value, max_age
    )
}

/// Pull a cookie's value out of a `Cookie` request header.
pub fn cookie_from_header(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k.trim() == name).then(|| v.trim().to_string())
    })
}

/// Self-contained login form. `error` re-renders after a wrong password.
pub fn login_page(site: &str, error: bool) -> String {
    let notice = if error {
        "<p class=\"error\">Incorrect password, try again.</p>"
    } else {
        ""
    };
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Password required</title>
<style>
body {{ font-family: sans-serif; max-width: 24rem; margin: 4rem auto; padding: 0 1rem; }}
input, button {{ font-size: 1rem; padding: 0.4rem; }}
.error {{ color: #b00; }}
</style>
</head>
<body>
<h1>Password required</h1>
<p>This site ({site}) is protected.</p>
{notice}
<form method="post">
<input type="password" name="password" autofocus required>
<button type="submit">Unlock</button>
</form>
</body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_mint_verify_roundtrip() {
        let cookie = mint(SECRET, "alice", "site", SessionScope::Main, 1_000);
        assert!(verify(
            SECRET,
            &cookie,
            "alice",
            "site",
            SessionScope::Main,
            1_100,
            3600
        ));
    }

    #[test]
    fn test_altered_timestamp_invalidates() {
        let cookie = mint(SECRET, "alice", "site", SessionScope::Main, 1_000);
        let sig = cookie.split_once('|').unwrap().1;
        let forged = format!("2000|{}", sig);
        assert!(!verify(
            SECRET,
            &forged,
            "alice",
            "site",
            SessionScope::Main,
            2_100,
            3600
        ));
    }

    #[test]
    fn test_altered_signature_invalidates() {
        let cookie = mint(SECRET, "alice", "site", SessionScope::Main, 1_000);
        let mut forged = cookie.clone();
        forged.pop();
        forged.push('0');
        let valid = verify(
            SECRET,
            &forged,
            "alice",
            "site",
            SessionScope::Main,
            1_100,
            3600,
        );
        // the flipped nibble may coincide only if it already was '0'
        if forged != cookie {
            assert!(!valid);
        }
    }

    #[test]
    fn test_expired_cookie_never_verifies() {
        let cookie = mint(SECRET, "alice", "site", SessionScope::Main, 1_000);
        assert!(!verify(
            SECRET,
            &cookie,
            "alice",
            "site",
            SessionScope::Main,
            1_000 + 3600,
            3600
        ));
    }

    #[test]
    fn test_future_cookie_rejected() {
        let cookie = mint(SECRET, "alice", "site", SessionScope::Main, 5_000);
        assert!(!verify(
            SECRET,
            &cookie,
            "alice",
            "site",
            SessionScope::Main,
            1_000,
            3600
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let cookie = mint(SECRET, "alice", "site", SessionScope::Main, 1_000);
        assert!(!verify(
            "other-secret",
            &cookie,
            "alice",
            "site",
            SessionScope::Main,
            1_100,
            3600
        ));
    }

    #[test]
    fn test_cookie_bound_to_coordinate() {
        let cookie = mint(SECRET, "alice", "site", SessionScope::Main, 1_000);
        assert!(!verify(
            SECRET,
            &cookie,
            "alice",
            "blog",
            SessionScope::Main,
            1_100,
            3600
        ));
        assert!(!verify(
            SECRET,
            &cookie,
            "bob",
            "site",
            SessionScope::Main,
            1_100,
            3600
        ));
    }

    #[test]
    fn test_scopes_not_interchangeable() {
        let main = mint(SECRET, "alice", "site", SessionScope::Main, 1_000);
        assert!(!verify(
            SECRET,
            &main,
            "alice",
            "site",
            SessionScope::Branch,
            1_100,
            3600
        ));
        let branch = mint(SECRET, "alice", "site", SessionScope::Branch, 1_000);
        assert!(!verify(
            SECRET,
            &branch,
            "alice",
            "site",
            SessionScope::Main,
            1_100,
            3600
        ));
    }

    #[test]
    fn test_empty_secret_is_timestamp_only() {
        let cookie = mint("", "alice", "site", SessionScope::Main, 1_000);
        assert_eq!(cookie, "1000|");
        assert!(verify("", &cookie, "alice", "site", SessionScope::Main, 1_100, 3600));
        assert!(!verify("", &cookie, "alice", "site", SessionScope::Main, 9_000, 3600));
    }

    #[test]
    fn test_garbage_cookie_rejected() {
        for junk in ["", "|", "abc", "12a|ff", "1000", "1000|zz|qq"] {
            assert!(!verify(
                SECRET,
                junk,
                "alice",
                "site",
                SessionScope::Main,
                1_100,
                3600
            ));
        }
    }

    #[test]
    fn test_cookie_names() {
        assert_eq!(
            cookie_name("alice", "site", SessionScope::Main),
            "pages_auth_alice_site"
        );
        assert_eq!(
            cookie_name("alice", "site", SessionScope::Branch),
            "pages_branch_auth_alice_site"
        );
    }

    #[test]
    fn test_hash_password_known_vector() {
        // SHA-256("hunter2")
        assert_eq!(
            hash_password("hunter2"),
            "f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7"
        );
    }

    #[test]
    fn test_cookie_from_header() {
        let header = "theme=dark; pages_auth_alice_site=1000|ff00; other=1";
        assert_eq!(
            cookie_from_header(header, "pages_auth_alice_site").as_deref(),
            Some("1000|ff00")
        );
        assert_eq!(cookie_from_header(header, "missing"), None);
    }

    #[test]
    fn test_set_cookie_attributes() {
        let header = set_cookie_header("pages_auth_alice_site", "1|ab", 3600);
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("Secure"));
        assert!(header.contains("SameSite=Strict"));
        assert!(header.contains("Path=/"));
        assert!(header.contains("Max-Age=3600"));
    }

    #[test]
    fn test_login_page_error_notice() {
        assert!(!login_page("alice/site", false).contains("Incorrect password"));
        assert!(login_page("alice/site", true).contains("Incorrect password"));
    }

    #[test]
    fn test_constant_time_str_eq() {
        assert!(constant_time_str_eq("abcd", "abcd"));
        assert!(!constant_time_str_eq("abcd", "abce"));
        assert!(!constant_time_str_eq("abcd", "abc"));
    }
}
