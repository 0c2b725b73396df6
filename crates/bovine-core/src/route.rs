//! Host + path classification.
//!
//! Pure functions from the request's `Host` header (port stripped) and URL
//! path to a serving decision. Everything that needs I/O (mapping lookups,
//! manifest reads) happens later, in the serving layer; classification is
//! deterministic and side-effect free.

/// Repository owner of profile sites (`https://<user>.<pagesDomain>/`).
pub const PROFILE_REPO: &str = ".profile";

/// Subdirectory of the repository that pages are served from.
pub const SITE_ROOT: &str = "public";

/// A repository address: owner, repository, optional branch.
/// `branch: None` means the repository's default branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoCoordinate {
    pub owner: String,
    pub repo: String,
    pub branch: Option<String>,
}

impl RepoCoordinate {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: None,
        }
    }

    pub fn with_branch(
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: Some(branch.into()),
        }
    }
}

impl std::fmt::Display for RepoCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.branch {
            Some(branch) => write!(f, "{}/{}@{}", self.owner, self.repo, branch),
            None => write!(f, "{}/{}", self.owner, self.repo),
        }
    }
}

/// Where a request goes after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `/.well-known/acme-challenge/...`: hand to the host proxy's next
    /// handler verbatim, no redirect.
    AcmeChallenge,
    /// `/LOAD_REDIRECTS`: recompile the host's `.redirects` rules.
    LoadRedirects,
    /// Plain-http request; redirect to the https equivalent.
    HttpsRedirect { location: String },
    /// The bare pages domain itself: landing page or 400.
    Landing,
    /// `<owner>.<pagesDomain>/...`
    Pages {
        coordinate: RepoCoordinate,
        file_path: String,
    },
    /// Any other hostname; resolved through the custom-domain mapping.
    CustomDomain { host: String, file_path: String },
    /// Unroutable (bad host, empty subdomain, traversal attempt).
    Invalid { reason: String },
}

/// Strip an optional `:port` suffix and lowercase the host.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    // Don't mangle IPv6 literals like [::1]:8080
    let without_port = if let Some(end) = host.strip_prefix('[').and_then(|h| h.find(']')) {
        &host[1..=end]
    } else {
        host.rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map(|(h, _)| h)
            .unwrap_or(host)
    };
    without_port.to_lowercase()
}

fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn has_traversal(path: &str) -> bool {
    path.split('/').any(|segment| segment == "..")
}

/// Classify a request. `forwarded_proto` is the `X-Forwarded-Proto` value
/// when present, else the transport scheme the host proxy saw.
pub fn classify(
    host: &str,
    path: &str,
    query: Option<&str>,
    forwarded_proto: Option<&str>,
    pages_domain: &str,
    custom_domains_enabled: bool,
) -> Route {
    // ACME challenges pass through untouched, even over plain http.
    if path.starts_with("/.well-known/acme-challenge/") {
        return Route::AcmeChallenge;
    }

    if path == "/LOAD_REDIRECTS" {
        return Route::LoadRedirects;
    }

    if forwarded_proto == Some("http") {
        let suffix = match query {
            Some(q) if !q.is_empty() => format!("{}?{}", path, q),
            _ => path.to_string(),
        };
        return Route::HttpsRedirect {
            location: format!("https://{}{}", host.trim(), suffix),
        };
    }

    let host = normalize_host(host);
    if host.is_empty() {
        return Route::Invalid {
            reason: "missing Host header".to_string(),
        };
    }
    if has_traversal(path) {
        return Route::Invalid {
            reason: "path traversal".to_string(),
        };
    }

    if host == pages_domain {
        return Route::Landing;
    }

    if let Some(subdomain) = host.strip_suffix(&format!(".{}", pages_domain)) {
        return classify_pages(subdomain, path);
    }

    if custom_domains_enabled {
        let segments = path_segments(path);
        let file_path = if segments.is_empty() {
            SITE_ROOT.to_string()
        } else {
            format!("{}/{}", SITE_ROOT, segments.join("/"))
        };
        return Route::CustomDomain { host, file_path };
    }

    Route::Invalid {
        reason: format!("host {:?} is not under the pages domain", host),
    }
}

/// Parse `<subdomain>.<pagesDomain>` requests.
///
/// `file_path == "public"` (no trailing slash) is the sentinel that makes
/// the serving loop try `index.html` and then a directory listing.
fn classify_pages(subdomain: &str, path: &str) -> Route {
    if subdomain.is_empty() {
        return Route::Invalid {
            reason: "empty subdomain".to_string(),
        };
    }
    let owner = subdomain.to_string();
    let segments = path_segments(path);

    match segments.as_slice() {
        // Profile site root
        [] => Route::Pages {
            coordinate: RepoCoordinate::new(owner, PROFILE_REPO),
            file_path: SITE_ROOT.to_string(),
        },
        // A single dotted segment is a file in the profile site
        [file] if file.contains('.') => Route::Pages {
            coordinate: RepoCoordinate::new(owner, PROFILE_REPO),
            file_path: format!("{}/{}", SITE_ROOT, file),
        },
        // A single bare segment names a repository
        [repo] => Route::Pages {
            coordinate: RepoCoordinate::new(owner, *repo),
            file_path: SITE_ROOT.to_string(),
        },
        [repo, rest @ ..] => Route::Pages {
            coordinate: RepoCoordinate::new(owner, *repo),
            file_path: format!("{}/{}", SITE_ROOT, rest.join("/")),
        },
    }
}
