//! Error-page table and operator help pages.
//!
//! Custom pages are preloaded from the operator's error-pages repository
//! at startup (and on explicit re-init); the table is read-mostly and
//! treated as immutable between reloads. Statuses without a custom page
//! fall back to a minimal built-in rendering.

use crate::forge::ForgeClient;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Statuses the preloader tries to fetch pages for.
const PRELOADED_STATUSES: [u16; 6] = [400, 401, 403, 404, 500, 502];

/// Process-wide error-page table plus the pages-domain landing slot.
pub struct ErrorPages {
    pages: RwLock<HashMap<u16, String>>,
    landing: RwLock<Option<String>>,
}

impl ErrorPages {
    pub fn new() -> Self {
        Self {
            pages: RwLock::new(HashMap::new()),
            landing: RwLock::new(None),
        }
    }

    /// Load `<status>.html` pages and the `index.html` landing page from
    /// the `owner/repo` error-pages repository. Missing files are fine;
    /// transport failures are logged and leave the previous table intact.
    pub async fn preload(&self, forge: &ForgeClient, repo_spec: &str) {
        let Some((owner, repo)) = repo_spec.split_once('/') else {
            return;
        };

        let mut loaded = HashMap::new();
        for status in PRELOADED_STATUSES {
            match forge
                .get_file_raw(owner, repo, &format!("{}.html", status), None)
                .await
            {
                Ok(body) => match String::from_utf8(body.to_vec()) {
                    Ok(html) => {
                        loaded.insert(status, html);
                    }
                    Err(_) => {
                        tracing::warn!("error page {}.html in {} is not UTF-8", status, repo_spec);
                    }
                },
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::warn!("failed to preload {}.html from {}: {}", status, repo_spec, e);
                }
            }
        }

        let landing = match forge.get_file_raw(owner, repo, "index.html", None).await {
            Ok(body) => String::from_utf8(body.to_vec()).ok(),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                tracing::warn!("failed to preload landing page from {}: {}", repo_spec, e);
                None
            }
        };

        if !loaded.is_empty() {
            tracing::info!(
                "loaded {} custom error pages from {}",
                loaded.len(),
                repo_spec
            );
        }
        *self.pages.write().await = loaded;
        *self.landing.write().await = landing;
    }

    /// Render the page for `status`: custom if loaded, built-in otherwise.
    pub async fn render(&self, status: u16, message: &str) -> String {
        let pages = self.pages.read().await;
        match pages.get(&status) {
            Some(html) => html.clone(),
            None => default_page(status, message),
        }
    }

    /// The preloaded landing page for the bare pages domain, if any.
    pub async fn landing(&self) -> Option<String> {
        self.landing.read().await.clone()
    }
}

impl Default for ErrorPages {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal built-in error page.
pub fn default_page(status: u16, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>{status}</title></head>
<body style="font-family: sans-serif; max-width: 36rem; margin: 4rem auto;">
<h1>{status}</h1>
<p>{message}</p>
<hr><p><small>bovine</small></p>
</body>
</html>
"#
    )
}

/// Help page shown when a custom domain has no mapping yet.
pub fn activation_help(host: &str, pages_domain: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Domain not activated</title></head>
<body style="font-family: sans-serif; max-width: 36rem; margin: 4rem auto;">
<h1>{host} is not activated</h1>
<p>No repository has claimed this hostname yet. To activate it:</p>
<ol>
<li>Add <code>custom_domain: {host}</code> to the <code>.pages</code> file of your repository.</li>
<li>Point this hostname at the pages server.</li>
<li>Visit your site once at <code>https://&lt;user&gt;.{pages_domain}/&lt;repo&gt;/</code> to trigger activation.</li>
</ol>
<hr><p><small>bovine</small></p>
</body>
</html>
"#
    )
}

/// Help page shown when `/LOAD_REDIRECTS` finds no `.redirects` file.
pub fn redirects_help() -> String {
    r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>No .redirects file</title></head>
<body style="font-family: sans-serif; max-width: 36rem; margin: 4rem auto;">
<h1>No <code>.redirects</code> file found</h1>
<p>To define redirects, add a <code>.redirects</code> file to the root of your
repository. One rule per line in <code>FROM:TO</code> form:</p>
<pre>
# comments start with '#'
old-page:new-page
blog/2019:archive/2019
legacy:https://elsewhere.example/moved
</pre>
<p>After pushing, reload the rules by visiting <code>/LOAD_REDIRECTS</code> on
your custom domain. See the
<a href="https://wiki.bovine-pages.dev/redirects">redirects documentation</a>
for details.</p>
<hr><p><small>bovine</small></p>
</body>
</html>
"#
    .to_string()
}
