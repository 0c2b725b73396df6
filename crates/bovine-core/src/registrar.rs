//! Custom-domain registration.
//!
//! Triggered as a side effect of successfully served pages-domain
//! responses: when the manifest names a `custom_domain`, ownership is
//! proved over DNS (optional), forward/reverse mappings are written, and
//! router records are published for the host proxy. Registration failure
//! never affects the response that triggered it; callers spawn this and
//! log the outcome.

use crate::cache::Store;
use crate::error::{Error, Result};
use crate::forge::ForgeClient;
use crate::manifest::PagesManifest;
use crate::route::RepoCoordinate;
use crate::session::constant_time_str_eq;
use crate::store;
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// TXT record prefix for ownership proofs.
pub const TXT_PREFIX: &str = "bovine-pages-verification=";

/// The TXT record value proving ownership of a domain for `owner/repo`.
pub fn expected_txt(owner: &str, repo: &str) -> String {
    let digest = Sha256::digest(format!("{}/{}", owner, repo).as_bytes());
    format!("{}{}", TXT_PREFIX, hex::encode(digest))
}

/// DNS TXT lookup, abstracted so the proof gate is testable without a
/// resolver. Production uses hickory behind [`SystemTxtResolver`].
#[async_trait]
pub trait TxtLookup: Send + Sync {
    async fn txt_records(&self, host: &str) -> Result<Vec<String>>;
}

/// System-configured hickory resolver.
pub struct SystemTxtResolver {
    resolver: hickory_resolver::TokioResolver,
}

impl SystemTxtResolver {
    pub fn new() -> Result<Self> {
        let resolver = hickory_resolver::TokioResolver::builder_tokio()
            .map_err(|e| Error::Config(format!("failed to read system DNS config: {}", e)))?
            .build();
        Ok(Self { resolver })
    }
}

#[async_trait]
impl TxtLookup for SystemTxtResolver {
    async fn txt_records(&self, host: &str) -> Result<Vec<String>> {
        let lookup = self
            .resolver
            .txt_lookup(format!("{}.", host))
            .await
            .map_err(|e| Error::Upstream(format!("TXT lookup for {} failed: {}", host, e)))?;
        Ok(lookup
            .iter()
            .map(|txt| {
                // Concatenate character-strings per RFC 1035
                txt.txt_data()
                    .iter()
                    .map(|segment| String::from_utf8_lossy(segment).into_owned())
                    .collect::<String>()
            })
            .collect())
    }
}

/// Settings the registrar needs from operator config.
#[derive(Debug, Clone)]
pub struct RegistrarSettings {
    pub verify_dns: bool,
    pub router_enabled: bool,
    pub root_key: String,
    pub cert_resolver: String,
    pub router_ttl: u64,
}

pub struct Registrar {
    cache: Arc<dyn Store>,
    forge: Arc<ForgeClient>,
    txt: Arc<dyn TxtLookup>,
    settings: RegistrarSettings,
}

impl Registrar {
    pub fn new(
        cache: Arc<dyn Store>,
        forge: Arc<ForgeClient>,
        txt: Arc<dyn TxtLookup>,
        settings: RegistrarSettings,
    ) -> Self {
        Self {
            cache,
            forge,
            txt,
            settings,
        }
    }

    /// Register the manifest's custom domain (and branch subdomains) for
    /// `owner/repo`. Idempotent: re-running with the same inputs is a
    /// no-op on mappings and a safe rewrite of router records.
    pub async fn register(
        &self,
        owner: &str,
        repo: &str,
        manifest: &PagesManifest,
    ) -> Result<()> {
        let Some(domain) = manifest.custom_domain.as_deref() else {
            if !manifest.enable_branches.is_empty() {
                tracing::warn!(
                    "{}/{} sets enable_branches without a custom_domain; branch subdomains \
                     need a custom domain to attach to",
                    owner,
                    repo
                );
            }
            return Ok(());
        };

        if self.settings.verify_dns {
            self.verify_ownership(owner, repo, domain).await?;
        }

        let main = RepoCoordinate::new(owner, repo);
        self.bind(domain, &main).await?;
        self.write_reverse(&store::reverse_key(owner, repo), domain).await?;
        self.publish_router(domain).await?;
        tracing::info!("registered custom domain {} -> {}", domain, main);

        for branch in &manifest.enable_branches {
            if let Err(e) = self.register_branch(owner, repo, branch, domain).await {
                tracing::warn!(
                    "skipping branch subdomain for {}/{}@{}: {}",
                    owner,
                    repo,
                    branch,
                    e
                );
            }
        }

        Ok(())
    }

    async fn register_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        domain: &str,
    ) -> Result<()> {
        if !self.forge.get_branch(owner, repo, branch).await? {
            return Err(Error::NotFound(format!("branch {} does not exist", branch)));
        }
        let label = sanitize_branch_label(branch);
        if label.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "branch name {:?} sanitizes to an empty DNS label",
                branch
            )));
        }
        let host = format!("{}.{}", label, domain);
        let coordinate = RepoCoordinate::with_branch(owner, repo, branch);
        self.bind(&host, &coordinate).await?;
        self.write_reverse(&store::reverse_branch_key(owner, repo, branch), &host)
            .await?;
        self.publish_router(&host).await?;
        tracing::info!("registered branch subdomain {} -> {}", host, coordinate);
        Ok(())
    }

    /// Write the forward mapping, refusing to steal a hostname that is
    /// already bound to a different coordinate.
    async fn bind(&self, host: &str, coordinate: &RepoCoordinate) -> Result<()> {
        let key = store::forward_key(host);
        let desired = store::encode_binding(coordinate);

        if let Some(existing) = self.cache.get(&key).await? {
            let existing = String::from_utf8_lossy(&existing).into_owned();
            if existing != desired {
                let msg = format!(
                    "{} is already bound to {}; refusing to rebind to {}",
                    host, existing, desired
                );
                tracing::error!("{}", msg);
                return Err(Error::RegistrationRejected(msg));
            }
            return Ok(()); // idempotent re-registration
        }

        self.cache.set_with_ttl(&key, Bytes::from(desired), 0).await
    }

    async fn write_reverse(&self, key: &str, host: &str) -> Result<()> {
        self.cache
            .set_with_ttl(key, Bytes::from(host.to_string()), 0)
            .await
    }

    /// Publish router records for `host`. The middleware chain re-lists
    /// any redirect middlewares already compiled for the host, in index
    /// order, so re-registration never clobbers `/LOAD_REDIRECTS` output.
    async fn publish_router(&self, host: &str) -> Result<()> {
        if !self.settings.router_enabled {
            return Ok(());
        }
        let root = &self.settings.root_key;
        let mut chain = self.existing_redirect_chain(host).await?;
        chain.push(store::PAGES_MIDDLEWARE.to_string());

        for (key, value) in
            store::router_keys(root, host, &chain, &self.settings.cert_resolver)
        {
            self.cache
                .set_with_ttl(&key, Bytes::from(value), self.settings.router_ttl)
                .await?;
        }
        Ok(())
    }

    async fn existing_redirect_chain(&self, host: &str) -> Result<Vec<String>> {
        let root = &self.settings.root_key;
        let pattern = format!("{}*", store::redirect_middleware_prefix(root, host));
        let mut indexes: Vec<usize> = self
            .cache
            .keys(&pattern)
            .await?
            .iter()
            .filter(|k| k.ends_with("/redirectregex/regex"))
            .filter_map(|k| {
                k.strip_suffix("/redirectregex/regex")?
                    .rsplit('-')
                    .next()?
                    .parse()
                    .ok()
            })
            .collect();
        indexes.sort_unstable();
        Ok(indexes
            .into_iter()
            .map(|i| store::redirect_middleware_name(host, i))
            .collect())
    }

    async fn verify_ownership(&self, owner: &str, repo: &str, domain: &str) -> Result<()> {
        let expected = expected_txt(owner, repo);
        let records = self.txt.txt_records(domain).await?;

        let proven = records.iter().any(|record| {
            let trimmed = record.trim();
            let compact: String = record.chars().filter(|c| !c.is_whitespace()).collect();
            constant_time_str_eq(trimmed, &expected) || constant_time_str_eq(&compact, &expected)
        });

        if proven {
            Ok(())
        } else {
            let msg = format!(
                "DNS ownership proof missing for {}: add a TXT record with value {:?} \
                 and retry",
                domain, expected
            );
            tracing::error!("{}", msg);
            Err(Error::RegistrationRejected(msg))
        }
    }
}

/// Sanitize a branch name into a DNS label: lowercase; `/`, `_`, `.`
/// become `-`; anything else non-alphanumeric is stripped; `-` runs
/// collapse; leading/trailing `-` trim; 63-char cap. Returns the empty
/// string when nothing usable remains.
pub fn sanitize_branch_label(branch: &str) -> String {
    let mut label = String::with_capacity(branch.len());
    for c in branch.to_lowercase().chars() {
        match c {
            '/' | '_' | '.' => {
                if !label.ends_with('-') {
                    label.push('-');
                }
            }
            'a'..='z' | '0'..='9' => label.push(c),
            '-' => {
                if !label.ends_with('-') {
                    label.push('-');
                }
            }
            _ => {}
        }
    }
    let mut label: String = label.trim_matches('-').to_string();
    if label.len() > 63 {
        label.truncate(63);
        label = label.trim_end_matches('-').to_string();
    }
    label
}
