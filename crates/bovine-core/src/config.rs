//! Configuration parsing and resolution for bovine

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Full configuration for bovine
#[derive(Debug, Clone, Deserialize)]
pub struct BovineConfig {
    pub pages: PagesConfig,
    pub forge: ForgeConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub traefik: TraefikConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    pub server: Option<ServerConfig>,
}

/// Pages-domain and serving configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PagesConfig {
    /// Wildcard base hostname, e.g. `pages.example.com`
    pub domain: String,
    /// Repository (under the forge) holding custom error pages and the
    /// landing page, as `owner/repo`. Empty disables the table.
    #[serde(default)]
    pub error_pages_repo: String,
    #[serde(default = "default_true")]
    pub enable_custom_domains: bool,
    /// Content cache TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,
    /// Custom-domain mapping lookup cache TTL in seconds
    #[serde(default = "default_custom_domain_cache_ttl")]
    pub custom_domain_cache_ttl: u64,
    /// Upper bound on `.redirects` rules honored per repository
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
}

/// Forge (Forgejo/Gitea) API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ForgeConfig {
    /// Base URL of the forge, e.g. `https://codeberg.org`
    pub host: String,
    /// API token; required to serve pages from private repositories
    pub token: Option<ConfigValue>,
}

/// Redis connection and pool configuration.
///
/// An empty `host` disables Redis entirely; all caches then run in-memory.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    pub password: Option<ConfigValue>,
    /// Idle connections kept warm in the pool
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,
    /// Hard ceiling on live connections (idle + in-use)
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: usize,
    /// Seconds to wait for a connection slot before degrading to memory
    #[serde(default = "default_redis_conn_wait_timeout")]
    pub conn_wait_timeout: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_redis_port(),
            password: None,
            pool_size: default_redis_pool_size(),
            max_connections: default_redis_max_connections(),
            conn_wait_timeout: default_redis_conn_wait_timeout(),
        }
    }
}

/// Traefik routing-store publication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TraefikConfig {
    #[serde(default = "default_true")]
    pub router_enabled: bool,
    #[serde(default = "default_cert_resolver")]
    pub cert_resolver: String,
    /// TTL for published router records; 0 = persistent, reaper-managed
    #[serde(default)]
    pub router_ttl: u64,
    /// Key prefix the host proxy watches
    #[serde(default = "default_root_key")]
    pub root_key: String,
}

impl Default for TraefikConfig {
    fn default() -> Self {
        Self {
            router_enabled: true,
            cert_resolver: default_cert_resolver(),
            router_ttl: 0,
            root_key: default_root_key(),
        }
    }
}

/// Session-cookie configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Session lifetime in seconds
    #[serde(default = "default_cookie_duration")]
    pub cookie_duration: u64,
    /// HMAC secret for signed session cookies. Leaving this unset degrades
    /// sessions to timestamp-only checks; a warning is logged at startup.
    pub secret_key: Option<ConfigValue>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_duration: default_cookie_duration(),
            secret_key: None,
        }
    }
}

/// DNS ownership-proof configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DnsConfig {
    /// Require a TXT proof record before activating a custom domain
    #[serde(default)]
    pub verify_custom_domains: bool,
}

/// Listener configuration for the embedded router
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_custom_domain_cache_ttl() -> u64 {
    600
}

fn default_max_redirects() -> usize {
    25
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_max_connections() -> usize {
    20
}

fn default_redis_conn_wait_timeout() -> u64 {
    5
}

fn default_cert_resolver() -> String {
    "letsencrypt-http".to_string()
}

fn default_root_key() -> String {
    "traefik".to_string()
}

fn default_cookie_duration() -> u64 {
    3600
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// A config value that can be a literal or env var reference
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Literal(String),
}

impl ConfigValue {
    /// Resolve the value, reading from env if it starts with "env:"
    pub fn resolve(&self) -> Result<String> {
        match self {
            ConfigValue::Literal(s) => {
                if let Some(var_name) = s.strip_prefix("env:") {
                    std::env::var(var_name).map_err(|_| {
                        Error::Config(format!("Environment variable {} not set", var_name))
                    })
                } else {
                    Ok(s.clone())
                }
            }
        }
    }
}

impl BovineConfig {
    /// Validate operator configuration. Called once at startup; any error
    /// here aborts the process before a listener binds.
    pub fn validate(&self) -> Result<()> {
        if self.pages.domain.trim().is_empty() {
            return Err(Error::Config("pages.domain must be set".to_string()));
        }
        if self.pages.domain.contains('/') || self.pages.domain.contains(':') {
            return Err(Error::Config(format!(
                "pages.domain must be a bare hostname, got {:?}",
                self.pages.domain
            )));
        }
        if self.forge.host.trim().is_empty() {
            return Err(Error::Config("forge.host must be set".to_string()));
        }
        if !self.forge.host.starts_with("http://") && !self.forge.host.starts_with("https://") {
            return Err(Error::Config(format!(
                "forge.host must be an http(s) URL, got {:?}",
                self.forge.host
            )));
        }
        if !self.pages.error_pages_repo.is_empty()
            && self.pages.error_pages_repo.split('/').count() != 2
        {
            return Err(Error::Config(format!(
                "pages.error_pages_repo must be owner/repo, got {:?}",
                self.pages.error_pages_repo
            )));
        }
        if self.redis.pool_size == 0 {
            return Err(Error::Config("redis.pool_size must be at least 1".to_string()));
        }
        if self.redis.max_connections < self.redis.pool_size {
            return Err(Error::Config(format!(
                "redis.max_connections ({}) must be >= redis.pool_size ({})",
                self.redis.max_connections, self.redis.pool_size
            )));
        }
        if self.traefik.root_key.trim().is_empty() {
            return Err(Error::Config("traefik.root_key must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Wrapper for loading config from file
pub struct Config;

impl Config {
    /// Load config from a specific path
    pub fn from_path(path: &Path) -> Result<BovineConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: BovineConfig = toml::from_str(&content).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }
}

/// Resolve config file path using the resolution order:
/// 1. Explicit path if provided
/// 2. BOVINE_CONFIG env var
/// 3. bovine.toml in current directory
/// 4. Walk up ancestors looking for bovine.toml
/// 5. ~/.config/bovine/config.toml (user default)
/// 6. /etc/bovine/config.toml (system default)
pub fn resolve_config(explicit_path: Option<&Path>) -> Result<BovineConfig> {
    let mut searched = Vec::new();

    // 1. Explicit path
    if let Some(path) = explicit_path {
        if path.exists() {
            return Config::from_path(path);
        }
        searched.push(path.to_path_buf());
    }

    // 2. BOVINE_CONFIG env var
    if let Ok(env_path) = std::env::var("BOVINE_CONFIG") {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Config::from_path(&path);
        }
        searched.push(path);
    }

    // 3 & 4. Current directory and ancestors
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = Some(cwd.as_path());
        while let Some(d) = dir {
            let config_path = d.join("bovine.toml");
            if config_path.exists() {
                return Config::from_path(&config_path);
            }
            searched.push(config_path);
            dir = d.parent();
        }
    }

    // 5. User default (~/.config/bovine/config.toml)
    if let Some(config_dir) = dirs::config_dir() {
        let user_config = config_dir.join("bovine").join("config.toml");
        if user_config.exists() {
            return Config::from_path(&user_config);
        }
        searched.push(user_config);
    }

    // 6. System default (/etc/bovine/config.toml)
    let system_config = PathBuf::from("/etc/bovine/config.toml");
    if system_config.exists() {
        return Config::from_path(&system_config);
    }
    searched.push(system_config);

    Err(Error::ConfigNotFound { searched })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn minimal_toml() -> &'static str {
        r#"
[pages]
domain = "pages.example.com"

[forge]
host = "https://codeberg.org"
"#
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: BovineConfig = toml::from_str(minimal_toml()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.pages.domain, "pages.example.com");
        assert!(config.pages.enable_custom_domains);
        assert_eq!(config.pages.cache_ttl, 300);
        assert_eq!(config.pages.custom_domain_cache_ttl, 600);
        assert_eq!(config.pages.max_redirects, 25);
        assert!(config.redis.host.is_empty());
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.redis.pool_size, 10);
        assert_eq!(config.redis.max_connections, 20);
        assert_eq!(config.redis.conn_wait_timeout, 5);
        assert!(config.traefik.router_enabled);
        assert_eq!(config.traefik.cert_resolver, "letsencrypt-http");
        assert_eq!(config.traefik.router_ttl, 0);
        assert_eq!(config.traefik.root_key, "traefik");
        assert_eq!(config.auth.cookie_duration, 3600);
        assert!(config.auth.secret_key.is_none());
        assert!(!config.dns.verify_custom_domains);
        assert!(config.server.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[pages]
domain = "pages.example.com"
error_pages_repo = "ops/error-pages"
enable_custom_domains = false
cache_ttl = 600
custom_domain_cache_ttl = 1200
max_redirects = 10

[forge]
host = "https://git.example.com"
token = "env:FORGE_TOKEN"

[redis]
host = "127.0.0.1"
port = 6380
password = "hunter2"
pool_size = 4
max_connections = 8
conn_wait_timeout = 2

[traefik]
router_enabled = false
cert_resolver = "letsencrypt-dns"
router_ttl = 3600
root_key = "proxy"

[auth]
cookie_duration = 7200
secret_key = "super-secret"

[dns]
verify_custom_domains = true

[server]
host = "127.0.0.1"
port = 3000
"#;
        let config: BovineConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.pages.error_pages_repo, "ops/error-pages");
        assert!(!config.pages.enable_custom_domains);
        assert_eq!(config.pages.cache_ttl, 600);
        assert_eq!(config.redis.host, "127.0.0.1");
        assert_eq!(config.redis.port, 6380);
        assert_eq!(config.redis.pool_size, 4);
        assert_eq!(config.traefik.cert_resolver, "letsencrypt-dns");
        assert_eq!(config.traefik.router_ttl, 3600);
        assert_eq!(config.traefik.root_key, "proxy");
        assert_eq!(config.auth.cookie_duration, 7200);
        assert!(config.dns.verify_custom_domains);

        let server = config.server.unwrap();
        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.port, 3000);
    }

    #[test]
    fn test_config_value_literal() {
        let val = ConfigValue::Literal("test".to_string());
        assert_eq!(val.resolve().unwrap(), "test");
    }

    #[test]
    fn test_config_value_env() {
        // SAFETY: This test runs in isolation and doesn't access the env var from other threads
        unsafe {
            std::env::set_var("TEST_BOVINE_VAR", "from_env");
        }
        let val = ConfigValue::Literal("env:TEST_BOVINE_VAR".to_string());
        assert_eq!(val.resolve().unwrap(), "from_env");
        unsafe {
            std::env::remove_var("TEST_BOVINE_VAR");
        }
    }

    #[test]
    fn test_config_value_env_missing() {
        let val = ConfigValue::Literal("env:NONEXISTENT_BOVINE_VAR_12345".to_string());
        assert!(val.resolve().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_domain() {
        let toml = r#"
[pages]
domain = ""

[forge]
host = "https://codeberg.org"
"#;
        let config: BovineConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_url_as_domain() {
        let toml = r#"
[pages]
domain = "https://pages.example.com"

[forge]
host = "https://codeberg.org"
"#;
        let config: BovineConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bare_forge_host() {
        let toml = r#"
[pages]
domain = "pages.example.com"

[forge]
host = "codeberg.org"
"#;
        let config: BovineConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_pool_larger_than_ceiling() {
        let toml = r#"
[pages]
domain = "pages.example.com"

[forge]
host = "https://codeberg.org"

[redis]
host = "127.0.0.1"
pool_size = 30
max_connections = 20
"#;
        let config: BovineConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_error_pages_repo() {
        let toml = r#"
[pages]
domain = "pages.example.com"
error_pages_repo = "not-a-repo"

[forge]
host = "https://codeberg.org"
"#;
        let config: BovineConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bovine.toml");
        std::fs::write(&config_path, minimal_toml()).unwrap();

        let config = Config::from_path(&config_path).unwrap();
        assert_eq!(config.pages.domain, "pages.example.com");
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "this is not valid toml {{{").unwrap();

        let result = Config::from_path(&config_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_missing_required_section() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("incomplete.toml");
        std::fs::write(
            &config_path,
            r#"
[pages]
domain = "pages.example.com"
# Missing [forge] section
"#,
        )
        .unwrap();

        let result = Config::from_path(&config_path);
        assert!(result.is_err());
    }
}
