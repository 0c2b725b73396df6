//! `.pages` manifest parsing.
//!
//! The manifest grammar is a deliberately restricted YAML dialect:
//! top-level `key: value` scalars with optional single/double quotes, and
//! one list key (`enable_branches`) in inline `[a, b]` or block `- item`
//! form. Operator-authored, schema-frozen files do not justify a general
//! YAML engine. Unknown keys are ignored.

/// Parsed `.pages` manifest. The manifest is the single source of truth
/// for a repository's pages configuration; bovine never modifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagesManifest {
    /// Opt-out switch; a present manifest defaults to enabled.
    pub enabled: bool,
    /// Custom hostname to activate for this repository.
    pub custom_domain: Option<String>,
    /// Hex-encoded SHA-256 of the main-site password.
    pub password: Option<String>,
    /// Gates branch subdomains; independent of `password`.
    pub branches_password: Option<String>,
    /// Auto-generate directory listings when an index is absent.
    pub directory_index: bool,
    /// Branch names exposed as subdomains of the custom domain, in order.
    pub enable_branches: Vec<String>,
}

impl Default for PagesManifest {
    fn default() -> Self {
        Self {
            enabled: true,
            custom_domain: None,
            password: None,
            branches_password: None,
            directory_index: false,
            enable_branches: Vec::new(),
        }
    }
}

/// `true`/`yes` are truthy; anything else is not.
fn truthy(value: &str) -> bool {
    value == "true" || value == "yes"
}

/// Strip one matching pair of single or double quotes.
fn unquote(value: &str) -> &str {
    let value = value.trim();
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
        {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn parse_inline_list(value: &str) -> Vec<String> {
    let inner = value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']');
    inner
        .split(',')
        .map(|item| unquote(item.trim()).to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

impl PagesManifest {
    /// Parse manifest text. Forgiving: malformed lines are skipped, never
    /// fatal, so a typo cannot take a site down.
    pub fn parse(text: &str) -> Self {
        let mut manifest = Self::default();
        let mut in_branches_block = false;

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if in_branches_block {
                if let Some(item) = line.strip_prefix("- ").or_else(|| line.strip_prefix('-')) {
                    let item = unquote(item.trim());
                    if !item.is_empty() {
                        manifest.enable_branches.push(item.to_string());
                    }
                    continue;
                }
                in_branches_block = false;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "enabled" => manifest.enabled = truthy(unquote(value)),
                "custom_domain" => {
                    let domain = unquote(value);
                    if !domain.is_empty() {
                        manifest.custom_domain = Some(domain.to_lowercase());
                    }
                }
                "password" => {
                    let hash = unquote(value);
                    if !hash.is_empty() {
                        manifest.password = Some(hash.to_lowercase());
                    }
                }
                "branches_password" => {
                    let hash = unquote(value);
                    if !hash.is_empty() {
                        manifest.branches_password = Some(hash.to_lowercase());
                    }
                }
                "directory_index" => manifest.directory_index = truthy(unquote(value)),
                "enable_branches" => {
                    if value.is_empty() {
                        in_branches_block = true;
                    } else if value.starts_with('[') {
                        manifest.enable_branches = parse_inline_list(value);
                    }
                }
                _ => {} // unknown keys ignored
            }
        }

        manifest
    }
}
