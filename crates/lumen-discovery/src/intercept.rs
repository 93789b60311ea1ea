//! The external resource cache interface and interception policy inputs.
//!
//! The cache itself lives outside this crate; the engine only consults and
//! feeds it. [`ResourceCache`] implementations must be thread-safe and
//! `save_resource` must be idempotent -- multiple captures of the same URL
//! can race.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// A reusable asset: either served into the page from the cache or captured
/// out of the page's network traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub url: String,
    pub content: Vec<u8>,
    pub mimetype: String,
    /// Hex SHA-256 of `content`.
    pub sha: String,
    pub status: Option<u16>,
    /// Response headers; folded values are kept as lists.
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    /// The top-level document being rendered. Always served from cache.
    #[serde(default)]
    pub root: bool,
    /// Injected by an external source rather than discovered from the page.
    /// Served from cache even when caching-through is disabled.
    #[serde(default)]
    pub provided: bool,
}

/// Assemble a resource from captured response data.
///
/// CDP reports folded headers joined by `\n`; each value is split back into
/// a list for downstream consumers.
pub fn create_resource(
    url: impl Into<String>,
    content: Vec<u8>,
    mimetype: impl Into<String>,
    status: u16,
    headers: &HashMap<String, String>,
) -> Resource {
    let sha = format!("{:x}", Sha256::digest(&content));
    let headers = headers
        .iter()
        .map(|(name, value)| {
            let values = value.split('\n').map(str::to_string).collect();
            (name.clone(), values)
        })
        .collect();

    Resource {
        url: url.into(),
        content,
        mimetype: mimetype.into(),
        sha,
        status: Some(status),
        headers,
        root: false,
        provided: false,
    }
}

/// The externally-owned resource store.
pub trait ResourceCache: Send + Sync {
    /// Look up a resource by normalized URL.
    fn get_resource(&self, url: &str) -> Option<Resource>;

    /// Persist a captured resource. Must be idempotent and thread-safe;
    /// capturers for different requests run concurrently.
    fn save_resource(&self, resource: Resource);
}

/// Interception policy: the cache plus the hostname and capture rules that
/// drive the fulfill/continue/fail decision.
#[derive(Clone)]
pub struct InterceptConfig {
    pub cache: Arc<dyn ResourceCache>,
    /// Hostname globs whose responses are captured.
    pub allowed_hostnames: Vec<String>,
    /// Hostname globs whose uncached requests are failed outright.
    pub disallowed_hostnames: Vec<String>,
    /// When true, only root and provided resources are served from cache.
    pub disable_cache: bool,
    /// When true, script/XHR-class responses are captured too.
    pub enable_javascript: bool,
}

impl InterceptConfig {
    pub fn new(cache: Arc<dyn ResourceCache>) -> Self {
        Self {
            cache,
            allowed_hostnames: Vec::new(),
            disallowed_hostnames: Vec::new(),
            disable_cache: false,
            enable_javascript: false,
        }
    }
}

impl std::fmt::Debug for InterceptConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptConfig")
            .field("allowed_hostnames", &self.allowed_hostnames)
            .field("disallowed_hostnames", &self.disallowed_hostnames)
            .field("disable_cache", &self.disable_cache)
            .field("enable_javascript", &self.enable_javascript)
            .finish_non_exhaustive()
    }
}

/// Whether the URL's hostname matches any of the glob patterns.
///
/// Patterns use `*` as a wildcard (`ads.*`, `*.cdn.example.com`); matching
/// is case-insensitive and anchored to the whole hostname.
pub fn hostname_matches(patterns: &[String], url: &str) -> bool {
    let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) else {
        return false;
    };
    patterns.iter().any(|pattern| glob_match(pattern, &host))
}

fn glob_match(pattern: &str, host: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push_str("(?i)^");
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex.push('$');
    regex::Regex::new(&regex)
        .map(|re| re.is_match(host))
        .unwrap_or(false)
}

/// Normalize a URL for cache keying: drop the fragment (and any default
/// port, which the parser already elides). Unparseable URLs are keyed
/// verbatim.
pub fn normalize_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}
