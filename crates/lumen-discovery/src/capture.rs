//! Response capture: turning qualifying network responses into cached
//! resources.
//!
//! Runs on loading-finished for every request the registry still knows
//! about. A response must pass the filter chain (hostname allowlist,
//! non-empty body, size cap, allowed status, resource type) before it is
//! assembled into a [`Resource`](crate::intercept::Resource) and handed to
//! the external cache. Failures here are logged and swallowed; a capture
//! that goes wrong never fails the page.

use async_trait::async_trait;
use url::Url;

use crate::config::Credentials;
use crate::error::DiscoveryError;
use crate::intercept::{create_resource, hostname_matches, normalize_url, InterceptConfig};
use crate::request::RequestRecord;

/// Largest body we will copy into the cache: 25 MiB.
pub const MAX_RESOURCE_SIZE: usize = 25 * 1024 * 1024;

/// Statuses worth replaying.
pub const ALLOWED_STATUSES: [u16; 7] = [200, 201, 301, 302, 304, 307, 308];

/// Direct HTTP fetch, bypassing the browser.
///
/// Used for font bodies, which browsers may decode or transcode in ways
/// that corrupt the on-wire bytes needed for faithful replay.
#[async_trait]
pub trait BodyFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        authorization: Option<&Credentials>,
    ) -> Result<Vec<u8>, DiscoveryError>;
}

/// Production fetcher backed by a reqwest client.
pub struct HttpBodyFetcher {
    client: reqwest::Client,
}

impl HttpBodyFetcher {
    pub fn new() -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| DiscoveryError::Capture {
                detail: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BodyFetcher for HttpBodyFetcher {
    async fn fetch(
        &self,
        url: &str,
        authorization: Option<&Credentials>,
    ) -> Result<Vec<u8>, DiscoveryError> {
        let mut request = self.client.get(url);
        if let Some(credentials) = authorization {
            request = request.basic_auth(&credentials.username, Some(&credentials.password));
        }
        let response = request.send().await.map_err(|e| DiscoveryError::Capture {
            detail: format!("direct fetch failed: {e}"),
        })?;
        let bytes = response.bytes().await.map_err(|e| DiscoveryError::Capture {
            detail: format!("direct fetch body read failed: {e}"),
        })?;
        Ok(bytes.to_vec())
    }
}

/// Capture the response attached to `record` into the external cache, if it
/// qualifies. Every skip and failure is a debug log, never an error.
pub(crate) async fn save_response_resource(
    intercept: &InterceptConfig,
    record: &RequestRecord,
    authorization: Option<&Credentials>,
    fetcher: &dyn BodyFetcher,
    meta: Option<&str>,
) {
    let url = normalize_url(&record.url);
    let meta = meta.unwrap_or_default();
    tracing::debug!(url = %url, meta, "processing response");

    if let Some(cached) = intercept.cache.get_resource(&url) {
        if cached.root || cached.provided || intercept.disable_cache {
            tracing::debug!(url = %url, meta, "skipping already cached resource");
            return;
        }
    }

    let Some(response) = record.response.as_ref() else {
        tracing::debug!(url = %url, meta, "skipping no response");
        return;
    };

    if !hostname_matches(&intercept.allowed_hostnames, &record.url) {
        tracing::debug!(url = %url, meta, "skipping remote resource");
        return;
    }

    let mut body = match response.body.buffer().await {
        Ok(body) => body,
        Err(error) => {
            tracing::debug!(url = %url, meta, error = %error, "error fetching response body");
            return;
        }
    };

    if body.is_empty() {
        tracing::debug!(url = %url, meta, "skipping empty response");
        return;
    }
    if body.len() > MAX_RESOURCE_SIZE {
        tracing::debug!(url = %url, meta, "skipping resource larger than 25MB");
        return;
    }
    if !ALLOWED_STATUSES.contains(&response.status) {
        tracing::debug!(url = %url, meta, status = response.status, "skipping disallowed status");
        return;
    }
    if !intercept.enable_javascript && !record.resource_type.is_captured_by_default() {
        tracing::debug!(
            url = %url,
            meta,
            resource_type = ?record.resource_type,
            "skipping disallowed resource type"
        );
        return;
    }

    let inferred = mime_from_path(&record.url);
    let mut mimetype = response.mime_type.clone();
    if mimetype == "text/plain" {
        if let Some(ref m) = inferred {
            mimetype = m.clone();
        }
    }

    if mimetype.contains("font") || inferred.as_deref().is_some_and(|m| m.contains("font")) {
        match fetcher.fetch(&record.url, authorization).await {
            Ok(bytes) => body = bytes,
            Err(error) => {
                tracing::debug!(url = %url, meta, error = %error, "direct font fetch failed");
                return;
            }
        }
    }

    tracing::debug!(url = %url, meta, mimetype = %mimetype, "making local copy of response");
    let resource = create_resource(url, body, mimetype, response.status, &response.headers);
    intercept.cache.save_resource(resource);
}

/// Infer a MIME type from the URL's path extension, query stripped.
pub(crate) fn mime_from_path(url: &str) -> Option<String> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    let ext = path.rsplit('/').next()?.rsplit_once('.')?.1.to_ascii_lowercase();

    let mime = match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => return None,
    };
    Some(mime.to_string())
}
