//! In-flight request records and their protocol event payloads.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;

use lumen_cdp::CdpSession;

use crate::error::DiscoveryError;

/// CDP resource types, as spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    TextTrack,
    Xhr,
    Fetch,
    Prefetch,
    EventSource,
    WebSocket,
    Manifest,
    SignedExchange,
    Ping,
    CspViolationReport,
    Preflight,
    Other,
}

impl ResourceType {
    /// Parse a wire spelling; anything unrecognized maps to `Other` so a
    /// new browser release cannot fail event deserialization.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "Document" => ResourceType::Document,
            "Stylesheet" => ResourceType::Stylesheet,
            "Image" => ResourceType::Image,
            "Media" => ResourceType::Media,
            "Font" => ResourceType::Font,
            "Script" => ResourceType::Script,
            "TextTrack" => ResourceType::TextTrack,
            "XHR" => ResourceType::Xhr,
            "Fetch" => ResourceType::Fetch,
            "Prefetch" => ResourceType::Prefetch,
            "EventSource" => ResourceType::EventSource,
            "WebSocket" => ResourceType::WebSocket,
            "Manifest" => ResourceType::Manifest,
            "SignedExchange" => ResourceType::SignedExchange,
            "Ping" => ResourceType::Ping,
            "CSPViolationReport" => ResourceType::CspViolationReport,
            "Preflight" => ResourceType::Preflight,
            _ => ResourceType::Other,
        }
    }

    /// Resource types captured when JavaScript capture is off.
    pub fn is_captured_by_default(self) -> bool {
        matches!(
            self,
            ResourceType::Document
                | ResourceType::Stylesheet
                | ResourceType::Image
                | ResourceType::Media
                | ResourceType::Font
                | ResourceType::Other
        )
    }
}

impl<'de> Deserialize<'de> for ResourceType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(ResourceType::from_wire(&s))
    }
}

/// On-demand access to a response body.
///
/// The body is not buffered when the response arrives; the capture path is
/// the only consumer and fetches it exactly when needed.
#[async_trait]
pub trait ResponseBody: Send + Sync {
    async fn buffer(&self) -> Result<Vec<u8>, DiscoveryError>;
}

/// Production body source: `Network.getResponseBody` over the session,
/// decoded per the `base64Encoded` flag.
pub struct CdpResponseBody {
    session: Arc<dyn CdpSession>,
    request_id: String,
}

impl CdpResponseBody {
    pub fn new(session: Arc<dyn CdpSession>, request_id: String) -> Self {
        Self {
            session,
            request_id,
        }
    }
}

#[async_trait]
impl ResponseBody for CdpResponseBody {
    async fn buffer(&self) -> Result<Vec<u8>, DiscoveryError> {
        let result = self
            .session
            .send(
                "Network.getResponseBody",
                serde_json::json!({ "requestId": self.request_id }),
            )
            .await?;

        let body = result.get("body").and_then(|b| b.as_str()).unwrap_or("");
        let encoded = result
            .get("base64Encoded")
            .and_then(|b| b.as_bool())
            .unwrap_or(false);

        if encoded {
            B64.decode(body).map_err(|e| DiscoveryError::Capture {
                detail: format!("invalid base64 response body: {e}"),
            })
        } else {
            Ok(body.as_bytes().to_vec())
        }
    }
}

/// The response attached to a request record once `Network.responseReceived`
/// has been processed.
#[derive(Clone)]
pub struct ResponseInfo {
    pub status: u16,
    pub mime_type: String,
    pub headers: HashMap<String, String>,
    pub body: Arc<dyn ResponseBody>,
}

impl fmt::Debug for ResponseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseInfo")
            .field("status", &self.status)
            .field("mime_type", &self.mime_type)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// One in-flight request, keyed by its Network-domain request id.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub request_id: String,
    /// Fetch-domain id; absent for the service-worker flow.
    pub intercept_id: Option<String>,
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub resource_type: ResourceType,
    /// Prior hops of the same logical navigation, earliest first. Each
    /// entry's URL is the one that redirected to the next; the current
    /// record's URL is the final hop.
    pub redirect_chain: Vec<RequestRecord>,
    pub response: Option<ResponseInfo>,
}

impl RequestRecord {
    /// The URL the navigation originally targeted: the first hop of the
    /// redirect chain, or this record's URL if there were no redirects.
    pub fn origin_url(&self) -> &str {
        self.redirect_chain
            .first()
            .map(|r| r.url.as_str())
            .unwrap_or(&self.url)
    }
}

// ---------------------------------------------------------------------------
// Subscribed event payloads
// ---------------------------------------------------------------------------

/// Request metadata shared by `requestWillBeSent` and `requestPaused`.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestPayload {
    pub url: String,
    pub method: String,
    #[serde(default, deserialize_with = "stringly_map")]
    pub headers: HashMap<String, String>,
}

/// `Network.requestWillBeSent`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSentEvent {
    pub request_id: String,
    pub request: RequestPayload,
    /// CDP calls this field `type`.
    #[serde(rename = "type", default)]
    pub resource_type: Option<ResourceType>,
}

/// `Fetch.requestPaused`. Note the id swap: this event's `requestId` is the
/// Fetch-domain intercept id, and `networkId` is the Network-domain
/// request id the rest of the lifecycle is keyed by.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPausedEvent {
    pub request_id: String,
    #[serde(default)]
    pub network_id: Option<String>,
    pub request: RequestPayload,
    pub resource_type: ResourceType,
}

/// `Fetch.authRequired`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequiredEvent {
    pub request_id: String,
}

/// The response object inside `Network.responseReceived`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub status: u16,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, deserialize_with = "stringly_map")]
    pub headers: HashMap<String, String>,
}

/// `Network.responseReceived`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceivedEvent {
    pub request_id: String,
    pub response: ResponsePayload,
}

/// `Network.eventSourceMessageReceived`, `Network.loadingFinished`, and the
/// id-only part of `Network.loadingFailed`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestIdEvent {
    pub request_id: String,
}

/// `Network.loadingFailed`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailedEvent {
    pub request_id: String,
    #[serde(default)]
    pub error_text: String,
}

/// CDP header maps may carry non-string values; coerce everything to
/// strings so downstream code never has to care.
fn stringly_map<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: HashMap<String, Value> = HashMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}
