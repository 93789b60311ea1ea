//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde_json::{json, Value};

use lumen_cdp::{CdpError, CdpEvent, CdpSession};
use lumen_discovery::{
    BodyFetcher, Credentials, DiscoveryError, InterceptConfig, NetworkWatcher, Resource,
    ResourceCache, WatchOptions,
};

// ---------------------------------------------------------------------------
// MockSession
// ---------------------------------------------------------------------------

enum Scripted {
    Ok(Value),
    BrowserError(String),
}

/// A scripted protocol session: records every outbound command and serves
/// canned results per method.
pub struct MockSession {
    sent: Mutex<Vec<(String, Value)>>,
    scripted: Mutex<HashMap<String, VecDeque<Scripted>>>,
    delays: Mutex<HashMap<String, Duration>>,
    closed: Mutex<Option<String>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            scripted: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            closed: Mutex::new(None),
        }
    }

    /// Queue a successful result for the next call of `method`.
    pub fn script_ok(&self, method: &str, value: Value) {
        self.scripted
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Scripted::Ok(value));
    }

    /// Queue a browser-reported error for the next call of `method`.
    pub fn script_err(&self, method: &str, message: &str) {
        self.scripted
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(Scripted::BrowserError(message.to_string()));
    }

    /// Delay every call of `method` before it resolves.
    pub fn script_delay(&self, method: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(method.to_string(), delay);
    }

    /// Script the `Network.getResponseBody` result.
    pub fn script_response_body(&self, body: &[u8], base64: bool) {
        let result = if base64 {
            json!({ "body": B64.encode(body), "base64Encoded": true })
        } else {
            json!({
                "body": String::from_utf8_lossy(body).into_owned(),
                "base64Encoded": false
            })
        };
        self.script_ok("Network.getResponseBody", result);
    }

    /// Mark the session closed with a reason.
    pub fn close(&self, reason: &str) {
        *self.closed.lock().unwrap() = Some(reason.to_string());
    }

    /// Every outbound command, in send order.
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }

    /// Params of every call of `method`.
    pub fn calls_of(&self, method: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params)
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls_of(method).len()
    }
}

#[async_trait]
impl CdpSession for MockSession {
    async fn send(&self, method: &str, params: Value) -> Result<Value, CdpError> {
        let delay = self.delays.lock().unwrap().get(method).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.sent
            .lock()
            .unwrap()
            .push((method.to_string(), params));

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(|queue| queue.pop_front());
        match scripted {
            Some(Scripted::Ok(value)) => Ok(value),
            Some(Scripted::BrowserError(message)) => Err(CdpError::Browser {
                code: -32602,
                message,
                data: None,
            }),
            None => match method {
                "Browser.getVersion" => Ok(json!({
                    "product": "Chrome/120.0",
                    "userAgent": "Mozilla/5.0 HeadlessTest/1.0"
                })),
                _ => Ok(json!({})),
            },
        }
    }

    fn closed_reason(&self) -> Option<String> {
        self.closed.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// MockCache
// ---------------------------------------------------------------------------

/// In-memory resource cache recording every save.
#[derive(Default)]
pub struct MockCache {
    resources: Mutex<HashMap<String, Resource>>,
    saved: Mutex<Vec<Resource>>,
}

impl MockCache {
    pub fn insert(&self, resource: Resource) {
        self.resources
            .lock()
            .unwrap()
            .insert(resource.url.clone(), resource);
    }

    pub fn saved(&self) -> Vec<Resource> {
        self.saved.lock().unwrap().clone()
    }
}

impl ResourceCache for MockCache {
    fn get_resource(&self, url: &str) -> Option<Resource> {
        self.resources.lock().unwrap().get(url).cloned()
    }

    fn save_resource(&self, resource: Resource) {
        self.saved.lock().unwrap().push(resource.clone());
        self.insert(resource);
    }
}

/// A cached resource with the given flags.
pub fn cached_resource(url: &str, content: &[u8], root: bool, provided: bool) -> Resource {
    let mut headers = HashMap::new();
    headers.insert("content-type".to_string(), vec!["text/html".to_string()]);
    Resource {
        url: url.to_string(),
        content: content.to_vec(),
        mimetype: "text/html".to_string(),
        sha: String::new(),
        status: Some(200),
        headers,
        root,
        provided,
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Direct-fetch stub returning fixed bytes and recording calls.
pub struct MockFetcher {
    pub body: Vec<u8>,
    pub calls: Mutex<Vec<(String, Option<(String, String)>)>>,
}

impl MockFetcher {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fetched(&self) -> Vec<(String, Option<(String, String)>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BodyFetcher for MockFetcher {
    async fn fetch(
        &self,
        url: &str,
        authorization: Option<&Credentials>,
    ) -> Result<Vec<u8>, DiscoveryError> {
        self.calls.lock().unwrap().push((
            url.to_string(),
            authorization.map(|c| (c.username.clone(), c.password.clone())),
        ));
        Ok(self.body.clone())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub session: Arc<MockSession>,
    pub cache: Arc<MockCache>,
    pub fetcher: Arc<MockFetcher>,
    pub watcher: NetworkWatcher,
}

/// Build a watcher over mock collaborators. The default options intercept
/// with an empty policy; `configure` adjusts them before watch.
pub async fn watch_page(configure: impl FnOnce(&mut WatchOptions)) -> Harness {
    let session = Arc::new(MockSession::new());
    let cache = Arc::new(MockCache::default());
    let fetcher = Arc::new(MockFetcher::new(b"direct-fetch-bytes".to_vec()));

    let mut options = WatchOptions {
        intercept: Some(InterceptConfig::new(cache.clone())),
        ..Default::default()
    };
    configure(&mut options);

    let watcher = NetworkWatcher::watch_with_fetcher(
        session.clone(),
        options,
        fetcher.clone(),
    )
    .await
    .expect("watch setup should succeed");

    Harness {
        session,
        cache,
        fetcher,
        watcher,
    }
}

/// Dispatch events in order, awaiting each handler before the next.
pub async fn drive(watcher: &NetworkWatcher, events: Vec<CdpEvent>) {
    for event in events {
        watcher
            .dispatch(event)
            .await
            .expect("event handler task should not panic");
    }
}

// ---------------------------------------------------------------------------
// Event constructors
// ---------------------------------------------------------------------------

pub fn request_will_be_sent(request_id: &str, url: &str, resource_type: &str) -> CdpEvent {
    CdpEvent::new(
        "Network.requestWillBeSent",
        json!({
            "requestId": request_id,
            "loaderId": "L1",
            "request": { "url": url, "method": "GET", "headers": {} },
            "type": resource_type
        }),
    )
}

pub fn request_paused(
    network_id: &str,
    intercept_id: &str,
    url: &str,
    resource_type: &str,
) -> CdpEvent {
    CdpEvent::new(
        "Fetch.requestPaused",
        json!({
            "requestId": intercept_id,
            "networkId": network_id,
            "frameId": "F1",
            "request": { "url": url, "method": "GET", "headers": {} },
            "resourceType": resource_type
        }),
    )
}

pub fn auth_required(intercept_id: &str) -> CdpEvent {
    CdpEvent::new(
        "Fetch.authRequired",
        json!({
            "requestId": intercept_id,
            "frameId": "F1",
            "authChallenge": { "source": "Server", "origin": "https://ex.test", "scheme": "basic", "realm": "r" }
        }),
    )
}

pub fn response_received(request_id: &str, status: u16, mime_type: &str) -> CdpEvent {
    CdpEvent::new(
        "Network.responseReceived",
        json!({
            "requestId": request_id,
            "type": "Document",
            "response": {
                "status": status,
                "mimeType": mime_type,
                "headers": { "content-type": mime_type }
            }
        }),
    )
}

pub fn loading_finished(request_id: &str) -> CdpEvent {
    CdpEvent::new(
        "Network.loadingFinished",
        json!({ "requestId": request_id, "encodedDataLength": 0 }),
    )
}

pub fn loading_failed(request_id: &str, error_text: &str) -> CdpEvent {
    CdpEvent::new(
        "Network.loadingFailed",
        json!({
            "requestId": request_id,
            "type": "Fetch",
            "errorText": error_text,
            "canceled": false
        }),
    )
}

pub fn event_source_message(request_id: &str) -> CdpEvent {
    CdpEvent::new(
        "Network.eventSourceMessageReceived",
        json!({
            "requestId": request_id,
            "eventName": "message",
            "eventId": "1",
            "data": "ping"
        }),
    )
}
