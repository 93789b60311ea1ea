//! The network watcher: event demultiplexer, interception decider, and the
//! outbound send guard.
//!
//! [`NetworkWatcher::watch`] enables the `Network` domain (and `Fetch` when
//! intercepting) on a page session, then consumes the session's event
//! stream. Each inbound event is handled on its own task; ordering between
//! events for the same request is enforced by the per-request lifecycle
//! latches, so a `Fetch.requestPaused` arriving before its
//! `Network.requestWillBeSent` simply parks until the registry is ready.
//!
//! Handler errors are logged and never propagated -- a malformed event must
//! not halt the page. Only `watch` setup and the idle waiter return errors
//! to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use lumen_cdp::{CdpError, CdpEvent, CdpSession};

use crate::capture::{self, BodyFetcher, HttpBodyFetcher};
use crate::config::WatchOptions;
use crate::error::DiscoveryError;
use crate::intercept::{hostname_matches, normalize_url, InterceptConfig, Resource};
use crate::latch::LifecycleLatches;
use crate::registry::Registry;
use crate::request::{
    AuthRequiredEvent, CdpResponseBody, LoadingFailedEvent, RequestIdEvent, RequestPausedEvent,
    RequestRecord, RequestWillBeSentEvent, ResourceType, ResponseBody, ResponseInfo,
    ResponseReceivedEvent,
};

/// Observes every network request a page issues, serves cached resources
/// into it, captures reusable responses out of it, and reports when the
/// page reaches network idle.
pub struct NetworkWatcher {
    pub(crate) inner: Arc<WatcherInner>,
    dispatch_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct WatcherInner {
    pub(crate) session: Arc<dyn CdpSession>,
    pub(crate) registry: Registry,
    latches: LifecycleLatches,
    pub(crate) options: WatchOptions,
    fetcher: Arc<dyn BodyFetcher>,
}

/// A request awaiting an interception decision, assembled either from a
/// `Fetch.requestPaused` event or (in the service-worker flow) from
/// `Network.requestWillBeSent` directly.
struct PausedRequest {
    request_id: String,
    intercept_id: Option<String>,
    url: String,
    method: String,
    headers: HashMap<String, String>,
    resource_type: ResourceType,
}

impl NetworkWatcher {
    /// Attach to a page session: enable the protocol domains, apply the
    /// configured overrides, and return the watcher.
    ///
    /// Event dispatch starts when the caller hands the session's event
    /// stream to [`run`](Self::run) (or feeds events through
    /// [`dispatch`](Self::dispatch)).
    pub async fn watch(
        session: Arc<dyn CdpSession>,
        options: WatchOptions,
    ) -> Result<Self, DiscoveryError> {
        let fetcher: Arc<dyn BodyFetcher> = Arc::new(HttpBodyFetcher::new()?);
        Self::watch_with_fetcher(session, options, fetcher).await
    }

    /// Like [`watch`](Self::watch) with an explicit direct-fetch client.
    pub async fn watch_with_fetcher(
        session: Arc<dyn CdpSession>,
        options: WatchOptions,
        fetcher: Arc<dyn BodyFetcher>,
    ) -> Result<Self, DiscoveryError> {
        let inner = Arc::new(WatcherInner {
            session,
            registry: Registry::new(),
            latches: LifecycleLatches::default(),
            options,
            fetcher,
        });
        inner.setup().await?;
        Ok(Self {
            inner,
            dispatch_handle: std::sync::Mutex::new(None),
        })
    }

    /// Drive dispatch from an event channel until it closes.
    pub fn run(&self, mut events: mpsc::UnboundedReceiver<CdpEvent>) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                WatcherInner::dispatch(Arc::clone(&inner), event);
            }
            tracing::debug!("event stream ended");
        });
        let mut slot = self
            .dispatch_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the dispatch loop started by [`run`](Self::run).
    pub fn stop(&self) {
        let handle = self
            .dispatch_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Handle one inbound protocol event on its own task.
    pub fn dispatch(&self, event: CdpEvent) -> JoinHandle<()> {
        WatcherInner::dispatch(Arc::clone(&self.inner), event)
    }

    /// Snapshot of the requests currently in flight.
    pub fn in_flight_requests(&self) -> Vec<RequestRecord> {
        self.inner.registry.in_flight(|_| true)
    }

    /// Whether the browser reported `net::ERR_ABORTED` for this request id.
    pub fn is_aborted(&self, request_id: &str) -> bool {
        self.inner.registry.is_aborted(request_id)
    }
}

impl WatcherInner {
    fn intercepting(&self) -> bool {
        self.options.intercept.is_some()
    }

    /// Enable domains and apply configured overrides, in the order the
    /// browser expects them.
    async fn setup(&self) -> Result<(), DiscoveryError> {
        self.session.send("Network.enable", json!({})).await?;

        let bypass = !self.options.capture_mocked_service_worker;
        self.session
            .send("Network.setBypassServiceWorker", json!({ "bypass": bypass }))
            .await?;
        self.session
            .send("Network.setCacheDisabled", json!({ "cacheDisabled": true }))
            .await?;

        let user_agent = match &self.options.user_agent {
            Some(ua) => ua.clone(),
            None => self.default_user_agent().await?,
        };
        self.session
            .send(
                "Network.setUserAgentOverride",
                json!({ "userAgent": user_agent }),
            )
            .await?;
        self.session
            .send(
                "Network.setExtraHTTPHeaders",
                json!({ "headers": self.options.request_headers }),
            )
            .await?;

        if self.intercepting() && self.session.is_document() {
            self.session
                .send(
                    "Fetch.enable",
                    json!({
                        "handleAuthRequests": true,
                        "patterns": [{ "urlPattern": "*" }],
                    }),
                )
                .await?;
        }
        Ok(())
    }

    /// The browser's reported user agent with the "Headless" marker removed.
    async fn default_user_agent(&self) -> Result<String, DiscoveryError> {
        let version = self.session.send("Browser.getVersion", json!({})).await?;
        let user_agent = version
            .get("userAgent")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        Ok(user_agent.replace("Headless", ""))
    }

    fn dispatch(self: Arc<Self>, event: CdpEvent) -> JoinHandle<()> {
        tokio::spawn(async move {
            let method = event.method.clone();
            if let Err(error) = self.route(event).await {
                tracing::debug!(method = %method, error = %error, "event handler error");
            }
        })
    }

    async fn route(&self, event: CdpEvent) -> Result<(), DiscoveryError> {
        match event.method.as_str() {
            "Network.requestWillBeSent" => {
                self.handle_request_will_be_sent(parse(event.params)?).await
            }
            "Fetch.requestPaused" => self.handle_request_paused(parse(event.params)?).await,
            "Fetch.authRequired" => self.handle_auth_required(parse(event.params)?).await,
            "Network.responseReceived" => self.handle_response_received(parse(event.params)?).await,
            "Network.eventSourceMessageReceived" => {
                self.handle_event_source_message(parse(event.params)?).await
            }
            "Network.loadingFinished" => self.handle_loading_finished(parse(event.params)?).await,
            "Network.loadingFailed" => self.handle_loading_failed(parse(event.params)?).await,
            _ => Ok(()),
        }
    }

    async fn handle_request_will_be_sent(
        &self,
        event: RequestWillBeSentEvent,
    ) -> Result<(), DiscoveryError> {
        // data URLs never hit the network
        if event.request.url.starts_with("data:") {
            return Ok(());
        }

        let request_id = event.request_id.clone();
        if self.intercepting() {
            self.registry.set_pending(request_id.clone(), event.clone());
            if self.options.capture_mocked_service_worker {
                // requests a service worker synthesizes never pause; decide
                // here, with no outbound Fetch commands
                let paused = PausedRequest {
                    request_id: request_id.clone(),
                    intercept_id: None,
                    url: event.request.url.clone(),
                    method: event.request.method.clone(),
                    headers: event.request.headers.clone(),
                    resource_type: event.resource_type.unwrap_or(ResourceType::Other),
                };
                self.handle_request(paused, true).await?;
            }
        }

        self.latches
            .for_request(&request_id)
            .request_will_be_sent
            .set();
        Ok(())
    }

    async fn handle_request_paused(&self, event: RequestPausedEvent) -> Result<(), DiscoveryError> {
        if !self.intercepting() || !self.session.is_document() {
            return Ok(());
        }
        // id swap: the pause event's requestId is the Fetch-domain
        // intercept id; networkId keys the rest of the lifecycle
        let intercept_id = event.request_id;
        let Some(request_id) = event.network_id else {
            tracing::debug!(
                intercept_id = %intercept_id,
                url = %event.request.url,
                "paused request without a network id, dropping"
            );
            return Ok(());
        };

        self.latches
            .for_request(&request_id)
            .request_will_be_sent
            .wait()
            .await;

        let Some(sent) = self.registry.take_pending(&request_id) else {
            return Ok(());
        };

        // a same-id redirect leaves a pending entry whose URL or method no
        // longer matches; the browser pauses the post-redirect request
        // again with fresh metadata, so this pause is dropped
        if sent.request.url != event.request.url || sent.request.method != event.request.method {
            tracing::debug!(
                request_id = %request_id,
                url = %event.request.url,
                "paused request does not match pending request, dropping"
            );
            return Ok(());
        }

        let paused = PausedRequest {
            request_id,
            intercept_id: Some(intercept_id),
            url: event.request.url,
            method: event.request.method,
            headers: event.request.headers,
            resource_type: event.resource_type,
        };
        self.handle_request(paused, false).await
    }

    async fn handle_auth_required(&self, event: AuthRequiredEvent) -> Result<(), DiscoveryError> {
        let intercept_id = event.request_id;
        let credentials = self.options.authorization.as_ref();

        // a second challenge for the same id means the credentials we
        // offered were rejected
        let response = if self.registry.auth_attempted(&intercept_id) {
            "CancelAuth"
        } else if credentials.is_some() {
            self.registry.mark_auth_attempted(&intercept_id);
            "ProvideCredentials"
        } else {
            "Default"
        };

        let mut challenge = json!({ "response": response });
        if let Some(credentials) = credentials {
            challenge["username"] = Value::String(credentials.username.clone());
            challenge["password"] = Value::String(credentials.password.clone());
        }

        let params = json!({
            "requestId": intercept_id.clone(),
            "authChallengeResponse": challenge,
        });
        self.send_guarded(&intercept_id, "Fetch.continueWithAuth", params)
            .await?;
        Ok(())
    }

    async fn handle_response_received(
        &self,
        event: ResponseReceivedEvent,
    ) -> Result<(), DiscoveryError> {
        let latches = self.latches.for_request(&event.request_id);
        latches.request_will_be_sent.wait().await;

        let body: Arc<dyn ResponseBody> = Arc::new(CdpResponseBody::new(
            Arc::clone(&self.session),
            event.request_id.clone(),
        ));
        let attached = self.registry.update(&event.request_id, |record| {
            record.response = Some(ResponseInfo {
                status: event.response.status,
                mime_type: event.response.mime_type.clone(),
                headers: event.response.headers.clone(),
                body: Arc::clone(&body),
            });
        });
        if attached.is_none() {
            // lost the race with forget
            return Ok(());
        }

        latches.response_received.set();
        Ok(())
    }

    async fn handle_event_source_message(
        &self,
        event: RequestIdEvent,
    ) -> Result<(), DiscoveryError> {
        self.latches
            .for_request(&event.request_id)
            .request_will_be_sent
            .wait()
            .await;

        // event streams never finish; forget them or idle is unreachable
        if let Some(record) = self.registry.forget(&event.request_id, false) {
            tracing::debug!(
                request_id = %event.request_id,
                url = %record.url,
                "dropping event stream request"
            );
        }
        Ok(())
    }

    async fn handle_loading_finished(&self, event: RequestIdEvent) -> Result<(), DiscoveryError> {
        self.latches
            .for_request(&event.request_id)
            .response_received
            .wait()
            .await;

        let Some(record) = self.registry.get(&event.request_id) else {
            return Ok(());
        };

        if let Some(intercept) = &self.options.intercept {
            capture::save_response_resource(
                intercept,
                &record,
                self.options.authorization.as_ref(),
                self.fetcher.as_ref(),
                self.options.meta.as_deref(),
            )
            .await;
        }
        self.registry.forget(&event.request_id, false);
        Ok(())
    }

    async fn handle_loading_failed(&self, event: LoadingFailedEvent) -> Result<(), DiscoveryError> {
        self.latches
            .for_request(&event.request_id)
            .request_will_be_sent
            .wait()
            .await;

        let url = self
            .registry
            .get(&event.request_id)
            .map(|r| r.url)
            .unwrap_or_default();

        if event.error_text == "net::ERR_ABORTED" {
            self.registry.mark_aborted(&event.request_id);
            tracing::debug!(request_id = %event.request_id, url = %url, "request aborted");
        } else if event.error_text != "net::ERR_FAILED" {
            // the generic failure usually trails a more specific log line
            tracing::debug!(
                request_id = %event.request_id,
                url = %url,
                error = %event.error_text,
                "request failed"
            );
        }
        self.registry.forget(&event.request_id, false);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Interception decider
    // -----------------------------------------------------------------------

    /// Install the record for a paused request and issue its continuation.
    ///
    /// In the service-worker flow (`service_worker = true`) the registry is
    /// updated but no Fetch command is sent; there is nothing paused to
    /// continue.
    async fn handle_request(
        &self,
        paused: PausedRequest,
        service_worker: bool,
    ) -> Result<(), DiscoveryError> {
        let Some(intercept) = self.options.intercept.clone() else {
            return Ok(());
        };
        tracing::debug!(
            url = %paused.url,
            resource_type = ?paused.resource_type,
            meta = self.options.meta.as_deref().unwrap_or_default(),
            "handling request"
        );

        // a request id already in flight means the browser is following a
        // redirect; archive the interim hop into the successor's chain
        let mut redirect_chain = Vec::new();
        if let Some(mut prior) = self.registry.forget(&paused.request_id, true) {
            redirect_chain = std::mem::take(&mut prior.redirect_chain);
            redirect_chain.push(prior);
        }

        let record = RequestRecord {
            request_id: paused.request_id.clone(),
            intercept_id: paused.intercept_id.clone(),
            url: paused.url.clone(),
            method: paused.method.clone(),
            headers: paused.headers.clone(),
            resource_type: paused.resource_type,
            redirect_chain,
            response: None,
        };
        let origin_url = record.origin_url().to_string();
        self.registry.insert(record);

        if service_worker {
            return Ok(());
        }
        let Some(intercept_id) = paused.intercept_id.as_deref() else {
            return Ok(());
        };

        if let Err(error) = self.decide(&intercept, &paused, &origin_url, intercept_id).await {
            self.handle_decision_error(&paused, intercept_id, error).await;
        }
        Ok(())
    }

    /// Issue exactly one of fulfill / continue / fail for a paused request.
    ///
    /// The cache is consulted under the *origin* URL -- the first hop of the
    /// redirect chain -- so a cached entry keyed by the original URL also
    /// covers its redirected descendants.
    async fn decide(
        &self,
        intercept: &InterceptConfig,
        paused: &PausedRequest,
        origin_url: &str,
        intercept_id: &str,
    ) -> Result<(), CdpError> {
        let resource = intercept.cache.get_resource(&normalize_url(origin_url));

        match resource {
            Some(resource)
                if resource.root || resource.provided || !intercept.disable_cache =>
            {
                tracing::debug!(url = %paused.url, "serving cached response");
                self.fulfill_from_cache(&paused.request_id, intercept_id, &resource)
                    .await
            }
            None if hostname_matches(&intercept.disallowed_hostnames, &paused.url) => {
                tracing::debug!(url = %paused.url, "failing disallowed request");
                self.send_guarded(
                    &paused.request_id,
                    "Fetch.failRequest",
                    json!({
                        "requestId": intercept_id,
                        "errorReason": "Aborted",
                    }),
                )
                .await
                .map(|_| ())
            }
            _ => {
                tracing::debug!(url = %paused.url, "continuing request");
                self.send_guarded(
                    &paused.request_id,
                    "Fetch.continueRequest",
                    json!({ "requestId": intercept_id }),
                )
                .await
                .map(|_| ())
            }
        }
    }

    async fn fulfill_from_cache(
        &self,
        request_id: &str,
        intercept_id: &str,
        resource: &Resource,
    ) -> Result<(), CdpError> {
        let mut response_headers: Vec<Value> = resource
            .headers
            .iter()
            .map(|(name, values)| {
                json!({
                    "name": name.to_lowercase(),
                    "value": values.join(", "),
                })
            })
            .collect();
        response_headers.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        // caller-supplied resources may carry a zero status sentinel; both
        // absent and zero fall back to 200
        let response_code = match resource.status {
            Some(status) if status != 0 => status,
            _ => 200,
        };

        self.send_guarded(
            request_id,
            "Fetch.fulfillRequest",
            json!({
                "requestId": intercept_id,
                "responseCode": response_code,
                "body": B64.encode(&resource.content),
                "responseHeaders": response_headers,
            }),
        )
        .await
        .map(|_| ())
    }

    /// A continuation that failed may have lost a race with the browser
    /// aborting the request. Give the abort event one tick to land, then
    /// either stand down (confirmed abort) or tell the browser to drop the
    /// request.
    async fn handle_decision_error(
        &self,
        paused: &PausedRequest,
        intercept_id: &str,
        error: CdpError,
    ) {
        if error.is_session_closed() {
            tracing::debug!(url = %paused.url, "session closed before interception decision");
            return;
        }
        if error.is_invalid_intercept_id() {
            tokio::task::yield_now().await;
            if self.registry.is_aborted(&paused.request_id) {
                tracing::debug!(url = %paused.url, "request aborted before interception decision");
                return;
            }
            let result = self
                .session
                .send(
                    "Fetch.failRequest",
                    json!({
                        "requestId": intercept_id,
                        "errorReason": "Failed",
                    }),
                )
                .await;
            if let Err(error) = result {
                tracing::debug!(url = %paused.url, error = %error, "failing request after abort race failed");
            }
        } else {
            tracing::debug!(url = %paused.url, error = %error, "error handling request");
        }
    }

    // -----------------------------------------------------------------------
    // Safe send
    // -----------------------------------------------------------------------

    /// Outbound sends referencing a request id check the aborted set first;
    /// a command for an aborted request must never reach the browser.
    async fn send_guarded(
        &self,
        request_id: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, CdpError> {
        if self.registry.is_aborted(request_id) {
            return Err(CdpError::RequestAborted {
                request_id: request_id.to_string(),
            });
        }
        self.session.send(method, params).await
    }
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, DiscoveryError> {
    serde_json::from_value(params).map_err(|e| {
        DiscoveryError::Cdp(CdpError::Protocol {
            detail: format!("bad event payload: {e}"),
        })
    })
}
