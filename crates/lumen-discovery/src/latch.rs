//! Per-request lifecycle latches.
//!
//! Protocol events for one request can arrive in either order across the
//! `Network` and `Fetch` domains. Handlers serialize themselves on two
//! one-shot signals per request id: `request_will_be_sent` and
//! `response_received`. A latch can be awaited any number of times, before
//! or after it fires, and firing is idempotent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// A one-shot, idempotent, multi-awaiter signal.
#[derive(Debug, Default)]
pub struct Latch {
    fired: AtomicBool,
    notify: Notify,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the latch, waking every current and future awaiter.
    pub fn set(&self) {
        self.fired.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Wait until the latch fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        while !self.is_set() {
            // Register before the re-check so a concurrent set() cannot slip
            // between the load and the await.
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// The two ordered signals for one request id.
#[derive(Debug, Default)]
pub struct RequestLatches {
    /// Fired when `Network.requestWillBeSent` has been processed.
    pub request_will_be_sent: Latch,
    /// Fired when `Network.responseReceived` has attached the response.
    pub response_received: Latch,
}

/// Lazily-created latch pairs keyed by request id.
///
/// Entries are created on first access by either the producing or the
/// consuming handler and live for the page's lifetime; storage is bounded
/// by the number of distinct request ids a page observes.
#[derive(Debug, Default)]
pub struct LifecycleLatches {
    inner: Mutex<HashMap<String, Arc<RequestLatches>>>,
}

impl LifecycleLatches {
    /// Get the latch pair for a request id, creating it if absent.
    pub fn for_request(&self, request_id: &str) -> Arc<RequestLatches> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            map.entry(request_id.to_string())
                .or_insert_with(|| Arc::new(RequestLatches::default())),
        )
    }
}
