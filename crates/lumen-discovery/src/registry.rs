//! The in-flight request registry.
//!
//! One mutex guards four collections: the in-flight record map, the pending
//! `requestWillBeSent` payloads awaiting their paused event, the set of
//! intercept ids that have already been offered credentials, and the set of
//! request ids the browser aborted. The lock is never held across an await;
//! handlers take it, mutate, and release within a single call.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::request::{RequestRecord, RequestWillBeSentEvent};

#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    in_flight: HashMap<String, RequestRecord>,
    pending: HashMap<String, RequestWillBeSentEvent>,
    authentications: HashSet<String>,
    aborted: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install a record, replacing any previous record for the same id.
    pub fn insert(&self, record: RequestRecord) {
        self.lock().in_flight.insert(record.request_id.clone(), record);
    }

    /// Clone the record for a request id, if still in flight.
    pub fn get(&self, request_id: &str) -> Option<RequestRecord> {
        self.lock().in_flight.get(request_id).cloned()
    }

    /// Apply a mutation to the record for a request id.
    ///
    /// Returns `None` if the record is gone (race-loss with `forget`).
    pub fn update<R>(
        &self,
        request_id: &str,
        f: impl FnOnce(&mut RequestRecord) -> R,
    ) -> Option<R> {
        self.lock().in_flight.get_mut(request_id).map(f)
    }

    /// Drop a request from the registry.
    ///
    /// Removes the in-flight record and its intercept id from the
    /// authentications set; unless `keep_pending`, also drops any pending
    /// `requestWillBeSent` payload. Idempotent: forgetting an unknown id is
    /// a no-op. Returns the removed record, if any.
    pub fn forget(&self, request_id: &str, keep_pending: bool) -> Option<RequestRecord> {
        let mut inner = self.lock();
        let record = inner.in_flight.remove(request_id);
        if let Some(intercept_id) = record.as_ref().and_then(|r| r.intercept_id.as_deref()) {
            inner.authentications.remove(intercept_id);
        }
        if !keep_pending {
            inner.pending.remove(request_id);
        }
        record
    }

    /// Record a `requestWillBeSent` payload awaiting its paused event.
    pub fn set_pending(&self, request_id: String, event: RequestWillBeSentEvent) {
        self.lock().pending.insert(request_id, event);
    }

    /// Take the pending payload for a request id, if any.
    pub fn take_pending(&self, request_id: &str) -> Option<RequestWillBeSentEvent> {
        self.lock().pending.remove(request_id)
    }

    /// Mark a request as aborted by the browser. Never unset.
    pub fn mark_aborted(&self, request_id: &str) {
        self.lock().aborted.insert(request_id.to_string());
    }

    pub fn is_aborted(&self, request_id: &str) -> bool {
        self.lock().aborted.contains(request_id)
    }

    /// True once credentials have been offered for this intercept id; a
    /// second auth challenge for the same id means they were rejected.
    pub fn auth_attempted(&self, intercept_id: &str) -> bool {
        self.lock().authentications.contains(intercept_id)
    }

    pub fn mark_auth_attempted(&self, intercept_id: &str) {
        self.lock().authentications.insert(intercept_id.to_string());
    }

    /// Snapshot of in-flight records matching a predicate.
    pub fn in_flight<F>(&self, filter: F) -> Vec<RequestRecord>
    where
        F: Fn(&RequestRecord) -> bool,
    {
        self.lock()
            .in_flight
            .values()
            .filter(|r| filter(r))
            .cloned()
            .collect()
    }

    /// Whether any in-flight record matches the predicate, without cloning.
    pub fn has_in_flight<F>(&self, filter: F) -> bool
    where
        F: Fn(&RequestRecord) -> bool,
    {
        self.lock().in_flight.values().any(|r| filter(r))
    }
}
