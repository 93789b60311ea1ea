//! Wire message types for the DevTools protocol.
//!
//! Every frame the browser sends is either a *response* (carries an `id`
//! correlating it to a command we sent) or an *event* (carries a `method`
//! and no `id`). [`CdpMessage::parse`] discriminates between the two.

use serde_json::Value;

/// An event pushed by the browser (e.g. `Network.requestWillBeSent`).
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// The event method name.
    pub method: String,
    /// The event parameters.
    pub params: Value,
}

impl CdpEvent {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// A response to a previously sent command.
#[derive(Debug, Clone)]
pub struct CdpResponse {
    /// The command id this response correlates to.
    pub id: u64,
    /// The result value on success.
    pub result: Option<Value>,
    /// The error object on failure.
    pub error: Option<CdpResponseError>,
}

/// Error object in a command response.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CdpResponseError {
    pub code: i64,
    pub message: String,
    pub data: Option<String>,
}

/// A parsed protocol frame.
#[derive(Debug, Clone)]
pub enum CdpMessage {
    Response(CdpResponse),
    Event(CdpEvent),
}

impl CdpMessage {
    /// Parse a raw JSON frame into a response or event.
    ///
    /// Returns `None` for frames that are neither (no `id` and no `method`).
    pub fn parse(json: &Value) -> Option<CdpMessage> {
        if let Some(id) = json.get("id").and_then(|v| v.as_u64()) {
            return Some(CdpMessage::Response(CdpResponse {
                id,
                result: json.get("result").cloned(),
                error: json
                    .get("error")
                    .and_then(|e| serde_json::from_value(e.clone()).ok()),
            }));
        }

        let method = json.get("method")?.as_str()?.to_string();
        let params = json.get("params").cloned().unwrap_or(Value::Null);
        Some(CdpMessage::Event(CdpEvent { method, params }))
    }
}
