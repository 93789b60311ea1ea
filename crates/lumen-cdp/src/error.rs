//! Error types for the lumen-cdp crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while talking to a DevTools endpoint.
#[derive(Debug, Error)]
pub enum CdpError {
    /// Failed to establish a WebSocket connection to the browser.
    #[error("failed to connect to DevTools endpoint {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// The browser answered a command with an error response.
    #[error("browser error {code}: {message}")]
    Browser {
        code: i64,
        message: String,
        data: Option<String>,
    },

    /// A command timed out waiting for its response.
    #[error("command '{method}' timed out after {duration:?}")]
    Timeout { method: String, duration: Duration },

    /// A transport-level error (serialization, unexpected message format).
    #[error("protocol error: {detail}")]
    Protocol { detail: String },

    /// The session is gone; no further commands can be sent.
    #[error("session closed: {reason}")]
    SessionClosed { reason: String },

    /// An outbound send was refused because the browser already aborted the
    /// request it references.
    #[error("request {request_id} already aborted")]
    RequestAborted { request_id: String },
}

impl CdpError {
    /// True when a Fetch command was rejected because the interception id no
    /// longer exists -- the browser aborted the request between pausing it
    /// and our continuation arriving.
    pub fn is_invalid_intercept_id(&self) -> bool {
        match self {
            CdpError::RequestAborted { .. } => true,
            CdpError::Browser { message, .. } => message.contains("Invalid InterceptionId"),
            _ => false,
        }
    }

    /// True when the error indicates the underlying session has closed.
    pub fn is_session_closed(&self) -> bool {
        match self {
            CdpError::SessionClosed { .. } => true,
            CdpError::Browser { message, .. } => message.contains("Session closed"),
            CdpError::Protocol { detail } => detail.contains("connection closed"),
            _ => false,
        }
    }
}
