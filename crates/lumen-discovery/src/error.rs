//! Error types for the lumen-discovery crate.

use thiserror::Error;

use lumen_cdp::CdpError;

/// Errors surfaced to callers of the discovery engine.
///
/// Inbound event handlers never propagate errors (a bad event must not halt
/// the page); only idle waits and the initial watch setup return these.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The hard ceiling expired while requests were still in flight.
    #[error(
        "timed out waiting for network idle after {timeout_ms}ms. Active requests:\n  {}",
        .urls.join("\n  ")
    )]
    IdleTimeout { timeout_ms: u64, urls: Vec<String> },

    /// The session died while we were waiting on it.
    #[error("session closed: {reason}")]
    SessionClosed { reason: String },

    /// A protocol-level failure.
    #[error(transparent)]
    Cdp(#[from] CdpError),

    /// Response capture failed (body fetch, decode, or direct fetch).
    #[error("response capture failed: {detail}")]
    Capture { detail: String },
}
