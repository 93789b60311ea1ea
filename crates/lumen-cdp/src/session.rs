//! The session seam the discovery engine is written against.
//!
//! Higher-level code never talks to the WebSocket client directly; it sends
//! commands through [`CdpSession`] so tests can substitute a scripted
//! implementation and so child sessions (service workers, out-of-process
//! iframes) can share the command surface.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CdpError;

/// A live protocol session to a single browser target.
#[async_trait]
pub trait CdpSession: Send + Sync {
    /// Send a command and wait for its result.
    async fn send(&self, method: &str, params: Value) -> Result<Value, CdpError>;

    /// The reason the session closed, if it has.
    ///
    /// A `Some` return means no further commands will succeed and any
    /// in-progress waits should surface this reason to their callers.
    fn closed_reason(&self) -> Option<String>;

    /// Whether this session is attached to the top-level document target
    /// (as opposed to a child target such as a service worker).
    fn is_document(&self) -> bool {
        true
    }
}
