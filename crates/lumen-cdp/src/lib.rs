//! Chrome DevTools Protocol plumbing for the lumen toolkit.
//!
//! This crate provides the protocol layer the discovery engine sits on:
//!
//! - **`client`**: WebSocket client with JSON-RPC command/response
//!   correlation and event fan-out to a channel.
//! - **`session`**: the [`CdpSession`] trait -- the seam higher-level code
//!   sends commands through, so tests can substitute a scripted session.
//! - **`message`**: wire frame types ([`CdpEvent`], [`CdpResponse`]) and
//!   response/event discrimination.
//! - **`error`**: the typed error taxonomy, including the aborted-request
//!   sentinel and predicates for browser-reported interception failures.
//!
//! The browser must be running with `--remote-debugging-port`; page targets
//! are listed at `http://localhost:{port}/json`.

pub mod client;
pub mod error;
pub mod message;
pub mod session;

pub use client::CdpClient;
pub use error::CdpError;
pub use message::{CdpEvent, CdpMessage, CdpResponse};
pub use session::CdpSession;
