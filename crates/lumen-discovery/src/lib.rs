//! Browser-driven asset discovery.
//!
//! Attaches to a page session speaking the DevTools protocol, observes
//! every network request the page issues, conditionally serves requests
//! from an externally-owned resource cache, captures response bodies that
//! qualify as reusable assets, and reports when the page reaches network
//! idle.
//!
//! # Architecture
//!
//! The engine reconciles two overlapping event streams -- the observational
//! `Network` domain and the interception `Fetch` domain -- which describe
//! the same logical request under different identifiers and can arrive in
//! either order:
//!
//! - **`latch`**: per-request one-shot signals that serialize handlers
//!   racing across the two domains.
//! - **`registry`**: the in-flight record map plus the pending, aborted,
//!   and authentication-attempt bookkeeping.
//! - **`watcher`**: subscribes to the protocol events, routes each to its
//!   handler, decides fulfill/continue/fail for every paused request, and
//!   guards outbound sends against already-aborted requests.
//! - **`capture`**: filters finished responses and feeds qualifying bodies
//!   to the external cache, re-fetching fonts directly over HTTP.
//! - **`idle`**: quiet-window idle detection under a hard wall-clock
//!   ceiling, with diagnostic errors listing whatever is still in flight.
//!
//! # Example (conceptual)
//!
//! ```ignore
//! use std::sync::Arc;
//! use lumen_cdp::CdpClient;
//! use lumen_discovery::{NetworkWatcher, WatchOptions, InterceptConfig};
//!
//! let client = Arc::new(CdpClient::connect(ws_url).await?);
//! let events = client.take_events().expect("fresh client");
//!
//! let options = WatchOptions {
//!     intercept: Some(InterceptConfig::new(cache)),
//!     ..Default::default()
//! };
//! let watcher = NetworkWatcher::watch(client, options).await?;
//! watcher.run(events);
//!
//! // navigate the page, then:
//! watcher.wait_for_idle().await?;
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod idle;
pub mod intercept;
pub mod latch;
pub mod registry;
pub mod request;
pub mod watcher;

pub use capture::{BodyFetcher, HttpBodyFetcher, ALLOWED_STATUSES, MAX_RESOURCE_SIZE};
pub use config::{Credentials, WatchOptions};
pub use error::DiscoveryError;
pub use intercept::{create_resource, InterceptConfig, Resource, ResourceCache};
pub use request::{RequestRecord, ResourceType, ResponseBody, ResponseInfo};
pub use watcher::NetworkWatcher;
