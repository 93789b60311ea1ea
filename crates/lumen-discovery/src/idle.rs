//! Network idle detection.
//!
//! A page is idle when the filtered in-flight set has been empty for a
//! continuous quiet window. Waits are bounded by a process-wide hard
//! ceiling so a hung request (or an event stream the page never closes)
//! cannot stall a caller forever; on expiry the error lists the requests
//! still in flight.

use std::sync::OnceLock;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::DiscoveryError;
use crate::request::RequestRecord;
use crate::watcher::NetworkWatcher;

/// Hard ceiling on idle waits when the environment does not override it.
const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 30_000;

/// Environment override for the hard ceiling, in milliseconds.
const NETWORK_TIMEOUT_ENV: &str = "LUMEN_NETWORK_IDLE_WAIT_TIMEOUT";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The process-wide hard ceiling, read from the environment once at first
/// use. Values above 60s warn once.
pub(crate) fn network_timeout() -> Duration {
    static TIMEOUT_MS: OnceLock<u64> = OnceLock::new();
    let ms = *TIMEOUT_MS.get_or_init(|| {
        let ms = std::env::var(NETWORK_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_NETWORK_TIMEOUT_MS);
        if ms > 60_000 {
            tracing::warn!(
                timeout_ms = ms,
                "{NETWORK_TIMEOUT_ENV} above 60000ms can stall page captures"
            );
        }
        ms
    });
    Duration::from_millis(ms)
}

impl NetworkWatcher {
    /// Wait for network idle using the configured quiet window and every
    /// in-flight request.
    pub async fn wait_for_idle(&self) -> Result<(), DiscoveryError> {
        let quiet = Duration::from_millis(self.inner.options.idle_timeout_ms());
        self.idle(|_| true, quiet).await
    }

    /// Wait until no in-flight request matches `filter` for a continuous
    /// `quiet` window, bounded by the process-wide hard ceiling.
    pub async fn idle<F>(&self, filter: F, quiet: Duration) -> Result<(), DiscoveryError>
    where
        F: Fn(&RequestRecord) -> bool,
    {
        self.idle_with_ceiling(filter, quiet, network_timeout()).await
    }

    /// [`idle`](Self::idle) with an explicit hard ceiling.
    pub async fn idle_with_ceiling<F>(
        &self,
        filter: F,
        quiet: Duration,
        ceiling: Duration,
    ) -> Result<(), DiscoveryError>
    where
        F: Fn(&RequestRecord) -> bool,
    {
        let deadline = Instant::now() + ceiling;
        let mut quiet_since: Option<Instant> = None;

        loop {
            if let Some(reason) = self.inner.session.closed_reason() {
                return Err(DiscoveryError::SessionClosed { reason });
            }

            let now = Instant::now();
            if self.inner.registry.has_in_flight(&filter) {
                quiet_since = None;
            } else {
                let since = *quiet_since.get_or_insert(now);
                if now.duration_since(since) >= quiet {
                    return Ok(());
                }
            }

            if now >= deadline {
                let urls = self
                    .inner
                    .registry
                    .in_flight(&filter)
                    .into_iter()
                    .map(|r| r.url)
                    .collect();
                return Err(DiscoveryError::IdleTimeout {
                    timeout_ms: ceiling.as_millis() as u64,
                    urls,
                });
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
