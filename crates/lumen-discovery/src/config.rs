//! Watcher configuration.

use std::collections::HashMap;

use crate::intercept::InterceptConfig;

/// Credentials offered on `Fetch.authRequired` challenges and injected as
/// Basic auth on direct fetches.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Options for attaching a watcher to a page session.
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Quiet-window length for network idle, in milliseconds.
    /// Zero means the built-in default of 100ms.
    pub network_idle_timeout: u64,
    /// Credentials for auth challenges and direct fetches.
    pub authorization: Option<Credentials>,
    /// Extra headers applied to every request the page issues.
    pub request_headers: HashMap<String, String>,
    /// Keep service workers enabled and drive interception decisions from
    /// `Network.requestWillBeSent` for requests they synthesize.
    pub capture_mocked_service_worker: bool,
    /// User agent override; defaults to the browser's reported user agent
    /// with the "Headless" marker removed.
    pub user_agent: Option<String>,
    /// Interception policy; `None` observes without intercepting.
    pub intercept: Option<InterceptConfig>,
    /// Opaque annotation attached to log lines.
    pub meta: Option<String>,
}

impl WatchOptions {
    pub(crate) const DEFAULT_IDLE_TIMEOUT_MS: u64 = 100;

    /// The effective quiet-window length.
    pub fn idle_timeout_ms(&self) -> u64 {
        if self.network_idle_timeout == 0 {
            Self::DEFAULT_IDLE_TIMEOUT_MS
        } else {
            self.network_idle_timeout
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_timeout_defaults_to_100ms() {
        assert_eq!(WatchOptions::default().idle_timeout_ms(), 100);
        let options = WatchOptions {
            network_idle_timeout: 250,
            ..Default::default()
        };
        assert_eq!(options.idle_timeout_ms(), 250);
    }
}
