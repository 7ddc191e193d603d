//! Tunables for the sync core.

use std::time::Duration;

/// Every tunable the sync core and its async layer consume.
///
/// Defaults match the backend's behavior; override individual fields for
/// tests or unusual deployments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Messages per history page. The `has_more` flag is derived from pages
    /// shorter than this.
    pub page_size: usize,

    /// How long an inbound typing indicator stays alive without a refresh.
    /// The network cannot be trusted to deliver the explicit stop event.
    pub typing_timeout: Duration,

    /// Outbound typing signals are coalesced to at most one per window.
    pub typing_debounce: Duration,

    /// Trailing `typing=false` is sent after input pauses this long.
    pub typing_stop_after: Duration,

    /// Interval between ephemeral-message sweeps.
    pub reaper_interval: Duration,

    /// "Expiring soon" warnings fire inside this window before expiry.
    pub expiry_warning: Duration,

    /// Reconnect attempts before giving up.
    pub reconnect_max_retries: u32,

    /// Base delay between reconnect attempts; backoff grows linearly
    /// (attempt N waits N times this). Jitter belongs to the REST retry
    /// layer, not the socket.
    pub reconnect_base_delay: Duration,

    /// How long to wait for the auth handshake ack.
    pub handshake_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            typing_timeout: Duration::from_secs(5),
            typing_debounce: Duration::from_secs(2),
            typing_stop_after: Duration::from_secs(3),
            reaper_interval: Duration::from_secs(30),
            expiry_warning: Duration::from_secs(5 * 60),
            reconnect_max_retries: 5,
            reconnect_base_delay: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}
