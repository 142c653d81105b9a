//! Network reachability monitor.
//!
//! Periodically probes the liveness endpoint and classifies connection
//! quality from the round-trip time. The processor consults the last
//! classification before a drain; it never starts a drain while the last
//! probe saw the backend offline.

use crate::api_client::RemoteApiClient;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// RTT below this is a good connection.
const GOOD_RTT: Duration = Duration::from_millis(100);
/// RTT below this is degraded; at or above (or failure) is offline.
const DEGRADED_RTT: Duration = Duration::from_millis(500);

/// Classification of the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionQuality {
    Good,
    Degraded,
    Offline,
}

/// Maps a probe result to a quality classification.
#[must_use]
pub fn classify(rtt: Option<Duration>) -> ConnectionQuality {
    match rtt {
        Some(rtt) if rtt < GOOD_RTT => ConnectionQuality::Good,
        Some(rtt) if rtt < DEGRADED_RTT => ConnectionQuality::Degraded,
        _ => ConnectionQuality::Offline,
    }
}

/// Tracks the last observed reachability of the remote API.
pub struct NetworkMonitor {
    api: Arc<RemoteApiClient>,
    quality: ConnectionQuality,
    last_probe_at: Option<Instant>,
}

impl NetworkMonitor {
    /// Creates a monitor that assumes the network is good until probed.
    pub fn new(api: Arc<RemoteApiClient>) -> Self {
        Self {
            api,
            quality: ConnectionQuality::Good,
            last_probe_at: None,
        }
    }

    /// Probes once and updates the classification.
    pub async fn probe_once(&mut self) -> ConnectionQuality {
        let rtt = self.api.probe().await.ok();
        self.quality = classify(rtt);
        self.last_probe_at = Some(Instant::now());
        debug!(quality = ?self.quality, rtt = ?rtt, "reachability probe");
        self.quality
    }

    /// Last observed quality.
    #[must_use]
    pub fn quality(&self) -> ConnectionQuality {
        self.quality
    }

    /// When the last probe ran, if ever.
    #[must_use]
    pub fn last_probe_at(&self) -> Option<Instant> {
        self.last_probe_at
    }

    /// Returns true if a drain should even be attempted.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.quality != ConnectionQuality::Offline
    }
}
